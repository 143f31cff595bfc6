use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::Method;
use axum::routing::{get, post};
use sentry::integrations::tower::{NewSentryLayer, SentryHttpLayer};
use sluice_service::metric;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::service::FileService;

mod error;
mod files;
mod metrics;
mod multipart;
mod upload;

pub use error::ResponseError;
use metrics::MetricsLayer;

use files::serve_file;
use upload::handle_upload as upload;

pub async fn healthcheck() -> &'static str {
    metric!(counter("healthcheck") += 1);
    "ok"
}

pub fn create_app(service: FileService) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST]);

    // The layers here go "top to bottom" according to the reading order here.
    let layer = ServiceBuilder::new()
        .layer(NewSentryLayer::new_from_top())
        .layer(SentryHttpLayer::new().enable_transaction())
        .layer(TraceLayer::new_for_http())
        .layer(MetricsLayer)
        .layer(cors)
        .layer(DefaultBodyLimit::max(service.config().max_upload_size));

    Router::new()
        .route("/api/upload", post(upload))
        .fallback(serve_file)
        .with_state(service)
        .layer(layer)
        // the healthcheck is last, as it will bypass all the middlewares
        .route("/healthcheck", get(healthcheck))
}

#[cfg(test)]
mod tests {
    use reqwest::{Client, StatusCode};
    use sluice_service::config::Config;

    use super::*;

    fn server() -> (sluice_test::TempDir, sluice_test::Server) {
        let root = sluice_test::site(&[("static/index.html", b"home")]);
        let config = Config {
            static_dir: root.path().join("static"),
            data_dir: root.path().join("data"),
            cache_dir: None,
            ..Default::default()
        };
        let server = sluice_test::Server::new(create_app(FileService::create(config).unwrap()));
        (root, server)
    }

    #[tokio::test]
    async fn test_healthcheck() {
        sluice_test::setup();
        let (_root, server) = server();

        let response = Client::new()
            .get(server.url("/healthcheck"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_cors() {
        sluice_test::setup();
        let (_root, server) = server();

        let response = Client::new()
            .get(server.url("/"))
            .header("origin", "https://example.com")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["access-control-allow-origin"], "*");

        let response = Client::new()
            .request(reqwest::Method::OPTIONS, server.url("/api/upload"))
            .header("origin", "https://example.com")
            .header("access-control-request-method", "POST")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let allowed = response.headers()["access-control-allow-methods"]
            .to_str()
            .unwrap();
        assert!(allowed.contains("POST"), "{allowed}");
    }
}
