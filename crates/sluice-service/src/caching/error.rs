use thiserror::Error;

/// A configuration that cannot produce a working cache or requester.
///
/// These errors are fatal at construction time, no instance is ever created from an invalid
/// configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A [`RecencyCache`](super::RecencyCache) needs room for at least one entry.
    #[error("cache capacity must be positive")]
    ZeroCapacity,
    /// At least the request starting a read must fit into its mission.
    #[error("max fanout must be positive")]
    ZeroFanout,
}
