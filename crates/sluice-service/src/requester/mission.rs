use crate::sink::ResponseSink;

/// A request waiting for file contents.
#[derive(Debug)]
pub(super) struct PendingRequest {
    pub sink: ResponseSink,
    pub compress: bool,
}

/// One in-flight read of a path, together with every request waiting for it.
///
/// A mission exists exactly while the read is outstanding. It is removed in the same critical
/// section that publishes the read result to the cache, so a request either joins the queue or
/// sees the updated cache, never neither.
#[derive(Debug)]
pub(super) struct Mission {
    queue: Vec<PendingRequest>,
}

impl Mission {
    pub fn new(first: PendingRequest) -> Self {
        Self { queue: vec![first] }
    }

    pub fn fanout(&self) -> usize {
        self.queue.len()
    }

    pub fn join(&mut self, request: PendingRequest) {
        self.queue.push(request);
    }

    pub fn into_queue(self) -> Vec<PendingRequest> {
        self.queue
    }
}

/// Whether a path currently has a read in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MissionState {
    /// No read is outstanding.
    Idle,
    /// A read is outstanding and `fanout` requests are waiting for it.
    InFlight { fanout: usize },
}
