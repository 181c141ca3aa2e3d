use std::sync::Arc;

use crate::coordinator::RefreshCoordinator;
use crate::source::ChannelProducer;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<RefreshCoordinator>,
    /// Ingest side of the stream; the HTTP endpoint stands in for upstream producers.
    pub producer: ChannelProducer,
}

impl AppState {
    pub fn new(coordinator: Arc<RefreshCoordinator>, producer: ChannelProducer) -> Self {
        Self { coordinator, producer }
    }
}
