//! Shared application state for the HTTP layer.

use std::sync::Arc;

use scrive_events::PipelineStatus;
use scrive_storage::Database;

use crate::EventRouter;

#[derive(Clone)]
pub struct AppState {
    /// Wire-level event fan-out for `/events` subscribers.
    pub events: Arc<EventRouter>,
    /// Draft persistence; `None` disables the draft/revision endpoints
    /// (they answer 503).
    pub store: Option<Arc<Database>>,
    pub status: Arc<PipelineStatus>,
    pub model_path: String,
}

impl AppState {
    pub fn new(
        events: Arc<EventRouter>,
        store: Option<Arc<Database>>,
        status: Arc<PipelineStatus>,
        model_path: impl Into<String>,
    ) -> Self {
        Self {
            events,
            store,
            status,
            model_path: model_path.into(),
        }
    }
}
