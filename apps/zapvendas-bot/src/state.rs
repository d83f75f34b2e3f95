use std::sync::Arc;

use crate::engine::store::EngineStore;
use crate::engine::FlowEngine;
use crate::services::broadcast::BroadcastService;

#[derive(Clone)]
pub struct AppState {
    pub engine: FlowEngine,
    pub broadcast: BroadcastService,
    pub store: Arc<dyn EngineStore>,
}
