use std::sync::Arc;

use orchestrator::Core;

#[derive(Clone)]
pub struct ApiState {
    pub core: Arc<Core>,
}

impl ApiState {
    pub fn new(core: Arc<Core>) -> Self {
        Self { core }
    }
}
