use axum::routing::{get, post};
use axum::Router;

use cronplane_dispatcher::{DispatchService, ExecutorRegistry};

use crate::handlers::{
    handle_result, handle_start, health_check, heartbeat_executor, register_executor,
    unregister_executor,
};

#[derive(Clone)]
pub struct AppState {
    pub registry: ExecutorRegistry,
    pub dispatch: DispatchService,
}

pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/executor/register", post(register_executor))
        .route("/executor/heartbeat", post(heartbeat_executor))
        .route("/executor/unregister", post(unregister_executor))
        .route("/callback", post(handle_result))
        .route("/callback/start", post(handle_start))
        .with_state(state)
}
