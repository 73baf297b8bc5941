//! HTTP 入口
//!
//! 执行器 agent 面向控制面的小表面：注册、心跳、注销，以及
//! 执行开始/结果两类回调。管理侧 CRUD 不在此 crate 范围内。

pub mod error;
pub mod handlers;
pub mod response;
pub mod routes;

pub use routes::{create_routes, AppState};
