//! cronplane 控制面
//!
//! 组装层：配置加载、日志初始化、组件接线与优雅关闭。
//! 调度语义在 cronplane-dispatcher，存储在 cronplane-infrastructure。

pub mod app;
pub mod logging;
pub mod shutdown;

pub use app::Application;
