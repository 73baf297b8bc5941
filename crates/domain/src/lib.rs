//! 领域层
//!
//! 调度系统的核心业务模型与仓储抽象，不依赖具体的存储或网络实现。

pub mod entities;
pub mod repositories;

pub use entities::*;
pub use repositories::*;
