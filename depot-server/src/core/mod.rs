//! 核心模块 - 配置、状态、错误和后台任务
//!
//! - [`Config`] - 服务配置
//! - [`ServerState`] - 装配好的服务组件
//! - [`ServerError`] - 启动阶段错误
//! - [`BackgroundTasks`] - 后台任务管理

pub mod config;
pub mod error;
pub mod state;
pub mod tasks;

pub use config::{Config, SheetsConfig};
pub use error::{Result, ServerError};
pub use state::ServerState;
pub use tasks::{BackgroundTasks, TaskKind};
