//! 运行时状态模块
//!
//! 管理应用状态和全局 shutdown 信号

pub mod app_state;

pub use app_state::{get_shutdown_token, trigger_shutdown, AppState};
