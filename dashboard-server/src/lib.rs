// 私有模块声明
mod api;
mod app;
mod cli;
mod commands;
mod server;
mod shutdown;
mod utils;

// 通过 pub use 精确控制对外暴露的接口
pub use app::{DashboardApp, DashboardBackups};
pub use cli::{Cli, Commands};
pub use server::{AppState, router};
pub use shutdown::{ShutdownCoordinator, ShutdownReport, StepOutcome, shutdown_signal};
pub use utils::{LOG_FILE_ENV, setup_logging};
