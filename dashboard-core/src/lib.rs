pub mod backup;
pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod health;
pub mod live;
mod process;

pub use error::{DashError, Result};
