//! Settings, errors and telemetry shared by the Star Shop bot crates.

pub mod config;
pub mod error;
pub mod telemetry;

pub use config::Settings;
pub use error::AppError;
