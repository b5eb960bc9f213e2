pub mod config;

pub use config::{DispatchConfig, MonitorConfig, RetryConfig};
