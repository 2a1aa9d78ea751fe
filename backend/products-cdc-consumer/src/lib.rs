pub mod config;
pub mod error;
pub mod metrics;
pub mod services;

pub use config::CdcConsumerConfig;
pub use error::{AppError, Result};
