pub mod app;
pub mod config;
pub mod error;
pub mod fetch;
pub mod stream;
pub mod tasks;
pub mod utils;

pub use error::{AppError, Result};
