pub mod app;
pub mod config;
pub mod error;
pub mod handlers;
pub mod index;
pub mod ml;
pub mod models;
pub mod routes;
pub mod scripts;
pub mod services;

pub use config::Config;
pub use error::{ApiError, Result};
