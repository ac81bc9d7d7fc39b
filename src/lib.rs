pub mod analytics;
pub mod api;
pub mod cache;
pub mod calendar;
pub mod certification;
pub mod config;
pub mod error;
pub mod history;
pub mod ingest;
pub mod models;
pub mod records;
pub mod repository;
pub mod session;
pub mod units;

#[cfg(test)]
mod test_support;

pub use error::{ChartError, Result};
