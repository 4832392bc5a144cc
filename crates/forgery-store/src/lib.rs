//! forgery-store: the five-table data layer behind the forgery service.
//!
//! Users, uploads, predictions, model metrics and retrain triggers live in a
//! single SQLite database accessed through `tokio-rusqlite`, so every call is
//! async and the connection is shared by cloning [`Store`].

pub mod records;
mod schema;
pub mod store;

pub use records::{HistoryEntry, ModelMetric, NewPrediction, Prediction, RetrainTrigger, Upload, User};
pub use store::{Store, StoreError};

/// Seconds since the Unix epoch, with sub-second precision.
pub fn now_secs() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
