pub mod api;
pub mod auth;
pub mod config;
pub mod enrich;
pub mod error;
pub mod ingest;
pub mod models;
pub mod query;
pub mod storage;

pub use error::{TrackError, TrackResult};
