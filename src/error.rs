//! Error types for sms-relay

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("test send rejected: webhook URL for slot {slot} is not a recognized test endpoint ({url:?})")]
    TestSendRejected { slot: usize, url: String },
}

pub type Result<T> = std::result::Result<T, Error>;
