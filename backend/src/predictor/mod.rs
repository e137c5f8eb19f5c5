mod client;

pub use client::PredictionClient;

use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum PredictorError {
    #[error("Prediction request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Prediction service responded with status {status}")]
    Upstream { status: u16, detail: Value },
    #[error("Malformed prediction response: {0}")]
    Malformed(String),
}
