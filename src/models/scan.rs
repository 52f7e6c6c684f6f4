use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A still image sampled from the source video. Index `i` covers second `i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub index: usize,
    pub path: PathBuf,
}

impl Frame {
    pub fn timestamp_seconds(&self) -> f64 {
        self.index as f64
    }
}

/// A QR code decoded from one frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QrCodeResult {
    pub content: String,
    pub timestamp_seconds: f64,
}

impl QrCodeResult {
    pub fn new(content: impl Into<String>, timestamp_seconds: f64) -> Self {
        Self {
            content: content.into(),
            timestamp_seconds,
        }
    }
}
