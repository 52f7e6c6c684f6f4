//! Video QR code extraction pipeline
//!
//! Uploaded videos are submitted as jobs on a durable Redis queue. A worker
//! samples one frame per second with ffmpeg, scans every frame for a QR code
//! in parallel, and persists the timestamped codes alongside the job status
//! for readers to poll.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
pub mod shutdown;
