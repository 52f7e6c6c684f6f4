pub mod coordinator;
pub mod frame_scan;
pub mod qr;
pub mod queue;
pub mod sampler;
pub mod store;
pub mod submit;
