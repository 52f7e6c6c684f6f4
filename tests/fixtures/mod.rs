//! Scripted videos for pipeline tests
#![allow(dead_code)]

/// A fake video: how many one-second frames it samples into, and what the
/// decoder sees in each of them.
#[derive(Debug, Clone)]
pub struct VideoFixture {
    pub job_id: &'static str,
    pub frames: usize,
    /// `(frame index, QR content)`
    pub codes: &'static [(usize, &'static str)],
    /// Frame indices whose decode raises an error
    pub corrupt_frames: &'static [usize],
    pub description: &'static str,
}

pub const SINGLE_CODE: VideoFixture = VideoFixture {
    job_id: "abc",
    frames: 3,
    codes: &[(1, "HELLO")],
    corrupt_frames: &[],
    description: "3 second video, code on second 1 only",
};

pub const NO_CODES: VideoFixture = VideoFixture {
    job_id: "blank",
    frames: 5,
    codes: &[],
    corrupt_frames: &[],
    description: "5 second video without any QR code",
};

pub const PARTIALLY_CORRUPT: VideoFixture = VideoFixture {
    job_id: "partial",
    frames: 6,
    codes: &[(0, "start"), (2, "middle"), (5, "end")],
    corrupt_frames: &[3],
    description: "frame 3 cannot be decoded, the rest still count",
};

pub const REPEATED_CODE: VideoFixture = VideoFixture {
    job_id: "repeat",
    frames: 12,
    codes: &[
        (11, "https://example.com/pay"),
        (0, "https://example.com/pay"),
        (7, "SKU-42"),
        (1, "https://example.com/pay"),
    ],
    corrupt_frames: &[],
    description: "same code on several frames, listed out of order",
};

pub const ALL_FIXTURES: &[VideoFixture] = &[SINGLE_CODE, NO_CODES, PARTIALLY_CORRUPT, REPEATED_CODE];
