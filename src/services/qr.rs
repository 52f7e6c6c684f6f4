use image::GrayImage;
use std::path::Path;

/// Decodes a QR code from one still image.
///
/// Implementations are called from decode worker threads, one frame per call.
pub trait QrDecoder: Send + Sync {
    /// Returns `Ok(None)` when the image contains no readable code.
    fn decode(&self, image_path: &Path) -> Result<Option<String>, DecodeError>;

    /// Capability check run once at job start.
    fn check_support(&self) -> Result<(), DecodeError> {
        Ok(())
    }
}

/// Pure-Rust decoder built on `rqrr`.
///
/// Grid detection is rotation-invariant. With `try_harder` set, an image
/// that yields nothing is retried with inverted polarity to pick up
/// light-on-dark codes.
#[derive(Debug, Clone)]
pub struct RqrrDecoder {
    try_harder: bool,
}

impl RqrrDecoder {
    pub fn new(try_harder: bool) -> Self {
        Self { try_harder }
    }

    fn decode_luma(luma: &GrayImage) -> Option<String> {
        let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
            luma.width() as usize,
            luma.height() as usize,
            |x, y| luma.get_pixel(x as u32, y as u32)[0],
        );
        prepared
            .detect_grids()
            .into_iter()
            .find_map(|grid| match grid.decode() {
                Ok((_meta, content)) => Some(content),
                Err(err) => {
                    tracing::trace!(error = ?err, "QR grid found but not decodable");
                    None
                }
            })
    }
}

impl Default for RqrrDecoder {
    fn default() -> Self {
        Self::new(true)
    }
}

impl QrDecoder for RqrrDecoder {
    fn decode(&self, image_path: &Path) -> Result<Option<String>, DecodeError> {
        let mut luma = image::open(image_path)?.to_luma8();

        if let Some(content) = Self::decode_luma(&luma) {
            return Ok(Some(content));
        }
        if !self.try_harder {
            return Ok(None);
        }

        image::imageops::invert(&mut luma);
        Ok(Self::decode_luma(&luma))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("failed to load frame image: {0}")]
    Image(#[from] image::ImageError),

    #[error("QR decoding is not supported on this host: {0}")]
    Unsupported(String),

    #[error("QR decoding failed: {0}")]
    Other(String),
}
