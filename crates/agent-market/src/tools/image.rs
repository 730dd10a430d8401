//! Chart image decoding into a grayscale sample grid

use async_trait::async_trait;
use image::ImageReader;
use std::io::Cursor;

use crate::error::{MarketError, Result};
use crate::types::{ChartImage, RawImage, SampleGrid};

/// Turns a chart payload into a grayscale grid
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageDecoder: Send + Sync {
    async fn decode(&self, image: &ChartImage) -> Result<SampleGrid>;
}

/// Decoder for encoded chart images and raw pixel buffers
///
/// Binary netpbm (PGM `P5`, PPM `P6`) is parsed directly; every other encoded
/// payload (PNG, JPEG, ...) goes through the `image` crate with its default
/// allocation limits. Colour is reduced with ITU-R 601 luma weights.
#[derive(Debug, Clone, Copy, Default)]
pub struct RasterDecoder;

impl RasterDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decode encoded image bytes
    pub fn decode_bytes(&self, bytes: &[u8]) -> Result<SampleGrid> {
        if bytes.starts_with(b"P5") || bytes.starts_with(b"P6") {
            return decode_netpbm(bytes);
        }

        let decoded = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()?
            .decode()?;
        let rgb = decoded.to_rgb8();
        let raw = RawImage {
            width: rgb.width() as usize,
            height: rgb.height() as usize,
            channels: 3,
            samples: rgb.into_raw(),
        };
        to_grayscale(&raw)
    }
}

#[async_trait]
impl ImageDecoder for RasterDecoder {
    async fn decode(&self, image: &ChartImage) -> Result<SampleGrid> {
        match image {
            ChartImage::Path { path } => {
                let bytes = tokio::fs::read(path).await?;
                self.decode_bytes(&bytes)
            }
            ChartImage::Encoded { bytes } => self.decode_bytes(bytes),
            ChartImage::Pixels(raw) => to_grayscale(raw),
        }
    }
}

fn decode_netpbm(bytes: &[u8]) -> Result<SampleGrid> {
    let mut cursor = HeaderCursor::new(bytes);
    let channels = match cursor.token()? {
        b"P5" => 1,
        _ => 3,
    };
    let width = cursor.number("width")?;
    let height = cursor.number("height")?;
    let max_value = cursor.number("maxval")?;
    if max_value == 0 || max_value > 255 {
        return Err(MarketError::ImageDecode(format!(
            "unsupported maxval {max_value}; only 8-bit samples are handled"
        )));
    }
    let raster = cursor.raster()?;

    let expected = sample_count(width, height, channels)?;
    if raster.len() < expected {
        return Err(MarketError::ImageDecode(format!(
            "truncated raster: expected {expected} bytes, found {}",
            raster.len()
        )));
    }

    let raw = RawImage {
        width,
        height,
        channels: channels as u8,
        samples: rescale(&raster[..expected], max_value),
    };
    to_grayscale(&raw)
}

/// Number of samples in a `width` x `height` image, failing on overflow
pub(crate) fn sample_count(width: usize, height: usize, channels: usize) -> Result<usize> {
    width
        .checked_mul(height)
        .and_then(|pixels| pixels.checked_mul(channels))
        .ok_or_else(|| MarketError::ImageDecode("image dimensions overflow".to_string()))
}

/// Collapse a raw buffer to one luma sample per pixel (ITU-R 601 weights)
pub fn to_grayscale(raw: &RawImage) -> Result<SampleGrid> {
    let channels = usize::from(raw.channels);
    if channels != 1 && channels != 3 {
        return Err(MarketError::ImageDecode(format!(
            "unsupported channel count {channels}"
        )));
    }
    let expected = sample_count(raw.width, raw.height, channels)?;
    if raw.samples.len() != expected {
        return Err(MarketError::ImageDecode(format!(
            "expected {expected} samples for {}x{}x{channels}, got {}",
            raw.width,
            raw.height,
            raw.samples.len()
        )));
    }

    if channels == 1 {
        return SampleGrid::new(raw.width, raw.height, raw.samples.clone());
    }
    let luma = raw
        .samples
        .chunks_exact(3)
        .map(|px| {
            let weighted =
                299 * u32::from(px[0]) + 587 * u32::from(px[1]) + 114 * u32::from(px[2]);
            ((weighted + 500) / 1000) as u8
        })
        .collect();
    SampleGrid::new(raw.width, raw.height, luma)
}

fn rescale(samples: &[u8], max_value: usize) -> Vec<u8> {
    if max_value == 255 {
        return samples.to_vec();
    }
    samples
        .iter()
        .map(|&s| ((usize::from(s).min(max_value) * 255) / max_value) as u8)
        .collect()
}

struct HeaderCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> HeaderCursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn skip_separators(&mut self) {
        while let Some(&b) = self.bytes.get(self.pos) {
            if b == b'#' {
                while let Some(&c) = self.bytes.get(self.pos) {
                    self.pos += 1;
                    if c == b'\n' {
                        break;
                    }
                }
            } else if b.is_ascii_whitespace() {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn token(&mut self) -> Result<&'a [u8]> {
        self.skip_separators();
        let start = self.pos;
        while let Some(&b) = self.bytes.get(self.pos) {
            if b.is_ascii_whitespace() || b == b'#' {
                break;
            }
            self.pos += 1;
        }
        if start == self.pos {
            return Err(MarketError::ImageDecode("truncated image header".to_string()));
        }
        Ok(&self.bytes[start..self.pos])
    }

    fn number(&mut self, field: &str) -> Result<usize> {
        let token = self.token()?;
        std::str::from_utf8(token)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| MarketError::ImageDecode(format!("invalid {field} in image header")))
    }

    /// Raster starts after exactly one whitespace byte following the header
    fn raster(self) -> Result<&'a [u8]> {
        match self.bytes.get(self.pos) {
            Some(b) if b.is_ascii_whitespace() => Ok(&self.bytes[self.pos + 1..]),
            _ => Err(MarketError::ImageDecode(
                "missing separator before raster".to_string(),
            )),
        }
    }
}
