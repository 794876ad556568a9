use std::io::Cursor;
use std::str::FromStr;

use image::DynamicImage;
use serde::{Deserialize, Serialize};

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("image data is empty")]
    EmptyData,
    #[error("image is {size} bytes, exceeding the {max} byte limit")]
    TooLarge { size: usize, max: usize },
    #[error("quality must be between 1 and 100, got {0}")]
    InvalidQuality(u8),
    #[error("image data could not be decoded")]
    InvalidData,
    #[error("failed to decode image: {0}")]
    Decode(String),
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),
    #[error("failed to encode {format} output: {message}")]
    Encode {
        format: &'static str,
        message: String,
    },
}

// ── Output format ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    #[serde(alias = "jpg")]
    Jpeg,
    Png,
    Webp,
}

impl ImageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Webp => "webp",
        }
    }

    /// Map the format reported by the decoder to our label set.
    fn from_detected(format: image::ImageFormat) -> Option<Self> {
        match format {
            image::ImageFormat::Jpeg => Some(Self::Jpeg),
            image::ImageFormat::Png => Some(Self::Png),
            image::ImageFormat::WebP => Some(Self::Webp),
            _ => None,
        }
    }
}

impl FromStr for ImageFormat {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "png" => Ok(Self::Png),
            "webp" => Ok(Self::Webp),
            _ => Err(CodecError::UnsupportedFormat(s.to_string())),
        }
    }
}

// ── Encoder registry ─────────────────────────────────────────────────────────

/// One entry per output format. Adding a format means adding an encoder here
/// and a variant to `ImageFormat`; nothing else branches on the format.
trait FormatEncoder: Sync {
    fn encode(&self, img: &DynamicImage, quality: u8) -> Result<Vec<u8>, CodecError>;
}

fn encoder_for(format: ImageFormat) -> &'static dyn FormatEncoder {
    match format {
        ImageFormat::Jpeg => &JpegEncoder,
        ImageFormat::Png => &PngEncoder,
        ImageFormat::Webp => &WebpEncoder,
    }
}

/// Lossy JPEG. Quality maps directly onto the standard JPEG scale
/// (1 = worst, 100 = best).
struct JpegEncoder;

impl FormatEncoder for JpegEncoder {
    fn encode(&self, img: &DynamicImage, quality: u8) -> Result<Vec<u8>, CodecError> {
        use image::codecs::jpeg::JpegEncoder as ImageJpegEncoder;
        use image::ImageEncoder as _;

        // JPEG has no alpha channel.
        let rgb = img.to_rgb8();
        let mut output = Cursor::new(Vec::new());
        ImageJpegEncoder::new_with_quality(&mut output, quality)
            .write_image(rgb.as_raw(), rgb.width(), rgb.height(), image::ColorType::Rgb8)
            .map_err(|e| CodecError::Encode {
                format: "jpeg",
                message: e.to_string(),
            })?;
        Ok(output.into_inner())
    }
}

/// Lossless PNG. The quality parameter does not apply and is ignored;
/// callers requesting PNG always get a bit-exact re-encode of the pixels.
struct PngEncoder;

impl FormatEncoder for PngEncoder {
    fn encode(&self, img: &DynamicImage, _quality: u8) -> Result<Vec<u8>, CodecError> {
        use image::codecs::png::PngEncoder as ImagePngEncoder;
        use image::ImageEncoder as _;

        let rgba = img.to_rgba8();
        let mut output = Cursor::new(Vec::new());
        ImagePngEncoder::new(&mut output)
            .write_image(
                rgba.as_raw(),
                rgba.width(),
                rgba.height(),
                image::ColorType::Rgba8,
            )
            .map_err(|e| CodecError::Encode {
                format: "png",
                message: e.to_string(),
            })?;
        Ok(output.into_inner())
    }
}

/// Lossy WEBP via the `webp` crate (libwebp bindings); the `image` crate
/// only offers lossless WEBP encoding. libwebp caps each dimension at
/// 16383 pixels, so otherwise-valid images can fail here.
struct WebpEncoder;

impl FormatEncoder for WebpEncoder {
    fn encode(&self, img: &DynamicImage, quality: u8) -> Result<Vec<u8>, CodecError> {
        let rgba = img.to_rgba8();
        let encoder = webp::Encoder::from_rgba(rgba.as_raw(), rgba.width(), rgba.height());
        let encoded = encoder
            .encode_simple(false, f32::from(quality))
            .map_err(|e| CodecError::Encode {
                format: "webp",
                message: format!("{e:?}"),
            })?;
        Ok(encoded.to_vec())
    }
}

// ── Codec ────────────────────────────────────────────────────────────────────

/// Dimensions and detected (not requested) format of a decoded image.
#[derive(Debug, Clone, Copy)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
}

/// In-memory image re-encoder. Pure transformation over byte buffers; holds
/// no state beyond the configured size ceiling and is safe to share across
/// concurrent requests.
pub struct ImageCodec {
    max_image_size: usize,
}

impl ImageCodec {
    pub fn new(max_image_size: usize) -> Self {
        Self { max_image_size }
    }

    /// Check that `data` is non-empty, within the size ceiling, and decodable.
    /// The size check runs before any decode attempt.
    pub fn validate(&self, data: &[u8]) -> Result<(), CodecError> {
        if data.is_empty() {
            return Err(CodecError::EmptyData);
        }
        if data.len() > self.max_image_size {
            return Err(CodecError::TooLarge {
                size: data.len(),
                max: self.max_image_size,
            });
        }
        if image::load_from_memory(data).is_err() {
            return Err(CodecError::InvalidData);
        }
        Ok(())
    }

    /// Decode `data` and re-encode it in `format` at `quality`.
    pub fn compress(
        &self,
        data: &[u8],
        quality: u8,
        format: ImageFormat,
    ) -> Result<Vec<u8>, CodecError> {
        if data.is_empty() {
            return Err(CodecError::EmptyData);
        }
        if !(1..=100).contains(&quality) {
            return Err(CodecError::InvalidQuality(quality));
        }
        let img = image::load_from_memory(data).map_err(|e| CodecError::Decode(e.to_string()))?;
        encoder_for(format).encode(&img, quality)
    }

    /// Report pixel dimensions and the format the decoder detected.
    pub fn info(&self, data: &[u8]) -> Result<ImageInfo, CodecError> {
        if data.is_empty() {
            return Err(CodecError::EmptyData);
        }
        let detected =
            image::guess_format(data).map_err(|e| CodecError::Decode(e.to_string()))?;
        // Label check first: formats the sniffer recognizes but we do not
        // support would otherwise fail decoding and misreport as bad data.
        let format = ImageFormat::from_detected(detected).ok_or_else(|| {
            CodecError::UnsupportedFormat(format!("{detected:?}").to_lowercase())
        })?;
        let img = image::load_from_memory(data).map_err(|e| CodecError::Decode(e.to_string()))?;
        Ok(ImageInfo {
            width: img.width(),
            height: img.height(),
            format,
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
