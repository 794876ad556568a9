use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Deserializer, Serialize};

use crate::codec::ImageFormat;

pub const DEFAULT_QUALITY: u8 = 80;

fn default_quality() -> u8 {
    DEFAULT_QUALITY
}

/// One image in a batch request. `data` accepts either a base64 string or a
/// raw JSON byte array.
#[derive(Debug, Deserialize)]
pub struct ImageData {
    #[serde(default)]
    pub filename: String,
    #[serde(deserialize_with = "image_bytes")]
    pub data: Vec<u8>,
}

#[derive(Debug, Deserialize)]
pub struct BatchCompressionRequest {
    pub images: Vec<ImageData>,
    #[serde(default = "default_quality")]
    pub quality: u8,
    #[serde(default)]
    pub format: ImageFormat,
}

#[derive(Debug, Serialize)]
pub struct ImageInfoResponse {
    pub filename: String,
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub size: usize,
}

fn image_bytes<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Base64(String),
        Bytes(Vec<u8>),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Base64(s) => BASE64.decode(s.trim()).map_err(serde::de::Error::custom),
        Raw::Bytes(bytes) => Ok(bytes),
    }
}
