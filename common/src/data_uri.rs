//! Encoding and decoding of base64 `data:` URIs.
//!
use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;

/// Media type used for captured frames.
pub const JPEG_MEDIA_TYPE: &str = "image/jpeg";

#[derive(Debug, Error, Eq, PartialEq)]
pub enum DataUriError {
    #[error("missing `data:` scheme")]
    MissingScheme,
    #[error("missing `,` separating header and payload")]
    MissingPayload,
    #[error("only base64 payloads are supported")]
    NotBase64,
    #[error("invalid base64 payload: {0}")]
    InvalidBase64(String),
}

/// Decoded data URI.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DataUri {
    pub media_type: String,
    pub data: Vec<u8>,
}

impl DataUri {
    pub fn new(media_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            media_type: media_type.into(),
            data,
        }
    }

    /// Parse a `data:<media-type>;base64,<payload>` string.
    pub fn parse(uri: &str) -> Result<Self, DataUriError> {
        let rest = uri
            .trim()
            .strip_prefix("data:")
            .ok_or(DataUriError::MissingScheme)?;
        let (header, payload) = rest.split_once(',').ok_or(DataUriError::MissingPayload)?;

        let mut params = header.split(';');
        let media_type = params.next().unwrap_or_default().to_owned();
        if !params.any(|param| param.eq_ignore_ascii_case("base64")) {
            return Err(DataUriError::NotBase64);
        }

        let data = STANDARD
            .decode(payload.trim())
            .map_err(|err| DataUriError::InvalidBase64(err.to_string()))?;

        Ok(Self { media_type, data })
    }

    /// Render as `data:` URI string.
    pub fn to_uri(&self) -> String {
        encode(&self.media_type, &self.data)
    }
}

/// Encode raw bytes as base64 `data:` URI of the given media type.
pub fn encode(media_type: &str, data: &[u8]) -> String {
    format!("data:{};base64,{}", media_type, STANDARD.encode(data))
}
