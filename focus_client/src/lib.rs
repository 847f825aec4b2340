//! Camera client that uploads frames to a focus analyzer and renders its verdicts.
//!
pub mod analyzer;
pub mod capture;
pub mod config;
pub mod endpoints;
pub mod locale;
pub mod meter;
pub mod render;
pub mod sensors;
pub mod session;
pub mod status;
pub mod surface;

use bytes::Bytes;
use common::data_uri::DataUriError;
use tokio::sync::broadcast;

/// Error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("camera acquisition failed: {0}")]
    Acquisition(String),
    #[error("analysis request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(String),
    #[error("frame capture failed: {0}")]
    Capture(String),
    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),
    #[error("invalid data uri: {0}")]
    DataUri(#[from] DataUriError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn is_acquisition(&self) -> bool {
        matches!(self, Error::Acquisition(_))
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

pub type BroadcastSender = broadcast::Sender<Bytes>;
pub type BroadcastReceiver = broadcast::Receiver<Bytes>;

/// Create a broadcast channel for multipart stream items.
pub fn broadcast_channel() -> (BroadcastSender, BroadcastReceiver) {
    broadcast::channel(8)
}

/// Wrap a JPEG image as one part of a `multipart/x-mixed-replace` stream.
pub fn as_jpeg_stream_item(data: &[u8]) -> Bytes {
    Bytes::copy_from_slice(
        &[
            "--frame\r\nContent-Type: image/jpeg\r\n\r\n".as_bytes(),
            data,
            "\r\n\r\n".as_bytes(),
        ]
        .concat(),
    )
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn test_jpeg_stream_item_framing() {
        let item = as_jpeg_stream_item(&[1, 2, 3]);
        assert!(item.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n"));
        assert!(item.ends_with(&[1, 2, 3, b'\r', b'\n', b'\r', b'\n']));
    }
}
