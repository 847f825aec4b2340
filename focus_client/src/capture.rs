//! Frame capture.
//!
//! Turns the instantaneously current frame of a [`CameraStream`] into a JPEG data URI.
use std::io::Cursor;

use common::data_uri::{self, JPEG_MEDIA_TYPE};
use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, RgbImage};

use crate::{sensors::CameraStream, Error};

/// Encoded frame ready to be uploaded.
#[derive(Clone, Debug)]
pub struct FramePayload {
    /// Sequence number of the capture within the session.
    pub seq: u64,
    pub width: u32,
    pub height: u32,
    pub data_uri: String,
}

/// Capture the current frame and encode it as JPEG data URI.
pub fn capture_frame(stream: &CameraStream, seq: u64, quality: u8) -> Result<FramePayload, Error> {
    let frame = stream.grab()?.to_rgb()?;
    let frame = fit_to(frame, stream.native_size());
    let (width, height) = frame.dimensions();

    let jpeg = encode_jpeg(&frame, quality)?;
    log::debug!("Captured frame {} ({} bytes JPEG)", seq, jpeg.len());

    Ok(FramePayload {
        seq,
        width,
        height,
        data_uri: data_uri::encode(JPEG_MEDIA_TYPE, &jpeg),
    })
}

/// Encode an RGB image as JPEG.
pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> Result<Vec<u8>, Error> {
    let (width, height) = frame.dimensions();
    let mut buf = Cursor::new(Vec::new());

    JpegEncoder::new_with_quality(&mut buf, quality).encode(
        frame,
        width,
        height,
        image::ColorType::Rgb8,
    )?;

    Ok(buf.into_inner())
}

/// Draw the frame onto an off-screen buffer of the stream's native size.
fn fit_to(frame: RgbImage, (width, height): (u32, u32)) -> RgbImage {
    if frame.dimensions() == (width, height) {
        return frame;
    }
    log::debug!(
        "Frame is {}x{}, scaling to native {}x{}",
        frame.width(),
        frame.height(),
        width,
        height
    );
    image::imageops::resize(&frame, width, height, FilterType::Triangle)
}
