//! Result rendering and error display.
//!
//! All drawing goes through a [`DisplayContext`], which bundles the overlay surface, the
//! status sink and the localized messages. Every committed draw is published as JPEG to
//! overlay preview subscribers.
use std::sync::{Arc, Mutex, PoisonError};

use common::{
    data_uri::DataUri,
    protocol::{AnalysisResult, ImageRef, Verdict},
};
use image::RgbaImage;
use tokio::task::JoinHandle;

use crate::{
    analyzer::AnalyzerClient,
    as_jpeg_stream_item,
    capture::encode_jpeg,
    locale::Messages,
    status::{Status, StatusBoard},
    surface::{decode_rgba, flatten, Color, Surface},
    BroadcastSender, Error,
};

/// Height of the band cleared for the verdict label.
pub const LABEL_BAND_HEIGHT: u32 = 50;
/// Baseline start of labels and error messages.
pub const LABEL_POSITION: (i32, i32) = (20, 40);

const SNAPSHOT_QUALITY: u8 = 80;

/// Handles shared by every drawing operation.
pub struct DisplayContext<S> {
    surface: Arc<Mutex<S>>,
    status: StatusBoard,
    messages: Messages,
    overlay_tx: Option<BroadcastSender>,
}

impl<S> Clone for DisplayContext<S> {
    fn clone(&self) -> Self {
        Self {
            surface: Arc::clone(&self.surface),
            status: self.status.clone(),
            messages: self.messages,
            overlay_tx: self.overlay_tx.clone(),
        }
    }
}

impl<S: Surface> DisplayContext<S> {
    pub fn new(surface: S, status: StatusBoard, messages: Messages) -> Self {
        Self {
            surface: Arc::new(Mutex::new(surface)),
            status,
            messages,
            overlay_tx: None,
        }
    }

    /// Publish a JPEG of the surface after every draw.
    pub fn with_overlay_publisher(mut self, tx: BroadcastSender) -> Self {
        self.overlay_tx = Some(tx);
        self
    }

    pub fn status(&self) -> &StatusBoard {
        &self.status
    }

    pub fn messages(&self) -> &Messages {
        &self.messages
    }

    /// Run `f` on the locked surface, then publish the result.
    pub fn with_surface<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let (ret, snapshot) = {
            let mut surface = self.surface.lock().unwrap_or_else(PoisonError::into_inner);
            let ret = f(&mut *surface);
            let snapshot = match &self.overlay_tx {
                Some(tx) if tx.receiver_count() > 0 => surface.snapshot(),
                _ => None,
            };
            (ret, snapshot)
        };

        if let (Some(tx), Some(snapshot)) = (&self.overlay_tx, snapshot) {
            match encode_jpeg(&flatten(snapshot), SNAPSHOT_QUALITY) {
                Ok(jpeg) => {
                    tx.send(as_jpeg_stream_item(&jpeg)).ok();
                }
                Err(err) => log::warn!("Could not encode overlay snapshot: {}", err),
            }
        }

        ret
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.surface
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .dimensions()
    }

    /// Match the surface to the native video resolution.
    pub fn resize_to(&self, (width, height): (u32, u32)) {
        log::info!("Overlay sized to {}x{}", width, height);
        self.with_surface(|surface| surface.resize(width, height));
    }

    /// Replace the whole surface with an annotated frame.
    pub fn draw_annotated(&self, image: &RgbaImage) {
        self.with_surface(|surface| {
            let (width, height) = surface.dimensions();
            surface.clear_rect(0, 0, width, height);
            surface.draw_image(image, 0, 0, width, height);
        });
    }

    /// Draw the verdict label into the top band and mirror it to the status sink.
    pub fn display_result(&self, result: &AnalysisResult) {
        let status = match result.verdict() {
            Verdict::Focused => Status::new(self.messages.focused, Color::Green),
            Verdict::NotFocused { reason } => {
                Status::new(self.messages.not_focused_because(reason), Color::Red)
            }
        };

        self.with_surface(|surface| {
            let (width, _) = surface.dimensions();
            surface.clear_rect(0, 0, width, LABEL_BAND_HEIGHT);
            if let Some(color) = status.color {
                surface.fill_text(&status.text, LABEL_POSITION.0, LABEL_POSITION.1, color);
            }
        });
        self.status.set(status);
    }

    /// Clear everything and show `message` in red.
    pub fn display_error(&self, message: &str) {
        self.status.set(Status::new(message, Color::Red));
        self.with_surface(|surface| {
            surface.clear();
            surface.fill_text(message, LABEL_POSITION.0, LABEL_POSITION.1, Color::Red);
        });
    }
}

/// Render an analyzer response.
///
/// The annotated image, if any, is decoded on a separate task and drawn once ready. The
/// label is drawn right away, so no order between the two is guaranteed. The returned
/// handle completes when the image has been drawn or dropped.
pub fn render_result<S: Surface + 'static>(
    ctx: &DisplayContext<S>,
    result: &AnalysisResult,
    analyzer: &AnalyzerClient,
) -> Option<JoinHandle<()>> {
    let image_task = result.annotated_image().map(str::to_owned).map(|image| {
        let ctx = ctx.clone();
        let analyzer = analyzer.clone();
        tokio::spawn(async move {
            match decode_annotated(&image, &analyzer).await {
                Ok(image) => ctx.draw_annotated(&image),
                Err(err) => log::warn!("Could not decode annotated image: {}", err),
            }
        })
    });

    ctx.display_result(result);

    image_task
}

/// Resolve and decode the `image` field of a response.
pub async fn decode_annotated(image: &str, analyzer: &AnalyzerClient) -> Result<RgbaImage, Error> {
    let data = match ImageRef::classify(image) {
        ImageRef::DataUri(uri) => DataUri::parse(uri)?.data,
        ImageRef::Url(url) => analyzer.fetch_image(url).await?.to_vec(),
    };

    decode_image(data).await
}

/// Decode an encoded image on the blocking pool.
pub async fn decode_image(data: Vec<u8>) -> Result<RgbaImage, Error> {
    tokio::task::spawn_blocking(move || decode_rgba(&data))
        .await
        .map_err(|err| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, err)))?
        .map_err(Error::from)
}
