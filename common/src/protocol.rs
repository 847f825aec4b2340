//! Protocol definition for the focus analysis endpoint.
//!
//! The client posts one [`AnalysisRequest`] per captured frame and receives one
//! [`AnalysisResult`]. Both directions are JSON.
use serde::{Deserialize, Serialize};

/// Default path of the analysis endpoint.
pub const PROCESS_FRAME_PATH: &str = "/process_frame";

/// Request body: one encoded frame as data URI.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AnalysisRequest {
    pub image: String,
}

impl AnalysisRequest {
    pub fn new(image: String) -> Self {
        Self { image }
    }
}

/// Response body of the analyzer.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub focused: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Annotated frame, either a data URI or a URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl AnalysisResult {
    pub fn focused() -> Self {
        Self {
            focused: true,
            ..Default::default()
        }
    }

    pub fn not_focused(reason: impl Into<String>) -> Self {
        Self {
            focused: false,
            reason: Some(reason.into()),
            image: None,
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// The focus verdict carried by this result.
    pub fn verdict(&self) -> Verdict<'_> {
        match self.focused {
            true => Verdict::Focused,
            false => Verdict::NotFocused {
                reason: self.reason.as_deref(),
            },
        }
    }

    /// The annotated image, unless absent or blank.
    pub fn annotated_image(&self) -> Option<&str> {
        self.image
            .as_deref()
            .filter(|image| !image.trim().is_empty())
    }

    /// Where the annotated image can be found, if the analyzer sent one.
    pub fn image_ref(&self) -> Option<ImageRef<'_>> {
        self.annotated_image().map(ImageRef::classify)
    }
}

/// Focus verdict of a single frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Verdict<'a> {
    Focused,
    NotFocused { reason: Option<&'a str> },
}

/// Reference to an annotated image in a response.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ImageRef<'a> {
    /// Inline `data:` URI.
    DataUri(&'a str),
    /// Absolute or server-relative URL.
    Url(&'a str),
}

impl<'a> ImageRef<'a> {
    pub fn classify(image: &'a str) -> Self {
        match image.trim_start().starts_with("data:") {
            true => ImageRef::DataUri(image),
            false => ImageRef::Url(image),
        }
    }
}
