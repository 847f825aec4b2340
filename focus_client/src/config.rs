//! Command line and environment configuration.
//!
use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use common::protocol::PROCESS_FRAME_PATH;
use reqwest::Url;

use crate::{
    locale::Locale,
    sensors::{Constraints, SourceSpec},
};

/// What to do with a capture tick while an analysis request is outstanding.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum InFlightPolicy {
    /// Skip the tick.
    #[default]
    Drop,
    /// Let one tick wait for the slot, skip any further ones.
    Queue,
}

impl FromStr for InFlightPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "drop" => Ok(InFlightPolicy::Drop),
            "queue" => Ok(InFlightPolicy::Queue),
            other => Err(format!(
                "unsupported in-flight policy {other:?}, expected `drop` or `queue`"
            )),
        }
    }
}

#[derive(Parser, Debug)]
#[clap(author, version, about)]
pub struct Args {
    /// Frame source: `v4l:<device>`, `file:<path>`, `pattern` or `pattern:<W>x<H>`
    #[clap(long, env = "FOCUS_SOURCE", default_value = "v4l:/dev/video0")]
    pub source: SourceSpec,

    /// Requested capture width
    #[clap(long, env = "FOCUS_WIDTH", default_value_t = 1280)]
    pub width: u32,

    /// Requested capture height
    #[clap(long, env = "FOCUS_HEIGHT", default_value_t = 720)]
    pub height: u32,

    /// Pixel format requested from V4L2 devices (`MJPG` or `RGB3`)
    #[clap(long, env = "FOCUS_FORMAT", default_value = "MJPG")]
    pub format: String,

    /// Base URL of the focus analyzer
    #[clap(long, env = "FOCUS_SERVER", default_value = "http://127.0.0.1:5000")]
    pub server: Url,

    /// Path of the analysis endpoint on the server
    #[clap(long, env = "FOCUS_ENDPOINT", default_value = PROCESS_FRAME_PATH)]
    pub endpoint: String,

    /// Timeout of a single analysis request in milliseconds
    #[clap(long, env = "FOCUS_REQUEST_TIMEOUT_MS", default_value_t = 10_000,
        value_parser = clap::value_parser!(u64).range(1..))]
    pub request_timeout_ms: u64,

    /// Interval between captured frames in milliseconds
    #[clap(long, env = "FOCUS_INTERVAL_MS", default_value_t = 500,
        value_parser = clap::value_parser!(u64).range(1..))]
    pub interval_ms: u64,

    /// Handling of ticks while a request is outstanding (`drop` or `queue`)
    #[clap(long, env = "FOCUS_IN_FLIGHT", default_value = "drop")]
    pub in_flight: InFlightPolicy,

    /// JPEG quality of uploaded frames (1-100)
    #[clap(long, env = "FOCUS_JPEG_QUALITY", default_value_t = 92,
        value_parser = clap::value_parser!(u8).range(1..=100))]
    pub jpeg_quality: u8,

    /// Language of user-visible messages (`en` or `ja`)
    #[clap(long, env = "FOCUS_LOCALE", default_value = "en")]
    pub locale: Locale,

    /// TrueType font used for overlay labels
    #[clap(long, env = "FOCUS_FONT")]
    pub font: Option<PathBuf>,

    /// Address of the local preview server
    #[clap(long, env = "FOCUS_PREVIEW_ADDRESS", default_value = "127.0.0.1:3000")]
    pub preview_address: SocketAddr,

    /// Do not serve the preview endpoints
    #[clap(long)]
    pub no_preview: bool,

    /// Send a single frame and exit
    #[clap(long)]
    pub once: bool,
}

/// Resolved client configuration.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub source: SourceSpec,
    pub constraints: Constraints,
    pub server: Url,
    pub endpoint: String,
    pub request_timeout: Duration,
    pub interval: Duration,
    pub in_flight: InFlightPolicy,
    pub jpeg_quality: u8,
    pub locale: Locale,
    pub font: Option<PathBuf>,
    pub preview_address: Option<SocketAddr>,
    pub once: bool,
}

impl ClientConfig {
    /// Full URL of the analysis endpoint.
    pub fn endpoint_url(&self) -> Result<Url, <Url as FromStr>::Err> {
        self.server.join(&self.endpoint)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            source: SourceSpec::default(),
            constraints: Constraints::default(),
            server: Url::parse("http://127.0.0.1:5000").expect("valid default url"),
            endpoint: PROCESS_FRAME_PATH.to_owned(),
            request_timeout: Duration::from_secs(10),
            interval: Duration::from_millis(500),
            in_flight: InFlightPolicy::default(),
            jpeg_quality: 92,
            locale: Locale::default(),
            font: None,
            preview_address: Some(SocketAddr::from(([127, 0, 0, 1], 3000))),
            once: false,
        }
    }
}

impl From<Args> for ClientConfig {
    fn from(args: Args) -> Self {
        Self {
            source: args.source,
            constraints: Constraints {
                width: args.width,
                height: args.height,
                format: args.format,
                frame_rate: None,
            },
            server: args.server,
            endpoint: args.endpoint,
            request_timeout: Duration::from_millis(args.request_timeout_ms),
            interval: Duration::from_millis(args.interval_ms),
            in_flight: args.in_flight,
            jpeg_quality: args.jpeg_quality,
            locale: args.locale,
            font: args.font,
            preview_address: (!args.no_preview).then_some(args.preview_address),
            once: args.once,
        }
    }
}
