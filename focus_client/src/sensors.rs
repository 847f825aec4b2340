//! Sensors module.
//!
//! A [`CameraStream`] owns one [`FrameSource`] for the lifetime of a session. Acquisition
//! reads the first frame to learn the native resolution, which may differ from the
//! requested one.
use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    sync::{Mutex, PoisonError},
};

use image::{Rgb, RgbImage};

use crate::Error;

/// Requested capture parameters.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Constraints {
    pub width: u32,
    pub height: u32,
    /// FourCC of the V4L2 pixel format.
    pub format: String,
    /// Frame interval as `(numerator, denominator)` seconds, highest supported if `None`.
    pub frame_rate: Option<(u32, u32)>,
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            format: "MJPG".to_owned(),
            frame_rate: None,
        }
    }
}

/// Which kind of source to open.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SourceSpec {
    /// Video4Linux2 device such as `/dev/video0`.
    V4l(PathBuf),
    /// Still image replayed as a stream.
    File(PathBuf),
    /// Synthetic test pattern, sized like the request unless given.
    Pattern { size: Option<(u32, u32)> },
}

impl Default for SourceSpec {
    fn default() -> Self {
        SourceSpec::V4l(PathBuf::from("/dev/video0"))
    }
}

impl FromStr for SourceSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some(("v4l", device)) if !device.is_empty() => Ok(SourceSpec::V4l(device.into())),
            Some(("file", path)) if !path.is_empty() => Ok(SourceSpec::File(path.into())),
            Some(("pattern", size)) => {
                let (width, height) = size
                    .split_once('x')
                    .ok_or_else(|| format!("invalid pattern size {size:?}, expected <W>x<H>"))?;
                let width: u32 = width.parse().map_err(|_| format!("invalid width {width:?}"))?;
                let height: u32 = height
                    .parse()
                    .map_err(|_| format!("invalid height {height:?}"))?;
                if width == 0 || height == 0 {
                    return Err("pattern size must be non-zero".to_owned());
                }
                Ok(SourceSpec::Pattern {
                    size: Some((width, height)),
                })
            }
            None if s == "pattern" => Ok(SourceSpec::Pattern { size: None }),
            _ => Err(format!(
                "invalid source {s:?}, expected `v4l:<device>`, `file:<path>` or `pattern[:<W>x<H>]`"
            )),
        }
    }
}

impl fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceSpec::V4l(device) => write!(f, "v4l:{}", device.display()),
            SourceSpec::File(path) => write!(f, "file:{}", path.display()),
            SourceSpec::Pattern { size: None } => write!(f, "pattern"),
            SourceSpec::Pattern {
                size: Some((width, height)),
            } => write!(f, "pattern:{width}x{height}"),
        }
    }
}

/// One frame as delivered by a source.
#[derive(Clone, Debug)]
pub enum RawFrame {
    /// Compressed JPEG as delivered by MJPG devices.
    Jpeg(Vec<u8>),
    /// Decoded RGB pixels.
    Rgb(RgbImage),
}

impl RawFrame {
    /// Decode into an RGB image.
    pub fn to_rgb(&self) -> Result<RgbImage, Error> {
        match self {
            RawFrame::Jpeg(data) => {
                Ok(image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)?.to_rgb8())
            }
            RawFrame::Rgb(image) => Ok(image.clone()),
        }
    }
}

/// Something that produces live frames.
pub trait FrameSource: Send {
    /// Grab the current frame.
    fn grab(&mut self) -> Result<RawFrame, Error>;

    /// Stop streaming and free the device.
    fn stop(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn describe(&self) -> String;
}

/// Open the source described by `spec` and start streaming.
pub fn open_source(
    spec: &SourceSpec,
    constraints: &Constraints,
) -> Result<Box<dyn FrameSource>, Error> {
    match spec {
        SourceSpec::V4l(device) => open_v4l(device, constraints),
        SourceSpec::File(path) => Ok(Box::new(StillImageSource::open(path.clone())?)),
        SourceSpec::Pattern { size } => {
            let (width, height) = size.unwrap_or((constraints.width, constraints.height));
            Ok(Box::new(PatternSource::new(width, height)))
        }
    }
}

#[cfg(feature = "v4l")]
fn open_v4l(device: &Path, constraints: &Constraints) -> Result<Box<dyn FrameSource>, Error> {
    Ok(Box::new(v4l::V4lCamera::open(device, constraints)?))
}

#[cfg(not(feature = "v4l"))]
fn open_v4l(device: &Path, _constraints: &Constraints) -> Result<Box<dyn FrameSource>, Error> {
    Err(Error::Acquisition(format!(
        "cannot open {}: built without the `v4l` feature",
        device.display()
    )))
}

/// Acquire a live stream: open the source and decode its first frame.
///
/// Any failure is reported as [`Error::Acquisition`].
pub fn acquire(spec: &SourceSpec, constraints: &Constraints) -> Result<CameraStream, Error> {
    let as_acquisition = |err: Error| match err {
        Error::Acquisition(msg) => Error::Acquisition(msg),
        other => Error::Acquisition(format!("{spec}: {other}")),
    };

    let mut source = open_source(spec, constraints).map_err(as_acquisition)?;
    log::info!("Using frame source {}", source.describe());

    let first = source
        .grab()
        .and_then(|frame| frame.to_rgb())
        .map_err(as_acquisition);
    let first = match first {
        Ok(first) => first,
        Err(err) => {
            source.stop().ok();
            return Err(err);
        }
    };

    let native_size = first.dimensions();
    if native_size != (constraints.width, constraints.height) {
        log::info!(
            "Requested {}x{}, source delivers {}x{}",
            constraints.width,
            constraints.height,
            native_size.0,
            native_size.1
        );
    }

    Ok(CameraStream {
        source: Mutex::new(Some(source)),
        native_size,
    })
}

/// Acquired live stream, released exactly once.
pub struct CameraStream {
    source: Mutex<Option<Box<dyn FrameSource>>>,
    native_size: (u32, u32),
}

impl CameraStream {
    /// Resolution of the frames actually delivered.
    pub fn native_size(&self) -> (u32, u32) {
        self.native_size
    }

    /// Grab the current frame.
    pub fn grab(&self) -> Result<RawFrame, Error> {
        let mut source = self.source.lock().unwrap_or_else(PoisonError::into_inner);
        match source.as_mut() {
            Some(source) => source.grab(),
            None => Err(Error::Capture("camera stream already released".into())),
        }
    }

    pub fn is_released(&self) -> bool {
        self.source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Stop the source. Later calls are no-ops.
    pub fn release(&self) {
        let source = self
            .source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut source) = source {
            match source.stop() {
                Ok(()) => log::info!("Released {}", source.describe()),
                Err(err) => log::warn!("Error releasing {}: {}", source.describe(), err),
            }
        }
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        self.release();
    }
}

/// Still image replayed as a live stream.
pub struct StillImageSource {
    path: PathBuf,
    image: RgbImage,
}

impl StillImageSource {
    pub fn open(path: PathBuf) -> Result<Self, Error> {
        let image = image::open(&path)?.to_rgb8();
        Ok(Self { path, image })
    }
}

impl FrameSource for StillImageSource {
    fn grab(&mut self) -> Result<RawFrame, Error> {
        Ok(RawFrame::Rgb(self.image.clone()))
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

/// Synthetic moving test pattern.
pub struct PatternSource {
    width: u32,
    height: u32,
    counter: u32,
}

impl PatternSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            counter: 0,
        }
    }
}

impl FrameSource for PatternSource {
    fn grab(&mut self) -> Result<RawFrame, Error> {
        let (width, height) = (self.width, self.height);
        // Vertical bar sweeping across a diagonal gradient
        let bar_x = (self.counter * 8) % width.max(1);
        let image = RgbImage::from_fn(width, height, |x, y| {
            if x.abs_diff(bar_x) < 4 {
                return Rgb([255, 255, 255]);
            }
            let r = (x * 255 / width.max(1)) as u8;
            let g = (y * 255 / height.max(1)) as u8;
            Rgb([r, g, 128])
        });
        self.counter = self.counter.wrapping_add(1);

        Ok(RawFrame::Rgb(image))
    }

    fn describe(&self) -> String {
        format!("test pattern {}x{}", self.width, self.height)
    }
}

#[cfg(feature = "v4l")]
pub mod v4l {
    //! Video4Linux2 cameras.
    use std::path::Path;

    use rscam::{Camera, Config};

    use super::{Constraints, FrameSource, RawFrame};
    use crate::Error;

    pub struct V4lCamera {
        device: String,
        camera: Camera,
        format: [u8; 4],
        resolution: (u32, u32),
    }

    impl V4lCamera {
        /// Open the device with the supported resolution closest to the request.
        pub fn open(device: &Path, constraints: &Constraints) -> Result<Self, Error> {
            let device = device.display().to_string();
            let format: [u8; 4] = constraints.format.as_bytes().try_into().map_err(|_| {
                Error::Acquisition(format!("invalid FourCC {:?}", constraints.format))
            })?;
            if &format != b"MJPG" && &format != b"RGB3" {
                return Err(Error::Acquisition(format!(
                    "unsupported pixel format {:?}, expected MJPG or RGB3",
                    constraints.format
                )));
            }

            let mut camera = Camera::new(&device)
                .map_err(|err| Error::Acquisition(format!("{device}: {err}")))?;
            log_supported_formats(&camera, &constraints.format);

            log::info!("Using camera {}", device);

            let resolution =
                get_closest_resolution(&camera, &format, (constraints.width, constraints.height))?;
            let frame_rate = constraints
                .frame_rate
                .map(Ok)
                .unwrap_or_else(|| get_max_frame_rate(&camera, &format, resolution))?;

            camera
                .start(&Config {
                    interval: frame_rate,
                    resolution,
                    format: &format,
                    ..Default::default()
                })
                .map_err(|err| Error::Acquisition(format!("{device}: {err}")))?;

            Ok(Self {
                device,
                camera,
                format,
                resolution,
            })
        }
    }

    impl FrameSource for V4lCamera {
        fn grab(&mut self) -> Result<RawFrame, Error> {
            let frame = self.camera.capture()?;
            match &self.format {
                b"MJPG" => Ok(RawFrame::Jpeg(frame[..].to_vec())),
                _ => {
                    let (width, height) = frame.resolution;
                    image::RgbImage::from_raw(width, height, frame[..].to_vec())
                        .map(RawFrame::Rgb)
                        .ok_or_else(|| Error::Capture("short RGB3 frame".into()))
                }
            }
        }

        fn stop(&mut self) -> Result<(), Error> {
            self.camera
                .stop()
                .map_err(|err| Error::Capture(format!("{}: {err}", self.device)))
        }

        fn describe(&self) -> String {
            format!(
                "camera {} ({}x{})",
                self.device, self.resolution.0, self.resolution.1
            )
        }
    }

    /// Get the supported resolution closest to `requested` for the given format.
    fn get_closest_resolution(
        cam: &Camera,
        format: &[u8],
        requested: (u32, u32),
    ) -> Result<(u32, u32), Error> {
        let resolution_info = cam
            .resolutions(format)
            .map_err(|err| Error::Acquisition(err.to_string()))?;
        log::debug!("Found resolutions: {:?}", &resolution_info);
        match resolution_info {
            rscam::ResolutionInfo::Discretes(resolutions) => {
                closest_resolution(&resolutions, requested)
            }
            rscam::ResolutionInfo::Stepwise { min, max, step } => {
                Some(clamp_stepwise(min, max, step, requested))
            }
        }
        .ok_or_else(|| Error::Acquisition("No resolution found".into()))
    }

    /// Get the maximum supported frame rate for the given format and resolution.
    fn get_max_frame_rate(
        cam: &Camera,
        format: &[u8],
        resolution: (u32, u32),
    ) -> Result<(u32, u32), Error> {
        let interval_info = cam
            .intervals(format, resolution)
            .map_err(|err| Error::Acquisition(err.to_string()))?;
        log::debug!("Found frame rates: {:?}", &interval_info);
        match interval_info {
            // Intervals are seconds per frame, the smallest one is the highest rate
            rscam::IntervalInfo::Discretes(intervals) => intervals
                .iter()
                .filter(|(_, denominator)| *denominator > 0)
                .min_by(|a, b| (a.0 as u64 * b.1 as u64).cmp(&(b.0 as u64 * a.1 as u64)))
                .copied(),
            rscam::IntervalInfo::Stepwise { min, .. } => Some(min),
        }
        .ok_or_else(|| Error::Acquisition("No frame rate found".into()))
    }

    fn log_supported_formats(cam: &Camera, format: &str) {
        let formats: Vec<_> = cam.formats().filter_map(Result::ok).collect();
        log::debug!(
            "Supported formats: {:?}, using format {:?}",
            formats,
            format
        );
    }

    pub(crate) fn closest_resolution(
        resolutions: &[(u32, u32)],
        requested: (u32, u32),
    ) -> Option<(u32, u32)> {
        resolutions
            .iter()
            .min_by_key(|(width, height)| {
                (*width as i64 - requested.0 as i64).abs()
                    + (*height as i64 - requested.1 as i64).abs()
            })
            .copied()
    }

    pub(crate) fn clamp_stepwise(
        min: (u32, u32),
        max: (u32, u32),
        step: (u32, u32),
        requested: (u32, u32),
    ) -> (u32, u32) {
        let snap = |value: u32, min: u32, max: u32, step: u32| {
            let value = value.clamp(min, max);
            match step {
                0 => value,
                step => min + (value - min) / step * step,
            }
        };
        (
            snap(requested.0, min.0, max.0, step.0),
            snap(requested.1, min.1, max.1, step.1),
        )
    }

}
