//! Capture-upload-render session.
//!
//! A session owns the acquired [`CameraStream`] and drives the capture loop on a fixed
//! interval. At most one analysis request is outstanding at any time, so results are
//! always rendered in the order their frames were captured.
use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use common::protocol::AnalysisResult;
use tokio::{
    sync::{OwnedSemaphorePermit, Semaphore},
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};

use crate::{
    analyzer::AnalyzerClient,
    as_jpeg_stream_item,
    capture::{capture_frame, encode_jpeg},
    config::{ClientConfig, InFlightPolicy},
    meter::METER,
    render::{render_result, DisplayContext},
    sensors::{acquire, CameraStream, RawFrame},
    surface::Surface,
    BroadcastSender, Error,
};

/// Pace of the live video preview.
const VIDEO_FRAME_INTERVAL: Duration = Duration::from_millis(33);

/// What a capture tick did.
#[derive(Debug)]
pub enum Tick {
    /// A frame is being sent.
    Sent(JoinHandle<()>),
    /// The tick waits for the outstanding request.
    Queued(JoinHandle<()>),
    /// A request was outstanding, the tick was dropped.
    Skipped,
}

pub struct FocusSession<S> {
    stream: Arc<CameraStream>,
    display: DisplayContext<S>,
    analyzer: AnalyzerClient,
    in_flight: Arc<Semaphore>,
    queued: Arc<AtomicBool>,
    seq: Arc<AtomicU64>,
    policy: InFlightPolicy,
    interval: Duration,
    jpeg_quality: u8,
}

impl<S> Clone for FocusSession<S> {
    fn clone(&self) -> Self {
        Self {
            stream: Arc::clone(&self.stream),
            display: self.display.clone(),
            analyzer: self.analyzer.clone(),
            in_flight: Arc::clone(&self.in_flight),
            queued: Arc::clone(&self.queued),
            seq: Arc::clone(&self.seq),
            policy: self.policy,
            interval: self.interval,
            jpeg_quality: self.jpeg_quality,
        }
    }
}

impl<S: Surface + 'static> FocusSession<S> {
    /// Acquire the camera and size the overlay to its native resolution.
    ///
    /// On failure the camera error is displayed and the session does not start.
    pub async fn start(
        config: &ClientConfig,
        display: DisplayContext<S>,
        analyzer: AnalyzerClient,
    ) -> Result<Self, Error> {
        let spec = config.source.clone();
        let constraints = config.constraints.clone();
        let acquired = tokio::task::spawn_blocking(move || acquire(&spec, &constraints))
            .await
            .map_err(|err| Error::Acquisition(err.to_string()))
            .and_then(|acquired| acquired);

        let stream = match acquired {
            Ok(stream) => stream,
            Err(err) => {
                log::error!("{}", err);
                display.display_error(display.messages().camera_failed);
                return Err(err);
            }
        };

        display.resize_to(stream.native_size());

        Ok(Self {
            stream: Arc::new(stream),
            display,
            analyzer,
            in_flight: Arc::new(Semaphore::new(1)),
            queued: Arc::new(AtomicBool::new(false)),
            seq: Arc::new(AtomicU64::new(0)),
            policy: config.in_flight,
            interval: config.interval,
            jpeg_quality: config.jpeg_quality,
        })
    }

    pub fn display(&self) -> &DisplayContext<S> {
        &self.display
    }

    pub fn stream(&self) -> &CameraStream {
        &self.stream
    }

    /// Capture the current frame, have it analyzed and render the response.
    ///
    /// A transport failure is displayed and returned, it does not affect later calls.
    pub async fn send_frame(&self) -> Result<AnalysisResult, Error> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let stream = Arc::clone(&self.stream);
        let quality = self.jpeg_quality;

        let payload = tokio::task::spawn_blocking(move || capture_frame(&stream, seq, quality))
            .await
            .map_err(|err| Error::Capture(err.to_string()))
            .and_then(|payload| payload);
        let payload = match payload {
            Ok(payload) => payload,
            Err(err) => {
                log::error!("Unable to capture frame {}: {}", seq, err);
                METER.tick_failed();
                self.display
                    .display_error(self.display.messages().camera_failed);
                return Err(err);
            }
        };
        METER.tick_captured();

        let start = Instant::now();
        match self.analyzer.analyze(&payload).await {
            Ok(result) => {
                log::debug!("Frame {} analyzed in {:?}", seq, start.elapsed());
                METER.tick_analyzed();
                if let Some(image_task) = render_result(&self.display, &result, &self.analyzer) {
                    image_task.await.ok();
                }
                Ok(result)
            }
            Err(err) => {
                log::warn!("Server error for frame {}: {}", seq, err);
                METER.tick_failed();
                self.display
                    .display_error(self.display.messages().server_error);
                Err(err)
            }
        }
    }

    /// Start a capture cycle unless one is outstanding.
    pub fn tick(&self) -> Tick {
        match Arc::clone(&self.in_flight).try_acquire_owned() {
            Ok(permit) => Tick::Sent(self.spawn_send(permit)),
            Err(_) => match self.policy {
                InFlightPolicy::Queue if !self.queued.swap(true, Ordering::SeqCst) => {
                    let session = self.clone();
                    Tick::Queued(tokio::spawn(async move {
                        let permit = Arc::clone(&session.in_flight).acquire_owned().await;
                        session.queued.store(false, Ordering::SeqCst);
                        if let Ok(permit) = permit {
                            session.send_with(permit).await;
                        }
                    }))
                }
                _ => {
                    log::debug!("Request outstanding, skipping tick");
                    METER.tick_skipped();
                    Tick::Skipped
                }
            },
        }
    }

    fn spawn_send(&self, permit: OwnedSemaphorePermit) -> JoinHandle<()> {
        let session = self.clone();
        tokio::spawn(async move { session.send_with(permit).await })
    }

    async fn send_with(&self, permit: OwnedSemaphorePermit) {
        // Errors are displayed by `send_frame`
        self.send_frame().await.ok();
        drop(permit);
    }

    /// Drive the capture loop until `shutdown` resolves, then release the camera.
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        log::info!(
            "Sending frames to {} every {:?}",
            self.analyzer.endpoint(),
            self.interval
        );

        let mut ticker = interval(self.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    self.tick();
                }
            }
        }

        self.shutdown().await;
    }

    /// Wait for the outstanding request, then release the camera.
    pub async fn shutdown(&self) {
        log::info!("Shutting down session");
        // Block further queueing, a tick already queued runs first
        self.queued.store(true, Ordering::SeqCst);
        if let Ok(permit) = self.in_flight.acquire().await {
            self.in_flight.close();
            drop(permit);
        }
        self.stream.release();
    }

    /// Publish live frames to `tx` while anybody is watching.
    pub fn spawn_video_pump(&self, tx: BroadcastSender) -> JoinHandle<()> {
        let stream = Arc::clone(&self.stream);
        let quality = self.jpeg_quality;

        tokio::task::spawn_blocking(move || {
            while !stream.is_released() {
                let start = Instant::now();
                if tx.receiver_count() > 0 {
                    let jpeg = stream.grab().and_then(|frame| match frame {
                        RawFrame::Jpeg(data) => Ok(data),
                        RawFrame::Rgb(image) => encode_jpeg(&image, quality),
                    });
                    match jpeg {
                        Ok(jpeg) => {
                            tx.send(as_jpeg_stream_item(&jpeg)).ok();
                        }
                        Err(err) => log::debug!("Video preview frame dropped: {}", err),
                    }
                }
                if let Some(remaining) = VIDEO_FRAME_INTERVAL.checked_sub(start.elapsed()) {
                    std::thread::sleep(remaining);
                }
            }
            log::debug!("Video pump stopped");
        })
    }
}
