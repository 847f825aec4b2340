use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use tokio::{task::JoinHandle, time::interval};

pub static METER: Meter = Meter::new();

/// Frame counters of the capture loop.
#[derive(Default)]
pub struct Meter {
    captured: AtomicU64,
    analyzed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

/// Counter values taken at one point in time.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MeterReading {
    pub captured: u64,
    pub analyzed: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl Meter {
    pub const fn new() -> Meter {
        Meter {
            captured: AtomicU64::new(0),
            analyzed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        }
    }

    pub fn tick_captured(&self) {
        self.captured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_analyzed(&self) {
        self.analyzed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_reset(&self) -> MeterReading {
        MeterReading {
            captured: self.captured.swap(0, Ordering::Relaxed),
            analyzed: self.analyzed.swap(0, Ordering::Relaxed),
            failed: self.failed.swap(0, Ordering::Relaxed),
            skipped: self.skipped.swap(0, Ordering::Relaxed),
        }
    }
}

pub fn spawn_meter_logger() -> JoinHandle<()> {
    tokio::spawn(async {
        let mut log_interval = interval(Duration::from_secs(2));
        log_interval.tick().await;

        loop {
            let start = Instant::now();
            log_interval.tick().await;

            let reading = METER.get_reset();
            let elapsed = start.elapsed().as_secs_f32();

            if reading.captured > 0 {
                log::info!(
                    "Captured frames per second: {:.2}, analyzed: {:.2}",
                    reading.captured as f32 / elapsed,
                    reading.analyzed as f32 / elapsed
                )
            }
            if reading.failed > 0 || reading.skipped > 0 {
                log::info!(
                    "Failed requests: {}, skipped ticks: {}",
                    reading.failed,
                    reading.skipped
                )
            }
        }
    })
}
