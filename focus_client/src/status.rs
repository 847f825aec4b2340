//! Status sink mirroring the overlay label as text.
//!
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use crate::surface::Color;

/// Text shown in the status element.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct Status {
    pub text: String,
    pub color: Option<Color>,
}

impl Status {
    pub fn new(text: impl Into<String>, color: Color) -> Self {
        Self {
            text: text.into(),
            color: Some(color),
        }
    }
}

/// Latest status, observable by any number of readers.
#[derive(Clone, Debug)]
pub struct StatusBoard {
    tx: Arc<watch::Sender<Status>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Status::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn set(&self, status: Status) {
        log::debug!("Status: {:?}", &status);
        self.tx.send_replace(status);
    }

    pub fn current(&self) -> Status {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.tx.subscribe()
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}
