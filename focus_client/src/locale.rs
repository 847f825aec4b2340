//! User-visible strings.
//!
use std::{fmt, str::FromStr};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Locale {
    #[default]
    En,
    Ja,
}

impl FromStr for Locale {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "en" => Ok(Locale::En),
            "ja" => Ok(Locale::Ja),
            other => Err(format!("unsupported locale {other:?}, expected `en` or `ja`")),
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locale::En => write!(f, "en"),
            Locale::Ja => write!(f, "ja"),
        }
    }
}

/// Localized messages shown on the overlay and in the status sink.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Messages {
    pub focused: &'static str,
    pub not_focused: &'static str,
    pub camera_failed: &'static str,
    pub server_error: &'static str,
}

impl Messages {
    pub const EN: Messages = Messages {
        focused: "focused",
        not_focused: "not focused",
        camera_failed: "failed to start the camera",
        server_error: "a server error occurred",
    };

    pub const JA: Messages = Messages {
        focused: "集中しています",
        not_focused: "非集中",
        camera_failed: "カメラの起動に失敗しました",
        server_error: "サーバーエラーが発生しました",
    };

    pub fn for_locale(locale: Locale) -> Self {
        match locale {
            Locale::En => Self::EN,
            Locale::Ja => Self::JA,
        }
    }

    /// Label for a negative verdict, e.g. `not focused: eyes closed`.
    pub fn not_focused_because(&self, reason: Option<&str>) -> String {
        match reason {
            Some(reason) => format!("{}: {}", self.not_focused, reason),
            None => self.not_focused.to_owned(),
        }
    }
}

impl Default for Messages {
    fn default() -> Self {
        Self::EN
    }
}
