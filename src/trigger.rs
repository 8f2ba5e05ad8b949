use serde::{Deserialize, Serialize};

/// Lifecycle signals emitted by the host process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trigger {
    /// The host became visible
    Start,
    /// The host gained focus
    Resume,
    /// The host is no longer visible
    Stop,
    /// The host lost focus
    Pause,
    /// The host is being torn down
    Destroy,
    /// Any other lifecycle signal (create, any, ...)
    Other,
}

impl Trigger {
    /// Whether this trigger causes a re-evaluation of the app state
    pub fn is_recognized(self) -> bool {
        !matches!(self, Trigger::Other)
    }

    /// Parse a lifecycle signal name. Accepts `start`, `ON_START`, `on-start` and
    /// similar spellings; anything else maps to `Other`.
    pub fn parse(name: &str) -> Self {
        let normalized = name.trim().to_ascii_lowercase().replace('-', "_");
        let bare = normalized.strip_prefix("on_").unwrap_or(&normalized);

        match bare {
            "start" => Trigger::Start,
            "resume" => Trigger::Resume,
            "stop" => Trigger::Stop,
            "pause" => Trigger::Pause,
            "destroy" => Trigger::Destroy,
            _ => Trigger::Other,
        }
    }
}
