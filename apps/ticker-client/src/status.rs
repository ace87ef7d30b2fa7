use std::time::Duration;

use ticker_proto::Notice;

use crate::timer::TimerSlot;

pub const NORMAL_CLASS: &str = "normal-message";
pub const ERROR_CLASS: &str = "error-message";

/// The single persistent status-message area.
#[derive(Debug, Default)]
pub struct StatusLine {
    text: String,
    class: Option<&'static str>,
    timer: TimerSlot,
}

impl StatusLine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn class(&self) -> Option<&'static str> {
        self.class
    }

    /// Applies a frame's notice. Any pending auto-clear is cancelled first;
    /// `expire` is handed the generation to report back once the duration
    /// (milliseconds) runs out.
    pub fn apply<F>(&mut self, notice: &Notice, expire: F)
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.timer.cancel();
        self.text = notice.message.clone();
        self.class = if notice.message.is_empty() {
            None
        } else if notice.is_error {
            Some(ERROR_CLASS)
        } else {
            Some(NORMAL_CLASS)
        };
        if !notice.message.is_empty() && notice.message_duration > 0 {
            self.timer
                .arm_once(Duration::from_millis(notice.message_duration), expire);
        }
    }

    /// Local variant used by operations; the duration is in seconds.
    pub fn set_message<F>(&mut self, text: &str, seconds: u64, is_error: bool, expire: F)
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.timer.cancel();
        self.text = text.to_string();
        self.class = Some(if is_error { ERROR_CLASS } else { NORMAL_CLASS });
        if seconds > 0 {
            self.timer.arm_once(Duration::from_secs(seconds), expire);
        }
    }

    /// Replaces the text without touching the class or timer, as a partial
    /// update targeting the message area does.
    pub fn set_text(&mut self, text: &str) {
        self.text = text.to_string();
    }

    /// Clears the line if `generation` is still the armed timer.
    pub fn expire(&mut self, generation: u64) -> bool {
        if !self.timer.is_current(generation) {
            return false;
        }
        self.timer.cancel();
        self.text.clear();
        self.class = None;
        true
    }
}
