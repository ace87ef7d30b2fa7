//! Single-overlay popup handling: generic popups pushed by the device and the
//! timed message popup.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use ticker_proto::settings::escape_markup;
use ticker_proto::Notice;

use crate::markup::{self, HandlerCall};
use crate::timer::TimerSlot;

pub const MESSAGE_POPUP_ID: &str = "popup_message";
pub const COUNTDOWN_ID: &str = "popup-countdown";
const COUNTDOWN_PERIOD: Duration = Duration::from_secs(1);
const CLOSING_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopupButton {
    pub label: String,
    pub handler: Option<HandlerCall>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Popup {
    pub id: String,
    pub content: String,
    /// Current value of every `id`-bearing input, file inputs excluded.
    pub inputs: BTreeMap<String, String>,
    /// Operation named by the file input's `onchange` handler.
    pub file_handler: Option<String>,
    pub buttons: Vec<PopupButton>,
    pub countdown: Option<String>,
    pub selected_file: Option<PathBuf>,
}

impl Popup {
    fn from_markup(id: &str, content: &str) -> Self {
        let mut inputs = BTreeMap::new();
        let mut file_handler = None;
        let mut buttons = Vec::new();

        for tag in markup::scan(content) {
            match tag.name.as_str() {
                "input" if tag.attr("type").is_some_and(|t| t.eq_ignore_ascii_case("file")) => {
                    if file_handler.is_none() {
                        file_handler = tag.attr("onchange").and_then(markup::change_handler_name);
                    }
                }
                "input" | "textarea" | "select" => {
                    if let Some(input_id) = tag.id() {
                        inputs.insert(
                            input_id.to_string(),
                            tag.attr("value").unwrap_or_default().to_string(),
                        );
                    }
                }
                "button" => {
                    if let Some(handler) = tag.attr("onclick") {
                        buttons.push(PopupButton {
                            label: tag.text.clone(),
                            handler: markup::parse_click_handler(handler),
                        });
                    }
                }
                _ => {}
            }
        }

        Self {
            id: id.to_string(),
            content: content.to_string(),
            inputs,
            file_handler,
            buttons,
            countdown: None,
            selected_file: None,
        }
    }
}

/// A button press resolved against the open popup. The popup is still open;
/// the caller runs `call` and then closes `popup_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ButtonPress {
    pub popup_id: String,
    pub call: Option<(String, Vec<String>)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Countdown {
    Ignored,
    Remaining(u64),
    /// Reached zero; the popup closes once the grace timer fires.
    ClosingNow,
}

#[derive(Debug, Default)]
pub struct PopupManager {
    current: Option<Popup>,
    countdown: TimerSlot,
    remaining: u64,
}

impl PopupManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&Popup> {
        self.current.as_ref()
    }

    /// Shows a popup, replacing whatever overlay was open.
    pub fn show(&mut self, id: &str, content: &str) {
        self.countdown.cancel();
        self.current = Some(Popup::from_markup(id, content));
    }

    /// Removes the overlay and its countdown if `id` is the one open.
    pub fn close(&mut self, id: &str) -> bool {
        if !self.current.as_ref().is_some_and(|popup| popup.id == id) {
            return false;
        }
        self.countdown.cancel();
        self.current = None;
        true
    }

    pub fn set_input(&mut self, id: &str, value: &str) -> bool {
        match self
            .current
            .as_mut()
            .and_then(|popup| popup.inputs.get_mut(id))
        {
            Some(slot) => {
                *slot = value.to_string();
                true
            }
            None => false,
        }
    }

    /// Resolves the `index`-th button's handler. Each parameter token becomes
    /// the value of the popup input with that id, else of the page element
    /// `lookup` finds, else the token itself.
    pub fn press_button<F>(&self, index: usize, lookup: F) -> Option<ButtonPress>
    where
        F: Fn(&str) -> Option<String>,
    {
        let popup = self.current.as_ref()?;
        let button = popup.buttons.get(index)?;
        let call = button.handler.as_ref().map(|handler| {
            let params = handler
                .params
                .iter()
                .map(|token| {
                    popup
                        .inputs
                        .get(token)
                        .cloned()
                        .or_else(|| lookup(token))
                        .unwrap_or_else(|| token.clone())
                })
                .collect();
            (handler.name.clone(), params)
        });
        Some(ButtonPress {
            popup_id: popup.id.clone(),
            call,
        })
    }

    /// Records the chosen file and returns the popup id and the operation
    /// its file input names.
    pub fn choose_file(&mut self, path: PathBuf) -> Option<(String, String)> {
        let popup = self.current.as_mut()?;
        let handler = popup.file_handler.clone()?;
        popup.selected_file = Some(path);
        Some((popup.id.clone(), handler))
    }

    /// The popup id and inputs a `process` frame reports.
    pub fn collect_inputs(&self) -> (Option<String>, BTreeMap<String, String>) {
        match &self.current {
            Some(popup) => (Some(popup.id.clone()), popup.inputs.clone()),
            None => (None, BTreeMap::new()),
        }
    }

    /// Shows a notice as the message popup, with a per-second countdown when
    /// it has a duration. `tick` is called with the countdown generation,
    /// which is also returned.
    pub fn show_message<F>(&mut self, notice: &Notice, mut tick: F) -> Option<u64>
    where
        F: FnMut(u64) + Send + 'static,
    {
        let mut content = format!(
            "<div class=\"popup-message\">{}</div>",
            escape_markup(&notice.message)
        );
        let seconds = notice.message_duration.div_ceil(1000);
        if notice.message_duration > 0 {
            content.push_str(&format!(
                "<div id=\"{COUNTDOWN_ID}\">{}</div>",
                countdown_text(seconds)
            ));
        }
        if notice.show_close_button {
            content.push_str(&format!(
                "<button type=\"button\" onClick=\"closePopup('{MESSAGE_POPUP_ID}')\">Close</button>"
            ));
        }

        self.show(MESSAGE_POPUP_ID, &content);
        if notice.message_duration == 0 {
            return None;
        }
        if let Some(popup) = self.current.as_mut() {
            popup.countdown = Some(countdown_text(seconds));
        }
        self.remaining = seconds;
        Some(self.countdown.arm_interval(COUNTDOWN_PERIOD, move |generation| {
            tick(generation);
            true
        }))
    }

    /// Advances the countdown. At zero the interval is replaced by a short
    /// grace timer that calls `expire`.
    pub fn tick<F>(&mut self, generation: u64, expire: F) -> Countdown
    where
        F: FnOnce(u64) + Send + 'static,
    {
        if !self.countdown.is_current(generation) {
            return Countdown::Ignored;
        }
        let Some(popup) = self.current.as_mut().filter(|p| p.countdown.is_some()) else {
            self.countdown.cancel();
            return Countdown::Ignored;
        };
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining > 0 {
            popup.countdown = Some(countdown_text(self.remaining));
            Countdown::Remaining(self.remaining)
        } else {
            popup.countdown = Some("Closing now...".into());
            self.countdown.arm_once(CLOSING_GRACE, expire);
            Countdown::ClosingNow
        }
    }

    /// Closes the message popup if `generation` is still the armed grace timer.
    pub fn expire(&mut self, generation: u64) -> bool {
        if !self.countdown.is_current(generation) {
            return false;
        }
        self.close(MESSAGE_POPUP_ID)
    }
}

fn countdown_text(seconds: u64) -> String {
    format!("Closing in {seconds} seconds")
}
