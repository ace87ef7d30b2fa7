use std::collections::BTreeMap;

use ticker_proto::ClientFrame;
use tracing::debug;

use crate::connection::{ChannelError, ChannelHandle};

/// Serialises local user actions into frames on whichever link is current.
///
/// Sends on a closed channel fail fast with [`ChannelError::NotOpen`]; the
/// next full-state push after reconnecting is what restores consistency.
#[derive(Clone)]
pub struct Emitter {
    channel: ChannelHandle,
}

impl Emitter {
    pub fn new(channel: ChannelHandle) -> Self {
        Self { channel }
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    /// One frame per keystroke; there is no debounce.
    pub fn input_change(&self, placeholder: &str, value: &str) -> Result<(), ChannelError> {
        self.send(&ClientFrame::InputChange {
            placeholder: placeholder.into(),
            value: value.into(),
        })
    }

    pub fn menu_click(&self, menu: &str, item: &str) -> Result<(), ChannelError> {
        self.send(&ClientFrame::MenuClick {
            menu: menu.into(),
            item: item.into(),
        })
    }

    pub fn process(
        &self,
        process_type: &str,
        popup_id: Option<&str>,
        input_values: BTreeMap<String, String>,
    ) -> Result<(), ChannelError> {
        self.send(&ClientFrame::process(
            process_type,
            popup_id.map(str::to_string),
            input_values,
        ))
    }

    pub fn request(&self, resource: &str) -> Result<(), ChannelError> {
        self.send(&ClientFrame::request(resource))
    }

    pub fn function_result(&self, function_name: &str, success: bool) -> Result<(), ChannelError> {
        self.send(&ClientFrame::JsFunctionResult {
            function_name: function_name.into(),
            success,
        })
    }

    pub fn send(&self, frame: &ClientFrame) -> Result<(), ChannelError> {
        self.channel.send(frame).map_err(|err| {
            debug!(frame = %frame.kind(), error = %err, "dropping outbound frame");
            err
        })
    }
}
