//! Feeds the scrolling monitor: every tick the next local message is
//! expanded and pushed to all clients.

use std::time::Duration;

use chrono::{DateTime, Local, TimeZone};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::device::Device;
use crate::spa::Audience;

pub const MONITOR_FUNCTION: &str = "queueMessageToMonitor";
const BLANK_WIDTH: usize = 85;

/// Replaces a whole-record keyword with its value. Anything else, including
/// feed keywords this device does not serve, passes through unchanged.
pub fn expand<Tz: TimeZone>(message: &str, now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    match message.trim() {
        "<date>" => now.format("%d-%m-%Y").to_string(),
        "<time>" => now.format("%H:%M").to_string(),
        "<datetime>" => now.format("%d-%m-%Y %H:%M").to_string(),
        "<spaces>" | "<space>" => " ".repeat(BLANK_WIDTH),
        _ => message.to_string(),
    }
}

pub fn monitor_line(message: &str) -> String {
    format!("* {message} *")
}

/// Pushes one message; returns what was sent.
pub fn rotate_once<Tz: TimeZone>(device: &Device, now: &DateTime<Tz>) -> Option<String>
where
    Tz::Offset: std::fmt::Display,
{
    let next = device.messages().next_message()?;
    let line = monitor_line(&expand(&next, now));
    debug!(message = %line, "next ticker message");
    device.spa().call_js_function(
        Audience::All,
        MONITOR_FUNCTION,
        Some(Value::String(line.clone())),
    );
    Some(line)
}

pub fn spawn_rotation(device: Device, period: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tokio::spawn(async move {
        // first tick completes immediately
        interval.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            if device.hub().is_empty() {
                continue;
            }
            rotate_once(&device, &Local::now());
        }
        debug!("message rotation stopped");
    })
}
