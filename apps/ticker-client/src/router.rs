//! Classifies inbound frames.
//!
//! Exactly one branch is chosen per frame, in a fixed precedence: the
//! `event` family first, then the `type` family, then the full-state shape.
//! The optional notice fields are extracted independently of the branch.

use serde_json::{Map, Value};
use ticker_proto::{FrameError, FrameResult, FullState, Notice, ServerFrame};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    IncludeJsFile,
    CallJsFunction,
    IncludeCssFile,
    ShowPopup,
    Redirect,
    Update,
    Custom,
    FullState,
    Ignored,
}

/// One decoded inbound frame: the branch it selected (if any) plus the
/// status/popup notice it carries.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub frame: Option<ServerFrame>,
    pub notice: Option<Notice>,
}

impl Dispatch {
    pub fn branch(&self) -> Branch {
        match &self.frame {
            None => Branch::Ignored,
            Some(ServerFrame::IncludeJsFile { .. }) => Branch::IncludeJsFile,
            Some(ServerFrame::CallJsFunction { .. }) => Branch::CallJsFunction,
            Some(ServerFrame::IncludeCssFile { .. }) => Branch::IncludeCssFile,
            Some(ServerFrame::ShowPopup { .. }) => Branch::ShowPopup,
            Some(ServerFrame::Redirect { .. }) => Branch::Redirect,
            Some(ServerFrame::Update { .. }) => Branch::Update,
            Some(ServerFrame::Custom { .. }) => Branch::Custom,
            Some(ServerFrame::FullState(_)) => Branch::FullState,
        }
    }
}

/// Decodes and classifies one raw frame. Errors mean the whole frame,
/// notice included, must be dropped.
pub fn decode(raw: &str) -> FrameResult<Dispatch> {
    let value: Value = serde_json::from_str(raw)?;
    let obj = value.as_object().ok_or(FrameError::NotAnObject)?;
    let frame = classify(obj)?;
    if frame.is_none() {
        debug!(frame = %raw, "frame matched no dispatch branch");
    }
    Ok(Dispatch {
        frame,
        notice: Notice::from_frame(&value),
    })
}

fn classify(obj: &Map<String, Value>) -> FrameResult<Option<ServerFrame>> {
    let text = |key: &str| obj.get(key).and_then(Value::as_str).map(str::to_string);

    match obj.get("event").and_then(Value::as_str) {
        Some("includeJsFile") => {
            return Ok(text("data").map(|path| ServerFrame::IncludeJsFile { path }));
        }
        Some("callJsFunction") => {
            return Ok(text("data").map(|name| ServerFrame::CallJsFunction {
                name,
                params: obj.get("params").filter(|p| !p.is_null()).cloned(),
            }));
        }
        // Older firmware spells the stylesheet event `includeCssFine`.
        Some("includeCssFile") | Some("includeCssFine") => {
            return Ok(text("data").map(|path| ServerFrame::IncludeCssFile { path }));
        }
        Some("showPopup") => {
            return Ok(Some(ServerFrame::ShowPopup {
                id: text("id").unwrap_or_default(),
                content: text("content").unwrap_or_default(),
            }));
        }
        _ => {}
    }

    match obj.get("type").and_then(Value::as_str) {
        Some("redirect") => return Ok(text("url").map(|url| ServerFrame::Redirect { url })),
        Some("update") => {
            let content = match obj.get("content") {
                Some(Value::String(content)) => content.clone(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            };
            return Ok(text("target").map(|target| ServerFrame::Update { target, content }));
        }
        Some("custom") => {
            return Ok(text("action").map(|action| ServerFrame::Custom {
                action,
                data: obj.get("data").cloned().unwrap_or(Value::Null),
            }));
        }
        _ => {}
    }

    if obj.contains_key("body") || obj.contains_key("menus") {
        let state: FullState = serde_json::from_value(Value::Object(obj.clone()))?;
        return Ok(Some(ServerFrame::FullState(state)));
    }

    Ok(None)
}
