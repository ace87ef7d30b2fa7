use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{FrameError, FrameResult};
use crate::model::Menu;

/// Frames sent from a browser-side client to the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientFrame {
    /// Handshake sent as soon as a channel opens.
    PageLoaded,
    InputChange {
        placeholder: String,
        value: String,
    },
    MenuClick {
        menu: String,
        item: String,
    },
    #[serde(rename_all = "camelCase")]
    Process {
        process_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        popup_id: Option<String>,
        #[serde(default)]
        input_values: BTreeMap<String, String>,
    },
    #[serde(rename_all = "camelCase")]
    JsFunctionResult {
        function_name: String,
        success: bool,
    },
    /// `request<Resource>`, e.g. `requestLocalMessages`. The resource name is
    /// open-ended so it is carried outside the serde tag.
    #[serde(skip)]
    Request { resource: String },
}

const REQUEST_PREFIX: &str = "request";

impl ClientFrame {
    pub fn request(resource: impl Into<String>) -> Self {
        ClientFrame::Request {
            resource: resource.into(),
        }
    }

    pub fn process(
        process_type: impl Into<String>,
        popup_id: Option<String>,
        input_values: BTreeMap<String, String>,
    ) -> Self {
        ClientFrame::Process {
            process_type: process_type.into(),
            popup_id,
            input_values,
        }
    }

    /// Wire name of the frame's `type` discriminator.
    pub fn kind(&self) -> String {
        match self {
            ClientFrame::PageLoaded => "pageLoaded".into(),
            ClientFrame::InputChange { .. } => "inputChange".into(),
            ClientFrame::MenuClick { .. } => "menuClick".into(),
            ClientFrame::Process { .. } => "process".into(),
            ClientFrame::JsFunctionResult { .. } => "jsFunctionResult".into(),
            ClientFrame::Request { resource } => format!("{REQUEST_PREFIX}{resource}"),
        }
    }

    pub fn encode(&self) -> FrameResult<String> {
        match self {
            ClientFrame::Request { .. } => Ok(json!({ "type": self.kind() }).to_string()),
            other => Ok(serde_json::to_string(other)?),
        }
    }

    pub fn decode(raw: &str) -> FrameResult<Self> {
        let value: Value = serde_json::from_str(raw)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> FrameResult<Self> {
        let kind = value
            .as_object()
            .ok_or(FrameError::NotAnObject)?
            .get("type")
            .and_then(Value::as_str)
            .ok_or(FrameError::MissingType)?
            .to_string();

        if let Some(resource) = kind.strip_prefix(REQUEST_PREFIX) {
            if !resource.is_empty() {
                return Ok(ClientFrame::request(resource));
            }
        }

        match kind.as_str() {
            "pageLoaded" | "inputChange" | "menuClick" | "process" | "jsFunctionResult" => {
                Ok(serde_json::from_value(value)?)
            }
            _ => Err(FrameError::UnknownType(kind)),
        }
    }
}

/// Status text that may ride along on any server frame. When `is_popup` is
/// set the text is shown as a message popup instead of in the status line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub message: String,
    #[serde(default)]
    pub is_error: bool,
    /// Milliseconds before the text is cleared; 0 keeps it until superseded.
    #[serde(default)]
    pub message_duration: u64,
    #[serde(default)]
    pub is_popup: bool,
    #[serde(default)]
    pub show_close_button: bool,
}

impl Notice {
    pub fn status(message: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            message: message.into(),
            message_duration: duration_ms,
            ..Self::default()
        }
    }

    pub fn error(message: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            is_error: true,
            ..Self::status(message, duration_ms)
        }
    }

    pub fn popup(message: impl Into<String>, duration_ms: u64, show_close_button: bool) -> Self {
        Self {
            is_popup: true,
            show_close_button,
            ..Self::status(message, duration_ms)
        }
    }

    /// Extracts the notice fields from a decoded frame. Returns `None` when
    /// the frame has no `message` key at all.
    pub fn from_frame(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let message = match obj.get("message")? {
            Value::String(text) => text.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        };
        let flag = |key: &str| obj.get(key).and_then(Value::as_bool).unwrap_or(false);
        let message_duration = obj
            .get("messageDuration")
            .and_then(|raw| raw.as_u64().or_else(|| raw.as_f64().map(|ms| ms.max(0.0) as u64)))
            .unwrap_or(0);

        Some(Self {
            message,
            is_error: flag("isError"),
            message_duration,
            is_popup: flag("isPopup"),
            show_close_button: flag("showCloseButton"),
        })
    }

    pub fn is_popup_message(&self) -> bool {
        self.is_popup && !self.message.is_empty()
    }

    /// A frame carrying only the notice. Its `type` matches no dispatch
    /// branch, so receivers apply the notice and leave the page alone.
    pub fn to_json(&self) -> String {
        let mut frame = Map::new();
        frame.insert("type".into(), Value::String("message".into()));
        self.attach(&mut frame);
        Value::Object(frame).to_string()
    }

    fn attach(&self, target: &mut Map<String, Value>) {
        if let Ok(Value::Object(fields)) = serde_json::to_value(self) {
            target.extend(fields);
        }
    }
}

/// Whole-page snapshot pushed by the device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub is_visible: bool,
    #[serde(default)]
    pub menus: Vec<Menu>,
}

/// Frames pushed from the device to clients.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    IncludeJsFile { path: String },
    IncludeCssFile { path: String },
    CallJsFunction { name: String, params: Option<Value> },
    ShowPopup { id: String, content: String },
    Redirect { url: String },
    Update { target: String, content: String },
    Custom { action: String, data: Value },
    FullState(FullState),
}

impl ServerFrame {
    pub fn update(target: impl Into<String>, content: impl Into<String>) -> Self {
        ServerFrame::Update {
            target: target.into(),
            content: content.into(),
        }
    }

    pub fn custom(action: impl Into<String>, data: impl Into<Value>) -> Self {
        ServerFrame::Custom {
            action: action.into(),
            data: data.into(),
        }
    }

    pub fn call(name: impl Into<String>, params: Option<Value>) -> Self {
        ServerFrame::CallJsFunction {
            name: name.into(),
            params,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            ServerFrame::IncludeJsFile { path } => json!({ "event": "includeJsFile", "data": path }),
            ServerFrame::IncludeCssFile { path } => {
                json!({ "event": "includeCssFile", "data": path })
            }
            ServerFrame::CallJsFunction { name, params } => {
                let mut frame = json!({ "event": "callJsFunction", "data": name });
                if let (Some(params), Some(obj)) = (params, frame.as_object_mut()) {
                    obj.insert("params".into(), params.clone());
                }
                frame
            }
            ServerFrame::ShowPopup { id, content } => {
                json!({ "event": "showPopup", "id": id, "content": content })
            }
            ServerFrame::Redirect { url } => json!({ "type": "redirect", "url": url }),
            ServerFrame::Update { target, content } => {
                json!({ "type": "update", "target": target, "content": content })
            }
            ServerFrame::Custom { action, data } => {
                json!({ "type": "custom", "action": action, "data": data })
            }
            ServerFrame::FullState(state) => serde_json::to_value(state).unwrap_or(Value::Null),
        }
    }

    pub fn to_json(&self) -> String {
        self.to_value().to_string()
    }

    /// Encodes the frame with the notice fields merged into its top level.
    pub fn with_notice(&self, notice: &Notice) -> String {
        let mut value = self.to_value();
        if let Some(obj) = value.as_object_mut() {
            notice.attach(obj);
        }
        value.to_string()
    }
}

impl From<FullState> for ServerFrame {
    fn from(state: FullState) -> Self {
        ServerFrame::FullState(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MenuItem;

    #[test]
    fn client_frames_use_camel_case_on_the_wire() {
        let mut inputs = BTreeMap::new();
        inputs.insert("folderName".to_string(), "logs".to_string());
        let frame = ClientFrame::process("createFolder", Some("newFolder".into()), inputs);

        let encoded: Value =
            serde_json::from_str(&frame.encode().expect("encode")).expect("valid json");
        assert_eq!(
            encoded,
            json!({
                "type": "process",
                "processType": "createFolder",
                "popupId": "newFolder",
                "inputValues": { "folderName": "logs" }
            })
        );

        let ack = ClientFrame::JsFunctionResult {
            function_name: "loadFileList".into(),
            success: false,
        };
        let encoded: Value =
            serde_json::from_str(&ack.encode().expect("encode")).expect("valid json");
        assert_eq!(encoded["type"], "jsFunctionResult");
        assert_eq!(encoded["functionName"], "loadFileList");
    }

    #[test]
    fn page_loaded_is_a_bare_type() {
        assert_eq!(
            ClientFrame::PageLoaded.encode().expect("encode"),
            r#"{"type":"pageLoaded"}"#
        );
    }

    #[test]
    fn request_frames_carry_the_resource_in_the_type() {
        let frame = ClientFrame::request("DeviceSettings");
        assert_eq!(
            frame.encode().expect("encode"),
            r#"{"type":"requestDeviceSettings"}"#
        );
        let decoded = ClientFrame::decode(r#"{"type":"requestLocalMessages"}"#).expect("decode");
        assert_eq!(decoded, ClientFrame::request("LocalMessages"));
    }

    #[test]
    fn decode_rejects_unknown_and_untyped_frames() {
        assert!(matches!(
            ClientFrame::decode(r#"{"type":"teleport"}"#),
            Err(FrameError::UnknownType(kind)) if kind == "teleport"
        ));
        assert!(matches!(
            ClientFrame::decode(r#"{"menu":"Main"}"#),
            Err(FrameError::MissingType)
        ));
        assert!(matches!(
            ClientFrame::decode("[1,2]"),
            Err(FrameError::NotAnObject)
        ));
        assert!(matches!(
            ClientFrame::decode("{not json"),
            Err(FrameError::Malformed(_))
        ));
        assert!(matches!(
            ClientFrame::decode(r#"{"type":"request"}"#),
            Err(FrameError::UnknownType(_))
        ));
    }

    #[test]
    fn process_without_popup_or_inputs_decodes() {
        let decoded =
            ClientFrame::decode(r#"{"type":"process","processType":"saveLocalMessages"}"#)
                .expect("decode");
        assert_eq!(
            decoded,
            ClientFrame::process("saveLocalMessages", None, BTreeMap::new())
        );
    }

    #[test]
    fn event_frames_put_the_subject_in_data() {
        assert_eq!(
            ServerFrame::IncludeCssFile {
                path: "/SYS/ticker.css".into()
            }
            .to_value(),
            json!({ "event": "includeCssFile", "data": "/SYS/ticker.css" })
        );
        assert_eq!(
            ServerFrame::call("queueMessageToMonitor", Some(json!("* hi *"))).to_value(),
            json!({ "event": "callJsFunction", "data": "queueMessageToMonitor", "params": "* hi *" })
        );
        assert_eq!(
            ServerFrame::call("loadFileList", None).to_value(),
            json!({ "event": "callJsFunction", "data": "loadFileList" })
        );
    }

    #[test]
    fn full_state_carries_menus_and_notice() {
        let mut menu = Menu::new("Main Menu");
        menu.items.push(MenuItem::new("Settings"));
        menu.items.push(MenuItem::link("Docs", "/docs"));
        let state = FullState {
            title: Some("Main".into()),
            body: "<pre id='scrollingMonitor'></pre>".into(),
            is_visible: true,
            menus: vec![menu],
        };

        let raw = ServerFrame::from(state.clone()).with_notice(&Notice::error("boom", 3000));
        let value: Value = serde_json::from_str(&raw).expect("valid json");
        assert_eq!(value["isVisible"], true);
        assert_eq!(value["menus"][0]["items"][1]["url"], "/docs");
        assert!(value["menus"][0]["items"][0].get("url").is_none());
        assert_eq!(value["message"], "boom");
        assert_eq!(value["isError"], true);
        assert_eq!(value["messageDuration"], 3000);

        let decoded: FullState = serde_json::from_value(value.clone()).expect("decode");
        assert_eq!(decoded, state);
        let notice = Notice::from_frame(&value).expect("notice");
        assert_eq!(notice, Notice::error("boom", 3000));
    }

    #[test]
    fn notice_absent_without_message_key() {
        assert!(Notice::from_frame(&json!({ "body": "x" })).is_none());
        let empty = Notice::from_frame(&json!({ "message": null })).expect("notice");
        assert!(empty.message.is_empty());
        let popup = Notice::from_frame(&json!({
            "message": "Saved",
            "isPopup": true,
            "messageDuration": 2500.0
        }))
        .expect("notice");
        assert!(popup.is_popup_message());
        assert_eq!(popup.message_duration, 2500);
    }

    #[test]
    fn notice_only_frames_carry_no_page() {
        let raw = Notice::popup("Rebooting", 0, true).to_json();
        let value: Value = serde_json::from_str(&raw).expect("valid json");
        assert_eq!(value["type"], "message");
        assert!(value.get("body").is_none());
        assert_eq!(
            Notice::from_frame(&value),
            Some(Notice::popup("Rebooting", 0, true))
        );
    }
}
