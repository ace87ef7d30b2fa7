//! Schema-driven settings forms.
//!
//! The device describes each settings group as a list of typed fields. Clients
//! edit the values in place and send the whole form back; the device applies
//! the payload with its own bounds so a stale or hostile client cannot push a
//! value outside the declared range.

use serde::{Deserialize, Serialize};
use serde_json::{json, Number, Value};

use crate::error::SettingsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    #[serde(rename = "s")]
    Text,
    #[serde(rename = "n")]
    Numeric,
    #[serde(rename = "b")]
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsField {
    pub field_name: String,
    #[serde(default)]
    pub field_prompt: String,
    pub field_type: FieldKind,
    #[serde(default)]
    pub field_value: Value,
    /// Maximum length for text fields; 0 means unbounded.
    #[serde(default)]
    pub field_len: usize,
    #[serde(default)]
    pub field_min: f64,
    #[serde(default)]
    pub field_max: f64,
    #[serde(default)]
    pub field_step: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsForm {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings_name: Option<String>,
    #[serde(default)]
    pub fields: Vec<SettingsField>,
}

/// Result of applying a save payload on the device.
#[derive(Debug, Default, PartialEq)]
pub struct SaveOutcome {
    pub applied: Vec<String>,
    pub ignored: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SavedField {
    field_name: Option<String>,
    value: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct SavePayload {
    fields: Vec<SavedField>,
}

impl SettingsField {
    pub fn text(name: &str, prompt: &str, max_len: usize, value: &str) -> Self {
        Self {
            field_name: name.into(),
            field_prompt: prompt.into(),
            field_type: FieldKind::Text,
            field_value: Value::String(value.into()),
            field_len: max_len,
            field_min: 0.0,
            field_max: 0.0,
            field_step: 0.0,
        }
    }

    pub fn numeric(name: &str, prompt: &str, min: f64, max: f64, step: f64, value: f64) -> Self {
        Self {
            field_name: name.into(),
            field_prompt: prompt.into(),
            field_type: FieldKind::Numeric,
            field_value: number_value(value),
            field_len: 0,
            field_min: min,
            field_max: max,
            field_step: step,
        }
    }

    pub fn boolean(name: &str, prompt: &str, value: bool) -> Self {
        Self {
            field_name: name.into(),
            field_prompt: prompt.into(),
            field_type: FieldKind::Boolean,
            field_value: Value::Bool(value),
            field_len: 0,
            field_min: 0.0,
            field_max: 0.0,
            field_step: 0.0,
        }
    }

    /// Bounds shown next to numeric inputs, e.g. `" (10 .. 120)"`.
    pub fn range_text(&self) -> Option<String> {
        match self.field_type {
            FieldKind::Numeric => Some(format!(
                " ({} .. {})",
                format_number(self.field_min),
                format_number(self.field_max)
            )),
            _ => None,
        }
    }

    pub fn display_value(&self) -> String {
        match &self.field_value {
            Value::String(text) => text.clone(),
            Value::Null => String::new(),
            Value::Number(number) => number
                .as_f64()
                .map(format_number)
                .unwrap_or_else(|| number.to_string()),
            other => other.to_string(),
        }
    }

    pub fn as_bool(&self) -> bool {
        coerce_bool(&self.field_value).unwrap_or(false)
    }

    /// Validates user input against the field's declared type and bounds and
    /// stores it on success. The stored value is left untouched on error.
    pub fn set_from_input(&mut self, input: &str) -> Result<(), SettingsError> {
        match self.field_type {
            FieldKind::Text => {
                if self.field_len > 0 && input.chars().count() > self.field_len {
                    return Err(SettingsError::TooLong {
                        field: self.field_name.clone(),
                        max: self.field_len,
                    });
                }
                self.field_value = Value::String(input.to_string());
            }
            FieldKind::Numeric => {
                let parsed: f64 =
                    input
                        .trim()
                        .parse()
                        .map_err(|_| SettingsError::NotNumeric {
                            field: self.field_name.clone(),
                            input: input.to_string(),
                        })?;
                if !self.within_bounds(parsed) {
                    return Err(SettingsError::OutOfRange {
                        field: self.field_name.clone(),
                        min: self.field_min,
                        max: self.field_max,
                    });
                }
                self.field_value = number_value(parsed);
            }
            FieldKind::Boolean => {
                let parsed = coerce_bool(&Value::String(input.to_string())).ok_or_else(|| {
                    SettingsError::Malformed(format!(
                        "`{}` expects true or false, got `{input}`",
                        self.field_name
                    ))
                })?;
                self.field_value = Value::Bool(parsed);
            }
        }
        Ok(())
    }

    fn within_bounds(&self, value: f64) -> bool {
        if self.field_min == 0.0 && self.field_max == 0.0 {
            return true;
        }
        value >= self.field_min && value <= self.field_max
    }

    /// Device-side write: coerces and clamps instead of rejecting. Returns
    /// false when the value cannot be coerced to the field's type.
    pub fn apply_saved(&mut self, raw: &Value) -> bool {
        match self.field_type {
            FieldKind::Text => {
                let mut text = match raw {
                    Value::String(text) => text.clone(),
                    Value::Null => return false,
                    other => other.to_string(),
                };
                if self.field_len > 0 && text.chars().count() > self.field_len {
                    text = text.chars().take(self.field_len).collect();
                }
                self.field_value = Value::String(text);
                true
            }
            FieldKind::Numeric => {
                let parsed = match raw {
                    Value::Number(number) => number.as_f64(),
                    Value::String(text) => text.trim().parse::<f64>().ok(),
                    _ => None,
                };
                let Some(mut value) = parsed.filter(|value| value.is_finite()) else {
                    return false;
                };
                if !(self.field_min == 0.0 && self.field_max == 0.0) {
                    value = value.clamp(self.field_min, self.field_max);
                }
                self.field_value = number_value(value);
                true
            }
            FieldKind::Boolean => match coerce_bool(raw) {
                Some(flag) => {
                    self.field_value = Value::Bool(flag);
                    true
                }
                None => false,
            },
        }
    }
}

impl SettingsForm {
    pub fn new(name: impl Into<String>, fields: Vec<SettingsField>) -> Self {
        Self {
            settings_name: Some(name.into()),
            fields,
        }
    }

    /// Parses a form snapshot. Settings payloads arrive either as an object
    /// or as a JSON document embedded in a string.
    pub fn parse(raw: &Value) -> Result<Self, SettingsError> {
        match raw {
            Value::String(text) => Ok(serde_json::from_str(text)?),
            Value::Null => Ok(Self::default()),
            other => Ok(serde_json::from_value(other.clone())?),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{\"fields\":[]}".into())
    }

    pub fn field(&self, name: &str) -> Option<&SettingsField> {
        self.fields.iter().find(|field| field.field_name == name)
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut SettingsField> {
        self.fields.iter_mut().find(|field| field.field_name == name)
    }

    pub fn set_value(&mut self, name: &str, input: &str) -> Result<(), SettingsError> {
        self.field_mut(name)
            .ok_or_else(|| SettingsError::UnknownField(name.to_string()))?
            .set_from_input(input)
    }

    /// Serialises the whole form (never a diff) into the save payload.
    pub fn to_save_payload(&self) -> String {
        let fields: Vec<Value> = self
            .fields
            .iter()
            .map(|field| {
                let value = match field.field_type {
                    FieldKind::Boolean => Value::String(field.as_bool().to_string()),
                    _ => field.field_value.clone(),
                };
                json!({ "fieldName": field.field_name, "value": value })
            })
            .collect();
        json!({ "fields": fields }).to_string()
    }

    pub fn apply_save(&mut self, payload: &str) -> Result<SaveOutcome, SettingsError> {
        let payload: SavePayload = serde_json::from_str(payload)?;
        let mut outcome = SaveOutcome::default();
        for saved in payload.fields {
            let (Some(name), Some(value)) = (saved.field_name, saved.value) else {
                continue;
            };
            let applied = self
                .field_mut(&name)
                .is_some_and(|field| field.apply_saved(&value));
            if applied {
                outcome.applied.push(name);
            } else {
                outcome.ignored.push(name);
            }
        }
        Ok(outcome)
    }

    /// Table rows for the settings page body.
    pub fn to_table_rows(&self) -> String {
        let mut rows = String::new();
        for field in &self.fields {
            rows.push_str("<tr><td style='padding: 8px;'>");
            rows.push_str(&escape_markup(&field.field_prompt));
            rows.push_str("</td><td style='padding: 8px;'>");
            let value = escape_markup(&field.display_value());
            match field.field_type {
                FieldKind::Text => rows.push_str(&format!(
                    "<input type='text' id='{name}' value='{value}' maxlength='{len}' data-field-name='{name}' data-field-type='s'>",
                    name = field.field_name,
                    len = field.field_len,
                )),
                FieldKind::Numeric => {
                    rows.push_str(&format!(
                        "<input type='number' id='{name}' value='{value}' min='{min}' max='{max}' step='{step}' data-field-name='{name}' data-field-type='n'>",
                        name = field.field_name,
                        min = format_number(field.field_min),
                        max = format_number(field.field_max),
                        step = format_number(field.field_step),
                    ));
                    if let Some(range) = field.range_text() {
                        rows.push_str(&format!("<span>{range}</span>"));
                    }
                }
                FieldKind::Boolean => rows.push_str(&format!(
                    "<input type='checkbox' id='{name}' value='{flag}'{checked} data-field-name='{name}' data-field-type='b'>",
                    name = field.field_name,
                    flag = field.as_bool(),
                    checked = if field.as_bool() { " checked" } else { "" },
                )),
            }
            rows.push_str("</td></tr>");
        }
        rows
    }
}

/// `deviceSettings` -> `saveDeviceSettings`.
pub fn save_process_type(key: &str) -> String {
    format!("save{}", capitalize(key))
}

/// `deviceSettings` -> `deviceSettingsData`, used both as the custom action
/// name and as the key inside a save frame's input values.
pub fn data_key(key: &str) -> String {
    format!("{key}Data")
}

/// `deviceSettings` -> `DeviceSettings`, the suffix of the request frame type.
pub fn request_resource(key: &str) -> String {
    capitalize(key)
}

pub fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn escape_markup(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\'', "&#39;")
        .replace('"', "&quot;")
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

fn number_value(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Value::Number(Number::from(value as i64))
    } else {
        Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

fn coerce_bool(raw: &Value) -> Option<bool> {
    match raw {
        Value::Bool(flag) => Some(*flag),
        Value::Number(number) => number.as_f64().map(|value| value != 0.0),
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "on" | "1" | "yes" => Some(true),
            "false" | "off" | "0" | "no" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device_form() -> SettingsForm {
        SettingsForm::new(
            "Device Settings",
            vec![
                SettingsField::text("hostname", "hostname", 8, "ticker"),
                SettingsField::numeric("tickerSpeed", "Ticker Scroll Speed", 10.0, 120.0, 1.0, 25.0),
                SettingsField::boolean("showClock", "Show clock", false),
            ],
        )
    }

    #[test]
    fn parses_snapshot_embedded_in_a_string() {
        let raw = Value::String(
            r#"{"settingsName":"Parola Settings","fields":[{"fieldName":"numZones","fieldPrompt":"Zones","fieldType":"n","fieldValue":1,"fieldMin":1,"fieldMax":2,"fieldStep":1}]}"#
                .into(),
        );
        let form = SettingsForm::parse(&raw).expect("parse");
        assert_eq!(form.settings_name.as_deref(), Some("Parola Settings"));
        let field = form.field("numZones").expect("field");
        assert_eq!(field.field_type, FieldKind::Numeric);
        assert_eq!(field.range_text().as_deref(), Some(" (1 .. 2)"));
        assert_eq!(field.display_value(), "1");
    }

    #[test]
    fn malformed_snapshot_is_an_error() {
        let err = SettingsForm::parse(&Value::String("{fields:".into())).unwrap_err();
        assert!(matches!(err, SettingsError::Malformed(_)));
    }

    #[test]
    fn numeric_input_is_validated_against_bounds() {
        let mut form = device_form();
        form.set_value("tickerSpeed", "40").expect("in range");
        assert_eq!(form.field("tickerSpeed").expect("field").field_value, json!(40));

        assert_eq!(
            form.set_value("tickerSpeed", "121"),
            Err(SettingsError::OutOfRange {
                field: "tickerSpeed".into(),
                min: 10.0,
                max: 120.0
            })
        );
        assert!(matches!(
            form.set_value("tickerSpeed", "fast"),
            Err(SettingsError::NotNumeric { .. })
        ));
        assert_eq!(form.field("tickerSpeed").expect("field").field_value, json!(40));
    }

    #[test]
    fn text_input_respects_field_length() {
        let mut form = device_form();
        assert_eq!(
            form.set_value("hostname", "much-too-long"),
            Err(SettingsError::TooLong {
                field: "hostname".into(),
                max: 8
            })
        );
        assert_eq!(
            form.set_value("missing", "x"),
            Err(SettingsError::UnknownField("missing".into()))
        );
    }

    #[test]
    fn save_payload_is_the_whole_form_with_string_booleans() {
        let mut form = device_form();
        form.set_value("showClock", "on").expect("bool");
        let payload: Value = serde_json::from_str(&form.to_save_payload()).expect("json");
        assert_eq!(
            payload,
            json!({
                "fields": [
                    { "fieldName": "hostname", "value": "ticker" },
                    { "fieldName": "tickerSpeed", "value": 25 },
                    { "fieldName": "showClock", "value": "true" }
                ]
            })
        );
    }

    #[test]
    fn device_apply_clamps_and_truncates() {
        let mut form = device_form();
        let outcome = form
            .apply_save(
                r#"{"fields":[
                    {"fieldName":"hostname","value":"averyverylonghost"},
                    {"fieldName":"tickerSpeed","value":"500"},
                    {"fieldName":"showClock","value":"true"},
                    {"fieldName":"ghost","value":"1"},
                    {"value":"orphan"}
                ]}"#,
            )
            .expect("apply");

        assert_eq!(outcome.applied, vec!["hostname", "tickerSpeed", "showClock"]);
        assert_eq!(outcome.ignored, vec!["ghost"]);
        assert_eq!(form.field("hostname").expect("field").display_value(), "averyver");
        assert_eq!(form.field("tickerSpeed").expect("field").field_value, json!(120));
        assert!(form.field("showClock").expect("field").as_bool());
    }

    #[test]
    fn table_rows_escape_values_and_show_ranges() {
        let mut form = device_form();
        form.set_value("hostname", "a<b>").expect("text");
        let rows = form.to_table_rows();
        assert!(rows.contains("value='a&lt;b&gt;'"));
        assert!(rows.contains("<span> (10 .. 120)</span>"));
        assert_eq!(rows.matches("<tr>").count(), 3);
    }

    #[test]
    fn key_helpers_follow_the_naming_convention() {
        assert_eq!(save_process_type("rssfeedSettings"), "saveRssfeedSettings");
        assert_eq!(data_key("deviceSettings"), "deviceSettingsData");
        assert_eq!(request_resource("parolaSettings"), "ParolaSettings");
        assert_eq!(capitalize(""), "");
    }
}
