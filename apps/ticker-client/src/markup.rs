//! Minimal markup scanner.
//!
//! Body and popup content is device-generated HTML. The client only needs
//! the opening tags (with their attributes) and the text immediately
//! following each one, so this is a tolerant single-pass tokenizer rather
//! than a document parser.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    /// Lowercased element name.
    pub name: String,
    pub attrs: Vec<(String, String)>,
    /// Text between this opening tag and the next tag, entity-decoded and trimmed.
    pub text: String,
}

impl Tag {
    /// Case-insensitive attribute lookup (`onClick` and `onclick` both occur).
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn id(&self) -> Option<&str> {
        self.attr("id").filter(|id| !id.is_empty())
    }

    pub fn is_text_entry(&self) -> bool {
        matches!(self.name.as_str(), "input" | "textarea" | "select")
    }
}

/// A parsed inline handler such as `deleteFile('/logs/a.txt', folderName)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerCall {
    pub name: String,
    pub params: Vec<String>,
}

pub fn scan(html: &str) -> Vec<Tag> {
    let bytes = html.as_bytes();
    let mut tags: Vec<Tag> = Vec::new();
    let mut pos = 0;

    while let Some(offset) = html[pos..].find('<') {
        let start = pos + offset;
        let rest = &html[start..];

        if rest.starts_with("<!--") {
            pos = match rest.find("-->") {
                Some(end) => start + end + 3,
                None => html.len(),
            };
            continue;
        }
        if rest.starts_with("</") || rest.starts_with("<!") || rest.starts_with("<?") {
            pos = match rest.find('>') {
                Some(end) => start + end + 1,
                None => html.len(),
            };
            continue;
        }

        let mut cursor = start + 1;
        let name_end = scan_while(bytes, cursor, |b| b.is_ascii_alphanumeric() || b == b'-');
        if name_end == cursor {
            pos = cursor;
            continue;
        }
        let name = html[cursor..name_end].to_ascii_lowercase();
        cursor = name_end;

        let mut attrs = Vec::new();
        loop {
            cursor = scan_while(bytes, cursor, |b| b.is_ascii_whitespace() || b == b'/');
            if cursor >= bytes.len() {
                break;
            }
            if bytes[cursor] == b'>' {
                cursor += 1;
                break;
            }
            let key_end = scan_while(bytes, cursor, |b| {
                !b.is_ascii_whitespace() && !matches!(b, b'=' | b'>' | b'/')
            });
            if key_end == cursor {
                cursor += 1;
                continue;
            }
            let key = html[cursor..key_end].to_string();
            cursor = scan_while(bytes, key_end, |b| b.is_ascii_whitespace());

            let mut value = String::new();
            if bytes.get(cursor) == Some(&b'=') {
                cursor = scan_while(bytes, cursor + 1, |b| b.is_ascii_whitespace());
                match bytes.get(cursor) {
                    Some(&quote) if quote == b'"' || quote == b'\'' => {
                        let value_start = cursor + 1;
                        let value_end = html[value_start..]
                            .find(quote as char)
                            .map_or(html.len(), |end| value_start + end);
                        value = decode_entities(&html[value_start..value_end]);
                        cursor = (value_end + 1).min(html.len());
                    }
                    Some(_) => {
                        let value_end =
                            scan_while(bytes, cursor, |b| !b.is_ascii_whitespace() && b != b'>');
                        value = decode_entities(&html[cursor..value_end]);
                        cursor = value_end;
                    }
                    None => {}
                }
            }
            attrs.push((key, value));
        }

        let text_end = html[cursor..].find('<').map_or(html.len(), |end| cursor + end);
        let text = decode_entities(html[cursor..text_end].trim());
        tags.push(Tag { name, attrs, text });
        pos = text_end;
    }

    tags
}

fn scan_while(bytes: &[u8], mut index: usize, keep: impl Fn(u8) -> bool) -> usize {
    while index < bytes.len() && keep(bytes[index]) {
        index += 1;
    }
    index
}

pub fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

/// Finds the first identifier that is directly called, returning it and the
/// byte offset just past its opening parenthesis.
fn first_call(handler: &str) -> Option<(String, usize)> {
    let chars: Vec<(usize, char)> = handler.char_indices().collect();
    let mut i = 0;
    while i < chars.len() {
        let (start, c) = chars[i];
        if !is_ident_start(c) {
            i += 1;
            continue;
        }
        let mut j = i + 1;
        while j < chars.len() && is_ident_char(chars[j].1) {
            j += 1;
        }
        let end = chars.get(j).map_or(handler.len(), |(offset, _)| *offset);
        let mut k = j;
        while k < chars.len() && chars[k].1.is_whitespace() {
            k += 1;
        }
        if let Some((paren, '(')) = chars.get(k) {
            return Some((handler[start..end].to_string(), paren + 1));
        }
        i = j;
    }
    None
}

/// `uploadSelectedFile(this)` -> `uploadSelectedFile`.
pub fn change_handler_name(handler: &str) -> Option<String> {
    first_call(handler).map(|(name, _)| name)
}

/// Parses `name(a, b)` into the name and its trimmed, non-empty argument
/// tokens. Arguments stop at the first closing parenthesis.
pub fn parse_click_handler(handler: &str) -> Option<HandlerCall> {
    let (name, args_start) = first_call(handler)?;
    let rest = &handler[args_start..];
    let args = rest.find(')').map_or(rest, |end| &rest[..end]);
    let params = args
        .split(',')
        .map(str::trim)
        .filter(|param| !param.is_empty())
        .map(str::to_string)
        .collect();
    Some(HandlerCall { name, params })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_tags_attributes_and_text() {
        let html = r#"<div id="settingsName">Device Settings</div>
            <!-- <input id="ghost"> -->
            <input type='text' id=hostname value="esp &amp; co" disabled>
            <button onClick="processAction('saveSettings')">Save</button>"#;
        let tags = scan(html);
        let names: Vec<&str> = tags.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["div", "input", "button"]);

        assert_eq!(tags[0].id(), Some("settingsName"));
        assert_eq!(tags[0].text, "Device Settings");
        assert_eq!(tags[1].attr("VALUE"), Some("esp & co"));
        assert_eq!(tags[1].attr("disabled"), Some(""));
        assert!(tags[1].is_text_entry());
        assert_eq!(tags[2].attr("onclick"), Some("processAction('saveSettings')"));
        assert_eq!(tags[2].text, "Save");
    }

    #[test]
    fn tolerates_truncated_markup() {
        let tags = scan("<p id='a'>x</p><input id=\"b");
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[1].id(), Some("b"));
        assert!(scan("plain text < 5").is_empty());
    }

    #[test]
    fn click_handlers_parse_name_and_params() {
        assert_eq!(
            parse_click_handler("deleteFile( '/logs/a.txt' , folderName ,)"),
            Some(HandlerCall {
                name: "deleteFile".into(),
                params: vec!["'/logs/a.txt'".into(), "folderName".into()],
            })
        );
        assert_eq!(
            parse_click_handler("closePopup()"),
            Some(HandlerCall {
                name: "closePopup".into(),
                params: vec![],
            })
        );
        assert_eq!(parse_click_handler("return false"), None);
    }

    #[test]
    fn change_handler_takes_the_first_call() {
        assert_eq!(
            change_handler_name("  uploadSelectedFile (this); other()"),
            Some("uploadSelectedFile".into())
        );
        assert_eq!(change_handler_name("this.value"), None);
    }
}
