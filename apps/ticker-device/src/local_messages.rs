//! Locally edited ticker messages, one record per line in
//! `localMessages.txt`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};

pub const FILE_NAME: &str = "localMessages.txt";
pub const MAX_MESSAGE_LEN: usize = 150;

pub const DEFAULT_MESSAGES: [&str; 3] = [
    "[A] There are no messages",
    "[D] This is the second messages",
    "<rssfeed>",
];

#[derive(Clone)]
pub struct LocalMessageStore {
    inner: Arc<Inner>,
}

struct Inner {
    path: PathBuf,
    state: Mutex<Records>,
}

#[derive(Default)]
struct Records {
    items: Vec<String>,
    cursor: usize,
}

impl LocalMessageStore {
    /// Opens the store in `dir`, writing the default records when the file
    /// does not exist yet.
    pub async fn open(dir: &Path) -> StoreResult<Self> {
        let store = Self {
            inner: Arc::new(Inner {
                path: dir.join(FILE_NAME),
                state: Mutex::new(Records::default()),
            }),
        };
        store.reload().await?;
        Ok(store)
    }

    pub async fn reload(&self) -> StoreResult<()> {
        let path = &self.inner.path;
        let items = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw.lines().filter_map(normalize).collect(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let defaults: Vec<String> = DEFAULT_MESSAGES.iter().map(|m| m.to_string()).collect();
                self.persist(&defaults).await?;
                info!(file = %path.display(), "seeded default local messages");
                defaults
            }
            Err(source) => {
                return Err(StoreError::Read {
                    path: path.clone(),
                    source,
                })
            }
        };
        let mut state = self.inner.state.lock();
        state.items = items;
        state.cursor = 0;
        Ok(())
    }

    pub fn list(&self) -> Vec<String> {
        self.inner.state.lock().items.clone()
    }

    /// JSON array text, as carried in `LocalMessagesData`.
    pub fn to_json(&self) -> String {
        Value::from(self.list()).to_string()
    }

    /// Replaces the whole list from a saved JSON array. Nulls and blank
    /// entries are skipped, the rest trimmed and clipped.
    pub async fn replace_from_json(&self, raw: &str) -> StoreResult<usize> {
        let parsed: Vec<Option<Value>> = serde_json::from_str(raw)?;
        let items: Vec<String> = parsed
            .into_iter()
            .flatten()
            .filter_map(|value| match value {
                Value::String(text) => normalize(&text),
                Value::Null => None,
                other => normalize(&other.to_string()),
            })
            .collect();
        self.persist(&items).await?;
        let count = items.len();
        let mut state = self.inner.state.lock();
        state.items = items;
        if state.cursor >= count {
            state.cursor = 0;
        }
        info!(count, "local messages saved");
        Ok(count)
    }

    /// Next record in rotation, wrapping to the first after the last.
    pub fn next_message(&self) -> Option<String> {
        let mut state = self.inner.state.lock();
        if state.items.is_empty() {
            return None;
        }
        if state.cursor >= state.items.len() {
            debug!("end of local messages, wrapping");
            state.cursor = 0;
        }
        let message = state.items[state.cursor].clone();
        state.cursor += 1;
        Some(message)
    }

    async fn persist(&self, items: &[String]) -> StoreResult<()> {
        let path = &self.inner.path;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        let mut body = items.join("\n");
        if !body.is_empty() {
            body.push('\n');
        }
        tokio::fs::write(path, body)
            .await
            .map_err(|source| StoreError::Write {
                path: path.clone(),
                source,
            })
    }
}

fn normalize(text: &str) -> Option<String> {
    let single_line: String = text.chars().filter(|c| *c != '\n' && *c != '\r').collect();
    let trimmed = single_line.trim_matches(' ');
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(MAX_MESSAGE_LEN).collect())
}

/// Table rows shown before the client renders its own editor.
pub fn to_table_rows(items: &[String]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(index, text)| {
            format!(
                "<tr><td style='padding: 8px;'><input type='text' id='localMessage_{index}' value='{}' maxlength='{MAX_MESSAGE_LEN}' data-index='{index}'></td></tr>",
                ticker_proto::settings::escape_markup(text)
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn scratch() -> PathBuf {
        std::env::temp_dir().join(format!("ticker-messages-{}", Uuid::new_v4()))
    }

    #[tokio::test]
    async fn missing_file_is_seeded_with_defaults() {
        let dir = scratch();
        let store = LocalMessageStore::open(&dir).await.expect("open");
        assert_eq!(store.list(), DEFAULT_MESSAGES.map(String::from).to_vec());
        let on_disk = tokio::fs::read_to_string(dir.join(FILE_NAME)).await.expect("seeded");
        assert_eq!(on_disk.lines().count(), 3);
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn saving_skips_nulls_and_clips_long_records() {
        let dir = scratch();
        let store = LocalMessageStore::open(&dir).await.expect("open");
        let long = "x".repeat(200);
        let raw = serde_json::json!(["  first  ", null, "", long, "<time>"]).to_string();
        assert_eq!(store.replace_from_json(&raw).await.expect("save"), 3);

        let items = store.list();
        assert_eq!(items[0], "first");
        assert_eq!(items[1].chars().count(), MAX_MESSAGE_LEN);
        assert_eq!(items[2], "<time>");

        let reopened = LocalMessageStore::open(&dir).await.expect("reopen");
        assert_eq!(reopened.list(), items);
        assert!(store.replace_from_json("{\"not\": \"a list\"}").await.is_err());
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn rotation_wraps_to_the_first_record() {
        let dir = scratch();
        let store = LocalMessageStore::open(&dir).await.expect("open");
        store
            .replace_from_json("[\"one\", \"two\"]")
            .await
            .expect("save");
        let seen: Vec<String> = (0..5).filter_map(|_| store.next_message()).collect();
        assert_eq!(seen, ["one", "two", "one", "two", "one"]);

        store.replace_from_json("[]").await.expect("clear");
        assert_eq!(store.next_message(), None);
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[test]
    fn rows_escape_quotes() {
        let rows = to_table_rows(&["it's".to_string()]);
        assert!(rows.contains("id='localMessage_0'"));
        assert!(rows.contains("value='it&#39;s'"));
    }
}
