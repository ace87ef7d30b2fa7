use serde::{Deserialize, Serialize};

/// Longest file or folder name the device file system accepts.
pub const MAX_FILENAME_LEN: usize = 31;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    pub is_dir: bool,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub access: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileList {
    pub current_folder: String,
    #[serde(default)]
    pub files: Vec<FileEntry>,
    #[serde(default)]
    pub total_space: u64,
    #[serde(default)]
    pub used_space: u64,
}

impl FileList {
    pub fn free_space(&self) -> u64 {
        self.total_space.saturating_sub(self.used_space)
    }

    /// Folders first, then files, each group sorted by name.
    pub fn sorted(mut self) -> Self {
        self.files
            .sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));
        self
    }
}

/// Checks a bare name (no directories) against the device's naming limit.
pub fn validate_filename(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("name must not be empty".into());
    }
    if name.contains('/') || name == "." || name == ".." {
        return Err(format!("`{name}` is not a plain file name"));
    }
    let len = name.chars().count();
    if len > MAX_FILENAME_LEN {
        return Err(format!(
            "`{name}` is {len} characters; the limit is {MAX_FILENAME_LEN}"
        ));
    }
    Ok(())
}

/// Human-readable size, matching the listing shown in the file manager.
pub fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{size} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_decodes_the_device_shape() {
        let raw = r#"{
            "currentFolder": "/SYS",
            "files": [
                {"name": "SPAmanager.js", "isDir": false, "size": 2048, "access": "r"},
                {"name": "img", "isDir": true, "size": 0, "access": "rw"}
            ],
            "totalSpace": 1000,
            "usedSpace": 400
        }"#;
        let list: FileList = serde_json::from_str(raw).expect("decode");
        assert_eq!(list.free_space(), 600);
        let sorted = list.sorted();
        assert_eq!(sorted.files[0].name, "img");
        assert!(sorted.files[0].is_dir);
    }

    #[test]
    fn filenames_longer_than_the_limit_are_rejected() {
        assert!(validate_filename("settings.ini").is_ok());
        assert!(validate_filename(&"x".repeat(MAX_FILENAME_LEN)).is_ok());
        assert!(validate_filename(&"x".repeat(MAX_FILENAME_LEN + 1)).is_err());
        assert!(validate_filename("").is_err());
        assert!(validate_filename("../etc").is_err());
    }

    #[test]
    fn sizes_are_humanised() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(3 * 1024 * 1024 + 512 * 1024), "3.50 MB");
    }
}
