//! Shared protocol definitions for the ticker web UI: the frames exchanged
//! over the duplex channel, the menu and settings models carried inside them,
//! and the file-manager listing returned by the device's HTTP surface.
//! Kept free of runtime dependencies so both endpoints can share it.

pub mod error;
pub mod frame;
pub mod fsm;
pub mod model;
pub mod settings;

pub use error::{FrameError, FrameResult, SettingsError};
pub use frame::{ClientFrame, FullState, Notice, ServerFrame};
pub use fsm::{FileEntry, FileList, MAX_FILENAME_LEN};
pub use model::{Menu, MenuItem};
pub use settings::{FieldKind, SettingsField, SettingsForm};
