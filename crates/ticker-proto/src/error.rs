use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("frame carries no type discriminator")]
    MissingType,
    #[error("unknown frame type `{0}`")]
    UnknownType(String),
}

pub type FrameResult<T> = Result<T, FrameError>;

#[derive(Debug, Error, PartialEq)]
pub enum SettingsError {
    #[error("malformed settings payload: {0}")]
    Malformed(String),
    #[error("unknown field `{0}`")]
    UnknownField(String),
    #[error("`{field}` expects a number, got `{input}`")]
    NotNumeric { field: String, input: String },
    #[error("`{field}` must be between {min} and {max}")]
    OutOfRange { field: String, min: f64, max: f64 },
    #[error("`{field}` is limited to {max} characters")]
    TooLong { field: String, max: usize },
}

impl From<serde_json::Error> for SettingsError {
    fn from(err: serde_json::Error) -> Self {
        SettingsError::Malformed(err.to_string())
    }
}
