use thiserror::Error;

pub type SheetcheckResult<T> = Result<T, SheetcheckError>;

#[derive(Error, Debug)]
pub enum SheetcheckError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot open workbook container: {0}")]
    Container(String),

    #[error("XML error in {part}: {message}")]
    Xml { part: String, message: String },

    #[error("Stream failed while reading {part}: {message}")]
    Stream { part: String, message: String },

    #[error("Formula engine error: {0}")]
    Engine(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<zip::result::ZipError> for SheetcheckError {
    fn from(err: zip::result::ZipError) -> Self {
        SheetcheckError::Container(err.to_string())
    }
}

impl From<calamine::XlsxError> for SheetcheckError {
    fn from(err: calamine::XlsxError) -> Self {
        SheetcheckError::Container(err.to_string())
    }
}

impl SheetcheckError {
    /// Failures that abort a streaming run as a whole (as opposed to a single sheet).
    pub fn is_stream_level(&self) -> bool {
        matches!(
            self,
            SheetcheckError::Io(_) | SheetcheckError::Container(_) | SheetcheckError::Stream { .. }
        )
    }
}
