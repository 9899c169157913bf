use thiserror::Error;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Attribute not found: {0}")]
    AttributeNotFound(String),
    #[error("Attribute '{0}' is stored in the filesystem and cannot be used in a filter")]
    FilesystemAttributeInFilter(String),
    #[error("Invalid attribute path '{path}': '{segment}' is not a link attribute")]
    InvalidAttributePath { path: String, segment: String },
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),
    #[error("Query failed: {message} (sql: {sql}; params: {params})")]
    QueryFailed {
        sql: String,
        params: String,
        message: String,
    },
    #[error("Datasource unavailable: {0}")]
    DatasourceUnavailable(String),
    #[error("Parse error: {message}")]
    Parse {
        message: String,
        line: Option<usize>,
        col: Option<usize>,
    },
    #[error("Config error: {0}")]
    Config(String),
    #[error("Cache error: {0}")]
    Cache(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl RepositoryError {
    /// Errors raised while resolving attribute names during compilation.
    pub fn is_attribute_resolution(&self) -> bool {
        matches!(
            self,
            Self::AttributeNotFound(_)
                | Self::FilesystemAttributeInFilter(_)
                | Self::InvalidAttributePath { .. }
                | Self::InvalidIdentifier(_)
        )
    }
    /// Only backend failures can succeed when the same call is repeated;
    /// retrying is left to the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::QueryFailed { .. } | Self::DatasourceUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

// Helper conversions
impl From<rusqlite::Error> for RepositoryError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}
impl From<config::ConfigError> for RepositoryError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}
