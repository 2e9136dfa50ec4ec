use thiserror::Error;

/// Failure of a single HTTP exchange with a device.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Host unreachable, refused connection or timeout.
    #[error("connection to {url} failed: {reason}")]
    Connection { url: String, reason: String },

    /// The device answered with a 4xx/5xx status.
    #[error("{url} answered with HTTP status {status}")]
    HttpStatus { url: String, status: u16 },

    /// No URL was supplied for the request.
    #[error("request without URL")]
    MalformedRequest,
}

impl FetchError {
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum SonyError {
    #[error("Connection failure: {0}")]
    Connection(String),
    #[error("HTTP status failure: {url} returned {status}")]
    HttpStatus { url: String, status: u16 },
    #[error("Malformed request: no URL supplied")]
    MalformedRequest,
    #[error("Parse failure: {0}")]
    Parse(String),
    #[error("Device does not expose capability '{0}'")]
    MissingCapability(String),
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    #[error("Registration mode {0} is not supported")]
    UnsupportedDialect(u8),
    #[error("Device not initialized: {0}")]
    NotInitialized(String),
    #[error("Persistence error: {0}")]
    Persistence(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<FetchError> for SonyError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Connection { .. } => SonyError::Connection(err.to_string()),
            FetchError::HttpStatus { url, status } => SonyError::HttpStatus { url, status },
            FetchError::MalformedRequest => SonyError::MalformedRequest,
        }
    }
}

impl From<xmltree::ParseError> for SonyError {
    fn from(err: xmltree::ParseError) -> Self {
        SonyError::Parse(format!("XML parsing error: {}", err))
    }
}

impl From<quick_xml::Error> for SonyError {
    fn from(err: quick_xml::Error) -> Self {
        SonyError::Parse(format!("XML parsing error: {}", err))
    }
}

impl From<url::ParseError> for SonyError {
    fn from(err: url::ParseError) -> Self {
        SonyError::Parse(format!("invalid URL: {}", err))
    }
}

impl SonyError {
    pub fn missing_capability(name: &str) -> Self {
        SonyError::MissingCapability(name.to_string())
    }

    pub fn unknown_command(name: &str) -> Self {
        SonyError::UnknownCommand(name.to_string())
    }

    pub fn parse(message: impl Into<String>) -> Self {
        SonyError::Parse(message.into())
    }
}
