use std::fmt;

#[derive(Debug)]
pub enum HarnessError {
    Configuration(String),
    AlreadyRunning,
    Io(std::io::Error),
    Serialization(serde_json::Error),
    Http(String),
    Other(String),
}

impl HarnessError {
    /// HTTP status the control API reports for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            HarnessError::Configuration(_) | HarnessError::Serialization(_) => 400,
            HarnessError::AlreadyRunning => 409,
            _ => 500,
        }
    }
}

impl fmt::Display for HarnessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HarnessError::Configuration(e) => write!(f, "Configuration error: {}", e),
            HarnessError::AlreadyRunning => write!(f, "Test is already running"),
            HarnessError::Io(e) => write!(f, "IO error: {}", e),
            HarnessError::Serialization(e) => write!(f, "Invalid request body: {}", e),
            HarnessError::Http(e) => write!(f, "HTTP error: {}", e),
            HarnessError::Other(e) => write!(f, "Error: {}", e),
        }
    }
}

impl std::error::Error for HarnessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HarnessError::Io(e) => Some(e),
            HarnessError::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for HarnessError {
    fn from(err: std::io::Error) -> Self {
        HarnessError::Io(err)
    }
}

impl From<serde_json::Error> for HarnessError {
    fn from(err: serde_json::Error) -> Self {
        HarnessError::Serialization(err)
    }
}

impl From<String> for HarnessError {
    fn from(err: String) -> Self {
        HarnessError::Other(err)
    }
}

impl From<&str> for HarnessError {
    fn from(err: &str) -> Self {
        HarnessError::Other(err.to_string())
    }
}
