use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Parse,
    NotFound,
    InvalidInput,
    InvalidState,
    Internal,
    /// Row or column index outside the populated range
    OutOfBounds,
    /// Write to a row other than the header
    UnsupportedMutation,
    /// Access after `dispose()`
    Disposed,
    /// Swap file missing or unreadable; the cell could not be reloaded
    DataMissing,
    Serialization,
    CapacityExceeded,
}

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub context: String,
}

impl Error {
    pub fn new(kind: ErrorKind, context: String) -> Self {
        Error { kind, context }
    }

    pub fn disposed(what: &str) -> Self {
        Error::new(ErrorKind::Disposed, format!("{} already disposed", what))
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.context)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error {
            kind: ErrorKind::Io,
            context: err.to_string(),
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error {
            kind: ErrorKind::Serialization,
            context: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            kind: ErrorKind::Parse,
            context: format!("manifest: {}", err),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
