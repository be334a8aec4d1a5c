use std::fmt;

/// [Result] alias for return types of the crate API
pub type Result<T> = std::result::Result<T, Error>;

/// Error enum type
#[derive(Debug)]
pub enum Error {
    /// The Copilot session is currently disconnected, or the queue serving it is gone.
    Disconnected,
    /// The drone transport refused or failed a command. The String contains the reason.
    TransportError(String),
    /// The vision service failed to produce a description. The String contains the reason.
    VisionError(String),
    /// Operation timed out waiting for a collaborator.
    Timeout,
    /// None of the stream candidates produced a frame while being probed.
    NoSourceAvailable,
    /// Neither the stream candidates nor the fallback acquisition could provide video.
    NoVideoAvailable,
    /// No frame has been acquired yet, nothing to analyze.
    NoFrameAvailable,
    /// Video capture error. The String contains the reason.
    CaptureError(String),
    /// Configuration could not be loaded or is inconsistent. The String contains the reason.
    ConfigError(String),
    /// Textual command could not be parsed. The String contains the offending input.
    ParseError(String),
    /// Underlying I/O error (sockets, configuration files).
    IoError(std::io::Error),
    /// Error with the async runtime.
    SystemError(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Disconnected => write!(f, "not connected to drone"),
            Error::TransportError(reason) => write!(f, "transport error: {}", reason),
            Error::VisionError(reason) => write!(f, "analysis failed: {}", reason),
            Error::Timeout => write!(f, "operation timed out"),
            Error::NoSourceAvailable => write!(f, "no video stream candidate produced a frame"),
            Error::NoVideoAvailable => write!(f, "no video available"),
            Error::NoFrameAvailable => write!(f, "no video frame available for analysis"),
            Error::CaptureError(reason) => write!(f, "video capture error: {}", reason),
            Error::ConfigError(reason) => write!(f, "configuration error: {}", reason),
            Error::ParseError(input) => write!(f, "cannot parse command: {}", input),
            Error::IoError(e) => write!(f, "i/o error: {}", e),
            Error::SystemError(reason) => write!(f, "system error: {}", reason),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::IoError(error)
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Timeout
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(error: tokio::task::JoinError) -> Self {
        Self::SystemError(format!("{}", error))
    }
}

impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Self {
        Self::ConfigError(format!("{}", error))
    }
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else {
            Self::VisionError(format!("{}", error))
        }
    }
}

impl From<image::ImageError> for Error {
    fn from(error: image::ImageError) -> Self {
        Self::VisionError(format!("image encoding error: {}", error))
    }
}

impl From<flume::RecvError> for Error {
    fn from(_: flume::RecvError) -> Self {
        self::Error::Disconnected
    }
}

impl<T> From<flume::SendError<T>> for Error {
    fn from(_: flume::SendError<T>) -> Self {
        self::Error::Disconnected
    }
}
