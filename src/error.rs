use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MonitorError {
    #[error("monitor is already running")]
    AlreadyRunning,

    #[error("monitor is not running")]
    NotRunning,

    #[error("capture failure: {0}")]
    CaptureFailure(String),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("event log full (capacity {capacity})")]
    LogFull { capacity: usize },

    #[error("config error: {0}")]
    Config(String),
}

impl MonitorError {
    /// Errors that end the capture session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, MonitorError::CaptureFailure(_))
    }
}

#[cfg(feature = "capture")]
impl From<pcap::Error> for MonitorError {
    fn from(err: pcap::Error) -> Self {
        MonitorError::CaptureFailure(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;
