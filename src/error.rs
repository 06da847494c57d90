use std::error;
use std::fmt;
use std::io;

pub type PlcResult<T> = Result<T, PlcError>;

/// Errors surfaced by the client and monitor.
///
/// `Timeout` is a subtype of `Communication` for dispatch purposes; use
/// [`PlcError::is_communication`] to match both at once.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum PlcError {
    /// Unknown device class, class/kind mismatch, or a count or device number
    /// outside the protocol range. Raised before any byte is sent.
    Device(String),
    /// Transport failure, short or malformed response, or a non-zero end code
    /// returned by the PLC. The session is marked disconnected.
    Communication(String),
    /// Connect, send or receive exceeded the configured timeout. The session
    /// is marked disconnected.
    Timeout(String),
    /// Invalid UTF-8 while decoding string data.
    Encoding(String),
    /// Operation invoked after `close()`.
    Closed,
}

impl PlcError {
    /// True for transport-level failures, including timeouts.
    #[inline]
    pub fn is_communication(&self) -> bool {
        match self {
            PlcError::Communication(_) | PlcError::Timeout(_) => true,
            _ => false,
        }
    }

    /// True for the timeout subtype only.
    #[inline]
    pub fn is_timeout(&self) -> bool {
        match self {
            PlcError::Timeout(_) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PlcError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PlcError::Device(message) => write!(f, "device error: {}", message),
            PlcError::Communication(message) => write!(f, "communication error: {}", message),
            PlcError::Timeout(message) => write!(f, "timeout: {}", message),
            PlcError::Encoding(message) => write!(f, "encoding error: {}", message),
            PlcError::Closed => write!(f, "session is closed"),
        }
    }
}

impl error::Error for PlcError {}

impl From<io::Error> for PlcError {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        match io_error.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
                PlcError::Timeout("Timeout occurred while communicating with PLC".to_owned())
            }
            _ => PlcError::Communication(format!("Socket error occurred: {}", io_error)),
        }
    }
}

/// Descriptions for the vendor-standard end codes. Codes outside this set are
/// reported verbatim as hex by the response check.
pub fn end_code_message(end_code: u16) -> Option<&'static str> {
    match end_code {
        0xC050 => Some("Read/write request to unsupported device"),
        0xC051 => Some("Read/write request with unsupported number of points"),
        0xC052 => Some("Read/write request to word device with bit specification"),
        0xC054 => Some("Read/write request with invalid specification of device"),
        0xC056 => Some("Read/write request with device out of range"),
        0xC059 => Some("Read/write request with invalid specification of data count"),
        0xC05B => Some("Read/write request with invalid specification of stored data"),
        0xC05C => Some("Read/write request with invalid specification of block"),
        0xC06B => Some("Request when CPU is in RUN mode and writing is disabled"),
        _ => None,
    }
}
