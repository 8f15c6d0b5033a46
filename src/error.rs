//! Error type shared by every instrument driver in the crate.
//!
//! Transports speak `std::io::Result`; the driver layer maps their failures into
//! [`Error`] so callers can tell apart an instrument that reported a fault, a
//! bounded wait that expired and a file that could not be copied.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unable to connect to '{address}': {reason}")]
    Connection { address: String, reason: String },

    #[error("Instrument reported error {code} \"{message}\" after '{command}'")]
    Instrument { command: String, code: i32, message: String },

    #[error("{operation} did not complete within {} ms", .timeout.as_millis())]
    Timeout { operation: String, timeout: Duration },

    #[error("Unable to transfer '{remote}' to '{}': {reason}", .local.display())]
    Transfer { remote: String, local: PathBuf, reason: String },

    #[error("'{operation}' is not allowed while the session is {state}")]
    InvalidState { operation: &'static str, state: String },

    #[error("Unexpected response from instrument: {0}")]
    Protocol(String),

    #[error("Transport failure during {operation}: {source}")]
    Transport { operation: String, #[source] source: io::Error },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Unable to parse configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl Error {
    /// Classifies a transport failure raised while running `operation`.
    pub(crate) fn from_transport(operation:&str, timeout:Duration, e:io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Error::Timeout { operation: operation.to_owned(), timeout },
            io::ErrorKind::InvalidData => Error::Protocol(format!("{}: {}", operation, e)),
            _ => Error::Transport { operation: operation.to_owned(), source: e },
        }
    }

    /// Errors after which the instrument state is unknown and the session must be reopened.
    pub fn is_fault(&self) -> bool {
        matches!(self, Error::Instrument { .. } | Error::Timeout { .. } | Error::Transport { .. } | Error::Protocol(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timed_out_io_becomes_timeout() {
        let e = Error::from_transport("*OPC?", Duration::from_millis(250), io::Error::new(io::ErrorKind::TimedOut, "late"));
        assert!(matches!(e, Error::Timeout { .. }));
        assert_eq!(e.to_string(), "*OPC? did not complete within 250 ms");
    }

    #[test]
    fn malformed_response_is_a_protocol_error() {
        let e = Error::from_transport("CHAN1:DATA?", Duration::from_secs(1), io::Error::new(io::ErrorKind::InvalidData, "bad block"));
        assert!(matches!(e, Error::Protocol(_)));
        assert!(e.is_fault());
    }

    #[test]
    fn instrument_error_display_carries_code_and_message() {
        let e = Error::Instrument { command: "CHAN9:RANG 2".into(), code: -113, message: "Undefined header".into() };
        assert_eq!(e.to_string(), "Instrument reported error -113 \"Undefined header\" after 'CHAN9:RANG 2'");
        assert!(e.is_fault());
    }

    #[test]
    fn invalid_state_is_not_a_fault() {
        let e = Error::InvalidState { operation: "fetch_trace", state: "Armed".into() };
        assert!(!e.is_fault());
    }
}
