// SCPI instruments driven over any `Transport`.  The oscilloscope carries the
// single-shot acquisition state machine; the signal generator is a thin setter layer.

use std::fmt;
use std::time::Duration;

use regex::Regex;
use serde::{Serialize, Deserialize};

use crate::error::{Error, Result};

pub mod instrument;
pub mod oscilloscope;
pub mod signal_generator;

lazy_static! {
    static ref IDN_RE: Regex = Regex::new("([^,]+),([^,]+),([^,]+),([^,\\s]+)").unwrap();
}

pub const DEFAULT_RESPONSE_TIMEOUT_MS:u64    = 3000;
pub const DEFAULT_OPC_TIMEOUT_MS:u64         = 15000;
pub const DEFAULT_ACQUISITION_TIMEOUT_MS:u64 = 2000;

/// Per-session timeouts and behaviour flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub response_timeout_ms: u64,
    pub opc_timeout_ms: u64,
    pub acquisition_timeout_ms: u64,
    /// Read `*STB?` after every write and query and surface queued errors
    pub status_checking: bool,
    pub reset_on_connect: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            response_timeout_ms: DEFAULT_RESPONSE_TIMEOUT_MS,
            opc_timeout_ms: DEFAULT_OPC_TIMEOUT_MS,
            acquisition_timeout_ms: DEFAULT_ACQUISITION_TIMEOUT_MS,
            status_checking: true,
            reset_on_connect: true,
        }
    }
}

impl SessionSettings {
    pub fn response_timeout(&self) -> Duration { Duration::from_millis(self.response_timeout_ms) }
    pub fn opc_timeout(&self) -> Duration { Duration::from_millis(self.opc_timeout_ms) }
    pub fn acquisition_timeout(&self) -> Duration { Duration::from_millis(self.acquisition_timeout_ms) }

    pub fn validate(&self) -> Result<()> {
        if self.response_timeout_ms == 0 { return Err(Error::Config("response timeout must be greater than zero".into())); }
        if self.opc_timeout_ms == 0 { return Err(Error::Config("operation-complete timeout must be greater than zero".into())); }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub manufacturer: String,
    pub model: String,
    pub serial_num: String,
    pub fw_version: String,
}

impl Identity {
    /// Parses an `*IDN?` response.
    pub fn parse(idn:&str) -> Result<Self> {
        let caps = IDN_RE.captures(idn.trim())
            .ok_or_else(|| Error::Protocol(format!("Unable to parse *IDN? response '{}'", idn.trim())))?;

        Ok(Self {
            manufacturer: caps[1].trim().to_owned(),
            model: caps[2].trim().to_owned(),
            serial_num: caps[3].trim().to_owned(),
            fw_version: caps[4].trim().to_owned(),
        })
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f:&mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {} (s/n {}, fw {})", self.manufacturer, self.model, self.serial_num, self.fw_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_idn() {
        let id = Identity::parse("Rohde&Schwarz,RTB2004,1333.1005k04/102138,02.300\n").unwrap();
        assert_eq!(id.manufacturer, "Rohde&Schwarz");
        assert_eq!(id.model, "RTB2004");
        assert_eq!(id.serial_num, "1333.1005k04/102138");
        assert_eq!(id.fw_version, "02.300");
    }

    #[test]
    fn short_idn_is_a_protocol_error() {
        assert!(matches!(Identity::parse("just-a-name"), Err(Error::Protocol(_))));
    }

    #[test]
    fn default_timeouts() {
        let s = SessionSettings::default();
        assert_eq!(s.response_timeout(), Duration::from_secs(3));
        assert_eq!(s.opc_timeout(), Duration::from_secs(15));
        assert_eq!(s.acquisition_timeout(), Duration::from_secs(2));
        assert!(s.status_checking);
        assert!(s.validate().is_ok());
    }
}
