//! Message-based instrument transports.
//!
//! A [`Transport`] moves SCPI messages to and from one instrument. It knows
//! nothing about sessions, status checking or barriers; those live in
//! [`crate::devices`]. Failures are reported as `std::io::Error`, with
//! `ErrorKind::TimedOut` reserved for bounded waits that expired.

use std::fmt;
use std::io::{self, Error, ErrorKind};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use log::{debug, info};
use regex::Regex;

use crate::error::{Error as ScopeError, Result};

pub mod block;
pub mod sim;
pub mod vxi11;

lazy_static! {
    static ref VXI11_RE: Regex = Regex::new(r"(?i)^TCPIP\d*::([^:]+)(?:::(inst\d+))?::INSTR$").unwrap();
    static ref SIM_RE: Regex   = Regex::new(r"(?i)^SIM\d*(?:::INSTR)?$").unwrap();
}

pub trait Transport {
    /// Sends one complete message.
    fn write_bytes(&mut self, data:&[u8]) -> io::Result<()>;

    /// Reads one complete response message.
    fn read_bytes(&mut self) -> io::Result<Vec<u8>>;

    /// Bounds every subsequent read and write.
    fn set_timeout(&mut self, timeout:Duration) -> io::Result<()>;

    /// Releases the channel. Calling it again is a no-op.
    fn close(&mut self) -> io::Result<()>;

    fn write_command(&mut self, cmd:&str) -> io::Result<()> {
        let mut msg:Vec<u8> = Vec::with_capacity(cmd.len() + 1);
        msg.extend_from_slice(cmd.as_bytes());
        msg.push(b'\n');
        self.write_bytes(&msg)
    }

    fn query_response(&mut self, query:&str) -> io::Result<String> {
        self.write_command(query)?;
        let raw = self.read_bytes()?;
        String::from_utf8(raw)
            .map(|s| s.trim_end().to_owned())
            .map_err(|_| Error::new(ErrorKind::InvalidData, "Unable to parse response as UTF-8"))
    }

    /// Sends a query whose answer is an IEEE 488.2 block and returns the payload.
    fn query_block(&mut self, query:&str) -> io::Result<Vec<u8>> {
        self.write_command(query)?;
        let raw = self.read_bytes()?;
        block::parse_block(&raw).map(|payload| payload.to_vec())
    }

    /// Reads the pending response as a block of packed single precision floats.
    fn read_binary_floats(&mut self) -> io::Result<Vec<f32>> {
        let raw = self.read_bytes()?;
        block::decode_f32_le(block::parse_block(&raw)?)
    }

    /// Copies a file from instrument storage to `local`, returning the number of bytes written.
    fn read_remote_file_to_local(&mut self, remote:&str, local:&Path) -> io::Result<u64> {
        let data = self.query_block(&format!("MMEM:DATA? '{}'", remote))?;
        std::fs::write(local, &data)?;
        Ok(data.len() as u64)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write_bytes(&mut self, data:&[u8]) -> io::Result<()> { (**self).write_bytes(data) }
    fn read_bytes(&mut self) -> io::Result<Vec<u8>> { (**self).read_bytes() }
    fn set_timeout(&mut self, timeout:Duration) -> io::Result<()> { (**self).set_timeout(timeout) }
    fn close(&mut self) -> io::Result<()> { (**self).close() }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Address {
    /// VXI-11 core channel on a LAN instrument
    Vxi11 { host: String, device: String },
    /// In-process simulated oscilloscope
    Simulated,
}

impl FromStr for Address {
    type Err = String;

    fn from_str(s:&str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(cap) = VXI11_RE.captures(s) {
            let host = cap[1].to_owned();
            let device = cap.get(2).map(|m| m.as_str().to_lowercase()).unwrap_or_else(|| crate::vxi11::DEFAULT_DEVICE.to_owned());
            Ok(Address::Vxi11 { host, device })
        } else if SIM_RE.is_match(s) {
            Ok(Address::Simulated)
        } else {
            Err(format!("unsupported resource string '{}' (expected TCPIP::<host>::INSTR or SIM)", s))
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f:&mut fmt::Formatter) -> fmt::Result {
        match self {
            Address::Vxi11 { host, device } => write!(f, "TCPIP::{}::{}::INSTR", host, device),
            Address::Simulated => write!(f, "SIM::INSTR"),
        }
    }
}

/// Opens the transport named by a resource string.
pub fn open(address:&str, timeout:Duration) -> Result<Box<dyn Transport>> {
    let parsed:Address = address.parse().map_err(|reason| ScopeError::Connection { address: address.to_owned(), reason })?;
    debug!("Opening {} with {} ms timeout", parsed, timeout.as_millis());

    let transport:Box<dyn Transport> = match &parsed {
        Address::Vxi11 { host, device } => {
            let t = vxi11::Vxi11Transport::open(host, device, timeout)
                .map_err(|e| ScopeError::Connection { address: address.to_owned(), reason: e.to_string() })?;
            Box::new(t)
        },
        Address::Simulated => Box::new(sim::SimulatedScope::new()),
    };

    info!("Connected to {}", parsed);
    Ok(transport)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lan_resource_strings() {
        assert_eq!("TCPIP::169.254.16.237::INSTR".parse::<Address>().unwrap(),
            Address::Vxi11 { host: "169.254.16.237".into(), device: "inst0".into() });
        assert_eq!("tcpip0::scope.lab::inst1::instr".parse::<Address>().unwrap(),
            Address::Vxi11 { host: "scope.lab".into(), device: "inst1".into() });
        assert_eq!("SIM".parse::<Address>().unwrap(), Address::Simulated);
        assert_eq!("SIM::INSTR".parse::<Address>().unwrap(), Address::Simulated);
    }

    #[test]
    fn rejects_unsupported_resources() {
        assert!("USB0::0x0AAD::0x01D6::123456::INSTR".parse::<Address>().is_err());
        assert!("TCPIP::10.0.0.5::hislip0::INSTR".parse::<Address>().is_err());
        assert!("".parse::<Address>().is_err());
    }

    #[test]
    fn open_unsupported_address_is_a_connection_error() {
        match open("GPIB0::7::INSTR", Duration::from_millis(100)) {
            Err(ScopeError::Connection { address, .. }) => assert_eq!(address, "GPIB0::7::INSTR"),
            other => panic!("expected connection error, got {:?}", other.map(|_| ())),
        }
    }
}
