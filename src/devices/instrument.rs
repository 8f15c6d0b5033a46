
use std::io;
use std::time::Duration;

use log::{debug, trace, warn};
use regex::Regex;

use crate::error::{Error, Result};
use crate::transport::Transport;
use super::{Identity, SessionSettings};

lazy_static! {
	static ref SYST_ERR_RE: Regex = Regex::new(r#"^\s*([+-]?\d+)\s*,\s*"?([^"]*)"?"#).unwrap();
}

// Error/event queue summary bit of the status byte
const STB_ERROR_QUEUE:u8 = 0x04;

// Bound on SYST:ERR? reads in case an instrument never reports 0,"No error"
const MAX_QUEUED_ERRORS:usize = 32;

/// Parses one `SYST:ERR?` entry into `(code, message)`.
pub fn parse_error_entry(resp:&str) -> Option<(i32, String)> {
	let cap = SYST_ERR_RE.captures(resp)?;
	let code = cap[1].trim_start_matches('+').parse::<i32>().ok()?;
	Some((code, cap[2].trim().to_owned()))
}

/// A SCPI instrument on top of a transport: status checking, the `*OPC?`
/// barrier and timeout bookkeeping shared by every driver in `devices`.
pub struct Instrument<T: Transport> {
	transport: T,
	settings: SessionSettings,
	response_timeout: Duration,
	closed: bool,
}

impl<T: Transport> Instrument<T> {

	pub fn new(mut transport:T, settings:SessionSettings) -> Result<Self> {
		settings.validate()?;
		let response_timeout = settings.response_timeout();
		transport.set_timeout(response_timeout).map_err(|e| Error::from_transport("set timeout", response_timeout, e))?;
		Ok(Self{ transport, settings, response_timeout, closed: false })
	}

	pub fn settings(&self) -> &SessionSettings { &self.settings }

	pub fn transport(&self) -> &T { &self.transport }

	pub fn transport_mut(&mut self) -> &mut T { &mut self.transport }

	pub fn response_timeout(&self) -> Duration { self.response_timeout }

	pub fn is_closed(&self) -> bool { self.closed }

	pub fn set_response_timeout(&mut self, timeout:Duration) -> Result<()> {
		self.transport.set_timeout(timeout).map_err(|e| Error::from_transport("set timeout", timeout, e))?;
		debug!("Response timeout set to {} ms", timeout.as_millis());
		self.response_timeout = timeout;
		Ok(())
	}

	fn io<R>(&self, operation:&str, r:io::Result<R>) -> Result<R> {
		r.map_err(|e| Error::from_transport(operation, self.response_timeout, e))
	}

	/// Sends a command without waiting for it to execute.
	pub fn write(&mut self, cmd:&str) -> Result<()> {
		debug!("-> {}", cmd);
		let r = self.transport.write_command(cmd);
		self.io(cmd, r)?;
		self.check_status(cmd)
	}

	pub fn query(&mut self, query:&str) -> Result<String> {
		debug!("-> {}", query);
		let r = self.transport.query_response(query);
		let resp = self.io(query, r)?;
		trace!("<- {}", resp);
		self.check_status(query)?;
		Ok(resp)
	}

	/// Sends a query answered by a block of REAL,32 samples.
	pub fn query_floats(&mut self, query:&str) -> Result<Vec<f32>> {
		debug!("-> {}", query);
		let r = self.transport.write_command(query);
		self.io(query, r)?;
		let r = self.transport.read_binary_floats();

		// A refused query answers with an empty message; let the error queue say why
		if let Err(e) = &r {
			if e.kind() == io::ErrorKind::InvalidData { self.check_status(query)?; }
		}
		let samples = self.io(query, r)?;
		self.check_status(query)?;
		trace!("<- {} samples", samples.len());
		Ok(samples)
	}

	/// Blocks on `*OPC?` for at most the operation-complete timeout, then restores the response timeout.
	pub fn query_opc(&mut self, operation:&str) -> Result<()> {
		let opc_timeout = self.settings.opc_timeout();
		debug!("-> *OPC? ({}, up to {} ms)", operation, opc_timeout.as_millis());

		let r = self.transport.set_timeout(opc_timeout);
		r.map_err(|e| Error::from_transport(operation, opc_timeout, e))?;
		let resp = self.transport.query_response("*OPC?");
		let restore = self.transport.set_timeout(self.response_timeout);

		let resp = resp.map_err(|e| Error::from_transport(operation, opc_timeout, e))?;
		self.io("set timeout", restore)?;

		if resp.trim().trim_start_matches('+') != "1" {
			return Err(Error::Protocol(format!("*OPC? answered '{}' after {}", resp, operation)));
		}
		self.check_status(operation)
	}

	/// Reads and empties the error queue, returning every non-zero entry.
	pub fn drain_errors(&mut self) -> Result<Vec<(i32, String)>> {
		let mut ans:Vec<(i32, String)> = vec![];
		for _ in 0..MAX_QUEUED_ERRORS {
			let r = self.transport.query_response("SYST:ERR?");
			let resp = self.io("SYST:ERR?", r)?;
			let (code, msg) = parse_error_entry(&resp)
				.ok_or_else(|| Error::Protocol(format!("Unable to parse SYST:ERR? response '{}'", resp)))?;
			if code == 0 { break; }
			ans.push((code, msg));
		}
		Ok(ans)
	}

	fn status_byte(&mut self) -> Result<u8> {
		let r = self.transport.query_response("*STB?");
		let resp = self.io("*STB?", r)?;
		resp.trim().trim_start_matches('+').parse::<u8>()
			.map_err(|_| Error::Protocol(format!("Unable to parse *STB? response '{}'", resp)))
	}

	/// Surfaces the first queued instrument error, if the status byte reports any.
	pub fn check_status(&mut self, command:&str) -> Result<()> {
		if !self.settings.status_checking { return Ok(()); }

		if self.status_byte()? & STB_ERROR_QUEUE == 0 { return Ok(()); }

		let mut errors = self.drain_errors()?.into_iter();
		match errors.next() {
			Some((code, message)) => {
				for (c, m) in errors {
					warn!("Additional queued error after '{}': {},\"{}\"", command, c, m);
				}
				Err(Error::Instrument{ command: command.to_owned(), code, message })
			},
			None => Ok(()),
		}
	}

	pub fn identify(&mut self) -> Result<Identity> { Identity::parse(&self.query("*IDN?")?) }

	pub fn options(&mut self) -> Result<Vec<String>> {
		let resp = self.query("*OPT?")?;
		Ok(resp.split(',')
			.map(|s| s.trim().trim_matches('"').to_owned())
			.filter(|s| !s.is_empty() && s != "0")
			.collect())
	}

	pub fn clear_status(&mut self) -> Result<()> { self.write("*CLS") }

	pub fn reset(&mut self) -> Result<()> {
		self.write("*RST")?;
		self.query_opc("*RST")
	}

	/// Releases the transport; later calls do nothing.
	pub fn close(&mut self) -> Result<()> {
		if self.closed { return Ok(()); }
		self.closed = true;
		let r = self.transport.close();
		self.io("close", r)
	}

}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::transport::sim::SimulatedScope;

	fn fast() -> SessionSettings {
		SessionSettings{ response_timeout_ms: 200, opc_timeout_ms: 200, ..SessionSettings::default() }
	}

	#[test]
	fn parses_error_entries() {
		assert_eq!(parse_error_entry("-113,\"Undefined header\""), Some((-113, "Undefined header".to_owned())));
		assert_eq!(parse_error_entry("+0,\"No error\"\n"), Some((0, "No error".to_owned())));
		assert_eq!(parse_error_entry("garbage"), None);
	}

	#[test]
	fn write_surfaces_queued_error() {
		let mut inst = Instrument::new(SimulatedScope::new(), fast()).unwrap();
		match inst.write("BOGUS 1") {
			Err(Error::Instrument{ command, code, .. }) => {
				assert_eq!(command, "BOGUS 1");
				assert_eq!(code, -113);
			},
			other => panic!("expected instrument error, got {:?}", other),
		}
		// The queue was drained
		assert!(inst.write("*CLS").is_ok());
	}

	#[test]
	fn status_checking_can_be_disabled() {
		let settings = SessionSettings{ status_checking: false, ..fast() };
		let mut inst = Instrument::new(SimulatedScope::new(), settings).unwrap();
		assert!(inst.write("BOGUS 1").is_ok());
		assert_eq!(inst.drain_errors().unwrap(), vec![(-113, "Undefined header".to_owned())]);
	}

	#[test]
	fn opc_restores_response_timeout() {
		let mut inst = Instrument::new(SimulatedScope::new(), fast()).unwrap();
		inst.write("TIM:RANG 0.01").unwrap();
		inst.query_opc("configure").unwrap();
		assert_eq!(inst.transport().timeout(), Duration::from_millis(200));
		assert_eq!(inst.transport().pending_operations(), 0);
	}

	#[test]
	fn refused_float_query_reports_the_instrument_error() {
		let mut inst = Instrument::new(SimulatedScope::new(), fast()).unwrap();
		// Nothing acquired yet
		match inst.query_floats("FORM REAL,32;:CHAN1:DATA?") {
			Err(Error::Instrument{ code, .. }) => assert_eq!(code, -230),
			other => panic!("expected instrument error, got {:?}", other.map(|v| v.len())),
		}
	}

	#[test]
	fn options_are_split() {
		let mut inst = Instrument::new(SimulatedScope::new(), fast()).unwrap();
		assert_eq!(inst.options().unwrap(), vec!["B1", "B6", "K1"]);
	}

	#[test]
	fn close_twice_is_fine() {
		let mut inst = Instrument::new(SimulatedScope::new(), fast()).unwrap();
		inst.close().unwrap();
		inst.close().unwrap();
		assert!(inst.transport().is_closed());
	}
}
