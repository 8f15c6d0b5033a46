//! Single-shot oscilloscope acquisition.
//!
//! A [`Session`] walks `Connected -> Configured -> Armed -> AcquisitionComplete`.
//! Configuration writes are fire-and-forget, so anything that depends on them goes
//! behind an `*OPC?` barrier: `wait_for_settled` before arming and
//! `wait_for_acquisition` before reading data. An instrument error, an expired
//! timeout or a broken transport leaves the session `Faulted`; only `close` is
//! accepted after that.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::transport::{self, Transport};
use super::instrument::Instrument;
use super::{Identity, SessionSettings};

pub mod config;
pub mod trace;

pub use self::config::{AcquisitionConfig, Coupling, Slope, TriggerMode, TriggerType};
pub use self::trace::{Encoding, Trace, TraceHeader};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum State {
	Disconnected,
	Connected,
	Configured,
	Armed,
	AcquisitionComplete,
	Faulted,
}

impl fmt::Display for State {
	fn fmt(&self, f:&mut fmt::Formatter) -> fmt::Result {
		let s = match self {
			State::Disconnected        => "disconnected",
			State::Connected           => "connected",
			State::Configured          => "configured",
			State::Armed               => "armed",
			State::AcquisitionComplete => "acquisition complete",
			State::Faulted             => "faulted",
		};
		write!(f, "{}", s)
	}
}

/// A file copied from instrument storage to the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScreenshotArtifact {
	pub path: PathBuf,
	pub size: u64,
}

// States in which plain commands may be sent
const IDLE:[State; 3] = [State::Connected, State::Configured, State::AcquisitionComplete];

// io errors that mean the channel itself is gone rather than the file transfer failing
fn is_channel_failure(kind:ErrorKind) -> bool {
	matches!(kind,
		ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::NotConnected | ErrorKind::ConnectionReset |
		ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe | ErrorKind::UnexpectedEof)
}

// `shot.png` -> `shot.png.part`, next to the destination
fn partial_path(local:&Path) -> Option<PathBuf> {
	let mut name = local.file_name()?.to_os_string();
	name.push(".part");
	Some(local.with_file_name(name))
}

pub struct Session<T: Transport = Box<dyn Transport>> {
	inst: Instrument<T>,
	address: String,
	state: State,
	settled: bool,
	config: Option<AcquisitionConfig>,
	identity: Identity,
	options: Vec<String>,
}

impl Session<Box<dyn Transport>> {

	/// Opens `address` (`TCPIP::<host>::INSTR` or `SIM`) and prepares the instrument.
	pub fn connect(address:&str, settings:SessionSettings) -> Result<Self> {
		let t = transport::open(address, settings.response_timeout())?;
		Self::start(t, address, settings)
	}

}

impl<T: Transport> Session<T> {

	/// Same as `connect` over a transport that is already open.
	pub fn with_transport(transport:T, settings:SessionSettings) -> Result<Self> {
		Self::start(transport, "(transport)", settings)
	}

	fn start(transport:T, address:&str, settings:SessionSettings) -> Result<Self> {
		let reset = settings.reset_on_connect;
		let mut inst = Instrument::new(transport, settings)?;

		let prepared = (|| -> Result<(Identity, Vec<String>)> {
			inst.clear_status()?;
			let identity = inst.identify()?;
			let options = inst.options()?;
			if reset { inst.reset()?; }
			Ok((identity, options))
		})();

		match prepared {
			Ok((identity, options)) => {
				info!("Session open to {} at {}", identity, address);
				Ok(Self{ inst, address: address.to_owned(), state: State::Connected, settled: true, config: None, identity, options })
			},
			Err(e) => {
				if let Err(close_err) = inst.close() {
					warn!("Unable to close {} after failed connect: {}", address, close_err);
				}
				Err(match e {
					Error::Connection{ .. } => e,
					other => Error::Connection{ address: address.to_owned(), reason: other.to_string() },
				})
			}
		}
	}

	pub fn state(&self) -> State { self.state }

	pub fn identity(&self) -> &Identity { &self.identity }

	pub fn options(&self) -> &[String] { &self.options }

	pub fn address(&self) -> &str { &self.address }

	pub fn settings(&self) -> &SessionSettings { self.inst.settings() }

	pub fn config(&self) -> Option<&AcquisitionConfig> { self.config.as_ref() }

	pub fn transport(&self) -> &T { self.inst.transport() }

	fn require(&self, operation:&'static str, allowed:&[State]) -> Result<()> {
		if allowed.contains(&self.state) { Ok(()) }
		else { Err(Error::InvalidState{ operation, state: self.state.to_string() }) }
	}

	// Any fault is terminal for the session
	fn guard<R>(&mut self, r:Result<R>) -> Result<R> {
		if let Err(e) = &r {
			if e.is_fault() && self.state != State::Faulted {
				error!("Session to {} faulted: {}", self.address, e);
				self.state = State::Faulted;
			}
		}
		r
	}

	/// Raw SCPI command, status checked.
	pub fn write(&mut self, cmd:&str) -> Result<()> {
		self.require("write", &IDLE)?;
		let r = self.inst.write(cmd);
		self.guard(r)
	}

	/// Raw SCPI query, status checked.
	pub fn query(&mut self, query:&str) -> Result<String> {
		self.require("query", &IDLE)?;
		let r = self.inst.query(query);
		self.guard(r)
	}

	/// Sends every setting as its own write and returns without waiting for them to execute.
	pub fn configure(&mut self, config:&AcquisitionConfig) -> Result<()> {
		self.require("configure", &IDLE)?;
		config.validate()?;

		self.settled = false;
		for cmd in config.commands() {
			let r = self.inst.write(&cmd);
			self.guard(r)?;
		}

		info!("Configuration sent ({} s window, channel {})", config.time_range_s, config.channel);
		self.config = Some(config.clone());
		self.state = State::Configured;
		Ok(())
	}

	/// Blocks until every previous write has executed.
	pub fn wait_for_settled(&mut self) -> Result<()> {
		self.require("wait_for_settled", &IDLE)?;
		let r = self.inst.query_opc("wait_for_settled");
		self.guard(r)?;
		self.settled = true;
		debug!("Instrument settled");
		Ok(())
	}

	/// Starts a single acquisition. The configuration must have settled.
	pub fn arm(&mut self) -> Result<()> {
		self.require("arm", &[State::Configured])?;
		if !self.settled {
			return Err(Error::InvalidState{ operation: "arm", state: "configured (not settled)".to_owned() });
		}

		let capture = self.config.as_ref()
			.and_then(|c| Duration::try_from_secs_f64(c.time_range_s).ok())
			.unwrap_or_default();
		let timeout = self.inst.response_timeout()
			.max(self.inst.settings().acquisition_timeout())
			.max(capture);

		let r = self.inst.set_response_timeout(timeout);
		self.guard(r)?;
		let r = self.inst.write("SING");
		self.guard(r)?;

		info!("Armed single acquisition (timeout {} ms)", timeout.as_millis());
		self.state = State::Armed;
		Ok(())
	}

	/// The only way into `AcquisitionComplete`.
	pub fn wait_for_acquisition(&mut self) -> Result<()> {
		self.require("wait_for_acquisition", &[State::Armed])?;
		let r = self.inst.query_opc("wait_for_acquisition");
		self.guard(r)?;

		let base = self.inst.settings().response_timeout();
		let r = self.inst.set_response_timeout(base);
		self.guard(r)?;

		info!("Acquisition complete");
		self.state = State::AcquisitionComplete;
		Ok(())
	}

	pub fn fetch_trace(&mut self, channel:u8, encoding:Encoding) -> Result<Trace> {
		self.require("fetch_trace", &[State::AcquisitionComplete])?;
		if channel == 0 || channel > config::CHANNELS {
			return Err(Error::Config(format!("channel must be between 1 and {}, got {}", config::CHANNELS, channel)));
		}
		let r = self.read_trace(channel, encoding);
		self.guard(r)
	}

	fn read_trace(&mut self, channel:u8, encoding:Encoding) -> Result<Trace> {
		let head_query = format!("CHAN{}:DATA:HEAD?", channel);
		let head = self.inst.query(&head_query)?;
		let header:TraceHeader = head.parse().map_err(|e:io::Error| Error::Protocol(e.to_string()))?;

		let query = format!("{};:CHAN{}:DATA?", encoding.format_command(), channel);
		let samples = match encoding {
			Encoding::Ascii => {
				let text = self.inst.query(&query)?;
				trace::parse_ascii(&text).map_err(|e| Error::Protocol(e.to_string()))?
			},
			Encoding::Real32 => self.inst.query_floats(&query)?,
		};

		if samples.len() != header.points {
			return Err(Error::Protocol(format!("Channel {} header announced {} points but {} arrived", channel, header.points, samples.len())));
		}

		debug!("Fetched {} {} samples from channel {}", samples.len(), encoding, channel);
		Ok(Trace{ channel, encoding, x_start: header.x_start, x_stop: header.x_stop, samples })
	}

	/// Saves the screen to `path` on the instrument and waits for the file to be written.
	pub fn capture_screenshot(&mut self, path:&str) -> Result<()> {
		self.require("capture_screenshot", &IDLE)?;
		let r = (|| -> Result<()> {
			self.inst.write("HCOP:DEV:LANG PNG")?;
			self.inst.write(&format!("MMEM:NAME '{}'", path))?;
			self.inst.write("HCOP:IMM")?;
			self.inst.query_opc("capture_screenshot")
		})();
		self.guard(r)?;
		info!("Screenshot saved on instrument as {}", path);
		Ok(())
	}

	/// Copies `remote` from instrument storage to `local`, byte for byte.
	///
	/// The bytes land in a sibling `.part` file that replaces `local` only once the
	/// copy is complete, so a failed transfer leaves any existing `local` untouched.
	pub fn transfer_file<P: AsRef<Path>>(&mut self, remote:&str, local:P) -> Result<ScreenshotArtifact> {
		self.require("transfer_file", &IDLE)?;
		let local = local.as_ref();
		let transfer_err = |reason:String| Error::Transfer{ remote: remote.to_owned(), local: local.to_owned(), reason };

		let partial = partial_path(local).ok_or_else(|| transfer_err("destination has no file name".to_owned()))?;

		// Fail before talking to the instrument if the destination can't be written
		File::create(&partial).map_err(|e| transfer_err(e.to_string()))?;

		let r = self.copy_remote(remote, &partial);
		let size = match self.guard(r).and_then(|size| {
			fs::rename(&partial, local).map_err(|e| transfer_err(e.to_string()))?;
			Ok(size)
		}) {
			Ok(size) => size,
			Err(e) => {
				if let Err(rm) = fs::remove_file(&partial) {
					debug!("Unable to remove {}: {}", partial.display(), rm);
				}
				return Err(match e {
					Error::Transfer{ reason, .. } => transfer_err(reason),
					other => other,
				});
			}
		};

		info!("Copied {} ({} bytes) to {}", remote, size, local.display());
		Ok(ScreenshotArtifact{ path: local.to_owned(), size })
	}

	fn copy_remote(&mut self, remote:&str, local:&Path) -> Result<u64> {
		let transfer_err = |reason:String| Error::Transfer{ remote: remote.to_owned(), local: local.to_owned(), reason };
		let timeout = self.inst.response_timeout();

		// Only errors raised by this transfer may be blamed on it
		for (code, msg) in self.inst.drain_errors()? {
			warn!("Discarding stale instrument error before copying {}: {},\"{}\"", remote, code, msg);
		}

		debug!("-> MMEM:DATA? '{}'", remote);
		let copied = match self.inst.transport_mut().read_remote_file_to_local(remote, local) {
			Ok(n) => Some(n),
			Err(e) if is_channel_failure(e.kind()) => return Err(Error::from_transport("MMEM:DATA?", timeout, e)),
			Err(e) => {
				debug!("Remote copy of {} failed: {}", remote, e);
				None
			},
		};

		// The instrument answers a missing file with an empty block and an error queue entry
		if let Some((code, msg)) = self.inst.drain_errors()?.into_iter().next() {
			return Err(transfer_err(format!("instrument reported {},\"{}\"", code, msg)));
		}

		match copied {
			None => Err(transfer_err("malformed block data".to_owned())),
			Some(0) => Err(transfer_err("remote file is empty".to_owned())),
			Some(_) => {
				let size = fs::metadata(local).map_err(|e| transfer_err(e.to_string()))?.len();
				if size == 0 { Err(transfer_err("local copy is empty".to_owned())) }
				else { Ok(size) }
			}
		}
	}

	/// Releases the instrument. Safe to call more than once.
	pub fn close(&mut self) -> Result<()> {
		if self.state == State::Disconnected { return Ok(()); }
		self.state = State::Disconnected;
		let r = self.inst.close();
		info!("Session to {} closed", self.address);
		r
	}

}

impl<T: Transport> Drop for Session<T> {

	fn drop(&mut self) {
		if let Err(e) = self.close() {
			warn!("Unable to close session to {}: {}", self.address, e);
		}
	}

}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::transport::sim::SimulatedScope;

	fn settings() -> SessionSettings {
		SessionSettings{ response_timeout_ms: 500, opc_timeout_ms: 1000, acquisition_timeout_ms: 200, ..SessionSettings::default() }
	}

	fn acquired() -> Session<SimulatedScope> {
		let mut s = Session::with_transport(SimulatedScope::new(), settings()).unwrap();
		s.configure(&AcquisitionConfig{ points: Some(500), ..Default::default() }).unwrap();
		s.wait_for_settled().unwrap();
		s.arm().unwrap();
		s.wait_for_acquisition().unwrap();
		s
	}

	#[test]
	fn connect_reads_identity_and_resets() {
		let s = Session::with_transport(SimulatedScope::new(), settings()).unwrap();
		assert_eq!(s.state(), State::Connected);
		assert_eq!(s.identity().model, "SIM3004");
		assert_eq!(s.options().to_vec(), vec!["B1", "B6", "K1"]);
		assert!(s.transport().history().iter().any(|c| c == "*RST"));
	}

	#[test]
	fn arm_requires_settled_configuration() {
		let mut s = Session::with_transport(SimulatedScope::new(), settings()).unwrap();
		assert!(matches!(s.arm(), Err(Error::InvalidState{ operation: "arm", .. })));

		s.configure(&AcquisitionConfig::default()).unwrap();
		assert!(matches!(s.arm(), Err(Error::InvalidState{ .. })));
		assert_eq!(s.state(), State::Configured);

		s.wait_for_settled().unwrap();
		s.arm().unwrap();
		assert_eq!(s.state(), State::Armed);
	}

	#[test]
	fn arm_raises_response_timeout_until_complete() {
		let slow = SessionSettings{ acquisition_timeout_ms: 800, ..settings() };
		let mut s = Session::with_transport(SimulatedScope::new(), slow).unwrap();
		s.configure(&AcquisitionConfig{ time_range_s: 0.05, ..Default::default() }).unwrap();
		s.wait_for_settled().unwrap();
		s.arm().unwrap();
		assert_eq!(s.transport().timeout(), Duration::from_millis(800));

		s.wait_for_acquisition().unwrap();
		assert_eq!(s.transport().timeout(), Duration::from_millis(500));
	}

	#[test]
	fn binary_fetch_uses_header_time_axis() {
		let mut s = acquired();
		let t = s.fetch_trace(1, Encoding::Real32).unwrap();
		assert_eq!(t.len(), 500);
		assert!((t.x_stop - t.x_start - 0.01).abs() < 1e-9);
	}

	#[test]
	fn invalid_config_is_rejected_before_any_write() {
		let mut s = Session::with_transport(SimulatedScope::new(), settings()).unwrap();
		let sent = s.transport().history().len();
		let r = s.configure(&AcquisitionConfig{ channel: 7, ..Default::default() });
		assert!(matches!(r, Err(Error::Config(_))));
		assert_eq!(s.transport().history().len(), sent);
		assert_eq!(s.state(), State::Connected);
	}

	#[test]
	fn disabled_channel_faults_the_session() {
		let mut s = acquired();
		match s.fetch_trace(2, Encoding::Ascii) {
			Err(Error::Instrument{ code, .. }) => assert_eq!(code, -221),
			other => panic!("expected instrument error, got {:?}", other.map(|t| t.len())),
		}
		assert_eq!(s.state(), State::Faulted);
		assert!(matches!(s.fetch_trace(1, Encoding::Ascii), Err(Error::InvalidState{ .. })));
		s.close().unwrap();
		assert_eq!(s.state(), State::Disconnected);
	}

	#[test]
	fn unwritable_destination_is_a_transfer_error() {
		let dir = tempfile::tempdir().unwrap();
		let local = dir.path().join("missing-dir").join("shot.png");
		let mut s = Session::with_transport(SimulatedScope::new().with_file("c:\\temp\\a.png", b"png"), settings()).unwrap();
		let sent = s.transport().history().len();

		assert!(matches!(s.transfer_file("c:\\temp\\a.png", &local), Err(Error::Transfer{ .. })));
		assert_eq!(s.transport().history().len(), sent);
		assert_eq!(s.state(), State::Connected);
	}

	#[test]
	fn partial_copy_sits_next_to_destination() {
		assert_eq!(partial_path(Path::new("out/PC_Screenshot.png")), Some(PathBuf::from("out/PC_Screenshot.png.part")));
		assert_eq!(partial_path(Path::new("/")), None);
	}

	#[test]
	fn stale_error_is_not_blamed_on_transfer() {
		let dir = tempfile::tempdir().unwrap();
		let local = dir.path().join("a.png");
		let unchecked = SessionSettings{ status_checking: false, ..settings() };
		let mut s = Session::with_transport(SimulatedScope::new().with_file("c:\\a.png", b"\x89PNG"), unchecked).unwrap();

		// Queued on the instrument, never read back
		s.write("BOGUS 1").unwrap();

		let artifact = s.transfer_file("c:\\a.png", &local).unwrap();
		assert_eq!(artifact.size, 4);
		assert_eq!(fs::read(&local).unwrap(), b"\x89PNG".to_vec());
		assert_eq!(s.state(), State::Connected);
	}

	#[test]
	fn drop_closes_transport() {
		let s = Session::with_transport(SimulatedScope::new(), settings()).unwrap();
		drop(s);
	}
}
