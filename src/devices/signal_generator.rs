
use std::fmt;
use std::str::FromStr;

use log::{info, warn};
use serde::{Serialize, Deserialize};

use crate::error::{Error, Result};
use crate::transport::{self, Transport};
use super::instrument::Instrument;
use super::{Identity, SessionSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
	Sine,
	Square,
	Triangle,
}

impl Waveform {
	pub fn as_scpi(&self) -> &'static str {
		match self {
			Waveform::Sine     => "SIN",
			Waveform::Square   => "SQU",
			Waveform::Triangle => "TRI",
		}
	}
}

impl FromStr for Waveform {
	type Err = String;

	fn from_str(s:&str) -> std::result::Result<Self, Self::Err> {
		match s.trim().to_lowercase().as_str() {
			"sine" | "sin"       => Ok(Waveform::Sine),
			"square" | "squ"     => Ok(Waveform::Square),
			"triangle" | "tri"   => Ok(Waveform::Triangle),
			other => Err(format!("unknown waveform '{}' (expected sine, square or triangle)", other)),
		}
	}
}

impl fmt::Display for Waveform {
	fn fmt(&self, f:&mut fmt::Formatter) -> fmt::Result {
		match self {
			Waveform::Sine     => write!(f, "sine"),
			Waveform::Square   => write!(f, "square"),
			Waveform::Triangle => write!(f, "triangle"),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalSettings {
	pub frequency_mhz: f64,
	pub power_dbm: f64,
	pub waveform: Waveform,
	pub output: bool,
}

impl Default for SignalSettings {
	fn default() -> Self {
		Self{ frequency_mhz: 10.0, power_dbm: -10.0, waveform: Waveform::Sine, output: false }
	}
}

pub struct SignalGenerator<T: Transport = Box<dyn Transport>> {
	inst: Instrument<T>,
	address: String,
	identity: Identity,
}

impl SignalGenerator<Box<dyn Transport>> {

	pub fn connect(address:&str, settings:SessionSettings) -> Result<Self> {
		let t = transport::open(address, settings.response_timeout())?;
		Self::start(t, address, settings)
	}

}

impl<T: Transport> SignalGenerator<T> {

	pub fn with_transport(transport:T, settings:SessionSettings) -> Result<Self> {
		Self::start(transport, "(transport)", settings)
	}

	fn start(transport:T, address:&str, settings:SessionSettings) -> Result<Self> {
		let reset = settings.reset_on_connect;
		let mut inst = Instrument::new(transport, settings)?;

		let prepared = (|| -> Result<Identity> {
			inst.clear_status()?;
			let identity = inst.identify()?;
			if reset { inst.reset()?; }
			Ok(identity)
		})();

		match prepared {
			Ok(identity) => {
				info!("Signal generator {} at {}", identity, address);
				Ok(Self{ inst, address: address.to_owned(), identity })
			},
			Err(e) => {
				if let Err(close_err) = inst.close() {
					warn!("Unable to close {} after failed connect: {}", address, close_err);
				}
				Err(Error::Connection{ address: address.to_owned(), reason: e.to_string() })
			}
		}
	}

	pub fn identity(&self) -> &Identity { &self.identity }

	pub fn transport(&self) -> &T { self.inst.transport() }

	pub fn set_frequency_mhz(&mut self, f:f64) -> Result<()> {
		if !(f > 0.0 && f.is_finite()) { return Err(Error::Config(format!("frequency must be positive, got {} MHz", f))); }
		self.inst.write(&format!("SOUR:FREQ {}MHz", f))
	}

	pub fn set_power_dbm(&mut self, p:f64) -> Result<()> {
		if !p.is_finite() { return Err(Error::Config(format!("power must be finite, got {} dBm", p))); }
		self.inst.write(&format!("SOUR:POW {} dBm", p))
	}

	pub fn set_waveform(&mut self, w:Waveform) -> Result<()> {
		self.inst.write(&format!("SOUR:FUNC {}", w.as_scpi()))
	}

	pub fn set_output(&mut self, on:bool) -> Result<()> {
		self.inst.write(if on { "OUTP ON" } else { "OUTP OFF" })
	}

	pub fn output(&mut self) -> Result<bool> {
		let resp = self.inst.query("OUTP?")?;
		match resp.trim().to_uppercase().as_str() {
			"1" | "ON"  => Ok(true),
			"0" | "OFF" => Ok(false),
			other => Err(Error::Protocol(format!("Unexpected OUTP? response '{}'", other))),
		}
	}

	/// Writes every setting, then waits for the generator to finish applying them.
	pub fn apply(&mut self, s:&SignalSettings) -> Result<()> {
		self.set_frequency_mhz(s.frequency_mhz)?;
		self.set_power_dbm(s.power_dbm)?;
		self.set_waveform(s.waveform)?;
		self.set_output(s.output)?;
		self.inst.query_opc("apply")?;
		info!("{} at {} MHz, {} dBm, output {}", s.waveform, s.frequency_mhz, s.power_dbm, if s.output { "on" } else { "off" });
		Ok(())
	}

	pub fn close(&mut self) -> Result<()> { self.inst.close() }

}

impl<T: Transport> Drop for SignalGenerator<T> {

	fn drop(&mut self) {
		if let Err(e) = self.close() {
			warn!("Unable to close signal generator at {}: {}", self.address, e);
		}
	}

}
