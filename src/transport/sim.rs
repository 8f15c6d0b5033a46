//! An oscilloscope that lives in the process.
//!
//! Commands execute "in the background": every write occupies the instrument
//! for a fixed latency and `SING` for the acquisition time, and `*OPC?` only
//! answers once all of that work is done. Data queried before an acquisition
//! finishes comes from the previous one, exactly the stale read the
//! operation-complete barrier exists to prevent.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Error, ErrorKind};
use std::thread;
use std::time::{Duration, Instant};

use log::trace;
use rand::Rng;

use super::block;
use super::Transport;
use crate::synthetic;

pub const IDN:&str = "scopectl,SIM3004,000001,0.1.0";
pub const OPTIONS:&str = "B1,B6,K1";

pub const DEFAULT_OP_LATENCY:Duration = Duration::from_millis(1);
pub const DEFAULT_ACQUISITION_TIME:Duration = Duration::from_millis(20);
pub const DEFAULT_POINTS:usize = 10000;
pub const DEFAULT_TIME_RANGE_S:f64 = 0.01;
pub const CHANNELS:u8 = 4;

// Cycles of the test signal across the time range
const SIGNAL_CYCLES:f64 = 4.0;
const PNG_SIGNATURE:[u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

const KNOWN_ROOTS:[&str; 24] = [
	"ACQ", "ACQUIRE", "TIM", "TIMEBASE", "CHAN", "CHANNEL", "TRIG", "TRIGGER",
	"FORM", "FORMAT", "HCOP", "HCOPY", "MMEM", "MMEMORY", "SYST", "SYSTEM",
	"SOUR", "SOURCE", "OUTP", "OUTPUT", "DISP", "DISPLAY", "CALC", "CALCULATE",
];

#[derive(Debug, Clone, Copy, PartialEq)]
enum DataFormat { Ascii, Real32 }

enum Response {
	Data(Vec<u8>),
	Opc,
}

struct Acquisition {
	ready_at: Instant,
	x_start: f64,
	x_stop: f64,
	channels: HashMap<u8, Vec<f32>>,
}

pub struct SimulatedScope {
	timeout: Duration,
	op_latency: Duration,
	acquisition_time: Duration,
	busy_until: Instant,
	completions: Vec<Instant>,
	settings: HashMap<String, String>,
	format: DataFormat,
	error_queue: VecDeque<(i32, String)>,
	files: HashMap<String, Vec<u8>>,
	latest: Option<Acquisition>,
	previous: Option<Acquisition>,
	output: Vec<Response>,
	history: Vec<String>,
	closed: bool,
}

fn not_connected() -> io::Error { Error::new(ErrorKind::NotConnected, "Simulated instrument is closed") }

fn unquote(s:&str) -> &str { s.trim().trim_matches(|c| c == '\'' || c == '"') }

// Splits a program message into its units, leaving quoted strings alone
fn split_units(msg:&str) -> Vec<String> {
	let mut units:Vec<String> = vec![];
	let mut current = String::new();
	let mut quote:Option<char> = None;

	for c in msg.chars() {
		match (c, quote) {
			('\'', None) | ('"', None) => { quote = Some(c); current.push(c); },
			(q, Some(open)) if q == open => { quote = None; current.push(c); },
			(';', None) => units.push(std::mem::take(&mut current)),
			_ => current.push(c),
		}
	}
	units.push(current);

	units.into_iter()
		.map(|u| u.trim().trim_start_matches(':').to_owned())
		.filter(|u| !u.is_empty())
		.collect()
}

fn root_of(header:&str) -> &str {
	header.split(':').next().unwrap_or("").trim_end_matches(|c:char| c.is_ascii_digit())
}

fn channel_of(header:&str) -> Option<u8> {
	let first = header.split(':').next()?;
	let digits = first.trim_start_matches(|c:char| c.is_ascii_alphabetic());
	if root_of(header).starts_with("CHAN") { digits.parse::<u8>().ok() } else { None }
}

impl SimulatedScope {

	pub fn new() -> Self {
		let now = Instant::now();
		Self {
			timeout: Duration::from_secs(3),
			op_latency: DEFAULT_OP_LATENCY,
			acquisition_time: DEFAULT_ACQUISITION_TIME,
			busy_until: now,
			completions: vec![],
			settings: HashMap::new(),
			format: DataFormat::Ascii,
			error_queue: VecDeque::new(),
			files: HashMap::new(),
			latest: None,
			previous: None,
			output: vec![],
			history: vec![],
			closed: false,
		}
	}

	/// Time each write keeps the instrument busy.
	pub fn with_op_latency(mut self, latency:Duration) -> Self {
		self.op_latency = latency;
		self
	}

	/// Minimum time between `SING` and the acquisition being complete.
	pub fn with_acquisition_time(mut self, t:Duration) -> Self {
		self.acquisition_time = t;
		self
	}

	pub fn with_file(mut self, path:&str, contents:&[u8]) -> Self {
		self.files.insert(path.to_owned(), contents.to_vec());
		self
	}

	/// Writes the instrument has finished executing.
	pub fn acknowledged(&self) -> usize {
		let now = Instant::now();
		self.completions.iter().filter(|t| **t <= now).count()
	}

	pub fn pending_operations(&self) -> usize { self.completions.len() - self.acknowledged() }

	/// Every program message unit received, in order.
	pub fn history(&self) -> &[String] { &self.history }

	pub fn setting(&self, header:&str) -> Option<&str> {
		self.settings.get(&header.to_uppercase()).map(|s| s.as_str())
	}

	pub fn file(&self, path:&str) -> Option<&[u8]> { self.files.get(path).map(|v| v.as_slice()) }

	pub fn is_closed(&self) -> bool { self.closed }

	pub fn timeout(&self) -> Duration { self.timeout }

	fn push_error(&mut self, code:i32, msg:&str) {
		trace!("SIM error queue <- {},\"{}\"", code, msg);
		self.error_queue.push_back((code, msg.to_owned()));
	}

	fn occupy(&mut self, duration:Duration) {
		let now = Instant::now();
		self.busy_until = self.busy_until.max(now) + duration;
		self.completions.push(self.busy_until);
	}

	fn setting_f64(&self, header:&str, default:f64) -> f64 {
		self.settings.get(header)
			.and_then(|v| v.trim().parse::<f64>().ok())
			.filter(|v| v.is_finite())
			.unwrap_or(default)
	}

	fn channel_enabled(&self, chan:u8) -> bool {
		match self.settings.get(&format!("CHAN{}:STAT", chan)) {
			Some(v) => v.eq_ignore_ascii_case("ON") || v.trim() == "1",
			None => chan == 1,
		}
	}

	fn start_acquisition(&mut self) {
		let time_range = self.setting_f64("TIM:RANG", DEFAULT_TIME_RANGE_S);
		let points = self.settings.get("ACQ:POIN")
			.and_then(|v| v.trim().parse::<usize>().ok())
			.filter(|n| *n > 0)
			.unwrap_or(DEFAULT_POINTS);

		let duration = self.acquisition_time.max(Duration::from_secs_f64(time_range.max(0.0).min(3600.0)));
		self.occupy(duration);

		let mut rng = rand::thread_rng();
		let mut channels:HashMap<u8, Vec<f32>> = HashMap::new();
		for chan in 1..=CHANNELS {
			if !self.channel_enabled(chan) { continue; }

			let range = self.setting_f64(&format!("CHAN{}:RANG", chan), 2.0);
			let offset = self.setting_f64(&format!("CHAN{}:POS", chan), 0.0);
			let noise = (range * 1e-3).abs();

			let samples:Vec<f32> = synthetic::sine(points, range / 4.0, SIGNAL_CYCLES / points as f64, 0.0)
				.into_iter()
				.map(|v| {
					let n = if noise > 0.0 { rng.gen_range(-noise..noise) } else { 0.0 };
					(v + offset + n) as f32
				})
				.collect();
			channels.insert(chan, samples);
		}

		self.previous = self.latest.take();
		self.latest = Some(Acquisition { ready_at: self.busy_until, x_start: -time_range / 2.0, x_stop: time_range / 2.0, channels });
	}

	// The newest acquisition that has actually finished
	fn completed_acquisition(&self) -> Option<&Acquisition> {
		let now = Instant::now();
		[self.latest.as_ref(), self.previous.as_ref()].iter()
			.flatten()
			.find(|a| a.ready_at <= now)
			.copied()
	}

	fn execute(&mut self, header:&str, arg:&str) {
		match header {
			"*RST" => {
				self.settings.clear();
				self.format = DataFormat::Ascii;
				self.occupy(self.op_latency);
			},
			"*CLS" => self.error_queue.clear(),
			"SING" | "SINGLE" | "RUNS" => self.start_acquisition(),
			"FORM" | "FORM:DATA" => {
				let a = arg.replace(' ', "").to_uppercase();
				match a.as_str() {
					"ASC" | "ASCII" | "ASC,0" => self.format = DataFormat::Ascii,
					"REAL,32" | "REAL" => self.format = DataFormat::Real32,
					_ => self.push_error(-224, "Illegal parameter value"),
				}
				self.occupy(self.op_latency);
			},
			"HCOP:IMM" => {
				let lang = self.settings.get("HCOP:DEV:LANG").map(|s| s.to_uppercase()).unwrap_or_else(|| "PNG".to_owned());
				match self.settings.get("MMEM:NAME").map(|s| unquote(s).to_owned()) {
					Some(path) if !path.is_empty() => {
						let mut img:Vec<u8> = PNG_SIGNATURE.to_vec();
						img.extend_from_slice(format!("simulated {} screenshot", lang).as_bytes());
						self.files.insert(path, img);
					},
					_ => self.push_error(-256, "File name not found"),
				}
				self.occupy(self.op_latency);
			},
			h if KNOWN_ROOTS.contains(&root_of(h)) => {
				if let Some(chan) = channel_of(h) {
					if chan == 0 || chan > CHANNELS {
						self.push_error(-114, "Header suffix out of range");
						return;
					}
				}
				self.settings.insert(h.to_owned(), arg.trim().to_owned());
				self.occupy(self.op_latency);
			},
			_ => self.push_error(-113, "Undefined header"),
		}
	}

	fn trace_response(&mut self, chan:u8, header_only:bool) -> Option<Vec<u8>> {
		let format = self.format;
		let acq = match self.completed_acquisition() {
			Some(a) => a,
			None => {
				self.push_error(-230, "Data corrupt or stale");
				return None;
			}
		};

		let samples = match acq.channels.get(&chan) {
			Some(s) => s,
			None => {
				self.push_error(-221, "Settings conflict");
				return None;
			}
		};

		if header_only {
			return Some(format!("{:E},{:E},{},1", acq.x_start, acq.x_stop, samples.len()).into_bytes());
		}

		match format {
			DataFormat::Ascii => {
				let text:Vec<String> = samples.iter().map(|v| format!("{:E}", v)).collect();
				Some(text.join(",").into_bytes())
			},
			DataFormat::Real32 => Some(block::encode_block(&block::encode_f32_le(samples))),
		}
	}

	fn answer(&mut self, header:&str, arg:&str) -> Option<Response> {
		let text = |s:&str| Some(Response::Data(s.as_bytes().to_vec()));

		match header {
			"*IDN" => text(IDN),
			"*OPT" => text(OPTIONS),
			"*OPC" => Some(Response::Opc),
			"*STB" => text(if self.error_queue.is_empty() { "0" } else { "4" }),
			"SYST:ERR" | "SYST:ERR:NEXT" => {
				let (code, msg) = self.error_queue.pop_front().unwrap_or((0, "No error".to_owned()));
				Some(Response::Data(format!("{},\"{}\"", code, msg).into_bytes()))
			},
			"MMEM:DATA" => {
				let path = unquote(arg).to_owned();
				match self.files.get(&path) {
					Some(data) => Some(Response::Data(block::encode_block(data))),
					None => {
						self.push_error(-256, "File name not found");
						Some(Response::Data(block::encode_block(&[])))
					}
				}
			},
			h => {
				if let Some(chan) = channel_of(h) {
					let sub = h.splitn(2, ':').nth(1).unwrap_or("");
					if sub == "DATA" || sub == "DATA:HEAD" {
						return Some(Response::Data(self.trace_response(chan, sub == "DATA:HEAD").unwrap_or_default()));
					}
				}

				match self.settings.get(h) {
					Some(v) => Some(Response::Data(v.clone().into_bytes())),
					None => {
						// Answer with an empty message so the error queue, not a timeout, reports it
						self.push_error(-113, "Undefined header");
						Some(Response::Data(vec![]))
					}
				}
			}
		}
	}

}

impl Default for SimulatedScope {
	fn default() -> Self { Self::new() }
}

impl Transport for SimulatedScope {

	fn write_bytes(&mut self, data:&[u8]) -> io::Result<()> {
		if self.closed { return Err(not_connected()); }

		let msg = std::str::from_utf8(data).map_err(|_| Error::new(ErrorKind::InvalidData, "Command is not UTF-8"))?;

		// A new message discards any unread response
		self.output.clear();

		for unit in split_units(msg) {
			self.history.push(unit.clone());

			let (head, arg) = match unit.find(|c:char| c == '?' || c.is_whitespace()) {
				Some(i) => (&unit[..i], &unit[i..]),
				None => (unit.as_str(), ""),
			};
			let header = head.to_uppercase();

			if let Some(rest) = arg.strip_prefix('?') {
				if let Some(r) = self.answer(&header, rest) {
					self.output.push(r);
				}
			} else {
				self.execute(&header, arg);
			}
		}

		Ok(())
	}

	fn read_bytes(&mut self) -> io::Result<Vec<u8>> {
		if self.closed { return Err(not_connected()); }
		if self.output.is_empty() {
			return Err(Error::new(ErrorKind::TimedOut, "No response pending (query interrupted or unterminated)"));
		}

		let mut ans:Vec<u8> = vec![];
		for (i, r) in std::mem::take(&mut self.output).into_iter().enumerate() {
			if i > 0 { ans.push(b';'); }
			match r {
				Response::Data(mut d) => ans.append(&mut d),
				Response::Opc => {
					let wait = self.busy_until.saturating_duration_since(Instant::now());
					if wait > self.timeout {
						thread::sleep(self.timeout);
						return Err(Error::new(ErrorKind::TimedOut, "*OPC? still pending when the timeout expired"));
					}
					thread::sleep(wait);
					ans.push(b'1');
				},
			}
		}
		ans.push(b'\n');

		Ok(ans)
	}

	fn set_timeout(&mut self, timeout:Duration) -> io::Result<()> {
		if self.closed { return Err(not_connected()); }
		self.timeout = timeout;
		Ok(())
	}

	fn close(&mut self) -> io::Result<()> {
		self.closed = true;
		self.output.clear();
		Ok(())
	}

}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn compound_messages_split_outside_quotes() {
		assert_eq!(split_units("TRIG1:TYPE EDGE;:TRIG1:EDGE:SLOP POS"), vec!["TRIG1:TYPE EDGE", "TRIG1:EDGE:SLOP POS"]);
		assert_eq!(split_units("MMEM:NAME 'a;b.png'"), vec!["MMEM:NAME 'a;b.png'"]);
	}

	#[test]
	fn undefined_header_lands_in_error_queue() {
		let mut sim = SimulatedScope::new();
		sim.write_command("BOGUS:CMD 1").unwrap();
		assert_eq!(sim.query_response("*STB?").unwrap(), "4");
		assert_eq!(sim.query_response("SYST:ERR?").unwrap(), "-113,\"Undefined header\"");
		assert_eq!(sim.query_response("SYST:ERR?").unwrap(), "0,\"No error\"");
	}

	#[test]
	fn opc_times_out_while_busy() {
		let mut sim = SimulatedScope::new().with_acquisition_time(Duration::from_millis(200));
		sim.set_timeout(Duration::from_millis(10)).unwrap();
		sim.write_command("SING").unwrap();
		let e = sim.query_response("*OPC?").unwrap_err();
		assert_eq!(e.kind(), ErrorKind::TimedOut);
	}

	#[test]
	fn data_before_first_acquisition_is_refused() {
		let mut sim = SimulatedScope::new();
		sim.write_command("CHAN1:DATA?").unwrap();
		assert_eq!(sim.read_bytes().unwrap(), b"\n".to_vec());
		assert_eq!(sim.query_response("SYST:ERR?").unwrap(), "-230,\"Data corrupt or stale\"");
	}

	#[test]
	fn settings_read_back() {
		let mut sim = SimulatedScope::new();
		sim.write_command("CHAN1:COUP AC").unwrap();
		assert_eq!(sim.query_response("CHAN1:COUP?").unwrap(), "AC");
		assert_eq!(sim.setting("chan1:coup"), Some("AC"));
	}

	#[test]
	fn channel_suffix_out_of_range_is_rejected() {
		let mut sim = SimulatedScope::new();
		sim.write_command("CHAN9:RANG 2").unwrap();
		assert_eq!(sim.query_response("SYST:ERR?").unwrap(), "-114,\"Header suffix out of range\"");
	}

	#[test]
	fn closed_instrument_refuses_io() {
		let mut sim = SimulatedScope::new();
		sim.close().unwrap();
		sim.close().unwrap();
		assert_eq!(sim.write_command("*CLS").unwrap_err().kind(), ErrorKind::NotConnected);
	}
}
