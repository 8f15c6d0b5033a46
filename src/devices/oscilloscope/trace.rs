
use std::fmt;
use std::io::{self, Error, ErrorKind};
use std::path::Path;
use std::str::FromStr;

use rustfft::FftPlanner;
use rustfft::num_complex::Complex;
use serde::{Serialize, Deserialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
	/// Comma separated decimal text
	Ascii,
	/// IEEE 488.2 block of little-endian f32
	Real32,
}

impl Encoding {
	pub fn format_command(&self) -> &'static str {
		match self {
			Encoding::Ascii  => "FORM ASC",
			Encoding::Real32 => "FORM REAL,32",
		}
	}
}

impl FromStr for Encoding {
	type Err = String;

	fn from_str(s:&str) -> std::result::Result<Self, Self::Err> {
		match s.trim().to_lowercase().as_str() {
			"ascii" | "asc" => Ok(Encoding::Ascii),
			"binary" | "bin" | "real32" | "real,32" => Ok(Encoding::Real32),
			other => Err(format!("unknown encoding '{}' (expected ascii or binary)", other)),
		}
	}
}

impl fmt::Display for Encoding {
	fn fmt(&self, f:&mut fmt::Formatter) -> fmt::Result {
		match self {
			Encoding::Ascii  => write!(f, "ascii"),
			Encoding::Real32 => write!(f, "binary"),
		}
	}
}

/// Record description from `CHANn:DATA:HEAD?`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraceHeader {
	pub x_start: f64,
	pub x_stop: f64,
	pub points: usize,
}

fn err(msg:String) -> io::Error { Error::new(ErrorKind::InvalidData, msg) }

impl FromStr for TraceHeader {
	type Err = io::Error;

	fn from_str(s:&str) -> io::Result<Self> {
		let fields:Vec<&str> = s.trim().split(',').map(|f| f.trim()).collect();
		if fields.len() < 3 {
			return Err(err(format!("Trace header '{}' has fewer than three fields", s.trim())));
		}

		let float = |f:&str| f.parse::<f64>().map_err(|_| err(format!("Bad number '{}' in trace header", f)));
		let x_start = float(fields[0])?;
		let x_stop  = float(fields[1])?;
		let points  = fields[2].parse::<usize>().map_err(|_| err(format!("Bad record length '{}' in trace header", fields[2])))?;

		Ok(Self{ x_start, x_stop, points })
	}
}

/// Parses an ASCII float list (`FORM ASC`).
pub fn parse_ascii(text:&str) -> io::Result<Vec<f32>> {
	let text = text.trim();
	if text.is_empty() { return Ok(vec![]); }

	text.split(',')
		.map(|v| v.trim().parse::<f32>().map_err(|_| err(format!("Bad sample '{}' in ASCII trace", v.trim()))))
		.collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trace {
	pub channel: u8,
	pub encoding: Encoding,
	pub x_start: f64,
	pub x_stop: f64,
	pub samples: Vec<f32>,
}

impl Trace {

	pub fn len(&self) -> usize { self.samples.len() }

	pub fn is_empty(&self) -> bool { self.samples.is_empty() }

	/// Sample interval [s]
	pub fn dt(&self) -> f64 {
		if self.samples.is_empty() { 0.0 }
		else { (self.x_stop - self.x_start) / self.samples.len() as f64 }
	}

	/// `(time, voltage)` pairs.
	pub fn points(&self) -> Vec<(f64, f64)> {
		let dt = self.dt();
		self.samples.iter().enumerate()
			.map(|(i, v)| (self.x_start + i as f64 * dt, *v as f64))
			.collect()
	}

	pub fn approx_eq(&self, other:&Trace, tol:f32) -> bool {
		self.samples.len() == other.samples.len() &&
			self.samples.iter().zip(other.samples.iter()).all(|(a, b)| (a - b).abs() <= tol)
	}

	pub fn write_csv<P: AsRef<Path>>(&self, path:P) -> Result<()> {
		let mut wtr = csv::Writer::from_path(path)?;
		wtr.write_record(&["time", "voltage"])?;
		for (t, v) in self.points() {
			wtr.write_record(&[t.to_string(), v.to_string()])?;
		}
		wtr.flush()?;
		Ok(())
	}

	/// Frequency [Hz] of the strongest spectral line, ignoring DC.
	pub fn dominant_frequency(&self) -> Option<f64> {
		let n = self.samples.len();
		let span = self.x_stop - self.x_start;
		if n < 4 || !(span > 0.0) { return None; }

		let mean = self.samples.iter().map(|v| *v as f64).sum::<f64>() / n as f64;
		let mut buffer:Vec<Complex<f64>> = self.samples.iter()
			.map(|v| Complex{ re: *v as f64 - mean, im: 0.0 })
			.collect();

		let mut planner = FftPlanner::<f64>::new();
		let fft = planner.plan_fft_forward(n);
		fft.process(&mut buffer);

		let (bin, mag) = buffer.iter().enumerate()
			.take(n / 2 + 1)
			.skip(1)
			.map(|(k, c)| (k, c.norm()))
			.fold((0, 0.0), |best, cur| if cur.1 > best.1 { cur } else { best });

		if bin == 0 || mag <= f64::EPSILON { None }
		else { Some(bin as f64 / span) }
	}

}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::synthetic;

	fn sine_trace(n:usize, cycles:f64) -> Trace {
		let samples = synthetic::sine(n, 0.5, cycles / n as f64, 0.0).into_iter().map(|v| v as f32 + 0.1).collect();
		Trace{ channel: 1, encoding: Encoding::Real32, x_start: -0.005, x_stop: 0.005, samples }
	}

	#[test]
	fn header_parses() {
		let h:TraceHeader = "-5.0E-3,5.0E-3,20002,1".parse().unwrap();
		assert_eq!(h.points, 20002);
		assert!((h.x_start + 0.005).abs() < 1e-12);
		assert!("1,2".parse::<TraceHeader>().is_err());
	}

	#[test]
	fn ascii_list_parses() {
		assert_eq!(parse_ascii("1.5E-1,-2E0, 3\n").unwrap(), vec![0.15, -2.0, 3.0]);
		assert!(parse_ascii("").unwrap().is_empty());
		assert_eq!(parse_ascii("1,x").unwrap_err().kind(), ErrorKind::InvalidData);
	}

	#[test]
	fn time_axis_follows_header() {
		let t = sine_trace(10, 1.0);
		let pts = t.points();
		assert_eq!(pts.len(), 10);
		assert!((pts[0].0 + 0.005).abs() < 1e-12);
		assert!((pts[1].0 - pts[0].0 - 0.001).abs() < 1e-12);
	}

	#[test]
	fn approx_eq_checks_length_and_values() {
		let a = sine_trace(100, 2.0);
		let mut b = a.clone();
		assert!(a.approx_eq(&b, 1e-5));
		b.samples[3] += 1e-3;
		assert!(!a.approx_eq(&b, 1e-5));
		b.samples.pop();
		assert!(!a.approx_eq(&b, 1.0));
	}

	#[test]
	fn finds_dominant_frequency() {
		// 4 cycles across 10 ms
		let f = sine_trace(1000, 4.0).dominant_frequency().unwrap();
		assert!((f - 400.0).abs() < 1e-6);
	}

	#[test]
	fn flat_trace_has_no_dominant_frequency() {
		let t = Trace{ channel: 1, encoding: Encoding::Ascii, x_start: 0.0, x_stop: 1.0, samples: vec![0.3; 64] };
		assert_eq!(t.dominant_frequency(), None);
	}

	#[test]
	fn csv_has_header_and_one_row_per_sample() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("trace.csv");
		sine_trace(8, 1.0).write_csv(&path).unwrap();

		let text = std::fs::read_to_string(&path).unwrap();
		let lines:Vec<&str> = text.lines().collect();
		assert_eq!(lines[0], "time,voltage");
		assert_eq!(lines.len(), 9);
	}

	#[test]
	fn encoding_names() {
		assert_eq!("binary".parse::<Encoding>().unwrap(), Encoding::Real32);
		assert_eq!("ASCII".parse::<Encoding>().unwrap(), Encoding::Ascii);
		assert!("hex".parse::<Encoding>().is_err());
	}
}
