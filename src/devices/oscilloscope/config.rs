
use serde::{Serialize, Deserialize};

use crate::error::{Error, Result};

pub const CHANNELS:u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Coupling {
	/// AC, 1 MOhm
	Ac,
	/// DC, 1 MOhm
	Dc,
	/// DC, 50 Ohm
	DcLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode { Auto, Normal }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType { Edge }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Slope { Positive, Negative, Either }

impl Coupling {
	pub fn as_scpi(&self) -> &'static str {
		match self {
			Coupling::Ac      => "AC",
			Coupling::Dc      => "DC",
			Coupling::DcLimit => "DCLimit",
		}
	}
}

impl TriggerMode {
	pub fn as_scpi(&self) -> &'static str {
		match self {
			TriggerMode::Auto   => "AUTO",
			TriggerMode::Normal => "NORM",
		}
	}
}

impl TriggerType {
	pub fn as_scpi(&self) -> &'static str {
		match self {
			TriggerType::Edge => "EDGE",
		}
	}
}

impl Slope {
	pub fn as_scpi(&self) -> &'static str {
		match self {
			Slope::Positive => "POS",
			Slope::Negative => "NEG",
			Slope::Either   => "EITH",
		}
	}
}

/// Everything written to the scope before a single-shot acquisition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
	/// Horizontal acquisition window [s]
	pub time_range_s: f64,
	pub points: Option<u32>,
	pub auto_points: bool,
	pub channel: u8,
	/// Vertical range [V]
	pub range_v: f64,
	pub offset_v: f64,
	pub coupling: Coupling,
	pub enabled: bool,
	pub trigger_mode: TriggerMode,
	pub trigger_source: u8,
	pub trigger_type: TriggerType,
	pub trigger_slope: Slope,
	pub trigger_level_v: f64,
}

impl Default for AcquisitionConfig {
	fn default() -> Self {
		Self {
			time_range_s: 0.01,
			points: Some(20002),
			auto_points: true,
			channel: 1,
			range_v: 2.0,
			offset_v: 0.0,
			coupling: Coupling::Ac,
			enabled: true,
			trigger_mode: TriggerMode::Auto,
			trigger_source: 1,
			trigger_type: TriggerType::Edge,
			trigger_slope: Slope::Positive,
			trigger_level_v: 0.04,
		}
	}
}

fn chan_ok(n:u8, what:&str) -> Result<()> {
	if n == 0 || n > CHANNELS { Err(Error::Config(format!("{} must be between 1 and {}, got {}", what, CHANNELS, n))) }
	else { Ok(()) }
}

impl AcquisitionConfig {

	pub fn validate(&self) -> Result<()> {
		chan_ok(self.channel, "channel")?;
		chan_ok(self.trigger_source, "trigger source")?;
		if !(self.time_range_s > 0.0 && self.time_range_s.is_finite()) { return Err(Error::Config(format!("time range must be positive, got {}", self.time_range_s))); }
		if !(self.range_v > 0.0 && self.range_v.is_finite()) { return Err(Error::Config(format!("vertical range must be positive, got {}", self.range_v))); }
		if self.points == Some(0) { return Err(Error::Config("point count must be positive".into())); }
		if !self.offset_v.is_finite() || !self.trigger_level_v.is_finite() {
			return Err(Error::Config("offset and trigger level must be finite".into()));
		}
		Ok(())
	}

	/// The SCPI writes for this configuration, in the order they are sent.
	pub fn commands(&self) -> Vec<String> {
		let c = self.channel;
		let mut ans:Vec<String> = vec![];

		ans.push(format!("ACQ:POIN:AUTO {}", if self.auto_points { "ON" } else { "OFF" }));
		ans.push(format!("TIM:RANG {}", self.time_range_s));
		if let Some(n) = self.points {
			ans.push(format!("ACQ:POIN {}", n));
		}

		ans.push(format!("CHAN{}:RANG {}", c, self.range_v));
		ans.push(format!("CHAN{}:POS {}", c, self.offset_v));
		ans.push(format!("CHAN{}:COUP {}", c, self.coupling.as_scpi()));
		ans.push(format!("CHAN{}:STAT {}", c, if self.enabled { "ON" } else { "OFF" }));

		ans.push(format!("TRIG1:MODE {}", self.trigger_mode.as_scpi()));
		ans.push(format!("TRIG1:SOUR CHAN{}", self.trigger_source));
		ans.push(format!("TRIG1:TYPE {};:TRIG1:EDGE:SLOP {}", self.trigger_type.as_scpi(), self.trigger_slope.as_scpi()));
		ans.push(format!("TRIG1:LEV1 {}", self.trigger_level_v));

		ans
	}

}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_commands() {
		let cmds = AcquisitionConfig::default().commands();
		assert_eq!(cmds, vec![
			"ACQ:POIN:AUTO ON",
			"TIM:RANG 0.01",
			"ACQ:POIN 20002",
			"CHAN1:RANG 2",
			"CHAN1:POS 0",
			"CHAN1:COUP AC",
			"CHAN1:STAT ON",
			"TRIG1:MODE AUTO",
			"TRIG1:SOUR CHAN1",
			"TRIG1:TYPE EDGE;:TRIG1:EDGE:SLOP POS",
			"TRIG1:LEV1 0.04",
		]);
	}

	#[test]
	fn validation() {
		assert!(AcquisitionConfig::default().validate().is_ok());
		assert!(AcquisitionConfig{ channel: 5, ..Default::default() }.validate().is_err());
		assert!(AcquisitionConfig{ range_v: 0.0, ..Default::default() }.validate().is_err());
		assert!(AcquisitionConfig{ time_range_s: f64::NAN, ..Default::default() }.validate().is_err());
		assert!(AcquisitionConfig{ points: Some(0), ..Default::default() }.validate().is_err());
	}

	#[test]
	fn omitted_points_are_not_sent() {
		let cmds = AcquisitionConfig{ points: None, coupling: Coupling::Dc, ..Default::default() }.commands();
		assert!(!cmds.iter().any(|c| c.starts_with("ACQ:POIN ")));
		assert!(cmds.contains(&"CHAN1:COUP DC".to_owned()));
	}
}
