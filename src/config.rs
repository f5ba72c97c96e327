//! Run metadata and instrument settings.
//!
//! Both are plain serde structs with the lab's usual defaults, so a run file
//! only has to list what differs:
//!
//! ```toml
//! resource = "TCPIP0::192.168.1.5::gpib0,25::INSTR"
//!
//! [instrument]
//! source_mode = "CURR"
//! compliance_level = 20
//! experiment_length = 600
//!
//! [run]
//! membrane = "Nafion 117"
//! salt = "NaCl"
//! data_path = "data/2014-06-19"
//! ```

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_RESOURCE:&str = "GPIB0::25";

/// Maximum number of points the 2400 trace buffer holds
pub const MAX_BUFFER_SIZE:u32 = 2500;

pub const DEFAULT_MAX_POINTS:usize = 1_000_000;

// Upper limit for any time setting, one year
pub const MAX_SECONDS:f64 = 365.0 * 86_400.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceMode {
	#[serde(rename = "CURR", alias = "current", alias = "Current")]
	Current,
	#[serde(rename = "VOLT", alias = "voltage", alias = "Voltage")]
	Voltage,
}

impl SourceMode {

	pub fn scpi(self) -> &'static str { match self {
		SourceMode::Current => "CURR",
		SourceMode::Voltage => "VOLT",
	}}

	/// The quantity measured while sourcing this one
	pub fn measured(self) -> SourceMode { match self {
		SourceMode::Current => SourceMode::Voltage,
		SourceMode::Voltage => SourceMode::Current,
	}}

	pub fn name(self) -> &'static str { match self {
		SourceMode::Current => "Current",
		SourceMode::Voltage => "Voltage",
	}}

	pub fn unit(self) -> &'static str { match self {
		SourceMode::Current => "A",
		SourceMode::Voltage => "V",
	}}
}

impl Default for SourceMode {
	fn default() -> Self { SourceMode::Current }
}

impl fmt::Display for SourceMode {
	fn fmt(&self, f:&mut fmt::Formatter) -> fmt::Result { f.write_str(self.scpi()) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Terminal {
	#[serde(rename = "FRON", alias = "front")]
	Front,
	#[serde(rename = "REAR", alias = "rear")]
	Rear,
}

impl Terminal {
	pub fn scpi(self) -> &'static str { match self {
		Terminal::Front => "FRON",
		Terminal::Rear  => "REAR",
	}}
}

/// Settings written to the source meter before a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentParams {
	pub source_mode: SourceMode,
	/// Protection level of the measured quantity (V when sourcing current, A when sourcing voltage)
	pub compliance_level: f64,
	pub nplc: f64,
	pub terminal: Terminal,
	pub four_terminal: bool,
	pub trigger_count: u32,
	/// seconds
	pub trigger_delay: f64,
	/// seconds
	pub source_delay: f64,
	/// Seconds spent on each setpoint of a chrono run
	pub experiment_length: f64,
	/// Seconds slept between chrono readings
	pub point_delay: f64,
	pub buffer_size: u32,
	/// Cap on readings kept per chrono setpoint
	pub max_points: usize,
	/// Give up waiting for a measurement SRQ after this many seconds
	pub srq_timeout: Option<f64>,
}

impl Default for InstrumentParams {
	fn default() -> Self {
		Self {
			source_mode: SourceMode::Current,
			compliance_level: 200.0,
			nplc: 1.0,
			terminal: Terminal::Front,
			four_terminal: false,
			trigger_count: 1,
			trigger_delay: 0.0,
			source_delay: 0.0,
			experiment_length: 2.0,
			point_delay: 0.1,
			buffer_size: MAX_BUFFER_SIZE,
			max_points: DEFAULT_MAX_POINTS,
			srq_timeout: None,
		}
	}
}

fn param_err<T>(msg:String) -> Result<T> { Err(Error::Parameter(msg)) }

pub fn seconds(secs:f64, what:&str) -> Result<Duration> {
	if !(secs <= MAX_SECONDS) {
		return param_err(format!("The {} of {} s is longer than {} s", what, secs, MAX_SECONDS));
	}
	Duration::try_from_secs_f64(secs).map_err(|e| Error::Parameter(format!("Invalid {} {}: {}", what, secs, e)))
}

impl InstrumentParams {

	/// Rejects values the source meter would refuse or that make a run meaningless.
	pub fn check(&self) -> Result<()> {
		let c = self.compliance_level;
		match self.source_mode {
			SourceMode::Current => if !(c > -210.0 && c <= 210.0) {
				return param_err(format!("Compliance level {} V out of range, must be within (-210, 210] V when sourcing current", c));
			},
			SourceMode::Voltage => if !(c > -1.05 && c <= 1.05) {
				return param_err(format!("Compliance level {} A out of range, must be within (-1.05, 1.05] A when sourcing voltage", c));
			},
		}

		if !(self.nplc >= 0.01 && self.nplc <= 10.0) {
			return param_err(format!("NPLC {} out of range, must be between 0.01 and 10", self.nplc));
		}
		if self.buffer_size == 0 || self.buffer_size > MAX_BUFFER_SIZE {
			return param_err(format!("Buffer size {} out of range, must be between 1 and {}", self.buffer_size, MAX_BUFFER_SIZE));
		}
		if self.trigger_count == 0 || self.trigger_count > self.buffer_size {
			return param_err(format!("Trigger count {} must be between 1 and the buffer size ({})", self.trigger_count, self.buffer_size));
		}
		for (name, v) in &[("trigger delay", self.trigger_delay), ("source delay", self.source_delay), ("point delay", self.point_delay)] {
			if !(*v >= 0.0 && *v <= MAX_SECONDS) {
				return param_err(format!("The {} must be between 0 and {} s, got {}", name, MAX_SECONDS, v));
			}
		}
		if !(self.experiment_length > 0.0 && self.experiment_length <= MAX_SECONDS) {
			return param_err(format!("Experiment length must be positive and at most {} s, got {}", MAX_SECONDS, self.experiment_length));
		}
		if self.max_points == 0 {
			return param_err("max_points must be at least 1".to_owned());
		}
		if let Some(t) = self.srq_timeout {
			if !(t > 0.0 && t <= MAX_SECONDS) {
				return param_err(format!("SRQ timeout must be positive and at most {} s, got {}", MAX_SECONDS, t));
			}
		}

		Ok(())
	}

}

/// Descriptive metadata that ends up in file names and headers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunMetadata {
	pub membrane: String,
	pub membrane_id: String,
	pub salt: String,
	/// M
	pub high_concentration: f64,
	/// mS/cm
	pub high_conductivity: f64,
	pub low_concentration: f64,
	pub low_conductivity: f64,
	pub run_number: u32,
	pub source_mode: SourceMode,
	/// C
	pub low_conc_t: f64,
	pub high_conc_t: f64,
	/// F, free-form since it isn't always recorded
	pub lab_temp: String,
	pub high_solution_id: String,
	pub low_solution_id: String,
	pub data_path: PathBuf,
}

impl Default for RunMetadata {
	fn default() -> Self {
		Self {
			membrane: "MembraneName".to_owned(),
			membrane_id: "2000".to_owned(),
			salt: "Salt".to_owned(),
			high_concentration: 0.5,
			high_conductivity: 0.0,
			low_concentration: 0.1,
			low_conductivity: 0.0,
			run_number: 1,
			source_mode: SourceMode::Current,
			low_conc_t: 25.0,
			high_conc_t: 25.0,
			lab_temp: "NA".to_owned(),
			high_solution_id: "NA".to_owned(),
			low_solution_id: "NA".to_owned(),
			data_path: PathBuf::from("."),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
	/// VISA-style address of the source meter
	pub resource: String,
	/// LAN/GPIB gateway, needed when `resource` is a bare GPIB address
	pub gateway: Option<String>,
	pub io_timeout_ms: u32,
	pub instrument: InstrumentParams,
	pub run: RunMetadata,
}

impl Default for RunConfig {
	fn default() -> Self {
		Self {
			resource: DEFAULT_RESOURCE.to_owned(),
			gateway: None,
			io_timeout_ms: crate::vxi11::DEFAULT_IO_TIMEOUT_MS,
			instrument: InstrumentParams::default(),
			run: RunMetadata::default(),
		}
	}
}

impl RunConfig {

	pub fn load(path:&Path) -> Result<Self> {
		let text = fs::read_to_string(path)
			.map_err(|e| Error::Config(format!("Unable to read {}: {}", path.display(), e)))?;
		Self::from_toml(&text)
	}

	pub fn from_toml(text:&str) -> Result<Self> {
		Ok(toml::from_str(text)?)
	}

	pub fn validate(&self) -> Result<()> {
		if self.io_timeout_ms == 0 {
			return Err(Error::Config("io_timeout_ms must be at least 1".to_owned()));
		}
		self.instrument.check()
	}

}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_file_gives_defaults() {
		let cfg = RunConfig::from_toml("").unwrap();
		assert_eq!(cfg, RunConfig::default());
		assert_eq!(cfg.instrument.buffer_size, 2500);
		assert_eq!(cfg.run.membrane_id, "2000");
		cfg.validate().unwrap();
	}

	#[test]
	fn partial_tables_merge_with_defaults() {
		let cfg = RunConfig::from_toml(r#"
			resource = "TCPIP0::10.1.1.2::gpib0,24::INSTR"

			[instrument]
			source_mode = "VOLT"
			compliance_level = 0.1
			terminal = "REAR"

			[run]
			salt = "KCl"
			run_number = 3
		"#).unwrap();

		assert_eq!(cfg.instrument.source_mode, SourceMode::Voltage);
		assert_eq!(cfg.instrument.terminal, Terminal::Rear);
		assert_eq!(cfg.instrument.nplc, 1.0);
		assert_eq!(cfg.run.salt, "KCl");
		assert_eq!(cfg.run.run_number, 3);
		assert_eq!(cfg.run.membrane, "MembraneName");
		cfg.validate().unwrap();
	}

	#[test]
	fn unknown_source_mode_is_rejected() {
		assert!(RunConfig::from_toml("[instrument]\nsource_mode = \"RES\"").is_err());
	}

	#[test]
	fn compliance_range_depends_on_source_mode() {
		let mut p = InstrumentParams::default();
		p.compliance_level = 210.0;
		assert!(p.check().is_ok());
		p.compliance_level = 210.5;
		assert!(p.check().is_err());

		p.source_mode = SourceMode::Voltage;
		p.compliance_level = 1.05;
		assert!(p.check().is_ok());
		p.compliance_level = 2.0;
		assert!(p.check().is_err());
		p.compliance_level = -1.05;
		assert!(p.check().is_err());
	}

	#[test]
	fn nplc_and_buffer_limits() {
		let mut p = InstrumentParams::default();
		p.nplc = 0.005;
		assert!(p.check().is_err());
		p.nplc = 10.0;
		assert!(p.check().is_ok());

		p.buffer_size = 2501;
		assert!(p.check().is_err());
		p.buffer_size = 10;
		p.trigger_count = 11;
		assert!(p.check().is_err());
	}

	#[test]
	fn delays_and_length_must_be_sane() {
		let mut p = InstrumentParams::default();
		p.point_delay = -0.1;
		assert!(p.check().is_err());

		let mut p = InstrumentParams::default();
		p.experiment_length = 0.0;
		assert!(p.check().is_err());

		let mut p = InstrumentParams::default();
		p.source_delay = f64::NAN;
		assert!(p.check().is_err());
	}

	#[test]
	fn huge_times_are_rejected() {
		let mut p = InstrumentParams::default();
		p.experiment_length = 1e20;
		assert!(p.check().is_err());

		let mut p = InstrumentParams::default();
		p.point_delay = f64::INFINITY;
		assert!(p.check().is_err());

		let cfg = RunConfig::from_toml("[instrument]\nsrq_timeout = inf").unwrap();
		assert!(cfg.validate().is_err());

		let cfg = RunConfig::from_toml("[instrument]\nsrq_timeout = 30.0").unwrap();
		cfg.validate().unwrap();
	}

	#[test]
	fn seconds_conversion() {
		assert_eq!(seconds(0.25, "delay").unwrap(), Duration::from_millis(250));
		assert!(matches!(seconds(1e20, "delay"), Err(Error::Parameter(_))));
		assert!(matches!(seconds(f64::NAN, "delay"), Err(Error::Parameter(_))));
		assert!(matches!(seconds(-1.0, "delay"), Err(Error::Parameter(_))));
	}
}
