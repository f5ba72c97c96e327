
use std::io::Cursor;
use std::str;
use std::time::Duration;

use byteorder::{BigEndian, ReadBytesExt};
use lazy_static::lazy_static;
use log::{debug, info};
use regex::{Captures, Match, Regex};
use serde::{Serialize, Deserialize};

use crate::config::{self, InstrumentParams, SourceMode};
use crate::error::{protocol, Error, Result};
use crate::instrument::{Instrument, DEFAULT_SRQ_POLL_SEC};

lazy_static! {
	static ref IDN_RE: Regex = Regex::new("([^,]+),([^,]+),([^,]+),([^,\\s]+)").unwrap();
	static ref REG_RE: Regex = Regex::new("^#B([01]{16})$").unwrap();
}

// Standard event status enable
pub const ESE_OPC:u32 = 1;

// Measurement event enable
pub const MEAS_BUFFER_FULL:u32   = 512;
pub const MEAS_OUTPUT_ENABLE:u32 = 2048;
pub const MEAS_COMPLIANCE:u32    = 16384;

// Service request enable
pub const SRE_MSB:u32 = 1;
pub const SRE_ESB:u32 = 32;

/// One buffered reading.  The 2400 sends them as (voltage, current, timestamp) triples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
	pub voltage: f64,
	pub current: f64,
	pub time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
	pub manufacturer: String,
	pub model: String,
	pub serial_num: String,
	pub fw_version: String,
}

/// Which events raise a service request.  Operation complete sits on the
/// standard event register (ESB summary), the others on the measurement
/// event register (MSB summary).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SrqConfig {
	pub operation_complete: bool,
	pub buffer_full: bool,
	pub compliance: bool,
	pub output_enable: bool,
	pub measurement_srq: bool,
	pub event_srq: bool,
}

impl Default for SrqConfig {
	fn default() -> Self {
		Self{ operation_complete: true, buffer_full: true, compliance: false, output_enable: false, measurement_srq: true, event_srq: true }
	}
}

impl SrqConfig {

	/// (ESE, measurement enable, SRE) register values
	pub fn registers(&self) -> (u32, u32, u32) {
		let mut event = 0;
		let mut meas = 0;
		let mut sre = 0;

		if self.operation_complete { event += ESE_OPC; }
		if self.buffer_full        { meas += MEAS_BUFFER_FULL; }
		if self.compliance         { meas += MEAS_COMPLIANCE; }
		if self.output_enable      { meas += MEAS_OUTPUT_ENABLE; }
		if self.measurement_srq    { sre += SRE_MSB; }
		if self.event_srq          { sre += SRE_ESB; }

		(event, meas, sre)
	}
}

fn match_str(opt_match:Option<Match>, err:&str) -> Result<String> {
	match opt_match {
		Some(m) => Ok(m.as_str().trim().to_owned()),
		None    => Err(protocol(err)),
	}
}

/// Parses a register read back in `:FORM:SREG BIN` format, e.g. `#B0000000000110001` -> 49
pub fn parse_binary_register(s:&str) -> Result<u32> {
	let cap:Captures = REG_RE.captures(s.trim())
		.ok_or_else(|| protocol(format!("Expected #B followed by 16 binary digits, got {:?}", s)))?;
	u32::from_str_radix(&cap[1], 2).map_err(|_| protocol(format!("Unable to parse register {:?}", s)))
}

/// Extracts the payload of an IEEE 488.2 block (`#<n><len><data>` or `#0<data>`)
pub fn parse_block(raw:&[u8]) -> Result<&[u8]> {
	if raw.len() < 2 || raw[0] != b'#' {
		return Err(protocol("Binary block doesn't start with '#'"));
	}

	let n_digits = (raw[1] as char).to_digit(10).ok_or_else(|| protocol("Invalid block header length digit"))? as usize;
	if n_digits == 0 {
		// Indefinite length, runs to the terminating newline
		let body = &raw[2..];
		return Ok(body.strip_suffix(b"\n").unwrap_or(body));
	}

	let len_str = raw.get(2..2 + n_digits).ok_or_else(|| protocol("Truncated block header"))?;
	let len:usize = str::from_utf8(len_str).ok()
		.and_then(|s| s.parse().ok())
		.ok_or_else(|| protocol("Invalid block length"))?;

	let start = 2 + n_digits;
	raw.get(start..start + len).ok_or_else(|| protocol(format!("Block announces {} bytes but only {} arrived", len, raw.len() - start)))
}

/// Decodes a `:FORM:DATA SRE` trace (big-endian f32 in a binary block) into readings
pub fn parse_readings(raw:&[u8]) -> Result<Vec<Reading>> {
	let body = parse_block(raw)?;
	if body.len() % 12 != 0 {
		return Err(protocol(format!("Trace holds {} bytes, not a whole number of (voltage, current, time) triples", body.len())));
	}

	let mut rdr = Cursor::new(body);
	let mut ans = Vec::with_capacity(body.len() / 12);
	for _ in 0..(body.len() / 12) {
		let voltage = rdr.read_f32::<BigEndian>()? as f64;
		let current = rdr.read_f32::<BigEndian>()? as f64;
		let time    = rdr.read_f32::<BigEndian>()? as f64;
		ans.push(Reading{ voltage, current, time });
	}

	Ok(ans)
}

/// Keithley 2400-series source meter.
pub struct SourceMeter<T: Instrument> {
	inst: T,
	pub params: InstrumentParams,
	srq_poll: Duration,
}

impl<T: Instrument> SourceMeter<T> {

	pub fn new(inst:T) -> Result<Self> { Self::with_params(inst, InstrumentParams::default()) }

	/// Checks the model, then runs the parameter-independent setup so `params`
	/// can still be changed before `configure_source`.
	pub fn with_params(mut inst:T, params:InstrumentParams) -> Result<Self> {
		let idn = inst.query_str("*IDN?")?;
		if !idn.to_uppercase().contains("MODEL 24") {
			return Err(protocol(format!("Successfully connected to a device but it doesn't appear to be a 2400-series source meter: {:?}", idn)));
		}
		info!("connected to {}", idn);

		let mut smu = Self{ inst, params, srq_poll: Duration::from_secs_f32(DEFAULT_SRQ_POLL_SEC) };
		smu.setup_connection()?;
		smu.initialize_srq(SrqConfig::default())?;
		Ok(smu)
	}

	pub fn into_inner(self) -> T { self.inst }

	pub fn instrument(&mut self) -> &mut T { &mut self.inst }

	pub fn set_srq_poll(&mut self, poll:Duration) { self.srq_poll = poll; }

	fn write(&mut self, cmd:&str) -> Result<()> { self.inst.write_str(cmd) }

	pub fn identify(&mut self) -> Result<Identity> {
		let str_idn:String      = self.inst.query_str("*IDN?")?;
		let caps_idn:Captures   = IDN_RE.captures(&str_idn).ok_or_else(|| protocol(format!("Unable to parse *IDN? response {:?}", str_idn)))?;
		let manufacturer:String = match_str(caps_idn.get(1), "No match for manufacturer")?;
		let model:String        = match_str(caps_idn.get(2), "No match for model")?;
		let serial_num:String   = match_str(caps_idn.get(3), "No match for serial_num")?;
		let fw_version:String   = match_str(caps_idn.get(4), "No match for fw_version")?;

		Ok(Identity{ manufacturer, model, serial_num, fw_version })
	}

	/// Setup that doesn't depend on `params`: reading format, timestamps,
	/// concurrent voltage and current sensing.
	pub fn setup_connection(&mut self) -> Result<()> {
		self.write(":*RST")?;
		// Single precision floats, big-endian, instead of ASCII
		self.write(":FORM:DATA SRE")?;
		self.write(":FORM:BORD NORM")?;
		self.write(":SYST:TIME:RES")?;
		self.write(":SYST:TIME:RES:AUTO OFF")?;
		self.write("TRAC:TST:FORM ABS")?;
		self.write("SOUR:DEL:AUTO OFF")?;
		self.write(":SOUR:DEL 0.0")?;
		self.write(":SENS:FUNC:CONC ON")?;
		self.write(":SENS:FUNC:ON \"VOLT\",\"CURR\"")?;
		self.write(":SENS:FUNC:OFF \"RES\"")?;
		self.write(":FORM:ELEM:SENS VOLT,CURR,TIME")?;
		self.write(":SYST:BEEP:STAT OFF")
	}

	pub fn initialize_srq(&mut self, cfg:SrqConfig) -> Result<()> {
		let (event, meas, sre) = cfg.registers();
		self.write(":FORM:SREG BIN")?;
		self.write(&format!(":*SRE {}", sre))?;
		self.write(&format!(":STAT:MEAS:ENAB {}", meas))?;
		self.write(&format!(":*ESE {}", event))?;
		self.write(":*CLS")
	}

	/// Queries a status register, e.g. `*ESE?`, and decodes its binary form
	pub fn query_register(&mut self, cmd:&str) -> Result<u32> {
		let res = self.inst.query_str(cmd)?;
		parse_binary_register(&res)
	}

	pub fn check_params(&self) -> Result<()> { self.params.check() }

	/// Sources what `params.source_mode` names and measures the other quantity.
	pub fn configure_source(&mut self) -> Result<()> {
		self.check_params()?;

		let src  = self.params.source_mode;
		let meas = src.measured().scpi();

		self.write(&format!(":SOUR:FUNC:MODE {}", src.scpi()))?;
		self.write(&format!(":SENS:{}:PROT:LEV {}", meas, self.params.compliance_level))?;
		// NPLC is set on the measured function
		self.write(&format!(":SENS:{}:NPLC {}", meas, self.params.nplc))?;
		self.write(&format!(":ROUT:TERM {}", self.params.terminal.scpi()))?;
		self.write(&format!(":SYST:RSEN {}", if self.params.four_terminal { "ON" } else { "OFF" }))
	}

	pub fn reset_buffer(&mut self) -> Result<()> {
		self.write(":TRAC:FEED:CONT NEV")?;
		self.write(":TRAC:CLE")?;
		self.write(&format!(":TRAC:POIN {}", self.params.buffer_size))?;
		self.write(":TRAC:FEED:CONT NEXT")
	}

	pub fn configure_chrono_trigger(&mut self) -> Result<()> {
		self.write(&format!(":TRIG:COUN {}", self.params.trigger_count))?;
		self.write(&format!(":TRIG:DEL {}", self.params.trigger_delay))?;
		self.write(&format!(":SOUR:DEL {}", self.params.source_delay))
	}

	/// Output level in A or V depending on the source mode
	pub fn set_output(&mut self, setpoint:f64) -> Result<()> {
		if !setpoint.is_finite() {
			return Err(Error::Parameter(format!("Setpoint must be finite, got {}", setpoint)));
		}
		let cmd = format!(":SOUR:{}:LEV:TRIG {}", self.params.source_mode.scpi(), setpoint);
		self.write(&cmd)
	}

	pub fn source_on(&mut self, on:bool) -> Result<()> {
		self.write(if on { ":OUTP ON" } else { ":OUTP OFF" })
	}

	/// Runs the configured trigger model once and returns the buffered readings.
	/// Relies on the operation-complete SRQ; any other enabled SRQ also ends the wait.
	pub fn take_points(&mut self) -> Result<Vec<Reading>> {
		let timeout = match self.params.srq_timeout {
			Some(t) => Some(config::seconds(t, "SRQ timeout")?),
			None    => None,
		};

		self.reset_buffer()?;
		self.write("*CLS")?;
		self.write(":INIT")?;
		self.write("*OPC")?;

		self.inst.wait_for_srq(timeout, self.srq_poll)?;

		self.inst.write_str(":TRAC:DATA?")?;
		let raw = self.inst.read()?;
		let readings = parse_readings(&raw)?;
		debug!("took {} readings", readings.len());
		Ok(readings)
	}

	pub fn setup_simple_experiment(&mut self, setpoint:f64) -> Result<()> {
		self.configure_source()?;
		self.configure_chrono_trigger()?;
		self.reset_buffer()?;
		self.set_output(setpoint)?;
		self.source_on(true)
	}

	/// Leaves the instrument in its power-on state with service requests off
	pub fn reset_device(&mut self) -> Result<()> {
		self.write(":*RST")?;
		self.write(":*CLS")?;
		self.write(":*SRE 0")
	}

	pub fn source_mode(&self) -> SourceMode { self.params.source_mode }

}

#[cfg(test)]
mod tests {
	use super::*;

	fn block(values:&[f32]) -> Vec<u8> {
		let body:Vec<u8> = values.iter().flat_map(|v| v.to_be_bytes().to_vec()).collect();
		let len = body.len().to_string();
		let mut raw = format!("#{}{}", len.len(), len).into_bytes();
		raw.extend_from_slice(&body);
		raw.push(b'\n');
		raw
	}

	#[test]
	fn binary_register() {
		assert_eq!(parse_binary_register("#B0000000000110001").unwrap(), 49);
		assert_eq!(parse_binary_register("#B1000000000000000\n").unwrap(), 32768);
		assert!(parse_binary_register("#B0101").is_err());
		assert!(parse_binary_register("49").is_err());
		assert!(parse_binary_register("#B000000000011000a").is_err());
	}

	#[test]
	fn srq_registers() {
		assert_eq!(SrqConfig::default().registers(), (1, 512, 33));

		let all = SrqConfig{ operation_complete: true, buffer_full: true, compliance: true, output_enable: true, measurement_srq: true, event_srq: true };
		assert_eq!(all.registers(), (1, 512 + 16384 + 2048, 33));

		let none = SrqConfig{ operation_complete: false, buffer_full: false, compliance: false, output_enable: false, measurement_srq: false, event_srq: false };
		assert_eq!(none.registers(), (0, 0, 0));
	}

	#[test]
	fn readings_from_block() {
		let raw = block(&[1.5, -0.001, 0.25, 1.75, -0.001, 0.5]);
		let r = parse_readings(&raw).unwrap();
		assert_eq!(r.len(), 2);
		assert_eq!(r[0], Reading{ voltage: 1.5, current: -0.001f32 as f64, time: 0.25 });
		assert_eq!(r[1].voltage, 1.75);
	}

	#[test]
	fn partial_triples_are_rejected() {
		assert!(parse_readings(&block(&[1.0, 2.0])).is_err());
	}

	#[test]
	fn block_headers() {
		assert_eq!(parse_block(b"#15hello\n").unwrap(), b"hello");
		assert_eq!(parse_block(b"#0abc\n").unwrap(), b"abc");
		assert!(parse_block(b"#19abc").is_err());
		assert!(parse_block(b"1.0,2.0").is_err());
		assert!(parse_block(b"#x").is_err());
	}
}
