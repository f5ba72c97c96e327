use std::fmt;
use std::str;
use std::thread;
use std::time::{Duration, Instant};

use lazy_static::lazy_static;
use log::debug;
use regex::Regex;

use crate::error::{Error, Result};

// Request-service bit of the IEEE 488.2 status byte
pub const STB_RQS:u8 = 0x40;

pub const DEFAULT_SRQ_POLL_SEC:f32 = 0.01;

pub trait Instrument {
	fn write(&mut self, data:&[u8]) -> Result<()>;
	fn read(&mut self) -> Result<Vec<u8>>;
	fn read_stb(&mut self) -> Result<u8>;
	fn clear(&mut self) -> Result<()>;

	fn query(&mut self, data:&[u8]) -> Result<Vec<u8>> {
		self.write(data)?;
		self.read()
	}

	fn write_str(&mut self, cmd:&str) -> Result<()> {
		debug!(">> {}", cmd);
		self.write(cmd.as_bytes())
	}

	fn query_str(&mut self, cmd:&str) -> Result<String> {
		debug!(">> {}", cmd);
		let res = self.query(cmd.as_bytes())?;
		let s = str::from_utf8(&res)
			.map(|s| s.trim_end().to_owned())
			.map_err(|_| Error::Protocol(format!("Response to {:?} is not UTF-8", cmd)))?;
		debug!("<< {}", s);
		Ok(s)
	}

	// Polls the status byte, `None` waits forever
	fn wait_for_srq(&mut self, timeout:Option<Duration>, poll:Duration) -> Result<u8> {
		let start = Instant::now();
		loop {
			let stb = self.read_stb()?;
			if stb & STB_RQS != 0 {
				debug!("SRQ asserted, stb={:#04x}", stb);
				return Ok(stb);
			}
			if let Some(t) = timeout {
				if start.elapsed() >= t { return Err(Error::Timeout("service request")); }
			}
			thread::sleep(poll);
		}
	}
}

impl<I: Instrument + ?Sized> Instrument for Box<I> {
	fn write(&mut self, data:&[u8]) -> Result<()> { (**self).write(data) }
	fn read(&mut self) -> Result<Vec<u8>> { (**self).read() }
	fn read_stb(&mut self) -> Result<u8> { (**self).read_stb() }
	fn clear(&mut self) -> Result<()> { (**self).clear() }
}

lazy_static! {
	static ref TCPIP_RE: Regex = Regex::new(r"(?i)^TCPIP\d*::([^:]+)(?:::([^:]+))?(?:::INSTR)?$").unwrap();
	static ref GPIB_RE: Regex  = Regex::new(r"(?i)^GPIB(\d*)::(\d+)(?:::INSTR)?$").unwrap();
	static ref HOST_RE: Regex  = Regex::new(r"^[A-Za-z0-9.\-]+$").unwrap();
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
	pub host: String,
	pub device: String,
}

impl Resource {

	// GPIB addresses go through a LAN/GPIB gateway
	pub fn parse(addr:&str, gateway:Option<&str>) -> Result<Self> {
		let addr = addr.trim();

		if let Some(cap) = TCPIP_RE.captures(addr) {
			let host = cap[1].to_owned();
			let device = match cap.get(2) {
				Some(m) if !m.as_str().eq_ignore_ascii_case("INSTR") => m.as_str().to_owned(),
				_ => "inst0".to_owned(),
			};
			return Ok(Self{ host, device });
		}

		if let Some(cap) = GPIB_RE.captures(addr) {
			let board = if cap[1].is_empty() { "0" } else { &cap[1] };
			let host = gateway.ok_or_else(|| Error::Config(format!("{} is a GPIB address, so a LAN/GPIB gateway host is required", addr)))?;
			return Ok(Self{ host: host.to_owned(), device: format!("gpib{},{}", board, &cap[2]) });
		}

		if HOST_RE.is_match(addr) {
			return Ok(Self{ host: addr.to_owned(), device: "inst0".to_owned() });
		}

		Err(Error::Config(format!("Unrecognized instrument address {:?}", addr)))
	}

}

impl fmt::Display for Resource {
	fn fmt(&self, f:&mut fmt::Formatter) -> fmt::Result {
		write!(f, "TCPIP0::{}::{}::INSTR", self.host, self.device)
	}
}
