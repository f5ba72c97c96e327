//! Scripted stand-in for a 2400 on the other end of the link.
//!
//! It understands just enough SCPI to run the driver: it tracks the source
//! level, output state and trigger count, asserts SRQ once `*OPC` follows an
//! `:INIT`, and answers `:TRAC:DATA?` with a binary block.  The load is a
//! 1 kOhm resistor, so readings are V = 1000 * I.

#![allow(dead_code)]

use std::collections::VecDeque;

use smu_chrono::error::{Error, Result};
use smu_chrono::instrument::{Instrument, STB_RQS};

pub const IDN:&str = "KEITHLEY INSTRUMENTS INC.,MODEL 2400,1234567,C30   Mar 17 2006 09:29:29/A02  /K/J";
pub const LOAD_OHMS:f64 = 1000.0;

pub struct FakeSmu {
	pub idn: String,
	pub log: Vec<String>,
	pub level: f64,
	pub output_on: bool,
	pub trigger_count: usize,
	pub srq_ready: bool,
	pub never_srq: bool,
	/// Fail the n-th `:TRAC:DATA?` (0-based)
	pub fail_data_at: Option<usize>,
	pub data_queries: usize,
	pub registers: Vec<(String, String)>,
	replies: VecDeque<Vec<u8>>,
	initiated: bool,
}

impl FakeSmu {

	pub fn new() -> Self {
		Self {
			idn: IDN.to_owned(),
			log: vec![],
			level: 0.0,
			output_on: false,
			trigger_count: 1,
			srq_ready: false,
			never_srq: false,
			fail_data_at: None,
			data_queries: 0,
			registers: vec![("*ESE?".to_owned(), "#B0000000000000001".to_owned())],
			replies: VecDeque::new(),
			initiated: false,
		}
	}

	pub fn with_idn(idn:&str) -> Self {
		let mut smu = Self::new();
		smu.idn = idn.to_owned();
		smu
	}

	pub fn written(&self, cmd:&str) -> bool { self.log.iter().any(|c| c == cmd) }

	pub fn position(&self, cmd:&str) -> Option<usize> { self.log.iter().position(|c| c == cmd) }

	pub fn last_position(&self, cmd:&str) -> Option<usize> { self.log.iter().rposition(|c| c == cmd) }

	pub fn count(&self, cmd:&str) -> usize { self.log.iter().filter(|c| *c == cmd).count() }

	fn trace_block(&self) -> Vec<u8> {
		let mut body = vec![];
		for n in 0..self.trigger_count {
			let current = if self.output_on { self.level } else { 0.0 };
			let voltage = current * LOAD_OHMS;
			for v in &[voltage as f32, current as f32, n as f32 * 0.02] {
				body.extend_from_slice(&v.to_be_bytes());
			}
		}
		let len = body.len().to_string();
		let mut raw = format!("#{}{}", len.len(), len).into_bytes();
		raw.extend_from_slice(&body);
		raw.push(b'\n');
		raw
	}
}

impl Instrument for FakeSmu {

	fn write(&mut self, data:&[u8]) -> Result<()> {
		let cmd = String::from_utf8_lossy(data).trim().to_owned();
		self.log.push(cmd.clone());

		if cmd == "*IDN?" {
			let idn = self.idn.clone();
			self.replies.push_back(format!("{}\n", idn).into_bytes());
		} else if cmd == "*CLS" || cmd == ":*CLS" {
			self.srq_ready = false;
		} else if cmd == ":INIT" {
			self.initiated = true;
		} else if cmd == "*OPC" {
			if self.initiated && !self.never_srq { self.srq_ready = true; }
			self.initiated = false;
		} else if cmd == ":OUTP ON" {
			self.output_on = true;
		} else if cmd == ":OUTP OFF" {
			self.output_on = false;
		} else if let Some(n) = cmd.strip_prefix(":TRIG:COUN ") {
			self.trigger_count = n.parse().map_err(|_| Error::Protocol(format!("bad count {}", n)))?;
		} else if let Some(rest) = cmd.strip_prefix(":SOUR:") {
			if let Some(idx) = rest.find(":LEV:TRIG ") {
				let v = &rest[idx + ":LEV:TRIG ".len()..];
				self.level = v.parse().map_err(|_| Error::Protocol(format!("bad level {}", v)))?;
			}
		} else if cmd == ":TRAC:DATA?" {
			let n = self.data_queries;
			self.data_queries += 1;
			if self.fail_data_at == Some(n) {
				return Err(Error::Device{ op: "device_write", code: 17, msg: "I/O error" });
			}
			let block = self.trace_block();
			self.replies.push_back(block);
		} else if let Some((_, reply)) = self.registers.iter().find(|(q, _)| *q == cmd) {
			let reply = format!("{}\n", reply);
			self.replies.push_back(reply.into_bytes());
		}

		Ok(())
	}

	fn read(&mut self) -> Result<Vec<u8>> {
		self.replies.pop_front().ok_or(Error::Device{ op: "device_read", code: 15, msg: "I/O timeout" })
	}

	fn read_stb(&mut self) -> Result<u8> {
		if self.srq_ready {
			// A serial poll clears RQS
			self.srq_ready = false;
			Ok(STB_RQS | 0x20)
		} else {
			Ok(0)
		}
	}

	fn clear(&mut self) -> Result<()> {
		self.replies.clear();
		Ok(())
	}
}
