
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use byteorder::{BigEndian, WriteBytesExt, ReadBytesExt};
use log::trace;

use crate::error::{rpc, Result};
use crate::xdr;
use super::{xdr_pack, xdr_unpack, LAST_FRAGMENT, MAX_RECORD_SIZE};

pub struct TcpClient {
	stream: TcpStream,
	pub prog: u32,
	pub vers: u32,
	pub lastxid: u32,
	pub packer: xdr::Packer,
	pub unpacker: xdr::Unpacker,
}

impl TcpClient {

	pub fn connect<A: ToSocketAddrs>(addr: A, prog: u32, vers: u32, timeout: Option<Duration>) -> Result<Self> {
		let stream = TcpStream::connect(addr)?;
		stream.set_read_timeout(timeout)?;
		stream.set_write_timeout(timeout)?;
		stream.set_nodelay(true)?;

		Ok(Self{
			stream, prog, vers,
			lastxid: rand::random::<u32>(),
			packer: xdr::Packer::new(),
			unpacker: xdr::Unpacker::new(),
		})
	}

	pub fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
		self.stream.set_read_timeout(timeout)?;
		Ok(self.stream.set_write_timeout(timeout)?)
	}

	/// Bumps the xid and packs a call header for `prc`.  Arguments get packed
	/// into `self.packer` afterwards, then `do_call` sends everything.
	pub fn start_call(&mut self, prc:u32) -> Result<()> {
		self.lastxid = self.lastxid.wrapping_add(1);
		self.packer.reset();
		xdr_pack::pack_callheader_no_auth(&mut self.packer, self.lastxid, self.prog, self.vers, prc)
	}

	/// Sends the packed call as one record and loads the matching reply into
	/// `self.unpacker`, positioned just after the reply header.
	pub fn do_call(&mut self) -> Result<()> {
		let call:&[u8] = self.packer.as_bytes();
		if !call.is_empty() {
			let mut send_bytes:Vec<u8> = Vec::with_capacity(call.len() + 4);
			send_bytes.write_u32::<BigEndian>(call.len() as u32 | LAST_FRAGMENT)?;
			send_bytes.extend_from_slice(call);
			self.stream.write_all(&send_bytes)?;
			trace!("rpc call xid={} prog={} len={}", self.lastxid, self.prog, call.len());
		}

		loop {
			let reply = self.read_record()?;

			// Load the response into the unpacker and make sure the xid matches
			self.unpacker.reset(&reply);
			let (xid, _) = xdr_unpack::unpack_replyheader(&mut self.unpacker)?;

			let age = self.lastxid.wrapping_sub(xid);
			if age == 0 {
				return Ok(());
			} else if age < (1 << 31) {
				// Packet from the past, probably a reply to a call that timed out
				trace!("dropping stale reply xid={} (expected {})", xid, self.lastxid);
				continue;
			} else {
				return Err(rpc(format!("Got a reply for xid {} from the future (last sent {})", xid, self.lastxid)));
			}
		}
	}

	fn read_record(&mut self) -> Result<Vec<u8>> {
		let mut reply:Vec<u8> = vec![];

		let mut last:bool = false;
		while !last {
			let x:u32 = self.stream.read_u32::<BigEndian>()?;

			last = (x & LAST_FRAGMENT) != 0;
			let n = (x & !LAST_FRAGMENT) as usize;

			let start = reply.len();
			if start + n > MAX_RECORD_SIZE {
				return Err(rpc(format!("Reply record of at least {} bytes exceeds the {} byte limit", start + n, MAX_RECORD_SIZE)));
			}
			reply.resize(start + n, 0);
			self.stream.read_exact(&mut reply[start..])?;
		}

		Ok(reply)
	}

}
