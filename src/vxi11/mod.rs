
// Device core
pub const DEVICE_CORE_PROG:u32  = 0x0607af;
pub const DEVICE_CORE_VERS:u32  = 1;
pub const CREATE_LINK:u32       = 10;
pub const DEVICE_WRITE:u32      = 11;
pub const DEVICE_READ:u32       = 12;
pub const DEVICE_READSTB:u32    = 13;
pub const DEVICE_TRIGGER:u32    = 14;
pub const DEVICE_CLEAR:u32      = 15;
pub const DEVICE_REMOTE:u32     = 16;
pub const DEVICE_LOCAL:u32      = 17;
pub const DESTROY_LINK:u32      = 23;

pub const CLIENT_ID:i32 = 3333;
pub const DEFAULT_LOCK_TIMEOUT_MS:u32 = 10000;
pub const DEFAULT_IO_TIMEOUT_MS:u32 = 10000;

// Extra slack on the socket so the device reports its own I/O timeout before the socket gives up
pub const SOCKET_TIMEOUT_SLACK_MS:u64 = 2000;

pub const OPERATION_FLAGS_END:i32 = 8;

pub const READ_REQUEST_SIZE:u32 = 0x0010_0000;

pub const REASON_REQCNT:i32 = 1;
pub const REASON_CHR:i32    = 2;
pub const REASON_END:i32    = 4;

use std::time::Duration;

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::instrument::Instrument;
use crate::rpc::port_mapping::{TcpPortMapperClient, Mapping, Protocol, PMAP_PORT};
use crate::rpc::tcp_clients::TcpClient;

pub mod xdr_pack;

pub fn device_error_msg(code:i32) -> &'static str {
	match code {
		1  => "Syntax error",
		3  => "Device not accessible",
		4  => "Invalid link identifier",
		5  => "Parameter error",
		6  => "Channel not established",
		8  => "Operation not supported",
		9  => "Out of resources",
		11 => "Device locked by another link",
		12 => "No lock held by this link",
		15 => "I/O timeout",
		17 => "I/O error",
		21 => "Invalid address",
		23 => "Abort",
		29 => "Channel already established",
		_  => "Unknown error",
	}
}

fn check(op:&'static str, code:i32) -> Result<()> {
	match code {
		0 => Ok(()),
		c => Err(Error::Device{ op, code: c, msg: device_error_msg(c) }),
	}
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
	pub pmap_port: u16,
	pub io_timeout_ms: u32,
	pub lock_timeout_ms: u32,
}

impl Default for ClientOptions {
	fn default() -> Self {
		Self{ pmap_port: PMAP_PORT, io_timeout_ms: DEFAULT_IO_TIMEOUT_MS, lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS }
	}
}

impl ClientOptions {
	fn socket_timeout(&self) -> Duration {
		Duration::from_millis(self.io_timeout_ms as u64 + SOCKET_TIMEOUT_SLACK_MS)
	}
}

#[derive(Debug, Clone)]
pub struct Link {
	pub link_id: i32,
	pub abort_port: u32,
	pub max_recv_size: u32,
	pub device: String,
}

pub struct CoreClient {
	client: TcpClient,
	opts: ClientOptions,
	opt_link: Option<Link>,
}

impl CoreClient {

	fn get_link(&self) -> Result<i32> {
		match self.opt_link {
			Some(Link{ link_id, .. }) => Ok(link_id),
			None => Err(Error::Protocol("No link".into())),
		}
	}

	pub fn new(host:&str) -> Result<Self> { Self::with_options(host, ClientOptions::default()) }

	pub fn with_options(host:&str, opts:ClientOptions) -> Result<Self> {

		// Find the port to use for the core program
		let mut pmap_client = TcpPortMapperClient::with_port(host, opts.pmap_port, Some(opts.socket_timeout()))?;

		let mapping = Mapping {
			program: DEVICE_CORE_PROG,
			version: DEVICE_CORE_VERS,
			protocol: Protocol::TCP,
			port: 0,
		};

		let port = pmap_client.get_port(&mapping)?;

		let client = TcpClient::connect((host, port), DEVICE_CORE_PROG, DEVICE_CORE_VERS, Some(opts.socket_timeout()))?;
		debug!("connected to VXI-11 core on {}:{}", host, port);

		Ok(CoreClient{ client, opts, opt_link: None })
	}

	/// Connects and opens a link to `device` (`inst0`, `gpib0,25`, ...)
	pub fn connect(host:&str, device:&str, opts:ClientOptions) -> Result<Self> {
		let mut core = Self::with_options(host, opts)?;
		core.create_link(device)?;
		Ok(core)
	}

	pub fn link(&self) -> Option<&Link> { self.opt_link.as_ref() }

	pub fn set_io_timeout(&mut self, io_timeout_ms:u32) -> Result<()> {
		self.opts.io_timeout_ms = io_timeout_ms;
		self.client.set_timeout(Some(self.opts.socket_timeout()))
	}

	pub fn create_link(&mut self, device:&str) -> Result<()> {
		if self.opt_link.is_some() {
			return Err(Error::Protocol("Already connected to a link".into()));
		}

		self.client.start_call(CREATE_LINK)?;
		xdr_pack::pack_create_link_parms(&mut self.client.packer, CLIENT_ID, false, self.opts.lock_timeout_ms, device)?;
		self.client.do_call()?;

		let error:i32         = self.client.unpacker.unpack_i32()?;
		let link_id:i32       = self.client.unpacker.unpack_i32()?;
		let abort_port:u32    = self.client.unpacker.unpack_u32()?;
		let max_recv_size:u32 = self.client.unpacker.unpack_u32()?;
		check("create_link", error)?;

		debug!("created link {} to {} (max_recv_size={})", link_id, device, max_recv_size);
		self.opt_link = Some(Link{ link_id, abort_port, max_recv_size, device: device.to_owned() });
		Ok(())
	}

	pub fn ask(&mut self, data:&[u8]) -> Result<Vec<u8>> {
		self.write(data)?;
		self.read()
	}

	pub fn write(&mut self, data:&[u8]) -> Result<()> {
		let link_id:i32 = self.get_link()?;
		let max = match self.opt_link {
			Some(Link{ max_recv_size, .. }) if max_recv_size > 0 => max_recv_size as usize,
			_ => data.len().max(1),
		};

		// An empty write still has to go out once so the END flag reaches the device
		let mut chunks:Vec<&[u8]> = data.chunks(max).collect();
		if chunks.is_empty() { chunks.push(&[]); }
		let n_chunks = chunks.len();

		for (idx, chunk) in chunks.into_iter().enumerate() {
			let flags = if idx + 1 == n_chunks { OPERATION_FLAGS_END } else { 0 };

			self.client.start_call(DEVICE_WRITE)?;
			xdr_pack::pack_device_write_parms(&mut self.client.packer, link_id, self.opts.io_timeout_ms, self.opts.lock_timeout_ms, flags, chunk)?;
			self.client.do_call()?;

			let error:i32 = self.client.unpacker.unpack_i32()?;
			let size:u32  = self.client.unpacker.unpack_u32()?;
			check("device_write", error)?;

			if size as usize != chunk.len() {
				return Err(Error::Protocol(format!("Device accepted {} of {} bytes", size, chunk.len())));
			}
		}

		Ok(())
	}

	pub fn read(&mut self) -> Result<Vec<u8>> {
		let link_id:i32 = self.get_link()?;
		let mut ans:Vec<u8> = vec![];

		loop {
			self.client.start_call(DEVICE_READ)?;
			xdr_pack::pack_device_read_parms(&mut self.client.packer, link_id, READ_REQUEST_SIZE, self.opts.io_timeout_ms, self.opts.lock_timeout_ms, 0, 0)?;
			self.client.do_call()?;

			let error:i32    = self.client.unpacker.unpack_i32()?;
			let reason:i32   = self.client.unpacker.unpack_i32()?;
			let data:Vec<u8> = self.client.unpacker.unpack_variable_len_opaque()?;
			check("device_read", error)?;

			ans.extend_from_slice(&data);

			if reason & (REASON_END | REASON_CHR) != 0 {
				return Ok(ans);
			} else if reason & REASON_REQCNT != 0 {
				// More data waiting on the device
				continue;
			} else {
				return Err(Error::Protocol(format!("Unexpected read reason bits {:#x}", reason)));
			}
		}
	}

	fn generic(&mut self, prc:u32) -> Result<()> {
		let link_id:i32 = self.get_link()?;
		self.client.start_call(prc)?;
		xdr_pack::pack_device_generic_parms(&mut self.client.packer, link_id, 0, self.opts.lock_timeout_ms, self.opts.io_timeout_ms)?;
		self.client.do_call()
	}

	pub fn read_stb(&mut self) -> Result<u8> {
		self.generic(DEVICE_READSTB)?;
		let error:i32 = self.client.unpacker.unpack_i32()?;
		let stb:u32   = self.client.unpacker.unpack_u32()?;
		check("device_readstb", error)?;
		Ok(stb as u8)
	}

	pub fn clear(&mut self) -> Result<()> {
		self.generic(DEVICE_CLEAR)?;
		let error:i32 = self.client.unpacker.unpack_i32()?;
		check("device_clear", error)
	}

	pub fn trigger(&mut self) -> Result<()> {
		self.generic(DEVICE_TRIGGER)?;
		let error:i32 = self.client.unpacker.unpack_i32()?;
		check("device_trigger", error)
	}

	pub fn local(&mut self) -> Result<()> {
		self.generic(DEVICE_LOCAL)?;
		let error:i32 = self.client.unpacker.unpack_i32()?;
		check("device_local", error)
	}

	pub fn destroy_link(&mut self) -> Result<()> {
		let link_id:i32 = self.get_link()?;

		self.client.start_call(DESTROY_LINK)?;
		self.client.packer.pack_i32(link_id)?;
		self.client.do_call()?;

		let device_error:i32 = self.client.unpacker.unpack_i32()?;
		self.opt_link = None;
		check("destroy_link", device_error)
	}

}

impl Drop for CoreClient {

	fn drop(&mut self) {
		if self.opt_link.is_some() {
			if let Err(e) = self.destroy_link() {
				warn!("Unable to destroy VXI-11 link: {}", e);
			}
		}
	}

}

impl Instrument for CoreClient {
	fn write(&mut self, data:&[u8]) -> Result<()> { CoreClient::write(self, data) }
	fn read(&mut self) -> Result<Vec<u8>> { CoreClient::read(self) }
	fn read_stb(&mut self) -> Result<u8> { CoreClient::read_stb(self) }
	fn clear(&mut self) -> Result<()> { CoreClient::clear(self) }
}
