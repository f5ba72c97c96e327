
pub const PMAP_PROG:u32 = 100000;
pub const PMAP_VERS:u32 = 2;
pub const PMAP_PORT:u16 = 111;

pub const PMAPPROC_NULL:u32    = 0;     // (void) -> void
pub const PMAPPROC_GETPORT:u32 = 3;     // (mapping) -> unsigned int

use std::time::Duration;

use log::debug;

use crate::error::{rpc, Result};

use super::{IPPROTO_TCP, IPPROTO_UDP};
use super::xdr_pack;
use super::tcp_clients::TcpClient;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Protocol {
	TCP,
	UDP,
}

impl Protocol {
	pub fn to_u32(self) -> u32 { match self {
		Protocol::TCP => IPPROTO_TCP,
		Protocol::UDP => IPPROTO_UDP,
	}}
}

#[derive(Debug, Clone)]
pub struct Mapping {
	pub program: u32,
	pub version: u32,
	pub protocol: Protocol,
	pub port: u32,				// XDR encodes it as a u32 for alignment
}

pub struct TcpPortMapperClient {
	tcp_client: TcpClient,
}

impl TcpPortMapperClient {

	pub fn new(host:&str, timeout:Option<Duration>) -> Result<Self> {
		Self::with_port(host, PMAP_PORT, timeout)
	}

	// Non-standard port, used when the port mapper isn't on 111 (e.g. loop-back tests)
	pub fn with_port(host:&str, port:u16, timeout:Option<Duration>) -> Result<Self> {
		let tcp_client = TcpClient::connect((host, port), PMAP_PROG, PMAP_VERS, timeout)?;
		Ok(Self{ tcp_client })
	}

	pub fn null(&mut self) -> Result<()> {
		self.tcp_client.start_call(PMAPPROC_NULL)?;
		self.tcp_client.do_call()
	}

	pub fn get_port(&mut self, m:&Mapping) -> Result<u16> {
		self.tcp_client.start_call(PMAPPROC_GETPORT)?;
		xdr_pack::pack_mapping(&mut self.tcp_client.packer, m.program, m.version, m.protocol.to_u32(), m.port)?;
		self.tcp_client.do_call()?;

		let ans:u32 = self.tcp_client.unpacker.unpack_u32()?;
		if !self.tcp_client.unpacker.all_data_consumed() {
			return Err(rpc("Data unexpectedly left over in unpacker after unpacking port"));
		}

		debug!("port mapper: program {:#x} v{} on port {}", m.program, m.version, ans);
		match ans {
			0 => Err(rpc(format!("Program {:#x} version {} is not registered with the port mapper", m.program, m.version))),
			p if p > u16::MAX as u32 => Err(rpc(format!("Port mapper returned an invalid port {}", p))),
			p => Ok(p as u16),
		}
	}

}
