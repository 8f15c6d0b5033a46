
pub const PMAP_PROG:u32 = 100000;
pub const PMAP_VERS:u32 = 2;
pub const PMAP_PORT:u16 = 111;

pub const PMAPPROC_GETPORT:u32 = 3;     // (mapping) -> unsigned int

use std::io::{self, Error, ErrorKind};
use std::time::Duration;

use log::debug;

use crate::xdr;

use super::IPPROTO_TCP;
use super::xdr_pack;
use super::tcp_clients::TcpClient;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Protocol {
	TCP,
}

impl Protocol {
	pub fn to_u32(self) -> u32 { match self {
		Protocol::TCP => IPPROTO_TCP,
	}}
}

#[derive(Debug)]
pub struct Mapping {
	pub program: u32,
	pub version: u32,
	pub protocol: Protocol,
	pub port: u32,				// XDR encodes it as a u32 for alignment
}

pub struct TcpPortMapperClient {
	pub host: String,
	packer: xdr::Packer,
	unpacker: xdr::Unpacker,
	tcp_client: TcpClient,
}

impl TcpPortMapperClient {

	pub fn new(host:&str, timeout:Duration) -> io::Result<Self> {
		Self::with_port(host, PMAP_PORT, timeout)
	}

	pub fn with_port(host:&str, port:u16, timeout:Duration) -> io::Result<Self> {
		let packer = xdr::Packer::new();
		let unpacker = xdr::Unpacker::new();
		let tcp_client = TcpClient::connect((host, port), PMAP_PROG, PMAP_VERS, timeout)?;
		Ok(Self{ host: host.to_owned(), packer, unpacker, tcp_client })
	}

	fn start_call(&mut self, prc:u32) -> io::Result<()> {
	    let xid = self.tcp_client.next_xid();
	    self.packer.reset();
	    xdr_pack::pack_callheader_no_auth(&mut self.packer, xid, self.tcp_client.prog, self.tcp_client.vers, prc)
	}

	pub fn get_port(&mut self, m:&Mapping) -> io::Result<u16> {
        self.start_call(PMAPPROC_GETPORT)?;
        xdr_pack::pack_mapping(&mut self.packer, m.program, m.version, m.protocol.to_u32(), m.port)?;
        self.tcp_client.do_call(self.packer.as_bytes(), &mut self.unpacker)?;

       	let ans:u32 = self.unpacker.unpack_u32()?;

       	if !self.unpacker.all_data_consumed() {
       		return Err(Error::new(ErrorKind::InvalidData, "Data unexpectedly left over in unpacker after unpacking port"));
       	}

       	// Port 0 is how the mapper says the program isn't registered
       	match ans {
       		0 => Err(Error::new(ErrorKind::NotFound, format!("Program {} version {} is not registered on {}", m.program, m.version, self.host))),
       		p if p > u16::MAX as u32 => Err(Error::new(ErrorKind::InvalidData, "Port mapper returned a port out of range")),
       		p => {
       			debug!("Port mapper on {} maps program {} to port {}", self.host, m.program, p);
       			Ok(p as u16)
       		}
       	}
	}

}
