
extern crate byteorder;

use std::io::{self, Read, Write, Error, ErrorKind};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use byteorder::{BigEndian, WriteBytesExt, ReadBytesExt};
use log::trace;

use crate::xdr;
use super::{xdr_unpack, LAST_FRAGMENT};

pub struct TcpClient {
    stream: TcpStream,
    pub prog: u32,
    pub vers: u32,
    pub lastxid: u32,
}

// Socket timeouts surface as WouldBlock on some platforms and TimedOut on others
fn normalize_timeout(e:io::Error) -> io::Error {
    match e.kind() {
        ErrorKind::WouldBlock => Error::new(ErrorKind::TimedOut, e),
        _ => e,
    }
}

pub fn write_record<W: Write>(w:&mut W, data:&[u8]) -> io::Result<()> {
    let header:u32 = data.len() as u32 | LAST_FRAGMENT;

    let mut send_bytes:Vec<u8> = Vec::with_capacity(data.len() + 4);
    send_bytes.write_u32::<BigEndian>(header)?;
    send_bytes.extend_from_slice(data);
    w.write_all(&send_bytes)
}

// Largest reassembled record accepted from a peer
pub const MAX_RECORD_SIZE:usize = 16 * 1024 * 1024;

pub fn read_record<R: Read>(r:&mut R) -> io::Result<Vec<u8>> {
    let mut record:Vec<u8> = vec![];

    let mut last:bool = false;
    while !last {
        let x:u32 = r.read_u32::<BigEndian>()?;

        last = (x & LAST_FRAGMENT) != 0;
        let n = (x & !LAST_FRAGMENT) as usize;

        let start = record.len();
        if start + n > MAX_RECORD_SIZE {
            return Err(Error::new(ErrorKind::InvalidData, format!("RPC record of {} bytes exceeds the {} byte limit", start + n, MAX_RECORD_SIZE)));
        }
        record.resize(start + n, 0);
        r.read_exact(&mut record[start..])?;
    }

    Ok(record)
}

impl TcpClient {

	pub fn connect<A: ToSocketAddrs>(addr: A, prog: u32, vers: u32, timeout: Duration) -> io::Result<Self> {
		let mut last_err:Option<io::Error> = None;

		for sock_addr in addr.to_socket_addrs()? {
			match TcpStream::connect_timeout(&sock_addr, timeout) {
				Ok(stream) => {
					stream.set_nodelay(true)?;
					let mut client = Self{ stream, prog, vers, lastxid: 0 };
					client.set_timeout(timeout)?;
					return Ok(client);
				},
				Err(e) => last_err = Some(e),
			}
		}

		Err(last_err.unwrap_or_else(|| Error::new(ErrorKind::AddrNotAvailable, "Host did not resolve to any address")))
	}

	pub fn set_timeout(&mut self, timeout:Duration) -> io::Result<()> {
		self.stream.set_read_timeout(Some(timeout))?;
		self.stream.set_write_timeout(Some(timeout))
	}

	pub fn next_xid(&mut self) -> u32 {
		self.lastxid = self.lastxid.wrapping_add(1);
		self.lastxid
	}

	// Sends one call record and loads the matching reply body (everything after the reply header) into the unpacker
	pub fn do_call(&mut self, call:&[u8], unpacker:&mut xdr::Unpacker) -> io::Result<()> {
		if !call.is_empty() {
			write_record(&mut self.stream, call).map_err(normalize_timeout)?;
		}

		loop {
			let reply = read_record(&mut self.stream).map_err(normalize_timeout)?;

	        unpacker.reset(&reply);

	        let (xid, _) = xdr_unpack::unpack_replyheader(unpacker)?;
	        if xid == self.lastxid {
				return Ok(());
	        } else if xid < self.lastxid {
		        // Late reply to an earlier call that already gave up
		        trace!("Discarding stale RPC reply xid={} (expected {})", xid, self.lastxid);
		        continue;
	        } else {
	        	return Err(Error::new(ErrorKind::InvalidData, "Received a reply for a call that hasn't been made yet"));
	        }
		}

	}

}


#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Cursor;

	#[test]
	fn record_spanning_fragments_is_reassembled() {
		let mut wire:Vec<u8> = vec![];
		wire.write_u32::<BigEndian>(4).unwrap();
		wire.extend_from_slice(&[1, 2, 3, 4]);
		wire.write_u32::<BigEndian>(4 | LAST_FRAGMENT).unwrap();
		wire.extend_from_slice(&[5, 6, 7, 8]);

		let record = read_record(&mut Cursor::new(wire)).unwrap();
		assert_eq!(record, vec![1, 2, 3, 4, 5, 6, 7, 8]);
	}

	#[test]
	fn oversized_fragment_is_rejected_before_allocating() {
		let mut wire:Vec<u8> = vec![];
		wire.write_u32::<BigEndian>(0x7fff_ffff | LAST_FRAGMENT).unwrap();
		wire.extend_from_slice(&[0; 16]);

		let e = read_record(&mut Cursor::new(wire)).unwrap_err();
		assert_eq!(e.kind(), ErrorKind::InvalidData);
	}

	#[test]
	fn oversized_record_across_fragments_is_rejected() {
		let half = (MAX_RECORD_SIZE / 2 + 1) as u32;
		let mut wire:Vec<u8> = vec![];
		wire.write_u32::<BigEndian>(half).unwrap();
		wire.resize(4 + half as usize, 0);
		wire.write_u32::<BigEndian>(half | LAST_FRAGMENT).unwrap();

		let e = read_record(&mut Cursor::new(wire)).unwrap_err();
		assert_eq!(e.kind(), ErrorKind::InvalidData);
	}

	#[test]
	fn call_round_trips_through_loopback_server() {
		let (port, server) = loopback::serve(|call, _args, reply| {
			reply.pack_u32(call.prc * 10).unwrap();
		});

		let mut client = TcpClient::connect(("127.0.0.1", port), 1, 1, Duration::from_secs(2)).unwrap();
		let mut packer = xdr::Packer::new();
		let mut unpacker = xdr::Unpacker::new();

		let xid = client.next_xid();
		crate::rpc::xdr_pack::pack_callheader_no_auth(&mut packer, xid, 1, 1, 3).unwrap();
		client.do_call(packer.as_bytes(), &mut unpacker).unwrap();
		assert_eq!(unpacker.unpack_u32().unwrap(), 30);

		drop(client);
		server.join().unwrap();
	}
}
