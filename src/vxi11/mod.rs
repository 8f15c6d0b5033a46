
// Device core
pub const DEVICE_CORE_PROG:u32  = 0x0607af;
pub const DEVICE_CORE_VERS:u32  = 1;
pub const CREATE_LINK:u32       = 10;
pub const DEVICE_WRITE:u32      = 11;
pub const DEVICE_READ:u32       = 12;
pub const DESTROY_LINK:u32      = 23;

pub const CLIENT_ID:i32 = 3333;
pub const DEFAULT_LOCK_TIMEOUT:u32 = 10000;
pub const DEFAULT_DEVICE:&str = "inst0";

pub const OPERATION_FLAGS_END_ONLY:i32 = 8;

// Reason bits in a device_read reply
pub const REASON_REQCNT:i32 = 1;
pub const REASON_CHR:i32    = 2;
pub const REASON_END:i32    = 4;

// The device holds a call for up to io_timeout before answering, so the socket needs a little longer
const RPC_TIMEOUT_MARGIN:Duration = Duration::from_secs(1);

// Bytes asked for per device_read; keeps every reply well under the RPC record limit
const READ_REQUEST_SIZE:u32 = 1024 * 1024;

use std::io::{self, Error, ErrorKind};
use std::time::Duration;

use log::{debug, trace};

use crate::rpc::port_mapping::{TcpPortMapperClient, Mapping, Protocol};
use crate::rpc::xdr_pack::pack_callheader_no_auth;
use crate::rpc::tcp_clients::TcpClient;
use crate::xdr::{Packer, Unpacker};

fn err(msg:&str) -> io::Error { Error::new(ErrorKind::Other, msg) }

// Maps a Device_ErrorCode onto an io::Error, keeping timeouts distinguishable
fn device_error(code:i32) -> io::Result<()> {
    match code {
        0  => Ok(()),
        1  => Err(Error::new(ErrorKind::InvalidInput, "Syntax error")),
        3  => Err(Error::new(ErrorKind::ConnectionRefused, "Device not accessible")),
        4  => Err(Error::new(ErrorKind::NotConnected, "Invalid link identifier")),
        5  => Err(Error::new(ErrorKind::InvalidInput, "Parameter error")),
        6  => Err(Error::new(ErrorKind::NotConnected, "Channel not established")),
        8  => Err(Error::new(ErrorKind::Unsupported, "Operation not supported")),
        9  => Err(err("Out of resources")),
        11 => Err(Error::new(ErrorKind::PermissionDenied, "Device locked by another link")),
        12 => Err(Error::new(ErrorKind::PermissionDenied, "No lock held by this link")),
        15 => Err(Error::new(ErrorKind::TimedOut, "I/O timeout")),
        17 => Err(err("I/O error")),
        21 => Err(Error::new(ErrorKind::AddrNotAvailable, "Invalid address")),
        23 => Err(Error::new(ErrorKind::Interrupted, "Abort")),
        29 => Err(err("Channel already established")),
        x  => Err(err(&format!("Unknown device error code {}", x))),
    }
}

pub struct CoreClient {
    client: TcpClient,
    packer: Packer,
    unpacker: Unpacker,
    io_timeout: Duration,
    opt_link: Option<Link>,
}

#[derive(Debug, Clone, Copy)]
pub struct Link {
    pub link_id: i32,
    pub abort_port: u16,
    pub max_recv_size: u32,
}

impl CoreClient {

    fn get_link(&self) -> io::Result<Link> {
        self.opt_link.ok_or_else(|| Error::new(ErrorKind::NotConnected, "No link"))
    }

    fn io_timeout_ms(&self) -> u32 {
        self.io_timeout.as_millis().min(u32::MAX as u128) as u32
    }

    fn start_call(&mut self, prc:u32) -> io::Result<()> {
        let xid = self.client.next_xid();
        self.packer.reset();
        pack_callheader_no_auth(&mut self.packer, xid, DEVICE_CORE_PROG, DEVICE_CORE_VERS, prc)
    }

    fn make_call(&mut self) -> io::Result<()> {
        self.client.do_call(self.packer.as_bytes(), &mut self.unpacker)
    }

    pub fn new(host:&str, io_timeout:Duration) -> io::Result<Self> {

        // Find the port to use for the core program
        let mut pmap_client = TcpPortMapperClient::new(host, io_timeout)?;

        let mapping = Mapping {
            program: DEVICE_CORE_PROG,
            version: DEVICE_CORE_VERS,
            protocol: Protocol::TCP,
            port: 0,
        };

        let port = pmap_client.get_port(&mapping)?;

        Self::connect_port(host, port, io_timeout)
    }

    pub fn connect_port(host:&str, port:u16, io_timeout:Duration) -> io::Result<Self> {
        let client = TcpClient::connect((host, port), DEVICE_CORE_PROG, DEVICE_CORE_VERS, io_timeout + RPC_TIMEOUT_MARGIN)?;
        debug!("VXI-11 core channel connected to {}:{}", host, port);

        Ok(CoreClient { client, packer: Packer::new(), unpacker: Unpacker::new(), io_timeout, opt_link: None })
    }

    pub fn link(&self) -> Option<Link> { self.opt_link }

    pub fn set_io_timeout(&mut self, io_timeout:Duration) -> io::Result<()> {
        self.io_timeout = io_timeout;
        self.client.set_timeout(io_timeout + RPC_TIMEOUT_MARGIN)
    }

    pub fn create_link(&mut self, device:&str) -> io::Result<()> {
        if self.opt_link.is_some() {
            return Err(err("Already connected to a link"));
        }

        self.start_call(CREATE_LINK)?;
        xdr_pack::pack_create_link_parms(&mut self.packer, CLIENT_ID, false, DEFAULT_LOCK_TIMEOUT, device)?;
        self.make_call()?;

        let error:i32         = self.unpacker.unpack_i32()?;
        let link_id:i32       = self.unpacker.unpack_i32()?;
        let abort_port:u32    = self.unpacker.unpack_u32()?;
        let max_recv_size:u32 = self.unpacker.unpack_u32()?;

        device_error(error)?;

        self.opt_link = Some(Link{ link_id, abort_port: abort_port as u16, max_recv_size });
        debug!("VXI-11 link {} to '{}' created, max_recv_size={}", link_id, device, max_recv_size);
        Ok(())
    }

    pub fn ask(&mut self, data:&[u8]) -> io::Result<Vec<u8>> {
        self.write(data)?;
        self.read()
    }

    pub fn write(&mut self, data:&[u8]) -> io::Result<()> {
        let link = self.get_link()?;

        // Messages larger than the device's receive buffer go out in pieces, END only on the last one
        let chunk_size = (link.max_recv_size as usize).max(1);
        let mut chunks = data.chunks(chunk_size).peekable();
        while let Some(chunk) = chunks.next() {
            let flags = if chunks.peek().is_none() { OPERATION_FLAGS_END_ONLY } else { 0 };

            self.start_call(DEVICE_WRITE)?;
            let timeout_ms = self.io_timeout_ms();
            xdr_pack::pack_device_write_parms(&mut self.packer, link.link_id, timeout_ms, DEFAULT_LOCK_TIMEOUT, flags, chunk)?;
            self.make_call()?;

            let error:i32 = self.unpacker.unpack_i32()?;
            let size:u32  = self.unpacker.unpack_u32()?;
            device_error(error)?;

            if size as usize != chunk.len() {
                return Err(err("Number of bytes in confirmation doesn't match number of bytes sent"));
            }
        }

        Ok(())
    }

    pub fn read(&mut self) -> io::Result<Vec<u8>> {
        let link = self.get_link()?;
        let mut ans:Vec<u8> = vec![];

        loop {
            self.start_call(DEVICE_READ)?;
            let timeout_ms = self.io_timeout_ms();
            xdr_pack::pack_device_read_parms(&mut self.packer, link.link_id, READ_REQUEST_SIZE, timeout_ms, DEFAULT_LOCK_TIMEOUT, 0, 0)?;
            self.make_call()?;

            let error:i32  = self.unpacker.unpack_i32()?;
            let reason:i32 = self.unpacker.unpack_i32()?;
            let mut data:Vec<u8> = self.unpacker.unpack_variable_len_opaque()?;
            device_error(error)?;

            trace!("device_read returned {} bytes, reason={:#x}", data.len(), reason);
            ans.append(&mut data);

            if reason & !(REASON_REQCNT | REASON_CHR | REASON_END) != 0 {
                return Err(err("Bits in reason code that should be zero aren't zero"));
            }
            if reason & REASON_END != 0 {
                return Ok(ans);
            }
            // Otherwise the device filled its transfer buffer, so keep reading
        }
    }

    pub fn destroy_link(&mut self) -> io::Result<()> {
        let link = self.get_link()?;

        self.start_call(DESTROY_LINK)?;
        xdr_pack::pack_device_link(&mut self.packer, link.link_id)?;
        self.make_call()?;

        // The link is gone from our side whatever the device says
        self.opt_link = None;

        let device_error_code:i32 = self.unpacker.unpack_i32()?;
        device_error(device_error_code)
    }

}

pub mod xdr_pack;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::tcp_clients::loopback;

    // A device that answers every write by queueing the bytes for the next read, delivered in 3-byte pieces
    fn echo_device(max_recv_size:u32) -> (u16, std::thread::JoinHandle<()>) {
        let mut pending:Vec<u8> = vec![];
        loopback::serve(move |call, args, reply| {
            assert_eq!(call.prog, DEVICE_CORE_PROG);
            match call.prc {
                CREATE_LINK => {
                    reply.pack_i32(0).unwrap();
                    reply.pack_i32(17).unwrap();
                    reply.pack_u32(0).unwrap();
                    reply.pack_u32(max_recv_size).unwrap();
                },
                DEVICE_WRITE => {
                    let _link = args.unpack_i32().unwrap();
                    let _timeout = args.unpack_u32().unwrap();
                    let _lock_timeout = args.unpack_u32().unwrap();
                    let _flags = args.unpack_i32().unwrap();
                    let data = args.unpack_variable_len_opaque().unwrap();
                    pending.extend_from_slice(&data);
                    reply.pack_i32(0).unwrap();
                    reply.pack_u32(data.len() as u32).unwrap();
                },
                DEVICE_READ => {
                    let n = pending.len().min(3);
                    let piece:Vec<u8> = pending.drain(..n).collect();
                    reply.pack_i32(0).unwrap();
                    reply.pack_i32(if pending.is_empty() { REASON_END } else { 0 }).unwrap();
                    reply.pack_variable_len_opaque(&piece).unwrap();
                },
                DESTROY_LINK => reply.pack_i32(0).unwrap(),
                other => panic!("unexpected procedure {}", other),
            }
        })
    }

    #[test]
    fn write_is_chunked_and_read_reassembles_until_end() {
        let (port, server) = echo_device(4);

        let mut core = CoreClient::connect_port("127.0.0.1", port, Duration::from_secs(2)).unwrap();
        core.create_link(DEFAULT_DEVICE).unwrap();
        assert_eq!(core.link().unwrap().link_id, 17);

        let ans = core.ask(b"*IDN?\n").unwrap();
        assert_eq!(ans, b"*IDN?\n".to_vec());

        core.destroy_link().unwrap();
        assert!(core.link().is_none());
        assert!(core.destroy_link().is_err());

        drop(core);
        server.join().unwrap();
    }

    #[test]
    fn io_timeout_code_maps_to_timed_out() {
        assert_eq!(device_error(15).unwrap_err().kind(), ErrorKind::TimedOut);
        assert!(device_error(0).is_ok());
    }
}
