
use std::io;
use std::time::Duration;

use log::{debug, warn};

use crate::vxi11::CoreClient;
use super::Transport;

/// SCPI messages over a VXI-11 core channel link.
pub struct Vxi11Transport {
	core: CoreClient,
	host: String,
	closed: bool,
}

impl Vxi11Transport {

	pub fn open(host:&str, device:&str, timeout:Duration) -> io::Result<Self> {
		let mut core = CoreClient::new(host, timeout)?;
		core.create_link(device)?;
		Ok(Self{ core, host: host.to_owned(), closed: false })
	}

}

impl Transport for Vxi11Transport {

	fn write_bytes(&mut self, data:&[u8]) -> io::Result<()> { self.core.write(data) }

	fn read_bytes(&mut self) -> io::Result<Vec<u8>> { self.core.read() }

	fn set_timeout(&mut self, timeout:Duration) -> io::Result<()> { self.core.set_io_timeout(timeout) }

	fn close(&mut self) -> io::Result<()> {
		if self.closed { return Ok(()); }
		self.closed = true;

		if self.core.link().is_some() {
			self.core.destroy_link()?;
			debug!("VXI-11 link to {} destroyed", self.host);
		}
		Ok(())
	}

}

impl Drop for Vxi11Transport {

	fn drop(&mut self) {
		if let Err(e) = self.close() {
			warn!("Unable to destroy VXI-11 link to {}: {}", self.host, e);
		}
	}

}
