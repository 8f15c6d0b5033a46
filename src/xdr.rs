
extern crate byteorder;

use std::io::{self, Error, ErrorKind, Cursor};

use byteorder::{BigEndian, WriteBytesExt, ReadBytesExt};

pub struct Packer{
	pub buff:Vec<u8>
}

pub struct Unpacker {
	buff:Vec<u8>,
	pos:usize,
}

fn err(msg:&str) -> io::Error { Error::new(ErrorKind::InvalidData, msg) }

impl Packer {

	pub fn new() -> Self { Packer{buff: Vec::new()} }

	pub fn reset(&mut self) { self.buff.clear(); }

	pub fn as_bytes(&self) -> &[u8] { &self.buff }

	// Packing methods that can only add multiples of four bytes, so if we started off with the correct
	// padding, we'll end up with the correct padding
	pub fn pack_u32(&mut self, x:u32) -> io::Result<()> { self.buff.write_u32::<BigEndian>(x) }
	pub fn pack_i32(&mut self, x:i32) -> io::Result<()> { self.buff.write_i32::<BigEndian>(x) }

	pub fn pack_bool(&mut self, b:bool) -> io::Result<()> {
		if b { self.pack_i32(1) }
		else { self.pack_i32(0) }
	}

	pub fn pack_enum(&mut self, x:i32) -> io::Result<()> { self.pack_i32(x) }

	// Packing methods that require padding checks at the end
	pub fn pack_variable_len_opaque(&mut self, data:&[u8]) -> io::Result<()> {
		self.pack_u32(data.len() as u32)?;
		self.buff.extend_from_slice(data);

		// Ensure alignment
		while self.buff.len() % 4 != 0 { self.buff.push(0); }
		Ok(())
	}

	pub fn pack_string(&mut self, s:&str) -> io::Result<()> {
		if !s.is_ascii() { return Err(err("XDR strings must be ASCII")); }
		self.pack_variable_len_opaque(s.as_bytes())
	}

}

impl Default for Packer {
	fn default() -> Self { Self::new() }
}

impl Unpacker {

	pub fn new() -> Self { Unpacker{buff: Vec::new(), pos: 0} }

	pub fn reset(&mut self, data:&[u8]) {
		self.buff.clear();
		self.buff.extend_from_slice(data);
		self.pos = 0;
	}

	pub fn remaining(&self) -> usize { self.buff.len() - self.pos }
	pub fn all_data_consumed(&self) -> bool { self.remaining() == 0 }

	pub fn skip(&mut self, n:usize) -> io::Result<()> {
		if n%4 != 0 {
			return Err(err("Only skip multiples of four bytes in order to maintain alignment"));
		}
		if n > self.remaining() { return Err(err("Tried to skip past the end of the buffer")) }
		self.pos += n;
		Ok(())
	}

	pub fn remaining_bytes(&self) -> &[u8] { &self.buff[self.pos..] }

	pub fn unpack_u32(&mut self) -> io::Result<u32> {
		let mut rdr = Cursor::new(self.remaining_bytes());
		let ans:u32 = rdr.read_u32::<BigEndian>()?;
		self.pos += 4;
		Ok(ans)
	}
	pub fn unpack_i32(&mut self) -> io::Result<i32> {
		let mut rdr = Cursor::new(self.remaining_bytes());
		let ans:i32 = rdr.read_i32::<BigEndian>()?;
		self.pos += 4;
		Ok(ans)
	}

	// An enum is just an i32 with a restricted set of values.  We can't check that this value is in the restricted set at this
	// level because it depends on the application, so for our purposes here, an enum is the same as an i32
	pub fn unpack_enum(&mut self) -> io::Result<i32> { self.unpack_i32() }

	pub fn unpack_bool(&mut self) -> io::Result<bool> {
		match self.unpack_i32()? {
			0 => Ok(false),
			1 => Ok(true),
			_ => Err(err("Expected 0 or 1 for an XDR bool")),
		}
	}

	pub fn unpack_variable_len_opaque(&mut self) -> io::Result<Vec<u8>> {
		let n = self.unpack_u32()? as usize;
		if n > self.remaining() { return Err(err("Opaque length runs past the end of the buffer")) }

		let ans:Vec<u8> = self.buff[self.pos..(self.pos + n)].to_vec();
		self.pos += n;

		// Skip padding to maintain alignment
		let pad = (4 - n % 4) % 4;
		self.pos = (self.pos + pad).min(self.buff.len());
		Ok(ans)
	}

}

impl Default for Unpacker {
	fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn opaque_is_padded_to_four_bytes() {
		let mut p = Packer::new();
		p.pack_variable_len_opaque(b"inst0").unwrap();
		assert_eq!(p.as_bytes(), &[0, 0, 0, 5, b'i', b'n', b's', b't', b'0', 0, 0, 0]);

		let mut u = Unpacker::new();
		u.reset(p.as_bytes());
		assert_eq!(u.unpack_variable_len_opaque().unwrap(), b"inst0".to_vec());
		assert!(u.all_data_consumed());
	}

	#[test]
	fn bool_outside_zero_one_is_an_error() {
		let mut u = Unpacker::new();
		u.reset(&[0, 0, 0, 7]);
		assert!(u.unpack_bool().is_err());
	}

	#[test]
	fn truncated_opaque_is_an_error() {
		let mut u = Unpacker::new();
		u.reset(&[0, 0, 0, 9, 1, 2, 3, 4]);
		assert!(u.unpack_variable_len_opaque().is_err());
	}
}
