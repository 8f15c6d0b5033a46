//! IEEE 488.2 arbitrary block data: `#<digits><length><payload>` or `#0<payload>\n`.

use std::io::{self, Cursor, Error, ErrorKind};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

fn err(msg:&str) -> io::Error { Error::new(ErrorKind::InvalidData, msg) }

/// Returns the payload of a block response, ignoring anything after it (usually the terminator).
pub fn parse_block(raw:&[u8]) -> io::Result<&[u8]> {
	let start = raw.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(raw.len());
	let raw = &raw[start..];

	if raw.first() != Some(&b'#') {
		return Err(err("Block data must start with '#'"));
	}

	let n_digits:usize = match raw.get(1) {
		Some(d) if d.is_ascii_digit() => (d - b'0') as usize,
		_ => return Err(err("Missing digit count after '#' in block header")),
	};

	if n_digits == 0 {
		// Indefinite length, terminated by the message end
		let body = &raw[2..];
		let end = if body.last() == Some(&b'\n') { body.len() - 1 } else { body.len() };
		return Ok(&body[..end]);
	}

	let len_field = raw.get(2..(2 + n_digits)).ok_or_else(|| err("Block header truncated"))?;
	let len:usize = std::str::from_utf8(len_field).ok()
		.and_then(|s| s.parse::<usize>().ok())
		.ok_or_else(|| err("Block length field is not a decimal number"))?;

	let body_start = 2 + n_digits;
	raw.get(body_start..(body_start + len)).ok_or_else(|| err("Block shorter than its declared length"))
}

pub fn encode_block(payload:&[u8]) -> Vec<u8> {
	let len = payload.len().to_string();
	let mut ans:Vec<u8> = Vec::with_capacity(payload.len() + len.len() + 3);
	ans.push(b'#');
	ans.extend_from_slice(len.len().to_string().as_bytes());
	ans.extend_from_slice(len.as_bytes());
	ans.extend_from_slice(payload);
	ans
}

/// Decodes packed little-endian single precision floats (`FORM REAL,32`).
pub fn decode_f32_le(payload:&[u8]) -> io::Result<Vec<f32>> {
	if payload.len() % 4 != 0 {
		return Err(err("REAL,32 payload is not a multiple of four bytes"));
	}

	let mut rdr = Cursor::new(payload);
	let mut ans:Vec<f32> = Vec::with_capacity(payload.len() / 4);
	for _ in 0..(payload.len() / 4) {
		ans.push(rdr.read_f32::<LittleEndian>()?);
	}

	Ok(ans)
}

pub fn encode_f32_le(samples:&[f32]) -> Vec<u8> {
	let mut ans:Vec<u8> = Vec::with_capacity(samples.len() * 4);
	for s in samples {
		// Writing into a Vec can't fail
		let _ = ans.write_f32::<LittleEndian>(*s);
	}
	ans
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn definite_block_ignores_terminator() {
		let raw = b"#15hello\n";
		assert_eq!(parse_block(raw).unwrap(), b"hello");
	}

	#[test]
	fn indefinite_block_runs_to_message_end() {
		assert_eq!(parse_block(b"#0abc\n").unwrap(), b"abc");
	}

	#[test]
	fn short_block_is_rejected() {
		let e = parse_block(b"#210abc").unwrap_err();
		assert_eq!(e.kind(), ErrorKind::InvalidData);
	}

	#[test]
	fn non_block_response_is_rejected() {
		assert!(parse_block(b"1.0,2.0").is_err());
		assert!(parse_block(b"#x").is_err());
	}

	#[test]
	fn floats_decode_from_little_endian_block() {
		let payload = encode_f32_le(&[0.5, -1.25, 3.0e-3]);
		let block = encode_block(&payload);
		assert_eq!(&block[..3], b"#21");

		let samples = decode_f32_le(parse_block(&block).unwrap()).unwrap();
		assert_eq!(samples, vec![0.5, -1.25, 3.0e-3]);
	}

	#[test]
	fn ragged_float_payload_is_rejected() {
		assert!(decode_f32_le(&[0, 0, 0]).is_err());
	}
}
