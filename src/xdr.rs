
use std::io::{Cursor, Read};

use byteorder::{BigEndian, WriteBytesExt, ReadBytesExt};

use crate::error::{self, Result};

#[derive(Default)]
pub struct Packer{
	buff:Vec<u8>
}

#[derive(Default)]
pub struct Unpacker {
	rdr:Cursor<Vec<u8>>
}

fn pad_len(n:usize) -> usize { (4 - n % 4) % 4 }

impl Packer {

	pub fn new() -> Self { Packer{buff: Vec::new()} }

	pub fn reset(&mut self) { self.buff.clear(); }

	pub fn as_bytes(&self) -> &[u8] { &self.buff }

	// Packing methods that can only add multiples of four bytes, so if we started off with the correct
	// padding, we'll end up with the correct padding
	pub fn pack_u32(&mut self, x:u32) -> Result<()> { Ok(self.buff.write_u32::<BigEndian>(x)?) }
	pub fn pack_i32(&mut self, x:i32) -> Result<()> { Ok(self.buff.write_i32::<BigEndian>(x)?) }

	pub fn pack_bool(&mut self, b:bool) -> Result<()> { self.pack_i32(if b { 1 } else { 0 }) }

	pub fn pack_enum(&mut self, x:i32) -> Result<()> { self.pack_i32(x) }

	// Packing methods that require padding at the end
	pub fn pack_variable_len_opaque(&mut self, data:&[u8]) -> Result<()> {
		self.pack_u32(data.len() as u32)?;
		self.buff.extend_from_slice(data);
		self.buff.resize(self.buff.len() + pad_len(data.len()), 0);
		Ok(())
	}

	pub fn pack_string(&mut self, s:&str) -> Result<()> {
		if !s.is_ascii() { return Err(error::protocol(format!("XDR strings must be ASCII: {:?}", s))); }
		self.pack_variable_len_opaque(s.as_bytes())
	}

}

impl Unpacker {

	pub fn new() -> Self { Self::default() }

	pub fn reset(&mut self, data:&[u8]) {
		self.rdr = Cursor::new(data.to_vec());
	}

	pub fn remaining(&self) -> usize {
		self.rdr.get_ref().len().saturating_sub(self.rdr.position() as usize)
	}

	pub fn all_data_consumed(&self) -> bool { self.remaining() == 0 }

	pub fn unpack_u32(&mut self) -> Result<u32> {
		self.rdr.read_u32::<BigEndian>().map_err(|_| error::protocol("Tried to unpack a u32 past the end of the buffer"))
	}
	pub fn unpack_i32(&mut self) -> Result<i32> {
		self.rdr.read_i32::<BigEndian>().map_err(|_| error::protocol("Tried to unpack an i32 past the end of the buffer"))
	}

	// An enum is just an i32 with a restricted set of values.  We can't check that this value is in the restricted set at this
	// level because it depends on the application, so for our purposes here, an enum is the same as an i32
	pub fn unpack_enum(&mut self) -> Result<i32> { self.unpack_i32() }

	pub fn unpack_bool(&mut self) -> Result<bool> {
		match self.unpack_i32()? {
			0 => Ok(false),
			1 => Ok(true),
			x => Err(error::protocol(format!("Expected 0 or 1 in unpack_bool but got {}", x))),
		}
	}

	pub fn unpack_variable_len_opaque(&mut self) -> Result<Vec<u8>> {
		let n = self.unpack_u32()? as usize;
		if n + pad_len(n) > self.remaining() {
			return Err(error::protocol(format!("Opaque length {} runs past the end of the buffer", n)));
		}

		let mut ans = vec![0u8; n];
		self.rdr.read_exact(&mut ans)?;

		// Skip the padding to maintain alignment
		self.rdr.set_position(self.rdr.position() + pad_len(n) as u64);
		Ok(ans)
	}

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
		assert_eq!(u.unpack_variable_len_opaque().unwrap(), b"inst0");
		assert!(u.all_data_consumed());
	}

	#[test]
	fn bad_bool_is_an_error() {
		let mut u = Unpacker::new();
		u.reset(&[0, 0, 0, 7]);
		assert!(u.unpack_bool().is_err());
	}

	#[test]
	fn truncated_buffer_is_an_error() {
		let mut u = Unpacker::new();
		u.reset(&[0, 0, 1]);
		assert!(u.unpack_u32().is_err());

		u.reset(&[0, 0, 0, 9, 1, 2]);
		assert!(u.unpack_variable_len_opaque().is_err());
	}

	#[test]
	fn non_ascii_strings_are_rejected() {
		let mut p = Packer::new();
		assert!(p.pack_string("gpib0,25").is_ok());
		assert!(p.pack_string("µ").is_err());
	}
}
