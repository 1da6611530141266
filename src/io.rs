//! Byte-order helpers shared by the typed read/write surface.

use smallvec::SmallVec;

use crate::config::{Endianness, IntWidth};

/// Packs `value` into `width` bytes with the requested byte order.
///
/// [`Endianness::Default`] packs big endian. A two-byte width silently
/// truncates the high bits.
pub fn pack_int(value: i32, endianness: Endianness, width: IntWidth) -> SmallVec<[u8; 4]> {
	let mut out = SmallVec::new();
	match width {
		IntWidth::Two => {
			let v = value as u16;
			match endianness {
				Endianness::Little => out.extend_from_slice(&v.to_le_bytes()),
				Endianness::Big | Endianness::Default => out.extend_from_slice(&v.to_be_bytes()),
			}
		}
		IntWidth::Four => {
			let v = value as u32;
			match endianness {
				Endianness::Little => out.extend_from_slice(&v.to_le_bytes()),
				Endianness::Big | Endianness::Default => out.extend_from_slice(&v.to_be_bytes()),
			}
		}
	}
	out
}

/// Packs each value in array order and concatenates the results.
pub fn pack_int_array(values: &[i32], endianness: Endianness, width: IntWidth) -> Vec<u8> {
	let mut out = Vec::with_capacity(values.len() * usize::from(u8::from(width)));
	for &value in values {
		out.extend_from_slice(&pack_int(value, endianness, width));
	}
	out
}

/// Decodes `width` bytes back into an integer; the inverse of [`pack_int`]
/// modulo the width truncation.
pub fn unpack_int(bytes: &[u8], endianness: Endianness, width: IntWidth) -> i32 {
	match width {
		IntWidth::Two => {
			let raw: [u8; 2] = [bytes[0], bytes[1]];
			let v = match endianness {
				Endianness::Little => u16::from_le_bytes(raw),
				Endianness::Big | Endianness::Default => u16::from_be_bytes(raw),
			};
			i32::from(v)
		}
		IntWidth::Four => {
			let raw: [u8; 4] = [bytes[0], bytes[1], bytes[2], bytes[3]];
			let v = match endianness {
				Endianness::Little => u32::from_le_bytes(raw),
				Endianness::Big | Endianness::Default => u32::from_be_bytes(raw),
			};
			v as i32
		}
	}
}
