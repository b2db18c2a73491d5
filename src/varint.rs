//! Mumble's self-delimiting varint format.
//!
//! [`ReadExt`]/[`WriteExt`]/[`BufMutExt`] below handle the unsigned magnitude
//! encoding and are used internally wherever a field is known to never be
//! negative (session IDs, sequence numbers, voice-frame lengths) -- this is
//! the same extension-trait shape the teacher repo uses for those fields.
//! [`encode`]/[`decode`] implement the full signed format (including the
//! negation prefix and short negative forms) for fields like the UDP-tunnel
//! ping timestamp that the data model allows to be negative.

use crate::error::{Result, TrumbleError};
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;
use bytes::BufMut;
use bytes::BytesMut;
use std::io;

/// Extension trait for reading unsigned varint values.
pub trait ReadExt: io::Read {
    /// Reads a 64-bit unsigned varint.
    fn read_varint(&mut self) -> io::Result<u64>;
}

/// Extension trait for writing unsigned varint values.
pub trait WriteExt: io::Write {
    /// Writes a 64-bit unsigned varint.
    fn write_varint(&mut self, val: u64) -> io::Result<()>;
}

/// Extension trait for writing unsigned varint values to [`BufMut`]s.
pub trait BufMutExt: BufMut {
    /// Writes a 64-bit unsigned varint.
    fn put_varint(&mut self, val: u64);
}

impl<T: io::Read> ReadExt for T {
    fn read_varint(&mut self) -> io::Result<u64> {
        let b0 = self.read_u8()?;
        if (b0 & 0b1000_0000) == 0 {
            return Ok(u64::from(b0 & 0b0111_1111));
        }
        let b1 = self.read_u8()?;
        if (b0 & 0b0100_0000) == 0 {
            return Ok(u64::from(b0 & 0b0011_1111) << 8 | u64::from(b1));
        }
        let b2 = self.read_u8()?;
        if (b0 & 0b0010_0000) == 0 {
            return Ok(u64::from(b0 & 0b0001_1111) << 16 | u64::from(b1) << 8 | u64::from(b2));
        }
        let b3 = self.read_u8()?;
        if (b0 & 0b0001_0000) == 0 {
            return Ok(u64::from(b0 & 0x0F) << 24 | u64::from(b1) << 16 | u64::from(b2) << 8 | u64::from(b3));
        }
        let b4 = self.read_u8()?;
        if (b0 & 0b0000_0100) == 0 {
            return Ok(u64::from(b1) << 24 | u64::from(b2) << 16 | u64::from(b3) << 8 | u64::from(b4));
        }
        let b5 = self.read_u8()?;
        let b6 = self.read_u8()?;
        let b7 = self.read_u8()?;
        let b8 = self.read_u8()?;
        Ok(u64::from(b1) << 56
            | u64::from(b2) << 48
            | u64::from(b3) << 40
            | u64::from(b4) << 32
            | u64::from(b5) << 24
            | u64::from(b6) << 16
            | u64::from(b7) << 8
            | u64::from(b8))
    }
}

impl<T: io::Write> WriteExt for T {
    fn write_varint(&mut self, value: u64) -> io::Result<()> {
        if value > 0xffff_ffff {
            self.write_u8(0b1111_0100)?;
            self.write_u8((value >> 56) as u8)?;
            self.write_u8((value >> 48) as u8)?;
            self.write_u8((value >> 40) as u8)?;
            self.write_u8((value >> 32) as u8)?;
            self.write_u8((value >> 24) as u8)?;
            self.write_u8((value >> 16) as u8)?;
            self.write_u8((value >> 8) as u8)?;
            return self.write_u8(value as u8);
        }

        if value > 0x0fff_ffff {
            self.write_u8(0b1111_0000)?;
            self.write_u8((value >> 24) as u8)?;
            self.write_u8((value >> 16) as u8)?;
            self.write_u8((value >> 8) as u8)?;
            return self.write_u8(value as u8);
        }

        if value > 0x001f_ffff {
            self.write_u8(0b1110_0000 | (value >> 24) as u8)?;
            self.write_u8((value >> 16) as u8)?;
            self.write_u8((value >> 8) as u8)?;
            return self.write_u8(value as u8);
        }

        if value > 0x0000_3fff {
            self.write_u8(0b1100_0000 | (value >> 16) as u8)?;
            self.write_u8((value >> 8) as u8)?;
            return self.write_u8(value as u8);
        }

        if value > 0x0000_007f {
            self.write_u8(0b1000_0000 | (value >> 8) as u8)?;
            return self.write_u8(value as u8);
        }

        self.write_u8(value as u8)
    }
}

impl<T: BufMut> BufMutExt for T {
    fn put_varint(&mut self, val: u64) {
        self.writer().write_varint(val).expect("BufMut::writer never errors");
    }
}

/// Encodes a signed varint per the full table in the data model, including
/// the short negative forms (`-1..=-4`) and the negation prefix.
pub fn encode(value: i64) -> BytesMut {
    let mut buf = BytesMut::new();
    encode_into(value, &mut buf);
    buf
}

fn encode_into(value: i64, buf: &mut BytesMut) {
    if value >= 0 {
        buf.put_varint(value as u64);
    } else if value >= -4 {
        buf.put_u8(0b1111_1100 | (!value as u8 & 0b11));
    } else {
        // `-value` overflows for `i64::MIN` (its magnitude, 2^63, has no
        // positive `i64` representation), so take the magnitude as `u64`
        // and write it as a plain unsigned varint rather than recursing.
        buf.put_u8(0b1111_1000);
        buf.put_varint(value.unsigned_abs());
    }
}

/// Decodes a signed varint, returning the value and the unconsumed
/// remainder of `data`.
pub fn decode(data: &[u8]) -> Result<(i64, &[u8])> {
    let b0 = *data.first().ok_or(TrumbleError::TruncatedVarint)?;

    if b0 & 0b1111_1100 == 0b1111_1000 {
        // The magnitude following the negation prefix is written as a
        // plain unsigned varint (see `encode_into`), not a recursive
        // signed one -- decode it as `u64` and special-case 2^63 so
        // negating it doesn't overflow `i64` (that magnitude is exactly
        // `i64::MIN`, which has no positive `i64` counterpart).
        let mut cursor = io::Cursor::new(&data[1..]);
        let magnitude = cursor.read_varint().map_err(|_| TrumbleError::TruncatedVarint)?;
        let consumed = 1 + cursor.position() as usize;
        let value = if magnitude == 1u64 << 63 { i64::MIN } else { -(magnitude as i64) };
        return Ok((value, &data[consumed..]));
    }

    if b0 & 0b1111_1100 == 0b1111_1100 {
        return Ok((!(i64::from(b0 & 0b11)), &data[1..]));
    }

    let mut cursor = io::Cursor::new(data);
    let value = cursor.read_varint().map_err(|_| TrumbleError::TruncatedVarint)?;
    let consumed = cursor.position() as usize;
    Ok((value as i64, &data[consumed..]))
}
