//! Bounded walk over encoded AMQP values.
//!
//! [`value_len`] finds where one encoded value ends without decoding it. Every size and count
//! is checked against the bytes that are actually there and nesting is limited to
//! [`MAX_NESTING`] levels, so a slice accepted here can be handed to the deserializer without
//! unbounded recursion or allocation driven by the peer.

use crate::{primitives::Symbol, Descriptor, Error};

/// Deepest nesting of described, compound and array values that is accepted
pub const MAX_NESTING: usize = 32;

const DESCRIBED: u8 = 0x00;

/// Number of bytes taken by the first encoded value in `buf`
pub fn value_len(buf: &[u8]) -> Result<usize, Error> {
    let mut cursor = Cursor::new(buf);
    cursor.value(0)?;
    Ok(cursor.pos)
}

/// Reads the descriptor of a described value without consuming it.
///
/// Returns `Ok(None)` if `buf` does not start with a described value. Only `ulong` and
/// `symbol` descriptors are recognized.
pub fn peek_descriptor(buf: &[u8]) -> Result<Option<Descriptor>, Error> {
    let mut cursor = Cursor::new(buf);
    if cursor.u8()? != DESCRIBED {
        return Ok(None);
    }
    let descriptor = match cursor.u8()? {
        0x44 => Descriptor::Code(0),
        0x53 => Descriptor::Code(cursor.u8()? as u64),
        0x80 => {
            let bytes = cursor.take(8)?;
            let mut code = [0u8; 8];
            code.copy_from_slice(bytes);
            Descriptor::Code(u64::from_be_bytes(code))
        }
        0xa3 => {
            let len = cursor.u8()? as usize;
            Descriptor::Name(symbol(cursor.take(len)?)?)
        }
        0xb3 => {
            let len = cursor.u32()? as usize;
            Descriptor::Name(symbol(cursor.take(len)?)?)
        }
        other => return Err(Error::InvalidFormatCode(other)),
    };
    Ok(Some(descriptor))
}

fn symbol(bytes: &[u8]) -> Result<Symbol, Error> {
    std::str::from_utf8(bytes)
        .map(Symbol::from)
        .map_err(|_| Error::InvalidValue("descriptor symbol is not ASCII".to_string()))
}

fn nested(depth: usize) -> Result<usize, Error> {
    match depth < MAX_NESTING {
        true => Ok(depth + 1),
        false => Err(Error::TooDeep),
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn u8(&mut self) -> Result<u8, Error> {
        let byte = *self.buf.get(self.pos).ok_or(Error::UnexpectedEof)?;
        self.pos += 1;
        Ok(byte)
    }

    fn u32(&mut self) -> Result<u32, Error> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], Error> {
        let end = self.pos.checked_add(n).ok_or(Error::UnexpectedEof)?;
        let bytes = self.buf.get(self.pos..end).ok_or(Error::UnexpectedEof)?;
        self.pos = end;
        Ok(bytes)
    }

    /// Reads a size or count of `width` bytes
    fn width(&mut self, width: usize) -> Result<usize, Error> {
        match width {
            1 => self.u8().map(usize::from),
            _ => self.u32().map(|n| n as usize),
        }
    }

    fn value(&mut self, depth: usize) -> Result<(), Error> {
        let code = self.u8()?;
        if code == DESCRIBED {
            let depth = nested(depth)?;
            self.value(depth)?; // descriptor
            return self.value(depth);
        }
        self.body(code, depth)
    }

    /// Skips what follows a format code. Array elements share one constructor and only have
    /// this part encoded.
    fn body(&mut self, code: u8, depth: usize) -> Result<(), Error> {
        match code {
            0x40..=0x45 => {}
            0x50..=0x56 => {
                self.take(1)?;
            }
            0x60 | 0x61 => {
                self.take(2)?;
            }
            0x70..=0x74 => {
                self.take(4)?;
            }
            0x80..=0x84 => {
                self.take(8)?;
            }
            0x94 | 0x98 => {
                self.take(16)?;
            }
            0xa0 | 0xa1 | 0xa3 => {
                let len = self.u8()? as usize;
                self.take(len)?;
            }
            0xb0 | 0xb1 | 0xb3 => {
                let len = self.u32()? as usize;
                self.take(len)?;
            }
            0xc0 | 0xc1 => self.compound(code == 0xc1, 1, depth)?,
            0xd0 | 0xd1 => self.compound(code == 0xd1, 4, depth)?,
            0xe0 => self.array(1, depth)?,
            0xf0 => self.array(4, depth)?,
            other => return Err(Error::InvalidFormatCode(other)),
        }
        Ok(())
    }

    /// Splits off the region covered by a size field. The region starts with the count.
    fn region(&mut self, width: usize) -> Result<(Cursor<'a>, usize), Error> {
        let size = self.width(width)?;
        if size < width {
            return Err(Error::InvalidLength("size does not cover the count"));
        }
        let mut region = Cursor::new(self.take(size)?);
        let count = region.width(width)?;
        // Every item takes at least one byte, except inside an array of zero width
        // elements where the count is still held to the size of the region
        if count > region.remaining() {
            return Err(Error::InvalidLength("count exceeds the encoded size"));
        }
        Ok((region, count))
    }

    fn compound(&mut self, is_map: bool, width: usize, depth: usize) -> Result<(), Error> {
        let depth = nested(depth)?;
        let (mut region, count) = self.region(width)?;
        if is_map && count % 2 != 0 {
            return Err(Error::InvalidLength("map with an odd number of items"));
        }
        for _ in 0..count {
            region.value(depth)?;
        }
        region.finish()
    }

    fn array(&mut self, width: usize, depth: usize) -> Result<(), Error> {
        let depth = nested(depth)?;
        let (mut region, count) = self.region(width)?;
        let mut constructor = region.u8()?;
        if constructor == DESCRIBED {
            region.value(depth)?;
            constructor = region.u8()?;
        }
        for _ in 0..count {
            region.body(constructor, depth)?;
        }
        region.finish()
    }

    fn finish(&self) -> Result<(), Error> {
        match self.remaining() {
            0 => Ok(()),
            _ => Err(Error::InvalidLength("items do not fill the encoded size")),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use serde_amqp::to_vec;

    use crate::{
        definitions::AmqpError, performatives::Close, primitives::Symbol, Descriptor, Error,
    };

    use super::{peek_descriptor, value_len, MAX_NESTING};

    #[test]
    fn length_of_encoded_performative() {
        let close = Close {
            error: Some(crate::definitions::Error::new(
                AmqpError::InternalError,
                Some("boom".into()),
                None,
            )),
        };
        let mut buf = to_vec(&close).unwrap();
        let len = buf.len();
        buf.extend_from_slice(b"trailing payload");
        assert_eq!(value_len(&buf), Ok(len));
    }

    #[test]
    fn scalars_and_variable_width() {
        assert_eq!(value_len(&[0x40]), Ok(1));
        assert_eq!(value_len(&[0x52, 0x05, 0xff]), Ok(2));
        assert_eq!(value_len(&[0xa1, 0x02, b'h', b'i']), Ok(4));
        assert_eq!(value_len(&[0xb0, 0, 0, 0, 1, 0xaa]), Ok(6));
        assert_eq!(value_len(&[0xa1, 0x05, b'h']), Err(Error::UnexpectedEof));
        assert_eq!(value_len(&[0x3f]), Err(Error::InvalidFormatCode(0x3f)));
    }

    #[test]
    fn array_count_must_fit_the_array() {
        // list32 holding an array32 that claims 50_000_000 nulls in five bytes
        let buf = [
            0xd0, 0x00, 0x00, 0x00, 0x0e, 0x00, 0x00, 0x00, 0x01, // list32 size count
            0xf0, 0x00, 0x00, 0x00, 0x05, 0x02, 0xfa, 0xf0, 0x80, 0x40, // array32 of null
        ];
        let started = Instant::now();
        assert!(matches!(value_len(&buf), Err(Error::InvalidLength(_))));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn array_of_fixed_width_elements() {
        // three smalluints
        let buf = [0xe0, 0x05, 0x03, 0x52, 0x01, 0x02, 0x03];
        assert_eq!(value_len(&buf), Ok(buf.len()));

        // count says three, only two elements present
        let buf = [0xe0, 0x04, 0x03, 0x52, 0x01, 0x02];
        assert!(value_len(&buf).is_err());
    }

    #[test]
    fn list_count_must_fit_the_list() {
        let buf = [0xc0, 0x01, 0xff];
        assert!(matches!(value_len(&buf), Err(Error::InvalidLength(_))));

        // size zero does not even cover the count
        let buf = [0xc0, 0x00];
        assert!(matches!(value_len(&buf), Err(Error::InvalidLength(_))));
    }

    #[test]
    fn list_items_must_fill_the_list() {
        let buf = [0xc0, 0x03, 0x01, 0x40, 0x40];
        assert!(matches!(value_len(&buf), Err(Error::InvalidLength(_))));
    }

    #[test]
    fn map_needs_pairs() {
        let buf = [0xc1, 0x02, 0x01, 0x40];
        assert!(matches!(value_len(&buf), Err(Error::InvalidLength(_))));
    }

    #[test]
    fn descriptor_chain_is_bounded() {
        let mut buf = vec![0x00; 60_000];
        buf.extend_from_slice(&[0x53, 0x10, 0x45]);
        assert_eq!(value_len(&buf), Err(Error::TooDeep));
    }

    fn nested_lists(levels: usize) -> Vec<u8> {
        let mut buf = vec![0x45];
        for _ in 0..levels {
            let mut outer = vec![0xc0, buf.len() as u8 + 1, 0x01];
            outer.extend_from_slice(&buf);
            buf = outer;
        }
        buf
    }

    #[test]
    fn nested_lists_are_bounded() {
        let buf = nested_lists(MAX_NESTING);
        assert_eq!(value_len(&buf), Ok(buf.len()));

        let buf = nested_lists(MAX_NESTING + 1);
        assert_eq!(value_len(&buf), Err(Error::TooDeep));
    }

    #[test]
    fn peek_code_and_name() {
        assert_eq!(
            peek_descriptor(&[0x00, 0x53, 0x10, 0x45]),
            Ok(Some(Descriptor::Code(0x10)))
        );
        let mut buf = vec![0x00, 0xa3, 0x0d];
        buf.extend_from_slice(b"amqp:end:list");
        buf.push(0x45);
        assert_eq!(
            peek_descriptor(&buf),
            Ok(Some(Descriptor::Name(Symbol::from("amqp:end:list"))))
        );
        assert_eq!(peek_descriptor(&[0x45]), Ok(None));
    }
}
