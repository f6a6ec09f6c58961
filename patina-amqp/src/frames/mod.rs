//! AMQP and SASL frames and their codecs
//!
//! ```text
//!              +0       +1       +2       +3
//!         +-----------------------------------+ -.
//!       0 |                SIZE               |  |
//!         +-----------------------------------+  |---> Frame Header
//!       4 |  DOFF  |  TYPE  | <TYPE-SPECIFIC> |  |      (8 bytes)
//!         +-----------------------------------+ -'
//!         +-----------------------------------+ -.
//!       8 |                ...                |  |
//!         .                                   .  |---> Extended Header
//!         .          <IGNORED>                .  |  (DOFF * 4 - 8) bytes
//!         |                ...                |  |
//!         +-----------------------------------+ -'
//!         +-----------------------------------+ -.
//! 4*DOFF  |                                   |  |
//!         .                                   .  |
//!         .                                   .  |
//!         .           FRAME BODY              .  |---> Frame Body
//!         .                                   .  |  (SIZE - DOFF * 4) bytes
//!         .                                   .  |
//!         |                                   |  |
//!         +-----------------------------------+ -'
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

pub mod amqp;
pub mod sasl;

mod error;
pub use error::Error;

pub const FRAME_TYPE_AMQP: u8 = 0x00;
pub const FRAME_TYPE_SASL: u8 = 0x01;

/// Size of the fixed frame header
pub const FRAME_HEADER_SIZE: usize = 8;

/// Splits one complete frame off `src`.
///
/// Returns `Ok(None)` when `src` does not hold a complete frame yet. The returned body starts
/// after the extended header.
pub(crate) fn split_frame(
    src: &mut BytesMut,
    max_frame_size: usize,
    frame_type: u8,
) -> Result<Option<(u16, Bytes)>, Error> {
    if src.len() < 4 {
        return Ok(None);
    }
    let size = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
    if size < FRAME_HEADER_SIZE {
        return Err(Error::malformed(format!(
            "frame size {} is smaller than the frame header",
            size
        )));
    }
    if size > max_frame_size {
        return Err(Error::malformed(format!(
            "frame size {} exceeds max frame size {}",
            size, max_frame_size
        )));
    }
    if src.len() < size {
        src.reserve(size - src.len());
        return Ok(None);
    }

    let mut frame = src.split_to(size).freeze();
    frame.advance(4);
    let doff = frame.get_u8() as usize * 4;
    let ftype = frame.get_u8();
    let channel = frame.get_u16();

    if doff < FRAME_HEADER_SIZE {
        return Err(Error::malformed(format!("data offset {} is below 2", doff / 4)));
    }
    if doff > size {
        return Err(Error::malformed(format!(
            "data offset {} points beyond the frame of {} bytes",
            doff / 4,
            size
        )));
    }
    if ftype != frame_type {
        return Err(Error::malformed(format!(
            "expecting frame type {:#04x}, found {:#04x}",
            frame_type, ftype
        )));
    }
    frame.advance(doff - FRAME_HEADER_SIZE);
    Ok(Some((channel, frame)))
}

/// Writes a frame header followed by `body`. Extended headers are never written so doff is
/// always 2.
pub(crate) fn write_frame(
    dst: &mut BytesMut,
    frame_type: u8,
    channel: u16,
    body: &[u8],
    max_frame_size: usize,
) -> Result<(), Error> {
    let size = FRAME_HEADER_SIZE + body.len();
    if size > max_frame_size {
        return Err(Error::malformed(format!(
            "frame of {} bytes exceeds max frame size {}",
            size, max_frame_size
        )));
    }
    let size = u32::try_from(size)
        .map_err(|_| Error::malformed("frame size does not fit in 32 bits"))?;

    dst.reserve(size as usize);
    dst.put_u32(size);
    dst.put_u8(2); // doff
    dst.put_u8(frame_type);
    dst.put_u16(channel);
    dst.put_slice(body);
    Ok(())
}
