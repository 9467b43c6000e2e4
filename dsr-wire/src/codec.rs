//! Binary encoding of [`Frame`]s.
//!
//! On the wire every frame is prefixed with its length as a big-endian `u32`. The body is laid
//! out as follows:
//!
//! ```text
//! magic (u16) | l2 dst | l2 src | source | destination | option count (u8)
//! { option type (u8) | option length (u16) | option body }*
//! payload length (u32) | payload
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use dsr_common::{constants::MAX_ROUTE_LEN, Address};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use crate::{DsrOption, Frame, Hop, OptionType};

/// Marks the start of every frame body.
const MAGIC: u16 = 0xd5a1;
/// Maximum size of an encoded frame body.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;
/// Size of the fixed part of the frame body.
const FIXED_LEN: usize = 2 + 4 * 6 + 1;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0:?}")]
    Io(#[from] std::io::Error),
    #[error("Invalid magic: {0:#06x}")]
    Magic(u16),
    #[error("Truncated frame")]
    Truncated,
    #[error("Unknown option type: {0}")]
    UnknownOption(u8),
    #[error("Route too long: {0} addresses")]
    RouteTooLong(usize),
    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),
    #[error("Too many options: {0}")]
    TooManyOptions(usize),
}

impl Frame {
    /// Encodes the frame body (without the length prefix) into `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), Error> {
        if self.options.len() > u8::MAX as usize {
            return Err(Error::TooManyOptions(self.options.len()));
        }

        dst.put_u16(MAGIC);
        put_address(dst, &self.l2_dst);
        put_address(dst, &self.l2_src);
        put_address(dst, &self.source);
        put_address(dst, &self.destination);
        dst.put_u8(self.options.len() as u8);

        for option in &self.options {
            let mut body = BytesMut::new();
            encode_option(option, &mut body)?;
            dst.put_u8(option.option_type() as u8);
            dst.put_u16(body.len() as u16);
            dst.put(body);
        }

        dst.put_u32(self.payload.len() as u32);
        dst.put(self.payload.clone());

        Ok(())
    }

    /// Decodes a frame body (without the length prefix).
    pub fn decode(mut src: Bytes) -> Result<Self, Error> {
        ensure(&src, FIXED_LEN)?;

        let magic = src.get_u16();
        if magic != MAGIC {
            return Err(Error::Magic(magic));
        }

        let l2_dst = get_address(&mut src);
        let l2_src = get_address(&mut src);
        let source = get_address(&mut src);
        let destination = get_address(&mut src);
        let count = src.get_u8() as usize;

        let mut options = Vec::with_capacity(count);
        for _ in 0..count {
            ensure(&src, 3)?;
            let ty = src.get_u8();
            let len = src.get_u16() as usize;
            ensure(&src, len)?;
            let body = src.split_to(len);
            let ty = OptionType::try_from(ty).map_err(Error::UnknownOption)?;
            options.push(decode_option(ty, body)?);
        }

        ensure(&src, 4)?;
        let payload_len = src.get_u32() as usize;
        ensure(&src, payload_len)?;
        let payload = src.split_to(payload_len);

        Ok(Self { l2_src, l2_dst, source, destination, options, payload })
    }
}

fn encode_option(option: &DsrOption, dst: &mut BytesMut) -> Result<(), Error> {
    match option {
        DsrOption::RouteRequest { identification, target, ttl, route } => {
            dst.put_u16(*identification);
            put_address(dst, target);
            dst.put_u8(*ttl);
            put_route(dst, route)?;
        }
        DsrOption::RouteReply { route } => put_route(dst, route)?,
        DsrOption::RouteError { error_source, error_destination, unreachable } => {
            put_address(dst, error_source);
            put_address(dst, error_destination);
            put_address(dst, unreachable);
        }
        DsrOption::AckRequest { identification } => dst.put_u16(*identification),
        DsrOption::Ack { identification, source, destination } => {
            dst.put_u16(*identification);
            put_address(dst, source);
            put_address(dst, destination);
        }
        DsrOption::SourceRoute { segments_left, hops } => {
            if hops.len() > MAX_ROUTE_LEN {
                return Err(Error::RouteTooLong(hops.len()));
            }
            dst.put_u8(*segments_left);
            dst.put_u8(hops.len() as u8);
            hops.iter().for_each(|hop| put_address(dst, hop));
        }
    }

    Ok(())
}

fn decode_option(ty: OptionType, mut src: Bytes) -> Result<DsrOption, Error> {
    let option = match ty {
        OptionType::RouteRequest => {
            ensure(&src, 2 + 6 + 1)?;
            let identification = src.get_u16();
            let target = get_address(&mut src);
            let ttl = src.get_u8();
            let route = get_route(&mut src)?;
            DsrOption::RouteRequest { identification, target, ttl, route }
        }
        OptionType::RouteReply => DsrOption::RouteReply { route: get_route(&mut src)? },
        OptionType::RouteError => {
            ensure(&src, 3 * 6)?;
            DsrOption::RouteError {
                error_source: get_address(&mut src),
                error_destination: get_address(&mut src),
                unreachable: get_address(&mut src),
            }
        }
        OptionType::AckRequest => {
            ensure(&src, 2)?;
            DsrOption::AckRequest { identification: src.get_u16() }
        }
        OptionType::Ack => {
            ensure(&src, 2 + 2 * 6)?;
            DsrOption::Ack {
                identification: src.get_u16(),
                source: get_address(&mut src),
                destination: get_address(&mut src),
            }
        }
        OptionType::SourceRoute => {
            ensure(&src, 2)?;
            let segments_left = src.get_u8();
            let count = src.get_u8() as usize;
            if count > MAX_ROUTE_LEN {
                return Err(Error::RouteTooLong(count));
            }
            ensure(&src, count * 6)?;
            let hops = (0..count).map(|_| get_address(&mut src)).collect();
            DsrOption::SourceRoute { segments_left, hops }
        }
    };

    Ok(option)
}

fn put_route(dst: &mut BytesMut, route: &[Hop]) -> Result<(), Error> {
    if route.len() > MAX_ROUTE_LEN {
        return Err(Error::RouteTooLong(route.len()));
    }

    dst.put_u8(route.len() as u8);
    for hop in route {
        put_address(dst, &hop.address);
        dst.put_u16(hop.weight);
    }

    Ok(())
}

fn get_route(src: &mut Bytes) -> Result<Vec<Hop>, Error> {
    ensure(src, 1)?;
    let count = src.get_u8() as usize;
    if count > MAX_ROUTE_LEN {
        return Err(Error::RouteTooLong(count));
    }

    ensure(src, count * 8)?;
    Ok((0..count)
        .map(|_| {
            let address = get_address(src);
            Hop::new(address, src.get_u16())
        })
        .collect())
}

#[inline]
fn put_address(dst: &mut BytesMut, addr: &Address) {
    dst.put_slice(addr.as_bytes());
}

#[inline]
fn get_address(src: &mut Bytes) -> Address {
    let mut bytes = [0u8; 6];
    src.copy_to_slice(&mut bytes);
    Address::new(bytes)
}

#[inline]
fn ensure(src: &Bytes, len: usize) -> Result<(), Error> {
    if src.remaining() < len {
        return Err(Error::Truncated);
    }
    Ok(())
}

#[derive(Debug, Default)]
enum State {
    #[default]
    Length,
    Body(usize),
}

/// A length-delimited [`Frame`] codec.
#[derive(Debug, Default)]
pub struct Codec {
    /// The current state of the decoder.
    state: State,
}

impl Codec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for Codec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                State::Length => {
                    if src.len() < 4 {
                        return Ok(None);
                    }

                    let len = src.get_u32() as usize;
                    if len > MAX_FRAME_SIZE {
                        return Err(Error::FrameTooLarge(len));
                    }

                    src.reserve(len);
                    self.state = State::Body(len);
                }
                State::Body(len) => {
                    if src.len() < len {
                        return Ok(None);
                    }

                    let body = src.split_to(len).freeze();
                    self.state = State::Length;

                    return match Frame::decode(body) {
                        Ok(frame) => Ok(Some(frame)),
                        Err(e) => {
                            tracing::debug!(err = ?e, "failed to decode frame");
                            Err(e)
                        }
                    };
                }
            }
        }
    }
}

impl Encoder<Frame> for Codec {
    type Error = Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut body = BytesMut::new();
        item.encode(&mut body)?;

        if body.len() > MAX_FRAME_SIZE {
            return Err(Error::FrameTooLarge(body.len()));
        }

        dst.reserve(4 + body.len());
        dst.put_u32(body.len() as u32);
        dst.put(body);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> Address {
        Address::new([2, 0, 0, 0, 0, n])
    }

    fn control_frame() -> Frame {
        let mut frame = Frame::new(addr(1), addr(3), Bytes::from_static(b"payload"))
            .with_option(DsrOption::RouteRequest {
                identification: 42,
                target: addr(3),
                ttl: 255,
                route: vec![Hop::new(addr(1), 0), Hop::new(addr(2), 100)],
            })
            .with_option(DsrOption::RouteReply { route: vec![Hop::new(addr(1), 0)] })
            .with_option(DsrOption::RouteError {
                error_source: addr(2),
                error_destination: addr(1),
                unreachable: addr(3),
            })
            .with_option(DsrOption::AckRequest { identification: 9 })
            .with_option(DsrOption::Ack { identification: 9, source: addr(2), destination: addr(1) })
            .with_option(DsrOption::SourceRoute { segments_left: 1, hops: vec![addr(1), addr(2), addr(3)] });
        frame.l2_src = addr(1);
        frame.l2_dst = Address::BROADCAST;
        frame
    }

    #[test]
    fn codec_handles_partial_input() {
        let mut codec = Codec::new();
        let mut buf = BytesMut::new();
        codec.encode(control_frame(), &mut buf).unwrap();
        codec.encode(Frame::new(addr(4), addr(5), Bytes::new()), &mut buf).unwrap();

        let mut partial = buf.split_to(10);
        assert!(codec.decode(&mut partial).unwrap().is_none());
        partial.unsplit(buf);

        assert_eq!(codec.decode(&mut partial).unwrap(), Some(control_frame()));
        let second = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(second.source, addr(4));
        assert!(second.options.is_empty());
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn rejects_unknown_option() {
        let mut body = BytesMut::new();
        Frame::new(addr(1), addr(2), Bytes::new()).encode(&mut body).unwrap();
        // Patch the option count and append a bogus option.
        body[FIXED_LEN - 1] = 1;
        let payload_len = body.split_off(FIXED_LEN);
        body.put_u8(77);
        body.put_u16(0);
        body.unsplit(payload_len);

        assert!(matches!(Frame::decode(body.freeze()), Err(Error::UnknownOption(77))));
    }

    #[test]
    fn rejects_truncated_and_oversized() {
        let mut body = BytesMut::new();
        control_frame().encode(&mut body).unwrap();
        let truncated = body.freeze().slice(..20);
        assert!(matches!(Frame::decode(truncated), Err(Error::Truncated)));

        let mut codec = Codec::new();
        let mut buf = BytesMut::new();
        buf.put_u32(MAX_FRAME_SIZE as u32 + 1);
        assert!(matches!(codec.decode(&mut buf), Err(Error::FrameTooLarge(_))));

        let long = Frame::new(addr(1), addr(2), Bytes::new()).with_option(DsrOption::SourceRoute {
            segments_left: 0,
            hops: vec![addr(1); MAX_ROUTE_LEN + 1],
        });
        assert!(matches!(long.encode(&mut BytesMut::new()), Err(Error::RouteTooLong(_))));
    }
}
