//! The UDP-tunnel message (message type 1): a bit-packed header plus
//! type-dependent audio/ping payload, carried inside the TLS frame when raw
//! UDP isn't available. Adapted from the teacher's voice-packet codec; the
//! teacher's continuation-bit loop and Opus slicing are already correct, so
//! those are kept close to verbatim. What's added here: typed errors instead
//! of a generic `io::Error` for unknown kinds, serialize-time validation of
//! frame sizes and the `target` field, and an explicit `end_transmission`
//! flag for CELT/Speex (the teacher's server-side codec never needed one).

use crate::error::{Result, TrumbleError};
use crate::varint;
use crate::varint::BufMutExt;
use crate::varint::ReadExt;
use bytes::Buf;
use bytes::BufMut;
use bytes::Bytes;
use bytes::BytesMut;
use std::fmt::Debug;
use std::io::Read;
use std::marker::PhantomData;

const OPUS_MAX_FRAME_LEN: usize = 8191;
const CELT_MAX_FRAME_LEN: usize = 127;
const MAX_TARGET: u8 = 31;

/// The codec carrying a given audio payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UdpTunnelType {
    CeltAlpha = 0,
    Ping = 1,
    Speex = 2,
    CeltBeta = 3,
    Opus = 4,
}

impl TryFrom<u8> for UdpTunnelType {
    type Error = TrumbleError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(UdpTunnelType::CeltAlpha),
            1 => Ok(UdpTunnelType::Ping),
            2 => Ok(UdpTunnelType::Speex),
            3 => Ok(UdpTunnelType::CeltBeta),
            4 => Ok(UdpTunnelType::Opus),
            other => Err(TrumbleError::UnsupportedUdpTunnelType(other)),
        }
    }
}

/// `NormalTalking = 0`, `ServerLoopback = 31`; any value in between also
/// designates a voice-target group configured via `VoiceTarget`.
pub mod target {
    pub const NORMAL_TALKING: u8 = 0;
    pub const SERVER_LOOPBACK: u8 = 31;
}

/// A packet transmitted via the UDP-tunnel message.
#[derive(Clone, Debug, PartialEq)]
pub enum VoicePacket<Dst: VoicePacketDst> {
    /// Opaque timestamp, echoed back by the server unchanged.
    Ping { timestamp: i64 },
    /// Audio data.
    Audio {
        _dst: PhantomData<Dst>,
        /// 0-31; see [`target`].
        target: u8,
        /// Present only on packets received from the server.
        session_id: Dst::SessionId,
        /// Sequence number of the first frame in this packet.
        sequence_number: u64,
        /// Whether this packet (or its trailing empty frame, for CELT/Speex)
        /// marks the end of this user's talk spurt.
        end_transmission: bool,
        payload: VoicePacketPayload,
        /// Positional audio vector, if the remainder after audio framing was
        /// exactly 12 bytes.
        position: Option<(f32, f32, f32)>,
    },
}

/// Audio codec frames carried by a [`VoicePacket::Audio`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VoicePacketPayload {
    /// CELT Alpha (0.7.0) encoded frames, each up to 127 bytes.
    CeltAlpha(Vec<Bytes>),
    /// CELT Beta (0.11.0) encoded frames, each up to 127 bytes.
    CeltBeta(Vec<Bytes>),
    /// Speex encoded frames, each up to 127 bytes.
    Speex(Vec<Bytes>),
    /// Exactly one Opus frame, up to 8191 bytes.
    Opus(Bytes),
}

/// Zero-sized struct for packets sent to the server.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Serverbound;
/// Zero-sized struct for packets received from the server.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Clientbound;

/// Sealed trait distinguishing [`Serverbound`] and [`Clientbound`] framing
/// (only [`Clientbound`] packets carry a session ID).
pub trait VoicePacketDst: Default + PartialEq {
    type SessionId: Debug + Clone + PartialEq;
    fn read_session_id<T: Read>(buf: &mut T) -> Result<Self::SessionId>;
    fn write_session_id(buf: &mut BytesMut, session_id: &Self::SessionId);
}

impl VoicePacketDst for Serverbound {
    type SessionId = ();

    fn read_session_id<T: Read>(_buf: &mut T) -> Result<Self::SessionId> {
        Ok(())
    }

    fn write_session_id(_buf: &mut BytesMut, _session_id: &Self::SessionId) {}
}

impl VoicePacketDst for Clientbound {
    type SessionId = u32;

    fn read_session_id<T: Read>(buf: &mut T) -> Result<Self::SessionId> {
        Ok(buf.read_varint()? as u32)
    }

    fn write_session_id(buf: &mut BytesMut, session_id: &Self::SessionId) {
        buf.put_varint(u64::from(*session_id))
    }
}

/// Parses a UDP-tunnel payload (the bytes carried by message type 1).
pub fn decode_voice_packet<Dst: VoicePacketDst>(buf: &mut BytesMut) -> Result<VoicePacket<Dst>> {
    if buf.is_empty() {
        return Err(TrumbleError::TruncatedFrame);
    }
    let header = buf[0];
    buf.advance(1);
    let kind = UdpTunnelType::try_from(header >> 5)?;
    let target = header & 0b0001_1111;

    if kind == UdpTunnelType::Ping {
        let (timestamp, remainder) = varint::decode(buf)?;
        let consumed = buf.len() - remainder.len();
        buf.advance(consumed);
        return Ok(VoicePacket::Ping { timestamp });
    }

    let session_id = {
        let mut cursor = std::io::Cursor::new(&buf[..]);
        let session_id = Dst::read_session_id(&mut cursor)?;
        let consumed = cursor.position() as usize;
        buf.advance(consumed);
        session_id
    };
    let sequence_number = {
        let mut cursor = std::io::Cursor::new(&buf[..]);
        let sequence_number = cursor.read_varint()?;
        let consumed = cursor.position() as usize;
        buf.advance(consumed);
        sequence_number
    };

    let (payload, end_transmission) = match kind {
        UdpTunnelType::CeltAlpha | UdpTunnelType::Speex | UdpTunnelType::CeltBeta => {
            let (frames, end_transmission) = decode_celt_frames(buf)?;
            let payload = match kind {
                UdpTunnelType::CeltAlpha => VoicePacketPayload::CeltAlpha(frames),
                UdpTunnelType::Speex => VoicePacketPayload::Speex(frames),
                UdpTunnelType::CeltBeta => VoicePacketPayload::CeltBeta(frames),
                _ => unreachable!(),
            };
            (payload, end_transmission)
        }
        UdpTunnelType::Opus => {
            let (header, remainder) = varint::decode(buf)?;
            let consumed = buf.len() - remainder.len();
            buf.advance(consumed);
            let header = header as u64;
            let end_transmission = header & 0x2000 != 0;
            let len = (header & !0x2000) as usize;
            if len > OPUS_MAX_FRAME_LEN {
                return Err(TrumbleError::InvalidUdpTunnelField(format!("opus frame length {len} exceeds {OPUS_MAX_FRAME_LEN}")));
            }
            if buf.len() < len {
                return Err(TrumbleError::TruncatedFrame);
            }
            let frame = buf.split_to(len).freeze();
            (VoicePacketPayload::Opus(frame), end_transmission)
        }
        UdpTunnelType::Ping => unreachable!("handled above"),
    };

    let position = parse_position(buf);

    Ok(VoicePacket::Audio {
        _dst: PhantomData,
        target,
        session_id,
        sequence_number,
        end_transmission,
        payload,
        position,
    })
}

/// Reads CELT/Speex frames: one byte continuation-bit-plus-length header
/// per frame, looping until either the continuation bit is clear (normal
/// end of this packet's frames) or a length-0 header is seen (explicit
/// end-of-transmission marker, not itself a frame).
fn decode_celt_frames(buf: &mut BytesMut) -> Result<(Vec<Bytes>, bool)> {
    let mut frames = Vec::new();
    loop {
        if buf.is_empty() {
            return Err(TrumbleError::TruncatedFrame);
        }
        let header = buf[0];
        buf.advance(1);
        let continuation = header & 0x80 != 0;
        let len = (header & 0x7f) as usize;
        if len == 0 {
            return Ok((frames, true));
        }
        if buf.len() < len {
            return Err(TrumbleError::TruncatedFrame);
        }
        frames.push(buf.split_to(len).freeze());
        if !continuation {
            return Ok((frames, false));
        }
    }
}

fn parse_position(buf: &[u8]) -> Option<(f32, f32, f32)> {
    if buf.len() != 12 {
        return None;
    }
    let x = f32::from_be_bytes(buf[0..4].try_into().unwrap());
    let y = f32::from_be_bytes(buf[4..8].try_into().unwrap());
    let z = f32::from_be_bytes(buf[8..12].try_into().unwrap());
    Some((x, y, z))
}

/// Serializes a UDP-tunnel payload. Validates bit-width fields (`target`)
/// and frame-size limits, returning [`TrumbleError::InvalidUdpTunnelField`]
/// rather than silently truncating.
pub fn encode_voice_packet<Dst: VoicePacketDst>(packet: &VoicePacket<Dst>, dst: &mut BytesMut) -> Result<()> {
    match packet {
        VoicePacket::Ping { timestamp } => {
            dst.reserve(11);
            dst.put_u8((UdpTunnelType::Ping as u8) << 5);
            dst.put_slice(&varint::encode(*timestamp));
            Ok(())
        }
        VoicePacket::Audio {
            _dst,
            target,
            session_id,
            sequence_number,
            end_transmission,
            payload,
            position,
        } => {
            if *target > MAX_TARGET {
                return Err(TrumbleError::InvalidUdpTunnelField(format!("target {target} exceeds {MAX_TARGET}")));
            }

            let kind = match payload {
                VoicePacketPayload::CeltAlpha(_) => UdpTunnelType::CeltAlpha,
                VoicePacketPayload::Speex(_) => UdpTunnelType::Speex,
                VoicePacketPayload::CeltBeta(_) => UdpTunnelType::CeltBeta,
                VoicePacketPayload::Opus(_) => UdpTunnelType::Opus,
            };
            dst.reserve(1 + 10 + 10);
            dst.put_u8((kind as u8) << 5 | (target & 0b0001_1111));
            Dst::write_session_id(dst, session_id);
            dst.put_varint(*sequence_number);

            match payload {
                VoicePacketPayload::CeltAlpha(frames) | VoicePacketPayload::Speex(frames) | VoicePacketPayload::CeltBeta(frames) => {
                    encode_celt_frames(frames, *end_transmission, dst)?;
                }
                VoicePacketPayload::Opus(frame) => {
                    if frame.len() > OPUS_MAX_FRAME_LEN {
                        return Err(TrumbleError::InvalidUdpTunnelField(format!(
                            "opus frame length {} exceeds {OPUS_MAX_FRAME_LEN}",
                            frame.len()
                        )));
                    }
                    dst.reserve(2 + frame.len());
                    let term_bit: u64 = if *end_transmission { 0x2000 } else { 0 };
                    dst.put_slice(&varint::encode((term_bit | frame.len() as u64) as i64));
                    dst.put(frame.as_ref());
                }
            }

            if let Some((x, y, z)) = position {
                dst.reserve(12);
                dst.put_slice(&x.to_be_bytes());
                dst.put_slice(&y.to_be_bytes());
                dst.put_slice(&z.to_be_bytes());
            }

            Ok(())
        }
    }
}

fn encode_celt_frames(frames: &[Bytes], end_transmission: bool, dst: &mut BytesMut) -> Result<()> {
    dst.reserve(frames.iter().map(|frame| 1 + frame.len()).sum());
    let mut iter = frames.iter().peekable();
    while let Some(frame) = iter.next() {
        if frame.len() > CELT_MAX_FRAME_LEN {
            return Err(TrumbleError::InvalidUdpTunnelField(format!(
                "celt/speex frame length {} exceeds {CELT_MAX_FRAME_LEN}",
                frame.len()
            )));
        }
        let continuation = if iter.peek().is_some() { 0x80 } else { 0 };
        dst.put_u8(continuation | frame.len() as u8);
        dst.put(frame.as_ref());
    }
    if end_transmission {
        dst.put_u8(0);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_round_trips_spec_vector() {
        let packet = VoicePacket::<Serverbound>::Ping { timestamp: 12417 };
        let mut buf = BytesMut::new();
        encode_voice_packet(&packet, &mut buf).unwrap();
        assert_eq!(buf.as_ref(), &[0x20, 0xB0, 0x81]);

        let decoded = decode_voice_packet::<Clientbound>(&mut buf).unwrap();
        assert_eq!(decoded, VoicePacket::Ping { timestamp: 12417 });
    }

    #[test]
    fn opus_terminator_matches_spec_vector() {
        let packet = VoicePacket::<Serverbound>::Audio {
            _dst: PhantomData,
            target: 0,
            session_id: (),
            sequence_number: 1,
            end_transmission: true,
            payload: VoicePacketPayload::Opus(Bytes::from_static(&[0x11, 0x22])),
            position: Some((0.0, 0.0, 0.0)),
        };
        let mut buf = BytesMut::new();
        encode_voice_packet(&packet, &mut buf).unwrap();

        let mut expected = vec![0x80, 0x01, 0xA0, 0x02, 0x11, 0x22];
        expected.extend_from_slice(&0.0f32.to_be_bytes());
        expected.extend_from_slice(&0.0f32.to_be_bytes());
        expected.extend_from_slice(&0.0f32.to_be_bytes());
        assert_eq!(buf.as_ref(), expected.as_slice());
    }

    #[test]
    fn opus_non_terminator_keeps_two_byte_header() {
        let packet = VoicePacket::<Serverbound>::Audio {
            _dst: PhantomData,
            target: 0,
            session_id: (),
            sequence_number: 1,
            end_transmission: false,
            payload: VoicePacketPayload::Opus(Bytes::from_static(&[0x11, 0x22])),
            position: None,
        };
        let mut buf = BytesMut::new();
        encode_voice_packet(&packet, &mut buf).unwrap();
        assert_eq!(buf.as_ref(), &[0x80, 0x01, 0x80, 0x02, 0x11, 0x22]);
    }

    #[test]
    fn opus_round_trip_incoming() {
        let mut buf = BytesMut::new();
        buf.put_u8(0x80);
        buf.put_varint(7); // session id
        buf.put_u8(0x01); // sequence number
        buf.put_u8(0xA0);
        buf.put_u8(0x02);
        buf.put_slice(&[0x11, 0x22]);

        let decoded = decode_voice_packet::<Clientbound>(&mut buf).unwrap();
        match decoded {
            VoicePacket::Audio {
                target,
                session_id,
                sequence_number,
                end_transmission,
                payload,
                position,
                ..
            } => {
                assert_eq!(target, 0);
                assert_eq!(session_id, 7);
                assert_eq!(sequence_number, 1);
                assert!(end_transmission);
                assert_eq!(payload, VoicePacketPayload::Opus(Bytes::from_static(&[0x11, 0x22])));
                assert_eq!(position, None);
            }
            _ => panic!("expected audio packet"),
        }
    }

    #[test]
    fn opus_oversize_frame_is_rejected() {
        let packet = VoicePacket::<Serverbound>::Audio {
            _dst: PhantomData,
            target: 0,
            session_id: (),
            sequence_number: 0,
            end_transmission: false,
            payload: VoicePacketPayload::Opus(Bytes::from(vec![0u8; OPUS_MAX_FRAME_LEN + 1])),
            position: None,
        };
        let mut buf = BytesMut::new();
        assert!(matches!(
            encode_voice_packet(&packet, &mut buf),
            Err(TrumbleError::InvalidUdpTunnelField(_))
        ));
    }

    #[test]
    fn celt_multi_frame_round_trips_with_explicit_terminator() {
        let frames = vec![Bytes::from_static(&[1, 2, 3]), Bytes::from_static(&[4, 5])];
        let packet = VoicePacket::<Serverbound>::Audio {
            _dst: PhantomData,
            target: 3,
            session_id: (),
            sequence_number: 42,
            end_transmission: true,
            payload: VoicePacketPayload::CeltBeta(frames.clone()),
            position: None,
        };
        let mut buf = BytesMut::new();
        encode_voice_packet(&packet, &mut buf).unwrap();

        let decoded = decode_voice_packet::<Clientbound>(&mut buf).unwrap();
        match decoded {
            VoicePacket::Audio {
                target,
                sequence_number,
                end_transmission,
                payload,
                ..
            } => {
                assert_eq!(target, 3);
                assert_eq!(sequence_number, 42);
                assert!(end_transmission);
                assert_eq!(payload, VoicePacketPayload::CeltBeta(frames));
            }
            _ => panic!("expected audio packet"),
        }
    }

    #[test]
    fn celt_without_terminator_does_not_set_end_transmission() {
        let frames = vec![Bytes::from_static(&[9])];
        let packet = VoicePacket::<Serverbound>::Audio {
            _dst: PhantomData,
            target: 0,
            session_id: (),
            sequence_number: 1,
            end_transmission: false,
            payload: VoicePacketPayload::Speex(frames.clone()),
            position: None,
        };
        let mut buf = BytesMut::new();
        encode_voice_packet(&packet, &mut buf).unwrap();
        // no trailing zero-length terminator byte
        assert_eq!(buf.as_ref(), &[0x40, 0x01, 0x01, 9]);

        let decoded = decode_voice_packet::<Clientbound>(&mut buf).unwrap();
        match decoded {
            VoicePacket::Audio { end_transmission, payload, .. } => {
                assert!(!end_transmission);
                assert_eq!(payload, VoicePacketPayload::Speex(frames));
            }
            _ => panic!("expected audio packet"),
        }
    }

    #[test]
    fn unknown_udp_tunnel_type_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u8(5 << 5); // type=5, not in {0,1,2,3,4}
        let result = decode_voice_packet::<Clientbound>(&mut buf);
        assert!(matches!(result, Err(TrumbleError::UnsupportedUdpTunnelType(5))));
    }

    #[test]
    fn position_trailer_is_lenient_about_odd_lengths() {
        let mut buf = BytesMut::new();
        buf.put_u8(0x80);
        buf.put_varint(1); // session id
        buf.put_u8(0x00); // sequence number
        buf.put_u8(0x00); // opus header: len 0, no terminator
        buf.extend_from_slice(&[1, 2, 3]); // 3 leftover bytes, neither 0 nor 12

        let decoded = decode_voice_packet::<Clientbound>(&mut buf).unwrap();
        match decoded {
            VoicePacket::Audio { position, .. } => assert_eq!(position, None),
            _ => panic!("expected audio packet"),
        }
    }

    #[test]
    fn oversize_target_is_rejected_at_serialize_time() {
        let packet = VoicePacket::<Serverbound>::Audio {
            _dst: PhantomData,
            target: 32,
            session_id: (),
            sequence_number: 0,
            end_transmission: false,
            payload: VoicePacketPayload::Opus(Bytes::new()),
            position: None,
        };
        let mut buf = BytesMut::new();
        assert!(matches!(
            encode_voice_packet(&packet, &mut buf),
            Err(TrumbleError::InvalidUdpTunnelField(_))
        ));
    }
}
