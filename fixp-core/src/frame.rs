/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Control and business frame model with binary encoding.
//!
//! Every frame starts with a Simple Open Framing Header (big-endian total
//! length and encoding type) followed by a little-endian template id and a
//! little-endian body. Template ids below [`BUSINESS_TEMPLATE_MIN`] are
//! session-layer control frames; everything from it upwards is a sequenced
//! business message whose body the engine treats as opaque.

use crate::codes::{
    EstablishRejectCode, NegotiationRejectCode, RetransmitRejectCode, TerminationCode, WireCode,
};
use crate::error::{DecodeError, EncodeError};
use crate::types::{Credentials, SessionIdentity, ShortString, Timestamp};
use bytes::{BufMut, Bytes, BytesMut};

/// Length of the Simple Open Framing Header.
pub const SOFH_LEN: usize = 4;

/// Length of the framing header plus template id.
pub const HEADER_LEN: usize = SOFH_LEN + 2;

/// Encoding type carried in the framing header (little-endian binary).
pub const ENCODING_TYPE: u16 = 0xEB50;

/// Largest frame the two-byte length field can describe.
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// First template id used by business messages.
pub const BUSINESS_TEMPLATE_MIN: u16 = 100;

/// Template id of the engine-generated business reject.
pub const BUSINESS_REJECT_TEMPLATE_ID: u16 = 206;

/// Template ids of the control frames.
pub mod template {
    /// Negotiate.
    pub const NEGOTIATE: u16 = 1;
    /// NegotiationResponse.
    pub const NEGOTIATE_RESPONSE: u16 = 2;
    /// NegotiationReject.
    pub const NEGOTIATE_REJECT: u16 = 3;
    /// Establish.
    pub const ESTABLISH: u16 = 4;
    /// EstablishmentAck.
    pub const ESTABLISH_ACK: u16 = 5;
    /// EstablishmentReject.
    pub const ESTABLISH_REJECT: u16 = 6;
    /// Terminate.
    pub const TERMINATE: u16 = 7;
    /// NotApplied.
    pub const NOT_APPLIED: u16 = 8;
    /// Sequence.
    pub const SEQUENCE: u16 = 9;
    /// RetransmitRequest.
    pub const RETRANSMIT_REQUEST: u16 = 12;
    /// Retransmission.
    pub const RETRANSMISSION: u16 = 13;
    /// RetransmitReject.
    pub const RETRANSMIT_REJECT: u16 = 14;
    /// FinishedSending.
    pub const FINISHED_SENDING: u16 = 15;
    /// FinishedReceiving.
    pub const FINISHED_RECEIVING: u16 = 16;
}

/// Decoded Simple Open Framing Header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sofh {
    /// Total frame length including the header.
    pub length: usize,
    /// Encoding type.
    pub encoding_type: u16,
}

impl Sofh {
    /// Reads the header from the start of `buf`, `None` if fewer than four bytes.
    #[must_use]
    pub fn read(buf: &[u8]) -> Option<Self> {
        if buf.len() < SOFH_LEN {
            return None;
        }
        Some(Self {
            length: usize::from(u16::from_be_bytes([buf[0], buf[1]])),
            encoding_type: u16::from_be_bytes([buf[2], buf[3]]),
        })
    }

    /// Checks length and encoding type against the accepted bounds.
    pub fn validate(&self, max_len: usize) -> Result<(), DecodeError> {
        if self.encoding_type != ENCODING_TYPE {
            return Err(DecodeError::InvalidEncodingType(self.encoding_type));
        }
        if self.length < HEADER_LEN || self.length > max_len {
            return Err(DecodeError::InvalidLength {
                length: self.length,
                min: HEADER_LEN,
                max: max_len,
            });
        }
        Ok(())
    }
}

/// A sequenced application message.
///
/// The body is opaque to the engine; only the template id and sequence
/// number are interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusinessMessage {
    /// Business template id, at least [`BUSINESS_TEMPLATE_MIN`].
    pub template_id: u16,
    /// Sequence number assigned by the sender.
    pub seq_no: u64,
    /// Encoded body following the sequence number.
    pub body: Bytes,
}

impl BusinessMessage {
    /// Creates a business message.
    #[must_use]
    pub fn new(template_id: u16, seq_no: u64, body: impl Into<Bytes>) -> Self {
        Self {
            template_id,
            seq_no,
            body: body.into(),
        }
    }

    /// Returns the same message with a different sequence number.
    #[must_use]
    pub fn with_seq_no(mut self, seq_no: u64) -> Self {
        self.seq_no = seq_no;
        self
    }
}

/// Engine-generated reject for an inbound business message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessReject {
    /// Template id of the rejected message.
    pub ref_template_id: u16,
    /// Sequence number of the rejected message.
    pub ref_seq_no: u64,
    /// Reject reason.
    pub reason: u32,
}

impl BusinessReject {
    /// Reason used for throttle rejects.
    pub const THROTTLE_REASON: u32 = 1;

    /// Creates a throttle reject for the given message.
    #[must_use]
    pub const fn throttled(ref_template_id: u16, ref_seq_no: u64) -> Self {
        Self {
            ref_template_id,
            ref_seq_no,
            reason: Self::THROTTLE_REASON,
        }
    }

    /// Wraps the reject in a business message with the given sequence number.
    #[must_use]
    pub fn to_message(&self, seq_no: u64) -> BusinessMessage {
        let mut body = BytesMut::with_capacity(14);
        body.put_u16_le(self.ref_template_id);
        body.put_u64_le(self.ref_seq_no);
        body.put_u32_le(self.reason);
        BusinessMessage::new(BUSINESS_REJECT_TEMPLATE_ID, seq_no, body.freeze())
    }

    /// Reads a reject back from a business message.
    pub fn from_message(msg: &BusinessMessage) -> Result<Self, DecodeError> {
        if msg.template_id != BUSINESS_REJECT_TEMPLATE_ID {
            return Err(DecodeError::UnknownTemplate(msg.template_id));
        }
        let mut r = Reader::new(BUSINESS_REJECT_TEMPLATE_ID, &msg.body);
        Ok(Self {
            ref_template_id: r.u16()?,
            ref_seq_no: r.u64()?,
            reason: r.u32()?,
        })
    }
}

/// A session-layer frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Client request to create a session version.
    Negotiate {
        /// Requested identity.
        identity: SessionIdentity,
        /// Request timestamp.
        timestamp: Timestamp,
        /// Authentication fields.
        credentials: Credentials,
    },
    /// Negotiation accepted.
    NegotiateResponse {
        /// Negotiated identity.
        identity: SessionIdentity,
        /// Timestamp of the Negotiate being answered.
        request_timestamp: Timestamp,
    },
    /// Negotiation refused.
    NegotiateReject {
        /// Requested identity.
        identity: SessionIdentity,
        /// Timestamp of the Negotiate being answered.
        request_timestamp: Timestamp,
        /// Reason.
        code: NegotiationRejectCode,
    },
    /// Client request to activate a negotiated session.
    Establish {
        /// Identity to establish.
        identity: SessionIdentity,
        /// Request timestamp.
        timestamp: Timestamp,
        /// Keep-alive interval in milliseconds requested by the client.
        keep_alive_ms: u64,
        /// Next sequence number the client will send.
        next_seq_no: u64,
        /// Authentication fields.
        credentials: Credentials,
    },
    /// Establishment accepted.
    EstablishAck {
        /// Established identity.
        identity: SessionIdentity,
        /// Timestamp of the Establish being answered.
        request_timestamp: Timestamp,
        /// Accepted keep-alive interval in milliseconds.
        keep_alive_ms: u64,
        /// Confirmed next sequence number of the client.
        next_seq_no: u64,
        /// Last sequence number the acceptor has received.
        last_incoming_seq_no: u64,
    },
    /// Establishment refused.
    EstablishReject {
        /// Requested identity.
        identity: SessionIdentity,
        /// Timestamp of the Establish being answered.
        request_timestamp: Timestamp,
        /// Reason.
        code: EstablishRejectCode,
        /// Last sequence number the acceptor has received.
        last_incoming_seq_no: u64,
    },
    /// End of the session on this transport.
    Terminate {
        /// Identity being terminated.
        identity: SessionIdentity,
        /// Reason.
        code: TerminationCode,
    },
    /// Inbound gap notification.
    NotApplied {
        /// First missing sequence number.
        from_seq_no: u64,
        /// Number of missing messages.
        count: u64,
    },
    /// Keep-alive carrying the sender's next sequence number.
    Sequence {
        /// Next sequence number the sender will use.
        next_seq_no: u64,
    },
    /// Request to replay a range of sent messages.
    RetransmitRequest {
        /// Identity the request names.
        identity: SessionIdentity,
        /// Request timestamp.
        timestamp: Timestamp,
        /// First sequence number to replay.
        from_seq_no: u64,
        /// Number of messages to replay.
        count: u64,
    },
    /// Header preceding replayed messages.
    Retransmission {
        /// Identity being replayed.
        identity: SessionIdentity,
        /// Timestamp of the request being answered.
        request_timestamp: Timestamp,
        /// First replayed sequence number.
        from_seq_no: u64,
        /// Number of replayed messages.
        count: u64,
    },
    /// Retransmit request refused.
    RetransmitReject {
        /// Identity the request named.
        identity: SessionIdentity,
        /// Timestamp of the request being answered.
        request_timestamp: Timestamp,
        /// Reason.
        code: RetransmitRejectCode,
    },
    /// Sender will send no further business messages.
    FinishedSending {
        /// Identity of the session.
        identity: SessionIdentity,
        /// Last sequence number sent.
        last_seq_no: u64,
    },
    /// Acknowledgement of a FinishedSending.
    FinishedReceiving {
        /// Identity of the session.
        identity: SessionIdentity,
    },
    /// Sequenced business message.
    Business(BusinessMessage),
}

impl Frame {
    /// Returns the template id of this frame.
    #[must_use]
    pub fn template_id(&self) -> u16 {
        match self {
            Self::Negotiate { .. } => template::NEGOTIATE,
            Self::NegotiateResponse { .. } => template::NEGOTIATE_RESPONSE,
            Self::NegotiateReject { .. } => template::NEGOTIATE_REJECT,
            Self::Establish { .. } => template::ESTABLISH,
            Self::EstablishAck { .. } => template::ESTABLISH_ACK,
            Self::EstablishReject { .. } => template::ESTABLISH_REJECT,
            Self::Terminate { .. } => template::TERMINATE,
            Self::NotApplied { .. } => template::NOT_APPLIED,
            Self::Sequence { .. } => template::SEQUENCE,
            Self::RetransmitRequest { .. } => template::RETRANSMIT_REQUEST,
            Self::Retransmission { .. } => template::RETRANSMISSION,
            Self::RetransmitReject { .. } => template::RETRANSMIT_REJECT,
            Self::FinishedSending { .. } => template::FINISHED_SENDING,
            Self::FinishedReceiving { .. } => template::FINISHED_RECEIVING,
            Self::Business(msg) => msg.template_id,
        }
    }

    /// Returns the frame name used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Negotiate { .. } => "Negotiate",
            Self::NegotiateResponse { .. } => "NegotiationResponse",
            Self::NegotiateReject { .. } => "NegotiationReject",
            Self::Establish { .. } => "Establish",
            Self::EstablishAck { .. } => "EstablishmentAck",
            Self::EstablishReject { .. } => "EstablishmentReject",
            Self::Terminate { .. } => "Terminate",
            Self::NotApplied { .. } => "NotApplied",
            Self::Sequence { .. } => "Sequence",
            Self::RetransmitRequest { .. } => "RetransmitRequest",
            Self::Retransmission { .. } => "Retransmission",
            Self::RetransmitReject { .. } => "RetransmitReject",
            Self::FinishedSending { .. } => "FinishedSending",
            Self::FinishedReceiving { .. } => "FinishedReceiving",
            Self::Business(_) => "Business",
        }
    }

    /// Returns the session identity named by the frame, if it carries one.
    #[must_use]
    pub fn identity(&self) -> Option<SessionIdentity> {
        match self {
            Self::Negotiate { identity, .. }
            | Self::NegotiateResponse { identity, .. }
            | Self::NegotiateReject { identity, .. }
            | Self::Establish { identity, .. }
            | Self::EstablishAck { identity, .. }
            | Self::EstablishReject { identity, .. }
            | Self::Terminate { identity, .. }
            | Self::RetransmitRequest { identity, .. }
            | Self::Retransmission { identity, .. }
            | Self::RetransmitReject { identity, .. }
            | Self::FinishedSending { identity, .. }
            | Self::FinishedReceiving { identity } => Some(*identity),
            Self::NotApplied { .. } | Self::Sequence { .. } | Self::Business(_) => None,
        }
    }

    /// Appends the encoded frame, framing header included, to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), EncodeError> {
        let start = dst.len();
        dst.put_u16(0);
        dst.put_u16(ENCODING_TYPE);
        dst.put_u16_le(self.template_id());

        match self {
            Self::Negotiate {
                identity,
                timestamp,
                credentials,
            } => {
                put_identity(dst, identity);
                dst.put_u64_le(timestamp.as_nanos());
                put_credentials(dst, credentials)?;
            }
            Self::NegotiateResponse {
                identity,
                request_timestamp,
            } => {
                put_identity(dst, identity);
                dst.put_u64_le(request_timestamp.as_nanos());
            }
            Self::NegotiateReject {
                identity,
                request_timestamp,
                code,
            } => {
                put_identity(dst, identity);
                dst.put_u64_le(request_timestamp.as_nanos());
                dst.put_u8(code.to_wire());
            }
            Self::Establish {
                identity,
                timestamp,
                keep_alive_ms,
                next_seq_no,
                credentials,
            } => {
                put_identity(dst, identity);
                dst.put_u64_le(timestamp.as_nanos());
                dst.put_u64_le(*keep_alive_ms);
                dst.put_u64_le(*next_seq_no);
                put_credentials(dst, credentials)?;
            }
            Self::EstablishAck {
                identity,
                request_timestamp,
                keep_alive_ms,
                next_seq_no,
                last_incoming_seq_no,
            } => {
                put_identity(dst, identity);
                dst.put_u64_le(request_timestamp.as_nanos());
                dst.put_u64_le(*keep_alive_ms);
                dst.put_u64_le(*next_seq_no);
                dst.put_u64_le(*last_incoming_seq_no);
            }
            Self::EstablishReject {
                identity,
                request_timestamp,
                code,
                last_incoming_seq_no,
            } => {
                put_identity(dst, identity);
                dst.put_u64_le(request_timestamp.as_nanos());
                dst.put_u8(code.to_wire());
                dst.put_u64_le(*last_incoming_seq_no);
            }
            Self::Terminate { identity, code } => {
                put_identity(dst, identity);
                dst.put_u8(code.to_wire());
            }
            Self::NotApplied { from_seq_no, count } => {
                dst.put_u64_le(*from_seq_no);
                dst.put_u64_le(*count);
            }
            Self::Sequence { next_seq_no } => dst.put_u64_le(*next_seq_no),
            Self::RetransmitRequest {
                identity,
                timestamp,
                from_seq_no,
                count,
            } => {
                put_identity(dst, identity);
                dst.put_u64_le(timestamp.as_nanos());
                dst.put_u64_le(*from_seq_no);
                dst.put_u64_le(*count);
            }
            Self::Retransmission {
                identity,
                request_timestamp,
                from_seq_no,
                count,
            } => {
                put_identity(dst, identity);
                dst.put_u64_le(request_timestamp.as_nanos());
                dst.put_u64_le(*from_seq_no);
                dst.put_u64_le(*count);
            }
            Self::RetransmitReject {
                identity,
                request_timestamp,
                code,
            } => {
                put_identity(dst, identity);
                dst.put_u64_le(request_timestamp.as_nanos());
                dst.put_u8(code.to_wire());
            }
            Self::FinishedSending {
                identity,
                last_seq_no,
            } => {
                put_identity(dst, identity);
                dst.put_u64_le(*last_seq_no);
            }
            Self::FinishedReceiving { identity } => put_identity(dst, identity),
            Self::Business(msg) => {
                dst.put_u64_le(msg.seq_no);
                dst.extend_from_slice(&msg.body);
            }
        }

        let len = dst.len() - start;
        if len > MAX_FRAME_LEN {
            dst.truncate(start);
            return Err(EncodeError::FrameTooLarge {
                size: len,
                max_size: MAX_FRAME_LEN,
            });
        }
        dst[start..start + 2].copy_from_slice(&(len as u16).to_be_bytes());
        Ok(())
    }

    /// Encodes the frame into a standalone buffer.
    pub fn to_bytes(&self) -> Result<Bytes, EncodeError> {
        let mut buf = BytesMut::with_capacity(64);
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Decodes one complete frame, framing header included.
    ///
    /// Business bodies are sliced out of `frame` without copying.
    pub fn decode(frame: &Bytes) -> Result<Self, DecodeError> {
        let sofh = Sofh::read(frame).ok_or(DecodeError::Incomplete)?;
        sofh.validate(MAX_FRAME_LEN)?;
        if frame.len() < sofh.length {
            return Err(DecodeError::Incomplete);
        }
        let template_id = u16::from_le_bytes([frame[SOFH_LEN], frame[SOFH_LEN + 1]]);
        let body = frame.slice(HEADER_LEN..sofh.length);
        Self::decode_body(template_id, &body)
    }

    /// Decodes a frame body for the given template id.
    pub fn decode_body(template_id: u16, body: &Bytes) -> Result<Self, DecodeError> {
        if template_id >= BUSINESS_TEMPLATE_MIN {
            let mut r = Reader::new(template_id, body);
            let seq_no = r.u64()?;
            return Ok(Self::Business(BusinessMessage {
                template_id,
                seq_no,
                body: body.slice(r.pos..),
            }));
        }

        let mut r = Reader::new(template_id, body);
        let frame = match template_id {
            template::NEGOTIATE => Self::Negotiate {
                identity: r.identity()?,
                timestamp: r.timestamp()?,
                credentials: r.credentials()?,
            },
            template::NEGOTIATE_RESPONSE => Self::NegotiateResponse {
                identity: r.identity()?,
                request_timestamp: r.timestamp()?,
            },
            template::NEGOTIATE_REJECT => Self::NegotiateReject {
                identity: r.identity()?,
                request_timestamp: r.timestamp()?,
                code: r.code("negotiation reject")?,
            },
            template::ESTABLISH => Self::Establish {
                identity: r.identity()?,
                timestamp: r.timestamp()?,
                keep_alive_ms: r.u64()?,
                next_seq_no: r.u64()?,
                credentials: r.credentials()?,
            },
            template::ESTABLISH_ACK => Self::EstablishAck {
                identity: r.identity()?,
                request_timestamp: r.timestamp()?,
                keep_alive_ms: r.u64()?,
                next_seq_no: r.u64()?,
                last_incoming_seq_no: r.u64()?,
            },
            template::ESTABLISH_REJECT => Self::EstablishReject {
                identity: r.identity()?,
                request_timestamp: r.timestamp()?,
                code: r.code("establish reject")?,
                last_incoming_seq_no: r.u64()?,
            },
            template::TERMINATE => Self::Terminate {
                identity: r.identity()?,
                code: r.code("termination")?,
            },
            template::NOT_APPLIED => Self::NotApplied {
                from_seq_no: r.u64()?,
                count: r.u64()?,
            },
            template::SEQUENCE => Self::Sequence {
                next_seq_no: r.u64()?,
            },
            template::RETRANSMIT_REQUEST => Self::RetransmitRequest {
                identity: r.identity()?,
                timestamp: r.timestamp()?,
                from_seq_no: r.u64()?,
                count: r.u64()?,
            },
            template::RETRANSMISSION => Self::Retransmission {
                identity: r.identity()?,
                request_timestamp: r.timestamp()?,
                from_seq_no: r.u64()?,
                count: r.u64()?,
            },
            template::RETRANSMIT_REJECT => Self::RetransmitReject {
                identity: r.identity()?,
                request_timestamp: r.timestamp()?,
                code: r.code("retransmit reject")?,
            },
            template::FINISHED_SENDING => Self::FinishedSending {
                identity: r.identity()?,
                last_seq_no: r.u64()?,
            },
            template::FINISHED_RECEIVING => Self::FinishedReceiving {
                identity: r.identity()?,
            },
            other => return Err(DecodeError::UnknownTemplate(other)),
        };
        Ok(frame)
    }
}

impl From<BusinessMessage> for Frame {
    fn from(msg: BusinessMessage) -> Self {
        Self::Business(msg)
    }
}

fn put_identity(dst: &mut BytesMut, identity: &SessionIdentity) {
    dst.put_u64_le(identity.session_id);
    dst.put_u64_le(identity.session_ver_id);
}

fn put_str(dst: &mut BytesMut, field: &'static str, value: &str) -> Result<(), EncodeError> {
    let len = value.len();
    if len > usize::from(u8::MAX) {
        return Err(EncodeError::FieldTooLong {
            field,
            length: len,
            max_length: usize::from(u8::MAX),
        });
    }
    dst.put_u8(len as u8);
    dst.extend_from_slice(value.as_bytes());
    Ok(())
}

fn put_credentials(dst: &mut BytesMut, credentials: &Credentials) -> Result<(), EncodeError> {
    dst.put_u32_le(credentials.firm_id);
    put_str(dst, "access_key", &credentials.access_key)?;
    put_str(dst, "sub_id", credentials.sub_id.as_str())?;
    put_str(dst, "location_id", credentials.location_id.as_str())
}

/// Cursor over a little-endian frame body.
struct Reader<'a> {
    template_id: u16,
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(template_id: u16, buf: &'a [u8]) -> Self {
        Self {
            template_id,
            buf,
            pos: 0,
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let available = self.buf.len() - self.pos;
        if available < n {
            return Err(DecodeError::Truncated {
                template_id: self.template_id,
                needed: n,
                available,
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(raw))
    }

    fn u64(&mut self) -> Result<u64, DecodeError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(raw))
    }

    fn identity(&mut self) -> Result<SessionIdentity, DecodeError> {
        Ok(SessionIdentity::new(self.u64()?, self.u64()?))
    }

    fn timestamp(&mut self) -> Result<Timestamp, DecodeError> {
        Ok(Timestamp::from_nanos(self.u64()?))
    }

    fn code<C: WireCode>(&mut self, field: &'static str) -> Result<C, DecodeError> {
        let value = self.u8()?;
        C::from_wire(value).ok_or(DecodeError::InvalidCode { field, value })
    }

    fn str(&mut self) -> Result<&'a str, DecodeError> {
        let len = usize::from(self.u8()?);
        Ok(std::str::from_utf8(self.take(len)?)?)
    }

    fn short_string(&mut self, field: &'static str) -> Result<ShortString, DecodeError> {
        let s = self.str()?;
        ShortString::new(s).ok_or(DecodeError::StringTooLong {
            field,
            length: s.len(),
        })
    }

    fn credentials(&mut self) -> Result<Credentials, DecodeError> {
        let firm_id = self.u32()?;
        let access_key = self.str()?.to_string();
        // Older clients stop after the access key.
        let sub_id = if self.pos < self.buf.len() {
            self.short_string("sub_id")?
        } else {
            ShortString::default()
        };
        let location_id = if self.pos < self.buf.len() {
            self.short_string("location_id")?
        } else {
            ShortString::default()
        };
        Ok(Credentials {
            firm_id,
            access_key,
            sub_id,
            location_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> SessionIdentity {
        SessionIdentity::new(42, 1)
    }

    #[test]
    fn test_sofh_header_layout() {
        let bytes = Frame::Sequence { next_seq_no: 5 }.to_bytes().unwrap();
        assert_eq!(bytes.len(), HEADER_LEN + 8);
        assert_eq!(&bytes[0..2], &(14u16).to_be_bytes());
        assert_eq!(&bytes[2..4], &[0xEB, 0x50]);
        assert_eq!(&bytes[4..6], &template::SEQUENCE.to_le_bytes());
        assert_eq!(&bytes[6..], &5u64.to_le_bytes());
    }

    #[test]
    fn test_negotiate_decodes_credentials() {
        let creds = Credentials::new(7, "secret")
            .with_sub_id(ShortString::new("DESK").unwrap());
        let frame = Frame::Negotiate {
            identity: id(),
            timestamp: Timestamp::from_millis(10),
            credentials: creds.clone(),
        };
        let decoded = Frame::decode(&frame.to_bytes().unwrap()).unwrap();
        match decoded {
            Frame::Negotiate {
                identity,
                credentials,
                ..
            } => {
                assert_eq!(identity, id());
                assert_eq!(credentials, creds);
                assert_eq!(credentials.location_id.as_str(), "");
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn test_credentials_without_optional_fields() {
        let mut buf = BytesMut::new();
        buf.put_u16(0);
        buf.put_u16(ENCODING_TYPE);
        buf.put_u16_le(template::NEGOTIATE);
        buf.put_u64_le(42);
        buf.put_u64_le(1);
        buf.put_u64_le(99);
        buf.put_u32_le(3);
        buf.put_u8(3);
        buf.extend_from_slice(b"key");
        let len = buf.len() as u16;
        buf[0..2].copy_from_slice(&len.to_be_bytes());

        let Frame::Negotiate { credentials, .. } = Frame::decode(&buf.freeze()).unwrap() else {
            panic!("expected negotiate");
        };
        assert_eq!(credentials.firm_id, 3);
        assert_eq!(credentials.access_key, "key");
        assert!(credentials.sub_id.is_empty());
        assert!(credentials.location_id.is_empty());
    }

    #[test]
    fn test_business_body_is_opaque() {
        let msg = BusinessMessage::new(300, 9, Bytes::from_static(b"order"));
        let bytes = Frame::Business(msg.clone()).to_bytes().unwrap();
        assert_eq!(Frame::decode(&bytes).unwrap(), Frame::Business(msg));
    }

    #[test]
    fn test_business_reject_body() {
        let reject = BusinessReject::throttled(300, 17);
        let msg = reject.to_message(4);
        assert_eq!(msg.template_id, BUSINESS_REJECT_TEMPLATE_ID);
        assert_eq!(msg.seq_no, 4);
        assert_eq!(BusinessReject::from_message(&msg).unwrap(), reject);
    }

    #[test]
    fn test_reserved_template_ids_rejected() {
        for template_id in [0u16, 10, 11, 17, 99] {
            assert_eq!(
                Frame::decode_body(template_id, &Bytes::new()),
                Err(DecodeError::UnknownTemplate(template_id))
            );
        }
    }

    #[test]
    fn test_bad_encoding_type() {
        let mut raw = BytesMut::from(&Frame::Sequence { next_seq_no: 1 }.to_bytes().unwrap()[..]);
        raw[2] = 0x5B;
        assert_eq!(
            Frame::decode(&raw.freeze()),
            Err(DecodeError::InvalidEncodingType(0x5B50))
        );
    }

    #[test]
    fn test_truncated_body() {
        let full = Frame::NotApplied {
            from_seq_no: 1,
            count: 2,
        }
        .to_bytes()
        .unwrap();
        let err = Frame::decode_body(template::NOT_APPLIED, &full.slice(HEADER_LEN..HEADER_LEN + 10));
        assert!(matches!(err, Err(DecodeError::Truncated { .. })));
    }

    #[test]
    fn test_invalid_code_value() {
        let mut body = BytesMut::new();
        body.put_u64_le(42);
        body.put_u64_le(1);
        body.put_u8(200);
        assert_eq!(
            Frame::decode_body(template::TERMINATE, &body.freeze()),
            Err(DecodeError::InvalidCode {
                field: "termination",
                value: 200
            })
        );
    }

    #[test]
    fn test_identity_accessor() {
        let frame = Frame::Terminate {
            identity: id(),
            code: TerminationCode::Finished,
        };
        assert_eq!(frame.identity(), Some(id()));
        assert_eq!(frame.name(), "Terminate");
        assert_eq!(Frame::Sequence { next_seq_no: 1 }.identity(), None);
    }
}
