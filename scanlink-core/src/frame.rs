//! Scanner protocol frame structure and encoding/decoding

use std::fmt;

use byteorder::{BigEndian, ByteOrder};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::{
    error::{CodecError, Error, Result},
    opcode::Opcode,
    result::ResultCode,
};

/// Frame header size in bytes
pub const HEADER_SIZE: usize = 6;

/// Maximum payload size (the length field is 16 bits)
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// Correlation token reserved for unsolicited notifications
pub const NOTIFICATION_TOKEN: u16 = 0;

/// Command sent from the host to a scanner
///
/// # Frame Structure
///
/// ```text
/// ┌─────────────┬─────────────┬─────────────┬─────────────┐
/// │   Opcode    │    Token    │   Length    │   Payload   │
/// │   2 bytes   │   2 bytes   │   2 bytes   │   N bytes   │
/// │  (BE u16)   │  (BE u16)   │  (BE u16)   │   (bytes)   │
/// └─────────────┴─────────────┴─────────────┴─────────────┘
/// ```
///
/// Responses reuse the layout with the request's opcode and token and a
/// payload that starts with the result byte. Notifications use token `0`.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use scanlink_core::{Command, Opcode};
///
/// let command = Command::new(Opcode::PullTrigger, 1, Bytes::new());
/// let encoded = command.encode().unwrap();
///
/// let decoded = Command::decode(encoded.freeze()).unwrap();
/// assert_eq!(command, decoded);
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Command {
    pub opcode: Opcode,

    /// Correlation token, never `0`
    pub token: u16,

    /// Command payload, opaque to the codec
    pub payload: Bytes,
}

impl Command {
    pub fn new(opcode: Opcode, token: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            token,
            payload: payload.into(),
        }
    }

    /// Encode command to bytes
    ///
    /// # Errors
    ///
    /// Returns an error if the opcode is a notification, the token is the
    /// reserved notification token, or the payload exceeds the length field.
    pub fn encode(&self) -> Result<BytesMut> {
        if self.opcode.is_notification() {
            return Err(CodecError::Malformed(format!("{} is not a command", self.opcode)).into());
        }
        if self.token == NOTIFICATION_TOKEN {
            return Err(
                CodecError::Malformed("command token 0 is reserved for notifications".into())
                    .into(),
            );
        }
        encode_frame(self.opcode.into(), self.token, &[], &self.payload)
    }

    /// Decode a command frame, as a scanner would
    pub fn decode(frame: Bytes) -> std::result::Result<Self, CodecError> {
        let (raw_opcode, token, payload) = split_frame(frame)?;
        let opcode = Opcode::try_from(raw_opcode)?;

        if opcode.is_notification() || token == NOTIFICATION_TOKEN {
            return Err(CodecError::Malformed(format!(
                "{} with token {} is not a command",
                opcode, token
            )));
        }

        Ok(Self {
            opcode,
            token,
            payload,
        })
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("opcode", &self.opcode)
            .field("token", &format!("0x{:04X}", self.token))
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Command[{}](token={}, len={})",
            self.opcode,
            self.token,
            self.payload.len()
        )
    }
}

/// Response to a command, matched by correlation token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub opcode: Opcode,
    pub token: u16,
    pub result: ResultCode,
    pub payload: Bytes,
}

impl Response {
    pub fn new(opcode: Opcode, token: u16, result: ResultCode, payload: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            token,
            result,
            payload: payload.into(),
        }
    }

    /// Response manufactured by the host (timeouts, cancellation, reserved opcodes)
    pub fn synthetic(opcode: Opcode, token: u16, result: ResultCode) -> Self {
        Self::new(opcode, token, result, Bytes::new())
    }

    pub fn is_success(&self) -> bool {
        self.result.is_success()
    }

    /// Encode response to bytes, as a scanner would
    pub fn encode(&self) -> Result<BytesMut> {
        if self.result == ResultCode::Cancelled {
            return Err(Error::InvalidResultCode(self.result.into()));
        }
        encode_frame(
            self.opcode.into(),
            self.token,
            &[self.result.into()],
            &self.payload,
        )
    }

    fn from_parts(
        opcode: Opcode,
        token: u16,
        mut payload: Bytes,
    ) -> std::result::Result<Self, CodecError> {
        if payload.is_empty() {
            return Err(CodecError::Malformed(format!(
                "response to {} has no result byte",
                opcode
            )));
        }
        let raw_result = payload.get_u8();
        let result = ResultCode::try_from(raw_result)
            .map_err(|e| CodecError::Malformed(e.to_string()))?;

        Ok(Self {
            opcode,
            token,
            result,
            payload,
        })
    }
}

/// Firmware update progress reported by a scanner
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FirmwareProgress {
    /// `0` success, `1` failure, other values are in-progress states
    pub status: u8,
    pub current_record: u32,
    pub max_records: u32,
}

impl FirmwareProgress {
    const SIZE: usize = 9;
}

/// Unsolicited frame pushed by a scanner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Barcode { barcode_type: u8, data: Bytes },
    Image(Bytes),
    Video(Bytes),
    RawData(Bytes),
    FirmwareUpdate(FirmwareProgress),
}

impl Notification {
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Barcode { .. } => Opcode::BarcodeEvent,
            Self::Image(_) => Opcode::ImageEvent,
            Self::Video(_) => Opcode::VideoEvent,
            Self::RawData(_) => Opcode::RawDataEvent,
            Self::FirmwareUpdate(_) => Opcode::FirmwareUpdateEvent,
        }
    }

    /// Encode notification to bytes, as a scanner would
    pub fn encode(&self) -> Result<BytesMut> {
        let opcode = self.opcode().into();
        match self {
            Self::Barcode { barcode_type, data } => {
                encode_frame(opcode, NOTIFICATION_TOKEN, &[*barcode_type], data)
            }
            Self::Image(data) | Self::Video(data) | Self::RawData(data) => {
                encode_frame(opcode, NOTIFICATION_TOKEN, &[], data)
            }
            Self::FirmwareUpdate(progress) => {
                let mut body = BytesMut::with_capacity(FirmwareProgress::SIZE);
                body.put_u8(progress.status);
                body.put_u32(progress.current_record);
                body.put_u32(progress.max_records);
                encode_frame(opcode, NOTIFICATION_TOKEN, &[], &body)
            }
        }
    }

    fn from_parts(opcode: Opcode, mut payload: Bytes) -> std::result::Result<Self, CodecError> {
        match opcode {
            Opcode::BarcodeEvent => {
                if payload.is_empty() {
                    return Err(CodecError::Malformed("barcode event without type byte".into()));
                }
                let barcode_type = payload.get_u8();
                Ok(Self::Barcode {
                    barcode_type,
                    data: payload,
                })
            }
            Opcode::ImageEvent => Ok(Self::Image(payload)),
            Opcode::VideoEvent => Ok(Self::Video(payload)),
            Opcode::RawDataEvent => Ok(Self::RawData(payload)),
            Opcode::FirmwareUpdateEvent => {
                if payload.len() != FirmwareProgress::SIZE {
                    return Err(CodecError::Malformed(format!(
                        "firmware update event must be {} bytes, got {}",
                        FirmwareProgress::SIZE,
                        payload.len()
                    )));
                }
                Ok(Self::FirmwareUpdate(FirmwareProgress {
                    status: payload.get_u8(),
                    current_record: payload.get_u32(),
                    max_records: payload.get_u32(),
                }))
            }
            other => Err(CodecError::Malformed(format!("{} is not a notification", other))),
        }
    }
}

/// Frame received from a scanner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedFrame {
    Response(Response),
    Notification(Notification),
}

impl DecodedFrame {
    /// Decode exactly one frame received from a scanner
    ///
    /// # Errors
    ///
    /// - `UnknownOpcode` if the opcode is outside the known set
    /// - `Malformed` if the frame is truncated, has trailing bytes, pairs a
    ///   command opcode with the notification token (or the reverse), or its
    ///   payload violates the opcode's layout
    ///
    /// # Examples
    ///
    /// ```
    /// use scanlink_core::{DecodedFrame, Opcode, Response, ResultCode};
    ///
    /// let response = Response::new(Opcode::AttrGet, 9, ResultCode::Success, vec![0xAA]);
    /// let decoded = DecodedFrame::decode(response.encode().unwrap().freeze()).unwrap();
    /// assert_eq!(decoded, DecodedFrame::Response(response));
    /// ```
    pub fn decode(frame: Bytes) -> std::result::Result<Self, CodecError> {
        let (raw_opcode, token, payload) = split_frame(frame)?;
        let opcode = Opcode::try_from(raw_opcode)?;

        match (token == NOTIFICATION_TOKEN, opcode.is_notification()) {
            (true, true) => Notification::from_parts(opcode, payload).map(Self::Notification),
            (false, false) => Response::from_parts(opcode, token, payload).map(Self::Response),
            (true, false) => Err(CodecError::Malformed(format!(
                "{} frame without correlation token",
                opcode
            ))),
            (false, true) => Err(CodecError::Malformed(format!(
                "{} frame carries token {}",
                opcode, token
            ))),
        }
    }
}

/// Reassembles frames from a byte stream
///
/// Transport reads may split or coalesce frames; the buffer yields each
/// complete frame once its declared length has arrived.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: BytesMut,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the transport
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Take the next complete raw frame, if one has fully arrived
    pub fn next_raw(&mut self) -> Option<Bytes> {
        if self.buf.len() < HEADER_SIZE {
            return None;
        }
        let length = BigEndian::read_u16(&self.buf[4..HEADER_SIZE]) as usize;
        if self.buf.len() < HEADER_SIZE + length {
            return None;
        }
        Some(self.buf.split_to(HEADER_SIZE + length).freeze())
    }

    /// Take and decode the next complete frame sent by a scanner
    ///
    /// A frame that fails to decode is consumed, so the caller can keep
    /// reading after logging the error.
    pub fn next_frame(&mut self) -> Option<std::result::Result<DecodedFrame, CodecError>> {
        self.next_raw().map(DecodedFrame::decode)
    }

    /// Number of buffered bytes not yet forming a complete frame
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Discard everything buffered
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

fn encode_frame(opcode: u16, token: u16, prefix: &[u8], payload: &[u8]) -> Result<BytesMut> {
    let length = prefix.len() + payload.len();
    if length > MAX_PAYLOAD_SIZE {
        return Err(Error::PayloadTooLarge {
            size: length,
            max: MAX_PAYLOAD_SIZE,
        });
    }

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + length);
    buf.put_u16(opcode);
    buf.put_u16(token);
    buf.put_u16(length as u16);
    buf.put_slice(prefix);
    buf.put_slice(payload);

    Ok(buf)
}

fn split_frame(mut frame: Bytes) -> std::result::Result<(u16, u16, Bytes), CodecError> {
    if frame.len() < HEADER_SIZE {
        return Err(CodecError::Malformed(format!(
            "truncated header: {} of {} bytes",
            frame.len(),
            HEADER_SIZE
        )));
    }

    trace!(
        "Decoding frame: {}",
        hex::encode(&frame[..frame.len().min(HEADER_SIZE + 16)])
    );

    let opcode = frame.get_u16();
    let token = frame.get_u16();
    let length = frame.get_u16() as usize;

    if frame.len() != length {
        return Err(CodecError::Malformed(format!(
            "length field says {} bytes, frame carries {}",
            length,
            frame.len()
        )));
    }

    Ok((opcode, token, frame))
}
