//! Binary wire protocol spoken over the relay WebSocket.
//!
//! Every WebSocket binary message is one frame:
//!
//! ```text
//! varUint(type) + payload
//! ```
//!
//! | type | meaning  | payload                                   |
//! |------|----------|-------------------------------------------|
//! | 0    | SYNC     | merge-engine update, opaque to the relay  |
//! | 1    | PRESENCE | `varUint(n)` then `n` presence entries    |
//!
//! A presence entry is `varUint(client_id) + varUint(clock) +
//! varUint(len) + bytes[len]`. A state blob equal to the literal `null`
//! marks the client as gone, following the y-protocols awareness encoding.
//!
//! Frames with any other type are decoded as [`Frame::Unknown`] so newer
//! clients can add message kinds without being disconnected.

use axum::body::Bytes;

use crate::error::DecodeError;

/// Message type tags.
pub mod msg_type {
    /// Merge-engine update or full state
    pub const SYNC: u64 = 0;
    /// Presence (cursor, selection, user info)
    pub const PRESENCE: u64 = 1;
}

/// State blob that marks a presence entry as removed.
pub const REMOVED_STATE: &[u8] = b"null";

// ===========================================================================
// VarUint encoding/decoding (y-protocols compatible)
// ===========================================================================

/// Write a variable-length unsigned integer to a buffer.
/// Uses 7 bits per byte, with MSB indicating continuation.
pub fn write_var_uint(buf: &mut Vec<u8>, mut num: u64) {
    loop {
        let mut byte = (num & 0x7F) as u8;
        num >>= 7;
        if num > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if num == 0 {
            break;
        }
    }
}

/// Read a variable-length unsigned integer.
/// Returns `(value, bytes_consumed)`.
pub fn read_var_uint(data: &[u8]) -> Result<(u64, usize), DecodeError> {
    let mut num: u64 = 0;
    let mut shift = 0;
    for (i, &byte) in data.iter().enumerate() {
        let bits = (byte & 0x7F) as u64;
        if shift == 63 && bits > 1 {
            return Err(DecodeError::VarUintOverflow);
        }
        num |= bits << shift;
        if byte & 0x80 == 0 {
            return Ok((num, i + 1));
        }
        shift += 7;
        if shift > 63 {
            return Err(DecodeError::VarUintOverflow);
        }
    }
    Err(DecodeError::TruncatedVarUint)
}

fn write_var_byte_array(buf: &mut Vec<u8>, data: &[u8]) {
    write_var_uint(buf, data.len() as u64);
    buf.extend_from_slice(data);
}

/// Read a length-prefixed byte array, returning `(start, end)` offsets into `data`.
fn read_var_byte_array(data: &[u8]) -> Result<(usize, usize), DecodeError> {
    let (len, len_bytes) = read_var_uint(data)?;
    let available = data.len() - len_bytes;
    if len > available as u64 {
        return Err(DecodeError::TruncatedByteArray {
            declared: len,
            available,
        });
    }
    Ok((len_bytes, len_bytes + len as usize))
}

// ===========================================================================
// Frames
// ===========================================================================

/// One presence record as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEntry {
    pub client_id: u64,
    pub clock: u64,
    /// `None` when the client is being removed.
    pub state: Option<Bytes>,
}

impl PresenceEntry {
    pub fn new(client_id: u64, clock: u64, state: impl Into<Bytes>) -> Self {
        Self {
            client_id,
            clock,
            state: Some(state.into()),
        }
    }

    pub fn removed(client_id: u64, clock: u64) -> Self {
        Self {
            client_id,
            clock,
            state: None,
        }
    }
}

/// The payload of a PRESENCE frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceUpdate {
    pub entries: Vec<PresenceEntry>,
}

impl PresenceUpdate {
    pub fn new(entries: Vec<PresenceEntry>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decode a PRESENCE payload (without the type tag).
    pub fn decode(payload: &Bytes) -> Result<Self, DecodeError> {
        let (declared, mut pos) = read_var_uint(payload)?;
        let mut entries = Vec::new();

        while (entries.len() as u64) < declared {
            let entry = Self::decode_entry(payload, &mut pos).map_err(|e| match e {
                DecodeError::TruncatedVarUint | DecodeError::TruncatedByteArray { .. } => {
                    DecodeError::TruncatedPresence {
                        declared,
                        decoded: entries.len(),
                    }
                }
                other => other,
            })?;
            entries.push(entry);
        }

        Ok(Self { entries })
    }

    fn decode_entry(payload: &Bytes, pos: &mut usize) -> Result<PresenceEntry, DecodeError> {
        let (client_id, n) = read_var_uint(&payload[*pos..])?;
        *pos += n;
        let (clock, n) = read_var_uint(&payload[*pos..])?;
        *pos += n;
        let (start, end) = read_var_byte_array(&payload[*pos..])?;
        let state = payload.slice(*pos + start..*pos + end);
        *pos += end;

        let state = if state.as_ref() == REMOVED_STATE {
            None
        } else {
            Some(state)
        };
        Ok(PresenceEntry {
            client_id,
            clock,
            state,
        })
    }

    /// Encode as a complete PRESENCE frame, type tag included.
    pub fn encode_frame(&self) -> Bytes {
        let body: usize = self
            .entries
            .iter()
            .map(|e| e.state.as_ref().map_or(REMOVED_STATE.len(), Bytes::len) + 30)
            .sum();
        let mut buf = Vec::with_capacity(2 + body);
        write_var_uint(&mut buf, msg_type::PRESENCE);
        write_var_uint(&mut buf, self.entries.len() as u64);
        for entry in &self.entries {
            write_var_uint(&mut buf, entry.client_id);
            write_var_uint(&mut buf, entry.clock);
            let state = entry.state.as_deref().unwrap_or(REMOVED_STATE);
            write_var_byte_array(&mut buf, state);
        }
        Bytes::from(buf)
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Merge-engine payload (everything after the type tag)
    Sync(Bytes),
    Presence(PresenceUpdate),
    /// A type this relay does not understand; ignored by the caller.
    Unknown(u64),
}

impl Frame {
    /// Decode one WebSocket binary message.
    pub fn decode(data: &Bytes) -> Result<Self, DecodeError> {
        if data.is_empty() {
            return Err(DecodeError::EmptyFrame);
        }

        let (tag, consumed) = read_var_uint(data)?;
        let payload = data.slice(consumed..);

        match tag {
            msg_type::SYNC => Ok(Frame::Sync(payload)),
            msg_type::PRESENCE => Ok(Frame::Presence(PresenceUpdate::decode(&payload)?)),
            other => Ok(Frame::Unknown(other)),
        }
    }
}

/// Encode a SYNC frame around a merge-engine payload.
pub fn encode_sync(payload: &[u8]) -> Bytes {
    let mut buf = Vec::with_capacity(1 + payload.len());
    write_var_uint(&mut buf, msg_type::SYNC);
    buf.extend_from_slice(payload);
    Bytes::from(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_uint_boundaries() {
        for value in [0u64, 1, 127, 128, 300, 16_384, u32::MAX as u64, u64::MAX] {
            let mut buf = Vec::new();
            write_var_uint(&mut buf, value);
            assert_eq!(read_var_uint(&buf), Ok((value, buf.len())));
        }
    }

    #[test]
    fn test_var_uint_single_byte_encoding() {
        let mut buf = Vec::new();
        write_var_uint(&mut buf, 1);
        assert_eq!(buf, vec![0x01]);

        buf.clear();
        write_var_uint(&mut buf, 300);
        assert_eq!(buf, vec![0xAC, 0x02]);
    }

    #[test]
    fn test_var_uint_truncated() {
        assert_eq!(read_var_uint(&[0x80]), Err(DecodeError::TruncatedVarUint));
        assert_eq!(read_var_uint(&[]), Err(DecodeError::TruncatedVarUint));
    }

    #[test]
    fn test_var_uint_overflow() {
        let too_long = [0xFF; 11];
        assert_eq!(read_var_uint(&too_long), Err(DecodeError::VarUintOverflow));
    }

    #[test]
    fn test_decode_sync_keeps_payload_opaque() {
        let frame = Bytes::from_static(&[0, 0xDE, 0xAD, 0x00, 0x01]);
        assert_eq!(
            Frame::decode(&frame).unwrap(),
            Frame::Sync(Bytes::from_static(&[0xDE, 0xAD, 0x00, 0x01]))
        );
        assert_eq!(encode_sync(&[0xDE, 0xAD, 0x00, 0x01]), frame);
    }

    #[test]
    fn test_decode_empty_sync_payload() {
        let frame = encode_sync(&[]);
        assert_eq!(Frame::decode(&frame).unwrap(), Frame::Sync(Bytes::new()));
    }

    #[test]
    fn test_decode_unknown_tag() {
        let frame = Bytes::from_static(&[7, 1, 2, 3]);
        assert_eq!(Frame::decode(&frame).unwrap(), Frame::Unknown(7));

        // Multi-byte tag
        let frame = Bytes::from_static(&[0x80, 0x01]);
        assert_eq!(Frame::decode(&frame).unwrap(), Frame::Unknown(128));
    }

    #[test]
    fn test_decode_empty_frame() {
        assert_eq!(Frame::decode(&Bytes::new()), Err(DecodeError::EmptyFrame));
    }

    #[test]
    fn test_presence_frame() {
        let update = PresenceUpdate::new(vec![
            PresenceEntry::new(42, 5, Bytes::from_static(b"{\"cursor\":3}")),
            PresenceEntry::removed(7, 2),
        ]);
        let frame = update.encode_frame();
        assert_eq!(frame[0], msg_type::PRESENCE as u8);
        assert_eq!(Frame::decode(&frame).unwrap(), Frame::Presence(update));
    }

    #[test]
    fn test_presence_null_state_is_removal() {
        let mut buf = vec![1, 1, 9, 3, 4];
        buf.extend_from_slice(b"null");
        let frame = Bytes::from(buf);

        let Frame::Presence(update) = Frame::decode(&frame).unwrap() else {
            panic!("expected presence frame");
        };
        assert_eq!(update.entries, vec![PresenceEntry::removed(9, 3)]);
    }

    #[test]
    fn test_presence_truncated_entry() {
        // Declares two entries, carries one
        let mut buf = vec![1, 2, 1, 1, 2];
        buf.extend_from_slice(b"{}");
        let err = Frame::decode(&Bytes::from(buf)).unwrap_err();
        assert_eq!(
            err,
            DecodeError::TruncatedPresence {
                declared: 2,
                decoded: 1
            }
        );
    }

    #[test]
    fn test_presence_state_longer_than_frame() {
        let frame = Bytes::from_static(&[1, 1, 1, 1, 10, b'{']);
        assert!(matches!(
            Frame::decode(&frame),
            Err(DecodeError::TruncatedPresence { .. })
        ));
    }
}
