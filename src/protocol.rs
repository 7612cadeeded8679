//! Wire envelope for out-of-process callers (spec.md §6 "Protocol
//! envelope").
//!
//! Grounded on the WAL/manifest modules' own length-prefixed binary
//! encoding style (fixed-width fields read with `try_into().unwrap()` over
//! a validated slice) rather than inventing a new wire-format idiom for
//! this one struct.

use crate::error::GnitzResult;

/// Whether a call succeeded or failed — the envelope's leading byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok = 0,
    Err = 1,
}

impl Status {
    fn from_byte(b: u8) -> GnitzResult<Self> {
        match b {
            0 => Ok(Status::Ok),
            1 => Ok(Status::Err),
            other => Err(crate::error::GnitzError::protocol(format!("unknown status byte {other}"))),
        }
    }
}

/// One request/response frame: `status:u8 | err_len:u32 LE | error_msg |
/// payload_size:u64 LE | payload`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub status: Status,
    pub error_message: String,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn ok(payload: Vec<u8>) -> Self {
        Envelope { status: Status::Ok, error_message: String::new(), payload }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Envelope { status: Status::Err, error_message: message.into(), payload: Vec::new() }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    pub fn encode(&self) -> GnitzResult<Vec<u8>> {
        let err_bytes = self.error_message.as_bytes();
        if err_bytes.len() > u32::MAX as usize {
            return Err(crate::error::GnitzError::protocol("error message exceeds the envelope's u32 length field"));
        }
        if self.payload.len() > u64::MAX as usize {
            return Err(crate::error::GnitzError::protocol("payload exceeds the envelope's u64 length field"));
        }

        let mut out = Vec::with_capacity(1 + 4 + err_bytes.len() + 8 + self.payload.len());
        out.push(self.status as u8);
        out.extend_from_slice(&(err_bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(err_bytes);
        out.extend_from_slice(&(self.payload.len() as u64).to_le_bytes());
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> GnitzResult<Self> {
        require(bytes, 0, 1)?;
        let status = Status::from_byte(bytes[0])?;
        let mut cursor = 1usize;

        require(bytes, cursor, 4)?;
        let err_len = u32::from_le_bytes(bytes[cursor..cursor + 4].try_into().unwrap()) as usize;
        cursor += 4;

        require(bytes, cursor, err_len)?;
        let error_message = std::str::from_utf8(&bytes[cursor..cursor + err_len])
            .map_err(|_| crate::error::GnitzError::protocol("error message is not valid UTF-8"))?
            .to_string();
        cursor += err_len;

        require(bytes, cursor, 8)?;
        let payload_size = u64::from_le_bytes(bytes[cursor..cursor + 8].try_into().unwrap()) as usize;
        cursor += 8;

        require(bytes, cursor, payload_size)?;
        let payload = bytes[cursor..cursor + payload_size].to_vec();
        cursor += payload_size;

        if cursor != bytes.len() {
            return Err(crate::error::GnitzError::protocol("envelope has trailing garbage past its payload"));
        }

        Ok(Envelope { status, error_message, payload })
    }
}

fn require(bytes: &[u8], cursor: usize, len: usize) -> GnitzResult<()> {
    if cursor + len > bytes.len() {
        Err(crate::error::GnitzError::protocol("envelope runs past end of buffer"))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_envelope_round_trips() {
        let env = Envelope::ok(vec![1, 2, 3, 4]);
        let bytes = env.encode().unwrap();
        let decoded = Envelope::decode(&bytes).unwrap();
        assert!(decoded.is_ok());
        assert_eq!(decoded.payload, vec![1, 2, 3, 4]);
        assert_eq!(decoded.error_message, "");
    }

    #[test]
    fn err_envelope_round_trips() {
        let env = Envelope::err("shard not found");
        let bytes = env.encode().unwrap();
        let decoded = Envelope::decode(&bytes).unwrap();
        assert!(!decoded.is_ok());
        assert_eq!(decoded.error_message, "shard not found");
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn truncated_buffer_is_reported_as_protocol_error() {
        let env = Envelope::ok(vec![9; 16]);
        let mut bytes = env.encode().unwrap();
        bytes.truncate(bytes.len() - 4);
        let err = Envelope::decode(&bytes).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Protocol);
    }

    #[test]
    fn unknown_status_byte_is_rejected() {
        let mut bytes = Envelope::ok(Vec::new()).encode().unwrap();
        bytes[0] = 9;
        let err = Envelope::decode(&bytes).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Protocol);
    }
}
