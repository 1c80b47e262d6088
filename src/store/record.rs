//! Log record - the unit of file store persistence
//!
//! ```text
//! op: u8 | flags: u8 | key_len: u32 LE | value_len: u32 LE | key | value | checksum: 4 bytes
//! ```
//!
//! The checksum is the first four bytes of the BLAKE3 hash of everything
//! before it. A record that is cut short, or that fails its checksum as the
//! very last record, is the torn tail of an interrupted append. A bad record
//! with more log after it is corruption and is never cut away.

use crate::error::StoreError;
use crate::model::Hash;
use std::io::{ErrorKind, Read};

/// Bytes before the key
pub(crate) const HEADER_LEN: usize = 10;

const CHECKSUM_LEN: usize = 4;

const FLAG_COMPRESSED: u8 = 0b0000_0001;

/// Record operation tag
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordOp {
    Put,
    Delete,
}

impl RecordOp {
    pub fn as_byte(&self) -> u8 {
        match self {
            RecordOp::Put => 1,
            RecordOp::Delete => 2,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(RecordOp::Put),
            2 => Some(RecordOp::Delete),
            _ => None,
        }
    }
}

/// A single log entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub op: RecordOp,
    pub key: Vec<u8>,
    /// Value as stored (compressed when `compressed` is set)
    pub value: Vec<u8>,
    pub compressed: bool,
}

/// Result of reading the next record from a log
#[derive(Debug)]
pub(crate) enum ReadOutcome {
    Record(Record),
    /// Clean end of log
    End,
    /// Partial final record; the log should be cut here
    Torn(String),
    /// Damaged record followed by more data
    Corrupt(String),
}

impl Record {
    /// A put record, compressing the value at `level` when given
    pub fn put(key: &[u8], value: &[u8], level: Option<i32>) -> Result<Self, StoreError> {
        checked_len("key", key.len())?;
        let (value, compressed) = match level {
            Some(level) => (
                zstd::encode_all(value, level).map_err(|e| StoreError::Compression(e.to_string()))?,
                true,
            ),
            None => (value.to_vec(), false),
        };
        checked_len("value", value.len())?;
        Ok(Record {
            op: RecordOp::Put,
            key: key.to_vec(),
            value,
            compressed,
        })
    }

    pub fn delete(key: &[u8]) -> Result<Self, StoreError> {
        checked_len("key", key.len())?;
        Ok(Record {
            op: RecordOp::Delete,
            key: key.to_vec(),
            value: Vec::new(),
            compressed: false,
        })
    }

    /// Offset of the value bytes from the start of the record
    pub fn value_offset(&self) -> usize {
        HEADER_LEN + self.key.len()
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.key.len() + self.value.len() + CHECKSUM_LEN
    }

    /// Serialize for appending to the log; lengths were checked on construction
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.push(self.op.as_byte());
        out.push(if self.compressed { FLAG_COMPRESSED } else { 0 });
        out.extend_from_slice(&(self.key.len() as u32).to_le_bytes());
        out.extend_from_slice(&(self.value.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.key);
        out.extend_from_slice(&self.value);
        let checksum = Hash::digest(&out);
        out.extend_from_slice(&checksum.as_bytes()[..CHECKSUM_LEN]);
        out
    }

    /// Read the next record; `remaining` is the number of bytes left in the log
    pub(crate) fn read_from<R: Read>(reader: &mut R, remaining: u64) -> Result<ReadOutcome, StoreError> {
        let mut header = [0u8; HEADER_LEN];
        match read_full(reader, &mut header)? {
            0 => return Ok(ReadOutcome::End),
            n if n < HEADER_LEN => {
                return Ok(ReadOutcome::Torn(format!("short record header ({} bytes)", n)))
            }
            _ => {}
        }

        let Some(op) = RecordOp::from_byte(header[0]) else {
            // A crash can leave a zero-filled tail behind the last append
            if header.iter().all(|b| *b == 0) && rest_is_zero(reader)? {
                return Ok(ReadOutcome::Torn("zero-filled tail".into()));
            }
            return Ok(ReadOutcome::Corrupt(format!("unknown record op {}", header[0])));
        };
        let flags = header[1];
        let key_len = u32::from_le_bytes([header[2], header[3], header[4], header[5]]) as u64;
        let value_len = u32::from_le_bytes([header[6], header[7], header[8], header[9]]) as u64;

        let body_len = key_len + value_len + CHECKSUM_LEN as u64;
        if HEADER_LEN as u64 + body_len > remaining {
            return Ok(ReadOutcome::Torn("record extends past end of log".into()));
        }

        let mut body = vec![0u8; body_len as usize];
        if read_full(reader, &mut body)? < body.len() {
            return Ok(ReadOutcome::Torn("short record body".into()));
        }

        let split = body.len() - CHECKSUM_LEN;
        let checksum = Hash::digest_many(&[&header, &body[..split]]);
        if checksum.as_bytes()[..CHECKSUM_LEN] != body[split..] {
            let reason = "record checksum mismatch".to_string();
            if HEADER_LEN as u64 + body_len == remaining {
                return Ok(ReadOutcome::Torn(reason));
            }
            return Ok(ReadOutcome::Corrupt(reason));
        }

        let key = body[..key_len as usize].to_vec();
        let value = body[key_len as usize..split].to_vec();
        Ok(ReadOutcome::Record(Record {
            op,
            key,
            value,
            compressed: flags & FLAG_COMPRESSED != 0,
        }))
    }
}

/// Decode a stored value back into caller bytes
pub(crate) fn inflate(stored: Vec<u8>, compressed: bool) -> Result<Vec<u8>, StoreError> {
    if compressed {
        zstd::decode_all(stored.as_slice()).map_err(|e| StoreError::Compression(e.to_string()))
    } else {
        Ok(stored)
    }
}

/// Reject lengths that do not fit the record's u32 length fields
fn checked_len(what: &'static str, len: usize) -> Result<u32, StoreError> {
    u32::try_from(len).map_err(|_| StoreError::TooLarge { what, len })
}

/// Whether everything left in the reader is zero bytes
fn rest_is_zero<R: Read>(reader: &mut R) -> Result<bool, StoreError> {
    let mut buf = [0u8; 4096];
    loop {
        match read_full(reader, &mut buf)? {
            0 => return Ok(true),
            n if buf[..n].iter().any(|b| *b != 0) => return Ok(false),
            _ => {}
        }
    }
}

/// Fill `buf` as far as the reader allows, returning the byte count
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, StoreError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn read_one(bytes: &[u8]) -> ReadOutcome {
        Record::read_from(&mut Cursor::new(bytes), bytes.len() as u64).unwrap()
    }

    #[test]
    fn test_record_roundtrip() {
        let record = Record::put(b"alice", b"100", None).unwrap();
        let encoded = record.encode();
        assert_eq!(encoded.len(), record.encoded_len());

        match read_one(&encoded) {
            ReadOutcome::Record(read) => assert_eq!(read, record),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_compressed_value_inflates() {
        let value = vec![7u8; 4096];
        let record = Record::put(b"big", &value, Some(3)).unwrap();
        assert!(record.compressed);
        assert!(record.value.len() < value.len());
        assert_eq!(inflate(record.value, true).unwrap(), value);
    }

    #[test]
    fn test_empty_input_is_end() {
        assert!(matches!(read_one(&[]), ReadOutcome::End));
    }

    #[test]
    fn test_truncated_record_is_torn() {
        let encoded = Record::put(b"key", b"value", None).unwrap().encode();
        assert!(matches!(read_one(&encoded[..5]), ReadOutcome::Torn(_)));
        assert!(matches!(
            read_one(&encoded[..encoded.len() - 1]),
            ReadOutcome::Torn(_)
        ));
    }

    #[test]
    fn test_flipped_bit_in_last_record_is_torn() {
        let mut encoded = Record::delete(b"key").unwrap().encode();
        encoded[HEADER_LEN] ^= 0x01;
        assert!(matches!(read_one(&encoded), ReadOutcome::Torn(_)));
    }

    #[test]
    fn test_flipped_bit_before_more_data_is_corrupt() {
        let mut log = Record::put(b"first", b"1", None).unwrap().encode();
        log[HEADER_LEN] ^= 0x01;
        log.extend(Record::put(b"second", b"2", None).unwrap().encode());
        assert!(matches!(read_one(&log), ReadOutcome::Corrupt(_)));
    }

    #[test]
    fn test_unknown_op_is_corrupt() {
        let mut encoded = Record::put(b"key", b"value", None).unwrap().encode();
        encoded[0] = 9;
        assert!(matches!(read_one(&encoded), ReadOutcome::Corrupt(_)));
    }

    #[test]
    fn test_zero_filled_tail_is_torn() {
        assert!(matches!(read_one(&[0u8; 64]), ReadOutcome::Torn(_)));

        let mut tail = vec![0u8; 64];
        tail[40] = 1;
        assert!(matches!(read_one(&tail), ReadOutcome::Corrupt(_)));
    }

    #[test]
    fn test_oversized_lengths_are_rejected() {
        let too_big = u32::MAX as usize + 1;
        assert!(matches!(
            checked_len("value", too_big),
            Err(StoreError::TooLarge { what: "value", len }) if len == too_big
        ));
        assert_eq!(checked_len("key", u32::MAX as usize).unwrap(), u32::MAX);
    }
}
