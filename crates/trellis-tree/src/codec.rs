//! Wire codec for log entry records and embedded tree indexes.
//!
//! Two length-delimited formats, both varint-based (unsigned LEB128,
//! 7 data bits per byte, 0x80 continuation bit):
//!
//! **Embedded index**: the per-entry snapshot of the tree, levels
//! ordered root (offset 0) to leaves:
//!
//! ```text
//! varint level_count
//! per level:
//!   varint key_count     key_count   x varint seq
//!   varint child_count   child_count x varint    -- flat: seq, offset, seq, offset, ...
//! ```
//!
//! `child_count` counts flat elements and must be even; decoding pairs
//! them back into `(seq, offset)`.
//!
//! **Node record**: one log entry:
//!
//! ```text
//! varint key_len      key bytes
//! u8 value_present    if 1: varint value_len, value bytes
//! varint index_len    index bytes (an encoded embedded index)
//! ```
//!
//! The codec preserves shape and ordering only; it never interprets
//! fields. Truncated or structurally invalid buffers decode to
//! `Corrupt`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use trellis_common::{Result, Seq, TrellisError};

/// Maximum encoded length of a varint (ceil(64 / 7)).
const MAX_VARINT_LEN: usize = 10;

/// Appends `value` to `buf` as an unsigned LEB128 varint.
pub fn put_uvarint(buf: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

/// Reads one unsigned LEB128 varint from `buf`.
///
/// `seq` identifies the entry being decoded, for error context.
pub fn get_uvarint(buf: &mut &[u8], seq: Seq) -> Result<u64> {
    let mut value = 0u64;
    let mut shift = 0u32;

    for _ in 0..MAX_VARINT_LEN {
        if !buf.has_remaining() {
            return Err(TrellisError::corrupt(seq, "truncated varint"));
        }
        let byte = buf.get_u8();
        if shift == 63 && byte > 1 {
            return Err(TrellisError::corrupt(seq, "varint overflows u64"));
        }
        value |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }

    Err(TrellisError::corrupt(seq, "varint too long"))
}

/// Reads a varint length and that many bytes from `buf`.
fn get_length_delimited(buf: &mut &[u8], seq: Seq, what: &str) -> Result<Bytes> {
    let len = get_uvarint(buf, seq)?;
    let len = usize::try_from(len)
        .map_err(|_| TrellisError::corrupt(seq, format!("{what} length overflows usize")))?;
    if buf.remaining() < len {
        return Err(TrellisError::corrupt(seq, format!("truncated {what}")));
    }
    let bytes = Bytes::copy_from_slice(&buf[..len]);
    buf.advance(len);
    Ok(bytes)
}

/// One node's slot inside an embedded index.
///
/// `keys` are seqs of the log entries carrying the actual key bytes;
/// `children` point at other nodes as `(entry seq, offset into that
/// entry's index)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Level {
    pub keys: Vec<Seq>,
    pub children: Vec<(Seq, u64)>,
}

/// A serialized snapshot of the tree carried by one log entry.
///
/// Offset 0 is the root of this snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmbeddedIndex {
    pub levels: Vec<Level>,
}

impl EmbeddedIndex {
    /// Encodes this index to bytes.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        put_uvarint(&mut buf, self.levels.len() as u64);
        for level in &self.levels {
            put_uvarint(&mut buf, level.keys.len() as u64);
            for &seq in &level.keys {
                put_uvarint(&mut buf, seq);
            }
            put_uvarint(&mut buf, (level.children.len() * 2) as u64);
            for &(seq, offset) in &level.children {
                put_uvarint(&mut buf, seq);
                put_uvarint(&mut buf, offset);
            }
        }
        buf.freeze()
    }

    /// Decodes an index from the `index` field of the entry at `seq`.
    pub fn decode(data: &[u8], seq: Seq) -> Result<Self> {
        let mut buf = data;

        let level_count = get_uvarint(&mut buf, seq)?;
        let mut levels = Vec::new();
        for _ in 0..level_count {
            let key_count = get_uvarint(&mut buf, seq)?;
            let mut keys = Vec::with_capacity(key_count.min(1024) as usize);
            for _ in 0..key_count {
                keys.push(get_uvarint(&mut buf, seq)?);
            }

            let child_count = get_uvarint(&mut buf, seq)?;
            if child_count % 2 != 0 {
                return Err(TrellisError::corrupt(seq, "odd child element count"));
            }
            let mut children = Vec::with_capacity((child_count / 2).min(1024) as usize);
            for _ in 0..child_count / 2 {
                let child_seq = get_uvarint(&mut buf, seq)?;
                let child_offset = get_uvarint(&mut buf, seq)?;
                children.push((child_seq, child_offset));
            }

            levels.push(Level { keys, children });
        }

        if buf.has_remaining() {
            return Err(TrellisError::corrupt(seq, "trailing bytes after index"));
        }
        Ok(Self { levels })
    }
}

/// One decoded log entry record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    /// Key written by this entry. Empty only on the header entry.
    pub key: Bytes,
    /// Value written by this entry, if any.
    pub value: Option<Bytes>,
    /// Encoded embedded index snapshot.
    pub index: Bytes,
}

impl NodeRecord {
    /// Encodes this record to bytes.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        put_uvarint(&mut buf, self.key.len() as u64);
        buf.put_slice(&self.key);
        match &self.value {
            Some(value) => {
                buf.put_u8(1);
                put_uvarint(&mut buf, value.len() as u64);
                buf.put_slice(value);
            }
            None => buf.put_u8(0),
        }
        put_uvarint(&mut buf, self.index.len() as u64);
        buf.put_slice(&self.index);
        buf.freeze()
    }

    /// Decodes the record of the log entry at `seq`.
    pub fn decode(data: &[u8], seq: Seq) -> Result<Self> {
        let mut buf = data;

        let key = get_length_delimited(&mut buf, seq, "key")?;

        if !buf.has_remaining() {
            return Err(TrellisError::corrupt(seq, "missing value marker"));
        }
        let value = match buf.get_u8() {
            0 => None,
            1 => Some(get_length_delimited(&mut buf, seq, "value")?),
            marker => {
                return Err(TrellisError::corrupt(
                    seq,
                    format!("invalid value marker: {marker}"),
                ))
            }
        };

        let index = get_length_delimited(&mut buf, seq, "index")?;

        if buf.has_remaining() {
            return Err(TrellisError::corrupt(seq, "trailing bytes after record"));
        }
        Ok(Self { key, value, index })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_uvarint(value: u64) -> Vec<u8> {
        let mut buf = BytesMut::new();
        put_uvarint(&mut buf, value);
        buf.to_vec()
    }

    #[test]
    fn test_uvarint_single_byte_values() {
        assert_eq!(encode_uvarint(0), vec![0x00]);
        assert_eq!(encode_uvarint(1), vec![0x01]);
        assert_eq!(encode_uvarint(127), vec![0x7f]);
    }

    #[test]
    fn test_uvarint_multi_byte_values() {
        assert_eq!(encode_uvarint(128), vec![0x80, 0x01]);
        assert_eq!(encode_uvarint(300), vec![0xac, 0x02]);
    }

    #[test]
    fn test_uvarint_roundtrip() {
        for value in [0, 1, 127, 128, 16383, 16384, 1 << 32, u64::MAX] {
            let encoded = encode_uvarint(value);
            let mut buf = encoded.as_slice();
            assert_eq!(get_uvarint(&mut buf, 0).unwrap(), value);
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn test_uvarint_truncated() {
        let mut buf: &[u8] = &[0x80];
        let err = get_uvarint(&mut buf, 3).unwrap_err();
        assert!(matches!(err, TrellisError::Corrupt { seq: 3, .. }));
    }

    #[test]
    fn test_uvarint_overflow() {
        // Eleven continuation bytes can never be a valid u64.
        let mut buf: &[u8] = &[0xff; 11];
        assert!(get_uvarint(&mut buf, 0).is_err());

        // Ten bytes whose top byte pushes past 64 bits.
        let mut buf: &[u8] = &[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x02];
        assert!(get_uvarint(&mut buf, 0).is_err());
    }

    #[test]
    fn test_index_roundtrip() {
        let index = EmbeddedIndex {
            levels: vec![
                Level {
                    keys: vec![7],
                    children: vec![(3, 1), (7, 2)],
                },
                Level {
                    keys: vec![1, 2],
                    children: vec![],
                },
                Level {
                    keys: vec![5, 6, 300],
                    children: vec![],
                },
            ],
        };

        let encoded = index.encode();
        let decoded = EmbeddedIndex::decode(&encoded, 7).unwrap();
        assert_eq!(decoded, index);
    }

    #[test]
    fn test_index_empty() {
        let index = EmbeddedIndex::default();
        let decoded = EmbeddedIndex::decode(&index.encode(), 0).unwrap();
        assert!(decoded.levels.is_empty());
    }

    #[test]
    fn test_index_odd_child_count_is_corrupt() {
        let mut buf = BytesMut::new();
        put_uvarint(&mut buf, 1); // one level
        put_uvarint(&mut buf, 0); // no keys
        put_uvarint(&mut buf, 3); // three flat child elements: unpairable
        put_uvarint(&mut buf, 1);
        put_uvarint(&mut buf, 2);
        put_uvarint(&mut buf, 3);

        let err = EmbeddedIndex::decode(&buf, 9).unwrap_err();
        assert!(matches!(err, TrellisError::Corrupt { seq: 9, .. }));
    }

    #[test]
    fn test_index_truncated_is_corrupt() {
        let index = EmbeddedIndex {
            levels: vec![Level {
                keys: vec![1, 2, 3],
                children: vec![],
            }],
        };
        let encoded = index.encode();
        let err = EmbeddedIndex::decode(&encoded[..encoded.len() - 1], 4).unwrap_err();
        assert!(matches!(err, TrellisError::Corrupt { seq: 4, .. }));
    }

    #[test]
    fn test_index_trailing_bytes_is_corrupt() {
        let mut encoded = EmbeddedIndex::default().encode().to_vec();
        encoded.push(0x00);
        assert!(EmbeddedIndex::decode(&encoded, 0).is_err());
    }

    #[test]
    fn test_record_roundtrip_with_value() {
        let record = NodeRecord {
            key: Bytes::from_static(b"key"),
            value: Some(Bytes::from_static(b"value")),
            index: EmbeddedIndex::default().encode(),
        };

        let decoded = NodeRecord::decode(&record.encode(), 1).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_record_roundtrip_without_value() {
        let record = NodeRecord {
            key: Bytes::from_static(b"key only"),
            value: None,
            index: Bytes::new(),
        };

        let decoded = NodeRecord::decode(&record.encode(), 2).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_record_empty_key() {
        let record = NodeRecord {
            key: Bytes::new(),
            value: None,
            index: Bytes::new(),
        };
        let decoded = NodeRecord::decode(&record.encode(), 0).unwrap();
        assert!(decoded.key.is_empty());
    }

    #[test]
    fn test_record_invalid_value_marker() {
        let mut buf = BytesMut::new();
        put_uvarint(&mut buf, 1);
        buf.put_u8(b'k');
        buf.put_u8(7); // neither 0 nor 1

        let err = NodeRecord::decode(&buf, 5).unwrap_err();
        assert!(matches!(err, TrellisError::Corrupt { seq: 5, .. }));
    }

    #[test]
    fn test_record_truncated_is_corrupt() {
        let record = NodeRecord {
            key: Bytes::from_static(b"key"),
            value: Some(Bytes::from_static(b"value")),
            index: Bytes::from_static(b"index bytes"),
        };
        let encoded = record.encode();

        for cut in [1, encoded.len() / 2, encoded.len() - 1] {
            assert!(NodeRecord::decode(&encoded[..cut], 0).is_err());
        }
    }

    #[test]
    fn test_record_trailing_bytes_is_corrupt() {
        let record = NodeRecord {
            key: Bytes::from_static(b"k"),
            value: None,
            index: Bytes::new(),
        };
        let mut encoded = record.encode().to_vec();
        encoded.push(0xAA);
        assert!(NodeRecord::decode(&encoded, 0).is_err());
    }
}
