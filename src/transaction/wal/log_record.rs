use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use crate::common::types::{Lsn, PageId, Rid, TxnId, INVALID_LSN};

/// Error type for log record operations
#[derive(Error, Debug)]
pub enum LogRecordError {
    /// The buffer ends before the record does; during recovery this marks
    /// the torn tail of the log.
    #[error("Truncated log record")]
    Truncated,

    #[error("Invalid log record format: {0}")]
    InvalidFormat(String),
}

/// Result type for log record operations
pub type Result<T> = std::result::Result<T, LogRecordError>;

/// Types of log records supported by the WAL system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum LogRecordType {
    Begin = 1,
    Commit = 2,
    Abort = 3,
    Insert = 4,
    MarkDelete = 5,
    RollbackDelete = 6,
    ApplyDelete = 7,
    Update = 8,
    NewPage = 9,
}

impl LogRecordType {
    fn from_u32(raw: u32) -> Option<Self> {
        Some(match raw {
            1 => LogRecordType::Begin,
            2 => LogRecordType::Commit,
            3 => LogRecordType::Abort,
            4 => LogRecordType::Insert,
            5 => LogRecordType::MarkDelete,
            6 => LogRecordType::RollbackDelete,
            7 => LogRecordType::ApplyDelete,
            8 => LogRecordType::Update,
            9 => LogRecordType::NewPage,
            _ => return None,
        })
    }
}

/// Type-specific payload of a log record. Tuple images are opaque byte
/// blobs, written with a 4-byte length prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogPayload {
    /// BEGIN / COMMIT / ABORT carry no payload.
    Transaction,
    Insert {
        rid: Rid,
        tuple: Vec<u8>,
    },
    /// Shared by MARKDELETE, ROLLBACKDELETE and APPLYDELETE.
    Delete {
        rid: Rid,
        tuple: Vec<u8>,
    },
    Update {
        rid: Rid,
        old_tuple: Vec<u8>,
        new_tuple: Vec<u8>,
    },
    NewPage {
        prev_page_id: PageId,
        page_id: PageId,
    },
}

/// A write-ahead log record.
///
/// On disk: a 20-byte little-endian header `(size, lsn, txn_id, prev_lsn,
/// type)` followed by the payload; `size` includes the header.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub size: u32,
    pub lsn: Lsn,
    pub txn_id: TxnId,
    pub prev_lsn: Lsn,
    pub record_type: LogRecordType,
    pub payload: LogPayload,
}

/// Header bytes: size, lsn, txn_id, prev_lsn, record type.
pub const HEADER_SIZE: usize = 20;

fn tuple_size(tuple: &[u8]) -> usize {
    4 + tuple.len()
}

impl LogRecord {
    fn new(txn_id: TxnId, prev_lsn: Lsn, record_type: LogRecordType, payload: LogPayload) -> Self {
        let payload_size = match &payload {
            LogPayload::Transaction => 0,
            LogPayload::Insert { tuple, .. } | LogPayload::Delete { tuple, .. } => {
                Rid::ENCODED_SIZE + tuple_size(tuple)
            }
            LogPayload::Update {
                old_tuple,
                new_tuple,
                ..
            } => Rid::ENCODED_SIZE + tuple_size(old_tuple) + tuple_size(new_tuple),
            LogPayload::NewPage { .. } => 8,
        };
        Self {
            size: (HEADER_SIZE + payload_size) as u32,
            lsn: INVALID_LSN,
            txn_id,
            prev_lsn,
            record_type,
            payload,
        }
    }

    pub fn new_begin(txn_id: TxnId) -> Self {
        Self::new(txn_id, INVALID_LSN, LogRecordType::Begin, LogPayload::Transaction)
    }

    pub fn new_commit(txn_id: TxnId, prev_lsn: Lsn) -> Self {
        Self::new(txn_id, prev_lsn, LogRecordType::Commit, LogPayload::Transaction)
    }

    pub fn new_abort(txn_id: TxnId, prev_lsn: Lsn) -> Self {
        Self::new(txn_id, prev_lsn, LogRecordType::Abort, LogPayload::Transaction)
    }

    pub fn new_insert(txn_id: TxnId, prev_lsn: Lsn, rid: Rid, tuple: Vec<u8>) -> Self {
        Self::new(
            txn_id,
            prev_lsn,
            LogRecordType::Insert,
            LogPayload::Insert { rid, tuple },
        )
    }

    pub fn new_mark_delete(txn_id: TxnId, prev_lsn: Lsn, rid: Rid, tuple: Vec<u8>) -> Self {
        Self::new(
            txn_id,
            prev_lsn,
            LogRecordType::MarkDelete,
            LogPayload::Delete { rid, tuple },
        )
    }

    pub fn new_rollback_delete(txn_id: TxnId, prev_lsn: Lsn, rid: Rid, tuple: Vec<u8>) -> Self {
        Self::new(
            txn_id,
            prev_lsn,
            LogRecordType::RollbackDelete,
            LogPayload::Delete { rid, tuple },
        )
    }

    pub fn new_apply_delete(txn_id: TxnId, prev_lsn: Lsn, rid: Rid, tuple: Vec<u8>) -> Self {
        Self::new(
            txn_id,
            prev_lsn,
            LogRecordType::ApplyDelete,
            LogPayload::Delete { rid, tuple },
        )
    }

    pub fn new_update(
        txn_id: TxnId,
        prev_lsn: Lsn,
        rid: Rid,
        old_tuple: Vec<u8>,
        new_tuple: Vec<u8>,
    ) -> Self {
        Self::new(
            txn_id,
            prev_lsn,
            LogRecordType::Update,
            LogPayload::Update {
                rid,
                old_tuple,
                new_tuple,
            },
        )
    }

    pub fn new_new_page(
        txn_id: TxnId,
        prev_lsn: Lsn,
        prev_page_id: PageId,
        page_id: PageId,
    ) -> Self {
        Self::new(
            txn_id,
            prev_lsn,
            LogRecordType::NewPage,
            LogPayload::NewPage {
                prev_page_id,
                page_id,
            },
        )
    }

    /// Serialize the record to its on-disk form.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.size as usize];
        LittleEndian::write_u32(&mut buf[0..4], self.size);
        LittleEndian::write_u32(&mut buf[4..8], self.lsn);
        LittleEndian::write_u32(&mut buf[8..12], self.txn_id);
        LittleEndian::write_u32(&mut buf[12..16], self.prev_lsn);
        LittleEndian::write_u32(&mut buf[16..20], self.record_type as u32);

        let mut pos = HEADER_SIZE;
        match &self.payload {
            LogPayload::Transaction => {}
            LogPayload::Insert { rid, tuple } | LogPayload::Delete { rid, tuple } => {
                buf[pos..pos + Rid::ENCODED_SIZE].copy_from_slice(&rid.to_le_bytes());
                pos += Rid::ENCODED_SIZE;
                write_tuple(&mut buf, &mut pos, tuple);
            }
            LogPayload::Update {
                rid,
                old_tuple,
                new_tuple,
            } => {
                buf[pos..pos + Rid::ENCODED_SIZE].copy_from_slice(&rid.to_le_bytes());
                pos += Rid::ENCODED_SIZE;
                write_tuple(&mut buf, &mut pos, old_tuple);
                write_tuple(&mut buf, &mut pos, new_tuple);
            }
            LogPayload::NewPage {
                prev_page_id,
                page_id,
            } => {
                LittleEndian::write_u32(&mut buf[pos..pos + 4], *prev_page_id);
                LittleEndian::write_u32(&mut buf[pos + 4..pos + 8], *page_id);
            }
        }

        buf
    }

    /// Deserialize a record from the front of `data`. `Truncated` means the
    /// buffer ends before the record does (torn write or chunk boundary).
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(LogRecordError::Truncated);
        }

        let size = LittleEndian::read_u32(&data[0..4]);
        if (size as usize) < HEADER_SIZE {
            return Err(LogRecordError::InvalidFormat(format!(
                "record size {} below header size",
                size
            )));
        }
        if size as usize > data.len() {
            return Err(LogRecordError::Truncated);
        }

        let lsn = LittleEndian::read_u32(&data[4..8]);
        let txn_id = LittleEndian::read_u32(&data[8..12]);
        let prev_lsn = LittleEndian::read_u32(&data[12..16]);
        let raw_type = LittleEndian::read_u32(&data[16..20]);
        let record_type = LogRecordType::from_u32(raw_type)
            .ok_or_else(|| LogRecordError::InvalidFormat(format!("unknown type {}", raw_type)))?;

        let body = &data[HEADER_SIZE..size as usize];
        let payload = match record_type {
            LogRecordType::Begin | LogRecordType::Commit | LogRecordType::Abort => {
                LogPayload::Transaction
            }
            LogRecordType::Insert => {
                let (rid, mut pos) = read_rid(body)?;
                let tuple = read_tuple(body, &mut pos)?;
                LogPayload::Insert { rid, tuple }
            }
            LogRecordType::MarkDelete
            | LogRecordType::RollbackDelete
            | LogRecordType::ApplyDelete => {
                let (rid, mut pos) = read_rid(body)?;
                let tuple = read_tuple(body, &mut pos)?;
                LogPayload::Delete { rid, tuple }
            }
            LogRecordType::Update => {
                let (rid, mut pos) = read_rid(body)?;
                let old_tuple = read_tuple(body, &mut pos)?;
                let new_tuple = read_tuple(body, &mut pos)?;
                LogPayload::Update {
                    rid,
                    old_tuple,
                    new_tuple,
                }
            }
            LogRecordType::NewPage => {
                if body.len() < 8 {
                    return Err(LogRecordError::Truncated);
                }
                LogPayload::NewPage {
                    prev_page_id: LittleEndian::read_u32(&body[0..4]),
                    page_id: LittleEndian::read_u32(&body[4..8]),
                }
            }
        };

        Ok(Self {
            size,
            lsn,
            txn_id,
            prev_lsn,
            record_type,
            payload,
        })
    }

    /// RID targeted by a data record, if any.
    pub fn rid(&self) -> Option<Rid> {
        match &self.payload {
            LogPayload::Insert { rid, .. }
            | LogPayload::Delete { rid, .. }
            | LogPayload::Update { rid, .. } => Some(*rid),
            _ => None,
        }
    }
}

fn write_tuple(buf: &mut [u8], pos: &mut usize, tuple: &[u8]) {
    LittleEndian::write_u32(&mut buf[*pos..*pos + 4], tuple.len() as u32);
    *pos += 4;
    buf[*pos..*pos + tuple.len()].copy_from_slice(tuple);
    *pos += tuple.len();
}

fn read_rid(body: &[u8]) -> Result<(Rid, usize)> {
    if body.len() < Rid::ENCODED_SIZE {
        return Err(LogRecordError::Truncated);
    }
    Ok((Rid::from_le_bytes(body), Rid::ENCODED_SIZE))
}

fn read_tuple(body: &[u8], pos: &mut usize) -> Result<Vec<u8>> {
    if body.len() < *pos + 4 {
        return Err(LogRecordError::Truncated);
    }
    let len = LittleEndian::read_u32(&body[*pos..*pos + 4]) as usize;
    *pos += 4;
    if body.len() < *pos + len {
        return Err(LogRecordError::Truncated);
    }
    let tuple = body[*pos..*pos + len].to_vec();
    *pos += len;
    Ok(tuple)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_round_trip() {
        let mut record = LogRecord::new_begin(2);
        record.lsn = 1;
        let bytes = record.serialize();
        assert_eq!(bytes.len(), HEADER_SIZE);

        let parsed = LogRecord::deserialize(&bytes).unwrap();
        assert_eq!(parsed.lsn, 1);
        assert_eq!(parsed.txn_id, 2);
        assert_eq!(parsed.prev_lsn, INVALID_LSN);
        assert_eq!(parsed.record_type, LogRecordType::Begin);
        assert_eq!(parsed.payload, LogPayload::Transaction);
    }

    #[test]
    fn test_insert_round_trip() {
        let mut record = LogRecord::new_insert(5, 8, Rid::new(3, 2), vec![1, 2, 3]);
        record.lsn = 10;
        let bytes = record.serialize();
        assert_eq!(bytes.len() as u32, record.size);

        let parsed = LogRecord::deserialize(&bytes).unwrap();
        assert_eq!(parsed.record_type, LogRecordType::Insert);
        assert_eq!(
            parsed.payload,
            LogPayload::Insert {
                rid: Rid::new(3, 2),
                tuple: vec![1, 2, 3]
            }
        );
    }

    #[test]
    fn test_update_round_trip() {
        let mut record =
            LogRecord::new_update(5, 8, Rid::new(3, 2), vec![1, 2, 3], vec![4, 5, 6, 7]);
        record.lsn = 11;
        let parsed = LogRecord::deserialize(&record.serialize()).unwrap();
        match parsed.payload {
            LogPayload::Update {
                rid,
                old_tuple,
                new_tuple,
            } => {
                assert_eq!(rid, Rid::new(3, 2));
                assert_eq!(old_tuple, vec![1, 2, 3]);
                assert_eq!(new_tuple, vec![4, 5, 6, 7]);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_new_page_round_trip() {
        let mut record = LogRecord::new_new_page(1, 4, 7, 9);
        record.lsn = 5;
        let parsed = LogRecord::deserialize(&record.serialize()).unwrap();
        assert_eq!(
            parsed.payload,
            LogPayload::NewPage {
                prev_page_id: 7,
                page_id: 9
            }
        );
    }

    #[test]
    fn test_truncated_record_detected() {
        let mut record = LogRecord::new_insert(5, 8, Rid::new(3, 2), vec![1; 64]);
        record.lsn = 1;
        let bytes = record.serialize();

        assert!(matches!(
            LogRecord::deserialize(&bytes[..10]),
            Err(LogRecordError::Truncated)
        ));
        assert!(matches!(
            LogRecord::deserialize(&bytes[..bytes.len() - 1]),
            Err(LogRecordError::Truncated)
        ));
    }

    #[test]
    fn test_garbage_header_rejected() {
        let bytes = [0xFFu8; HEADER_SIZE];
        assert!(matches!(
            LogRecord::deserialize(&bytes),
            Err(LogRecordError::Truncated) | Err(LogRecordError::InvalidFormat(_))
        ));
    }
}
