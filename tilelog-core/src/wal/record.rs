//! Log record types and frame serialization

use crate::{Oid, Result, TileLogError, TransactionId, Tuple, TupleLocation};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Bytes of the length prefix
pub const LENGTH_SIZE: usize = 4;

/// Length prefix plus its own checksum
pub const HEADER_SIZE: usize = LENGTH_SIZE + 4;

/// Bytes of the trailing checksum
pub const CRC_SIZE: usize = 4;

/// kind (1) + txn id (8)
const TXN_BODY_SIZE: usize = 1 + 8;

/// db (8) + table (8) + two locations (12 each) + payload length (4)
const TUPLE_FIXED_SIZE: usize = 8 + 8 + 12 + 12 + 4;

/// Log record kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum LogRecordType {
    Begin = 1,
    Commit = 2,
    Abort = 3,
    TupleInsert = 4,
    TupleUpdate = 5,
    TupleDelete = 6,
}

impl LogRecordType {
    /// Whether records of this kind carry a tuple header
    pub fn is_tuple(&self) -> bool {
        matches!(
            self,
            LogRecordType::TupleInsert | LogRecordType::TupleUpdate | LogRecordType::TupleDelete
        )
    }
}

impl TryFrom<u8> for LogRecordType {
    type Error = TileLogError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(LogRecordType::Begin),
            2 => Ok(LogRecordType::Commit),
            3 => Ok(LogRecordType::Abort),
            4 => Ok(LogRecordType::TupleInsert),
            5 => Ok(LogRecordType::TupleUpdate),
            6 => Ok(LogRecordType::TupleDelete),
            _ => Err(TileLogError::InvalidFormat(format!(
                "Invalid log record type: {}",
                value
            ))),
        }
    }
}

/// Fields shared by every tuple record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TupleHeader {
    pub txn_id: TransactionId,
    pub database_id: Oid,
    pub table_id: Oid,
}

/// An immutable log entry
#[derive(Debug, Clone, PartialEq)]
pub enum LogRecord {
    Begin {
        txn_id: TransactionId,
    },
    Commit {
        txn_id: TransactionId,
    },
    Abort {
        txn_id: TransactionId,
    },
    Insert {
        header: TupleHeader,
        location: TupleLocation,
        payload: Bytes,
    },
    Update {
        header: TupleHeader,
        old_location: TupleLocation,
        new_location: TupleLocation,
        payload: Bytes,
    },
    Delete {
        header: TupleHeader,
        location: TupleLocation,
    },
}

/// Outcome of decoding one frame
#[derive(Debug)]
pub enum Frame {
    /// A complete record and the number of bytes it occupied
    Record(LogRecord, usize),
    /// The buffer ends before the frame does
    Truncated,
}

impl LogRecord {
    /// BEGIN marker
    pub fn begin(txn_id: TransactionId) -> Self {
        LogRecord::Begin { txn_id }
    }

    /// COMMIT marker
    pub fn commit(txn_id: TransactionId) -> Self {
        LogRecord::Commit { txn_id }
    }

    /// ABORT marker
    pub fn abort(txn_id: TransactionId) -> Self {
        LogRecord::Abort { txn_id }
    }

    /// Record kind
    pub fn record_type(&self) -> LogRecordType {
        match self {
            LogRecord::Begin { .. } => LogRecordType::Begin,
            LogRecord::Commit { .. } => LogRecordType::Commit,
            LogRecord::Abort { .. } => LogRecordType::Abort,
            LogRecord::Insert { .. } => LogRecordType::TupleInsert,
            LogRecord::Update { .. } => LogRecordType::TupleUpdate,
            LogRecord::Delete { .. } => LogRecordType::TupleDelete,
        }
    }

    /// Owning transaction
    pub fn txn_id(&self) -> TransactionId {
        match self {
            LogRecord::Begin { txn_id }
            | LogRecord::Commit { txn_id }
            | LogRecord::Abort { txn_id } => *txn_id,
            LogRecord::Insert { header, .. }
            | LogRecord::Update { header, .. }
            | LogRecord::Delete { header, .. } => header.txn_id,
        }
    }

    /// Tuple header, for tuple records
    pub fn tuple_header(&self) -> Option<&TupleHeader> {
        match self {
            LogRecord::Begin { .. } | LogRecord::Commit { .. } | LogRecord::Abort { .. } => None,
            LogRecord::Insert { header, .. }
            | LogRecord::Update { header, .. }
            | LogRecord::Delete { header, .. } => Some(header),
        }
    }

    /// Location written by this record, or the sentinel
    pub fn new_location(&self) -> TupleLocation {
        match self {
            LogRecord::Insert { location, .. } => *location,
            LogRecord::Update { new_location, .. } => *new_location,
            _ => TupleLocation::INVALID,
        }
    }

    /// Location removed by this record, or the sentinel
    pub fn old_location(&self) -> TupleLocation {
        match self {
            LogRecord::Delete { location, .. } => *location,
            LogRecord::Update { old_location, .. } => *old_location,
            _ => TupleLocation::INVALID,
        }
    }

    /// Serialized tuple contents, for INSERT and UPDATE
    pub fn payload(&self) -> Option<&Bytes> {
        match self {
            LogRecord::Insert { payload, .. } | LogRecord::Update { payload, .. } => Some(payload),
            _ => None,
        }
    }

    /// Whether this record ends its transaction
    pub fn is_terminal(&self) -> bool {
        matches!(self, LogRecord::Commit { .. } | LogRecord::Abort { .. })
    }

    /// Serialize a tuple into a record payload
    pub fn encode_tuple(tuple: &Tuple) -> Result<Bytes> {
        bincode::serialize(tuple)
            .map(Bytes::from)
            .map_err(|e| TileLogError::InvalidFormat(e.to_string()))
    }

    /// Deserialize the payload back into a tuple
    pub fn decode_tuple(&self) -> Result<Option<Tuple>> {
        match self.payload() {
            Some(payload) => bincode::deserialize(payload)
                .map(Some)
                .map_err(|e| TileLogError::InvalidFormat(e.to_string())),
            None => Ok(None),
        }
    }

    /// Size of the full frame in bytes
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.body_len() + CRC_SIZE
    }

    fn body_len(&self) -> usize {
        match self.payload() {
            Some(payload) => TXN_BODY_SIZE + TUPLE_FIXED_SIZE + payload.len(),
            None if self.record_type().is_tuple() => TXN_BODY_SIZE + TUPLE_FIXED_SIZE,
            None => TXN_BODY_SIZE,
        }
    }

    /// Append the framed record to `buf`
    ///
    /// Format:
    /// - 4 bytes: body length
    /// - 4 bytes: CRC32 of the length bytes
    /// - 1 byte: record type
    /// - 8 bytes: transaction id
    /// - tuple records only: database id (8), table id (8), new location
    ///   (8 + 4), old location (8 + 4), payload length (4), payload
    /// - 4 bytes: CRC32 of the body
    pub fn encode_into(&self, buf: &mut BytesMut) {
        let body_len = self.body_len();
        buf.reserve(HEADER_SIZE + body_len + CRC_SIZE);
        let length = (body_len as u32).to_le_bytes();
        buf.put_slice(&length);
        buf.put_u32_le(crc32fast::hash(&length));

        let body_start = buf.len();
        buf.put_u8(self.record_type() as u8);
        buf.put_u64_le(self.txn_id().as_u64());

        if let Some(header) = self.tuple_header() {
            buf.put_u64_le(header.database_id);
            buf.put_u64_le(header.table_id);
            put_location(buf, self.new_location());
            put_location(buf, self.old_location());
            match self.payload() {
                Some(payload) => {
                    buf.put_u32_le(payload.len() as u32);
                    buf.put_slice(payload);
                }
                None => buf.put_u32_le(0),
            }
        }

        let checksum = crc32fast::hash(&buf[body_start..]);
        buf.put_u32_le(checksum);
    }

    /// Serialize into a standalone frame
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.frame_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Body length announced by the frame header at the front of `data`.
    ///
    /// `None` if the header is incomplete; a header whose checksum does not
    /// match is an error, so a damaged length is never mistaken for a
    /// frame that runs past the end of the file.
    pub fn frame_body_len(data: &[u8]) -> Result<Option<usize>> {
        if data.len() < HEADER_SIZE {
            return Ok(None);
        }
        let length = &data[..LENGTH_SIZE];
        let expected = (&data[LENGTH_SIZE..HEADER_SIZE]).get_u32_le();
        let actual = crc32fast::hash(length);
        if expected != actual {
            return Err(TileLogError::ChecksumMismatch { expected, actual });
        }
        Ok(Some((&length[..]).get_u32_le() as usize))
    }

    /// Decode one frame from the front of `data`, validating its checksums
    pub fn decode_frame(data: &[u8]) -> Result<Frame> {
        let Some(body_len) = Self::frame_body_len(data)? else {
            return Ok(Frame::Truncated);
        };
        if body_len > crate::config::MAX_RECORD_SIZE {
            return Err(TileLogError::InvalidFormat(format!(
                "Record length {} exceeds maximum",
                body_len
            )));
        }

        let total = HEADER_SIZE + body_len + CRC_SIZE;
        if data.len() < total {
            return Ok(Frame::Truncated);
        }

        let body = &data[HEADER_SIZE..HEADER_SIZE + body_len];
        let expected = (&data[HEADER_SIZE + body_len..total]).get_u32_le();
        let actual = crc32fast::hash(body);
        if expected != actual {
            return Err(TileLogError::ChecksumMismatch { expected, actual });
        }

        let record = Self::decode_body(body)?;
        Ok(Frame::Record(record, total))
    }

    fn decode_body(mut body: &[u8]) -> Result<Self> {
        need(body, TXN_BODY_SIZE)?;
        let kind = LogRecordType::try_from(body.get_u8())?;
        let txn_id = TransactionId(body.get_u64_le());

        let record = match kind {
            LogRecordType::Begin => LogRecord::Begin { txn_id },
            LogRecordType::Commit => LogRecord::Commit { txn_id },
            LogRecordType::Abort => LogRecord::Abort { txn_id },
            LogRecordType::TupleInsert
            | LogRecordType::TupleUpdate
            | LogRecordType::TupleDelete => {
                need(body, TUPLE_FIXED_SIZE)?;
                let header = TupleHeader {
                    txn_id,
                    database_id: body.get_u64_le(),
                    table_id: body.get_u64_le(),
                };
                let new_location = get_location(&mut body);
                let old_location = get_location(&mut body);
                let payload_len = body.get_u32_le() as usize;
                need(body, payload_len)?;
                let payload = Bytes::copy_from_slice(&body[..payload_len]);
                body.advance(payload_len);

                match kind {
                    LogRecordType::TupleInsert => LogRecord::Insert {
                        header,
                        location: new_location,
                        payload,
                    },
                    LogRecordType::TupleUpdate => LogRecord::Update {
                        header,
                        old_location,
                        new_location,
                        payload,
                    },
                    _ => LogRecord::Delete {
                        header,
                        location: old_location,
                    },
                }
            }
        };

        if body.has_remaining() {
            return Err(TileLogError::InvalidFormat(format!(
                "{} trailing bytes after {:?} record",
                body.remaining(),
                kind
            )));
        }

        Ok(record)
    }
}

fn put_location(buf: &mut BytesMut, location: TupleLocation) {
    buf.put_u64_le(location.block);
    buf.put_u32_le(location.offset);
}

fn get_location(buf: &mut &[u8]) -> TupleLocation {
    let block = buf.get_u64_le();
    let offset = buf.get_u32_le();
    TupleLocation { block, offset }
}

fn need(buf: &[u8], len: usize) -> Result<()> {
    if buf.remaining() < len {
        return Err(TileLogError::InvalidFormat(format!(
            "Record body too short: need {} bytes, have {}",
            len,
            buf.remaining()
        )));
    }
    Ok(())
}
