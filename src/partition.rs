//! # Matrix Partition
//!
//! One contiguous block of a matrix owned by this server: its key, the row
//! encoding tag, the task clocks, and the row payload.
//!
//! ## Payload format
//!
//! ```text
//! i32 row_count
//! repeated row_count {
//!   i64 row_id      (absolute, inside the partition's row range)
//!   i32 byte_len
//!   u8[byte_len]    (opaque row bytes, encoded per RowType)
//! }
//! ```
//!
//! Rows are written in ascending id order, so equal payloads always produce
//! equal bytes. Clocks are runtime state and are not part of the payload.

use crate::clock::{ClockError, ClockVector};
use crate::format::{self, PartitionIoError};
use crate::model::{Clock, PartitionId, PartitionKey, RowType, TaskId};
use std::collections::BTreeMap;
use std::io::{Read, Write};

/// Row storage of a partition, keyed by absolute row index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionPayload {
    rows: BTreeMap<i64, Vec<u8>>,
}

impl PartitionPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn get(&self, row: i64) -> Option<&[u8]> {
        self.rows.get(&row).map(Vec::as_slice)
    }

    /// Total row bytes held, excluding framing
    pub fn byte_size(&self) -> usize {
        self.rows.values().map(Vec::len).sum()
    }

    pub fn rows(&self) -> impl Iterator<Item = (i64, &[u8])> {
        self.rows.iter().map(|(row, bytes)| (*row, bytes.as_slice()))
    }

    /// Decode one payload, validating every row against `key`.
    pub fn read_from<R: Read + ?Sized>(reader: &mut R, key: &PartitionKey) -> Result<Self, PartitionIoError> {
        let count = format::read_len(reader, "row count")?;
        let mut rows = BTreeMap::new();
        for _ in 0..count {
            let row = format::read_i64(reader)?;
            if !key.contains_row(row) {
                return Err(PartitionIoError::RowOutOfRange {
                    row,
                    start: key.start_row(),
                    end: key.end_row(),
                });
            }
            let len = format::read_len(reader, "row length")?;
            // length comes off the wire, so grow the buffer as bytes arrive
            let mut bytes = Vec::new();
            (&mut *reader).take(len as u64).read_to_end(&mut bytes)?;
            if bytes.len() != len {
                return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
            }
            if rows.insert(row, bytes).is_some() {
                return Err(PartitionIoError::DuplicateRow(row));
            }
        }
        Ok(Self { rows })
    }

    pub fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> Result<(), PartitionIoError> {
        format::write_i32(writer, format::len_to_i32(self.rows.len())?)?;
        for (row, bytes) in &self.rows {
            format::write_i64(writer, *row)?;
            format::write_i32(writer, format::len_to_i32(bytes.len())?)?;
            writer.write_all(bytes)?;
        }
        Ok(())
    }
}

/// A partition of a server-side matrix.
#[derive(Debug, Clone)]
pub struct MatrixPartition {
    key: PartitionKey,
    row_type: RowType,
    clocks: ClockVector,
    payload: PartitionPayload,
}

impl MatrixPartition {
    /// Create an empty partition: no rows, no reported clocks.
    pub fn new(key: PartitionKey, row_type: RowType) -> Self {
        Self {
            key,
            row_type,
            clocks: ClockVector::new(),
            payload: PartitionPayload::new(),
        }
    }

    pub fn key(&self) -> &PartitionKey {
        &self.key
    }

    pub fn id(&self) -> PartitionId {
        self.key.partition_id
    }

    pub fn row_type(&self) -> RowType {
        self.row_type
    }

    pub fn payload(&self) -> &PartitionPayload {
        &self.payload
    }

    /// Replace the payload with one decoded from `reader`.
    ///
    /// The reader must be positioned after any header. The current payload is
    /// kept if decoding fails part way.
    pub fn load<R: Read + ?Sized>(&mut self, reader: &mut R) -> Result<(), PartitionIoError> {
        self.payload = PartitionPayload::read_from(reader, &self.key)?;
        Ok(())
    }

    /// Swap in an already decoded payload, returning the old one.
    pub(crate) fn replace_payload(&mut self, payload: PartitionPayload) -> PartitionPayload {
        std::mem::replace(&mut self.payload, payload)
    }

    /// Serialize the payload in the format [`MatrixPartition::load`] reads.
    pub fn save<W: Write + ?Sized>(&self, writer: &mut W) -> Result<(), PartitionIoError> {
        self.payload.write_to(writer)
    }

    /// Serialize the payload into a fresh buffer.
    pub fn save_to_vec(&self) -> Result<Vec<u8>, PartitionIoError> {
        let mut buf = Vec::with_capacity(4 + self.payload.byte_size() + 12 * self.payload.row_count());
        self.save(&mut buf)?;
        Ok(buf)
    }

    /// Aggregate (minimum) clock across reporting tasks
    pub fn clock(&self) -> Clock {
        self.clocks.aggregate()
    }

    pub fn task_clock(&self, task: TaskId) -> Option<Clock> {
        self.clocks.get(task)
    }

    pub fn clocks(&self) -> &ClockVector {
        &self.clocks
    }

    pub fn set_clock(&mut self, task: TaskId, clock: Clock) -> Result<(), ClockError> {
        self.clocks.advance(self.key.partition_id, task, clock)
    }

    pub(crate) fn check_clock(&self, task: TaskId, clock: Clock) -> Result<(), ClockError> {
        self.clocks.check(self.key.partition_id, task, clock)
    }

    /// Store the bytes of `row`, returning the previous bytes if any.
    pub fn put_row(&mut self, row: i64, bytes: Vec<u8>) -> Result<Option<Vec<u8>>, PartitionIoError> {
        if !self.key.contains_row(row) {
            return Err(PartitionIoError::RowOutOfRange {
                row,
                start: self.key.start_row(),
                end: self.key.end_row(),
            });
        }
        Ok(self.payload.rows.insert(row, bytes))
    }

    pub fn row(&self, row: i64) -> Option<&[u8]> {
        self.payload.get(row)
    }

    pub fn remove_row(&mut self, row: i64) -> Option<Vec<u8>> {
        self.payload.rows.remove(&row)
    }

    pub fn row_count(&self) -> usize {
        self.payload.row_count()
    }

    /// Row bytes held, excluding framing
    pub fn payload_bytes(&self) -> usize {
        self.payload.byte_size()
    }

    /// Drop all rows. Clocks are kept.
    pub fn clear(&mut self) {
        self.payload = PartitionPayload::new();
    }

    pub fn stats(&self) -> PartitionStats {
        PartitionStats {
            partition_id: self.key.partition_id,
            rows: self.payload.row_count(),
            payload_bytes: self.payload_bytes(),
            reporting_tasks: self.clocks.task_count(),
            clock: self.clock(),
        }
    }
}

/// Statistics for a single partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionStats {
    pub partition_id: PartitionId,
    pub rows: usize,
    pub payload_bytes: usize,
    pub reporting_tasks: usize,
    pub clock: Clock,
}
