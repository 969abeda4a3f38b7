//! Binary layout shared by partition files and table-level checkpoints.
//!
//! All integers are big-endian.
//!
//! Per-partition file (`{load_path}/{matrix_name}/{partition_id}`):
//! ```text
//! i32 matrix_id
//! i32 field_marker
//! <partition payload>
//! ```
//!
//! Table-level save stream:
//! ```text
//! i32 partition_count
//! repeated { i32 partition_id; <partition payload> }
//! ```

use crate::model::{MatrixId, PartitionId};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};
use thiserror::Error;

/// Marker written after the matrix id in a partition file: one partition per file.
pub const PARTITION_FILE_MARKER: i32 = 1;

/// Failure while reading or writing one partition.
#[derive(Debug, Error)]
pub enum PartitionIoError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("partition file belongs to {found}, expected {expected}")]
    MatrixMismatch { expected: MatrixId, found: MatrixId },
    #[error("unexpected bytes after partition payload")]
    TrailingBytes,
    #[error("row {row} outside partition row range [{start}, {end})")]
    RowOutOfRange { row: i64, start: i64, end: i64 },
    #[error("negative {what} in payload: {value}")]
    NegativeLength { what: &'static str, value: i32 },
    #[error("duplicate row {0} in payload")]
    DuplicateRow(i64),
}

impl PartitionIoError {
    /// Whether the error came from the underlying stream rather than the bytes
    pub fn is_io(&self) -> bool {
        matches!(self, PartitionIoError::Io(_))
    }
}

pub fn read_i32<R: Read + ?Sized>(reader: &mut R) -> io::Result<i32> {
    reader.read_i32::<BigEndian>()
}

pub fn read_i64<R: Read + ?Sized>(reader: &mut R) -> io::Result<i64> {
    reader.read_i64::<BigEndian>()
}

pub fn write_i32<W: Write + ?Sized>(writer: &mut W, value: i32) -> io::Result<()> {
    writer.write_i32::<BigEndian>(value)
}

pub fn write_i64<W: Write + ?Sized>(writer: &mut W, value: i64) -> io::Result<()> {
    writer.write_i64::<BigEndian>(value)
}

/// Read a non-negative length field.
pub fn read_len<R: Read + ?Sized>(reader: &mut R, what: &'static str) -> Result<usize, PartitionIoError> {
    let value = read_i32(reader)?;
    if value < 0 {
        return Err(PartitionIoError::NegativeLength { what, value });
    }
    Ok(value as usize)
}

/// Convert a length to its `i32` wire form.
pub fn len_to_i32(len: usize) -> io::Result<i32> {
    i32::try_from(len).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, format!("length {len} exceeds i32"))
    })
}

/// Consume the per-partition file header, checking the matrix id.
pub fn read_partition_header<R: Read + ?Sized>(
    reader: &mut R,
    expected: MatrixId,
) -> Result<(), PartitionIoError> {
    let found = MatrixId(read_i32(reader)?);
    let _field_marker = read_i32(reader)?;
    if found != expected {
        return Err(PartitionIoError::MatrixMismatch { expected, found });
    }
    Ok(())
}

pub fn write_partition_header<W: Write + ?Sized>(writer: &mut W, matrix_id: MatrixId) -> io::Result<()> {
    write_i32(writer, matrix_id.0)?;
    write_i32(writer, PARTITION_FILE_MARKER)
}

pub fn read_partition_id<R: Read + ?Sized>(reader: &mut R) -> io::Result<PartitionId> {
    read_i32(reader).map(PartitionId)
}

/// Fail unless the stream is exhausted.
pub fn expect_eof<R: Read + ?Sized>(reader: &mut R) -> Result<(), PartitionIoError> {
    let mut probe = [0u8; 1];
    loop {
        match reader.read(&mut probe) {
            Ok(0) => return Ok(()),
            Ok(_) => return Err(PartitionIoError::TrailingBytes),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}
