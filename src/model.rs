//! # Data Model
//!
//! Identifiers, partition keys and the assignment metadata a server receives
//! from the master. Everything here is plain data; behaviour lives in
//! [`crate::partition`] and [`crate::table`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a matrix, unique across the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MatrixId(pub i32);

impl fmt::Display for MatrixId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "M{}", self.0)
    }
}

/// Identifier of a partition, unique within one matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionId(pub i32);

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// Identifier of a training task (worker) that reports clocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub u32);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Logical SSP clock value
pub type Clock = u32;

/// Half-open range `[start, end)` over one matrix axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AxisRange {
    pub start: i64,
    pub end: i64,
}

impl AxisRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Number of indices covered by the range
    pub fn len(&self) -> u64 {
        (self.end - self.start).max(0) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    #[inline]
    pub fn contains(&self, index: i64) -> bool {
        index >= self.start && index < self.end
    }
}

impl fmt::Display for AxisRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Immutable identity of a partition: which matrix, which id, and the block
/// of rows and columns it owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionKey {
    pub partition_id: PartitionId,
    pub matrix_id: MatrixId,
    pub rows: AxisRange,
    pub cols: AxisRange,
}

impl PartitionKey {
    pub fn new(partition_id: PartitionId, matrix_id: MatrixId, rows: AxisRange, cols: AxisRange) -> Self {
        Self {
            partition_id,
            matrix_id,
            rows,
            cols,
        }
    }

    pub fn start_row(&self) -> i64 {
        self.rows.start
    }

    pub fn end_row(&self) -> i64 {
        self.rows.end
    }

    pub fn start_col(&self) -> i64 {
        self.cols.start
    }

    pub fn end_col(&self) -> i64 {
        self.cols.end
    }

    /// Whether `row` falls inside this partition's row range
    #[inline]
    pub fn contains_row(&self, row: i64) -> bool {
        self.rows.contains(row)
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} rows={} cols={}",
            self.matrix_id, self.partition_id, self.rows, self.cols
        )
    }
}

/// Element encoding of the rows stored in a partition.
///
/// The encoding itself is owned by the update layer; the store only carries
/// the tag so it can be handed back with the row bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RowType {
    #[default]
    DenseDouble,
    SparseDouble,
    DenseFloat,
    SparseFloat,
    DenseInt,
    SparseInt,
    SparseDoubleLongKey,
}

impl RowType {
    pub fn is_sparse(self) -> bool {
        matches!(
            self,
            RowType::SparseDouble
                | RowType::SparseFloat
                | RowType::SparseInt
                | RowType::SparseDoubleLongKey
        )
    }
}

/// One partition as described by the master's assignment message.
///
/// Ranges are optional because the protocol layer may omit them; a missing
/// range is rejected when the table is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionDescriptor {
    pub partition_id: PartitionId,
    #[serde(default)]
    pub rows: Option<AxisRange>,
    #[serde(default)]
    pub cols: Option<AxisRange>,
    #[serde(default)]
    pub row_type: RowType,
}

impl PartitionDescriptor {
    pub fn new(partition_id: i32, rows: AxisRange, cols: AxisRange, row_type: RowType) -> Self {
        Self {
            partition_id: PartitionId(partition_id),
            rows: Some(rows),
            cols: Some(cols),
            row_type,
        }
    }
}

/// Assignment of a matrix's partitions to this server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixAssignment {
    pub matrix_id: MatrixId,
    pub matrix_name: String,
    /// Configuration key/value pairs (load path, thread counts, ...)
    #[serde(default)]
    pub attributes: Vec<(String, String)>,
    pub partitions: Vec<PartitionDescriptor>,
}

impl MatrixAssignment {
    pub fn new(matrix_id: i32, matrix_name: impl Into<String>) -> Self {
        Self {
            matrix_id: MatrixId(matrix_id),
            matrix_name: matrix_name.into(),
            attributes: Vec::new(),
            partitions: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    pub fn with_partition(mut self, descriptor: PartitionDescriptor) -> Self {
        self.partitions.push(descriptor);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_range_contains() {
        let range = AxisRange::new(10, 20);
        assert!(range.contains(10));
        assert!(range.contains(19));
        assert!(!range.contains(20));
        assert!(!range.contains(9));
        assert_eq!(range.len(), 10);
        assert!(!range.is_empty());
        assert!(AxisRange::new(5, 5).is_empty());
    }

    #[test]
    fn test_row_type_sparsity() {
        assert!(RowType::SparseInt.is_sparse());
        assert!(RowType::SparseDoubleLongKey.is_sparse());
        assert!(!RowType::DenseFloat.is_sparse());
        assert!(!RowType::default().is_sparse());
    }

    #[test]
    fn test_assignment_json() {
        let json = r#"{
            "matrix_id": 3,
            "matrix_name": "w",
            "attributes": [["matrix.load.threads", "2"]],
            "partitions": [
                {"partition_id": 0, "rows": {"start": 0, "end": 4}, "cols": {"start": 0, "end": 8}, "row_type": "sparse-float"},
                {"partition_id": 1, "rows": {"start": 4, "end": 8}}
            ]
        }"#;
        let assignment: MatrixAssignment = serde_json::from_str(json).unwrap();
        assert_eq!(assignment.matrix_id, MatrixId(3));
        assert_eq!(assignment.partitions[0].row_type, RowType::SparseFloat);
        assert_eq!(assignment.partitions[1].cols, None);
        assert_eq!(assignment.partitions[1].row_type, RowType::DenseDouble);
    }
}
