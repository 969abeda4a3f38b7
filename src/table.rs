//! # Partition Table
//!
//! The matrix-scoped map from partition id to [`MatrixPartition`], built once
//! from the master's assignment. Partitions keep assignment order, which is
//! the order bulk I/O stripes over.

use crate::config::{ATTR_LOAD_PATH, ATTR_LOAD_THREADS, ATTR_SAVE_THREADS};
use crate::model::{AxisRange, MatrixAssignment, MatrixId, PartitionId, PartitionKey};
use crate::partition::MatrixPartition;
use hashbrown::HashMap;
use std::path::PathBuf;
use thiserror::Error;

/// Malformed assignment metadata. The table is never partially built.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    #[error("partition {partition_id} of matrix {matrix_id} has no {axis} range")]
    MissingRange {
        matrix_id: MatrixId,
        partition_id: PartitionId,
        axis: &'static str,
    },
    #[error("partition {partition_id} of matrix {matrix_id} has empty {axis} range {range}")]
    EmptyRange {
        matrix_id: MatrixId,
        partition_id: PartitionId,
        axis: &'static str,
        range: AxisRange,
    },
    #[error("duplicate partition {partition_id} in matrix {matrix_id}")]
    DuplicatePartition {
        matrix_id: MatrixId,
        partition_id: PartitionId,
    },
}

#[derive(Debug, Clone)]
pub struct PartitionTable {
    matrix_id: MatrixId,
    matrix_name: String,
    attributes: HashMap<String, String>,
    /// Partitions in assignment order
    partitions: Vec<MatrixPartition>,
    /// partition id -> position in `partitions`
    index: HashMap<PartitionId, usize>,
}

impl PartitionTable {
    /// Build an empty partition per descriptor.
    pub fn from_assignment(assignment: &MatrixAssignment) -> Result<Self, TableError> {
        let matrix_id = assignment.matrix_id;
        let mut partitions = Vec::with_capacity(assignment.partitions.len());
        let mut index = HashMap::with_capacity(assignment.partitions.len());

        for descriptor in &assignment.partitions {
            let partition_id = descriptor.partition_id;
            let rows = require_range(matrix_id, partition_id, "row", descriptor.rows)?;
            let cols = require_range(matrix_id, partition_id, "column", descriptor.cols)?;
            if index.insert(partition_id, partitions.len()).is_some() {
                return Err(TableError::DuplicatePartition {
                    matrix_id,
                    partition_id,
                });
            }
            let key = PartitionKey::new(partition_id, matrix_id, rows, cols);
            partitions.push(MatrixPartition::new(key, descriptor.row_type));
        }

        // Later pairs win, matching how the configuration store layers values
        let attributes = assignment.attributes.iter().cloned().collect();

        Ok(Self {
            matrix_id,
            matrix_name: assignment.matrix_name.clone(),
            attributes,
            partitions,
            index,
        })
    }

    pub fn matrix_id(&self) -> MatrixId {
        self.matrix_id
    }

    pub fn matrix_name(&self) -> &str {
        &self.matrix_name
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Set an attribute unless the assignment already carried one.
    pub fn set_default_attribute(&mut self, key: &str, value: impl Into<String>) {
        self.attributes
            .entry(key.to_string())
            .or_insert_with(|| value.into());
    }

    pub fn load_path(&self) -> Option<PathBuf> {
        self.attribute(ATTR_LOAD_PATH)
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from)
    }

    pub fn load_threads_attr(&self) -> Option<&str> {
        self.attribute(ATTR_LOAD_THREADS)
    }

    pub fn save_threads_attr(&self) -> Option<&str> {
        self.attribute(ATTR_SAVE_THREADS)
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn get(&self, id: PartitionId) -> Option<&MatrixPartition> {
        self.index.get(&id).map(|&i| &self.partitions[i])
    }

    pub fn get_mut(&mut self, id: PartitionId) -> Option<&mut MatrixPartition> {
        match self.index.get(&id) {
            Some(&i) => Some(&mut self.partitions[i]),
            None => None,
        }
    }

    /// Position of `id` in assignment order
    pub fn position(&self, id: PartitionId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    /// Keys in assignment order
    pub fn keys(&self) -> impl Iterator<Item = &PartitionKey> {
        self.partitions.iter().map(MatrixPartition::key)
    }

    pub fn partitions(&self) -> &[MatrixPartition] {
        &self.partitions
    }

    /// Mutable access to every partition. The slice cannot be resized, so the
    /// id index stays valid.
    pub fn partitions_mut(&mut self) -> &mut [MatrixPartition] {
        &mut self.partitions
    }
}

fn require_range(
    matrix_id: MatrixId,
    partition_id: PartitionId,
    axis: &'static str,
    range: Option<AxisRange>,
) -> Result<AxisRange, TableError> {
    let range = range.ok_or(TableError::MissingRange {
        matrix_id,
        partition_id,
        axis,
    })?;
    if range.is_empty() {
        return Err(TableError::EmptyRange {
            matrix_id,
            partition_id,
            axis,
            range,
        });
    }
    Ok(range)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PartitionDescriptor, RowType};

    fn assignment(ids: &[i32]) -> MatrixAssignment {
        let mut assignment = MatrixAssignment::new(7, "weights");
        for &id in ids {
            let start = id as i64 * 10;
            assignment = assignment.with_partition(PartitionDescriptor::new(
                id,
                AxisRange::new(start, start + 10),
                AxisRange::new(0, 100),
                RowType::DenseDouble,
            ));
        }
        assignment
    }

    #[test]
    fn test_build_preserves_order_and_index() {
        let table = PartitionTable::from_assignment(&assignment(&[4, 1, 3, 0])).unwrap();
        let ids: Vec<i32> = table.keys().map(|k| k.partition_id.0).collect();
        assert_eq!(ids, vec![4, 1, 3, 0]);
        assert_eq!(table.len(), 4);
        for (pos, key) in table.keys().enumerate() {
            assert_eq!(table.position(key.partition_id), Some(pos));
            assert_eq!(table.get(key.partition_id).unwrap().key(), key);
            assert_eq!(key.matrix_id, MatrixId(7));
        }
        assert!(table.get(PartitionId(2)).is_none());
    }

    #[test]
    fn test_duplicate_partition_fails() {
        let err = PartitionTable::from_assignment(&assignment(&[0, 1, 0])).unwrap_err();
        assert_eq!(
            err,
            TableError::DuplicatePartition {
                matrix_id: MatrixId(7),
                partition_id: PartitionId(0)
            }
        );
    }

    #[test]
    fn test_missing_range_fails() {
        let mut bad = assignment(&[0]);
        bad.partitions.push(PartitionDescriptor {
            partition_id: PartitionId(1),
            rows: Some(AxisRange::new(10, 20)),
            cols: None,
            row_type: RowType::DenseDouble,
        });
        let err = PartitionTable::from_assignment(&bad).unwrap_err();
        assert!(matches!(err, TableError::MissingRange { axis: "column", .. }));
    }

    #[test]
    fn test_empty_range_fails() {
        let bad = MatrixAssignment::new(1, "m").with_partition(PartitionDescriptor::new(
            0,
            AxisRange::new(5, 5),
            AxisRange::new(0, 1),
            RowType::DenseDouble,
        ));
        let err = PartitionTable::from_assignment(&bad).unwrap_err();
        assert!(matches!(err, TableError::EmptyRange { axis: "row", .. }));
    }

    #[test]
    fn test_attributes() {
        let mut table = PartitionTable::from_assignment(
            &assignment(&[0])
                .with_attribute(ATTR_LOAD_PATH, "/data/a")
                .with_attribute(ATTR_LOAD_PATH, "/data/b")
                .with_attribute(ATTR_LOAD_THREADS, "2"),
        )
        .unwrap();
        assert_eq!(table.load_path(), Some(PathBuf::from("/data/b")));
        assert_eq!(table.load_threads_attr(), Some("2"));
        assert_eq!(table.save_threads_attr(), None);

        table.set_default_attribute(ATTR_LOAD_PATH, "/ignored");
        table.set_default_attribute(ATTR_SAVE_THREADS, "3");
        assert_eq!(table.load_path(), Some(PathBuf::from("/data/b")));
        assert_eq!(table.save_threads_attr(), Some("3"));
    }

    #[test]
    fn test_empty_table() {
        let table = PartitionTable::from_assignment(&MatrixAssignment::new(1, "m")).unwrap();
        assert!(table.is_empty());
        assert!(table.load_path().is_none());
    }
}
