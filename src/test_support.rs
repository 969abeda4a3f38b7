use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::model::{AxisRange, MatrixAssignment, PartitionDescriptor, PartitionId, RowType};
use crate::server_matrix::ServerMatrix;

const ROW_TYPES: [RowType; 4] = [
    RowType::DenseDouble,
    RowType::SparseDouble,
    RowType::DenseFloat,
    RowType::SparseFloat,
];

/// Assignment with `partitions` contiguous row blocks of `rows_per_partition`
/// rows each, all spanning `cols` columns.
pub fn generate_assignment(
    matrix_id: i32,
    matrix_name: &str,
    partitions: usize,
    rows_per_partition: i64,
    cols: i64,
) -> MatrixAssignment {
    let mut assignment = MatrixAssignment::new(matrix_id, matrix_name);
    for i in 0..partitions {
        let start = i as i64 * rows_per_partition;
        assignment = assignment.with_partition(PartitionDescriptor::new(
            i as i32,
            AxisRange::new(start, start + rows_per_partition),
            AxisRange::new(0, cols),
            ROW_TYPES[i % ROW_TYPES.len()],
        ));
    }
    assignment
}

/// Fill each partition with random rows. Each row is present with
/// `fill_probability` and carries up to `max_row_bytes` random bytes.
/// Returns the number of rows written.
pub fn fill_random(matrix: &mut ServerMatrix, fill_probability: f64, max_row_bytes: usize, seed: u64) -> usize {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut written = 0;
    let ids: Vec<PartitionId> = matrix.partition_keys().iter().map(|k| k.partition_id).collect();

    for id in ids {
        let Some(partition) = matrix.partition_mut(id) else {
            continue;
        };
        let (start, end) = (partition.key().start_row(), partition.key().end_row());
        for row in start..end {
            if !rng.random_bool(fill_probability) {
                continue;
            }
            let len = rng.random_range(0..=max_row_bytes);
            let bytes: Vec<u8> = (0..len).map(|_| rng.random()).collect();
            if partition.put_row(row, bytes).is_ok() {
                written += 1;
            }
        }
    }
    written
}

/// Every row of every partition, in table order.
pub fn snapshot_rows(matrix: &ServerMatrix) -> Vec<(PartitionId, Vec<(i64, Vec<u8>)>)> {
    matrix
        .table()
        .partitions()
        .iter()
        .map(|p| {
            let rows = p.payload().rows().map(|(r, b)| (r, b.to_vec())).collect();
            (p.id(), rows)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_is_deterministic() {
        let assignment = generate_assignment(1, "w", 5, 10, 4);
        let mut a = ServerMatrix::new(&assignment).unwrap();
        let mut b = ServerMatrix::new(&assignment).unwrap();
        let written = fill_random(&mut a, 0.5, 16, 3);
        assert_eq!(fill_random(&mut b, 0.5, 16, 3), written);
        assert_eq!(snapshot_rows(&a), snapshot_rows(&b));
        assert!(written > 0);
    }
}
