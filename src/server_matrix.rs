//! # Server Matrix
//!
//! Facade over the partitions of one matrix hosted by a parameter server:
//! construction from the master's assignment, bulk load/save, and the task
//! clocks that gate SSP reads.

use crate::clock::{within_staleness, ClockError};
use crate::config::{
    thread_count, IoConfig, MatrixStoreConfig, ATTR_LOAD_PATH, ATTR_LOAD_THREADS, ATTR_SAVE_THREADS,
    DEFAULT_STALENESS,
};
use crate::model::{Clock, MatrixAssignment, MatrixId, PartitionId, PartitionKey, TaskId};
use crate::partition::{MatrixPartition, PartitionStats};
use crate::scheduler::{BulkIoError, BulkIoScheduler, BulkOperation, BulkReport, DirSource, PartitionSource};
use crate::table::{PartitionTable, TableError};
use hashbrown::HashMap;
use std::io::{Read, Write};
use std::path::Path;
use tracing::{debug, info};

/// All partitions of one matrix owned by this server.
#[derive(Debug, Clone)]
pub struct ServerMatrix {
    table: PartitionTable,
    io: IoConfig,
    /// Staleness bound used by [`ServerMatrix::can_read`]
    staleness: Clock,
}

impl ServerMatrix {
    /// Build from an assignment with default I/O settings.
    pub fn new(assignment: &MatrixAssignment) -> Result<Self, TableError> {
        Self::with_io(assignment, IoConfig::default())
    }

    pub fn with_io(assignment: &MatrixAssignment, io: IoConfig) -> Result<Self, TableError> {
        let table = PartitionTable::from_assignment(assignment)?;
        debug!(
            "built matrix {} ({}) with {} partitions",
            table.matrix_name(),
            table.matrix_id(),
            table.len()
        );
        Ok(Self {
            table,
            io,
            staleness: DEFAULT_STALENESS,
        })
    }

    /// Build with server-wide configuration. A configured load path applies
    /// only when the assignment does not carry its own.
    pub fn with_config(assignment: &MatrixAssignment, config: &MatrixStoreConfig) -> Result<Self, TableError> {
        let mut matrix = Self::with_io(assignment, config.io)?;
        matrix.staleness = config.staleness;
        if let Some(path) = &config.load_path {
            matrix
                .table
                .set_default_attribute(ATTR_LOAD_PATH, path.to_string_lossy());
        }
        Ok(matrix)
    }

    pub fn id(&self) -> MatrixId {
        self.table.matrix_id()
    }

    pub fn name(&self) -> &str {
        self.table.matrix_name()
    }

    /// Staleness bound from server configuration
    pub fn staleness(&self) -> Clock {
        self.staleness
    }

    pub fn table(&self) -> &PartitionTable {
        &self.table
    }

    pub fn partition_count(&self) -> usize {
        self.table.len()
    }

    pub fn partition(&self, id: PartitionId) -> Option<&MatrixPartition> {
        self.table.get(id)
    }

    pub fn partition_mut(&mut self, id: PartitionId) -> Option<&mut MatrixPartition> {
        self.table.get_mut(id)
    }

    /// Keys in assignment order
    pub fn partition_keys(&self) -> Vec<PartitionKey> {
        self.table.keys().copied().collect()
    }

    fn load_scheduler(&self) -> Result<BulkIoScheduler, BulkIoError> {
        let threads = thread_count(ATTR_LOAD_THREADS, self.table.load_threads_attr(), self.io.load_threads)?;
        Ok(BulkIoScheduler::new(threads))
    }

    fn save_scheduler(&self) -> Result<BulkIoScheduler, BulkIoError> {
        let threads = thread_count(ATTR_SAVE_THREADS, self.table.save_threads_attr(), self.io.save_threads)?;
        Ok(BulkIoScheduler::new(threads))
    }

    /// Load every partition from the configured load path.
    ///
    /// Without a load path this is a successful no-op and the report's
    /// outcome is `Skipped`.
    pub fn load_all(&mut self) -> Result<BulkReport, BulkIoError> {
        let Some(root) = self.table.load_path() else {
            info!("no load path for matrix {}, starting empty", self.name());
            return Ok(BulkReport::skipped(BulkOperation::Load, self.table.len()));
        };
        self.load_from(&DirSource::new(root))
    }

    /// Load every partition from `source` with the load thread count.
    pub fn load_from(&mut self, source: &dyn PartitionSource) -> Result<BulkReport, BulkIoError> {
        let scheduler = self.load_scheduler()?;
        scheduler.load(&mut self.table, source)
    }

    /// Write the table-level save stream with the save thread count.
    pub fn save_all<W: Write + Send>(&self, writer: &mut W) -> Result<BulkReport, BulkIoError> {
        self.save_scheduler()?.save(&self.table, writer)
    }

    /// Write one file per partition under `{dir}/{matrix_name}/`.
    pub fn export_all(&self, dir: &Path) -> Result<BulkReport, BulkIoError> {
        self.save_scheduler()?.export(&self.table, dir)
    }

    /// Replace every partition's payload from a stream written by
    /// [`ServerMatrix::save_all`].
    pub fn restore_from<R: Read>(&mut self, reader: &mut R) -> Result<usize, BulkIoError> {
        BulkIoScheduler::restore(&mut self.table, reader)
    }

    /// Advance `task` to `clock` on every partition.
    ///
    /// This touches every partition, O(#partitions). The update is applied
    /// only if no partition would move backwards.
    pub fn set_clock(&mut self, task: TaskId, clock: Clock) -> Result<(), ClockError> {
        for partition in self.table.partitions() {
            partition.check_clock(task, clock)?;
        }
        for partition in self.table.partitions_mut() {
            partition.set_clock(task, clock)?;
        }
        Ok(())
    }

    /// Advance `task` to `clock` on a single partition.
    pub fn set_partition_clock(&mut self, id: PartitionId, task: TaskId, clock: Clock) -> Result<(), ClockError> {
        self.table
            .get_mut(id)
            .ok_or(ClockError::UnknownPartition(id))?
            .set_clock(task, clock)
    }

    /// Aggregate clock of one partition
    pub fn clock_of(&self, id: PartitionId) -> Option<Clock> {
        self.table.get(id).map(MatrixPartition::clock)
    }

    pub fn task_clock(&self, id: PartitionId, task: TaskId) -> Option<Clock> {
        self.table.get(id).and_then(|p| p.task_clock(task))
    }

    /// Aggregate (minimum across tasks) clock of every partition.
    pub fn aggregate_clocks(&self) -> HashMap<PartitionKey, Clock> {
        self.table
            .partitions()
            .iter()
            .map(|p| (*p.key(), p.clock()))
            .collect()
    }

    /// Smallest aggregate clock over all partitions
    pub fn min_clock(&self) -> Clock {
        self.table
            .partitions()
            .iter()
            .map(MatrixPartition::clock)
            .min()
            .unwrap_or(crate::clock::UNSET_CLOCK)
    }

    /// Whether a reader at `task_clock` may read partition `id` under the
    /// given staleness bound. `None` if the partition is not hosted here.
    pub fn is_readable(&self, id: PartitionId, task_clock: Clock, staleness: Clock) -> Option<bool> {
        self.clock_of(id)
            .map(|aggregate| within_staleness(aggregate, task_clock, staleness))
    }

    /// [`ServerMatrix::is_readable`] with the configured staleness bound.
    pub fn can_read(&self, id: PartitionId, task_clock: Clock) -> Option<bool> {
        self.is_readable(id, task_clock, self.staleness)
    }

    /// Drop every row; clocks are kept.
    pub fn clear(&mut self) {
        for partition in self.table.partitions_mut() {
            partition.clear();
        }
    }

    pub fn stats(&self) -> Vec<PartitionStats> {
        self.table.partitions().iter().map(MatrixPartition::stats).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AxisRange, PartitionDescriptor, RowType};
    use crate::scheduler::BulkOutcome;

    fn assignment(partitions: i32) -> MatrixAssignment {
        let mut assignment = MatrixAssignment::new(2, "bias");
        for id in 0..partitions {
            assignment = assignment.with_partition(PartitionDescriptor::new(
                id,
                AxisRange::new(id as i64, id as i64 + 1),
                AxisRange::new(0, 32),
                RowType::SparseDouble,
            ));
        }
        assignment
    }

    #[test]
    fn test_clock_scenario_single_partition() {
        let mut matrix = ServerMatrix::new(&assignment(1)).unwrap();
        matrix.set_clock(TaskId(0), 5).unwrap();
        matrix.set_clock(TaskId(0), 5).unwrap();
        matrix.set_clock(TaskId(1), 3).unwrap();
        let clocks = matrix.aggregate_clocks();
        assert_eq!(clocks.len(), 1);
        assert_eq!(clocks.values().copied().collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn test_unreported_partition_is_zero() {
        let matrix = ServerMatrix::new(&assignment(3)).unwrap();
        assert!(matrix.aggregate_clocks().values().all(|&c| c == 0));
        assert_eq!(matrix.min_clock(), 0);
    }

    #[test]
    fn test_broadcast_regression_is_all_or_nothing() {
        let mut matrix = ServerMatrix::new(&assignment(3)).unwrap();
        matrix.set_clock(TaskId(0), 2).unwrap();
        matrix.set_partition_clock(PartitionId(2), TaskId(0), 6).unwrap();

        let err = matrix.set_clock(TaskId(0), 4).unwrap_err();
        assert!(matches!(
            err,
            ClockError::Regression {
                partition_id: PartitionId(2),
                current: 6,
                attempted: 4,
                ..
            }
        ));
        assert_eq!(matrix.task_clock(PartitionId(0), TaskId(0)), Some(2));
        assert_eq!(matrix.task_clock(PartitionId(1), TaskId(0)), Some(2));
        assert_eq!(matrix.task_clock(PartitionId(2), TaskId(0)), Some(6));
    }

    #[test]
    fn test_unknown_partition_clock() {
        let mut matrix = ServerMatrix::new(&assignment(1)).unwrap();
        assert_eq!(
            matrix.set_partition_clock(PartitionId(9), TaskId(0), 1),
            Err(ClockError::UnknownPartition(PartitionId(9)))
        );
        assert_eq!(matrix.clock_of(PartitionId(9)), None);
        assert_eq!(matrix.is_readable(PartitionId(9), 0, 0), None);
    }

    #[test]
    fn test_staleness_gate() {
        let mut matrix = ServerMatrix::new(&assignment(2)).unwrap();
        matrix.set_clock(TaskId(0), 4).unwrap();
        matrix.set_clock(TaskId(1), 2).unwrap();
        assert_eq!(matrix.is_readable(PartitionId(0), 2, 0), Some(true));
        assert_eq!(matrix.is_readable(PartitionId(0), 4, 1), Some(false));
        assert_eq!(matrix.is_readable(PartitionId(0), 4, 2), Some(true));
    }

    #[test]
    fn test_configured_staleness_gates_reads() {
        let config = MatrixStoreConfig {
            staleness: 2,
            ..Default::default()
        };
        let mut matrix = ServerMatrix::with_config(&assignment(1), &config).unwrap();
        assert_eq!(matrix.staleness(), 2);
        matrix.set_clock(TaskId(0), 3).unwrap();
        assert_eq!(matrix.can_read(PartitionId(0), 5), Some(true));
        assert_eq!(matrix.can_read(PartitionId(0), 6), Some(false));

        let strict = ServerMatrix::new(&assignment(1)).unwrap();
        assert_eq!(strict.staleness(), DEFAULT_STALENESS);
        assert_eq!(strict.can_read(PartitionId(0), 1), Some(false));
        assert_eq!(strict.can_read(PartitionId(0), 0), Some(true));
    }

    #[test]
    fn test_load_without_path_is_noop() {
        let mut matrix = ServerMatrix::new(&assignment(4)).unwrap();
        let report = matrix.load_all().unwrap();
        assert_eq!(report.outcome(), BulkOutcome::Skipped);
        assert!(matrix.stats().iter().all(|s| s.rows == 0));
    }

    #[test]
    fn test_bad_thread_attribute_fails_whole_load() {
        let dir = tempfile::tempdir().unwrap();
        let bad = assignment(2)
            .with_attribute(ATTR_LOAD_PATH, dir.path().to_string_lossy())
            .with_attribute(ATTR_LOAD_THREADS, "two");
        let mut matrix = ServerMatrix::new(&bad).unwrap();
        let err = matrix.load_all().unwrap_err();
        assert!(matches!(err, BulkIoError::InvalidAttribute(_)));
    }

    #[test]
    fn test_config_load_path_does_not_override_assignment() {
        let config = MatrixStoreConfig {
            load_path: Some("/from/config".into()),
            ..Default::default()
        };
        let own = assignment(1).with_attribute(ATTR_LOAD_PATH, "/from/assignment");
        let matrix = ServerMatrix::with_config(&own, &config).unwrap();
        assert_eq!(
            matrix.table().load_path(),
            Some(std::path::PathBuf::from("/from/assignment"))
        );

        let inherited = ServerMatrix::with_config(&assignment(1), &config).unwrap();
        assert_eq!(
            inherited.table().load_path(),
            Some(std::path::PathBuf::from("/from/config"))
        );
    }
}
