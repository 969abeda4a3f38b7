//! # Clock Tracking
//!
//! Per-partition vector of task clocks for stale-synchronous-parallel reads.
//! The aggregate clock of a partition is the minimum over every task that has
//! reported, so it never runs ahead of the slowest task.

use crate::model::{Clock, PartitionId, TaskId};
use hashbrown::HashMap;
use thiserror::Error;

/// Clock reported before any task has ticked
pub const UNSET_CLOCK: Clock = 0;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClockError {
    #[error("clock regression on {partition_id} for {task}: {attempted} < {current}")]
    Regression {
        partition_id: PartitionId,
        task: TaskId,
        current: Clock,
        attempted: Clock,
    },
    #[error("no partition {0} on this server")]
    UnknownPartition(PartitionId),
}

/// Task clocks of a single partition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClockVector {
    clocks: HashMap<TaskId, Clock>,
}

impl ClockVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Minimum clock across tasks, [`UNSET_CLOCK`] when nobody reported
    pub fn aggregate(&self) -> Clock {
        self.clocks.values().copied().min().unwrap_or(UNSET_CLOCK)
    }

    pub fn get(&self, task: TaskId) -> Option<Clock> {
        self.clocks.get(&task).copied()
    }

    /// Check that `clock` would not move `task` backwards.
    pub fn check(&self, partition_id: PartitionId, task: TaskId, clock: Clock) -> Result<(), ClockError> {
        match self.clocks.get(&task) {
            Some(&current) if clock < current => Err(ClockError::Regression {
                partition_id,
                task,
                current,
                attempted: clock,
            }),
            _ => Ok(()),
        }
    }

    /// Record `clock` for `task`. A lower value than the stored one is
    /// rejected and leaves the vector untouched.
    pub fn advance(&mut self, partition_id: PartitionId, task: TaskId, clock: Clock) -> Result<(), ClockError> {
        self.check(partition_id, task, clock)?;
        self.clocks.insert(task, clock);
        Ok(())
    }

    /// Number of tasks that have reported
    pub fn task_count(&self) -> usize {
        self.clocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clocks.is_empty()
    }

    /// Snapshot of `(task, clock)` pairs sorted by task
    pub fn entries(&self) -> Vec<(TaskId, Clock)> {
        let mut entries: Vec<_> = self.clocks.iter().map(|(t, c)| (*t, *c)).collect();
        entries.sort_by_key(|(task, _)| *task);
        entries
    }
}

/// Whether a reader at `task_clock` may observe state whose aggregate clock
/// is `aggregate`, given the allowed `staleness`.
#[inline]
pub fn within_staleness(aggregate: Clock, task_clock: Clock, staleness: Clock) -> bool {
    task_clock <= aggregate.saturating_add(staleness)
}
