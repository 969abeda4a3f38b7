//! # psmatrix
//!
//! Server-side storage for the partitions of a distributed matrix in a
//! parameter server.
//!
//! A server hosts a set of row/column blocks of each matrix. This crate keeps
//! those blocks, loads and saves them with a striped worker pool, and tracks
//! per-task clocks so readers can be gated under stale-synchronous-parallel
//! consistency.
//!
//! ```text
//!   MatrixAssignment ──► PartitionTable ──► ServerMatrix
//!                             │                 │
//!                  MatrixPartition × N      set_clock / aggregate_clocks
//!                             │
//!                     BulkIoScheduler (T workers, stripe i, i+T, ...)
//! ```

pub mod clock;
pub mod config;
pub mod format;
pub mod model;
pub mod partition;
pub mod scheduler;
pub mod server_matrix;
pub mod table;
pub mod test_support;

// Re-export main types for convenience
pub use clock::{ClockError, ClockVector};
pub use config::{IoConfig, MatrixStoreConfig};
pub use format::PartitionIoError;
pub use model::{
    AxisRange, Clock, MatrixAssignment, MatrixId, PartitionDescriptor, PartitionId, PartitionKey, RowType,
    TaskId,
};
pub use partition::{MatrixPartition, PartitionPayload, PartitionStats};
pub use scheduler::{BulkIoError, BulkIoScheduler, BulkOutcome, BulkReport, DirSource, PartitionSource};
pub use server_matrix::ServerMatrix;
pub use table::{PartitionTable, TableError};
