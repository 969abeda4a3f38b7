//! # Bulk I/O Scheduler
//!
//! Loads, saves and exports every partition of a table with a fixed pool of
//! worker threads and no per-partition locking.
//!
//! ## Striped assignment
//!
//! With `N` partitions in table order and `T` workers, worker `i` handles
//! indices `i, i + T, i + 2T, ...`. The stripes are disjoint and together
//! cover `[0, N)`, so each worker gets exclusive borrows of its partitions.
//!
//! ```text
//!   index:   0   1   2   3   4   5   6
//!   worker:  w0  w1  w2  w0  w1  w2  w0      (T = 3)
//! ```
//!
//! ## Completion
//!
//! Workers report every finished partition over a channel. The coordinator
//! counts `N` reports before joining the pool; if the channel closes early a
//! worker died and the operation fails as interrupted. Per-partition failures
//! do not stop the pool; they are collected into the [`BulkReport`].

use crate::config::AttributeError;
use crate::format::{self, PartitionIoError};
use crate::model::{MatrixId, PartitionId, PartitionKey};
use crate::partition::{MatrixPartition, PartitionPayload};
use crate::table::PartitionTable;
use crossbeam_channel::{unbounded, Sender};
use hashbrown::HashSet;
use parking_lot::Mutex;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Kind of bulk operation, used in reports and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkOperation {
    Load,
    Save,
    Export,
}

impl fmt::Display for BulkOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BulkOperation::Load => write!(f, "load"),
            BulkOperation::Save => write!(f, "save"),
            BulkOperation::Export => write!(f, "export"),
        }
    }
}

/// Failure of a whole bulk operation.
#[derive(Debug, Error)]
pub enum BulkIoError {
    #[error(transparent)]
    InvalidAttribute(#[from] AttributeError),
    #[error("{operation}: shared stream failed: {source}")]
    Stream {
        operation: BulkOperation,
        #[source]
        source: io::Error,
    },
    #[error("{operation} interrupted after {completed} of {expected} partitions")]
    Interrupted {
        operation: BulkOperation,
        completed: usize,
        expected: usize,
    },
    #[error("{operation} incomplete: {} of {total} partitions failed ({failed:?})", .failed.len())]
    Incomplete {
        operation: BulkOperation,
        total: usize,
        failed: Vec<PartitionId>,
    },
    #[error("malformed checkpoint stream: {0}")]
    Checkpoint(#[source] PartitionIoError),
    #[error("checkpoint holds {found} partitions, table has {expected}")]
    CountMismatch { expected: usize, found: usize },
    #[error("checkpoint names unknown partition {0}")]
    UnknownPartition(PartitionId),
    #[error("checkpoint repeats partition {0}")]
    DuplicatePartition(PartitionId),
    #[error("partition {partition_id}: {source}")]
    Partition {
        partition_id: PartitionId,
        #[source]
        source: PartitionIoError,
    },
}

/// One partition that could not be processed.
#[derive(Debug)]
pub struct PartitionFailure {
    pub partition_id: PartitionId,
    pub error: PartitionIoError,
}

/// Overall shape of a finished bulk operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkOutcome {
    /// Every partition was processed
    Complete,
    /// Nothing to do (no load path configured)
    Skipped,
    /// Some partitions failed; the rest were processed
    Partial { failed: Vec<PartitionId> },
}

/// Result of a bulk operation that ran to the barrier.
#[derive(Debug)]
pub struct BulkReport {
    pub operation: BulkOperation,
    pub total: usize,
    pub succeeded: usize,
    pub workers: usize,
    pub skipped: bool,
    /// Failures in table order
    pub failed: Vec<PartitionFailure>,
}

impl BulkReport {
    /// Report for an operation that had nothing to do.
    pub fn skipped(operation: BulkOperation, total: usize) -> Self {
        Self {
            operation,
            total,
            succeeded: 0,
            workers: 0,
            skipped: true,
            failed: Vec::new(),
        }
    }

    pub fn outcome(&self) -> BulkOutcome {
        if self.skipped {
            BulkOutcome::Skipped
        } else if self.failed.is_empty() {
            BulkOutcome::Complete
        } else {
            BulkOutcome::Partial {
                failed: self.failed_ids(),
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_ids(&self) -> Vec<PartitionId> {
        self.failed.iter().map(|f| f.partition_id).collect()
    }

    /// Turn a partial report into [`BulkIoError::Incomplete`].
    pub fn ensure_complete(self) -> Result<Self, BulkIoError> {
        if self.failed.is_empty() {
            Ok(self)
        } else {
            Err(BulkIoError::Incomplete {
                operation: self.operation,
                total: self.total,
                failed: self.failed_ids(),
            })
        }
    }
}

/// Opens the persisted bytes of a partition for loading.
pub trait PartitionSource: Sync {
    fn open(&self, matrix_name: &str, key: &PartitionKey) -> io::Result<Box<dyn Read + '_>>;
}

/// Partition files laid out as `{root}/{matrix_name}/{partition_id}`.
#[derive(Debug, Clone)]
pub struct DirSource {
    root: PathBuf,
}

impl DirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl PartitionSource for DirSource {
    fn open(&self, matrix_name: &str, key: &PartitionKey) -> io::Result<Box<dyn Read + '_>> {
        let file = File::open(partition_file_path(&self.root, matrix_name, key.partition_id))?;
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Location of one partition file under `root`
pub fn partition_file_path(root: &Path, matrix_name: &str, partition_id: PartitionId) -> PathBuf {
    root.join(matrix_name).join(partition_id.0.to_string())
}

/// Worker count actually used for `items` partitions: at least one, never
/// more than there are partitions.
pub fn effective_workers(requested: usize, items: usize) -> usize {
    requested.clamp(1, items.max(1))
}

/// Table indices handled by `worker` out of `stride` workers over `len` items.
pub fn stripe(worker: usize, stride: usize, len: usize) -> impl Iterator<Item = usize> {
    (worker..len).step_by(stride.max(1))
}

/// Deal `items` into `workers` stripes, keeping each item's table index.
fn deal_stripes<P>(items: Vec<P>, workers: usize) -> Vec<Vec<(usize, P)>> {
    let mut stripes: Vec<Vec<(usize, P)>> = (0..workers).map(|_| Vec::new()).collect();
    for (index, item) in items.into_iter().enumerate() {
        stripes[index % workers].push((index, item));
    }
    stripes
}

/// Completion report of one partition
struct Completion {
    index: usize,
    partition_id: PartitionId,
    result: Result<(), PartitionIoError>,
}

/// Body of one pool thread: run `task` over the stripe in order and report
/// each partition. Stops early only if the coordinator is gone.
fn worker_task<P, F>(stripe: Vec<(usize, PartitionId, P)>, task: &F, done: &Sender<Completion>)
where
    F: Fn(P) -> Result<(), PartitionIoError>,
{
    for (index, partition_id, item) in stripe {
        let result = task(item);
        if done
            .send(Completion {
                index,
                partition_id,
                result,
            })
            .is_err()
        {
            break;
        }
    }
}

/// Run `task` over every item with `workers` threads and wait for all of them.
fn run_striped<P, F>(
    operation: BulkOperation,
    items: Vec<(PartitionId, P)>,
    workers: usize,
    task: F,
) -> Result<BulkReport, BulkIoError>
where
    P: Send,
    F: Fn(P) -> Result<(), PartitionIoError> + Sync,
{
    let total = items.len();
    let workers = effective_workers(workers, total);
    let stripes = deal_stripes(items, workers);
    let (tx, rx) = unbounded::<Completion>();

    let mut results: Vec<Option<Completion>> = (0..total).map(|_| None).collect();
    let mut completed = 0usize;
    let mut dead_workers = 0usize;

    std::thread::scope(|scope| {
        let task = &task;
        let mut handles = Vec::with_capacity(workers);
        for stripe in stripes {
            let done = tx.clone();
            let stripe: Vec<_> = stripe
                .into_iter()
                .map(|(index, (partition_id, item))| (index, partition_id, item))
                .collect();
            handles.push(scope.spawn(move || worker_task(stripe, task, &done)));
        }
        drop(tx);

        // Counting barrier: one report per partition
        while completed < total {
            match rx.recv() {
                Ok(completion) => {
                    debug!(
                        "{} {} done ({}/{})",
                        operation,
                        completion.partition_id,
                        completed + 1,
                        total
                    );
                    let index = completion.index;
                    results[index] = Some(completion);
                    completed += 1;
                }
                Err(_) => break,
            }
        }

        for handle in handles {
            if handle.join().is_err() {
                dead_workers += 1;
            }
        }
    });

    if completed < total {
        warn!(
            "{} interrupted: {} of {} partitions reported, {} workers died",
            operation, completed, total, dead_workers
        );
        return Err(BulkIoError::Interrupted {
            operation,
            completed,
            expected: total,
        });
    }

    let mut failed = Vec::new();
    for completion in results.into_iter().flatten() {
        if let Err(error) = completion.result {
            warn!("{} of {} failed: {}", operation, completion.partition_id, error);
            failed.push(PartitionFailure {
                partition_id: completion.partition_id,
                error,
            });
        }
    }

    Ok(BulkReport {
        operation,
        total,
        succeeded: total - failed.len(),
        workers,
        skipped: false,
        failed,
    })
}

/// Read, check and decode one partition file without touching the partition.
fn read_partition_file(
    source: &dyn PartitionSource,
    matrix_id: MatrixId,
    matrix_name: &str,
    key: &PartitionKey,
) -> Result<PartitionPayload, PartitionIoError> {
    let mut reader = source.open(matrix_name, key)?;
    format::read_partition_header(&mut reader, matrix_id)?;
    let payload = PartitionPayload::read_from(&mut reader, key)?;
    format::expect_eof(&mut reader)?;
    Ok(payload)
}

fn write_partition_file(dir: &Path, partition: &MatrixPartition) -> Result<(), PartitionIoError> {
    let path = dir.join(partition.id().0.to_string());
    let tmp = dir.join(format!("{}.tmp", partition.id().0));
    let mut writer = BufWriter::new(File::create(&tmp)?);
    format::write_partition_header(&mut writer, partition.key().matrix_id)?;
    partition.save(&mut writer)?;
    writer.flush()?;
    drop(writer);
    fs::rename(&tmp, &path)?;
    Ok(())
}

/// Encode `id + payload` for the table-level save stream.
fn encode_record(partition: &MatrixPartition) -> Result<Vec<u8>, PartitionIoError> {
    let mut record = Vec::with_capacity(8 + partition.payload().byte_size());
    format::write_i32(&mut record, partition.id().0)?;
    partition.save(&mut record)?;
    Ok(record)
}

/// Shared output of a save. Keeps the first failure and ignores every record
/// after it.
struct SaveSink<'a, W> {
    writer: &'a mut W,
    records: usize,
    failure: Option<BulkIoError>,
}

impl<'a, W: Write> SaveSink<'a, W> {
    fn new(writer: &'a mut W) -> Self {
        Self {
            writer,
            records: 0,
            failure: None,
        }
    }

    fn append(&mut self, partition_id: PartitionId, record: Result<Vec<u8>, PartitionIoError>) {
        if self.failure.is_some() {
            return;
        }
        let written = record
            .map_err(|source| BulkIoError::Partition {
                partition_id,
                source,
            })
            .and_then(|bytes| {
                self.writer
                    .write_all(&bytes)
                    .map_err(|source| BulkIoError::Stream {
                        operation: BulkOperation::Save,
                        source,
                    })
            });
        match written {
            Ok(()) => self.records += 1,
            Err(error) => self.failure = Some(error),
        }
    }
}

/// Drives bulk I/O over a [`PartitionTable`] with a fixed worker count.
#[derive(Debug, Clone, Copy)]
pub struct BulkIoScheduler {
    workers: usize,
}

impl BulkIoScheduler {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Load every partition from `source`.
    ///
    /// A partition whose file is missing, short, foreign or followed by extra
    /// bytes keeps its previous payload and is listed in the report.
    #[instrument(skip_all, fields(matrix = %table.matrix_name(), workers = self.workers))]
    pub fn load(
        &self,
        table: &mut PartitionTable,
        source: &dyn PartitionSource,
    ) -> Result<BulkReport, BulkIoError> {
        let matrix_id = table.matrix_id();
        let matrix_name = table.matrix_name().to_string();
        let items: Vec<(PartitionId, &mut MatrixPartition)> = table
            .partitions_mut()
            .iter_mut()
            .map(|p| (p.id(), p))
            .collect();

        let report = run_striped(BulkOperation::Load, items, self.workers, |partition| {
            let payload = read_partition_file(source, matrix_id, &matrix_name, partition.key())?;
            partition.replace_payload(payload);
            Ok(())
        })?;
        info!(
            "loaded {}/{} partitions of {} with {} workers",
            report.succeeded, report.total, matrix_name, report.workers
        );
        Ok(report)
    }

    /// Write the table-level save stream to `writer`.
    ///
    /// The partition count is written before the pool starts. Each worker
    /// encodes a partition privately and appends `id + payload` to the shared
    /// stream while holding its lock, so records never interleave. Record
    /// order follows completion order, not table order.
    ///
    /// The count promises one record per partition, so a save either writes
    /// every record or fails as a whole. After the first failed record the
    /// stream is poisoned and no further records are appended.
    #[instrument(skip_all, fields(matrix = %table.matrix_name(), workers = self.workers))]
    pub fn save<W: Write + Send>(
        &self,
        table: &PartitionTable,
        writer: &mut W,
    ) -> Result<BulkReport, BulkIoError> {
        let operation = BulkOperation::Save;
        let stream_err = |source| BulkIoError::Stream { operation, source };

        let count = format::len_to_i32(table.len()).map_err(stream_err)?;
        format::write_i32(writer, count).map_err(stream_err)?;

        let sink = Mutex::new(SaveSink::new(&mut *writer));
        let items: Vec<(PartitionId, &MatrixPartition)> =
            table.partitions().iter().map(|p| (p.id(), p)).collect();

        let report = run_striped(operation, items, self.workers, |partition| {
            let record = encode_record(partition);
            sink.lock().append(partition.id(), record);
            Ok(())
        })?;

        let SaveSink {
            records, failure, ..
        } = sink.into_inner();
        if let Some(error) = failure {
            warn!(
                "save of {} aborted after {}/{} records: {}",
                table.matrix_name(),
                records,
                report.total,
                error
            );
            return Err(error);
        }

        writer.flush().map_err(stream_err)?;
        info!(
            "saved {}/{} partitions of {} with {} workers",
            records,
            report.total,
            table.matrix_name(),
            report.workers
        );
        Ok(report)
    }

    /// Write every partition as its own file under `{dir}/{matrix_name}/`,
    /// in the layout [`BulkIoScheduler::load`] reads back.
    #[instrument(skip_all, fields(matrix = %table.matrix_name(), workers = self.workers))]
    pub fn export(&self, table: &PartitionTable, dir: &Path) -> Result<BulkReport, BulkIoError> {
        let operation = BulkOperation::Export;
        let matrix_dir = dir.join(table.matrix_name());
        fs::create_dir_all(&matrix_dir).map_err(|source| BulkIoError::Stream { operation, source })?;

        let items: Vec<(PartitionId, &MatrixPartition)> =
            table.partitions().iter().map(|p| (p.id(), p)).collect();
        let report = run_striped(operation, items, self.workers, |partition| {
            write_partition_file(&matrix_dir, partition)
        })?;
        info!(
            "exported {}/{} partitions of {} to {}",
            report.succeeded,
            report.total,
            table.matrix_name(),
            matrix_dir.display()
        );
        Ok(report)
    }

    /// Read a table-level save stream back into `table`.
    ///
    /// All records are decoded before any partition is touched, so a bad
    /// checkpoint leaves the table unchanged. Returns the number of
    /// partitions restored.
    #[instrument(skip_all, fields(matrix = %table.matrix_name()))]
    pub fn restore<R: Read>(table: &mut PartitionTable, reader: &mut R) -> Result<usize, BulkIoError> {
        let found =
            format::read_len(reader, "partition count").map_err(BulkIoError::Checkpoint)?;
        if found != table.len() {
            return Err(BulkIoError::CountMismatch {
                expected: table.len(),
                found,
            });
        }

        let mut staged = Vec::with_capacity(found);
        let mut seen = HashSet::with_capacity(found);
        for _ in 0..found {
            let partition_id = format::read_partition_id(reader)
                .map_err(|e| BulkIoError::Checkpoint(e.into()))?;
            let position = table
                .position(partition_id)
                .ok_or(BulkIoError::UnknownPartition(partition_id))?;
            if !seen.insert(partition_id) {
                return Err(BulkIoError::DuplicatePartition(partition_id));
            }
            let key = *table.partitions()[position].key();
            let payload = PartitionPayload::read_from(reader, &key)
                .map_err(|source| BulkIoError::Partition {
                    partition_id,
                    source,
                })?;
            staged.push((position, payload));
        }
        format::expect_eof(reader).map_err(BulkIoError::Checkpoint)?;

        let partitions = table.partitions_mut();
        for (position, payload) in staged {
            partitions[position].replace_payload(payload);
        }
        info!("restored {} partitions of {}", found, table.matrix_name());
        Ok(found)
    }
}
