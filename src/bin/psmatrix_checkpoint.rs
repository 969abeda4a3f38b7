use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use psmatrix::config::{ConfigOverrides, IoOverrides};
use psmatrix::{BulkOutcome, BulkReport, MatrixAssignment, MatrixStoreConfig, ServerMatrix, TaskId};

fn parse_arg(flag: &str) -> Option<String> {
    let mut args = std::env::args();
    while let Some(arg) = args.next() {
        if arg == flag {
            return args.next();
        }
    }
    None
}

fn parse_num<T: std::str::FromStr>(flag: &str) -> anyhow::Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match parse_arg(flag) {
        Some(raw) => Ok(Some(raw.parse()?)),
        None => Ok(None),
    }
}

fn load_assignment(path: &Path) -> anyhow::Result<MatrixAssignment> {
    let raw = fs::read_to_string(path)?;
    let assignment = serde_json::from_str(&raw)?;
    Ok(assignment)
}

fn print_report(report: &BulkReport) {
    match report.outcome() {
        BulkOutcome::Complete => println!(
            "{}: {}/{} partitions with {} workers",
            report.operation, report.succeeded, report.total, report.workers
        ),
        BulkOutcome::Skipped => println!("{}: skipped", report.operation),
        BulkOutcome::Partial { failed } => {
            println!(
                "{}: {}/{} partitions, failed {:?}",
                report.operation, report.succeeded, report.total, failed
            );
            for failure in &report.failed {
                println!("  {}: {}", failure.partition_id, failure.error);
            }
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let assignment_path = parse_arg("--assignment")
        .map(PathBuf::from)
        .ok_or_else(|| anyhow::anyhow!("--assignment is required"))?;
    let config_path = parse_arg("--config");
    let overrides = ConfigOverrides {
        io: Some(IoOverrides {
            load_threads: parse_num("--load-threads")?,
            save_threads: parse_num("--save-threads")?,
        }),
        load_path: parse_arg("--load-path").map(PathBuf::from),
        staleness: parse_num("--staleness")?,
    };
    let config = MatrixStoreConfig::load(config_path.as_deref(), overrides)?;

    let assignment = load_assignment(&assignment_path)?;
    let mut matrix = ServerMatrix::with_config(&assignment, &config)?;
    println!(
        "matrix {} ({}) with {} partitions",
        matrix.name(),
        matrix.id(),
        matrix.partition_count()
    );

    if let Some(path) = parse_arg("--restore") {
        let mut reader = BufReader::new(File::open(&path)?);
        let restored = matrix.restore_from(&mut reader)?;
        println!("restored {} partitions from {}", restored, path);
    } else {
        let report = matrix.load_all()?;
        print_report(&report);
    }

    if let Some(task) = parse_num::<u32>("--task")? {
        let clock = parse_num::<u32>("--clock")?.ok_or_else(|| anyhow::anyhow!("--task needs --clock"))?;
        matrix.set_clock(TaskId(task), clock)?;
    }

    if let Some(path) = parse_arg("--out") {
        let mut writer = BufWriter::new(File::create(&path)?);
        let report = matrix.save_all(&mut writer)?.ensure_complete()?;
        print_report(&report);
    }

    if let Some(dir) = parse_arg("--export") {
        let report = matrix.export_all(Path::new(&dir))?;
        print_report(&report);
    }

    let mut clocks: Vec<_> = matrix.aggregate_clocks().into_iter().collect();
    clocks.sort_by_key(|(key, _)| key.partition_id);
    for stats in matrix.stats() {
        println!(
            "{}: rows={} bytes={} tasks={} clock={}",
            stats.partition_id, stats.rows, stats.payload_bytes, stats.reporting_tasks, stats.clock
        );
    }
    let min_clock = matrix.min_clock();
    let reader_clock = parse_num::<u32>("--reader-clock")?.unwrap_or(min_clock);
    for (key, clock) in clocks {
        let Some(partition) = matrix.partition(key.partition_id) else {
            continue;
        };
        let layout = if partition.row_type().is_sparse() { "sparse" } else { "dense" };
        let readable = matrix.can_read(key.partition_id, reader_clock).unwrap_or(false);
        println!(
            "{} rows {} ({}) -> clock {} readable@{}={} tasks {:?}",
            key.partition_id,
            key.rows,
            layout,
            clock,
            reader_clock,
            readable,
            partition.clocks().entries()
        );
    }
    println!("min clock {} (staleness {})", min_clock, matrix.staleness());

    Ok(())
}
