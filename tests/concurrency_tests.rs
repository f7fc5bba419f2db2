use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use fragstore::core::config::StoreConfig;
use fragstore::core::context::StoreContext;
use fragstore::core::error::ErrorKind;
use fragstore::core::types::{ColumnKind, ColumnSpec, Value};
use fragstore::memory::monitor::{MemoryMonitor, ThresholdMonitor};
use fragstore::memory::scheduler::{AgePriority, SwapScheduler};
use fragstore::table::table::Table;
use parking_lot::Mutex;
use rand::Rng;

fn config(dir: &std::path::Path) -> StoreConfig {
    let mut config = StoreConfig::default().with_swap_dir(dir);
    config.more_rows_poll = Duration::from_millis(20);
    config
}

fn int_table(ctx: Arc<StoreContext>) -> Table {
    let table = Table::new(
        vec![ColumnSpec::new(ColumnKind::Int), ColumnSpec::new(ColumnKind::String)],
        ctx,
    );
    table.add_row(&[Value::string("n"), Value::string("s")]).expect("header");
    table
}

fn fill(table: &Table, from: usize, to: usize) {
    for i in from..to {
        table
            .add_row(&[Value::Int(i as i32), Value::string(format!("v{}", i % 40))])
            .expect("row");
    }
}

#[test]
fn reader_waits_for_producer() {
    let dir = tempfile::tempdir().expect("temp dir");
    let ctx = StoreContext::new(config(dir.path())).expect("context").shared();
    let table = Arc::new(int_table(ctx));
    fill(&table, 1, 3000);
    assert_eq!(table.row_count(), 3000);

    let (started_tx, started_rx) = mpsc::channel();
    let reader = {
        let table = Arc::clone(&table);
        thread::spawn(move || {
            started_tx.send(()).expect("signal start");
            let started = Instant::now();
            let found = table.more_rows(5000);
            (found, table.row_count(), started.elapsed())
        })
    };

    started_rx.recv().expect("reader started");
    thread::sleep(Duration::from_millis(150));
    assert!(!reader.is_finished());

    fill(&table, 3000, 5001);
    let (found, rows_seen, waited) = reader.join().expect("reader thread");
    assert!(found);
    assert!(rows_seen > 5000);
    assert!(waited >= Duration::from_millis(150));
    assert!(waited < Duration::from_secs(5));
    assert_eq!(table.get_i32(5000, 0).expect("new row"), 5000);
}

#[test]
fn complete_releases_waiting_readers() {
    let dir = tempfile::tempdir().expect("temp dir");
    let ctx = StoreContext::new(config(dir.path())).expect("context").shared();
    let table = Arc::new(int_table(ctx));
    fill(&table, 1, 10);

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let table = Arc::clone(&table);
            thread::spawn(move || table.more_rows(1_000_000))
        })
        .collect();
    thread::sleep(Duration::from_millis(50));
    table.complete();
    for reader in readers {
        assert!(!reader.join().expect("reader thread"));
    }
}

fn payload(row: usize) -> Value {
    Value::Binary(Bytes::from(vec![(row % 251) as u8; 32 + row % 64]))
}

/// Int, String and Blob columns; row `r` holds `r`, `v{r % 40}` and `payload(r)`.
fn mixed_table(ctx: Arc<StoreContext>, rows: usize) -> Table {
    let table = Table::new(
        vec![
            ColumnSpec::new(ColumnKind::Int),
            ColumnSpec::new(ColumnKind::String),
            ColumnSpec::new(ColumnKind::Blob),
        ],
        ctx,
    );
    table
        .add_row(&[Value::string("n"), Value::string("s"), Value::string("b")])
        .expect("header");
    for row in 1..rows {
        table
            .add_row(&[Value::Int(row as i32), Value::string(format!("v{}", row % 40)), payload(row)])
            .expect("row");
    }
    table.complete();
    table
}

fn expected_cell(row: usize, col: usize) -> Value {
    match (row, col) {
        (0, 0) => Value::string("n"),
        (0, 1) => Value::string("s"),
        (0, _) => Value::string("b"),
        (_, 0) => Value::Int(row as i32),
        (_, 1) => Value::string(format!("v{}", row % 40)),
        _ => payload(row),
    }
}

#[test]
fn dispose_races_with_readers() {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut config = config(dir.path());
    config.working_set_size = 4;
    let ctx = StoreContext::new(config).expect("context").shared();
    let table = Arc::new(mixed_table(ctx, 20_000));
    let rows = table.row_count();

    let stop = Arc::new(AtomicBool::new(false));
    let mut workers = Vec::new();
    for worker in 0..6 {
        let table = Arc::clone(&table);
        workers.push(thread::spawn(move || {
            let mut rng = rand::thread_rng();
            loop {
                // Every other worker keeps hitting the header row
                let row = if worker % 2 == 0 && rng.gen_bool(0.5) { 0 } else { rng.gen_range(1..rows) };
                let col = rng.gen_range(0..3);
                match table.get_value(row, col) {
                    Ok(value) => assert_eq!(value, expected_cell(row, col), "row {} col {}", row, col),
                    Err(err) => {
                        assert!(err.is(ErrorKind::Disposed), "unexpected error: {}", err);
                        return;
                    }
                }
            }
        }));
    }
    {
        let table = Arc::clone(&table);
        let stop = Arc::clone(&stop);
        workers.push(thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                table.swap_all(true);
            }
        }));
    }

    thread::sleep(Duration::from_millis(100));
    table.dispose();
    stop.store(true, Ordering::Relaxed);
    for worker in workers {
        worker.join().expect("worker thread");
    }
    assert!(table.is_disposed());
    assert!(table.get_value(0, 0).unwrap_err().is(ErrorKind::Disposed));
    assert_eq!(std::fs::read_dir(dir.path()).expect("read dir").count(), 0);
}

/// Disposes its table the first time a reader is about to block on I/O.
#[derive(Default)]
struct DisposeOnIo {
    table: Mutex<Option<Arc<Table>>>,
    io_waits: AtomicUsize,
}

impl MemoryMonitor for DisposeOnIo {
    fn wait_for_memory(&self) {}

    fn will_block_on_io(&self) {
        self.io_waits.fetch_add(1, Ordering::SeqCst);
        if let Some(table) = self.table.lock().take() {
            table.dispose();
        }
    }
}

#[test]
fn blob_reload_after_dispose_fails_cleanly() {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut config = config(dir.path());
    config.working_set_size = 2;
    let monitor = Arc::new(DisposeOnIo::default());
    let ctx = StoreContext::new(config)
        .expect("context")
        .with_monitor(Arc::clone(&monitor) as Arc<dyn MemoryMonitor>)
        .shared();
    let table = Arc::new(mixed_table(ctx, 21));
    assert_eq!(table.swap_all(true), 1);
    assert_eq!(table.get_value(20, 2).expect("working set row"), payload(20));
    assert_eq!(monitor.io_waits.load(Ordering::SeqCst), 0);

    // Row 1's payload was written out; reading it disposes mid-read
    *monitor.table.lock() = Some(Arc::clone(&table));
    let err = table.get_value(1, 2).unwrap_err();
    assert!(err.is(ErrorKind::Disposed), "unexpected error: {}", err);
    assert_eq!(monitor.io_waits.load(Ordering::SeqCst), 1);
    assert!(table.is_disposed());
    assert!(table.get_value(0, 2).unwrap_err().is(ErrorKind::Disposed));
}

#[test]
fn scheduler_swaps_sealed_fragments() {
    let dir = tempfile::tempdir().expect("temp dir");
    let scheduler = Arc::new(SwapScheduler::new());
    let ctx = StoreContext::new(config(dir.path()))
        .expect("context")
        .with_priority(Arc::new(AgePriority::new(Duration::from_millis(10))))
        .with_scheduler(Arc::clone(&scheduler))
        .shared();
    let table = int_table(ctx);
    fill(&table, 1, 20_000);

    // Two sealed fragments, one still open
    assert_eq!(scheduler.len(), 3);
    assert_eq!(scheduler.run_once(10), 2);
    assert_eq!(table.stats().swapped_fragments, 2);

    table.complete();
    assert_eq!(scheduler.run_once(10), 1);
    assert_eq!(table.stats().swapped_fragments, 3);

    // Reading makes a fragment eligible again
    assert_eq!(table.get_i32(9000, 0).expect("reload"), 9000);
    let handle = scheduler.spawn(Duration::from_millis(5), 8);
    let deadline = Instant::now() + Duration::from_secs(5);
    while table.stats().swapped_fragments < 3 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    handle.stop();
    assert_eq!(table.stats().swapped_fragments, 3);

    table.dispose();
    assert_eq!(scheduler.run_once(10), 0);
    assert!(scheduler.is_empty());
}

#[test]
fn monitor_tracks_sealed_and_reloaded_columns() {
    let dir = tempfile::tempdir().expect("temp dir");
    let monitor = Arc::new(ThresholdMonitor::new(1).with_max_wait(Duration::from_millis(5)));
    let mut config = config(dir.path());
    config.backpressure_rows = 1000;
    let ctx = StoreContext::new(config)
        .expect("context")
        .with_monitor(Arc::clone(&monitor) as Arc<dyn MemoryMonitor>)
        .shared();

    let table = int_table(ctx);
    // Over the limit after the first fragment: the producer is slowed, never stopped
    fill(&table, 1, 20_000);
    table.complete();
    assert!(monitor.current_usage() > 0);

    table.swap_all(true);
    assert_eq!(monitor.current_usage(), 0);
    monitor.release_to_os();

    assert_eq!(table.get_i32(100, 0).expect("reload"), 100);
    assert!(monitor.current_usage() > 0);
    assert!(monitor.io_waits.load(Ordering::Relaxed) >= 1);
}
