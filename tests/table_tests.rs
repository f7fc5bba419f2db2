use std::fs;
use std::path::Path;
use std::sync::Arc;

use fragstore::core::config::StoreConfig;
use fragstore::core::context::StoreContext;
use fragstore::core::error::ErrorKind;
use fragstore::core::types::{ColumnKind, ColumnSpec, Value};
use fragstore::table::metadata::{CellMeta, CellPath};
use fragstore::table::table::Table;

const BASE_MILLIS: i64 = 1_577_836_800_000;

fn context(dir: &Path) -> Arc<StoreContext> {
    StoreContext::new(StoreConfig::default().with_swap_dir(dir))
        .expect("store context")
        .shared()
}

/// Data row `i` (0-based) of the three-column table; every 10th row is null.
fn three_column_row(i: usize) -> Vec<Value> {
    if i % 10 == 0 {
        return vec![Value::Null, Value::Null, Value::Null];
    }
    vec![
        Value::Int(i as i32 * 3 - 7),
        Value::string(format!("name-{}", i % 300)),
        Value::timestamp_millis(BASE_MILLIS + i as i64 * 1000),
    ]
}

fn three_column_table(ctx: Arc<StoreContext>, rows: usize) -> Table {
    let table = Table::new(
        vec![
            ColumnSpec::new(ColumnKind::Int),
            ColumnSpec::new(ColumnKind::String),
            ColumnSpec::new(ColumnKind::Timestamp),
        ],
        ctx,
    );
    table
        .add_row(&[Value::string("id"), Value::string("name"), Value::string("ts")])
        .expect("header row");
    for i in 0..rows {
        table.add_row(&three_column_row(i)).expect("data row");
    }
    table
}

fn mixed_row(i: usize) -> Vec<Value> {
    let null = i % 11 == 0;
    let pick = |v: Value| if null { Value::Null } else { v };
    vec![
        pick(Value::Long(i as i64 * 1_000_003 - 5_000_000_000)),
        pick(Value::Double(i as f64 / 7.0)),
        pick(Value::Bool(i % 3 == 0)),
        pick(Value::string(format!("s{}", i % 17))),
        pick(Value::Short((i % 30_000) as i16)),
        pick(Value::Float(i as f32 * 0.5)),
    ]
}

#[test]
fn end_to_end_swap_and_read_back() {
    let dir = tempfile::tempdir().expect("temp dir");
    let table = three_column_table(context(dir.path()), 20_000);
    table.complete();
    assert_eq!(table.row_count(), 20_001);
    assert_eq!(table.fragments().len(), 3);

    assert_eq!(table.swap_all(true), 3);
    let stats = table.stats();
    assert_eq!(stats.swapped_fragments, 3);
    assert_eq!(stats.resident_bytes, 0);

    assert_eq!(table.get_value(0, 0).expect("header"), Value::string("id"));
    assert_eq!(table.get_value(0, 2).expect("header"), Value::string("ts"));
    assert_eq!(table.find_column_index("name"), Some(1));

    for row in [8191usize, 8192, 8193, 19_999, 20_000] {
        let expected = three_column_row(row - 1);
        for (col, value) in expected.iter().enumerate() {
            assert_eq!(&table.get_value(row, col).expect("cell"), value, "row {} col {}", row, col);
            assert_eq!(table.is_null(row, col).expect("null flag"), value.is_null());
        }
    }

    // Row 8191 holds data row 8190 (null); row 8192 is the last of fragment 0
    assert!(table.is_null(8191, 0).expect("null flag"));
    assert_eq!(table.get_i32(8192, 0).expect("int"), 8191 * 3 - 7);
    assert_eq!(table.get_i64(8192, 2).expect("millis"), BASE_MILLIS + 8191 * 1000);
    assert_eq!(table.get_i32(8191, 0).expect("null int"), 0);
    assert!(table.data_missing_notice().is_none());
}

#[test]
fn repeated_swaps_keep_values() {
    let dir = tempfile::tempdir().expect("temp dir");
    let specs = vec![
        ColumnSpec::new(ColumnKind::Long),
        ColumnSpec::new(ColumnKind::Double),
        ColumnSpec::new(ColumnKind::Boolean),
        ColumnSpec::new(ColumnKind::String),
        ColumnSpec::new(ColumnKind::Short),
        ColumnSpec::new(ColumnKind::Float),
    ];
    let table = Table::new(specs, context(dir.path()));
    table.add_row(&[]).expect("header");
    for i in 0..10_000 {
        table.add_row(&mixed_row(i)).expect("row");
    }
    table.complete();

    let read_all = |t: &Table| -> Vec<Vec<Value>> {
        (1..t.row_count())
            .map(|row| (0..t.col_count()).map(|col| t.get_value(row, col).expect("cell")).collect())
            .collect()
    };
    let baseline = read_all(&table);
    for (i, row) in baseline.iter().enumerate() {
        assert_eq!(row, &mixed_row(i));
    }

    for _ in 0..3 {
        assert_eq!(table.swap_all(true), 2);
        assert_eq!(read_all(&table), baseline);
    }
}

#[test]
fn missing_swap_file_reads_as_null_with_notice() {
    let dir = tempfile::tempdir().expect("temp dir");
    let table = three_column_table(context(dir.path()), 100);
    table.complete();
    assert_eq!(table.swap_all(true), 1);

    for file in table.fragments()[0].swap_files() {
        fs::remove_file(file.path.as_path()).expect("remove swap file");
    }

    assert_eq!(table.get_value(2, 1).expect("degraded read"), Value::Null);
    assert!(table.is_null(2, 0).expect("degraded null flag"));
    assert_eq!(table.get_i32(2, 0).expect("degraded int"), 0);
    let notice = table.data_missing_notice().expect("notice recorded");
    assert!(notice.starts_with("Data file missing"));
    assert!(notice.contains("frag-"));

    // Structural errors are still raised
    assert!(table.get_value(500, 0).unwrap_err().is(ErrorKind::OutOfBounds));
}

#[test]
fn snapshot_round_trip() {
    let swap_dir = tempfile::tempdir().expect("temp dir");
    let snapshot_dir = tempfile::tempdir().expect("temp dir");

    let table = Table::new(
        vec![ColumnSpec::dynamic_object(), ColumnSpec::new(ColumnKind::String)],
        context(swap_dir.path()),
    );
    table.add_row(&[Value::string("qty"), Value::string("label")]).expect("header");
    for i in 0..9000 {
        let qty = if i % 5 == 0 { Value::Null } else { Value::Int(i) };
        table.add_row(&[qty, Value::string(format!("l{}", i % 13))]).expect("row");
    }
    table
        .put_metadata(CellPath::new("detail", "qty"), CellMeta::default().with_format("#,##0"))
        .expect("metadata");
    table.complete();

    let manifest = table.export_snapshot(snapshot_dir.path()).expect("export");
    assert_eq!(manifest.fragments.len(), 2);
    assert_eq!(manifest.columns[0].spec.kind, ColumnKind::Int);

    let reopened = Table::open_snapshot(snapshot_dir.path(), context(swap_dir.path())).expect("open");
    assert!(reopened.is_completed());
    assert_eq!(reopened.row_count(), table.row_count());
    assert_eq!(reopened.column_ids(), table.column_ids());
    assert_eq!(reopened.header(), table.header());
    assert_eq!(reopened.find_column_index("label"), Some(1));
    assert_eq!(
        reopened.metadata(&CellPath::new("detail", "qty")).and_then(|m| m.format),
        Some("#,##0".to_string())
    );
    for row in [1usize, 2, 6, 8192, 8193, 9000] {
        for col in 0..2 {
            assert_eq!(
                reopened.get_value(row, col).expect("snapshot cell"),
                table.get_value(row, col).expect("source cell"),
                "row {} col {}",
                row,
                col
            );
        }
    }
    assert!(reopened.add_row(&[Value::Int(1)]).unwrap_err().is(ErrorKind::InvalidState));

    // Snapshot files are shared: disposing the reopened table keeps them
    reopened.dispose();
    for entry in &manifest.fragments {
        assert!(snapshot_dir.path().join(&entry.file).exists());
    }
    assert!(reopened.data_missing_notice().is_none());
}

#[test]
fn corrupted_snapshot_degrades_to_missing_data() {
    let swap_dir = tempfile::tempdir().expect("temp dir");
    let snapshot_dir = tempfile::tempdir().expect("temp dir");
    let table = three_column_table(context(swap_dir.path()), 50);
    table.complete();
    let manifest = table.export_snapshot(snapshot_dir.path()).expect("export");

    let file = snapshot_dir.path().join(&manifest.fragments[0].file);
    let mut bytes = fs::read(&file).expect("read fragment file");
    bytes[0] ^= 0xFF;
    fs::write(&file, bytes).expect("rewrite fragment file");

    let reopened = Table::open_snapshot(snapshot_dir.path(), context(swap_dir.path())).expect("open");
    assert_eq!(reopened.get_value(0, 0).expect("header survives"), Value::string("id"));
    assert_eq!(reopened.get_value(3, 0).expect("degraded read"), Value::Null);
    let notice = reopened.data_missing_notice().expect("notice recorded");
    assert!(notice.contains("checksum mismatch"));
}

#[test]
fn export_requires_completed_table() {
    let dir = tempfile::tempdir().expect("temp dir");
    let table = three_column_table(context(dir.path()), 10);
    let err = table.export_snapshot(&dir.path().join("snap")).unwrap_err();
    assert!(err.is(ErrorKind::InvalidState));
}

#[test]
fn dispose_removes_private_swap_files() {
    let dir = tempfile::tempdir().expect("temp dir");
    let table = three_column_table(context(dir.path()), 9000);
    table.complete();
    assert_eq!(table.swap_all(true), 2);

    let count_files = || fs::read_dir(dir.path()).expect("read swap dir").count();
    assert_eq!(count_files(), 2);
    table.dispose();
    assert_eq!(count_files(), 0);
    assert!(table.get_value(1, 0).unwrap_err().is(ErrorKind::Disposed));
}
