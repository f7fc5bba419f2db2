/// fragstore API demo
///
/// Walks through the table lifecycle:
/// - Streaming rows into a table
/// - Swapping sealed fragments to disk
/// - Reading values back (reloads happen on demand)
/// - Snapshot export and reopen
use fragstore::core::config::StoreConfig;
use fragstore::core::context::StoreContext;
use fragstore::core::types::{ColumnKind, ColumnSpec, Value};
use fragstore::table::table::Table;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("\n╔═══════════════════════════════════════════════╗");
    println!("║        fragstore - Table Lifecycle Demo       ║");
    println!("╚═══════════════════════════════════════════════╝\n");

    // Step 1: Context with a private swap directory
    let dir = tempfile::tempdir()?;
    let ctx = StoreContext::new(StoreConfig::default().with_swap_dir(dir.path()))?.shared();

    // Step 2: Stream rows; row 0 is the header
    println!("Step 2: Appending rows...");
    let table = Table::new(
        vec![
            ColumnSpec::new(ColumnKind::Int),
            ColumnSpec::new(ColumnKind::String),
            ColumnSpec::dynamic_object(),
        ],
        ctx.clone(),
    );
    table.add_row(&[Value::string("id"), Value::string("city"), Value::string("amount")])?;
    let cities = ["Lyon", "Oslo", "Pune", "Lima"];
    for i in 0..25_000 {
        table.add_row(&[
            Value::Int(i),
            Value::string(cities[i as usize % cities.len()]),
            Value::Double(i as f64 * 1.5),
        ])?;
    }
    table.complete();
    println!("  {} rows in {} fragments", table.row_count(), table.fragments().len());
    println!("  'amount' column specialized to {:?}\n", table.column_kind(2)?);

    // Step 3: Swap everything out
    println!("Step 3: Swapping...");
    let swapped = table.swap_all(true);
    let stats = table.stats();
    println!("  swapped {} fragments, {} bytes still resident\n", swapped, stats.resident_bytes);

    // Step 4: Random reads reload what they touch
    println!("Step 4: Reading back...");
    for row in [1usize, 8192, 8193, 25_000] {
        println!(
            "  row {:>6}: id={} city={:?} amount={}",
            row,
            table.get_i32(row, 0)?,
            table.get_value(row, 1)?,
            table.get_f64(row, 2)?
        );
    }
    if let Some(col) = table.find_column_index("city") {
        println!("  'city' is column {}\n", col);
    }

    // Step 5: Snapshot round trip
    println!("Step 5: Snapshot...");
    let snapshot_dir = dir.path().join("snapshot");
    let manifest = table.export_snapshot(&snapshot_dir)?;
    let reopened = Table::open_snapshot(&snapshot_dir, ctx)?;
    println!(
        "  exported {} fragment files; reopened table has {} rows, row 42 amount={}",
        manifest.fragments.len(),
        reopened.row_count(),
        reopened.get_f64(42, 2)?
    );

    table.dispose();
    reopened.dispose();
    println!("\nDone!");
    Ok(())
}
