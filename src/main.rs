use anyhow::{bail, Context, Result};
use rusqlite::Connection;
use std::env;
use std::fs;
use std::path::Path;
use tracing_subscriber::EnvFilter;

use parcel_valuation::engine::DEFAULT_LEDGER_KEY;
use parcel_valuation::{
    insert_sales, load_csv, parse_sale_date, setup_database, verify_count, GeoPoint, LedgerIndex, LedgerSource,
    MarketTrendsRequest, ValuationConfig, ValuationEngine, ValuationRequest,
};

const USAGE: &str = "Usage:
  parcel-valuation import <ledger.csv> <ledger.db>
  parcel-valuation stats <ledger.csv|ledger.db>
  parcel-valuation history <ledger.csv|ledger.db> <parcel-id> [--all]
  parcel-valuation trends <ledger.csv|ledger.db> <lat> <lon> <as-of YYYY-MM-DD> [radius-miles]
  parcel-valuation value <ledger.csv|ledger.db> <request.json> [config.json]";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("import") if args.len() >= 4 => run_import(Path::new(&args[2]), Path::new(&args[3])),
        Some("stats") if args.len() >= 3 => run_stats(Path::new(&args[2])),
        Some("history") if args.len() >= 4 => {
            let include_all = args.iter().any(|a| a == "--all");
            run_history(Path::new(&args[2]), &args[3], include_all)
        }
        Some("trends") if args.len() >= 6 => run_trends(Path::new(&args[2]), &args[3..]),
        Some("value") if args.len() >= 4 => run_value(Path::new(&args[2]), Path::new(&args[3]), args.get(4)),
        _ => {
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    }
}

fn run_import(csv_path: &Path, db_path: &Path) -> Result<()> {
    println!("🗄️  Ledger Import - CSV → SQLite + WAL");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // 1. Load CSV
    println!("\n📂 Loading CSV...");
    let loaded = load_csv(csv_path)?;
    println!("✓ Loaded {} sales ({} rows skipped)", loaded.records.len(), loaded.skipped_rows);

    // 2. Setup database
    println!("\n🔧 Setting up database...");
    let conn = Connection::open(db_path).with_context(|| format!("Failed to open {:?}", db_path))?;
    setup_database(&conn)?;
    println!("✓ Database initialized with WAL mode");

    // 3. Insert sales
    println!("\n💾 Inserting sales...");
    let inserted = insert_sales(&conn, &loaded.records)?;

    // 4. Verify count
    println!("\n🔍 Verifying database...");
    let count = verify_count(&conn)?;
    println!("✓ Inserted {} new sales, database holds {}", inserted, count);
    if inserted < loaded.records.len() {
        println!("✓ Duplicates ignored: {}", loaded.records.len() - inserted);
    }

    Ok(())
}

fn open_index(ledger_path: &Path) -> Result<LedgerIndex> {
    let source = LedgerSource::from_path(ledger_path);
    Ok(LedgerIndex::load(&source)?)
}

fn run_stats(ledger_path: &Path) -> Result<()> {
    let index = open_index(ledger_path)?;
    println!("📊 {}", ledger_path.display());
    println!("{}", index.stats().summary());
    Ok(())
}

fn run_history(ledger_path: &Path, parcel_id: &str, include_all: bool) -> Result<()> {
    let index = open_index(ledger_path)?;
    let history = index.sales_history(parcel_id, include_all, 3);
    println!("{}", serde_json::to_string_pretty(&history)?);
    Ok(())
}

fn run_trends(ledger_path: &Path, args: &[String]) -> Result<()> {
    let lat: f64 = args[0].parse().with_context(|| format!("Invalid latitude: {}", args[0]))?;
    let lon: f64 = args[1].parse().with_context(|| format!("Invalid longitude: {}", args[1]))?;
    let as_of_date = parse_sale_date(&args[2]).with_context(|| format!("Invalid as-of date: {}", args[2]))?;
    let radius_miles: f64 = match args.get(3) {
        Some(r) => r.parse().with_context(|| format!("Invalid radius: {}", r))?,
        None => 2.0,
    };

    let engine = ValuationEngine::new(ValuationConfig::default());
    engine.register_ledger(DEFAULT_LEDGER_KEY, LedgerSource::from_path(ledger_path));

    let request = MarketTrendsRequest {
        ledger_key: DEFAULT_LEDGER_KEY.to_string(),
        location: GeoPoint::new(lat, lon),
        radius_miles,
        as_of_date,
    };
    let trends = engine.market_trends(&request)?;
    println!("{}", serde_json::to_string_pretty(&trends)?);
    Ok(())
}

fn run_value(ledger_path: &Path, request_path: &Path, config_path: Option<&String>) -> Result<()> {
    let config = match config_path {
        Some(path) => ValuationConfig::from_file(path)?,
        None => ValuationConfig::default(),
    };

    let content = fs::read_to_string(request_path)
        .with_context(|| format!("Failed to read request file: {:?}", request_path))?;
    let mut request: ValuationRequest = serde_json::from_str(&content).context("Failed to parse request JSON")?;
    request.ledger_key = DEFAULT_LEDGER_KEY.to_string();

    let engine = ValuationEngine::new(config);
    engine.register_ledger(DEFAULT_LEDGER_KEY, LedgerSource::from_path(ledger_path));

    let report = match engine.triangulate_property_value(&request) {
        Ok(report) => report,
        Err(e) if e.is_rejection() => bail!("valuation rejected: {}", e),
        Err(e) => return Err(e.into()),
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
