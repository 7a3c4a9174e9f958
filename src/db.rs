// 🗄️ Bulk Ledger Source - CSV feed + SQLite store
// One row per recorded transaction. Records are immutable once loaded.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::parser::{is_arms_length_code, normalize_parcel_id, parse_sale_date};

/// Mean Earth radius in miles (great-circle distances)
pub const EARTH_RADIUS_MILES: f64 = 3959.0;

/// Columns every ledger feed must carry
pub const REQUIRED_COLUMNS: [&str; 4] = ["PARID", "RECORD DATE", "PRICE", "SALE VERIFICATION"];

// ============================================================================
// LOCATION
// ============================================================================

/// WGS84 coordinate in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        GeoPoint { lat, lon }
    }

    /// Haversine great-circle distance in miles
    pub fn distance_miles(&self, other: &GeoPoint) -> f64 {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let delta_lat = (other.lat - self.lat).to_radians();
        let delta_lon = (other.lon - self.lon).to_radians();

        let a = (delta_lat / 2.0).sin().powi(2)
            + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        EARTH_RADIUS_MILES * c
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

// ============================================================================
// SALE RECORD
// ============================================================================

/// One historical transaction, keyed by canonical PARID
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleRecord {
    /// Canonical 12-digit PARID
    pub parcel_id: String,
    pub sale_date: NaiveDate,
    /// Sale price in whole currency units (always positive)
    pub price: u64,
    /// e.g. "1:MARKET SALE", "Z:FORECLOSURE"
    pub verification_code: String,
    /// Parcel centroid; sales without one are lookup-only
    pub location: Option<GeoPoint>,
    pub size_sqft: Option<u32>,
    /// Lot size in acres
    pub lot_size: Option<f64>,
    pub year_built: Option<u16>,
    pub subdivision: Option<String>,
}

impl SaleRecord {
    pub fn is_arms_length(&self) -> bool {
        is_arms_length_code(&self.verification_code)
    }

    pub fn price_per_sqft(&self) -> Option<f64> {
        match self.size_sqft {
            Some(sqft) if sqft > 0 => Some(self.price as f64 / sqft as f64),
            _ => None,
        }
    }

    /// Hash for duplicate detection during ingestion (not identity)
    pub fn compute_idempotency_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}|{}|{}|{}",
            self.parcel_id, self.sale_date, self.price, self.verification_code
        ));
        format!("{:x}", hasher.finalize())
    }
}

/// Raw CSV row - column names follow the county export
#[derive(Debug, Deserialize)]
struct LedgerRow {
    #[serde(rename = "PARID")]
    parid: String,

    #[serde(rename = "RECORD DATE")]
    record_date: String,

    #[serde(rename = "PRICE")]
    price: Option<f64>,

    #[serde(rename = "SALE VERIFICATION")]
    verification: String,

    #[serde(rename = "LATITUDE", default)]
    latitude: Option<f64>,

    #[serde(rename = "LONGITUDE", default)]
    longitude: Option<f64>,

    #[serde(rename = "SQFT", default)]
    sqft: Option<f64>,

    #[serde(rename = "LOT SIZE", default)]
    lot_size: Option<f64>,

    #[serde(rename = "YEAR BUILT", default)]
    year_built: Option<f64>,

    #[serde(rename = "SUBDIVISION", default)]
    subdivision: Option<String>,
}

impl LedgerRow {
    /// Convert into a SaleRecord; None when a mandatory field is unusable
    fn into_record(self) -> Option<SaleRecord> {
        let parcel_id = normalize_parcel_id(&self.parid)?;
        let sale_date = parse_sale_date(&self.record_date)?;
        let price = self.price.filter(|p| p.is_finite() && *p >= 1.0)?.round() as u64;

        let location = match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some(GeoPoint::new(lat, lon)).filter(|p| p.is_valid()),
            _ => None,
        };

        Some(SaleRecord {
            parcel_id,
            sale_date,
            price,
            verification_code: self.verification.trim().to_string(),
            location,
            size_sqft: self
                .sqft
                .filter(|s| s.is_finite() && *s >= 1.0)
                .map(|s| s.round() as u32),
            lot_size: self.lot_size.filter(|l| l.is_finite() && *l > 0.0),
            year_built: self
                .year_built
                .filter(|y| (1600.0..=2200.0).contains(y))
                .map(|y| y as u16),
            subdivision: self
                .subdivision
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        })
    }
}

// ============================================================================
// LEDGER SOURCE
// ============================================================================

/// Where a ledger is read from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "path", rename_all = "lowercase")]
pub enum LedgerSource {
    Csv(PathBuf),
    Sqlite(PathBuf),
}

impl LedgerSource {
    pub fn path(&self) -> &Path {
        match self {
            LedgerSource::Csv(path) | LedgerSource::Sqlite(path) => path,
        }
    }

    /// Guess the source kind from the file extension (CLI convenience)
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match ext.as_str() {
            "db" | "sqlite" | "sqlite3" => LedgerSource::Sqlite(path.to_path_buf()),
            _ => LedgerSource::Csv(path.to_path_buf()),
        }
    }
}

/// Records read from a source, plus what was dropped on the way
#[derive(Debug, Clone)]
pub struct LoadedLedger {
    pub records: Vec<SaleRecord>,
    pub skipped_rows: usize,
    /// SHA-256 of the source bytes
    pub fingerprint: String,
}

/// Read every record from a ledger source
pub fn read_source(source: &LedgerSource) -> Result<LoadedLedger> {
    match source {
        LedgerSource::Csv(path) => load_csv(path),
        LedgerSource::Sqlite(path) => {
            if !path.exists() {
                bail!("Ledger database not found: {}", path.display());
            }
            let conn = Connection::open(path)
                .with_context(|| format!("Failed to open ledger database {}", path.display()))?;
            let (records, skipped_rows) = load_sales(&conn)?;
            Ok(LoadedLedger {
                records,
                skipped_rows,
                fingerprint: fingerprint_file(path)?,
            })
        }
    }
}

fn fingerprint_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn fingerprint_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(fingerprint_bytes(&bytes))
}

// ============================================================================
// CSV FEED
// ============================================================================

pub fn load_csv(csv_path: &Path) -> Result<LoadedLedger> {
    let bytes = fs::read(csv_path)
        .with_context(|| format!("Failed to open ledger CSV {}", csv_path.display()))?;

    let mut rdr = csv::Reader::from_reader(bytes.as_slice());

    let headers = rdr.headers().context("Failed to read CSV header")?.clone();
    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|col| !headers.iter().any(|h| h.trim() == *col))
        .collect();
    if !missing.is_empty() {
        bail!("Missing required columns: {:?}", missing);
    }

    let mut records = Vec::new();
    let mut skipped_rows = 0;

    for result in rdr.deserialize::<LedgerRow>() {
        match result.ok().and_then(LedgerRow::into_record) {
            Some(record) => records.push(record),
            None => skipped_rows += 1,
        }
    }

    if skipped_rows > 0 {
        warn!(skipped_rows, path = %csv_path.display(), "skipped unusable ledger rows");
    }

    Ok(LoadedLedger {
        records,
        skipped_rows,
        fingerprint: fingerprint_bytes(&bytes),
    })
}

// ============================================================================
// SQLITE STORE
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL keeps readers unblocked while an import runs
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sales (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            idempotency_hash TEXT UNIQUE NOT NULL,
            parcel_id TEXT NOT NULL,
            sale_date TEXT NOT NULL,
            price INTEGER NOT NULL,
            verification_code TEXT NOT NULL,
            latitude REAL,
            longitude REAL,
            size_sqft INTEGER,
            lot_size REAL,
            year_built INTEGER,
            subdivision TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sales_parcel ON sales(parcel_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sales_date ON sales(sale_date)",
        [],
    )?;

    Ok(())
}

/// Insert sales, skipping rows already present. Returns rows inserted.
pub fn insert_sales(conn: &Connection, sales: &[SaleRecord]) -> Result<usize> {
    let mut inserted = 0;
    let mut duplicates = 0;

    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO sales (
                idempotency_hash, parcel_id, sale_date, price, verification_code,
                latitude, longitude, size_sqft, lot_size, year_built, subdivision
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )?;

        for sale in sales {
            let changed = stmt.execute(params![
                sale.compute_idempotency_hash(),
                sale.parcel_id,
                sale.sale_date.format("%Y-%m-%d").to_string(),
                sale.price as i64,
                sale.verification_code,
                sale.location.map(|p| p.lat),
                sale.location.map(|p| p.lon),
                sale.size_sqft,
                sale.lot_size,
                sale.year_built,
                sale.subdivision,
            ])?;

            if changed == 0 {
                duplicates += 1;
            } else {
                inserted += 1;
            }
        }
    }
    tx.commit()?;

    info!(inserted, duplicates, "ledger rows written");

    Ok(inserted)
}

/// Read all sales from the store. Returns (records, skipped rows).
pub fn load_sales(conn: &Connection) -> Result<(Vec<SaleRecord>, usize)> {
    let mut stmt = conn
        .prepare(
            "SELECT parcel_id, sale_date, price, verification_code,
                    latitude, longitude, size_sqft, lot_size, year_built, subdivision
             FROM sales
             ORDER BY parcel_id, sale_date",
        )
        .context("Ledger database has no usable sales table")?;

    let rows = stmt
        .query_map([], |row| {
            let sale_date: String = row.get(1)?;
            let price: i64 = row.get(2)?;
            let lat: Option<f64> = row.get(4)?;
            let lon: Option<f64> = row.get(5)?;

            Ok((
                row.get::<_, String>(0)?,
                sale_date,
                price,
                row.get::<_, String>(3)?,
                lat.zip(lon).map(|(lat, lon)| GeoPoint::new(lat, lon)),
                row.get::<_, Option<u32>>(6)?,
                row.get::<_, Option<f64>>(7)?,
                row.get::<_, Option<u16>>(8)?,
                row.get::<_, Option<String>>(9)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut records = Vec::with_capacity(rows.len());
    let mut skipped = 0;

    for (parcel, date, price, code, location, size_sqft, lot_size, year_built, subdivision) in rows {
        let parcel_id = normalize_parcel_id(&parcel);
        let sale_date = parse_sale_date(&date);

        match (parcel_id, sale_date) {
            (Some(parcel_id), Some(sale_date)) if price > 0 => records.push(SaleRecord {
                parcel_id,
                sale_date,
                price: price as u64,
                verification_code: code,
                location,
                size_sqft,
                lot_size,
                year_built,
                subdivision,
            }),
            _ => skipped += 1,
        }
    }

    Ok((records, skipped))
}

pub fn verify_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM sales", [], |row| row.get(0))?;

    Ok(count)
}

// ============================================================================
// TESTS
// ============================================================================
