// 📒 Sales Ledger Index - O(1) parcel lookup + grid-bucketed radius queries
//
// Built once per cache key, then frozen. All reads are side-effect free
// and need no locking.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{info, warn};

use crate::db::{read_source, GeoPoint, LedgerSource, SaleRecord, EARTH_RADIUS_MILES};
use crate::error::{Result, ValuationError};
use crate::parser::normalize_parcel_id;
use crate::selection::DAYS_PER_MONTH;

/// Grid cell edge in degrees (~0.7 miles of latitude)
pub const GRID_CELL_DEGREES: f64 = 0.01;

/// Trailing periods reported by `market_trends`, in months
pub const TREND_PERIODS_MONTHS: [u32; 3] = [6, 12, 24];

type CellKey = (i32, i32);

// ============================================================================
// QUERY RESULTS
// ============================================================================

/// Outcome of a parcel lookup
#[derive(Debug, Clone, PartialEq)]
pub enum LookupResult<'a> {
    /// Records for the parcel, ordered by sale_date ascending
    Found(&'a [SaleRecord]),

    /// Ledger is loaded but holds nothing for this parcel
    NotFound,

    /// Ledger is unusable; carries the load failure reason
    NoData(String),
}

impl<'a> LookupResult<'a> {
    pub fn records(&self) -> &'a [SaleRecord] {
        match self {
            LookupResult::Found(records) => records,
            _ => &[],
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, LookupResult::Found(_))
    }
}

/// A record returned by a radius query, with its distance from the center
#[derive(Debug, Clone, PartialEq)]
pub struct RadiusHit<'a> {
    pub record: &'a SaleRecord,
    pub distance_miles: f64,
}

/// Filters applied by `query_radius`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RadiusFilter {
    /// Keep sales on or after this date
    pub after_date: Option<NaiveDate>,
    /// Include foreclosures, related-party and other non-market sales
    pub include_non_arms_length: bool,
}

/// One entry of a parcel's sales history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub sale_date: NaiveDate,
    pub price: u64,
    pub verification_code: String,
    pub is_arms_length: bool,
}

/// Parcel sales history (newest first)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SalesHistory {
    pub found: bool,
    pub parcel_input: String,
    pub parcel_lookup: Option<String>,
    pub sales: Vec<HistoryEntry>,
    pub arms_length_only: bool,
    pub error: Option<String>,
}

/// Sales volume and median price for one trailing period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPeriod {
    pub months: u32,
    pub count: usize,
    pub median_price: Option<f64>,
}

/// Multi-period market activity around a point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketTrends {
    /// At least one period holds a sale
    pub available: bool,
    pub radius_miles: f64,
    pub as_of_date: NaiveDate,
    /// Ordered as requested
    pub periods: Vec<TrendPeriod>,
    pub error: Option<String>,
}

impl MarketTrends {
    pub fn period(&self, months: u32) -> Option<&TrendPeriod> {
        self.periods.iter().find(|p| p.months == months)
    }
}

/// Load statistics for a ledger
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerStats {
    pub total_records: usize,
    pub arms_length_records: usize,
    pub unique_parcels: usize,
    pub located_records: usize,
    pub skipped_rows: usize,
    pub date_range_start: Option<NaiveDate>,
    pub date_range_end: Option<NaiveDate>,
    pub fingerprint: Option<String>,
}

impl LedgerStats {
    pub fn filtered_out(&self) -> usize {
        self.total_records - self.arms_length_records
    }

    pub fn summary(&self) -> String {
        let range = match (self.date_range_start, self.date_range_end) {
            (Some(start), Some(end)) => format!("{} to {}", start, end),
            _ => "n/a".to_string(),
        };
        format!(
            "{} sales ({} arms-length), {} parcels, {} located, {} skipped, range {}",
            self.total_records,
            self.arms_length_records,
            self.unique_parcels,
            self.located_records,
            self.skipped_rows,
            range
        )
    }
}

// ============================================================================
// LEDGER INDEX
// ============================================================================

#[derive(Debug)]
enum IndexState {
    Ready,
    Unavailable(String),
}

pub struct LedgerIndex {
    state: IndexState,
    /// Canonical PARID → sales ordered by date ascending
    by_parcel: HashMap<String, Vec<SaleRecord>>,
    /// Grid cell → (parcel, position) of located records
    grid: HashMap<CellKey, Vec<(String, usize)>>,
    /// Lowercased subdivision → (parcel, position)
    by_subdivision: HashMap<String, Vec<(String, usize)>>,
    stats: LedgerStats,
}

impl LedgerIndex {
    /// Build the index from the bulk ledger source
    pub fn load(source: &LedgerSource) -> Result<LedgerIndex> {
        let started = Instant::now();

        let loaded = read_source(source).map_err(|e| {
            ValuationError::DataUnavailable(format!("{}: {:#}", source.path().display(), e))
        })?;

        let mut index = LedgerIndex::from_records(loaded.records);
        index.stats.skipped_rows = loaded.skipped_rows;
        index.stats.fingerprint = Some(loaded.fingerprint);

        info!(
            path = %source.path().display(),
            records = index.stats.total_records,
            parcels = index.stats.unique_parcels,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "ledger index built"
        );

        Ok(index)
    }

    /// Load, or produce an unusable index carrying the failure reason
    pub fn load_or_unavailable(source: &LedgerSource) -> LedgerIndex {
        match LedgerIndex::load(source) {
            Ok(index) => index,
            Err(e) => {
                warn!(error = %e, "ledger index marked unusable");
                LedgerIndex::unavailable(e.to_string())
            }
        }
    }

    /// An index that answers every query with "no data"
    pub fn unavailable(reason: impl Into<String>) -> LedgerIndex {
        LedgerIndex {
            state: IndexState::Unavailable(reason.into()),
            by_parcel: HashMap::new(),
            grid: HashMap::new(),
            by_subdivision: HashMap::new(),
            stats: LedgerStats::default(),
        }
    }

    /// Build directly from records (ingestion and tests)
    pub fn from_records(records: Vec<SaleRecord>) -> LedgerIndex {
        let mut stats = LedgerStats {
            total_records: records.len(),
            ..LedgerStats::default()
        };

        let mut by_parcel: HashMap<String, Vec<SaleRecord>> = HashMap::new();
        for record in records {
            if record.is_arms_length() {
                stats.arms_length_records += 1;
            }
            if record.location.is_some() {
                stats.located_records += 1;
            }
            stats.date_range_start = Some(match stats.date_range_start {
                Some(d) => d.min(record.sale_date),
                None => record.sale_date,
            });
            stats.date_range_end = Some(match stats.date_range_end {
                Some(d) => d.max(record.sale_date),
                None => record.sale_date,
            });
            by_parcel.entry(record.parcel_id.clone()).or_default().push(record);
        }

        let mut grid: HashMap<CellKey, Vec<(String, usize)>> = HashMap::new();
        let mut by_subdivision: HashMap<String, Vec<(String, usize)>> = HashMap::new();
        for (parcel, sales) in by_parcel.iter_mut() {
            sales.sort_by(|a, b| {
                a.sale_date
                    .cmp(&b.sale_date)
                    .then_with(|| a.price.cmp(&b.price))
                    .then_with(|| a.verification_code.cmp(&b.verification_code))
            });

            for (pos, sale) in sales.iter().enumerate() {
                if let Some(loc) = sale.location {
                    grid.entry(cell_of(&loc)).or_default().push((parcel.clone(), pos));
                }
                if let Some(name) = sale.subdivision.as_deref().filter(|n| !n.trim().is_empty()) {
                    by_subdivision
                        .entry(subdivision_key(name))
                        .or_default()
                        .push((parcel.clone(), pos));
                }
            }
        }

        stats.unique_parcels = by_parcel.len();

        LedgerIndex {
            state: IndexState::Ready,
            by_parcel,
            grid,
            by_subdivision,
            stats,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self.state, IndexState::Ready)
    }

    /// Failure reason when the ledger could not be loaded
    pub fn unavailable_reason(&self) -> Option<&str> {
        match &self.state {
            IndexState::Ready => None,
            IndexState::Unavailable(reason) => Some(reason),
        }
    }

    pub fn stats(&self) -> &LedgerStats {
        &self.stats
    }

    /// All records for a parcel, in any known identifier format
    pub fn lookup(&self, parcel_id: &str) -> LookupResult<'_> {
        if let IndexState::Unavailable(reason) = &self.state {
            return LookupResult::NoData(reason.clone());
        }

        match normalize_parcel_id(parcel_id).and_then(|id| self.by_parcel.get(&id)) {
            Some(sales) => LookupResult::Found(sales),
            None => LookupResult::NotFound,
        }
    }

    /// Newest-first sales history, limited to `max_records`
    pub fn sales_history(
        &self,
        parcel_id: &str,
        include_non_arms_length: bool,
        max_records: usize,
    ) -> SalesHistory {
        let mut history = SalesHistory {
            found: false,
            parcel_input: parcel_id.to_string(),
            parcel_lookup: normalize_parcel_id(parcel_id),
            sales: Vec::new(),
            arms_length_only: !include_non_arms_length,
            error: None,
        };

        let records = match self.lookup(parcel_id) {
            LookupResult::Found(records) => records,
            LookupResult::NotFound => return history,
            LookupResult::NoData(reason) => {
                history.error = Some(reason);
                return history;
            }
        };

        history.sales = records
            .iter()
            .rev()
            .filter(|r| include_non_arms_length || r.is_arms_length())
            .take(max_records)
            .map(|r| HistoryEntry {
                sale_date: r.sale_date,
                price: r.price,
                verification_code: r.verification_code.clone(),
                is_arms_length: r.is_arms_length(),
            })
            .collect();
        history.found = !history.sales.is_empty();

        history
    }

    /// Every record within `miles` great-circle distance of `center`.
    ///
    /// Visits only occupied grid cells overlapping the search circle's
    /// bounding box, so cost never exceeds the number of occupied cells.
    /// Results are ordered by distance, then newest sale, then parcel.
    pub fn query_radius(&self, center: GeoPoint, miles: f64, filter: &RadiusFilter) -> Vec<RadiusHit<'_>> {
        if !self.is_available() || !center.is_valid() || !(miles >= 0.0) {
            return Vec::new();
        }

        // Walk whichever is smaller: the covering cells, or the occupied ones
        let bounds = CellBounds::covering(center, miles);
        let buckets: Vec<&Vec<(String, usize)>> = if bounds.cell_count() > self.grid.len() as u64 {
            self.grid
                .iter()
                .filter(|(cell, _)| bounds.contains(cell))
                .map(|(_, entries)| entries)
                .collect()
        } else {
            bounds.cells().filter_map(|cell| self.grid.get(&cell)).collect()
        };

        let mut hits = Vec::new();
        for entries in buckets {
            for (parcel, pos) in entries {
                let Some(record) = self.by_parcel.get(parcel).and_then(|s| s.get(*pos)) else {
                    continue;
                };

                if !filter.include_non_arms_length && !record.is_arms_length() {
                    continue;
                }
                if filter.after_date.is_some_and(|cutoff| record.sale_date < cutoff) {
                    continue;
                }

                let Some(location) = record.location else {
                    continue;
                };
                let distance_miles = center.distance_miles(&location);
                if distance_miles <= miles {
                    hits.push(RadiusHit { record, distance_miles });
                }
            }
        }

        hits.sort_by(compare_hits);
        hits
    }

    /// Records whose subdivision matches `name` (trimmed, case-insensitive)
    pub fn subdivision_records(&self, name: &str) -> Vec<&SaleRecord> {
        if !self.is_available() {
            return Vec::new();
        }
        self.by_subdivision
            .get(&subdivision_key(name))
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|(parcel, pos)| self.by_parcel.get(parcel).and_then(|s| s.get(*pos)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Sale count and median price around `center` over trailing periods.
    ///
    /// Each period counts arms-length sales dated within `months` before
    /// `as_of` (and not after it). Periods with no sales report no median.
    pub fn market_trends(&self, center: GeoPoint, miles: f64, as_of: NaiveDate, periods: &[u32]) -> MarketTrends {
        let mut trends = MarketTrends {
            available: false,
            radius_miles: miles,
            as_of_date: as_of,
            periods: Vec::new(),
            error: self.unavailable_reason().map(str::to_string),
        };
        if trends.error.is_some() {
            return trends;
        }

        let longest = periods.iter().copied().max().unwrap_or(0);
        let filter = RadiusFilter {
            after_date: as_of.checked_sub_signed(Duration::days(months_to_days(longest))),
            include_non_arms_length: false,
        };
        let hits = self.query_radius(center, miles, &filter);

        for &months in periods {
            let start = as_of.checked_sub_signed(Duration::days(months_to_days(months)));
            let mut prices: Vec<u64> = hits
                .iter()
                .map(|hit| hit.record)
                .filter(|r| r.sale_date <= as_of && start.map_or(true, |s| r.sale_date >= s))
                .map(|r| r.price)
                .collect();

            trends.periods.push(TrendPeriod {
                months,
                count: prices.len(),
                median_price: median_price(&mut prices),
            });
        }

        trends.available = trends.periods.iter().any(|p| p.count > 0);
        trends
    }
}

fn subdivision_key(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

fn months_to_days(months: u32) -> i64 {
    (months as f64 * DAYS_PER_MONTH).ceil() as i64
}

fn compare_hits(a: &RadiusHit<'_>, b: &RadiusHit<'_>) -> Ordering {
    a.distance_miles
        .total_cmp(&b.distance_miles)
        .then_with(|| b.record.sale_date.cmp(&a.record.sale_date))
        .then_with(|| a.record.parcel_id.cmp(&b.record.parcel_id))
        .then_with(|| a.record.price.cmp(&b.record.price))
}

// ============================================================================
// GRID GEOMETRY
// ============================================================================

fn bucket(degrees: f64) -> i32 {
    (degrees / GRID_CELL_DEGREES).floor() as i32
}

fn cell_of(point: &GeoPoint) -> CellKey {
    (bucket(point.lat), bucket(point.lon))
}

/// Grid-cell bounding box of a great-circle disc, as inclusive cell ranges.
///
/// The latitude half-width is exact (d/R). The longitude half-width is the
/// maximum longitude offset reached on the circle, asin(sin(d/R)/cos(lat));
/// when the disc reaches a pole every longitude is covered. A box crossing
/// the antimeridian splits into two longitude ranges.
struct CellBounds {
    lat: (i32, i32),
    lon: Vec<(i32, i32)>,
}

impl CellBounds {
    fn covering(center: GeoPoint, miles: f64) -> CellBounds {
        let angular = miles / EARTH_RADIUS_MILES;
        let dlat = angular.to_degrees();

        let min_lat = (center.lat - dlat).max(-90.0);
        let max_lat = (center.lat + dlat).min(90.0);

        let full_circle = angular >= std::f64::consts::FRAC_PI_2 || max_lat >= 90.0 || min_lat <= -90.0;
        let ratio = if full_circle {
            2.0
        } else {
            angular.sin() / center.lat.to_radians().cos()
        };

        let lon_degrees: Vec<(f64, f64)> = if ratio >= 1.0 {
            vec![(-180.0, 180.0)]
        } else {
            let dlon = ratio.asin().to_degrees();
            let (lo, hi) = (center.lon - dlon, center.lon + dlon);
            if lo < -180.0 {
                vec![(lo + 360.0, 180.0), (-180.0, hi)]
            } else if hi > 180.0 {
                vec![(lo, 180.0), (-180.0, hi - 360.0)]
            } else {
                vec![(lo, hi)]
            }
        };

        CellBounds {
            lat: (bucket(min_lat), bucket(max_lat)),
            lon: lon_degrees.into_iter().map(|(lo, hi)| (bucket(lo), bucket(hi))).collect(),
        }
    }

    fn cell_count(&self) -> u64 {
        let span = |(lo, hi): (i32, i32)| (hi as i64 - lo as i64 + 1).max(0) as u64;
        span(self.lat) * self.lon.iter().map(|r| span(*r)).sum::<u64>()
    }

    fn contains(&self, cell: &CellKey) -> bool {
        let (lat, lon) = *cell;
        lat >= self.lat.0 && lat <= self.lat.1 && self.lon.iter().any(|(lo, hi)| lon >= *lo && lon <= *hi)
    }

    fn cells(&self) -> impl Iterator<Item = CellKey> + '_ {
        (self.lat.0..=self.lat.1).flat_map(move |lat| {
            self.lon
                .iter()
                .flat_map(move |(lo, hi)| (*lo..=*hi).map(move |lon| (lat, lon)))
        })
    }
}

fn median_price(prices: &mut [u64]) -> Option<f64> {
    if prices.is_empty() {
        return None;
    }
    prices.sort_unstable();
    let mid = prices.len() / 2;
    Some(if prices.len() % 2 == 0 {
        (prices[mid - 1] as f64 + prices[mid] as f64) / 2.0
    } else {
        prices[mid] as f64
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_sale(parcel: &str, date: &str, price: u64, code: &str, loc: Option<(f64, f64)>) -> SaleRecord {
        SaleRecord {
            parcel_id: normalize_parcel_id(parcel).unwrap(),
            sale_date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            price,
            verification_code: code.to_string(),
            location: loc.map(|(lat, lon)| GeoPoint::new(lat, lon)),
            size_sqft: None,
            lot_size: None,
            year_built: None,
            subdivision: None,
        }
    }

    /// Deterministic scatter around Leesburg, VA
    fn synthetic_grid() -> Vec<SaleRecord> {
        let mut records = Vec::new();
        for i in 0..40 {
            for j in 0..40 {
                let n = i * 40 + j;
                let lat = 39.05 + i as f64 * 0.0037 + ((n * 7919) % 13) as f64 * 0.0001;
                let lon = -77.60 + j as f64 * 0.0041 + ((n * 104_729) % 11) as f64 * 0.0001;
                let code = if n % 9 == 0 { "Z:FORECLOSURE" } else { "1:MARKET SALE" };
                let month = 1 + (n % 12) as u32;
                let date = format!("{}-{:02}-15", 2020 + (n % 5), month);
                records.push(create_test_sale(&n.to_string(), &date, 300_000 + n as u64 * 100, code, Some((lat, lon))));
            }
        }
        records
    }

    #[test]
    fn test_lookup_any_format_returns_all_records() {
        let index = LedgerIndex::from_records(vec![
            create_test_sale("110394004000", "2024-03-01", 850_000, "1:MARKET SALE", None),
            create_test_sale("110394004000", "2021-05-10", 690_000, "Z:FORECLOSURE", None),
            create_test_sale("123456", "2023-06-15", 410_000, "1:MARKET SALE", None),
        ]);

        for query in ["110-39-4004-000", "110394004000", "110 39 4004 000"] {
            let records = index.lookup(query).records();
            assert_eq!(records.len(), 2, "query {}", query);
            // Ordered by sale date ascending
            assert!(records[0].sale_date < records[1].sale_date);
        }

        assert_eq!(index.lookup("123456").records().len(), 1);
        assert_eq!(index.lookup("000000123456").records().len(), 1);
        assert_eq!(index.lookup("555"), LookupResult::NotFound);
        assert_eq!(index.lookup("no digits"), LookupResult::NotFound);
    }

    #[test]
    fn test_unavailable_index_returns_no_data() {
        let index = LedgerIndex::unavailable("file not found");

        assert!(!index.is_available());
        assert_eq!(index.lookup("110394004000"), LookupResult::NoData("file not found".to_string()));
        assert!(index
            .query_radius(GeoPoint::new(39.1, -77.5), 5.0, &RadiusFilter::default())
            .is_empty());

        let history = index.sales_history("110394004000", false, 3);
        assert!(!history.found);
        assert_eq!(history.error.as_deref(), Some("file not found"));
    }

    #[test]
    fn test_load_missing_source_is_data_unavailable() {
        let source = LedgerSource::Csv("/nonexistent/sales.csv".into());

        match LedgerIndex::load(&source) {
            Err(ValuationError::DataUnavailable(msg)) => assert!(msg.contains("sales.csv")),
            other => panic!("expected DataUnavailable, got {:?}", other.map(|_| ())),
        }

        let index = LedgerIndex::load_or_unavailable(&source);
        assert!(!index.is_available());
        assert!(matches!(index.lookup("1"), LookupResult::NoData(_)));
    }

    #[test]
    fn test_sales_history_newest_first_and_filtered() {
        let index = LedgerIndex::from_records(vec![
            create_test_sale("110394004000", "2020-02-01", 600_000, "1:MARKET SALE", None),
            create_test_sale("110394004000", "2022-07-01", 700_000, "7:RELATED PARTIES", None),
            create_test_sale("110394004000", "2024-03-01", 850_000, "1:MARKET SALE", None),
        ]);

        let history = index.sales_history("110-39-4004-000", false, 3);
        assert!(history.found);
        assert_eq!(history.parcel_lookup.as_deref(), Some("110394004000"));
        assert_eq!(history.sales.len(), 2);
        assert_eq!(history.sales[0].price, 850_000);
        assert!(history.sales.iter().all(|s| s.is_arms_length));

        let all = index.sales_history("110394004000", true, 2);
        assert_eq!(all.sales.len(), 2);
        assert_eq!(all.sales[1].price, 700_000);
        assert!(!all.sales[1].is_arms_length);
    }

    #[test]
    fn test_radius_matches_brute_force() {
        let records = synthetic_grid();
        let index = LedgerIndex::from_records(records.clone());

        let centers = [
            GeoPoint::new(39.12, -77.52),
            GeoPoint::new(39.05, -77.60),
            GeoPoint::new(39.20, -77.45),
        ];

        for center in centers {
            // 50 mi covers more cells than the ledger occupies
            for miles in [0.1, 0.5, 1.0, 2.5, 50.0] {
                let filter = RadiusFilter::default();
                let hits = index.query_radius(center, miles, &filter);

                // No false positives
                for hit in &hits {
                    let truth = center.distance_miles(&hit.record.location.unwrap());
                    assert!(truth <= miles);
                    assert!(hit.record.is_arms_length());
                }

                // No false negatives
                let expected = records
                    .iter()
                    .filter(|r| r.is_arms_length())
                    .filter(|r| center.distance_miles(&r.location.unwrap()) <= miles)
                    .count();
                assert_eq!(hits.len(), expected, "center {:?} radius {}", center, miles);

                // Ordered by distance
                for pair in hits.windows(2) {
                    assert!(pair[0].distance_miles <= pair[1].distance_miles);
                }
            }
        }
    }

    #[test]
    fn test_radius_filters() {
        let center = GeoPoint::new(39.1, -77.5);
        let index = LedgerIndex::from_records(vec![
            create_test_sale("1", "2024-01-10", 500_000, "1:MARKET SALE", Some((39.101, -77.5))),
            create_test_sale("2", "2021-01-10", 480_000, "1:MARKET SALE", Some((39.102, -77.5))),
            create_test_sale("3", "2024-02-10", 300_000, "Z:FORECLOSURE", Some((39.103, -77.5))),
            create_test_sale("4", "2024-02-10", 520_000, "1:MARKET SALE", None),
        ]);

        let default_hits = index.query_radius(center, 1.0, &RadiusFilter::default());
        assert_eq!(default_hits.len(), 2);

        let recent = RadiusFilter {
            after_date: NaiveDate::from_ymd_opt(2023, 1, 1),
            include_non_arms_length: false,
        };
        let hits = index.query_radius(center, 1.0, &recent);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.parcel_id, "000000000001");

        let everything = RadiusFilter {
            after_date: None,
            include_non_arms_length: true,
        };
        assert_eq!(index.query_radius(center, 1.0, &everything).len(), 3);
    }

    #[test]
    fn test_radius_across_antimeridian() {
        let index = LedgerIndex::from_records(vec![
            create_test_sale("1", "2024-01-10", 500_000, "1:MARKET SALE", Some((0.0, 179.999))),
            create_test_sale("2", "2024-01-10", 500_000, "1:MARKET SALE", Some((0.0, -179.999))),
        ]);

        let hits = index.query_radius(GeoPoint::new(0.0, 180.0), 1.0, &RadiusFilter::default());
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_huge_radius_scans_occupied_cells_only() {
        let index = LedgerIndex::from_records(vec![create_test_sale(
            "1",
            "2024-01-10",
            500_000,
            "1:MARKET SALE",
            Some((39.1, -77.5)),
        )]);

        let bounds = CellBounds::covering(GeoPoint::new(39.1, -77.5), 3000.0);
        assert!(bounds.cell_count() > 100_000_000);

        let started = Instant::now();
        for miles in [1000.0, 3000.0, 12_500.0] {
            let hits = index.query_radius(GeoPoint::new(39.1, -77.5), miles, &RadiusFilter::default());
            assert_eq!(hits.len(), 1, "radius {}", miles);
        }
        assert!(started.elapsed().as_secs() < 2);
    }

    #[test]
    fn test_subdivision_records() {
        let mut ashburn = create_test_sale("1", "2024-01-10", 500_000, "1:MARKET SALE", None);
        ashburn.subdivision = Some("Ashburn Farm".to_string());
        let mut ashburn_again = create_test_sale("2", "2024-03-10", 520_000, "1:MARKET SALE", None);
        ashburn_again.subdivision = Some("  ASHBURN FARM ".to_string());
        let mut other = create_test_sale("3", "2024-03-10", 610_000, "1:MARKET SALE", None);
        other.subdivision = Some("Brambleton".to_string());
        let index = LedgerIndex::from_records(vec![
            ashburn,
            ashburn_again,
            other,
            create_test_sale("4", "2024-03-10", 610_000, "1:MARKET SALE", None),
        ]);

        assert_eq!(index.subdivision_records("ashburn farm").len(), 2);
        assert_eq!(index.subdivision_records("Brambleton")[0].price, 610_000);
        assert!(index.subdivision_records("South Riding").is_empty());
        assert!(LedgerIndex::unavailable("gone").subdivision_records("Brambleton").is_empty());
    }

    #[test]
    fn test_market_trends_periods() {
        let center = GeoPoint::new(39.1, -77.5);
        let as_of = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let index = LedgerIndex::from_records(vec![
            create_test_sale("1", "2025-04-01", 600_000, "1:MARKET SALE", Some((39.101, -77.5))),
            create_test_sale("2", "2025-02-01", 640_000, "1:MARKET SALE", Some((39.102, -77.5))),
            create_test_sale("3", "2024-09-01", 500_000, "1:MARKET SALE", Some((39.103, -77.5))),
            create_test_sale("4", "2023-09-01", 450_000, "1:MARKET SALE", Some((39.104, -77.5))),
            create_test_sale("5", "2025-05-01", 900_000, "Z:FORECLOSURE", Some((39.101, -77.5))),
            create_test_sale("6", "2025-07-01", 700_000, "1:MARKET SALE", Some((39.101, -77.5))),
            create_test_sale("7", "2025-05-01", 700_000, "1:MARKET SALE", Some((39.5, -77.5))),
        ]);

        let trends = index.market_trends(center, 2.0, as_of, &TREND_PERIODS_MONTHS);
        assert!(trends.available);
        assert_eq!(trends.periods.len(), 3);

        let six = trends.period(6).unwrap();
        assert_eq!(six.count, 2);
        assert_eq!(six.median_price, Some(620_000.0));

        let twelve = trends.period(12).unwrap();
        assert_eq!(twelve.count, 3);
        assert_eq!(twelve.median_price, Some(600_000.0));

        let twenty_four = trends.period(24).unwrap();
        assert_eq!(twenty_four.count, 4);
        assert_eq!(twenty_four.median_price, Some(550_000.0));
    }

    #[test]
    fn test_market_trends_empty_and_unavailable() {
        let center = GeoPoint::new(39.1, -77.5);
        let as_of = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();

        let empty = LedgerIndex::from_records(vec![]).market_trends(center, 2.0, as_of, &TREND_PERIODS_MONTHS);
        assert!(!empty.available);
        assert!(empty.periods.iter().all(|p| p.count == 0 && p.median_price.is_none()));
        assert!(empty.error.is_none());

        let broken = LedgerIndex::unavailable("file not found").market_trends(center, 2.0, as_of, &TREND_PERIODS_MONTHS);
        assert!(!broken.available);
        assert_eq!(broken.error.as_deref(), Some("file not found"));
        assert!(broken.periods.is_empty());
    }

    #[test]
    fn test_stats() {
        let index = LedgerIndex::from_records(vec![
            create_test_sale("1", "2020-01-02", 500_000, "1:MARKET SALE", Some((39.1, -77.5))),
            create_test_sale("1", "2023-01-02", 550_000, "Z:FORECLOSURE", None),
            create_test_sale("2", "2025-06-30", 600_000, "V:NEW CONSTRUCTION", None),
        ]);

        let stats = index.stats();
        assert_eq!(stats.total_records, 3);
        assert_eq!(stats.arms_length_records, 2);
        assert_eq!(stats.filtered_out(), 1);
        assert_eq!(stats.unique_parcels, 2);
        assert_eq!(stats.located_records, 1);
        assert_eq!(stats.date_range_start, NaiveDate::from_ymd_opt(2020, 1, 2));
        assert_eq!(stats.date_range_end, NaiveDate::from_ymd_opt(2025, 6, 30));
    }
}
