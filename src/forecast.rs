// 📈 Forecast Projector - area appreciation rate + compounded horizons
//
// Rate estimators, tried in order:
//   1. median annualized change across repeat sales of the same parcel
//   2. trailing-12-month vs prior-12-month median price per sqft
//   3. conservative default rate, flagged low-confidence

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::config::ForecastConfig;
use crate::db::{GeoPoint, SaleRecord};
use crate::ledger::{LedgerIndex, RadiusFilter};
use crate::selection::DAYS_PER_MONTH;
use crate::triangulation::TriangulatedValue;

/// Forecast horizons in years, ascending
pub const HORIZONS: [u32; 3] = [1, 3, 5];

// ============================================================================
// TYPES
// ============================================================================

/// Area grouping used for trend estimation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AreaKey {
    /// Sales whose subdivision matches (case-insensitive)
    Subdivision { name: String },
    /// Sales within `miles` of `center`
    Radius { center: GeoPoint, miles: f64 },
}

impl AreaKey {
    pub fn describe(&self) -> String {
        match self {
            AreaKey::Subdivision { name } => format!("subdivision {}", name),
            AreaKey::Radius { miles, .. } => format!("{:.1} mi radius", miles),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateSource {
    RepeatSales,
    PeriodMedians,
    Default,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppreciationRate {
    pub annual_rate: f64,
    pub source: RateSource,
    /// Observations behind the rate (pairs, or sales across both periods)
    pub sample_size: usize,
    pub low_confidence: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub horizon_years: u32,
    pub projected_amount: f64,
    pub low_amount: f64,
    pub high_amount: f64,
    pub annual_rate_used: f64,
    pub change_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub area: AreaKey,
    /// Ordered by horizon ascending
    pub points: Vec<ForecastPoint>,
    pub rate: AppreciationRate,
    /// Thin history: rate is the conservative default
    pub low_confidence: bool,
    pub factors: Vec<String>,
}

// ============================================================================
// PROJECTOR
// ============================================================================

pub struct ForecastProjector {
    pub lookback_months: u32,
    pub min_sample: usize,
    pub default_rate: f64,
    pub min_pair_days: i64,
    pub band_spread: f64,
}

impl ForecastProjector {
    pub fn new() -> Self {
        Self::from_config(&ForecastConfig::default())
    }

    pub fn from_config(config: &ForecastConfig) -> Self {
        ForecastProjector {
            lookback_months: config.lookback_months,
            min_sample: config.min_sample,
            default_rate: config.default_rate,
            min_pair_days: config.min_pair_days,
            band_spread: config.band_spread,
        }
    }

    /// Project the blended value across HORIZONS. Never fails.
    pub fn project(
        &self,
        index: &LedgerIndex,
        triangulated: &TriangulatedValue,
        area: &AreaKey,
        as_of: NaiveDate,
    ) -> Forecast {
        let rate = self.estimate_rate(index, area, as_of);
        self.build_forecast(triangulated.blended_amount, rate, area.clone())
    }

    /// Derive the area's annual appreciation rate from the ledger
    pub fn estimate_rate(&self, index: &LedgerIndex, area: &AreaKey, as_of: NaiveDate) -> AppreciationRate {
        let records = self.area_records(index, area, as_of);

        let pair_rates = self.repeat_sale_rates(&records);
        if pair_rates.len() >= self.min_sample {
            if let Some(rate) = median(pair_rates.clone()) {
                debug!(area = %area.describe(), pairs = pair_rates.len(), rate, "repeat-sale rate");
                return AppreciationRate {
                    annual_rate: rate,
                    source: RateSource::RepeatSales,
                    sample_size: pair_rates.len(),
                    low_confidence: false,
                };
            }
        }

        if let Some((rate, sample_size)) = self.period_median_rate(&records, as_of) {
            debug!(area = %area.describe(), sample_size, rate, "period-median rate");
            return AppreciationRate {
                annual_rate: rate,
                source: RateSource::PeriodMedians,
                sample_size,
                low_confidence: false,
            };
        }

        warn!(
            area = %area.describe(),
            sales = records.len(),
            pairs = pair_rates.len(),
            default_rate = self.default_rate,
            "insufficient area history, using default appreciation rate"
        );
        AppreciationRate {
            annual_rate: self.default_rate,
            source: RateSource::Default,
            sample_size: pair_rates.len(),
            low_confidence: true,
        }
    }

    /// Compound `amount` annually at the given rate
    pub fn build_forecast(&self, amount: f64, rate: AppreciationRate, area: AreaKey) -> Forecast {
        let r = rate.annual_rate;
        let points = HORIZONS
            .iter()
            .map(|&years| {
                let projected = (amount * (1.0 + r).powi(years as i32)).round();
                ForecastPoint {
                    horizon_years: years,
                    projected_amount: projected,
                    low_amount: (amount * (1.0 + r - self.band_spread).powi(years as i32)).round(),
                    high_amount: (amount * (1.0 + r + self.band_spread).powi(years as i32)).round(),
                    annual_rate_used: r,
                    change_pct: if amount > 0.0 { (projected / amount - 1.0) * 100.0 } else { 0.0 },
                }
            })
            .collect();

        let factors = self.factors(&rate, &area);
        Forecast {
            area,
            points,
            low_confidence: rate.low_confidence,
            rate,
            factors,
        }
    }

    // ========================================================================
    // ESTIMATORS
    // ========================================================================

    /// Arms-length sales in the area within the lookback window
    fn area_records<'a>(&self, index: &'a LedgerIndex, area: &AreaKey, as_of: NaiveDate) -> Vec<&'a SaleRecord> {
        let window_days = (self.lookback_months as f64 * DAYS_PER_MONTH).ceil() as i64;
        let start = as_of
            .checked_sub_signed(Duration::days(window_days))
            .unwrap_or(NaiveDate::MIN);
        let in_window = |r: &SaleRecord| r.sale_date >= start && r.sale_date <= as_of && r.price > 0;

        match area {
            AreaKey::Subdivision { name } => index
                .subdivision_records(name)
                .into_iter()
                .filter(|r| r.is_arms_length() && in_window(r))
                .collect(),
            AreaKey::Radius { center, miles } => {
                let filter = RadiusFilter {
                    after_date: Some(start),
                    include_non_arms_length: false,
                };
                index
                    .query_radius(*center, *miles, &filter)
                    .into_iter()
                    .map(|hit| hit.record)
                    .filter(|r| in_window(r))
                    .collect()
            }
        }
    }

    /// Annualized change between consecutive sales of the same parcel
    fn repeat_sale_rates(&self, records: &[&SaleRecord]) -> Vec<f64> {
        let mut by_parcel: BTreeMap<&str, Vec<&SaleRecord>> = BTreeMap::new();
        for record in records {
            by_parcel.entry(record.parcel_id.as_str()).or_default().push(record);
        }

        let mut rates = Vec::new();
        for sales in by_parcel.values_mut() {
            sales.sort_by_key(|r| r.sale_date);
            for pair in sales.windows(2) {
                let days = (pair[1].sale_date - pair[0].sale_date).num_days();
                if days < self.min_pair_days {
                    continue;
                }
                let ratio = pair[1].price as f64 / pair[0].price as f64;
                let rate = ratio.powf(365.25 / days as f64) - 1.0;
                if rate.is_finite() {
                    rates.push(rate);
                }
            }
        }
        rates
    }

    /// Trailing 12 months vs the 12 months before, median price per sqft
    fn period_median_rate(&self, records: &[&SaleRecord], as_of: NaiveDate) -> Option<(f64, usize)> {
        let year = Duration::days(365);
        let recent_start = as_of.checked_sub_signed(year).unwrap_or(NaiveDate::MIN);
        let prior_start = recent_start.checked_sub_signed(year).unwrap_or(NaiveDate::MIN);

        let mut recent = Vec::new();
        let mut prior = Vec::new();
        for record in records {
            let Some(ppsf) = record.price_per_sqft() else {
                continue;
            };
            if record.sale_date > recent_start {
                recent.push(ppsf);
            } else if record.sale_date > prior_start {
                prior.push(ppsf);
            }
        }

        if recent.len() < self.min_sample || prior.len() < self.min_sample {
            return None;
        }

        let sample_size = recent.len() + prior.len();
        let recent_median = median(recent)?;
        let prior_median = median(prior)?;
        if !(prior_median > 0.0) {
            return None;
        }
        Some((recent_median / prior_median - 1.0, sample_size))
    }

    fn factors(&self, rate: &AppreciationRate, area: &AreaKey) -> Vec<String> {
        let mut factors = Vec::new();

        match rate.source {
            RateSource::RepeatSales => factors.push(format!(
                "Rate from {} repeat sales in {} (median annualized change)",
                rate.sample_size,
                area.describe()
            )),
            RateSource::PeriodMedians => factors.push(format!(
                "Rate from median price per sqft, trailing vs prior 12 months ({} sales in {})",
                rate.sample_size,
                area.describe()
            )),
            RateSource::Default => factors.push(format!(
                "Insufficient sales history in {} (need {} observations); conservative default of {:.1}% used",
                area.describe(),
                self.min_sample,
                self.default_rate * 100.0
            )),
        }

        if rate.annual_rate < 0.0 {
            factors.push("Area prices declining over the lookback window".to_string());
        }

        factors.push(format!(
            "Range assumes ±{:.1}% around the annual rate",
            self.band_spread * 100.0
        ));
        factors.push("Short-term (1 year) forecast is more predictable; 5-year horizon carries higher uncertainty".to_string());
        factors
    }
}

impl Default for ForecastProjector {
    fn default() -> Self {
        Self::new()
    }
}

fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triangulation::Confidence;

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    fn create_test_sale(parcel: u32, days_ago: i64, price: u64, size: Option<u32>) -> SaleRecord {
        SaleRecord {
            parcel_id: format!("{:012}", parcel),
            sale_date: as_of() - Duration::days(days_ago),
            price,
            verification_code: "1:MARKET SALE".to_string(),
            location: Some(GeoPoint::new(39.05 + parcel as f64 * 0.0001, -77.45)),
            size_sqft: size,
            lot_size: None,
            year_built: None,
            subdivision: Some("Ashburn Farm".to_string()),
        }
    }

    fn create_test_value(amount: f64) -> TriangulatedValue {
        TriangulatedValue {
            blended_amount: amount,
            overall_confidence: Confidence::High,
            contributing_sources: vec![],
            disagreements: vec![],
            methodology: "test".to_string(),
        }
    }

    fn subdivision() -> AreaKey {
        AreaKey::Subdivision {
            name: "ashburn farm".to_string(),
        }
    }

    #[test]
    fn test_repeat_sales_rate() {
        // Six parcels, each resold two years later for 10% more
        let mut records = Vec::new();
        for parcel in 1..=6 {
            records.push(create_test_sale(parcel, 900, 500_000, None));
            records.push(create_test_sale(parcel, 900 - 730, 550_000, None));
        }
        let index = LedgerIndex::from_records(records);

        let rate = ForecastProjector::new().estimate_rate(&index, &subdivision(), as_of());
        assert_eq!(rate.source, RateSource::RepeatSales);
        assert_eq!(rate.sample_size, 6);
        assert!(!rate.low_confidence);
        let expected = 1.1f64.powf(365.25 / 730.0) - 1.0;
        assert!((rate.annual_rate - expected).abs() < 1e-9);
    }

    #[test]
    fn test_repeat_sales_resist_outlier() {
        let mut records = Vec::new();
        for parcel in 1..=6 {
            records.push(create_test_sale(parcel, 800, 500_000, None));
            records.push(create_test_sale(parcel, 800 - 365, 520_000, None));
        }
        // A flip that tripled in price
        records.push(create_test_sale(7, 600, 300_000, None));
        records.push(create_test_sale(7, 235, 900_000, None));
        let index = LedgerIndex::from_records(records);

        let rate = ForecastProjector::new().estimate_rate(&index, &subdivision(), as_of());
        assert!((rate.annual_rate - 0.04).abs() < 1e-3);
    }

    #[test]
    fn test_period_median_fallback() {
        let mut records = Vec::new();
        for parcel in 1..=5 {
            records.push(create_test_sale(parcel, 500, 400_000, Some(2000))); // $200/sqft
            records.push(create_test_sale(parcel + 100, 100, 420_000, Some(2000))); // $210/sqft
        }
        let index = LedgerIndex::from_records(records);

        let rate = ForecastProjector::new().estimate_rate(&index, &subdivision(), as_of());
        assert_eq!(rate.source, RateSource::PeriodMedians);
        assert_eq!(rate.sample_size, 10);
        assert!((rate.annual_rate - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_thin_history_uses_default_and_flags() {
        let index = LedgerIndex::from_records(vec![
            create_test_sale(1, 900, 500_000, Some(2000)),
            create_test_sale(1, 200, 560_000, Some(2000)),
        ]);
        let projector = ForecastProjector::new();

        let forecast = projector.project(&index, &create_test_value(600_000.0), &subdivision(), as_of());
        assert!(forecast.low_confidence);
        assert_eq!(forecast.rate.source, RateSource::Default);
        assert_eq!(forecast.points[0].annual_rate_used, 0.04);
        assert_eq!(forecast.points[0].projected_amount, 624_000.0);
        assert!(forecast.factors[0].contains("Insufficient sales history"));
    }

    #[test]
    fn test_unavailable_ledger_still_forecasts() {
        let index = LedgerIndex::unavailable("ledger file missing");
        let forecast = ForecastProjector::new().project(&index, &create_test_value(500_000.0), &subdivision(), as_of());
        assert!(forecast.low_confidence);
        assert_eq!(forecast.points.len(), 3);
    }

    #[test]
    fn test_projection_monotonic_in_horizon() {
        let projector = ForecastProjector::new();
        for rate in [0.001, 0.02, 0.04, 0.12] {
            let forecast = projector.build_forecast(
                733_333.0,
                AppreciationRate {
                    annual_rate: rate,
                    source: RateSource::RepeatSales,
                    sample_size: 10,
                    low_confidence: false,
                },
                subdivision(),
            );
            let horizons: Vec<u32> = forecast.points.iter().map(|p| p.horizon_years).collect();
            assert_eq!(horizons, vec![1, 3, 5]);
            assert!(forecast.points[2].projected_amount >= forecast.points[1].projected_amount);
            assert!(forecast.points[1].projected_amount >= forecast.points[0].projected_amount);
            for p in &forecast.points {
                assert!(p.low_amount <= p.projected_amount && p.projected_amount <= p.high_amount);
            }
        }
    }

    #[test]
    fn test_compounding_and_change_pct() {
        let projector = ForecastProjector::new();
        let forecast = projector.build_forecast(
            100_000.0,
            AppreciationRate {
                annual_rate: 0.10,
                source: RateSource::PeriodMedians,
                sample_size: 12,
                low_confidence: false,
            },
            subdivision(),
        );
        assert_eq!(forecast.points[1].projected_amount, 133_100.0);
        assert!((forecast.points[1].change_pct - 33.1).abs() < 1e-9);
    }

    #[test]
    fn test_extreme_valuation_dates() {
        let index = LedgerIndex::from_records(vec![create_test_sale(1, 200, 500_000, Some(2000))]);
        let projector = ForecastProjector::new();
        let radius = AreaKey::Radius {
            center: GeoPoint::new(39.05, -77.45),
            miles: 1.0,
        };

        for as_of in [NaiveDate::MIN, NaiveDate::MAX] {
            for area in [subdivision(), radius.clone()] {
                let forecast = projector.project(&index, &create_test_value(500_000.0), &area, as_of);
                assert_eq!(forecast.rate.source, RateSource::Default);
                assert_eq!(forecast.points.len(), 3);
            }
        }
    }

    #[test]
    fn test_radius_area() {
        let mut records = Vec::new();
        for parcel in 1..=5 {
            records.push(create_test_sale(parcel, 700, 500_000, None));
            records.push(create_test_sale(parcel, 700 - 365, 530_000, None));
        }
        let index = LedgerIndex::from_records(records);
        let area = AreaKey::Radius {
            center: GeoPoint::new(39.05, -77.45),
            miles: 1.0,
        };

        let rate = ForecastProjector::new().estimate_rate(&index, &area, as_of());
        assert_eq!(rate.source, RateSource::RepeatSales);
        assert!((rate.annual_rate - 0.06).abs() < 1e-3);

        let json = serde_json::to_string(&area).unwrap();
        assert!(json.contains("\"kind\":\"radius\""));
    }
}
