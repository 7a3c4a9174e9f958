// 🏠 Valuation Engine - one entry point from subject to forecast
//
// subject → select → enrich → score → triangulate → forecast
//
// Each request pins the LedgerIndex instance it started with, so an
// invalidation mid-request never mixes two ledgers in one answer.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::{ResourceCache, SizeCache};
use crate::config::ValuationConfig;
use crate::db::{GeoPoint, LedgerSource};
use crate::enrichment::{EnrichmentController, EnrichmentReport, SizeEnricher};
use crate::error::{Result, ValuationError};
use crate::forecast::{AreaKey, Forecast, ForecastProjector};
use crate::ledger::{LedgerIndex, LedgerStats, MarketTrends, SalesHistory, TREND_PERIODS_MONTHS};
use crate::scoring::{ComparableScorer, ComparableSummary, ScoredComparable};
use crate::selection::{CandidateSelector, SelectionCriteria, Subject, MAX_RADIUS_MILES};
use crate::triangulation::{TriangulatedValue, Triangulator, ValueEstimate};

pub const DEFAULT_LEDGER_KEY: &str = "default";

// ============================================================================
// REQUEST / REPORT
// ============================================================================

/// Per-request overrides of the configured policy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValuationOptions {
    pub radius_miles: Option<f64>,
    pub max_age_months: Option<u32>,
    pub max_candidates: Option<usize>,
    pub min_price: Option<u64>,
    pub max_price: Option<u64>,
    pub include_non_arms_length: Option<bool>,
    pub allow_external_enrichment: Option<bool>,
    pub enrichment_timeout_ms: Option<u64>,
    /// Area used for the appreciation trend; defaults to the subject's
    /// subdivision, else the selection radius around the subject
    pub forecast_area: Option<AreaKey>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuationRequest {
    pub subject: Subject,
    #[serde(default = "default_ledger_key")]
    pub ledger_key: String,
    /// Pre-fetched signals (AVMs, assessment-derived figures)
    #[serde(default)]
    pub external_estimates: Vec<ValueEstimate>,
    #[serde(default)]
    pub options: ValuationOptions,
}

fn default_ledger_key() -> String {
    DEFAULT_LEDGER_KEY.to_string()
}

impl ValuationRequest {
    pub fn new(subject: Subject, ledger_key: &str) -> Self {
        ValuationRequest {
            subject,
            ledger_key: ledger_key.to_string(),
            external_estimates: Vec::new(),
            options: ValuationOptions::default(),
        }
    }

    /// Builder pattern: add a pre-fetched estimate
    pub fn with_estimate(mut self, estimate: ValueEstimate) -> Self {
        self.external_estimates.push(estimate);
        self
    }
}

/// Market trend query around a point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketTrendsRequest {
    #[serde(default = "default_ledger_key")]
    pub ledger_key: String,
    pub location: GeoPoint,
    #[serde(default = "default_trend_radius")]
    pub radius_miles: f64,
    pub as_of_date: NaiveDate,
}

fn default_trend_radius() -> f64 {
    2.0
}

/// Everything one valuation produced, including the audit trail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValuationReport {
    pub request_id: String,
    pub generated_at: DateTime<Utc>,
    pub ledger_key: String,
    pub ledger_available: bool,
    /// Why the ledger could not be used, when it could not
    pub ledger_note: Option<String>,
    pub subject: Subject,
    pub value: TriangulatedValue,
    pub forecast: Forecast,
    pub comparable_estimate: Option<ValueEstimate>,
    pub comparable_summary: ComparableSummary,
    /// All scored candidates, REJECTED included
    pub comparables: Vec<ScoredComparable>,
    pub enrichment: EnrichmentReport,
}

impl ValuationReport {
    pub fn summary(&self) -> String {
        let five_year = self
            .forecast
            .points
            .last()
            .map(|p| format!(", {}y ${:.0}", p.horizon_years, p.projected_amount))
            .unwrap_or_default();
        format!(
            "{} from {} comps{}{}",
            self.value.summary(),
            self.comparable_summary.count,
            five_year,
            if self.forecast.low_confidence { " (low-confidence forecast)" } else { "" }
        )
    }
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct ValuationEngine {
    ledgers: ResourceCache<LedgerIndex>,
    size_cache: Arc<SizeCache>,
    enricher: Option<Arc<dyn SizeEnricher>>,
    /// Enrichment lookups still running, across all requests
    enrichment_in_flight: Arc<AtomicUsize>,
    config: ValuationConfig,
}


impl ValuationEngine {
    /// Registers every configured ledger. Nothing is loaded until first use.
    pub fn new(config: ValuationConfig) -> Self {
        let engine = ValuationEngine {
            ledgers: ResourceCache::new(),
            size_cache: Arc::new(SizeCache::new()),
            enricher: None,
            enrichment_in_flight: Arc::new(AtomicUsize::new(0)),
            config,
        };

        for (key, source) in engine.config.ledgers.clone() {
            engine.register_ledger(&key, source);
        }
        engine
    }

    /// Builder pattern: inject the batch size lookup
    pub fn with_enricher(mut self, enricher: Arc<dyn SizeEnricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    pub fn register_ledger(&self, key: &str, source: LedgerSource) {
        self.ledgers.register(key, move || LedgerIndex::load_or_unavailable(&source));
    }

    /// Register a custom index builder (in-memory fixtures, other feeds)
    pub fn register_index<F>(&self, key: &str, builder: F)
    where
        F: Fn() -> LedgerIndex + Send + Sync + 'static,
    {
        self.ledgers.register(key, builder);
    }

    pub fn config(&self) -> &ValuationConfig {
        &self.config
    }

    pub fn size_cache(&self) -> &Arc<SizeCache> {
        &self.size_cache
    }

    pub fn ledger_keys(&self) -> Vec<String> {
        self.ledgers.keys()
    }

    /// The current index for a key, built on first access
    pub fn ledger(&self, key: &str) -> Result<Arc<LedgerIndex>> {
        self.ledgers.get(key)
    }

    // ========================================================================
    // CACHE ADMINISTRATION
    // ========================================================================

    /// Build the index now, outside the request path
    pub fn warm(&self, key: &str) -> Result<LedgerStats> {
        let index = self.ledgers.get(key)?;
        if let Some(reason) = index.unavailable_reason() {
            return Err(ValuationError::DataUnavailable(reason.to_string()));
        }
        Ok(index.stats().clone())
    }

    /// Drop the index so the next access reloads it. In-flight requests
    /// keep the instance they pinned.
    pub fn invalidate(&self, key: &str) -> Result<bool> {
        if !self.ledgers.is_registered(key) {
            return Err(ValuationError::Config(format!("no ledger registered for key '{}'", key)));
        }
        Ok(self.ledgers.invalidate(key))
    }

    pub fn is_loaded(&self, key: &str) -> bool {
        self.ledgers.is_loaded(key)
    }

    pub fn sales_history(&self, key: &str, parcel_id: &str, include_non_arms_length: bool) -> Result<SalesHistory> {
        let index = self.ledgers.get(key)?;
        Ok(index.sales_history(parcel_id, include_non_arms_length, 3))
    }

    /// Sale count and median price over the trailing 6, 12 and 24 months
    pub fn market_trends(&self, request: &MarketTrendsRequest) -> Result<MarketTrends> {
        if !request.location.is_valid() {
            return Err(ValuationError::InsufficientInput("location is out of range".to_string()));
        }
        check_radius(request.radius_miles)?;

        let index = self.ledgers.get(&request.ledger_key)?;
        Ok(index.market_trends(
            request.location,
            request.radius_miles,
            request.as_of_date,
            &TREND_PERIODS_MONTHS,
        ))
    }

    // ========================================================================
    // VALUATION
    // ========================================================================

    /// Value one subject and project it forward.
    ///
    /// Rejects with `InsufficientInput` (no location, bad overrides or
    /// radius above MAX_RADIUS_MILES),
    /// `NoEstimatesAvailable` (no comparables and no external estimates) or
    /// `Config` (unknown ledger key). Everything else degrades into flags
    /// on the report.
    pub fn triangulate_property_value(&self, request: &ValuationRequest) -> Result<ValuationReport> {
        let subject = &request.subject;
        let center = subject.require_location()?;
        let criteria = self.criteria_for(&request.options)?;
        if let Some(AreaKey::Radius { center, miles }) = &request.options.forecast_area {
            if !center.is_valid() {
                return Err(ValuationError::InsufficientInput("forecast area center is out of range".to_string()));
            }
            check_radius(*miles)?;
        }

        let index = self.ledgers.get(&request.ledger_key)?;
        let ledger_note = index.unavailable_reason().map(str::to_string);
        if let Some(reason) = &ledger_note {
            warn!(ledger = %request.ledger_key, reason = %reason, "ledger unavailable, valuing from external estimates only");
        }

        // Select
        let selector = CandidateSelector {
            include_non_arms_length: request
                .options
                .include_non_arms_length
                .unwrap_or(self.config.selection.include_non_arms_length),
        };
        let mut candidates = selector.select(&index, subject, &criteria)?;

        // Enrich
        let mut enrichment_config = self.config.enrichment.clone();
        if let Some(allow) = request.options.allow_external_enrichment {
            enrichment_config.allow_external = allow;
        }
        if let Some(timeout_ms) = request.options.enrichment_timeout_ms {
            enrichment_config.timeout_ms = timeout_ms;
        }
        let enrichment = EnrichmentController::from_config(&enrichment_config)
            .with_in_flight(Arc::clone(&self.enrichment_in_flight))
            .enrich(
            &mut candidates,
            subject.size_sqft,
            &self.size_cache,
            self.enricher.as_ref(),
        );

        // Score
        let scorer = ComparableScorer::new(&criteria, &self.config.scoring);
        let comparables = scorer.score_all(candidates, subject);
        let comparable_estimate = scorer.comparable_estimate(&comparables, subject);
        let comparable_summary = ComparableSummary::from_scored(&comparables);

        // Triangulate
        let mut estimates: Vec<ValueEstimate> = comparable_estimate.iter().cloned().collect();
        estimates.extend(request.external_estimates.iter().cloned());
        let value = Triangulator::from_config(&self.config.triangulation).triangulate(&estimates)?;

        // Forecast
        let area = request.options.forecast_area.clone().unwrap_or_else(|| match &subject.subdivision {
            Some(name) if !name.trim().is_empty() => AreaKey::Subdivision { name: name.clone() },
            _ => AreaKey::Radius {
                center,
                miles: criteria.radius_miles,
            },
        });
        let forecast = ForecastProjector::from_config(&self.config.forecast).project(&index, &value, &area, subject.as_of_date);

        let report = ValuationReport {
            request_id: Uuid::new_v4().to_string(),
            generated_at: Utc::now(),
            ledger_key: request.ledger_key.clone(),
            ledger_available: index.is_available(),
            ledger_note,
            subject: subject.clone(),
            value,
            forecast,
            comparable_estimate,
            comparable_summary,
            comparables,
            enrichment,
        };

        info!(request_id = %report.request_id, summary = %report.summary(), "valuation complete");
        Ok(report)
    }

    fn criteria_for(&self, options: &ValuationOptions) -> Result<SelectionCriteria> {
        let mut criteria = SelectionCriteria::from(&self.config.selection);

        if let Some(radius) = options.radius_miles {
            check_radius(radius)?;
            criteria.radius_miles = radius;
        }
        if let Some(months) = options.max_age_months {
            if months == 0 {
                return Err(ValuationError::InsufficientInput("max_age_months must be at least 1".to_string()));
            }
            criteria.max_age_months = months;
        }
        if let Some(max) = options.max_candidates {
            if max == 0 {
                return Err(ValuationError::InsufficientInput("max_candidates must be at least 1".to_string()));
            }
            criteria.max_candidates = max;
        }
        if options.min_price.is_some() {
            criteria.min_price = options.min_price;
        }
        if options.max_price.is_some() {
            criteria.max_price = options.max_price;
        }
        if let (Some(min), Some(max)) = (criteria.min_price, criteria.max_price) {
            if min > max {
                return Err(ValuationError::InsufficientInput("min_price must not exceed max_price".to_string()));
            }
        }
        Ok(criteria)
    }
}

fn check_radius(miles: f64) -> Result<()> {
    if miles > 0.0 && miles <= MAX_RADIUS_MILES {
        Ok(())
    } else {
        Err(ValuationError::InsufficientInput(format!(
            "radius_miles must be in (0, {}]",
            MAX_RADIUS_MILES
        )))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{GeoPoint, SaleRecord};
    use crate::enrichment::EnrichmentRequest;
    use crate::scoring::QualityTier;
    use crate::triangulation::{Confidence, SourceKind};
    use chrono::{Duration, NaiveDate};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    fn center() -> GeoPoint {
        GeoPoint::new(39.0438, -77.4874)
    }

    fn create_test_sale(parcel: u32, lat_offset: f64, days_ago: i64, price: u64, size: Option<u32>) -> SaleRecord {
        SaleRecord {
            parcel_id: format!("{:012}", parcel),
            sale_date: as_of() - Duration::days(days_ago),
            price,
            verification_code: "1:MARKET SALE".to_string(),
            location: Some(GeoPoint::new(center().lat + lat_offset, center().lon)),
            size_sqft: size,
            lot_size: None,
            year_built: None,
            subdivision: None,
        }
    }

    /// Five arms-length sales within 0.4 mi, all within 3 months, sizes within 10%
    fn create_test_neighborhood() -> Vec<SaleRecord> {
        vec![
            create_test_sale(1, 0.0010, 20, 690_000, Some(1950)),
            create_test_sale(2, 0.0020, 35, 710_000, Some(2050)),
            create_test_sale(3, 0.0030, 50, 705_000, Some(2100)),
            create_test_sale(4, 0.0040, 70, 680_000, Some(1900)),
            create_test_sale(5, 0.0050, 85, 700_000, Some(2000)),
        ]
    }

    fn create_test_engine(records: Vec<SaleRecord>) -> ValuationEngine {
        let engine = ValuationEngine::new(ValuationConfig::default());
        engine.register_index("test", move || LedgerIndex::from_records(records.clone()));
        engine
    }

    fn subject() -> Subject {
        Subject::new(center(), as_of()).with_size(2000)
    }

    #[test]
    fn test_full_valuation_from_comparables() {
        let engine = create_test_engine(create_test_neighborhood());
        let report = engine
            .triangulate_property_value(&ValuationRequest::new(subject(), "test"))
            .unwrap();

        assert!(report.ledger_available);
        assert_eq!(report.comparables.len(), 5);
        assert!(report
            .comparables
            .iter()
            .all(|c| c.score.quality_tier == QualityTier::Excellent));

        let comps = report.comparable_estimate.as_ref().unwrap();
        assert_eq!(comps.confidence, Confidence::High);
        assert_eq!(report.value.blended_amount, comps.amount);
        assert_eq!(report.value.overall_confidence, Confidence::High);
        assert_eq!(report.forecast.points.len(), 3);
        assert!(Uuid::parse_str(&report.request_id).is_ok());
        assert_eq!(report.enrichment.external_calls, 0);
    }

    #[test]
    fn test_empty_radius_uses_external_estimates() {
        let engine = create_test_engine(vec![create_test_sale(1, 0.5, 20, 700_000, None)]);
        let request = ValuationRequest::new(subject(), "test")
            .with_estimate(ValueEstimate::new(SourceKind::ExternalAvm, 650_000.0, Confidence::Medium));

        let report = engine.triangulate_property_value(&request).unwrap();
        assert!(report.comparables.is_empty());
        assert!(report.comparable_estimate.is_none());
        assert_eq!(report.value.blended_amount, 650_000.0);
        assert!(report.forecast.low_confidence);
    }

    #[test]
    fn test_empty_radius_without_estimates_rejected() {
        let engine = create_test_engine(vec![]);
        let result = engine.triangulate_property_value(&ValuationRequest::new(subject(), "test"));
        assert!(matches!(result, Err(ValuationError::NoEstimatesAvailable)));
    }

    #[test]
    fn test_missing_location_rejected() {
        let engine = create_test_engine(create_test_neighborhood());
        let mut subject = subject();
        subject.location = None;
        let request = ValuationRequest::new(subject, "test")
            .with_estimate(ValueEstimate::new(SourceKind::ExternalAvm, 650_000.0, Confidence::High));

        let result = engine.triangulate_property_value(&request);
        assert!(matches!(result, Err(ValuationError::InsufficientInput(_))));
    }

    #[test]
    fn test_unknown_ledger_key_rejected() {
        let engine = create_test_engine(vec![]);
        let result = engine.triangulate_property_value(&ValuationRequest::new(subject(), "nope"));
        assert!(matches!(result, Err(ValuationError::Config(_))));
    }

    #[test]
    fn test_unavailable_ledger_degrades() {
        let engine = ValuationEngine::new(ValuationConfig::default());
        engine.register_ledger("broken", LedgerSource::Csv("/definitely/not/here.csv".into()));

        let request = ValuationRequest::new(subject(), "broken")
            .with_estimate(ValueEstimate::new(SourceKind::AssessmentDerived, 600_000.0, Confidence::Low));
        let report = engine.triangulate_property_value(&request).unwrap();

        assert!(!report.ledger_available);
        assert!(report.ledger_note.is_some());
        assert_eq!(report.value.overall_confidence, Confidence::Low);
        assert!(matches!(engine.warm("broken"), Err(ValuationError::DataUnavailable(_))));
    }

    #[test]
    fn test_invalid_overrides_rejected() {
        let engine = create_test_engine(create_test_neighborhood());
        let mut request = ValuationRequest::new(subject(), "test");
        request.options.radius_miles = Some(-2.0);
        assert!(matches!(
            engine.triangulate_property_value(&request),
            Err(ValuationError::InsufficientInput(_))
        ));
    }

    #[test]
    fn test_oversized_radius_rejected_before_querying() {
        let engine = create_test_engine(create_test_neighborhood());

        let mut request = ValuationRequest::new(subject(), "test");
        request.options.radius_miles = Some(10_000.0);
        assert!(matches!(
            engine.triangulate_property_value(&request),
            Err(ValuationError::InsufficientInput(_))
        ));
        assert!(!engine.is_loaded("test"));

        let mut request = ValuationRequest::new(subject(), "test");
        request.options.forecast_area = Some(AreaKey::Radius {
            center: center(),
            miles: 5_000.0,
        });
        assert!(matches!(
            engine.triangulate_property_value(&request),
            Err(ValuationError::InsufficientInput(_))
        ));

        let mut request = ValuationRequest::new(subject(), "test");
        request.options.radius_miles = Some(MAX_RADIUS_MILES);
        assert!(engine.triangulate_property_value(&request).is_ok());
    }

    #[test]
    fn test_price_band_override() {
        let engine = create_test_engine(create_test_neighborhood());

        let mut request = ValuationRequest::new(subject(), "test");
        request.options.min_price = Some(695_000);
        request.options.max_price = Some(705_000);
        let report = engine.triangulate_property_value(&request).unwrap();
        let mut prices: Vec<u64> = report.comparables.iter().map(|c| c.candidate.record.price).collect();
        prices.sort_unstable();
        assert_eq!(prices, vec![700_000, 705_000]);

        request.options.min_price = Some(800_000);
        assert!(matches!(
            engine.triangulate_property_value(&request),
            Err(ValuationError::InsufficientInput(_))
        ));
    }

    #[test]
    fn test_extreme_valuation_date_does_not_panic() {
        let engine = create_test_engine(create_test_neighborhood());
        for as_of in [NaiveDate::MIN, NaiveDate::MAX] {
            let request = ValuationRequest::new(Subject::new(center(), as_of), "test")
                .with_estimate(ValueEstimate::new(SourceKind::ExternalAvm, 650_000.0, Confidence::Medium));
            let report = engine.triangulate_property_value(&request).unwrap();
            assert!(report.comparables.is_empty());
            assert!(report.forecast.low_confidence);
        }
    }

    #[test]
    fn test_market_trends() {
        let mut records = create_test_neighborhood();
        records.push(create_test_sale(6, 0.0015, 300, 640_000, None));
        records.push(create_test_sale(7, 0.0025, 600, 600_000, None));
        let engine = create_test_engine(records);

        let request = MarketTrendsRequest {
            ledger_key: "test".to_string(),
            location: center(),
            radius_miles: 2.0,
            as_of_date: as_of(),
        };
        let trends = engine.market_trends(&request).unwrap();
        assert!(trends.available);
        assert_eq!(trends.period(6).unwrap().count, 5);
        assert_eq!(trends.period(6).unwrap().median_price, Some(700_000.0));
        assert_eq!(trends.period(12).unwrap().count, 6);
        assert_eq!(trends.period(24).unwrap().count, 7);

        let too_wide = MarketTrendsRequest {
            radius_miles: 500.0,
            ..request.clone()
        };
        assert!(matches!(engine.market_trends(&too_wide), Err(ValuationError::InsufficientInput(_))));

        let unknown = MarketTrendsRequest {
            ledger_key: "nope".to_string(),
            ..request
        };
        assert!(matches!(engine.market_trends(&unknown), Err(ValuationError::Config(_))));
    }

    struct CountingEnricher {
        calls: AtomicUsize,
    }

    impl SizeEnricher for CountingEnricher {
        fn lookup_sizes(&self, requests: &[EnrichmentRequest]) -> anyhow::Result<HashMap<String, u32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(requests.iter().map(|r| (r.parcel_id.clone(), 2000)).collect())
        }
    }

    #[test]
    fn test_enrichment_budget_across_requests() {
        let records: Vec<SaleRecord> = (1..=12)
            .map(|i| create_test_sale(i, 0.0005 * i as f64, 30, 700_000, None))
            .collect();
        let enricher = Arc::new(CountingEnricher {
            calls: AtomicUsize::new(0),
        });
        let engine = create_test_engine(records).with_enricher(enricher.clone());

        let mut request = ValuationRequest::new(subject(), "test");
        request.options.allow_external_enrichment = Some(true);

        let first = engine.triangulate_property_value(&request).unwrap();
        assert_eq!(first.enrichment.external_calls, 1);
        assert_eq!(first.enrichment.resolved_externally, 12);

        let second = engine.triangulate_property_value(&request).unwrap();
        assert_eq!(second.enrichment.external_calls, 0);
        assert_eq!(second.enrichment.resolved_locally, 12);
        assert_eq!(enricher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.size_cache().len(), 12);
    }

    #[test]
    fn test_warm_and_invalidate() {
        let builds = Arc::new(AtomicUsize::new(0));
        let engine = ValuationEngine::new(ValuationConfig::default());
        let counter = Arc::clone(&builds);
        engine.register_index("test", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            LedgerIndex::from_records(create_test_neighborhood())
        });

        assert!(!engine.is_loaded("test"));
        let stats = engine.warm("test").unwrap();
        assert_eq!(stats.total_records, 5);
        assert!(engine.is_loaded("test"));

        let pinned = engine.ledger("test").unwrap();
        assert!(engine.invalidate("test").unwrap());
        assert!(!engine.is_loaded("test"));

        let fresh = engine.ledger("test").unwrap();
        assert!(!Arc::ptr_eq(&pinned, &fresh));
        assert_eq!(builds.load(Ordering::SeqCst), 2);

        assert!(engine.invalidate("unknown").is_err());
    }

    #[test]
    fn test_request_json_shape() {
        let json = r#"{
            "subject": {
                "location": {"lat": 39.0438, "lon": -77.4874},
                "size_sqft": 2000,
                "as_of_date": "2025-06-01"
            },
            "external_estimates": [
                {"source_kind": "external_avm", "label": "zestimate", "amount": 712000, "confidence": "HIGH"}
            ],
            "options": {"radius_miles": 0.75}
        }"#;

        let request: ValuationRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.ledger_key, DEFAULT_LEDGER_KEY);
        assert_eq!(request.options.radius_miles, Some(0.75));
        assert_eq!(request.external_estimates[0].label, "zestimate");
        assert_eq!(request.subject.as_of_date, as_of());
    }
}
