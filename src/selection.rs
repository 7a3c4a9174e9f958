// 🎯 Candidate Selector - pull nearby recent sales for a subject property

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

use crate::config::SelectionConfig;
use crate::db::{GeoPoint, SaleRecord};
use crate::error::{Result, ValuationError};
use crate::ledger::{LedgerIndex, RadiusFilter};
use crate::parser::normalize_parcel_id;

/// Average month length in days
pub const DAYS_PER_MONTH: f64 = 365.25 / 12.0;

/// Largest accepted search radius
pub const MAX_RADIUS_MILES: f64 = 100.0;

// ============================================================================
// SUBJECT
// ============================================================================

/// The property being valued (built per request, never persisted)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    /// Subject's own parcel, excluded from its comparables when known
    #[serde(default)]
    pub parcel_id: Option<String>,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub size_sqft: Option<u32>,
    #[serde(default)]
    pub lot_size: Option<f64>,
    #[serde(default)]
    pub year_built: Option<u16>,
    #[serde(default)]
    pub subdivision: Option<String>,
    pub as_of_date: NaiveDate,
}

impl Subject {
    pub fn new(location: GeoPoint, as_of_date: NaiveDate) -> Self {
        Subject {
            parcel_id: None,
            location: Some(location),
            size_sqft: None,
            lot_size: None,
            year_built: None,
            subdivision: None,
            as_of_date,
        }
    }

    /// Builder pattern: add known living area
    pub fn with_size(mut self, size_sqft: u32) -> Self {
        self.size_sqft = Some(size_sqft);
        self
    }

    /// Builder pattern: add subject parcel id
    pub fn with_parcel(mut self, parcel_id: &str) -> Self {
        self.parcel_id = Some(parcel_id.to_string());
        self
    }

    /// Builder pattern: add subdivision
    pub fn with_subdivision(mut self, subdivision: &str) -> Self {
        self.subdivision = Some(subdivision.to_string());
        self
    }

    /// Location, or the typed rejection when it is missing
    pub fn require_location(&self) -> Result<GeoPoint> {
        match self.location {
            Some(loc) if loc.is_valid() => Ok(loc),
            Some(_) => Err(ValuationError::InsufficientInput(
                "subject location is out of range".to_string(),
            )),
            None => Err(ValuationError::InsufficientInput(
                "subject location is required".to_string(),
            )),
        }
    }
}

// ============================================================================
// CANDIDATE
// ============================================================================

/// How a candidate's size was (or was not) resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrichmentState {
    /// Size from the ledger row or the in-process size cache
    Local,
    /// Size from the batched external lookup
    Enriched,
    /// Size unknown; scoring skips the size criterion
    Unresolved,
}

/// A sale considered as a comparable for one subject (per request)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub record: SaleRecord,
    pub distance_miles: f64,
    pub months_since_sale: f64,
    /// Resolved living area (ledger, cache or enrichment)
    pub size_sqft: Option<u32>,
    /// (candidate - subject) / subject * 100, when both sizes are known
    pub size_delta_pct: Option<f64>,
    pub enrichment_state: EnrichmentState,
}

impl Candidate {
    pub fn new(record: SaleRecord, distance_miles: f64, months_since_sale: f64) -> Self {
        let size_sqft = record.size_sqft;
        let enrichment_state = if size_sqft.is_some() {
            EnrichmentState::Local
        } else {
            EnrichmentState::Unresolved
        };

        Candidate {
            record,
            distance_miles,
            months_since_sale,
            size_sqft,
            size_delta_pct: None,
            enrichment_state,
        }
    }

    pub fn parcel_id(&self) -> &str {
        &self.record.parcel_id
    }

    /// Record a resolved size and its provenance
    pub fn resolve_size(&mut self, size_sqft: u32, state: EnrichmentState) {
        self.size_sqft = Some(size_sqft);
        self.enrichment_state = state;
    }

    /// Recompute size_delta_pct against the subject's size
    pub fn refresh_size_delta(&mut self, subject_sqft: Option<u32>) {
        self.size_delta_pct = size_delta_pct(subject_sqft, self.size_sqft);
    }
}

pub fn size_delta_pct(subject_sqft: Option<u32>, candidate_sqft: Option<u32>) -> Option<f64> {
    match (subject_sqft, candidate_sqft) {
        (Some(subject), Some(candidate)) if subject > 0 && candidate > 0 => {
            Some((candidate as f64 - subject as f64) / subject as f64 * 100.0)
        }
        _ => None,
    }
}

/// Fractional months between a sale and the valuation date
pub fn months_between(sale_date: NaiveDate, as_of: NaiveDate) -> f64 {
    (as_of - sale_date).num_days() as f64 / DAYS_PER_MONTH
}

// ============================================================================
// SELECTION
// ============================================================================

/// Search window for one request
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SelectionCriteria {
    pub radius_miles: f64,
    pub max_age_months: u32,
    pub max_candidates: usize,
    /// Inclusive sale price band; None leaves that side open
    pub min_price: Option<u64>,
    pub max_price: Option<u64>,
}

impl SelectionCriteria {
    pub fn price_in_band(&self, price: u64) -> bool {
        self.min_price.map_or(true, |min| price >= min) && self.max_price.map_or(true, |max| price <= max)
    }
}

impl From<&SelectionConfig> for SelectionCriteria {
    fn from(config: &SelectionConfig) -> Self {
        SelectionCriteria {
            radius_miles: config.radius_miles,
            max_age_months: config.max_age_months,
            max_candidates: config.max_candidates,
            min_price: config.min_price,
            max_price: config.max_price,
        }
    }
}

pub struct CandidateSelector {
    pub include_non_arms_length: bool,
}

impl CandidateSelector {
    pub fn new() -> Self {
        CandidateSelector {
            include_non_arms_length: false,
        }
    }

    pub fn from_config(config: &SelectionConfig) -> Self {
        CandidateSelector {
            include_non_arms_length: config.include_non_arms_length,
        }
    }

    /// Nearest recent sales around the subject.
    ///
    /// Sales after the valuation date, older than `max_age_months`, outside
    /// the price band, or on the subject's own parcel are dropped. Ordered by distance, then recency,
    /// then parcel id; truncated to `max_candidates`.
    pub fn select(
        &self,
        index: &LedgerIndex,
        subject: &Subject,
        criteria: &SelectionCriteria,
    ) -> Result<Vec<Candidate>> {
        let center = subject.require_location()?;
        let subject_parcel = subject.parcel_id.as_deref().and_then(normalize_parcel_id);

        // Loose date prefilter; the exact month check happens below
        let window_days = (criteria.max_age_months as f64 * DAYS_PER_MONTH).ceil() as i64 + 1;
        let filter = RadiusFilter {
            after_date: subject.as_of_date.checked_sub_signed(Duration::days(window_days)),
            include_non_arms_length: self.include_non_arms_length,
        };

        let hits = index.query_radius(center, criteria.radius_miles, &filter);
        let in_radius = hits.len();

        let mut candidates: Vec<Candidate> = hits
            .into_iter()
            .filter(|hit| subject_parcel.as_deref() != Some(hit.record.parcel_id.as_str()))
            .filter(|hit| criteria.price_in_band(hit.record.price))
            .filter_map(|hit| {
                let months = months_between(hit.record.sale_date, subject.as_of_date);
                if months < 0.0 || months > criteria.max_age_months as f64 {
                    return None;
                }
                let mut candidate = Candidate::new(hit.record.clone(), hit.distance_miles, months);
                candidate.refresh_size_delta(subject.size_sqft);
                Some(candidate)
            })
            .collect();

        candidates.sort_by(compare_candidates);
        candidates.truncate(criteria.max_candidates);

        debug!(in_radius, selected = candidates.len(), "candidates selected");

        Ok(candidates)
    }
}

impl Default for CandidateSelector {
    fn default() -> Self {
        Self::new()
    }
}

fn compare_candidates(a: &Candidate, b: &Candidate) -> Ordering {
    a.distance_miles
        .total_cmp(&b.distance_miles)
        .then_with(|| a.months_since_sale.total_cmp(&b.months_since_sale))
        .then_with(|| a.record.parcel_id.cmp(&b.record.parcel_id))
        .then_with(|| a.record.price.cmp(&b.record.price))
}

// ============================================================================
// TESTS
// ============================================================================
