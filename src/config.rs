// ⚙️ Valuation Configuration - policy constants as data
// Every field has a default, so an empty JSON object is a valid config.

use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::db::LedgerSource;
use crate::error::ValuationError;
use crate::selection::MAX_RADIUS_MILES;

// ============================================================================
// SECTIONS
// ============================================================================

/// Candidate selection window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub radius_miles: f64,
    pub max_age_months: u32,
    pub max_candidates: usize,
    /// Let foreclosures and related-party sales into the candidate pool
    pub include_non_arms_length: bool,
    /// Inclusive sale price band for candidates
    pub min_price: Option<u64>,
    pub max_price: Option<u64>,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        SelectionConfig {
            radius_miles: 1.0,
            max_age_months: 12,
            max_candidates: 20,
            include_non_arms_length: false,
            min_price: None,
            max_price: None,
        }
    }
}

/// Comparable scoring weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub excellent_base: f64,
    pub good_base: f64,
    pub fair_base: f64,
    /// Compound comparable prices forward to the valuation date at this
    /// annual rate before taking the weighted median. None = no adjustment.
    pub time_adjustment_rate: Option<f64>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        ScoringConfig {
            excellent_base: 3.0,
            good_base: 2.0,
            fair_base: 1.0,
            time_adjustment_rate: None,
        }
    }
}

/// External size enrichment budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// Attempt the single batched external call at all
    pub allow_external: bool,
    pub timeout_ms: u64,
    /// Lookups allowed to run at once, late ones included
    pub max_in_flight: usize,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        EnrichmentConfig {
            allow_external: false,
            timeout_ms: 2000,
            max_in_flight: 4,
        }
    }
}

/// Source priors and agreement policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriangulationConfig {
    pub comparable_prior: f64,
    pub avm_prior: f64,
    pub assessment_prior: f64,
    pub high_multiplier: f64,
    pub medium_multiplier: f64,
    pub low_multiplier: f64,
    /// Max relative gap between two sources before they "disagree"
    pub disagreement_tolerance: f64,
}

impl Default for TriangulationConfig {
    fn default() -> Self {
        TriangulationConfig {
            comparable_prior: 1.0,
            avm_prior: 1.0,
            assessment_prior: 0.5,
            high_multiplier: 1.0,
            medium_multiplier: 0.6,
            low_multiplier: 0.3,
            disagreement_tolerance: 0.15,
        }
    }
}

/// Appreciation trend estimation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    pub lookback_months: u32,
    /// Minimum observations for a derived rate to be trusted
    pub min_sample: usize,
    pub default_rate: f64,
    /// Repeat sales closer together than this are not paired
    pub min_pair_days: i64,
    /// Low/high band around the rate used for each horizon
    pub band_spread: f64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        ForecastConfig {
            lookback_months: 36,
            min_sample: 5,
            default_rate: 0.04,
            min_pair_days: 180,
            band_spread: 0.02,
        }
    }
}

// ============================================================================
// ROOT CONFIG
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValuationConfig {
    /// Cache key → ledger source
    pub ledgers: BTreeMap<String, LedgerSource>,
    pub selection: SelectionConfig,
    pub scoring: ScoringConfig,
    pub enrichment: EnrichmentConfig,
    pub triangulation: TriangulationConfig,
    pub forecast: ForecastConfig,
}

impl ValuationConfig {
    /// Load config from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config = Self::from_json(&content)?;
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: ValuationConfig =
            serde_json::from_str(content).context("Failed to parse config JSON")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), ValuationError> {
        let fail = |msg: &str| Err(ValuationError::Config(msg.to_string()));

        if !(self.selection.radius_miles > 0.0 && self.selection.radius_miles <= MAX_RADIUS_MILES) {
            return fail(&format!("selection.radius_miles must be in (0, {}]", MAX_RADIUS_MILES));
        }
        if let (Some(min), Some(max)) = (self.selection.min_price, self.selection.max_price) {
            if min > max {
                return fail("selection.min_price must not exceed selection.max_price");
            }
        }
        if self.selection.max_age_months == 0 {
            return fail("selection.max_age_months must be at least 1");
        }
        if self.selection.max_candidates == 0 {
            return fail("selection.max_candidates must be at least 1");
        }

        let s = &self.scoring;
        if !(s.excellent_base > s.good_base && s.good_base > s.fair_base && s.fair_base > 0.0) {
            return fail("scoring tier bases must satisfy excellent > good > fair > 0");
        }
        if s.time_adjustment_rate.is_some_and(|r| !(r > -1.0)) {
            return fail("scoring.time_adjustment_rate must be greater than -1");
        }

        if self.enrichment.timeout_ms == 0 {
            return fail("enrichment.timeout_ms must be positive");
        }
        if self.enrichment.max_in_flight == 0 {
            return fail("enrichment.max_in_flight must be at least 1");
        }

        let t = &self.triangulation;
        let weights = [
            t.comparable_prior,
            t.avm_prior,
            t.assessment_prior,
            t.high_multiplier,
            t.medium_multiplier,
            t.low_multiplier,
        ];
        if weights.iter().any(|w| !(*w > 0.0)) {
            return fail("triangulation priors and multipliers must be positive");
        }
        if !(t.disagreement_tolerance > 0.0) {
            return fail("triangulation.disagreement_tolerance must be positive");
        }

        let f = &self.forecast;
        if f.lookback_months < 12 {
            return fail("forecast.lookback_months must cover at least 12 months");
        }
        if f.min_sample == 0 {
            return fail("forecast.min_sample must be at least 1");
        }
        if !(f.default_rate > -1.0) {
            return fail("forecast.default_rate must be greater than -1");
        }
        if !(f.band_spread >= 0.0) {
            return fail("forecast.band_spread must not be negative");
        }

        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
