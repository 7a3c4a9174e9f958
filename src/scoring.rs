// 🏅 Comparable Scorer - tier, weight and blend comparable sales
//
// Tier rubric (first match wins):
//   REJECTED   outside radius or older than max age
//   EXCELLENT  < 0.5 mi, size known and within 20%, ≤ 6 months
//   GOOD       < 1.0 mi, size unknown or within 20%, ≤ 12 months
//   FAIR       everything else
//
// weight = tier_base / (1 + distance) / (1 + months / 12)

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::ScoringConfig;
use crate::selection::{Candidate, SelectionCriteria, Subject};
use crate::triangulation::{Confidence, SourceKind, ValueEstimate};

pub const EXCELLENT_MAX_DISTANCE: f64 = 0.5;
pub const GOOD_MAX_DISTANCE: f64 = 1.0;
pub const SIZE_TOLERANCE_PCT: f64 = 20.0;
pub const EXCELLENT_MAX_MONTHS: f64 = 6.0;
pub const GOOD_MAX_MONTHS: f64 = 12.0;

/// EXCELLENT/GOOD contributors needed for a HIGH comparable estimate
pub const HIGH_CONFIDENCE_MIN_STRONG: usize = 3;

// ============================================================================
// SCORE TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityTier {
    Excellent,
    Good,
    Fair,
    Rejected,
}

impl QualityTier {
    pub fn is_strong(&self) -> bool {
        matches!(self, QualityTier::Excellent | QualityTier::Good)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparableScore {
    pub quality_tier: QualityTier,
    /// 0 for REJECTED
    pub weight: f64,
    /// Criteria that drove the tier
    pub rationale: Vec<String>,
}

/// A candidate with its score, kept for display even when rejected
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredComparable {
    pub candidate: Candidate,
    pub score: ComparableScore,
}

impl ScoredComparable {
    pub fn is_retained(&self) -> bool {
        self.score.weight > 0.0
    }
}

// ============================================================================
// SCORER
// ============================================================================

pub struct ComparableScorer {
    pub radius_miles: f64,
    pub max_age_months: f64,
    pub excellent_base: f64,
    pub good_base: f64,
    pub fair_base: f64,
    pub time_adjustment_rate: Option<f64>,
}

impl ComparableScorer {
    pub fn new(criteria: &SelectionCriteria, config: &ScoringConfig) -> Self {
        ComparableScorer {
            radius_miles: criteria.radius_miles,
            max_age_months: criteria.max_age_months as f64,
            excellent_base: config.excellent_base,
            good_base: config.good_base,
            fair_base: config.fair_base,
            time_adjustment_rate: config.time_adjustment_rate,
        }
    }

    fn tier_base(&self, tier: QualityTier) -> f64 {
        match tier {
            QualityTier::Excellent => self.excellent_base,
            QualityTier::Good => self.good_base,
            QualityTier::Fair => self.fair_base,
            QualityTier::Rejected => 0.0,
        }
    }

    /// Pure function of the candidate's derived fields
    pub fn score(&self, candidate: &Candidate) -> ComparableScore {
        let distance = candidate.distance_miles;
        let months = candidate.months_since_sale;

        if !distance.is_finite() || distance > self.radius_miles {
            return rejected(format!("{:.2} mi is outside the {:.2} mi radius", distance, self.radius_miles));
        }
        if !months.is_finite() || months < 0.0 {
            return rejected("sold after the valuation date".to_string());
        }
        if months > self.max_age_months {
            return rejected(format!("sold {:.1} months ago, limit {:.0}", months, self.max_age_months));
        }

        let size_within = candidate.size_delta_pct.map(|pct| pct.abs() <= SIZE_TOLERANCE_PCT);

        let tier = if distance < EXCELLENT_MAX_DISTANCE && size_within == Some(true) && months <= EXCELLENT_MAX_MONTHS {
            QualityTier::Excellent
        } else if distance < GOOD_MAX_DISTANCE && size_within != Some(false) && months <= GOOD_MAX_MONTHS {
            QualityTier::Good
        } else {
            QualityTier::Fair
        };

        let mut rationale = vec![format!("{:.2} mi away", distance)];
        match candidate.size_delta_pct {
            Some(pct) if pct.abs() <= SIZE_TOLERANCE_PCT => {
                rationale.push(format!("size {:+.1}% (within {:.0}%)", pct, SIZE_TOLERANCE_PCT))
            }
            Some(pct) => rationale.push(format!("size {:+.1}% (outside {:.0}%)", pct, SIZE_TOLERANCE_PCT)),
            None => rationale.push("size unknown, not scored".to_string()),
        }
        rationale.push(format!("sold {:.1} months ago", months));

        let weight = self.tier_base(tier) / (1.0 + distance) / (1.0 + months / 12.0);

        ComparableScore {
            quality_tier: tier,
            weight,
            rationale,
        }
    }

    /// Score every candidate, noting subdivision matches
    pub fn score_all(&self, candidates: Vec<Candidate>, subject: &Subject) -> Vec<ScoredComparable> {
        candidates
            .into_iter()
            .map(|candidate| {
                let mut score = self.score(&candidate);
                if let (Some(ours), Some(theirs)) = (&subject.subdivision, &candidate.record.subdivision) {
                    if ours.trim().eq_ignore_ascii_case(theirs.trim()) {
                        score.rationale.push(format!("same subdivision ({})", theirs.trim()));
                    }
                }
                ScoredComparable { candidate, score }
            })
            .collect()
    }

    /// Sale price normalized to the subject: compounded to the valuation
    /// date when a time adjustment rate is set, then scaled by size ratio
    /// when both sizes are known.
    pub fn adjusted_price(&self, candidate: &Candidate, subject: &Subject) -> f64 {
        let mut price = candidate.record.price as f64;

        if let Some(rate) = self.time_adjustment_rate {
            let days = (subject.as_of_date - candidate.record.sale_date).num_days().max(0) as f64;
            price *= (1.0 + rate).powf(days / 365.25);
        }

        if let (Some(subject_sqft), Some(candidate_sqft)) = (subject.size_sqft, candidate.size_sqft) {
            if subject_sqft > 0 && candidate_sqft > 0 {
                price *= subject_sqft as f64 / candidate_sqft as f64;
            }
        }
        price
    }

    /// Comparable-derived estimate: weighted median of retained adjusted
    /// prices. None when nothing was retained.
    pub fn comparable_estimate(&self, scored: &[ScoredComparable], subject: &Subject) -> Option<ValueEstimate> {
        let mut weighted: Vec<(f64, f64)> = scored
            .iter()
            .filter(|s| s.is_retained())
            .map(|s| (self.adjusted_price(&s.candidate, subject), s.score.weight))
            .collect();

        let amount = weighted_median(&mut weighted)?;

        let strong = scored
            .iter()
            .filter(|s| s.is_retained() && s.score.quality_tier.is_strong())
            .count();
        let confidence = if strong >= HIGH_CONFIDENCE_MIN_STRONG {
            Confidence::High
        } else if strong >= 1 {
            Confidence::Medium
        } else {
            Confidence::Low
        };

        let label = format!("comparable sales ({} comps)", weighted.len());
        Some(ValueEstimate::new(SourceKind::ComparableDerived, amount, confidence).with_label(&label))
    }
}

fn rejected(reason: String) -> ComparableScore {
    ComparableScore {
        quality_tier: QualityTier::Rejected,
        weight: 0.0,
        rationale: vec![reason],
    }
}

/// Smallest value whose cumulative weight reaches half the total
pub fn weighted_median(values: &mut [(f64, f64)]) -> Option<f64> {
    values.sort_by(|a, b| a.0.total_cmp(&b.0));

    let total: f64 = values.iter().filter(|(_, w)| *w > 0.0).map(|(_, w)| w).sum();
    if !(total > 0.0) {
        return None;
    }

    let half = total / 2.0;
    let mut cumulative = 0.0;
    for (value, weight) in values.iter().filter(|(_, w)| *w > 0.0) {
        cumulative += weight;
        if cumulative >= half {
            return Some(*value);
        }
    }
    values.iter().rev().find(|(_, w)| *w > 0.0).map(|(v, _)| *v)
}

// ============================================================================
// SUMMARY
// ============================================================================

/// Descriptive statistics over the retained comparables
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComparableSummary {
    pub count: usize,
    pub excellent: usize,
    pub good: usize,
    pub fair: usize,
    pub rejected: usize,
    pub median_price: Option<f64>,
    pub mean_price: Option<f64>,
    pub min_price: Option<u64>,
    pub max_price: Option<u64>,
    pub oldest_sale: Option<NaiveDate>,
    pub newest_sale: Option<NaiveDate>,
}

impl ComparableSummary {
    pub fn from_scored(scored: &[ScoredComparable]) -> Self {
        let mut summary = ComparableSummary::default();

        for s in scored {
            match s.score.quality_tier {
                QualityTier::Excellent => summary.excellent += 1,
                QualityTier::Good => summary.good += 1,
                QualityTier::Fair => summary.fair += 1,
                QualityTier::Rejected => summary.rejected += 1,
            }
        }

        let retained: Vec<&ScoredComparable> = scored.iter().filter(|s| s.is_retained()).collect();
        summary.count = retained.len();
        if retained.is_empty() {
            return summary;
        }

        let mut prices: Vec<u64> = retained.iter().map(|s| s.candidate.record.price).collect();
        prices.sort_unstable();
        let mid = prices.len() / 2;
        summary.median_price = Some(if prices.len() % 2 == 0 {
            (prices[mid - 1] as f64 + prices[mid] as f64) / 2.0
        } else {
            prices[mid] as f64
        });
        summary.mean_price = Some(prices.iter().map(|p| *p as f64).sum::<f64>() / prices.len() as f64);
        summary.min_price = prices.first().copied();
        summary.max_price = prices.last().copied();
        summary.oldest_sale = retained.iter().map(|s| s.candidate.record.sale_date).min();
        summary.newest_sale = retained.iter().map(|s| s.candidate.record.sale_date).max();

        summary
    }
}

// ============================================================================
// TESTS
// ============================================================================
