// ⚖️ Value Triangulator - blend independent value signals into one number
//
// contribution = prior(source_kind) * multiplier(confidence)
// blended      = Σ contribution·amount / Σ contribution
//
// Large disagreements are recorded and cap the confidence at MEDIUM; they
// are never averaged away silently.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::warn;

use crate::config::TriangulationConfig;
use crate::error::{Result, ValuationError};

// ============================================================================
// SIGNALS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    ComparableDerived,
    ExternalAvm,
    AssessmentDerived,
}

impl SourceKind {
    pub fn name(&self) -> &'static str {
        match self {
            SourceKind::ComparableDerived => "comparable sales",
            SourceKind::ExternalAvm => "automated valuation model",
            SourceKind::AssessmentDerived => "tax assessment",
        }
    }
}

/// Discrete confidence tier, ordered LOW < MEDIUM < HIGH
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Confidence::Low => "LOW",
            Confidence::Medium => "MEDIUM",
            Confidence::High => "HIGH",
        };
        write!(f, "{}", label)
    }
}

/// One value signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueEstimate {
    pub source_kind: SourceKind,
    /// Provider name for the audit trail ("zestimate", "county 2025")
    #[serde(default)]
    pub label: String,
    pub amount: f64,
    pub confidence: Confidence,
}

impl ValueEstimate {
    pub fn new(source_kind: SourceKind, amount: f64, confidence: Confidence) -> Self {
        ValueEstimate {
            source_kind,
            label: source_kind.name().to_string(),
            amount,
            confidence,
        }
    }

    /// Builder pattern: name the provider
    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    /// Label for the audit trail, falling back to the source kind
    pub fn display_label(&self) -> String {
        if self.label.trim().is_empty() {
            self.source_kind.name().to_string()
        } else {
            self.label.clone()
        }
    }

    fn is_usable(&self) -> bool {
        self.amount.is_finite() && self.amount > 0.0
    }
}

// ============================================================================
// RESULT
// ============================================================================

/// How much one estimate moved the blend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceContribution {
    pub source_kind: SourceKind,
    pub label: String,
    pub amount: f64,
    pub confidence: Confidence,
    pub weight: f64,
    /// weight / Σ weights
    pub share: f64,
    /// Labels of the estimates this one disagrees with
    pub disagrees_with: Vec<String>,
}

/// Two estimates further apart than the tolerance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disagreement {
    pub first: String,
    pub second: String,
    /// |a - b| / min(a, b)
    pub relative_gap: f64,
}

/// Terminal artifact of one valuation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriangulatedValue {
    pub blended_amount: f64,
    pub overall_confidence: Confidence,
    pub contributing_sources: Vec<SourceContribution>,
    pub disagreements: Vec<Disagreement>,
    pub methodology: String,
}

impl TriangulatedValue {
    pub fn has_disagreement(&self) -> bool {
        !self.disagreements.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "${:.0} ({} confidence, {} source{})",
            self.blended_amount,
            self.overall_confidence,
            self.contributing_sources.len(),
            if self.contributing_sources.len() == 1 { "" } else { "s" }
        )
    }
}

// ============================================================================
// TRIANGULATOR
// ============================================================================

pub struct Triangulator {
    pub comparable_prior: f64,
    pub avm_prior: f64,
    pub assessment_prior: f64,
    pub high_multiplier: f64,
    pub medium_multiplier: f64,
    pub low_multiplier: f64,
    pub disagreement_tolerance: f64,
}

impl Triangulator {
    pub fn new() -> Self {
        Self::from_config(&TriangulationConfig::default())
    }

    pub fn from_config(config: &TriangulationConfig) -> Self {
        Triangulator {
            comparable_prior: config.comparable_prior,
            avm_prior: config.avm_prior,
            assessment_prior: config.assessment_prior,
            high_multiplier: config.high_multiplier,
            medium_multiplier: config.medium_multiplier,
            low_multiplier: config.low_multiplier,
            disagreement_tolerance: config.disagreement_tolerance,
        }
    }

    pub fn prior_weight(&self, kind: SourceKind) -> f64 {
        match kind {
            SourceKind::ComparableDerived => self.comparable_prior,
            SourceKind::ExternalAvm => self.avm_prior,
            SourceKind::AssessmentDerived => self.assessment_prior,
        }
    }

    pub fn confidence_multiplier(&self, confidence: Confidence) -> f64 {
        match confidence {
            Confidence::High => self.high_multiplier,
            Confidence::Medium => self.medium_multiplier,
            Confidence::Low => self.low_multiplier,
        }
    }

    /// Blend estimates. Non-positive amounts are ignored; zero usable
    /// estimates is a rejection.
    pub fn triangulate(&self, estimates: &[ValueEstimate]) -> Result<TriangulatedValue> {
        let usable: Vec<&ValueEstimate> = estimates.iter().filter(|e| e.is_usable()).collect();
        if usable.len() < estimates.len() {
            warn!(ignored = estimates.len() - usable.len(), "ignoring estimates with non-positive amounts");
        }
        if usable.is_empty() {
            return Err(ValuationError::NoEstimatesAvailable);
        }

        let weights: Vec<f64> = usable
            .iter()
            .map(|e| self.prior_weight(e.source_kind) * self.confidence_multiplier(e.confidence))
            .collect();
        let total_weight: f64 = weights.iter().sum();

        let blended_amount = if usable.len() == 1 {
            usable[0].amount
        } else {
            usable.iter().zip(&weights).map(|(e, w)| e.amount * w).sum::<f64>() / total_weight
        };

        let labels: Vec<String> = usable.iter().map(|e| e.display_label()).collect();
        let gaps = self.find_disagreements(&usable);
        let overall_confidence = self.overall_confidence(&usable, !gaps.is_empty());

        if !gaps.is_empty() {
            warn!(
                count = gaps.len(),
                tolerance = self.disagreement_tolerance,
                "value sources disagree beyond tolerance"
            );
        }

        let contributing_sources: Vec<SourceContribution> = usable
            .iter()
            .zip(&weights)
            .enumerate()
            .map(|(idx, (e, w))| SourceContribution {
                source_kind: e.source_kind,
                label: labels[idx].clone(),
                amount: e.amount,
                confidence: e.confidence,
                weight: *w,
                share: w / total_weight,
                disagrees_with: gaps
                    .iter()
                    .filter_map(|&(i, j, _)| {
                        if idx == i {
                            Some(labels[j].clone())
                        } else if idx == j {
                            Some(labels[i].clone())
                        } else {
                            None
                        }
                    })
                    .collect(),
            })
            .collect();

        let disagreements: Vec<Disagreement> = gaps
            .iter()
            .map(|&(i, j, relative_gap)| Disagreement {
                first: labels[i].clone(),
                second: labels[j].clone(),
                relative_gap,
            })
            .collect();

        let methodology = self.describe(&contributing_sources, &disagreements);

        Ok(TriangulatedValue {
            blended_amount,
            overall_confidence,
            contributing_sources,
            disagreements,
            methodology,
        })
    }

    /// (i, j, |a - b| / min(a, b)) for every pair above tolerance
    fn find_disagreements(&self, estimates: &[&ValueEstimate]) -> Vec<(usize, usize, f64)> {
        let mut found = Vec::new();
        for (i, a) in estimates.iter().enumerate() {
            for (j, b) in estimates.iter().enumerate().skip(i + 1) {
                let gap = (a.amount - b.amount).abs() / a.amount.min(b.amount);
                if gap > self.disagreement_tolerance {
                    found.push((i, j, gap));
                }
            }
        }
        found
    }

    fn overall_confidence(&self, estimates: &[&ValueEstimate], disagreement: bool) -> Confidence {
        let best = estimates.iter().map(|e| e.confidence).max().unwrap_or(Confidence::Low);

        let confident_kinds: BTreeSet<SourceKind> = estimates
            .iter()
            .filter(|e| e.confidence >= Confidence::Medium)
            .map(|e| e.source_kind)
            .collect();

        let tier = if estimates.len() == 1 {
            // A lone estimate keeps its own confidence
            best
        } else if confident_kinds.len() >= 2 {
            Confidence::High
        } else if best >= Confidence::Medium {
            Confidence::Medium
        } else {
            Confidence::Low
        };

        if disagreement {
            tier.min(Confidence::Medium)
        } else {
            tier
        }
    }

    fn describe(&self, sources: &[SourceContribution], disagreements: &[Disagreement]) -> String {
        let mut text = if sources.len() == 1 {
            format!("Single source: {} ({})", sources[0].label, sources[0].source_kind.name())
        } else {
            let parts: Vec<String> = sources
                .iter()
                .map(|s| format!("{} {:.0}%", s.label, s.share * 100.0))
                .collect();
            format!(
                "Triangulated from {} estimates, weighted by source prior and confidence: {}",
                sources.len(),
                parts.join(", ")
            )
        };

        if !disagreements.is_empty() {
            text.push_str(&format!(
                "; {} pair(s) disagree by more than {:.0}%, confidence capped at MEDIUM",
                disagreements.len(),
                self.disagreement_tolerance * 100.0
            ));
        }
        text
    }
}

impl Default for Triangulator {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
