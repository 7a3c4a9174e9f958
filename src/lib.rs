// Parcel Valuation - Core Library
// Comparable-sales valuation engine: ledger index, comparable selection and
// scoring, value triangulation, appreciation forecast.

pub mod error;
pub mod parser;
pub mod db;
pub mod ledger;
pub mod cache;
pub mod config;
pub mod selection;
pub mod enrichment;
pub mod scoring;
pub mod triangulation;
pub mod forecast;
pub mod engine;

// Re-export commonly used types
pub use error::{Result, ValuationError};
pub use parser::{
    detect_parcel_format, normalize_parcel_id, parse_sale_date, is_arms_length_code,
    ParcelIdFormat,
};
pub use db::{
    GeoPoint, SaleRecord, LedgerSource, LoadedLedger,
    read_source, load_csv, setup_database, insert_sales, load_sales, verify_count,
};
pub use ledger::{
    LedgerIndex, LedgerStats, LookupResult, RadiusFilter, RadiusHit, SalesHistory, HistoryEntry,
    MarketTrends, TrendPeriod,
};
pub use cache::{ResourceCache, SizeCache};
pub use config::ValuationConfig;
pub use selection::{Candidate, CandidateSelector, EnrichmentState, SelectionCriteria, Subject};
pub use enrichment::{EnrichmentController, EnrichmentReport, EnrichmentRequest, SizeEnricher};
pub use scoring::{ComparableScore, ComparableScorer, ComparableSummary, QualityTier, ScoredComparable};
pub use triangulation::{
    Confidence, SourceKind, ValueEstimate, TriangulatedValue, Triangulator, Disagreement,
};
pub use forecast::{AreaKey, AppreciationRate, Forecast, ForecastPoint, ForecastProjector};
pub use engine::{MarketTrendsRequest, ValuationEngine, ValuationOptions, ValuationReport, ValuationRequest};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
