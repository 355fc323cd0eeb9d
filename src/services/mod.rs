pub mod candidates;
pub mod catalog;
pub mod geo;
pub mod match_score;
pub mod recalculation;
pub mod recommendations;
pub mod signals;
pub mod similarity;

pub use candidates::CandidateFilter;
pub use catalog::{CatalogProvider, HttpCatalog, SongIngestor};
pub use match_score::MatchScoreService;
pub use recalculation::{
    RecalculationScheduler, RecalculationStatus, Recalculator, SchedulerHandle,
};
pub use recommendations::RecommendationComposer;
pub use similarity::SimilarityScorer;
