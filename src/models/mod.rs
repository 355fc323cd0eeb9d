pub mod matching;
pub mod music;
pub mod recommendation;
pub mod user;

pub use matching::{MatchRecord, MatchScore, MatchStatus, UserPair};
pub use music::{
    ListeningRecord, PreferenceDimension, PreferenceWeights, SongMetadata, WeightedName,
};
pub use recommendation::{
    RecommendationType, SongRecommendation, SongRecommendations, UserRecommendation,
    UserRecommendations,
};
pub use user::{Candidate, CandidateFilters, CandidateProfile, DatingPreference, Location};
