use serde::{Deserialize, Serialize};

/// Which source produced a song recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecommendationType {
    GenreBased,
    ContentBased,
    Collaborative,
    Popular,
    Random,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SongRecommendation {
    pub song_id: String,
    #[serde(rename = "type")]
    pub recommendation_type: RecommendationType,
}

impl SongRecommendation {
    pub fn new(song_id: impl Into<String>, recommendation_type: RecommendationType) -> Self {
        Self {
            song_id: song_id.into(),
            recommendation_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecommendation {
    pub user_id: String,
    pub score: f64,
    #[serde(rename = "distance")]
    pub distance_km: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SongRecommendations {
    pub recommendations: Vec<SongRecommendation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserRecommendations {
    pub recommendations: Vec<UserRecommendation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_song_recommendation_wire_format() {
        let rec = SongRecommendation::new("s1", RecommendationType::GenreBased);
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["song_id"], "s1");
        assert_eq!(json["type"], "genre-based");
    }

    #[test]
    fn test_user_recommendation_wire_format() {
        let rec = UserRecommendation {
            user_id: "u9".to_string(),
            score: 71.5,
            distance_km: 3.2,
        };
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["distance"], 3.2);
        assert_eq!(json["score"], 71.5);
    }
}
