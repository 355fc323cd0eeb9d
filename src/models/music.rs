use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregated listening history for one (user, song) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ListeningRecord {
    pub song_id: String,
    pub play_count: i64,
    pub last_played: DateTime<Utc>,
}

/// Dimension along which preference weights accumulate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreferenceDimension {
    Genre,
    Artist,
    Language,
}

impl PreferenceDimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreferenceDimension::Genre => "genre",
            PreferenceDimension::Artist => "artist",
            PreferenceDimension::Language => "language",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedName {
    pub name: String,
    pub weight: f64,
}

impl WeightedName {
    pub fn new(name: impl Into<String>, weight: f64) -> Self {
        Self {
            name: name.into(),
            weight,
        }
    }
}

/// Accumulated preference weights of one user, grouped by dimension
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreferenceWeights {
    pub genres: Vec<WeightedName>,
    pub artists: Vec<WeightedName>,
    pub languages: Vec<WeightedName>,
}

impl PreferenceWeights {
    pub fn dimension_mut(&mut self, dimension: PreferenceDimension) -> &mut Vec<WeightedName> {
        match dimension {
            PreferenceDimension::Genre => &mut self.genres,
            PreferenceDimension::Artist => &mut self.artists,
            PreferenceDimension::Language => &mut self.languages,
        }
    }

    /// Names of the heaviest entries in a dimension, heaviest first
    pub fn top(&self, dimension: PreferenceDimension, n: usize) -> Vec<String> {
        let entries = match dimension {
            PreferenceDimension::Genre => &self.genres,
            PreferenceDimension::Artist => &self.artists,
            PreferenceDimension::Language => &self.languages,
        };
        let mut sorted: Vec<&WeightedName> = entries
            .iter()
            .filter(|w| w.weight > 0.0 && !w.name.trim().is_empty())
            .collect();
        sorted.sort_by(|a, b| {
            b.weight
                .partial_cmp(&a.weight)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.name.cmp(&b.name))
        });
        sorted.into_iter().take(n).map(|w| w.name.clone()).collect()
    }
}

/// Song metadata as known to the local catalog table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SongMetadata {
    pub song_id: String,
    pub title: Option<String>,
    /// Comma-separated artist credit, e.g. "Daft Punk, Pharrell Williams"
    pub artists: Option<String>,
    pub genre: Option<String>,
    pub release_year: Option<i32>,
    pub language: Option<String>,
}

impl SongMetadata {
    /// Individual artist names from the credit string, trimmed, case preserved
    pub fn artist_names(&self) -> Vec<&str> {
        self.artists
            .as_deref()
            .map(|credit| {
                credit
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Genre, if present and non-blank
    pub fn genre_name(&self) -> Option<&str> {
        self.genre
            .as_deref()
            .map(str::trim)
            .filter(|g| !g.is_empty())
    }

    /// Release decade, e.g. 1987 -> 1980
    pub fn decade(&self) -> Option<i32> {
        self.release_year
            .filter(|y| *y > 0)
            .map(|y| y.div_euclid(10) * 10)
    }
}
