//! The five similarity components and how they combine into one score.
//!
//! Every component maps two users' signals to a similarity in [0, 1], or to
//! `None` when neither user has any data for it. Unevaluated components are
//! left out of the normalising weight sum, so sparse profiles are not
//! penalised for data nobody has. A component where only one side has data
//! is evaluated and scores 0.

use chrono::Timelike;
use std::collections::{BTreeMap, BTreeSet};

use crate::models::{ListeningRecord, SongMetadata, WeightedName};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    SharedSongs,
    SharedArtists,
    GenreAffinity,
    ListeningTime,
    ReleaseEra,
}

impl Component {
    pub const ALL: [Component; 5] = [
        Component::SharedSongs,
        Component::SharedArtists,
        Component::GenreAffinity,
        Component::ListeningTime,
        Component::ReleaseEra,
    ];

    pub fn weight(&self) -> f64 {
        match self {
            Component::SharedSongs => 35.0,
            Component::SharedArtists => 25.0,
            Component::GenreAffinity => 20.0,
            Component::ListeningTime => 10.0,
            Component::ReleaseEra => 10.0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Component::SharedSongs => "shared_songs",
            Component::SharedArtists => "shared_artists",
            Component::GenreAffinity => "genre_affinity",
            Component::ListeningTime => "listening_time",
            Component::ReleaseEra => "release_era",
        }
    }
}

/// Everything about one user that the similarity model reads
#[derive(Debug, Clone, Default)]
pub struct UserSignals {
    pub history: Vec<ListeningRecord>,
    /// Metadata of the songs in `history`, by song id
    pub songs: BTreeMap<String, SongMetadata>,
    pub genre_weights: Vec<WeightedName>,
}

impl UserSignals {
    fn song_ids(&self) -> BTreeSet<&str> {
        self.history
            .iter()
            .map(|r| r.song_id.trim())
            .filter(|id| !id.is_empty())
            .collect()
    }

    fn total_plays(&self) -> f64 {
        self.history.iter().map(|r| r.play_count.max(0) as f64).sum()
    }

    /// Play counts attributed to every credited artist
    fn artist_plays(&self) -> BTreeMap<&str, f64> {
        let mut plays = BTreeMap::new();
        for record in &self.history {
            if let Some(song) = self.songs.get(&record.song_id) {
                for artist in song.artist_names() {
                    *plays.entry(artist).or_insert(0.0) += record.play_count.max(0) as f64;
                }
            }
        }
        plays
    }

    fn genre_vector(&self) -> BTreeMap<&str, f64> {
        let mut vector = BTreeMap::new();
        for entry in &self.genre_weights {
            let name = entry.name.trim();
            if !name.is_empty() && entry.weight > 0.0 {
                *vector.entry(name).or_insert(0.0) += entry.weight;
            }
        }
        vector
    }

    /// Plays bucketed by the hour of day of the last play
    fn hour_histogram(&self) -> BTreeMap<u32, f64> {
        let mut buckets = BTreeMap::new();
        for record in &self.history {
            if record.play_count > 0 {
                *buckets.entry(record.last_played.hour()).or_insert(0.0) +=
                    record.play_count as f64;
            }
        }
        buckets
    }

    /// Plays bucketed by release decade
    fn decade_histogram(&self) -> BTreeMap<i32, f64> {
        let mut buckets = BTreeMap::new();
        for record in &self.history {
            if record.play_count <= 0 {
                continue;
            }
            if let Some(decade) = self.songs.get(&record.song_id).and_then(|s| s.decade()) {
                *buckets.entry(decade).or_insert(0.0) += record.play_count as f64;
            }
        }
        buckets
    }
}

/// `|A ∩ B| / |A ∪ B|`, 0 when either set is empty
pub fn jaccard<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = (a.len() + b.len()) as f64 - intersection;
    intersection / union
}

/// Cosine similarity of two sparse vectors, clamped to [0, 1]
pub fn cosine<K: Ord>(a: &BTreeMap<K, f64>, b: &BTreeMap<K, f64>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .filter_map(|(key, &x)| b.get(key).map(|&y| x * y))
        .sum();
    let mag_a = a.values().map(|v| v * v).sum::<f64>().sqrt();
    let mag_b = b.values().map(|v| v * v).sum::<f64>().sqrt();

    let denominator = mag_a * mag_b;
    if denominator == 0.0 {
        0.0
    } else {
        (dot / denominator).clamp(0.0, 1.0)
    }
}

/// Scales a vector so its entries sum to 1
pub fn l1_normalize<K: Ord + Clone>(vector: &BTreeMap<K, f64>) -> BTreeMap<K, f64> {
    let total: f64 = vector.values().map(|v| v.abs()).sum();
    if total == 0.0 {
        return vector.clone();
    }
    vector
        .iter()
        .map(|(k, v)| (k.clone(), v / total))
        .collect()
}

/// `Σ min(wA, wB) / max(totalA, totalB)`, clamped to [0, 1]
pub fn weighted_overlap<K: Ord>(
    a: &BTreeMap<K, f64>,
    total_a: f64,
    b: &BTreeMap<K, f64>,
    total_b: f64,
) -> f64 {
    let denominator = total_a.max(total_b);
    if denominator <= 0.0 {
        return 0.0;
    }
    let shared: f64 = a
        .iter()
        .filter_map(|(key, &x)| b.get(key).map(|&y| x.min(y)))
        .sum();
    (shared / denominator).clamp(0.0, 1.0)
}

/// Similarity of one component, or `None` if neither side has data for it
pub fn component_similarity(component: Component, a: &UserSignals, b: &UserSignals) -> Option<f64> {
    match component {
        Component::SharedSongs => {
            let (songs_a, songs_b) = (a.song_ids(), b.song_ids());
            evaluated(songs_a.is_empty() && songs_b.is_empty(), || {
                jaccard(&songs_a, &songs_b)
            })
        }
        Component::SharedArtists => {
            let (plays_a, plays_b) = (a.artist_plays(), b.artist_plays());
            evaluated(plays_a.is_empty() && plays_b.is_empty(), || {
                weighted_overlap(&plays_a, a.total_plays(), &plays_b, b.total_plays())
            })
        }
        Component::GenreAffinity => {
            let (genres_a, genres_b) = (a.genre_vector(), b.genre_vector());
            evaluated(genres_a.is_empty() && genres_b.is_empty(), || {
                cosine(&genres_a, &genres_b)
            })
        }
        Component::ListeningTime => {
            let (hours_a, hours_b) = (a.hour_histogram(), b.hour_histogram());
            evaluated(hours_a.is_empty() && hours_b.is_empty(), || {
                cosine(&l1_normalize(&hours_a), &l1_normalize(&hours_b))
            })
        }
        Component::ReleaseEra => {
            let (eras_a, eras_b) = (a.decade_histogram(), b.decade_histogram());
            evaluated(eras_a.is_empty() && eras_b.is_empty(), || {
                cosine(&l1_normalize(&eras_a), &l1_normalize(&eras_b))
            })
        }
    }
}

fn evaluated(no_data: bool, similarity: impl FnOnce() -> f64) -> Option<f64> {
    if no_data {
        None
    } else {
        Some(similarity())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComponentScore {
    pub component: Component,
    /// `None` when the component could not be evaluated
    pub similarity: Option<f64>,
}

impl ComponentScore {
    pub fn sub_score(&self) -> f64 {
        self.similarity
            .map(|s| s * self.component.weight())
            .unwrap_or(0.0)
    }

    pub fn evaluated_weight(&self) -> f64 {
        if self.similarity.is_some() {
            self.component.weight()
        } else {
            0.0
        }
    }
}

/// Per-component result of comparing two users
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreBreakdown {
    pub components: Vec<ComponentScore>,
}

impl ScoreBreakdown {
    pub fn compute(a: &UserSignals, b: &UserSignals) -> Self {
        let components = Component::ALL
            .iter()
            .map(|&component| ComponentScore {
                component,
                similarity: component_similarity(component, a, b),
            })
            .collect();
        Self { components }
    }

    pub fn get(&self, component: Component) -> Option<&ComponentScore> {
        self.components.iter().find(|c| c.component == component)
    }

    pub fn weighted_sum(&self) -> f64 {
        self.components.iter().map(ComponentScore::sub_score).sum()
    }

    pub fn evaluated_weight(&self) -> f64 {
        self.components
            .iter()
            .map(ComponentScore::evaluated_weight)
            .sum()
    }

    /// Normalised score in [0, 100], rounded to one decimal
    pub fn final_score(&self) -> f64 {
        let evaluated = self.evaluated_weight();
        if evaluated <= 0.0 {
            return 0.0;
        }
        let raw = (self.weighted_sum() / evaluated * 100.0).clamp(0.0, 100.0);
        (raw * 10.0).round() / 10.0
    }
}
