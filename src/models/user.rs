use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Stored coordinates of a user, in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub updated_at: DateTime<Utc>,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            updated_at: Utc::now(),
        }
    }
}

pub const DEFAULT_MIN_AGE: i32 = 18;
pub const DEFAULT_MAX_AGE: i32 = 100;
pub const DEFAULT_MAX_DISTANCE_KM: f64 = 100.0;

/// Per-user dating constraints
///
/// A `None` preferred gender is a wildcard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DatingPreference {
    pub preferred_gender: Option<String>,
    pub min_age: i32,
    pub max_age: i32,
    pub max_distance: f64,
    pub is_visible: bool,
}

impl Default for DatingPreference {
    fn default() -> Self {
        Self {
            preferred_gender: None,
            min_age: DEFAULT_MIN_AGE,
            max_age: DEFAULT_MAX_AGE,
            max_distance: DEFAULT_MAX_DISTANCE_KM,
            is_visible: true,
        }
    }
}

impl DatingPreference {
    /// Applies request-level overrides on top of the stored preferences
    pub fn with_filters(mut self, filters: &CandidateFilters) -> Self {
        if let Some(gender) = &filters.gender {
            self.preferred_gender = Some(gender.clone());
        }
        if let Some(min_age) = filters.min_age {
            self.min_age = min_age;
        }
        if let Some(max_age) = filters.max_age {
            self.max_age = max_age;
        }
        if let Some(max_distance) = filters.max_distance {
            self.max_distance = max_distance;
        }
        self
    }
}

/// Optional overrides supplied by an interactive candidate query
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CandidateFilters {
    pub gender: Option<String>,
    pub min_age: Option<i32>,
    pub max_age: Option<i32>,
    pub max_distance: Option<f64>,
}

/// A potential candidate as returned by the coarse pool query, before the
/// exact distance/age/gender predicate runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CandidateProfile {
    pub user_id: String,
    pub gender: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub is_visible: bool,
    pub latitude: f64,
    pub longitude: f64,
}

impl CandidateProfile {
    /// Age in whole years on the given day, if the birth date is known
    pub fn age_on(&self, today: NaiveDate) -> Option<i32> {
        let birth = self.birth_date?;
        let mut age = today.year() - birth.year();
        if (today.month(), today.day()) < (birth.month(), birth.day()) {
            age -= 1;
        }
        Some(age)
    }
}

/// A filtered candidate annotated with its great-circle distance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub user_id: String,
    #[serde(rename = "distance")]
    pub distance_km: f64,
}
