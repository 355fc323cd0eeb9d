use chrono::{NaiveDate, Utc};
use std::sync::Arc;

use crate::{
    db::{CandidatePoolQuery, SignalStore},
    error::{AppError, AppResult},
    models::{Candidate, CandidateFilters, CandidateProfile, DatingPreference, Location},
    services::geo::haversine_km,
};

/// Candidate cap when rescoring in the background
pub const RECALCULATION_CANDIDATE_LIMIT: usize = 50;

/// Candidate cap for interactive requests
pub const INTERACTIVE_CANDIDATE_LIMIT: usize = 20;

/// Finds users that satisfy another user's location and dating constraints
#[derive(Clone)]
pub struct CandidateFilter {
    store: Arc<dyn SignalStore>,
}

impl CandidateFilter {
    pub fn new(store: Arc<dyn SignalStore>) -> Self {
        Self { store }
    }

    /// Returns candidates for `user_id` around `location`, nearest first
    pub async fn find_candidates(
        &self,
        user_id: &str,
        location: &Location,
        preferences: &DatingPreference,
        limit: usize,
    ) -> AppResult<Vec<Candidate>> {
        let today = Utc::now().date_naive();
        let query = CandidatePoolQuery::new(location, preferences, today);
        let pool = self.store.candidate_pool(user_id, &query).await?;
        let pool_size = pool.len();

        let candidates = filter_candidates(pool, user_id, location, preferences, today, limit);

        tracing::debug!(
            user_id = %user_id,
            pool_size,
            candidates = candidates.len(),
            max_distance_km = preferences.max_distance,
            "Candidates filtered"
        );

        Ok(candidates)
    }

    /// Loads the user's location and preferences, applies `filters`, and
    /// returns matching candidates
    pub async fn find_for_user(
        &self,
        user_id: &str,
        filters: &CandidateFilters,
        limit: usize,
    ) -> AppResult<Vec<Candidate>> {
        let location = self.require_location(user_id).await?;
        let preferences = self.effective_preferences(user_id).await?.with_filters(filters);
        self.find_candidates(user_id, &location, &preferences, limit)
            .await
    }

    /// Stored location of a user; a missing one cannot be worked around
    pub async fn require_location(&self, user_id: &str) -> AppResult<Location> {
        self.store
            .location(user_id)
            .await?
            .ok_or_else(|| AppError::LocationMissing(user_id.to_string()))
    }

    /// Stored dating preferences, or the defaults when none were saved
    pub async fn effective_preferences(&self, user_id: &str) -> AppResult<DatingPreference> {
        match self.store.dating_preferences(user_id).await? {
            Some(prefs) => Ok(prefs),
            None => {
                tracing::debug!(user_id = %user_id, "No dating preferences stored, using defaults");
                Ok(DatingPreference::default())
            }
        }
    }
}

/// Applies the exact candidate predicate to a coarse pool
///
/// Candidates must differ from `user_id`, be visible, match the preferred
/// gender (none = any), have a known age within range and lie within the
/// maximum distance (inclusive). Sorted by ascending distance and capped at
/// `limit`.
pub fn filter_candidates(
    pool: Vec<CandidateProfile>,
    user_id: &str,
    origin: &Location,
    preferences: &DatingPreference,
    today: NaiveDate,
    limit: usize,
) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = pool
        .into_iter()
        .filter(|c| c.user_id != user_id && c.is_visible)
        .filter(|c| gender_matches(preferences.preferred_gender.as_deref(), c.gender.as_deref()))
        .filter(|c| {
            c.age_on(today)
                .map(|age| age >= preferences.min_age && age <= preferences.max_age)
                .unwrap_or(false)
        })
        .filter_map(|c| {
            let distance_km =
                haversine_km(origin.latitude, origin.longitude, c.latitude, c.longitude);
            (distance_km <= preferences.max_distance).then_some(Candidate {
                user_id: c.user_id,
                distance_km,
            })
        })
        .collect();

    candidates.sort_by(|a, b| {
        a.distance_km
            .partial_cmp(&b.distance_km)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.user_id.cmp(&b.user_id))
    });
    candidates.truncate(limit);
    candidates
}

fn gender_matches(preferred: Option<&str>, candidate: Option<&str>) -> bool {
    match preferred.map(str::trim).filter(|p| !p.is_empty()) {
        None => true,
        Some(wanted) => candidate
            .map(|g| g.trim().eq_ignore_ascii_case(wanted))
            .unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemorySignalStore;
    use chrono::Datelike;

    const ORIGIN_LAT: f64 = 52.0;
    const ORIGIN_LON: f64 = 5.0;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    /// Point due north of the origin at the given distance
    fn lat_at_km(km: f64) -> f64 {
        ORIGIN_LAT + (km / crate::services::geo::EARTH_RADIUS_KM).to_degrees()
    }

    fn profile(id: &str, gender: &str, age: i32, lat: f64) -> CandidateProfile {
        CandidateProfile {
            user_id: id.to_string(),
            gender: Some(gender.to_string()),
            birth_date: NaiveDate::from_ymd_opt(today().year() - age, 1, 1),
            is_visible: true,
            latitude: lat,
            longitude: ORIGIN_LON,
        }
    }

    fn origin() -> Location {
        Location::new(ORIGIN_LAT, ORIGIN_LON)
    }

    fn prefs(max_distance: f64) -> DatingPreference {
        DatingPreference {
            max_distance,
            ..Default::default()
        }
    }

    #[test]
    fn test_distance_boundary_is_inclusive() {
        let pool = vec![
            profile("near", "female", 30, lat_at_km(9.9)),
            profile("edge", "female", 30, lat_at_km(10.0) - 1e-9),
            profile("far", "female", 30, lat_at_km(10.1)),
        ];

        let result = filter_candidates(pool, "me", &origin(), &prefs(10.0), today(), 50);
        let ids: Vec<&str> = result.iter().map(|c| c.user_id.as_str()).collect();
        assert_eq!(ids, vec!["near", "edge"]);
    }

    #[test]
    fn test_sorted_by_ascending_distance_and_capped() {
        let pool = vec![
            profile("c", "male", 30, lat_at_km(3.0)),
            profile("a", "male", 30, lat_at_km(1.0)),
            profile("b", "male", 30, lat_at_km(2.0)),
        ];

        let result = filter_candidates(pool, "me", &origin(), &prefs(10.0), today(), 2);
        let ids: Vec<&str> = result.iter().map(|c| c.user_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!((result[0].distance_km - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_excludes_self_and_invisible() {
        let mut hidden = profile("hidden", "female", 30, lat_at_km(1.0));
        hidden.is_visible = false;
        let pool = vec![profile("me", "female", 30, ORIGIN_LAT), hidden];

        let result = filter_candidates(pool, "me", &origin(), &prefs(10.0), today(), 50);
        assert!(result.is_empty());
    }

    #[test]
    fn test_gender_preference_filters_and_null_is_wildcard() {
        let pool = vec![
            profile("f", "Female", 30, lat_at_km(1.0)),
            profile("m", "male", 30, lat_at_km(2.0)),
        ];

        let mut only_female = prefs(10.0);
        only_female.preferred_gender = Some("female".to_string());
        let result = filter_candidates(pool.clone(), "me", &origin(), &only_female, today(), 50);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].user_id, "f");

        let result = filter_candidates(pool, "me", &origin(), &prefs(10.0), today(), 50);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_age_range_is_inclusive_and_unknown_age_excluded() {
        let mut unknown = profile("unknown", "male", 30, lat_at_km(1.0));
        unknown.birth_date = None;
        let pool = vec![
            profile("young", "male", 24, lat_at_km(1.0)),
            profile("min", "male", 25, lat_at_km(1.0)),
            profile("max", "male", 35, lat_at_km(1.0)),
            profile("old", "male", 36, lat_at_km(1.0)),
            unknown,
        ];
        let mut ranged = prefs(10.0);
        ranged.min_age = 25;
        ranged.max_age = 35;

        let result = filter_candidates(pool, "me", &origin(), &ranged, today(), 50);
        let mut ids: Vec<&str> = result.iter().map(|c| c.user_id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["max", "min"]);
    }

    #[tokio::test]
    async fn test_find_for_user_without_location_fails() {
        let store = Arc::new(InMemorySignalStore::default());
        let filter = CandidateFilter::new(store);

        let err = filter
            .find_for_user("ghost", &CandidateFilters::default(), 20)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::LocationMissing(id) if id == "ghost"));
    }

    #[tokio::test]
    async fn test_find_for_user_uses_default_preferences_when_missing() {
        let store = InMemorySignalStore::default();
        store.set_location("me", ORIGIN_LAT, ORIGIN_LON);
        store.add_user("near", "female", 30, lat_at_km(50.0), ORIGIN_LON);
        store.add_user("far", "female", 30, lat_at_km(150.0), ORIGIN_LON);
        let filter = CandidateFilter::new(Arc::new(store));

        let result = filter
            .find_for_user("me", &CandidateFilters::default(), 20)
            .await
            .unwrap();
        // default max distance is 100 km
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].user_id, "near");
    }

    #[tokio::test]
    async fn test_find_for_user_applies_request_filters() {
        let store = InMemorySignalStore::default();
        store.set_location("me", ORIGIN_LAT, ORIGIN_LON);
        store.add_user("near", "female", 30, lat_at_km(5.0), ORIGIN_LON);
        store.add_user("mid", "female", 30, lat_at_km(15.0), ORIGIN_LON);
        let filter = CandidateFilter::new(Arc::new(store));

        let filters = CandidateFilters {
            max_distance: Some(10.0),
            ..Default::default()
        };
        let result = filter.find_for_user("me", &filters, 20).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].user_id, "near");
    }

    #[tokio::test]
    async fn test_capped_pool_keeps_nearest_eligible_candidates() {
        let store = InMemorySignalStore::default();
        store.set_location("me", ORIGIN_LAT, ORIGIN_LON);
        for i in 0..10 {
            store.add_user(&format!("a{}", i), "female", 30, lat_at_km(80.0), ORIGIN_LON);
        }
        // closer than everyone but the wrong gender
        for i in 0..5 {
            store.add_user(&format!("b{}", i), "male", 30, lat_at_km(0.5), ORIGIN_LON);
        }
        store.add_user("z_nearest", "female", 30, lat_at_km(1.0), ORIGIN_LON);
        store.set_pool_limit(3);
        let filter = CandidateFilter::new(Arc::new(store));

        let mut preferences = prefs(100.0);
        preferences.preferred_gender = Some("female".to_string());
        let result = filter
            .find_candidates("me", &origin(), &preferences, 20)
            .await
            .unwrap();

        let ids: Vec<&str> = result.iter().map(|c| c.user_id.as_str()).collect();
        assert_eq!(ids, vec!["z_nearest", "a0", "a1"]);
    }
}
