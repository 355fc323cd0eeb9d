use std::sync::Arc;

use crate::{
    config::EngineSettings,
    db::{Cache, KvStore, MatchLedger, SignalStore},
    services::{
        CandidateFilter, CatalogProvider, MatchScoreService, RecalculationScheduler,
        Recalculator, RecommendationComposer, SchedulerHandle, SimilarityScorer, SongIngestor,
    },
};

/// Shared application state: the engine's services wired over one set of stores
#[derive(Clone)]
pub struct AppState {
    pub scores: Arc<MatchScoreService>,
    pub candidates: CandidateFilter,
    pub composer: Arc<RecommendationComposer>,
    pub recalculator: Arc<Recalculator>,
    pub scheduler: RecalculationScheduler,
    pub ingestor: SongIngestor,
}

impl AppState {
    /// Wires the engine and starts the recalculation worker
    ///
    /// Must be called inside a Tokio runtime. The returned handle stops the
    /// worker on shutdown.
    pub fn new(
        store: Arc<dyn SignalStore>,
        ledger: Arc<dyn MatchLedger>,
        kv: Arc<dyn KvStore>,
        cache: Cache,
        catalog: Arc<dyn CatalogProvider>,
        settings: EngineSettings,
    ) -> (Self, SchedulerHandle) {
        let candidates = CandidateFilter::new(store.clone());
        let scores = Arc::new(MatchScoreService::new(
            SimilarityScorer::new(store.clone(), ledger.clone()),
            cache.clone(),
        ));
        let ingestor = SongIngestor::new(store.clone(), catalog.clone());

        let composer = Arc::new(RecommendationComposer::new(
            store,
            ledger,
            catalog,
            ingestor.clone(),
            candidates.clone(),
            scores.clone(),
            cache,
            settings.clone(),
        ));

        let recalculator = Arc::new(Recalculator::new(
            kv,
            candidates.clone(),
            scores.clone(),
            settings,
        ));
        let (scheduler, scheduler_handle) = RecalculationScheduler::spawn(recalculator.clone());

        (
            Self {
                scores,
                candidates,
                composer,
                recalculator,
                scheduler,
                ingestor,
            },
            scheduler_handle,
        )
    }
}
