use crate::algorithms::trainer::{self, TrainingJob, TrainingOutcome};
use crate::algorithms::FactorModel;
use crate::error::{RecommenderError, Result};
use crate::models::*;
use crate::services::ratings_store::{EngagementMatrix, RatingsStore, ScopeFiles};
use crate::utils::run_blocking;
use crate::utils::validation::validate_hyperparameters;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{mpsc, Arc};
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct ModelSnapshot {
    pub scope: String,
    pub model: FactorModel,
    /// Item universe: engagement matrix columns at training time.
    pub items: Vec<String>,
    pub error_trace: Vec<f64>,
    pub trained_at: DateTime<Utc>,
}

/// Last completed snapshot per scope. Training never mutates a published
/// snapshot; it swaps in a new `Arc` when done.
#[derive(Debug, Default, Clone)]
pub struct ModelRegistry {
    snapshots: Arc<RwLock<HashMap<String, Arc<ModelSnapshot>>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, scope: &str) -> Option<Arc<ModelSnapshot>> {
        self.snapshots.read().get(scope).cloned()
    }

    pub fn publish(&self, snapshot: ModelSnapshot) {
        self.snapshots
            .write()
            .insert(snapshot.scope.clone(), Arc::new(snapshot));
    }

    pub fn is_trained(&self, scope: &str) -> bool {
        self.get(scope).map_or(false, |s| s.model.is_trained())
    }
}

struct PreparedRun {
    files: ScopeFiles,
    items: Vec<String>,
    num_ratings: usize,
}

pub struct TrainingService {
    store: Arc<RatingsStore>,
    registry: ModelRegistry,
}

impl TrainingService {
    pub fn new(store: Arc<RatingsStore>, registry: ModelRegistry) -> Self {
        Self { store, registry }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Trains `scope` from its persisted views, persists Q and P and
    /// publishes the result. A failed run leaves the published snapshot
    /// and the factor files untouched.
    pub async fn train(&self, scope: &str, hyperparameters: &Hyperparameters) -> Result<TrainingReport> {
        let (job, run) = self.prepare(scope, hyperparameters).await?;
        let outcome = run_blocking(move || trainer::train(job.model, &job.known_ratings, &job.hyperparameters)).await?;
        self.commit(scope, run, outcome).await
    }

    /// Trains several scopes in parallel on the rayon pool. Results come
    /// back in the order of `scopes`.
    pub async fn train_scopes(
        &self,
        scopes: &[String],
        hyperparameters: &Hyperparameters,
    ) -> Vec<(String, Result<TrainingReport>)> {
        let mut results: Vec<Option<Result<TrainingReport>>> = Vec::with_capacity(scopes.len());
        let mut pending: HashMap<String, (usize, PreparedRun)> = HashMap::new();
        let mut jobs = Vec::new();

        let prepared = join_all(scopes.iter().enumerate().map(|(position, scope)| async move {
            if scopes[..position].contains(scope) {
                return Err(RecommenderError::invalid_input(format!(
                    "scope {} listed more than once",
                    scope
                )));
            }
            self.prepare(scope, hyperparameters).await
        }))
        .await;

        for (position, (scope, prepared)) in scopes.iter().zip(prepared).enumerate() {
            match prepared {
                Ok((job, run)) => {
                    pending.insert(scope.clone(), (position, run));
                    jobs.push(job);
                    results.push(None);
                }
                Err(e) => results.push(Some(Err(e))),
            }
        }

        let finished = run_blocking(move || {
            let (tx, rx) = mpsc::channel();
            trainer::train_independent(jobs, tx);
            Ok(rx.into_iter().collect::<Vec<_>>())
        })
        .await;

        match finished {
            Ok(outcomes) => {
                for (scope, outcome) in outcomes {
                    if let Some((position, run)) = pending.remove(&scope) {
                        let committed = match outcome {
                            Ok(outcome) => self.commit(&scope, run, outcome).await,
                            Err(e) => Err(e),
                        };
                        results[position] = Some(committed);
                    }
                }
            }
            Err(e) => {
                for (position, _) in pending.into_values() {
                    results[position] = Some(Err(RecommenderError::inconsistent(e.to_string())));
                }
            }
        }

        scopes
            .iter()
            .zip(results)
            .map(|(scope, result)| {
                let result = result.unwrap_or_else(|| {
                    Err(RecommenderError::inconsistent(format!(
                        "training of scope {} produced no result",
                        scope
                    )))
                });
                if let Err(e) = &result {
                    error!("Training scope {} failed: {}", scope, e);
                }
                (scope.clone(), result)
            })
            .collect()
    }

    async fn prepare(&self, scope: &str, hyperparameters: &Hyperparameters) -> Result<(TrainingJob, PreparedRun)> {
        validate_hyperparameters(hyperparameters)?;
        let files = self.store.files(scope)?;
        let views = self.store.load_views(scope).await?;
        if views.known_ratings.is_empty() {
            return Err(RecommenderError::EmptyTrainingSet);
        }

        let model = FactorModel::initialize(
            views.engagement.items(),
            views.engagement.members(),
            hyperparameters.factors,
            hyperparameters.seed,
        )?;

        info!(
            "Training scope {} on {} known ratings (K={}, lambda={}, eta={}, epochs={})",
            scope,
            views.known_ratings.len(),
            hyperparameters.factors,
            hyperparameters.regularization,
            hyperparameters.learning_rate,
            hyperparameters.epochs
        );

        let run = PreparedRun {
            files,
            items: views.engagement.items().to_vec(),
            num_ratings: views.known_ratings.len(),
        };
        let job = TrainingJob {
            scope: scope.to_string(),
            model,
            known_ratings: views.known_ratings,
            hyperparameters: hyperparameters.clone(),
        };
        Ok((job, run))
    }

    async fn commit(&self, scope: &str, run: PreparedRun, outcome: TrainingOutcome) -> Result<TrainingReport> {
        let TrainingOutcome { model, error_trace } = outcome;
        let files = run.files;
        let model = run_blocking(move || {
            model.save(&files.item_factors, &files.member_factors)?;
            Ok(model)
        })
        .await?;

        let trained_at = Utc::now();
        let report = TrainingReport {
            scope: scope.to_string(),
            error_trace: error_trace.clone(),
            num_ratings: run.num_ratings,
            num_members: model.member_factors().len(),
            num_items: model.item_factors().len(),
            trained_at,
        };

        self.registry.publish(ModelSnapshot {
            scope: scope.to_string(),
            model,
            items: run.items,
            error_trace,
            trained_at,
        });

        info!(
            "Finished training scope {} with final error {:?}",
            scope,
            report.final_error()
        );
        Ok(report)
    }

    /// Publishes persisted factors from an earlier run. Returns `false` if
    /// the scope has never been trained.
    pub fn restore(&self, scope: &str) -> Result<bool> {
        let files = self.store.files(scope)?;
        if !files.has_factors() {
            warn!("No persisted factors for scope {}", scope);
            return Ok(false);
        }

        let model = FactorModel::load(&files.item_factors, &files.member_factors)?;
        let engagement: EngagementMatrix = self.store.engagement_matrix(scope)?;
        if let Some(missing) = engagement
            .items()
            .iter()
            .find(|item| !model.item_factors().contains(item))
        {
            return Err(RecommenderError::inconsistent(format!(
                "item {} was reloaded after the persisted model was trained",
                missing
            )));
        }

        self.registry.publish(ModelSnapshot {
            scope: scope.to_string(),
            model,
            items: engagement.items().to_vec(),
            error_trace: Vec::new(),
            trained_at: Utc::now(),
        });
        info!("Restored persisted model for scope {}", scope);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::catalog::InMemoryCatalog;

    fn rated(catalog: &InMemoryCatalog, scope: &str, member: &str, item: &str, value: u8) {
        catalog
            .record(scope, &Observation::rated(member, item, Rating::new(value).unwrap()))
            .unwrap();
    }

    fn setup(dir: &std::path::Path) -> (Arc<InMemoryCatalog>, Arc<RatingsStore>, TrainingService) {
        let catalog = Arc::new(InMemoryCatalog::new());
        let store = Arc::new(RatingsStore::new(dir, catalog.clone()));
        let service = TrainingService::new(store.clone(), ModelRegistry::new());
        (catalog, store, service)
    }

    fn seeded() -> Hyperparameters {
        Hyperparameters {
            epochs: 10,
            seed: Some(5),
            ..Hyperparameters::default()
        }
    }

    #[tokio::test]
    async fn test_train_publishes_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let (catalog, store, service) = setup(dir.path());
        rated(&catalog, "uni1", "s1", "c1", 9);
        rated(&catalog, "uni1", "s2", "c2", 4);
        store.reload("uni1").await.unwrap();

        assert!(!service.registry().is_trained("uni1"));
        let report = service.train("uni1", &seeded()).await.unwrap();

        assert_eq!(report.error_trace.len(), 10);
        assert_eq!(report.num_ratings, 2);
        assert!(service.registry().is_trained("uni1"));
        assert!(store.files("uni1").unwrap().has_factors());
    }

    #[tokio::test]
    async fn test_train_without_ratings() {
        let dir = tempfile::tempdir().unwrap();
        let (catalog, store, service) = setup(dir.path());
        catalog.record("uni1", &Observation::new("s1", "c1")).unwrap();
        store.reload("uni1").await.unwrap();

        let result = service.train("uni1", &seeded()).await;
        assert!(matches!(result, Err(RecommenderError::EmptyTrainingSet)));
        assert!(!service.registry().is_trained("uni1"));
    }

    #[tokio::test]
    async fn test_restore_matches_trained_model() {
        let dir = tempfile::tempdir().unwrap();
        let (catalog, store, service) = setup(dir.path());
        rated(&catalog, "uni1", "s1", "c1", 7);
        store.reload("uni1").await.unwrap();
        service.train("uni1", &seeded()).await.unwrap();
        let trained = service.registry().get("uni1").unwrap();

        let restarted = TrainingService::new(store.clone(), ModelRegistry::new());
        assert!(restarted.restore("uni1").unwrap());
        let restored = restarted.registry().get("uni1").unwrap();

        assert_eq!(restored.model, trained.model);
        assert_eq!(restored.items, trained.items);
    }

    #[tokio::test]
    async fn test_restore_untrained_scope() {
        let dir = tempfile::tempdir().unwrap();
        let (_, _, service) = setup(dir.path());
        assert!(!service.restore("uni1").unwrap());
    }

    #[tokio::test]
    async fn test_diverged_run_keeps_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let (catalog, store, service) = setup(dir.path());
        rated(&catalog, "uni1", "s1", "c1", 9);
        rated(&catalog, "uni1", "s1", "c3", 8);
        rated(&catalog, "uni1", "s2", "c4", 8);
        catalog.record("uni1", &Observation::new("s2", "c2")).unwrap();
        store.reload("uni1").await.unwrap();

        service.train("uni1", &seeded()).await.unwrap();
        let before = service.registry().get("uni1").unwrap();
        let files = store.files("uni1").unwrap();
        let persisted = std::fs::read_to_string(&files.item_factors).unwrap();

        let unstable = Hyperparameters {
            learning_rate: 2.0,
            epochs: 40,
            ..seeded()
        };
        let result = service.train("uni1", &unstable).await;
        assert!(matches!(result, Err(RecommenderError::InconsistentState(_))));

        let after = service.registry().get("uni1").unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(std::fs::read_to_string(&files.item_factors).unwrap(), persisted);
    }

    #[tokio::test]
    async fn test_train_scopes_rejects_repeated_scope() {
        let dir = tempfile::tempdir().unwrap();
        let (catalog, store, service) = setup(dir.path());
        rated(&catalog, "uni1", "s1", "c1", 9);
        store.reload("uni1").await.unwrap();

        let scopes = vec!["uni1".to_string(), "uni1".to_string()];
        let results = service.train_scopes(&scopes, &seeded()).await;
        assert!(results[0].1.is_ok());
        assert!(matches!(results[1].1, Err(RecommenderError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_train_scopes_independently() {
        let dir = tempfile::tempdir().unwrap();
        let (catalog, store, service) = setup(dir.path());
        rated(&catalog, "uni1", "s1", "c1", 9);
        rated(&catalog, "uni2", "s9", "c7", 3);
        catalog.record("uni3", &Observation::new("s1", "c1")).unwrap();
        for scope in ["uni1", "uni2", "uni3"] {
            store.reload(scope).await.unwrap();
        }

        let scopes = vec!["uni1".to_string(), "uni2".to_string(), "uni3".to_string()];
        let results = service.train_scopes(&scopes, &seeded()).await;

        assert_eq!(results.len(), 3);
        assert!(results[0].1.is_ok());
        assert!(results[1].1.is_ok());
        assert!(matches!(results[2].1, Err(RecommenderError::EmptyTrainingSet)));
        assert!(service.registry().get("uni2").unwrap().items == vec!["c7".to_string()]);
    }
}
