pub mod algorithms;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use error::{RecommenderError, Result};
pub use models::*;

use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub catalog: Arc<services::catalog::InMemoryCatalog>,
    pub ratings_store: Arc<services::ratings_store::RatingsStore>,
    pub training_service: Arc<services::training::TrainingService>,
    pub recommendation_service: Arc<services::recommendation::RecommendationService>,
    pub feedback_recorder: Arc<services::feedback::FeedbackRecorder>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self::with_catalog(config, Arc::new(services::catalog::InMemoryCatalog::new()))
    }

    pub fn with_catalog(config: Config, catalog: Arc<services::catalog::InMemoryCatalog>) -> Self {
        let config = Arc::new(config);
        let registry = services::training::ModelRegistry::new();

        let ratings_store = Arc::new(services::ratings_store::RatingsStore::new(
            config.storage.data_dir.clone(),
            catalog.clone(),
        ));

        let training_service = Arc::new(services::training::TrainingService::new(
            ratings_store.clone(),
            registry.clone(),
        ));

        let recommendation_service = Arc::new(services::recommendation::RecommendationService::new(
            registry,
            catalog.clone(),
            config.clone(),
        ));

        let feedback_recorder = Arc::new(services::feedback::FeedbackRecorder::with_capacity(
            config.recommendation.max_issued,
        ));

        Self {
            config,
            catalog,
            ratings_store,
            training_service,
            recommendation_service,
            feedback_recorder,
        }
    }
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}
