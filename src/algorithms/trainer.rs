use super::optimizer::{IndexedRating, Sgd};
use super::FactorModel;
use crate::error::{RecommenderError, Result};
use crate::models::{Hyperparameters, KnownRating};
use crate::utils::validation::validate_hyperparameters;
use rayon::prelude::*;
use std::sync::mpsc::Sender;
use tracing::debug;

/// Fitted model plus the regularized error measured after each epoch.
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub model: FactorModel,
    pub error_trace: Vec<f64>,
}

/// Input for one independent training run.
#[derive(Debug, Clone)]
pub struct TrainingJob {
    pub scope: String,
    pub model: FactorModel,
    pub known_ratings: Vec<KnownRating>,
    pub hyperparameters: Hyperparameters,
}

fn resolve_ratings(model: &FactorModel, known_ratings: &[KnownRating]) -> Result<Vec<IndexedRating>> {
    known_ratings
        .iter()
        .map(|known| {
            let item_row = model.item_factors().row_index(&known.item_id).ok_or_else(|| {
                RecommenderError::inconsistent(format!(
                    "rating references item {} which has no factor row",
                    known.item_id
                ))
            })?;
            let member_row = model.member_factors().row_index(&known.member_id).ok_or_else(|| {
                RecommenderError::inconsistent(format!(
                    "rating references member {} which has no factor row",
                    known.member_id
                ))
            })?;
            Ok(IndexedRating {
                item_row,
                member_row,
                rating: known.rating.as_f64(),
            })
        })
        .collect()
}

/// Fits `model` to `known_ratings` with online SGD for a fixed number of epochs.
///
/// Ratings are visited in the given order every epoch, so a fixed order and
/// seed give identical results. All inputs are checked before the first update.
pub fn train(
    mut model: FactorModel,
    known_ratings: &[KnownRating],
    hyperparameters: &Hyperparameters,
) -> Result<TrainingOutcome> {
    validate_hyperparameters(hyperparameters)?;
    if known_ratings.is_empty() {
        return Err(RecommenderError::EmptyTrainingSet);
    }
    if model.factors() != hyperparameters.factors {
        return Err(RecommenderError::inconsistent(format!(
            "model has K={} but training requested K={}",
            model.factors(),
            hyperparameters.factors
        )));
    }

    let ratings = resolve_ratings(&model, known_ratings)?;
    let sgd = Sgd::new(hyperparameters.learning_rate, hyperparameters.regularization);

    let mut error_trace = Vec::with_capacity(hyperparameters.epochs);
    for epoch in 0..hyperparameters.epochs {
        sgd.epoch(&mut model, &ratings);
        let error = sgd.regularized_error(&model, &ratings);
        if !error.is_finite() {
            return Err(RecommenderError::inconsistent(format!(
                "training diverged at epoch {} (error {})",
                epoch + 1,
                error
            )));
        }
        debug!(epoch, error, "completed training epoch");
        error_trace.push(error);
    }

    model.mark_trained();
    Ok(TrainingOutcome { model, error_trace })
}

/// Initializes a model over the given keys and trains it.
pub fn fit(
    items: &[String],
    members: &[String],
    known_ratings: &[KnownRating],
    hyperparameters: &Hyperparameters,
) -> Result<TrainingOutcome> {
    validate_hyperparameters(hyperparameters)?;
    let model = FactorModel::initialize(items, members, hyperparameters.factors, hyperparameters.seed)?;
    train(model, known_ratings, hyperparameters)
}

/// Trains independent jobs in parallel. Each run owns its model; results
/// are delivered to `sink` tagged with the job's scope as they complete.
pub fn train_independent(jobs: Vec<TrainingJob>, sink: Sender<(String, Result<TrainingOutcome>)>) {
    jobs.into_par_iter().for_each_with(sink, |sink, job| {
        let outcome = train(job.model, &job.known_ratings, &job.hyperparameters);
        // A dropped receiver means nobody is collecting anymore.
        let _ = sink.send((job.scope, outcome));
    });
}
