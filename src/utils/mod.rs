use crate::error::{RecommenderError, Result};
use chrono::{Local, NaiveDate};

pub mod validation;

pub const DEFAULT_CONFIDENCE_SCALE: f64 = 20.0;

/// Ranks `(key, score)` pairs by descending score and keeps the first `n`.
///
/// The sort is stable: equal scores keep their input order. NaN ranks last.
pub fn top_n_by_score<K>(mut scored: Vec<(K, f64)>, n: usize) -> Vec<(K, f64)> {
    scored.sort_by(|a, b| rank_key(b.1).total_cmp(&rank_key(a.1)));
    scored.truncate(n);
    scored
}

fn rank_key(score: f64) -> f64 {
    if score.is_nan() {
        f64::NEG_INFINITY
    } else {
        score
    }
}

/// Linear rescaling of a predicted score. Scores are not bounded by `scale`,
/// so the result can leave `[0, 1]` for large K or learning rates.
pub fn confidence(score: f64, scale: f64) -> f64 {
    score / scale
}

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

pub async fn run_blocking<T, F>(task: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| RecommenderError::inconsistent(format!("blocking task failed: {}", e)))?
}
