use crate::error::{RecommenderError, Result};
use crate::models::Hyperparameters;

pub const MIN_TOP_N: usize = 1;
pub const MAX_TOP_N: usize = 3;

pub fn validate_top_n(top_n: usize) -> Result<()> {
    if !(MIN_TOP_N..=MAX_TOP_N).contains(&top_n) {
        return Err(RecommenderError::invalid_input(format!(
            "number of recommendations must be within [{}, {}], got {}",
            MIN_TOP_N, MAX_TOP_N, top_n
        )));
    }
    Ok(())
}

pub fn validate_hyperparameters(params: &Hyperparameters) -> Result<()> {
    if params.factors == 0 {
        return Err(RecommenderError::invalid_input("number of factors must be positive"));
    }

    if params.epochs == 0 {
        return Err(RecommenderError::invalid_input("number of epochs must be positive"));
    }

    if !params.learning_rate.is_finite() || params.learning_rate <= 0.0 {
        return Err(RecommenderError::invalid_input(format!(
            "learning rate must be a positive finite number, got {}",
            params.learning_rate
        )));
    }

    if !params.regularization.is_finite() || params.regularization < 0.0 {
        return Err(RecommenderError::invalid_input(format!(
            "regularization must be a non-negative finite number, got {}",
            params.regularization
        )));
    }

    Ok(())
}

/// Scopes and codes end up in file names and CSV cells.
pub fn validate_identifier(kind: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(RecommenderError::invalid_input(format!("{} cannot be empty", kind)));
    }

    if value.len() > 100 {
        return Err(RecommenderError::invalid_input(format!(
            "{} too long (max 100 characters)",
            kind
        )));
    }

    if !value
        .chars()
        .all(|c| c.is_alphanumeric() || "-_.".contains(c))
    {
        return Err(RecommenderError::invalid_input(format!(
            "{} may only contain letters, digits, '-', '_' and '.': {:?}",
            kind, value
        )));
    }

    Ok(())
}
