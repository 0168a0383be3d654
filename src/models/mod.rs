use crate::error::{RecommenderError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 10;

/// An explicit rating in `[1, 10]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Rating(u8);

impl Rating {
    pub fn new(value: u8) -> Result<Self> {
        if (MIN_RATING..=MAX_RATING).contains(&value) {
            Ok(Self(value))
        } else {
            Err(RecommenderError::invalid_input(format!(
                "rating must be an integer in [{}, {}], got {}",
                MIN_RATING, MAX_RATING, value
            )))
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64
    }
}

impl TryFrom<u8> for Rating {
    type Error = RecommenderError;

    fn try_from(value: u8) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Rating> for u8 {
    fn from(rating: Rating) -> Self {
        rating.0
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A member's engagement with an item, optionally rated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub member_id: String,
    pub item_id: String,
    pub rating: Option<Rating>,
}

impl Observation {
    pub fn new(member_id: impl Into<String>, item_id: impl Into<String>) -> Self {
        Self {
            member_id: member_id.into(),
            item_id: item_id.into(),
            rating: None,
        }
    }

    pub fn rated(member_id: impl Into<String>, item_id: impl Into<String>, rating: Rating) -> Self {
        Self {
            rating: Some(rating),
            ..Self::new(member_id, item_id)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownRating {
    pub member_id: String,
    pub item_id: String,
    pub rating: Rating,
}

/// Catalog identity attached to a recommendation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub code: String,
    pub name: String,
}

impl CatalogItem {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    #[serde(rename = "helpful")]
    Helpful,
    #[serde(rename = "not helpful")]
    NotHelpful,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Helpful => "helpful",
            Verdict::NotHelpful => "not helpful",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verdict {
    type Err = RecommenderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', " ").as_str() {
            "helpful" => Ok(Verdict::Helpful),
            "not helpful" => Ok(Verdict::NotHelpful),
            other => Err(RecommenderError::invalid_input(format!(
                "unrecognized feedback verdict: {:?}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub verdict: Verdict,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: Uuid,
    pub scope: String,
    pub member_id: String,
    pub item: CatalogItem,
    pub predicted_score: f64,
    pub confidence: f64,
    pub generated_on: NaiveDate,
    pub feedback: Option<Feedback>,
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rating = self
            .feedback
            .as_ref()
            .map(|feedback| feedback.verdict.to_string())
            .unwrap_or_else(|| "None".to_string());
        write!(
            f,
            "{}, P={:.2}, Rating={}, Date={}",
            self.item.code, self.confidence, rating, self.generated_on
        )
    }
}

/// SGD hyperparameters for one training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Hyperparameters {
    pub factors: usize,
    pub regularization: f64,
    pub learning_rate: f64,
    pub epochs: usize,
    pub seed: Option<u64>,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            factors: 20,
            regularization: 0.1,
            learning_rate: 0.015,
            epochs: 40,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub scope: String,
    pub error_trace: Vec<f64>,
    pub num_ratings: usize,
    pub num_members: usize,
    pub num_items: usize,
    pub trained_at: DateTime<Utc>,
}

impl TrainingReport {
    pub fn final_error(&self) -> Option<f64> {
        self.error_trace.last().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rating_bounds() {
        assert!(Rating::new(1).is_ok());
        assert!(Rating::new(10).is_ok());
        assert!(matches!(Rating::new(0), Err(RecommenderError::InvalidInput(_))));
        assert!(matches!(Rating::new(11), Err(RecommenderError::InvalidInput(_))));
    }

    #[test]
    fn test_rating_deserialize_rejects_out_of_range() {
        assert!(serde_json::from_str::<Rating>("7").is_ok());
        assert!(serde_json::from_str::<Rating>("42").is_err());
    }

    #[test]
    fn test_verdict_parsing() {
        assert_eq!("helpful".parse::<Verdict>().unwrap(), Verdict::Helpful);
        assert_eq!("NOT_HELPFUL".parse::<Verdict>().unwrap(), Verdict::NotHelpful);
        assert_eq!("not helpful".parse::<Verdict>().unwrap(), Verdict::NotHelpful);
        assert!("meh".parse::<Verdict>().is_err());
    }

    #[test]
    fn test_recommendation_display() {
        let recommendation = Recommendation {
            id: Uuid::new_v4(),
            scope: "lse".to_string(),
            member_id: "nr1".to_string(),
            item: CatalogItem::new("ST104b", "Statistics 2"),
            predicted_score: 6.0,
            confidence: 0.3,
            generated_on: NaiveDate::from_ymd_opt(2020, 2, 13).unwrap(),
            feedback: None,
        };
        assert_eq!(recommendation.to_string(), "ST104b, P=0.30, Rating=None, Date=2020-02-13");
    }
}
