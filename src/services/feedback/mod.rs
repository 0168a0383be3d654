use crate::error::{RecommenderError, Result};
use crate::models::{Feedback, Recommendation, Verdict};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::info;
use uuid::Uuid;

pub const DEFAULT_ISSUED_CAPACITY: usize = 10_000;

/// Attaches `verdict` to `recommendation`. A recommendation takes at most one
/// verdict; a second call fails and leaves the first untouched.
pub fn rate(recommendation: &mut Recommendation, verdict: Verdict) -> Result<Feedback> {
    if let Some(existing) = &recommendation.feedback {
        return Err(RecommenderError::invalid_input(format!(
            "recommendation {} was already rated {}",
            recommendation.id, existing.verdict
        )));
    }

    let feedback = Feedback {
        verdict,
        created_at: Utc::now(),
    };
    recommendation.feedback = Some(feedback.clone());
    Ok(feedback)
}

/// Issued recommendations awaiting feedback, standing in for the external
/// recommendation store. Beyond `capacity` the oldest entries are evicted.
#[derive(Debug)]
pub struct FeedbackRecorder {
    issued: DashMap<Uuid, Recommendation>,
    order: Mutex<VecDeque<Uuid>>,
    capacity: usize,
}

impl Default for FeedbackRecorder {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_ISSUED_CAPACITY)
    }
}

impl FeedbackRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            issued: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn register(&self, recommendations: &[Recommendation]) {
        let mut order = self.order.lock();
        for recommendation in recommendations {
            if self
                .issued
                .insert(recommendation.id, recommendation.clone())
                .is_none()
            {
                order.push_back(recommendation.id);
            }
        }

        while order.len() > self.capacity {
            if let Some(oldest) = order.pop_front() {
                self.issued.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.issued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issued.is_empty()
    }

    pub fn get(&self, id: &Uuid) -> Option<Recommendation> {
        self.issued.get(id).map(|entry| entry.value().clone())
    }

    /// Parses `verdict` and records it against the issued recommendation `id`.
    pub fn record_feedback(&self, id: Uuid, verdict: &str) -> Result<Feedback> {
        let verdict: Verdict = verdict.parse()?;
        let mut entry = self
            .issued
            .get_mut(&id)
            .ok_or_else(|| RecommenderError::NotFound(format!("recommendation {}", id)))?;

        let feedback = rate(entry.value_mut(), verdict)?;
        info!("Recorded {} feedback for recommendation {}", verdict, id);
        Ok(feedback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CatalogItem;
    use crate::utils::today;

    fn recommendation() -> Recommendation {
        Recommendation {
            id: Uuid::new_v4(),
            scope: "uni".to_string(),
            member_id: "s1".to_string(),
            item: CatalogItem::new("c2", "Statistics 2"),
            predicted_score: 5.0,
            confidence: 0.25,
            generated_on: today(),
            feedback: None,
        }
    }

    #[test]
    fn test_rate_once() {
        let mut rec = recommendation();
        let first = rate(&mut rec, Verdict::Helpful).unwrap();

        assert!(matches!(
            rate(&mut rec, Verdict::NotHelpful),
            Err(RecommenderError::InvalidInput(_))
        ));
        assert_eq!(rec.feedback, Some(first));
    }

    #[test]
    fn test_record_feedback_by_id() {
        let recorder = FeedbackRecorder::new();
        let rec = recommendation();
        recorder.register(std::slice::from_ref(&rec));

        let feedback = recorder.record_feedback(rec.id, "not helpful").unwrap();
        assert_eq!(feedback.verdict, Verdict::NotHelpful);
        assert!(recorder.record_feedback(rec.id, "helpful").is_err());
        assert_eq!(
            recorder.get(&rec.id).unwrap().feedback.unwrap().verdict,
            Verdict::NotHelpful
        );
    }

    #[test]
    fn test_invalid_verdict_leaves_no_feedback() {
        let recorder = FeedbackRecorder::new();
        let rec = recommendation();
        recorder.register(std::slice::from_ref(&rec));

        assert!(matches!(
            recorder.record_feedback(rec.id, "awesome"),
            Err(RecommenderError::InvalidInput(_))
        ));
        assert!(recorder.get(&rec.id).unwrap().feedback.is_none());
    }

    #[test]
    fn test_oldest_recommendations_are_evicted() {
        let recorder = FeedbackRecorder::with_capacity(2);
        let recs: Vec<Recommendation> = (0..3).map(|_| recommendation()).collect();
        recorder.register(&recs[..1]);
        recorder.register(&recs[1..]);

        assert_eq!(recorder.len(), 2);
        assert!(recorder.get(&recs[0].id).is_none());
        assert!(matches!(
            recorder.record_feedback(recs[0].id, "helpful"),
            Err(RecommenderError::NotFound(_))
        ));
        assert!(recorder.record_feedback(recs[2].id, "helpful").is_ok());
    }

    #[test]
    fn test_registering_twice_does_not_duplicate() {
        let recorder = FeedbackRecorder::with_capacity(2);
        let rec = recommendation();
        recorder.register(std::slice::from_ref(&rec));
        recorder.register(std::slice::from_ref(&rec));
        recorder.register(&[recommendation()]);

        assert_eq!(recorder.len(), 2);
        assert!(recorder.get(&rec.id).is_some());
    }

    #[test]
    fn test_unknown_recommendation() {
        let recorder = FeedbackRecorder::new();
        assert!(matches!(
            recorder.record_feedback(Uuid::new_v4(), "helpful"),
            Err(RecommenderError::NotFound(_))
        ));
    }
}
