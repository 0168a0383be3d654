use crate::config::Config;
use crate::error::{RecommenderError, Result};
use crate::models::*;
use crate::services::catalog::ObservationSource;
use crate::services::training::ModelRegistry;
use crate::utils::validation::validate_top_n;
use crate::utils::{confidence, today, top_n_by_score};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

pub struct RecommendationService {
    registry: ModelRegistry,
    source: Arc<dyn ObservationSource>,
    config: Arc<Config>,
}

impl RecommendationService {
    pub fn new(registry: ModelRegistry, source: Arc<dyn ObservationSource>, config: Arc<Config>) -> Self {
        Self {
            registry,
            source,
            config,
        }
    }

    /// Ranks every item `member_id` has not engaged with by predicted score
    /// and returns at most `top_n` of them.
    ///
    /// Scores come from the last completed model snapshot of `scope`. Equal
    /// scores keep ascending item-code order.
    pub async fn recommend(&self, scope: &str, member_id: &str, top_n: usize) -> Result<Vec<Recommendation>> {
        validate_top_n(top_n)?;
        let snapshot = self
            .registry
            .get(scope)
            .filter(|snapshot| snapshot.model.is_trained())
            .ok_or(RecommenderError::NotTrained)?;

        let engaged = self.source.engaged_items(scope, member_id).await?;
        let complement: Vec<&String> = snapshot
            .items
            .iter()
            .filter(|item| !engaged.contains(item.as_str()))
            .collect();

        if complement.is_empty() {
            debug!("Member {} in scope {} has engaged with every item", member_id, scope);
            return Ok(Vec::new());
        }

        let scored = complement
            .into_iter()
            .map(|item| Ok((item, snapshot.model.predict(member_id, item)?)))
            .collect::<Result<Vec<_>>>()?;

        let generated_on = today();
        let mut recommendations = Vec::with_capacity(top_n);
        for (item_id, score) in top_n_by_score(scored, top_n) {
            let item = self.source.item_lookup(scope, item_id).await?.ok_or_else(|| {
                RecommenderError::inconsistent(format!("item {} is missing from the catalog", item_id))
            })?;

            recommendations.push(Recommendation {
                id: Uuid::new_v4(),
                scope: scope.to_string(),
                member_id: member_id.to_string(),
                item,
                predicted_score: score,
                confidence: confidence(score, self.config.recommendation.confidence_scale),
                generated_on,
                feedback: None,
            });
        }

        info!(
            "Generated {} recommendations for member {} in scope {}",
            recommendations.len(),
            member_id,
            scope
        );
        Ok(recommendations)
    }
}
