use crate::error::{RecommenderError, Result};
use crate::models::{CatalogItem, Observation, Rating};
use crate::utils::validation::validate_identifier;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use tracing::info;

/// What the engine needs from the system that owns members, items and
/// enrollment records.
#[async_trait::async_trait]
pub trait ObservationSource: Send + Sync {
    async fn observations(&self, scope: &str) -> Result<Vec<Observation>>;

    async fn engaged_items(&self, scope: &str, member_id: &str) -> Result<HashSet<String>>;

    async fn item_lookup(&self, scope: &str, item_id: &str) -> Result<Option<CatalogItem>>;
}

#[derive(Debug, Default)]
struct ScopeCatalog {
    items: BTreeMap<String, CatalogItem>,
    members: BTreeSet<String>,
    engagements: Vec<Observation>,
    positions: HashMap<(String, String), usize>,
}

impl ScopeCatalog {
    fn enroll(&mut self, member_id: &str, item_id: &str) -> Result<usize> {
        if !self.members.contains(member_id) {
            return Err(RecommenderError::invalid_input(format!("unknown member: {}", member_id)));
        }
        if !self.items.contains_key(item_id) {
            return Err(RecommenderError::invalid_input(format!("unknown item: {}", item_id)));
        }

        let key = (member_id.to_string(), item_id.to_string());
        if let Some(&position) = self.positions.get(&key) {
            return Ok(position);
        }

        let position = self.engagements.len();
        self.engagements.push(Observation::new(member_id, item_id));
        self.positions.insert(key, position);
        Ok(position)
    }

    fn rate(&mut self, member_id: &str, item_id: &str, rating: Rating) -> Result<()> {
        let key = (member_id.to_string(), item_id.to_string());
        let position = self.positions.get(&key).copied().ok_or_else(|| {
            RecommenderError::invalid_input(format!(
                "member {} cannot rate item {} without being enrolled",
                member_id, item_id
            ))
        })?;
        self.engagements[position].rating = Some(rating);
        Ok(())
    }
}

/// Reference [`ObservationSource`] keeping everything in memory, one catalog
/// per population scope.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    scopes: RwLock<HashMap<String, ScopeCatalog>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_item(&self, scope: &str, item: CatalogItem) -> Result<()> {
        validate_identifier("scope", scope)?;
        validate_identifier("item code", &item.code)?;
        let mut scopes = self.scopes.write();
        scopes
            .entry(scope.to_string())
            .or_default()
            .items
            .insert(item.code.clone(), item);
        Ok(())
    }

    pub fn add_member(&self, scope: &str, member_id: &str) -> Result<()> {
        validate_identifier("scope", scope)?;
        validate_identifier("member code", member_id)?;
        let mut scopes = self.scopes.write();
        scopes
            .entry(scope.to_string())
            .or_default()
            .members
            .insert(member_id.to_string());
        Ok(())
    }

    /// Records that `member_id` engaged with `item_id`. Enrolling twice is a no-op.
    pub fn enroll(&self, scope: &str, member_id: &str, item_id: &str) -> Result<()> {
        let mut scopes = self.scopes.write();
        let catalog = scopes
            .get_mut(scope)
            .ok_or_else(|| RecommenderError::NotFound(format!("scope {}", scope)))?;
        catalog.enroll(member_id, item_id)?;
        Ok(())
    }

    pub fn rate(&self, scope: &str, member_id: &str, item_id: &str, rating: Rating) -> Result<()> {
        let mut scopes = self.scopes.write();
        let catalog = scopes
            .get_mut(scope)
            .ok_or_else(|| RecommenderError::NotFound(format!("scope {}", scope)))?;
        catalog.rate(member_id, item_id, rating)
    }

    /// Registers the member and item if needed, then enrolls and optionally rates.
    pub fn record(&self, scope: &str, observation: &Observation) -> Result<()> {
        validate_identifier("scope", scope)?;
        validate_identifier("member code", &observation.member_id)?;
        validate_identifier("item code", &observation.item_id)?;

        let mut scopes = self.scopes.write();
        let catalog = scopes.entry(scope.to_string()).or_default();
        catalog.members.insert(observation.member_id.clone());
        catalog
            .items
            .entry(observation.item_id.clone())
            .or_insert_with(|| CatalogItem::new(&observation.item_id, &observation.item_id));
        catalog.enroll(&observation.member_id, &observation.item_id)?;
        if let Some(rating) = observation.rating {
            catalog.rate(&observation.member_id, &observation.item_id, rating)?;
        }
        Ok(())
    }

    /// Imports `member_id,item_id,rating` rows; an empty rating means an
    /// unrated enrollment. Returns the number of rows read.
    pub fn import_csv(&self, scope: &str, path: &Path) -> Result<usize> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut count = 0;
        for row in reader.deserialize::<Observation>() {
            self.record(scope, &row?)?;
            count += 1;
        }

        info!("Imported {} observations into scope {} from {}", count, scope, path.display());
        Ok(count)
    }

    pub fn scopes(&self) -> Vec<String> {
        let mut scopes: Vec<String> = self.scopes.read().keys().cloned().collect();
        scopes.sort();
        scopes
    }
}

#[async_trait::async_trait]
impl ObservationSource for InMemoryCatalog {
    async fn observations(&self, scope: &str) -> Result<Vec<Observation>> {
        Ok(self
            .scopes
            .read()
            .get(scope)
            .map(|catalog| catalog.engagements.clone())
            .unwrap_or_default())
    }

    async fn engaged_items(&self, scope: &str, member_id: &str) -> Result<HashSet<String>> {
        Ok(self
            .scopes
            .read()
            .get(scope)
            .map(|catalog| {
                catalog
                    .engagements
                    .iter()
                    .filter(|o| o.member_id == member_id)
                    .map(|o| o.item_id.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn item_lookup(&self, scope: &str, item_id: &str) -> Result<Option<CatalogItem>> {
        Ok(self
            .scopes
            .read()
            .get(scope)
            .and_then(|catalog| catalog.items.get(item_id).cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn university() -> InMemoryCatalog {
        let catalog = InMemoryCatalog::new();
        catalog.add_item("lse", CatalogItem::new("ST104a", "Statistics 1")).unwrap();
        catalog.add_item("lse", CatalogItem::new("MT1174", "Calculus")).unwrap();
        catalog.add_member("lse", "nr1").unwrap();
        catalog
    }

    #[test]
    fn test_rate_requires_enrollment() {
        let catalog = university();
        let rating = Rating::new(9).unwrap();

        assert!(matches!(
            catalog.rate("lse", "nr1", "ST104a", rating),
            Err(RecommenderError::InvalidInput(_))
        ));

        catalog.enroll("lse", "nr1", "ST104a").unwrap();
        catalog.rate("lse", "nr1", "ST104a", rating).unwrap();

        let observations = tokio_test::block_on(catalog.observations("lse")).unwrap();
        assert_eq!(observations, vec![Observation::rated("nr1", "ST104a", rating)]);
    }

    #[test]
    fn test_enroll_unknown_item() {
        let catalog = university();
        assert!(catalog.enroll("lse", "nr1", "XX999").is_err());
        assert!(matches!(
            catalog.enroll("nowhere", "nr1", "ST104a"),
            Err(RecommenderError::NotFound(_))
        ));
    }

    #[test]
    fn test_engaged_items_include_unrated() {
        let catalog = university();
        catalog.enroll("lse", "nr1", "ST104a").unwrap();
        catalog.enroll("lse", "nr1", "MT1174").unwrap();
        catalog.rate("lse", "nr1", "MT1174", Rating::new(8).unwrap()).unwrap();

        let engaged = tokio_test::block_on(catalog.engaged_items("lse", "nr1")).unwrap();
        assert_eq!(engaged.len(), 2);
        assert!(engaged.contains("ST104a"));
    }

    #[test]
    fn test_import_csv() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "member_id,item_id,rating").unwrap();
        writeln!(file, "s1,c1,9").unwrap();
        writeln!(file, "s1,c2,").unwrap();
        writeln!(file, "s2,c1,4").unwrap();

        let catalog = InMemoryCatalog::new();
        assert_eq!(catalog.import_csv("uni", file.path()).unwrap(), 3);

        let observations = tokio_test::block_on(catalog.observations("uni")).unwrap();
        assert_eq!(observations.len(), 3);
        assert_eq!(observations[1].rating, None);
        assert_eq!(catalog.scopes(), vec!["uni".to_string()]);
    }

    #[test]
    fn test_import_rejects_out_of_range_rating() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "member_id,item_id,rating").unwrap();
        writeln!(file, "s1,c1,11").unwrap();

        let catalog = InMemoryCatalog::new();
        assert!(catalog.import_csv("uni", file.path()).is_err());
    }
}
