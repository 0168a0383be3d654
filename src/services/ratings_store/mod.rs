use crate::error::{RecommenderError, Result};
use crate::models::{KnownRating, Observation, Rating};
use crate::services::catalog::ObservationSource;
use crate::utils::run_blocking;
use crate::utils::validation::validate_identifier;
use ndarray::Array2;
use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct ScopeFiles {
    pub engagement: PathBuf,
    pub known_ratings: PathBuf,
    pub item_factors: PathBuf,
    pub member_factors: PathBuf,
}

impl ScopeFiles {
    pub fn new(data_dir: &Path, scope: &str) -> Result<Self> {
        validate_identifier("scope", scope)?;
        Ok(Self {
            engagement: data_dir.join(format!("{}_engagement.csv", scope)),
            known_ratings: data_dir.join(format!("{}_known_ratings.csv", scope)),
            item_factors: data_dir.join(format!("{}_factors_q.csv", scope)),
            member_factors: data_dir.join(format!("{}_factors_p.csv", scope)),
        })
    }

    pub fn has_factors(&self) -> bool {
        self.item_factors.exists() && self.member_factors.exists()
    }
}

/// Member x item view of every engagement; a cell holds the rating if one was given.
#[derive(Debug, Clone, PartialEq)]
pub struct EngagementMatrix {
    members: Vec<String>,
    items: Vec<String>,
    cells: Array2<Option<Rating>>,
}

impl EngagementMatrix {
    pub fn empty() -> Self {
        Self {
            members: Vec::new(),
            items: Vec::new(),
            cells: Array2::from_elem((0, 0), None),
        }
    }

    /// Rows and columns come out in ascending key order.
    pub fn from_observations(observations: &[Observation]) -> Self {
        let members: Vec<String> = observations
            .iter()
            .map(|o| o.member_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let items: Vec<String> = observations
            .iter()
            .map(|o| o.item_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let member_index: HashMap<&str, usize> =
            members.iter().enumerate().map(|(i, m)| (m.as_str(), i)).collect();
        let item_index: HashMap<&str, usize> =
            items.iter().enumerate().map(|(i, c)| (c.as_str(), i)).collect();

        let mut cells = Array2::from_elem((members.len(), items.len()), None);
        for o in observations {
            cells[[member_index[o.member_id.as_str()], item_index[o.item_id.as_str()]]] = o.rating;
        }

        Self { members, items, cells }
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    pub fn items(&self) -> &[String] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn rating(&self, member_id: &str, item_id: &str) -> Option<Rating> {
        let row = self.members.iter().position(|m| m == member_id)?;
        let col = self.items.iter().position(|c| c == item_id)?;
        self.cells[[row, col]]
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;

        let mut header = Vec::with_capacity(self.items.len() + 1);
        header.push("member_code".to_string());
        header.extend(self.items.iter().cloned());
        writer.write_record(&header)?;

        for (member, row) in self.members.iter().zip(self.cells.rows()) {
            let mut record = Vec::with_capacity(row.len() + 1);
            record.push(member.clone());
            record.extend(row.iter().map(|cell| cell.map(|r| r.to_string()).unwrap_or_default()));
            writer.write_record(&record)?;
        }

        writer.flush()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let items: Vec<String> = reader.headers()?.iter().skip(1).map(str::to_string).collect();

        let mut members = Vec::new();
        let mut flat = Vec::new();
        for record in reader.records() {
            let record = record?;
            let mut fields = record.iter();
            let member = fields
                .next()
                .ok_or_else(|| RecommenderError::inconsistent("engagement row without a member"))?;
            for field in fields {
                flat.push(parse_cell(field)?);
            }
            members.push(member.to_string());
        }

        let cells = Array2::from_shape_vec((members.len(), items.len()), flat)
            .map_err(|e| RecommenderError::inconsistent(e.to_string()))?;
        Ok(Self { members, items, cells })
    }
}

fn parse_cell(field: &str) -> Result<Option<Rating>> {
    let field = field.trim();
    if field.is_empty() {
        return Ok(None);
    }
    let value: u8 = field
        .parse()
        .map_err(|_| RecommenderError::inconsistent(format!("invalid rating cell {:?}", field)))?;
    Rating::new(value).map(Some)
}

#[derive(Debug, Clone, PartialEq)]
pub struct RatingViews {
    pub engagement: EngagementMatrix,
    pub known_ratings: Vec<KnownRating>,
}

impl RatingViews {
    /// Collapses duplicate `(member, item)` pairs (the last value wins, the
    /// first position is kept) and pivots the result.
    pub fn build(observations: Vec<Observation>) -> Self {
        let mut positions: HashMap<(String, String), usize> = HashMap::new();
        let mut deduped: Vec<Observation> = Vec::with_capacity(observations.len());

        for observation in observations {
            match positions.entry((observation.member_id.clone(), observation.item_id.clone())) {
                Entry::Occupied(entry) => deduped[*entry.get()].rating = observation.rating,
                Entry::Vacant(entry) => {
                    entry.insert(deduped.len());
                    deduped.push(observation);
                }
            }
        }

        let known_ratings = deduped
            .iter()
            .filter_map(|o| {
                o.rating.map(|rating| KnownRating {
                    member_id: o.member_id.clone(),
                    item_id: o.item_id.clone(),
                    rating,
                })
            })
            .collect();

        Self {
            engagement: EngagementMatrix::from_observations(&deduped),
            known_ratings,
        }
    }

    pub fn empty() -> Self {
        Self {
            engagement: EngagementMatrix::empty(),
            known_ratings: Vec::new(),
        }
    }
}

fn save_known_ratings(path: &Path, known_ratings: &[KnownRating]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_path(path)?;
    for known in known_ratings {
        writer.serialize((&known.member_id, &known.item_id, known.rating.value()))?;
    }
    writer.flush()?;
    Ok(())
}

fn load_known_ratings(path: &Path) -> Result<Vec<KnownRating>> {
    let mut reader = csv::ReaderBuilder::new().has_headers(false).from_path(path)?;
    reader
        .deserialize::<(String, String, Rating)>()
        .map(|row| {
            let (member_id, item_id, rating) = row?;
            Ok(KnownRating {
                member_id,
                item_id,
                rating,
            })
        })
        .collect()
}

/// Materializes observations into the engagement matrix and known-ratings
/// list, persisted per scope under `data_dir`.
pub struct RatingsStore {
    data_dir: PathBuf,
    source: Arc<dyn ObservationSource>,
}

impl RatingsStore {
    pub fn new(data_dir: impl Into<PathBuf>, source: Arc<dyn ObservationSource>) -> Self {
        Self {
            data_dir: data_dir.into(),
            source,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn source(&self) -> &Arc<dyn ObservationSource> {
        &self.source
    }

    pub fn files(&self, scope: &str) -> Result<ScopeFiles> {
        ScopeFiles::new(&self.data_dir, scope)
    }

    /// Rebuilds both views of `scope` from the observation source and
    /// overwrites the persisted copies.
    pub async fn reload(&self, scope: &str) -> Result<RatingViews> {
        let files = self.files(scope)?;
        let observations = self.source.observations(scope).await?;
        let views = RatingViews::build(observations);

        let data_dir = self.data_dir.clone();
        let views = run_blocking(move || {
            std::fs::create_dir_all(&data_dir)?;
            views.engagement.save(&files.engagement)?;
            save_known_ratings(&files.known_ratings, &views.known_ratings)?;
            Ok(views)
        })
        .await?;

        info!(
            "Reloaded ratings for scope {}: {} members, {} items, {} known ratings",
            scope,
            views.engagement.members().len(),
            views.engagement.items().len(),
            views.known_ratings.len()
        );
        Ok(views)
    }

    /// Persisted engagement matrix; empty if `reload` never ran.
    pub fn engagement_matrix(&self, scope: &str) -> Result<EngagementMatrix> {
        read_engagement(&self.files(scope)?)
    }

    /// Persisted known ratings in stored order; empty if `reload` never ran.
    pub fn known_ratings(&self, scope: &str) -> Result<Vec<KnownRating>> {
        read_known_ratings(&self.files(scope)?)
    }

    pub fn views(&self, scope: &str) -> Result<RatingViews> {
        read_views(&self.files(scope)?)
    }

    pub async fn load_views(&self, scope: &str) -> Result<RatingViews> {
        let files = self.files(scope)?;
        run_blocking(move || read_views(&files)).await
    }
}

fn read_engagement(files: &ScopeFiles) -> Result<EngagementMatrix> {
    if !files.engagement.exists() {
        return Ok(EngagementMatrix::empty());
    }
    EngagementMatrix::load(&files.engagement)
}

fn read_known_ratings(files: &ScopeFiles) -> Result<Vec<KnownRating>> {
    if !files.known_ratings.exists() {
        return Ok(Vec::new());
    }
    load_known_ratings(&files.known_ratings)
}

fn read_views(files: &ScopeFiles) -> Result<RatingViews> {
    Ok(RatingViews {
        engagement: read_engagement(files)?,
        known_ratings: read_known_ratings(files)?,
    })
}
