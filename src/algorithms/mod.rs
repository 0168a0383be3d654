pub mod initializer;
pub mod optimizer;
pub mod trainer;

use crate::error::{RecommenderError, Result};
use ndarray::{Array2, ArrayView1, ArrayViewMut1};
use std::collections::HashMap;
use std::path::Path;

/// Dense factor rows addressed by natural key (item code or member code).
#[derive(Debug, Clone)]
pub struct FactorMatrix {
    keys: Vec<String>,
    index: HashMap<String, usize>,
    values: Array2<f64>,
}

impl FactorMatrix {
    pub fn new(keys: Vec<String>, values: Array2<f64>) -> Result<Self> {
        if keys.len() != values.nrows() {
            return Err(RecommenderError::inconsistent(format!(
                "{} keys for {} factor rows",
                keys.len(),
                values.nrows()
            )));
        }

        let mut index = HashMap::with_capacity(keys.len());
        for (row, key) in keys.iter().enumerate() {
            if index.insert(key.clone(), row).is_some() {
                return Err(RecommenderError::inconsistent(format!(
                    "duplicate factor row key: {}",
                    key
                )));
            }
        }

        Ok(Self { keys, index, values })
    }

    pub fn factors(&self) -> usize {
        self.values.ncols()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn row_index(&self, key: &str) -> Option<usize> {
        self.index.get(key).copied()
    }

    pub fn row(&self, key: &str) -> Option<ArrayView1<'_, f64>> {
        self.row_index(key).map(|row| self.values.row(row))
    }

    pub fn row_at(&self, row: usize) -> ArrayView1<'_, f64> {
        self.values.row(row)
    }

    pub(crate) fn row_at_mut(&mut self, row: usize) -> ArrayViewMut1<'_, f64> {
        self.values.row_mut(row)
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn squared_norm(&self) -> f64 {
        self.values.iter().map(|v| v * v).sum()
    }

    /// Writes `key_header,0,1,..,K-1` followed by one line per row.
    pub fn save(&self, path: &Path, key_header: &str) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;

        let mut header = Vec::with_capacity(self.factors() + 1);
        header.push(key_header.to_string());
        header.extend((0..self.factors()).map(|k| k.to_string()));
        writer.write_record(&header)?;

        for (key, row) in self.keys.iter().zip(self.values.rows()) {
            let mut record = Vec::with_capacity(row.len() + 1);
            record.push(key.clone());
            record.extend(row.iter().map(|v| v.to_string()));
            writer.write_record(&record)?;
        }

        writer.flush()?;
        Ok(())
    }

    /// Reads a matrix written by [`FactorMatrix::save`]. Rows may appear in
    /// any order; each stays bound to its key.
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let factors = reader.headers()?.len().saturating_sub(1);

        let mut keys = Vec::new();
        let mut flat = Vec::new();
        for record in reader.records() {
            let record = record?;
            let mut fields = record.iter();
            let key = fields
                .next()
                .ok_or_else(|| RecommenderError::inconsistent("factor row without a key"))?;

            let before = flat.len();
            for field in fields {
                let value: f64 = field.trim().parse().map_err(|_| {
                    RecommenderError::inconsistent(format!(
                        "non-numeric factor value {:?} in row {}",
                        field, key
                    ))
                })?;
                flat.push(value);
            }
            if flat.len() - before != factors {
                return Err(RecommenderError::inconsistent(format!(
                    "row {} has {} factors, expected {}",
                    key,
                    flat.len() - before,
                    factors
                )));
            }
            keys.push(key.to_string());
        }

        let values = Array2::from_shape_vec((keys.len(), factors), flat)
            .map_err(|e| RecommenderError::inconsistent(e.to_string()))?;
        Self::new(keys, values)
    }
}

impl PartialEq for FactorMatrix {
    fn eq(&self, other: &Self) -> bool {
        self.factors() == other.factors()
            && self.len() == other.len()
            && self
                .keys
                .iter()
                .all(|key| match (self.row(key), other.row(key)) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                })
    }
}

/// Latent-factor model: `Q` holds one row per item, `P` one row per member.
#[derive(Debug, Clone, PartialEq)]
pub struct FactorModel {
    item_factors: FactorMatrix,
    member_factors: FactorMatrix,
    trained: bool,
}

impl FactorModel {
    /// Allocates untrained factors drawn from `[0, sqrt(10/K))`, item rows first.
    pub fn initialize(
        items: &[String],
        members: &[String],
        factors: usize,
        seed: Option<u64>,
    ) -> Result<Self> {
        if factors == 0 {
            return Err(RecommenderError::invalid_input("number of factors must be positive"));
        }

        let mut rng = initializer::rng_from_seed(seed);
        let q = initializer::bounded_uniform(&mut rng, items.len(), factors);
        let p = initializer::bounded_uniform(&mut rng, members.len(), factors);

        Self::from_parts(
            FactorMatrix::new(items.to_vec(), q)?,
            FactorMatrix::new(members.to_vec(), p)?,
            false,
        )
    }

    pub fn from_parts(item_factors: FactorMatrix, member_factors: FactorMatrix, trained: bool) -> Result<Self> {
        if item_factors.factors() != member_factors.factors() {
            return Err(RecommenderError::inconsistent(format!(
                "item factors have K={} but member factors have K={}",
                item_factors.factors(),
                member_factors.factors()
            )));
        }
        Ok(Self {
            item_factors,
            member_factors,
            trained,
        })
    }

    pub fn factors(&self) -> usize {
        self.item_factors.factors()
    }

    pub fn item_factors(&self) -> &FactorMatrix {
        &self.item_factors
    }

    pub fn member_factors(&self) -> &FactorMatrix {
        &self.member_factors
    }

    pub(crate) fn factors_mut(&mut self) -> (&mut FactorMatrix, &mut FactorMatrix) {
        (&mut self.item_factors, &mut self.member_factors)
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    pub(crate) fn mark_trained(&mut self) {
        self.trained = true;
    }

    /// Predicted rating `Q[item] . P[member]`.
    pub fn predict(&self, member_id: &str, item_id: &str) -> Result<f64> {
        let p = self.member_factors.row(member_id).ok_or_else(|| {
            RecommenderError::inconsistent(format!("member {} has no factor row", member_id))
        })?;
        let q = self.item_factors.row(item_id).ok_or_else(|| {
            RecommenderError::inconsistent(format!("item {} has no factor row", item_id))
        })?;
        Ok(q.dot(&p))
    }

    pub fn save(&self, item_path: &Path, member_path: &Path) -> Result<()> {
        self.item_factors.save(item_path, "item_code")?;
        self.member_factors.save(member_path, "member_code")?;
        Ok(())
    }

    /// Loads persisted factors. Persisted factors only exist after a
    /// completed training run, so the loaded model is trained.
    pub fn load(item_path: &Path, member_path: &Path) -> Result<Self> {
        let item_factors = FactorMatrix::load(item_path)?;
        let member_factors = FactorMatrix::load(member_path)?;
        Self::from_parts(item_factors, member_factors, true)
    }
}
