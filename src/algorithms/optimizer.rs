use super::FactorModel;
use ndarray::{ArrayViewMut1, Zip};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexedRating {
    pub item_row: usize,
    pub member_row: usize,
    pub rating: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct Sgd {
    learning_rate: f64,
    regularization: f64,
}

impl Sgd {
    pub fn new(learning_rate: f64, regularization: f64) -> Self {
        Self {
            learning_rate,
            regularization,
        }
    }

    /// Applies one simultaneous update to an item row `q` and a member row `p`.
    ///
    /// Both deltas are computed from the pre-update values:
    /// `q += lr * (e * p - 2 * reg * q)` and `p += lr * (e * q - 2 * reg * p)`
    /// with `e = 2 * (rating - q . p)`.
    pub fn update(&self, q: ArrayViewMut1<'_, f64>, p: ArrayViewMut1<'_, f64>, rating: f64) {
        let epsilon = 2.0 * (rating - q.dot(&p));
        let lr = self.learning_rate;
        let decay = 2.0 * self.regularization;

        Zip::from(q).and(p).for_each(|qk, pk| {
            let (q0, p0) = (*qk, *pk);
            *qk = q0 + lr * (epsilon * p0 - decay * q0);
            *pk = p0 + lr * (epsilon * q0 - decay * p0);
        });
    }

    pub fn epoch(&self, model: &mut FactorModel, ratings: &[IndexedRating]) {
        let (items, members) = model.factors_mut();
        for r in ratings {
            self.update(items.row_at_mut(r.item_row), members.row_at_mut(r.member_row), r.rating);
        }
    }

    /// `sum (r - q.p)^2 + reg * ||Q||^2 + reg * ||P||^2` over every row of both matrices.
    pub fn regularized_error(&self, model: &FactorModel, ratings: &[IndexedRating]) -> f64 {
        let items = model.item_factors();
        let members = model.member_factors();

        let reconstruction: f64 = ratings
            .iter()
            .map(|r| {
                let residual = r.rating - items.row_at(r.item_row).dot(&members.row_at(r.member_row));
                residual * residual
            })
            .sum();

        reconstruction + self.regularization * (items.squared_norm() + members.squared_norm())
    }
}
