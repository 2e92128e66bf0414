use crate::error::{AppError, Result};
use ndarray::{Array1, Array2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::tree::decision_tree_regressor::{
    DecisionTreeRegressor, DecisionTreeRegressorParameters,
};

type Tree = DecisionTreeRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>;

/// Ensemble hyperparameters selected by the grid search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForestParams {
    /// Number of trees in the ensemble
    pub n_trees: usize,

    /// Maximum depth of each tree
    pub max_depth: u16,

    /// Minimum number of samples required to split a node
    pub min_samples_split: usize,
}

impl std::fmt::Display for ForestParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "n_trees={}, max_depth={}, min_samples_split={}",
            self.n_trees, self.max_depth, self.min_samples_split
        )
    }
}

/// Random forest regressor: bootstrap-aggregated regression trees.
///
/// Each tree sees a bootstrap resample of the rows (all features), and the
/// prediction is the mean of the tree outputs. Resampling is driven by a
/// seeded ChaCha generator, so a given `(params, seed, data)` always produces
/// the same forest regardless of how many threads fit the trees.
#[derive(Serialize, Deserialize)]
pub struct RandomForestRegressor {
    params: ForestParams,
    seed: u64,
    bootstrap: bool,
    n_features: usize,
    trees: Vec<Tree>,
}

impl RandomForestRegressor {
    /// Fit a forest with bootstrap resampling
    pub fn fit(
        x: &Array2<f64>,
        y: &Array1<f64>,
        params: ForestParams,
        seed: u64,
    ) -> Result<Self> {
        Self::fit_with(x, y, params, seed, true)
    }

    /// Fit a forest, optionally training every tree on all rows
    pub fn fit_with(
        x: &Array2<f64>,
        y: &Array1<f64>,
        params: ForestParams,
        seed: u64,
        bootstrap: bool,
    ) -> Result<Self> {
        let (n_samples, n_features) = x.dim();

        if n_samples == 0 {
            return Err(AppError::Training("cannot fit a forest on zero rows".to_string()));
        }
        if n_features == 0 {
            return Err(AppError::Training(
                "cannot fit a forest on zero features".to_string(),
            ));
        }
        if y.len() != n_samples {
            return Err(AppError::Training(format!(
                "feature rows ({}) and targets ({}) differ in length",
                n_samples,
                y.len()
            )));
        }
        if params.n_trees == 0 {
            return Err(AppError::Training("n_trees must be positive".to_string()));
        }

        // Draw all resamples up front so tree fitting order cannot affect them
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let resamples: Vec<Vec<usize>> = (0..params.n_trees)
            .map(|_| {
                if bootstrap {
                    (0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect()
                } else {
                    (0..n_samples).collect()
                }
            })
            .collect();

        let tree_params = DecisionTreeRegressorParameters::default()
            .with_max_depth(params.max_depth)
            .with_min_samples_split(params.min_samples_split);

        let trees = resamples
            .par_iter()
            .map(|rows| {
                let (xs, ys) = Self::gather_rows(x, y, rows);
                DecisionTreeRegressor::fit(&xs, &ys, tree_params.clone())
                    .map_err(|e| AppError::Training(format!("Failed to fit regression tree: {}", e)))
            })
            .collect::<Result<Vec<Tree>>>()?;

        Ok(Self {
            params,
            seed,
            bootstrap,
            n_features,
            trees,
        })
    }

    /// Predict one score per row
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let (n_samples, n_features) = x.dim();
        if n_features != self.n_features {
            return Err(AppError::Prediction(format!(
                "expected {} features, got {}",
                self.n_features, n_features
            )));
        }
        if n_samples == 0 {
            return Ok(Array1::zeros(0));
        }

        let xs = to_dense_matrix(x);
        let per_tree = self
            .trees
            .par_iter()
            .map(|tree| {
                tree.predict(&xs)
                    .map_err(|e| AppError::Prediction(format!("Tree prediction failed: {}", e)))
            })
            .collect::<Result<Vec<Vec<f64>>>>()?;

        // Sum in tree order so the float result does not depend on scheduling
        let mut sums = Array1::<f64>::zeros(n_samples);
        for outputs in &per_tree {
            for (acc, value) in sums.iter_mut().zip(outputs) {
                *acc += value;
            }
        }

        Ok(sums / self.trees.len() as f64)
    }

    pub fn params(&self) -> ForestParams {
        self.params
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    fn gather_rows(x: &Array2<f64>, y: &Array1<f64>, rows: &[usize]) -> (DenseMatrix<f64>, Vec<f64>) {
        let n_features = x.ncols();
        let mut data = Vec::with_capacity(rows.len() * n_features);
        let mut targets = Vec::with_capacity(rows.len());
        for &row in rows {
            data.extend(x.row(row).iter().copied());
            targets.push(y[row]);
        }
        (DenseMatrix::new(rows.len(), n_features, data, false), targets)
    }
}

impl std::fmt::Debug for RandomForestRegressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RandomForestRegressor")
            .field("params", &self.params)
            .field("seed", &self.seed)
            .field("bootstrap", &self.bootstrap)
            .field("n_features", &self.n_features)
            .field("n_trees", &self.trees.len())
            .finish()
    }
}

fn to_dense_matrix(arr: &Array2<f64>) -> DenseMatrix<f64> {
    let (rows, cols) = arr.dim();
    let data: Vec<f64> = arr.iter().copied().collect();
    DenseMatrix::new(rows, cols, data, false)
}

/// Mean squared error between two equally long score vectors
pub fn mean_squared_error(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let sum: f64 = y_true
        .iter()
        .zip(y_pred.iter())
        .map(|(t, p)| (t - p).powi(2))
        .sum();
    sum / y_true.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn params(n_trees: usize) -> ForestParams {
        ForestParams {
            n_trees,
            max_depth: 10,
            min_samples_split: 2,
        }
    }

    fn step_dataset() -> (Array2<f64>, Array1<f64>) {
        let n = 40;
        let x = Array2::from_shape_fn((n, 2), |(i, j)| if j == 0 { i as f64 } else { (i % 4) as f64 });
        let y = Array1::from_shape_fn(n, |i| if i < 20 { 2.0 } else { 8.0 });
        (x, y)
    }

    #[test]
    fn test_fit_and_predict_step_function() {
        let (x, y) = step_dataset();
        let forest = RandomForestRegressor::fit(&x, &y, params(25), 42).unwrap();

        assert_eq!(forest.n_trees(), 25);
        assert_eq!(forest.n_features(), 2);

        let preds = forest.predict(&array![[2.0, 2.0], [37.0, 1.0]]).unwrap();
        assert!((preds[0] - 2.0).abs() < 1.0);
        assert!((preds[1] - 8.0).abs() < 1.0);
    }

    #[test]
    fn test_same_seed_is_reproducible() {
        let (x, y) = step_dataset();
        let a = RandomForestRegressor::fit(&x, &y, params(10), 7).unwrap();
        let b = RandomForestRegressor::fit(&x, &y, params(10), 7).unwrap();

        assert_eq!(a.predict(&x).unwrap(), b.predict(&x).unwrap());
    }

    #[test]
    fn test_without_bootstrap_fits_training_rows_exactly() {
        let x = array![[1.0, 0.0], [0.0, 1.0]];
        let y = array![6.1, 8.5];
        let forest = RandomForestRegressor::fit_with(&x, &y, params(5), 42, false).unwrap();

        let preds = forest.predict(&x).unwrap();
        assert!((preds[0] - 6.1).abs() < 1e-9);
        assert!((preds[1] - 8.5).abs() < 1e-9);
    }

    #[test]
    fn test_out_of_range_input_is_well_defined() {
        let (x, y) = step_dataset();
        let forest = RandomForestRegressor::fit(&x, &y, params(10), 1).unwrap();

        let preds = forest.predict(&array![[1.0e6, -50.0]]).unwrap();
        assert!(preds[0] >= 2.0 && preds[0] <= 8.0);
    }

    #[test]
    fn test_feature_count_mismatch() {
        let (x, y) = step_dataset();
        let forest = RandomForestRegressor::fit(&x, &y, params(3), 1).unwrap();

        let result = forest.predict(&array![[1.0, 2.0, 3.0]]);
        assert!(matches!(result, Err(AppError::Prediction(_))));
    }

    #[test]
    fn test_rejects_empty_input() {
        let x = Array2::<f64>::zeros((0, 3));
        let y = Array1::<f64>::zeros(0);
        assert!(RandomForestRegressor::fit(&x, &y, params(3), 1).is_err());
    }

    #[test]
    fn test_mean_squared_error() {
        let truth = array![1.0, 2.0, 3.0];
        let pred = array![1.0, 3.0, 5.0];
        assert!((mean_squared_error(&truth, &pred) - 5.0 / 3.0).abs() < 1e-12);
        let empty = Array1::<f64>::zeros(0);
        assert_eq!(mean_squared_error(&empty, &empty), 0.0);
    }
}
