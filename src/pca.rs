// Incremental principal component analysis (PCA)

use log::{debug, info, trace, warn};
use ndarray::{concatenate, s, Array1, Array2, ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2, Axis};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::error::{PcaError, Result};
use crate::linalg_backends::{thin_right_svd, LinAlgBackendProvider};
use crate::options::{NanPolicy, PcaOptions, VarianceRatioConvention};
use crate::streaming_moments::{apply_nan_policy, check_nan_policy, update_moments_with_policy, BatchStatistics};

/// The learned part of a PCA model: the flat (bases, singular values, mean) triple.
///
/// This is also the on-disk format written by [`IncrementalPCA::save_model`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Subspace {
    /// Principal axes as orthonormal columns, ordered by descending singular value.
    /// Shape: (n_features, rank)
    pub bases: Array2<f64>,
    /// Singular values index-aligned with the columns of `bases`.
    /// Shape: (rank)
    pub singular_values: Array1<f64>,
    /// Centroid of every sample folded into the model.
    /// Shape: (n_features)
    pub mean: Array1<f64>,
}

/// Scores produced by a batch projection.
#[derive(Debug, Clone)]
pub struct Projection {
    /// Shape: (n_samples, k)
    pub scores: Array2<f64>,
    /// Share of the model's singular-value mass carried by the first `k`
    /// components, under the model's [`VarianceRatioConvention`].
    pub explained_variance_ratio: f64,
}

/// Incremental principal component analysis.
///
/// The model is created empty, becomes initialized through [`fit`](Self::fit) or
/// [`load`](Self::load), and can then be refined batch by batch with
/// [`update`](Self::update) without revisiting earlier samples. Each update runs
/// an SVD over `rank + n_rows + 1` rows regardless of how much data has been seen.
///
/// Mutators build the whole replacement [`Subspace`] before committing it, so a
/// failed call never leaves a partially updated model behind.
///
/// # Examples
///
/// ```no_run
/// use ndarray::array;
/// use streaming_pca::IncrementalPCA;
///
/// let mut pca = IncrementalPCA::new();
/// pca.fit(array![[1.0, 2.0], [3.0, 4.1], [5.0, 6.3]].view()).unwrap();
/// pca.update(array![[7.0, 8.2], [9.0, 10.6]].view()).unwrap();
/// assert_eq!(pca.samples_seen(), 5);
/// let scores = pca.project_point(array![2.0, 3.0].view(), 1).unwrap();
/// assert_eq!(scores.len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct IncrementalPCA {
    subspace: Option<Subspace>,
    samples_seen: usize,
    options: PcaOptions,
}

impl IncrementalPCA {
    /// Creates a new, empty model with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new, empty model with the given options.
    pub fn with_options(options: PcaOptions) -> Self {
        Self {
            subspace: None,
            samples_seen: 0,
            options,
        }
    }

    /// Policies currently applied by fit, update and projection.
    pub fn options(&self) -> PcaOptions {
        self.options
    }

    /// Replaces the policies; the learned model is left as is.
    pub fn set_options(&mut self, options: PcaOptions) {
        self.options = options;
    }

    /// Fits the model to `data` from scratch.
    ///
    /// Centers the data on its column means and keeps the right singular
    /// vectors of the thin SVD as the basis, so the rank is
    /// `min(n_samples, n_features)`. The sample count becomes `n_samples`.
    ///
    /// * `data` - Input data, shape (n_samples, n_features).
    ///
    /// # Errors
    /// `EmptyInput` if `data` has no rows or no columns, `NonFiniteInput` if it
    /// holds NaN under [`NanPolicy::Reject`], `Decomposition` if the SVD fails.
    pub fn fit(&mut self, data: ArrayView2<f64>) -> Result<()> {
        let (n_samples, n_features) = data.dim();
        if n_samples == 0 || n_features == 0 {
            return Err(PcaError::EmptyInput(format!(
                "fit needs at least one sample and one feature, got {}x{}",
                n_samples, n_features
            )));
        }

        let mut centered = data.to_owned();
        apply_nan_policy(centered.view_mut(), self.options.nan_policy, "fit data")?;
        let mean = centered
            .mean_axis(Axis(0))
            .ok_or_else(|| PcaError::EmptyInput("failed to compute the mean of the fit data".into()))?;
        centered -= &mean;

        let (singular_values, bases) = thin_right_svd(&LinAlgBackendProvider::new(), centered)?;
        debug_assert!(is_non_increasing(singular_values.view()));

        info!(
            "Fitted PCA on {}x{} data: rank {}, leading singular value {:.6}",
            n_samples,
            n_features,
            bases.ncols(),
            singular_values.get(0).copied().unwrap_or(0.0)
        );
        self.subspace = Some(Subspace {
            bases,
            singular_values,
            mean,
        });
        self.samples_seen = n_samples;
        Ok(())
    }

    /// Installs a precomputed model, e.g. one trained elsewhere and serialized.
    ///
    /// * `bases` - Principal axes as columns, shape (n_features, rank).
    /// * `singular_values` - One non-negative value per column of `bases`.
    /// * `mean` - Training centroid, shape (n_features).
    ///
    /// The sample count is **not** changed: it keeps whatever value the model
    /// had before (zero for a fresh model). An [`update`](Self::update) after a
    /// bare `load` therefore treats the loaded subspace as carrying no sample
    /// history. Use [`load_with_samples_seen`](Self::load_with_samples_seen) or
    /// [`set_samples_seen`](Self::set_samples_seen) when the history is known.
    ///
    /// # Errors
    /// `EmptyInput` for a model without features, `ShapeMismatch` when the three
    /// parts disagree in shape, `NonFiniteInput` for NaN or infinite entries and
    /// `InvalidArgument` for negative singular values.
    pub fn load(
        &mut self,
        bases: ArrayView2<f64>,
        singular_values: ArrayView1<f64>,
        mean: ArrayView1<f64>,
    ) -> Result<()> {
        let subspace = validated_subspace(bases, singular_values, mean)?;
        debug!(
            "Loaded PCA model with {} features and {} components (samples_seen stays {})",
            subspace.bases.nrows(),
            subspace.bases.ncols(),
            self.samples_seen
        );
        self.subspace = Some(subspace);
        Ok(())
    }

    /// [`load`](Self::load) that also restores the number of samples the
    /// model was trained on.
    pub fn load_with_samples_seen(
        &mut self,
        bases: ArrayView2<f64>,
        singular_values: ArrayView1<f64>,
        mean: ArrayView1<f64>,
        samples_seen: usize,
    ) -> Result<()> {
        let subspace = validated_subspace(bases, singular_values, mean)?;
        self.subspace = Some(subspace);
        self.samples_seen = samples_seen;
        Ok(())
    }

    /// Overrides the number of samples the model is assumed to summarise.
    pub fn set_samples_seen(&mut self, samples_seen: usize) {
        self.samples_seen = samples_seen;
    }

    /// Projects a single point onto the first `k` principal components,
    /// writing the `k` scores into `out`.
    ///
    /// Computes `(point - mean) . bases[:, ..k]`.
    ///
    /// # Errors
    /// `NotInitialized`, `DimensionMismatch` if `point.len() != dims()`,
    /// `InvalidArgument` if `k` is outside the configured
    /// [`ProjectionBoundary`](crate::ProjectionBoundary), `ShapeMismatch` if
    /// `out.len() != k`, `NonFiniteInput` for NaN under [`NanPolicy::Reject`].
    pub fn project_point_into(&self, point: ArrayView1<f64>, mut out: ArrayViewMut1<f64>, k: usize) -> Result<()> {
        let subspace = self.fitted()?;
        let rank = subspace.bases.ncols();
        if point.len() != subspace.bases.nrows() {
            return Err(PcaError::dimension_mismatch(subspace.bases.nrows(), point.len()));
        }
        if !self.options.projection_boundary.allows_point(k, rank) {
            return Err(PcaError::invalid_argument(format!(
                "cannot project onto {} components, model has {} ({:?} boundary)",
                k, rank, self.options.projection_boundary
            )));
        }
        if out.len() != k {
            return Err(PcaError::shape_mismatch(format!(
                "output holds {} values, {} components requested",
                out.len(),
                k
            )));
        }
        check_nan_policy(point.insert_axis(Axis(0)), self.options.nan_policy, "projected point")?;

        let centered = ndarray::Zip::from(&point)
            .and(&subspace.mean)
            .map_collect(|&x, &m| (if x.is_nan() { 0.0 } else { x }) - m);
        out.assign(&centered.dot(&subspace.bases.slice(s![.., ..k])));
        Ok(())
    }

    /// Allocating form of [`project_point_into`](Self::project_point_into).
    pub fn project_point(&self, point: ArrayView1<f64>, k: usize) -> Result<Array1<f64>> {
        let mut out = Array1::zeros(k);
        self.project_point_into(point, out.view_mut(), k)?;
        Ok(out)
    }

    /// Projects every row of `data` onto the first `k` principal components,
    /// writing the scores into `out` (shape (n_samples, k)).
    ///
    /// Returns the explained-variance ratio of the first `k` components under
    /// the model's [`VarianceRatioConvention`]. With the default
    /// `SingularValues` convention this is `sum(s[..k]) / sum(s)` over raw
    /// singular values, which is not a variance share;
    /// `SquaredSingularValues` gives the conventional statistic.
    ///
    /// # Errors
    /// As [`project_point_into`](Self::project_point_into), with
    /// `ShapeMismatch` when `out` is not (n_samples, k).
    pub fn project_into(&self, data: ArrayView2<f64>, mut out: ArrayViewMut2<f64>, k: usize) -> Result<f64> {
        let subspace = self.fitted()?;
        let rank = subspace.bases.ncols();
        if data.ncols() != subspace.bases.nrows() {
            return Err(PcaError::dimension_mismatch(subspace.bases.nrows(), data.ncols()));
        }
        if !self.options.projection_boundary.allows_batch(k, rank) {
            return Err(PcaError::invalid_argument(format!(
                "cannot project onto {} components, model has {} ({:?} boundary)",
                k, rank, self.options.projection_boundary
            )));
        }
        if out.dim() != (data.nrows(), k) {
            return Err(PcaError::shape_mismatch(format!(
                "output is {:?}, expected ({}, {})",
                out.dim(),
                data.nrows(),
                k
            )));
        }

        let mut centered = data.to_owned();
        apply_nan_policy(centered.view_mut(), self.options.nan_policy, "projected data")?;
        centered -= &subspace.mean;
        out.assign(&centered.dot(&subspace.bases.slice(s![.., ..k])));

        let ratio = self.options.variance_ratio.ratio(subspace.singular_values.view(), k);
        trace!("Projected {} rows onto {} components, explained ratio {:.6}", data.nrows(), k, ratio);
        Ok(ratio)
    }

    /// Allocating form of [`project_into`](Self::project_into).
    pub fn project(&self, data: ArrayView2<f64>, k: usize) -> Result<Projection> {
        let mut scores = Array2::zeros((data.nrows(), k));
        let explained_variance_ratio = self.project_into(data, scores.view_mut(), k)?;
        Ok(Projection {
            scores,
            explained_variance_ratio,
        })
    }

    /// Explained-variance ratio of the first `k` components under the model's
    /// configured convention.
    pub fn explained_variance_ratio(&self, k: usize) -> Result<f64> {
        self.explained_variance_ratio_with(k, self.options.variance_ratio)
    }

    /// Explained-variance ratio of the first `k` components under `convention`.
    ///
    /// # Errors
    /// `NotInitialized`, or `InvalidArgument` if `k > rank()`.
    pub fn explained_variance_ratio_with(&self, k: usize, convention: VarianceRatioConvention) -> Result<f64> {
        let subspace = self.fitted()?;
        if k > subspace.singular_values.len() {
            return Err(PcaError::invalid_argument(format!(
                "requested {} components, model has {}",
                k,
                subspace.singular_values.len()
            )));
        }
        Ok(convention.ratio(subspace.singular_values.view(), k))
    }

    /// Folds a new batch into the model without revisiting earlier samples.
    ///
    /// 1. The running mean and sample count are merged with the batch moments.
    /// 2. The batch is centered on its own mean.
    /// 3. A mean-correction row `sqrt(n * r / (n + r)) * (old_mean - batch_mean)`
    ///    accounts for the centroid shift between the old and new data.
    /// 4. The previous axes scaled by their singular values, the centered batch
    ///    and the correction row are stacked (see [`build_augmented_matrix`]).
    /// 5. The thin SVD of that stack gives the new axes and singular values.
    ///
    /// The feature count is preserved; the rank becomes
    /// `min(rank + n_rows + 1, n_features)`. An empty batch is a no-op.
    ///
    /// If the model has no recorded history (a bare [`load`](Self::load)), the
    /// batch is treated as the first data seen: the mean becomes the batch mean
    /// and the correction row is zero.
    ///
    /// # Errors
    /// `NotInitialized`, `DimensionMismatch` if `batch.ncols() != dims()`,
    /// `NonFiniteInput` for NaN under [`NanPolicy::Reject`], `Decomposition` if
    /// the SVD fails.
    pub fn update(&mut self, batch: ArrayView2<f64>) -> Result<()> {
        let subspace = self.fitted()?;
        let n_features = subspace.bases.nrows();
        if batch.ncols() != n_features {
            return Err(PcaError::dimension_mismatch(n_features, batch.ncols()));
        }
        let n_new = batch.nrows();
        if n_new == 0 {
            debug!("Skipping PCA update with an empty batch");
            return Ok(());
        }

        let mut centered = batch.to_owned();
        apply_nan_policy(centered.view_mut(), self.options.nan_policy, "update batch")?;

        let prior_count = self.samples_seen;
        let batch_stats = BatchStatistics::compute(centered.view(), false);
        let (global_mean, n_total) = if prior_count == 0 {
            warn!(
                "Updating a PCA model with no recorded sample history; \
                 restore it with load_with_samples_seen or set_samples_seen after load"
            );
            (batch_stats.mean.clone(), n_new)
        } else {
            let mut global_mean = subspace.mean.clone();
            let mut untracked = Array1::<f64>::zeros(0);
            let n_total = update_moments_with_policy(
                centered.view(),
                prior_count,
                global_mean.view_mut(),
                untracked.view_mut(),
                NanPolicy::ZeroFill,
            )?;
            (global_mean, n_total)
        };

        let correction_scale = (prior_count as f64 * n_new as f64 / n_total as f64).sqrt();
        let correction = (&subspace.mean - &batch_stats.mean) * correction_scale;
        centered -= &batch_stats.mean;

        let augmented = build_augmented_matrix(
            subspace.bases.view(),
            subspace.singular_values.view(),
            centered.view(),
            correction.view(),
        )?;
        trace!("Augmented update matrix has shape {:?}", augmented.dim());
        let previous_rank = subspace.bases.ncols();

        let (singular_values, bases) = thin_right_svd(&LinAlgBackendProvider::new(), augmented)?;
        debug_assert!(is_non_increasing(singular_values.view()));

        info!(
            "Updated PCA with {} rows: samples {} -> {}, rank {} -> {}",
            n_new,
            prior_count,
            n_total,
            previous_rank,
            bases.ncols()
        );
        self.subspace = Some(Subspace {
            bases,
            singular_values,
            mean: global_mean,
        });
        self.samples_seen = n_total;
        Ok(())
    }

    /// Whether `fit` or `load` has succeeded since creation or the last `clear`.
    pub fn initialized(&self) -> bool {
        self.subspace.is_some()
    }

    /// Number of features (rows of the basis); zero when uninitialized.
    pub fn dims(&self) -> usize {
        self.subspace.as_ref().map_or(0, |s| s.bases.nrows())
    }

    /// Number of retained components (columns of the basis); zero when uninitialized.
    pub fn rank(&self) -> usize {
        self.subspace.as_ref().map_or(0, |s| s.bases.ncols())
    }

    /// Alias of [`rank`](Self::rank).
    pub fn size(&self) -> usize {
        self.rank()
    }

    /// Number of samples folded into the mean and basis.
    pub fn samples_seen(&self) -> usize {
        self.samples_seen
    }

    /// Principal axes, shape (n_features, rank).
    pub fn bases(&self) -> Option<&Array2<f64>> {
        self.subspace.as_ref().map(|s| &s.bases)
    }

    /// Singular values in descending order, shape (rank).
    pub fn singular_values(&self) -> Option<&Array1<f64>> {
        self.subspace.as_ref().map(|s| &s.singular_values)
    }

    /// Centroid of all samples seen, shape (n_features).
    pub fn mean(&self) -> Option<&Array1<f64>> {
        self.subspace.as_ref().map(|s| &s.mean)
    }

    /// The full learned (bases, singular values, mean) triple.
    pub fn subspace(&self) -> Option<&Subspace> {
        self.subspace.as_ref()
    }

    /// Drops the learned model and resets the sample count. Options are kept.
    pub fn clear(&mut self) {
        self.subspace = None;
        self.samples_seen = 0;
    }

    /// Saves the (bases, singular values, mean) triple to a file using bincode.
    ///
    /// The sample count is not part of the format.
    ///
    /// # Errors
    /// `NotInitialized`, or `Persistence` on I/O or serialization failure.
    pub fn save_model<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let subspace = self.fitted()?;
        let file = File::create(path.as_ref())
            .map_err(|e| PcaError::Persistence(format!("Failed to create file at {:?}: {}", path.as_ref(), e)))?;
        let mut writer = BufWriter::new(file);
        bincode::serde::encode_into_std_write(subspace, &mut writer, bincode::config::standard())
            .map_err(|e| PcaError::Persistence(format!("Failed to serialize PCA model: {}", e)))?;
        Ok(())
    }

    /// Loads a model previously written by [`save_model`](Self::save_model).
    ///
    /// The result has default options and a sample count of zero, exactly as
    /// if [`load`](Self::load) had been called on a fresh model.
    ///
    /// # Errors
    /// `Persistence` on I/O or deserialization failure, or any error of
    /// [`load`](Self::load) if the stored triple is inconsistent.
    pub fn load_model<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())
            .map_err(|e| PcaError::Persistence(format!("Failed to open file at {:?}: {}", path.as_ref(), e)))?;
        let mut reader = BufReader::new(file);
        let stored: Subspace = bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())
            .map_err(|e| PcaError::Persistence(format!("Failed to deserialize PCA model: {}", e)))?;

        let mut pca = Self::new();
        pca.load(stored.bases.view(), stored.singular_values.view(), stored.mean.view())?;
        Ok(pca)
    }

    fn fitted(&self) -> Result<&Subspace> {
        self.subspace.as_ref().ok_or(PcaError::NotInitialized)
    }
}

/// Stacks the rows that the incremental SVD decomposes.
///
/// * `bases` - Previous axes, shape (n_features, rank).
/// * `singular_values` - Previous singular values, length rank.
/// * `centered_batch` - New rows centered on their own mean, shape (n_rows, n_features).
/// * `mean_correction` - Centroid-shift row, length n_features.
///
/// Returns `[(bases * diag(singular_values))^T; centered_batch; mean_correction]`
/// with shape (rank + n_rows + 1, n_features).
pub fn build_augmented_matrix(
    bases: ArrayView2<f64>,
    singular_values: ArrayView1<f64>,
    centered_batch: ArrayView2<f64>,
    mean_correction: ArrayView1<f64>,
) -> Result<Array2<f64>> {
    let (n_features, rank) = bases.dim();
    if singular_values.len() != rank {
        return Err(PcaError::shape_mismatch(format!(
            "{} singular values for {} basis columns",
            singular_values.len(),
            rank
        )));
    }
    if centered_batch.ncols() != n_features || mean_correction.len() != n_features {
        return Err(PcaError::shape_mismatch(format!(
            "basis has {} features, batch has {}, correction has {}",
            n_features,
            centered_batch.ncols(),
            mean_correction.len()
        )));
    }

    let weighted_components = (&bases * &singular_values).reversed_axes();
    let correction_row = mean_correction.to_owned().insert_axis(Axis(0));
    concatenate(
        Axis(0),
        &[
            weighted_components.view(),
            centered_batch.view(),
            correction_row.view(),
        ],
    )
    .map_err(|e| PcaError::shape_mismatch(format!("failed to stack augmented matrix: {}", e)))
}

fn validated_subspace(
    bases: ArrayView2<f64>,
    singular_values: ArrayView1<f64>,
    mean: ArrayView1<f64>,
) -> Result<Subspace> {
    let (n_features, rank) = bases.dim();
    if n_features == 0 {
        return Err(PcaError::EmptyInput("model bases have no features".into()));
    }
    if mean.len() != n_features {
        return Err(PcaError::shape_mismatch(format!(
            "bases have {} features but mean has {}",
            n_features,
            mean.len()
        )));
    }
    if singular_values.len() != rank {
        return Err(PcaError::shape_mismatch(format!(
            "bases have {} components but {} singular values were given",
            rank,
            singular_values.len()
        )));
    }
    let all_finite = bases.iter().chain(singular_values.iter()).chain(mean.iter()).all(|v| v.is_finite());
    if !all_finite {
        return Err(PcaError::NonFiniteInput("loaded model contains NaN or infinite values".into()));
    }
    if singular_values.iter().any(|&v| v < 0.0) {
        return Err(PcaError::invalid_argument("singular values must be non-negative"));
    }
    if !is_non_increasing(singular_values) {
        warn!("Loaded singular values are not in descending order; projections keep the given column order");
    }

    Ok(Subspace {
        bases: bases.to_owned(),
        singular_values: singular_values.to_owned(),
        mean: mean.to_owned(),
    })
}

fn is_non_increasing(values: ArrayView1<f64>) -> bool {
    values.windows(2).into_iter().all(|w| w[0] >= w[1] - 1e-12 * w[0].abs().max(1.0))
}
