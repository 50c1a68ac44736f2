//! Streaming column moments.
//!
//! [`update_moments`] merges a new batch of rows into previously accumulated
//! per-feature statistics without revisiting earlier samples. It uses the
//! pairwise (parallel) merge of two sets of moments: the running set described
//! by `(prior_count, mean, std_dev)` and the moments of the incoming batch.
//!
//! The "variance" buffer carries a standard deviation: values are squared on
//! the way in and square-rooted on the way out.

use log::trace;
use ndarray::{Array1, ArrayView2, ArrayViewMut1, ArrayViewMut2, Zip};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{PcaError, Result};
use crate::options::NanPolicy;

/// Merges `batch` into the running statistics of `prior_count` samples using
/// the default [`NanPolicy::ZeroFill`].
///
/// * `batch` - New samples, shape `(n_rows, n_features)`.
/// * `prior_count` - Number of samples already summarised by `mean`/`std_dev`.
/// * `mean` - Running mean, length `n_features`. Overwritten with the merged mean.
/// * `std_dev` - Running standard deviation, length `n_features`, or empty to
///   skip dispersion tracking. Overwritten with the merged standard deviation.
///
/// Returns the merged sample count. When `prior_count` is zero, the batch is
/// empty or `mean` is empty, nothing is written and `prior_count` is returned:
/// seeding the statistics from a first batch is the caller's job
/// (see [`RunningMoments`]).
///
/// # Errors
/// `ShapeMismatch` if `batch.ncols() != mean.len()` or a non-empty `std_dev`
/// has a different length than `mean`.
pub fn update_moments(
    batch: ArrayView2<f64>,
    prior_count: usize,
    mean: ArrayViewMut1<f64>,
    std_dev: ArrayViewMut1<f64>,
) -> Result<usize> {
    update_moments_with_policy(batch, prior_count, mean, std_dev, NanPolicy::default())
}

/// [`update_moments`] with an explicit NaN policy.
///
/// Under [`NanPolicy::ZeroFill`] a NaN entry adds nothing to the column sum
/// but its row still counts in the denominator. Under [`NanPolicy::Reject`]
/// any NaN fails the call before the accumulators are touched.
pub fn update_moments_with_policy(
    batch: ArrayView2<f64>,
    prior_count: usize,
    mut mean: ArrayViewMut1<f64>,
    mut std_dev: ArrayViewMut1<f64>,
    nan_policy: NanPolicy,
) -> Result<usize> {
    let (n_new, n_features) = batch.dim();
    if n_features != mean.len() {
        return Err(PcaError::shape_mismatch(format!(
            "batch has {} columns but mean has {} entries",
            n_features,
            mean.len()
        )));
    }
    let track_dispersion = !std_dev.is_empty();
    if track_dispersion && std_dev.len() != mean.len() {
        return Err(PcaError::shape_mismatch(format!(
            "std_dev has {} entries but mean has {}",
            std_dev.len(),
            mean.len()
        )));
    }
    check_nan_policy(batch, nan_policy, "moment update batch")?;

    if prior_count == 0 || n_new == 0 || mean.is_empty() {
        trace!(
            "Moment update skipped (prior_count={}, batch rows={}, features={})",
            prior_count,
            n_new,
            mean.len()
        );
        return Ok(prior_count);
    }

    let n_prior_f = prior_count as f64;
    let n_new_f = n_new as f64;
    let n_total = prior_count + n_new;
    let n_total_f = n_total as f64;

    let batch_stats = BatchStatistics::compute(batch, track_dispersion);

    if track_dispersion {
        // Chan et al. pairwise merge of second moments.
        let cross_weight = n_prior_f * n_new_f / n_total_f;
        Zip::from(&mut std_dev)
            .and(&mean)
            .and(&batch_stats.mean)
            .and(&batch_stats.variance)
            .for_each(|sd, &prior_mean, &batch_mean, &batch_var| {
                let delta = prior_mean - batch_mean;
                let merged = (*sd * *sd * n_prior_f + batch_var * n_new_f + cross_weight * delta * delta)
                    / n_total_f;
                *sd = merged.max(0.0).sqrt();
            });
    }

    Zip::from(&mut mean)
        .and(&batch_stats.sums)
        .for_each(|m, &sum| *m = (*m * n_prior_f + sum) / n_total_f);

    trace!("Merged {} rows into moments of {} samples -> {}", n_new, prior_count, n_total);
    Ok(n_total)
}

/// Column sums, means and population variances of one batch with NaN read as zero.
pub(crate) struct BatchStatistics {
    pub sums: Array1<f64>,
    pub mean: Array1<f64>,
    /// Empty unless requested.
    pub variance: Array1<f64>,
}

impl BatchStatistics {
    pub(crate) fn compute(batch: ArrayView2<f64>, with_variance: bool) -> Self {
        let (n_rows, n_features) = batch.dim();
        let n_rows_f = n_rows.max(1) as f64;

        let sums: Array1<f64> = (0..n_features)
            .into_par_iter()
            .map(|j| batch.column(j).iter().filter(|v| !v.is_nan()).sum::<f64>())
            .collect::<Vec<f64>>()
            .into();
        let mean = sums.mapv(|s| s / n_rows_f);

        let variance: Array1<f64> = if with_variance {
            (0..n_features)
                .into_par_iter()
                .map(|j| {
                    let m = mean[j];
                    let squared: f64 = batch
                        .column(j)
                        .iter()
                        .map(|&v| {
                            let x = if v.is_nan() { 0.0 } else { v };
                            (x - m) * (x - m)
                        })
                        .sum();
                    squared / n_rows_f
                })
                .collect::<Vec<f64>>()
                .into()
        } else {
            Array1::zeros(0)
        };

        Self { sums, mean, variance }
    }
}

/// Fails with `NonFiniteInput` when `data` holds NaN and the policy rejects it.
pub(crate) fn check_nan_policy(data: ArrayView2<f64>, nan_policy: NanPolicy, context: &str) -> Result<()> {
    if nan_policy == NanPolicy::Reject {
        if let Some(((row, col), _)) = data.indexed_iter().find(|(_, v)| v.is_nan()) {
            return Err(PcaError::NonFiniteInput(format!(
                "{} contains NaN at row {}, column {}",
                context, row, col
            )));
        }
    }
    Ok(())
}

/// Applies the NaN policy to an owned working copy: zero-fills or rejects.
pub(crate) fn apply_nan_policy(mut data: ArrayViewMut2<f64>, nan_policy: NanPolicy, context: &str) -> Result<()> {
    check_nan_policy(data.view(), nan_policy, context)?;
    data.par_mapv_inplace(|v| if v.is_nan() { 0.0 } else { v });
    Ok(())
}

/// Owned per-feature running mean and standard deviation.
///
/// The first non-empty batch seeds the statistics directly; every later batch is
/// folded in through [`update_moments_with_policy`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RunningMoments {
    count: usize,
    mean: Array1<f64>,
    std_dev: Array1<f64>,
    nan_policy: NanPolicy,
}

impl RunningMoments {
    /// Creates an empty accumulator for `n_features` columns.
    pub fn new(n_features: usize) -> Self {
        Self {
            count: 0,
            mean: Array1::zeros(n_features),
            std_dev: Array1::zeros(n_features),
            nan_policy: NanPolicy::default(),
        }
    }

    pub fn with_nan_policy(mut self, nan_policy: NanPolicy) -> Self {
        self.nan_policy = nan_policy;
        self
    }

    /// Folds `batch` into the statistics and returns the new sample count.
    ///
    /// # Errors
    /// `DimensionMismatch` if the batch width differs from the accumulator's,
    /// `NonFiniteInput` if the batch holds NaN under [`NanPolicy::Reject`].
    pub fn push_batch(&mut self, batch: ArrayView2<f64>) -> Result<usize> {
        if batch.ncols() != self.mean.len() {
            return Err(PcaError::dimension_mismatch(self.mean.len(), batch.ncols()));
        }
        if batch.nrows() == 0 {
            return Ok(self.count);
        }

        if self.count == 0 {
            check_nan_policy(batch, self.nan_policy, "first moment batch")?;
            let stats = BatchStatistics::compute(batch, true);
            self.mean = stats.mean;
            self.std_dev = stats.variance.mapv(f64::sqrt);
            self.count = batch.nrows();
        } else {
            self.count = update_moments_with_policy(
                batch,
                self.count,
                self.mean.view_mut(),
                self.std_dev.view_mut(),
                self.nan_policy,
            )?;
        }
        Ok(self.count)
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    /// Population standard deviation per feature.
    pub fn std_dev(&self) -> &Array1<f64> {
        &self.std_dev
    }

    /// Population variance per feature.
    pub fn variance(&self) -> Array1<f64> {
        self.std_dev.mapv(|sd| sd * sd)
    }

    /// Forgets every sample while keeping the feature count.
    pub fn reset(&mut self) {
        self.count = 0;
        self.mean.fill(0.0);
        self.std_dev.fill(0.0);
    }
}

impl Default for RunningMoments {
    fn default() -> Self {
        Self::new(0)
    }
}
