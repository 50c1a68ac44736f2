// Named policies for the boundary behaviours of the incremental PCA engine.

use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

/// How NaN entries in input batches are handled.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NanPolicy {
    /// NaN entries contribute zero to sums but still count towards the row
    /// total, so they pull means towards zero instead of being skipped.
    #[default]
    ZeroFill,
    /// Any NaN entry fails the call with `PcaError::NonFiniteInput`.
    Reject,
}

/// Which requested component counts `project_point` and `project` accept.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProjectionBoundary {
    /// Both forms accept `k <= rank()` and reject `k > rank()`.
    #[default]
    Inclusive,
    /// Point projection rejects `k >= rank()`, batch projection rejects
    /// `k > rank()`. Reproduces the historical asymmetry between the two
    /// forms for parity checks.
    Legacy,
}

impl ProjectionBoundary {
    /// Whether a single-point projection onto `k` of `rank` components is allowed.
    pub fn allows_point(self, k: usize, rank: usize) -> bool {
        match self {
            ProjectionBoundary::Inclusive => k <= rank,
            ProjectionBoundary::Legacy => k < rank,
        }
    }

    /// Whether a batch projection onto `k` of `rank` components is allowed.
    pub fn allows_batch(self, k: usize, rank: usize) -> bool {
        k <= rank
    }
}

/// Quantity summed when reporting the explained-variance ratio.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VarianceRatioConvention {
    /// `sum(s[..k]) / sum(s)` over raw singular values.
    #[default]
    SingularValues,
    /// `sum(s[..k]^2) / sum(s^2)`; squared singular values are proportional
    /// to the variance along each component.
    SquaredSingularValues,
}

impl VarianceRatioConvention {
    /// Ratio of the first `k` entries of `values` to all of them.
    ///
    /// Returns `0.0` when the total is zero (e.g. a model fitted on a single row).
    pub fn ratio(self, values: ArrayView1<f64>, k: usize) -> f64 {
        let weight = |v: f64| match self {
            VarianceRatioConvention::SingularValues => v,
            VarianceRatioConvention::SquaredSingularValues => v * v,
        };
        let total: f64 = values.iter().map(|&v| weight(v)).sum();
        if total <= 0.0 {
            return 0.0;
        }
        let head: f64 = values.iter().take(k).map(|&v| weight(v)).sum();
        head / total
    }
}

/// Configuration carried by an [`IncrementalPCA`](crate::IncrementalPCA).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PcaOptions {
    pub nan_policy: NanPolicy,
    pub projection_boundary: ProjectionBoundary,
    pub variance_ratio: VarianceRatioConvention,
}

impl PcaOptions {
    pub fn with_nan_policy(mut self, nan_policy: NanPolicy) -> Self {
        self.nan_policy = nan_policy;
        self
    }

    pub fn with_projection_boundary(mut self, projection_boundary: ProjectionBoundary) -> Self {
        self.projection_boundary = projection_boundary;
        self
    }

    pub fn with_variance_ratio(mut self, variance_ratio: VarianceRatioConvention) -> Self {
        self.variance_ratio = variance_ratio;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_boundary_policies() {
        let inclusive = ProjectionBoundary::Inclusive;
        assert!(inclusive.allows_point(3, 3));
        assert!(!inclusive.allows_point(4, 3));
        assert!(inclusive.allows_batch(3, 3));
        assert!(!inclusive.allows_batch(4, 3));

        let legacy = ProjectionBoundary::Legacy;
        assert!(legacy.allows_point(2, 3));
        assert!(!legacy.allows_point(3, 3));
        assert!(legacy.allows_batch(3, 3));
    }

    #[test]
    fn test_variance_ratio_conventions() {
        let values = array![4.0, 2.0, 2.0];
        assert_abs_diff_eq!(VarianceRatioConvention::SingularValues.ratio(values.view(), 1), 0.5);
        assert_abs_diff_eq!(
            VarianceRatioConvention::SquaredSingularValues.ratio(values.view(), 1),
            16.0 / 24.0,
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(VarianceRatioConvention::SingularValues.ratio(values.view(), 3), 1.0);
        assert_eq!(VarianceRatioConvention::SingularValues.ratio(array![0.0, 0.0].view(), 1), 0.0);
    }

    #[test]
    fn test_default_options() {
        let options = PcaOptions::default();
        assert_eq!(options.nan_policy, NanPolicy::ZeroFill);
        assert_eq!(options.projection_boundary, ProjectionBoundary::Inclusive);
        assert_eq!(options.variance_ratio, VarianceRatioConvention::SingularValues);

        let tuned = options
            .with_nan_policy(NanPolicy::Reject)
            .with_variance_ratio(VarianceRatioConvention::SquaredSingularValues);
        assert_eq!(tuned.nan_policy, NanPolicy::Reject);
        assert_eq!(tuned.projection_boundary, ProjectionBoundary::Inclusive);
    }
}
