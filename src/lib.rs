// Incremental principal component analysis (PCA) for streaming feature frames

#![doc = include_str!("../README.md")]

pub mod error;
pub mod linalg_backends;
pub mod options;
pub mod pca;
pub mod streaming_moments;

pub use error::{PcaError, Result};
pub use options::{NanPolicy, PcaOptions, ProjectionBoundary, VarianceRatioConvention};
pub use pca::{build_augmented_matrix, IncrementalPCA, Projection, Subspace};
pub use streaming_moments::{update_moments, update_moments_with_policy, RunningMoments};
