// src/linalg_backends.rs

use ndarray::{s, Array1, Array2};
use std::error::Error;

use crate::error::{PcaError, Result};

/// A thread-safe wrapper for backend errors, so they implement `Send` and `Sync`.
pub type ThreadSafeStdError = Box<dyn Error + Send + Sync + 'static>;

/// Output of a Singular Value Decomposition.
///
/// `s` is ordered from largest to smallest. `vt` may hold more rows than
/// `s.len()` when the backend computes the full right factor.
#[derive(Debug)]
pub struct SVDOutput {
    pub u: Option<Array2<f64>>,
    pub s: Array1<f64>,
    pub vt: Option<Array2<f64>>,
}

/// Trait for Singular Value Decomposition.
pub trait BackendSVD {
    fn svd_into(
        &self,
        matrix: Array2<f64>,
        compute_u: bool,
        compute_v: bool,
    ) -> std::result::Result<SVDOutput, ThreadSafeStdError>;
}

/// Thin SVD keeping only the right factor.
///
/// Returns `(singular_values, basis)` where `basis` has shape
/// `(matrix.ncols(), min(matrix.nrows(), matrix.ncols()))` and its columns are
/// the right singular vectors, index-aligned with `singular_values`.
pub fn thin_right_svd<B: BackendSVD>(
    backend: &B,
    matrix: Array2<f64>,
) -> Result<(Array1<f64>, Array2<f64>)> {
    let (n_rows, n_cols) = matrix.dim();
    let thin_rank = n_rows.min(n_cols);
    if thin_rank == 0 {
        return Ok((Array1::zeros(0), Array2::zeros((n_cols, 0))));
    }

    let svd = backend
        .svd_into(matrix, false, true)
        .map_err(|e| PcaError::Decomposition(format!("SVD of {}x{} matrix failed: {}", n_rows, n_cols, e)))?;
    let vt = svd
        .vt
        .ok_or_else(|| PcaError::Decomposition("SVD backend did not return the right factor".into()))?;

    if svd.s.len() < thin_rank || vt.nrows() < thin_rank {
        return Err(PcaError::Decomposition(format!(
            "SVD returned {} singular values and {} right vectors, expected {}",
            svd.s.len(),
            vt.nrows(),
            thin_rank
        )));
    }

    let singular_values = svd.s.slice(s![..thin_rank]).to_owned();
    let basis = vt.slice(s![..thin_rank, ..]).t().to_owned();
    Ok((singular_values, basis))
}

// --- NdarrayLinAlgBackend Implementation ---
use ndarray_linalg::SVDInto as NdLinalgSVDInto;

#[derive(Debug, Default, Copy, Clone)]
pub struct NdarrayLinAlgBackend;

fn to_dyn_error<E: Error + Send + Sync + 'static>(e: E) -> ThreadSafeStdError {
    Box::new(e)
}

impl BackendSVD for NdarrayLinAlgBackend {
    fn svd_into(
        &self,
        matrix: Array2<f64>,
        compute_u: bool,
        compute_v: bool,
    ) -> std::result::Result<SVDOutput, ThreadSafeStdError> {
        let (u, s, vt) = matrix.svd_into(compute_u, compute_v).map_err(to_dyn_error)?;
        Ok(SVDOutput { u, s, vt })
    }
}

// --- FaerLinAlgBackend Implementation ---
#[cfg(feature = "backend_faer")]
mod faer_specific_code {
    use super::{BackendSVD, SVDOutput, ThreadSafeStdError};
    use bytemuck::Pod;
    use faer::linalg::solvers::Svd as FaerSolverSvd;
    use faer::traits::num_traits::Zero;
    use faer::traits::ComplexField;
    use faer::MatRef;
    use ndarray::{Array1, Array2, ShapeBuilder};

    fn to_dyn_error_faer(msg: String) -> ThreadSafeStdError {
        Box::new(std::io::Error::new(std::io::ErrorKind::Other, msg))
    }

    #[derive(Debug, Default, Copy, Clone)]
    pub struct FaerLinAlgBackend;

    fn faer_mat_to_ndarray<F: ComplexField + Copy + Pod + Zero>(faer_mat: MatRef<'_, F>) -> Array2<F> {
        let (nrows, ncols) = (faer_mat.nrows(), faer_mat.ncols());
        Array2::from_shape_fn((nrows, ncols).f(), |(i, j)| faer_mat[(i, j)])
    }

    fn faer_col_to_ndarray_vec<F: ComplexField + Copy + Pod + Zero>(faer_col: faer::ColRef<'_, F>) -> Array1<F> {
        Array1::from_shape_fn(faer_col.nrows(), |i| faer_col[i])
    }

    /// Borrows a contiguous ndarray matrix as a faer view without copying.
    fn as_faer_view(matrix: &Array2<f64>) -> Result<MatRef<'_, f64>, ThreadSafeStdError> {
        let (nrows, ncols) = matrix.dim();
        let slice = matrix.as_slice_memory_order().ok_or_else(|| {
            to_dyn_error_faer(format!(
                "Input ndarray matrix ({}x{}) is non-contiguous and cannot be viewed by faer.",
                nrows, ncols
            ))
        })?;
        if matrix.is_standard_layout() {
            Ok(MatRef::from_row_major_slice(slice, nrows, ncols))
        } else {
            Ok(MatRef::from_column_major_slice(slice, nrows, ncols))
        }
    }

    impl BackendSVD for FaerLinAlgBackend {
        fn svd_into(
            &self,
            matrix: Array2<f64>,
            compute_u: bool,
            compute_v: bool,
        ) -> Result<SVDOutput, ThreadSafeStdError> {
            let (nrows, ncols) = matrix.dim();
            if matrix.is_empty() {
                let k_dim = nrows.min(ncols);
                return Ok(SVDOutput {
                    u: if compute_u { Some(Array2::zeros((nrows, k_dim))) } else { None },
                    s: Array1::zeros(k_dim),
                    vt: if compute_v { Some(Array2::zeros((k_dim, ncols))) } else { None },
                });
            }
            // Standard layout gives faer a row-major view; anything else gets a contiguous copy.
            let contiguous = if matrix.is_standard_layout() || matrix.t().is_standard_layout() {
                matrix
            } else {
                matrix.as_standard_layout().into_owned()
            };
            let faer_view = as_faer_view(&contiguous)?;

            let svd = FaerSolverSvd::new_thin(faer_view)
                .map_err(|e| to_dyn_error_faer(format!("Faer SVD computation failed: {:?}", e)))?;

            let s = faer_col_to_ndarray_vec(svd.S().column_vector());
            let u = if compute_u { Some(faer_mat_to_ndarray(svd.U())) } else { None };
            let vt = if compute_v {
                Some(faer_mat_to_ndarray(svd.V()).t().to_owned())
            } else {
                None
            };
            Ok(SVDOutput { u, s, vt })
        }
    }
}

// --- LinAlgBackendProvider Dispatch ---

/// Dispatches to the linear algebra backend selected by compile-time feature flags.
#[derive(Debug, Default, Copy, Clone)]
pub struct LinAlgBackendProvider;

impl LinAlgBackendProvider {
    pub fn new() -> Self {
        Self
    }
}

impl BackendSVD for LinAlgBackendProvider {
    fn svd_into(
        &self,
        matrix: Array2<f64>,
        compute_u: bool,
        compute_v: bool,
    ) -> std::result::Result<SVDOutput, ThreadSafeStdError> {
        #[cfg(feature = "backend_faer")]
        {
            faer_specific_code::FaerLinAlgBackend.svd_into(matrix, compute_u, compute_v)
        }
        #[cfg(not(feature = "backend_faer"))]
        {
            NdarrayLinAlgBackend.svd_into(matrix, compute_u, compute_v)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_thin_right_svd_wide_matrix() {
        // 2x4 input: at most two right singular vectors survive.
        let matrix = array![[3.0, 0.0, 0.0, 0.0], [0.0, 0.0, 2.0, 0.0]];
        let (values, basis) = thin_right_svd(&LinAlgBackendProvider::new(), matrix).unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(basis.dim(), (4, 2));
        assert_abs_diff_eq!(values[0], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(values[1], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(basis[[0, 0]].abs(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(basis[[2, 1]].abs(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_thin_right_svd_tall_matrix() {
        let matrix = array![[1.0, 0.0], [0.0, 5.0], [0.0, 0.0], [0.0, 0.0]];
        let (values, basis) = thin_right_svd(&LinAlgBackendProvider::new(), matrix).unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(basis.dim(), (2, 2));
        assert_abs_diff_eq!(values[0], 5.0, epsilon = 1e-12);
        assert_abs_diff_eq!(values[1], 1.0, epsilon = 1e-12);
        let gram = basis.t().dot(&basis);
        for ((i, j), &value) in gram.indexed_iter() {
            let expected = if i == j { 1.0 } else { 0.0 };
            assert_abs_diff_eq!(value, expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_thin_right_svd_empty_matrix() {
        let matrix = Array2::<f64>::zeros((0, 3));
        let (values, basis) = thin_right_svd(&NdarrayLinAlgBackend, matrix).unwrap();
        assert!(values.is_empty());
        assert_eq!(basis.dim(), (3, 0));
    }
}
