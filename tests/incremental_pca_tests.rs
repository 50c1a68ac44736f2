// In tests/incremental_pca_tests.rs

use ndarray::{concatenate, s, Array1, Array2, ArrayView1, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::Normal;
use streaming_pca::{
    update_moments, IncrementalPCA, NanPolicy, PcaError, PcaOptions, RunningMoments, VarianceRatioConvention,
};

const DEFAULT_FLOAT_TOLERANCE_F64: f64 = 1e-8;

/// 12-bin chroma-like frames: a few harmonic templates mixed with per-frame gains plus noise.
fn generate_chroma_frames(n_frames: usize, seed: u64) -> Array2<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 0.02).unwrap();
    let templates = [
        [1.0, 0.0, 0.0, 0.0, 0.8, 0.0, 0.0, 0.9, 0.0, 0.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.7, 0.0, 0.0, 0.9, 0.0, 0.0],
        [0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.8, 0.0, 0.9],
    ];
    let mut frames = Array2::<f64>::zeros((n_frames, 12));
    for mut frame in frames.axis_iter_mut(Axis(0)) {
        let gains: Vec<f64> = (0..templates.len()).map(|_| rng.gen_range(0.0..1.0)).collect();
        for bin in 0..12 {
            let tonal: f64 = templates.iter().zip(gains.iter()).map(|(t, g)| t[bin] * g).sum();
            frame[bin] = tonal + rng.sample(noise);
        }
    }
    frames
}

fn assert_f64_arrays_are_close(arr1: ArrayView1<f64>, arr2: ArrayView1<f64>, tolerance: f64, context: &str) {
    assert_eq!(arr1.dim(), arr2.dim(), "Array dimensions differ for {}", context);
    for (i, (a, b)) in arr1.iter().zip(arr2.iter()).enumerate() {
        let scale = a.abs().max(b.abs()).max(1.0);
        assert!(
            (a - b).abs() < tolerance * scale,
            "Mismatch at index {} for {}: {} vs {} (diff: {})",
            i,
            context,
            a,
            b,
            (a - b).abs()
        );
    }
}

#[test]
fn streaming_chunks_match_batch_fit() {
    let frames = generate_chroma_frames(400, 2024);
    let mut streaming = IncrementalPCA::new();
    streaming.fit(frames.slice(s![..64, ..])).unwrap();
    for start in (64..400).step_by(48) {
        let end = (start + 48).min(400);
        streaming.update(frames.slice(s![start..end, ..])).unwrap();
    }

    let mut batch = IncrementalPCA::new();
    batch.fit(frames.view()).unwrap();

    assert_eq!(streaming.samples_seen(), 400);
    assert_eq!(streaming.rank(), 12);
    assert_f64_arrays_are_close(
        streaming.singular_values().unwrap().view(),
        batch.singular_values().unwrap().view(),
        DEFAULT_FLOAT_TOLERANCE_F64,
        "singular values",
    );
    assert_f64_arrays_are_close(
        streaming.mean().unwrap().view(),
        batch.mean().unwrap().view(),
        DEFAULT_FLOAT_TOLERANCE_F64,
        "mean",
    );

    // The three templates dominate; compare projections onto them up to sign.
    let streamed = streaming.project(frames.view(), 3).unwrap();
    let reference = batch.project(frames.view(), 3).unwrap();
    for j in 0..3 {
        let a = streamed.scores.column(j);
        let b = reference.scores.column(j);
        let sign = if a.dot(&b) < 0.0 { -1.0 } else { 1.0 };
        let flipped: Array1<f64> = a.mapv(|v| v * sign);
        assert_f64_arrays_are_close(flipped.view(), b, 1e-6, &format!("scores of component {}", j));
    }
    assert!(
        streaming
            .explained_variance_ratio_with(3, VarianceRatioConvention::SquaredSingularValues)
            .unwrap()
            > 0.95
    );
}

#[test]
fn running_moments_follow_streaming_model_mean() {
    let frames = generate_chroma_frames(120, 7);
    let mut moments = RunningMoments::new(12);
    let mut pca = IncrementalPCA::new();

    moments.push_batch(frames.slice(s![..40, ..])).unwrap();
    pca.fit(frames.slice(s![..40, ..])).unwrap();
    for chunk in [40..70, 70..71, 71..120] {
        let batch = frames.slice(s![chunk, ..]);
        moments.push_batch(batch).unwrap();
        pca.update(batch).unwrap();
        assert_eq!(moments.count(), pca.samples_seen());
    }
    assert_f64_arrays_are_close(
        moments.mean().view(),
        pca.mean().unwrap().view(),
        1e-12,
        "running mean vs model mean",
    );

    let expected_std = frames.std_axis(Axis(0), 0.0);
    assert_f64_arrays_are_close(moments.std_dev().view(), expected_std.view(), 1e-10, "running std");
}

#[test]
fn pure_moment_update_chains_over_two_batches() {
    let b1 = generate_chroma_frames(30, 1);
    let b2 = generate_chroma_frames(45, 2);
    let mut mean = b1.mean_axis(Axis(0)).unwrap();
    let mut std = b1.std_axis(Axis(0), 0.0);

    let count = update_moments(b2.view(), b1.nrows(), mean.view_mut(), std.view_mut()).unwrap();
    assert_eq!(count, 75);

    let all = concatenate(Axis(0), &[b1.view(), b2.view()]).unwrap();
    assert_f64_arrays_are_close(mean.view(), all.mean_axis(Axis(0)).unwrap().view(), 1e-12, "mean");
    assert_f64_arrays_are_close(std.view(), all.std_axis(Axis(0), 0.0).view(), 1e-12, "std");
}

#[test]
fn persisted_model_resumes_with_restored_history() {
    let frames = generate_chroma_frames(200, 99);
    let mut original = IncrementalPCA::new();
    original.fit(frames.slice(s![..150, ..])).unwrap();

    let temp_file = tempfile::NamedTempFile::new().unwrap();
    original.save_model(temp_file.path()).unwrap();
    let mut resumed = IncrementalPCA::load_model(temp_file.path()).unwrap();
    resumed.set_samples_seen(original.samples_seen());

    original.update(frames.slice(s![150.., ..])).unwrap();
    resumed.update(frames.slice(s![150.., ..])).unwrap();

    assert_eq!(resumed.samples_seen(), 200);
    assert_f64_arrays_are_close(
        resumed.singular_values().unwrap().view(),
        original.singular_values().unwrap().view(),
        1e-10,
        "singular values after resume",
    );
}

#[test]
fn reject_policy_surfaces_missing_bins() {
    let mut frames = generate_chroma_frames(20, 5);
    let options = PcaOptions::default().with_nan_policy(NanPolicy::Reject);
    let mut pca = IncrementalPCA::with_options(options);
    pca.fit(frames.view()).unwrap();

    frames[[4, 9]] = f64::NAN;
    let err = pca.update(frames.view()).unwrap_err();
    assert!(matches!(err, PcaError::NonFiniteInput(_)));
    assert!(err.to_string().contains("row 4, column 9"));
    assert_eq!(pca.samples_seen(), 20);
}
