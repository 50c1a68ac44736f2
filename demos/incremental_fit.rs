use ndarray::{s, Array2};
use streaming_pca::{IncrementalPCA, VarianceRatioConvention};

fn main() {
    // Six 4-dimensional feature frames, then two more arriving later.
    let frames = Array2::from_shape_vec(
        (8, 4),
        vec![
            1.0, 2.0, 0.1, 0.0, //
            2.0, 4.1, 0.0, 0.1, //
            3.0, 5.9, 0.1, 0.1, //
            4.0, 8.2, 0.0, 0.0, //
            5.0, 9.8, 0.1, 0.0, //
            6.0, 12.1, 0.0, 0.1, //
            7.0, 14.0, 0.1, 0.1, //
            8.0, 16.2, 0.0, 0.0,
        ],
    )
    .unwrap();

    let mut pca = IncrementalPCA::new();
    pca.fit(frames.slice(s![..6, ..])).expect("PCA fit failed");
    println!("Fitted on {} frames, rank {}", pca.samples_seen(), pca.rank());

    pca.update(frames.slice(s![6.., ..])).expect("PCA update failed");
    println!("Updated to {} frames, rank {}", pca.samples_seen(), pca.rank());
    println!("Singular values: {:?}", pca.singular_values().unwrap());

    let projection = pca.project(frames.view(), 1).expect("projection failed");
    println!("First-component scores: {:?}", projection.scores.column(0));
    println!(
        "Explained ratio (singular values): {:.4}, (squared): {:.4}",
        projection.explained_variance_ratio,
        pca.explained_variance_ratio_with(1, VarianceRatioConvention::SquaredSingularValues)
            .unwrap()
    );
}
