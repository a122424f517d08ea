//! Spatial interaction: distances, extended matrices and flow models.

pub mod distance;
pub mod fit;
pub mod gravity;
pub mod pairs;
pub mod radiation;

pub use distance::{read_centroids, write_distance_matrix};
pub use fit::compare_models;
pub use pairs::{build_extended_matrix, read_extended_matrix};
