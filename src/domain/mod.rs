pub mod aperture;
pub mod measurement_images;
pub mod model_fitting;
pub mod output;
pub mod registry;
