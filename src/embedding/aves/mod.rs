//! AVES (HuBERT-style) bioacoustic encoder.

mod backend;
mod config;
mod encoder;
mod model;

pub use backend::BACKEND_ENV;
pub use config::AvesConfig;
pub use encoder::AvesEncoder;
pub use model::AvesModel;
