pub mod bounds;
pub mod error;

pub use bounds::Aabb;
pub use error::{HelioError, Result};
