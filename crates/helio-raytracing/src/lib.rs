pub mod acceleration_structure;
pub mod ray;
pub mod scene;

pub use acceleration_structure::*;
pub use ray::*;
pub use scene::*;
