pub mod frustum;

pub use frustum::*;
