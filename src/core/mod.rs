pub mod cancel;
pub mod confidence;
pub mod error;
pub mod geometry;
pub mod identity;
pub mod model;
pub mod severity;
