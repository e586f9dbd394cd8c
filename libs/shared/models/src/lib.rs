pub mod consultation;
pub mod error;

pub use consultation::*;
pub use error::*;
