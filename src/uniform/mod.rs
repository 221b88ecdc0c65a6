//! Uniform value codec
//!
//! Maps the closed set of uniform shapes onto the bytes of a program-owned
//! uniform block. Names come from [`crate::reflect`]; [`UniformStaging`]
//! keeps the block images a program uploads.

mod staging;
mod upload;
mod value;

pub use staging::UniformStaging;
pub(crate) use staging::{all_shape_setters, shape_setters};
pub use upload::encoded_size;
pub use value::{Matrix, MatrixLayout, UniformScalar, UniformShape, UniformValue};
