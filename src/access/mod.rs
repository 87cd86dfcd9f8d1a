pub mod array;
pub mod batch;
pub mod value;
