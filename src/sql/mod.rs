pub mod execution;
pub mod optimizer;
pub mod plan;
pub mod udf;
