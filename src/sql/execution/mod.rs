//! Physical planning and the streaming operators that execute a plan.

pub mod aggregate;
pub mod compiler;
pub mod context;
pub mod display;
pub mod expr;
pub mod join;
pub mod query;
pub mod stream;
