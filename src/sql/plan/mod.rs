pub mod coercion;
pub mod expr;
pub mod plan;
pub mod planner;
pub mod schema;
pub mod visitor;
