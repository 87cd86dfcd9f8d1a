#[allow(clippy::module_inception)]
pub mod catalog;
pub mod table;
pub mod r#type;
