pub mod error;

pub mod access;
pub mod catalog;

pub mod config;
pub mod session;
pub mod sql;
