//! CLI commands

pub mod controller;
pub mod get;
pub mod inspect;
