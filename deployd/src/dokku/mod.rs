//! Dokku platform integration

pub mod command;
pub mod history;
pub mod status_probe;
pub mod trigger;
