//! deployd library
//!
//! Tracks deployments of applications on a Dokku host and polls their status
//! in the background until they finish, fail or time out.

pub mod app;
pub mod deploy;
pub mod dokku;
pub mod errors;
pub mod logs;
pub mod models;
pub mod storage;
pub mod utils;
pub mod validate;
pub mod workers;
