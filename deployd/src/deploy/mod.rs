//! Deployment tracking and polling engine

pub mod fsm;
pub mod poller;
pub mod probe;
pub mod service;
pub mod tracker;
