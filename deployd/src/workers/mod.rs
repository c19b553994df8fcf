//! Background workers

pub mod expiry;
