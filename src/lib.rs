//! VWorld CLI Library
//!
//! Client, cache and helpers for the VWorld geospatial API. The binary in
//! `main.rs` is a thin front end over these modules; they are public so the
//! integration tests can drive them directly.

pub mod api;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod history;
pub mod validate;
pub mod worker;
