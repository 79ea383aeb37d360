//! Citizen Registry API Library
//!
//! A small HTTP API over a fixed MySQL registry schema (countries,
//! territories, districts, seats, citizens) that keeps working while the
//! database host moves: candidates are probed in order, the pool is bounded,
//! and dropped connections trigger a background failover.
//!
//! # Modules
//!
//! - `api`: Route tables and middleware.
//! - `config`: Configuration management.
//! - `db`: Connection manager, pool and query façade.
//! - `errors`: Error handling types.
//! - `handlers`: HTTP request handlers.
//! - `models`: Registry rows and create payloads.
//! - `registry`: Registry storage operations.

pub mod api;
pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod registry;
