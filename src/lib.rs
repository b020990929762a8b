//! alertnet emergency alert distribution server library.
//! This crate exposes internal modules for integration testing.
//! The binary entry point is in main.rs.

pub mod alerts;
pub mod auth;
pub mod backplane;
pub mod broadcaster;
pub mod config;
pub mod geo;
pub mod metrics;
pub mod push;
pub mod registry;
pub mod rooms;
pub mod routes;
pub mod state;
pub mod store;
pub mod ws;
