//! The dandanplay-compatible HTTP surface (C9): wires C1-C8 together
//! behind actix-web, exposing the fixed external protocol plus an
//! ambient health/metrics surface for the deployer.

pub mod dto;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod token_repository;
