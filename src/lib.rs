//! Tabular dataset ingest service: validates uploaded CSV/JSON files, infers
//! a column schema, stores the payload, and records the dataset.

pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
