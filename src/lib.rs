pub mod auth;
pub mod config;
pub mod db;
pub mod dialect;
pub mod error;
pub mod facets;
pub mod fields;
pub mod filters;
pub mod records;
pub mod routes;
pub mod state;
pub mod utils;
