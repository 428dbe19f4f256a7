pub mod app;
pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod omdb;
pub mod seed;
pub mod store;
