pub mod analytics;
pub mod cli;
pub mod config;
pub mod feed;
pub mod fields;
pub mod store;
pub mod web;
