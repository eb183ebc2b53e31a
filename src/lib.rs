pub mod assets;
pub mod config;
pub mod database;
pub mod errors;
pub mod models;
pub mod recorder;
pub mod scheduler;
pub mod services;
pub mod web;
