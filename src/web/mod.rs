// src/web/mod.rs - HTTP read-out of the latest weather state
pub mod api;
pub mod models;
