//! UNITED realtime gateway library.
//! This crate exposes internal modules for integration testing.
//! The binary entry point is in main.rs.

pub mod auth;
pub mod chat;
pub mod config;
pub mod db;
pub mod directory;
pub mod error;
pub mod models;
pub mod routes;
pub mod state;
pub mod voice;
pub mod ws;
