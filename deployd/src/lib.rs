//! deployd library
//!
//! Publishes per-owner chatbot runner processes on their own TCP ports and
//! keeps a durable registry of them.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod server;
pub mod storage;
pub mod stores;
pub mod utils;
pub mod workers;
