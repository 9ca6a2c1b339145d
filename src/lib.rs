// src/lib.rs

pub mod agent;
pub mod config;
pub mod db;
pub mod llm;
pub mod memory;
pub mod server;
pub mod state;
pub mod tools;
