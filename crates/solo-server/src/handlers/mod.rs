//! Route handlers

pub mod generate;
pub mod health;
pub mod keys;
pub mod models;
