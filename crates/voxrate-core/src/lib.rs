//! Voxrate Core Library
//!
//! This crate provides the foundational types, traits, and error handling
//! for the voxrate rating engine. It includes:
//!
//! - Domain models (destinations, rating plans, timespans, accounts, actions)
//! - Storage traits consumed by the engine
//! - Unified error handling
//! - Application configuration and tracing bootstrap
//! - Rounding helpers shared by the splitter and the cost calculator

pub mod config;
pub mod error;
pub mod models;
pub mod telemetry;
pub mod traits;
pub mod utils;

pub use config::{AppConfig, RatingPolicy};
pub use error::AppError;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
