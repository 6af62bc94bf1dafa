//! Job application tracking with an ordered, mutable stage history per application.

pub mod applications;
pub mod collaborators;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod models;
pub mod observer;
pub mod records;
pub mod status;
pub mod templates;

pub use db::Database;
pub use engine::StageEngine;
pub use error::{Entity, Result, TrackError};
