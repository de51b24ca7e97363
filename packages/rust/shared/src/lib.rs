//! Shared types, error model, and configuration for StudyKit.
//!
//! This crate is the foundation depended on by all other StudyKit crates.
//! It provides:
//! - [`StudyKitError`] and [`ErrorClass`] — the unified error type and its classification
//! - Domain types ([`Topic`], [`QuizQuestion`], [`SummaryArtifact`], [`KnowledgeGraph`], [`RunId`])
//! - Configuration ([`AppConfig`], [`RetryConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, PipelineConfig, QuizConfig, ReasoningConfig, RetryConfig, config_dir,
    config_file_path, init_config, load_config, load_config_from, resolve_api_key,
    validate_api_key,
};
pub use error::{ErrorClass, Result, StudyKitError};
pub use types::{
    Artifacts, Entity, EntityType, KnowledgeGraph, QuizQuestion, Relationship, RunId, Subtopic,
    SummaryArtifact, Topic,
};
