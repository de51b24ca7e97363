//! Core orchestration and domain logic for StudyKit.
//!
//! This crate ties the reasoning client into end-to-end workflows: the
//! three-stage analysis pipeline, the session state it publishes into, and
//! the adaptive quiz engine built on top of the produced topics.

pub mod assessment;
pub mod loader;
pub mod pipeline;
pub mod session;

#[cfg(test)]
pub(crate) mod fixtures;
