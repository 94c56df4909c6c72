//! Core types: recurrence rules, jobs and their actions.

pub mod environment;
pub mod frequency;
pub mod job;
pub mod types;
