//! Formella renders stored MathML formulas to PNG through an external
//! rendering endpoint and caches the per-formula artifacts on disk.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
