//! cull - unattended triage for a single inbox
//!
//! This crate provides the core functionality for the cull triage engine,
//! including mailbox protocol handling, LLM classification, denylist
//! lifecycle management, and storage.

pub mod config;
pub mod domain;
pub mod providers;
pub mod services;
pub mod storage;
