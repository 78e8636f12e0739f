//! Workflow execution engine and port definitions for Draftline.
//!
//! This crate defines the "ports" (checkpoint store, LLM client, steps) that
//! the infrastructure layer implements, plus the engine, resilience layer and
//! context budget manager built on top of them. It depends only on
//! `draftline-types` -- never on `draftline-infra` or any database/IO crate.

pub mod context;
pub mod event;
pub mod llm;
pub mod repository;
pub mod resilience;
pub mod workflow;
