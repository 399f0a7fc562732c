//! Storage backends for PromptGate
//!
//! The gateway consumes storage through the [`Repository`] trait defined in
//! `promptgate-core`. This crate provides [`MemoryRepository`], the
//! in-memory implementation used for tests and as the degraded path when no
//! external store is configured.
//!
//! [`Repository`]: promptgate_core::Repository

mod memory;

pub use memory::MemoryRepository;
