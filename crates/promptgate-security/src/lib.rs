//! Security analysis engines for PromptGate
//!
//! This crate provides the two in-memory, regex-based engines that sit on
//! the critical path of every request:
//!
//! - [`InjectionDetector`] — classifies chat messages for prompt-injection
//!   attempts and assigns a threat level.
//! - [`PiiMasker`] — detects and masks personally identifying information
//!   while preserving semantic hints (last-4 digits, e-mail domains).
//!
//! Both engines are pure over their input: no I/O, no suspension, no
//! call-time failure modes. Pattern compilation problems are handled at
//! construction by skipping the offending pattern with a warning.

pub mod injection;
pub mod pii;

pub use injection::InjectionDetector;
pub use pii::PiiMasker;

/// Format the location string for a detection or PII match:
/// `{role}_message_{index}`.
pub(crate) fn message_location(index: usize, role: &str) -> String {
    format!("{}_message_{}", role.to_lowercase(), index)
}
