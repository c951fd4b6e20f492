//! On-call rules
//!
//! Rules are user-defined, multi-criterion predicates that decide which
//! alerts a user cares about.

mod engine;
mod validate;

pub use engine::RuleEngine;
pub use validate::{compile, is_valid_label_key, CompiledRule, Logic, MAX_LABEL_KEY_LEN};
