//! Shared text utilities
//!
//! Formatting-code handling, match-span arithmetic, and the variable
//! substitution seam used by notify actions.

pub mod format;
pub mod template;

pub use format::{lowercase_span, normalize_codes, replace_span, span_is_usable, text_is_clean};
pub use template::{StandardExpander, VarExpander};
