//! Error handling foundation for conduit.
//!
//! This module provides only the `Result` type alias using rootcause.
//! Each crate defines its own domain-specific error types in their own
//! error modules, using rootcause's `.context()` to add layer-appropriate
//! context as errors propagate up the stack.

use rootcause::Report;

/// A Result type alias using rootcause's Report for error handling.
///
/// Each layer adds its own context via `.context()` as errors propagate.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Missing;

    impl std::fmt::Display for Missing {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "missing")
        }
    }

    impl std::error::Error for Missing {}

    fn lookup(present: bool) -> Result<u32, Missing> {
        if present { Ok(7) } else { Err(Missing.into()) }
    }

    #[test]
    fn result_carries_typed_context() {
        assert_eq!(lookup(true).expect("should be ok"), 7);
        let report = lookup(false).unwrap_err();
        assert!(report.to_string().contains("missing"));
    }
}
