//! Lookup target handling

pub mod validator;

pub use validator::TargetValidator;

use crate::error::Result;
use crate::types::Target;

/// Normalize and validate with a default validator
pub fn parse_target(raw: &str) -> Result<Target> {
    TargetValidator::new().validate(raw)
}

/// Suffix chain from most to least specific: `a.b.c` → `a.b.c`, `b.c`, `c`
pub fn suffix_chain(domain: &str) -> Vec<String> {
    let labels: Vec<&str> = domain.split('.').filter(|l| !l.is_empty()).collect();
    (0..labels.len()).map(|i| labels[i..].join(".")).collect()
}
