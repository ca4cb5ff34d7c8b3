//! Destination model
//!
//! A destination groups the dialable prefixes that share a tariff, e.g.
//! `NAT = {0256, 0257, 0723}`.

use serde::{Deserialize, Serialize};

/// Named group of dialable prefixes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    /// Destination identifier referenced by rating profiles and balances
    pub id: String,

    /// Dialable prefixes belonging to the group
    pub prefixes: Vec<String>,
}

impl Destination {
    pub fn new(id: impl Into<String>, prefixes: &[&str]) -> Self {
        Self {
            id: id.into(),
            prefixes: prefixes.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Length of the longest stored prefix that starts `number`
    ///
    /// Tries the whole number first, then drops trailing digits one at a
    /// time. Returns 0 when nothing matches.
    pub fn contains_prefix(&self, number: &str) -> usize {
        let number = number.trim();
        (1..=number.len())
            .rev()
            .filter(|&len| number.is_char_boundary(len))
            .find(|&len| self.prefixes.iter().any(|p| p == &number[..len]))
            .unwrap_or(0)
    }
}
