// Path: crates/host/src/contexts/reserved.rs
//! The reserved-function set.

use std::collections::HashSet;

use crucible_types::CLAIM_DEVELOPER_REWARDS;

/// Function names contracts may neither export nor be called by.
///
/// Populated once at host construction from the EEI's import names plus the
/// single protocol-level literal `claimDeveloperRewards`.
#[derive(Debug, Clone)]
pub struct ReservedFunctions {
    names: HashSet<String>,
}

impl ReservedFunctions {
    /// Builds the set from the EEI's exported API names.
    pub fn new(eei_names: &[&str]) -> Self {
        let mut names: HashSet<String> = eei_names.iter().map(|s| s.to_string()).collect();
        names.insert(CLAIM_DEVELOPER_REWARDS.to_string());
        Self { names }
    }

    /// True when `function` is reserved.
    pub fn is_reserved(&self, function: &str) -> bool {
        self.names.contains(function)
    }

    /// The reserved names, for diagnostics.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_claim_developer_rewards_and_eei_names() {
        let reserved = ReservedFunctions::new(&["getCaller", "finish"]);
        assert!(reserved.is_reserved("claimDeveloperRewards"));
        assert!(reserved.is_reserved("getCaller"));
        assert!(reserved.is_reserved("finish"));
        assert!(!reserved.is_reserved("doSomething"));
    }
}
