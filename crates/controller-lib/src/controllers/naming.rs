//! Deterministic names for controller-created Pods

use dashmap::DashMap;
use std::collections::HashSet;

/// Hands out `<base>-<seq>` names from a monotonic counter per owner.
///
/// Sequence numbers already used by a name in `taken` are skipped, so a
/// generated name never collides with a Pod in the snapshot.
#[derive(Debug, Default)]
pub struct NameGenerator {
    counters: DashMap<String, u64>,
}

impl NameGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next free name for `owner`, together with its sequence number.
    ///
    /// The returned name is inserted into `taken`.
    pub fn next_name(&self, owner: &str, base: &str, taken: &mut HashSet<String>) -> (String, u64) {
        let mut counter = self.counters.entry(owner.to_string()).or_insert(0);

        loop {
            *counter += 1;
            let candidate = format!("{}-{}", base, *counter);
            if taken.insert(candidate.clone()) {
                return (candidate, *counter);
            }
        }
    }

    /// Last sequence number handed out for `owner`
    pub fn current(&self, owner: &str) -> u64 {
        self.counters.get(owner).map(|c| *c).unwrap_or(0)
    }
}

/// Append `-<seq>` to a name
pub fn with_suffix(name: &str, seq: u64) -> String {
    format!("{}-{}", name, seq)
}
