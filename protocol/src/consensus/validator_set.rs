//! Static validator roster and deterministic leader election.
//!
//! Every validator carries equal weight. With `n` validators the set
//! tolerates `f = n / 3` Byzantine members and certifies with `2f + 1`
//! acknowledgements.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Information about a single validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorInfo {
    /// Node identifier, e.g. `FO_001`.
    pub id: String,
    /// Voting weight. Always 1 in this design.
    pub weight: u64,
}

/// The fixed set of replicas that propose and vote.
///
/// Ids are kept sorted so that `primary(view)` is the same on every
/// replica without any communication.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSet {
    validators: BTreeMap<String, u64>,
}

impl ValidatorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an equal-weight set from `ids`. Duplicates collapse.
    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::new();
        for id in ids {
            set.add_validator(id);
        }
        set
    }

    pub fn add_validator(&mut self, id: impl Into<String>) {
        self.validators.insert(id.into(), 1);
    }

    /// `n`.
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Ids in leader-rotation order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.validators.keys().map(String::as_str)
    }

    pub fn validators(&self) -> Vec<ValidatorInfo> {
        self.validators
            .iter()
            .map(|(id, weight)| ValidatorInfo {
                id: id.clone(),
                weight: *weight,
            })
            .collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.validators.contains_key(id)
    }

    /// Maximum tolerated Byzantine validators, `floor(n / 3)`.
    pub fn max_faulty(&self) -> usize {
        self.len() / 3
    }

    /// Acknowledgements required for a certificate, `2f + 1`.
    pub fn quorum_threshold(&self) -> usize {
        2 * self.max_faulty() + 1
    }

    /// Leader for `view`: `sorted_ids[view mod n]`.
    pub fn primary(&self, view: u64) -> Option<&str> {
        if self.validators.is_empty() {
            return None;
        }
        let index = (view % self.len() as u64) as usize;
        self.ids().nth(index)
    }

    pub fn is_primary(&self, id: &str, view: u64) -> bool {
        self.primary(view) == Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn four() -> ValidatorSet {
        ValidatorSet::from_ids(["FO_003", "FO_001", "FO_004", "FO_002"])
    }

    #[test]
    fn quorum_threshold_calculation() {
        let vs = four();
        assert_eq!(vs.max_faulty(), 1);
        assert_eq!(vs.quorum_threshold(), 3);

        let seven = ValidatorSet::from_ids((1..=7).map(|i| format!("FO_{:03}", i)));
        assert_eq!(seven.max_faulty(), 2);
        assert_eq!(seven.quorum_threshold(), 5);

        let single = ValidatorSet::from_ids(["solo"]);
        assert_eq!(single.quorum_threshold(), 1);
    }

    #[test]
    fn round_robin_primary_selection() {
        let vs = four();
        assert_eq!(vs.primary(0), Some("FO_001"));
        assert_eq!(vs.primary(1), Some("FO_002"));
        assert_eq!(vs.primary(3), Some("FO_004"));
        assert_eq!(vs.primary(4), Some("FO_001"));
        assert!(vs.is_primary("FO_002", 5));
        assert!(!vs.is_primary("FO_001", 5));
    }

    #[test]
    fn empty_set_has_no_primary() {
        assert_eq!(ValidatorSet::new().primary(7), None);
    }

    #[test]
    fn duplicates_collapse() {
        let vs = ValidatorSet::from_ids(["a", "b", "a"]);
        assert_eq!(vs.len(), 2);
        assert!(vs.contains("a"));
        assert!(!vs.contains("c"));
        assert!(vs.validators().iter().all(|v| v.weight == 1));
    }
}
