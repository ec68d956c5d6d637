//! Seeded transfer workload.
//!
//! Each tick every institution emits at most one `C2C` transfer between two
//! distinct accounts of its own roster. Amounts are uniform in
//! `[MIN_TRANSFER_AMOUNT, MAX_TRANSFER_AMOUNT)`. A shadow copy of the
//! balances keeps the generator from emitting transfers the sender cannot
//! cover, assuming everything it emitted before commits.

use std::collections::HashMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace};

use crate::config::{MAX_TRANSFER_AMOUNT, MIN_TRANSFER_AMOUNT};
use crate::institution::FinancialInstitution;
use crate::transaction::TransactionType;

/// Attempts per institution per tick before giving up on a funded sender.
const PICK_ATTEMPTS: usize = 4;

#[derive(Debug)]
pub struct WorkloadGenerator {
    rng: StdRng,
    shadow: HashMap<String, u64>,
    submitted: u64,
    refused: u64,
}

impl WorkloadGenerator {
    /// Every account in `accounts` starts with `initial_balance`.
    pub fn new<'a, I>(seed: u64, accounts: I, initial_balance: u64) -> Self
    where
        I: IntoIterator<Item = &'a String>,
    {
        Self {
            rng: StdRng::seed_from_u64(seed),
            shadow: accounts
                .into_iter()
                .map(|a| (a.clone(), initial_balance))
                .collect(),
            submitted: 0,
            refused: 0,
        }
    }

    /// Transfers accepted by a pool so far.
    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    /// Transfers a pool refused at admission.
    pub fn refused(&self) -> u64 {
        self.refused
    }

    pub fn shadow_balance(&self, account: &str) -> u64 {
        self.shadow.get(account).copied().unwrap_or(0)
    }

    /// Picks one funded transfer within `roster`.
    pub fn next_transfer(&mut self, roster: &[String]) -> Option<(String, String, u64)> {
        if roster.len() < 2 {
            return None;
        }
        for _ in 0..PICK_ATTEMPTS {
            let from = self.rng.gen_range(0..roster.len());
            let mut to = self.rng.gen_range(0..roster.len() - 1);
            if to >= from {
                to += 1;
            }
            let amount = self.rng.gen_range(MIN_TRANSFER_AMOUNT..MAX_TRANSFER_AMOUNT);
            if self.shadow_balance(&roster[from]) >= amount {
                return Some((roster[from].clone(), roster[to].clone(), amount));
            }
        }
        None
    }

    /// Runs one tick against `institutions`, submitting at most one transfer
    /// to each pool. Returns how many were accepted.
    pub fn tick(&mut self, institutions: &[Arc<FinancialInstitution>]) -> u64 {
        let mut accepted = 0;
        for institution in institutions {
            let Some((sender, recipient, amount)) = self.next_transfer(institution.accounts())
            else {
                continue;
            };
            match institution.submit_transfer(&sender, &recipient, amount, TransactionType::C2C) {
                Ok(tx) => {
                    trace!(institution = %institution.id(), tx = %tx.id, "workload transfer");
                    self.apply(&sender, &recipient, amount);
                    accepted += 1;
                }
                Err(e) => {
                    debug!(institution = %institution.id(), error = %e, "workload transfer refused");
                    self.refused += 1;
                }
            }
        }
        self.submitted += accepted;
        accepted
    }

    fn apply(&mut self, sender: &str, recipient: &str, amount: u64) {
        if let Some(balance) = self.shadow.get_mut(sender) {
            *balance -= amount;
        }
        *self.shadow.entry(recipient.to_string()).or_insert(0) += amount;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::institution::PoolConfig;

    fn roster(n: usize) -> Vec<String> {
        (0..n).map(crate::simulation::scenario::account_id).collect()
    }

    #[test]
    fn transfers_stay_within_roster_and_bounds() {
        let accounts = roster(6);
        let mut generator = WorkloadGenerator::new(1, &accounts, 10_000);
        for _ in 0..200 {
            let (from, to, amount) = generator.next_transfer(&accounts).unwrap();
            assert_ne!(from, to);
            assert!(accounts.contains(&from) && accounts.contains(&to));
            assert!((MIN_TRANSFER_AMOUNT..MAX_TRANSFER_AMOUNT).contains(&amount));
        }
    }

    #[test]
    fn same_seed_same_sequence() {
        let accounts = roster(10);
        let mut a = WorkloadGenerator::new(42, &accounts, 10_000);
        let mut b = WorkloadGenerator::new(42, &accounts, 10_000);
        for _ in 0..50 {
            assert_eq!(a.next_transfer(&accounts), b.next_transfer(&accounts));
        }
    }

    #[test]
    fn unfunded_roster_emits_nothing() {
        let accounts = roster(4);
        let mut generator = WorkloadGenerator::new(3, &accounts, MIN_TRANSFER_AMOUNT - 1);
        assert!(generator.next_transfer(&accounts).is_none());
        assert!(generator.next_transfer(&accounts[..1]).is_none());
    }

    #[test]
    fn tick_submits_one_per_institution_and_conserves_shadow() {
        let institutions: Vec<Arc<FinancialInstitution>> = (0..3)
            .map(|i| {
                let accounts = roster(9)[i * 3..i * 3 + 3].to_vec();
                Arc::new(FinancialInstitution::new(
                    crate::simulation::scenario::institution_id(i),
                    accounts,
                    PoolConfig::default(),
                ))
            })
            .collect();
        let all = roster(9);
        let mut generator = WorkloadGenerator::new(9, &all, 10_000);

        assert_eq!(generator.tick(&institutions), 3);
        assert_eq!(generator.tick(&institutions), 3);
        assert_eq!(generator.submitted(), 6);
        for institution in &institutions {
            assert_eq!(institution.pool().size(), 2);
        }
        let total: u64 = all.iter().map(|a| generator.shadow_balance(a)).sum();
        assert_eq!(total, 90_000);
    }
}
