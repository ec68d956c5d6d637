//! Load presets and the naming scheme for simulated participants.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Named load level.
///
/// | Scenario | Accounts | Institutions | Target transfers |
/// |----------|---------:|-------------:|-----------------:|
/// | Low      |    1 000 |            5 |            4 150 |
/// | Medium   |   10 000 |           10 |           41 800 |
/// | Peak     |   50 000 |           15 |          208 500 |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Scenario {
    #[default]
    Low,
    Medium,
    Peak,
}

impl Scenario {
    pub const ALL: [Scenario; 3] = [Scenario::Low, Scenario::Medium, Scenario::Peak];

    pub fn accounts(self) -> usize {
        match self {
            Scenario::Low => 1_000,
            Scenario::Medium => 10_000,
            Scenario::Peak => 50_000,
        }
    }

    pub fn institutions(self) -> usize {
        match self {
            Scenario::Low => 5,
            Scenario::Medium => 10,
            Scenario::Peak => 15,
        }
    }

    pub fn target_transactions(self) -> u64 {
        match self {
            Scenario::Low => 4_150,
            Scenario::Medium => 41_800,
            Scenario::Peak => 208_500,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Scenario::Low => "low",
            Scenario::Medium => "medium",
            Scenario::Peak => "peak",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scenario {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Scenario::Low),
            "medium" => Ok(Scenario::Medium),
            "peak" => Ok(Scenario::Peak),
            other => Err(format!("unknown scenario: {other}")),
        }
    }
}

/// Id of the `index`-th institution (0-based): `FO_001`, `FO_002`, …
pub fn institution_id(index: usize) -> String {
    format!("FO_{:03}", index + 1)
}

/// Id of the `index`-th customer account (0-based): `USER_000001`, …
pub fn account_id(index: usize) -> String {
    format!("USER_{:06}", index + 1)
}

/// Splits `accounts` round-robin across `institutions` rosters.
pub fn assign_accounts(accounts: usize, institutions: usize) -> Vec<Vec<String>> {
    let mut rosters = vec![Vec::new(); institutions];
    if institutions == 0 {
        return rosters;
    }
    for i in 0..accounts {
        rosters[i % institutions].push(account_id(i));
    }
    rosters
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_match_table() {
        assert_eq!(Scenario::Low.accounts(), 1_000);
        assert_eq!(Scenario::Medium.institutions(), 10);
        assert_eq!(Scenario::Peak.target_transactions(), 208_500);
    }

    #[test]
    fn parse_and_display_agree() {
        for scenario in Scenario::ALL {
            assert_eq!(scenario.to_string().parse::<Scenario>(), Ok(scenario));
        }
        assert_eq!("PEAK".parse::<Scenario>(), Ok(Scenario::Peak));
        assert!("extreme".parse::<Scenario>().is_err());
    }

    #[test]
    fn ids_are_zero_padded() {
        assert_eq!(institution_id(0), "FO_001");
        assert_eq!(institution_id(14), "FO_015");
        assert_eq!(account_id(0), "USER_000001");
    }

    #[test]
    fn accounts_spread_round_robin() {
        let rosters = assign_accounts(7, 3);
        assert_eq!(rosters[0], vec!["USER_000001", "USER_000004", "USER_000007"]);
        assert_eq!(rosters[1].len(), 2);
        assert_eq!(rosters[2].len(), 2);
    }
}
