use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};

/// An unordered pair of user ids, stored smaller id first
///
/// Every score key and ledger row goes through this type so that (a, b) and
/// (b, a) always address the same entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserPair {
    first: String,
    second: String,
}

impl UserPair {
    pub fn new(a: &str, b: &str) -> Self {
        if a <= b {
            Self {
                first: a.to_string(),
                second: b.to_string(),
            }
        } else {
            Self {
                first: b.to_string(),
                second: a.to_string(),
            }
        }
    }

    pub fn first(&self) -> &str {
        &self.first
    }

    pub fn second(&self) -> &str {
        &self.second
    }

    /// The member of the pair that is not `user_id`
    pub fn other(&self, user_id: &str) -> &str {
        if self.first == user_id {
            &self.second
        } else {
            &self.first
        }
    }
}

impl Display for UserPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.first, self.second)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchStatus {
    Pending,
    LikedByOne,
    Matched,
    Unmatched,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Pending => "pending",
            MatchStatus::LikedByOne => "liked-by-one",
            MatchStatus::Matched => "matched",
            MatchStatus::Unmatched => "unmatched",
        }
    }
}

impl FromStr for MatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MatchStatus::Pending),
            "liked-by-one" => Ok(MatchStatus::LikedByOne),
            "matched" => Ok(MatchStatus::Matched),
            "unmatched" => Ok(MatchStatus::Unmatched),
            other => Err(format!("unknown match status '{}'", other)),
        }
    }
}

/// Durable score record for a canonical pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub pair: UserPair,
    pub score: f64,
    pub status: MatchStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Score as returned to callers of the match-score endpoint
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchScore {
    pub score: f64,
    pub cached: bool,
}
