//! Upstream lifecycle states.

use std::fmt;
use std::str::FromStr;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Lifecycle state of a catalog entity, as reported upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Ranked,
    Approved,
    Qualified,
    Loved,
    Pending,
    #[serde(rename = "wip")]
    WorkInProgress,
    Graveyard,
}

impl LifecycleState {
    pub const ALL: [LifecycleState; 7] = [
        LifecycleState::Ranked,
        LifecycleState::Approved,
        LifecycleState::Qualified,
        LifecycleState::Loved,
        LifecycleState::Pending,
        LifecycleState::WorkInProgress,
        LifecycleState::Graveyard,
    ];

    /// Wire name used by the upstream API.
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Ranked => "ranked",
            LifecycleState::Approved => "approved",
            LifecycleState::Qualified => "qualified",
            LifecycleState::Loved => "loved",
            LifecycleState::Pending => "pending",
            LifecycleState::WorkInProgress => "wip",
            LifecycleState::Graveyard => "graveyard",
        }
    }

    /// Terminal states never change upstream once reached.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Ranked | LifecycleState::Approved)
    }

    /// How long an indexed copy stays fresh. `None` for terminal states.
    pub fn reindex_interval(&self) -> Option<Duration> {
        match self {
            LifecycleState::Ranked | LifecycleState::Approved => None,
            LifecycleState::Qualified | LifecycleState::WorkInProgress => {
                Some(Duration::minutes(5))
            }
            LifecycleState::Pending => Some(Duration::minutes(10)),
            LifecycleState::Loved | LifecycleState::Graveyard => Some(Duration::days(1)),
        }
    }
}

impl FromStr for LifecycleState {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LifecycleState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| AppError::policy(s))
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
