use serde::{Deserialize, Serialize};

use crate::domain::quote::QuoteStatus;

/// Side effects the persistence layer must run in the same transaction as the
/// status write, except `CheckLowStock` which runs after commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleAction {
    DeductStock,
    RestoreStock,
    CheckLowStock,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: QuoteStatus,
    pub to: QuoteStatus,
    pub actions: Vec<LifecycleAction>,
}

impl TransitionOutcome {
    pub fn requires(&self, action: LifecycleAction) -> bool {
        self.actions.contains(&action)
    }
}
