use crate::record::ErrorEvent;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AlterationError {
    #[error("Error {unique} is of kind '{kind}', only TaintedCondition errors can be altered")]
    WrongKind { unique: String, kind: String },
    #[error("Error {0} has no frames to take an address from")]
    NoFrames(String),
    #[error("No alteration is set for address {0}")]
    NotAltered(String),
}

/// Forced outcome of a conditional branch.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BranchAction {
    /// Always take the branch.
    Follow,
    /// Never take the branch.
    Skip,
}

impl From<bool> for BranchAction {
    fn from(follow: bool) -> Self {
        if follow {
            BranchAction::Follow
        } else {
            BranchAction::Skip
        }
    }
}

impl fmt::Display for BranchAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BranchAction::Follow => f.pad("1"),
            BranchAction::Skip => f.pad("0"),
        }
    }
}

/// Branch alterations keyed by instruction pointer text, as the tool expects them.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct BranchAlterations(BTreeMap<String, BranchAction>);

impl BranchAlterations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, address: impl Into<String>, action: BranchAction) {
        self.0.insert(address.into(), action);
    }

    pub fn remove(&mut self, address: &str) -> Option<BranchAction> {
        self.0.remove(address)
    }

    pub fn get(&self, address: &str) -> Option<BranchAction> {
        self.0.get(address).copied()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, BranchAction)> {
        self.0.iter().map(|(address, action)| (address.as_str(), *action))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlterationChange {
    Set { address: String, action: BranchAction },
    Removed { address: String },
}

/// Alterations plus the error each one was derived from, if any.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct AlterationTracker {
    alterations: BranchAlterations,
    origins: BTreeMap<String, ErrorEvent>,
}

impl AlterationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alterations(&self) -> &BranchAlterations {
        &self.alterations
    }

    pub fn origin(&self, address: &str) -> Option<&ErrorEvent> {
        self.origins.get(address)
    }

    /// Sets or, when `action` is `None`, removes the alteration at `address`.
    pub fn alter_address(
        &mut self,
        address: &str,
        action: Option<BranchAction>,
        origin: Option<&ErrorEvent>,
    ) -> Result<AlterationChange, AlterationError> {
        match action {
            Some(action) => {
                self.alterations.set(address, action);
                match origin {
                    Some(error) => {
                        self.origins.insert(address.to_string(), error.clone());
                    }
                    None => {
                        self.origins.remove(address);
                    }
                }
                Ok(AlterationChange::Set {
                    address: address.to_string(),
                    action,
                })
            }
            None => {
                self.alterations
                    .remove(address)
                    .ok_or_else(|| AlterationError::NotAltered(address.to_string()))?;
                self.origins.remove(address);
                Ok(AlterationChange::Removed {
                    address: address.to_string(),
                })
            }
        }
    }

    /// Alters the conditional jump that raised `error`, addressed by the
    /// instruction pointer of its innermost frame.
    pub fn alter_error(
        &mut self,
        error: &ErrorEvent,
        action: Option<BranchAction>,
    ) -> Result<AlterationChange, AlterationError> {
        if !error.is_tainted_condition() {
            return Err(AlterationError::WrongKind {
                unique: error.unique.clone(),
                kind: error.kind.clone(),
            });
        }
        let frame = error
            .top_frame()
            .ok_or_else(|| AlterationError::NoFrames(error.unique.clone()))?;
        let address = frame.instruction_pointer.clone();
        self.alter_address(&address, action, Some(error))
    }

    pub fn clear(&mut self) {
        self.alterations.clear();
        self.origins.clear();
    }

    /// `(address, action, originating error)` in address order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, BranchAction, Option<&ErrorEvent>)> {
        self.alterations
            .iter()
            .map(|(address, action)| (address, action, self.origins.get(address)))
    }
}
