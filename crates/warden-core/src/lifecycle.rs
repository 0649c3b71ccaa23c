use crate::CoreError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Active,
    Destroyed,
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Lifecycle::Uninitialized => write!(f, "uninitialized"),
            Lifecycle::Active => write!(f, "active"),
            Lifecycle::Destroyed => write!(f, "destroyed"),
        }
    }
}

pub fn validate_transition(from: Lifecycle, to: Lifecycle) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (Lifecycle::Uninitialized, Lifecycle::Active | Lifecycle::Destroyed)
            | (Lifecycle::Active, Lifecycle::Active | Lifecycle::Destroyed)
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
