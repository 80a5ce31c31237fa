use std::collections::BTreeSet;

use super::catalog::StatusCatalog;
use super::domain::{ActorRole, Status};

/// Why a requested transition was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("cannot move from {from} to {to}")]
    IllegalTransition { from: Status, to: Status },
    #[error("{actor} may not move an application from {from} to {to}")]
    Unauthorized {
        from: Status,
        to: Status,
        actor: ActorRole,
    },
    #[error("application is already {0}")]
    TerminalState(Status),
    #[error("application was withdrawn")]
    Withdrawn,
    #[error("score of {passed} passed out of {total} is not possible")]
    InvalidScore { passed: u32, total: u32 },
}

/// Authorizes transitions against the catalog's rule table.
pub struct TransitionPolicy;

impl TransitionPolicy {
    pub fn validate(
        current: Status,
        requested: Status,
        actor: ActorRole,
    ) -> Result<(), PolicyError> {
        if StatusCatalog::is_terminal(current) {
            return Err(PolicyError::TerminalState(current));
        }

        let rule = StatusCatalog::rule(current, requested).ok_or(
            PolicyError::IllegalTransition {
                from: current,
                to: requested,
            },
        )?;

        if !rule.permits(actor) {
            return Err(PolicyError::Unauthorized {
                from: current,
                to: requested,
                actor,
            });
        }

        Ok(())
    }

    /// Targets the given actor could move an application to from `current`.
    pub fn permitted_targets(current: Status, actor: ActorRole) -> BTreeSet<Status> {
        StatusCatalog::rules()
            .iter()
            .filter(|rule| rule.from == current && rule.permits(actor))
            .map(|rule| rule.to)
            .collect()
    }
}
