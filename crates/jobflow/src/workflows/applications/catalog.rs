//! The closed set of application statuses and the edges between them.
//!
//! ```text
//!   Applying -> Applied -> InReview -> Shortlisted -> CodeChallenge
//!                              ^                          |
//!                              +--------------------------+
//! ```
//!
//! `Applied`, `InReview`, `Shortlisted` and `CodeChallenge` may also move to `Rejected`;
//! only `InReview` may move to `Accepted`. Both of those are terminal.

use std::collections::BTreeSet;

use super::domain::{ActorRole, Status};

/// A single edge of the transition graph and the roles allowed to walk it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRule {
    pub from: Status,
    pub to: Status,
    pub actors: &'static [ActorRole],
}

impl TransitionRule {
    pub fn permits(&self, actor: ActorRole) -> bool {
        self.actors.contains(&actor)
    }
}

const EMPLOYER: &[ActorRole] = &[ActorRole::Employer];

const RULES: &[TransitionRule] = &[
    TransitionRule {
        from: Status::Applying,
        to: Status::Applied,
        actors: &[ActorRole::Applicant],
    },
    TransitionRule {
        from: Status::Applied,
        to: Status::InReview,
        actors: EMPLOYER,
    },
    TransitionRule {
        from: Status::Applied,
        to: Status::Rejected,
        actors: EMPLOYER,
    },
    TransitionRule {
        from: Status::InReview,
        to: Status::Shortlisted,
        actors: EMPLOYER,
    },
    TransitionRule {
        from: Status::InReview,
        to: Status::Rejected,
        actors: EMPLOYER,
    },
    TransitionRule {
        from: Status::InReview,
        to: Status::Accepted,
        actors: EMPLOYER,
    },
    TransitionRule {
        from: Status::Shortlisted,
        to: Status::CodeChallenge,
        actors: EMPLOYER,
    },
    TransitionRule {
        from: Status::Shortlisted,
        to: Status::Rejected,
        actors: EMPLOYER,
    },
    TransitionRule {
        from: Status::CodeChallenge,
        to: Status::InReview,
        actors: &[ActorRole::Applicant, ActorRole::SystemTimer],
    },
    TransitionRule {
        from: Status::CodeChallenge,
        to: Status::Rejected,
        actors: EMPLOYER,
    },
];

/// Pure lookup table over the status graph.
pub struct StatusCatalog;

impl StatusCatalog {
    pub fn all_statuses() -> BTreeSet<Status> {
        Status::ALL.into_iter().collect()
    }

    pub fn is_terminal(status: Status) -> bool {
        matches!(status, Status::Rejected | Status::Accepted)
    }

    pub fn allowed_transitions(status: Status) -> BTreeSet<Status> {
        RULES
            .iter()
            .filter(|rule| rule.from == status)
            .map(|rule| rule.to)
            .collect()
    }

    pub fn rules() -> &'static [TransitionRule] {
        RULES
    }

    pub fn rule(from: Status, to: Status) -> Option<&'static TransitionRule> {
        RULES.iter().find(|rule| rule.from == from && rule.to == to)
    }
}
