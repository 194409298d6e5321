//! workflow::status
//!
//! Editorial status and the transitions between states.

use serde::{Deserialize, Serialize};

use crate::forge::{PrState, PullRequest};

/// Where an entry is in the editorial process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditorialStatus {
    #[default]
    Draft,
    PendingReview,
    PendingPublish,
    Published,
}

impl EditorialStatus {
    /// All states, in order.
    pub fn all() -> &'static [EditorialStatus] {
        &[
            EditorialStatus::Draft,
            EditorialStatus::PendingReview,
            EditorialStatus::PendingPublish,
            EditorialStatus::Published,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EditorialStatus::Draft => "draft",
            EditorialStatus::PendingReview => "pending_review",
            EditorialStatus::PendingPublish => "pending_publish",
            EditorialStatus::Published => "published",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::all().iter().copied().find(|status| status.as_str() == s)
    }

    pub fn is_terminal(&self) -> bool {
        *self == EditorialStatus::Published
    }

    /// Whether `self -> to` is a legal transition.
    ///
    /// With the workflow enabled states advance one step at a time; with it
    /// disabled the only transition is straight from draft to published.
    ///
    /// ```
    /// use contentforge::workflow::EditorialStatus::*;
    ///
    /// assert!(Draft.can_transition(PendingReview, true));
    /// assert!(!Draft.can_transition(Published, true));
    /// assert!(Draft.can_transition(Published, false));
    /// assert!(!PendingReview.can_transition(Draft, true));
    /// ```
    pub fn can_transition(&self, to: EditorialStatus, workflow_enabled: bool) -> bool {
        use EditorialStatus::*;
        if workflow_enabled {
            matches!(
                (self, to),
                (Draft, PendingReview) | (PendingReview, PendingPublish) | (PendingPublish, Published)
            )
        } else {
            matches!((self, to), (Draft, Published))
        }
    }

    /// Status implied by the live state of an entry's pull request.
    pub fn from_pull_request(pr: &PullRequest) -> Self {
        match pr.state {
            PrState::Merged => EditorialStatus::Published,
            PrState::Closed => EditorialStatus::Draft,
            PrState::Open if pr.ready => EditorialStatus::PendingPublish,
            PrState::Open => EditorialStatus::PendingReview,
        }
    }
}

impl std::fmt::Display for EditorialStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use EditorialStatus::*;

    fn pr(state: PrState, ready: bool) -> PullRequest {
        PullRequest {
            number: 1,
            url: String::new(),
            state,
            head: "cms/posts/a".into(),
            head_sha: None,
            base: "master".into(),
            title: String::new(),
            ready,
            labels: Vec::new(),
            reviewers: Vec::new(),
        }
    }

    #[test]
    fn enabled_transitions_are_single_steps() {
        for from in EditorialStatus::all() {
            for to in EditorialStatus::all() {
                let allowed = from.can_transition(*to, true);
                let expected = matches!(
                    (from, to),
                    (Draft, PendingReview) | (PendingReview, PendingPublish) | (PendingPublish, Published)
                );
                assert_eq!(allowed, expected, "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn disabled_only_publishes_drafts() {
        let allowed: Vec<_> = EditorialStatus::all()
            .iter()
            .flat_map(|from| {
                EditorialStatus::all()
                    .iter()
                    .filter(move |to| from.can_transition(**to, false))
                    .map(move |to| (*from, *to))
            })
            .collect();
        assert_eq!(allowed, vec![(Draft, Published)]);
    }

    #[test]
    fn status_from_pull_request() {
        assert_eq!(EditorialStatus::from_pull_request(&pr(PrState::Open, false)), PendingReview);
        assert_eq!(EditorialStatus::from_pull_request(&pr(PrState::Open, true)), PendingPublish);
        assert_eq!(EditorialStatus::from_pull_request(&pr(PrState::Merged, true)), Published);
        assert_eq!(EditorialStatus::from_pull_request(&pr(PrState::Closed, false)), Draft);
    }

    #[test]
    fn serde_names() {
        assert_eq!(
            serde_json::to_string(&PendingPublish).unwrap(),
            "\"pending_publish\""
        );
        assert_eq!(EditorialStatus::parse("pending_review"), Some(PendingReview));
        assert_eq!(EditorialStatus::parse("nope"), None);
    }
}
