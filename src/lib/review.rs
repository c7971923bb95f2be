//! Interactive review as an explicit state machine.
//!
//! [`transition`] is a pure function of (state, event). The TUI only renders the
//! current state and turns key presses and background results into events.

use crate::lib::error::ExitStatus;
use crate::lib::orchestrator::Progress;
use crate::lib::patch::Selection;
use crate::lib::recommender::{Recommendation, RecommendationStatus};

/// Where accepted changes go
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ApplyMode {
    /// Edit manifests in a local directory
    Local,
    /// Push a branch and open a pull request
    PullRequest,
}

impl ApplyMode {
    pub fn toggled(self) -> Self {
        match self {
            ApplyMode::Local => ApplyMode::PullRequest,
            ApplyMode::PullRequest => ApplyMode::Local,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ApplyMode::Local => "write manifests locally",
            ApplyMode::PullRequest => "open a pull request",
        }
    }
}

/// Stage of a running publish, for display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishStep {
    Preparing,
    Cloning,
    Editing,
    Committing,
    Pushing,
    OpeningPullRequest,
}

impl PublishStep {
    pub fn label(self) -> &'static str {
        match self {
            PublishStep::Preparing => "Preparing changes",
            PublishStep::Cloning => "Cloning manifest repository",
            PublishStep::Editing => "Editing manifests",
            PublishStep::Committing => "Committing",
            PublishStep::Pushing => "Pushing branch",
            PublishStep::OpeningPullRequest => "Opening pull request",
        }
    }
}

/// Recommendation list with cursor and selection
#[derive(Debug, Clone, PartialEq)]
pub struct Review {
    pub recommendations: Vec<Recommendation>,
    pub cursor: usize,
    pub selection: Selection,
    /// Mode offered first when confirming
    pub mode: ApplyMode,
}

impl Review {
    pub fn new(recommendations: Vec<Recommendation>, mode: ApplyMode) -> Self {
        Self {
            recommendations,
            cursor: 0,
            selection: Selection::new(),
            mode,
        }
    }

    pub fn current(&self) -> Option<&Recommendation> {
        self.recommendations.get(self.cursor)
    }

    fn up(mut self) -> Self {
        self.cursor = self.cursor.saturating_sub(1);
        self
    }

    fn down(mut self) -> Self {
        if self.cursor + 1 < self.recommendations.len() {
            self.cursor += 1;
        }
        self
    }

    fn toggle(mut self) -> Self {
        if let Some(rec) = self.recommendations.get(self.cursor) {
            self.selection.toggle(rec);
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReviewState {
    Loading {
        progress: Progress,
    },
    Loaded {
        recommendations: Vec<Recommendation>,
    },
    Reviewing(Review),
    Confirming {
        review: Review,
        mode: ApplyMode,
    },
    Publishing {
        review: Review,
        mode: ApplyMode,
        step: PublishStep,
    },
    Done {
        summary: String,
        /// Targets whose metrics could not be fetched
        failed_targets: usize,
    },
    /// Publish or load failed. The selection survives for a retry.
    Failed {
        review: Review,
        mode: ApplyMode,
        reason: String,
    },
    /// Quit by the operator. Carries the failure being shown at the time, if any.
    Cancelled {
        failure: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReviewEvent {
    Progress(Progress),
    Loaded(Vec<Recommendation>),
    LoadFailed(String),
    Begin(ApplyMode),
    Up,
    Down,
    Toggle,
    SelectAll,
    ClearSelection,
    Confirm,
    ToggleMode,
    Back,
    Publish,
    PublishProgress(PublishStep),
    Published(String),
    PublishFailed(String),
    Retry,
    Cancel,
}

impl ReviewState {
    pub fn new() -> Self {
        ReviewState::Loading {
            progress: Progress {
                completed: 0,
                total: 0,
            },
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ReviewState::Done { .. } | ReviewState::Cancelled { .. })
    }

    /// Process exit status for a session that ended in this state
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            ReviewState::Done { failed_targets, .. } if *failed_targets > 0 => {
                ExitStatus::PartialFailure
            }
            ReviewState::Done { .. } => ExitStatus::Success,
            ReviewState::Failed { .. } | ReviewState::Cancelled { failure: Some(_) } => {
                ExitStatus::Fatal
            }
            _ => ExitStatus::Cancelled,
        }
    }

    pub fn review(&self) -> Option<&Review> {
        match self {
            ReviewState::Reviewing(review)
            | ReviewState::Confirming { review, .. }
            | ReviewState::Publishing { review, .. }
            | ReviewState::Failed { review, .. } => Some(review),
            _ => None,
        }
    }
}

impl Default for ReviewState {
    fn default() -> Self {
        Self::new()
    }
}

/// Next state for `event`. Events that do not apply leave the state unchanged.
pub fn transition(state: ReviewState, event: ReviewEvent) -> ReviewState {
    use ReviewEvent as E;
    use ReviewState as S;

    match (state, event) {
        // Publishing runs to completion or failure
        (state @ S::Publishing { .. }, E::Cancel) => state,
        (S::Failed { reason, .. }, E::Cancel) => S::Cancelled {
            failure: Some(reason),
        },
        (state, E::Cancel) if !state.is_terminal() => S::Cancelled { failure: None },

        (S::Loading { .. }, E::Progress(progress)) => S::Loading { progress },
        (S::Loading { .. }, E::Loaded(recommendations)) => S::Loaded { recommendations },
        (S::Loading { .. }, E::LoadFailed(reason)) => S::Failed {
            review: Review::new(Vec::new(), ApplyMode::PullRequest),
            mode: ApplyMode::PullRequest,
            reason,
        },

        (S::Loaded { recommendations }, E::Begin(mode)) => {
            S::Reviewing(Review::new(recommendations, mode))
        }

        (S::Reviewing(review), E::Up) => S::Reviewing(review.up()),
        (S::Reviewing(review), E::Down) => S::Reviewing(review.down()),
        (S::Reviewing(review), E::Toggle) => S::Reviewing(review.toggle()),
        (S::Reviewing(mut review), E::SelectAll) => {
            review.selection = Selection::apply_all(&review.recommendations);
            S::Reviewing(review)
        }
        (S::Reviewing(mut review), E::ClearSelection) => {
            review.selection.clear();
            S::Reviewing(review)
        }
        (S::Reviewing(review), E::Confirm) if !review.selection.is_empty() => S::Confirming {
            mode: review.mode,
            review,
        },

        (S::Confirming { review, mode }, E::ToggleMode) => S::Confirming {
            review,
            mode: mode.toggled(),
        },
        (S::Confirming { mut review, mode }, E::Back) => {
            review.mode = mode;
            S::Reviewing(review)
        }
        (S::Confirming { review, mode }, E::Publish) => S::Publishing {
            review,
            mode,
            step: PublishStep::Preparing,
        },

        (S::Publishing { review, mode, .. }, E::PublishProgress(step)) => {
            S::Publishing { review, mode, step }
        }
        (S::Publishing { review, .. }, E::Published(summary)) => S::Done {
            summary,
            failed_targets: review
                .recommendations
                .iter()
                .filter(|r| matches!(r.status, RecommendationStatus::Error(_)))
                .count(),
        },
        (S::Publishing { review, mode, .. }, E::PublishFailed(reason)) => {
            S::Failed {
                review,
                mode,
                reason,
            }
        }

        (S::Failed { review, mode, .. }, E::Retry) if !review.selection.is_empty() => {
            S::Confirming { review, mode }
        }
        (S::Failed { mut review, mode, .. }, E::Back) if !review.recommendations.is_empty() => {
            review.mode = mode;
            S::Reviewing(review)
        }

        (state, _) => state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lib::model::{CurrentSpec, ResourceKind, SampleSeries, WorkloadKind, WorkloadTarget};
    use crate::lib::recommender::{RecommendationPolicy, recommend};
    use crate::lib::stats::UsageStats;

    fn recs() -> Vec<Recommendation> {
        ["api", "db", "web"]
            .iter()
            .map(|name| {
                let values: &[f64] = if *name == "db" { &[] } else { &[0.1, 0.3] };
                recommend(
                    &RecommendationPolicy::default(),
                    WorkloadTarget::new("shop", *name, "app"),
                    WorkloadKind::Deployment,
                    ResourceKind::Cpu,
                    CurrentSpec::default(),
                    UsageStats::from_series(&SampleSeries::from_values(values)),
                )
            })
            .collect()
    }

    fn run(state: ReviewState, events: Vec<ReviewEvent>) -> ReviewState {
        events.into_iter().fold(state, transition)
    }

    fn reviewing() -> ReviewState {
        run(
            ReviewState::new(),
            vec![
                ReviewEvent::Loaded(recs()),
                ReviewEvent::Begin(ApplyMode::PullRequest),
            ],
        )
    }

    #[test]
    fn loads_then_reviews() {
        let state = run(
            ReviewState::new(),
            vec![
                ReviewEvent::Progress(Progress {
                    completed: 1,
                    total: 3,
                }),
                ReviewEvent::Loaded(recs()),
            ],
        );
        assert!(matches!(state, ReviewState::Loaded { .. }));
        let state = transition(state, ReviewEvent::Begin(ApplyMode::Local));
        let review = state.review().unwrap();
        assert_eq!(review.cursor, 0);
        assert_eq!(review.mode, ApplyMode::Local);
    }

    #[test]
    fn cursor_stays_in_bounds() {
        let state = run(
            reviewing(),
            vec![
                ReviewEvent::Up,
                ReviewEvent::Down,
                ReviewEvent::Down,
                ReviewEvent::Down,
            ],
        );
        assert_eq!(state.review().unwrap().cursor, 2);
    }

    #[test]
    fn confirm_requires_a_selection() {
        let state = transition(reviewing(), ReviewEvent::Confirm);
        assert!(matches!(state, ReviewState::Reviewing(_)));

        // Insufficient data rows cannot be selected
        let state = run(reviewing(), vec![ReviewEvent::Down, ReviewEvent::Toggle]);
        assert!(state.review().unwrap().selection.is_empty());

        let state = run(state, vec![ReviewEvent::SelectAll, ReviewEvent::Confirm]);
        match state {
            ReviewState::Confirming { review, mode } => {
                assert_eq!(review.selection.len(), 2);
                assert_eq!(mode, ApplyMode::PullRequest);
            }
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[test]
    fn cancel_is_ignored_while_publishing() {
        let publishing = run(
            reviewing(),
            vec![
                ReviewEvent::Toggle,
                ReviewEvent::Confirm,
                ReviewEvent::ToggleMode,
                ReviewEvent::Publish,
            ],
        );
        assert!(matches!(
            publishing,
            ReviewState::Publishing {
                mode: ApplyMode::Local,
                ..
            }
        ));
        let still = transition(publishing.clone(), ReviewEvent::Cancel);
        assert_eq!(still, publishing);

        assert_eq!(
            transition(reviewing(), ReviewEvent::Cancel),
            ReviewState::Cancelled { failure: None }
        );
    }

    #[test]
    fn failure_keeps_selection_for_retry() {
        let failed = run(
            reviewing(),
            vec![
                ReviewEvent::Toggle,
                ReviewEvent::Confirm,
                ReviewEvent::Publish,
                ReviewEvent::PublishProgress(PublishStep::Pushing),
                ReviewEvent::PublishFailed("Conflict: branch exists".into()),
            ],
        );
        let ReviewState::Failed { review, reason, .. } = &failed else {
            panic!("expected Failed, got {:?}", failed);
        };
        assert_eq!(review.selection.len(), 1);
        assert!(reason.contains("Conflict"));

        let retried = run(
            failed,
            vec![
                ReviewEvent::Retry,
                ReviewEvent::Publish,
                ReviewEvent::Published("https://git.example/pr/1".into()),
            ],
        );
        assert!(retried.is_terminal());
        assert_eq!(transition(retried.clone(), ReviewEvent::Cancel), retried);
    }

    #[test]
    fn load_failure_cannot_retry_publish() {
        let failed = run(
            ReviewState::new(),
            vec![ReviewEvent::LoadFailed("backend down".into())],
        );
        let after = run(failed.clone(), vec![ReviewEvent::Retry, ReviewEvent::Back]);
        assert_eq!(after, failed);
    }

    fn publish_selection(state: ReviewState) -> ReviewState {
        run(
            state,
            vec![
                ReviewEvent::Toggle,
                ReviewEvent::Confirm,
                ReviewEvent::Publish,
                ReviewEvent::Published("done".into()),
            ],
        )
    }

    #[test]
    fn exit_status_follows_how_the_session_ended() {
        let done = publish_selection(reviewing());
        assert_eq!(
            done,
            ReviewState::Done {
                summary: "done".into(),
                failed_targets: 0,
            }
        );
        assert_eq!(done.exit_status(), ExitStatus::Success);

        assert_eq!(
            transition(reviewing(), ReviewEvent::Cancel).exit_status(),
            ExitStatus::Cancelled
        );

        let load_failed = run(
            ReviewState::new(),
            vec![ReviewEvent::LoadFailed("backend down".into())],
        );
        assert_eq!(load_failed.exit_status(), ExitStatus::Fatal);
        let quit = transition(load_failed, ReviewEvent::Cancel);
        assert_eq!(
            quit,
            ReviewState::Cancelled {
                failure: Some("backend down".into())
            }
        );
        assert_eq!(quit.exit_status(), ExitStatus::Fatal);
    }

    #[test]
    fn publishing_with_failed_targets_is_a_partial_failure() {
        let mut recommendations = recs();
        recommendations[1].status = RecommendationStatus::Error("query timed out".into());
        let state = run(
            ReviewState::new(),
            vec![
                ReviewEvent::Loaded(recommendations),
                ReviewEvent::Begin(ApplyMode::PullRequest),
            ],
        );

        let done = publish_selection(state);
        let ReviewState::Done { failed_targets, .. } = &done else {
            panic!("expected Done, got {:?}", done);
        };
        assert_eq!(*failed_targets, 1);
        assert_eq!(done.exit_status(), ExitStatus::PartialFailure);
    }
}
