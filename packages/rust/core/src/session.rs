//! Session state: the current pipeline run, its artifacts, and the active quiz.
//!
//! [`Session`] is a cloneable handle over the single owned [`SessionState`].
//! Every mutation goes through a method here and is guarded by a generation
//! token: long-running work captures a ticket before it suspends and presents
//! it on completion; a ticket from a superseded run or quiz is refused and the
//! late result is dropped. The lock is never held across a service call.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use studykit_reasoning::Directive;
use studykit_shared::{Artifacts, ErrorClass, QuizQuestion, Result, RunId, StudyKitError, Topic};

use crate::assessment::QuizSession;

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// Pipeline progress as observed from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    Ingesting,
    Summarizing,
    GraphExtraction,
    TopicExtraction,
    Ready,
    Failed,
}

impl Stage {
    /// Human-readable progress label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Ingesting => "Ingesting document",
            Self::Summarizing => "Generating executive summary",
            Self::GraphExtraction => "Extracting knowledge graph",
            Self::TopicExtraction => "Identifying study topics",
            Self::Ready => "Analysis complete",
            Self::Failed => "Analysis failed",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// PipelineRun
// ---------------------------------------------------------------------------

/// The single active analysis run.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub id: RunId,
    pub generation: u64,
    pub stage: Stage,
    pub started_at: DateTime<Utc>,
    /// Present only in [`Stage::Ready`].
    artifacts: Option<Arc<Artifacts>>,
    /// Present only in [`Stage::Failed`].
    failure: Option<ErrorClass>,
}

/// Captured by the orchestrator when a run starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunTicket {
    pub run_id: RunId,
    generation: u64,
}

/// Captured by the assessment engine before generating questions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuizTicket {
    generation: u64,
}

/// Point-in-time copy of the run for display.
#[derive(Debug, Clone)]
pub struct RunSnapshot {
    pub run_id: Option<RunId>,
    pub stage: Stage,
    pub artifacts: Option<Arc<Artifacts>>,
    pub failure: Option<ErrorClass>,
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Owned state behind a [`Session`].
#[derive(Debug, Default)]
pub struct SessionState {
    run: Option<PipelineRun>,
    run_generation: u64,
    quiz: Option<QuizSession>,
    quiz_generation: u64,
}

impl SessionState {
    fn current_run(&mut self, ticket: &RunTicket) -> Option<&mut PipelineRun> {
        if ticket.generation != self.run_generation {
            return None;
        }
        self.run.as_mut().filter(|r| r.generation == ticket.generation)
    }

    fn discard_quiz(&mut self) {
        self.quiz = None;
        self.quiz_generation += 1;
    }
}

/// Cloneable handle to the process-wide session state.
#[derive(Debug, Clone, Default)]
pub struct Session {
    inner: Arc<Mutex<SessionState>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    // --- Run lifecycle ---

    /// Start a new run, superseding any previous run and quiz.
    pub async fn begin_run(&self) -> RunTicket {
        let mut state = self.inner.lock().await;
        state.run_generation += 1;
        state.discard_quiz();

        let run = PipelineRun {
            id: RunId::new(),
            generation: state.run_generation,
            stage: Stage::Ingesting,
            started_at: Utc::now(),
            artifacts: None,
            failure: None,
        };
        let ticket = RunTicket {
            run_id: run.id.clone(),
            generation: run.generation,
        };
        debug!(run_id = %run.id, generation = run.generation, "run started");
        state.run = Some(run);
        ticket
    }

    /// Move the run to an in-progress stage. Returns `false` if the ticket is stale.
    pub async fn set_stage(&self, ticket: &RunTicket, stage: Stage) -> bool {
        debug_assert!(!matches!(stage, Stage::Ready | Stage::Failed | Stage::Idle));
        let mut state = self.inner.lock().await;
        match state.current_run(ticket) {
            Some(run) => {
                run.stage = stage;
                true
            }
            None => false,
        }
    }

    /// Publish all artifacts at once and mark the run ready.
    ///
    /// Returns `None` (and changes nothing) if the ticket is stale.
    pub async fn complete_run(
        &self,
        ticket: &RunTicket,
        artifacts: Artifacts,
    ) -> Option<Arc<Artifacts>> {
        let mut state = self.inner.lock().await;
        let run = state.current_run(ticket)?;
        let artifacts = Arc::new(artifacts);
        run.stage = Stage::Ready;
        run.artifacts = Some(artifacts.clone());
        run.failure = None;
        info!(run_id = %run.id, "run ready");
        Some(artifacts)
    }

    /// Mark the run failed. Returns `false` if the ticket is stale.
    pub async fn fail_run(&self, ticket: &RunTicket, class: ErrorClass) -> bool {
        let mut state = self.inner.lock().await;
        match state.current_run(ticket) {
            Some(run) => {
                run.stage = Stage::Failed;
                run.artifacts = None;
                run.failure = Some(class);
                true
            }
            None => false,
        }
    }

    /// "New analysis": drop the run and quiz and return to idle.
    pub async fn reset(&self) {
        let mut state = self.inner.lock().await;
        state.run = None;
        state.run_generation += 1;
        state.discard_quiz();
        debug!("session reset");
    }

    // --- Read access ---

    pub async fn stage(&self) -> Stage {
        let state = self.inner.lock().await;
        state.run.as_ref().map_or(Stage::Idle, |r| r.stage)
    }

    pub async fn snapshot(&self) -> RunSnapshot {
        let state = self.inner.lock().await;
        match &state.run {
            Some(run) => RunSnapshot {
                run_id: Some(run.id.clone()),
                stage: run.stage,
                artifacts: run.artifacts.clone(),
                failure: run.failure,
            },
            None => RunSnapshot {
                run_id: None,
                stage: Stage::Idle,
                artifacts: None,
                failure: None,
            },
        }
    }

    /// Artifacts of the current run, if it is ready.
    pub async fn artifacts(&self) -> Option<Arc<Artifacts>> {
        let state = self.inner.lock().await;
        state.run.as_ref().and_then(|r| r.artifacts.clone())
    }

    /// Copy of the active quiz, if any.
    pub async fn quiz(&self) -> Option<QuizSession> {
        self.inner.lock().await.quiz.clone()
    }

    // --- Quiz lifecycle ---

    /// Claim a fresh quiz generation for `topic_id`, superseding any in-flight
    /// quiz generation. Requires a ready run that contains the topic.
    pub async fn begin_quiz(&self, topic_id: &str) -> Result<(QuizTicket, Topic)> {
        let mut state = self.inner.lock().await;
        let artifacts = state
            .run
            .as_ref()
            .and_then(|r| r.artifacts.clone())
            .ok_or_else(|| StudyKitError::invalid_state("no completed analysis to quiz on"))?;
        let topic = artifacts
            .topic(topic_id)
            .cloned()
            .ok_or_else(|| StudyKitError::invalid_state(format!("unknown topic '{topic_id}'")))?;

        state.quiz_generation += 1;
        Ok((
            QuizTicket {
                generation: state.quiz_generation,
            },
            topic,
        ))
    }

    /// Capture the completed quiz for regeneration without touching it.
    ///
    /// Returns the ticket, topic, final score and question count.
    pub async fn begin_retake(&self) -> Result<(QuizTicket, Topic, usize, usize)> {
        let state = self.inner.lock().await;
        let quiz = state
            .quiz
            .as_ref()
            .ok_or_else(|| StudyKitError::invalid_state("no active quiz"))?;
        let score = quiz
            .final_score()
            .ok_or_else(|| StudyKitError::invalid_state("quiz is not completed"))?;

        Ok((
            QuizTicket {
                generation: state.quiz_generation,
            },
            quiz.topic().clone(),
            score,
            quiz.total(),
        ))
    }

    /// Replace the active quiz wholesale. Returns `false` if the ticket is stale.
    pub async fn install_quiz(
        &self,
        ticket: QuizTicket,
        topic: Topic,
        questions: Vec<QuizQuestion>,
        directive: Option<Directive>,
    ) -> Result<bool> {
        let mut state = self.inner.lock().await;
        if ticket.generation != state.quiz_generation {
            debug!(
                ticket = ticket.generation,
                current = state.quiz_generation,
                "discarding stale quiz"
            );
            return Ok(false);
        }

        let quiz = QuizSession::new(topic, questions, directive, state.quiz_generation + 1)?;
        state.quiz_generation += 1;
        state.quiz = Some(quiz);
        Ok(true)
    }

    /// Run a state-machine operation on the active quiz.
    pub async fn with_quiz<R>(
        &self,
        op: impl FnOnce(&mut QuizSession) -> Result<R>,
    ) -> Result<R> {
        let mut state = self.inner.lock().await;
        let quiz = state
            .quiz
            .as_mut()
            .ok_or_else(|| StudyKitError::invalid_state("no active quiz"))?;
        op(quiz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[tokio::test]
    async fn new_session_is_idle() {
        let session = Session::new();
        assert_eq!(session.stage().await, Stage::Idle);
        assert!(session.artifacts().await.is_none());
        assert!(session.quiz().await.is_none());
    }

    #[tokio::test]
    async fn artifacts_only_visible_when_ready() {
        let session = Session::new();
        let ticket = session.begin_run().await;
        assert_eq!(session.stage().await, Stage::Ingesting);

        assert!(session.set_stage(&ticket, Stage::Summarizing).await);
        assert!(session.artifacts().await.is_none());

        session
            .complete_run(&ticket, fixtures::artifacts())
            .await
            .expect("ticket is current");
        let snap = session.snapshot().await;
        assert_eq!(snap.stage, Stage::Ready);
        assert_eq!(snap.run_id, Some(ticket.run_id));
        assert!(snap.artifacts.is_some());
    }

    #[tokio::test]
    async fn stale_ticket_cannot_touch_newer_run() {
        let session = Session::new();
        let old = session.begin_run().await;
        let new = session.begin_run().await;

        assert!(!session.set_stage(&old, Stage::Summarizing).await);
        assert!(session.complete_run(&old, fixtures::artifacts()).await.is_none());
        assert!(!session.fail_run(&old, ErrorClass::Generic).await);

        let snap = session.snapshot().await;
        assert_eq!(snap.stage, Stage::Ingesting);
        assert_eq!(snap.run_id, Some(new.run_id));
    }

    #[tokio::test]
    async fn reset_discards_everything() {
        let session = Session::new();
        let ticket = session.begin_run().await;
        session.complete_run(&ticket, fixtures::artifacts()).await;

        session.reset().await;
        assert_eq!(session.stage().await, Stage::Idle);
        assert!(session.artifacts().await.is_none());
        assert!(session.complete_run(&ticket, fixtures::artifacts()).await.is_none());
    }

    #[tokio::test]
    async fn failure_clears_artifacts_and_records_class() {
        let session = Session::new();
        let ticket = session.begin_run().await;
        assert!(session.fail_run(&ticket, ErrorClass::RateLimited).await);

        let snap = session.snapshot().await;
        assert_eq!(snap.stage, Stage::Failed);
        assert_eq!(snap.failure, Some(ErrorClass::RateLimited));
        assert!(snap.artifacts.is_none());
    }

    #[tokio::test]
    async fn begin_quiz_requires_ready_run_and_known_topic() {
        let session = Session::new();
        assert!(session.begin_quiz("t1").await.is_err());

        let ticket = session.begin_run().await;
        session.complete_run(&ticket, fixtures::artifacts()).await;
        assert!(session.begin_quiz("nope").await.is_err());

        let (_, topic) = session.begin_quiz("t1").await.expect("topic exists");
        assert_eq!(topic.title, "Thermodynamics");
    }

    #[tokio::test]
    async fn newer_quiz_ticket_supersedes_older() {
        let session = Session::new();
        let ticket = session.begin_run().await;
        session.complete_run(&ticket, fixtures::artifacts()).await;

        let (first, topic) = session.begin_quiz("t1").await.unwrap();
        let (second, _) = session.begin_quiz("t1").await.unwrap();

        let installed = session
            .install_quiz(first, topic.clone(), fixtures::questions(3), None)
            .await
            .unwrap();
        assert!(!installed);
        assert!(session.quiz().await.is_none());

        let installed = session
            .install_quiz(second, topic, fixtures::questions(3), None)
            .await
            .unwrap();
        assert!(installed);
        assert_eq!(session.quiz().await.unwrap().total(), 3);
    }

    #[tokio::test]
    async fn rejected_install_keeps_ticket_valid() {
        let session = Session::new();
        let ticket = session.begin_run().await;
        session.complete_run(&ticket, fixtures::artifacts()).await;
        let (quiz_ticket, topic) = session.begin_quiz("t1").await.unwrap();

        assert!(
            session
                .install_quiz(quiz_ticket, topic.clone(), vec![], None)
                .await
                .is_err()
        );
        assert!(session.quiz().await.is_none());

        let installed = session
            .install_quiz(quiz_ticket, topic, fixtures::questions(2), None)
            .await
            .unwrap();
        assert!(installed);
    }

    #[tokio::test]
    async fn new_run_invalidates_in_flight_quiz() {
        let session = Session::new();
        let ticket = session.begin_run().await;
        session.complete_run(&ticket, fixtures::artifacts()).await;
        let (quiz_ticket, topic) = session.begin_quiz("t1").await.unwrap();

        session.begin_run().await;
        let installed = session
            .install_quiz(quiz_ticket, topic, fixtures::questions(2), None)
            .await
            .unwrap();
        assert!(!installed);
    }
}
