//! Adaptive assessment: the per-topic quiz state machine and the
//! score-driven regeneration policy.
//!
//! ```text
//! Presenting(i) --select--> Presenting(i)          (tentative choice)
//! Presenting(i) --submit--> Answered(i, choice)    (score += exact match)
//! Answered(i)   --advance-> Presenting(i+1) | Completed(score)
//! Completed     --adaptive_retake--> Presenting(0) (new questions, score 0)
//! ```

use std::time::Duration;

use serde::Serialize;
use tracing::{info, instrument, warn};

use studykit_reasoning::{Directive, QuizContract, ReasoningClient};
use studykit_shared::{QuizQuestion, Result, StudyKitError, Topic};

use crate::session::{QuizTicket, Session};

// ---------------------------------------------------------------------------
// Regeneration policy
// ---------------------------------------------------------------------------

/// Directive for the next quiz given the last result.
///
/// Below half marks asks for easier questions, a perfect score for harder
/// ones, anything in between regenerates neutrally.
pub fn regeneration_directive(score: usize, total: usize) -> Option<Directive> {
    if 2 * score < total {
        Some(Directive::Easier)
    } else if score == total {
        Some(Directive::Advanced)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// QuizSession
// ---------------------------------------------------------------------------

/// Where a quiz session currently is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum QuizPhase {
    Presenting { index: usize },
    Answered { index: usize, selection: String },
    Completed { score: usize },
}

/// Result of submitting an answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerFeedback {
    pub correct: bool,
    pub selection: String,
    pub correct_answer: String,
    pub explanation: String,
}

/// One attempt at a fixed list of questions.
///
/// The question list never changes after construction; a retake builds a new
/// session instead.
#[derive(Debug, Clone)]
pub struct QuizSession {
    topic: Topic,
    questions: Vec<QuizQuestion>,
    directive: Option<Directive>,
    generation: u64,
    phase: QuizPhase,
    tentative: Option<String>,
    selections: Vec<Option<String>>,
    score: usize,
}

impl QuizSession {
    /// Start at the first question with a zero score.
    pub fn new(
        topic: Topic,
        questions: Vec<QuizQuestion>,
        directive: Option<Directive>,
        generation: u64,
    ) -> Result<Self> {
        if questions.is_empty() {
            return Err(StudyKitError::invalid_state("a quiz needs at least one question"));
        }
        let selections = vec![None; questions.len()];
        Ok(Self {
            topic,
            questions,
            directive,
            generation,
            phase: QuizPhase::Presenting { index: 0 },
            tentative: None,
            selections,
            score: 0,
        })
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn questions(&self) -> &[QuizQuestion] {
        &self.questions
    }

    /// Directive this quiz was generated under.
    pub fn directive(&self) -> Option<Directive> {
        self.directive
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn phase(&self) -> &QuizPhase {
        &self.phase
    }

    pub fn score(&self) -> usize {
        self.score
    }

    pub fn total(&self) -> usize {
        self.questions.len()
    }

    /// Final score once completed.
    pub fn final_score(&self) -> Option<usize> {
        match self.phase {
            QuizPhase::Completed { score } => Some(score),
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.final_score().is_some()
    }

    /// Index of the question being shown; `None` once completed.
    pub fn current_index(&self) -> Option<usize> {
        match self.phase {
            QuizPhase::Presenting { index } | QuizPhase::Answered { index, .. } => Some(index),
            QuizPhase::Completed { .. } => None,
        }
    }

    pub fn current_question(&self) -> Option<&QuizQuestion> {
        self.current_index().map(|i| &self.questions[i])
    }

    /// Choice made but not yet submitted.
    pub fn tentative_selection(&self) -> Option<&str> {
        self.tentative.as_deref()
    }

    /// Submitted selection per question.
    pub fn selections(&self) -> &[Option<String>] {
        &self.selections
    }

    /// Record a tentative choice. Repeated calls overwrite it.
    pub fn select(&mut self, option: &str) -> Result<()> {
        let QuizPhase::Presenting { index } = self.phase else {
            return Err(StudyKitError::invalid_state(
                "an option can only be selected while a question is presented",
            ));
        };
        if !self.questions[index].options.iter().any(|o| o == option) {
            return Err(StudyKitError::invalid_state(format!(
                "'{option}' is not an option of question {}",
                index + 1
            )));
        }
        self.tentative = Some(option.to_string());
        Ok(())
    }

    /// Lock in the tentative choice and score it.
    pub fn submit(&mut self) -> Result<AnswerFeedback> {
        let QuizPhase::Presenting { index } = self.phase else {
            return Err(StudyKitError::invalid_state(
                "answers can only be submitted while a question is presented",
            ));
        };
        let selection = self
            .tentative
            .take()
            .ok_or_else(|| StudyKitError::invalid_state("select an option before submitting"))?;

        let question = &self.questions[index];
        let correct = question.is_correct(&selection);
        if correct {
            self.score += 1;
        }

        let feedback = AnswerFeedback {
            correct,
            selection: selection.clone(),
            correct_answer: question.correct_answer.clone(),
            explanation: question.explanation.clone(),
        };
        self.selections[index] = Some(selection.clone());
        self.phase = QuizPhase::Answered { index, selection };
        Ok(feedback)
    }

    /// Move past an answered question, completing the quiz after the last one.
    pub fn advance(&mut self) -> Result<&QuizPhase> {
        let QuizPhase::Answered { index, .. } = self.phase else {
            return Err(StudyKitError::invalid_state(
                "only an answered question can be advanced past",
            ));
        };
        self.phase = if index + 1 < self.questions.len() {
            QuizPhase::Presenting { index: index + 1 }
        } else {
            QuizPhase::Completed { score: self.score }
        };
        Ok(&self.phase)
    }
}

// ---------------------------------------------------------------------------
// AssessmentEngine
// ---------------------------------------------------------------------------

/// Outcome of generating a quiz.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuizOutcome {
    /// The new quiz is now active.
    Installed {
        questions: usize,
        directive: Option<Directive>,
    },
    /// A newer quiz or run took over while generating; the result was dropped.
    Superseded,
}

/// Generates quizzes through the reasoning client and drives the active one.
#[derive(Debug, Clone)]
pub struct AssessmentEngine {
    client: ReasoningClient,
    question_count: usize,
    timeout: Duration,
}

impl AssessmentEngine {
    pub fn new(client: ReasoningClient, question_count: usize, timeout: Duration) -> Self {
        Self {
            client,
            question_count,
            timeout,
        }
    }

    /// Generate the first quiz for a topic of the ready run.
    #[instrument(skip_all, fields(topic_id = %topic_id))]
    pub async fn start_quiz(&self, session: &Session, topic_id: &str) -> Result<QuizOutcome> {
        let (ticket, topic) = session.begin_quiz(topic_id).await?;
        self.generate_and_install(session, ticket, topic, None).await
    }

    /// Regenerate a completed quiz, adapting difficulty to its score.
    ///
    /// On failure the completed quiz stays exactly as it was.
    #[instrument(skip_all)]
    pub async fn adaptive_retake(&self, session: &Session) -> Result<QuizOutcome> {
        let (ticket, topic, score, total) = session.begin_retake().await?;
        let directive = regeneration_directive(score, total);
        info!(score, total, ?directive, "regenerating quiz");
        self.generate_and_install(session, ticket, topic, directive)
            .await
    }

    pub async fn select(&self, session: &Session, option: &str) -> Result<()> {
        session.with_quiz(|quiz| quiz.select(option)).await
    }

    pub async fn submit(&self, session: &Session) -> Result<AnswerFeedback> {
        session.with_quiz(QuizSession::submit).await
    }

    pub async fn advance(&self, session: &Session) -> Result<QuizPhase> {
        session.with_quiz(|quiz| quiz.advance().cloned()).await
    }

    async fn generate_and_install(
        &self,
        session: &Session,
        ticket: QuizTicket,
        topic: Topic,
        directive: Option<Directive>,
    ) -> Result<QuizOutcome> {
        let contract = QuizContract::new(&topic, self.question_count, directive);
        let invocation = self
            .client
            .invoke_within(&contract, self.timeout)
            .await
            .inspect_err(|e| {
                warn!(topic_id = %topic.topic_id, error = %e, "quiz generation failed");
            })?;

        let questions = invocation.value.questions;
        let count = questions.len();
        if !session
            .install_quiz(ticket, topic, questions, directive)
            .await?
        {
            return Ok(QuizOutcome::Superseded);
        }

        info!(questions = count, ?directive, "quiz installed");
        Ok(QuizOutcome::Installed {
            questions: count,
            directive,
        })
    }
}
