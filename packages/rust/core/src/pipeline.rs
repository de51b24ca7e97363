//! End-to-end analysis pipeline: text → summary → knowledge graph → topics.
//!
//! The three stages are independent (each sees the same input text) but run
//! strictly in order. Artifacts are published to the [`Session`] only once all
//! three have succeeded; any failure discards whatever earlier stages produced.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, instrument, warn};

use studykit_reasoning::{
    Invocation, KnowledgeGraphContract, ReasoningClient, SummaryContract, TopicsContract,
};
use studykit_shared::{Artifacts, PipelineConfig, Result, RunId, StudyKitError};

use crate::loader;
use crate::session::{RunTicket, Session, Stage};

// ---------------------------------------------------------------------------
// Progress + results
// ---------------------------------------------------------------------------

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when a stage begins.
    fn phase(&self, stage: Stage);
    /// Called when a stage succeeded after rate-limit retries.
    fn stage_retried(&self, stage: Stage, retries: u32);
    /// Called when the run completes.
    fn done(&self, report: &RunReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _stage: Stage) {}
    fn stage_retried(&self, _stage: Stage, _retries: u32) {}
    fn done(&self, _report: &RunReport) {}
}

/// Timing and retry figures for one stage.
#[derive(Debug, Clone)]
pub struct StageReport {
    pub stage: Stage,
    pub retries: u32,
    pub elapsed: Duration,
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: RunId,
    /// The artifacts now published in the session.
    pub artifacts: Arc<Artifacts>,
    pub stages: Vec<StageReport>,
    pub elapsed: Duration,
}

impl RunReport {
    /// Retries summed over all stages.
    pub fn total_retries(&self) -> u32 {
        self.stages.iter().map(|s| s.retries).sum()
    }
}

/// How a run ended, when it did not fail.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Ready(RunReport),
    /// A newer run or a reset took over; nothing was published.
    Superseded,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Drives the fixed stage sequence against a reasoning client.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    client: ReasoningClient,
    config: PipelineConfig,
}

/// Result of one stage: `None` when the run was superseded before it started.
type StageResult<T> = Result<Option<(T, StageReport)>>;

impl Orchestrator {
    pub fn new(client: ReasoningClient, config: PipelineConfig) -> Self {
        Self { client, config }
    }

    pub fn client(&self) -> &ReasoningClient {
        &self.client
    }

    /// Load a document and analyze it.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn analyze_file(
        &self,
        session: &Session,
        path: &Path,
        progress: &dyn ProgressReporter,
    ) -> Result<RunOutcome> {
        let text = loader::extract_text(path)?;
        self.run(session, &text, progress).await
    }

    /// Run all three stages over `text` and publish the artifacts together.
    ///
    /// A stage failure marks the run failed in the session and is returned
    /// with its classification intact.
    #[instrument(skip_all, fields(chars = text.chars().count()))]
    pub async fn run(
        &self,
        session: &Session,
        text: &str,
        progress: &dyn ProgressReporter,
    ) -> Result<RunOutcome> {
        if text.trim().is_empty() {
            return Err(StudyKitError::unsupported_input(
                "document contains no text to analyze",
            ));
        }

        let start = Instant::now();
        let ticket = session.begin_run().await;
        info!(run_id = %ticket.run_id, "starting analysis");

        match self.run_stages(session, &ticket, text, progress).await {
            Ok(Some((artifacts, stages))) => {
                let Some(artifacts) = session.complete_run(&ticket, artifacts).await else {
                    info!(run_id = %ticket.run_id, "run superseded before publishing");
                    return Ok(RunOutcome::Superseded);
                };
                let report = RunReport {
                    run_id: ticket.run_id,
                    artifacts,
                    stages,
                    elapsed: start.elapsed(),
                };
                progress.done(&report);
                info!(
                    run_id = %report.run_id,
                    topics = report.artifacts.topics.len(),
                    entities = report.artifacts.knowledge_graph.entities.len(),
                    retries = report.total_retries(),
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "analysis complete"
                );
                Ok(RunOutcome::Ready(report))
            }
            Ok(None) => {
                info!(run_id = %ticket.run_id, "run superseded");
                Ok(RunOutcome::Superseded)
            }
            Err(e) => {
                let class = e.classification();
                if !session.fail_run(&ticket, class).await {
                    info!(run_id = %ticket.run_id, error = %e, "superseded run failed");
                    return Ok(RunOutcome::Superseded);
                }
                warn!(run_id = %ticket.run_id, class = %class, error = %e, "analysis failed");
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        session: &Session,
        ticket: &RunTicket,
        text: &str,
        progress: &dyn ProgressReporter,
    ) -> Result<Option<(Artifacts, Vec<StageReport>)>> {
        let max_chars = self.config.max_input_chars;
        let budget = self.config.stage_timeout();
        let mut stages = Vec::with_capacity(3);

        let contract = SummaryContract::new(text, max_chars);
        let call = self.client.invoke_within(&contract, budget);
        let Some((summary, report)) = self
            .run_stage(session, ticket, Stage::Summarizing, progress, call)
            .await?
        else {
            return Ok(None);
        };
        stages.push(report);

        let contract = KnowledgeGraphContract::new(text, max_chars);
        let call = self.client.invoke_within(&contract, budget);
        let Some((knowledge_graph, report)) = self
            .run_stage(session, ticket, Stage::GraphExtraction, progress, call)
            .await?
        else {
            return Ok(None);
        };
        stages.push(report);

        let contract = TopicsContract::new(text, max_chars);
        let call = self.client.invoke_within(&contract, budget);
        let Some((topics, report)) = self
            .run_stage(session, ticket, Stage::TopicExtraction, progress, call)
            .await?
        else {
            return Ok(None);
        };
        stages.push(report);

        Ok(Some((
            Artifacts {
                summary,
                knowledge_graph,
                topics: topics.topics,
            },
            stages,
        )))
    }

    /// Enter `stage` and await its time-bounded invocation.
    ///
    /// `call` is not polled when the run has already been superseded.
    async fn run_stage<T>(
        &self,
        session: &Session,
        ticket: &RunTicket,
        stage: Stage,
        progress: &dyn ProgressReporter,
        call: impl Future<Output = Result<Invocation<T>>>,
    ) -> StageResult<T> {
        if !session.set_stage(ticket, stage).await {
            return Ok(None);
        }
        progress.phase(stage);

        let started = Instant::now();
        let invocation = call.await?;

        if invocation.retries > 0 {
            progress.stage_retried(stage, invocation.retries);
        }
        let report = StageReport {
            stage,
            retries: invocation.retries,
            elapsed: started.elapsed(),
        };
        Ok(Some((invocation.value, report)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::fixtures::{self, GRAPH_JSON, SUMMARY_JSON, TOPICS_JSON};
    use studykit_reasoning::testing::ScriptedService;
    use studykit_reasoning::{GenerateRequest, ReasoningService, RetryPolicy, ServiceError};
    use studykit_shared::ErrorClass;

    const TEXT: &str = "Thermodynamics studies heat, work and entropy.";

    fn orchestrator(service: Arc<ScriptedService>) -> Orchestrator {
        let client = ReasoningClient::new(service, "test-model", RetryPolicy::default());
        Orchestrator::new(client, PipelineConfig::default())
    }

    fn script_success(service: &ScriptedService) {
        service.push_ok(SUMMARY_JSON);
        service.push_ok(GRAPH_JSON);
        service.push_ok(TOPICS_JSON);
    }

    #[derive(Default)]
    struct RecordingProgress {
        phases: Mutex<Vec<Stage>>,
        retried: Mutex<Vec<(Stage, u32)>>,
        done: Mutex<bool>,
    }

    impl ProgressReporter for RecordingProgress {
        fn phase(&self, stage: Stage) {
            self.phases.lock().unwrap().push(stage);
        }
        fn stage_retried(&self, stage: Stage, retries: u32) {
            self.retried.lock().unwrap().push((stage, retries));
        }
        fn done(&self, _report: &RunReport) {
            *self.done.lock().unwrap() = true;
        }
    }

    #[tokio::test]
    async fn successful_run_publishes_all_artifacts() {
        let service = Arc::new(ScriptedService::new());
        script_success(&service);
        let session = Session::new();
        let progress = RecordingProgress::default();

        let outcome = orchestrator(service.clone())
            .run(&session, TEXT, &progress)
            .await
            .unwrap();
        let RunOutcome::Ready(report) = outcome else {
            panic!("expected ready run");
        };

        assert_eq!(report.stages.len(), 3);
        assert_eq!(report.total_retries(), 0);
        assert_eq!(report.artifacts.topics[0].topic_id, "t1");
        assert_eq!(report.artifacts.knowledge_graph.entities.len(), 2);

        let snap = session.snapshot().await;
        assert_eq!(snap.stage, Stage::Ready);
        assert!(Arc::ptr_eq(&snap.artifacts.unwrap(), &report.artifacts));

        assert_eq!(
            *progress.phases.lock().unwrap(),
            vec![Stage::Summarizing, Stage::GraphExtraction, Stage::TopicExtraction]
        );
        assert!(*progress.done.lock().unwrap());

        // every stage sees the same raw text
        let requests = service.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests.iter().all(|r| r.prompt.contains(TEXT)));
    }

    #[tokio::test]
    async fn graph_failure_aborts_run_without_topics_call() {
        let service = Arc::new(ScriptedService::new());
        service.push_ok(SUMMARY_JSON);
        service.push_err("connection reset by peer");
        let session = Session::new();

        let err = orchestrator(service.clone())
            .run(&session, TEXT, &SilentProgress)
            .await
            .unwrap_err();

        assert_eq!(err.classification(), ErrorClass::Generic);
        assert_eq!(service.request_count(), 2);
        let snap = session.snapshot().await;
        assert_eq!(snap.stage, Stage::Failed);
        assert_eq!(snap.failure, Some(ErrorClass::Generic));
        assert!(snap.artifacts.is_none());
    }

    #[tokio::test]
    async fn schema_violation_is_not_retried() {
        let service = Arc::new(ScriptedService::new());
        service.push_ok(r#"{"overview": "", "key_takeaways": [], "detailed_summary": "x"}"#);
        let session = Session::new();

        let err = orchestrator(service.clone())
            .run(&session, TEXT, &SilentProgress)
            .await
            .unwrap_err();
        assert_eq!(err.classification(), ErrorClass::SchemaViolation);
        assert_eq!(service.request_count(), 1);
        assert_eq!(session.stage().await, Stage::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_graph_stage_recovers_after_two_retries() {
        let service = Arc::new(ScriptedService::new());
        service.push_ok(SUMMARY_JSON);
        service.push_err("429 RESOURCE_EXHAUSTED: quota exceeded");
        service.push_err("429 RESOURCE_EXHAUSTED: quota exceeded");
        service.push_ok(GRAPH_JSON);
        service.push_ok(TOPICS_JSON);
        let session = Session::new();
        let progress = RecordingProgress::default();

        let outcome = orchestrator(service.clone())
            .run(&session, TEXT, &progress)
            .await
            .unwrap();
        let RunOutcome::Ready(report) = outcome else {
            panic!("expected ready run");
        };

        let retries: Vec<u32> = report.stages.iter().map(|s| s.retries).collect();
        assert_eq!(retries, vec![0, 2, 0]);
        assert_eq!(
            *progress.retried.lock().unwrap(),
            vec![(Stage::GraphExtraction, 2)]
        );
        assert_eq!(service.request_count(), 5);
        assert_eq!(session.stage().await, Stage::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_rate_limit_surfaces_as_rate_limited() {
        let service = Arc::new(ScriptedService::new());
        for _ in 0..3 {
            service.push_err("Too Many Requests");
        }
        let session = Session::new();

        let err = orchestrator(service.clone())
            .run(&session, TEXT, &SilentProgress)
            .await
            .unwrap_err();
        assert_eq!(err.classification(), ErrorClass::RateLimited);
        assert_eq!(service.request_count(), 3);
        assert_eq!(session.snapshot().await.failure, Some(ErrorClass::RateLimited));
    }

    #[tokio::test]
    async fn empty_text_never_starts_a_run() {
        let service = Arc::new(ScriptedService::new());
        let session = Session::new();

        let err = orchestrator(service.clone())
            .run(&session, " \n\t", &SilentProgress)
            .await
            .unwrap_err();
        assert_eq!(err.classification(), ErrorClass::UnsupportedInput);
        assert_eq!(service.request_count(), 0);
        assert_eq!(session.stage().await, Stage::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_stage_times_out_as_generic() {
        let service = Arc::new(ScriptedService::new());
        service.push_ok(SUMMARY_JSON);
        service.push_stall();
        let session = Session::new();

        let err = orchestrator(service.clone())
            .run(&session, TEXT, &SilentProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, StudyKitError::Timeout { .. }));
        assert_eq!(err.classification(), ErrorClass::Generic);
        assert_eq!(session.stage().await, Stage::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn throttling_past_stage_timeout_reports_rate_limit() {
        let service = Arc::new(ScriptedService::new());
        for _ in 0..3 {
            service.push_err("429 quota exceeded");
        }
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(100),
            jitter_max: Duration::from_secs(1),
        };
        let client = ReasoningClient::new(service.clone(), "test-model", policy);
        let session = Session::new();

        let err = Orchestrator::new(client, PipelineConfig::default())
            .run(&session, TEXT, &SilentProgress)
            .await
            .unwrap_err();

        assert_eq!(err.classification(), ErrorClass::RateLimited);
        assert_eq!(session.snapshot().await.failure, Some(ErrorClass::RateLimited));
    }

    /// Resets the session while answering the graph request.
    struct ResettingService {
        session: Session,
        inner: ScriptedService,
    }

    #[async_trait::async_trait]
    impl ReasoningService for ResettingService {
        async fn generate(
            &self,
            request: &GenerateRequest,
        ) -> std::result::Result<String, ServiceError> {
            if self.inner.request_count() == 1 {
                self.session.reset().await;
            }
            self.inner.generate(request).await
        }
    }

    #[tokio::test]
    async fn reset_during_run_supersedes_it() {
        let session = Session::new();
        let service = Arc::new(ResettingService {
            session: session.clone(),
            inner: ScriptedService::new(),
        });
        script_success(&service.inner);
        let client = ReasoningClient::new(service.clone(), "test-model", RetryPolicy::default());
        let orchestrator = Orchestrator::new(client, PipelineConfig::default());

        let outcome = orchestrator
            .run(&session, TEXT, &SilentProgress)
            .await
            .unwrap();
        assert!(matches!(outcome, RunOutcome::Superseded));
        // topics stage never issued
        assert_eq!(service.inner.request_count(), 2);
        assert_eq!(session.stage().await, Stage::Idle);
        assert!(session.artifacts().await.is_none());
    }

    #[tokio::test]
    async fn analyze_file_rejects_unsupported_format() {
        let service = Arc::new(ScriptedService::new());
        let session = Session::new();
        let path = std::env::temp_dir().join(format!("studykit-{}.pdf", RunId::new()));
        std::fs::write(&path, b"%PDF").unwrap();

        let err = orchestrator(service.clone())
            .analyze_file(&session, &path, &SilentProgress)
            .await
            .unwrap_err();
        assert_eq!(err.classification(), ErrorClass::UnsupportedInput);
        assert_eq!(service.request_count(), 0);
    }

    #[tokio::test]
    async fn newer_run_wins_over_older() {
        let service = Arc::new(ScriptedService::new());
        script_success(&service);
        let session = Session::new();
        let stale = session.begin_run().await;

        orchestrator(service)
            .run(&session, TEXT, &SilentProgress)
            .await
            .unwrap();
        assert!(session.complete_run(&stale, fixtures::artifacts()).await.is_none());
        assert_eq!(session.artifacts().await.unwrap().topics[0].title, "Thermodynamics");
    }
}
