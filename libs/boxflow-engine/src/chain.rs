//! Middleware and postprocessor chain execution.
//!
//! The middleware chain is strictly sequential; a failing stage is
//! recorded and its input flows on unchanged. The postprocessor chain
//! supports sequential / parallel / conditional execution, per-chain
//! error strategies, a wall-clock timeout, and per-step metadata
//! collection under `context.metadata["postprocessor_chain"]`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tokio::task::JoinSet;

use boxflow_api::error::{ErrorKind, PluginError};
use boxflow_api::middleware::Middleware;
use boxflow_api::model::{ParsedServer, PipelineContext, PipelineError};
use boxflow_api::postprocessor::PostProcessor;
use boxflow_api::profile::FullProfile;
use boxflow_api::trace;

// ---------------------------------------------------------------------------
// Middleware chain
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MiddlewareChain {
    stages: Vec<Box<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new(stages: Vec<Box<dyn Middleware>>) -> Self {
        Self { stages }
    }

    pub fn push(&mut self, stage: Box<dyn Middleware>) {
        self.stages.push(stage);
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn process(
        &self,
        servers: Vec<ParsedServer>,
        ctx: &mut PipelineContext,
        profile: Option<&FullProfile>,
    ) -> Vec<ParsedServer> {
        run_middleware(self.stages.iter().map(|m| &**m), servers, ctx, profile)
    }
}

/// Run an ordered set of middleware stages. A stage failure is converted
/// to a `middleware` error record and the stage's input is preserved.
pub fn run_middleware<'a>(
    stages: impl Iterator<Item = &'a dyn Middleware>,
    mut servers: Vec<ParsedServer>,
    ctx: &mut PipelineContext,
    profile: Option<&FullProfile>,
) -> Vec<ParsedServer> {
    for stage in stages {
        if let Err(e) = stage.pre_process(&servers, ctx) {
            ctx.push_error(PipelineError::from_plugin(stage.name(), e));
            continue;
        }
        match stage.process(servers.clone(), ctx, profile) {
            Ok(out) => {
                if let Err(e) = stage.post_process(&out, ctx) {
                    ctx.push_error(PipelineError::from_plugin(stage.name(), e));
                }
                servers = out;
            }
            Err(e) => {
                tracing::warn!(
                    trace_id = %ctx.trace_id,
                    middleware = stage.name(),
                    error = %e,
                    "middleware stage failed, keeping its input"
                );
                ctx.push_error(PipelineError::from_plugin(stage.name(), e));
            }
        }
    }
    servers
}

// ---------------------------------------------------------------------------
// Postprocessor chain
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Sequential,
    Parallel,
    Conditional,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStrategy {
    FailFast,
    #[default]
    Continue,
    Retry,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Lowest-index successful result wins (deterministic regardless of
    /// completion order).
    #[default]
    FirstSuccess,
    /// Concatenate successful results in submission order, deduplicated
    /// by endpoint identity.
    Concat,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub execution_mode: ExecutionMode,
    pub error_strategy: ErrorStrategy,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub timeout_secs: u64,
    pub merge_strategy: MergeStrategy,
    pub collect_metadata: bool,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            execution_mode: ExecutionMode::Sequential,
            error_strategy: ErrorStrategy::Continue,
            max_retries: 2,
            retry_delay_ms: 1000,
            timeout_secs: 300,
            merge_strategy: MergeStrategy::FirstSuccess,
            collect_metadata: true,
        }
    }
}

pub const CHAIN_META_KEY: &str = "postprocessor_chain";

#[derive(Default)]
struct StepLog {
    executed: Vec<Value>,
    failed: Vec<Value>,
    skipped: Vec<Value>,
}

pub struct PostProcessorChain {
    steps: Vec<Arc<dyn PostProcessor>>,
    config: ChainConfig,
}

impl std::fmt::Debug for PostProcessorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostProcessorChain")
            .field("steps", &self.steps.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("config", &self.config)
            .finish()
    }
}

impl Default for PostProcessorChain {
    fn default() -> Self {
        Self::new(Vec::new(), ChainConfig::default())
    }
}

impl PostProcessorChain {
    pub fn new(steps: Vec<Arc<dyn PostProcessor>>, config: ChainConfig) -> Self {
        Self { steps, config }
    }

    pub fn push(&mut self, step: Arc<dyn PostProcessor>) {
        self.steps.push(step);
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Execute the chain. Never fails the pipeline: on a chain-level
    /// error or timeout the input set is returned with records appended.
    pub async fn process(
        &self,
        servers: Vec<ParsedServer>,
        ctx: &mut PipelineContext,
        profile: Option<&FullProfile>,
    ) -> Vec<ParsedServer> {
        if self.steps.is_empty() || servers.is_empty() {
            return servers;
        }

        let started = Instant::now();
        let input = servers.clone();
        let timeout = Duration::from_secs(self.config.timeout_secs.max(1));
        let mut log = StepLog::default();

        let run = async {
            match self.config.execution_mode {
                ExecutionMode::Sequential => {
                    self.run_ordered(servers, ctx, profile, &mut log, false).await
                }
                ExecutionMode::Conditional => {
                    self.run_ordered(servers, ctx, profile, &mut log, true).await
                }
                ExecutionMode::Parallel => self.run_parallel(servers, ctx, profile, &mut log).await,
            }
        };

        let outcome = tokio::time::timeout(timeout, run).await;
        let result = match outcome {
            Ok(out) => out,
            Err(_) => {
                ctx.push_error(PipelineError::new(
                    ErrorKind::Timeout,
                    CHAIN_META_KEY,
                    format!("postprocessor chain timed out after {timeout:?}"),
                ));
                Err(input.clone())
            }
        };

        let (output, success) = match result {
            Ok(out) => (out, true),
            Err(original) => (original, false),
        };

        if self.config.collect_metadata {
            ctx.set_stage_meta(
                CHAIN_META_KEY,
                json!({
                    "execution_mode": format!("{:?}", self.config.execution_mode).to_lowercase(),
                    "merge_strategy": format!("{:?}", self.config.merge_strategy).to_lowercase(),
                    "total_steps": self.steps.len(),
                    "executed": log.executed,
                    "failed": log.failed,
                    "skipped": log.skipped,
                    "duration_ms": started.elapsed().as_millis() as u64,
                    "success": success,
                }),
            );
        }
        output
    }

    /// Sequential and conditional execution share one loop; conditional
    /// additionally consults the per-step predicate.
    async fn run_ordered(
        &self,
        mut servers: Vec<ParsedServer>,
        ctx: &mut PipelineContext,
        profile: Option<&FullProfile>,
        log: &mut StepLog,
        conditional: bool,
    ) -> Result<Vec<ParsedServer>, Vec<ParsedServer>> {
        let input = servers.clone();

        for (idx, step) in self.steps.iter().enumerate() {
            if !step.can_process(&servers, ctx) {
                log.skipped.push(json!({"index": idx, "name": step.name(), "reason": "cannot_process"}));
                continue;
            }
            if conditional && !should_execute(step.as_ref(), profile) {
                log.skipped.push(json!({"index": idx, "name": step.name(), "reason": "conditional_skip"}));
                continue;
            }

            let step_started = Instant::now();
            let input_count = servers.len();
            match self.run_with_retry(step.as_ref(), servers.clone(), ctx, profile).await {
                Ok(out) => {
                    log.executed.push(json!({
                        "index": idx,
                        "name": step.name(),
                        "input_count": input_count,
                        "output_count": out.len(),
                        "duration_ms": step_started.elapsed().as_millis() as u64,
                    }));
                    servers = out;
                }
                Err(e) => {
                    log.failed.push(json!({"index": idx, "name": step.name(), "error": e.to_string()}));
                    ctx.push_error(PipelineError::from_plugin(step.name(), e));
                    if self.config.error_strategy == ErrorStrategy::FailFast {
                        return Err(input);
                    }
                }
            }
        }
        Ok(servers)
    }

    /// Parallel execution: every step sees the original input; workers run
    /// under the parent's trace id and the merged result is deterministic.
    async fn run_parallel(
        &self,
        servers: Vec<ParsedServer>,
        ctx: &mut PipelineContext,
        profile: Option<&FullProfile>,
        log: &mut StepLog,
    ) -> Result<Vec<ParsedServer>, Vec<ParsedServer>> {
        let base_errors = ctx.errors().len();
        let trace_id = ctx.trace_id.clone();
        let mut join_set = JoinSet::new();

        for (idx, step) in self.steps.iter().enumerate() {
            if !step.can_process(&servers, ctx) {
                log.skipped.push(json!({"index": idx, "name": step.name(), "reason": "cannot_process"}));
                continue;
            }
            let step = Arc::clone(step);
            let input = servers.clone();
            let mut worker_ctx = ctx.clone();
            let worker_profile = profile.cloned();
            let trace = trace_id.clone();
            join_set.spawn(trace::with_trace_id(Some(trace), async move {
                let started = Instant::now();
                let result = step
                    .process(input, &mut worker_ctx, worker_profile.as_ref())
                    .await;
                (idx, step.name(), result, worker_ctx, started.elapsed())
            }));
        }

        let mut outcomes: Vec<(usize, &'static str, Result<Vec<ParsedServer>, PluginError>, Duration)> =
            Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, name, result, worker_ctx, elapsed)) => {
                    // Fold the worker's newly accumulated error records back in.
                    for err in worker_ctx.errors().into_iter().skip(base_errors) {
                        ctx.push_error(err);
                    }
                    outcomes.push((idx, name, result, elapsed));
                }
                Err(e) => {
                    ctx.push_error(PipelineError::new(
                        ErrorKind::Postprocessor,
                        CHAIN_META_KEY,
                        format!("postprocessor worker panicked: {e}"),
                    ));
                }
            }
        }

        // Deterministic merge: order by submission index, not completion.
        outcomes.sort_by_key(|(idx, ..)| *idx);

        let mut successes: Vec<(usize, Vec<ParsedServer>)> = Vec::new();
        for (idx, name, result, elapsed) in outcomes {
            match result {
                Ok(out) => {
                    log.executed.push(json!({
                        "index": idx,
                        "name": name,
                        "input_count": servers.len(),
                        "output_count": out.len(),
                        "duration_ms": elapsed.as_millis() as u64,
                    }));
                    successes.push((idx, out));
                }
                Err(e) => {
                    log.failed.push(json!({"index": idx, "name": name, "error": e.to_string()}));
                    ctx.push_error(PipelineError::from_plugin(name, e));
                    if self.config.error_strategy == ErrorStrategy::FailFast {
                        return Err(servers);
                    }
                }
            }
        }

        if successes.is_empty() {
            return Ok(servers);
        }
        let merged = match self.config.merge_strategy {
            MergeStrategy::FirstSuccess => successes.remove(0).1,
            MergeStrategy::Concat => {
                let mut seen = std::collections::HashSet::new();
                let mut merged = Vec::new();
                for (_, list) in successes {
                    for server in list {
                        let key = (server.endpoint(), server.tag.clone());
                        if seen.insert(key) {
                            merged.push(server);
                        }
                    }
                }
                merged
            }
        };
        Ok(merged)
    }

    async fn run_with_retry(
        &self,
        step: &dyn PostProcessor,
        servers: Vec<ParsedServer>,
        ctx: &mut PipelineContext,
        profile: Option<&FullProfile>,
    ) -> Result<Vec<ParsedServer>, PluginError> {
        let attempts = if self.config.error_strategy == ErrorStrategy::Retry {
            self.config.max_retries + 1
        } else {
            1
        };

        let mut last_error = None;
        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                tracing::debug!(
                    trace_id = %ctx.trace_id,
                    postprocessor = step.name(),
                    attempt,
                    "retrying postprocessor"
                );
            }
            match step.process(servers.clone(), ctx, profile).await {
                Ok(out) => return Ok(out),
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.unwrap_or_else(|| PluginError::postprocessor("postprocessor failed")))
    }
}

/// Conditional-mode predicate: with a profile present, only steps that
/// profile configures (metadata key matching the step name) run.
fn should_execute(step: &dyn PostProcessor, profile: Option<&FullProfile>) -> bool {
    match profile {
        Some(p) => p.plugin_config(step.name()).is_some(),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TagStep {
        name: &'static str,
        fail_times: AtomicUsize,
        delay: Duration,
    }

    impl TagStep {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self { name, fail_times: AtomicUsize::new(0), delay: Duration::ZERO })
        }

        fn failing(name: &'static str, times: usize) -> Arc<Self> {
            Arc::new(Self { name, fail_times: AtomicUsize::new(times), delay: Duration::ZERO })
        }

        fn slow(name: &'static str, delay: Duration) -> Arc<Self> {
            Arc::new(Self { name, fail_times: AtomicUsize::new(0), delay })
        }
    }

    impl PostProcessor for TagStep {
        fn name(&self) -> &'static str {
            self.name
        }

        fn process<'a>(
            &'a self,
            mut servers: Vec<ParsedServer>,
            _ctx: &'a mut PipelineContext,
            _profile: Option<&'a FullProfile>,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<ParsedServer>, PluginError>> + Send + 'a>>
        {
            Box::pin(async move {
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                let remaining = self.fail_times.load(Ordering::SeqCst);
                if remaining > 0 {
                    self.fail_times.store(remaining - 1, Ordering::SeqCst);
                    return Err(PluginError::postprocessor(format!("{} failed", self.name)));
                }
                for server in &mut servers {
                    let tag = server.tag.get_or_insert_default();
                    tag.push_str(self.name);
                    tag.push(';');
                }
                Ok(servers)
            })
        }
    }

    fn servers() -> Vec<ParsedServer> {
        vec![ParsedServer::new("ss", "a", 1)]
    }

    fn chain(steps: Vec<Arc<dyn PostProcessor>>, config: ChainConfig) -> PostProcessorChain {
        PostProcessorChain::new(steps, config)
    }

    #[tokio::test]
    async fn sequential_applies_in_order() {
        let c = chain(
            vec![TagStep::new("one"), TagStep::new("two")],
            ChainConfig::default(),
        );
        let mut ctx = PipelineContext::new();
        let out = c.process(servers(), &mut ctx, None).await;
        assert_eq!(out[0].tag.as_deref(), Some("one;two;"));

        let meta = ctx.stage_meta(CHAIN_META_KEY).unwrap();
        assert_eq!(meta["executed"].as_array().unwrap().len(), 2);
        assert_eq!(meta["success"], json!(true));
    }

    #[tokio::test]
    async fn continue_strategy_skips_failed_step() {
        let c = chain(
            vec![TagStep::failing("bad", 9), TagStep::new("good")],
            ChainConfig::default(),
        );
        let mut ctx = PipelineContext::new();
        let out = c.process(servers(), &mut ctx, None).await;
        assert_eq!(out[0].tag.as_deref(), Some("good;"));
        assert_eq!(ctx.errors().len(), 1);
        assert_eq!(ctx.errors()[0].kind, ErrorKind::Postprocessor);
    }

    #[tokio::test]
    async fn fail_fast_returns_original_input() {
        let c = chain(
            vec![TagStep::new("one"), TagStep::failing("bad", 9), TagStep::new("never")],
            ChainConfig { error_strategy: ErrorStrategy::FailFast, ..ChainConfig::default() },
        );
        let mut ctx = PipelineContext::new();
        let out = c.process(servers(), &mut ctx, None).await;
        // Chain-level failure: untouched input comes back.
        assert_eq!(out[0].tag, None);
        let meta = ctx.stage_meta(CHAIN_META_KEY).unwrap();
        assert_eq!(meta["success"], json!(false));
    }

    #[tokio::test]
    async fn retry_strategy_eventually_succeeds() {
        let c = chain(
            vec![TagStep::failing("flaky", 2)],
            ChainConfig {
                error_strategy: ErrorStrategy::Retry,
                max_retries: 2,
                retry_delay_ms: 10,
                ..ChainConfig::default()
            },
        );
        let mut ctx = PipelineContext::new();
        let out = c.process(servers(), &mut ctx, None).await;
        assert_eq!(out[0].tag.as_deref(), Some("flaky;"));
        assert!(ctx.errors().is_empty());
    }

    #[tokio::test]
    async fn parallel_first_success_is_deterministic() {
        // The slower step has the lower index, so it must win even though
        // it completes last.
        let c = chain(
            vec![
                TagStep::slow("slowfirst", Duration::from_millis(50)),
                TagStep::new("fastsecond"),
            ],
            ChainConfig { execution_mode: ExecutionMode::Parallel, ..ChainConfig::default() },
        );
        let mut ctx = PipelineContext::new();
        let out = c.process(servers(), &mut ctx, None).await;
        assert_eq!(out[0].tag.as_deref(), Some("slowfirst;"));
    }

    #[tokio::test]
    async fn parallel_concat_merges_and_dedups() {
        let c = chain(
            vec![TagStep::new("x"), TagStep::new("x")],
            ChainConfig {
                execution_mode: ExecutionMode::Parallel,
                merge_strategy: MergeStrategy::Concat,
                ..ChainConfig::default()
            },
        );
        let mut ctx = PipelineContext::new();
        let out = c.process(servers(), &mut ctx, None).await;
        // Both workers produce the same tagged server; dedup keeps one.
        assert_eq!(out.len(), 1);
    }

    #[tokio::test]
    async fn conditional_runs_only_profile_configured_steps() {
        let mut profile = FullProfile::new("p");
        profile.metadata.insert("chosen".into(), json!({}));
        let c = chain(
            vec![TagStep::new("chosen"), TagStep::new("ignored")],
            ChainConfig { execution_mode: ExecutionMode::Conditional, ..ChainConfig::default() },
        );
        let mut ctx = PipelineContext::new();
        let out = c.process(servers(), &mut ctx, Some(&profile)).await;
        assert_eq!(out[0].tag.as_deref(), Some("chosen;"));

        let meta = ctx.stage_meta(CHAIN_META_KEY).unwrap();
        let skipped = meta["skipped"].as_array().unwrap();
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0]["reason"], json!("conditional_skip"));
    }

    #[tokio::test]
    async fn chain_timeout_returns_input_with_timeout_error() {
        let c = chain(
            vec![TagStep::slow("glacial", Duration::from_secs(5))],
            ChainConfig { timeout_secs: 1, ..ChainConfig::default() },
        );
        let mut ctx = PipelineContext::new();
        let started = Instant::now();
        let out = c.process(servers(), &mut ctx, None).await;
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(out[0].tag, None);
        assert!(ctx.errors().iter().any(|e| e.kind == ErrorKind::Timeout));
    }

    #[tokio::test]
    async fn empty_chain_is_identity() {
        let c = PostProcessorChain::default();
        let mut ctx = PipelineContext::new();
        let input = servers();
        let out = c.process(input.clone(), &mut ctx, None).await;
        assert_eq!(out, input);
        assert!(ctx.stage_meta(CHAIN_META_KEY).is_none());
    }
}
