//! The orchestrator: stage machine, retry/repair loop, termination
//! guarantees.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::watch;

use config::{ForgeflowConfig, UploadScope};
use guardrails::{GuardrailPolicy, Guardrails};
use llm::{
    GeminiProvider, ModelCatalog, ModelRouter, ModelSelector, OpenAiProvider, PerformanceTracker,
    Provider,
};
use model::{
    DiagnosticBundle, ErrorKind, ErrorRecord, Stage, StageResult, StageStatus, WorkflowContext,
    WorkflowStatus,
};
use pinstore::{ArtifactKind, PinClient, PinCredentials, Retriever, Scope, UploadOptions};
use repair::{AgentMemory, RepairEngine};
use toolchain::{
    Auditor, Compiler, Deployer, DependencyResolver, ExplorerVerifier, ForgeCompiler,
    ForgeDependencyResolver, ForgeDeployer, SlitherAuditor, Verifier,
};

use crate::diagnostics::{self, TempEnv};
use crate::options::RunOptions;
use crate::state::{StageOutcome, WorkflowState};

/// What to do after a failed attempt was repaired.
enum RepairPlan {
    /// Retry the failed stage with the (possibly rewritten) inputs.
    Retry,
    /// The rewrite targets generation; re-enter it.
    ReenterGeneration,
}

/// Orchestrates workflows over the component crates.
///
/// One orchestrator serves many workflows; each run exclusively owns its
/// own [`WorkflowContext`]. The orchestrator never returns an error from
/// [`run`](Self::run) — every failure becomes an error record and the
/// workflow terminates with a persisted diagnostic bundle.
pub struct Orchestrator {
    config: ForgeflowConfig,
    workspace: PathBuf,
    pub(crate) router: Arc<ModelRouter>,
    pub(crate) repair: RepairEngine,
    pub(crate) memory: Arc<AgentMemory>,
    pub(crate) tracker: Arc<PerformanceTracker>,
    pub(crate) pin_client: Option<Arc<PinClient>>,
    pub(crate) retriever: Option<Retriever>,
    pub(crate) compiler: Arc<dyn Compiler>,
    pub(crate) resolver: Arc<dyn DependencyResolver>,
    pub(crate) deployer: Arc<dyn Deployer>,
    pub(crate) verifier: Arc<dyn Verifier>,
    pub(crate) auditor: Arc<dyn Auditor>,
    guardrails: Guardrails,
    cancel: Arc<watch::Sender<bool>>,
}

impl Orchestrator {
    /// Build an orchestrator from configuration, wiring the default
    /// (Foundry- and HTTP-backed) component implementations.
    pub fn new(config: ForgeflowConfig) -> Self {
        let workspace = config.workspace_dir();
        let contexts_dir = workspace.join(".workflow_contexts");

        let mut providers: Vec<Arc<dyn Provider>> = Vec::new();
        if let Some(key) = &config.llm.gemini_api_key {
            let mut provider = GeminiProvider::new(key.clone());
            if let Some(base) = &config.llm.gemini_base_url {
                provider = provider.with_base_url(base.clone());
            }
            providers.push(Arc::new(provider));
        }
        if let Some(key) = &config.llm.openai_api_key {
            let mut provider = OpenAiProvider::new(key.clone());
            if let Some(base) = &config.llm.openai_base_url {
                provider = provider.with_base_url(base.clone());
            }
            providers.push(Arc::new(provider));
        }
        if providers.is_empty() {
            tracing::warn!("No LLM provider configured; generation will fail at its first attempt");
        }

        let catalog = ModelCatalog::for_providers(
            config.llm.gemini_api_key.is_some(),
            config.llm.openai_api_key.is_some(),
        );
        let tracker = Arc::new(PerformanceTracker::open(&contexts_dir));
        let router = Arc::new(ModelRouter::new(
            providers,
            ModelSelector::new(catalog),
            tracker.clone(),
        ));

        let memory = Arc::new(AgentMemory::open(&contexts_dir));
        let repair = RepairEngine::new(memory.clone());

        let team = match (&config.pinning.team_api_key, &config.pinning.team_api_secret) {
            (Some(key), Some(secret)) => Some(PinCredentials {
                api_key: key.clone(),
                api_secret: secret.clone(),
            }),
            _ => None,
        };
        let community = match (
            &config.pinning.community_api_key,
            &config.pinning.community_api_secret,
        ) {
            (Some(key), Some(secret)) => Some(PinCredentials {
                api_key: key.clone(),
                api_secret: secret.clone(),
            }),
            _ => None,
        };
        let pin_client = if team.is_some() || community.is_some() {
            let mut client = PinClient::new(&workspace.join("data/ipfs_registries"), team, community);
            if let (Some(api), Some(gateway)) = (
                &config.pinning.api_base_url,
                &config.pinning.gateway_base_url,
            ) {
                client = client.with_endpoints(api.clone(), gateway.clone());
            }
            Some(Arc::new(client))
        } else {
            None
        };
        let retriever = pin_client.clone().map(Retriever::new);

        let guardrails = Guardrails::new(
            &workspace,
            GuardrailPolicy {
                max_retries_per_stage: config.guardrails.max_retries_per_stage,
                enable_escalation: config.guardrails.enable_escalation,
                escalation_webhook_url: config.guardrails.escalation_webhook_url.clone(),
                pause_on_max_retries: config.guardrails.pause_on_max_retries,
            },
        );

        let (cancel, _) = watch::channel(false);

        Self {
            config,
            workspace,
            router,
            repair,
            memory,
            tracker,
            pin_client,
            retriever,
            compiler: Arc::new(ForgeCompiler),
            resolver: Arc::new(ForgeDependencyResolver),
            deployer: Arc::new(ForgeDeployer),
            verifier: Arc::new(ExplorerVerifier),
            auditor: Arc::new(SlitherAuditor),
            guardrails,
            cancel: Arc::new(cancel),
        }
    }

    /// Swap the model router (tests use scripted providers).
    pub fn with_router(mut self, router: Arc<ModelRouter>) -> Self {
        self.tracker = router.tracker().clone();
        self.router = router;
        self
    }

    pub fn with_compiler(mut self, compiler: Arc<dyn Compiler>) -> Self {
        self.compiler = compiler;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn DependencyResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_deployer(mut self, deployer: Arc<dyn Deployer>) -> Self {
        self.deployer = deployer;
        self
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn Verifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_auditor(mut self, auditor: Arc<dyn Auditor>) -> Self {
        self.auditor = auditor;
        self
    }

    pub fn memory(&self) -> &Arc<AgentMemory> {
        &self.memory
    }

    pub fn tracker(&self) -> &Arc<PerformanceTracker> {
        &self.tracker
    }

    pub fn pin_client(&self) -> Option<&Arc<PinClient>> {
        self.pin_client.as_ref()
    }

    /// Handle for cancelling in-flight workflows. The current stage's
    /// outstanding call is aborted, a `cancelled` error is recorded, and
    /// the workflow jumps straight to the output stage.
    pub fn cancel_handle(&self) -> Arc<watch::Sender<bool>> {
        self.cancel.clone()
    }

    fn contexts_dir(&self) -> PathBuf {
        self.workspace.join(".workflow_contexts")
    }

    pub(crate) fn config_workspace(&self) -> &std::path::Path {
        &self.workspace
    }

    fn max_retries(&self) -> u32 {
        self.guardrails.policy().max_retries_per_stage
    }

    /// Run one workflow to completion. Never returns an error: the
    /// returned context carries the terminal status, and a diagnostic
    /// bundle is on disk by the time this returns.
    pub async fn run(&self, user_prompt: &str, options: RunOptions) -> WorkflowContext {
        let mut ctx = WorkflowContext::new(user_prompt);
        tracing::info!(workflow_id = %ctx.workflow_id, network = %options.network, "Starting workflow");

        let network = match self.config.resolve_network(&options.network) {
            Ok(network) => network.clone(),
            Err(e) => {
                let started = Utc::now();
                ctx.bump_retry(Stage::InputParsing);
                let record =
                    ErrorRecord::new(Stage::InputParsing, ErrorKind::ChainMismatch, e.to_string());
                ctx.record_error(record.clone());
                ctx.record_stage(
                    StageResult::finished(Stage::InputParsing, StageStatus::Error, started)
                        .with_error(record),
                );
                self.run_output(&mut ctx, None, None).await;
                return ctx;
            }
        };

        let mut temp_env = match TempEnv::create(&self.workspace, &ctx.workflow_id) {
            Ok(env) => env,
            Err(e) => {
                let started = Utc::now();
                ctx.bump_retry(Stage::InputParsing);
                let record = ErrorRecord::new(
                    Stage::InputParsing,
                    ErrorKind::Unknown,
                    format!("failed to create scratch environment: {e}"),
                );
                ctx.record_error(record.clone());
                ctx.record_stage(
                    StageResult::finished(Stage::InputParsing, StageStatus::Error, started)
                        .with_error(record),
                );
                self.run_output(&mut ctx, None, None).await;
                return ctx;
            }
        };

        let mut state = WorkflowState::new(
            options,
            network,
            user_prompt,
            temp_env.path().to_path_buf(),
        );

        self.run_sequence(&mut ctx, &mut state).await;
        self.run_output(&mut ctx, Some(&state), Some(&mut temp_env)).await;
        ctx
    }

    /// Walk the stage sequence up to (not including) output.
    async fn run_sequence(&self, ctx: &mut WorkflowContext, state: &mut WorkflowState) {
        let stages = &Stage::SEQUENCE[..Stage::SEQUENCE.len() - 1];
        let mut index = 0;

        'sequence: while index < stages.len() {
            let stage = stages[index];

            'attempts: loop {
                let attempt = ctx.bump_retry(stage);
                let started = Utc::now();

                let outcome = self.attempt_stage(stage, ctx, state).await;

                match outcome {
                    StageOutcome::Success { outputs } => {
                        let has_unfixed = ctx
                            .error_history
                            .iter()
                            .any(|r| r.stage == stage && !r.fix_successful);
                        if has_unfixed {
                            let fix_message = state
                                .last_repair
                                .take()
                                .unwrap_or_else(|| "resolved on retry".to_string());
                            ctx.mark_fix_successful(stage, fix_message);
                        }
                        ctx.record_stage(
                            StageResult::finished(stage, StageStatus::Success, started)
                                .with_outputs(outputs),
                        );
                        self.save_snapshot(ctx);
                        break 'attempts;
                    }
                    StageOutcome::Skipped { reason } => {
                        tracing::info!(stage = %stage, reason, "Stage skipped");
                        ctx.record_stage(
                            StageResult::finished(stage, StageStatus::Skipped, started)
                                .with_outputs(serde_json::json!({ "reason": reason })),
                        );
                        self.save_snapshot(ctx);
                        break 'attempts;
                    }
                    StageOutcome::Degraded { outputs } => {
                        tracing::warn!(stage = %stage, "Stage degraded");
                        ctx.record_stage(
                            StageResult::finished(stage, StageStatus::Degraded, started)
                                .with_outputs(outputs),
                        );
                        self.save_snapshot(ctx);
                        break 'attempts;
                    }
                    StageOutcome::Failed { kind, message } => {
                        tracing::warn!(stage = %stage, error_type = %kind, "Stage failed");
                        let record = ErrorRecord::new(stage, kind.clone(), &message);
                        ctx.record_error(record.clone());
                        ctx.record_stage(
                            StageResult::finished(stage, StageStatus::Error, started)
                                .with_error(record),
                        );
                        self.save_snapshot(ctx);

                        if kind == ErrorKind::Cancelled {
                            break 'sequence;
                        }

                        if self.guardrails.retry_limit_exceeded(attempt) {
                            self.guardrails
                                .escalate(stage, &message, ctx, ctx.diagnostic_bundle_path.as_deref())
                                .await;
                            if stage.is_critical() {
                                break 'sequence;
                            }
                            break 'attempts;
                        }

                        match self.plan_repair(stage, &kind, &message, ctx, state).await {
                            RepairPlan::Retry => continue 'attempts,
                            RepairPlan::ReenterGeneration => {
                                index = Stage::SEQUENCE
                                    .iter()
                                    .position(|s| *s == Stage::Generation)
                                    .unwrap_or(index);
                                continue 'sequence;
                            }
                        }
                    }
                }
            }

            if ctx.stage_failed(stage) && stage.is_critical() {
                break 'sequence;
            }

            // Freshly installed dependencies invalidate the previous build.
            if stage == Stage::DependencyResolution
                && state.deps_changed()
                && !state.recompiled_after_deps
                && ctx.retry_count(Stage::Compilation) < self.max_retries()
            {
                state.recompiled_after_deps = true;
                index = Stage::SEQUENCE
                    .iter()
                    .position(|s| *s == Stage::Compilation)
                    .unwrap_or(index);
                continue 'sequence;
            }

            index += 1;
        }
    }

    /// Run one stage attempt with panic isolation and cancellation.
    async fn attempt_stage(
        &self,
        stage: Stage,
        ctx: &mut WorkflowContext,
        state: &mut WorkflowState,
    ) -> StageOutcome {
        let mut cancel_rx = self.cancel.subscribe();
        if *cancel_rx.borrow() {
            return StageOutcome::failed(ErrorKind::Cancelled, "workflow cancelled");
        }

        let work = std::panic::AssertUnwindSafe(self.run_stage(stage, ctx, state)).catch_unwind();

        tokio::select! {
            result = work => match result {
                Ok(outcome) => outcome,
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<String>()
                        .cloned()
                        .or_else(|| panic.downcast_ref::<&str>().map(|s| (*s).to_string()))
                        .unwrap_or_else(|| "stage panicked".to_string());
                    tracing::error!(stage = %stage, message, "Stage panicked; recording and continuing");
                    StageOutcome::failed(ErrorKind::Unknown, format!("panic: {message}"))
                }
            },
            _ = cancel_rx.changed() => {
                StageOutcome::failed(ErrorKind::Cancelled, "workflow cancelled")
            }
        }
    }

    /// Decide how to repair a failed attempt before the retry.
    ///
    /// Ordering: fixes from agent memory, then pattern rewrites, then (for
    /// generation only) the LLM rephrase path. A compilation failure whose
    /// root cause is the generated source rewrites the generation prompt
    /// and re-enters generation.
    async fn plan_repair(
        &self,
        stage: Stage,
        kind: &ErrorKind,
        message: &str,
        ctx: &WorkflowContext,
        state: &mut WorkflowState,
    ) -> RepairPlan {
        match stage {
            Stage::Generation => {
                let outcome =
                    self.repair
                        .repair(&state.prompt, &state.rag_context, message, Some(kind));
                if outcome.repaired {
                    state.prompt = outcome.prompt;
                    state.rag_context = outcome.context;
                    state.last_repair = outcome.description;
                    return RepairPlan::Retry;
                }

                let llm_outcome = self
                    .repair
                    .repair_with_llm(&state.prompt, &state.rag_context, message, &self.router)
                    .await;
                if llm_outcome.repaired {
                    state.prompt = llm_outcome.prompt;
                    state.rag_context = llm_outcome.context;
                    state.last_repair = llm_outcome.description;
                }
                RepairPlan::Retry
            }
            Stage::Compilation => {
                // Missing dependencies are fixed in place, not by prompt.
                if *kind == ErrorKind::MissingImport {
                    if let Some(source) = &state.source {
                        if let Err(e) = self.resolver.resolve(source, &state.project_dir).await {
                            tracing::warn!(error = %e, "Inline dependency resolution failed");
                        }
                    }
                    return RepairPlan::Retry;
                }

                if kind.is_repairable() && ctx.retry_count(Stage::Generation) < self.max_retries() {
                    let outcome =
                        self.repair
                            .repair(&state.prompt, &state.rag_context, message, Some(kind));
                    if outcome.repaired {
                        state.prompt = outcome.prompt;
                        state.rag_context = outcome.context;
                        state.last_repair = outcome.description;
                        return RepairPlan::ReenterGeneration;
                    }
                }
                RepairPlan::Retry
            }
            _ => RepairPlan::Retry,
        }
    }

    /// The output stage: always runs, on every path.
    async fn run_output(
        &self,
        ctx: &mut WorkflowContext,
        state: Option<&WorkflowState>,
        temp_env: Option<&mut TempEnv>,
    ) {
        let started = Utc::now();
        ctx.bump_retry(Stage::Output);
        ctx.finalize();

        let mut output_errors: Vec<ErrorRecord> = Vec::new();

        // Diagnostic bundle first: it must exist whatever else fails.
        let source_snapshot = state.as_ref().and_then(|s| s.source.clone());
        let bundle = DiagnosticBundle::from_context(
            ctx,
            diagnostics::system_info(),
            diagnostics::tool_versions().await,
            source_snapshot,
        );
        let validation = bundle.validate(self.max_retries());
        if !validation.is_valid() {
            tracing::warn!(issues = ?validation.issues, "Diagnostic bundle failed validation");
        }
        match bundle.save(&self.contexts_dir()) {
            Ok(path) => {
                ctx.diagnostic_bundle_path = Some(path);
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to persist diagnostic bundle");
                output_errors.push(ErrorRecord::new(
                    Stage::Output,
                    ErrorKind::Unknown,
                    format!("diagnostic bundle not persisted: {e}"),
                ));
            }
        }

        // Optional context upload into the requested scope.
        if let Some(state) = state.as_ref() {
            if state.options.upload_scope != UploadScope::None {
                match self.upload_context(ctx, state.options.upload_scope).await {
                    Ok(Some(cid)) => {
                        tracing::info!(cid = %cid, "Uploaded workflow context");
                    }
                    Ok(None) => {}
                    Err(record) => output_errors.push(record),
                }
            }
        }

        for record in output_errors.iter().cloned() {
            ctx.record_error(record);
        }
        let status = if output_errors.is_empty() {
            StageStatus::Success
        } else {
            StageStatus::Degraded
        };
        ctx.record_stage(StageResult::finished(Stage::Output, status, started));

        // Scratch environment: removed on success, preserved for debugging
        // otherwise.
        if let Some(env) = temp_env {
            if ctx.status != WorkflowStatus::Success {
                env.preserve();
            }
        }

        self.save_snapshot(ctx);
        self.memory.add(ctx);

        tracing::info!(
            workflow_id = %ctx.workflow_id,
            status = ?ctx.status,
            stages = ctx.stages.len(),
            errors = ctx.error_history.len(),
            "Workflow terminated"
        );
    }

    async fn upload_context(
        &self,
        ctx: &WorkflowContext,
        scope: UploadScope,
    ) -> Result<Option<String>, ErrorRecord> {
        let Some(client) = &self.pin_client else {
            return Err(ErrorRecord::new(
                Stage::Output,
                ErrorKind::PinFailed,
                "context upload requested but no pinning credentials configured",
            ));
        };
        let scope = match scope {
            UploadScope::Team => Scope::Team,
            UploadScope::Community => Scope::Community,
            UploadScope::None => return Ok(None),
        };
        let content = serde_json::to_string_pretty(ctx).map_err(|e| {
            ErrorRecord::new(Stage::Output, ErrorKind::Unknown, e.to_string())
        })?;

        match client
            .upload(
                &content,
                ArtifactKind::Workflow,
                scope,
                UploadOptions {
                    description: Some(format!("workflow context {}", ctx.workflow_id)),
                    workflow_signature: Some(ctx.workflow_id.clone()),
                    ..Default::default()
                },
            )
            .await
        {
            Ok(receipt) => Ok(Some(receipt.cid)),
            Err(e) => Err(ErrorRecord::new(Stage::Output, e.kind(), e.to_string())),
        }
    }

    fn save_snapshot(&self, ctx: &WorkflowContext) {
        if let Err(e) = ctx.save(&self.contexts_dir()) {
            tracing::warn!(error = %e, "Failed to save workflow context snapshot");
        }
    }
}
