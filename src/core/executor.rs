//! AD-013: Runtime orchestrator.
//!
//! Drives a compiled plan over a record source:
//! admit record → for each step: render request → invoke (timeout) → validate
//! → audit → retry once → rules → sink
//!
//! Records run concurrently (bounded by `RuntimeConfig::concurrency`); the
//! steps of one record never do. Cancellation only stops admission.

use super::io::{RecordSink, RecordSource, ResourceLoader};
use super::prompt;
use super::types::*;
use super::validator;
use crate::audit::hasher::{composite_hash, hash_string};
use crate::audit::log::{generate_run_id, now_iso8601};
use crate::audit::AuditLog;
use crate::config::RuntimeConfig;
use crate::error::{Error, StepFailure, TransportError};
use crate::transport::{InferenceClient, InferenceRequest};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Attempts per (record, step): the first call plus one retry.
pub const MAX_ATTEMPTS: u32 = 2;

/// Resource text resolved once per orchestrator.
struct PreparedStep {
    schema: serde_json::Value,
    context: Option<String>,
    examples: Option<String>,
}

/// Read-only state shared by every record task.
struct Shared {
    plan: ExecutionPlan,
    prepared: Vec<PreparedStep>,
    client: Arc<dyn InferenceClient>,
    timeout: Duration,
}

/// Runs one compiled plan.
pub struct Orchestrator {
    shared: Arc<Shared>,
    config: RuntimeConfig,
    fingerprint: String,
}

impl Orchestrator {
    /// Load every prompt and examples resource the plan names and check the config.
    pub fn new(
        plan: ExecutionPlan,
        client: Arc<dyn InferenceClient>,
        loader: &dyn ResourceLoader,
        config: RuntimeConfig,
    ) -> Result<Self, Error> {
        let problems = config.validate();
        if !problems.is_empty() {
            let joined: Vec<String> = problems.iter().map(|p| p.to_string()).collect();
            return Err(Error::Config(joined.join("; ")));
        }

        let mut prepared = Vec::with_capacity(plan.steps.len());
        let mut hashes = vec![plan.fingerprint()];
        for step in &plan.steps {
            let context = match &step.prompt {
                Some(handle) => {
                    let text = loader.load(handle.kind, &handle.name)?;
                    hashes.push(hash_string(&text));
                    Some(text)
                }
                None => None,
            };
            let examples = match &step.examples {
                Some(handle) => {
                    let text = loader.load(handle.kind, &handle.name)?;
                    hashes.push(hash_string(&text));
                    let parsed =
                        prompt::parse_examples(&text).map_err(|message| Error::MalformedResource {
                            kind: handle.kind,
                            name: handle.name.clone(),
                            message,
                        })?;
                    Some(prompt::render_examples(&parsed))
                }
                None => None,
            };
            prepared.push(PreparedStep {
                schema: step.schema.to_json_schema(),
                context,
                examples,
            });
        }

        let parts: Vec<&str> = hashes.iter().map(String::as_str).collect();
        let fingerprint = composite_hash(&parts);

        Ok(Self {
            shared: Arc::new(Shared {
                plan,
                prepared,
                client,
                timeout: config.timeout(),
            }),
            config,
            fingerprint,
        })
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.shared.plan
    }

    /// Hash of the plan and the resource text it was prepared with.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Process every unit the source yields.
    ///
    /// Per-record failures end up in the sink; only an audit append failure
    /// fails the run, after in-flight records have drained.
    pub async fn run(
        &self,
        source: &mut dyn RecordSource,
        sink: &dyn RecordSink,
        audit: Arc<dyn AuditLog>,
        cancel: CancellationToken,
    ) -> Result<RunSummary, Error> {
        let run_id = generate_run_id(self.config.run_label.as_deref());
        info!(
            run_id = %run_id,
            fingerprint = %self.fingerprint,
            steps = self.shared.plan.steps.len(),
            rules = self.shared.plan.rules.len(),
            concurrency = self.config.concurrency,
            "run started"
        );

        let mut summary = RunSummary {
            run_id: run_id.clone(),
            records: 0,
            completed: 0,
            failed: 0,
            flagged: 0,
            rule_errors: 0,
            source_errors: 0,
            sink_errors: 0,
            cancelled: false,
        };
        let run_id: Arc<str> = Arc::from(run_id);
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut tasks = JoinSet::new();
        let mut fatal: Option<Error> = None;
        let mut next_id: u64 = 0;
        // Tripped by a record task that hit a fatal error.
        let halt = CancellationToken::new();

        loop {
            while let Some(done) = tasks.try_join_next() {
                settle(done, sink, &mut summary, &mut fatal);
            }
            if fatal.is_some() {
                break;
            }

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    summary.cancelled = true;
                    break;
                }
                _ = halt.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            if halt.is_cancelled() {
                break;
            }

            let unit = match source.next_unit().await {
                None => break,
                Some(Err(e)) => {
                    warn!(run_id = %run_id, error = %e, "skipping unreadable input unit");
                    summary.source_errors += 1;
                    continue;
                }
                Some(Ok(unit)) => unit,
            };

            // The source may have been slow; nothing is admitted once stopped.
            if cancel.is_cancelled() {
                debug!(run_id = %run_id, "cancelled while reading, unit not admitted");
                summary.cancelled = true;
                break;
            }
            if halt.is_cancelled() {
                debug!(run_id = %run_id, "run halted while reading, unit not admitted");
                break;
            }

            next_id += 1;
            let record_id = next_id;
            let shared = Arc::clone(&self.shared);
            let audit = Arc::clone(&audit);
            let run_id = Arc::clone(&run_id);
            let halt = halt.clone();
            tasks.spawn(async move {
                let result = process_record(&shared, &run_id, record_id, unit, audit.as_ref()).await;
                if result.is_err() {
                    halt.cancel();
                }
                // released only after the halt is visible to the admission loop
                drop(permit);
                result
            });
        }

        while let Some(done) = tasks.join_next().await {
            settle(done, sink, &mut summary, &mut fatal);
        }

        info!(
            run_id = %run_id,
            records = summary.records,
            completed = summary.completed,
            failed = summary.failed,
            flagged = summary.flagged,
            cancelled = summary.cancelled,
            "run finished"
        );

        match fatal {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    /// Process a single unit outside of a run. Attempts are still audited.
    pub async fn run_one(
        &self,
        input: InputUnit,
        audit: &dyn AuditLog,
    ) -> Result<RecordResult, Error> {
        let run_id = generate_run_id(self.config.run_label.as_deref());
        process_record(&self.shared, &run_id, 1, input, audit).await
    }
}

/// Fold one finished record task into the summary and hand it to the sink.
fn settle(
    done: Result<Result<RecordResult, Error>, JoinError>,
    sink: &dyn RecordSink,
    summary: &mut RunSummary,
    fatal: &mut Option<Error>,
) {
    let result = match done {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            error!(error = %e, "record aborted");
            if fatal.is_none() {
                *fatal = Some(e);
            }
            return;
        }
        Err(e) => {
            error!(error = %e, "record task did not complete");
            summary.failed += 1;
            return;
        }
    };

    summary.records += 1;
    match result.status {
        RecordStatus::Completed => summary.completed += 1,
        RecordStatus::Failed { .. } => summary.failed += 1,
    }
    if result.flagged {
        summary.flagged += 1;
    }
    summary.rule_errors += result.rule_errors.len() as u64;

    if let Err(e) = sink.accept(&result) {
        error!(record_id = result.record_id, error = %e, "sink rejected result");
        summary.sink_errors += 1;
    }
}

// ============================================================================
// Per-record pipeline
// ============================================================================

async fn process_record(
    shared: &Shared,
    run_id: &str,
    record_id: u64,
    unit: InputUnit,
    audit: &dyn AuditLog,
) -> Result<RecordResult, Error> {
    let input = unit.render();
    let input_ref = hash_string(&input);
    let mut record = TypedRecord::new();

    for (step, prepared) in shared.plan.steps.iter().zip(&shared.prepared) {
        let request = build_request(record_id, step, prepared, &input, &record);
        match run_step(shared, run_id, record_id, step, &request, &input_ref, audit).await? {
            Ok(value) => merge_output(&mut record, &step.output, value),
            Err(failure) => {
                error!(record_id, step = step.index, reason = %failure, "step failed");
                return Ok(RecordResult {
                    record_id,
                    input_ref,
                    status: RecordStatus::Failed {
                        step: step.index,
                        reason: failure.to_string(),
                    },
                    record,
                    flagged: false,
                    flag_reasons: Vec::new(),
                    rule_errors: Vec::new(),
                });
            }
        }
    }

    let mut flag_reasons = Vec::new();
    let mut rule_errors = Vec::new();
    for rule in &shared.plan.rules {
        match rule.expr.evaluate(&rule.text, &record) {
            Ok(true) => flag_reasons.push(rule.text.clone()),
            Ok(false) => {}
            Err(e) => {
                warn!(record_id, rule = %rule.text, reason = %e.reason, "rule evaluation failed");
                rule_errors.push(e);
            }
        }
    }

    debug!(record_id, flags = flag_reasons.len(), "record completed");
    Ok(RecordResult {
        record_id,
        input_ref,
        status: RecordStatus::Completed,
        record,
        flagged: !flag_reasons.is_empty(),
        flag_reasons,
        rule_errors,
    })
}

/// Issue the step's request until it validates or the attempts run out.
///
/// The outer `Err` is an audit failure; the inner result is the step's own.
async fn run_step(
    shared: &Shared,
    run_id: &str,
    record_id: u64,
    step: &CompiledStep,
    request: &InferenceRequest,
    input_ref: &str,
    audit: &dyn AuditLog,
) -> Result<Result<TypedValue, StepFailure>, Error> {
    let timeout_ms = shared.timeout.as_millis() as u64;
    let mut attempt = 1;
    loop {
        debug!(record_id, step = step.index, attempt, "invoking inference client");
        let call = tokio::time::timeout(shared.timeout, shared.client.invoke(request)).await;
        let (outcome, raw_response, result) = match call {
            Err(_) => (
                AttemptOutcome::TimedOut {
                    after_ms: timeout_ms,
                },
                None,
                Err(StepFailure::Timeout(timeout_ms)),
            ),
            Ok(Err(TransportError(message))) => (
                AttemptOutcome::Transport {
                    message: message.clone(),
                },
                None,
                Err(StepFailure::Transport(TransportError(message))),
            ),
            Ok(Ok(raw)) => match validator::check_response(step, &raw) {
                ValidationOutcome::Valid(value) => (AttemptOutcome::Valid, Some(raw), Ok(value)),
                ValidationOutcome::Invalid(violations) => (
                    AttemptOutcome::Invalid {
                        violations: violations.clone(),
                    },
                    Some(raw),
                    Err(StepFailure::Validation(violations)),
                ),
            },
        };

        let disposition = match &result {
            Ok(_) => Disposition::Valid,
            Err(_) if attempt < MAX_ATTEMPTS => Disposition::Retry,
            Err(_) => Disposition::Terminal,
        };
        audit
            .append(&AuditEntry {
                ts: now_iso8601(),
                run_id: run_id.to_string(),
                record_id,
                step: step.index,
                verb: step.verb,
                attempt,
                input_ref: input_ref.to_string(),
                raw_response,
                outcome,
                disposition,
                output: result.as_ref().ok().cloned(),
                failure: match (&result, disposition) {
                    (Err(f), Disposition::Terminal) => Some(f.to_string()),
                    _ => None,
                },
            })
            .map_err(Error::Audit)?;

        match (result, disposition) {
            (Err(failure), Disposition::Retry) => {
                warn!(record_id, step = step.index, attempt, reason = %failure, "attempt rejected, retrying");
                attempt += 1;
            }
            (result, _) => return Ok(result),
        }
    }
}

/// Request for one step. Identical on every attempt.
fn build_request(
    record_id: u64,
    step: &CompiledStep,
    prepared: &PreparedStep,
    input: &str,
    record: &TypedRecord,
) -> InferenceRequest {
    let context = prepared
        .context
        .as_deref()
        .map(|text| prompt::render_template(text, record));
    let system = prompt::system_prompt(
        context.as_deref(),
        &step.instructions,
        prepared.examples.as_deref(),
    );
    let input = match step.verb {
        Verb::Draft => {
            let data = serde_json::to_string_pretty(record).unwrap_or_default();
            format!("Structured data:\n{}\n\nOriginal input:\n{}", data, input)
        }
        Verb::Extract | Verb::Classify => input.to_string(),
    };
    InferenceRequest {
        record_id,
        step: step.index,
        verb: step.verb,
        schema: prepared.schema.clone(),
        system,
        input,
        params: step.params.clone(),
    }
}

/// Fold a validated step value into the record.
fn merge_output(record: &mut TypedRecord, output: &StepOutput, value: TypedValue) {
    match (output, value) {
        (StepOutput::Fields, TypedValue::Object(fields)) => record.extend(fields),
        (StepOutput::Field(name), value) => {
            record.insert(name.clone(), value);
        }
        (StepOutput::Fields, other) => {
            warn!(kind = other.kind(), "object step produced a non-object value");
        }
    }
}
