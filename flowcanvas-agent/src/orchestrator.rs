//! Bounded validate-and-revise loop around the generator.
//!
//! ```text
//!            ┌──────────── revise with feedback ◄──────────┐
//!            ▼                                              │ (budget left)
//! propose ─► Linting ─► ValidatingIds ─► ValidatingSyntax ─┴─► Accepted
//!                 └─────────┴──────────────────┴──────────────► Failed
//!                                                 (stage budget exhausted)
//! ```
//!
//! Each revision replaces the candidate wholesale and restarts at
//! [`Stage::Linting`]. Budgets are counted per stage.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use flowcanvas_core::{
    lint, render_spec, validate_ids, ApplyMode, IdValidationOptions, LintOptions,
    LintViolation, LiveIds, SchemaViolation, StrictSyntax, SyntaxChecker,
};

use crate::config::ValidationConfig;
use crate::generator::{DiagramGenerator, GenerationError, GenerationRequest, Proposal};

/// Position of a candidate in the validation state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    /// Schema and lint rules.
    Linting,
    /// Id format, uniqueness and collisions.
    ValidatingIds,
    /// Final strict grammar check.
    ValidatingSyntax,
    /// Candidate passed every stage.
    Accepted,
    /// A stage ran out of attempts.
    Failed,
}

impl Stage {
    /// Stage that follows a pass at this stage.
    #[must_use]
    pub fn next(self) -> Self {
        match self {
            Self::Linting => Self::ValidatingIds,
            Self::ValidatingIds => Self::ValidatingSyntax,
            Self::ValidatingSyntax | Self::Accepted => Self::Accepted,
            Self::Failed => Self::Failed,
        }
    }

    /// Whether no further transitions happen.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Accepted | Self::Failed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Linting => "linting",
            Self::ValidatingIds => "validating ids",
            Self::ValidatingSyntax => "validating syntax",
            Self::Accepted => "accepted",
            Self::Failed => "failed",
        })
    }
}

/// Failed-attempt counters, one per validating stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptBudget {
    max_per_stage: u32,
    linting: u32,
    ids: u32,
    syntax: u32,
}

impl AttemptBudget {
    /// Allow `max_per_stage` failures at each stage (at least one).
    #[must_use]
    pub fn new(max_per_stage: u32) -> Self {
        Self {
            max_per_stage: max_per_stage.max(1),
            linting: 0,
            ids: 0,
            syntax: 0,
        }
    }

    /// Record a failure at `stage`. Returns true while a revision is still
    /// allowed, false once the stage is exhausted.
    pub fn record_failure(&mut self, stage: Stage) -> bool {
        let Some(used) = self.counter(stage) else {
            return false;
        };
        *used += 1;
        *used < self.max_per_stage
    }

    /// Failures recorded at `stage`.
    #[must_use]
    pub fn used(&self, stage: Stage) -> u32 {
        match stage {
            Stage::Linting => self.linting,
            Stage::ValidatingIds => self.ids,
            Stage::ValidatingSyntax => self.syntax,
            Stage::Accepted | Stage::Failed => 0,
        }
    }

    fn counter(&mut self, stage: Stage) -> Option<&mut u32> {
        match stage {
            Stage::Linting => Some(&mut self.linting),
            Stage::ValidatingIds => Some(&mut self.ids),
            Stage::ValidatingSyntax => Some(&mut self.syntax),
            Stage::Accepted | Stage::Failed => None,
        }
    }
}

impl Default for AttemptBudget {
    fn default() -> Self {
        Self::new(ValidationConfig::default().max_attempts_per_stage)
    }
}

/// Result of evaluating one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    /// The stage passed. Warnings never block acceptance.
    Passed {
        /// Warn-severity lint violations.
        warnings: Vec<LintViolation>,
    },
    /// The stage failed.
    Rejected {
        /// Summary for the generator, with codes and hints.
        feedback: String,
    },
}

/// The pure validation stages, independent of any generator.
#[derive(Clone)]
pub struct ValidationPipeline {
    lint: LintOptions,
    ids: IdValidationOptions,
    syntax: Arc<dyn SyntaxChecker>,
}

impl fmt::Debug for ValidationPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationPipeline")
            .field("lint", &self.lint)
            .field("ids", &self.ids)
            .finish_non_exhaustive()
    }
}

impl ValidationPipeline {
    /// Pipeline with the strict syntax gate.
    #[must_use]
    pub fn new(lint: LintOptions, ids: IdValidationOptions) -> Self {
        Self {
            lint,
            ids,
            syntax: Arc::new(StrictSyntax),
        }
    }

    /// Pipeline for `mode` against the ids currently on the canvas.
    ///
    /// In [`ApplyMode::ReplaceCanvas`] the canvas is wiped on apply, so
    /// nothing can collide and live ids do not satisfy edge endpoints.
    #[must_use]
    pub fn for_mode(lint: LintOptions, mode: ApplyMode, live: &LiveIds) -> Self {
        let ids = match mode {
            ApplyMode::ReplaceCanvas => IdValidationOptions {
                check_existing: false,
                ..IdValidationOptions::default()
            },
            ApplyMode::Incremental => IdValidationOptions {
                used_node_ids: live.used_node_ids.clone(),
                used_edge_ids: live.used_edge_ids.clone(),
                label_to_id: live.label_to_id.clone(),
                ..IdValidationOptions::default()
            },
        };
        Self::new(lint, ids)
    }

    /// Replace the final syntax gate.
    #[must_use]
    pub fn with_syntax(mut self, syntax: Arc<dyn SyntaxChecker>) -> Self {
        self.syntax = syntax;
        self
    }

    /// Node ids a spec may reference without declaring.
    #[must_use]
    pub fn live_node_ids(&self) -> &HashSet<String> {
        &self.ids.used_node_ids
    }

    /// Evaluate `text` at `stage`. Terminal stages always pass.
    #[must_use]
    pub fn evaluate(&self, stage: Stage, text: &str) -> Evaluation {
        match stage {
            Stage::Linting => {
                let report = lint(text, &self.lint);
                if report.ok {
                    Evaluation::Passed {
                        warnings: report.warnings().cloned().collect(),
                    }
                } else {
                    Evaluation::Rejected {
                        feedback: report.feedback(),
                    }
                }
            }
            Stage::ValidatingIds => {
                let report = validate_ids(text, &self.ids);
                if report.ok {
                    Evaluation::Passed {
                        warnings: Vec::new(),
                    }
                } else {
                    Evaluation::Rejected {
                        feedback: report.feedback(),
                    }
                }
            }
            Stage::ValidatingSyntax => match self.syntax.check(text) {
                Ok(()) => Evaluation::Passed {
                    warnings: Vec::new(),
                },
                Err(e) => Evaluation::Rejected {
                    feedback: format!(
                        "The diagram failed the final syntax check at {e}.\nReturn only the diagram text, one statement per line.\n"
                    ),
                },
            },
            Stage::Accepted | Stage::Failed => Evaluation::Passed {
                warnings: Vec::new(),
            },
        }
    }
}

/// A diagram that passed every stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    /// The accepted diagram text.
    pub text: String,
    /// Warn-severity lint violations of the accepted text.
    pub warnings: Vec<LintViolation>,
    /// Generator calls made, including the first proposal.
    pub attempts: u32,
}

/// Terminal failures of the orchestrator.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// A stage ran out of attempts.
    #[error("gave up while {stage}: {detail}")]
    Exhausted {
        /// Stage whose budget ran out.
        stage: Stage,
        /// Feedback of the last rejected candidate.
        detail: String,
    },
    /// The generator itself failed.
    #[error(transparent)]
    Generation(#[from] GenerationError),
}

impl OrchestrationError {
    /// Whether the run was superseded rather than failed.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Generation(e) if e.is_cancelled())
    }
}

/// Binds the generator to the [`ValidationPipeline`].
#[derive(Clone)]
pub struct RetryOrchestrator {
    generator: Arc<dyn DiagramGenerator>,
    config: ValidationConfig,
}

impl fmt::Debug for RetryOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOrchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RetryOrchestrator {
    /// Create an orchestrator.
    #[must_use]
    pub fn new(generator: Arc<dyn DiagramGenerator>, config: ValidationConfig) -> Self {
        Self { generator, config }
    }

    /// Obtain an accepted diagram for `request`.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestrationError::Exhausted`] when a stage fails
    /// `max_attempts_per_stage` times, or [`OrchestrationError::Generation`]
    /// when a generator call fails, times out or is cancelled.
    pub async fn run(
        &self,
        request: &GenerationRequest,
        live: &LiveIds,
    ) -> Result<Accepted, OrchestrationError> {
        let pipeline = ValidationPipeline::for_mode(self.config.lint.clone(), request.mode, live);
        self.run_with(request, &pipeline).await
    }

    /// Like [`RetryOrchestrator::run`] with an explicit pipeline.
    ///
    /// # Errors
    ///
    /// See [`RetryOrchestrator::run`].
    pub async fn run_with(
        &self,
        request: &GenerationRequest,
        pipeline: &ValidationPipeline,
    ) -> Result<Accepted, OrchestrationError> {
        let mut budget = AttemptBudget::new(self.config.max_attempts_per_stage);
        let mut proposal = self.generator.propose(request).await?;
        let mut attempts = 1;

        loop {
            let (text, outcome) = run_stages(pipeline, proposal);
            let (stage, feedback) = match outcome {
                Ok(warnings) => {
                    info!(
                        attempts,
                        warnings = warnings.len(),
                        "diagram accepted"
                    );
                    return Ok(Accepted {
                        text,
                        warnings,
                        attempts,
                    });
                }
                Err(rejection) => rejection,
            };

            if !budget.record_failure(stage) {
                warn!(%stage, attempts, "validation attempts exhausted");
                return Err(OrchestrationError::Exhausted {
                    stage,
                    detail: feedback,
                });
            }
            warn!(
                %stage,
                used = budget.used(stage),
                max = self.config.max_attempts_per_stage,
                "candidate rejected, asking for a revision"
            );
            proposal = self.generator.revise(request, &text, &feedback).await?;
            attempts += 1;
        }
    }
}

/// Walk one candidate through every stage.
///
/// Returns the candidate text with either its warnings or the failing
/// stage and its feedback.
fn run_stages(
    pipeline: &ValidationPipeline,
    proposal: Proposal,
) -> (String, Result<Vec<LintViolation>, (Stage, String)>) {
    let text = match proposal {
        Proposal::Text(text) => text,
        Proposal::Spec(spec) => {
            let text = render_spec(&spec);
            if let Err(violations) = spec.validate(pipeline.live_node_ids()) {
                return (text, Err((Stage::Linting, schema_feedback(&violations))));
            }
            text
        }
    };

    let mut stage = Stage::Linting;
    let mut warnings = Vec::new();
    while !stage.is_terminal() {
        match pipeline.evaluate(stage, &text) {
            Evaluation::Passed { warnings: found } => {
                debug!(%stage, "stage passed");
                warnings.extend(found);
                stage = stage.next();
            }
            Evaluation::Rejected { feedback } => return (text, Err((stage, feedback))),
        }
    }
    (text, Ok(warnings))
}

fn schema_feedback(violations: &[SchemaViolation]) -> String {
    let mut out = String::from("The diagram spec is invalid:\n");
    for v in violations {
        out.push_str("- ");
        out.push_str(&v.to_string());
        out.push('\n');
    }
    out
}
