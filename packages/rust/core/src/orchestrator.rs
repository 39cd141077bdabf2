//! Command orchestrator: Analyzer → Knowledge → Trust → Growth → Reporter.
//!
//! Each stage reads the run state and returns a trace entry plus a patch;
//! the orchestrator folds the patch in and moves on. Policy and gate blocks
//! are ordinary state. Any error aborts the remaining stages, and the
//! response still carries the trace and receipts gathered so far.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use trustline_shared::{
    Action, Actor, ClassifierConfig, NewReceipt, OrchestratorConfig, Receipt, ReceiptKind,
    Recommendation, RecommendationStatus, Result, Tenant, TrustSnapshot, TrustlineError,
};
use trustline_storage::Storage;

use crate::classifier::classify;
use crate::draft::{DraftGenerator, draft_recommendation};
use crate::growth::{CampaignOutcome, GrowthEngine};
use crate::knowledge::{ClaimInventory, GapReport, analyze_gaps, claim_inventory};
use crate::policy::{PolicyDecision, TrustPolicy, assess_trust};

// ---------------------------------------------------------------------------
// Commands & stages
// ---------------------------------------------------------------------------

/// A command already resolved from the user's request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    TrustAudit,
    FixGaps,
    LaunchReferral { dry_run: bool },
    Status,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TrustAudit => "TRUST_AUDIT",
            Self::FixGaps => "FIX_GAPS",
            Self::LaunchReferral { .. } => "LAUNCH_REFERRAL",
            Self::Status => "STATUS",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = TrustlineError;

    /// Accepts `trust-audit`, `fix_gaps`, `LAUNCH_REFERRAL` etc.
    /// `launch-referral` is a dry run; `launch-referral-live` sends.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "trust_audit" | "audit" => Ok(Self::TrustAudit),
            "fix_gaps" | "fix" => Ok(Self::FixGaps),
            "launch_referral" | "referral" => Ok(Self::LaunchReferral { dry_run: true }),
            "launch_referral_live" => Ok(Self::LaunchReferral { dry_run: false }),
            "status" => Ok(Self::Status),
            other => Err(TrustlineError::validation(format!("unknown command: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Analyzer,
    Knowledge,
    Trust,
    Growth,
    Reporter,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Self::Analyzer,
        Self::Knowledge,
        Self::Trust,
        Self::Growth,
        Self::Reporter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analyzer => "ANALYZER",
            Self::Knowledge => "KNOWLEDGE",
            Self::Trust => "TRUST",
            Self::Growth => "GROWTH",
            Self::Reporter => "REPORTER",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Ok,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceEntry {
    pub stage: Stage,
    pub status: StageStatus,
    pub summary: String,
    pub elapsed_ms: u64,
}

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct RunState {
    pub tenant: Tenant,
    pub command: Command,
    pub free_text: Option<String>,
    pub trace: Vec<TraceEntry>,
    pub receipts: Vec<Receipt>,
    pub analysis: Option<GapReport>,
    pub inventory: Option<ClaimInventory>,
    pub recommendations: Vec<Recommendation>,
    pub drafts: Vec<Recommendation>,
    pub trust: Option<PolicyDecision>,
    pub trust_snapshot: Option<TrustSnapshot>,
    pub campaign: Option<CampaignOutcome>,
    pub final_message: Option<String>,
}

impl RunState {
    pub fn new(tenant: Tenant, command: Command, free_text: Option<String>) -> Self {
        Self {
            tenant,
            command,
            free_text,
            trace: Vec::new(),
            receipts: Vec::new(),
            analysis: None,
            inventory: None,
            recommendations: Vec::new(),
            drafts: Vec::new(),
            trust: None,
            trust_snapshot: None,
            campaign: None,
            final_message: None,
        }
    }

    fn apply(&mut self, patch: StatePatch) {
        self.receipts.extend(patch.receipts);
        if let Some(analysis) = patch.analysis {
            self.analysis = Some(analysis);
        }
        if let Some(inventory) = patch.inventory {
            self.inventory = Some(inventory);
        }
        if let Some(recommendations) = patch.recommendations {
            self.recommendations = recommendations;
        }
        if let Some(drafts) = patch.drafts {
            self.drafts = drafts;
        }
        if let Some(trust) = patch.trust {
            self.trust = Some(trust);
        }
        if let Some(snapshot) = patch.trust_snapshot {
            self.trust_snapshot = Some(snapshot);
        }
        if let Some(campaign) = patch.campaign {
            self.campaign = Some(campaign);
        }
        if let Some(message) = patch.final_message {
            self.final_message = Some(message);
        }
    }
}

/// Fields a stage wants to set. `None` leaves the state untouched.
#[derive(Debug, Default)]
pub struct StatePatch {
    /// Receipts the stage appended, in order.
    pub receipts: Vec<Receipt>,
    pub analysis: Option<GapReport>,
    pub inventory: Option<ClaimInventory>,
    pub recommendations: Option<Vec<Recommendation>>,
    pub drafts: Option<Vec<Recommendation>>,
    pub trust: Option<PolicyDecision>,
    pub trust_snapshot: Option<TrustSnapshot>,
    pub campaign: Option<CampaignOutcome>,
    pub final_message: Option<String>,
}

/// A UI card derived from the final run state.
#[derive(Debug, Clone, Serialize)]
pub struct Overlay {
    pub kind: &'static str,
    pub data: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandResponse {
    pub overlays: Vec<Overlay>,
    pub trace: Vec<TraceEntry>,
    pub receipts: Vec<Receipt>,
    pub summary_text: String,
    pub debug: Value,
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for long runs.
pub trait ProgressReporter: Send + Sync {
    /// Called when a stage starts.
    fn stage(&self, stage: Stage);
    /// Called with each finished trace entry.
    fn stage_done(&self, entry: &TraceEntry);
    fn done(&self, response: &CommandResponse);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn stage(&self, _stage: Stage) {}
    fn stage_done(&self, _entry: &TraceEntry) {}
    fn done(&self, _response: &CommandResponse) {}
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Orchestrator {
    classifier: ClassifierConfig,
    limits: OrchestratorConfig,
    policy: TrustPolicy,
    generator: DraftGenerator,
    growth: GrowthEngine,
}

type StageResult = Result<(StageStatus, String, StatePatch)>;

impl Orchestrator {
    pub fn new(
        classifier: ClassifierConfig,
        limits: OrchestratorConfig,
        policy: TrustPolicy,
        generator: DraftGenerator,
        growth: GrowthEngine,
    ) -> Self {
        Self {
            classifier,
            limits,
            policy,
            generator,
            growth,
        }
    }

    /// Run every stage in order for one command.
    #[instrument(skip_all, fields(tenant = %tenant.domain, command = %command))]
    pub async fn run(
        &self,
        storage: &Storage,
        tenant: Tenant,
        command: Command,
        free_text: Option<String>,
        progress: &dyn ProgressReporter,
    ) -> Result<CommandResponse> {
        let mut state = RunState::new(tenant, command, free_text);
        let mut failure: Option<(Stage, TrustlineError)> = None;

        for stage in Stage::ALL {
            progress.stage(stage);
            let start = Instant::now();
            let result = self.run_stage(storage, stage, &state).await;
            let elapsed_ms = start.elapsed().as_millis() as u64;

            let entry = match result {
                Ok((status, summary, patch)) => {
                    state.apply(patch);
                    TraceEntry {
                        stage,
                        status,
                        summary,
                        elapsed_ms,
                    }
                }
                Err(e) => {
                    warn!(%stage, error = %e, "stage failed; aborting run");
                    let entry = TraceEntry {
                        stage,
                        status: StageStatus::Failed,
                        summary: e.to_string(),
                        elapsed_ms,
                    };
                    failure = Some((stage, e));
                    entry
                }
            };
            progress.stage_done(&entry);
            state.trace.push(entry);
            if failure.is_some() {
                break;
            }
        }


        let summary_text = match (&failure, &state.final_message) {
            (Some((stage, e)), _) => format!("Run aborted at {stage}: {e}"),
            (None, Some(message)) => message.clone(),
            (None, None) => String::new(),
        };
        let debug = json!({
            "command": state.command,
            "free_text": state.free_text,
            "receipts": state.receipts.len(),
            "error": failure.as_ref().map(|(stage, e)| json!({
                "stage": stage,
                "code": e.code(),
                "message": e.to_string(),
            })),
        });

        info!(
            stages = state.trace.len(),
            receipts = state.receipts.len(),
            failed = failure.is_some(),
            "command finished"
        );

        let response = CommandResponse {
            overlays: overlays(&state),
            trace: state.trace,
            receipts: state.receipts,
            summary_text,
            debug,
        };
        progress.done(&response);
        Ok(response)
    }

    async fn run_stage(&self, storage: &Storage, stage: Stage, state: &RunState) -> StageResult {
        match stage {
            Stage::Analyzer => self.analyzer(storage, state).await,
            Stage::Knowledge => self.knowledge(storage, state).await,
            Stage::Trust => self.trust(storage, state).await,
            Stage::Growth => self.growth(storage, state).await,
            Stage::Reporter => reporter(storage, state).await,
        }
    }

    async fn analyzer(&self, storage: &Storage, state: &RunState) -> StageResult {
        if state.command == Command::Status {
            return Ok((StageStatus::Skipped, "read-only command".into(), StatePatch::default()));
        }
        let report = analyze_gaps(storage, &state.tenant.id, &self.classifier).await?;
        let summary = format!("{} questions, {} gaps", report.questions, report.gaps.len());
        Ok((
            StageStatus::Ok,
            summary,
            StatePatch {
                receipts: report.receipts.clone(),
                analysis: Some(report),
                ..StatePatch::default()
            },
        ))
    }

    async fn knowledge(&self, storage: &Storage, state: &RunState) -> StageResult {
        let tenant_id = &state.tenant.id;
        if state.command != Command::FixGaps {
            let claims = storage.verified_claims(tenant_id).await?;
            let inventory = claim_inventory(&claims, self.classifier.stale_after_days, Utc::now());
            let summary = format!(
                "{} claims, {} with evidence, {} stale",
                inventory.claims, inventory.with_evidence, inventory.stale
            );
            return Ok((
                StageStatus::Ok,
                summary,
                StatePatch {
                    inventory: Some(inventory),
                    ..StatePatch::default()
                },
            ));
        }

        let outcome = classify(storage, &state.tenant, &self.classifier).await?;
        let to_draft: Vec<&Recommendation> = outcome
            .recommendations
            .iter()
            .filter(|r| r.action.is_actionable() && r.status == RecommendationStatus::Proposed)
            .take(self.limits.max_drafts_per_run)
            .collect();

        let mut receipts = vec![outcome.receipt.clone()];
        let mut drafts = Vec::with_capacity(to_draft.len());
        for rec in to_draft {
            let drafted = draft_recommendation(storage, &self.generator, tenant_id, &rec.id).await?;
            receipts.push(drafted.receipt);
            drafts.push(drafted.recommendation);
        }

        let creates = outcome.by_action.get(&Action::Create).copied().unwrap_or(0);
        let summary = format!(
            "{} recommendations ({creates} to create), {} drafted",
            outcome.recommendations.len(),
            drafts.len()
        );
        Ok((
            StageStatus::Ok,
            summary,
            StatePatch {
                receipts,
                recommendations: Some(outcome.recommendations),
                drafts: Some(drafts),
                ..StatePatch::default()
            },
        ))
    }

    async fn trust(&self, storage: &Storage, state: &RunState) -> StageResult {
        let tenant_id = &state.tenant.id;
        if state.command == Command::Status {
            let snapshot = storage.latest_trust_snapshot(tenant_id).await?;
            let decision = self.policy.evaluate(snapshot.as_ref().map_or(0, |s| s.total));
            let summary = format!("latest trust {} ({})", decision.total, decision.zone);
            return Ok((
                StageStatus::Ok,
                summary,
                StatePatch {
                    trust: Some(decision),
                    trust_snapshot: snapshot,
                    ..StatePatch::default()
                },
            ));
        }

        let assessment =
            assess_trust(storage, &self.policy, tenant_id, self.classifier.stale_after_days)
                .await?;
        let summary = format!(
            "trust {} ({})",
            assessment.decision.total, assessment.decision.zone
        );
        Ok((
            StageStatus::Ok,
            summary,
            StatePatch {
                receipts: vec![assessment.receipt],
                trust: Some(assessment.decision),
                trust_snapshot: Some(assessment.snapshot),
                ..StatePatch::default()
            },
        ))
    }

    async fn growth(&self, storage: &Storage, state: &RunState) -> StageResult {
        let Command::LaunchReferral { dry_run } = state.command else {
            return Ok((StageStatus::Skipped, "no growth action".into(), StatePatch::default()));
        };
        let name = state
            .free_text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("referral {}", Utc::now().format("%Y-%m-%d")));

        let outcome = self
            .growth
            .create_campaign(storage, &state.tenant.id, &name, dry_run)
            .await?;
        let summary = match &outcome {
            CampaignOutcome::Created { campaign, snapshot, .. } => format!(
                "campaign {} ready: {} eligible, {} suppressed",
                campaign.id, snapshot.eligible_count, snapshot.suppressed_count
            ),
            CampaignOutcome::Blocked { action, decision, .. } => {
                format!("{action} blocked in zone {}", decision.zone)
            }
        };
        Ok((
            StageStatus::Ok,
            summary,
            StatePatch {
                receipts: vec![outcome.receipt().clone()],
                campaign: Some(outcome),
                ..StatePatch::default()
            },
        ))
    }
}

/// Compose the final message from what earlier stages recorded.
pub fn compose_summary(state: &RunState) -> String {
    let mut parts = Vec::new();

    if let Some(trust) = &state.trust {
        parts.push(format!("Trust score {} ({}).", trust.total, trust.zone));
    }
    if let Some(analysis) = &state.analysis {
        parts.push(format!(
            "Analyzed {} questions and found {} gaps.",
            analysis.questions,
            analysis.gaps.len()
        ));
    }
    if let Some(inventory) = &state.inventory {
        parts.push(format!(
            "{} claims on record, {} with evidence, {} stale.",
            inventory.claims, inventory.with_evidence, inventory.stale
        ));
    }
    if state.command == Command::FixGaps {
        let actionable = state
            .recommendations
            .iter()
            .filter(|r| r.action.is_actionable())
            .count();
        parts.push(format!(
            "{} recommendations, {actionable} actionable; {} drafted.",
            state.recommendations.len(),
            state.drafts.len()
        ));
        let mut pending: Vec<String> = state
            .drafts
            .iter()
            .filter_map(|r| r.draft.as_ref())
            .flat_map(|d| d.verification.iter().cloned())
            .collect();
        pending.sort();
        pending.dedup();
        if !pending.is_empty() {
            parts.push(format!("Needs verification before publish: {}.", pending.join(", ")));
        }
    }
    match &state.campaign {
        Some(CampaignOutcome::Created { campaign, snapshot, .. }) => parts.push(format!(
            "Campaign \"{}\" is ready{}: {} eligible, {} suppressed.",
            campaign.name,
            if campaign.dry_run { " as a dry run" } else { "" },
            snapshot.eligible_count,
            snapshot.suppressed_count
        )),
        Some(CampaignOutcome::Blocked { action, decision, .. }) => parts.push(format!(
            "Campaign not created: {action} is blocked in zone {}.",
            decision.zone
        )),
        None => {}
    }

    if parts.is_empty() {
        format!("{} finished with nothing to report.", state.command)
    } else {
        parts.join(" ")
    }
}

async fn reporter(storage: &Storage, state: &RunState) -> StageResult {
    let message = compose_summary(state);
    let receipt = storage
        .append_receipt(
            &state.tenant.id,
            NewReceipt::new(
                ReceiptKind::Read,
                Actor::Reporter,
                format!("{} summary", state.command),
            )
            .input(json!({
                "command": state.command,
                "stages": state.trace.iter().map(|t| t.stage).collect::<Vec<_>>(),
            }))
            .output(json!({ "summary": message })),
        )
        .await?;
    Ok((
        StageStatus::Ok,
        "summary composed".into(),
        StatePatch {
            receipts: vec![receipt],
            final_message: Some(message),
            ..StatePatch::default()
        },
    ))
}

fn overlays(state: &RunState) -> Vec<Overlay> {
    let mut out = Vec::new();
    if let Some(trust) = &state.trust {
        out.push(Overlay {
            kind: "trust",
            data: json!({
                "total": trust.total,
                "zone": trust.zone,
                "blocked": trust.blocked,
                "breakdown": state.trust_snapshot.as_ref().map(|s| &s.breakdown),
            }),
        });
    }
    if let Some(analysis) = &state.analysis {
        out.push(Overlay {
            kind: "gaps",
            data: json!({ "states": analysis.states, "gaps": analysis.gaps }),
        });
    }
    if !state.recommendations.is_empty() {
        out.push(Overlay {
            kind: "recommendations",
            data: json!(
                state
                    .recommendations
                    .iter()
                    .map(|r| json!({
                        "id": r.id,
                        "slug": r.stable_slug,
                        "action": r.action,
                        "surface": r.surface,
                        "status": r.status,
                        "reason": r.reason,
                    }))
                    .collect::<Vec<_>>()
            ),
        });
    }
    if let Some(campaign) = &state.campaign {
        out.push(Overlay {
            kind: "campaign",
            data: json!(campaign),
        });
    }
    out
}
