//! Human intervention workflow for blockers only a person can clear.
//!
//! The workflow is split in two so the scheduler never holds the state lock
//! while waiting on a human: [`HumanInterventionCoordinator::collect`] asks
//! the prompt for a decision (and any values), then
//! [`HumanInterventionCoordinator::apply`] reconciles state.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io::{self, Write};

use console::Term;
use tracing::{info, warn};

use super::{BlockerType, BlockersDocument, EnvFile, ResolutionAction};
use crate::dependency::SkipImpact;
use crate::error::{AutopilotError, Result};
use crate::feature::FeatureId;
use crate::state::ProjectState;

/// Name fragments that mark a value as secret (read without echo).
const SECRET_MARKERS: [&str; 6] = ["SECRET", "TOKEN", "KEY", "PASSWORD", "PRIVATE", "CREDENTIAL"];

pub fn is_secret_key(key: &str) -> bool {
    let upper = key.to_uppercase();
    SECRET_MARKERS.iter().any(|marker| upper.contains(marker))
}

/// The human's decision for one blocker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterventionChoice {
    Provide,
    Defer,
    Mock,
}

impl fmt::Display for InterventionChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            InterventionChoice::Provide => "provide",
            InterventionChoice::Defer => "defer",
            InterventionChoice::Mock => "mock",
        };
        f.write_str(label)
    }
}

/// What the scheduler should do with the feature afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterventionOutcome {
    /// Values were provided; dispatch the feature again right away.
    RetryNow,
    /// Deferred, or other blockers are still active.
    RemainBlocked,
    /// Proceed with a placeholder implementation.
    ProceedWithMocks,
}

/// Everything a prompt needs to present one blocker.
#[derive(Debug, Clone)]
pub struct InterventionRequest {
    pub feature_id: FeatureId,
    pub feature_name: String,
    pub blocker_id: u64,
    pub blocker_type: BlockerType,
    pub description: String,
    pub required_values: Vec<String>,
    pub impact: Option<SkipImpact>,
}

/// A decision plus any values collected for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterventionResponse {
    pub blocker_id: u64,
    pub choice: InterventionChoice,
    pub values: Vec<(String, String)>,
}

/// Source of human decisions.
pub trait InterventionPrompt: Send {
    fn choose(&mut self, request: &InterventionRequest) -> io::Result<InterventionChoice>;

    /// Read one value. Secret values must not be echoed.
    fn read_value(&mut self, key: &str, secret: bool) -> io::Result<String>;
}

/// Interactive prompt on the controlling terminal.
pub struct TerminalPrompt {
    term: Term,
}

impl TerminalPrompt {
    pub fn new() -> Self {
        Self {
            term: Term::stderr(),
        }
    }
}

impl Default for TerminalPrompt {
    fn default() -> Self {
        Self::new()
    }
}

impl InterventionPrompt for TerminalPrompt {
    fn choose(&mut self, request: &InterventionRequest) -> io::Result<InterventionChoice> {
        writeln!(self.term)?;
        writeln!(
            self.term,
            "Feature #{} \"{}\" is blocked ({})",
            request.feature_id, request.feature_name, request.blocker_type
        )?;
        writeln!(self.term, "  {}", request.description)?;
        if !request.required_values.is_empty() {
            writeln!(self.term, "  Needs: {}", request.required_values.join(", "))?;
        }
        if let Some(impact) = &request.impact {
            writeln!(
                self.term,
                "  Impact: {} dependent(s), recommendation {}",
                impact.total_impact, impact.recommendation
            )?;
        }

        loop {
            write!(self.term, "[p]rovide values, [d]efer, [m]ock > ")?;
            self.term.flush()?;
            let answer = self.term.read_line()?;
            match answer.trim().to_lowercase().as_str() {
                "p" | "provide" => return Ok(InterventionChoice::Provide),
                "d" | "defer" | "" => return Ok(InterventionChoice::Defer),
                "m" | "mock" => return Ok(InterventionChoice::Mock),
                other => writeln!(self.term, "Unrecognized choice '{}'", other)?,
            }
        }
    }

    fn read_value(&mut self, key: &str, secret: bool) -> io::Result<String> {
        write!(self.term, "{}: ", key)?;
        self.term.flush()?;
        let value = if secret {
            self.term.read_secure_line()?
        } else {
            self.term.read_line()?
        };
        Ok(value.trim().to_string())
    }
}

/// Pre-recorded decisions. Used for non-interactive runs and tests; once
/// the queue is exhausted every blocker is deferred.
#[derive(Debug, Clone, Default)]
pub struct ScriptedPrompt {
    choices: VecDeque<InterventionChoice>,
    values: HashMap<String, String>,
}

impl ScriptedPrompt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_choice(mut self, choice: InterventionChoice) -> Self {
        self.choices.push_back(choice);
        self
    }

    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl InterventionPrompt for ScriptedPrompt {
    fn choose(&mut self, _request: &InterventionRequest) -> io::Result<InterventionChoice> {
        Ok(self.choices.pop_front().unwrap_or(InterventionChoice::Defer))
    }

    fn read_value(&mut self, key: &str, _secret: bool) -> io::Result<String> {
        Ok(self.values.get(key).cloned().unwrap_or_default())
    }
}

/// Applies intervention decisions to project state and keeps the `.env`
/// file and blockers document in sync.
#[derive(Debug, Clone)]
pub struct HumanInterventionCoordinator {
    env_file: EnvFile,
    document: BlockersDocument,
}

impl HumanInterventionCoordinator {
    pub fn new(env_file: EnvFile, document: BlockersDocument) -> Self {
        Self { env_file, document }
    }

    pub fn env_file(&self) -> &EnvFile {
        &self.env_file
    }

    pub fn document(&self) -> &BlockersDocument {
        &self.document
    }

    /// Snapshot a blocker for presentation.
    pub fn request(
        &self,
        state: &ProjectState,
        blocker_id: u64,
        impact: Option<SkipImpact>,
    ) -> Result<InterventionRequest> {
        let blocker = state
            .blocker(blocker_id)
            .ok_or(AutopilotError::BlockerNotFound(blocker_id))?;
        let feature = state
            .get(blocker.feature_id)
            .ok_or(AutopilotError::FeatureNotFound(blocker.feature_id))?;
        Ok(InterventionRequest {
            feature_id: feature.id,
            feature_name: feature.name.clone(),
            blocker_id,
            blocker_type: blocker.blocker_type,
            description: blocker.description.clone(),
            required_values: blocker.required_values.clone(),
            impact,
        })
    }

    /// Ask the prompt for a decision, reading values when it chooses Provide.
    pub fn collect(
        &self,
        prompt: &mut dyn InterventionPrompt,
        request: &InterventionRequest,
    ) -> io::Result<InterventionResponse> {
        let choice = prompt.choose(request)?;
        let mut values = Vec::new();
        if choice == InterventionChoice::Provide {
            for key in &request.required_values {
                let value = prompt.read_value(key, is_secret_key(key))?;
                values.push((key.clone(), value));
            }
        }
        Ok(InterventionResponse {
            blocker_id: request.blocker_id,
            choice,
            values,
        })
    }

    /// Reconcile state with a decision.
    pub fn apply(
        &self,
        state: &mut ProjectState,
        response: &InterventionResponse,
    ) -> Result<InterventionOutcome> {
        let outcome = match response.choice {
            InterventionChoice::Provide => self.provide(state, response.blocker_id, &response.values)?,
            InterventionChoice::Defer => self.defer(state, response.blocker_id)?,
            InterventionChoice::Mock => self.mock(state, response.blocker_id)?,
        };
        self.refresh_document(state);
        Ok(outcome)
    }

    /// Collect and apply in one step. Holds `state` across the prompt, so
    /// only use it where nothing else needs the state meanwhile.
    pub fn handle(
        &self,
        state: &mut ProjectState,
        blocker_id: u64,
        prompt: &mut dyn InterventionPrompt,
    ) -> Result<InterventionOutcome> {
        let request = self.request(state, blocker_id, None)?;
        let response = self.collect(prompt, &request)?;
        self.apply(state, &response)
    }

    fn feature_of(&self, state: &ProjectState, blocker_id: u64) -> Result<FeatureId> {
        state
            .blocker(blocker_id)
            .map(|b| b.feature_id)
            .ok_or(AutopilotError::BlockerNotFound(blocker_id))
    }

    /// Persist provided values and resolve the blocker as PROVIDED. When
    /// values were requested but every one came back empty, nothing was
    /// provided and the blocker is deferred instead.
    pub fn provide(
        &self,
        state: &mut ProjectState,
        blocker_id: u64,
        values: &[(String, String)],
    ) -> Result<InterventionOutcome> {
        let feature_id = self.feature_of(state, blocker_id)?;
        let (missing, provided): (Vec<_>, Vec<_>) = values
            .iter()
            .cloned()
            .partition(|(_, value)| value.is_empty());
        if !values.is_empty() && provided.is_empty() {
            warn!(feature_id = %feature_id, blocker_id, "no values given, deferring");
            return self.defer(state, blocker_id);
        }
        if !missing.is_empty() {
            let keys: Vec<&str> = missing.iter().map(|(key, _)| key.as_str()).collect();
            warn!(feature_id = %feature_id, keys = ?keys, "no value given, key left unset");
        }

        let report = self.env_file.append_missing(&provided)?;
        if !report.kept_existing.is_empty() {
            info!(
                keys = ?report.kept_existing,
                "existing environment keys kept"
            );
        }

        state.resolve_blocker(blocker_id, ResolutionAction::Provided);
        if state.clear_block_if_resolved(feature_id) {
            state.move_to_front(feature_id);
            info!(feature_id = %feature_id, written = report.written.len(), "values provided, retrying");
            Ok(InterventionOutcome::RetryNow)
        } else {
            Ok(InterventionOutcome::RemainBlocked)
        }
    }

    /// Resolve as DEFERRED; the feature stays blocked until a manual unblock.
    pub fn defer(&self, state: &mut ProjectState, blocker_id: u64) -> Result<InterventionOutcome> {
        let feature_id = self.feature_of(state, blocker_id)?;
        state.resolve_blocker(blocker_id, ResolutionAction::Deferred);
        info!(feature_id = %feature_id, blocker_id, "blocker deferred");
        Ok(InterventionOutcome::RemainBlocked)
    }

    /// Record an assumption, mark the feature as passing with mocks, and
    /// resolve as MOCKED.
    pub fn mock(&self, state: &mut ProjectState, blocker_id: u64) -> Result<InterventionOutcome> {
        let feature_id = self.feature_of(state, blocker_id)?;
        let description = state
            .blocker(blocker_id)
            .map(|b| format!("Placeholder used for: {}", b.description))
            .unwrap_or_default();
        state.add_assumption(feature_id, None, description);
        if let Some(feature) = state.get_mut(feature_id) {
            feature.passing_with_mocks = true;
        }
        state.resolve_blocker(blocker_id, ResolutionAction::Mocked);

        if state.clear_block_if_resolved(feature_id) {
            state.move_to_front(feature_id);
            info!(feature_id = %feature_id, "proceeding with mocks");
            Ok(InterventionOutcome::ProceedWithMocks)
        } else {
            Ok(InterventionOutcome::RemainBlocked)
        }
    }

    /// Resolve every active blocker on a feature as MANUAL_UNBLOCK, clear
    /// the block, and put the feature at the front of the queue.
    pub fn manual_unblock(&self, state: &mut ProjectState, feature_id: FeatureId) -> Result<Vec<u64>> {
        if !state.contains(feature_id) {
            return Err(AutopilotError::FeatureNotFound(feature_id));
        }
        let resolved = state.resolve_all_blockers(feature_id, ResolutionAction::ManualUnblock);
        state.clear_block_if_resolved(feature_id);
        state.move_to_front(feature_id);
        info!(feature_id = %feature_id, resolved = resolved.len(), "manually unblocked");
        self.refresh_document(state);
        Ok(resolved)
    }

    /// Manually unblock every blocked feature. Returns the features unblocked.
    pub fn unblock_all(&self, state: &mut ProjectState) -> Vec<FeatureId> {
        let blocked: Vec<FeatureId> = state.blocked_features().iter().map(|f| f.id).collect();
        for &feature_id in &blocked {
            state.resolve_all_blockers(feature_id, ResolutionAction::ManualUnblock);
            state.clear_block_if_resolved(feature_id);
            state.move_to_front(feature_id);
        }
        if !blocked.is_empty() {
            info!(count = blocked.len(), "all blocked features unblocked");
        }
        self.refresh_document(state);
        blocked
    }

    /// Regenerate the blockers document. A write failure is logged, not fatal.
    pub fn refresh_document(&self, state: &ProjectState) {
        if let Err(err) = self.document.write(state) {
            warn!(
                path = %self.document.path().display(),
                error = %err,
                "failed to write blockers document"
            );
        }
    }
}
