//! Blocker, dependency and assumption commands.

use ralph_autopilot::blocker::document::{grouped_blockers, value_hint};
use ralph_autopilot::feature::FeatureId;
use ralph_autopilot::scheduler::ControlRequest;
use ralph_autopilot::state::ProjectState;
use ralph_autopilot::{AutopilotError, Result};

use super::{Output, Project};

pub fn unblock(project: &Project, out: &Output, feature_id: Option<u64>, all: bool) -> Result<()> {
    let mut state = project.load()?;
    if let Some(id) = feature_id.map(FeatureId) {
        if !state.contains(id) {
            return Err(AutopilotError::FeatureNotFound(id));
        }
    }
    let request = match feature_id {
        Some(id) if !all => ControlRequest::Unblock {
            feature_id: FeatureId(id),
        },
        _ => ControlRequest::UnblockAll,
    };
    if project.submit_if_running(out, request)? {
        return Ok(());
    }

    let coordinator = project.coordinator();
    if all {
        let unblocked = coordinator.unblock_all(&mut state);
        project.save(&state)?;
        println!(
            "{} {} feature(s)",
            out.success("unblocked:"),
            unblocked.len()
        );
        for id in unblocked {
            println!("  #{} {}", id, feature_name(&state, id));
        }
        return Ok(());
    }

    let Some(feature_id) = feature_id.map(FeatureId) else {
        return Ok(());
    };
    let resolved = coordinator.manual_unblock(&mut state, feature_id)?;
    project.save(&state)?;
    println!(
        "{} #{} {} ({} blocker(s) resolved)",
        out.success("unblocked:"),
        feature_id,
        feature_name(&state, feature_id),
        resolved.len()
    );
    Ok(())
}

pub fn show_blockers(project: &Project, out: &Output, details: bool) -> Result<()> {
    let state = project.load()?;
    let groups = grouped_blockers(&state);
    if groups.is_empty() {
        println!("No features are currently blocked.");
        return Ok(());
    }

    for (blocker_type, features) in groups {
        println!(
            "{} {}",
            out.header(blocker_type.title()),
            out.dim(&format!("({}, {})", blocker_type, features.len()))
        );
        for (feature, blockers) in features {
            println!("  #{} {}", feature.id, feature.name);
            if !details {
                continue;
            }
            for blocker in blockers {
                let status = blocker
                    .resolution_action
                    .map(|action| action.as_label())
                    .unwrap_or("ACTIVE");
                println!(
                    "    blocker {} [{}]: {}",
                    blocker.id,
                    out.warn(status),
                    blocker.description
                );
                for key in &blocker.required_values {
                    println!("      {} {}", key, out.dim(value_hint(key)));
                }
            }
        }
    }
    Ok(())
}

pub fn show_dependencies(project: &Project, out: &Output, feature_id: u64) -> Result<()> {
    let state = project.load()?;
    let id = FeatureId(feature_id);
    let feature = state.get(id).ok_or(AutopilotError::FeatureNotFound(id))?;
    let min_confidence = project.min_confidence();

    println!("{} #{} {}", out.header("Feature"), feature.id, feature.name);

    let dependencies = state.graph.dependencies(id);
    println!("{}", out.header("Depends on:"));
    if dependencies.is_empty() {
        println!("  {}", out.dim("nothing"));
    }
    for edge in dependencies {
        let mocked = feature.mocked_dependencies.contains(&edge.depends_on);
        let note = if mocked {
            " (mocked)"
        } else if edge.confidence < min_confidence {
            " (below threshold)"
        } else {
            ""
        };
        println!(
            "  {} #{} {}  {:.2} {}{}",
            edge.confidence_indicator(),
            edge.depends_on,
            feature_name(&state, edge.depends_on),
            edge.confidence,
            out.dim(&edge.detected_method.to_string()),
            out.dim(note)
        );
    }

    let dependents = state.graph.dependents(id);
    println!("{}", out.header("Required by:"));
    if dependents.is_empty() {
        println!("  {}", out.dim("nothing"));
    }
    for edge in dependents {
        println!(
            "  {} #{} {}  {:.2} {}",
            edge.confidence_indicator(),
            edge.feature,
            feature_name(&state, edge.feature),
            edge.confidence,
            out.dim(&edge.detected_method.to_string())
        );
    }
    Ok(())
}

pub fn assumptions(project: &Project, out: &Output) -> Result<()> {
    let state = project.load()?;
    if state.assumptions().is_empty() {
        println!("No assumptions recorded.");
        return Ok(());
    }

    for assumption in state.assumptions() {
        let about = assumption
            .about
            .map(|id| format!(" about #{}", id))
            .unwrap_or_default();
        let status = assumption.status.as_label();
        let status = if assumption.status.is_open() {
            out.warn(status)
        } else {
            out.dim(status)
        };
        println!(
            "{} [{}] #{}{}: {}",
            assumption.id, status, assumption.feature_id, about, assumption.description
        );
    }
    Ok(())
}

pub fn resolve_assumption(project: &Project, out: &Output, id: u64, valid: bool) -> Result<()> {
    let mut state = project.load()?;
    if !state.assumptions().iter().any(|a| a.id == id) {
        return Err(AutopilotError::AssumptionNotFound(id));
    }
    let request = ControlRequest::ResolveAssumption {
        assumption_id: id,
        valid,
    };
    if project.submit_if_running(out, request)? {
        return Ok(());
    }

    let (feature_id, status) = state
        .resolve_assumption(id, valid)
        .map(|a| (a.feature_id, a.status))
        .ok_or(AutopilotError::AssumptionNotFound(id))?;
    project.save(&state)?;

    println!(
        "{} assumption {} is {}",
        out.success("resolved:"),
        id,
        status.as_label()
    );
    if !valid {
        println!("  #{} {} reopened", feature_id, feature_name(&state, feature_id));
    }
    Ok(())
}

fn feature_name(state: &ProjectState, id: FeatureId) -> &str {
    state.get(id).map(|f| f.name.as_str()).unwrap_or("(unknown)")
}
