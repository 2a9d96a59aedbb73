//! Index state descriptor of the assembled index.

use crate::index::merge::StageInput;
use crate::index::types::{IndexMode, Stage, ARTIFACT_SURFACE_VERSION};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};

/// Inputs to [`synthesize_index_state`] that do not come from the pieces
#[derive(Debug, Clone)]
pub struct StateOverrides<'a> {
    pub compatibility_key: Option<&'a str>,
    pub mode: IndexMode,
    /// Requested stage; wins over whatever the base state says
    pub stage: Option<Stage>,
    pub chunk_count: usize,
    pub generated_at: DateTime<Utc>,
}

fn stage_rank(state: &Map<String, Value>) -> u8 {
    state
        .get("stage")
        .and_then(Value::as_str)
        .and_then(Stage::parse)
        .map_or(0, Stage::rank)
}

/// The descriptor of the most advanced input.
///
/// Inputs are scanned in fold order and only a strictly higher stage
/// replaces the current pick, so the first input wins ties. With no staged
/// input at all the first input's descriptor is used.
pub fn pick_base_state(inputs: &[StageInput]) -> Map<String, Value> {
    let mut best: Option<&Map<String, Value>> = inputs.first().and_then(|i| i.index_state.as_ref());
    let mut best_rank = 0;
    for input in inputs {
        let Some(candidate) = input.index_state.as_ref() else {
            continue;
        };
        let rank = stage_rank(candidate);
        if rank > best_rank {
            best_rank = rank;
            best = Some(candidate);
        }
    }
    best.cloned().unwrap_or_default()
}

/// Overlay assembly facts onto the base descriptor.
///
/// Every key of `base` survives unless overwritten here.
pub fn synthesize_index_state(mut base: Map<String, Value>, overrides: &StateOverrides<'_>) -> Map<String, Value> {
    let surface_version = base
        .get("artifactSurfaceVersion")
        .and_then(Value::as_str)
        .filter(|v| !v.is_empty())
        .unwrap_or(ARTIFACT_SURFACE_VERSION)
        .to_string();

    let compatibility_key = overrides
        .compatibility_key
        .map(str::to_string)
        .or_else(|| base.get("compatibilityKey").and_then(Value::as_str).map(str::to_string));

    let base_stage = base.get("stage").cloned().filter(|v| !v.is_null());
    let stage = overrides
        .stage
        .or_else(|| base_stage.as_ref().and_then(Value::as_str).and_then(Stage::parse))
        .map(|s| Value::from(s.as_str()))
        .or(base_stage)
        .unwrap_or(Value::Null);

    base.insert(
        "generatedAt".into(),
        Value::from(overrides.generated_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    base.insert("artifactSurfaceVersion".into(), Value::from(surface_version));
    base.insert("compatibilityKey".into(), compatibility_key.map_or(Value::Null, Value::from));
    base.insert("mode".into(), Value::from(overrides.mode.as_str()));
    base.insert("stage".into(), stage);
    base.insert("assembled".into(), Value::Bool(true));
    base.insert("filterIndex".into(), json!({ "ready": overrides.chunk_count > 0 }));
    base
}
