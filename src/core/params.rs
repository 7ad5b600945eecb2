//! AD-005: Inference parameter layering.
//!
//! Layers, lowest first: verb default, global `SET` block, every pipeline
//! `SET` step that precedes the inference step. The latest explicit value wins
//! per parameter; headers are keyed by name.

use super::types::{InferenceParams, ParamOverride, Verb};
use indexmap::IndexMap;

/// Seed used by deterministic verbs unless overridden.
pub const DEFAULT_SEED: u64 = 42;

/// Temperature used by generative verbs unless overridden.
pub const DRAFT_TEMPERATURE: f64 = 0.7;

/// Compiled default for a verb.
pub fn defaults_for(verb: Verb) -> InferenceParams {
    if verb.is_deterministic() {
        InferenceParams {
            model: None,
            temperature: 0.0,
            top_p: None,
            seed: Some(DEFAULT_SEED),
            max_tokens: None,
            headers: IndexMap::new(),
        }
    } else {
        InferenceParams {
            model: None,
            temperature: DRAFT_TEMPERATURE,
            top_p: None,
            seed: None,
            max_tokens: None,
            headers: IndexMap::new(),
        }
    }
}

/// Range check for a single override. The error names what was expected.
pub fn check(o: &ParamOverride) -> Result<(), &'static str> {
    match o {
        ParamOverride::Model(m) if m.trim().is_empty() => Err("a model name"),
        ParamOverride::Temperature(t) if !(0.0..=2.0).contains(t) => Err("a temperature between 0 and 2"),
        ParamOverride::TopP(p) if !(0.0..=1.0).contains(p) => Err("a top_p between 0 and 1"),
        ParamOverride::MaxTokens(0) => Err("a positive max_tokens"),
        ParamOverride::Header(k, _) if k.trim().is_empty() => Err("a header name"),
        _ => Ok(()),
    }
}

/// Apply one layer of overrides in order.
pub fn apply(params: &mut InferenceParams, overrides: &[ParamOverride]) {
    for o in overrides {
        match o {
            ParamOverride::Model(m) => params.model = Some(m.clone()),
            ParamOverride::Temperature(t) => params.temperature = *t,
            ParamOverride::TopP(p) => params.top_p = Some(*p),
            ParamOverride::Seed(s) => params.seed = Some(*s),
            ParamOverride::MaxTokens(n) => params.max_tokens = Some(*n),
            ParamOverride::Header(k, v) => {
                params.headers.insert(k.clone(), v.clone());
            }
        }
    }
}

/// Merge verb default, global settings, and preceding step-local layers.
pub fn merge(verb: Verb, global: &[ParamOverride], local: &[&[ParamOverride]]) -> InferenceParams {
    let mut params = defaults_for(verb);
    apply(&mut params, global);
    for layer in local {
        apply(&mut params, layer);
    }
    params
}
