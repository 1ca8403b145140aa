//! Render-parameter building.
//!
//! Maps a formula descriptor, server-side state and optional caller
//! overrides onto the flat parameter set the rendering endpoint consumes.

use crate::domain::descriptor::{CONFIG_KEYS, FormulaDescriptor, remote_name};

/// Flat, insertion-ordered parameter map sent to the rendering endpoint.
/// Setting an existing name replaces its value in place (last write wins).
#[derive(Debug, Clone, Default)]
pub struct RenderParameters {
    entries: Vec<(String, String)>,
}

impl RenderParameters {
    pub fn new(mathml: &str) -> Self {
        Self {
            entries: vec![("mml".to_string(), mathml.to_string())],
        }
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }
}

/// Caller-supplied rendering overrides extracted from a request's query
/// string. Only canonical configuration keys and `font`-prefixed names are
/// retained; a request carrying none of these is cacheable.
#[derive(Debug, Clone, Default)]
pub struct CallerOverrides {
    entries: Vec<(String, String)>,
}

impl CallerOverrides {
    pub fn from_query(pairs: &[(String, String)]) -> Self {
        let entries = pairs
            .iter()
            .filter_map(|(name, value)| {
                let name = name.trim().to_ascii_lowercase();
                (remote_name(&name).is_some() || name.starts_with("font"))
                    .then(|| (name, value.clone()))
            })
            .collect();
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }
}

/// Build the parameter set for one render call.
///
/// Emission order: payload, canonical configuration values (table order,
/// trimmed, absent keys omitted), descriptor fonts in file order, resolved
/// font ranges, then caller overrides when `apply_overrides` is set.
/// Font-range numbering continues from the count of fonts already emitted
/// without checking for collisions with existing `fontN` keys; a colliding
/// name is last-write-wins. That matches the stored-descriptor corpus this
/// service inherited and is deliberately left as is.
pub fn build_render_parameters(
    descriptor: &FormulaDescriptor,
    overrides: &CallerOverrides,
    apply_overrides: bool,
) -> RenderParameters {
    let mut params = RenderParameters::new(&descriptor.mathml);

    for (key, remote) in CONFIG_KEYS {
        if let Some(value) = descriptor.config.get(key) {
            params.set(remote, value.trim());
        }
    }

    for (name, value) in &descriptor.fonts {
        params.set(name.clone(), value.clone());
    }

    if let Some(ranges) = descriptor.config.get("fontranges") {
        let mut next = descriptor.fonts.len();
        for range in ranges.split(',') {
            let range = range.trim().to_ascii_lowercase();
            if range.is_empty() {
                continue;
            }
            if let Some(value) = descriptor.config.get(&range) {
                params.set(format!("font{next}"), value.clone());
                next += 1;
            }
        }
    }

    if apply_overrides {
        for (name, value) in overrides.entries() {
            match remote_name(name) {
                Some(remote) => params.set(remote, value.clone()),
                None => params.set(name.clone(), value.clone()),
            }
        }
    }

    params
}
