//! Formula descriptors and their two on-disk formats.
//!
//! A descriptor records one formula's MathML payload together with its
//! rendering options. Two legacy formats are supported: a line-oriented
//! format where options are positional, and a `key=value` format. Both
//! parse into a tagged [`RawDescriptor`] first and flow through a single
//! canonicalization step, so the color-inheritance fallback is applied
//! exactly once regardless of the source format.

use std::collections::BTreeMap;

use thiserror::Error;

/// Canonical configuration keys and the parameter names the rendering
/// endpoint expects for them. Table order is also the positional attribute
/// order of the legacy line format and the emission order of
/// [`crate::application::params::build_render_parameters`].
pub const CONFIG_KEYS: [(&str, &str); 8] = [
    ("bgcolor", "bgColor"),
    ("symbolcolor", "symbolColor"),
    ("transparency", "transparency"),
    ("fontsize", "fontSize"),
    ("fontfamily", "fontFamily"),
    ("numbercolor", "numberColor"),
    ("identcolor", "identColor"),
    ("fontranges", "fontRanges"),
];

/// Remote parameter name for a canonical configuration key.
pub fn remote_name(key: &str) -> Option<&'static str> {
    CONFIG_KEYS
        .iter()
        .find(|(canonical, _)| *canonical == key)
        .map(|(_, remote)| *remote)
}

fn is_canonical(key: &str) -> bool {
    remote_name(key).is_some()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorFormat {
    /// `key=value` entries, `mml` holds the payload.
    KeyValue,
    /// First line MathML, positional attribute lines, trailing font lines.
    LegacyLines,
}

#[derive(Debug, Error)]
pub enum DescriptorParseError {
    #[error("descriptor has no MathML payload")]
    MissingPayload,
    #[error("malformed key/value entry on line {line}")]
    MalformedEntry { line: usize },
}

/// A parsed formula descriptor. Immutable once built; one instance per
/// request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormulaDescriptor {
    pub mathml: String,
    /// Canonical configuration keys plus any named font-range definitions.
    pub config: BTreeMap<String, String>,
    /// `fontN` entries in file order.
    pub fonts: Vec<(String, String)>,
}

/// Format-tagged parse output, before canonicalization.
#[derive(Debug)]
enum RawDescriptor {
    LegacyLines {
        mathml: String,
        attributes: Vec<(&'static str, String)>,
        fonts: Vec<String>,
    },
    KeyValue {
        mathml: String,
        config: Vec<(String, String)>,
        fonts: Vec<(String, String)>,
    },
}

pub fn parse(
    content: &str,
    format: DescriptorFormat,
) -> Result<FormulaDescriptor, DescriptorParseError> {
    let raw = match format {
        DescriptorFormat::KeyValue => parse_key_value(content)?,
        DescriptorFormat::LegacyLines => parse_legacy_lines(content)?,
    };
    Ok(canonicalize(raw))
}

fn parse_legacy_lines(content: &str) -> Result<RawDescriptor, DescriptorParseError> {
    let mut lines = content.lines();

    let mathml = lines
        .next()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .ok_or(DescriptorParseError::MissingPayload)?
        .to_string();

    let mut attributes = Vec::new();
    let mut fonts = Vec::new();
    for (position, line) in lines.enumerate() {
        let value = line.trim();
        if let Some((name, _)) = CONFIG_KEYS.get(position) {
            // Positional slot: an empty line leaves the attribute unset but
            // still consumes its position.
            if !value.is_empty() {
                attributes.push((*name, value.to_string()));
            }
        } else if !value.is_empty() {
            fonts.push(value.to_string());
        }
    }

    Ok(RawDescriptor::LegacyLines {
        mathml,
        attributes,
        fonts,
    })
}

fn parse_key_value(content: &str) -> Result<RawDescriptor, DescriptorParseError> {
    let mut mathml = None;
    let mut config = Vec::new();
    let mut fonts = Vec::new();

    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(DescriptorParseError::MalformedEntry { line: index + 1 });
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();

        if key == "mml" {
            mathml = Some(value.to_string());
        } else if is_canonical(&key) {
            config.push((key, value.to_string()));
        } else if key.starts_with("font") {
            fonts.push((key, value.to_string()));
        } else {
            // Anything else is retained verbatim: named font-range
            // definitions are looked up here during parameter building.
            config.push((key, value.to_string()));
        }
    }

    let mathml = mathml
        .filter(|payload| !payload.is_empty())
        .ok_or(DescriptorParseError::MissingPayload)?;

    Ok(RawDescriptor::KeyValue {
        mathml,
        config,
        fonts,
    })
}

/// Merge a tagged parse result into the canonical descriptor shape and
/// apply the retrocompatibility color fallback: `numbercolor` and
/// `identcolor` inherit a legacy `symbolcolor` when absent.
fn canonicalize(raw: RawDescriptor) -> FormulaDescriptor {
    let (mathml, config, fonts) = match raw {
        RawDescriptor::LegacyLines {
            mathml,
            attributes,
            fonts,
        } => {
            let config = attributes
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect::<BTreeMap<_, _>>();
            let fonts = fonts
                .into_iter()
                .enumerate()
                .map(|(index, value)| (format!("font{index}"), value))
                .collect();
            (mathml, config, fonts)
        }
        RawDescriptor::KeyValue {
            mathml,
            config,
            fonts,
        } => (mathml, config.into_iter().collect(), fonts),
    };

    let mut config: BTreeMap<String, String> = config;
    if let Some(symbol) = config.get("symbolcolor").cloned() {
        config
            .entry("numbercolor".to_string())
            .or_insert_with(|| symbol.clone());
        config
            .entry("identcolor".to_string())
            .or_insert(symbol);
    }

    FormulaDescriptor {
        mathml,
        config,
        fonts,
    }
}
