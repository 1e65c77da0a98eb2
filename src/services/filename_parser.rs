//! Filename parser for catalog-style release names
//!
//! Turns noisy release filenames into canonical identifiers:
//! - "HHD800.COM@ABC-123.mp4" -> code `ABC-123`
//! - "abc.123.cd2.mkv"        -> code `ABC-123`, CD 2
//! - "[98t.tv]SSNI-999_X1080X.mp4" (with those keywords configured) -> `SSNI-999`
//!
//! Parsing is driven by [ParserRules]: the keywords to strip and the CD/part
//! marker patterns are data, so new release conventions are configuration
//! changes rather than new branches here.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Default CD/part marker patterns, tried in order.
///
/// Each pattern must expose a named `index` capture holding either digits or a
/// single letter (A = 1, B = 2, ...).
pub const DEFAULT_CD_MARKERS: &[&str] = &[
    r"[-_ ]?CD[-_ ]?(?P<index>\d{1,2})",
    r"[-_ ]?PART[-_ ]?(?P<index>\d{1,2})",
    r"[-_ ]?DIS[CK][-_ ]?(?P<index>\d{1,2})",
];

/// Code-like token: 2-10 letters, a separator, 3-5 digits.
static CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?P<label>[A-Z]{2,10})[-_](?P<number>\d{3,5})").unwrap());

static DOT_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.+").unwrap());

static SEPARATOR_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[-_]{2,}").unwrap());

static DEFAULT_RULES: Lazy<ParserRules> = Lazy::new(|| {
    ParserRules::new::<&str, &str>(&[], DEFAULT_CD_MARKERS).expect("default CD marker patterns compile")
});

/// Canonical identifier extracted from a filename
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedIdentifier {
    /// Uppercase code with a single `-` separator, e.g. `ABC-123`
    pub code: String,
    /// 1-based part number for multi-part releases
    pub cd_index: Option<u32>,
    /// Extension as it appeared in the original filename (without the dot)
    pub extension: String,
}

/// Why a filename could not be turned into an identifier
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseFailure {
    #[error("filename '{filename}' has no extension")]
    MissingExtension { filename: String },

    #[error("no code found in '{normalized}'")]
    NoCode { normalized: String },

    #[error("ambiguous code in '{normalized}': candidates {candidates:?}")]
    AmbiguousCode {
        normalized: String,
        candidates: Vec<String>,
    },

    #[error("ambiguous CD markers in '{normalized}': {markers:?}")]
    AmbiguousCdMarker {
        normalized: String,
        markers: Vec<String>,
    },

    #[error("invalid CD index in marker '{marker}'")]
    InvalidCdIndex { marker: String },
}

/// Errors raised while compiling parser rules from configuration
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("invalid CD marker pattern '{pattern}'")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("CD marker pattern '{pattern}' has no named 'index' capture")]
    MissingIndexGroup { pattern: String },
}

/// Compiled parsing rules: keywords to strip and CD marker patterns
#[derive(Debug, Clone)]
pub struct ParserRules {
    keywords: Vec<Regex>,
    cd_markers: Vec<Regex>,
}

impl ParserRules {
    /// Compile rules from a keyword list and an ordered list of CD marker patterns.
    ///
    /// Keywords are matched literally and case-insensitively. Marker patterns are
    /// matched against the uppercased, separator-normalized stem.
    pub fn new<K, M>(keywords: &[K], cd_markers: &[M]) -> Result<Self, RuleError>
    where
        K: AsRef<str>,
        M: AsRef<str>,
    {
        let keywords = keywords
            .iter()
            .map(|k| k.as_ref())
            .filter(|k: &&str| !k.is_empty())
            .map(|k| {
                let pattern = format!("(?i){}", regex::escape(k));
                Regex::new(&pattern).map_err(|source| RuleError::InvalidPattern { pattern, source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let cd_markers = cd_markers
            .iter()
            .map(|m| m.as_ref())
            .map(|pattern: &str| {
                let re = Regex::new(pattern).map_err(|source| RuleError::InvalidPattern {
                    pattern: pattern.to_string(),
                    source,
                })?;
                if !re.capture_names().flatten().any(|name| name == "index") {
                    return Err(RuleError::MissingIndexGroup {
                        pattern: pattern.to_string(),
                    });
                }
                Ok(re)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            keywords,
            cd_markers,
        })
    }

    /// Rules with the given keywords and the default CD markers
    pub fn with_keywords<S: AsRef<str>>(keywords: &[S]) -> Result<Self, RuleError> {
        let mut rules = Self::new(keywords, &[] as &[&str])?;
        rules.cd_markers = DEFAULT_RULES.cd_markers.clone();
        Ok(rules)
    }
}

impl Default for ParserRules {
    fn default() -> Self {
        DEFAULT_RULES.clone()
    }
}

/// A CD marker located in the normalized stem
#[derive(Debug, Clone)]
struct CdMarker {
    start: usize,
    end: usize,
    text: String,
    index: Option<u32>,
}

/// Parse a filename into a canonical identifier
pub fn parse(filename: &str, rules: &ParserRules) -> Result<ParsedIdentifier, ParseFailure> {
    let (stem, extension) = match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => (stem, ext),
        _ => {
            return Err(ParseFailure::MissingExtension {
                filename: filename.to_string(),
            });
        }
    };

    let stripped = remove_keywords(stem, rules);
    let normalized = normalize_separators(&stripped.to_uppercase());

    let (code_source, cd_index) = extract_cd_marker(&normalized, rules)?;
    let code = extract_code(&code_source)?;

    debug!(
        filename = filename,
        normalized = %normalized,
        code = %code,
        cd_index = ?cd_index,
        "Parsed identifier"
    );

    Ok(ParsedIdentifier {
        code,
        cd_index,
        extension: extension.to_string(),
    })
}

/// Strip every configured keyword (case-insensitive) from the stem
pub fn remove_keywords(stem: &str, rules: &ParserRules) -> String {
    rules
        .keywords
        .iter()
        .fold(stem.to_string(), |acc, re| re.replace_all(&acc, "").into_owned())
}

/// Turn dot runs into `-`, collapse separator runs and trim separators at the ends
pub fn normalize_separators(stem: &str) -> String {
    let dashed = DOT_RUN_RE.replace_all(stem, "-");
    let collapsed = SEPARATOR_RUN_RE.replace_all(&dashed, "-");
    collapsed
        .trim_matches(|c: char| c == '-' || c == '_' || c.is_whitespace())
        .to_string()
}

fn extract_cd_marker(
    normalized: &str,
    rules: &ParserRules,
) -> Result<(String, Option<u32>), ParseFailure> {
    let mut markers: Vec<CdMarker> = Vec::new();
    for re in &rules.cd_markers {
        for marker in find_markers(re, normalized) {
            let overlaps = markers
                .iter()
                .any(|m| marker.start < m.end && m.start < marker.end);
            if !overlaps {
                markers.push(marker);
            }
        }
    }

    if markers.is_empty() {
        return Ok((normalized.to_string(), None));
    }
    markers.sort_by_key(|m| m.start);

    // The same marker repeated names one part; different markers do not
    let first = &markers[0];
    if markers.iter().any(|m| !m.text.eq_ignore_ascii_case(&first.text)) {
        return Err(ParseFailure::AmbiguousCdMarker {
            normalized: normalized.to_string(),
            markers: markers.into_iter().map(|m| m.text).collect(),
        });
    }

    let index = first
        .index
        .filter(|i| *i > 0)
        .ok_or_else(|| ParseFailure::InvalidCdIndex {
            marker: first.text.clone(),
        })?;

    let mut rest = normalized.to_string();
    for marker in markers.iter().rev() {
        rest.replace_range(marker.start..marker.end, "");
    }
    Ok((normalize_separators(&rest), Some(index)))
}

/// Find every acceptable match of one marker pattern.
///
/// A marker glued to a preceding letter ("ABCD1") or followed by another
/// alphanumeric ("CD1X") is part of a word, not a marker.
fn find_markers(re: &Regex, haystack: &str) -> Vec<CdMarker> {
    let mut found = Vec::new();
    let mut pos = 0;
    while pos <= haystack.len() {
        let Some(caps) = re.captures_at(haystack, pos) else {
            break;
        };
        let Some(whole) = caps.get(0) else {
            break;
        };
        let text = whole.as_str();
        let starts_with_separator = text.starts_with(['-', '_', ' ']);
        let glued_left = !starts_with_separator
            && haystack[..whole.start()]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_ascii_alphabetic());
        let glued_right = haystack[whole.end()..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric());

        if !text.is_empty() && !glued_left && !glued_right {
            let index = caps.name("index").and_then(|m| ordinal(m.as_str()));
            found.push(CdMarker {
                start: whole.start(),
                end: whole.end(),
                text: text.trim_matches(['-', '_', ' ']).to_string(),
                index,
            });
            pos = whole.end();
        } else {
            pos = next_char_boundary(haystack, whole.start());
        }
    }
    found
}

/// Numeric index, or the alphabet position of a single letter
fn ordinal(raw: &str) -> Option<u32> {
    if let Ok(n) = raw.parse::<u32>() {
        return Some(n);
    }
    let mut chars = raw.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_alphabetic() => {
            Some(c.to_ascii_uppercase() as u32 - 'A' as u32 + 1)
        }
        _ => None,
    }
}

fn extract_code(stem: &str) -> Result<String, ParseFailure> {
    let mut candidates: Vec<String> = Vec::new();
    let mut pos = 0;
    while pos <= stem.len() {
        let Some(caps) = CODE_RE.captures_at(stem, pos) else {
            break;
        };
        let (Some(whole), Some(label), Some(number)) =
            (caps.get(0), caps.name("label"), caps.name("number"))
        else {
            break;
        };
        let glued_left = stem[..whole.start()]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_ascii_alphanumeric());
        let glued_right = stem[whole.end()..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit());

        if glued_left || glued_right {
            pos = next_char_boundary(stem, whole.start());
            continue;
        }

        let code = format!("{}-{}", label.as_str(), number.as_str());
        if !candidates.contains(&code) {
            candidates.push(code);
        }
        pos = whole.end();
    }

    match candidates.len() {
        0 => Err(ParseFailure::NoCode {
            normalized: stem.to_string(),
        }),
        1 => Ok(candidates.remove(0)),
        _ => Err(ParseFailure::AmbiguousCode {
            normalized: stem.to_string(),
            candidates,
        }),
    }
}

fn next_char_boundary(s: &str, from: usize) -> usize {
    s[from..]
        .chars()
        .next()
        .map(|c| from + c.len_utf8())
        .unwrap_or(s.len() + 1)
}
