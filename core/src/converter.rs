//! Path segment converters.
//!
//! A converter turns one raw path segment into a typed value, and a typed
//! value back into canonical path text. A failed parse rejects the enclosing
//! rule as non-matching; it is never a hard error.

use serde::Serialize;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Extracted parameters, keyed by variable name.
pub type Params = ahash::AHashMap<String, ParamValue>;

/// One typed value extracted from (or substituted into) a path segment.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Str(String),
    Int(i64),
    Float(f64),
    Uuid(Uuid),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Str(s) => f.write_str(s),
            ParamValue::Int(i) => write!(f, "{i}"),
            ParamValue::Float(v) => write!(f, "{}", canonical_float(*v)),
            ParamValue::Uuid(u) => write!(f, "{u}"),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Str(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::Str(s)
    }
}

impl From<i64> for ParamValue {
    fn from(i: i64) -> Self {
        ParamValue::Int(i)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<Uuid> for ParamValue {
    fn from(u: Uuid) -> Self {
        ParamValue::Uuid(u)
    }
}

/// Floats serialize with an explicit fraction so they stay distinguishable
/// from integer segments when the URL is parsed back.
fn canonical_float(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 {
        format!("{v:.1}")
    } else {
        format!("{v}")
    }
}

/// Rejections raised while interpreting a `<converter(args):name>` spec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConverterSpecError {
    #[error("unknown converter `{0}`")]
    UnknownName(String),
    #[error("invalid converter arguments `{0}`")]
    BadArguments(String),
}

/// A compiled path segment converter.
///
/// The set is closed: these are the segment types the rule syntax knows
/// about, and keeping them in one enum keeps `parse`/`to_url` total.
#[derive(Debug, Clone, PartialEq)]
pub enum Converter {
    /// Any text without a slash, optionally length-constrained.
    Str {
        minlength: usize,
        maxlength: Option<usize>,
        length: Option<usize>,
    },
    /// Non-negative decimal integer, optionally range- or width-constrained.
    Int {
        min: Option<i64>,
        max: Option<i64>,
        fixed_digits: Option<usize>,
    },
    /// Decimal float with an explicit fraction part.
    Float { signed: bool },
    /// Greedy: consumes the rest of the path, slashes included.
    Path,
    /// Canonical hyphenated UUID.
    Uuid,
    /// One of an enumerated set of literals.
    Any(Vec<String>),
}

impl Converter {
    /// Default converter for a bare `<name>` variable.
    pub fn default_converter() -> Self {
        Converter::Str {
            minlength: 1,
            maxlength: None,
            length: None,
        }
    }

    /// Resolve a converter name plus optional argument list, as written in a
    /// rule pattern (`int`, `int(min=1,max=10)`, `any(a,b,c)`, ...).
    pub fn from_spec(name: &str, args: Option<&str>) -> Result<Self, ConverterSpecError> {
        let bad = |args: &str| ConverterSpecError::BadArguments(args.to_string());
        match name {
            "default" | "string" => {
                let mut minlength = 1;
                let mut maxlength = None;
                let mut length = None;
                if let Some(args) = args {
                    for (key, value) in parse_keyword_args(args).ok_or_else(|| bad(args))? {
                        let value: usize = value.parse().map_err(|_| bad(args))?;
                        match key {
                            "minlength" => minlength = value,
                            "maxlength" => maxlength = Some(value),
                            "length" => length = Some(value),
                            _ => return Err(bad(args)),
                        }
                    }
                }
                Ok(Converter::Str {
                    minlength,
                    maxlength,
                    length,
                })
            }
            "int" => {
                let mut min = None;
                let mut max = None;
                let mut fixed_digits = None;
                if let Some(args) = args {
                    for (key, value) in parse_keyword_args(args).ok_or_else(|| bad(args))? {
                        match key {
                            "min" => min = Some(value.parse().map_err(|_| bad(args))?),
                            "max" => max = Some(value.parse().map_err(|_| bad(args))?),
                            "fixed_digits" => {
                                fixed_digits = Some(value.parse().map_err(|_| bad(args))?)
                            }
                            _ => return Err(bad(args)),
                        }
                    }
                }
                Ok(Converter::Int {
                    min,
                    max,
                    fixed_digits,
                })
            }
            "float" => {
                let mut signed = false;
                if let Some(args) = args {
                    for (key, value) in parse_keyword_args(args).ok_or_else(|| bad(args))? {
                        match (key, value) {
                            ("signed", "true") => signed = true,
                            ("signed", "false") => signed = false,
                            _ => return Err(bad(args)),
                        }
                    }
                }
                Ok(Converter::Float { signed })
            }
            "path" => match args {
                None => Ok(Converter::Path),
                Some(args) => Err(bad(args)),
            },
            "uuid" => match args {
                None => Ok(Converter::Uuid),
                Some(args) => Err(bad(args)),
            },
            "any" => {
                let items: Vec<String> = args
                    .unwrap_or("")
                    .split(',')
                    .map(|item| item.trim().to_string())
                    .filter(|item| !item.is_empty())
                    .collect();
                if items.is_empty() {
                    return Err(bad(args.unwrap_or("")));
                }
                Ok(Converter::Any(items))
            }
            other => Err(ConverterSpecError::UnknownName(other.to_string())),
        }
    }

    /// Parse one raw segment. `None` means the segment does not match this
    /// converter and the enclosing rule is skipped.
    pub fn parse(&self, raw: &str) -> Option<ParamValue> {
        if raw.is_empty() {
            return None;
        }
        match self {
            Converter::Str {
                minlength,
                maxlength,
                length,
            } => {
                if raw.contains('/') {
                    return None;
                }
                let chars = raw.chars().count();
                if chars < *minlength {
                    return None;
                }
                if let Some(max) = maxlength {
                    if chars > *max {
                        return None;
                    }
                }
                if let Some(len) = length {
                    if chars != *len {
                        return None;
                    }
                }
                Some(ParamValue::Str(raw.to_string()))
            }
            Converter::Int {
                min,
                max,
                fixed_digits,
            } => {
                if !raw.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                if let Some(digits) = fixed_digits {
                    if raw.len() != *digits {
                        return None;
                    }
                }
                let value: i64 = raw.parse().ok()?;
                if min.is_some_and(|m| value < m) || max.is_some_and(|m| value > m) {
                    return None;
                }
                Some(ParamValue::Int(value))
            }
            Converter::Float { signed } => {
                let body = match raw.strip_prefix('-') {
                    Some(rest) if *signed => rest,
                    Some(_) => return None,
                    None => raw,
                };
                let (int_part, frac_part) = body.split_once('.')?;
                if int_part.is_empty()
                    || frac_part.is_empty()
                    || !int_part.bytes().all(|b| b.is_ascii_digit())
                    || !frac_part.bytes().all(|b| b.is_ascii_digit())
                {
                    return None;
                }
                raw.parse().ok().map(ParamValue::Float)
            }
            Converter::Path => {
                if raw.starts_with('/') || raw.ends_with('/') {
                    return None;
                }
                Some(ParamValue::Str(raw.to_string()))
            }
            Converter::Uuid => {
                if raw.len() != 36 {
                    return None;
                }
                Uuid::parse_str(raw).ok().map(ParamValue::Uuid)
            }
            Converter::Any(items) => items
                .iter()
                .any(|item| item == raw)
                .then(|| ParamValue::Str(raw.to_string())),
        }
    }

    /// Serialize a value back into canonical segment text. `None` means the
    /// value violates this converter's constraints.
    pub fn to_url(&self, value: &ParamValue) -> Option<String> {
        match self {
            Converter::Str { .. } => {
                let text = value.to_string();
                self.parse(&text).map(|_| text)
            }
            Converter::Int {
                min,
                max,
                fixed_digits,
            } => {
                let ParamValue::Int(i) = value else {
                    return None;
                };
                if *i < 0 || min.is_some_and(|m| *i < m) || max.is_some_and(|m| *i > m) {
                    return None;
                }
                match fixed_digits {
                    Some(digits) => {
                        let text = format!("{i:0width$}", width = *digits);
                        (text.len() == *digits).then_some(text)
                    }
                    None => Some(i.to_string()),
                }
            }
            Converter::Float { signed } => {
                let v = match value {
                    ParamValue::Float(v) => *v,
                    ParamValue::Int(i) => *i as f64,
                    _ => return None,
                };
                if (!signed && v < 0.0) || !v.is_finite() {
                    return None;
                }
                Some(canonical_float(v))
            }
            Converter::Path => {
                let ParamValue::Str(s) = value else {
                    return None;
                };
                (!s.is_empty() && !s.starts_with('/') && !s.ends_with('/')).then(|| s.clone())
            }
            Converter::Uuid => match value {
                ParamValue::Uuid(u) => Some(u.to_string()),
                _ => None,
            },
            Converter::Any(items) => {
                let ParamValue::Str(s) = value else {
                    return None;
                };
                items.iter().any(|item| item == s).then(|| s.clone())
            }
        }
    }

    /// Specificity rank of a variable segment using this converter. Lower
    /// ranks sort earlier in the rule map; static segments rank 0.
    pub fn weight(&self) -> u8 {
        match self {
            Converter::Any(_) | Converter::Uuid => 1,
            Converter::Int { .. } => 2,
            Converter::Float { .. } => 3,
            Converter::Str { .. } => 4,
            Converter::Path => 6,
        }
    }

    /// Whether this converter consumes multiple path segments.
    pub fn is_greedy(&self) -> bool {
        matches!(self, Converter::Path)
    }
}

fn parse_keyword_args(args: &str) -> Option<Vec<(&str, &str)>> {
    args.split(',')
        .map(|pair| {
            let (key, value) = pair.split_once('=')?;
            Some((key.trim(), value.trim()))
        })
        .collect()
}
