//! Compiled route rules.
//!
//! A rule is immutable once registered into a map: the pattern is compiled
//! into literal/variable segments up front, and every constraint (methods,
//! host, subdomain, slash behavior) is fixed by the builder before that.

use crate::converter::{Converter, ConverterSpecError, Params};
use crate::error::{BuildError, RuleError};
use std::collections::BTreeSet;
use std::fmt;

/// One compiled piece of a rule pattern.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Static(String),
    Variable { name: String, converter: Converter },
}

/// Result of matching one rule against a request path.
#[derive(Debug, Clone, PartialEq)]
pub enum PathMatch {
    /// Every segment matched and converters accepted their values.
    Full(Params),
    /// The path matched except for a missing trailing slash on a branch
    /// rule; the caller should redirect to the corrected path.
    SlashRedirect,
    /// The rule does not apply to this path.
    Miss,
}

/// A compiled route pattern with its constraints.
#[derive(Debug, Clone)]
pub struct Rule {
    pattern: String,
    endpoint: String,
    segments: Vec<Segment>,
    /// Trailing-slash rules are "branches"; they redirect slashless requests.
    is_branch: bool,
    strict_slashes: bool,
    methods: Option<BTreeSet<String>>,
    host: Option<String>,
    subdomain: Option<String>,
    build_only: bool,
    weights: Vec<u8>,
}

impl Rule {
    /// Compile `pattern` into a rule bound to `endpoint`.
    ///
    /// Variables occupy whole segments: `<id>`, `<int:id>`,
    /// `<int(min=1):id>`, `<any(a,b):page>`. A bare `<name>` uses the
    /// default string converter.
    pub fn parse(pattern: &str, endpoint: &str) -> Result<Self, RuleError> {
        if !pattern.starts_with('/') {
            return Err(RuleError::MissingLeadingSlash(pattern.to_string()));
        }
        let is_branch = pattern.ends_with('/');
        let body = pattern[1..].strip_suffix('/').unwrap_or(&pattern[1..]);

        let mut segments = Vec::new();
        let mut seen = BTreeSet::new();
        let mut greedy = 0usize;
        if !body.is_empty() {
            for raw in body.split('/') {
                segments.push(compile_segment(pattern, raw, &mut seen, &mut greedy)?);
            }
        }
        if greedy > 1 {
            return Err(RuleError::MultiplePathConverters(pattern.to_string()));
        }

        let weights = segments
            .iter()
            .map(|segment| match segment {
                Segment::Static(_) => 0,
                Segment::Variable { converter, .. } => converter.weight(),
            })
            .collect();

        Ok(Rule {
            pattern: pattern.to_string(),
            endpoint: endpoint.to_string(),
            segments,
            is_branch,
            strict_slashes: true,
            methods: None,
            host: None,
            subdomain: None,
            build_only: false,
            weights,
        })
    }

    /// Restrict the rule to a method set. Methods are normalized to
    /// uppercase; `HEAD` is implicitly allowed wherever `GET` is.
    pub fn with_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.methods = Some(
            methods
                .into_iter()
                .map(|m| m.as_ref().to_ascii_uppercase())
                .collect(),
        );
        self
    }

    /// Constrain the rule to one server name.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Constrain the rule to one subdomain of the configured server name.
    pub fn with_subdomain(mut self, subdomain: impl Into<String>) -> Self {
        self.subdomain = Some(subdomain.into());
        self
    }

    /// Disable the trailing-slash redirect/404 behavior for this rule.
    pub fn strict_slashes(mut self, strict: bool) -> Self {
        self.strict_slashes = strict;
        self
    }

    /// Mark the rule as usable for URL building only; it never matches.
    pub fn build_only(mut self, build_only: bool) -> Self {
        self.build_only = build_only;
        self
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// `None` means every method is accepted.
    pub fn methods(&self) -> Option<&BTreeSet<String>> {
        self.methods.as_ref()
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn subdomain(&self) -> Option<&str> {
        self.subdomain.as_deref()
    }

    pub fn is_build_only(&self) -> bool {
        self.build_only
    }

    pub fn is_branch(&self) -> bool {
        self.is_branch
    }

    pub(crate) fn weights(&self) -> &[u8] {
        &self.weights
    }

    /// Variable names in pattern order.
    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Variable { name, .. } => Some(name.as_str()),
            Segment::Static(_) => None,
        })
    }

    /// Whether `method` (normalized uppercase) passes this rule's method
    /// constraint.
    pub fn allows_method(&self, method: &str) -> bool {
        match &self.methods {
            None => true,
            Some(methods) => {
                methods.contains(method) || (method == "HEAD" && methods.contains("GET"))
            }
        }
    }

    /// Match a request path against this rule, extracting parameters.
    pub fn match_path(&self, path: &str) -> PathMatch {
        if !path.starts_with('/') {
            return PathMatch::Miss;
        }
        let path_trailing = path.ends_with('/');
        let trimmed = path[1..].strip_suffix('/').unwrap_or(&path[1..]);
        let segs: Vec<&str> = if trimmed.is_empty() {
            Vec::new()
        } else {
            trimmed.split('/').collect()
        };

        let mut params = Params::default();
        let mut at = 0usize;
        for (idx, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Static(literal) => {
                    if at >= segs.len() || segs[at] != literal {
                        return PathMatch::Miss;
                    }
                    at += 1;
                }
                Segment::Variable { name, converter } if converter.is_greedy() => {
                    // A greedy variable swallows everything except what the
                    // remaining rule segments still need.
                    let rest = self.segments.len() - idx - 1;
                    if segs.len() < at + 1 + rest {
                        return PathMatch::Miss;
                    }
                    let upto = segs.len() - rest;
                    let joined = segs[at..upto].join("/");
                    match converter.parse(&joined) {
                        Some(value) => params.insert(name.clone(), value),
                        None => return PathMatch::Miss,
                    };
                    at = upto;
                }
                Segment::Variable { name, converter } => {
                    if at >= segs.len() {
                        return PathMatch::Miss;
                    }
                    match converter.parse(segs[at]) {
                        Some(value) => params.insert(name.clone(), value),
                        None => return PathMatch::Miss,
                    };
                    at += 1;
                }
            }
        }
        if at != segs.len() {
            return PathMatch::Miss;
        }

        if self.is_branch != path_trailing {
            if !self.strict_slashes {
                return PathMatch::Full(params);
            }
            if self.is_branch {
                return PathMatch::SlashRedirect;
            }
            return PathMatch::Miss;
        }
        PathMatch::Full(params)
    }

    /// Substitute `params` into the pattern, producing a path.
    pub fn build(&self, params: &Params) -> Result<String, BuildError> {
        let mut out = String::new();
        for segment in &self.segments {
            out.push('/');
            match segment {
                Segment::Static(literal) => out.push_str(literal),
                Segment::Variable { name, converter } => {
                    let value =
                        params
                            .get(name)
                            .ok_or_else(|| BuildError::MissingParameter {
                                endpoint: self.endpoint.clone(),
                                parameter: name.clone(),
                            })?;
                    let text =
                        converter
                            .to_url(value)
                            .ok_or_else(|| BuildError::InvalidParameter {
                                endpoint: self.endpoint.clone(),
                                parameter: name.clone(),
                                value: value.to_string(),
                            })?;
                    out.push_str(&text);
                }
            }
        }
        if out.is_empty() || self.is_branch {
            out.push('/');
        }
        Ok(out)
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.pattern, self.endpoint)
    }
}

fn compile_segment(
    pattern: &str,
    raw: &str,
    seen: &mut BTreeSet<String>,
    greedy: &mut usize,
) -> Result<Segment, RuleError> {
    if raw.is_empty() {
        return Err(RuleError::EmptySegment(pattern.to_string()));
    }
    if !raw.starts_with('<') {
        if raw.contains('<') || raw.contains('>') {
            return Err(RuleError::UnbalancedDelimiters(pattern.to_string()));
        }
        return Ok(Segment::Static(raw.to_string()));
    }

    let inner = raw
        .strip_prefix('<')
        .and_then(|r| r.strip_suffix('>'))
        .ok_or_else(|| RuleError::UnbalancedDelimiters(pattern.to_string()))?;
    if inner.contains('<') || inner.contains('>') {
        return Err(RuleError::UnbalancedDelimiters(pattern.to_string()));
    }

    let (spec, name) = match inner.split_once(':') {
        Some((spec, name)) => (spec, name),
        None => ("default", inner),
    };
    if name.is_empty() {
        return Err(RuleError::EmptyVariable(pattern.to_string()));
    }
    if !seen.insert(name.to_string()) {
        return Err(RuleError::DuplicateVariable {
            pattern: pattern.to_string(),
            name: name.to_string(),
        });
    }

    let (conv_name, args) = match spec.split_once('(') {
        Some((conv_name, rest)) => {
            let args = rest
                .strip_suffix(')')
                .ok_or_else(|| RuleError::UnbalancedDelimiters(pattern.to_string()))?;
            (conv_name, Some(args))
        }
        None => (spec, None),
    };

    let converter = Converter::from_spec(conv_name, args).map_err(|err| match err {
        ConverterSpecError::UnknownName(name) => RuleError::UnknownConverter {
            pattern: pattern.to_string(),
            name,
        },
        ConverterSpecError::BadArguments(args) => RuleError::BadConverterArguments {
            pattern: pattern.to_string(),
            name: conv_name.to_string(),
            args,
        },
    })?;
    if converter.is_greedy() {
        *greedy += 1;
    }

    Ok(Segment::Variable {
        name: name.to_string(),
        converter,
    })
}
