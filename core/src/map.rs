//! The rule map: registration, specificity ordering, bind and build.
//!
//! Matching order is compiled lazily: `add` only marks the index dirty, and
//! the next `bind`/`build` recomputes it under a write lock. After the
//! application's setup phase the map is effectively read-only, so lookups
//! share the index without contention.

use crate::converter::Params;
use crate::error::{BuildError, MapError};
use crate::rule::{PathMatch, Rule};
use ahash::AHashMap;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Request-side inputs for one bind attempt.
#[derive(Debug, Clone)]
pub struct BindArgs<'a> {
    pub server_name: Option<&'a str>,
    pub subdomain: Option<&'a str>,
    pub script_root: &'a str,
    pub path_info: &'a str,
    pub method: &'a str,
    pub query_string: Option<&'a str>,
}

impl<'a> BindArgs<'a> {
    /// Bind args for a plain path + method lookup with no host context.
    pub fn new(path_info: &'a str, method: &'a str) -> Self {
        BindArgs {
            server_name: None,
            subdomain: None,
            script_root: "",
            path_info,
            method,
            query_string: None,
        }
    }
}

/// Outcome of binding a request against the map.
///
/// Routing misses are data, not errors: they become HTTP-level responses
/// and never propagate as `Err` to calling code.
#[derive(Debug, Clone)]
pub enum BindOutcome {
    Matched {
        endpoint: String,
        rule: Arc<Rule>,
        params: Params,
    },
    MethodNotAllowed {
        allowed: BTreeSet<String>,
    },
    RedirectRequired {
        location: String,
    },
    NotFound,
}

#[derive(Debug, Default)]
struct MapIndex {
    /// Rule indices in specificity order.
    order: Vec<usize>,
    /// Rule indices per endpoint, in registration order.
    by_endpoint: AHashMap<String, Vec<usize>>,
    dirty: bool,
}

/// An ordered collection of compiled rules.
#[derive(Debug, Default)]
pub struct RuleMap {
    rules: Vec<Arc<Rule>>,
    index: RwLock<MapIndex>,
}

impl RuleMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a compiled rule.
    ///
    /// Fails with [`MapError::Conflict`] when an identical (pattern,
    /// method-set, host, subdomain) tuple is already registered.
    pub fn add(&mut self, rule: Rule) -> Result<(), MapError> {
        for existing in &self.rules {
            if existing.pattern() == rule.pattern()
                && existing.methods() == rule.methods()
                && existing.host() == rule.host()
                && existing.subdomain() == rule.subdomain()
            {
                return Err(MapError::Conflict {
                    pattern: rule.pattern().to_string(),
                });
            }
        }
        self.rules.push(Arc::new(rule));
        self.index.get_mut().dirty = true;
        Ok(())
    }

    pub fn rules(&self) -> &[Arc<Rule>] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Bind a request to an endpoint.
    ///
    /// Rules are tried in specificity order; the first full match with an
    /// acceptable method wins. An exact-path match with the wrong method
    /// beats a trailing-slash redirect candidate, which beats NotFound.
    pub fn bind(&self, args: &BindArgs<'_>) -> BindOutcome {
        let method = args.method.to_ascii_uppercase();
        self.with_index(|index| {
            let mut allowed: BTreeSet<String> = BTreeSet::new();
            let mut path_matched = false;
            let mut redirect: Option<String> = None;

            for &i in &index.order {
                let rule = &self.rules[i];
                if rule.is_build_only() {
                    continue;
                }
                if let Some(host) = rule.host() {
                    if args.server_name != Some(host) {
                        continue;
                    }
                }
                if let Some(subdomain) = rule.subdomain() {
                    if args.subdomain.unwrap_or("") != subdomain {
                        continue;
                    }
                }
                match rule.match_path(args.path_info) {
                    PathMatch::Full(params) => {
                        if rule.allows_method(&method) {
                            return BindOutcome::Matched {
                                endpoint: rule.endpoint().to_string(),
                                rule: rule.clone(),
                                params,
                            };
                        }
                        path_matched = true;
                        if let Some(methods) = rule.methods() {
                            allowed.extend(methods.iter().cloned());
                        }
                    }
                    PathMatch::SlashRedirect => {
                        if redirect.is_none() {
                            redirect = Some(redirect_location(args));
                        }
                    }
                    PathMatch::Miss => {}
                }
            }

            if path_matched {
                return BindOutcome::MethodNotAllowed { allowed };
            }
            if let Some(location) = redirect {
                return BindOutcome::RedirectRequired { location };
            }
            BindOutcome::NotFound
        })
    }

    /// Reverse a URL: substitute `params` into the best rule for `endpoint`.
    ///
    /// Parameters the rule does not consume are appended as a query string,
    /// sorted by key so the output is deterministic.
    pub fn build(
        &self,
        endpoint: &str,
        params: &Params,
        method: Option<&str>,
    ) -> Result<String, BuildError> {
        let method = method.map(|m| m.to_ascii_uppercase());
        self.with_index(|index| {
            let candidates = index
                .by_endpoint
                .get(endpoint)
                .ok_or_else(|| BuildError::UnknownEndpoint(endpoint.to_string()))?;

            let mut last_err = None;
            let mut method_accepted = false;
            for &i in candidates {
                let rule = &self.rules[i];
                if let Some(method) = &method {
                    if !rule.allows_method(method) {
                        continue;
                    }
                }
                method_accepted = true;
                match rule.build(params) {
                    Ok(path) => {
                        let consumed: BTreeSet<&str> = rule.variable_names().collect();
                        let mut extra: Vec<(&String, String)> = params
                            .iter()
                            .filter(|(key, _)| !consumed.contains(key.as_str()))
                            .map(|(key, value)| (key, value.to_string()))
                            .collect();
                        if extra.is_empty() {
                            return Ok(path);
                        }
                        extra.sort();
                        let query = serde_urlencoded::to_string(&extra)
                            .map_err(|err| BuildError::QueryEncoding(err.to_string()))?;
                        return Ok(format!("{path}?{query}"));
                    }
                    Err(err) => last_err = Some(err),
                }
            }

            if !method_accepted {
                return Err(BuildError::MethodMismatch {
                    endpoint: endpoint.to_string(),
                    method: method.unwrap_or_default(),
                });
            }
            Err(last_err.unwrap_or_else(|| BuildError::UnknownEndpoint(endpoint.to_string())))
        })
    }

    /// Run `f` against a freshly updated index.
    fn with_index<R>(&self, f: impl FnOnce(&MapIndex) -> R) -> R {
        {
            let index = self.index.read();
            if !index.dirty {
                return f(&index);
            }
        }
        let mut index = self.index.write();
        if index.dirty {
            self.recompute(&mut index);
        }
        f(&index)
    }

    fn recompute(&self, index: &mut MapIndex) {
        let mut order: Vec<usize> = (0..self.rules.len()).collect();
        // stable sort: ties keep registration order
        order.sort_by(|&a, &b| self.rules[a].weights().cmp(self.rules[b].weights()));
        index.order = order;

        index.by_endpoint.clear();
        for (i, rule) in self.rules.iter().enumerate() {
            index
                .by_endpoint
                .entry(rule.endpoint().to_string())
                .or_default()
                .push(i);
        }
        index.dirty = false;
    }
}

fn redirect_location(args: &BindArgs<'_>) -> String {
    let mut location = String::new();
    location.push_str(args.script_root.trim_end_matches('/'));
    location.push_str(args.path_info);
    location.push('/');
    if let Some(query) = args.query_string {
        if !query.is_empty() {
            location.push('?');
            location.push_str(query);
        }
    }
    location
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::ParamValue;

    fn map_of(rules: Vec<Rule>) -> RuleMap {
        let mut map = RuleMap::new();
        for rule in rules {
            map.add(rule).unwrap();
        }
        map
    }

    fn rule(pattern: &str, endpoint: &str) -> Rule {
        Rule::parse(pattern, endpoint).unwrap()
    }

    #[test]
    fn test_int_rule_beats_string_rule_regardless_of_order() {
        for flipped in [false, true] {
            let mut rules = vec![rule("/users/<int:id>", "by_id"), rule("/users/<name>", "by_name")];
            if flipped {
                rules.reverse();
            }
            let map = map_of(rules);

            match map.bind(&BindArgs::new("/users/42", "GET")) {
                BindOutcome::Matched { endpoint, params, .. } => {
                    assert_eq!(endpoint, "by_id");
                    assert_eq!(params.get("id"), Some(&ParamValue::Int(42)));
                }
                other => panic!("expected match, got {other:?}"),
            }
            match map.bind(&BindArgs::new("/users/abc", "GET")) {
                BindOutcome::Matched { endpoint, params, .. } => {
                    assert_eq!(endpoint, "by_name");
                    assert_eq!(params.get("name"), Some(&ParamValue::Str("abc".into())));
                }
                other => panic!("expected match, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_static_rule_beats_variable_rule() {
        let map = map_of(vec![rule("/users/<name>", "by_name"), rule("/users/new", "new")]);
        match map.bind(&BindArgs::new("/users/new", "GET")) {
            BindOutcome::Matched { endpoint, .. } => assert_eq!(endpoint, "new"),
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn test_ties_keep_registration_order() {
        let mut map = RuleMap::new();
        map.add(rule("/a/<x>", "first")).unwrap();
        map.add(rule("/a/<y>", "second")).unwrap();
        match map.bind(&BindArgs::new("/a/v", "GET")) {
            BindOutcome::Matched { endpoint, .. } => assert_eq!(endpoint, "first"),
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn test_not_found() {
        let map = map_of(vec![rule("/item", "item")]);
        assert!(matches!(
            map.bind(&BindArgs::new("/missing", "GET")),
            BindOutcome::NotFound
        ));
    }

    #[test]
    fn test_method_not_allowed_reports_allowed_set() {
        let map = map_of(vec![rule("/item", "item").with_methods(["GET"])]);
        match map.bind(&BindArgs::new("/item", "POST")) {
            BindOutcome::MethodNotAllowed { allowed } => {
                assert_eq!(allowed, BTreeSet::from(["GET".to_string()]));
            }
            other => panic!("expected MethodNotAllowed, got {other:?}"),
        }
    }

    #[test]
    fn test_trailing_slash_redirect() {
        let map = map_of(vec![rule("/shop/", "shop")]);
        match map.bind(&BindArgs::new("/shop", "GET")) {
            BindOutcome::RedirectRequired { location } => assert_eq!(location, "/shop/"),
            other => panic!("expected redirect, got {other:?}"),
        }
    }

    #[test]
    fn test_redirect_keeps_query_string_and_script_root() {
        let map = map_of(vec![rule("/shop/", "shop")]);
        let mut args = BindArgs::new("/shop", "GET");
        args.script_root = "/prefix/";
        args.query_string = Some("page=2");
        match map.bind(&args) {
            BindOutcome::RedirectRequired { location } => {
                assert_eq!(location, "/prefix/shop/?page=2");
            }
            other => panic!("expected redirect, got {other:?}"),
        }
    }

    #[test]
    fn test_exact_match_beats_redirect_candidate() {
        let map = map_of(vec![rule("/shop/", "branch"), rule("/shop", "leaf")]);
        match map.bind(&BindArgs::new("/shop", "GET")) {
            BindOutcome::Matched { endpoint, .. } => assert_eq!(endpoint, "leaf"),
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn test_method_mismatch_beats_redirect() {
        let map = map_of(vec![
            rule("/shop/", "branch"),
            rule("/shop", "leaf").with_methods(["POST"]),
        ]);
        assert!(matches!(
            map.bind(&BindArgs::new("/shop", "GET")),
            BindOutcome::MethodNotAllowed { .. }
        ));
    }

    #[test]
    fn test_host_and_subdomain_constraints() {
        let map = map_of(vec![
            rule("/", "api_index").with_subdomain("api"),
            rule("/", "index"),
        ]);
        let mut args = BindArgs::new("/", "GET");
        args.subdomain = Some("api");
        match map.bind(&args) {
            BindOutcome::Matched { endpoint, .. } => assert_eq!(endpoint, "api_index"),
            other => panic!("expected match, got {other:?}"),
        }
        match map.bind(&BindArgs::new("/", "GET")) {
            BindOutcome::Matched { endpoint, .. } => assert_eq!(endpoint, "index"),
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn test_build_only_rules_never_match() {
        let map = map_of(vec![rule("/legacy", "legacy").build_only(true)]);
        assert!(matches!(
            map.bind(&BindArgs::new("/legacy", "GET")),
            BindOutcome::NotFound
        ));
        assert_eq!(map.build("legacy", &Params::default(), None).unwrap(), "/legacy");
    }

    #[test]
    fn test_conflict_on_identical_registration() {
        let mut map = RuleMap::new();
        map.add(rule("/item", "a").with_methods(["GET"])).unwrap();
        assert!(matches!(
            map.add(rule("/item", "b").with_methods(["GET"])),
            Err(MapError::Conflict { .. })
        ));
        // different method set is fine
        map.add(rule("/item", "b").with_methods(["POST"])).unwrap();
    }

    #[test]
    fn test_build_appends_unknown_params_as_query() {
        let map = map_of(vec![rule("/users/<int:id>", "user")]);
        let mut params = Params::default();
        params.insert("id".into(), ParamValue::Int(3));
        params.insert("page".into(), ParamValue::Int(2));
        params.insert("q".into(), ParamValue::Str("x y".into()));
        let url = map.build("user", &params, None).unwrap();
        assert_eq!(url, "/users/3?page=2&q=x+y");
    }

    #[test]
    fn test_build_unknown_endpoint_and_method_mismatch() {
        let map = map_of(vec![rule("/item", "item").with_methods(["GET"])]);
        assert!(matches!(
            map.build("nope", &Params::default(), None),
            Err(BuildError::UnknownEndpoint(_))
        ));
        assert!(matches!(
            map.build("item", &Params::default(), Some("DELETE")),
            Err(BuildError::MethodMismatch { .. })
        ));
    }

    #[test]
    fn test_build_prefers_rule_whose_params_fit() {
        let mut map = RuleMap::new();
        map.add(rule("/users/<int:id>", "user")).unwrap();
        map.add(rule("/users/me", "user")).unwrap();
        let mut params = Params::default();
        params.insert("id".into(), ParamValue::Int(9));
        assert_eq!(map.build("user", &params, None).unwrap(), "/users/9");
        assert_eq!(map.build("user", &Params::default(), None).unwrap(), "/users/me");
    }

    #[test]
    fn test_index_recomputes_after_add() {
        let mut map = RuleMap::new();
        map.add(rule("/users/<name>", "by_name")).unwrap();
        match map.bind(&BindArgs::new("/users/42", "GET")) {
            BindOutcome::Matched { endpoint, .. } => assert_eq!(endpoint, "by_name"),
            other => panic!("expected match, got {other:?}"),
        }
        map.add(rule("/users/<int:id>", "by_id")).unwrap();
        match map.bind(&BindArgs::new("/users/42", "GET")) {
            BindOutcome::Matched { endpoint, .. } => assert_eq!(endpoint, "by_id"),
            other => panic!("expected match, got {other:?}"),
        }
    }
}
