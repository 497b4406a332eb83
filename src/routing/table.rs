//! Route lookup.
//!
//! Routes are stored in a segment tree keyed by literal segment, with one
//! parameter edge per node. A lookup walks every branch the path can take,
//! so the winner is chosen by the fewest parameter segments rather than by
//! registration order. Registration rejects exact duplicates and any pair
//! of overlapping patterns with the same number of parameters, so the
//! winner is always unique.

use super::group::RouteGroup;
use super::pattern::{PathPattern, Segment, split_path};
use crate::errors::{AppError, RouteError};
use crate::http::Handler;
use axum::http::Method;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// How a registration treats a trailing slash on the request path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrailingSlash {
    /// `/foo` and `/foo/` are different routes.
    #[default]
    Strict,
    /// The route also answers the path with the trailing slash toggled.
    Lenient,
}

/// Path parameters bound by a match, in path order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Successful lookup result.
#[derive(Clone)]
pub struct RouteMatch {
    pub handler: Arc<dyn Handler>,
    pub params: Params,
    /// Pattern as registered, e.g. `/api/user/:id`.
    pub route: Arc<str>,
}

impl std::fmt::Debug for RouteMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteMatch")
            .field("params", &self.params)
            .field("route", &self.route)
            .finish_non_exhaustive()
    }
}

struct Leaf {
    method: Method,
    /// Concrete shape stored at this node (the lenient variant differs from
    /// the declared pattern only by the trailing slash).
    shape: PathPattern,
    route: Arc<str>,
    handler: Arc<dyn Handler>,
}

#[derive(Default)]
struct Node {
    literals: HashMap<String, Node>,
    param: Option<Box<Node>>,
    leaves: Vec<Leaf>,
}

impl Node {
    fn descend_mut(&mut self, shape: &PathPattern) -> &mut Node {
        let mut node = self;
        for segment in shape.segments() {
            node = match segment {
                Segment::Literal(literal) => node.literals.entry(literal.clone()).or_default(),
                Segment::Param(_) => node.param.get_or_insert_with(Default::default).as_mut(),
            };
        }
        node
    }

    fn collect<'n, 'p>(
        &'n self,
        segments: &[&'p str],
        captured: &mut Vec<&'p str>,
        out: &mut Vec<(&'n Leaf, Vec<&'p str>)>,
    ) {
        let Some((head, rest)) = segments.split_first() else {
            out.extend(self.leaves.iter().map(|leaf| (leaf, captured.clone())));
            return;
        };

        if let Some(child) = self.literals.get(*head) {
            child.collect(rest, captured, out);
        }

        if let Some(child) = &self.param {
            if !head.is_empty() {
                captured.push(*head);
                child.collect(rest, captured, out);
                captured.pop();
            }
        }
    }
}

struct Registered {
    method: Method,
    declared: PathPattern,
    shapes: Vec<PathPattern>,
}

/// Immutable-after-startup mapping of (method, pattern) to handler.
pub struct RouteTable {
    root: Node,
    registered: Vec<Registered>,
    trailing_slash: TrailingSlash,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::with_trailing_slash(TrailingSlash::Strict)
    }

    /// Table whose plain `register` calls use the given trailing-slash policy.
    pub fn with_trailing_slash(trailing_slash: TrailingSlash) -> Self {
        Self {
            root: Node::default(),
            registered: Vec::new(),
            trailing_slash,
        }
    }

    pub fn trailing_slash(&self) -> TrailingSlash {
        self.trailing_slash
    }

    pub fn register<H: Handler>(
        &mut self,
        method: Method,
        pattern: &str,
        handler: H,
    ) -> Result<(), RouteError> {
        self.register_with(method, pattern, self.trailing_slash, Arc::new(handler))
    }

    /// Register with an explicit trailing-slash policy. On error the table is
    /// left exactly as it was.
    pub fn register_with(
        &mut self,
        method: Method,
        pattern: &str,
        trailing_slash: TrailingSlash,
        handler: Arc<dyn Handler>,
    ) -> Result<(), RouteError> {
        let declared = PathPattern::parse(pattern)?;

        let mut shapes = vec![declared.clone()];
        if trailing_slash == TrailingSlash::Lenient {
            shapes.extend(declared.trailing_slash_variant());
        }

        self.check_conflicts(&method, &declared, &shapes)?;

        let route: Arc<str> = Arc::from(declared.to_string());
        for shape in &shapes {
            self.root.descend_mut(shape).leaves.push(Leaf {
                method: method.clone(),
                shape: shape.clone(),
                route: route.clone(),
                handler: handler.clone(),
            });
        }

        tracing::debug!(method = %method, route = %route, "Registered route");

        self.registered.push(Registered {
            method,
            declared,
            shapes,
        });
        Ok(())
    }

    fn check_conflicts(
        &self,
        method: &Method,
        declared: &PathPattern,
        shapes: &[PathPattern],
    ) -> Result<(), RouteError> {
        for existing in self.registered.iter().filter(|r| &r.method == method) {
            if existing.declared == *declared {
                return Err(RouteError::Duplicate {
                    method: method.clone(),
                    pattern: declared.to_string(),
                });
            }

            let tie = shapes.iter().any(|new| {
                existing.shapes.iter().any(|old| {
                    old.same_shape(new)
                        || (old.overlaps(new) && old.param_count() == new.param_count())
                })
            });

            if tie {
                return Err(RouteError::Ambiguous {
                    method: method.clone(),
                    pattern: declared.to_string(),
                    existing: existing.declared.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Open a construction-time prefix scope.
    pub fn group(&mut self, prefix: &str) -> RouteGroup<'_> {
        RouteGroup::new(self, prefix)
    }

    /// Resolve a request path (query string already removed or ignored).
    pub fn lookup(&self, method: &Method, path: &str) -> Result<RouteMatch, AppError> {
        let path = path.split_once('?').map_or(path, |(p, _)| p);
        let segments: Vec<&str> = split_path(path).collect();

        let mut candidates = Vec::new();
        self.root.collect(&segments, &mut Vec::new(), &mut candidates);

        if candidates.is_empty() {
            return Err(AppError::NotFound);
        }

        let winner = candidates
            .iter()
            .filter(|(leaf, _)| &leaf.method == method)
            .min_by_key(|(leaf, _)| leaf.shape.param_count());

        match winner {
            Some((leaf, values)) => {
                let names = leaf.shape.segments().iter().filter_map(|s| match s {
                    Segment::Param(name) => Some(name.clone()),
                    Segment::Literal(_) => None,
                });
                let params = Params(
                    names
                        .zip(values.iter().map(|v| v.to_string()))
                        .collect(),
                );

                Ok(RouteMatch {
                    handler: leaf.handler.clone(),
                    params,
                    route: leaf.route.clone(),
                })
            }
            None => {
                let mut allowed: Vec<Method> =
                    candidates.iter().map(|(leaf, _)| leaf.method.clone()).collect();
                allowed.sort_by(|a, b| a.as_str().cmp(b.as_str()));
                allowed.dedup();
                Err(AppError::MethodNotAllowed { allowed })
            }
        }
    }

    /// Registered (method, pattern) pairs in registration order.
    pub fn routes(&self) -> impl Iterator<Item = (&Method, String)> {
        self.registered
            .iter()
            .map(|r| (&r.method, r.declared.to_string()))
    }

    pub fn len(&self) -> usize {
        self.registered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registered.is_empty()
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HandlerRequest, HandlerResult};
    use axum::response::IntoResponse;

    fn tagged(tag: &'static str) -> impl Handler {
        move |_req: HandlerRequest| async move { HandlerResult::Ok(tag.into_response()) }
    }

    fn table_with(routes: &[(Method, &str)]) -> RouteTable {
        let mut table = RouteTable::new();
        for (method, pattern) in routes {
            table.register(method.clone(), pattern, tagged("x")).unwrap();
        }
        table
    }

    #[test]
    fn test_literal_match_ignores_query() {
        let table = table_with(&[(Method::GET, "/stock/search")]);
        let found = table.lookup(&Method::GET, "/stock/search?x=1").unwrap();
        assert_eq!(&*found.route, "/stock/search");
        assert!(found.params.is_empty());
    }

    #[test]
    fn test_param_binding() {
        let table = table_with(&[(Method::GET, "/user/:id")]);
        let found = table.lookup(&Method::GET, "/user/42").unwrap();
        assert_eq!(found.params.get("id"), Some("42"));
        assert_eq!(&*found.route, "/user/:id");
    }

    #[test]
    fn test_param_does_not_match_empty_segment() {
        let table = table_with(&[(Method::GET, "/user/:id")]);
        assert!(matches!(
            table.lookup(&Method::GET, "/user/"),
            Err(AppError::NotFound)
        ));
    }

    #[test]
    fn test_not_found_vs_method_not_allowed() {
        let table = table_with(&[(Method::GET, "/stock/search"), (Method::PUT, "/stock/search")]);

        match table.lookup(&Method::POST, "/stock/search") {
            Err(AppError::MethodNotAllowed { allowed }) => {
                assert_eq!(allowed, vec![Method::GET, Method::PUT]);
            }
            other => panic!("expected 405, got {other:?}"),
        }

        assert!(matches!(
            table.lookup(&Method::GET, "/unknown"),
            Err(AppError::NotFound)
        ));
    }

    #[test]
    fn test_more_literal_pattern_wins() {
        let mut table = RouteTable::new();
        table.register(Method::GET, "/user/:id", tagged("param")).unwrap();
        table.register(Method::GET, "/user/me", tagged("literal")).unwrap();

        let found = table.lookup(&Method::GET, "/user/me").unwrap();
        assert_eq!(&*found.route, "/user/me");

        let found = table.lookup(&Method::GET, "/user/7").unwrap();
        assert_eq!(&*found.route, "/user/:id");
    }

    #[test]
    fn test_fewest_params_wins_across_branches() {
        let table = table_with(&[(Method::GET, "/a/:x/:y"), (Method::GET, "/:p/b/c")]);
        let found = table.lookup(&Method::GET, "/a/b/c").unwrap();
        assert_eq!(&*found.route, "/:p/b/c");
        assert_eq!(found.params.get("p"), Some("a"));
    }

    #[test]
    fn test_duplicate_leaves_table_unchanged() {
        let mut table = table_with(&[(Method::GET, "/api/ping")]);
        let err = table
            .register(Method::GET, "/api/ping", tagged("again"))
            .unwrap_err();
        assert!(matches!(err, RouteError::Duplicate { .. }));
        assert_eq!(table.len(), 1);
        assert!(table.lookup(&Method::GET, "/api/ping").is_ok());

        // Same pattern under another method is fine.
        table.register(Method::POST, "/api/ping", tagged("post")).unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_ambiguous_patterns_rejected() {
        let mut table = table_with(&[(Method::GET, "/a/:x")]);
        let err = table.register(Method::GET, "/:y/b", tagged("y")).unwrap_err();
        assert!(matches!(err, RouteError::Ambiguous { .. }));

        let err = table.register(Method::GET, "/a/:other", tagged("z")).unwrap_err();
        assert!(matches!(err, RouteError::Ambiguous { .. }));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_trailing_slash_strict_and_lenient() {
        let mut table = RouteTable::new();
        table.register(Method::GET, "/foo", tagged("foo")).unwrap();
        assert!(table.lookup(&Method::GET, "/foo").is_ok());
        assert!(matches!(
            table.lookup(&Method::GET, "/foo/"),
            Err(AppError::NotFound)
        ));

        table
            .register_with(
                Method::GET,
                "/bar",
                TrailingSlash::Lenient,
                Arc::new(tagged("bar")),
            )
            .unwrap();
        let found = table.lookup(&Method::GET, "/bar/").unwrap();
        assert_eq!(&*found.route, "/bar");

        // The lenient variant occupies /bar/ so an explicit one is a conflict.
        let err = table.register(Method::GET, "/bar/", tagged("x")).unwrap_err();
        assert!(matches!(err, RouteError::Ambiguous { .. }));
    }

    #[test]
    fn test_root_route() {
        let table = table_with(&[(Method::GET, "/")]);
        assert!(table.lookup(&Method::GET, "/").is_ok());
        assert!(table.lookup(&Method::GET, "").is_ok());
    }

    #[test]
    fn test_every_registered_route_resolves_to_itself() {
        let patterns = [
            "/api/ping",
            "/api/user",
            "/api/user/:id",
            "/api/user/login",
            "/api/stock/:code/news/:page",
            "/api/fund/getEMInfo",
        ];
        let mut table = RouteTable::new();
        for pattern in patterns {
            table.register(Method::GET, pattern, tagged("r")).unwrap();
        }

        for pattern in patterns {
            let path = pattern
                .split('/')
                .map(|s| match s.strip_prefix(':') {
                    Some(name) => format!("v-{name}"),
                    None => s.to_string(),
                })
                .collect::<Vec<_>>()
                .join("/");

            let found = table.lookup(&Method::GET, &path).unwrap();
            assert_eq!(&*found.route, pattern);
            for (name, value) in found.params.iter() {
                assert_eq!(value, format!("v-{name}"));
            }
        }
    }
}
