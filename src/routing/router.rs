//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Collect (pattern, method mask, triad) registrations
//! - Compile them into a segment tree once, before serving
//! - Resolve (path, method) to a triad plus captured variables
//!
//! # Design Decisions
//! - Immutable after `compile` (lookups take `&self`, no locks)
//! - Lookup walks one tree level per path segment; literal edges are a
//!   `HashMap` probe, slug edges are tried in precedence order
//! - At one level, literal segments beat slugs; among slugs and among
//!   endpoints of one node, the later registration wins
//! - Shape match with a non-matching method is `NotFound`
//! - Empty path segments are ignored on both sides: `/a//b` and `/a/b/`
//!   match the template `/a/b`

use std::collections::HashMap;
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;

use axum::http::Method;
use thiserror::Error;

use crate::routing::handler::{HandlerTriad, Vars};
use crate::routing::matcher::{PatternSegment, Segment};

/// Errors from route compilation and lookup.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("bad route pattern '{pattern}': {reason}")]
    BadPattern { pattern: String, reason: String },

    #[error("router used before compile()")]
    NotCompiled,

    #[error("no route for {method} {path}")]
    NotFound { method: String, path: String },
}

/// Bitset of HTTP verbs a route accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Methods(u16);

impl Methods {
    pub const NONE: Methods = Methods(0);
    pub const GET: Methods = Methods(1 << 0);
    pub const POST: Methods = Methods(1 << 1);
    pub const PUT: Methods = Methods(1 << 2);
    pub const DELETE: Methods = Methods(1 << 3);
    pub const PATCH: Methods = Methods(1 << 4);
    pub const HEAD: Methods = Methods(1 << 5);
    pub const OPTIONS: Methods = Methods(1 << 6);
    pub const ANY: Methods = Methods(0x7f);

    pub fn from_method(method: &Method) -> Methods {
        match *method {
            Method::GET => Methods::GET,
            Method::POST => Methods::POST,
            Method::PUT => Methods::PUT,
            Method::DELETE => Methods::DELETE,
            Method::PATCH => Methods::PATCH,
            Method::HEAD => Methods::HEAD,
            Method::OPTIONS => Methods::OPTIONS,
            _ => Methods::NONE,
        }
    }

    pub fn contains(self, method: &Method) -> bool {
        let bit = Methods::from_method(method);
        bit != Methods::NONE && self.0 & bit.0 == bit.0
    }
}

impl BitOr for Methods {
    type Output = Methods;

    fn bitor(self, rhs: Methods) -> Methods {
        Methods(self.0 | rhs.0)
    }
}

impl BitOrAssign for Methods {
    fn bitor_assign(&mut self, rhs: Methods) {
        self.0 |= rhs.0;
    }
}

/// Result of a successful lookup.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub vars: Vars,
    pub triad: Arc<HandlerTriad>,
    /// Template of the matched route, for logs and metrics.
    pub pattern: Arc<str>,
}

#[derive(Debug)]
struct RouteSpec {
    pattern: Arc<str>,
    methods: Methods,
    triad: Arc<HandlerTriad>,
}

#[derive(Debug)]
struct Endpoint {
    methods: Methods,
    triad: Arc<HandlerTriad>,
    pattern: Arc<str>,
}

#[derive(Debug, Default)]
struct Node {
    literals: HashMap<String, usize>,
    /// Slug edges, highest precedence first.
    patterns: Vec<(PatternSegment, usize)>,
    /// Highest precedence first.
    endpoints: Vec<Endpoint>,
}

/// Compiled segment tree.
#[derive(Debug)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn build(routes: &[RouteSpec]) -> Result<Self, RouterError> {
        let mut nodes = vec![Node::default()];
        for route in routes {
            let mut at = 0;
            for raw in split_path(&route.pattern) {
                let segment = Segment::parse(raw, &route.pattern)?;
                at = match segment {
                    Segment::Literal(lit) => match nodes[at].literals.get(&lit) {
                        Some(&next) => next,
                        None => {
                            let next = nodes.len();
                            nodes.push(Node::default());
                            nodes[at].literals.insert(lit, next);
                            next
                        }
                    },
                    Segment::Pattern(p) => {
                        let existing = nodes[at]
                            .patterns
                            .iter()
                            .find(|(q, _)| q.source() == raw)
                            .map(|(_, n)| *n);
                        match existing {
                            Some(next) => next,
                            None => {
                                let next = nodes.len();
                                nodes.push(Node::default());
                                nodes[at].patterns.insert(0, (p, next));
                                next
                            }
                        }
                    }
                };
            }
            nodes[at].endpoints.insert(
                0,
                Endpoint {
                    methods: route.methods,
                    triad: Arc::clone(&route.triad),
                    pattern: Arc::clone(&route.pattern),
                },
            );
        }
        Ok(Self { nodes })
    }

    fn walk<'a>(&'a self, at: usize, segments: &[&str], method: &Method, vars: &mut Vars) -> Option<&'a Endpoint> {
        let node = &self.nodes[at];
        let Some((head, rest)) = segments.split_first() else {
            return node.endpoints.iter().find(|e| e.methods.contains(method));
        };

        if let Some(&next) = node.literals.get(*head) {
            if let Some(found) = self.walk(next, rest, method, vars) {
                return Some(found);
            }
        }
        for (pattern, next) in &node.patterns {
            let mark = vars.len();
            if pattern.matches(head, vars) {
                if let Some(found) = self.walk(*next, rest, method, vars) {
                    return Some(found);
                }
            }
            vars.truncate(mark);
        }
        None
    }
}

/// Non-empty segments of `path`; repeated and trailing slashes collapse.
fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Maps (method, path) to a handler triad.
#[derive(Debug, Default)]
pub struct Router {
    routes: Vec<RouteSpec>,
    tree: Option<Tree>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route. Pattern syntax is checked by [`compile`](Self::compile).
    pub fn add_route(&mut self, pattern: impl Into<String>, methods: Methods, triad: HandlerTriad) {
        let pattern: String = pattern.into();
        self.routes.push(RouteSpec {
            pattern: Arc::from(pattern),
            methods,
            triad: Arc::new(triad),
        });
        self.tree = None;
    }

    /// Build the lookup tree from every registered route.
    pub fn compile(&mut self) -> Result<(), RouterError> {
        let tree = Tree::build(&self.routes)?;
        tracing::debug!(
            routes = self.routes.len(),
            nodes = tree.nodes.len(),
            "Router compiled"
        );
        self.tree = Some(tree);
        Ok(())
    }

    pub fn is_compiled(&self) -> bool {
        self.tree.is_some()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Resolve `path` for `method`.
    pub fn match_route(&self, path: &str, method: &Method) -> Result<RouteMatch, RouterError> {
        let tree = self.tree.as_ref().ok_or(RouterError::NotCompiled)?;
        let segments: Vec<&str> = split_path(path).collect();
        let mut vars = Vars::new();
        match tree.walk(0, &segments, method, &mut vars) {
            Some(endpoint) => Ok(RouteMatch {
                vars,
                triad: Arc::clone(&endpoint.triad),
                pattern: Arc::clone(&endpoint.pattern),
            }),
            None => Err(RouterError::NotFound {
                method: method.to_string(),
                path: path.to_string(),
            }),
        }
    }
}
