//! Path segment matching.
//!
//! # Responsibilities
//! - Parse a path template segment (`r{id:\d+}`, `{name}`, `{:\d+}`, `static`)
//! - Compile slugged segments to an anchored regex
//! - Extract captured variables in template order
//!
//! # Design Decisions
//! - A slug never spans a '/' (templates are matched segment by segment)
//! - `{name}` defaults to `[^/]+`
//! - Braces inside a slug pattern nest (`{code:\d{3}}`)

use regex::Regex;

use crate::routing::handler::Vars;
use crate::routing::router::RouterError;

/// One compiled template segment.
#[derive(Debug, Clone)]
pub enum Segment {
    Literal(String),
    Pattern(PatternSegment),
}

impl Segment {
    /// Parse one segment of `template`.
    pub fn parse(segment: &str, template: &str) -> Result<Self, RouterError> {
        if !segment.contains('{') && !segment.contains('}') {
            return Ok(Segment::Literal(segment.to_string()));
        }
        PatternSegment::parse(segment, template).map(Segment::Pattern)
    }

    /// Edge key used to merge identical segments in the route tree.
    pub fn source(&self) -> &str {
        match self {
            Segment::Literal(s) => s,
            Segment::Pattern(p) => &p.source,
        }
    }
}

/// A segment with at least one slug.
#[derive(Debug, Clone)]
pub struct PatternSegment {
    source: String,
    regex: Regex,
    /// (variable name, capture group index)
    slots: Vec<(String, usize)>,
}

impl PatternSegment {
    fn parse(segment: &str, template: &str) -> Result<Self, RouterError> {
        let bad = |reason: String| RouterError::BadPattern {
            pattern: template.to_string(),
            reason,
        };

        let mut expr = String::from("^");
        let mut slots = Vec::new();
        let mut group = 1;
        let mut literal = String::new();
        let mut chars = segment.chars();

        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    expr.push_str(&regex::escape(&literal));
                    literal.clear();

                    let mut depth = 1;
                    let mut slug = String::new();
                    for c in chars.by_ref() {
                        match c {
                            '{' => depth += 1,
                            '}' => {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                            }
                            _ => {}
                        }
                        slug.push(c);
                    }
                    if depth != 0 {
                        return Err(bad(format!("unclosed slug in segment '{}'", segment)));
                    }

                    let (name, pattern) = match slug.split_once(':') {
                        Some((n, p)) => (n.trim(), p),
                        None => (slug.trim(), "[^/]+"),
                    };
                    if pattern.is_empty() {
                        return Err(bad(format!("empty slug pattern in segment '{}'", segment)));
                    }
                    let inner = Regex::new(pattern)
                        .map_err(|e| bad(format!("slug '{}': {}", slug, e)))?;

                    slots.push((name.to_string(), group));
                    group += inner.captures_len();
                    expr.push('(');
                    expr.push_str(pattern);
                    expr.push(')');
                }
                '}' => return Err(bad(format!("unbalanced '}}' in segment '{}'", segment))),
                c => literal.push(c),
            }
        }
        expr.push_str(&regex::escape(&literal));
        expr.push('$');

        let regex = Regex::new(&expr).map_err(|e| bad(e.to_string()))?;
        Ok(Self {
            source: segment.to_string(),
            regex,
            slots,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Match `segment`, appending captures to `vars` on success.
    pub fn matches(&self, segment: &str, vars: &mut Vars) -> bool {
        let Some(caps) = self.regex.captures(segment) else {
            return false;
        };
        for (name, idx) in &self.slots {
            let value = caps.get(*idx).map(|m| m.as_str()).unwrap_or_default();
            vars.push(name.clone(), value);
        }
        true
    }
}
