//! Handler triads and captured route variables.

use std::fmt;
use std::sync::Arc;

use crate::context::Context;
use crate::task::{Input, Output, Status};

/// Variables captured from the matched path, in pattern order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vars(Vec<(String, String)>);

impl Vars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// First value captured under `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.0.truncate(len);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One pipeline stage.
pub type Handler = Arc<dyn Fn(&Vars, &Input, &mut Context, &mut Output) -> Status + Send + Sync>;

/// The pre / worker / post stages bound to a route or periodic task.
///
/// Absent `pre` and `post` stages pass through as `Status::Ok`.
#[derive(Clone)]
pub struct HandlerTriad {
    pub pre: Option<Handler>,
    pub worker: Handler,
    pub post: Option<Handler>,
}

impl HandlerTriad {
    pub fn new<F>(worker: F) -> Self
    where
        F: Fn(&Vars, &Input, &mut Context, &mut Output) -> Status + Send + Sync + 'static,
    {
        Self {
            pre: None,
            worker: Arc::new(worker),
            post: None,
        }
    }

    pub fn with_pre<F>(mut self, pre: F) -> Self
    where
        F: Fn(&Vars, &Input, &mut Context, &mut Output) -> Status + Send + Sync + 'static,
    {
        self.pre = Some(Arc::new(pre));
        self
    }

    pub fn with_post<F>(mut self, post: F) -> Self
    where
        F: Fn(&Vars, &Input, &mut Context, &mut Output) -> Status + Send + Sync + 'static,
    {
        self.post = Some(Arc::new(post));
        self
    }
}

impl fmt::Debug for HandlerTriad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerTriad")
            .field("pre", &self.pre.is_some())
            .field("post", &self.post.is_some())
            .finish()
    }
}
