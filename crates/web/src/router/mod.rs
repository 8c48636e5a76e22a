//! Request routing.
//!
//! A [`Router`] keeps its routes in a multimap keyed by priority, highest first.
//! Routes of equal priority are tried in registration order. A route template is
//! split on `/` into segments: `:name` matches any non-empty segment and captures it
//! as parameter `name`, every other segment must match exactly.
//!
//! [`Router::find_route`] scans all routes and stops at the first full match. A
//! route whose path matches but whose method does not only records
//! [`MatchLevel::PathMatch`], and scanning goes on since a lower priority route may
//! still match fully.

mod mount;

pub use mount::{AllowAll, FnMountHandler, MOUNT_PRIORITY, MountHandler, MountMethod, MountOptions, is_traversal, mount_fn};

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use hearth_http::protocol::RequestHeader;
use thiserror::Error;
use tracing::trace;

use crate::handler::RouteHandler;

/// Priority of plain routes unless given otherwise.
pub const DEFAULT_PRIORITY: i32 = 0;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("parameters need a valid name, got a bare ':' in '{template}'")]
    UnnamedParameter { template: String },

    #[error("a mount needs at least one method")]
    NoMountMethods,
}

/// How far a request got when matched against the routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchLevel {
    NoMatch,
    /// The path matched a route registered for another method.
    PathMatch,
    FullMatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Literal(String),
    Parameter(String),
}

impl PathSegment {
    fn parse(segment: &str, template: &str) -> Result<Self, RouteError> {
        match segment.strip_prefix(':') {
            Some("") => Err(RouteError::UnnamedParameter { template: template.to_owned() }),
            Some(name) => Ok(Self::Parameter(name.to_owned())),
            None => Ok(Self::Literal(segment.to_owned())),
        }
    }

    pub fn matches(&self, segment: &str) -> bool {
        match self {
            Self::Literal(literal) => literal == segment,
            Self::Parameter(_) => !segment.is_empty(),
        }
    }
}

#[derive(Debug, Clone)]
enum PathMatcher {
    Segments(Vec<PathSegment>),
    /// Mount routes match every path below the prefix.
    Prefix(String),
}

pub struct Route {
    method: String,
    template: String,
    matcher: PathMatcher,
    handler: Arc<dyn RouteHandler>,
    priority: i32,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("template", &self.template)
            .field("priority", &self.priority)
            .field("mount", &self.is_mount())
            .finish_non_exhaustive()
    }
}

impl Route {
    fn new(
        method: impl Into<String>,
        template: impl Into<String>,
        handler: Arc<dyn RouteHandler>,
        priority: i32,
    ) -> Result<Self, RouteError> {
        let template = template.into();
        let segments =
            split_path(&template).map(|segment| PathSegment::parse(segment, &template)).collect::<Result<_, _>>()?;
        Ok(Self { method: method.into(), template, matcher: PathMatcher::Segments(segments), handler, priority })
    }

    fn mount(method: impl Into<String>, prefix: impl Into<String>, handler: Arc<dyn RouteHandler>, priority: i32) -> Self {
        let prefix = prefix.into();
        Self {
            method: method.into(),
            template: prefix.clone(),
            matcher: PathMatcher::Prefix(prefix),
            handler,
            priority,
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn is_mount(&self) -> bool {
        matches!(self.matcher, PathMatcher::Prefix(_))
    }

    pub fn handler(&self) -> &Arc<dyn RouteHandler> {
        &self.handler
    }

    pub fn matches_path(&self, path: &str) -> bool {
        match &self.matcher {
            PathMatcher::Prefix(prefix) => path
                .strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/') || prefix.ends_with('/')),
            PathMatcher::Segments(segments) => {
                let mut passed = split_path(path);
                let all_match = segments.iter().all(|segment| passed.next().is_some_and(|part| segment.matches(part)));
                all_match && passed.next().is_none()
            }
        }
    }

    pub fn match_level(&self, header: &RequestHeader) -> MatchLevel {
        if !self.matches_path(header.path()) {
            MatchLevel::NoMatch
        } else if self.method == header.method() {
            MatchLevel::FullMatch
        } else {
            MatchLevel::PathMatch
        }
    }

    /// The named parameters captured from `path`.
    pub fn params(&self, path: &str) -> HashMap<String, String> {
        let PathMatcher::Segments(segments) = &self.matcher else {
            return HashMap::new();
        };
        segments
            .iter()
            .zip(split_path(path))
            .filter_map(|(segment, part)| match segment {
                PathSegment::Parameter(name) => Some((name.clone(), part.to_owned())),
                PathSegment::Literal(_) => None,
            })
            .collect()
    }
}

fn split_path(path: &str) -> std::str::Split<'_, char> {
    path.strip_prefix('/').unwrap_or(path).split('/')
}

/// Main router structure that handles HTTP request routing
#[derive(Debug, Default)]
pub struct Router {
    routes: BTreeMap<Reverse<i32>, Vec<Route>>,
}

macro_rules! method_route {
    ($name:ident, $method:literal) => {
        #[doc = concat!("Registers a `", $method, "` route with the default priority.")]
        pub fn $name<H: RouteHandler + 'static>(&mut self, template: &str, handler: H) -> Result<&mut Self, RouteError> {
            self.add_route($method, template, handler, DEFAULT_PRIORITY)
        }
    };
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_route<H: RouteHandler + 'static>(
        &mut self,
        method: &str,
        template: &str,
        handler: H,
        priority: i32,
    ) -> Result<&mut Self, RouteError> {
        let route = Route::new(method, template, Arc::new(handler), priority)?;
        self.insert(route);
        Ok(self)
    }

    method_route!(get, "GET");
    method_route!(put, "PUT");
    method_route!(post, "POST");
    method_route!(delete, "DELETE");
    method_route!(head, "HEAD");
    method_route!(options, "OPTIONS");
    method_route!(patch, "PATCH");

    fn insert(&mut self, route: Route) {
        trace!(method = %route.method, template = %route.template, priority = route.priority, "route added");
        self.routes.entry(Reverse(route.priority)).or_default().push(route);
    }

    /// Finds the first route matching method and path, scanning in priority order.
    ///
    /// Without a full match the route is `None` and the level tells whether any route
    /// matched the path alone.
    pub fn find_route(&self, header: &RequestHeader) -> (Option<&Route>, MatchLevel) {
        let mut best = MatchLevel::NoMatch;
        for route in self.routes() {
            match route.match_level(header) {
                MatchLevel::FullMatch => return (Some(route), MatchLevel::FullMatch),
                level => best = best.max(level),
            }
        }
        (None, best)
    }

    /// All routes in matching order.
    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.routes.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.routes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
