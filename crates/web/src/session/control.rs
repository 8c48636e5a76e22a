use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use hearth_http::protocol::{Cookie, SendError};
use hearth_http::request::Request;
use hearth_http::response::Response;
use tracing::{debug, trace};

use crate::session::{AuthResult, Authorizer, SessionState, SessionStorage};

pub const DEFAULT_SESSION_COOKIE: &str = "session";

/// Runs right before the authorizer, to adjust request or response.
pub type Conditioner = Arc<dyn Fn(&mut Request, &mut Response) + Send + Sync>;

/// Decides whether the matched route handler of a request may run.
///
/// `Ok(false)` means the guard concluded the response itself.
#[async_trait]
pub trait SessionGuard: Send + Sync {
    async fn admit(&self, req: &mut Request, res: &mut Response) -> Result<bool, SendError>;
}

/// The session middleware.
///
/// A request with a live session passes. Without one, `OPTIONS` may pass when allowed,
/// otherwise the [`Authorizer`] decides, and on success a fresh session is created and
/// its id set as cookie on the response and patched into the request.
///
/// With an authentication path set, authorization only runs for requests to that
/// path. Other requests without a live session are answered with 401.
pub struct SessionControl<S> {
    storage: Arc<S>,
    authorizer: Arc<dyn Authorizer>,
    cookie_name: String,
    cookie_template: Cookie,
    allow_options_unauthorized: bool,
    conditioner: Option<Conditioner>,
    authentication_path: Option<String>,
}

impl<S> fmt::Debug for SessionControl<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionControl")
            .field("realm", &self.authorizer.realm())
            .field("cookie_name", &self.cookie_name)
            .field("allow_options_unauthorized", &self.allow_options_unauthorized)
            .field("authentication_path", &self.authentication_path)
            .finish_non_exhaustive()
    }
}

impl<S: SessionStorage> SessionControl<S> {
    pub fn new(storage: Arc<S>, authorizer: impl Authorizer + 'static) -> Self {
        Self {
            storage,
            authorizer: Arc::new(authorizer),
            cookie_name: DEFAULT_SESSION_COOKIE.to_owned(),
            cookie_template: Cookie::default().path("/").http_only(true),
            allow_options_unauthorized: false,
            conditioner: None,
            authentication_path: None,
        }
    }

    #[must_use]
    pub fn cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = name.into();
        self
    }

    /// Attributes of the session cookie. Name and value are filled in per session.
    #[must_use]
    pub fn cookie_template(mut self, template: Cookie) -> Self {
        self.cookie_template = template;
        self
    }

    #[must_use]
    pub fn allow_options_unauthorized(mut self, allow: bool) -> Self {
        self.allow_options_unauthorized = allow;
        self
    }

    #[must_use]
    pub fn conditioner(mut self, conditioner: impl Fn(&mut Request, &mut Response) + Send + Sync + 'static) -> Self {
        self.conditioner = Some(Arc::new(conditioner));
        self
    }

    #[must_use]
    pub fn authentication_path(mut self, path: impl Into<String>) -> Self {
        self.authentication_path = Some(path.into());
        self
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// The live session of a request, if any.
    pub fn session(&self, req: &Request) -> Option<S::Session> {
        req.cookie(&self.cookie_name).and_then(|id| self.storage.get_session(id))
    }

    fn make_session(&self, req: &mut Request, res: &mut Response) {
        let id = self.storage.create_session();
        let cookie = self.cookie_template.clone().with_name(&self.cookie_name).with_value(&id);
        res.set_cookie(cookie);
        req.patch_cookie(&self.cookie_name, id);
    }

    async fn authenticate(&self, req: &mut Request, res: &mut Response) -> Result<bool, SendError> {
        if let Some(conditioner) = &self.conditioner {
            conditioner(req, res);
        }

        let observer = res.observe_conclusion();
        let result = self.authorizer.try_authorize(req, res).await?;
        trace!(connection = req.connection_id(), ?result, "authorization result");
        if observer.has_concluded() {
            return Ok(false);
        }

        match result {
            AuthResult::AllowedContinue => {
                self.make_session(req, res);
                Ok(true)
            }
            AuthResult::AllowedButStop => {
                self.make_session(req, res);
                conclude(res, 204).await
            }
            AuthResult::Denied => conclude(res, 401).await,
            AuthResult::BadRequest => conclude(res, 400).await,
            AuthResult::Negotiate => {
                self.authorizer.negotiate(req, res).await?;
                Ok(false)
            }
        }
    }
}

async fn conclude(res: &mut Response, status: u16) -> Result<bool, SendError> {
    if !res.has_concluded() {
        res.status(status).end().await?;
    }
    Ok(false)
}

#[async_trait]
impl<S: SessionStorage> SessionGuard for SessionControl<S> {
    async fn admit(&self, req: &mut Request, res: &mut Response) -> Result<bool, SendError> {
        let state = self.storage.session_state(req.cookie(&self.cookie_name));
        if state == SessionState::Live {
            return Ok(true);
        }
        debug!(connection = req.connection_id(), ?state, path = req.path(), "request without live session");

        if self.allow_options_unauthorized && req.method() == "OPTIONS" {
            return Ok(true);
        }

        if let Some(path) = &self.authentication_path
            && req.path() != path
        {
            return conclude(res, 401).await;
        }

        self.authenticate(req, res).await
    }
}
