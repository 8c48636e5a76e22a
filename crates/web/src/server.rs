use std::any::Any;
use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use hearth_http::Settings;
use hearth_http::connection::{Connection, ConnectionHandle, ConnectionManager};
use hearth_http::protocol::{BodyError, ConnectionError, HttpError, SendError};
use hearth_http::request::Request;
use hearth_http::response::Response;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, error, info, trace, warn};

use crate::handler::{HandlerError, RouteHandler};
use crate::router::{MatchLevel, Router};
use crate::session::SessionGuard;

/// Called for transport and protocol errors. The handle is absent for accept errors.
pub type ErrorHook = Arc<dyn Fn(Option<&ConnectionHandle>, &HttpError) + Send + Sync>;

/// Called when a read deadline expires, before the connection is dropped.
///
/// The request is absent when the deadline hit while the header was still being read.
pub type TimeoutHook =
    Arc<dyn for<'a> Fn(Option<&'a Request>, &'a mut Response) -> BoxFuture<'a, ()> + Send + Sync>;

pub struct ServerBuilder {
    router: Option<Router>,
    settings: Settings,
    address: Option<io::Result<Vec<SocketAddr>>>,
    on_error: Option<ErrorHook>,
    on_timeout: Option<TimeoutHook>,
    on_missing_handler: Option<Arc<dyn RouteHandler>>,
    session: Option<Arc<dyn SessionGuard>>,
}

impl fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("router", &self.router)
            .field("settings", &self.settings)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl ServerBuilder {
    fn new() -> Self {
        Self {
            router: None,
            settings: Settings::default(),
            address: None,
            on_error: None,
            on_timeout: None,
            on_missing_handler: None,
            session: None,
        }
    }

    #[must_use]
    pub fn address<A: ToSocketAddrs>(mut self, address: A) -> Self {
        self.address = Some(address.to_socket_addrs().map(Iterator::collect));
        self
    }

    #[must_use]
    pub fn router(mut self, router: Router) -> Self {
        self.router = Some(router);
        self
    }

    #[must_use]
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.settings.read_buffer_size = size;
        self
    }

    #[must_use]
    pub fn write_buffer_size(mut self, size: usize) -> Self {
        self.settings.write_buffer_size = size;
        self
    }

    #[must_use]
    pub fn max_header_bytes(mut self, max: usize) -> Self {
        self.settings.max_header_bytes = max;
        self
    }

    #[must_use]
    pub fn max_header_fields(mut self, max: usize) -> Self {
        self.settings.max_header_fields = max;
        self
    }

    /// `None` lets reads wait forever.
    #[must_use]
    pub fn read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.settings.read_timeout = timeout;
        self
    }

    #[must_use]
    pub fn expose_exception(mut self, expose: bool) -> Self {
        self.settings.expose_exception = expose;
        self
    }

    #[must_use]
    pub fn trust_proxy(mut self, trust: bool) -> Self {
        self.settings.trust_proxy = trust;
        self
    }

    #[must_use]
    pub fn on_error(mut self, hook: impl Fn(Option<&ConnectionHandle>, &HttpError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn on_timeout<F>(mut self, hook: F) -> Self
    where
        F: for<'a> Fn(Option<&'a Request>, &'a mut Response) -> BoxFuture<'a, ()> + Send + Sync + 'static,
    {
        self.on_timeout = Some(Arc::new(hook));
        self
    }

    /// Answers requests no route matches at all, instead of the plain 404.
    #[must_use]
    pub fn on_missing_handler(mut self, handler: impl RouteHandler + 'static) -> Self {
        self.on_missing_handler = Some(Arc::new(handler));
        self
    }

    /// Installs the session middleware, usually a [`SessionControl`](crate::session::SessionControl).
    #[must_use]
    pub fn session_control(mut self, guard: impl SessionGuard + 'static) -> Self {
        self.session = Some(Arc::new(guard));
        self
    }

    pub fn build(self) -> Result<Server, ServerBuildError> {
        let router = self.router.ok_or(ServerBuildError::MissingRouter)?;
        let address = self.address.transpose().map_err(|source| ServerBuildError::InvalidAddress { source })?;
        Ok(Server {
            router,
            settings: Arc::new(self.settings),
            address,
            connections: ConnectionManager::new(),
            on_error: self.on_error,
            on_timeout: self.on_timeout,
            on_missing_handler: self.on_missing_handler,
            session: self.session,
        })
    }
}

#[derive(Error, Debug)]
pub enum ServerBuildError {
    #[error("router must be set")]
    MissingRouter,
    #[error("address cannot be resolved: {source}")]
    InvalidAddress { source: io::Error },
}

/// Accepts connections and dispatches their request to the router.
///
/// Each connection carries exactly one exchange: the header is read, the matching
/// route (or the 405/404 fallback) answers, and the connection is removed from the
/// [`ConnectionManager`] once the response ended.
pub struct Server {
    router: Router,
    settings: Arc<Settings>,
    address: Option<Vec<SocketAddr>>,
    connections: Arc<ConnectionManager>,
    on_error: Option<ErrorHook>,
    on_timeout: Option<TimeoutHook>,
    on_missing_handler: Option<Arc<dyn RouteHandler>>,
    session: Option<Arc<dyn SessionGuard>>,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("router", &self.router)
            .field("settings", &self.settings)
            .field("address", &self.address)
            .field("connections", &self.connections.len())
            .finish_non_exhaustive()
    }
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The registry of live connections. Clearing it stops all of them.
    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// Binds the configured address and serves forever.
    pub async fn start(self: Arc<Self>) -> io::Result<()> {
        let Some(address) = self.address.clone() else {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "no address configured"));
        };

        let listener = match TcpListener::bind(address.as_slice()).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(cause = %e, "bind server error");
                return Err(e);
            }
        };
        info!(address = ?address, "start listening");

        self.serve(listener).await;
        Ok(())
    }

    /// The accept loop. Every accepted stream is served on its own task.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        loop {
            let (tcp_stream, remote_addr) = match listener.accept().await {
                Ok(stream_and_addr) => stream_and_addr,
                Err(e) => {
                    warn!(cause = %e, "failed to accept");
                    self.report(None, &HttpError::from(ConnectionError::io(e)));
                    continue;
                }
            };
            info!(remote = %remote_addr, "accepted connection");

            let server = Arc::clone(&self);
            tokio::spawn(async move {
                server.serve_connection(tcp_stream, Some(remote_addr)).await;
            });
        }
    }

    /// Serves the single exchange of one transport, whatever it is.
    pub async fn serve_connection<T>(&self, io: T, remote_addr: Option<SocketAddr>)
    where
        T: AsyncRead + AsyncWrite + Send + Sync + Unpin + 'static,
    {
        let mut connection = self.connections.create(io, remote_addr, Arc::clone(&self.settings));
        let handle = Arc::clone(connection.handle());

        match connection.read_header().await {
            Ok(parser) => {
                let (mut req, mut res) = connection.bind(parser).into_parts();
                self.dispatch(&mut req, &mut res).await;

                if handle.timed_out() {
                    self.timed_out(Some(&req), &mut res).await;
                } else if !res.has_concluded()
                    && let Err(e) = res.end().await
                {
                    self.report_send(&handle, e);
                }
            }
            Err(e) => self.header_failed(connection, e).await,
        }

        self.connections.remove(handle.id());
        trace!(connection = handle.id(), "connection finished");
    }

    async fn header_failed(&self, connection: Connection, error: HttpError) {
        let handle = Arc::clone(connection.handle());
        match &error {
            HttpError::RequestError { .. } => {
                self.report(Some(&handle), &error);
                let mut res = connection.into_response();
                if let Err(e) = res.send_status(400).await {
                    self.report_send(&handle, e);
                }
            }
            HttpError::ConnectionError { source: ConnectionError::TimedOut } => {
                let mut res = connection.into_response();
                self.timed_out(None, &mut res).await;
            }
            HttpError::ConnectionError { source: ConnectionError::Aborted | ConnectionError::Closed } => {
                trace!(connection = handle.id(), cause = %error, "connection ended before a request");
            }
            _ => self.report(Some(&handle), &error),
        }
    }

    async fn dispatch(&self, req: &mut Request, res: &mut Response) {
        let (route, level) = self.router.find_route(req.header());
        match route {
            Some(route) => {
                let params = route.params(req.path());
                req.set_params(params);
                debug!(connection = req.connection_id(), route = %route.template(), "route matched");

                let handler = Arc::clone(route.handler());
                if self.admit(req, res).await {
                    self.invoke(handler.as_ref(), req, res).await;
                }
            }
            None if level == MatchLevel::PathMatch => self.respond_status(res, 405).await,
            None => match &self.on_missing_handler {
                Some(handler) => self.invoke(handler.as_ref(), req, res).await,
                None => self.respond_status(res, 404).await,
            },
        }
    }

    async fn admit(&self, req: &mut Request, res: &mut Response) -> bool {
        let Some(guard) = &self.session else {
            return true;
        };
        match guard.admit(req, res).await {
            Ok(admitted) => admitted,
            Err(e) => {
                self.report_send(res.connection(), e);
                false
            }
        }
    }

    async fn invoke(&self, handler: &dyn RouteHandler, req: &mut Request, res: &mut Response) {
        let outcome = AssertUnwindSafe(handler.handle(req, res)).catch_unwind().await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.handler_failed(e, res).await,
            Err(panic) => {
                error!(connection = res.connection_id(), cause = panic_message(panic.as_ref()), "route handler panicked");
                if !res.has_concluded()
                    && let Err(e) = res.status(500).end().await
                {
                    self.report_send(res.connection(), e);
                }
            }
        }
    }

    async fn handler_failed(&self, error: HandlerError, res: &mut Response) {
        match error {
            HandlerError::Status(code) => self.respond_status(res, code).await,
            HandlerError::Body(e) if e.is_aborted() => {
                trace!(connection = res.connection_id(), "body read aborted");
            }
            // the timeout hook answers
            HandlerError::Body(_) if res.connection().timed_out() => {}
            HandlerError::Body(e @ BodyError::Connection { .. }) => {
                self.report(Some(res.connection()), &HttpError::from(e));
                if !res.has_concluded()
                    && let Err(e) = res.end().await
                {
                    self.report_send(res.connection(), e);
                }
            }
            HandlerError::Body(e) => {
                debug!(connection = res.connection_id(), cause = %e, "body read failed");
                self.respond_status(res, e.status_code().as_u16()).await;
            }
            HandlerError::Send(e) => self.report_send(res.connection(), e),
            HandlerError::Other(e) => {
                warn!(connection = res.connection_id(), cause = %e, "route handler failed");
                if res.has_concluded() {
                    return;
                }
                let sent = if self.settings.expose_exception {
                    res.status(500).send(e.to_string()).await
                } else {
                    res.status(500).end().await
                };
                if let Err(e) = sent {
                    self.report_send(res.connection(), e);
                }
            }
        }
    }

    async fn respond_status(&self, res: &mut Response, code: u16) {
        if res.has_concluded() {
            return;
        }
        if let Err(e) = res.send_status(code).await {
            self.report_send(res.connection(), e);
        }
    }

    async fn timed_out(&self, req: Option<&Request>, res: &mut Response) {
        debug!(connection = res.connection_id(), with_request = req.is_some(), "connection timed out");
        if let Some(hook) = &self.on_timeout {
            hook(req, res).await;
        }
    }

    fn report_send(&self, handle: &ConnectionHandle, error: SendError) {
        if error.is_aborted() {
            trace!(connection = handle.id(), "write aborted");
            return;
        }
        self.report(Some(handle), &HttpError::from(error));
    }

    fn report(&self, handle: Option<&ConnectionHandle>, error: &HttpError) {
        match &self.on_error {
            Some(hook) => hook(handle, error),
            None => warn!(connection = ?handle.map(ConnectionHandle::id), cause = %error, "connection error"),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_requires_a_router() {
        assert!(matches!(Server::builder().build(), Err(ServerBuildError::MissingRouter)));
    }

    #[test]
    fn build_rejects_unresolvable_addresses() {
        let result = Server::builder().router(Router::new()).address("not an address").build();
        assert!(matches!(result, Err(ServerBuildError::InvalidAddress { .. })));
    }

    #[test]
    fn connection_future_can_be_spawned() {
        fn assert_send<F: Future + Send>(_: F) {}

        let server = Arc::new(Server::builder().router(Router::new()).build().unwrap());
        let (io, _peer) = tokio::io::duplex(64);
        assert_send(async move { server.serve_connection(io, None).await });
    }

    #[test]
    fn setters_land_in_settings() {
        let server = Server::builder()
            .router(Router::new())
            .read_timeout(None)
            .expose_exception(true)
            .max_header_fields(8)
            .build()
            .unwrap();

        assert_eq!(server.settings().read_timeout, None);
        assert!(server.settings().expose_exception);
        assert_eq!(server.settings().max_header_fields, 8);
        assert!(server.connections().is_empty());
    }

    #[tokio::test]
    async fn start_without_address_fails() {
        let server = Arc::new(Server::builder().router(Router::new()).build().unwrap());
        let err = server.start().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn panic_messages() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(3);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
