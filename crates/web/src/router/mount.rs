use std::collections::BTreeSet;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use hearth_http::request::{Request, StreamSink};
use hearth_http::response::{Response, content_type_for};
use tokio::fs;
use tracing::{debug, warn};

use crate::handler::{HandlerResult, RouteHandler};
use crate::router::{Route, RouteError, Router};

/// Priority of mount routes unless given otherwise, below plain routes.
pub const MOUNT_PRIORITY: i32 = -100;

const SERVER_NAME: &str = "hearth";

/// A method a mount can serve, each one mapped onto a filesystem action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MountMethod {
    Get,
    Put,
    Post,
    Delete,
    Head,
    Options,
}

impl MountMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Post => "POST",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for MountMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The set of methods a mount serves. Defaults to `GET`, `HEAD` and `OPTIONS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountOptions {
    methods: BTreeSet<MountMethod>,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self::empty().with(MountMethod::Get).with(MountMethod::Head).with(MountMethod::Options)
    }
}

impl MountOptions {
    pub fn empty() -> Self {
        Self { methods: BTreeSet::new() }
    }

    /// Every method, writes and deletes included.
    pub fn all() -> Self {
        Self::default().with(MountMethod::Put).with(MountMethod::Post).with(MountMethod::Delete)
    }

    #[must_use]
    pub fn with(mut self, method: MountMethod) -> Self {
        self.methods.insert(method);
        self
    }

    #[must_use]
    pub fn without(mut self, method: MountMethod) -> Self {
        self.methods.remove(&method);
        self
    }

    pub fn contains(&self, method: MountMethod) -> bool {
        self.methods.contains(&method)
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = MountMethod> + '_ {
        self.methods.iter().copied()
    }

    /// Value of the `Allow` field answered to `OPTIONS`.
    pub fn allow_header(&self) -> String {
        self.iter().map(MountMethod::as_str).collect::<Vec<_>>().join(", ")
    }
}

/// Runs before every filesystem action of a mount and may veto it.
///
/// Returning `false` stops the action. Unless the handler concluded the response
/// itself, a 403 is sent.
#[async_trait]
pub trait MountHandler: Send + Sync {
    async fn allow(&self, req: &mut Request, res: &mut Response) -> bool;
}

/// A mount handler that never vetoes.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl MountHandler for AllowAll {
    async fn allow(&self, _req: &mut Request, _res: &mut Response) -> bool {
        true
    }
}

pub struct FnMountHandler<F> {
    f: F,
}

impl<F> fmt::Debug for FnMountHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnMountHandler").finish_non_exhaustive()
    }
}

pub fn mount_fn<F>(f: F) -> FnMountHandler<F>
where
    F: for<'a> Fn(&'a mut Request, &'a mut Response) -> BoxFuture<'a, bool> + Send + Sync,
{
    FnMountHandler { f }
}

#[async_trait]
impl<F> MountHandler for FnMountHandler<F>
where
    F: for<'a> Fn(&'a mut Request, &'a mut Response) -> BoxFuture<'a, bool> + Send + Sync,
{
    async fn allow(&self, req: &mut Request, res: &mut Response) -> bool {
        (self.f)(req, res).await
    }
}

impl Router {
    /// Maps every path below `prefix` onto the directory `root`.
    ///
    /// One route is registered per method in `options`, each at `priority`.
    pub fn mount<H: MountHandler + 'static>(
        &mut self,
        root: impl Into<PathBuf>,
        prefix: &str,
        handler: H,
        options: MountOptions,
        priority: i32,
    ) -> Result<&mut Self, RouteError> {
        if options.is_empty() {
            return Err(RouteError::NoMountMethods);
        }

        let root = root.into();
        let handler: Arc<dyn MountHandler> = Arc::new(handler);
        let options = Arc::new(options);
        for method in options.iter() {
            let action = MountAction {
                method,
                root: root.clone(),
                prefix: prefix.to_owned(),
                options: Arc::clone(&options),
                handler: Arc::clone(&handler),
            };
            self.insert(Route::mount(method.as_str(), prefix, Arc::new(action), priority));
        }
        debug!(root = %root.display(), prefix, methods = %options.allow_header(), "directory mounted");
        Ok(self)
    }

    /// [`Router::mount`] with the default methods, no veto and the mount priority.
    pub fn mount_dir(&mut self, root: impl Into<PathBuf>, prefix: &str) -> Result<&mut Self, RouteError> {
        self.mount(root, prefix, AllowAll, MountOptions::default(), MOUNT_PRIORITY)
    }
}

/// True if the path could step out of the mount root.
pub fn is_traversal(path: &str) -> bool {
    path.contains("../") || path.contains("..\\") || path.split(['/', '\\']).any(|segment| segment == "..")
}

fn status_for(error: &io::Error) -> u16 {
    match error.kind() {
        io::ErrorKind::NotFound => 404,
        io::ErrorKind::PermissionDenied => 403,
        _ => 500,
    }
}

struct MountAction {
    method: MountMethod,
    root: PathBuf,
    prefix: String,
    options: Arc<MountOptions>,
    handler: Arc<dyn MountHandler>,
}

impl MountAction {
    fn real_path(&self, path: &str) -> PathBuf {
        let relative = path.strip_prefix(self.prefix.as_str()).unwrap_or(path);
        self.root.join(relative.trim_start_matches(['/', '\\']))
    }

    async fn get(path: &Path, res: &mut Response) -> HandlerResult {
        let mut file = match fs::File::open(path).await {
            Ok(file) => file,
            Err(e) => return respond_io_error(res, path, &e).await,
        };
        let metadata = match file.metadata().await {
            Ok(metadata) => metadata,
            Err(e) => return respond_io_error(res, path, &e).await,
        };
        if !metadata.is_file() {
            res.send_status(404).await?;
            return Ok(());
        }

        res.try_set("Content-Type", content_type_for(path).as_ref());
        res.status(200).send_reader(&mut file, metadata.len()).await?;
        Ok(())
    }

    async fn head(path: &Path, res: &mut Response) -> HandlerResult {
        match fs::metadata(path).await {
            Ok(metadata) if metadata.is_file() => {
                res.status(200)
                    .set("Content-Length", metadata.len().to_string())
                    .try_set("Content-Type", content_type_for(path).as_ref());
                res.end().await?;
            }
            Ok(_) => res.send_status(404).await?,
            Err(e) => respond_io_error(res, path, &e).await?,
        }
        Ok(())
    }

    async fn write(path: &Path, req: &mut Request, res: &mut Response) -> HandlerResult {
        req.content_length()?;
        if req.expects_continue() {
            res.send_continue().await?;
        }

        let file = match fs::File::create(path).await {
            Ok(file) => file,
            Err(e) => return respond_io_error(res, path, &e).await,
        };
        let mut sink = StreamSink::new(file);
        let written = req.read_body(&mut sink, 0).await?;
        debug!(path = %path.display(), bytes = written, "file written");
        res.send_status(204).await?;
        Ok(())
    }

    async fn delete(path: &Path, res: &mut Response) -> HandlerResult {
        let removed = match fs::metadata(path).await {
            Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(path).await,
            Ok(_) => fs::remove_file(path).await,
            Err(e) => Err(e),
        };
        match removed {
            Ok(()) => res.send_status(204).await?,
            Err(e) => respond_io_error(res, path, &e).await?,
        }
        Ok(())
    }

    async fn options(&self, res: &mut Response) -> HandlerResult {
        res.try_set("Allow", self.options.allow_header()).try_set("Server", SERVER_NAME).status(200);
        res.end().await?;
        Ok(())
    }
}

async fn respond_io_error(res: &mut Response, path: &Path, error: &io::Error) -> HandlerResult {
    let status = status_for(error);
    if status == 500 {
        warn!(path = %path.display(), cause = %error, "mount filesystem access failed");
    } else {
        debug!(path = %path.display(), cause = %error, status, "mount filesystem access refused");
    }
    res.send_status(status).await?;
    Ok(())
}

#[async_trait]
impl RouteHandler for MountAction {
    async fn handle(&self, req: &mut Request, res: &mut Response) -> HandlerResult {
        if !self.handler.allow(req, res).await {
            if !res.has_concluded() {
                res.send_status(403).await?;
            }
            return Ok(());
        }

        if is_traversal(req.path()) {
            debug!(path = req.path(), "path traversal rejected");
            res.send_status(403).await?;
            return Ok(());
        }

        let path = self.real_path(req.path());
        match self.method {
            MountMethod::Get => Self::get(&path, res).await,
            MountMethod::Head => Self::head(&path, res).await,
            MountMethod::Put | MountMethod::Post => Self::write(&path, req, res).await,
            MountMethod::Delete => Self::delete(&path, res).await,
            MountMethod::Options => self.options(res).await,
        }
    }
}
