//! Routing, static file mounts and cookie sessions on top of `hearth-http`.
//!
//! A [`Server`] accepts connections, parses one request per connection and hands it
//! to the best matching route of its [`Router`]. Between matching and the handler
//! an optional session middleware ([`session::SessionControl`]) decides whether the
//! request may proceed.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use futures::FutureExt;
//! use hearth_web::{Router, Server, handler_fn};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut router = Router::new();
//!     router.get(
//!         "/hello/:name",
//!         handler_fn(|req, res| {
//!             async move {
//!                 let name = req.param("name").unwrap_or_default().to_owned();
//!                 res.send(format!("hello {name}")).await?;
//!                 Ok(())
//!             }
//!             .boxed()
//!         }),
//!     )?;
//!     router.mount_dir("./public", "/static")?;
//!
//!     let server = Server::builder().router(router).address("127.0.0.1:8080").build()?;
//!     Arc::new(server).start().await?;
//!     Ok(())
//! }
//! ```

mod handler;
mod server;

pub mod encoding;
pub mod router;
pub mod session;

pub use handler::FnHandler;
pub use handler::HandlerError;
pub use handler::HandlerResult;
pub use handler::RouteHandler;
pub use handler::handler_fn;
pub use router::MatchLevel;
pub use router::MountOptions;
pub use router::RouteError;
pub use router::Router;
pub use server::ErrorHook;
pub use server::Server;
pub use server::ServerBuildError;
pub use server::ServerBuilder;
pub use server::TimeoutHook;

pub use hearth_http::Settings;
pub use hearth_http::protocol::{Cookie, SameSite};
pub use hearth_http::request::Request;
pub use hearth_http::response::Response;
