//! Serves `./public` under `/files` behind HTTP Basic authentication (admin/admin).
//!
//! curl -v -u admin:admin http://127.0.0.1:8080/hello/ferris
//! curl -v -u admin:admin --compressed http://127.0.0.1:8080/numbers
//! curl -v -u admin:admin -T notes.txt http://127.0.0.1:8080/files/notes.txt

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use hearth_http::connection::ConnectionHandle;
use hearth_http::producer::StreamingProducer;
use hearth_web::encoding::EncodingProducer;
use hearth_web::router::{AllowAll, MOUNT_PRIORITY, MountMethod};
use hearth_web::session::{BasicAuthorizer, BasicSession, MemorySessionStorage, SessionControl};
use hearth_web::{HandlerError, MountOptions, Router, Server, handler_fn};
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

fn spawn_counter(push: impl Fn(String) + Send + 'static, finish: impl FnOnce() + Send + 'static) {
    tokio::spawn(async move {
        for n in 1..=10 {
            push(format!("{n}\n"));
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        finish();
    });
}

fn router() -> Result<Router, Box<dyn Error>> {
    let mut router = Router::new();

    router.get(
        "/hello/:name",
        handler_fn(|req, res| {
            async move {
                let name = req.param("name").unwrap_or_default().to_owned();
                res.status(200).send(format!("hello {name}\r\n")).await?;
                Ok(())
            }
            .boxed()
        }),
    )?;

    router.get(
        "/numbers",
        handler_fn(|req, res| {
            async move {
                let accept = req.field("Accept-Encoding").unwrap_or_default().to_owned();
                res.content_type(mime::TEXT_PLAIN_UTF_8.as_ref());

                match EncodingProducer::for_accept_encoding(&accept).map_err(HandlerError::other)? {
                    Some(producer) => {
                        let producer = Arc::new(producer);
                        let feeder = Arc::clone(&producer);
                        let closer = Arc::clone(&producer);
                        spawn_counter(
                            move |line| {
                                if let Err(e) = feeder.write(line) {
                                    warn!(cause = %e, "compression failed");
                                }
                            },
                            move || {
                                if let Err(e) = closer.finish() {
                                    warn!(cause = %e, "compression failed");
                                }
                            },
                        );
                        res.send_chunked(producer).await?;
                    }
                    None => {
                        let producer = Arc::new(StreamingProducer::new());
                        let feeder = Arc::clone(&producer);
                        let closer = Arc::clone(&producer);
                        spawn_counter(move |line| feeder.push(line), move || closer.finish());
                        res.send_chunked(producer).await?;
                    }
                }
                Ok(())
            }
            .boxed()
        }),
    )?;

    router.mount("./public", "/files", AllowAll, MountOptions::default().with(MountMethod::Put), MOUNT_PRIORITY)?;
    Ok(router)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::DEBUG).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let storage = Arc::new(MemorySessionStorage::<BasicSession>::with_idle_timeout(Duration::from_secs(600)));
    let authorizer = BasicAuthorizer::new("hearth demo", |user, password| user == "admin" && password == "admin");
    let sessions = SessionControl::new(storage, authorizer).allow_options_unauthorized(true);

    let server = Server::builder()
        .router(router()?)
        .address("127.0.0.1:8080")
        .read_timeout(Some(Duration::from_secs(5)))
        .session_control(sessions)
        .on_error(|connection, e| {
            warn!(connection = ?connection.map(ConnectionHandle::id), cause = %e, "connection error");
        })
        .on_timeout(|_req, res| {
            async move {
                if !res.has_concluded()
                    && let Err(e) = res.send_status(408).await
                {
                    warn!(cause = %e, "failed to answer timeout");
                }
            }
            .boxed()
        })
        .build()?;

    info!("serving ./public on http://127.0.0.1:8080/files");
    Arc::new(server).start().await?;
    Ok(())
}
