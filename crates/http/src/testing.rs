//! Helpers for driving connections over in-memory transports in unit tests.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use crate::connection::{Connection, ConnectionManager};
use crate::context::RequestContext;
use crate::settings::Settings;

pub(crate) fn connection_with(settings: Settings) -> (Connection, DuplexStream, Arc<ConnectionManager>) {
    let manager = ConnectionManager::new();
    let (client, server) = tokio::io::duplex(64 * 1024);
    let connection = manager.create(server, None, Arc::new(settings));
    (connection, client, manager)
}

/// Sends `raw` from the client side and binds the parsed request.
pub(crate) async fn context_for(raw: &str, settings: Settings) -> (RequestContext, DuplexStream, Arc<ConnectionManager>) {
    let (mut connection, mut client, manager) = connection_with(settings);
    client.write_all(raw.as_bytes()).await.unwrap();
    let parser = connection.read_header().await.unwrap();
    (connection.bind(parser), client, manager)
}

/// Everything the server wrote until it closed its side.
pub(crate) async fn read_to_string(client: &mut DuplexStream) -> String {
    let mut out = Vec::new();
    client.read_to_end(&mut out).await.unwrap();
    String::from_utf8(out).unwrap()
}
