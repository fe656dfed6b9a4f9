//! Framed request/response server for `GetConfig`.

use std::sync::Arc;

use logflume_proto::framing::MessageStream;
use logflume_proto::ConfigRequest;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::document::DocumentStore;

/// Accepts connections until cancelled, answering `GetConfig` requests.
pub async fn serve(
    listener: TcpListener,
    store: Arc<DocumentStore>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                debug!(%peer, "config client connected");
                let store = Arc::clone(&store);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(stream, store, cancel).await {
                        debug!(%peer, %err, "config connection ended with error");
                    }
                });
            }
            () = cancel.cancelled() => {
                debug!("config server shutting down");
                return Ok(());
            }
        }
    }
}

/// Answers requests on one connection until the peer closes or shutdown.
///
/// Agents send one request per connection, but the loop tolerates clients
/// that keep the connection open for repeated polls.
async fn handle_connection(
    stream: TcpStream,
    store: Arc<DocumentStore>,
    cancel: CancellationToken,
) -> Result<(), logflume_proto::framing::WireError> {
    let mut channel = MessageStream::new(stream);

    loop {
        let request: ConfigRequest = tokio::select! {
            received = channel.recv() => {
                match received? {
                    Some(request) => request,
                    None => return Ok(()),
                }
            }
            () = cancel.cancelled() => return Ok(()),
        };

        let response = store.respond(&request.current_version);
        if response.payload.is_empty() {
            debug!(
                agent_id = %request.agent_id,
                version = %response.version,
                "agent already current"
            );
        } else {
            debug!(
                agent_id = %request.agent_id,
                version = %response.version,
                bytes = response.payload.len(),
                "serving full config payload"
            );
        }
        if let Err(err) = channel.send(&response).await {
            warn!(agent_id = %request.agent_id, %err, "failed to send config response");
            return Err(err);
        }
    }
}
