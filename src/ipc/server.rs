//! IPC Server - Unix socket server for the host
//!
//! Each connection reads newline-delimited requests and answers them
//! concurrently, so a `cancel` can overtake the `openDocument` it targets.
//! Replies go through a single writer task per connection. Change
//! notifications are forwarded only for listings the connection was handed
//! a loading cursor for.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::ipc::protocol::{parse_request, serialize_reply, Command, Reply, Response, PROTOCOL_VERSION};
use crate::provider::{ChangeNotification, DocumentProvider, ProviderError};

/// IPC Server that listens for host requests
pub struct IpcServer {
    provider: DocumentProvider,
    socket_path: PathBuf,
    /// Socket listener
    listener: Option<UnixListener>,
    /// Active connections counter
    connection_count: Arc<RwLock<u32>>,
}

impl IpcServer {
    /// Create a new IPC server
    pub fn new(provider: DocumentProvider, socket_path: PathBuf) -> Self {
        Self {
            provider,
            socket_path,
            listener: None,
            connection_count: Arc::new(RwLock::new(0)),
        }
    }

    /// Start the IPC server
    pub async fn start(&mut self) -> Result<()> {
        // Clean up any existing socket file
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)
                .context("Failed to remove existing socket file")?;
        }
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create socket directory")?;
        }

        let listener = UnixListener::bind(&self.socket_path)
            .context("Failed to bind Unix socket")?;

        info!(socket_path = %self.socket_path.display(), "IPC server started");

        self.listener = Some(listener);
        Ok(())
    }

    /// Run the server loop, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("Server not started")?;

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let provider = self.provider.clone();
                    let connection_count = Arc::clone(&self.connection_count);

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, provider, connection_count).await {
                            error!(error = %e, "Connection handler error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    /// Stop the IPC server and clean up
    pub async fn stop(&self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).context("Failed to remove socket file")?;
        }
        info!("IPC server stopped");
        Ok(())
    }
}

/// Per-connection state shared by the request tasks
struct Session {
    provider: DocumentProvider,
    replies: mpsc::UnboundedSender<Reply>,
    /// Listings this connection awaits a change notification for, with the
    /// number of cursors handed out for each
    watched: Mutex<HashMap<String, usize>>,
    /// Cancellable opens by request id
    opens: Mutex<HashMap<String, CancellationToken>>,
    /// Cancelled when the connection goes away
    closed: CancellationToken,
}

impl Session {
    fn send(&self, reply: Reply) {
        // The writer only goes away with the connection
        let _ = self.replies.send(reply);
    }

    fn watch(&self, document_id: &str) {
        let mut watched = self.watched.lock().unwrap_or_else(|p| p.into_inner());
        *watched.entry(document_id.to_string()).or_insert(0) += 1;
    }

    fn unwatch(&self, document_id: &str) {
        let mut watched = self.watched.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(count) = watched.get_mut(document_id) {
            *count -= 1;
            if *count == 0 {
                watched.remove(document_id);
            }
        }
    }

    /// Consume the subscription for `document_id`, if any
    fn take_watch(&self, document_id: &str) -> bool {
        let mut watched = self.watched.lock().unwrap_or_else(|p| p.into_inner());
        watched.remove(document_id).is_some()
    }

    fn register_open(&self, request_id: &str, token: CancellationToken) {
        let mut opens = self.opens.lock().unwrap_or_else(|p| p.into_inner());
        if opens.insert(request_id.to_string(), token).is_some() {
            warn!(request_id = %request_id, "Request id reused, earlier open is no longer cancellable");
        }
    }

    fn finish_open(&self, request_id: &str) {
        let mut opens = self.opens.lock().unwrap_or_else(|p| p.into_inner());
        opens.remove(request_id);
    }

    fn cancel_open(&self, request_id: &str) -> bool {
        let opens = self.opens.lock().unwrap_or_else(|p| p.into_inner());
        match opens.get(request_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Handle a single client connection
async fn handle_connection(
    stream: UnixStream,
    provider: DocumentProvider,
    connection_count: Arc<RwLock<u32>>,
) -> Result<()> {
    {
        let mut count = connection_count.write().await;
        *count += 1;
        debug!(count = *count, "New connection");
    }

    let (reader, writer) = stream.into_split();
    let (replies, reply_rx) = mpsc::unbounded_channel();
    tokio::spawn(write_replies(writer, reply_rx));

    // Subscribe before the first query so no refresh can finish unseen
    let notifications = provider.subscribe();
    let session = Arc::new(Session {
        provider,
        replies,
        watched: Mutex::new(HashMap::new()),
        opens: Mutex::new(HashMap::new()),
        closed: CancellationToken::new(),
    });
    tokio::spawn(forward_notifications(Arc::clone(&session), notifications));

    let mut buf_reader = BufReader::new(reader);
    let mut line = String::new();

    // Read requests line by line (newline-delimited JSON)
    loop {
        line.clear();
        match buf_reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("Connection closed by client");
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                debug!(request = %trimmed, "Received request");

                match parse_request(trimmed.as_bytes()) {
                    Ok(request) => {
                        let session = Arc::clone(&session);
                        tokio::spawn(async move {
                            let response = process_command(request.command, &session).await;
                            session.send(Reply::to(request.id, response));
                        });
                    }
                    Err(e) => {
                        error!(error = %e, request = %trimmed, "Failed to parse request");
                        session.send(Reply::to(
                            None,
                            Response::Error {
                                kind: "invalidRequest".to_string(),
                                error: format!("Invalid request: {}", e),
                            },
                        ));
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to read from socket");
                break;
            }
        }
    }

    // Cancels in-flight opens and stops the notification forwarder
    session.closed.cancel();

    {
        let mut count = connection_count.write().await;
        *count = count.saturating_sub(1);
        debug!(count = *count, "Connection ended");
    }

    Ok(())
}

async fn write_replies(mut writer: OwnedWriteHalf, mut replies: mpsc::UnboundedReceiver<Reply>) {
    while let Some(reply) = replies.recv().await {
        match serialize_reply(&reply) {
            Ok(json) => {
                if let Err(e) = writer.write_all(&json).await {
                    debug!(error = %e, "Failed to write reply, dropping connection");
                    break;
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to serialize reply");
            }
        }
    }
}

async fn forward_notifications(
    session: Arc<Session>,
    mut notifications: broadcast::Receiver<ChangeNotification>,
) {
    loop {
        tokio::select! {
            _ = session.closed.cancelled() => break,
            received = notifications.recv() => match received {
                Ok(notification) => {
                    if session.take_watch(&notification.document_id) {
                        debug!(document_id = %notification.document_id, "Forwarding change notification");
                        session.send(Reply::changed(notification));
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "Change notifications dropped for slow connection");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
}

/// Process a command and return a response
async fn process_command(command: Command, session: &Session) -> Response {
    let provider = &session.provider;

    match command {
        Command::ListRoots => Response::Roots {
            roots: provider.list_roots(),
        },

        Command::QueryDocument {
            document_id,
            projection,
        } => match provider.query_document(&document_id, &projection) {
            Ok(cursor) => Response::Cursor(cursor),
            Err(e) => e.into(),
        },

        Command::QueryChildDocuments {
            parent_document_id,
            projection,
        } => {
            // Registered up front: the refresh may finish before we return
            session.watch(&parent_document_id);
            match provider.query_child_documents(&parent_document_id, &projection) {
                Ok(cursor) => {
                    if cursor.notification_id.is_none() {
                        session.unwatch(&parent_document_id);
                    }
                    Response::Cursor(cursor)
                }
                Err(e) => {
                    session.unwatch(&parent_document_id);
                    e.into()
                }
            }
        }

        Command::OpenDocument {
            document_id,
            mode,
            request_id,
        } => {
            info!(document_id = %document_id, mode = %mode, "Processing openDocument");

            let token = session.closed.child_token();
            if let Some(request_id) = &request_id {
                session.register_open(request_id, token.clone());
            }

            let result = provider.open_document(&document_id, &mode, token).await;

            if let Some(request_id) = &request_id {
                session.finish_open(request_id);
            }

            match result {
                Ok(opened) => match opened.file.metadata().await {
                    Ok(metadata) => Response::Opened {
                        path: opened.path.to_string_lossy().to_string(),
                        size: metadata.len(),
                    },
                    Err(e) => ProviderError::from(e).into(),
                },
                Err(e) => {
                    warn!(document_id = %document_id, error = %e, "openDocument failed");
                    e.into()
                }
            }
        }

        Command::Cancel { request_id } => {
            let found = session.cancel_open(&request_id);
            debug!(request_id = %request_id, found = found, "Processing cancel");
            Response::Bool { value: found }
        }

        Command::IsChildDocument {
            parent_document_id,
            document_id,
        } => Response::Bool {
            value: provider.is_child_document(&parent_document_id, &document_id),
        },

        Command::TestConnection { account } => match provider.test_connection(&account).await {
            Ok(reachable) => Response::Bool { value: reachable },
            Err(e) => e.into(),
        },

        Command::GetStatus => {
            debug!("Processing getStatus command");

            let (hits, misses, hit_rate) = provider.directory_stats();
            Response::Status {
                version: PROTOCOL_VERSION,
                healthy: true,
                in_flight: provider.in_flight(),
                directory_hits: hits,
                directory_misses: misses,
                directory_hit_rate: hit_rate,
            }
        }
    }
}
