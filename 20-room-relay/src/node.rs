//! TCP front-end that binds client connections to a broadcast adaptor.
//!
//! Each accepted socket becomes a [`ChannelConnection`]. Its session task
//! multiplexes requests read from the socket with events the adaptor emits
//! into the connection's outbox, writing both back as JSON lines.

use std::{future::Future, io::ErrorKind, net::SocketAddr, sync::Arc};

use anyhow::Result;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, BufReader},
    net::{TcpListener, TcpStream},
    select,
    sync::mpsc,
};
use tracing::{debug, info, warn};

use crate::{
    connection::{ChannelConnection, Connection, Emitted},
    host::BroadcastAdaptor,
    message::{ClientToServer, ServerToClient, decode_line, write_message},
};

pub struct Node {
    listener: TcpListener,
    adaptor: Arc<dyn BroadcastAdaptor>,
}

impl Node {
    pub fn new(listener: TcpListener, adaptor: Arc<dyn BroadcastAdaptor>) -> Self {
        Self { listener, adaptor }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Node { listener, adaptor } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("node shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &adaptor);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    adaptor: &Arc<dyn BroadcastAdaptor>,
) {
    match result {
        Ok((stream, peer)) => spawn_session(stream, peer, adaptor),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_session(stream: TcpStream, peer: SocketAddr, adaptor: &Arc<dyn BroadcastAdaptor>) {
    let adaptor = Arc::clone(adaptor);
    tokio::spawn(async move {
        if let Err(err) = handle_connection(stream, adaptor).await {
            warn!(peer = %peer, error = ?err, "client connection closed with error");
        }
    });
}

async fn handle_connection(stream: TcpStream, adaptor: Arc<dyn BroadcastAdaptor>) -> Result<()> {
    let peer = stream.peer_addr().ok();
    let (reader, mut writer) = stream.into_split();
    let reader = BufReader::new(reader);

    let id = nanoid::nanoid!();
    let (connection, mut outbox) = ChannelConnection::pair(id.clone());
    info!(?peer, connection = %id, "client connected");

    write_message(&mut writer, &ServerToClient::Welcome { id: id.clone() }).await?;

    let result = run_session(&*adaptor, &connection, reader, &mut writer, &mut outbox).await;
    cleanup_disconnect(&*adaptor, &connection);
    info!(?peer, connection = %id, "client disconnected");

    result
}

async fn run_session<R, W>(
    adaptor: &dyn BroadcastAdaptor,
    connection: &Arc<ChannelConnection>,
    reader: R,
    writer: &mut W,
    outbox: &mut mpsc::UnboundedReceiver<Emitted>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    // `next_line` is cancel-safe, so a partially received request survives
    // an event being written in between.
    let mut lines = reader.lines();

    loop {
        select! {
            line = lines.next_line() => {
                let reply = match line {
                    Ok(Some(line)) => match decode_line::<ClientToServer>(&line) {
                        Ok(Some(request)) => handle_request(adaptor, connection, request),
                        Ok(None) => None,
                        Err(err) => Some(error(&format!("invalid request: {err}"))),
                    },
                    Ok(None) => break,
                    // The offending line has been consumed; the next one reads cleanly.
                    Err(err) if err.kind() == ErrorKind::InvalidData => {
                        Some(error(&format!("invalid request: {err}")))
                    }
                    Err(err) => return Err(err.into()),
                };
                if let Some(reply) = reply {
                    write_message(writer, &reply).await?;
                }
            }
            emitted = outbox.recv() => {
                // The session holds a sender through `connection`, so the
                // outbox cannot close while the loop runs.
                let Some(Emitted { event, args }) = emitted else {
                    break;
                };
                let event = ServerToClient::Event { event, args };
                if let Err(err) = write_message(writer, &event).await {
                    debug!(?err, "failed to deliver event to client");
                    break;
                }
            }
        }
    }

    Ok(())
}

fn handle_request(
    adaptor: &dyn BroadcastAdaptor,
    connection: &Arc<ChannelConnection>,
    request: ClientToServer,
) -> Option<ServerToClient> {
    match request {
        ClientToServer::Join { room } => {
            if room.trim().is_empty() {
                return Some(error("room name cannot be empty"));
            }
            connection.mark_joined(&room);
            adaptor.join(&room, Arc::clone(connection) as Arc<dyn Connection>);
            Some(ServerToClient::Joined { room })
        }
        ClientToServer::Leave { room } => {
            connection.mark_left(&room);
            adaptor.leave(&room, connection.as_ref());
            Some(ServerToClient::Left { room })
        }
        ClientToServer::Send { room, event, args } => {
            if event.is_empty() {
                return Some(error("event name cannot be empty"));
            }
            adaptor.broadcast(None, &room, &event, args);
            None
        }
        ClientToServer::Rooms => Some(ServerToClient::Rooms {
            rooms: adaptor.rooms(Some(connection.as_ref() as &dyn Connection)),
        }),
        ClientToServer::Count { room } => Some(ServerToClient::Count {
            count: adaptor.member_count(&room),
            room,
        }),
    }
}

fn cleanup_disconnect(adaptor: &dyn BroadcastAdaptor, connection: &ChannelConnection) {
    for room in connection.take_rooms() {
        adaptor.leave(&room, connection);
    }
}

fn error(message: &str) -> ServerToClient {
    ServerToClient::Error {
        message: message.to_string(),
    }
}
