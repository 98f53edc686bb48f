//! The TCP service around the session state.
//!
//! One task accepts connections, one task per connection pumps frames in
//! both directions. All connection tasks share the [`Coordinator`] which
//! owns the current [`Session`] behind a mutex; every read-modify-write of
//! session state happens inside one lock scope with no suspension point, so
//! the handlers never observe a half-applied barrier.

use std::{
    collections::VecDeque,
    io,
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use futures::{SinkExt, StreamExt};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc::unbounded_channel,
};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::{
    message::{DecodeError, Message, MessageCodec},
    ClientId,
};

use super::session::{Command, Session, SessionParams};

/// The notice sent to a connection that arrives after the session is full.
pub const TURNED_AWAY: &str = "Enough clients have already connected.";

/// Owns the session state shared by all connection tasks.
///
/// When a session completes, it is replaced wholesale by a fresh [`Session`]
/// built from the next entry of the parameter schedule (or from the same
/// parameters again once the schedule is exhausted), so a finished session
/// can never leak state into the next one.
pub struct Coordinator {
    state: Mutex<State>,
}

struct State {
    session: Session,
    upcoming: VecDeque<SessionParams>,
}

impl Coordinator {
    /// A coordinator that runs every session with the same parameters.
    pub fn new(params: SessionParams) -> Self {
        Self::with_schedule(params, Vec::new())
    }

    /// A coordinator whose consecutive sessions use `first`, then each entry
    /// of `rest`; the final entry repeats once the schedule runs out.
    pub fn with_schedule(first: SessionParams, rest: Vec<SessionParams>) -> Self {
        Self {
            state: Mutex::new(State {
                session: Session::new(first),
                upcoming: rest.into(),
            }),
        }
    }

    fn admit(&self, id: ClientId, handle: super::session::ConnectionHandle) -> bool {
        let mut state = self.state.lock().unwrap();
        state.session.admit(id, handle).is_ok()
    }

    fn deregister(&self, id: &ClientId) {
        let mut state = self.state.lock().unwrap();
        state.session.remove_connection(id);
    }

    /// Applies one inbound frame to the session. Frames the session cannot
    /// accept are logged and dropped; the connection stays open.
    fn dispatch(&self, id: &ClientId, message: Message) {
        let tag = message.tag();
        let mut state = self.state.lock().unwrap();
        let result = match message {
            Message::PublicKey { public_key } => {
                state.session.handle_public_key(id, public_key)
            }
            Message::Perturbations { perturbations } => {
                state.session.handle_perturbations(id, perturbations)
            }
            Message::Value { value } => match state.session.handle_value(id, value) {
                Ok(Some(aggregate)) => {
                    info!(?aggregate, "aggregation complete, resetting for a new session");
                    let params = match state.upcoming.pop_front() {
                        Some(next) => next,
                        None => state.session.params(),
                    };
                    state.session = Session::new(params);
                    Ok(())
                }
                Ok(None) => Ok(()),
                Err(err) => Err(err),
            },
            // frames a client has no business sending
            _ => Err(super::session::ProtocolError::UnexpectedFrame(tag)),
        };
        if let Err(err) = result {
            warn!(client = %id, frame = tag, error = %err, "dropping frame");
        }
    }

    #[cfg(test)]
    pub(crate) fn with_session<T>(&self, inspect: impl FnOnce(&Session) -> T) -> T {
        inspect(&self.state.lock().unwrap().session)
    }
}

/// Accepts connections forever and spawns one handler task per connection.
pub async fn serve(coordinator: Arc<Coordinator>, listener: TcpListener) -> io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let coordinator = coordinator.clone();
        tokio::spawn(handle_connection(coordinator, stream, peer));
    }
}

/// Binds `addr` and serves on it.
pub async fn bind_and_serve(
    coordinator: Arc<Coordinator>,
    addr: impl tokio::net::ToSocketAddrs,
) -> io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "listening for clients");
    serve(coordinator, listener).await
}

async fn handle_connection(coordinator: Arc<Coordinator>, stream: TcpStream, peer: SocketAddr) {
    let id = ClientId::from(peer);
    let framed = Framed::new(stream, MessageCodec::new());
    let (mut sink, mut frames) = framed.split();
    let (handle, mut commands) = unbounded_channel();

    if !coordinator.admit(id.clone(), handle) {
        info!(client = %id, "turning away connection, the session is full");
        let _ = sink
            .send(Message::Notice {
                message: TURNED_AWAY.to_string(),
            })
            .await;
        let _ = sink.close().await;
        return;
    }
    info!(client = %id, "admitted connection");

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Deliver(message)) => {
                    if let Err(err) = sink.send(message).await {
                        warn!(client = %id, error = %err, "failed to deliver frame");
                        break;
                    }
                }
                // the session hung up on us, or was replaced and dropped
                // our queue
                Some(Command::Hangup) | None => {
                    let _ = sink.close().await;
                    break;
                }
            },
            frame = frames.next() => match frame {
                Some(Ok(message)) => coordinator.dispatch(&id, message),
                Some(Err(DecodeError::Malformed(err))) => {
                    warn!(client = %id, error = %err, "dropping malformed frame");
                }
                Some(Err(DecodeError::Io(err))) => {
                    warn!(client = %id, error = %err, "transport failure");
                    break;
                }
                None => break,
            },
        }
    }

    coordinator.deregister(&id);
    debug!(client = %id, "connection closed");
}
