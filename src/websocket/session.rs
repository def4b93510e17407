use std::sync::Arc;

use actix::{Actor, ActorContext, AsyncContext, Handler, StreamHandler};
use actix_http::ws::Item;
use actix_web::web::Bytes;
use actix_web_actors::ws;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::websocket::{ConnectionRegistry, RelayPayload};

/// Owns the lifecycle of exactly one client connection, from a successful
/// upgrade to termination. Registers with the registry on start, relays every
/// inbound frame to it, and unregisters when the actor stops. Every exit path
/// goes through `stopped`, which releases the connection exactly once.
pub struct RelaySession {
    id: Uuid,
    registry: Arc<ConnectionRegistry>,
    peer_addr: String,
    fragments: FragmentBuffer,
}

impl RelaySession {
    pub fn new(registry: Arc<ConnectionRegistry>, peer_addr: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            registry,
            peer_addr,
            fragments: FragmentBuffer::default(),
        }
    }
}

impl Actor for RelaySession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(
            "WebSocket connection established with {} (id: {})",
            self.peer_addr, self.id
        );

        // Broadcasts land on this channel; the mailbox drains it into
        // Handler<RelayPayload> below. Once the actor stops the receiver is
        // dropped and any later registry write to this id fails, evicting it.
        let (tx, rx) = mpsc::unbounded_channel();
        self.registry.register(self.id, tx);
        ctx.add_message_stream(UnboundedReceiverStream::new(rx));
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.registry.unregister(&self.id);
        info!(
            "WebSocket connection closed with {} (id: {})",
            self.peer_addr, self.id
        );
    }
}

/// Outbound half: frames fanned out by the registry are written to the socket.
impl Handler<RelayPayload> for RelaySession {
    type Result = ();

    fn handle(&mut self, msg: RelayPayload, ctx: &mut Self::Context) {
        match msg {
            RelayPayload::Text(text) => ctx.text(text),
            RelayPayload::Binary(bytes) => ctx.binary(bytes),
        }
    }
}

/// Inbound half: the read loop. Every successful read is forwarded to the
/// registry's broadcast; any read failure is terminal for this session only.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for RelaySession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                let text = text.to_string();
                info!("Message from {}: {}", self.peer_addr, text);
                self.registry.broadcast_all(RelayPayload::Text(text));
            }
            Ok(ws::Message::Binary(bytes)) => {
                debug!(
                    "Binary message from {} ({} bytes)",
                    self.peer_addr,
                    bytes.len()
                );
                self.registry.broadcast_all(RelayPayload::Binary(bytes));
            }
            Ok(ws::Message::Continuation(item)) => match self.fragments.push(item) {
                Ok(Some(payload)) => {
                    debug!("Reassembled fragmented message from {}", self.peer_addr);
                    self.registry.broadcast_all(payload);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Bad continuation frame from {}: {:?}", self.peer_addr, e);
                    ctx.stop();
                }
            },
            Ok(ws::Message::Ping(payload)) => {
                ctx.pong(&payload);
            }
            Ok(ws::Message::Pong(_)) | Ok(ws::Message::Nop) => {}
            Ok(ws::Message::Close(reason)) => {
                info!("WebSocket closed from {}: {:?}", self.peer_addr, reason);
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                error!(
                    "Error reading WebSocket message from {}: {}",
                    self.peer_addr, e
                );
                ctx.stop();
            }
        }
    }
}

#[derive(Debug, PartialEq)]
enum FragmentError {
    OutOfOrder,
    InvalidUtf8,
}

#[derive(Clone, Copy)]
enum FragmentKind {
    Text,
    Binary,
}

/// Reassembles a fragmented message. Frames of one message arrive in order
/// on a single connection; the buffer yields the whole payload on the final
/// frame and is then ready for the next message.
#[derive(Default)]
struct FragmentBuffer {
    kind: Option<FragmentKind>,
    buf: Vec<u8>,
}

impl FragmentBuffer {
    fn push(&mut self, item: Item) -> Result<Option<RelayPayload>, FragmentError> {
        match item {
            Item::FirstText(bytes) => {
                if self.kind.is_some() {
                    return Err(FragmentError::OutOfOrder);
                }
                self.kind = Some(FragmentKind::Text);
                self.buf.extend_from_slice(&bytes);
                Ok(None)
            }
            Item::FirstBinary(bytes) => {
                if self.kind.is_some() {
                    return Err(FragmentError::OutOfOrder);
                }
                self.kind = Some(FragmentKind::Binary);
                self.buf.extend_from_slice(&bytes);
                Ok(None)
            }
            Item::Continue(bytes) => {
                if self.kind.is_none() {
                    return Err(FragmentError::OutOfOrder);
                }
                self.buf.extend_from_slice(&bytes);
                Ok(None)
            }
            Item::Last(bytes) => {
                let kind = self.kind.take().ok_or(FragmentError::OutOfOrder)?;
                self.buf.extend_from_slice(&bytes);
                let buf = std::mem::take(&mut self.buf);
                match kind {
                    FragmentKind::Text => String::from_utf8(buf)
                        .map(|text| Some(RelayPayload::Text(text)))
                        .map_err(|_| FragmentError::InvalidUtf8),
                    FragmentKind::Binary => Ok(Some(RelayPayload::Binary(Bytes::from(buf)))),
                }
            }
        }
    }
}
