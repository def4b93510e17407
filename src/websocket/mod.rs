//! The relay core: the connection registry, the per-connection session
//! actor, and the `/ws` upgrade route that ties them together.

mod registry;
mod session;

pub use registry::{ConnectionRegistry, RelayPayload};
pub use session::RelaySession;

use actix_http::ws::Codec;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use tracing::{info, warn};

use crate::{AppState, AppError};

/// Payloads are opaque and unbounded on the wire; the codec's default frame
/// cap is left effectively off.
const MAX_FRAME_SIZE: usize = usize::MAX;

/// Upgrades an inbound request into a relay session.
///
/// A failed handshake gets a 400 back and never creates a session; the
/// session actor only starts once the upgrade response is on the wire.
pub async fn ws_route(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let peer_addr = req
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let mut response = match ws::handshake(&req) {
        Ok(response) => response,
        Err(e) => {
            warn!("Rejected non-websocket request from {}: {}", peer_addr, e);
            return Err(AppError::BadHandshake);
        }
    };

    info!("New WebSocket connection from: {}", peer_addr);

    let session = RelaySession::new(state.registry.clone(), peer_addr);
    Ok(response.streaming(ws::WebsocketContext::with_codec(
        session,
        stream,
        Codec::new().max_size(MAX_FRAME_SIZE),
    )))
}
