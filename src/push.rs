//! Push channel adapter.
//!
//! Maintains the single long-lived websocket to the backend and hands
//! every full-state frame to the store. Malformed frames are logged and
//! dropped; errors and closures tear the connection down and the outer
//! loop reconnects with doubling backoff, so the store at worst serves a
//! stale record until the backend returns.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::{protocol::frame::Frame, Message};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    error::{Error, Result},
    protocol::{self, NowPlaying, PushFrame},
};

/// Reconnect backoff floor.
const BACKOFF_MIN: Duration = Duration::from_secs(1);
/// Reconnect backoff ceiling.
const BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Drop messages larger than this to prevent out of memory conditions.
const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Runs the push channel until `shutdown` is cancelled.
///
/// `on_state` is invoked with every full replacement record the backend
/// pushes. Reconnects forever with doubling backoff plus subsecond jitter;
/// the backoff resets after every successful connection so a stable
/// backend is rejoined immediately.
pub async fn run<F>(url: Url, on_state: F, shutdown: CancellationToken)
where
    F: Fn(NowPlaying) + Send + Sync,
{
    let mut backoff = BACKOFF_MIN;

    loop {
        match connection(&url, &on_state, &shutdown, &mut backoff).await {
            Ok(()) => {
                // Cancelled; wind down without noise.
                debug!("push channel closed on request");
                return;
            }
            Err(e) => warn!("push channel lost: {e}"),
        }

        if shutdown.is_cancelled() {
            return;
        }

        // Jitter spreads the reconnects of a fleet of devices rebooting
        // together with their backend.
        let delay = backoff + Duration::from_millis(u64::from(fastrand::u16(0..1000)));
        info!("reconnecting push channel in {:.1}s", delay.as_secs_f32());
        tokio::select! {
            () = shutdown.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }
        backoff = (backoff * 2).min(BACKOFF_MAX);
    }
}

/// Serves one connection; returns `Ok(())` only when cancelled.
async fn connection<F>(
    url: &Url,
    on_state: &F,
    shutdown: &CancellationToken,
    backoff: &mut Duration,
) -> Result<()>
where
    F: Fn(NowPlaying) + Send + Sync,
{
    let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
    info!("push channel connected to {url}");
    *backoff = BACKOFF_MIN;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                return Ok(());
            }

            message = ws_rx.next() => {
                let Some(message) = message else {
                    return Err(Error::unavailable("push channel stream ended"));
                };

                match message? {
                    Message::Text(text) => {
                        if text.len() > MAX_MESSAGE_SIZE {
                            error!("ignoring oversized frame with {} bytes", text.len());
                            continue;
                        }
                        handle_text(&text, on_state);
                    }
                    // The backend does not ping today; answer anyway for
                    // RFC compliance.
                    Message::Ping(payload) => {
                        trace!("ping -> pong");
                        let pong = Frame::pong(payload.clone());
                        ws_tx.send(Message::Frame(pong)).await?;
                    }
                    Message::Close(payload) => {
                        return Err(Error::unavailable(format!(
                            "connection closed by server: {payload:?}"
                        )));
                    }
                    _ => trace!("ignoring non-text frame"),
                }
            }
        }
    }
}

/// Parses one text frame; only `"state"` frames carry a record.
fn handle_text<F>(text: &str, on_state: &F)
where
    F: Fn(NowPlaying),
{
    match protocol::json::<PushFrame>(text, "push") {
        Ok(frame) if frame.frame_type == PushFrame::STATE => match frame.state {
            Some(record) => on_state(record),
            None => error!("state frame without a record"),
        },
        Ok(frame) => trace!("ignoring frame type {:?}", frame.frame_type),
        // Malformed frames never terminate the connection.
        Err(e) => error!("dropping malformed frame: {e}"),
    }
}
