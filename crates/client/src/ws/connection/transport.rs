//! Native WebSocket transport using tokio-tungstenite.
//!
//! Runs on the session's `LocalSet` and is the only owner of the socket.
//! It executes [`TransportOp`]s queued by the state machine and reports
//! socket events back into it.

use std::future::{pending, Future};
use std::pin::Pin;
use std::rc::Weak;
use std::time::Duration;

use chrono::Utc;
use futures_channel::mpsc::UnboundedReceiver;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::{CloseCause, Connection, ConnectionAction, TransportOp};
use crate::ws::manager::Shared;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Opening = Pin<Box<dyn Future<Output = Result<Socket, CloseCause>>>>;

/// Drives the socket, the reconnect delay and the countdown tick for one
/// [`RoomClient`](crate::RoomClient). Spawn [`run`](Self::run) with
/// `tokio::task::spawn_local`.
pub struct TransportLoop {
    shared: Weak<Shared>,
    ops: UnboundedReceiver<TransportOp>,
    tick_interval: Duration,
}

impl TransportLoop {
    pub(crate) fn new(
        shared: Weak<Shared>,
        ops: UnboundedReceiver<TransportOp>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            shared,
            ops,
            tick_interval,
        }
    }

    #[cfg(test)]
    pub(crate) fn ops_mut(&mut self) -> &mut UnboundedReceiver<TransportOp> {
        &mut self.ops
    }

    pub async fn run(self) {
        let TransportLoop {
            shared,
            mut ops,
            tick_interval,
        } = self;

        let mut socket: Option<Socket> = None;
        let mut opening: Option<Opening> = None;
        let mut reconnect: Option<Pin<Box<Sleep>>> = None;
        let mut ticker: Option<Interval> = None;

        loop {
            // Only tick while a countdown is running.
            let Some(client) = shared.upgrade() else {
                break;
            };
            match (client.timer_running(), ticker.is_some()) {
                (true, false) => {
                    let mut interval =
                        tokio::time::interval_at(Instant::now() + tick_interval, tick_interval);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    ticker = Some(interval);
                }
                (false, true) => ticker = None,
                _ => {}
            }
            drop(client);

            tokio::select! {
                op = ops.next() => {
                    let Some(op) = op else {
                        break;
                    };
                    execute(op, &shared, &mut socket, &mut opening, &mut reconnect).await;
                }
                result = until_open(&mut opening) => {
                    opening = None;
                    match result {
                        Ok(ws) => {
                            socket = Some(ws);
                            notify(&shared, Connection::on_open);
                        }
                        Err(cause) => {
                            tracing::warn!(?cause, "Failed to open room connection");
                            notify(&shared, |c| c.on_close(cause));
                        }
                    }
                }
                message = next_message(&mut socket) => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            notify(&shared, |c| c.on_frame(text.as_str()));
                        }
                        Some(Ok(Message::Close(frame))) => {
                            socket = None;
                            let cause = match frame {
                                Some(frame) => {
                                    tracing::info!(code = u16::from(frame.code), reason = frame.reason.as_str(), "Server closed the socket");
                                    CloseCause::from_close_code(Some(u16::from(frame.code)), frame.reason.as_str())
                                }
                                None => CloseCause::from_close_code(None, "closed without a status"),
                            };
                            notify(&shared, |c| c.on_close(cause));
                        }
                        Some(Ok(Message::Binary(_))) => {
                            tracing::debug!("Ignoring binary frame");
                        }
                        Some(Ok(_)) => {
                            // Ping/pong are answered by tungstenite
                        }
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "WebSocket read error");
                            socket = None;
                            notify(&shared, |c| c.on_close(CloseCause::Abnormal { code: None, reason: e.to_string() }));
                        }
                        None => {
                            socket = None;
                            notify(&shared, |c| c.on_close(CloseCause::Abnormal { code: None, reason: "connection reset".to_string() }));
                        }
                    }
                }
                _ = until_elapsed(&mut reconnect) => {
                    reconnect = None;
                    notify(&shared, Connection::on_reconnect_due);
                }
                _ = next_tick(&mut ticker) => {
                    if let Some(client) = shared.upgrade() {
                        client.tick(Utc::now());
                    }
                }
            }
        }

        if let Some(mut ws) = socket {
            let _ = ws.close(None).await;
        }
        tracing::debug!("Transport loop stopped");
    }
}

async fn execute(
    op: TransportOp,
    shared: &Weak<Shared>,
    socket: &mut Option<Socket>,
    opening: &mut Option<Opening>,
    reconnect: &mut Option<Pin<Box<Sleep>>>,
) {
    match op {
        TransportOp::Open { url } => {
            if let Some(mut stale) = socket.take() {
                let _ = stale.close(None).await;
            }
            let future: Opening = Box::pin(open(url));
            *opening = Some(future);
        }
        TransportOp::Send(frame) => {
            let Some(ws) = socket.as_mut() else {
                tracing::warn!("Dropping outbound frame, socket not open");
                return;
            };
            if let Err(e) = ws.send(Message::Text(frame.into())).await {
                tracing::warn!(error = %e, "Send failed");
                *socket = None;
                notify(shared, |c| {
                    c.on_close(CloseCause::Abnormal {
                        code: None,
                        reason: e.to_string(),
                    })
                });
            }
        }
        TransportOp::Close { code, reason } => {
            *opening = None;
            if let Some(mut ws) = socket.take() {
                let frame = CloseFrame {
                    code: CloseCode::from(code),
                    reason: reason.into(),
                };
                if let Err(e) = ws.close(Some(frame)).await {
                    tracing::debug!(error = %e, "Close handshake failed");
                }
            }
            notify(shared, |c| c.on_close(CloseCause::Normal));
        }
        TransportOp::ScheduleReconnect { attempt, delay } => {
            tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "Reconnect timer armed");
            *reconnect = Some(Box::pin(tokio::time::sleep(delay)));
        }
        TransportOp::CancelReconnect => *reconnect = None,
    }
}

async fn open(url: String) -> Result<Socket, CloseCause> {
    match connect_async(url.as_str()).await {
        Ok((socket, _response)) => Ok(socket),
        Err(WsError::Http(response)) => {
            Err(CloseCause::from_handshake_status(response.status().as_u16()))
        }
        Err(e) => Err(CloseCause::Abnormal {
            code: None,
            reason: e.to_string(),
        }),
    }
}

fn notify(shared: &Weak<Shared>, f: impl FnOnce(&mut Connection) -> Vec<ConnectionAction>) {
    if let Some(client) = shared.upgrade() {
        client.step(f);
    }
}

async fn until_open(opening: &mut Option<Opening>) -> Result<Socket, CloseCause> {
    match opening {
        Some(future) => future.as_mut().await,
        None => pending().await,
    }
}

async fn next_message(socket: &mut Option<Socket>) -> Option<Result<Message, WsError>> {
    match socket {
        Some(ws) => ws.next().await,
        None => pending().await,
    }
}

async fn until_elapsed(sleep: &mut Option<Pin<Box<Sleep>>>) {
    match sleep {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}
