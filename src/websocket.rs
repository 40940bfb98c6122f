//! WebSocket module for real-time unit state streaming
//!
//! On connect a client receives `connected` and a full `snapshot`, then
//! every `update`, `event` and `command:result` pushed by the engine.
//! Clients may send `command:execute` and `ping`.

use actix::{Actor, ActorContext, ActorFutureExt, AsyncContext, Handler, Message, StreamHandler};
use actix_web_actors::ws;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::models::WsMessage;
use crate::state::{execute_command, SharedState};

/// How often heartbeat pings are sent
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// How long before lack of client response causes a timeout
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// WebSocket session actor
pub struct WsSession {
    client_id: String,
    last_heartbeat: Instant,
    state: SharedState,
}

impl WsSession {
    pub fn new(client_id: String, state: SharedState) -> Self {
        Self {
            client_id,
            last_heartbeat: Instant::now(),
            state,
        }
    }

    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(
                    client_id = %act.client_id,
                    "WebSocket heartbeat timeout"
                );
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    /// Send the full snapshot, then forward pushes until the session stops
    fn start_push_forwarding(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let state = self.state.clone();
        let addr = ctx.address();
        let client_id = self.client_id.clone();

        actix_rt::spawn(async move {
            // Subscribe before reading the snapshot so no update falls in between
            let (mut rx, snapshot) = {
                let state = state.read().await;
                (state.subscribe(), state.snapshots())
            };
            addr.do_send(Push(WsMessage::Snapshot(snapshot)));

            loop {
                match rx.recv().await {
                    Ok(msg) => {
                        if !addr.connected() {
                            break;
                        }
                        addr.do_send(Push(msg));
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(client_id = %client_id, skipped, "Client lagging, resending snapshot");
                        let snapshot = state.read().await.snapshots();
                        addr.do_send(Push(WsMessage::Snapshot(snapshot)));
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!(client_id = %client_id, "Push forwarding stopped");
        });
    }

    fn send(ctx: &mut ws::WebsocketContext<Self>, msg: &WsMessage) {
        if let Ok(json) = serde_json::to_string(msg) {
            ctx.text(json);
        }
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(client_id = %self.client_id, "WebSocket connected");

        Self::send(
            ctx,
            &WsMessage::Connected {
                client_id: self.client_id.clone(),
            },
        );

        self.start_heartbeat(ctx);
        self.start_push_forwarding(ctx);
    }

    fn stopped(&mut self, _: &mut Self::Context) {
        info!(client_id = %self.client_id, "WebSocket disconnected");
    }
}

/// Engine message to forward to the client
#[derive(Message)]
#[rtype(result = "()")]
pub struct Push(pub WsMessage);

impl Handler<Push> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: Push, ctx: &mut Self::Context) {
        Self::send(ctx, &msg.0);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                debug!(client_id = %self.client_id, message = %text);

                match serde_json::from_str::<WsMessage>(&text) {
                    Ok(WsMessage::Ping) => {
                        self.last_heartbeat = Instant::now();
                        Self::send(ctx, &WsMessage::Pong);
                    }
                    Ok(WsMessage::CommandExecute(request)) => {
                        let state = self.state.clone();
                        let fut = async move { execute_command(&state, request).await };
                        let fut = actix::fut::wrap_future::<_, Self>(fut);

                        ctx.spawn(fut.map(|result, act, ctx| {
                            let reply = match result {
                                Ok(ack) => WsMessage::CommandAck(ack),
                                Err(e) => {
                                    warn!(client_id = %act.client_id, error = %e, "Command rejected");
                                    WsMessage::Error {
                                        message: e.to_string(),
                                    }
                                }
                            };
                            Self::send(ctx, &reply);
                        }));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(client_id = %self.client_id, error = %e);
                        Self::send(
                            ctx,
                            &WsMessage::Error {
                                message: "Invalid message format".into(),
                            },
                        );
                    }
                }
            }
            Ok(ws::Message::Close(reason)) => {
                info!(client_id = %self.client_id, reason = ?reason);
                ctx.stop();
            }
            Err(e) => {
                warn!(client_id = %self.client_id, error = %e);
                ctx.stop();
            }
            _ => {}
        }
    }
}
