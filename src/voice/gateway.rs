use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
    time::Duration,
};

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::{net::UdpSocket, sync::mpsc};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    VoiceCredentials,
    udp::{SUPPORTED_MODES, UdpBackend, discover_ip, speak_loop},
};
use crate::common::{
    errors::{PlayerError, PlayerResult},
    types::{GuildId, UserId},
    utils::now_ms,
};

/// Discord voice gateway version used in the WebSocket URL.
pub const VOICE_GATEWAY_VERSION: u8 = 8;

#[derive(Serialize, Deserialize, Debug)]
pub struct VoiceGatewayMessage {
    pub op: u8,
    pub d: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<i64>,
}

impl VoiceGatewayMessage {
    fn new(op: u8, d: Value) -> Self {
        Self { op, d, seq: None }
    }
}

/// One voice gateway session. Lives until the socket closes or `cancel`
/// fires; either way the frame receiver is dropped so senders notice.
pub struct VoiceGateway {
    guild_id: GuildId,
    user_id: UserId,
    credentials: VoiceCredentials,
    cancel: CancellationToken,
}

struct Ready {
    ssrc: u32,
    addr: SocketAddr,
    mode: String,
}

impl VoiceGateway {
    pub fn new(
        guild_id: GuildId,
        user_id: UserId,
        credentials: VoiceCredentials,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            guild_id,
            user_id,
            credentials,
            cancel,
        }
    }

    /// Runs the session. `on_ready` fires once audio can flow.
    pub async fn run(
        self,
        frames: flume::Receiver<Vec<u8>>,
        on_ready: tokio::sync::oneshot::Sender<()>,
    ) -> PlayerResult<()> {
        let endpoint = self.credentials.endpoint.trim_start_matches("wss://");
        let url = format!("wss://{}/?v={}", endpoint, VOICE_GATEWAY_VERSION);
        debug!(guild_id = %self.guild_id, "Connecting to voice gateway: {}", url);

        let (ws_stream, _) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| PlayerError::VoiceJoin(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        send_json(&tx, self.identify_message());

        let cancel = self.cancel.clone();
        let guild_id = self.guild_id;
        let write_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    msg = rx.recv() => {
                        let Some(msg) = msg else { break };
                        if let Err(e) = write.send(msg).await {
                            warn!(%guild_id, "Voice WS write error: {}", e);
                            break;
                        }
                    }
                }
            }
            let _ = write.close().await;
        });

        let socket = Arc::new(UdpSocket::bind("0.0.0.0:0").await?);
        let seq_ack = Arc::new(AtomicI64::new(-1));
        let mut heartbeat: Option<tokio::task::JoinHandle<()>> = None;
        let mut ready: Option<Ready> = None;
        let mut frames = Some(frames);
        let mut on_ready = Some(on_ready);

        let result = loop {
            let msg = tokio::select! {
                _ = self.cancel.cancelled() => break Ok(()),
                msg = read.next() => msg,
            };

            let text = match msg {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|cf| (u16::from(cf.code), cf.reason.to_string()))
                        .unwrap_or((1000, "No reason".to_string()));
                    info!(%guild_id, code, %reason, "Voice WS closed");
                    break Ok(());
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => break Err(PlayerError::VoiceJoin(e.to_string())),
                None => break Ok(()),
            };

            let msg: VoiceGatewayMessage = match serde_json::from_str(text.as_str()) {
                Ok(m) => m,
                Err(e) => {
                    warn!(%guild_id, "Failed to parse voice gateway message: {}", e);
                    continue;
                }
            };
            if let Some(seq) = msg.seq {
                seq_ack.store(seq, Ordering::Relaxed);
            }

            match msg.op {
                // hello
                8 => {
                    let interval = msg.d["heartbeat_interval"].as_f64().unwrap_or(30_000.0);
                    if let Some(h) = heartbeat.take() {
                        h.abort();
                    }
                    heartbeat = Some(spawn_heartbeat(
                        tx.clone(),
                        seq_ack.clone(),
                        Duration::from_millis(interval as u64),
                    ));
                }
                // ready
                2 => {
                    let parsed = match parse_ready(&msg.d) {
                        Some(r) => r,
                        None => break Err(PlayerError::VoiceJoin("malformed ready".to_string())),
                    };
                    let (ip, port) = match discover_ip(&socket, parsed.addr, parsed.ssrc).await {
                        Ok(found) => found,
                        Err(e) => break Err(e),
                    };
                    debug!(%guild_id, ssrc = parsed.ssrc, mode = %parsed.mode, "Voice ready");
                    send_json(
                        &tx,
                        VoiceGatewayMessage::new(
                            1,
                            json!({
                                "protocol": "udp",
                                "data": { "address": ip, "port": port, "mode": parsed.mode }
                            }),
                        ),
                    );
                    ready = Some(parsed);
                }
                // session description
                4 => {
                    let (Some(r), Some(key)) = (ready.as_ref(), parse_secret_key(&msg.d)) else {
                        break Err(PlayerError::VoiceJoin(
                            "session description before ready or without key".to_string(),
                        ));
                    };
                    let mode = msg.d["mode"].as_str().unwrap_or(&r.mode).to_string();

                    if let Some(frames) = frames.take() {
                        let udp = UdpBackend::new(socket.clone(), r.addr, r.ssrc, key, &mode);
                        tokio::spawn(speak_loop(udp, frames, self.cancel.clone()));
                    }
                    send_json(
                        &tx,
                        VoiceGatewayMessage::new(5, json!({"speaking": 1, "delay": 0, "ssrc": r.ssrc})),
                    );
                    if let Some(on_ready) = on_ready.take() {
                        let _ = on_ready.send(());
                    }
                    info!(%guild_id, %mode, "Voice connection established");
                }
                // heartbeat ack, resumed, clients connect/disconnect
                6 | 9 | 11 | 13 => {}
                op => debug!(%guild_id, op, "Ignoring voice op"),
            }
        };

        if let Some(h) = heartbeat {
            h.abort();
        }
        self.cancel.cancel();
        drop(tx);
        let _ = tokio::time::timeout(Duration::from_millis(500), write_task).await;
        result
    }

    fn identify_message(&self) -> VoiceGatewayMessage {
        VoiceGatewayMessage::new(
            0,
            json!({
                "server_id": self.guild_id,
                "user_id": self.user_id,
                "session_id": self.credentials.session_id,
                "token": self.credentials.token,
            }),
        )
    }
}

fn send_json(tx: &mpsc::UnboundedSender<Message>, msg: VoiceGatewayMessage) {
    if let Ok(json) = serde_json::to_string(&msg) {
        let _ = tx.send(Message::Text(json.into()));
    }
}

fn spawn_heartbeat(
    tx: mpsc::UnboundedSender<Message>,
    seq_ack: Arc<AtomicI64>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let hb = VoiceGatewayMessage::new(
                3,
                json!({ "t": now_ms(), "seq_ack": seq_ack.load(Ordering::Relaxed) }),
            );
            let Ok(json) = serde_json::to_string(&hb) else {
                continue;
            };
            if tx.send(Message::Text(json.into())).is_err() {
                break;
            }
        }
    })
}

fn parse_ready(d: &Value) -> Option<Ready> {
    let ssrc = u32::try_from(d["ssrc"].as_u64()?).ok()?;
    let ip = d["ip"].as_str()?;
    let port = u16::try_from(d["port"].as_u64()?).ok()?;
    let addr = format!("{}:{}", ip, port).parse().ok()?;

    let offered: Vec<&str> = d["modes"]
        .as_array()
        .map(|m| m.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();
    let mode = SUPPORTED_MODES
        .iter()
        .find(|m| offered.contains(*m))
        .unwrap_or(&SUPPORTED_MODES[1])
        .to_string();

    Some(Ready { ssrc, addr, mode })
}

fn parse_secret_key(d: &Value) -> Option<[u8; 32]> {
    let values = d["secret_key"].as_array()?;
    if values.len() < 32 {
        return None;
    }
    let mut key = [0u8; 32];
    for (slot, v) in key.iter_mut().zip(values) {
        *slot = u8::try_from(v.as_u64()?).ok()?;
    }
    Some(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_prefers_aes_gcm() {
        let ready = parse_ready(&json!({
            "ssrc": 42,
            "ip": "127.0.0.1",
            "port": 50001,
            "modes": ["xsalsa20_poly1305", "aead_aes256_gcm_rtpsize"]
        }))
        .unwrap();
        assert_eq!(ready.ssrc, 42);
        assert_eq!(ready.addr.port(), 50001);
        assert_eq!(ready.mode, "aead_aes256_gcm_rtpsize");
    }

    #[test]
    fn test_ready_rejects_bad_address() {
        assert!(parse_ready(&json!({ "ssrc": 1, "ip": "nope", "port": 1 })).is_none());
    }

    #[test]
    fn test_secret_key() {
        let key: Vec<u8> = (0..32).collect();
        assert_eq!(
            parse_secret_key(&json!({ "secret_key": key })).map(|k| k[31]),
            Some(31)
        );
        assert!(parse_secret_key(&json!({ "secret_key": [1, 2, 3] })).is_none());
    }

    #[test]
    fn test_message_seq_is_optional() {
        let msg: VoiceGatewayMessage =
            serde_json::from_str(r#"{"op":8,"d":{"heartbeat_interval":13750.0}}"#).unwrap();
        assert_eq!(msg.op, 8);
        assert_eq!(msg.seq, None);
        assert_eq!(
            serde_json::to_string(&VoiceGatewayMessage::new(3, json!(1))).unwrap(),
            r#"{"op":3,"d":1}"#
        );
    }
}
