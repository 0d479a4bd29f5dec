use std::{net::SocketAddr, sync::Arc, time::Duration};

use aes_gcm::{
    Aes256Gcm,
    aead::{AeadInPlace, KeyInit},
};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use xsalsa20poly1305::XSalsa20Poly1305;

use crate::common::errors::{PlayerError, PlayerResult};

pub const RTP_VERSION_BYTE: u8 = 0x80;
pub const RTP_OPUS_PAYLOAD_TYPE: u8 = 0x78;
/// Samples per 20 ms frame at 48 kHz.
pub const RTP_TIMESTAMP_STEP: u32 = 960;
pub const FRAME_INTERVAL: Duration = Duration::from_millis(20);

const DISCOVERY_PACKET_SIZE: usize = 74;
const IP_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(2);
const UDP_PACKET_BUF_CAPACITY: usize = 1500;

/// Sent a few times after audio stops so clients do not interpolate.
pub const SILENCE_FRAME: [u8; 3] = [0xf8, 0xff, 0xfe];
const MAX_SILENCE_FRAMES: u32 = 5;

/// Encryption modes in order of preference.
pub const SUPPORTED_MODES: [&str; 2] = ["aead_aes256_gcm_rtpsize", "xsalsa20_poly1305"];

enum ActiveCipher {
    XSalsa20Poly1305(XSalsa20Poly1305),
    Aes256Gcm(Aes256Gcm),
}

/// RTP sender for one voice session.
pub struct UdpBackend {
    socket: Arc<UdpSocket>,
    ssrc: u32,
    address: SocketAddr,
    cipher: ActiveCipher,
    sequence: u16,
    timestamp: u32,
    nonce: u32,
    packet_buf: Vec<u8>,
}

impl UdpBackend {
    pub fn new(
        socket: Arc<UdpSocket>,
        address: SocketAddr,
        ssrc: u32,
        secret_key: [u8; 32],
        mode: &str,
    ) -> Self {
        let cipher = match mode {
            "aead_aes256_gcm_rtpsize" => {
                ActiveCipher::Aes256Gcm(Aes256Gcm::new(&secret_key.into()))
            }
            _ => ActiveCipher::XSalsa20Poly1305(XSalsa20Poly1305::new(&secret_key.into())),
        };

        Self {
            socket,
            ssrc,
            address,
            cipher,
            // RTP counters start at random offsets
            sequence: rand::random(),
            timestamp: rand::random(),
            nonce: 0,
            packet_buf: Vec::with_capacity(UDP_PACKET_BUF_CAPACITY),
        }
    }

    /// Builds the encrypted RTP packet for `payload` and advances the
    /// sequence, timestamp and nonce counters.
    fn seal(&mut self, payload: &[u8]) -> PlayerResult<&[u8]> {
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);

        let timestamp = self.timestamp;
        self.timestamp = self.timestamp.wrapping_add(RTP_TIMESTAMP_STEP);

        self.nonce = self.nonce.wrapping_add(1);
        let current_nonce = self.nonce;

        let mut header = [0u8; 12];
        header[0] = RTP_VERSION_BYTE;
        header[1] = RTP_OPUS_PAYLOAD_TYPE;
        header[2..4].copy_from_slice(&sequence.to_be_bytes());
        header[4..8].copy_from_slice(&timestamp.to_be_bytes());
        header[8..12].copy_from_slice(&self.ssrc.to_be_bytes());

        self.packet_buf.clear();
        self.packet_buf.extend_from_slice(&header);
        self.packet_buf.extend_from_slice(payload);

        match &self.cipher {
            ActiveCipher::XSalsa20Poly1305(cipher) => {
                // nonce is the RTP header zero-padded to 24 bytes
                let mut nonce = [0u8; 24];
                nonce[0..12].copy_from_slice(&header);

                let tag = cipher
                    .encrypt_in_place_detached(&nonce.into(), &[], &mut self.packet_buf[12..])
                    .map_err(|e| PlayerError::Internal(format!("xsalsa20 encryption: {e:?}")))?;

                // tag precedes the ciphertext in this mode
                let body = self.packet_buf.split_off(12);
                self.packet_buf.extend_from_slice(&tag);
                self.packet_buf.extend_from_slice(&body);
            }
            ActiveCipher::Aes256Gcm(cipher) => {
                // 4-byte big-endian counter, appended to the packet in the clear
                let mut nonce = [0u8; 12];
                nonce[0..4].copy_from_slice(&current_nonce.to_be_bytes());

                let tag = cipher
                    .encrypt_in_place_detached(&nonce.into(), &header, &mut self.packet_buf[12..])
                    .map_err(|e| PlayerError::Internal(format!("aes-gcm encryption: {e:?}")))?;

                self.packet_buf.extend_from_slice(&tag);
                self.packet_buf.extend_from_slice(&current_nonce.to_be_bytes());
            }
        }

        Ok(&self.packet_buf)
    }

    pub async fn send_opus_packet(&mut self, payload: &[u8]) -> PlayerResult<()> {
        let address = self.address;
        let socket = self.socket.clone();
        let packet = self.seal(payload)?;
        socket.send_to(packet, address).await?;
        Ok(())
    }
}

/// Resolves our external address as seen by the voice server.
pub async fn discover_ip(
    socket: &UdpSocket,
    addr: SocketAddr,
    ssrc: u32,
) -> PlayerResult<(String, u16)> {
    let mut packet = [0u8; DISCOVERY_PACKET_SIZE];
    packet[0..2].copy_from_slice(&1u16.to_be_bytes());
    packet[2..4].copy_from_slice(&70u16.to_be_bytes());
    packet[4..8].copy_from_slice(&ssrc.to_be_bytes());

    socket.send_to(&packet, addr).await?;

    let mut buf = [0u8; DISCOVERY_PACKET_SIZE];
    match tokio::time::timeout(IP_DISCOVERY_TIMEOUT, socket.recv(&mut buf)).await {
        Ok(Ok(n)) if n >= DISCOVERY_PACKET_SIZE => {
            let ip = std::str::from_utf8(&buf[8..72])
                .map_err(|e| PlayerError::VoiceJoin(format!("ip discovery: {e}")))?
                .trim_matches('\0')
                .to_string();
            let port = u16::from_be_bytes([buf[72], buf[73]]);
            Ok((ip, port))
        }
        Ok(Ok(_)) => Err(PlayerError::VoiceJoin(
            "malformed ip discovery response".to_string(),
        )),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(PlayerError::VoiceJoin("ip discovery timed out".to_string())),
    }
}

/// Paces frames from `frames` onto the wire every 20 ms until cancelled or
/// the sending side goes away.
pub async fn speak_loop(
    mut udp: UdpBackend,
    frames: flume::Receiver<Vec<u8>>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(FRAME_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut silence_frames = MAX_SILENCE_FRAMES;
    let mut sent: u64 = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let frame = match frames.try_recv() {
                    Ok(frame) => {
                        silence_frames = 0;
                        frame
                    }
                    Err(flume::TryRecvError::Disconnected) => break,
                    Err(flume::TryRecvError::Empty) => {
                        if silence_frames >= MAX_SILENCE_FRAMES {
                            continue;
                        }
                        silence_frames += 1;
                        SILENCE_FRAME.to_vec()
                    }
                };

                if let Err(e) = udp.send_opus_packet(&frame).await {
                    warn!("Voice UDP send failed: {}", e);
                    continue;
                }
                sent += 1;
            }
        }
    }

    debug!(sent, "Voice speak loop stopped");
    trace!(ssrc = udp.ssrc, "Dropping UDP backend");
}
