//! Admission checks for datagrams on the UDP input socket
//!
//! A datagram is accepted only if, in this order: its token matches the one
//! issued over TCP, its HMAC verifies, its sequence number is strictly greater
//! than the last accepted one, and (for input) the session's token bucket has
//! room. Rejections are silent towards the sender.

use crate::error::UdpReject;
use crate::session_manager::SessionManager;
use raiders_shared::{clamp_direction, signing, UdpMessage};
use std::net::SocketAddr;
use std::time::Instant;

/// Classic token bucket: starts full, refills continuously, one token per packet
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_per_sec: u32) -> Self {
        Self::starting_at(capacity, refill_per_sec, Instant::now())
    }

    pub fn starting_at(capacity: u32, refill_per_sec: u32, now: Instant) -> Self {
        Self {
            capacity: capacity as f64,
            refill_per_sec: refill_per_sec as f64,
            tokens: capacity as f64,
            last_refill: now,
        }
    }

    pub fn try_consume(&mut self) -> bool {
        self.try_consume_at(Instant::now())
    }

    pub fn try_consume_at(&mut self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
            self.last_refill = now;
        }

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// UDP credentials and anti-abuse state of one session
#[derive(Debug, Clone)]
pub struct UdpChannel {
    pub token: String,
    pub addr: Option<SocketAddr>,
    last_seq: Option<u64>,
    bucket: TokenBucket,
    capacity: u32,
    refill_per_sec: u32,
}

impl UdpChannel {
    pub fn new(token: String, capacity: u32, refill_per_sec: u32) -> Self {
        Self {
            token,
            addr: None,
            last_seq: None,
            bucket: TokenBucket::new(capacity, refill_per_sec),
            capacity,
            refill_per_sec,
        }
    }

    pub fn last_seq(&self) -> Option<u64> {
        self.last_seq
    }

    /// Records `seq` if it is fresh; false for duplicates and stale packets
    fn accept_seq(&mut self, seq: u64) -> bool {
        match self.last_seq {
            Some(last) if seq <= last => false,
            _ => {
                self.last_seq = Some(seq);
                true
            }
        }
    }

    fn check(&mut self, msg: &UdpMessage, from: SocketAddr) -> Result<Admitted, UdpReject> {
        if msg.token() != self.token {
            return Err(UdpReject::BadToken);
        }
        if !signing::verify(&self.token, &msg.signing_payload(), msg.hmac()) {
            return Err(UdpReject::BadHmac);
        }
        if !self.accept_seq(msg.seq()) {
            return Err(UdpReject::Replay);
        }

        match msg {
            UdpMessage::RegisterUdp { peer_id, .. } => {
                self.addr = Some(from);
                self.bucket = TokenBucket::new(self.capacity, self.refill_per_sec);
                Ok(Admitted::Registered {
                    peer_id: *peer_id,
                    addr: from,
                })
            }
            UdpMessage::PlayerInput {
                peer_id,
                dir_x,
                dir_y,
                dx_i,
                dy_i,
                ..
            } => {
                if !self.bucket.try_consume() {
                    return Err(UdpReject::RateLimited);
                }
                if !dir_x.is_finite() || !dir_y.is_finite() {
                    return Err(UdpReject::NonFinite);
                }
                // Only the quantized components are covered by the HMAC
                let (raw_x, raw_y) = match (dx_i, dy_i) {
                    (Some(dx), Some(dy)) => (signing::dequantize(*dx), signing::dequantize(*dy)),
                    _ => (*dir_x, *dir_y),
                };
                let (dir_x, dir_y) = clamp_direction(raw_x, raw_y).ok_or(UdpReject::NonFinite)?;
                Ok(Admitted::Input {
                    peer_id: *peer_id,
                    dir_x,
                    dir_y,
                })
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admitted {
    Registered { peer_id: u32, addr: SocketAddr },
    Input { peer_id: u32, dir_x: f32, dir_y: f32 },
}

pub fn parse(datagram: &[u8]) -> Result<UdpMessage, UdpReject> {
    let text = std::str::from_utf8(datagram).map_err(|_| UdpReject::Malformed)?;
    let text = text.trim();
    if text.is_empty() {
        return Err(UdpReject::Malformed);
    }
    serde_json::from_str(text).map_err(|_| UdpReject::Malformed)
}

/// Runs every admission check for a datagram received from `from`
pub fn admit(
    sessions: &SessionManager,
    msg: &UdpMessage,
    from: SocketAddr,
) -> Result<Admitted, UdpReject> {
    sessions
        .with_udp(msg.peer_id(), |channel| channel.check(msg, from))
        .unwrap_or(Err(UdpReject::UnknownSession))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::time::Duration;
    use tokio::sync::mpsc;

    const TOKEN: &str = "0123456789abcdef";

    fn from_addr() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn sessions_with_token() -> (SessionManager, u32) {
        let sessions = SessionManager::new(8);
        let (tx, _rx) = mpsc::unbounded_channel();
        let peer = sessions.add_session(from_addr(), tx, None).unwrap();
        sessions.bind_udp(peer, UdpChannel::new(TOKEN.to_string(), 60, 30));
        (sessions, peer)
    }

    #[test]
    fn test_token_bucket_burst_then_refill() {
        let start = Instant::now();
        let mut bucket = TokenBucket::starting_at(3, 2, start);

        assert!(bucket.try_consume_at(start));
        assert!(bucket.try_consume_at(start));
        assert!(bucket.try_consume_at(start));
        assert!(!bucket.try_consume_at(start));

        // Two tokens per second: one is back after 500ms
        assert!(bucket.try_consume_at(start + Duration::from_millis(500)));
        assert!(!bucket.try_consume_at(start + Duration::from_millis(500)));

        // Never refills past capacity
        let later = start + Duration::from_secs(60);
        for _ in 0..3 {
            assert!(bucket.try_consume_at(later));
        }
        assert!(!bucket.try_consume_at(later));
    }

    #[test]
    fn test_register_binds_address() {
        let (sessions, peer) = sessions_with_token();
        let msg = UdpMessage::register(peer, TOKEN, 1);

        let result = admit(&sessions, &msg, from_addr());
        assert_eq!(
            result,
            Ok(Admitted::Registered {
                peer_id: peer,
                addr: from_addr()
            })
        );
        assert_eq!(
            sessions.with_udp(peer, |c| c.addr),
            Some(Some(from_addr()))
        );
    }

    #[test]
    fn test_input_is_clamped_to_unit_length() {
        let (sessions, peer) = sessions_with_token();
        let msg = UdpMessage::input(peer, TOKEN, 1, 3.0, 4.0);

        match admit(&sessions, &msg, from_addr()) {
            Ok(Admitted::Input { dir_x, dir_y, .. }) => {
                assert_approx_eq!(dir_x, 0.6);
                assert_approx_eq!(dir_y, 0.8);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_replayed_sequence_is_rejected_even_with_valid_hmac() {
        let (sessions, peer) = sessions_with_token();

        let first = UdpMessage::input(peer, TOKEN, 5, 1.0, 0.0);
        assert!(admit(&sessions, &first, from_addr()).is_ok());

        // Exact duplicate
        assert_eq!(
            admit(&sessions, &first, from_addr()),
            Err(UdpReject::Replay)
        );

        // Older but correctly signed
        let stale = UdpMessage::input(peer, TOKEN, 4, 0.0, 1.0);
        assert_eq!(
            admit(&sessions, &stale, from_addr()),
            Err(UdpReject::Replay)
        );

        let fresh = UdpMessage::input(peer, TOKEN, 6, 0.0, 1.0);
        assert!(admit(&sessions, &fresh, from_addr()).is_ok());
        assert_eq!(sessions.with_udp(peer, |c| c.last_seq()), Some(Some(6)));
    }

    #[test]
    fn test_registration_and_input_share_sequence_space() {
        let (sessions, peer) = sessions_with_token();
        assert!(admit(&sessions, &UdpMessage::register(peer, TOKEN, 10), from_addr()).is_ok());

        let input = UdpMessage::input(peer, TOKEN, 10, 1.0, 0.0);
        assert_eq!(
            admit(&sessions, &input, from_addr()),
            Err(UdpReject::Replay)
        );
    }

    #[test]
    fn test_wrong_token_and_bad_hmac() {
        let (sessions, peer) = sessions_with_token();

        let forged = UdpMessage::input(peer, "not-the-token", 1, 1.0, 0.0);
        assert_eq!(
            admit(&sessions, &forged, from_addr()),
            Err(UdpReject::BadToken)
        );

        let mut tampered = UdpMessage::input(peer, TOKEN, 2, 1.0, 0.0);
        if let UdpMessage::PlayerInput { dx_i, .. } = &mut tampered {
            *dx_i = Some(-1000);
        }
        assert_eq!(
            admit(&sessions, &tampered, from_addr()),
            Err(UdpReject::BadHmac)
        );

        // Rejected packets do not advance the sequence counter
        assert_eq!(sessions.with_udp(peer, |c| c.last_seq()), Some(None));
    }

    #[test]
    fn test_unknown_session() {
        let (sessions, _) = sessions_with_token();
        let msg = UdpMessage::input(999, TOKEN, 1, 1.0, 0.0);
        assert_eq!(
            admit(&sessions, &msg, from_addr()),
            Err(UdpReject::UnknownSession)
        );
    }

    #[test]
    fn test_flood_is_rate_limited() {
        let sessions = SessionManager::new(8);
        let (tx, _rx) = mpsc::unbounded_channel();
        let peer = sessions.add_session(from_addr(), tx, None).unwrap();
        sessions.bind_udp(peer, UdpChannel::new(TOKEN.to_string(), 5, 1));

        let accepted = (1..=20)
            .map(|seq| UdpMessage::input(peer, TOKEN, seq, 1.0, 0.0))
            .filter(|msg| admit(&sessions, msg, from_addr()).is_ok())
            .count();

        assert_eq!(accepted, 5);
    }

    #[test]
    fn test_signed_components_win_over_unsigned_floats() {
        let (sessions, peer) = sessions_with_token();
        let mut msg = UdpMessage::input(peer, TOKEN, 1, 0.6, 0.8);
        if let UdpMessage::PlayerInput { dir_x, dir_y, .. } = &mut msg {
            *dir_x = -1.0;
            *dir_y = 0.0;
        }

        match admit(&sessions, &msg, from_addr()) {
            Ok(Admitted::Input { dir_x, dir_y, .. }) => {
                assert_approx_eq!(dir_x, 0.6);
                assert_approx_eq!(dir_y, 0.8);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_non_finite_input_is_rejected() {
        let (sessions, peer) = sessions_with_token();
        let mut msg = UdpMessage::input(peer, TOKEN, 1, 0.0, 0.0);
        if let UdpMessage::PlayerInput { dir_x, .. } = &mut msg {
            *dir_x = f32::NAN;
        }

        assert_eq!(
            admit(&sessions, &msg, from_addr()),
            Err(UdpReject::NonFinite)
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse(b"   "), Err(UdpReject::Malformed));
        assert_eq!(parse(b"{not json"), Err(UdpReject::Malformed));
        assert_eq!(parse(&[0xff, 0xfe]), Err(UdpReject::Malformed));

        let msg = UdpMessage::register(1, TOKEN, 1);
        let bytes = serde_json::to_vec(&msg).unwrap();
        assert_eq!(parse(&bytes), Ok(msg));
    }
}
