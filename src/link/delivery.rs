//! Transmission and reliable delivery.
//!
//! [`DeliveryManager`] owns the mechanics below the link API: pushing a frame
//! through the transport, draining received packets, and the two
//! stop-and-wait loops (send-with-ACK and send-and-wait-for-response).
//!
//! Waits are polling loops. The blocking variants sleep for the poll
//! interval between polls and call the yield hook, if one is installed. The
//! async variants await a tokio sleep instead and can be cancelled.

use super::duplex::DuplexState;
use super::mode::OperatingMode;
use crate::error::LinkError;
use crate::lora::{RadioTransport, TransportError, POLL_INTERVAL};
use crate::protocol::{decode, encode, Message, MessageType, ACK_PAYLOAD, MAX_FRAME_LEN};
use crate::stats::LinkStats;
use log::{debug, trace};
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Receive buffer size; one full transceiver FIFO.
pub const RX_BUFFER_LEN: usize = 256;

/// How a reply is recognized as an acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMatch {
    /// Any reply whose bytes contain `ACK`. Compatible with every peer, but
    /// an unrelated frame that happens to carry those bytes also counts.
    #[default]
    Substring,
    /// Only a decoded ACK frame echoing the sent `msg_id`, addressed to this
    /// node or broadcast. Raw (unframed) sends fall back to substring.
    MessageId,
}

/// Identity of the frame an acknowledgment must refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckExpectation {
    pub msg_id: u16,
    pub own_id: u16,
}

impl AckMatch {
    pub fn accepts(self, reply: &[u8], expect: Option<AckExpectation>) -> bool {
        match (self, expect) {
            (Self::MessageId, Some(expect)) => decode(reply)
                .map(|m| {
                    m.kind() == MessageType::Ack
                        && m.msg_id == expect.msg_id
                        && (m.dest_id == expect.own_id || m.is_broadcast())
                })
                .unwrap_or(false),
            _ => contains_ack(reply),
        }
    }
}

fn contains_ack(reply: &[u8]) -> bool {
    reply.windows(ACK_PAYLOAD.len()).any(|w| w == ACK_PAYLOAD)
}

/// Last packet drained from the transport.
///
/// A packet can be held back after a peek so the next poll returns it
/// instead of reading the transport again.
pub(crate) struct RxBuffer {
    data: [u8; RX_BUFFER_LEN],
    len: usize,
    held: bool,
}

impl RxBuffer {
    pub(crate) fn new() -> Self {
        Self {
            data: [0; RX_BUFFER_LEN],
            len: 0,
            held: false,
        }
    }

    /// Load the next packet. Returns false when none is waiting.
    pub(crate) fn poll<T: RadioTransport>(&mut self, radio: &mut T, stats: &LinkStats) -> bool {
        if self.held {
            self.held = false;
            return true;
        }
        if radio.parse_packet() == 0 {
            return false;
        }
        self.len = 0;
        while radio.available() > 0 {
            let Some(byte) = radio.read() else { break };
            if self.len < RX_BUFFER_LEN {
                self.data[self.len] = byte;
                self.len += 1;
            }
        }
        LinkStats::bump(&stats.frames_received);
        trace!("rx {} bytes", self.len);
        true
    }

    /// Load the next packet and keep it for the following poll.
    pub(crate) fn peek<T: RadioTransport>(&mut self, radio: &mut T, stats: &LinkStats) -> bool {
        if self.held {
            return true;
        }
        self.held = self.poll(radio, stats);
        self.held
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Drop a packet kept by [`peek`](Self::peek). Returns whether one was
    /// held.
    pub(crate) fn discard_held(&mut self) -> bool {
        std::mem::take(&mut self.held)
    }
}

/// Packets heard before a request cannot answer it.
fn discard_stale(rx: &mut RxBuffer) {
    if rx.discard_held() {
        debug!("dropping held packet before exchange");
    }
}

/// Send/receive mechanics shared by every link operation.
pub struct DeliveryManager {
    ack_match: AckMatch,
    poll_interval: Duration,
    yield_hook: Option<Box<dyn FnMut() + Send>>,
    stats: Arc<LinkStats>,
}

impl fmt::Debug for DeliveryManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryManager")
            .field("ack_match", &self.ack_match)
            .field("poll_interval", &self.poll_interval)
            .field("yield_hook", &self.yield_hook.is_some())
            .finish()
    }
}

impl DeliveryManager {
    pub fn new(stats: Arc<LinkStats>) -> Self {
        Self {
            ack_match: AckMatch::default(),
            poll_interval: POLL_INTERVAL,
            yield_hook: None,
            stats,
        }
    }

    pub fn ack_match(&self) -> AckMatch {
        self.ack_match
    }

    pub fn set_ack_match(&mut self, ack_match: AckMatch) {
        self.ack_match = ack_match;
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn set_poll_interval(&mut self, interval: Duration) {
        self.poll_interval = interval;
    }

    /// Install a hook called on every poll of a blocking wait.
    pub fn set_yield_hook<F>(&mut self, hook: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.yield_hook = Some(Box::new(hook));
    }

    pub fn stats(&self) -> &Arc<LinkStats> {
        &self.stats
    }

    /// Push raw bytes through the transport as one packet.
    pub fn transmit<T: RadioTransport>(&self, radio: &mut T, frame: &[u8]) -> Result<(), LinkError> {
        if frame.len() > MAX_FRAME_LEN {
            return Err(TransportError::PacketTooLarge {
                size: frame.len(),
                max: MAX_FRAME_LEN,
            }
            .into());
        }
        radio.begin_packet()?;
        let written = radio.write_all(frame);
        radio.end_packet()?;
        if written != frame.len() {
            debug!("transport accepted {} of {} bytes", written, frame.len());
            return Err(TransportError::TxFailed.into());
        }
        LinkStats::bump(&self.stats.frames_sent);
        trace!("tx {} bytes", frame.len());
        Ok(())
    }

    /// Encode and transmit a message.
    pub fn transmit_message<T: RadioTransport>(
        &self,
        radio: &mut T,
        msg: &Message,
    ) -> Result<(), LinkError> {
        let mut buf = [0u8; MAX_FRAME_LEN];
        let len = encode(msg, &mut buf)?;
        self.transmit(radio, &buf[..len])
    }

    fn pause(&mut self) {
        if let Some(hook) = self.yield_hook.as_mut() {
            hook();
        }
        thread::sleep(self.poll_interval);
    }

    /// Poll until a packet satisfying `accept` arrives or `timeout` elapses.
    /// Non-matching packets are discarded.
    pub(crate) fn wait_for<T, F>(
        &mut self,
        radio: &mut T,
        rx: &mut RxBuffer,
        timeout: Duration,
        mut accept: F,
    ) -> bool
    where
        T: RadioTransport,
        F: FnMut(&[u8]) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if rx.poll(radio, &self.stats) {
                if accept(rx.bytes()) {
                    return true;
                }
                trace!("discarding unmatched {}-byte packet", rx.bytes().len());
            }
            if Instant::now() >= deadline {
                return false;
            }
            self.pause();
        }
    }

    /// Async [`wait_for`](Self::wait_for).
    pub(crate) async fn wait_for_async<T, F>(
        &mut self,
        radio: &mut T,
        rx: &mut RxBuffer,
        timeout: Duration,
        mut accept: F,
        cancel: &CancellationToken,
    ) -> Result<bool, LinkError>
    where
        T: RadioTransport,
        F: FnMut(&[u8]) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if cancel.is_cancelled() {
                return Err(LinkError::Cancelled);
            }
            if rx.poll(radio, &self.stats) {
                if accept(rx.bytes()) {
                    return Ok(true);
                }
                trace!("discarding unmatched {}-byte packet", rx.bytes().len());
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            if let Some(hook) = self.yield_hook.as_mut() {
                hook();
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(LinkError::Cancelled),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// Transmit `frame` up to `max_retries` times until acknowledged.
    ///
    /// Returns the number of transmissions made.
    pub(crate) fn send_with_ack<T: RadioTransport>(
        &mut self,
        radio: &mut T,
        rx: &mut RxBuffer,
        frame: &[u8],
        expect: Option<AckExpectation>,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<u32, LinkError> {
        discard_stale(rx);
        let ack_match = self.ack_match;
        for attempt in 1..=max_retries {
            if attempt > 1 {
                LinkStats::bump(&self.stats.retransmissions);
            }
            self.transmit(radio, frame)?;
            if self.wait_for(radio, rx, timeout, |reply| ack_match.accepts(reply, expect)) {
                LinkStats::bump(&self.stats.acks_received);
                debug!("ack on attempt {}/{}", attempt, max_retries);
                return Ok(attempt);
            }
            debug!("no ack on attempt {}/{}", attempt, max_retries);
        }
        LinkStats::bump(&self.stats.ack_timeouts);
        Err(LinkError::AckTimeout {
            attempts: max_retries,
        })
    }

    /// Async [`send_with_ack`](Self::send_with_ack).
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn send_with_ack_async<T: RadioTransport>(
        &mut self,
        radio: &mut T,
        rx: &mut RxBuffer,
        frame: &[u8],
        expect: Option<AckExpectation>,
        timeout: Duration,
        max_retries: u32,
        cancel: &CancellationToken,
    ) -> Result<u32, LinkError> {
        discard_stale(rx);
        let ack_match = self.ack_match;
        for attempt in 1..=max_retries {
            if attempt > 1 {
                LinkStats::bump(&self.stats.retransmissions);
            }
            self.transmit(radio, frame)?;
            let accept = |reply: &[u8]| ack_match.accepts(reply, expect);
            if self.wait_for_async(radio, rx, timeout, accept, cancel).await? {
                LinkStats::bump(&self.stats.acks_received);
                debug!("ack on attempt {}/{}", attempt, max_retries);
                return Ok(attempt);
            }
            debug!("no ack on attempt {}/{}", attempt, max_retries);
        }
        LinkStats::bump(&self.stats.ack_timeouts);
        Err(LinkError::AckTimeout {
            attempts: max_retries,
        })
    }

    /// Transmit `frame` and take the first packet heard as the response,
    /// up to `max_retries` transmissions. The response is left in `rx`.
    ///
    /// In half-duplex mode the window is forced to TRANSMIT before each send
    /// and to RECEIVE after it, and back to TRANSMIT when every attempt
    /// failed.
    pub(crate) fn send_and_wait_response<T: RadioTransport>(
        &mut self,
        radio: &mut T,
        rx: &mut RxBuffer,
        mode: &mut OperatingMode,
        frame: &[u8],
        timeout: Duration,
        max_retries: u32,
    ) -> Result<u32, LinkError> {
        discard_stale(rx);
        for attempt in 1..=max_retries {
            if attempt > 1 {
                LinkStats::bump(&self.stats.retransmissions);
            }
            mode.force(DuplexState::Transmit, Instant::now());
            self.transmit(radio, frame)?;
            mode.force(DuplexState::Receive, Instant::now());
            if self.wait_for(radio, rx, timeout, |_| true) {
                return Ok(attempt);
            }
            debug!("no response on attempt {}/{}", attempt, max_retries);
        }
        mode.force(DuplexState::Transmit, Instant::now());
        Err(LinkError::NoResponse {
            attempts: max_retries,
        })
    }

    /// Async [`send_and_wait_response`](Self::send_and_wait_response).
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn send_and_wait_response_async<T: RadioTransport>(
        &mut self,
        radio: &mut T,
        rx: &mut RxBuffer,
        mode: &mut OperatingMode,
        frame: &[u8],
        timeout: Duration,
        max_retries: u32,
        cancel: &CancellationToken,
    ) -> Result<u32, LinkError> {
        discard_stale(rx);
        for attempt in 1..=max_retries {
            if attempt > 1 {
                LinkStats::bump(&self.stats.retransmissions);
            }
            mode.force(DuplexState::Transmit, Instant::now());
            self.transmit(radio, frame)?;
            mode.force(DuplexState::Receive, Instant::now());
            match self.wait_for_async(radio, rx, timeout, |_| true, cancel).await {
                Ok(true) => return Ok(attempt),
                Ok(false) => debug!("no response on attempt {}/{}", attempt, max_retries),
                Err(e) => {
                    mode.force(DuplexState::Transmit, Instant::now());
                    return Err(e);
                }
            }
        }
        mode.force(DuplexState::Transmit, Instant::now());
        Err(LinkError::NoResponse {
            attempts: max_retries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::Mode;
    use crate::lora::SimTransport;
    use crate::protocol::MAX_PAYLOAD;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TIMEOUT: Duration = Duration::from_millis(100);

    fn setup() -> (DeliveryManager, SimTransport, RxBuffer) {
        let mut radio = SimTransport::new();
        radio.begin(915_000_000).unwrap();
        (
            DeliveryManager::new(Arc::new(LinkStats::new())),
            radio,
            RxBuffer::new(),
        )
    }

    #[test]
    fn test_ack_substring_match() {
        assert!(AckMatch::Substring.accepts(b"ACK", None));
        assert!(AckMatch::Substring.accepts(b"xxACKyy", None));
        assert!(!AckMatch::Substring.accepts(b"AC", None));
        assert!(!AckMatch::Substring.accepts(b"ack", None));
    }

    #[test]
    fn test_ack_message_id_match() {
        let expect = Some(AckExpectation {
            msg_id: 42,
            own_id: 1,
        });
        let mut sent = Message::new(MessageType::Data, 1, 2, 1, b"hi");
        sent.msg_id = 42;
        let mut buf = [0u8; MAX_FRAME_LEN];

        let ack = Message::ack_for(&sent, 2);
        let len = encode(&ack, &mut buf).unwrap();
        assert!(AckMatch::MessageId.accepts(&buf[..len], expect));

        sent.msg_id = 41;
        let stale = Message::ack_for(&sent, 2);
        let len = encode(&stale, &mut buf).unwrap();
        assert!(!AckMatch::MessageId.accepts(&buf[..len], expect));
        assert!(AckMatch::Substring.accepts(&buf[..len], expect));

        assert!(!AckMatch::MessageId.accepts(b"ACK", expect));
        assert!(AckMatch::MessageId.accepts(b"ACK", None));
    }

    #[test]
    fn test_transmit_rejects_oversized_frame() {
        let (delivery, mut radio, _) = setup();
        let frame = [0u8; MAX_FRAME_LEN + 1];
        let err = delivery.transmit(&mut radio, &frame).unwrap_err();
        assert!(matches!(err, LinkError::Transport(_)));
        assert_eq!(radio.sent_count(), 0);
    }

    #[test]
    fn test_transmit_message_encodes() {
        let (delivery, mut radio, _) = setup();
        let msg = Message::new(MessageType::Data, 1, 2, 1, &[7; MAX_PAYLOAD]);
        delivery.transmit_message(&mut radio, &msg).unwrap();
        let frames = radio.sent_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), MAX_FRAME_LEN);
        assert_eq!(delivery.stats().snapshot().frames_sent, 1);
    }

    #[test]
    fn test_ack_on_first_attempt() {
        let (mut delivery, mut radio, mut rx) = setup();
        radio.set_responder(|_, _| Some((Duration::from_millis(50), b"ACK".to_vec())));

        let attempts = delivery
            .send_with_ack(&mut radio, &mut rx, b"hello", None, TIMEOUT, 3)
            .unwrap();
        assert_eq!(attempts, 1);
        assert_eq!(radio.sent_count(), 1);
        assert_eq!(delivery.stats().snapshot().acks_received, 1);
    }

    #[test]
    fn test_ack_on_second_attempt() {
        let (mut delivery, mut radio, mut rx) = setup();
        radio.set_responder(|_, index| {
            (index == 1).then(|| (Duration::from_millis(10), b"ACK".to_vec()))
        });

        let attempts = delivery
            .send_with_ack(&mut radio, &mut rx, b"hello", None, TIMEOUT, 3)
            .unwrap();
        assert_eq!(attempts, 2);
        assert_eq!(radio.sent_count(), 2);
        assert_eq!(radio.sent_frames()[0], radio.sent_frames()[1]);
        assert_eq!(delivery.stats().snapshot().retransmissions, 1);
    }

    #[test]
    fn test_no_ack_exhausts_retries() {
        let (mut delivery, mut radio, mut rx) = setup();
        let started = Instant::now();

        let err = delivery
            .send_with_ack(&mut radio, &mut rx, b"hello", None, TIMEOUT, 3)
            .unwrap_err();
        let elapsed = started.elapsed();

        assert_eq!(err, LinkError::AckTimeout { attempts: 3 });
        assert_eq!(radio.sent_count(), 3);
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(1000));
        assert_eq!(delivery.stats().snapshot().ack_timeouts, 1);
    }

    #[test]
    fn test_zero_retries_sends_nothing() {
        let (mut delivery, mut radio, mut rx) = setup();
        let err = delivery
            .send_with_ack(&mut radio, &mut rx, b"x", None, TIMEOUT, 0)
            .unwrap_err();
        assert_eq!(err, LinkError::AckTimeout { attempts: 0 });
        assert_eq!(radio.sent_count(), 0);
    }

    #[test]
    fn test_held_packet_is_not_an_ack() {
        let (mut delivery, mut radio, mut rx) = setup();
        radio.inject(b"ACK");
        assert!(rx.peek(&mut radio, delivery.stats()));

        let err = delivery
            .send_with_ack(&mut radio, &mut rx, b"hello", None, TIMEOUT, 1)
            .unwrap_err();
        assert_eq!(err, LinkError::AckTimeout { attempts: 1 });
        assert_eq!(radio.sent_count(), 1);
    }

    #[test]
    fn test_held_packet_is_not_a_response() {
        let (mut delivery, mut radio, mut rx) = setup();
        let mut mode = OperatingMode::new(Mode::Normal, Duration::from_secs(1), Instant::now());
        radio.inject(b"old news");
        assert!(rx.peek(&mut radio, delivery.stats()));

        let err = delivery
            .send_and_wait_response(&mut radio, &mut rx, &mut mode, b"ping", TIMEOUT, 1)
            .unwrap_err();
        assert_eq!(err, LinkError::NoResponse { attempts: 1 });
    }

    #[test]
    fn test_non_ack_reply_is_ignored() {
        let (mut delivery, mut radio, mut rx) = setup();
        radio.set_responder(|_, _| Some((Duration::ZERO, b"NOPE".to_vec())));
        let result = delivery.send_with_ack(&mut radio, &mut rx, b"x", None, TIMEOUT, 1);
        assert!(result.is_err());
    }

    #[test]
    fn test_yield_hook_runs_while_waiting() {
        let (mut delivery, mut radio, mut rx) = setup();
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        delivery.set_yield_hook(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        let _ = delivery.send_with_ack(&mut radio, &mut rx, b"x", None, Duration::from_millis(30), 1);
        assert!(polls.load(Ordering::Relaxed) >= 2);
    }

    #[test]
    fn test_response_switches_duplex_windows() {
        let (mut delivery, mut radio, mut rx) = setup();
        let mut mode = OperatingMode::new(Mode::HalfDuplex, Duration::from_secs(10), Instant::now());
        radio.set_responder(|_, _| Some((Duration::from_millis(10), b"pong".to_vec())));

        let attempts = delivery
            .send_and_wait_response(&mut radio, &mut rx, &mut mode, b"ping", TIMEOUT, 3)
            .unwrap();
        assert_eq!(attempts, 1);
        assert_eq!(rx.bytes(), b"pong");
        assert!(mode.may_receive());
    }

    #[test]
    fn test_response_timeout_restores_transmit() {
        let (mut delivery, mut radio, mut rx) = setup();
        let mut mode = OperatingMode::new(Mode::HalfDuplex, Duration::from_secs(10), Instant::now());

        let err = delivery
            .send_and_wait_response(&mut radio, &mut rx, &mut mode, b"ping", TIMEOUT, 2)
            .unwrap_err();
        assert_eq!(err, LinkError::NoResponse { attempts: 2 });
        assert_eq!(radio.sent_count(), 2);
        assert!(mode.may_send());
    }

    #[test]
    fn test_peek_holds_packet() {
        let (delivery, mut radio, mut rx) = setup();
        radio.inject(b"abc");
        assert!(rx.peek(&mut radio, delivery.stats()));
        assert!(rx.peek(&mut radio, delivery.stats()));
        assert!(rx.poll(&mut radio, delivery.stats()));
        assert_eq!(rx.bytes(), b"abc");
        assert!(!rx.poll(&mut radio, delivery.stats()));
        assert_eq!(delivery.stats().snapshot().frames_received, 1);
    }

    #[tokio::test]
    async fn test_async_ack() {
        let (mut delivery, mut radio, mut rx) = setup();
        radio.set_responder(|_, index| {
            (index == 1).then(|| (Duration::from_millis(10), b"ACK".to_vec()))
        });
        let cancel = CancellationToken::new();

        let attempts = delivery
            .send_with_ack_async(&mut radio, &mut rx, b"x", None, TIMEOUT, 3, &cancel)
            .await
            .unwrap();
        assert_eq!(attempts, 2);
    }

    #[tokio::test]
    async fn test_async_cancel_aborts_wait() {
        let (mut delivery, mut radio, mut rx) = setup();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = delivery
            .send_with_ack_async(&mut radio, &mut rx, b"x", None, Duration::from_secs(5), 3, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, LinkError::Cancelled);
        assert_eq!(radio.sent_count(), 1);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_async_response() {
        let (mut delivery, mut radio, mut rx) = setup();
        let mut mode = OperatingMode::new(Mode::Normal, Duration::from_secs(1), Instant::now());
        radio.set_responder(|_, _| Some((Duration::from_millis(5), b"reply".to_vec())));
        let cancel = CancellationToken::new();

        delivery
            .send_and_wait_response_async(&mut radio, &mut rx, &mut mode, b"q", TIMEOUT, 1, &cancel)
            .await
            .unwrap();
        assert_eq!(rx.bytes(), b"reply");
    }
}
