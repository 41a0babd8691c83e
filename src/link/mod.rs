//! The link layer.
//!
//! [`LoRaLink`] owns a [`RadioTransport`] and every piece of link state:
//! configuration, node identity, operating mode, delivery settings, the mesh
//! router and the staged outgoing text. All traffic goes through it.
//!
//! Everything runs on the caller's task. Only the reliable send primitives
//! block, and only for `timeout × max_retries` at most.
//!
//! # Example
//!
//! ```
//! use lora_mesh_link::link::LoRaLink;
//! use lora_mesh_link::lora::{LinkConfig, SimMedium};
//! use lora_mesh_link::protocol::MessageType;
//!
//! let medium = SimMedium::new();
//! let mut a = LoRaLink::new(medium.attach());
//! let mut b = LoRaLink::new(medium.attach());
//! assert!(a.init(LinkConfig::default().with_node_id(1)));
//! assert!(b.init(LinkConfig::default().with_node_id(2)));
//!
//! assert!(a.send_to_node(2, b"hello", MessageType::Data));
//! let msg = b.receive_message().unwrap();
//! assert_eq!(msg.payload(), b"hello");
//! assert_eq!(b.known_node_id(0), Some(1));
//! ```

mod delivery;
mod duplex;
mod identity;
mod mode;

pub use delivery::{AckExpectation, AckMatch, DeliveryManager, RX_BUFFER_LEN};
pub use duplex::{DuplexScheduler, DuplexState};
pub use identity::NodeIdentity;
pub use mode::Mode;

use crate::error::LinkError;
use crate::lora::{LinkConfig, RadioTransport, DISCOVERY_TTL, SWITCH_INTERVAL};
use crate::mesh::MeshRouter;
use crate::protocol::{decode, encode, Message, MessageType, TextPayload, MAX_FRAME_LEN};
use crate::stats::LinkStats;
use delivery::RxBuffer;
use log::{debug, error, info, warn};
use mode::OperatingMode;
use std::fmt::{Display, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// A link shared between tasks.
pub type SharedLink<T> = Arc<tokio::sync::Mutex<LoRaLink<T>>>;

/// LoRa link-layer endpoint.
pub struct LoRaLink<T: RadioTransport> {
    radio: T,
    ready: bool,
    config: LinkConfig,
    identity: NodeIdentity,
    mode: OperatingMode,
    switch_interval: Duration,
    delivery: DeliveryManager,
    router: MeshRouter,
    answer_discovery: bool,
    outgoing: TextPayload,
    rx: RxBuffer,
    last_async_send: Option<Instant>,
    last_async_receive: Option<Instant>,
    stats: Arc<LinkStats>,
}

impl<T: RadioTransport> LoRaLink<T> {
    /// Wrap a transport. Nothing is sent to it until [`init`](Self::init).
    pub fn new(radio: T) -> Self {
        let stats = Arc::new(LinkStats::new());
        Self {
            radio,
            ready: false,
            config: LinkConfig::default(),
            identity: NodeIdentity::default(),
            mode: OperatingMode::Normal,
            switch_interval: SWITCH_INTERVAL,
            delivery: DeliveryManager::new(stats.clone()),
            router: MeshRouter::new(),
            answer_discovery: false,
            outgoing: TextPayload::new(),
            rx: RxBuffer::new(),
            last_async_send: None,
            last_async_receive: None,
            stats,
        }
    }

    /// Wrap the link for sharing between tasks.
    pub fn into_shared(self) -> SharedLink<T> {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    // ==================== Lifecycle ====================

    /// Validate `config`, start the transport and apply every radio
    /// parameter. Returns false (and logs why) on failure.
    pub fn init(&mut self, config: LinkConfig) -> bool {
        match self.try_init(config) {
            Ok(()) => true,
            Err(e) => {
                error!("LoRa init failed: {}", e);
                false
            }
        }
    }

    pub fn try_init(&mut self, config: LinkConfig) -> Result<(), LinkError> {
        config.validate()?;
        if let Some(pins) = config.pins {
            self.radio.set_pins(pins);
        }
        if let Err(e) = self.radio.begin(config.frequency) {
            self.ready = false;
            return Err(e.into());
        }
        self.radio.set_spreading_factor(config.spread_factor);
        self.radio.set_signal_bandwidth(config.bandwidth);
        self.radio.set_tx_power(config.tx_power);
        self.radio.set_sync_word(config.sync_word);
        self.radio.set_preamble_length(config.preamble_len);
        if config.crc {
            self.radio.enable_crc();
        } else {
            self.radio.disable_crc();
        }

        self.identity.set_node_id(config.node_id);
        self.stats.set_node_id(config.node_id);
        info!(
            "LoRa link up: node {:#06x}, {:.1} MHz, SF{}, {} kHz",
            config.node_id,
            f64::from(config.frequency) / 1e6,
            config.spread_factor,
            config.bandwidth / 1000
        );
        self.config = config;
        self.ready = true;
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Shut the transport down. The link must be re-initialized to be used.
    pub fn end(&mut self) {
        self.radio.end();
        self.ready = false;
        info!("LoRa link down");
    }

    pub fn sleep(&mut self) {
        if self.ready {
            self.radio.sleep();
        }
    }

    pub fn idle(&mut self) {
        if self.ready {
            self.radio.idle();
        }
    }

    // ==================== Configuration ====================

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn node_id(&self) -> u16 {
        self.identity.node_id()
    }

    /// Change this node's address on a running link. Dropped when the link
    /// is not ready.
    pub fn set_node_id(&mut self, node_id: u16) {
        if !self.ready {
            debug!("set_node_id({:#06x}) dropped: link not ready", node_id);
            return;
        }
        self.apply_node_id(node_id);
    }

    fn apply_node_id(&mut self, node_id: u16) {
        self.identity.set_node_id(node_id);
        self.config.node_id = node_id;
        self.stats.set_node_id(node_id);
    }

    /// Change modulation parameters on a running link.
    ///
    /// Dropped (returns false) when the link is not ready or the values are
    /// out of range; nothing is queued for a later `init`.
    pub fn configure(&mut self, spread_factor: u8, bandwidth: u32, tx_power: u8, sync_word: u8) -> bool {
        let mut next = self.config.clone();
        next.spread_factor = spread_factor;
        next.bandwidth = bandwidth;
        next.tx_power = tx_power;
        next.sync_word = sync_word;
        if !self.accept_config(&next) {
            return false;
        }
        self.radio.set_spreading_factor(spread_factor);
        self.radio.set_signal_bandwidth(bandwidth);
        self.radio.set_tx_power(tx_power);
        self.radio.set_sync_word(sync_word);
        self.config = next;
        true
    }

    pub fn set_preamble_length(&mut self, symbols: u16) -> bool {
        let mut next = self.config.clone();
        next.preamble_len = symbols;
        if !self.accept_config(&next) {
            return false;
        }
        self.radio.set_preamble_length(symbols);
        self.config = next;
        true
    }

    pub fn enable_crc(&mut self) -> bool {
        self.set_crc(true)
    }

    pub fn disable_crc(&mut self) -> bool {
        self.set_crc(false)
    }

    fn set_crc(&mut self, crc: bool) -> bool {
        if !self.ready {
            debug!("crc change dropped: link not ready");
            return false;
        }
        if crc {
            self.radio.enable_crc();
        } else {
            self.radio.disable_crc();
        }
        self.config.crc = crc;
        true
    }

    fn accept_config(&self, next: &LinkConfig) -> bool {
        if !self.ready {
            debug!("radio parameter change dropped: link not ready");
            return false;
        }
        if let Err(e) = next.validate() {
            warn!("radio parameter change rejected: {}", e);
            return false;
        }
        true
    }

    /// How replies are matched to reliable sends.
    pub fn set_ack_match(&mut self, ack_match: AckMatch) {
        self.delivery.set_ack_match(ack_match);
    }

    /// Delay between transport polls in the blocking waits.
    pub fn set_poll_interval(&mut self, interval: Duration) {
        self.delivery.set_poll_interval(interval);
    }

    /// Hook run on every poll of a blocking wait (watchdog feeding, UI
    /// refresh).
    pub fn set_yield_hook<F>(&mut self, hook: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.delivery.set_yield_hook(hook);
    }

    /// Answer `DISCOVER` broadcasts seen by [`poll_mesh`](Self::poll_mesh)
    /// with a PONG to the sender.
    pub fn set_answer_discovery(&mut self, enabled: bool) {
        self.answer_discovery = enabled;
    }

    // ==================== Mode ====================

    /// Switch operating mode. Entering half-duplex starts a TRANSMIT window
    /// of `switch_interval`.
    pub fn set_mode(&mut self, mode: Mode, switch_interval: Duration) {
        self.switch_interval = switch_interval;
        self.mode = OperatingMode::new(mode, switch_interval, Instant::now());
        debug!("mode set to {}", mode);
    }

    pub fn mode(&self) -> Mode {
        self.mode.mode()
    }

    /// Half-duplex window length; also updates a running scheduler.
    pub fn set_tx_rx_interval(&mut self, interval: Duration) {
        self.switch_interval = interval;
        if let Some(sched) = self.mode.scheduler_mut() {
            sched.set_interval(interval);
        }
    }

    pub fn tx_rx_interval(&self) -> Duration {
        self.switch_interval
    }

    /// True unless half-duplex mode is in its RECEIVE window.
    pub fn is_in_transmit_state(&self) -> bool {
        self.mode.may_send()
    }

    /// Current half-duplex window, `None` outside half-duplex mode.
    pub fn duplex_state(&self) -> Option<DuplexState> {
        self.mode.scheduler().map(DuplexScheduler::state)
    }

    /// One step of the half-duplex loop.
    ///
    /// Flips the window when it has expired. On entering TRANSMIT, any
    /// staged text is sent and `on_send` is called with it. While in
    /// RECEIVE, one waiting packet is handed to `on_receive`. No effect
    /// outside half-duplex mode.
    pub fn run_half_duplex_cycle<R, S>(&mut self, mut on_receive: R, mut on_send: S)
    where
        R: FnMut(&[u8]),
        S: FnMut(&str),
    {
        if !self.ready {
            return;
        }
        let now = Instant::now();
        let flipped = match self.mode.scheduler_mut() {
            Some(sched) if sched.tick(now) => Some(sched.flip(now)),
            Some(_) => None,
            None => return,
        };
        if let Some(state) = flipped {
            debug!("half-duplex window: {}", state);
            if state == DuplexState::Transmit && !self.outgoing.is_empty() {
                self.send_data_with_callback(|data| on_send(data));
            }
        }
        if self.mode.may_receive() {
            self.receive_with(|bytes| on_receive(bytes));
        }
    }

    // ==================== Raw send ====================

    /// Send `bytes` as one unframed packet.
    pub fn send_bytes(&mut self, bytes: &[u8]) -> bool {
        let result = self.try_send_bytes(bytes);
        report("send_bytes", result).is_some()
    }

    pub fn try_send_bytes(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        self.check_send()?;
        if bytes.is_empty() {
            return Err(LinkError::EmptyPayload);
        }
        self.delivery.transmit(&mut self.radio, bytes)
    }

    /// Send a single-byte packet.
    pub fn send_byte(&mut self, byte: u8) -> bool {
        self.send_bytes(&[byte])
    }

    // ==================== Staged text ====================

    /// Append `value` and `separator` to the staged text.
    pub fn add_data<V: Display>(&mut self, value: V, separator: &str) {
        self.outgoing.push(value, separator);
    }

    pub fn clear_data(&mut self) {
        self.outgoing.clear();
    }

    pub fn data(&self) -> &str {
        self.outgoing.as_str()
    }

    /// Send the staged text as one raw (unframed) packet.
    pub fn send_data(&mut self) -> bool {
        let result = self.try_send_data();
        report("send_data", result).is_some()
    }

    pub fn try_send_data(&mut self) -> Result<(), LinkError> {
        self.check_send()?;
        if self.outgoing.is_empty() {
            return Err(LinkError::EmptyPayload);
        }
        self.delivery.transmit(&mut self.radio, self.outgoing.as_bytes())
    }

    /// [`send_data`](Self::send_data), then `on_sent` with the text sent.
    pub fn send_data_with_callback<F: FnOnce(&str)>(&mut self, on_sent: F) -> bool {
        if !self.send_data() {
            return false;
        }
        on_sent(self.outgoing.as_str());
        true
    }

    /// Send the staged text at most once per `interval`. Returns whether a
    /// packet went out on this call.
    pub fn send_data_async(&mut self, interval: Duration) -> bool {
        if self.check_send().is_err() || !due(self.last_async_send, interval) {
            return false;
        }
        self.last_async_send = Some(Instant::now());
        self.send_data()
    }

    /// Send the staged text until a reply containing `ACK` arrives.
    pub fn send_data_with_ack(&mut self, timeout: Duration, max_retries: u32) -> bool {
        let result = self.try_send_data_with_ack(timeout, max_retries);
        report("send_data_with_ack", result).is_some()
    }

    pub fn try_send_data_with_ack(&mut self, timeout: Duration, max_retries: u32) -> Result<u32, LinkError> {
        self.check_ready()?;
        if self.outgoing.is_empty() {
            return Err(LinkError::EmptyPayload);
        }
        self.delivery.send_with_ack(
            &mut self.radio,
            &mut self.rx,
            self.outgoing.as_bytes(),
            None,
            timeout,
            max_retries,
        )
    }

    /// Send the staged text and return the first packet heard back.
    pub fn send_and_wait_response(&mut self, timeout: Duration, max_retries: u32) -> Option<Vec<u8>> {
        let result = self.try_send_and_wait_response(timeout, max_retries);
        report("send_and_wait_response", result)
    }

    pub fn try_send_and_wait_response(
        &mut self,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Vec<u8>, LinkError> {
        self.check_ready()?;
        if self.outgoing.is_empty() {
            return Err(LinkError::EmptyPayload);
        }
        self.delivery.send_and_wait_response(
            &mut self.radio,
            &mut self.rx,
            &mut self.mode,
            self.outgoing.as_bytes(),
            timeout,
            max_retries,
        )?;
        Ok(self.rx.bytes().to_vec())
    }

    /// Async [`send_and_wait_response`](Self::send_and_wait_response).
    pub async fn send_and_wait_response_async(
        &mut self,
        timeout: Duration,
        max_retries: u32,
        cancel: &CancellationToken,
    ) -> Option<Vec<u8>> {
        let result = self
            .try_send_and_wait_response_async(timeout, max_retries, cancel)
            .await;
        report("send_and_wait_response_async", result)
    }

    pub async fn try_send_and_wait_response_async(
        &mut self,
        timeout: Duration,
        max_retries: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, LinkError> {
        self.check_ready()?;
        if self.outgoing.is_empty() {
            return Err(LinkError::EmptyPayload);
        }
        self.delivery
            .send_and_wait_response_async(
                &mut self.radio,
                &mut self.rx,
                &mut self.mode,
                self.outgoing.as_bytes(),
                timeout,
                max_retries,
                cancel,
            )
            .await?;
        Ok(self.rx.bytes().to_vec())
    }

    // ==================== Framed send ====================

    /// Last message id sent or allocated.
    pub fn last_message_id(&self) -> u16 {
        self.identity.last_message_id()
    }

    /// Restart the message-id sequence after `start`.
    pub fn seed_message_ids(&mut self, start: u16) {
        self.identity.seed(start);
    }

    /// Restart the message-id sequence at a random point.
    pub fn seed_message_ids_random(&mut self) {
        self.identity.seed_random();
    }

    /// Send a message once. A zero `msg_id` or `source_id` is filled in.
    pub fn send(&mut self, msg: &mut Message) -> bool {
        let result = self.try_send(msg);
        report("send", result).is_some()
    }

    pub fn try_send(&mut self, msg: &mut Message) -> Result<(), LinkError> {
        self.check_send()?;
        self.stamp(msg);
        self.delivery.transmit_message(&mut self.radio, msg)
    }

    /// [`send`](Self::send), then `on_sent` with the message as sent.
    pub fn send_with_callback<F: FnOnce(&Message)>(&mut self, msg: &mut Message, on_sent: F) -> bool {
        if !self.send(msg) {
            return false;
        }
        on_sent(msg);
        true
    }

    /// Send until acknowledged, at most `max_retries` transmissions, each
    /// followed by a wait of up to `timeout`.
    ///
    /// This bypasses the half-duplex gate: the exchange needs both
    /// directions.
    pub fn send_with_ack(&mut self, msg: &mut Message, timeout: Duration, max_retries: u32) -> bool {
        let result = self.try_send_with_ack(msg, timeout, max_retries);
        report("send_with_ack", result).is_some()
    }

    /// Returns the number of transmissions it took.
    pub fn try_send_with_ack(
        &mut self,
        msg: &mut Message,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<u32, LinkError> {
        self.check_ready()?;
        let (frame, len, expect) = self.prepare_reliable(msg)?;
        self.delivery.send_with_ack(
            &mut self.radio,
            &mut self.rx,
            &frame[..len],
            Some(expect),
            timeout,
            max_retries,
        )
    }

    /// Async [`send_with_ack`](Self::send_with_ack); `cancel` aborts the
    /// wait.
    pub async fn send_with_ack_async(
        &mut self,
        msg: &mut Message,
        timeout: Duration,
        max_retries: u32,
        cancel: &CancellationToken,
    ) -> bool {
        let result = self
            .try_send_with_ack_async(msg, timeout, max_retries, cancel)
            .await;
        report("send_with_ack_async", result).is_some()
    }

    pub async fn try_send_with_ack_async(
        &mut self,
        msg: &mut Message,
        timeout: Duration,
        max_retries: u32,
        cancel: &CancellationToken,
    ) -> Result<u32, LinkError> {
        self.check_ready()?;
        let (frame, len, expect) = self.prepare_reliable(msg)?;
        self.delivery
            .send_with_ack_async(
                &mut self.radio,
                &mut self.rx,
                &frame[..len],
                Some(expect),
                timeout,
                max_retries,
                cancel,
            )
            .await
    }

    fn prepare_reliable(
        &mut self,
        msg: &mut Message,
    ) -> Result<([u8; MAX_FRAME_LEN], usize, AckExpectation), LinkError> {
        self.stamp(msg);
        let mut frame = [0u8; MAX_FRAME_LEN];
        let len = encode(msg, &mut frame)?;
        let expect = AckExpectation {
            msg_id: msg.msg_id,
            own_id: self.identity.node_id(),
        };
        Ok((frame, len, expect))
    }

    /// Addressed single-hop message (TTL 1).
    pub fn send_to_node(&mut self, dest_id: u16, data: &[u8], kind: MessageType) -> bool {
        let mut msg = MeshRouter::directed_message(&self.identity, dest_id, data, kind, 1);
        self.send(&mut msg)
    }

    /// Flood a BROADCAST frame with `ttl` hops.
    pub fn broadcast(&mut self, data: &[u8], ttl: u8) -> bool {
        let mut msg = MeshRouter::broadcast_message(&self.identity, data, ttl);
        self.send(&mut msg)
    }

    /// Fill in a missing id and source. Preset ids (ACK replies, relays)
    /// never touch the sequence.
    fn stamp(&mut self, msg: &mut Message) {
        if msg.msg_id == 0 {
            msg.msg_id = self.identity.next_message_id();
        }
        if msg.source_id == 0 {
            msg.source_id = self.identity.node_id();
        }
    }

    // ==================== Receive ====================

    /// Next packet as raw bytes.
    pub fn receive_raw(&mut self) -> Option<Vec<u8>> {
        self.check_receive().ok()?;
        self.rx
            .poll(&mut self.radio, &self.stats)
            .then(|| self.rx.bytes().to_vec())
    }

    /// Hand the next packet, if any, to `on_receive`. Returns whether one
    /// was delivered.
    pub fn receive_with<F: FnOnce(&[u8])>(&mut self, on_receive: F) -> bool {
        if self.check_receive().is_err() || !self.rx.poll(&mut self.radio, &self.stats) {
            return false;
        }
        on_receive(self.rx.bytes());
        true
    }

    /// [`receive_with`](Self::receive_with) at most once per `interval`.
    pub fn receive_async<F: FnOnce(&[u8])>(&mut self, interval: Duration, on_receive: F) -> bool {
        if self.check_receive().is_err() || !due(self.last_async_receive, interval) {
            return false;
        }
        self.last_async_receive = Some(Instant::now());
        self.receive_with(on_receive)
    }

    /// Whether a packet is waiting. The packet stays queued for the next
    /// receive call, unless an ACK or response exchange starts first, which
    /// drops it.
    pub fn is_channel_active(&mut self) -> bool {
        self.ready && self.rx.peek(&mut self.radio, &self.stats)
    }

    /// Next frame, decoded. The known-node table is not touched.
    pub fn receive(&mut self) -> Option<Message> {
        self.try_receive().ok().flatten()
    }

    /// `Ok(None)` when nothing is waiting.
    pub fn try_receive(&mut self) -> Result<Option<Message>, LinkError> {
        self.check_receive()?;
        if !self.rx.poll(&mut self.radio, &self.stats) {
            return Ok(None);
        }
        match decode(self.rx.bytes()) {
            Ok(msg) => Ok(Some(msg)),
            Err(e) => {
                LinkStats::bump(&self.stats.decode_errors);
                debug!("dropping undecodable packet: {}", e);
                Err(e.into())
            }
        }
    }

    /// Next frame, decoded, with its sender recorded as a known node.
    pub fn receive_message(&mut self) -> Option<Message> {
        let msg = self.receive()?;
        let _ = self.router.observe(&msg, self.identity.node_id());
        self.stats.set_known_nodes(self.router.known_nodes().len());
        Some(msg)
    }

    pub fn packet_rssi(&self) -> i16 {
        self.radio.packet_rssi()
    }

    pub fn packet_snr(&self) -> f32 {
        self.radio.packet_snr()
    }

    // ==================== Mesh ====================

    /// Enter mesh mode as `node_id`, forgetting every known node.
    pub fn enable_mesh_mode(&mut self, node_id: u16) {
        self.apply_node_id(node_id);
        self.mode = OperatingMode::Mesh;
        self.router.reset();
        self.stats.set_known_nodes(0);
        info!("mesh mode enabled as node {:#06x}", node_id);
    }

    /// Whether `msg` may be relayed by this node.
    pub fn should_relay(&self, msg: &Message) -> bool {
        MeshRouter::should_relay(msg, self.identity.node_id())
    }

    /// Rebroadcast `msg` with one hop less. Returns false, leaving the TTL
    /// untouched, when it may not be relayed or cannot be sent now.
    pub fn relay(&mut self, msg: &mut Message) -> bool {
        let result = self.try_relay(msg);
        report("relay", result).is_some()
    }

    pub fn try_relay(&mut self, msg: &mut Message) -> Result<(), LinkError> {
        self.check_send()?;
        if !MeshRouter::prepare_relay(msg, self.identity.node_id()) {
            return Err(LinkError::NotRelayable);
        }
        self.delivery.transmit_message(&mut self.radio, msg)?;
        LinkStats::bump(&self.stats.relayed);
        debug!(
            "relayed {:#06x}/{} ttl {}",
            msg.source_id, msg.msg_id, msg.ttl
        );
        Ok(())
    }

    /// Broadcast `DISCOVER`. Mesh mode only.
    pub fn discover_nodes(&mut self, ttl: u8) -> bool {
        let result = self.try_discover_nodes(ttl);
        report("discover_nodes", result).is_some()
    }

    pub fn try_discover_nodes(&mut self, ttl: u8) -> Result<(), LinkError> {
        self.require_mesh()?;
        let mut msg = MeshRouter::discovery_message(&self.identity, ttl);
        self.try_send(&mut msg)
    }

    /// Addressed DATA frame with `ttl` hops. Mesh mode only.
    pub fn send_to_mesh(&mut self, dest_id: u16, data: &[u8], ttl: u8) -> bool {
        let result = self.try_send_to_mesh(dest_id, data, ttl);
        report("send_to_mesh", result).is_some()
    }

    pub fn try_send_to_mesh(&mut self, dest_id: u16, data: &[u8], ttl: u8) -> Result<(), LinkError> {
        self.require_mesh()?;
        let mut msg =
            MeshRouter::directed_message(&self.identity, dest_id, data, MessageType::Data, ttl);
        self.try_send(&mut msg)
    }

    /// One mesh step: receive a frame, learn its sender, relay it when
    /// allowed and not relayed before, and return it when it is addressed
    /// to this node or broadcast.
    pub fn poll_mesh(&mut self) -> Option<Message> {
        let msg = self.receive_message()?;
        let own_id = self.identity.node_id();
        let decision = self.router.route(&msg, own_id);

        if decision.duplicate {
            LinkStats::bump(&self.stats.duplicates_dropped);
        }
        if decision.relay {
            let mut forward = msg.clone();
            let result = self.try_relay(&mut forward);
            report("poll_mesh relay", result);
        }
        if self.answer_discovery && MeshRouter::is_discovery(&msg) && msg.source_id != own_id {
            let mut pong = MeshRouter::directed_message(
                &self.identity,
                msg.source_id,
                b"",
                MessageType::Pong,
                DISCOVERY_TTL,
            );
            let result = self.try_send(&mut pong);
            report("discovery reply", result);
        }
        decision.deliver.then_some(msg)
    }

    pub fn known_node_count(&self) -> usize {
        self.router.known_nodes().len()
    }

    /// Known node at `index`, in the order nodes were first heard.
    pub fn known_node_id(&self, index: usize) -> Option<u16> {
        self.router.known_nodes().get(index)
    }

    pub fn known_nodes(&self) -> &[u16] {
        self.router.known_nodes().as_slice()
    }

    // ==================== Introspection ====================

    pub fn stats(&self) -> Arc<LinkStats> {
        self.stats.clone()
    }

    /// Multi-line human-readable summary.
    pub fn status_string(&self) -> String {
        let mut out = String::from("LoRa Status:\n");
        let _ = writeln!(out, "Ready: {}", if self.ready { "Yes" } else { "No" });
        let _ = writeln!(out, "Mode: {}", self.mode());
        let _ = writeln!(out, "Node ID: {}", self.identity.node_id());
        let _ = writeln!(out, "Frequency: {:.2} MHz", f64::from(self.config.frequency) / 1e6);
        let _ = writeln!(out, "SF: {}", self.config.spread_factor);
        let _ = writeln!(out, "BW: {:.2} kHz", f64::from(self.config.bandwidth) / 1e3);
        let _ = writeln!(out, "Last Msg ID: {}", self.identity.last_message_id());
        let _ = writeln!(out, "Known Nodes: {}", self.known_node_count());
        out
    }

    pub fn radio(&self) -> &T {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut T {
        &mut self.radio
    }

    // ==================== Gates ====================

    fn check_ready(&self) -> Result<(), LinkError> {
        if self.ready {
            Ok(())
        } else {
            Err(LinkError::NotReady)
        }
    }

    fn check_send(&self) -> Result<(), LinkError> {
        self.check_ready()?;
        if !self.mode.may_send() {
            LinkStats::bump(&self.stats.duplex_blocked);
            return Err(LinkError::DuplexBlocked);
        }
        Ok(())
    }

    fn check_receive(&self) -> Result<(), LinkError> {
        self.check_ready()?;
        if !self.mode.may_receive() {
            return Err(LinkError::DuplexBlocked);
        }
        Ok(())
    }

    fn require_mesh(&self) -> Result<(), LinkError> {
        match self.mode.mode() {
            Mode::Mesh => Ok(()),
            current => Err(LinkError::WrongMode {
                required: Mode::Mesh,
                current,
            }),
        }
    }
}

impl<T: RadioTransport> std::fmt::Debug for LoRaLink<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoRaLink")
            .field("ready", &self.ready)
            .field("node_id", &self.identity.node_id())
            .field("mode", &self.mode.mode())
            .field("known_nodes", &self.known_node_count())
            .finish()
    }
}

/// Whether a rate-limited action last run at `last` may run again.
fn due(last: Option<Instant>, interval: Duration) -> bool {
    last.map_or(true, |t| t.elapsed() >= interval)
}

/// Log a failed link operation and collapse it to an `Option`.
fn report<V>(operation: &str, result: Result<V, LinkError>) -> Option<V> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            debug!("{} failed: {}", operation, e);
            None
        }
    }
}
