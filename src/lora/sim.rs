//! In-memory radio medium.
//!
//! [`SimMedium`] models one shared LoRa channel. Every [`SimTransport`]
//! attached to it hears every packet the others transmit, unless the link
//! between the two stations has been cut with [`SimMedium::set_link`], which
//! is how multi-hop topologies are built in tests.
//!
//! A transport can also carry a scripted responder, called on every
//! transmission, which queues a reply after a given delay. This is enough to
//! play the remote side of an ACK exchange deterministically.
//!
//! # Example
//!
//! ```
//! use lora_mesh_link::lora::{RadioTransport, SimMedium};
//!
//! let medium = SimMedium::new();
//! let mut a = medium.attach();
//! let mut b = medium.attach();
//! a.begin(915_000_000).unwrap();
//! b.begin(915_000_000).unwrap();
//!
//! a.begin_packet().unwrap();
//! a.write_all(b"ping");
//! a.end_packet().unwrap();
//!
//! assert_eq!(b.parse_packet(), 4);
//! assert_eq!(b.read(), Some(b'p'));
//! ```

use super::config::{Pins, BANDWIDTH_HZ, PREAMBLE_LENGTH, SPREADING_FACTOR, SYNC_WORD, TX_POWER};
use super::transport::{RadioTransport, TransportError};
use crate::protocol::MAX_FRAME_LEN;
use log::{trace, warn};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Reply produced by a responder: deliver `data` after `delay`.
pub type ScriptedReply = (Duration, Vec<u8>);

/// Responder hook: `(frame, transmission_index) -> reply`.
///
/// `transmission_index` counts this station's transmissions from zero.
pub type Responder = Box<dyn FnMut(&[u8], usize) -> Option<ScriptedReply> + Send>;

/// RSSI reported for every simulated packet.
const SIM_RSSI_DBM: i16 = -60;

/// SNR reported for every simulated packet.
const SIM_SNR_DB: f32 = 9.5;

/// Transceiver FIFO size; writes past it are dropped.
const FIFO_LEN: usize = 255;

/// Radio parameters last applied to a station.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioSettings {
    pub frequency: Option<u32>,
    pub pins: Option<Pins>,
    pub spreading_factor: u8,
    pub bandwidth_hz: u32,
    pub tx_power: u8,
    pub sync_word: u8,
    pub preamble_len: u16,
    pub crc: bool,
    pub asleep: bool,
}

impl Default for RadioSettings {
    fn default() -> Self {
        Self {
            frequency: None,
            pins: None,
            spreading_factor: SPREADING_FACTOR,
            bandwidth_hz: BANDWIDTH_HZ,
            tx_power: TX_POWER,
            sync_word: SYNC_WORD,
            preamble_len: PREAMBLE_LENGTH,
            crc: false,
            asleep: false,
        }
    }
}

struct PendingPacket {
    data: Vec<u8>,
    deliver_at: Instant,
}

#[derive(Default)]
struct Station {
    running: bool,
    fail_begin: bool,
    settings: RadioSettings,
    tx_open: Option<Vec<u8>>,
    rx_current: VecDeque<u8>,
    inbox: VecDeque<PendingPacket>,
    sent: Vec<Vec<u8>>,
    responder: Option<Responder>,
}

#[derive(Default)]
struct MediumState {
    stations: Vec<Station>,
    /// Cut links, stored as (lower, higher) station index pairs.
    cut: HashSet<(usize, usize)>,
}

impl MediumState {
    fn link_up(&self, a: usize, b: usize) -> bool {
        !self.cut.contains(&(a.min(b), a.max(b)))
    }
}

/// Shared simulated channel.
#[derive(Clone, Default)]
pub struct SimMedium {
    state: Arc<Mutex<MediumState>>,
}

impl SimMedium {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new station and return its transport.
    pub fn attach(&self) -> SimTransport {
        let mut state = lock(&self.state);
        state.stations.push(Station::default());
        SimTransport {
            state: self.state.clone(),
            station: state.stations.len() - 1,
        }
    }

    /// Bring the link between two stations up or down.
    pub fn set_link(&self, a: &SimTransport, b: &SimTransport, up: bool) {
        let key = (a.station.min(b.station), a.station.max(b.station));
        let mut state = lock(&self.state);
        if up {
            state.cut.remove(&key);
        } else {
            state.cut.insert(key);
        }
    }

    /// Number of attached stations.
    pub fn station_count(&self) -> usize {
        lock(&self.state).stations.len()
    }
}

/// One station on a [`SimMedium`].
///
/// Cloning yields another handle to the same station, so a test can keep
/// one handle for inspection while the link layer owns the other.
#[derive(Clone)]
pub struct SimTransport {
    state: Arc<Mutex<MediumState>>,
    station: usize,
}

impl SimTransport {
    /// A station on its own private medium.
    pub fn new() -> Self {
        SimMedium::new().attach()
    }

    /// Index of this station on its medium.
    pub fn station_index(&self) -> usize {
        self.station
    }

    /// Queue an inbound packet, readable immediately.
    pub fn inject(&self, data: &[u8]) {
        self.inject_after(Duration::ZERO, data);
    }

    /// Queue an inbound packet, readable after `delay`.
    pub fn inject_after(&self, delay: Duration, data: &[u8]) {
        self.with_station(|station| {
            station.inbox.push_back(PendingPacket {
                data: data.to_vec(),
                deliver_at: Instant::now() + delay,
            })
        });
    }

    /// Install a responder called on every transmission of this station.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&[u8], usize) -> Option<ScriptedReply> + Send + 'static,
    {
        self.with_station(|station| station.responder = Some(Box::new(responder)));
    }

    /// Make the next [`begin`](RadioTransport::begin) calls fail.
    pub fn set_fail_begin(&self, fail: bool) {
        self.with_station(|station| station.fail_begin = fail);
    }

    /// Every packet transmitted so far.
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.with_station(|station| station.sent.clone())
    }

    /// Number of packets transmitted so far.
    pub fn sent_count(&self) -> usize {
        self.with_station(|station| station.sent.len())
    }

    /// Forget recorded transmissions.
    pub fn clear_sent(&self) {
        self.with_station(|station| station.sent.clear());
    }

    /// Packets queued but not yet read.
    pub fn pending_inbound(&self) -> usize {
        self.with_station(|station| station.inbox.len())
    }

    /// Radio parameters currently applied.
    pub fn settings(&self) -> RadioSettings {
        self.with_station(|station| station.settings.clone())
    }

    fn with_station<R>(&self, f: impl FnOnce(&mut Station) -> R) -> R {
        let mut state = lock(&self.state);
        f(&mut state.stations[self.station])
    }
}

impl Default for SimTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl RadioTransport for SimTransport {
    fn set_pins(&mut self, pins: Pins) {
        self.with_station(|station| station.settings.pins = Some(pins));
    }

    fn begin(&mut self, frequency: u32) -> Result<(), TransportError> {
        self.with_station(|station| {
            if station.fail_begin {
                return Err(TransportError::InitFailed);
            }
            station.running = true;
            station.settings.frequency = Some(frequency);
            Ok(())
        })
    }

    fn end(&mut self) {
        self.with_station(|station| {
            station.running = false;
            station.tx_open = None;
            station.rx_current.clear();
        });
    }

    fn begin_packet(&mut self) -> Result<(), TransportError> {
        self.with_station(|station| {
            if !station.running || station.settings.asleep || station.tx_open.is_some() {
                return Err(TransportError::Busy);
            }
            station.tx_open = Some(Vec::with_capacity(MAX_FRAME_LEN));
            Ok(())
        })
    }

    fn write(&mut self, byte: u8) -> usize {
        self.with_station(|station| match station.tx_open.as_mut() {
            Some(buf) if buf.len() < FIFO_LEN => {
                buf.push(byte);
                1
            }
            _ => 0,
        })
    }

    fn end_packet(&mut self) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        let me = self.station;
        let frame = state.stations[me]
            .tx_open
            .take()
            .ok_or(TransportError::TxFailed)?;
        let now = Instant::now();

        let receivers: Vec<usize> = (0..state.stations.len())
            .filter(|&other| other != me && state.link_up(me, other))
            .collect();
        for other in receivers {
            let station = &mut state.stations[other];
            if station.running && !station.settings.asleep {
                station.inbox.push_back(PendingPacket {
                    data: frame.clone(),
                    deliver_at: now,
                });
            }
        }

        let station = &mut state.stations[me];
        let index = station.sent.len();
        station.sent.push(frame.clone());
        trace!("sim station {} tx #{}: {} bytes", me, index, frame.len());

        if let Some(responder) = station.responder.as_mut() {
            if let Some((delay, reply)) = responder(&frame, index) {
                station.inbox.push_back(PendingPacket {
                    data: reply,
                    deliver_at: now + delay,
                });
            }
        }
        Ok(())
    }

    fn parse_packet(&mut self) -> usize {
        self.with_station(|station| {
            if !station.running {
                return 0;
            }
            let now = Instant::now();
            let ready = station.inbox.iter().position(|p| p.deliver_at <= now);
            match ready.and_then(|i| station.inbox.remove(i)) {
                Some(packet) => {
                    station.rx_current = packet.data.into();
                    station.rx_current.len()
                }
                None => 0,
            }
        })
    }

    fn available(&mut self) -> usize {
        self.with_station(|station| station.rx_current.len())
    }

    fn read(&mut self) -> Option<u8> {
        self.with_station(|station| station.rx_current.pop_front())
    }

    fn set_spreading_factor(&mut self, sf: u8) {
        self.with_station(|station| station.settings.spreading_factor = sf);
    }

    fn set_signal_bandwidth(&mut self, bandwidth_hz: u32) {
        self.with_station(|station| station.settings.bandwidth_hz = bandwidth_hz);
    }

    fn set_tx_power(&mut self, dbm: u8) {
        self.with_station(|station| station.settings.tx_power = dbm);
    }

    fn set_sync_word(&mut self, sync_word: u8) {
        self.with_station(|station| station.settings.sync_word = sync_word);
    }

    fn set_preamble_length(&mut self, symbols: u16) {
        self.with_station(|station| station.settings.preamble_len = symbols);
    }

    fn enable_crc(&mut self) {
        self.with_station(|station| station.settings.crc = true);
    }

    fn disable_crc(&mut self) {
        self.with_station(|station| station.settings.crc = false);
    }

    fn sleep(&mut self) {
        self.with_station(|station| station.settings.asleep = true);
    }

    fn idle(&mut self) {
        self.with_station(|station| station.settings.asleep = false);
    }

    fn packet_rssi(&self) -> i16 {
        SIM_RSSI_DBM
    }

    fn packet_snr(&self) -> f32 {
        SIM_SNR_DB
    }
}

/// Lock the medium, recovering from a poisoned mutex.
fn lock(state: &Mutex<MediumState>) -> MutexGuard<'_, MediumState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("sim medium mutex was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}
