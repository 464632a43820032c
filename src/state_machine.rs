//! Compressor and decompressor state machines.
//!
//! Every profile runs the same two ladders (RFC 3095, Sections 4.3.1 and
//! 4.3.2): the compressor climbs IR -> FO -> SO as confidence grows and falls
//! back on change or negative feedback; the decompressor climbs NC -> SC ->
//! FC on accepted context-updating packets and slides back down when CRC
//! failures accumulate over sliding windows.

use std::time::{Duration, Instant};

use log::debug;

use crate::constants::{
    FC_FAILURE_THRESHOLD, FC_FAILURE_WINDOW, MAX_FO_COUNT, MAX_IR_COUNT, SC_FAILURE_THRESHOLD,
    SC_FAILURE_WINDOW, TIME_BASED_REFRESH_SECS,
};
use crate::packet_defs::{DecompState, Features};

/// Compressor confidence states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressorState {
    /// No confidence the decompressor holds the context; IR only.
    #[default]
    Ir,
    /// Static chain delivered; dynamic fields still being learned.
    Fo,
    /// Fully converged; smallest packets allowed.
    So,
}

/// The per-context compressor ladder with its counters.
#[derive(Debug, Clone)]
pub struct CompressorStateMachine {
    state: CompressorState,
    ir_count: u32,
    fo_count: u32,
    packets_since_ir: u32,
    ir_refresh_interval: u32,
    last_ir_time: Option<Instant>,
    positive_ack: bool,
}

impl CompressorStateMachine {
    /// Creates the ladder in IR state.
    pub fn new(ir_refresh_interval: u32) -> Self {
        Self {
            state: CompressorState::Ir,
            ir_count: 0,
            fo_count: 0,
            packets_since_ir: 0,
            ir_refresh_interval,
            last_ir_time: None,
            positive_ack: false,
        }
    }

    /// Current state.
    #[inline]
    pub fn state(&self) -> CompressorState {
        self.state
    }

    /// Demotes to IR and clears all confidence.
    pub fn reset_to_ir(&mut self) {
        self.state = CompressorState::Ir;
        self.ir_count = 0;
        self.fo_count = 0;
        self.packets_since_ir = 0;
        self.positive_ack = false;
    }

    /// Pre-packet check: forces IR when a periodic refresh is due.
    pub fn refresh_due(&mut self, now: Instant, features: Features) {
        if self.state == CompressorState::Ir {
            return;
        }
        let count_due =
            self.ir_refresh_interval > 0 && self.packets_since_ir >= self.ir_refresh_interval;
        let time_due = features.contains(Features::TIME_BASED_REFRESHES)
            && self
                .last_ir_time
                .is_some_and(|t| now.duration_since(t) >= Duration::from_secs(TIME_BASED_REFRESH_SECS));
        if count_due || time_due {
            debug!("periodic refresh: back to IR");
            self.reset_to_ir();
        }
    }

    /// Accounts one transmitted IR/IR-DYN and climbs to FO once enough went
    /// out (or a positive ACK arrived first).
    pub fn after_ir_sent(&mut self, now: Instant) {
        self.ir_count += 1;
        self.packets_since_ir = 0;
        self.last_ir_time = Some(now);
        if self.state == CompressorState::Ir
            && (self.ir_count >= MAX_IR_COUNT || self.positive_ack)
        {
            self.state = CompressorState::Fo;
            self.fo_count = 0;
        }
    }

    /// Accounts one compressed packet sent from FO or SO.
    pub fn after_compressed_sent(&mut self) {
        self.packets_since_ir += 1;
        if self.state == CompressorState::Fo {
            self.fo_count += 1;
            if self.fo_count >= MAX_FO_COUNT {
                self.state = CompressorState::So;
            }
        }
    }

    /// A dynamic change not expressible in the smallest formats: SO drops to
    /// FO.
    pub fn dynamic_fallback(&mut self) {
        if self.state == CompressorState::So {
            debug!("dynamic change: SO -> FO");
            self.state = CompressorState::Fo;
        }
        self.fo_count = 0;
    }

    /// Positive acknowledgement from the peer.
    pub fn on_ack(&mut self) {
        self.positive_ack = true;
        if self.state == CompressorState::Ir {
            self.state = CompressorState::Fo;
            self.fo_count = 0;
        }
    }

    /// NACK: dynamic context damage at the peer.
    pub fn on_nack(&mut self) {
        match self.state {
            CompressorState::So => {
                debug!("NACK: SO -> FO");
                self.state = CompressorState::Fo;
                self.fo_count = 0;
            }
            CompressorState::Fo | CompressorState::Ir => {}
        }
    }

    /// STATIC-NACK: static context damage at the peer.
    pub fn on_static_nack(&mut self) {
        debug!("STATIC-NACK: back to IR");
        self.reset_to_ir();
    }
}

/// Sliding window of packet outcomes, newest bit last.
#[derive(Debug, Clone, Default)]
pub struct OutcomeWindow {
    bits: u32,
    len: u32,
    capacity: u32,
}

impl OutcomeWindow {
    /// Creates a window remembering the last `capacity` outcomes.
    pub fn new(capacity: u32) -> Self {
        debug_assert!(capacity <= 32, "outcome window capped at 32 packets");
        Self {
            bits: 0,
            len: 0,
            capacity,
        }
    }

    /// Records one outcome; `true` means failure.
    pub fn record(&mut self, failure: bool) {
        let mask = if self.capacity >= 32 {
            u32::MAX
        } else {
            (1u32 << self.capacity) - 1
        };
        self.bits = ((self.bits << 1) | failure as u32) & mask;
        self.len = (self.len + 1).min(self.capacity);
    }

    /// Failures among the remembered outcomes.
    pub fn failures(&self) -> u32 {
        self.bits.count_ones()
    }

    /// Outcomes recorded so far, saturating at the window capacity.
    pub fn observed(&self) -> u32 {
        self.len
    }

    /// Forgets all outcomes.
    pub fn clear(&mut self) {
        self.bits = 0;
        self.len = 0;
    }
}

/// The per-context decompressor ladder with its failure windows.
#[derive(Debug, Clone)]
pub struct DecompressorStateMachine {
    state: DecompState,
    fc_window: OutcomeWindow,
    sc_window: OutcomeWindow,
}

impl Default for DecompressorStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl DecompressorStateMachine {
    /// Creates the ladder in No Context.
    pub fn new() -> Self {
        Self {
            state: DecompState::NoContext,
            fc_window: OutcomeWindow::new(FC_FAILURE_WINDOW),
            sc_window: OutcomeWindow::new(SC_FAILURE_WINDOW),
        }
    }

    /// Current state.
    #[inline]
    pub fn state(&self) -> DecompState {
        self.state
    }

    /// An IR (or IR-DYN / co_repair) passed its CRC: full context.
    pub fn on_context_updated(&mut self) {
        self.state = DecompState::FullContext;
        self.fc_window.clear();
        self.sc_window.clear();
    }

    /// A compressed packet decoded and passed its CRC. A success in Static
    /// Context means a dynamic updater got through: full context again.
    pub fn on_success(&mut self) {
        match self.state {
            DecompState::FullContext => self.fc_window.record(false),
            DecompState::StaticContext => self.on_context_updated(),
            DecompState::NoContext => {}
        }
    }

    /// A CRC failure after repair attempts. Returns the state after sliding.
    pub fn on_crc_failure(&mut self) -> DecompState {
        match self.state {
            DecompState::FullContext => {
                self.fc_window.record(true);
                if self.fc_window.failures() >= FC_FAILURE_THRESHOLD {
                    debug!("FC failure window exceeded: FC -> SC");
                    self.state = DecompState::StaticContext;
                    self.fc_window.clear();
                    self.sc_window.clear();
                }
            }
            DecompState::StaticContext => {
                self.sc_window.record(true);
                if self.sc_window.failures() >= SC_FAILURE_THRESHOLD {
                    debug!("SC failure window exceeded: SC -> NC");
                    self.state = DecompState::NoContext;
                    self.sc_window.clear();
                }
            }
            DecompState::NoContext => {}
        }
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compressor_climbs_ir_fo_so() {
        let now = Instant::now();
        let mut machine = CompressorStateMachine::new(0);
        assert_eq!(machine.state(), CompressorState::Ir);

        for _ in 0..MAX_IR_COUNT {
            machine.after_ir_sent(now);
        }
        assert_eq!(machine.state(), CompressorState::Fo);

        for _ in 0..MAX_FO_COUNT {
            machine.after_compressed_sent();
        }
        assert_eq!(machine.state(), CompressorState::So);
    }

    #[test]
    fn ack_short_circuits_ir() {
        let mut machine = CompressorStateMachine::new(0);
        machine.on_ack();
        assert_eq!(machine.state(), CompressorState::Fo);
    }

    #[test]
    fn nack_demotes_so_to_fo_and_static_nack_to_ir() {
        let now = Instant::now();
        let mut machine = CompressorStateMachine::new(0);
        machine.after_ir_sent(now);
        for _ in 0..MAX_FO_COUNT {
            machine.after_compressed_sent();
        }
        assert_eq!(machine.state(), CompressorState::So);

        machine.on_nack();
        assert_eq!(machine.state(), CompressorState::Fo);

        machine.on_static_nack();
        assert_eq!(machine.state(), CompressorState::Ir);
    }

    #[test]
    fn packet_count_refresh_forces_ir() {
        let now = Instant::now();
        let mut machine = CompressorStateMachine::new(4);
        machine.after_ir_sent(now);
        for _ in 0..4 {
            machine.after_compressed_sent();
            machine.refresh_due(now, Features::NONE);
        }
        assert_eq!(machine.state(), CompressorState::Ir);
    }

    #[test]
    fn time_based_refresh_needs_the_feature() {
        let t0 = Instant::now();
        let late = t0 + Duration::from_secs(TIME_BASED_REFRESH_SECS + 1);
        let mut machine = CompressorStateMachine::new(0);
        machine.after_ir_sent(t0);
        machine.after_compressed_sent();

        machine.refresh_due(late, Features::NONE);
        assert_eq!(machine.state(), CompressorState::Fo);

        machine.refresh_due(late, Features::TIME_BASED_REFRESHES);
        assert_eq!(machine.state(), CompressorState::Ir);
    }

    #[test]
    fn decompressor_fc_demotes_after_threshold_failures() {
        let mut machine = DecompressorStateMachine::new();
        machine.on_context_updated();
        assert_eq!(machine.state(), DecompState::FullContext);

        machine.on_crc_failure();
        assert_eq!(machine.state(), DecompState::FullContext);
        machine.on_crc_failure();
        assert_eq!(machine.state(), DecompState::StaticContext);
    }

    #[test]
    fn fc_failures_must_cluster_within_window() {
        let mut machine = DecompressorStateMachine::new();
        machine.on_context_updated();
        machine.on_crc_failure();
        // Eight successes age the failure out of the window.
        for _ in 0..FC_FAILURE_WINDOW {
            machine.on_success();
        }
        machine.on_crc_failure();
        assert_eq!(machine.state(), DecompState::FullContext);
    }

    #[test]
    fn sc_demotes_to_nc_after_sixteen_failures() {
        let mut machine = DecompressorStateMachine::new();
        machine.on_context_updated();
        machine.on_crc_failure();
        machine.on_crc_failure();
        assert_eq!(machine.state(), DecompState::StaticContext);

        for _ in 0..SC_FAILURE_THRESHOLD - 1 {
            machine.on_crc_failure();
            assert_eq!(machine.state(), DecompState::StaticContext);
        }
        machine.on_crc_failure();
        assert_eq!(machine.state(), DecompState::NoContext);
    }

    #[test]
    fn outcome_window_slides() {
        let mut window = OutcomeWindow::new(4);
        window.record(true);
        window.record(false);
        window.record(false);
        assert_eq!(window.failures(), 1);
        window.record(false);
        window.record(false);
        assert_eq!(window.failures(), 0);
    }
}
