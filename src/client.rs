use embedded_io::{Read, ReadReady, Write};
use fugit::{TimerDurationU32, TimerInstantU32};

use crate::clock::{elapsed, ms, Clock};
use crate::config::ModemConfig;
use crate::error::{from_clock, Error};
use crate::sms::{InboundMessage, TxQueue};
use crate::state::{FailureCounters, ModemState, Timers};
use crate::transaction::{WaitPolicy, RX_BUF_LEN};

/// Supervised SIM800 modem driver.
///
/// One owned state record: every lifecycle guard and pipeline decision is a
/// function of these fields, the clock and the latest transaction outcome.
/// The serial transport is consumed through the blocking [`embedded_io`]
/// traits; pass `&mut port` to keep it borrowed by the driver rather than
/// owned.
pub struct Device<W, CLK, CFG, const TIMER_HZ: u32 = 1000>
where
    CFG: ModemConfig,
{
    pub(crate) serial: W,
    pub(crate) clock: CLK,
    pub(crate) config: CFG,

    pub(crate) state: ModemState,
    pub(crate) counters: FailureCounters,
    pub(crate) timers: Timers<TIMER_HZ>,

    /// Accumulation buffer of the transport line reader.
    pub(crate) rcv_buf: heapless::String<RX_BUF_LEN>,
    /// Latest transaction contained an `OK` token.
    pub(crate) at_ack: bool,
    /// A `+CMTI:` notification has been seen and not yet drained.
    pub(crate) unread_sms: bool,
    /// Most recent `ERROR`-carrying line, diagnostics only.
    pub(crate) last_error: heapless::String<64>,

    pub(crate) signal_strength: u8,

    pub(crate) inbound: InboundMessage,
    pub(crate) sms_available: bool,
    pub(crate) tx_queue: TxQueue<TIMER_HZ>,
}

impl<W, CLK, CFG, const TIMER_HZ: u32> Device<W, CLK, CFG, TIMER_HZ>
where
    W: Read + ReadReady + Write,
    CLK: Clock<TIMER_HZ>,
    CFG: ModemConfig,
{
    pub fn new(serial: W, clock: CLK, config: CFG) -> Self {
        Self {
            serial,
            clock,
            config,
            state: ModemState::Resetting,
            counters: FailureCounters::default(),
            timers: Timers::default(),
            rcv_buf: heapless::String::new(),
            at_ack: false,
            unread_sms: false,
            last_error: heapless::String::new(),
            signal_strength: 0,
            inbound: InboundMessage::default(),
            sms_available: false,
            tx_queue: TxQueue::new(),
        }
    }

    /// Advance the state machine by one step.
    ///
    /// Call repeatedly from the host loop. Most ticks return quickly; the
    /// bounded waits of an in-flight transaction (worst case ~20 s while a
    /// send confirmation is pending) block the caller.
    pub fn tick(&mut self) {
        let now = self.clock.now();

        match self.state {
            ModemState::Resetting => {
                let uptime = elapsed(now, TimerInstantU32::from_ticks(0));
                if uptime < ms::<TIMER_HZ>(10_000)
                    || elapsed(now, self.timers.last_reset) > ms::<TIMER_HZ>(CFG::MODEM_REGULAR_RESET_MS)
                {
                    info!("modem: power reset");
                    self.power_cycle();
                    self.timers.last_reset = self.clock.now();
                    self.counters.at_dead = 0;
                    self.counters.no_network = 0;
                    self.counters.resets = self.counters.resets.saturating_add(1);
                    self.state = ModemState::PostReset;
                }
            }

            ModemState::PostReset => {
                if elapsed(now, self.timers.last_reset) > ms::<TIMER_HZ>(CFG::MODEM_RESET_WAIT_MS) {
                    debug!("modem: reset settle time over");
                    self.counters.at_dead = 0;
                    self.counters.no_network = 0;
                    self.state = ModemState::CheckingAt;
                }
            }

            ModemState::CheckingAt => {
                if elapsed(now, self.timers.last_alive_check) > ms::<TIMER_HZ>(1_000) {
                    debug!("modem: AT alive check");
                    if self.check_at_alive() {
                        self.counters.at_dead = 0;
                        self.state = ModemState::CheckingSim;
                    } else {
                        self.counters.at_dead += 1;
                        if self.counters.at_dead > 5 {
                            error!("modem: AT interface dead, check wiring");
                        }
                        if self.counters.at_dead > CFG::MAX_AT_RETRIES {
                            self.state = ModemState::Resetting;
                        }
                    }
                    self.timers.last_alive_check = self.clock.now();
                }
            }

            ModemState::CheckingSim => {
                let since = elapsed(now, self.timers.last_alive_check);
                if (self.counters.no_network < 3 && since > ms::<TIMER_HZ>(1_000)) || since > ms::<TIMER_HZ>(30_000) {
                    debug!("modem: SIM check");
                    if self.check_sim_available() {
                        self.counters.at_dead = 0;
                        self.counters.no_network = 0;
                        self.state = ModemState::CheckingNetwork;
                    } else {
                        self.counters.no_network += 1;
                        warn!("modem: no SIM, errors {}", self.counters.no_network);
                        if self.counters.no_network > 100 {
                            self.state = ModemState::Resetting;
                        }
                    }
                    self.timers.last_alive_check = self.clock.now();
                }
            }

            ModemState::CheckingNetwork => {
                let since = elapsed(now, self.timers.last_alive_check);
                if (self.counters.no_network < 3 && since > ms::<TIMER_HZ>(1_000)) || since > ms::<TIMER_HZ>(10_000) {
                    debug!("modem: network registration check");
                    if self.check_registration() {
                        self.counters.at_dead = 0;
                        self.counters.no_network = 0;
                        self.state = ModemState::Initializing;
                        self.signal_strength = self.read_signal_strength();
                        if self.signal_strength == 0 {
                            info!("modem: no signal");
                        }
                    } else {
                        self.counters.no_network += 1;
                        warn!("modem: no network, errors {}", self.counters.no_network);
                        if self.counters.no_network > CFG::MAX_NETWORK_RETRIES {
                            self.state = ModemState::Resetting;
                        }
                    }
                    self.timers.last_alive_check = self.clock.now();
                }
            }

            ModemState::Initializing => {
                let since = elapsed(now, self.timers.last_alive_check);
                if (self.counters.at_dead < 3 && since > ms::<TIMER_HZ>(1_000)) || since > ms::<TIMER_HZ>(5_000) {
                    debug!("modem: initial settings");
                    let lenient = self.counters.at_dead > 5 && self.counters.resets > 2;
                    if self.initial_settings() || lenient {
                        self.counters.at_dead = 0;
                        self.state = ModemState::Ready;
                        self.signal_strength = self.read_signal_strength();
                        if self.signal_strength == 0 {
                            info!("modem: no signal");
                        }
                    } else {
                        self.counters.at_dead += 1;
                        warn!("modem: settings failed, errors {}", self.counters.at_dead);
                        if self.counters.at_dead > 30 {
                            self.state = ModemState::Resetting;
                        } else if self.counters.at_dead > 3 {
                            // Settings keep failing but the link may still
                            // carry messages; try the pipelines anyway and
                            // move on if receiving works.
                            if self.drain_one_message() {
                                self.sms_available = true;
                                self.state = ModemState::Ready;
                            }
                            self.drive_transmit_queue();
                        }
                    }
                    self.timers.last_alive_check = self.clock.now();
                }
            }

            ModemState::Ready => self.ready_tick(),
        }
    }

    /// Fixed-priority steady-state work: stuck outbound first, then new
    /// message notifications, then the regular receive poll or (else) the
    /// network health backstop, then the transmit queue, then one short
    /// passive poll to absorb stray bytes.
    fn ready_tick(&mut self) {
        let now = self.clock.now();

        if self.tx_queue.is_loaded() && self.counters.comm_failures > 2 {
            info!("modem: clearing stuck outbound message first");
            self.drive_transmit_queue();
        }

        if self.unread_sms {
            info!("modem: processing new message notification");
            self.resync_transport();
            if self.drain_one_message() {
                self.sms_available = true;
            }
            self.unread_sms = false;
        }

        if elapsed(now, self.timers.regular_poll) > ms::<TIMER_HZ>(CFG::SMS_CHECK_INTERVAL_MS) {
            debug!("modem: regular message check");
            self.resync_transport();
            for _ in 0..CFG::MAX_SMS_CHECK_PER_CYCLE {
                if self.drain_one_message() {
                    self.sms_available = true;
                } else {
                    break;
                }
            }
            self.timers.regular_poll = self.clock.now();
        } else if elapsed(now, self.timers.network_health) > ms::<TIMER_HZ>(CFG::NETWORK_HEALTH_CHECK_MS) {
            self.signal_strength = self.read_signal_strength();
            let t = self.clock.now();
            if self.signal_strength != 0 {
                self.timers.network_health = t;
            } else {
                info!("modem: no signal");
            }
            if elapsed(t, self.timers.network_health) > ms::<TIMER_HZ>(CFG::NETWORK_RESET_TIMEOUT_MS) {
                error!("modem: prolonged signal loss, forcing reset");
                self.state = ModemState::Resetting;
            }
        }

        if !self.unread_sms {
            self.drive_transmit_queue();
        }

        // Absorb stray bytes (unsolicited notifications land here too).
        self.check_response(20, WaitPolicy::Drain);
    }

    /// Queue an outbound SMS, replacing any stale pending one. The queued
    /// message becomes due for an immediate attempt on the next tick.
    pub fn queue_sms(&mut self, number: &str, body: &str) {
        let now = self.clock.now();
        if self.tx_queue.is_stale(now) {
            info!("modem: discarding stale queued message");
            self.resync_transport();
        }
        self.tx_queue.load(number, body);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ModemState {
        self.state
    }

    /// Last signal strength reading, 0-31 with 0 meaning no signal/unknown.
    pub fn signal_strength(&self) -> u8 {
        self.signal_strength
    }

    /// A received message is waiting to be taken.
    pub fn sms_available(&self) -> bool {
        self.sms_available
    }

    /// Take the received message, clearing the available flag. The mailbox
    /// holds one message; an undrained one is overwritten by the next.
    pub fn take_message(&mut self) -> Option<InboundMessage> {
        if self.sms_available {
            self.sms_available = false;
            Some(self.inbound.clone())
        } else {
            None
        }
    }

    pub fn last_received_sender(&self) -> &str {
        &self.inbound.sender
    }

    pub fn last_received_body(&self) -> &str {
        &self.inbound.body
    }

    /// Most recent `ERROR`-carrying response line, for diagnostics.
    pub fn last_error_text(&self) -> &str {
        &self.last_error
    }

    /// Switch the network status LED on or off (`AT+CNETLIGHT`).
    pub fn set_netlight(&mut self, on: bool) {
        self.send_at(if on { "+CNETLIGHT=1" } else { "+CNETLIGHT=0" });
    }

    /// SIM presence probe: setting text mode answers with a CME error when
    /// no SIM is inserted.
    fn check_sim_available(&mut self) -> bool {
        self.send_at("+CMGF=1");
        self.check_response(1_000, WaitPolicy::UntilOk);
        if self.rcv_buf.contains("ERROR") {
            return false;
        }
        self.at_ack
    }

    /// Full settings sequence run on entry to `Ready`.
    fn initial_settings(&mut self) -> bool {
        self.check_response(100, WaitPolicy::Drain);

        self.run_transaction("", 1_000, WaitPolicy::UntilOk);
        self.run_transaction("E0", 1_000, WaitPolicy::UntilOk);
        self.run_transaction("+CMEE=2", 1_000, WaitPolicy::UntilOk);
        self.run_transaction("+CMGF=1", 1_000, WaitPolicy::UntilOk);

        if self.at_ack {
            self.run_transaction("+CNMI=1,1,0,0,0", 1_000, WaitPolicy::UntilOk);
            if self.at_ack {
                self.run_transaction("+CSMP=17,167,0,0", 1_000, WaitPolicy::UntilOk);
            }
        }

        if self.init_tx_sms_settings().is_err() {
            return false;
        }

        self.at_ack
    }

    /// Run the host clock for `duration`.
    pub(crate) fn delay(&mut self, duration: TimerDurationU32<TIMER_HZ>) -> Result<(), Error> {
        self.clock.start(duration).map_err(from_clock)?;
        nb::block!(self.clock.wait()).map_err(from_clock)
    }
}
