use fugit::TimerInstantU32;

/// Lifecycle states of the supervised modem.
///
/// Transitions are a strict forward progression on success; every state can
/// fall back to `Resetting` once its failure counter exceeds the threshold
/// configured for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ModemState {
    Resetting,
    PostReset,
    CheckingAt,
    CheckingSim,
    CheckingNetwork,
    Initializing,
    Ready,
}

/// Failure accounting across lifecycle states.
///
/// `at_dead` and `no_network` go back to zero when their check first
/// succeeds; `comm_failures` resets on a successful send; `resets` only ever
/// grows and is used to relax the initialization sequence after repeated
/// power-cycles.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct FailureCounters {
    pub at_dead: u8,
    pub no_network: u8,
    pub comm_failures: u8,
    pub resets: u16,
}

/// Monotonic-clock readings the lifecycle guards compare against.
///
/// All start at tick zero (boot), so first-tick guards behave as
/// "time since boot" checks.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Timers<const TIMER_HZ: u32> {
    /// Completion of the last power-cycle.
    pub last_reset: TimerInstantU32<TIMER_HZ>,
    /// Last per-state check (AT/SIM/network/init pacing).
    pub last_alive_check: TimerInstantU32<TIMER_HZ>,
    /// Last regular receive poll in `Ready`.
    pub regular_poll: TimerInstantU32<TIMER_HZ>,
    /// Last evidence of network liveness (signal seen, unsolicited traffic).
    pub network_health: TimerInstantU32<TIMER_HZ>,
}

impl<const TIMER_HZ: u32> Default for Timers<TIMER_HZ> {
    fn default() -> Self {
        Self {
            last_reset: TimerInstantU32::from_ticks(0),
            last_alive_check: TimerInstantU32::from_ticks(0),
            regular_poll: TimerInstantU32::from_ticks(0),
            network_health: TimerInstantU32::from_ticks(0),
        }
    }
}
