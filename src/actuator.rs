//! Feedback-verified relay state machine.
//!
//! Four states, one exhaustive match per event; every (state, event)
//! pair is either handled or explicitly ignored, so there is no
//! dispatch table to fall off the end of. The two deferred timers
//! (feedback check and retry) are plain deadlines advanced by
//! [`RelayMachine::tick`]; at most one of them is armed at a time.
//!
//! The machine is single-writer: the management loop injects commands,
//! input changes and ticks from one thread, so no lock is needed here.
//! Side effects are confined to the [`ActuatorPort`]: relay output,
//! signal lamp and the liveness indicator. Nothing else is touched.

use log::{info, warn};

use crate::ports::ActuatorPort;

/// Blink count for the "actuation retry" warning pattern.
const RETRY_WARNING_BLINKS: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Off,
    /// De-energised between a failed feedback check and the retry.
    OffWaitingFeedback,
    On,
    /// Energised, waiting for the feedback input to confirm.
    OnWaitingFeedback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelayEvent {
    CommandOn,
    CommandOff,
    InputsChanged,
    CheckFeedback,
    Retry,
}

/// Snapshot of everything outside the machine that a transition guard
/// needs. The controller assembles it from the model and the fresh
/// input levels, so the machine itself never reaches into shared state.
#[derive(Debug, Clone, Copy)]
pub struct RelayEnv {
    /// Combined safety interlock verdict for the current device mode.
    pub interlock_ok: bool,
    /// Debounced feedback input level.
    pub feedback_level: bool,
    /// Level the feedback input must read when the relay is energised.
    pub feedback_direction: bool,
    /// Whether this device mode verifies actuation through feedback.
    pub verify_feedback: bool,
    /// Retry budget, 1-8.
    pub attempts_max: u8,
    /// Delay before a feedback check or retry fires.
    pub delay_ms: u64,
}

impl RelayEnv {
    fn feedback_confirms(&self) -> bool {
        self.feedback_level == self.feedback_direction
    }
}

#[derive(Debug)]
pub struct RelayMachine {
    state: RelayState,
    attempts_used: u8,
    check_deadline: Option<u64>,
    retry_deadline: Option<u64>,
    energized: bool,
    feedback_fault: bool,
}

impl RelayMachine {
    pub fn new() -> Self {
        Self {
            state: RelayState::Off,
            attempts_used: 0,
            check_deadline: None,
            retry_deadline: None,
            energized: false,
            feedback_fault: false,
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    /// Commanded intent, as seen through the coil register. True for
    /// the whole verification/retry sequence, not just while energised.
    pub fn commanded_on(&self) -> bool {
        !matches!(self.state, RelayState::Off)
    }

    /// Latched when the retry budget ran out without confirmation;
    /// cleared by the next accepted command.
    pub fn feedback_fault(&self) -> bool {
        self.feedback_fault
    }

    /// Inject a coil command. Returns whether it was accepted; a
    /// `CommandOn` against a failed interlock is rejected and the
    /// machine stays de-energised. Never blocks.
    pub fn command(
        &mut self,
        on: bool,
        env: &RelayEnv,
        now: u64,
        hw: &mut impl ActuatorPort,
    ) -> bool {
        if on {
            if !env.interlock_ok {
                warn!("relay command rejected, interlock not satisfied");
                return false;
            }
            self.dispatch(RelayEvent::CommandOn, env, now, hw);
        } else {
            self.dispatch(RelayEvent::CommandOff, env, now, hw);
        }
        true
    }

    /// Re-evaluate against fresh inputs; called on every input refresh.
    pub fn inputs_changed(&mut self, env: &RelayEnv, now: u64, hw: &mut impl ActuatorPort) {
        self.dispatch(RelayEvent::InputsChanged, env, now, hw);
    }

    /// Advance whichever deferred timer has expired.
    pub fn tick(&mut self, env: &RelayEnv, now: u64, hw: &mut impl ActuatorPort) {
        if self.check_deadline.is_some_and(|d| now >= d) {
            self.check_deadline = None;
            self.dispatch(RelayEvent::CheckFeedback, env, now, hw);
        } else if self.retry_deadline.is_some_and(|d| now >= d) {
            self.retry_deadline = None;
            self.dispatch(RelayEvent::Retry, env, now, hw);
        }
    }

    /// Commissioning reset (network-initialization function): drop to
    /// `Off` unconditionally.
    pub fn force_off(&mut self, hw: &mut impl ActuatorPort) {
        self.disarm();
        self.attempts_used = 0;
        self.set_outputs(false, hw);
        self.state = RelayState::Off;
    }

    fn dispatch(&mut self, event: RelayEvent, env: &RelayEnv, now: u64, hw: &mut impl ActuatorPort) {
        use RelayEvent as E;
        use RelayState as S;

        self.state = match (self.state, event) {
            // -- Commands ----------------------------------------------------
            (S::Off | S::OffWaitingFeedback, E::CommandOn) => {
                // A fresh command restarts the sequence with a full budget.
                self.disarm();
                self.attempts_used = 0;
                self.feedback_fault = false;
                self.set_outputs(true, hw);
                if env.verify_feedback {
                    self.check_deadline = Some(now + env.delay_ms);
                    S::OnWaitingFeedback
                } else {
                    S::On
                }
            }
            (s @ (S::On | S::OnWaitingFeedback), E::CommandOn) => s,
            (_, E::CommandOff) => {
                self.disarm();
                self.attempts_used = 0;
                self.feedback_fault = false;
                self.set_outputs(false, hw);
                S::Off
            }

            // -- Feedback verification --------------------------------------
            (S::OnWaitingFeedback, E::CheckFeedback) => {
                if env.feedback_confirms() {
                    self.attempts_used = 0;
                    S::On
                } else {
                    self.attempts_used += 1;
                    self.set_outputs(false, hw);
                    if self.attempts_used < env.attempts_max {
                        warn!(
                            "feedback check failed, retrying ({}/{})",
                            self.attempts_used, env.attempts_max
                        );
                        hw.pulse_warning(RETRY_WARNING_BLINKS);
                        self.retry_deadline = Some(now + env.delay_ms);
                        S::OffWaitingFeedback
                    } else {
                        warn!("feedback never confirmed, giving up");
                        self.feedback_fault = true;
                        S::Off
                    }
                }
            }
            (S::OffWaitingFeedback, E::Retry) => {
                info!("re-energising for feedback attempt {}", self.attempts_used + 1);
                self.set_outputs(true, hw);
                self.check_deadline = Some(now + env.delay_ms);
                S::OnWaitingFeedback
            }
            // A stale timer event in any other state is ignored.
            (s, E::CheckFeedback | E::Retry) => s,

            // -- Input refresh ------------------------------------------------
            (_, E::InputsChanged) if !env.interlock_ok => {
                hw.indicate_ok(false);
                if !matches!(self.state, S::Off) {
                    warn!("interlock dropped, forcing relay off");
                }
                self.disarm();
                self.attempts_used = 0;
                self.set_outputs(false, hw);
                S::Off
            }
            (s, E::InputsChanged) => {
                hw.indicate_ok(true);
                hw.set_signal(self.energized);
                s
            }
        };
    }

    fn disarm(&mut self) {
        self.check_deadline = None;
        self.retry_deadline = None;
    }

    fn set_outputs(&mut self, energized: bool, hw: &mut impl ActuatorPort) {
        if self.energized != energized {
            hw.set_relay(energized);
            self.energized = energized;
        }
        hw.set_signal(energized);
    }
}

impl Default for RelayMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct MockActuator {
        relay: bool,
        signal: bool,
        ok: Option<bool>,
        warnings: Vec<u8>,
        relay_toggles: u32,
    }

    impl ActuatorPort for MockActuator {
        fn set_relay(&mut self, energized: bool) {
            self.relay = energized;
            self.relay_toggles += 1;
        }
        fn set_signal(&mut self, on: bool) {
            self.signal = on;
        }
        fn indicate_ok(&mut self, ok: bool) {
            self.ok = Some(ok);
        }
        fn pulse_warning(&mut self, count: u8) {
            self.warnings.push(count);
        }
    }

    fn env() -> RelayEnv {
        RelayEnv {
            interlock_ok: true,
            feedback_level: false,
            feedback_direction: true,
            verify_feedback: true,
            attempts_max: 2,
            delay_ms: 4000,
        }
    }

    #[test]
    fn command_on_with_failed_interlock_is_rejected() {
        let mut m = RelayMachine::new();
        let mut hw = MockActuator::default();
        let mut e = env();
        e.interlock_ok = false;
        assert!(!m.command(true, &e, 0, &mut hw));
        assert_eq!(m.state(), RelayState::Off);
        assert!(!hw.relay);
    }

    #[test]
    fn direct_mode_switches_without_verification() {
        let mut m = RelayMachine::new();
        let mut hw = MockActuator::default();
        let mut e = env();
        e.verify_feedback = false;
        assert!(m.command(true, &e, 0, &mut hw));
        assert_eq!(m.state(), RelayState::On);
        assert!(hw.relay && hw.signal);
        assert!(m.command(false, &e, 10, &mut hw));
        assert_eq!(m.state(), RelayState::Off);
        assert!(!hw.relay && !hw.signal);
    }

    #[test]
    fn feedback_confirm_settles_to_on() {
        let mut m = RelayMachine::new();
        let mut hw = MockActuator::default();
        let mut e = env();
        m.command(true, &e, 0, &mut hw);
        assert_eq!(m.state(), RelayState::OnWaitingFeedback);

        // Feedback contact closes before the check fires.
        e.feedback_level = true;
        m.tick(&e, 3999, &mut hw);
        assert_eq!(m.state(), RelayState::OnWaitingFeedback);
        m.tick(&e, 4000, &mut hw);
        assert_eq!(m.state(), RelayState::On);
        assert!(hw.relay);
        assert!(!m.feedback_fault());
    }

    #[test]
    fn feedback_mismatch_retries_then_gives_up() {
        let mut m = RelayMachine::new();
        let mut hw = MockActuator::default();
        let e = env(); // feedback never confirms, budget of 2
        m.command(true, &e, 0, &mut hw);

        m.tick(&e, 4000, &mut hw);
        assert_eq!(m.state(), RelayState::OffWaitingFeedback);
        assert!(!hw.relay);
        assert_eq!(hw.warnings, vec![RETRY_WARNING_BLINKS]);

        m.tick(&e, 8000, &mut hw);
        assert_eq!(m.state(), RelayState::OnWaitingFeedback);
        assert!(hw.relay);

        m.tick(&e, 12000, &mut hw);
        assert_eq!(m.state(), RelayState::Off);
        assert!(!hw.relay);
        assert!(m.feedback_fault());
        // No retry pending once the budget is spent.
        m.tick(&e, 20000, &mut hw);
        assert_eq!(m.state(), RelayState::Off);
    }

    #[test]
    fn command_during_retry_window_resets_the_budget() {
        let mut m = RelayMachine::new();
        let mut hw = MockActuator::default();
        let e = env();
        m.command(true, &e, 0, &mut hw);
        m.tick(&e, 4000, &mut hw);
        assert_eq!(m.state(), RelayState::OffWaitingFeedback);

        m.command(true, &e, 5000, &mut hw);
        assert_eq!(m.state(), RelayState::OnWaitingFeedback);
        // Fresh budget: one more failure still leaves a retry.
        m.tick(&e, 9000, &mut hw);
        assert_eq!(m.state(), RelayState::OffWaitingFeedback);
    }

    #[test]
    fn command_on_is_idempotent() {
        let mut m = RelayMachine::new();
        let mut hw = MockActuator::default();
        let mut e = env();
        e.verify_feedback = false;
        m.command(true, &e, 0, &mut hw);
        let toggles = hw.relay_toggles;
        m.command(true, &e, 100, &mut hw);
        assert_eq!(m.state(), RelayState::On);
        assert_eq!(hw.relay_toggles, toggles);
    }

    #[test]
    fn interlock_drop_forces_off_and_flags_fault_indicator() {
        let mut m = RelayMachine::new();
        let mut hw = MockActuator::default();
        let mut e = env();
        e.verify_feedback = false;
        m.command(true, &e, 0, &mut hw);

        e.interlock_ok = false;
        m.inputs_changed(&e, 500, &mut hw);
        assert_eq!(m.state(), RelayState::Off);
        assert!(!hw.relay && !hw.signal);
        assert_eq!(hw.ok, Some(false));
        // No timer survives the forced shutdown.
        m.tick(&e, 10_000, &mut hw);
        assert_eq!(m.state(), RelayState::Off);
    }

    #[test]
    fn healthy_inputs_refresh_signal_and_indicator() {
        let mut m = RelayMachine::new();
        let mut hw = MockActuator::default();
        let mut e = env();
        e.verify_feedback = false;
        m.command(true, &e, 0, &mut hw);
        hw.signal = false; // lamp glitched externally
        m.inputs_changed(&e, 500, &mut hw);
        assert_eq!(m.state(), RelayState::On);
        assert_eq!(hw.ok, Some(true));
        assert!(hw.signal);
    }

    #[test]
    fn force_off_from_any_state() {
        let mut m = RelayMachine::new();
        let mut hw = MockActuator::default();
        let e = env();
        m.command(true, &e, 0, &mut hw);
        assert_eq!(m.state(), RelayState::OnWaitingFeedback);
        m.force_off(&mut hw);
        assert_eq!(m.state(), RelayState::Off);
        assert!(!hw.relay);
        m.tick(&e, 10_000, &mut hw);
        assert_eq!(m.state(), RelayState::Off);
    }

    #[test]
    fn commanded_on_reflects_whole_sequence() {
        let mut m = RelayMachine::new();
        let mut hw = MockActuator::default();
        let e = env();
        assert!(!m.commanded_on());
        m.command(true, &e, 0, &mut hw);
        assert!(m.commanded_on());
        m.tick(&e, 4000, &mut hw); // into OffWaitingFeedback
        assert!(m.commanded_on());
        m.command(false, &e, 5000, &mut hw);
        assert!(!m.commanded_on());
    }
}
