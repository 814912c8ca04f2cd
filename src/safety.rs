//! Safety interlock evaluation.
//!
//! Stateless functions over the model and a fresh input snapshot; every
//! call terminates in O(1) and may run from any component. The pressure
//! window is exclusive on both bounds: a reading sitting exactly on a
//! threshold counts as unsafe.

use crate::model::ModelState;

/// One interlock evaluation, broken out so the alarm bits and the
/// combined verdict come from the same snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafetyVerdict {
    pub signal_safe: bool,
    pub pressure_safe: bool,
    pub interlock_ok: bool,
}

/// True when the smoothed pressure lies strictly inside the window.
pub fn pressure_safe(pressure_mbar: u16, minimum: u16, maximum: u16) -> bool {
    minimum < pressure_mbar && pressure_mbar < maximum
}

/// Evaluate the interlock for the model's current mode.
///
/// `safety_level` is the debounced safety-chain input, already
/// normalised so true means "chain closed". The pressure term only
/// participates for modes that measure pressure; the heartbeat term
/// participates for every mode, so a vanished supervisor always forces
/// fail-safe.
pub fn evaluate(m: &ModelState, safety_level: bool, pressure_mbar: u16) -> SafetyVerdict {
    let signal_safe = safety_level;
    let pressure_safe = pressure_safe(
        pressure_mbar,
        m.minimum_pressure_mbar,
        m.maximum_pressure_mbar,
    );
    let pressure_term = !m.mode().uses_pressure() || pressure_safe;
    SafetyVerdict {
        signal_safe,
        pressure_safe,
        interlock_ok: signal_safe && pressure_term && !m.missing_heartbeat,
    }
}
