//! Diurnal cell voltage model.
//!
//! Every cell follows the same sine wave over a 24 hour period, driven only by the
//! local wall-clock time. There is no internal state: the same instant always yields
//! the same voltage.

use chrono::Timelike;
use core::f64::consts::PI;

/// Open-circuit voltage of a half-charged cell.
pub const VOLTAGE_HALF_FULL: f64 = 3.678;
/// Peak-to-center swing of the daily cycle.
pub const VOLTAGE_RANGE: f64 = 0.5;

const CYCLE_OFFSET: f64 = PI;
const SECONDS_PER_DAY: f64 = 86_400.0;

pub const MIN_CELL_VOLTAGE: f64 = VOLTAGE_HALF_FULL - VOLTAGE_RANGE / 2.0 - VOLTAGE_RANGE;
pub const MAX_CELL_VOLTAGE: f64 = VOLTAGE_HALF_FULL - VOLTAGE_RANGE / 2.0 + VOLTAGE_RANGE;

/// Fraction of the day elapsed at `now`, in `[0, 1)`.
pub fn day_fraction<T: Timelike>(now: &T) -> f64 {
    // chrono encodes a leap second as nanosecond >= 1e9
    let nanos = now.nanosecond().min(999_999_999);
    let seconds = f64::from(now.num_seconds_from_midnight()) + f64::from(nanos) / 1e9;
    seconds / SECONDS_PER_DAY
}

/// Voltage of a cell at a given point of the daily cycle.
pub fn voltage_at_fraction(fraction: f64) -> f64 {
    (VOLTAGE_HALF_FULL - VOLTAGE_RANGE / 2.0)
        + (fraction * 2.0 * PI + CYCLE_OFFSET).sin() * VOLTAGE_RANGE
}

/// Voltage of cell `cell_index` at `now`.
///
/// The cell index does not vary the output yet: all cells of a module read the same
/// value. It is part of the signature so per-cell drift can be added without touching
/// callers.
pub fn cell_voltage<T: Timelike>(_cell_index: usize, now: &T) -> f64 {
    voltage_at_fraction(day_fraction(now))
}
