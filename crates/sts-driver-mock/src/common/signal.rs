//! Deterministic waveforms produced by the simulated bench.
//!
//! No randomness: the same sweep always yields the same arrays, which lets
//! tests compare live and cached reference processing element-wise.

use sts_core::device::dynamic_range_floor_dbm;
use sts_core::ChannelRef;

/// Trigger level driven high for each laser trigger, volts.
pub const TRIGGER_HIGH_V: f64 = 5.0;

/// Nominal monitor tap level, volts.
pub const MONITOR_LEVEL_V: f64 = 2.0;

/// Path loss of a channel without a device under test, dB.
pub fn path_loss_db(channel: ChannelRef) -> f64 {
    0.5 * f64::from(channel.slot) + 0.2 * f64::from(channel.channel)
}

/// Power logged on `channel` for `points` trigger steps.
///
/// Readings below the floor of `range` are clamped to that floor, as the
/// meter would saturate.
pub fn logged_power(
    channel: ChannelRef,
    points: usize,
    laser_dbm: f64,
    dut_loss_db: f64,
    range: u8,
) -> Vec<f64> {
    let floor = dynamic_range_floor_dbm(range);
    (0..points)
        .map(|i| {
            let ripple = 0.05 * (i as f64 * 0.3).sin();
            let tilt = -0.001 * i as f64;
            let power = laser_dbm - path_loss_db(channel) - dut_loss_db + ripple + tilt;
            power.max(floor)
        })
        .collect()
}

/// Trigger and monitor samples for `points` trigger steps.
///
/// Two samples per step: low, then high. The rising edge of step `i`
/// carries the monitor value for that step.
pub fn sampled_monitor(points: usize) -> (Vec<f64>, Vec<f64>) {
    let mut trigger = Vec::with_capacity(points * 2);
    let mut monitor = Vec::with_capacity(points * 2);
    for i in 0..points {
        let level = MONITOR_LEVEL_V + 0.01 * (i as f64 * 0.1).sin();
        trigger.extend([0.0, TRIGGER_HIGH_V]);
        monitor.extend([level, level]);
    }
    (trigger, monitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readings_saturate_at_range_floor() {
        let data = logged_power(ChannelRef::new(0, 1), 5, 0.0, 60.0, 1);
        assert!(data.iter().all(|p| *p == -30.0));
        let data = logged_power(ChannelRef::new(0, 1), 5, 0.0, 60.0, 5);
        assert!(data.iter().all(|p| *p > -70.0));
    }

    #[test]
    fn one_rising_edge_per_point() {
        let (trigger, monitor) = sampled_monitor(4);
        assert_eq!(trigger.len(), 8);
        assert_eq!(monitor.len(), 8);
        let edges = trigger.windows(2).filter(|w| w[0] < 2.5 && w[1] >= 2.5).count();
        // The first step's edge is at index 1, preceded by its own low sample.
        assert_eq!(edges, 4);
    }
}
