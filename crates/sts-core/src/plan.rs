//! Acquisition plan construction.
//!
//! Ranges drive the outer loop and channels the inner loop. Every range gets
//! one physical sweep (`sweep_index`), shared by all channels. Measurement
//! monitor traces are recorded once per range, on the first channel; reference
//! monitor traces once per channel, at the first range, because the
//! wavelength-to-position mapping does not depend on the range.

use crate::data::{
    ChannelRef, MergeUnit, MonitorUnit, ReferenceRecord, SweepUnit, DEFAULT_MODULE,
};
use crate::error::{StsError, StsResult};
use std::collections::HashSet;

/// Per-session bookkeeping derived from a channel and range selection.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionPlan {
    channels: Vec<ChannelRef>,
    sweep_units: Vec<SweepUnit>,
    measurement_monitors: Vec<MonitorUnit>,
    reference_monitors: Vec<MonitorUnit>,
    reference_shells: Vec<ReferenceRecord>,
    merge_units: Vec<MergeUnit>,
    ranges_in_use: Vec<u8>,
}

impl AcquisitionPlan {
    /// Build the plan for a single power meter.
    pub fn build(channels: &[ChannelRef], ranges: &[u8]) -> StsResult<Self> {
        Self::build_for_module(DEFAULT_MODULE, channels, ranges)
    }

    /// Build the plan for the power meter numbered `module`.
    ///
    /// Fails with `Configuration` when either list is empty or has duplicates.
    pub fn build_for_module(module: u8, channels: &[ChannelRef], ranges: &[u8]) -> StsResult<Self> {
        if channels.is_empty() {
            return Err(StsError::Configuration("no channels selected".into()));
        }
        if ranges.is_empty() {
            return Err(StsError::Configuration("no ranges selected".into()));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = channels.iter().find(|c| !seen.insert(**c)) {
            return Err(StsError::Configuration(format!("channel {dup} selected twice")));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = ranges.iter().find(|r| !seen.insert(**r)) {
            return Err(StsError::Configuration(format!("range {dup} selected twice")));
        }

        let mut plan = Self {
            channels: channels.to_vec(),
            sweep_units: Vec::with_capacity(channels.len() * ranges.len()),
            measurement_monitors: Vec::with_capacity(ranges.len()),
            reference_monitors: Vec::with_capacity(channels.len()),
            reference_shells: Vec::with_capacity(channels.len()),
            merge_units: Vec::with_capacity(channels.len()),
            ranges_in_use: Vec::with_capacity(ranges.len()),
        };

        for (range_index, range) in ranges.iter().enumerate() {
            for (channel_index, channel) in channels.iter().enumerate() {
                let unit = SweepUnit {
                    module,
                    slot: channel.slot,
                    channel: channel.channel,
                    range: *range,
                    sweep_index: range_index + 1,
                    sop: 0,
                };
                plan.sweep_units.push(unit);

                if channel_index == 0 {
                    plan.measurement_monitors.push(unit);
                    plan.ranges_in_use.push(*range);
                }
                if range_index == 0 {
                    plan.reference_monitors.push(unit);
                    plan.reference_shells
                        .push(ReferenceRecord::shell(module, *channel));
                    plan.merge_units.push(MergeUnit {
                        module,
                        slot: channel.slot,
                        channel: channel.channel,
                    });
                }
            }
        }

        tracing::debug!(
            channels = channels.len(),
            ranges = ranges.len(),
            sweep_units = plan.sweep_units.len(),
            "Acquisition plan built"
        );
        Ok(plan)
    }

    /// Selected channels in selection order.
    pub fn channels(&self) -> &[ChannelRef] {
        &self.channels
    }

    /// Every (range, channel) unit, ranges outer.
    pub fn sweep_units(&self) -> &[SweepUnit] {
        &self.sweep_units
    }

    /// One monitor unit per range (first channel).
    pub fn measurement_monitors(&self) -> &[MonitorUnit] {
        &self.measurement_monitors
    }

    /// One monitor unit per channel (first range).
    pub fn reference_monitors(&self) -> &[MonitorUnit] {
        &self.reference_monitors
    }

    /// Empty reference records, one per channel.
    pub fn reference_shells(&self) -> &[ReferenceRecord] {
        &self.reference_shells
    }

    /// One merge unit per channel.
    pub fn merge_units(&self) -> &[MergeUnit] {
        &self.merge_units
    }

    /// Distinct ranges in first-seen order.
    pub fn ranges_in_use(&self) -> &[u8] {
        &self.ranges_in_use
    }

    /// First selected range, used for reference captures.
    pub fn reference_range(&self) -> u8 {
        // build() rejects empty range lists
        self.ranges_in_use.first().copied().unwrap_or(1)
    }

    /// Units filled by the sweep for `range`.
    pub fn units_for_range(&self, range: u8) -> impl Iterator<Item = &SweepUnit> + '_ {
        self.sweep_units.iter().filter(move |u| u.range == range)
    }

    /// Monitor unit for the sweep at `range`.
    pub fn monitor_for_range(&self, range: u8) -> Option<&MonitorUnit> {
        self.measurement_monitors.iter().find(|u| u.range == range)
    }

    /// Reference monitor unit for a channel.
    pub fn reference_monitor_for(&self, channel: ChannelRef) -> Option<&MonitorUnit> {
        self.reference_monitors
            .iter()
            .find(|u| u.channel_ref() == channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_channels_two_ranges() {
        let channels = [ChannelRef::new(0, 1), ChannelRef::new(0, 2)];
        let plan = AcquisitionPlan::build(&channels, &[1, 3]).unwrap();

        let indices: Vec<usize> = plan.sweep_units().iter().map(|u| u.sweep_index).collect();
        assert_eq!(indices, vec![1, 1, 2, 2]);
        assert_eq!(plan.measurement_monitors().len(), 2);
        assert!(plan
            .measurement_monitors()
            .iter()
            .all(|u| u.channel_ref() == ChannelRef::new(0, 1)));
        assert_eq!(plan.reference_shells().len(), 2);
        assert_eq!(plan.reference_monitors().len(), 2);
        assert!(plan.reference_monitors().iter().all(|u| u.range == 1));
        assert_eq!(plan.merge_units().len(), 2);
        assert_eq!(plan.ranges_in_use(), &[1, 3]);
        assert_eq!(plan.units_for_range(3).count(), 2);
    }

    #[test]
    fn cardinalities_hold_across_sizes() {
        let all: Vec<ChannelRef> = (1..=4)
            .flat_map(|slot| (1..=4).map(move |ch| ChannelRef::new(slot, ch)))
            .collect();
        for n in 1..=all.len() {
            for m in 1..=5u8 {
                let ranges: Vec<u8> = (1..=m).collect();
                let plan = AcquisitionPlan::build(&all[..n], &ranges).unwrap();
                assert_eq!(plan.sweep_units().len(), n * m as usize);
                for index in 1..=m as usize {
                    assert_eq!(
                        plan.sweep_units()
                            .iter()
                            .filter(|u| u.sweep_index == index)
                            .count(),
                        n
                    );
                }
                assert_eq!(plan.measurement_monitors().len(), m as usize);
                assert_eq!(plan.reference_monitors().len(), n);
                assert_eq!(plan.reference_shells().len(), n);
            }
        }
    }

    #[test]
    fn empty_selection_is_configuration_error() {
        assert!(matches!(
            AcquisitionPlan::build(&[], &[1]),
            Err(StsError::Configuration(_))
        ));
        assert!(matches!(
            AcquisitionPlan::build(&[ChannelRef::new(0, 1)], &[]),
            Err(StsError::Configuration(_))
        ));
    }

    #[test]
    fn duplicates_are_rejected() {
        let ch = ChannelRef::new(0, 1);
        assert!(AcquisitionPlan::build(&[ch, ch], &[1]).is_err());
        assert!(AcquisitionPlan::build(&[ch], &[2, 2]).is_err());
    }
}
