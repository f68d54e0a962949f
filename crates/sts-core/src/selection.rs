//! Channel and range selection.
//!
//! Turns the operator's (or a persisted) choice into normalized channel and
//! range lists. No hardware access happens here; the available channels and
//! ranges are queried from the power meter beforehand and passed in.
//!
//! Returned lists keep the order of the `available` input, whatever order the
//! explicit request was given in.

use crate::data::ChannelRef;
use crate::device::ModuleType;
use crate::error::{StsError, StsResult};
use serde::{Deserialize, Serialize};

/// Channels enabled per slot, in slot order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelMatrix {
    slots: Vec<(u8, Vec<u8>)>,
}

impl ChannelMatrix {
    /// Build from explicit `(slot, channels)` rows.
    pub fn new(slots: Vec<(u8, Vec<u8>)>) -> Self {
        Self { slots }
    }

    /// Build from the modules installed in a power meter frame.
    pub fn from_modules(modules: &[(u8, ModuleType)]) -> Self {
        Self {
            slots: modules
                .iter()
                .map(|(slot, module)| (*slot, module.channels()))
                .collect(),
        }
    }

    /// Every enabled channel in slot-major order.
    pub fn channels(&self) -> impl Iterator<Item = ChannelRef> + '_ {
        self.slots.iter().flat_map(|(slot, channels)| {
            channels.iter().map(move |ch| ChannelRef::new(*slot, *ch))
        })
    }

    /// True if the channel is enabled.
    pub fn contains(&self, channel: ChannelRef) -> bool {
        self.channels().any(|c| c == channel)
    }

    /// True if no channel is enabled.
    pub fn is_empty(&self) -> bool {
        self.channels().next().is_none()
    }
}

/// How to pick channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "mode", content = "channels")]
pub enum ChannelSelection {
    /// Every enabled channel.
    All,
    /// Channels with an even channel number.
    Even,
    /// Channels with an odd channel number.
    Odd,
    /// The given channels.
    Explicit(Vec<ChannelRef>),
}

/// How to pick dynamic ranges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "mode", content = "ranges")]
pub enum RangeSelection {
    /// Every available range.
    All,
    /// The given ranges.
    Explicit(Vec<u8>),
}

/// Pick channels from `available`.
pub fn select_channels(
    available: &ChannelMatrix,
    mode: &ChannelSelection,
) -> StsResult<Vec<ChannelRef>> {
    let selected: Vec<ChannelRef> = match mode {
        ChannelSelection::All => available.channels().collect(),
        ChannelSelection::Even => available.channels().filter(|c| c.channel % 2 == 0).collect(),
        ChannelSelection::Odd => available.channels().filter(|c| c.channel % 2 == 1).collect(),
        ChannelSelection::Explicit(requested) => {
            if let Some(missing) = requested.iter().find(|c| !available.contains(**c)) {
                return Err(StsError::Selection(format!(
                    "slot {} channel {} is not available",
                    missing.slot, missing.channel
                )));
            }
            available
                .channels()
                .filter(|c| requested.contains(c))
                .collect()
        }
    };
    tracing::debug!(?mode, count = selected.len(), "Channels selected");
    Ok(selected)
}

/// Pick ranges from `available`.
pub fn select_ranges(available: &[u8], mode: &RangeSelection) -> StsResult<Vec<u8>> {
    let selected: Vec<u8> = match mode {
        RangeSelection::All => available.to_vec(),
        RangeSelection::Explicit(requested) => {
            if let Some(missing) = requested.iter().find(|r| !available.contains(r)) {
                return Err(StsError::Selection(format!(
                    "range {missing} is not available (available: {available:?})"
                )));
            }
            available
                .iter()
                .copied()
                .filter(|r| requested.contains(r))
                .collect()
        }
    };
    tracing::debug!(?mode, count = selected.len(), "Ranges selected");
    Ok(selected)
}

/// Available ranges for a set of installed modules.
///
/// An MPM-215 cannot share a frame with other module types.
pub fn available_ranges(modules: &[(u8, ModuleType)]) -> StsResult<Vec<u8>> {
    let has_215 = modules.iter().any(|(_, m)| *m == ModuleType::Mpm215);
    let has_other = modules.iter().any(|(_, m)| *m != ModuleType::Mpm215);
    if has_215 && has_other {
        return Err(StsError::Selection(
            "MPM-215 cannot be used with other module types".into(),
        ));
    }
    let Some((_, first)) = modules.first() else {
        return Ok(Vec::new());
    };
    // The range set is the intersection over all installed modules.
    let ranges = first
        .dynamic_ranges()
        .into_iter()
        .filter(|r| modules.iter().all(|(_, m)| m.dynamic_ranges().contains(r)))
        .collect();
    Ok(ranges)
}

/// Parse operator text such as `(1,1); (1,2)` into channel references.
///
/// Numbers are taken pairwise as `(slot, channel)`; an odd count is rejected.
pub fn parse_channel_list(text: &str) -> StsResult<Vec<ChannelRef>> {
    let numbers = parse_numbers(text)?;
    if numbers.len() % 2 != 0 {
        return Err(StsError::Selection(format!(
            "'{text}' does not contain (slot, channel) pairs"
        )));
    }
    Ok(numbers
        .chunks_exact(2)
        .map(|pair| ChannelRef::new(pair[0], pair[1]))
        .collect())
}

/// Parse operator text such as `1, 3` into range numbers.
pub fn parse_range_list(text: &str) -> StsResult<Vec<u8>> {
    parse_numbers(text)
}

/// Characters that only separate numbers. Anything else, a sign or a
/// decimal point included, stays in the token and fails to parse.
fn is_separator(c: char) -> bool {
    c.is_whitespace() || matches!(c, ',' | ';' | '(' | ')' | '[' | ']')
}

fn parse_numbers(text: &str) -> StsResult<Vec<u8>> {
    text.split(is_separator)
        .filter(|token| !token.is_empty())
        .map(|token| {
            token
                .parse::<u8>()
                .map_err(|_| StsError::Selection(format!("'{token}' is not a number")))
        })
        .collect()
}
