// src/instancer/custom_data.rs
//! Per-instance float payloads ("custom data"), packed `[instance][channel]`.

use bevy::prelude::*;

use super::attributes::{find_attribute, AttributeReader, IndexedInts, ANY_OWNER};
use super::core::{GeometryPartDescriptor, ATTR_CUSTOM_DATA_PREFIX, ATTR_NUM_CUSTOM_FLOATS};
use super::normalize::InstancerTuple;

/// Most custom floats one instance may carry; larger counts are treated as corrupt.
pub const MAX_CUSTOM_FLOATS: usize = 256;

/// Flat per-instance payload of one destination object.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CustomData {
    channels: usize,
    values: Vec<f32>,
}

impl CustomData {
    /// `values.len()` must be a multiple of `channels`.
    pub fn new(channels: usize, values: Vec<f32>) -> Result<Self, PayloadError> {
        if channels == 0 || values.len() % channels != 0 {
            return Err(PayloadError::RaggedRows { channels, values: values.len() });
        }
        Ok(Self { channels, values })
    }

    #[inline]
    pub fn channel_count(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn instance_count(&self) -> usize {
        if self.channels == 0 { 0 } else { self.values.len() / self.channels }
    }

    #[inline]
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn row(&self, instance: usize) -> Option<&[f32]> {
        let start = instance.checked_mul(self.channels)?;
        self.values.get(start..start + self.channels)
    }

    /// Value of one channel of one instance; 0.0 when out of range.
    pub fn value(&self, instance: usize, channel: usize) -> f32 {
        if channel >= self.channels {
            return 0.0;
        }
        self.row(instance).map_or(0.0, |r| r[channel])
    }

    /// Rows at `positions`, in that order.
    pub fn select_rows(&self, positions: &[usize]) -> CustomData {
        let mut values = Vec::with_capacity(positions.len() * self.channels);
        for &p in positions {
            match self.row(p) {
                Some(r) => values.extend_from_slice(r),
                None => values.resize(values.len() + self.channels, 0.0),
            }
        }
        CustomData { channels: self.channels, values }
    }
}

/// Custom data attributes of one part, indexed by original element index.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CustomDataChannels {
    pub counts: IndexedInts,
    /// One array per channel; a missing channel attribute is an empty array.
    pub channels: Vec<Vec<f32>>,
}

impl CustomDataChannels {
    /// Read the count attribute and every channel it announces.
    pub fn read(reader: &dyn AttributeReader, part: &GeometryPartDescriptor) -> Result<Self, PayloadError> {
        let counts = IndexedInts::read(reader, part, ATTR_NUM_CUSTOM_FLOATS, &ANY_OWNER).ok_or(PayloadError::MissingCount)?;
        let max = counts.values.iter().copied().max().unwrap_or(0);
        if max <= 0 {
            return Err(PayloadError::AllZero);
        }
        let max = max as usize;
        if max > MAX_CUSTOM_FLOATS {
            return Err(PayloadError::TooManyChannels { count: max, limit: MAX_CUSTOM_FLOATS });
        }

        let mut channels = Vec::with_capacity(max);
        let mut expected: Option<usize> = None;
        for c in 0..max {
            let name = format!("{ATTR_CUSTOM_DATA_PREFIX}{c}");
            let values = find_attribute(reader, part, &name, &ANY_OWNER)
                .and_then(|(_, arr)| arr.to_floats())
                .unwrap_or_default();
            if !values.is_empty() {
                match expected {
                    None => expected = Some(values.len()),
                    Some(len) if len != values.len() => {
                        return Err(PayloadError::ChannelLengthMismatch { channel: c, len: values.len(), expected: len });
                    }
                    Some(_) => {}
                }
            }
            channels.push(values);
        }
        Ok(Self { counts, channels })
    }

    /// Pack the rows of `indices`. `Ok(None)` when the object declares no channels.
    pub fn pack(&self, indices: &[usize]) -> Result<Option<CustomData>, PayloadError> {
        let mut declared: Option<i32> = None;
        for &i in indices {
            let count = self.counts.get(i).unwrap_or(0);
            match declared {
                None => declared = Some(count),
                Some(first) if first != count => return Err(PayloadError::InconsistentCount { first, other: count }),
                Some(_) => {}
            }
        }
        let channels = declared.unwrap_or(0).max(0) as usize;
        if channels == 0 {
            return Ok(None);
        }

        let mut values = Vec::with_capacity(indices.len() * channels);
        for &i in indices {
            for c in 0..channels {
                values.push(self.channels.get(c).and_then(|ch| ch.get(i)).copied().unwrap_or(0.0));
            }
        }
        CustomData::new(channels, values).map(Some)
    }
}

/// Payload of each tuple of a part; `None` for tuples without (valid) custom data.
pub fn pack_per_object(
    reader: &dyn AttributeReader,
    part: &GeometryPartDescriptor,
    tuples: &[InstancerTuple],
) -> Vec<Option<CustomData>> {
    let channels = match CustomDataChannels::read(reader, part) {
        Ok(c) => c,
        Err(PayloadError::MissingCount) | Err(PayloadError::AllZero) => return vec![None; tuples.len()],
        Err(e) => {
            warn!("Instancer: custom data of '{}' ignored: {}", part.part_name, e);
            return vec![None; tuples.len()];
        }
    };

    tuples
        .iter()
        .map(|t| match channels.pack(&t.indices) {
            Ok(data) => data,
            Err(e) => {
                warn!("Instancer: custom data for '{}' on '{}' dropped: {}", t.object.path, part.part_name, e);
                None
            }
        })
        .collect()
}

// ---------- Errors ----------

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("no 'unreal_num_custom_floats' attribute")]
    MissingCount,
    #[error("every element declares zero custom floats")]
    AllZero,
    #[error("{count} custom floats declared, at most {limit} supported")]
    TooManyChannels { count: usize, limit: usize },
    #[error("custom data channel {channel} has {len} values, expected {expected}")]
    ChannelLengthMismatch { channel: usize, len: usize, expected: usize },
    #[error("instances declare {first} and {other} custom floats")]
    InconsistentCount { first: i32, other: i32 },
    #[error("{values} values do not split into rows of {channels}")]
    RaggedRows { channels: usize, values: usize },
}
