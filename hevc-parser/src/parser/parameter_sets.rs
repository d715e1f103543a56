use std::{ops::RangeInclusive, sync::Arc};

use rustc_hash::FxHashMap;

pub use pps::{DeblockingFilterControl, Pps, PpsMultilayerExtension, PpsRangeExtension, TileLayout};
pub use profile_tier_level::{Level, ProfileTierLevel};
pub use scaling_list::{ScalingFactors, ScalingList};
pub use short_term_rps::{RpsEntry, ShortTermRefPicSet};
pub use sps::{LongTermRefPicSps, Pcm, Sps, SpsRangeExtension, SubLayerOrdering};
pub use vps::{OlsDpbSize, OutputLayerSet, RepFormat, Vps, VpsExtension, VpsHrd};
pub use vui::{HrdParameters, TimingInfo, Vui, Window};

mod pps;
mod profile_tier_level;
mod scaling_list;
pub(crate) mod short_term_rps;
mod sps;
mod vps;
mod vui;

pub const MAX_VPS_COUNT: usize = 16;
pub const MAX_SPS_COUNT: usize = 16;
pub const MAX_PPS_COUNT: usize = 64;
/// `nuh_layer_id` is a 6 bit field.
pub const MAX_LAYER_COUNT: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum ParameterSetError {
    #[error("{field} has an out of range value: {value}")]
    OutOfRange { field: &'static str, value: i64 },

    #[error("Referenced VPS {0} is not available")]
    MissingVps(u8),

    #[error("Referenced SPS {0} is not available")]
    MissingSps(u8),

    #[error("Incorrect parameter set data: {0}")]
    IncorrectData(String),
}

pub(crate) fn ensure_range<T: Copy + Into<i64>>(
    field: &'static str,
    value: T,
    range: RangeInclusive<i64>,
) -> Result<T, ParameterSetError> {
    if range.contains(&value.into()) {
        Ok(value)
    } else {
        Err(ParameterSetError::OutOfRange {
            field,
            value: value.into(),
        })
    }
}

/// `Ceil(Log2(value))`, the width of fields indexing `value` entries.
pub(crate) fn ceil_log2(value: u32) -> u32 {
    if value <= 1 {
        0
    } else {
        32 - (value - 1).leading_zeros()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterSetKind {
    Video,
    Sequence,
    Picture,
}

/// A parsed parameter set. Stored sets are shared, so a picture that still refers to a replaced
/// set keeps it alive.
#[derive(Debug, Clone)]
pub enum ParameterSet {
    Video(Arc<Vps>),
    Sequence(Arc<Sps>),
    Picture(Arc<Pps>),
}

impl ParameterSet {
    pub fn kind(&self) -> ParameterSetKind {
        match self {
            ParameterSet::Video(_) => ParameterSetKind::Video,
            ParameterSet::Sequence(_) => ParameterSetKind::Sequence,
            ParameterSet::Picture(_) => ParameterSetKind::Picture,
        }
    }

    pub fn id(&self) -> u8 {
        match self {
            ParameterSet::Video(vps) => vps.id,
            ParameterSet::Sequence(sps) => sps.id,
            ParameterSet::Picture(pps) => pps.id,
        }
    }

    /// Id of the set one level up: VPS for an SPS, SPS for a PPS.
    pub fn parent_id(&self) -> Option<u8> {
        match self {
            ParameterSet::Video(_) => None,
            ParameterSet::Sequence(sps) => Some(sps.vps_id),
            ParameterSet::Picture(pps) => Some(pps.sps_id),
        }
    }

    pub fn as_specific<T: ParameterSetPayload>(&self) -> Option<&Arc<T>> {
        T::from_parameter_set(self)
    }
}

pub trait ParameterSetPayload: Sized {
    fn from_parameter_set(set: &ParameterSet) -> Option<&Arc<Self>>;
}

impl ParameterSetPayload for Vps {
    fn from_parameter_set(set: &ParameterSet) -> Option<&Arc<Self>> {
        match set {
            ParameterSet::Video(vps) => Some(vps),
            _ => None,
        }
    }
}

impl ParameterSetPayload for Sps {
    fn from_parameter_set(set: &ParameterSet) -> Option<&Arc<Self>> {
        match set {
            ParameterSet::Sequence(sps) => Some(sps),
            _ => None,
        }
    }
}

impl ParameterSetPayload for Pps {
    fn from_parameter_set(set: &ParameterSet) -> Option<&Arc<Self>> {
        match set {
            ParameterSet::Picture(pps) => Some(pps),
            _ => None,
        }
    }
}

/// Stored parameter sets indexed by id, and the sets active for each layer.
#[derive(Debug)]
pub(crate) struct ParameterSetStore {
    vps: Vec<Option<Arc<Vps>>>,
    sps: Vec<Option<Arc<Sps>>>,
    pps: Vec<Option<Arc<Pps>>>,
    pub(crate) active_vps: Option<Arc<Vps>>,
    active_sps: Vec<Option<Arc<Sps>>>,
    active_pps: Vec<Option<Arc<Pps>>>,
    update_counts: FxHashMap<(ParameterSetKind, u8), u32>,
}

impl Default for ParameterSetStore {
    fn default() -> Self {
        Self {
            vps: vec![None; MAX_VPS_COUNT],
            sps: vec![None; MAX_SPS_COUNT],
            pps: vec![None; MAX_PPS_COUNT],
            active_vps: None,
            active_sps: vec![None; MAX_LAYER_COUNT],
            active_pps: vec![None; MAX_LAYER_COUNT],
            update_counts: FxHashMap::default(),
        }
    }
}

impl ParameterSetStore {
    pub(crate) fn vps(&self, id: u8) -> Option<&Arc<Vps>> {
        self.vps.get(id as usize)?.as_ref()
    }

    pub(crate) fn sps(&self, id: u8) -> Option<&Arc<Sps>> {
        self.sps.get(id as usize)?.as_ref()
    }

    pub(crate) fn pps(&self, id: u8) -> Option<&Arc<Pps>> {
        self.pps.get(id as usize)?.as_ref()
    }

    /// Returns the sequence number of the next client update for this id. Starts at 0.
    pub(crate) fn next_update_count(&mut self, kind: ParameterSetKind, id: u8) -> u32 {
        let count = self.update_counts.entry((kind, id)).or_default();
        let current = *count;
        *count += 1;
        current
    }

    /// Replaces the set stored under the same id. Active sets are not touched.
    pub(crate) fn insert(&mut self, set: ParameterSet) {
        let id = set.id() as usize;
        match set {
            ParameterSet::Video(vps) => self.vps[id] = Some(vps),
            ParameterSet::Sequence(sps) => self.sps[id] = Some(sps),
            ParameterSet::Picture(pps) => self.pps[id] = Some(pps),
        }
    }

    pub(crate) fn active_sps(&self, layer_id: u8) -> Option<&Arc<Sps>> {
        self.active_sps.get(layer_id as usize)?.as_ref()
    }

    pub(crate) fn active_pps(&self, layer_id: u8) -> Option<&Arc<Pps>> {
        self.active_pps.get(layer_id as usize)?.as_ref()
    }

    pub(crate) fn activate_sps(&mut self, layer_id: u8, sps: Arc<Sps>) {
        if let Some(slot) = self.active_sps.get_mut(layer_id as usize) {
            *slot = Some(sps);
        }
    }

    pub(crate) fn activate_pps(&mut self, layer_id: u8, pps: Arc<Pps>) {
        if let Some(slot) = self.active_pps.get_mut(layer_id as usize) {
            *slot = Some(pps);
        }
    }

    pub(crate) fn clear(&mut self) {
        *self = Self::default();
    }
}
