use tracing::{trace, warn};

use crate::config::DpbOverflowPolicy;

/// Number of DPB slots. HEVC never needs more than 16 pictures.
pub const MAX_DPB_SLOTS: usize = 16;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    #[default]
    Empty,
    /// Reserved for the picture that is currently being parsed.
    Decoding,
    Occupied,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceMarking {
    #[default]
    Unused,
    ShortTerm,
    LongTerm,
}

impl ReferenceMarking {
    pub fn is_reference(self) -> bool {
        self != ReferenceMarking::Unused
    }
}

/// Identifies a picture buffer for as long as it is in flight, from slot reservation until it is
/// displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PictureId(pub(crate) u64);

#[derive(Debug)]
pub(crate) struct DpbEntry<P> {
    pub(crate) state: SlotState,
    pub(crate) marking: ReferenceMarking,
    pub(crate) output_needed: bool,
    pub(crate) poc: i32,
    pub(crate) layer_id: u8,
    pub(crate) picture: Option<(PictureId, P)>,
}

impl<P> Default for DpbEntry<P> {
    fn default() -> Self {
        Self {
            state: SlotState::Empty,
            marking: ReferenceMarking::Unused,
            output_needed: false,
            poc: 0,
            layer_id: 0,
            picture: None,
        }
    }
}

impl<P> DpbEntry<P> {
    pub(crate) fn is_occupied(&self) -> bool {
        self.state == SlotState::Occupied
    }

    fn release(&mut self) {
        self.state = SlotState::Empty;
        self.picture = None;
    }
}

/// A picture leaving the DPB in output order.
#[derive(Debug)]
pub(crate) struct OutputPicture<P> {
    pub(crate) id: PictureId,
    pub(crate) picture: P,
    pub(crate) poc: i32,
    pub(crate) layer_id: u8,
}

/// Decoded picture buffer with C.5.2 style output ("bumping").
///
/// Pictures that leave the DPB for display are appended to the `output` vector passed to the
/// mutating methods, in display order.
#[derive(Debug)]
pub(crate) struct Dpb<P> {
    entries: Vec<DpbEntry<P>>,
    /// Upper bound on occupancy: the smaller of the level limit and the client's surface count.
    /// Zero until the first sequence starts.
    max_dpb_size: usize,
    /// Size declared by the active SPS for the current picture.
    dpb_size: usize,
    overflow_policy: DpbOverflowPolicy,
    current: Option<usize>,
}

impl<P: Clone> Dpb<P> {
    pub(crate) fn new(overflow_policy: DpbOverflowPolicy) -> Self {
        Self {
            entries: (0..MAX_DPB_SLOTS).map(|_| DpbEntry::default()).collect(),
            max_dpb_size: 0,
            dpb_size: MAX_DPB_SLOTS,
            overflow_policy,
            current: None,
        }
    }

    pub(crate) fn max_dpb_size(&self) -> usize {
        self.max_dpb_size
    }

    pub(crate) fn set_max_dpb_size(&mut self, size: usize) {
        self.max_dpb_size = size.min(MAX_DPB_SLOTS);
    }

    pub(crate) fn entries(&self) -> &[DpbEntry<P>] {
        &self.entries
    }

    pub(crate) fn entry_mut(&mut self, slot: usize) -> Option<&mut DpbEntry<P>> {
        self.entries.get_mut(slot)
    }

    /// Number of decoded pictures held, not counting the one being decoded.
    pub(crate) fn fullness(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_occupied()).count()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.fullness() == 0
    }

    fn pending_output(&self, layer_id: u8) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.is_occupied() && entry.output_needed && entry.layer_id == layer_id)
            .count()
    }

    /// Occupancy from which [`Dpb::bump`] may evict a picture that is still used for reference.
    fn overflow_threshold(&self) -> usize {
        match self.overflow_policy {
            DpbOverflowPolicy::Lenient => self.max_dpb_size.saturating_sub(1),
            DpbOverflowPolicy::Strict => self.dpb_size,
        }
    }

    /// Returns entries that are neither referenced nor waiting for output to the empty state.
    pub(crate) fn free_unused(&mut self) {
        for entry in self.entries.iter_mut() {
            if entry.state != SlotState::Decoding
                && !entry.marking.is_reference()
                && !entry.output_needed
            {
                entry.release();
            }
        }
    }

    /// Outputs the pending picture with the lowest POC. With nothing pending and occupancy at or
    /// above `max_allowed`, drops the reference marking of the lowest POC picture instead.
    /// Returns false when no progress could be made.
    pub(crate) fn bump(&mut self, max_allowed: usize, output: &mut Vec<OutputPicture<P>>) -> bool {
        let mut pending: Option<usize> = None;
        let mut lowest: Option<usize> = None;

        for (slot, entry) in self.entries.iter().enumerate() {
            if !entry.is_occupied() {
                continue;
            }
            let candidate = if entry.output_needed {
                &mut pending
            } else {
                &mut lowest
            };
            let better = match *candidate {
                None => true,
                Some(best) => {
                    let best = &self.entries[best];
                    entry.poc < best.poc || (entry.poc == best.poc && entry.layer_id < best.layer_id)
                }
            };
            if better {
                *candidate = Some(slot);
            }
        }

        let slot = match pending {
            Some(slot) => slot,
            None => {
                let fullness = self.fullness();
                let Some(slot) = lowest else {
                    return false;
                };
                if fullness < max_allowed {
                    return false;
                }
                warn!(
                    fullness,
                    max_allowed,
                    poc = self.entries[slot].poc,
                    "DPB overflow, evicting a reference picture"
                );
                self.entries[slot].marking = ReferenceMarking::Unused;
                slot
            }
        };

        let entry = &mut self.entries[slot];
        if entry.output_needed {
            entry.output_needed = false;
            if let Some((id, picture)) = &entry.picture {
                trace!(slot, poc = entry.poc, layer_id = entry.layer_id, "Bumping picture");
                output.push(OutputPicture {
                    id: *id,
                    picture: picture.clone(),
                    poc: entry.poc,
                    layer_id: entry.layer_id,
                });
            }
        }
        if !entry.marking.is_reference() {
            entry.release();
        }

        true
    }

    /// Empties the DPB. Pending pictures are output first unless `no_output_of_prior_pics` is set.
    pub(crate) fn flush(&mut self, no_output_of_prior_pics: bool, output: &mut Vec<OutputPicture<P>>) {
        for entry in self.entries.iter_mut() {
            entry.marking = ReferenceMarking::Unused;
            if no_output_of_prior_pics {
                entry.output_needed = false;
            }
        }

        self.free_unused();
        while !self.is_empty() {
            if !self.bump(0, output) {
                break;
            }
        }

        for entry in self.entries.iter_mut() {
            entry.marking = ReferenceMarking::Unused;
            entry.output_needed = false;
            entry.release();
        }
        self.current = None;
    }

    /// Drops every picture of one layer without output.
    pub(crate) fn clear_layer(&mut self, layer_id: u8) {
        for entry in self.entries.iter_mut() {
            if entry.layer_id == layer_id && entry.state != SlotState::Decoding {
                entry.marking = ReferenceMarking::Unused;
                entry.output_needed = false;
                entry.release();
            }
        }
    }

    /// Reserves the lowest empty slot for a new picture, bumping pictures out while the DPB holds
    /// `max_dec_pic_buffering` or more of them.
    pub(crate) fn start_picture(
        &mut self,
        poc: i32,
        layer_id: u8,
        output_needed: bool,
        max_dec_pic_buffering: usize,
        output: &mut Vec<OutputPicture<P>>,
    ) -> usize {
        self.abort_picture();
        self.free_unused();

        self.dpb_size = max_dec_pic_buffering
            .min(self.max_dpb_size)
            .clamp(1, MAX_DPB_SLOTS);
        while self.fullness() >= self.dpb_size {
            if !self.bump(self.overflow_threshold(), output) {
                break;
            }
        }

        let slot = loop {
            if let Some(slot) = self.entries.iter().position(|entry| entry.state == SlotState::Empty) {
                break slot;
            }
            // Every slot holds a reference picture the stream never released.
            self.bump(0, output);
        };

        self.entries[slot] = DpbEntry {
            state: SlotState::Decoding,
            marking: ReferenceMarking::Unused,
            output_needed,
            poc,
            layer_id,
            picture: None,
        };
        self.current = Some(slot);
        slot
    }

    /// Releases the slot of a picture that will not be decoded.
    pub(crate) fn abort_picture(&mut self) {
        if let Some(slot) = self.current.take() {
            let entry = &mut self.entries[slot];
            if entry.state == SlotState::Decoding {
                entry.output_needed = false;
                entry.release();
            }
        }
    }

    /// Stores the decoded picture as a short-term reference and outputs pictures while more than
    /// `max_num_reorder_pics` of its layer wait for display.
    pub(crate) fn end_picture(&mut self, max_num_reorder_pics: usize, output: &mut Vec<OutputPicture<P>>) {
        let Some(slot) = self.current.take() else {
            return;
        };
        let entry = &mut self.entries[slot];
        entry.state = SlotState::Occupied;
        entry.marking = ReferenceMarking::ShortTerm;
        let layer_id = entry.layer_id;

        while self.pending_output(layer_id) > max_num_reorder_pics {
            if !self.bump(self.overflow_threshold(), output) {
                break;
            }
        }
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::new(self.overflow_policy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dpb(max_dpb_size: usize) -> Dpb<u32> {
        let mut dpb = Dpb::new(DpbOverflowPolicy::Lenient);
        dpb.set_max_dpb_size(max_dpb_size);
        dpb
    }

    fn decode(dpb: &mut Dpb<u32>, poc: i32, reorder: usize, output: &mut Vec<OutputPicture<u32>>) -> usize {
        let slot = dpb.start_picture(poc, 0, true, 6, output);
        dpb.entry_mut(slot).unwrap().picture = Some((PictureId(poc as u64), poc as u32));
        dpb.end_picture(reorder, output);
        slot
    }

    fn pocs(output: &[OutputPicture<u32>]) -> Vec<i32> {
        output.iter().map(|picture| picture.poc).collect()
    }

    #[test]
    fn reserves_lowest_empty_slot() {
        let mut dpb = dpb(6);
        let mut output = Vec::new();

        assert_eq!(decode(&mut dpb, 0, 4, &mut output), 0);
        assert_eq!(decode(&mut dpb, 1, 4, &mut output), 1);

        dpb.entry_mut(0).unwrap().marking = ReferenceMarking::Unused;
        dpb.entry_mut(0).unwrap().output_needed = false;
        assert_eq!(decode(&mut dpb, 2, 4, &mut output), 0);
        assert!(output.is_empty());
    }

    #[test]
    fn reorders_output_by_poc() {
        let mut dpb = dpb(6);
        let mut output = Vec::new();

        for poc in [0, 8, 4, 2, 6] {
            decode(&mut dpb, poc, 2, &mut output);
        }
        assert_eq!(pocs(&output), vec![0, 2, 4]);

        dpb.flush(false, &mut output);
        assert_eq!(pocs(&output), vec![0, 2, 4, 6, 8]);
        assert!(dpb.is_empty());
    }

    #[test]
    fn new_picture_enters_through_decoding_state() {
        let mut dpb = dpb(6);
        let mut output = Vec::new();

        let slot = dpb.start_picture(0, 0, true, 6, &mut output);
        assert_eq!(dpb.entries()[slot].state, SlotState::Decoding);
        assert_eq!(dpb.entries()[slot].marking, ReferenceMarking::Unused);

        dpb.end_picture(0, &mut output);
        assert_eq!(dpb.entries()[slot].state, SlotState::Occupied);
        assert_eq!(dpb.entries()[slot].marking, ReferenceMarking::ShortTerm);
    }

    #[test]
    fn bump_prefers_lower_layer_on_equal_poc() {
        let mut dpb = dpb(6);
        let mut output = Vec::new();

        for layer_id in [1, 0] {
            let slot = dpb.start_picture(3, layer_id, true, 6, &mut output);
            dpb.entry_mut(slot).unwrap().picture = Some((PictureId(layer_id as u64), layer_id as u32));
            dpb.end_picture(4, &mut output);
        }

        assert!(dpb.bump(6, &mut output));
        assert_eq!(output[0].layer_id, 0);
    }

    #[test]
    fn forced_eviction_frees_a_slot_when_full_of_references() {
        let mut dpb = dpb(4);
        let mut output = Vec::new();

        for poc in 0..4 {
            decode(&mut dpb, poc, 0, &mut output);
        }
        assert_eq!(pocs(&output), vec![0, 1, 2, 3]);
        assert_eq!(dpb.fullness(), 4);

        // Everything is output but still referenced, so the lowest POC loses its marking.
        let slot = decode(&mut dpb, 4, 0, &mut output);
        assert_eq!(slot, 0);
        assert!(dpb.fullness() <= 4);
    }

    #[test]
    fn bump_without_pending_output_respects_threshold() {
        let mut dpb = dpb(4);
        let mut output = Vec::new();
        decode(&mut dpb, 0, 0, &mut output);
        output.clear();

        assert!(!dpb.bump(3, &mut output));
        assert_eq!(dpb.fullness(), 1);

        assert!(dpb.bump(1, &mut output));
        assert!(dpb.is_empty());
        assert!(output.is_empty());
    }

    #[test]
    fn strict_policy_evicts_at_declared_size() {
        let mut dpb = Dpb::new(DpbOverflowPolicy::Strict);
        dpb.set_max_dpb_size(16);
        let mut output = Vec::new();

        for poc in 0..3 {
            let slot = dpb.start_picture(poc, 0, false, 2, &mut output);
            dpb.entry_mut(slot).unwrap().picture = Some((PictureId(poc as u64), poc as u32));
            dpb.end_picture(0, &mut output);
        }

        assert_eq!(dpb.fullness(), 2);
        assert!(dpb.entries().iter().all(|entry| entry.poc != 0 || !entry.is_occupied()));
    }

    #[test]
    fn flush_without_output_drops_pending_pictures() {
        let mut dpb = dpb(6);
        let mut output = Vec::new();
        for poc in [0, 2, 1] {
            decode(&mut dpb, poc, 4, &mut output);
        }

        dpb.flush(true, &mut output);

        assert!(output.is_empty());
        assert!(dpb.entries().iter().all(|entry| entry.state == SlotState::Empty));
        assert!(dpb.entries().iter().all(|entry| entry.picture.is_none()));
    }

    #[test]
    fn releases_pictures_once() {
        let picture = std::sync::Arc::new(());
        let mut dpb = Dpb::new(DpbOverflowPolicy::Lenient);
        dpb.set_max_dpb_size(6);
        let mut output = Vec::new();

        let slot = dpb.start_picture(0, 0, true, 6, &mut output);
        dpb.entry_mut(slot).unwrap().picture = Some((PictureId(0), picture.clone()));
        dpb.end_picture(0, &mut output);
        assert_eq!(std::sync::Arc::strong_count(&picture), 3);

        output.clear();
        dpb.flush(false, &mut output);
        assert_eq!(std::sync::Arc::strong_count(&picture), 1);
    }

    #[test]
    fn clear_layer_keeps_other_layers() {
        let mut dpb = dpb(6);
        let mut output = Vec::new();
        for layer_id in [0, 1] {
            dpb.start_picture(0, layer_id, true, 6, &mut output);
            dpb.end_picture(4, &mut output);
        }

        dpb.clear_layer(1);

        assert_eq!(dpb.fullness(), 1);
        assert_eq!(dpb.entries()[0].layer_id, 0);
    }
}
