use tracing::{debug, warn};

use crate::dpb::{Dpb, MAX_DPB_SLOTS, ReferenceMarking, SlotState};

use super::{
    parameter_sets::{MAX_LAYER_COUNT, Sps, Vps},
    slice_header::SliceHeader,
};

/// Reference lists of a picture, as DPB slot indices.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReferencePictureSets {
    /// `RefPicSetStCurrBefore`
    pub st_curr_before: Vec<usize>,
    /// `RefPicSetStCurrAfter`
    pub st_curr_after: Vec<usize>,
    /// `RefPicSetLtCurr`
    pub lt_curr: Vec<usize>,
    /// `RefPicSetInterLayer0`
    pub inter_layer0: Vec<usize>,
    /// `RefPicSetInterLayer1`
    pub inter_layer1: Vec<usize>,
}

#[derive(Debug, Default, Clone, Copy)]
struct PocState {
    prev_poc_lsb: i32,
    prev_poc_msb: i32,
}

/// Picture order count derivation (8.3.1) and reference picture set marking (8.3.2).
#[derive(Debug)]
pub(crate) struct ReferenceContext {
    poc_state: Vec<PocState>,
}

impl Default for ReferenceContext {
    fn default() -> Self {
        Self {
            poc_state: vec![PocState::default(); MAX_LAYER_COUNT],
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct LongTermCandidate {
    poc: i32,
    full_poc: bool,
    used_by_curr_pic: bool,
}

impl ReferenceContext {
    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }

    /// `PicOrderCntVal` of the picture starting with `header`.
    pub(crate) fn picture_order_count(&mut self, header: &SliceHeader, sps: &Sps, no_rasl_output_flag: bool) -> i32 {
        let state = &mut self.poc_state[header.layer_id as usize % MAX_LAYER_COUNT];
        let max_poc_lsb = sps.max_pic_order_cnt_lsb();
        let poc_lsb = header.pic_order_cnt_lsb as i32;

        let poc_msb = if header.nal_unit_type.is_irap() && no_rasl_output_flag {
            0
        } else if poc_lsb < state.prev_poc_lsb && state.prev_poc_lsb - poc_lsb >= max_poc_lsb / 2 {
            state.prev_poc_msb + max_poc_lsb
        } else if poc_lsb > state.prev_poc_lsb && poc_lsb - state.prev_poc_lsb > max_poc_lsb / 2 {
            state.prev_poc_msb - max_poc_lsb
        } else {
            state.prev_poc_msb
        };

        let nal_unit_type = header.nal_unit_type;
        if header.temporal_id == 0 && !nal_unit_type.is_leading() && !nal_unit_type.is_sub_layer_non_reference() {
            state.prev_poc_lsb = poc_lsb;
            state.prev_poc_msb = poc_msb;
        }

        poc_msb + poc_lsb
    }

    /// Derives the reference lists of the current picture and updates the marking of the
    /// pictures of its layer. Pictures of the layer that are in no list lose their marking.
    pub(crate) fn reference_picture_set<P: Clone>(
        &self,
        header: &SliceHeader,
        sps: &Sps,
        vps: Option<&Vps>,
        poc: i32,
        no_rasl_output_flag: bool,
        dpb: &mut Dpb<P>,
    ) -> ReferencePictureSets {
        let layer_id = header.layer_id;
        let mut sets = ReferencePictureSets::default();

        if header.nal_unit_type.is_irap() && no_rasl_output_flag {
            for slot in 0..MAX_DPB_SLOTS {
                if let Some(entry) = dpb.entry_mut(slot)
                    && entry.layer_id == layer_id
                {
                    entry.marking = ReferenceMarking::Unused;
                }
            }
        }

        let mut in_rps = [false; MAX_DPB_SLOTS];

        if !header.nal_unit_type.is_idr() {
            let max_poc_lsb = sps.max_pic_order_cnt_lsb();
            let long_term: Vec<LongTermCandidate> = header
                .long_term_refs
                .iter()
                .map(|lt| {
                    let mut lt_poc = lt.poc_lsb_lt as i32;
                    if lt.delta_poc_msb_present_flag {
                        lt_poc += poc - lt.delta_poc_msb_cycle_lt as i32 * max_poc_lsb - header.pic_order_cnt_lsb as i32;
                    }
                    LongTermCandidate {
                        poc: lt_poc,
                        full_poc: lt.delta_poc_msb_present_flag,
                        used_by_curr_pic: lt.used_by_curr_pic,
                    }
                })
                .collect();

            for candidate in long_term {
                let mask = if candidate.full_poc { -1 } else { max_poc_lsb - 1 };
                let found = dpb.entries().iter().position(|entry| {
                    entry.is_occupied()
                        && entry.layer_id == layer_id
                        && entry.marking.is_reference()
                        && entry.poc & mask == candidate.poc
                });

                match found {
                    Some(slot) => {
                        in_rps[slot] = true;
                        if candidate.used_by_curr_pic {
                            sets.lt_curr.push(slot);
                        }
                    }
                    None if candidate.used_by_curr_pic => {
                        warn!(poc = candidate.poc, "Long-term reference picture is not available")
                    }
                    None => debug!(poc = candidate.poc, "Long-term foll picture is not available"),
                }
            }
            for slot in 0..MAX_DPB_SLOTS {
                if in_rps[slot]
                    && let Some(entry) = dpb.entry_mut(slot)
                {
                    entry.marking = ReferenceMarking::LongTerm;
                }
            }

            if let Some(set) = header.short_term_ref_pic_set(sps) {
                let candidates = set
                    .negative
                    .iter()
                    .map(|entry| (entry, true))
                    .chain(set.positive.iter().map(|entry| (entry, false)));

                for (entry, before) in candidates {
                    let ref_poc = poc + entry.delta_poc;
                    let found = find_short_term(dpb, ref_poc, layer_id);

                    let slot = match found {
                        Some(slot) => Some(slot),
                        None if entry.used_by_curr_pic => {
                            let substitute = lost_reference(dpb, ref_poc, layer_id);
                            warn!(poc = ref_poc, substitute, "Short-term reference picture is missing");
                            substitute
                        }
                        None => None,
                    };

                    let Some(slot) = slot else {
                        continue;
                    };
                    in_rps[slot] = true;
                    if entry.used_by_curr_pic {
                        if before {
                            sets.st_curr_before.push(slot);
                        } else {
                            sets.st_curr_after.push(slot);
                        }
                    }
                }
            }
        }

        if let Some(vps) = vps
            && layer_id > 0
        {
            self.inter_layer_references(header, vps, poc, dpb, &mut sets);
        }

        for (slot, referenced) in in_rps.iter().enumerate() {
            if let Some(entry) = dpb.entry_mut(slot)
                && entry.is_occupied()
                && entry.layer_id == layer_id
                && !referenced
            {
                entry.marking = ReferenceMarking::Unused;
            }
        }

        sets
    }

    /// Fills `RefPicSetInterLayer0/1` (F.8.1.6) with the pictures of the reference layers that
    /// belong to the same access unit.
    fn inter_layer_references<P: Clone>(
        &self,
        header: &SliceHeader,
        vps: &Vps,
        poc: i32,
        dpb: &Dpb<P>,
        sets: &mut ReferencePictureSets,
    ) {
        let Some(extension) = vps.extension.as_ref() else {
            return;
        };
        let view_id = |layer_id: u8| -> i64 {
            extension
                .view_id_val
                .get(extension.view_order_idx(layer_id) as usize)
                .copied()
                .unwrap_or(0) as i64
        };
        let current_view_id = view_id(header.layer_id);
        let base_view_id = view_id(0);
        let direct_ref_layers = extension.direct_ref_layers(header.layer_id);

        for &idc in header
            .inter_layer_pred_layer_idc
            .iter()
            .take(header.num_active_ref_layer_pics as usize)
        {
            let Some(&ref_layer_id) = direct_ref_layers.get(idc as usize) else {
                warn!(idc, "Invalid inter-layer reference index");
                continue;
            };

            let found = dpb.entries().iter().position(|entry| {
                entry.is_occupied()
                    && entry.layer_id == ref_layer_id
                    && entry.marking.is_reference()
                    && entry.poc == poc
            });
            let Some(slot) = found else {
                warn!(ref_layer_id, poc, "Inter-layer reference picture is not available");
                continue;
            };

            if is_first_inter_layer_list(current_view_id, view_id(ref_layer_id), base_view_id) {
                sets.inter_layer0.push(slot);
            } else {
                sets.inter_layer1.push(slot);
            }
        }
    }
}

/// Views on the same side of the base view as the current one go to `RefPicSetInterLayer0`.
fn is_first_inter_layer_list(current_view_id: i64, ref_view_id: i64, base_view_id: i64) -> bool {
    (current_view_id <= base_view_id && current_view_id <= ref_view_id)
        || (current_view_id >= base_view_id && current_view_id >= ref_view_id)
}

fn find_short_term<P>(dpb: &Dpb<P>, poc: i32, layer_id: u8) -> Option<usize>
where
    P: Clone,
{
    dpb.entries().iter().position(|entry| {
        entry.state == SlotState::Occupied
            && entry.layer_id == layer_id
            && entry.marking == ReferenceMarking::ShortTerm
            && entry.poc == poc
    })
}

/// Stands in for a missing short-term reference with the short-term picture closest in POC.
/// On equal distance the lowest slot wins.
fn lost_reference<P: Clone>(dpb: &Dpb<P>, poc: i32, layer_id: u8) -> Option<usize> {
    let mut best: Option<(usize, i64)> = None;
    for (slot, entry) in dpb.entries().iter().enumerate() {
        if !entry.is_occupied() || entry.layer_id != layer_id || entry.marking != ReferenceMarking::ShortTerm {
            continue;
        }
        let distance = (entry.poc as i64 - poc as i64).abs();
        if distance == 0 {
            continue;
        }
        if best.is_none_or(|(_, best_distance)| distance < best_distance) {
            best = Some((slot, distance));
        }
    }
    best.map(|(slot, _)| slot)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::DpbOverflowPolicy,
        dpb::PictureId,
        parser::{
            bit_reader::BitReader,
            nalu_header::{NalUnitHeader, NalUnitType},
            parameter_sets::{ParameterSet, ParameterSetStore, Pps},
            slice_header::LongTermRef,
            test_bitstream::syntax::{self, SliceRps},
        },
    };

    fn store() -> ParameterSetStore {
        let mut store = ParameterSetStore::default();
        let sps = Sps::parse(&mut BitReader::new(&syntax::sps(0, 6, 2), false), 0, &store).unwrap();
        store.insert(ParameterSet::Sequence(Arc::new(sps)));
        let pps = Pps::parse(&mut BitReader::new(&syntax::pps(0, 0), false), &store).unwrap();
        store.insert(ParameterSet::Picture(Arc::new(pps)));
        store
    }

    fn header(store: &ParameterSetStore, nal_unit_type: NalUnitType, poc_lsb: u64, rps: &SliceRps) -> SliceHeader {
        header_with_tid(store, nal_unit_type, 0, poc_lsb, rps)
    }

    fn header_with_tid(
        store: &ParameterSetStore,
        nal_unit_type: NalUnitType,
        temporal_id: u8,
        poc_lsb: u64,
        rps: &SliceRps,
    ) -> SliceHeader {
        let idr = nal_unit_type.is_idr();
        let data = syntax::slice(idr, 0, if idr { 2 } else { 1 }, poc_lsb, rps);
        let nal = NalUnitHeader {
            nal_unit_type,
            layer_id: 0,
            temporal_id,
        };
        SliceHeader::parse(&mut BitReader::new(&data, false), nal, store, None).unwrap()
    }

    fn dpb_with(pocs: &[i32]) -> Dpb<u32> {
        let mut dpb = Dpb::new(DpbOverflowPolicy::Lenient);
        dpb.set_max_dpb_size(6);
        let mut output = Vec::new();
        for &poc in pocs {
            let slot = dpb.start_picture(poc, 0, false, 6, &mut output);
            dpb.entry_mut(slot).unwrap().picture = Some((PictureId(slot as u64), poc as u32));
            dpb.end_picture(6, &mut output);
        }
        dpb
    }

    #[test]
    fn poc_msb_wraps_forward_and_backward() {
        let store = store();
        let sps = store.sps(0).unwrap();
        let mut context = ReferenceContext::default();

        let idr = header(&store, NalUnitType::IdrWRadl, 0, &SliceRps::default());
        assert_eq!(context.picture_order_count(&idr, sps, true), 0);

        let rps = SliceRps::default();
        for (lsb, expected) in [(100, 100), (200, 200), (40, 296), (150, 406), (10, 522)] {
            let trail = header(&store, NalUnitType::TrailR, lsb, &rps);
            assert_eq!(context.picture_order_count(&trail, sps, false), expected);
        }

        let back = header(&store, NalUnitType::TrailR, 250, &rps);
        assert_eq!(context.picture_order_count(&back, sps, false), 506);
    }

    #[test]
    fn non_reference_pictures_do_not_update_poc_state() {
        let store = store();
        let sps = store.sps(0).unwrap();
        let mut context = ReferenceContext::default();
        let rps = SliceRps::default();

        let anchor = header(&store, NalUnitType::TrailR, 100, &rps);
        assert_eq!(context.picture_order_count(&anchor, sps, false), 100);

        // Neither a leading picture nor a sub-layer non-reference picture moves prevPocTid0.
        for nal_unit_type in [NalUnitType::RaslR, NalUnitType::TrailN] {
            let picture = header(&store, nal_unit_type, 230, &rps);
            assert_eq!(context.picture_order_count(&picture, sps, false), 230 - 256);
        }
        let higher_sub_layer = header_with_tid(&store, NalUnitType::TrailR, 1, 230, &rps);
        assert_eq!(context.picture_order_count(&higher_sub_layer, sps, false), 230 - 256);

        let next = header(&store, NalUnitType::TrailR, 120, &rps);
        assert_eq!(context.picture_order_count(&next, sps, false), 120);
    }

    #[test]
    fn derives_short_term_lists_and_unmarks_the_rest() {
        let store = store();
        let sps = store.sps(0).unwrap();
        let context = ReferenceContext::default();
        let mut dpb = dpb_with(&[0, 4, 8]);

        let rps = SliceRps {
            negative: vec![(-2, true)],
            positive: vec![(2, true)],
        };
        let header = header(&store, NalUnitType::TrailR, 6, &rps);
        let sets = context.reference_picture_set(&header, sps, None, 6, false, &mut dpb);

        assert_eq!(sets.st_curr_before, vec![1]);
        assert_eq!(sets.st_curr_after, vec![2]);
        assert!(sets.lt_curr.is_empty());
        assert_eq!(dpb.entries()[0].marking, ReferenceMarking::Unused);
        assert_eq!(dpb.entries()[1].marking, ReferenceMarking::ShortTerm);
    }

    #[test]
    fn foll_entries_stay_marked() {
        let store = store();
        let sps = store.sps(0).unwrap();
        let context = ReferenceContext::default();
        let mut dpb = dpb_with(&[0, 4]);

        let rps = SliceRps {
            negative: vec![(-2, true), (-6, false)],
            positive: vec![],
        };
        let header = header(&store, NalUnitType::TrailR, 6, &rps);
        let sets = context.reference_picture_set(&header, sps, None, 6, false, &mut dpb);

        assert_eq!(sets.st_curr_before, vec![1]);
        assert_eq!(dpb.entries()[0].marking, ReferenceMarking::ShortTerm);
    }

    #[test]
    fn substitutes_lost_short_term_reference() {
        let store = store();
        let sps = store.sps(0).unwrap();
        let context = ReferenceContext::default();
        let mut dpb = dpb_with(&[0, 3, 9]);

        let rps = SliceRps {
            negative: vec![(-2, true)],
            positive: vec![],
        };
        let header = header(&store, NalUnitType::TrailR, 6, &rps);
        let sets = context.reference_picture_set(&header, sps, None, 6, false, &mut dpb);

        assert_eq!(sets.st_curr_before, vec![1]);
        assert_eq!(dpb.entries()[1].marking, ReferenceMarking::ShortTerm);
    }

    #[test]
    fn lost_reference_ties_go_to_lowest_slot() {
        let dpb = dpb_with(&[0, 8]);
        assert_eq!(lost_reference(&dpb, 4, 0), Some(0));
        assert_eq!(lost_reference(&dpb, 7, 0), Some(1));
        assert_eq!(lost_reference(&dpb_with(&[]), 4, 0), None);
    }

    #[test]
    fn matches_long_term_references_by_lsb() {
        let store = store();
        let sps = store.sps(0).unwrap();
        let context = ReferenceContext::default();
        // 260 & 0xff == 4
        let mut dpb = dpb_with(&[260, 262]);

        let mut header = header(&store, NalUnitType::TrailR, 10, &SliceRps::default());
        header.long_term_refs = vec![LongTermRef {
            poc_lsb_lt: 4,
            used_by_curr_pic: true,
            delta_poc_msb_present_flag: false,
            delta_poc_msb_cycle_lt: 0,
        }];
        let sets = context.reference_picture_set(&header, sps, None, 266, false, &mut dpb);

        assert_eq!(sets.lt_curr, vec![0]);
        assert_eq!(dpb.entries()[0].marking, ReferenceMarking::LongTerm);
        assert_eq!(dpb.entries()[1].marking, ReferenceMarking::Unused);
    }

    #[test]
    fn long_term_msb_cycle_selects_full_poc() {
        let store = store();
        let sps = store.sps(0).unwrap();
        let context = ReferenceContext::default();
        let mut dpb = dpb_with(&[4, 260]);

        let mut header = header(&store, NalUnitType::TrailR, 10, &SliceRps::default());
        header.long_term_refs = vec![LongTermRef {
            poc_lsb_lt: 4,
            used_by_curr_pic: true,
            delta_poc_msb_present_flag: true,
            delta_poc_msb_cycle_lt: 2,
        }];
        // PicOrderCntVal 522 has msb 512, two cycles back is msb 0
        let sets = context.reference_picture_set(&header, sps, None, 522, false, &mut dpb);

        assert_eq!(sets.lt_curr, vec![0]);
    }

    #[test]
    fn irap_with_no_rasl_output_clears_the_layer() {
        let store = store();
        let sps = store.sps(0).unwrap();
        let context = ReferenceContext::default();
        let mut dpb = dpb_with(&[0, 4]);

        let header = header(&store, NalUnitType::IdrNLp, 0, &SliceRps::default());
        let sets = context.reference_picture_set(&header, sps, None, 0, true, &mut dpb);

        assert_eq!(sets, ReferencePictureSets::default());
        assert!(dpb.entries().iter().all(|entry| !entry.marking.is_reference()));
    }

    #[test]
    fn is_deterministic_for_the_same_state() {
        let store = store();
        let sps = store.sps(0).unwrap();
        let context = ReferenceContext::default();
        let rps = SliceRps {
            negative: vec![(-1, true), (-3, true)],
            positive: vec![(1, true)],
        };
        let header = header(&store, NalUnitType::TrailR, 5, &rps);

        let first = context.reference_picture_set(&header, sps, None, 5, false, &mut dpb_with(&[2, 4, 6]));
        let second = context.reference_picture_set(&header, sps, None, 5, false, &mut dpb_with(&[2, 4, 6]));
        assert_eq!(first, second);
        assert_eq!(first.st_curr_before, vec![1, 0]);
    }

    #[test]
    fn splits_inter_layer_views_around_the_base_view() {
        assert!(is_first_inter_layer_list(2, 1, 0));
        assert!(!is_first_inter_layer_list(1, 2, 0));
        assert!(is_first_inter_layer_list(-2, -1, 0));
        assert!(!is_first_inter_layer_list(-1, -2, 0));
    }
}
