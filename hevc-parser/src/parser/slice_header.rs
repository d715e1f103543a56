use super::{
    bit_reader::BitReader,
    nalu_header::{NalUnitHeader, NalUnitType},
    parameter_sets::{
        MAX_PPS_COUNT, ParameterSetError, ParameterSetStore, ShortTermRefPicSet, Sps, Vps, ceil_log2, ensure_range,
    },
};

/// Largest `PicSizeInCtbsY` accepted in a slice header.
const MAX_PIC_SIZE_IN_CTBS: u32 = 1 << 24;
const MAX_LONG_TERM_PICS: u32 = 16;

#[derive(Debug, thiserror::Error)]
pub enum SliceHeaderError {
    #[error("Slice refers to a PPS {0} that is not available")]
    MissingPps(u8),

    #[error("Slice refers to a SPS {0} that is not available")]
    MissingSps(u8),

    #[error("Slice in layer {layer_id} refers to a VPS {vps_id} that is not available")]
    MissingVps { vps_id: u8, layer_id: u8 },

    #[error("Dependent slice segment without a matching first slice segment")]
    MissingFirstSlice,

    #[error(transparent)]
    InvalidField(#[from] ParameterSetError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceType {
    B,
    P,
    I,
}

impl SliceType {
    fn from_id(id: u32) -> Option<Self> {
        match id {
            0 => Some(Self::B),
            1 => Some(Self::P),
            2 => Some(Self::I),
            _ => None,
        }
    }
}

/// One entry of the long-term part of the slice reference picture set, resolved against the SPS
/// candidates when `lt_idx_sps` is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LongTermRef {
    pub poc_lsb_lt: u32,
    pub used_by_curr_pic: bool,
    pub delta_poc_msb_present_flag: bool,
    /// Accumulated `DeltaPocMsbCycleLt` (7-52).
    pub delta_poc_msb_cycle_lt: u32,
}

/// The part of `slice_segment_header()` needed to run the reference picture set and DPB
/// processes. Parsing stops after the reference index counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceHeader {
    pub nal_unit_type: NalUnitType,
    pub layer_id: u8,
    pub temporal_id: u8,

    pub first_slice_segment_in_pic_flag: bool,
    pub no_output_of_prior_pics_flag: bool,
    pub pps_id: u8,
    pub dependent_slice_segment_flag: bool,
    pub slice_segment_address: u32,
    pub slice_type: SliceType,
    pub pic_output_flag: bool,
    pub colour_plane_id: u8,
    pub pic_order_cnt_lsb: u32,

    pub short_term_ref_pic_set_sps_flag: bool,
    pub short_term_ref_pic_set_idx: u32,
    /// Set signalled in the slice header itself.
    pub short_term_ref_pic_set: Option<ShortTermRefPicSet>,
    /// `NumBitsForShortTermRPSInSlice`
    pub num_bits_for_short_term_rps: u32,
    /// `NumDeltaPocs[RefRpsIdx]` for an inter predicted set in the slice header.
    pub num_delta_pocs_of_ref_rps_idx: u32,

    pub num_long_term_sps: u32,
    pub num_long_term_pics: u32,
    pub long_term_refs: Vec<LongTermRef>,
    pub slice_temporal_mvp_enabled_flag: bool,

    pub inter_layer_pred_enabled_flag: bool,
    pub num_inter_layer_ref_pics_minus1: u32,
    /// Indices into the direct reference layers of the current layer.
    pub inter_layer_pred_layer_idc: Vec<u8>,
    /// `NumActiveRefLayerPics`
    pub num_active_ref_layer_pics: u32,

    pub num_ref_idx_l0_active_minus1: u8,
    pub num_ref_idx_l1_active_minus1: u8,
    /// `NumPicTotalCurr` without the pps_curr_pic_ref term.
    pub num_poc_total_curr: u32,
}

impl SliceHeader {
    pub(crate) fn parse(
        reader: &mut BitReader,
        nal: NalUnitHeader,
        store: &ParameterSetStore,
        previous: Option<&SliceHeader>,
    ) -> Result<Self, SliceHeaderError> {
        let nal_unit_type = nal.nal_unit_type;
        let first_slice_segment_in_pic_flag = reader.flag();
        let no_output_of_prior_pics_flag = nal_unit_type.is_irap() && reader.flag();

        let pps_id =
            ensure_range("slice_pic_parameter_set_id", reader.ue(), 0..=MAX_PPS_COUNT as i64 - 1)? as u8;
        let pps = store.pps(pps_id).ok_or(SliceHeaderError::MissingPps(pps_id))?;
        let sps = store
            .sps(pps.sps_id)
            .ok_or(SliceHeaderError::MissingSps(pps.sps_id))?;
        let vps = match nal.layer_id {
            0 => None,
            layer_id => Some(store.vps(sps.vps_id).ok_or(SliceHeaderError::MissingVps {
                vps_id: sps.vps_id,
                layer_id,
            })?),
        };

        let pic_size_in_ctbs = ensure_range(
            "PicSizeInCtbsY",
            sps.pic_size_in_ctbs(),
            1..=MAX_PIC_SIZE_IN_CTBS as i64,
        )?;

        let mut header = Self {
            nal_unit_type,
            layer_id: nal.layer_id,
            temporal_id: nal.temporal_id,
            first_slice_segment_in_pic_flag,
            no_output_of_prior_pics_flag,
            pps_id,
            dependent_slice_segment_flag: false,
            slice_segment_address: 0,
            slice_type: SliceType::I,
            pic_output_flag: true,
            colour_plane_id: 0,
            pic_order_cnt_lsb: 0,
            short_term_ref_pic_set_sps_flag: false,
            short_term_ref_pic_set_idx: 0,
            short_term_ref_pic_set: None,
            num_bits_for_short_term_rps: 0,
            num_delta_pocs_of_ref_rps_idx: 0,
            num_long_term_sps: 0,
            num_long_term_pics: 0,
            long_term_refs: Vec::new(),
            slice_temporal_mvp_enabled_flag: false,
            inter_layer_pred_enabled_flag: false,
            num_inter_layer_ref_pics_minus1: 0,
            inter_layer_pred_layer_idc: Vec::new(),
            num_active_ref_layer_pics: 0,
            num_ref_idx_l0_active_minus1: 0,
            num_ref_idx_l1_active_minus1: 0,
            num_poc_total_curr: 0,
        };

        if !first_slice_segment_in_pic_flag {
            if pps.dependent_slice_segments_enabled_flag {
                header.dependent_slice_segment_flag = reader.flag();
            }
            header.slice_segment_address = ensure_range(
                "slice_segment_address",
                reader.u(ceil_log2(pic_size_in_ctbs)),
                1..=pic_size_in_ctbs as i64 - 1,
            )?;

            if header.dependent_slice_segment_flag {
                let previous = previous
                    .filter(|previous| {
                        previous.nal_unit_type == nal_unit_type
                            && previous.no_output_of_prior_pics_flag == no_output_of_prior_pics_flag
                            && previous.pps_id == pps_id
                    })
                    .ok_or(SliceHeaderError::MissingFirstSlice)?;

                return Ok(Self {
                    first_slice_segment_in_pic_flag: false,
                    dependent_slice_segment_flag: true,
                    slice_segment_address: header.slice_segment_address,
                    ..previous.clone()
                });
            }
        }

        reader.skip(pps.num_extra_slice_header_bits as u32);
        let slice_type = ensure_range("slice_type", reader.ue(), 0..=2)?;
        header.slice_type = SliceType::from_id(slice_type).unwrap_or(SliceType::I);

        if pps.output_flag_present_flag {
            header.pic_output_flag = reader.flag();
        }
        if sps.separate_colour_plane_flag {
            header.colour_plane_id = ensure_range("colour_plane_id", reader.u(2), 0..=2)? as u8;
        }

        let poc_lsb_not_present = vps
            .and_then(|vps| vps.extension.as_ref())
            .is_some_and(|extension| {
                extension
                    .poc_lsb_not_present_flag
                    .get(extension.layer_idx(nal.layer_id))
                    .copied()
                    .unwrap_or(false)
            });
        if (nal.layer_id > 0 && !poc_lsb_not_present) || !nal_unit_type.is_idr() {
            header.pic_order_cnt_lsb = reader.u(sps.log2_max_pic_order_cnt_lsb());
        }

        if !nal_unit_type.is_idr() {
            header.parse_reference_picture_set(reader, sps)?;
        }

        if let Some(vps) = vps {
            header.parse_inter_layer_prediction(reader, vps);
        }

        if sps.sample_adaptive_offset_enabled_flag {
            // slice_sao_luma_flag
            reader.skip(1);
            if sps.chroma_array_type() != 0 {
                // slice_sao_chroma_flag
                reader.skip(1);
            }
        }

        if header.slice_type != SliceType::I {
            if reader.flag() {
                header.num_ref_idx_l0_active_minus1 = reader.ue() as u8;
                if header.slice_type == SliceType::B {
                    header.num_ref_idx_l1_active_minus1 = reader.ue() as u8;
                }
            } else {
                header.num_ref_idx_l0_active_minus1 = pps.num_ref_idx_l0_default_active_minus1;
                header.num_ref_idx_l1_active_minus1 = pps.num_ref_idx_l1_default_active_minus1;
            }
            if header.slice_type != SliceType::B {
                header.num_ref_idx_l1_active_minus1 = 0;
            }
        }

        Ok(header)
    }

    fn parse_reference_picture_set(&mut self, reader: &mut BitReader, sps: &Sps) -> Result<(), SliceHeaderError> {
        let num_sets = sps.short_term_ref_pic_sets.len();

        self.short_term_ref_pic_set_sps_flag = reader.flag();
        if !self.short_term_ref_pic_set_sps_flag {
            let start = reader.consumed_bits();
            let set = ShortTermRefPicSet::parse(reader, num_sets, num_sets, &sps.short_term_ref_pic_sets)?;
            self.num_bits_for_short_term_rps = (reader.consumed_bits() - start) as u32;

            if set.inter_ref_pic_set_prediction_flag {
                let ref_rps_idx = num_sets.checked_sub(set.delta_idx_minus1 as usize + 1);
                self.num_delta_pocs_of_ref_rps_idx = ref_rps_idx
                    .and_then(|idx| sps.short_term_ref_pic_sets.get(idx))
                    .map_or(0, |set| set.num_delta_pocs() as u32);
            }
            self.short_term_ref_pic_set = Some(set);
        } else {
            if num_sets > 1 {
                self.short_term_ref_pic_set_idx = reader.u(ceil_log2(num_sets as u32));
            }
            ensure_range(
                "short_term_ref_pic_set_idx",
                self.short_term_ref_pic_set_idx,
                0..=num_sets as i64 - 1,
            )?;
        }

        if sps.long_term_ref_pics_present_flag {
            let num_candidates = sps.long_term_ref_pics.len() as u32;
            if num_candidates > 0 {
                self.num_long_term_sps = ensure_range("num_long_term_sps", reader.ue(), 0..=num_candidates as i64)?;
            }
            self.num_long_term_pics = reader.ue();
            ensure_range(
                "num_long_term_sps + num_long_term_pics",
                self.num_long_term_sps as i64 + self.num_long_term_pics as i64,
                0..=MAX_LONG_TERM_PICS as i64,
            )?;

            let total = self.num_long_term_sps + self.num_long_term_pics;
            let mut previous_cycle = 0;
            for i in 0..total {
                let (poc_lsb_lt, used_by_curr_pic) = if i < self.num_long_term_sps {
                    let lt_idx_sps = if num_candidates > 1 {
                        reader.u(ceil_log2(num_candidates))
                    } else {
                        0
                    };
                    let candidate = sps
                        .long_term_ref_pics
                        .get(lt_idx_sps as usize)
                        .ok_or(ParameterSetError::OutOfRange {
                            field: "lt_idx_sps",
                            value: lt_idx_sps as i64,
                        })?;
                    (candidate.lt_ref_pic_poc_lsb as u32, candidate.used_by_curr_pic)
                } else {
                    let poc_lsb_lt = reader.u(sps.log2_max_pic_order_cnt_lsb());
                    (poc_lsb_lt, reader.flag())
                };

                let delta_poc_msb_present_flag = reader.flag();
                let mut delta_poc_msb_cycle_lt = if delta_poc_msb_present_flag { reader.ue() } else { 0 };
                if i != 0 && i != self.num_long_term_sps {
                    delta_poc_msb_cycle_lt = delta_poc_msb_cycle_lt.wrapping_add(previous_cycle);
                }
                previous_cycle = delta_poc_msb_cycle_lt;

                self.long_term_refs.push(LongTermRef {
                    poc_lsb_lt,
                    used_by_curr_pic,
                    delta_poc_msb_present_flag,
                    delta_poc_msb_cycle_lt,
                });
            }
        }

        if sps.temporal_mvp_enabled_flag {
            self.slice_temporal_mvp_enabled_flag = reader.flag();
        }

        let short_term = self
            .short_term_ref_pic_set(sps)
            .map_or(0, |set| {
                set.negative
                    .iter()
                    .chain(&set.positive)
                    .filter(|entry| entry.used_by_curr_pic)
                    .count()
            });
        let long_term = self
            .long_term_refs
            .iter()
            .filter(|entry| entry.used_by_curr_pic)
            .count();
        self.num_poc_total_curr = (short_term + long_term) as u32;

        Ok(())
    }

    fn parse_inter_layer_prediction(&mut self, reader: &mut BitReader, vps: &Vps) {
        let Some(extension) = vps.extension.as_ref() else {
            return;
        };
        let num_direct_ref_layers = extension.direct_ref_layers(self.layer_id).len() as u32;

        if !extension.default_ref_layers_active_flag && num_direct_ref_layers > 0 {
            self.inter_layer_pred_enabled_flag = reader.flag();

            if self.inter_layer_pred_enabled_flag
                && num_direct_ref_layers > 1
                && !extension.max_one_active_ref_layer_flag
            {
                let length = ceil_log2(num_direct_ref_layers);
                self.num_inter_layer_ref_pics_minus1 = reader.u(length);
                self.num_active_ref_layer_pics = self.active_ref_layer_pics(vps);

                if self.num_active_ref_layer_pics != num_direct_ref_layers {
                    self.inter_layer_pred_layer_idc = (0..self.num_active_ref_layer_pics)
                        .map(|_| reader.u(length) as u8)
                        .collect();
                }
            }
        }

        self.num_active_ref_layer_pics = self.active_ref_layer_pics(vps);
        if self.inter_layer_pred_layer_idc.is_empty() {
            self.inter_layer_pred_layer_idc = (0..self.num_active_ref_layer_pics as u8).collect();
        }
    }

    /// `NumRefLayerPics` (F-55)
    fn ref_layer_pics(&self, vps: &Vps) -> u32 {
        let Some(extension) = vps.extension.as_ref() else {
            return 0;
        };
        let layer_idx = extension.layer_idx(self.layer_id);

        extension
            .direct_ref_layers(self.layer_id)
            .iter()
            .filter(|&&ref_layer_id| {
                let ref_layer_idx = extension.layer_idx(ref_layer_id);
                let max_sub_layer = extension
                    .sub_layers_vps_max_minus1
                    .get(ref_layer_idx)
                    .copied()
                    .unwrap_or(vps.max_sub_layers_minus1);
                let max_tid_il_ref_pics_plus1 = extension
                    .max_tid_il_ref_pics_plus1
                    .get(ref_layer_idx)
                    .and_then(|row| row.get(layer_idx))
                    .copied()
                    .unwrap_or(7);

                max_sub_layer >= self.temporal_id
                    && (self.temporal_id == 0 || max_tid_il_ref_pics_plus1 > self.temporal_id)
            })
            .count() as u32
    }

    /// `NumActiveRefLayerPics` (F-56)
    fn active_ref_layer_pics(&self, vps: &Vps) -> u32 {
        let Some(extension) = vps.extension.as_ref() else {
            return 0;
        };
        let num_ref_layer_pics = self.ref_layer_pics(vps);

        if self.layer_id == 0 || num_ref_layer_pics == 0 {
            0
        } else if extension.default_ref_layers_active_flag {
            num_ref_layer_pics
        } else if !self.inter_layer_pred_enabled_flag {
            0
        } else if extension.max_one_active_ref_layer_flag || extension.direct_ref_layers(self.layer_id).len() == 1 {
            1
        } else {
            self.num_inter_layer_ref_pics_minus1 + 1
        }
    }

    /// The short-term set of the picture, either from the slice header or from the SPS.
    pub fn short_term_ref_pic_set<'a>(&'a self, sps: &'a Sps) -> Option<&'a ShortTermRefPicSet> {
        if self.short_term_ref_pic_set_sps_flag {
            sps.short_term_ref_pic_sets
                .get(self.short_term_ref_pic_set_idx as usize)
        } else {
            self.short_term_ref_pic_set.as_ref()
        }
    }

    pub fn is_intra(&self) -> bool {
        self.slice_type == SliceType::I
    }
}
