use crate::parser::bit_reader::BitReader;

use super::{
    ParameterSetError, ParameterSetStore, ensure_range,
    profile_tier_level::ProfileTierLevel,
    scaling_list::{ScalingFactors, ScalingList},
    short_term_rps::ShortTermRefPicSet,
    vps::Vps,
    vui::{Vui, Window},
};

const MAX_SHORT_TERM_REF_PIC_SETS: u32 = 64;
const MAX_LONG_TERM_REF_PICS_SPS: u32 = 32;
/// `sps_ext_or_max_sub_layers_minus1` value that selects the multi-layer SPS syntax.
const MULTI_LAYER_EXT_SPS: u8 = 7;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SubLayerOrdering {
    pub max_dec_pic_buffering_minus1: u32,
    pub max_num_reorder_pics: u32,
    pub max_latency_increase_plus1: u32,
}

impl SubLayerOrdering {
    /// Reads the `*_sub_layer_ordering_info` loop. When only the highest sub-layer is signalled,
    /// the lower ones take its values.
    pub(crate) fn parse_list(reader: &mut BitReader, info_present: bool, max_sub_layers_minus1: u8) -> Vec<Self> {
        let mut list = vec![Self::default(); max_sub_layers_minus1 as usize + 1];
        let first = if info_present { 0 } else { max_sub_layers_minus1 as usize };

        for ordering in &mut list[first..] {
            *ordering = Self {
                max_dec_pic_buffering_minus1: reader.ue(),
                max_num_reorder_pics: reader.ue(),
                max_latency_increase_plus1: reader.ue(),
            };
        }

        let signalled = list[first];
        list[..first].fill(signalled);
        list
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pcm {
    pub sample_bit_depth_luma_minus1: u8,
    pub sample_bit_depth_chroma_minus1: u8,
    pub log2_min_pcm_luma_coding_block_size_minus3: u32,
    pub log2_diff_max_min_pcm_luma_coding_block_size: u32,
    pub loop_filter_disabled_flag: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LongTermRefPicSps {
    pub lt_ref_pic_poc_lsb: u16,
    pub used_by_curr_pic: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SpsRangeExtension {
    pub transform_skip_rotation_enabled_flag: bool,
    pub transform_skip_context_enabled_flag: bool,
    pub implicit_rdpcm_enabled_flag: bool,
    pub explicit_rdpcm_enabled_flag: bool,
    pub extended_precision_processing_flag: bool,
    pub intra_smoothing_disabled_flag: bool,
    pub high_precision_offsets_enabled_flag: bool,
    pub persistent_rice_adaptation_enabled_flag: bool,
    pub cabac_bypass_alignment_enabled_flag: bool,
}

impl SpsRangeExtension {
    fn parse(reader: &mut BitReader) -> Self {
        Self {
            transform_skip_rotation_enabled_flag: reader.flag(),
            transform_skip_context_enabled_flag: reader.flag(),
            implicit_rdpcm_enabled_flag: reader.flag(),
            explicit_rdpcm_enabled_flag: reader.flag(),
            extended_precision_processing_flag: reader.flag(),
            intra_smoothing_disabled_flag: reader.flag(),
            high_precision_offsets_enabled_flag: reader.flag(),
            persistent_rice_adaptation_enabled_flag: reader.flag(),
            cabac_bypass_alignment_enabled_flag: reader.flag(),
        }
    }
}

/// `seq_parameter_set_rbsp()` (7.3.2.2), including the multi-layer form (F.7.3.2.2.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sps {
    pub id: u8,
    pub vps_id: u8,
    /// `nuh_layer_id` of the NAL unit that carried the set.
    pub layer_id: u8,
    pub multi_layer_ext_sps_flag: bool,
    pub max_sub_layers_minus1: u8,
    pub temporal_id_nesting_flag: bool,
    /// Not present in the multi-layer form.
    pub profile_tier_level: Option<ProfileTierLevel>,
    pub rep_format_idx: Option<u8>,
    pub chroma_format_idc: u8,
    pub separate_colour_plane_flag: bool,
    pub pic_width_in_luma_samples: u32,
    pub pic_height_in_luma_samples: u32,
    /// Offsets that do not fit the picture are dropped.
    pub conformance_window: Window,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    pub log2_max_pic_order_cnt_lsb_minus4: u8,
    pub sub_layer_ordering: Vec<SubLayerOrdering>,
    /// Largest `max_dec_pic_buffering_minus1 + 1` over all sub-layers.
    pub max_dec_pic_buffering: u32,
    /// Largest `max_num_reorder_pics` over all sub-layers.
    pub max_num_reorder_pics: u32,
    pub log2_min_luma_coding_block_size_minus3: u32,
    pub log2_diff_max_min_luma_coding_block_size: u32,
    pub log2_min_luma_transform_block_size_minus2: u32,
    pub log2_diff_max_min_luma_transform_block_size: u32,
    pub max_transform_hierarchy_depth_inter: u32,
    pub max_transform_hierarchy_depth_intra: u32,
    pub scaling_list_enabled_flag: bool,
    pub scaling_list_ref_layer_id: Option<u8>,
    pub scaling_list: Option<ScalingList>,
    pub amp_enabled_flag: bool,
    pub sample_adaptive_offset_enabled_flag: bool,
    pub pcm: Option<Pcm>,
    pub short_term_ref_pic_sets: Vec<ShortTermRefPicSet>,
    pub long_term_ref_pics_present_flag: bool,
    pub long_term_ref_pics: Vec<LongTermRefPicSps>,
    pub temporal_mvp_enabled_flag: bool,
    pub strong_intra_smoothing_enabled_flag: bool,
    pub vui: Option<Vui>,
    pub range_extension: Option<SpsRangeExtension>,
    pub inter_view_mv_vert_constraint_flag: Option<bool>,
}

impl Sps {
    pub(crate) fn parse(
        reader: &mut BitReader,
        layer_id: u8,
        store: &ParameterSetStore,
    ) -> Result<Self, ParameterSetError> {
        let vps_id = reader.u(4) as u8;
        let vps = store.vps(vps_id);
        if layer_id > 0 && vps.is_none() {
            return Err(ParameterSetError::MissingVps(vps_id));
        }

        let signalled_sub_layers = reader.u(3) as u8;
        let multi_layer = layer_id > 0 && signalled_sub_layers == MULTI_LAYER_EXT_SPS;
        let (multi_layer_vps, max_sub_layers_minus1) = match vps {
            Some(vps) if multi_layer => (Some(vps.as_ref()), vps.max_sub_layers_minus1),
            _ => (None, signalled_sub_layers),
        };
        ensure_range("sps_max_sub_layers_minus1", max_sub_layers_minus1, 0..=6)?;

        let mut temporal_id_nesting_flag = false;
        let mut profile_tier_level = None;
        if multi_layer_vps.is_none() {
            temporal_id_nesting_flag = reader.flag();
            if max_sub_layers_minus1 == 0 && !temporal_id_nesting_flag {
                return Err(ParameterSetError::IncorrectData(
                    "sps_temporal_id_nesting_flag must be set with a single sub-layer".into(),
                ));
            }
            profile_tier_level = Some(ProfileTierLevel::parse(reader, true, max_sub_layers_minus1));
        }

        let id = ensure_range("sps_seq_parameter_set_id", reader.ue(), 0..=super::MAX_SPS_COUNT as i64 - 1)? as u8;

        let mut sps = Self {
            id,
            vps_id,
            layer_id,
            multi_layer_ext_sps_flag: multi_layer_vps.is_some(),
            max_sub_layers_minus1,
            temporal_id_nesting_flag,
            profile_tier_level,
            rep_format_idx: None,
            chroma_format_idc: 0,
            separate_colour_plane_flag: false,
            pic_width_in_luma_samples: 0,
            pic_height_in_luma_samples: 0,
            conformance_window: Window::default(),
            bit_depth_luma_minus8: 0,
            bit_depth_chroma_minus8: 0,
            log2_max_pic_order_cnt_lsb_minus4: 0,
            sub_layer_ordering: Vec::new(),
            max_dec_pic_buffering: 1,
            max_num_reorder_pics: 0,
            log2_min_luma_coding_block_size_minus3: 0,
            log2_diff_max_min_luma_coding_block_size: 0,
            log2_min_luma_transform_block_size_minus2: 0,
            log2_diff_max_min_luma_transform_block_size: 0,
            max_transform_hierarchy_depth_inter: 0,
            max_transform_hierarchy_depth_intra: 0,
            scaling_list_enabled_flag: false,
            scaling_list_ref_layer_id: None,
            scaling_list: None,
            amp_enabled_flag: false,
            sample_adaptive_offset_enabled_flag: false,
            pcm: None,
            short_term_ref_pic_sets: Vec::new(),
            long_term_ref_pics_present_flag: false,
            long_term_ref_pics: Vec::new(),
            temporal_mvp_enabled_flag: false,
            strong_intra_smoothing_enabled_flag: false,
            vui: None,
            range_extension: None,
            inter_view_mv_vert_constraint_flag: None,
        };

        match multi_layer_vps {
            Some(vps) => sps.parse_rep_format(reader, vps)?,
            None => sps.parse_picture_format(reader)?,
        }

        ensure_range("bit_depth_luma_minus8", sps.bit_depth_luma_minus8, 0..=6)?;
        ensure_range("bit_depth_chroma_minus8", sps.bit_depth_chroma_minus8, 0..=6)?;
        sps.log2_max_pic_order_cnt_lsb_minus4 =
            ensure_range("log2_max_pic_order_cnt_lsb_minus4", reader.ue(), 0..=12)? as u8;

        sps.sub_layer_ordering = match multi_layer_vps {
            Some(vps) => sub_layer_ordering_from_vps(vps, layer_id, max_sub_layers_minus1),
            None => {
                let info_present = reader.flag();
                SubLayerOrdering::parse_list(reader, info_present, max_sub_layers_minus1)
            }
        };
        for ordering in &sps.sub_layer_ordering {
            sps.max_dec_pic_buffering = sps
                .max_dec_pic_buffering
                .max(ordering.max_dec_pic_buffering_minus1 + 1);
            sps.max_num_reorder_pics = sps.max_num_reorder_pics.max(ordering.max_num_reorder_pics);
        }

        // MinCbLog2SizeY and CtbLog2SizeY are both at most 6.
        sps.log2_min_luma_coding_block_size_minus3 =
            ensure_range("log2_min_luma_coding_block_size_minus3", reader.ue(), 0..=3)?;
        sps.log2_diff_max_min_luma_coding_block_size =
            ensure_range("log2_diff_max_min_luma_coding_block_size", reader.ue(), 0..=3)?;
        sps.log2_min_luma_transform_block_size_minus2 = reader.ue();
        sps.log2_diff_max_min_luma_transform_block_size = reader.ue();
        sps.max_transform_hierarchy_depth_inter = reader.ue();
        sps.max_transform_hierarchy_depth_intra = reader.ue();

        sps.scaling_list_enabled_flag = reader.flag();
        if sps.scaling_list_enabled_flag {
            let infer_scaling_list = sps.multi_layer_ext_sps_flag && reader.flag();
            if infer_scaling_list {
                sps.scaling_list_ref_layer_id = Some(reader.u(6) as u8);
            } else if reader.flag() {
                sps.scaling_list = Some(ScalingList::parse(reader)?);
            }
        }

        sps.amp_enabled_flag = reader.flag();
        sps.sample_adaptive_offset_enabled_flag = reader.flag();
        if reader.flag() {
            let pcm = Pcm {
                sample_bit_depth_luma_minus1: reader.u(4) as u8,
                sample_bit_depth_chroma_minus1: reader.u(4) as u8,
                log2_min_pcm_luma_coding_block_size_minus3: reader.ue(),
                log2_diff_max_min_pcm_luma_coding_block_size: reader.ue(),
                loop_filter_disabled_flag: reader.flag(),
            };
            ensure_range(
                "pcm_sample_bit_depth_luma_minus1",
                pcm.sample_bit_depth_luma_minus1,
                0..=sps.bit_depth_luma_minus8 as i64 + 7,
            )?;
            ensure_range(
                "pcm_sample_bit_depth_chroma_minus1",
                pcm.sample_bit_depth_chroma_minus1,
                0..=sps.bit_depth_chroma_minus8 as i64 + 7,
            )?;
            sps.pcm = Some(pcm);
        }

        let num_short_term_ref_pic_sets = ensure_range(
            "num_short_term_ref_pic_sets",
            reader.ue(),
            0..=MAX_SHORT_TERM_REF_PIC_SETS as i64,
        )? as usize;
        for idx in 0..num_short_term_ref_pic_sets {
            let set = ShortTermRefPicSet::parse(
                reader,
                idx,
                num_short_term_ref_pic_sets,
                &sps.short_term_ref_pic_sets,
            )?;
            sps.short_term_ref_pic_sets.push(set);
        }

        sps.long_term_ref_pics_present_flag = reader.flag();
        if sps.long_term_ref_pics_present_flag {
            let count = ensure_range(
                "num_long_term_ref_pics_sps",
                reader.ue(),
                0..=MAX_LONG_TERM_REF_PICS_SPS as i64,
            )?;
            let lsb_bits = sps.log2_max_pic_order_cnt_lsb();
            sps.long_term_ref_pics = (0..count)
                .map(|_| LongTermRefPicSps {
                    lt_ref_pic_poc_lsb: reader.u(lsb_bits) as u16,
                    used_by_curr_pic: reader.flag(),
                })
                .collect();
        }

        sps.temporal_mvp_enabled_flag = reader.flag();
        sps.strong_intra_smoothing_enabled_flag = reader.flag();
        if reader.flag() {
            sps.vui = Some(Vui::parse(reader, max_sub_layers_minus1));
        }

        if reader.flag() {
            let range_extension_flag = reader.flag();
            let multilayer_extension_flag = reader.flag();
            // sps_3d_extension_flag, sps_scc_extension_flag, sps_extension_4bits
            reader.skip(6);
            if range_extension_flag {
                sps.range_extension = Some(SpsRangeExtension::parse(reader));
            }
            if multilayer_extension_flag {
                sps.inter_view_mv_vert_constraint_flag = Some(reader.flag());
            }
        }

        sps.validate_block_sizes()?;

        Ok(sps)
    }

    fn parse_rep_format(&mut self, reader: &mut BitReader, vps: &Vps) -> Result<(), ParameterSetError> {
        let extension = vps
            .extension
            .as_ref()
            .ok_or(ParameterSetError::IncorrectData("multi-layer SPS without a VPS extension".into()))?;

        let rep_format_idx = if reader.flag() {
            reader.u(8) as u8
        } else {
            extension
                .rep_format_idx
                .get(extension.layer_idx(self.layer_id))
                .copied()
                .unwrap_or(0)
        };
        ensure_range("sps_rep_format_idx", rep_format_idx, 0..=63)?;
        let format = extension
            .rep_formats
            .get(rep_format_idx as usize)
            .ok_or(ParameterSetError::OutOfRange {
                field: "sps_rep_format_idx",
                value: rep_format_idx as i64,
            })?;

        self.rep_format_idx = Some(rep_format_idx);
        self.chroma_format_idc = format.chroma_format_idc;
        self.separate_colour_plane_flag = format.separate_colour_plane_flag;
        self.pic_width_in_luma_samples = format.pic_width_in_luma_samples as u32;
        self.pic_height_in_luma_samples = format.pic_height_in_luma_samples as u32;
        self.conformance_window = format.conformance_window.unwrap_or_default();
        self.bit_depth_luma_minus8 = format.bit_depth_luma_minus8;
        self.bit_depth_chroma_minus8 = format.bit_depth_chroma_minus8;

        Ok(())
    }

    fn parse_picture_format(&mut self, reader: &mut BitReader) -> Result<(), ParameterSetError> {
        self.chroma_format_idc = ensure_range("chroma_format_idc", reader.ue(), 0..=3)? as u8;
        if self.chroma_format_idc == 3 {
            self.separate_colour_plane_flag = reader.flag();
        }

        self.pic_width_in_luma_samples =
            ensure_range("pic_width_in_luma_samples", reader.ue(), 0..=u16::MAX as i64)?;
        self.pic_height_in_luma_samples =
            ensure_range("pic_height_in_luma_samples", reader.ue(), 0..=u16::MAX as i64)?;

        if reader.flag() {
            let window = Window::parse(reader);
            let (sub_width, sub_height) = match self.chroma_array_type() {
                1 => (1, 1),
                2 => (1, 0),
                _ => (0, 0),
            };
            let crop_width = self.pic_width_in_luma_samples >> sub_width;
            let crop_height = self.pic_height_in_luma_samples >> sub_height;

            if (window.left_offset | window.right_offset) < 256
                && window.left_offset + window.right_offset < crop_width
            {
                self.conformance_window.left_offset = window.left_offset;
                self.conformance_window.right_offset = window.right_offset;
            }
            if (window.top_offset | window.bottom_offset) < 256
                && window.top_offset + window.bottom_offset < crop_height
            {
                self.conformance_window.top_offset = window.top_offset;
                self.conformance_window.bottom_offset = window.bottom_offset;
            }
        }

        self.bit_depth_luma_minus8 = reader.ue().min(u8::MAX as u32) as u8;
        self.bit_depth_chroma_minus8 = reader.ue().min(u8::MAX as u32) as u8;

        Ok(())
    }

    fn validate_block_sizes(&self) -> Result<(), ParameterSetError> {
        let min_cb_size = 1 << self.log2_min_cb_size();
        if self.pic_width_in_luma_samples == 0
            || self.pic_height_in_luma_samples == 0
            || self.pic_width_in_luma_samples % min_cb_size != 0
            || self.pic_height_in_luma_samples % min_cb_size != 0
        {
            return Err(ParameterSetError::IncorrectData(format!(
                "picture size {}x{} is not a multiple of the minimum coding block size {min_cb_size}",
                self.pic_width_in_luma_samples, self.pic_height_in_luma_samples
            )));
        }

        let log2_ctb_size = self.log2_ctb_size() as i64;
        ensure_range("CtbLog2SizeY", log2_ctb_size, 4..=6)?;

        let log2_min_tb_size = self.log2_min_luma_transform_block_size_minus2 as i64 + 2;
        ensure_range(
            "Log2MinTrafoSize",
            log2_min_tb_size,
            0..=self.log2_min_cb_size() as i64 - 1,
        )?;
        ensure_range(
            "Log2MaxTrafoSize",
            log2_min_tb_size + self.log2_diff_max_min_luma_transform_block_size as i64,
            0..=log2_ctb_size.min(5),
        )?;
        let max_depth = log2_ctb_size - log2_min_tb_size;
        ensure_range(
            "max_transform_hierarchy_depth_inter",
            self.max_transform_hierarchy_depth_inter,
            0..=max_depth,
        )?;
        ensure_range(
            "max_transform_hierarchy_depth_intra",
            self.max_transform_hierarchy_depth_intra,
            0..=max_depth,
        )?;

        Ok(())
    }

    pub fn chroma_array_type(&self) -> u8 {
        if self.separate_colour_plane_flag {
            0
        } else {
            self.chroma_format_idc
        }
    }

    pub fn log2_max_pic_order_cnt_lsb(&self) -> u32 {
        self.log2_max_pic_order_cnt_lsb_minus4 as u32 + 4
    }

    pub fn max_pic_order_cnt_lsb(&self) -> i32 {
        1 << self.log2_max_pic_order_cnt_lsb()
    }

    pub fn log2_min_cb_size(&self) -> u32 {
        self.log2_min_luma_coding_block_size_minus3 + 3
    }

    pub fn log2_ctb_size(&self) -> u32 {
        self.log2_min_cb_size() + self.log2_diff_max_min_luma_coding_block_size
    }

    pub fn pic_width_in_ctbs(&self) -> u32 {
        self.pic_width_in_luma_samples.div_ceil(1 << self.log2_ctb_size())
    }

    pub fn pic_height_in_ctbs(&self) -> u32 {
        self.pic_height_in_luma_samples.div_ceil(1 << self.log2_ctb_size())
    }

    pub fn pic_size_in_ctbs(&self) -> u32 {
        self.pic_width_in_ctbs() * self.pic_height_in_ctbs()
    }

    pub fn bit_depth_luma(&self) -> u32 {
        self.bit_depth_luma_minus8 as u32 + 8
    }

    pub fn bit_depth_chroma(&self) -> u32 {
        self.bit_depth_chroma_minus8 as u32 + 8
    }

    /// `None` when scaling lists are disabled. Lists inferred from a reference layer use the
    /// default tables.
    pub fn scaling_factors(&self) -> Option<ScalingFactors> {
        if !self.scaling_list_enabled_flag {
            return None;
        }
        Some(self.scaling_list.clone().unwrap_or_default().factors())
    }

    /// True when the two sets describe pictures that cannot share decoder surfaces.
    pub(crate) fn geometry_differs(&self, other: &Sps) -> bool {
        self.pic_width_in_luma_samples != other.pic_width_in_luma_samples
            || self.pic_height_in_luma_samples != other.pic_height_in_luma_samples
            || self.bit_depth_luma_minus8 != other.bit_depth_luma_minus8
            || self.bit_depth_chroma_minus8 != other.bit_depth_chroma_minus8
            || self.chroma_format_idc != other.chroma_format_idc
    }
}

/// DPB sizes of a multi-layer SPS come from the last output layer set of the VPS.
fn sub_layer_ordering_from_vps(vps: &Vps, layer_id: u8, max_sub_layers_minus1: u8) -> Vec<SubLayerOrdering> {
    let target = vps.num_layer_sets.saturating_sub(1) as usize;
    let layer_set = vps.layer_set(target);
    let layer_idx = layer_set
        .iter()
        .position(|&id| id == layer_id)
        .unwrap_or(layer_set.len());
    let ols = vps
        .extension
        .as_ref()
        .and_then(|extension| extension.output_layer_sets.get(target));

    let mut list = Vec::with_capacity(max_sub_layers_minus1 as usize + 1);
    let mut previous = SubLayerOrdering::default();
    for i in 0..=max_sub_layers_minus1 as usize {
        let ordering = match ols.and_then(|ols| ols.dpb_size.get(i)) {
            Some(dpb) if dpb.sub_layer_dpb_info_present_flag => SubLayerOrdering {
                max_dec_pic_buffering_minus1: dpb
                    .max_vps_dec_pic_buffering_minus1
                    .get(layer_idx)
                    .copied()
                    .unwrap_or(0),
                max_num_reorder_pics: dpb.max_vps_num_reorder_pics,
                max_latency_increase_plus1: dpb.max_vps_latency_increase_plus1,
            },
            _ => previous,
        };
        list.push(ordering);
        previous = ordering;
    }
    list
}
