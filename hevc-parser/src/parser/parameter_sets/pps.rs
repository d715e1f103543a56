use tracing::warn;

use crate::parser::bit_reader::BitReader;

use super::{MAX_PPS_COUNT, MAX_SPS_COUNT, ParameterSetError, ParameterSetStore, ensure_range, scaling_list::ScalingList};

const MAX_TILE_COLUMNS: u32 = 20;
const MAX_TILE_ROWS: u32 = 22;
const MAX_CHROMA_QP_OFFSET_LIST_LEN: u32 = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileLayout {
    pub num_tile_columns_minus1: u8,
    pub num_tile_rows_minus1: u8,
    pub uniform_spacing_flag: bool,
    /// Empty with uniform spacing.
    pub column_width_minus1: Vec<u16>,
    pub row_height_minus1: Vec<u16>,
    pub loop_filter_across_tiles_enabled_flag: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeblockingFilterControl {
    pub override_enabled_flag: bool,
    pub pps_deblocking_filter_disabled_flag: bool,
    pub beta_offset_div2: i8,
    pub tc_offset_div2: i8,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PpsRangeExtension {
    pub log2_max_transform_skip_block_size_minus2: u32,
    pub cross_component_prediction_enabled_flag: bool,
    pub chroma_qp_offset_list_enabled_flag: bool,
    pub diff_cu_chroma_qp_offset_depth: u32,
    /// `(cb_qp_offset_list, cr_qp_offset_list)` entries.
    pub chroma_qp_offset_list: Vec<(i8, i8)>,
    pub log2_sao_offset_scale_luma: u32,
    pub log2_sao_offset_scale_chroma: u32,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PpsMultilayerExtension {
    pub poc_reset_info_present_flag: bool,
    pub scaling_list_ref_layer_id: Option<u8>,
    pub num_ref_loc_offsets: u32,
}

/// `pic_parameter_set_rbsp()` (7.3.2.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pps {
    pub id: u8,
    pub sps_id: u8,
    /// VPS of the SPS stored when the PPS was parsed, 0 when the SPS was not yet known.
    pub vps_id: u8,
    pub dependent_slice_segments_enabled_flag: bool,
    pub output_flag_present_flag: bool,
    pub num_extra_slice_header_bits: u8,
    pub sign_data_hiding_enabled_flag: bool,
    pub cabac_init_present_flag: bool,
    pub num_ref_idx_l0_default_active_minus1: u8,
    pub num_ref_idx_l1_default_active_minus1: u8,
    pub init_qp_minus26: i8,
    pub constrained_intra_pred_flag: bool,
    pub transform_skip_enabled_flag: bool,
    pub diff_cu_qp_delta_depth: Option<u32>,
    pub cb_qp_offset: i8,
    pub cr_qp_offset: i8,
    pub slice_chroma_qp_offsets_present_flag: bool,
    pub weighted_pred_flag: bool,
    pub weighted_bipred_flag: bool,
    pub transquant_bypass_enabled_flag: bool,
    pub tiles: Option<TileLayout>,
    pub entropy_coding_sync_enabled_flag: bool,
    pub loop_filter_across_slices_enabled_flag: bool,
    pub deblocking_filter_control: Option<DeblockingFilterControl>,
    pub scaling_list: Option<ScalingList>,
    pub lists_modification_present_flag: bool,
    pub log2_parallel_merge_level_minus2: u8,
    pub slice_segment_header_extension_present_flag: bool,
    pub range_extension: Option<PpsRangeExtension>,
    pub multilayer_extension: Option<PpsMultilayerExtension>,
}

impl Pps {
    pub(crate) fn parse(reader: &mut BitReader, store: &ParameterSetStore) -> Result<Self, ParameterSetError> {
        let id = ensure_range("pps_pic_parameter_set_id", reader.ue(), 0..=MAX_PPS_COUNT as i64 - 1)? as u8;
        let sps_id = ensure_range("pps_seq_parameter_set_id", reader.ue(), 0..=MAX_SPS_COUNT as i64 - 1)? as u8;
        // a PPS may arrive before its SPS
        let sps = store.sps(sps_id);

        let dependent_slice_segments_enabled_flag = reader.flag();
        let output_flag_present_flag = reader.flag();
        let num_extra_slice_header_bits = reader.u(3) as u8;
        let sign_data_hiding_enabled_flag = reader.flag();
        let cabac_init_present_flag = reader.flag();
        let num_ref_idx_l0_default_active_minus1 =
            ensure_range("num_ref_idx_l0_default_active_minus1", reader.ue(), 0..=15)? as u8;
        let num_ref_idx_l1_default_active_minus1 =
            ensure_range("num_ref_idx_l1_default_active_minus1", reader.ue(), 0..=15)? as u8;

        let qp_bd_offset_y = sps.map_or(0, |sps| 6 * sps.bit_depth_luma_minus8 as i64);
        let init_qp_minus26 = ensure_range("init_qp_minus26", reader.se(), -(26 + qp_bd_offset_y)..=25)? as i8;

        let constrained_intra_pred_flag = reader.flag();
        let transform_skip_enabled_flag = reader.flag();
        let diff_cu_qp_delta_depth = reader.flag().then(|| reader.ue());
        let cb_qp_offset = ensure_range("pps_cb_qp_offset", reader.se(), -12..=12)? as i8;
        let cr_qp_offset = ensure_range("pps_cr_qp_offset", reader.se(), -12..=12)? as i8;

        let slice_chroma_qp_offsets_present_flag = reader.flag();
        let weighted_pred_flag = reader.flag();
        let weighted_bipred_flag = reader.flag();
        let transquant_bypass_enabled_flag = reader.flag();
        let tiles_enabled_flag = reader.flag();
        let entropy_coding_sync_enabled_flag = reader.flag();

        let tiles = if tiles_enabled_flag {
            Some(Self::parse_tiles(reader)?)
        } else {
            None
        };

        let loop_filter_across_slices_enabled_flag = reader.flag();
        let deblocking_filter_control = if reader.flag() {
            let override_enabled_flag = reader.flag();
            let pps_deblocking_filter_disabled_flag = reader.flag();
            let (mut beta_offset_div2, mut tc_offset_div2) = (0, 0);
            if !pps_deblocking_filter_disabled_flag {
                beta_offset_div2 = ensure_range("pps_beta_offset_div2", reader.se(), -6..=6)? as i8;
                tc_offset_div2 = ensure_range("pps_tc_offset_div2", reader.se(), -6..=6)? as i8;
            }
            Some(DeblockingFilterControl {
                override_enabled_flag,
                pps_deblocking_filter_disabled_flag,
                beta_offset_div2,
                tc_offset_div2,
            })
        } else {
            None
        };

        let scaling_list = if reader.flag() {
            Some(ScalingList::parse(reader)?)
        } else {
            None
        };

        let lists_modification_present_flag = reader.flag();
        let log2_parallel_merge_level_minus2 =
            ensure_range("log2_parallel_merge_level_minus2", reader.ue(), 0..=12)? as u8;
        let slice_segment_header_extension_present_flag = reader.flag();

        let mut range_extension = None;
        let mut multilayer_extension = None;
        if reader.flag() {
            let range_extension_flag = reader.flag();
            let multilayer_extension_flag = reader.flag();
            // pps_3d_extension_flag, pps_scc_extension_flag, pps_extension_4bits
            reader.skip(6);

            if range_extension_flag {
                range_extension = Some(PpsRangeExtension::parse(reader, transform_skip_enabled_flag));
            }
            if multilayer_extension_flag {
                multilayer_extension = Some(PpsMultilayerExtension {
                    poc_reset_info_present_flag: reader.flag(),
                    scaling_list_ref_layer_id: reader.flag().then(|| reader.u(6) as u8),
                    num_ref_loc_offsets: reader.ue(),
                });
            }
        }

        Ok(Self {
            id,
            sps_id,
            vps_id: sps.map_or(0, |sps| sps.vps_id),
            dependent_slice_segments_enabled_flag,
            output_flag_present_flag,
            num_extra_slice_header_bits,
            sign_data_hiding_enabled_flag,
            cabac_init_present_flag,
            num_ref_idx_l0_default_active_minus1,
            num_ref_idx_l1_default_active_minus1,
            init_qp_minus26,
            constrained_intra_pred_flag,
            transform_skip_enabled_flag,
            diff_cu_qp_delta_depth,
            cb_qp_offset,
            cr_qp_offset,
            slice_chroma_qp_offsets_present_flag,
            weighted_pred_flag,
            weighted_bipred_flag,
            transquant_bypass_enabled_flag,
            tiles,
            entropy_coding_sync_enabled_flag,
            loop_filter_across_slices_enabled_flag,
            deblocking_filter_control,
            scaling_list,
            lists_modification_present_flag,
            log2_parallel_merge_level_minus2,
            slice_segment_header_extension_present_flag,
            range_extension,
            multilayer_extension,
        })
    }

    fn parse_tiles(reader: &mut BitReader) -> Result<TileLayout, ParameterSetError> {
        let num_tile_columns_minus1 =
            ensure_range("num_tile_columns_minus1", reader.ue(), 0..=MAX_TILE_COLUMNS as i64 - 1)? as u8;
        let num_tile_rows_minus1 = ensure_range("num_tile_rows_minus1", reader.ue(), 0..=MAX_TILE_ROWS as i64 - 1)? as u8;
        let uniform_spacing_flag = reader.flag();

        let mut column_width_minus1 = Vec::new();
        let mut row_height_minus1 = Vec::new();
        if !uniform_spacing_flag {
            column_width_minus1 = (0..num_tile_columns_minus1).map(|_| reader.ue() as u16).collect();
            row_height_minus1 = (0..num_tile_rows_minus1).map(|_| reader.ue() as u16).collect();
        }

        Ok(TileLayout {
            num_tile_columns_minus1,
            num_tile_rows_minus1,
            uniform_spacing_flag,
            column_width_minus1,
            row_height_minus1,
            loop_filter_across_tiles_enabled_flag: reader.flag(),
        })
    }

    pub fn tiles_enabled_flag(&self) -> bool {
        self.tiles.is_some()
    }

    pub fn deblocking_filter_override_enabled_flag(&self) -> bool {
        self.deblocking_filter_control
            .is_some_and(|control| control.override_enabled_flag)
    }

    pub fn poc_reset_info_present_flag(&self) -> bool {
        self.multilayer_extension
            .is_some_and(|extension| extension.poc_reset_info_present_flag)
    }
}

impl PpsRangeExtension {
    fn parse(reader: &mut BitReader, transform_skip_enabled_flag: bool) -> Self {
        let mut extension = Self::default();
        if transform_skip_enabled_flag {
            extension.log2_max_transform_skip_block_size_minus2 = reader.ue();
        }
        extension.cross_component_prediction_enabled_flag = reader.flag();
        extension.chroma_qp_offset_list_enabled_flag = reader.flag();

        if extension.chroma_qp_offset_list_enabled_flag {
            let diff_cu_chroma_qp_offset_depth = reader.ue();
            let len_minus1 = reader.ue();
            if len_minus1 < MAX_CHROMA_QP_OFFSET_LIST_LEN {
                extension.diff_cu_chroma_qp_offset_depth = diff_cu_chroma_qp_offset_depth;
                extension.chroma_qp_offset_list = (0..=len_minus1)
                    .map(|_| (reader.se() as i8, reader.se() as i8))
                    .collect();
            } else {
                warn!(len_minus1, "Invalid chroma_qp_offset_list_len_minus1, disabling the chroma QP offset list");
                extension.chroma_qp_offset_list_enabled_flag = false;
            }
        }

        extension.log2_sao_offset_scale_luma = reader.ue();
        extension.log2_sao_offset_scale_chroma = reader.ue();
        extension
    }
}
