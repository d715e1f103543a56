use crate::parser::bit_reader::BitReader;

use super::{
    MAX_LAYER_COUNT, ParameterSetError, ceil_log2, ensure_range,
    profile_tier_level::ProfileTierLevel,
    sps::SubLayerOrdering,
    vui::{HrdParameters, TimingInfo},
};

const MAX_SCALABILITY_TYPES: usize = 16;
/// `ScalabilityId` index of the view order.
const VIEW_ORDER_SCALABILITY_INDEX: usize = 1;
const MAX_LAYER_SETS: u32 = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VpsHrd {
    pub hrd_layer_set_idx: u32,
    pub cprms_present_flag: bool,
    pub parameters: HrdParameters,
}

/// `video_parameter_set_rbsp()` (7.3.2.1) with the multi-layer extension (F.7.3.2.1.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vps {
    pub id: u8,
    pub base_layer_internal_flag: bool,
    pub base_layer_available_flag: bool,
    pub max_layers_minus1: u8,
    pub max_sub_layers_minus1: u8,
    pub temporal_id_nesting_flag: bool,
    pub profile_tier_level: ProfileTierLevel,
    pub sub_layer_ordering_info_present_flag: bool,
    /// One entry per sub-layer. Entries below the signalled one copy it.
    pub sub_layer_ordering: Vec<SubLayerOrdering>,
    pub max_layer_id: u8,
    /// `LayerSetLayerIdList`, one list per layer set. Additional layer sets from the extension
    /// are appended after the `vps_num_layer_sets` signalled ones.
    pub layer_sets: Vec<Vec<u8>>,
    pub num_layer_sets: u32,
    pub timing_info: Option<TimingInfo>,
    pub hrd_parameters: Vec<VpsHrd>,
    pub extension: Option<VpsExtension>,
}

impl Vps {
    pub(crate) fn parse(reader: &mut BitReader) -> Result<Self, ParameterSetError> {
        let id = reader.u(4) as u8;
        let base_layer_internal_flag = reader.flag();
        let base_layer_available_flag = reader.flag();
        let max_layers_minus1 = (reader.u(6) as u8).min(MAX_LAYER_COUNT as u8 - 2);
        let max_sub_layers_minus1 = ensure_range("vps_max_sub_layers_minus1", reader.u(3) as u8, 0..=6)?;
        let temporal_id_nesting_flag = reader.flag();

        let reserved = reader.u(16);
        if reserved != 0xffff {
            return Err(ParameterSetError::IncorrectData(format!(
                "vps_reserved_0xffff_16bits is {reserved:#x}"
            )));
        }

        let profile_tier_level = ProfileTierLevel::parse(reader, true, max_sub_layers_minus1);

        let sub_layer_ordering_info_present_flag = reader.flag();
        let sub_layer_ordering = SubLayerOrdering::parse_list(
            reader,
            sub_layer_ordering_info_present_flag,
            max_sub_layers_minus1,
        );
        for ordering in &sub_layer_ordering {
            ensure_range(
                "vps_max_dec_pic_buffering_minus1",
                ordering.max_dec_pic_buffering_minus1,
                0..=15,
            )?;
            ensure_range(
                "vps_max_num_reorder_pics",
                ordering.max_num_reorder_pics,
                0..=ordering.max_dec_pic_buffering_minus1 as i64,
            )?;
        }

        let max_layer_id = reader.u(6) as u8;
        let num_layer_sets =
            ensure_range("vps_num_layer_sets_minus1", reader.ue(), 0..=MAX_LAYER_SETS as i64 - 1)? + 1;

        let mut layer_sets = Vec::with_capacity(num_layer_sets as usize);
        layer_sets.push(vec![0]);
        for _ in 1..num_layer_sets {
            let layer_ids = (0..=max_layer_id)
                .filter(|_| reader.flag())
                .collect::<Vec<_>>();
            layer_sets.push(layer_ids);
        }

        let mut timing_info = None;
        let mut hrd_parameters = Vec::new();
        if reader.flag() {
            timing_info = Some(TimingInfo::parse(reader));

            let num_hrd_parameters =
                ensure_range("vps_num_hrd_parameters", reader.ue(), 0..=num_layer_sets as i64)?;
            for i in 0..num_hrd_parameters {
                let min_layer_set = if base_layer_internal_flag { 0 } else { 1 };
                let hrd_layer_set_idx = ensure_range(
                    "hrd_layer_set_idx",
                    reader.ue(),
                    min_layer_set..=num_layer_sets as i64 - 1,
                )?;
                let cprms_present_flag = i == 0 || reader.flag();
                hrd_parameters.push(VpsHrd {
                    hrd_layer_set_idx,
                    cprms_present_flag,
                    parameters: HrdParameters::parse(reader, cprms_present_flag, max_sub_layers_minus1),
                });
            }
        }

        let mut vps = Self {
            id,
            base_layer_internal_flag,
            base_layer_available_flag,
            max_layers_minus1,
            max_sub_layers_minus1,
            temporal_id_nesting_flag,
            profile_tier_level,
            sub_layer_ordering_info_present_flag,
            sub_layer_ordering,
            max_layer_id,
            layer_sets,
            num_layer_sets,
            timing_info,
            hrd_parameters,
            extension: None,
        };

        // single layer streams follow the version 1 syntax, where the extension is ignored
        if max_layers_minus1 > 0 && reader.flag() {
            while !reader.is_byte_aligned() {
                reader.skip(1);
            }
            let extension = VpsExtension::parse(reader, &mut vps)?;
            vps.extension = Some(extension);
        }

        Ok(vps)
    }

    /// `vps_max_dec_pic_buffering_minus1 + 1` of the highest sub-layer.
    pub fn max_dec_pic_buffering(&self) -> u32 {
        self.sub_layer_ordering
            .last()
            .map_or(1, |ordering| ordering.max_dec_pic_buffering_minus1 + 1)
    }

    pub fn layer_set(&self, idx: usize) -> &[u8] {
        self.layer_sets.get(idx).map_or(&[], Vec::as_slice)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RepFormat {
    pub pic_width_in_luma_samples: u16,
    pub pic_height_in_luma_samples: u16,
    pub chroma_format_idc: u8,
    pub separate_colour_plane_flag: bool,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    pub conformance_window: Option<super::vui::Window>,
}

/// Per sub-layer `dpb_size()` values of an output layer set.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OlsDpbSize {
    pub sub_layer_dpb_info_present_flag: bool,
    /// Indexed by the position of the layer within the layer set.
    pub max_vps_dec_pic_buffering_minus1: Vec<u32>,
    pub max_vps_num_reorder_pics: u32,
    pub max_vps_latency_increase_plus1: u32,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OutputLayerSet {
    pub layer_set_idx: usize,
    /// Indexed by the position of the layer within the layer set, like the fields below.
    pub output_layer_flag: Vec<bool>,
    pub necessary_layer_flag: Vec<bool>,
    pub profile_tier_level_idx: Vec<u32>,
    pub num_output_layers: u32,
    pub highest_output_layer_id: u8,
    pub alt_output_layer_flag: bool,
    pub sub_layer_flag_info_present_flag: bool,
    pub dpb_size: Vec<OlsDpbSize>,
}

impl OutputLayerSet {
    pub fn num_necessary_layers(&self) -> usize {
        self.necessary_layer_flag.iter().filter(|&&flag| flag).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VpsExtension {
    pub splitting_flag: bool,
    pub scalability_mask_flag: [bool; MAX_SCALABILITY_TYPES],
    pub dimension_id_len: Vec<u8>,
    pub nuh_layer_id_present_flag: bool,
    /// Indexed by layer index.
    pub layer_id_in_nuh: Vec<u8>,
    /// `LayerIdxInVps`, indexed by `nuh_layer_id`.
    pub layer_idx_in_vps: Vec<u8>,
    /// `dimension_id[i][j]`, indexed by layer index.
    pub dimension_id: Vec<Vec<u8>>,
    /// `ViewOrderIdx`, indexed by `nuh_layer_id`.
    pub view_order_idx: Vec<u32>,
    pub num_views: u32,
    pub view_id_len: u8,
    pub view_id_val: Vec<u32>,
    /// `direct_dependency_flag[i][j]`, indexed by layer index.
    pub direct_dependency_flag: Vec<Vec<bool>>,
    /// `DependencyFlag`, the transitive closure of the direct dependencies.
    pub dependency_flag: Vec<Vec<bool>>,
    /// `IdDirectRefLayer`, indexed by `nuh_layer_id`.
    pub id_direct_ref_layer: Vec<Vec<u8>>,
    /// `IdRefLayer`, indexed by `nuh_layer_id`.
    pub id_ref_layer: Vec<Vec<u8>>,
    /// `IdPredictedLayer`, indexed by `nuh_layer_id`.
    pub id_predicted_layer: Vec<Vec<u8>>,
    /// `TreePartitionLayerIdList`, one list per independent layer.
    pub tree_partition_layer_id_list: Vec<Vec<u8>>,
    pub num_add_layer_sets: u32,
    pub highest_layer_idx_plus1: Vec<Vec<u32>>,
    /// Indexed by layer index.
    pub sub_layers_vps_max_minus1: Vec<u8>,
    pub max_tid_ref_present_flag: bool,
    pub max_tid_il_ref_pics_plus1: Vec<Vec<u8>>,
    pub default_ref_layers_active_flag: bool,
    pub profile_tier_levels: Vec<ProfileTierLevel>,
    pub num_add_olss: u32,
    pub default_output_layer_idc: u8,
    pub output_layer_sets: Vec<OutputLayerSet>,
    pub rep_formats: Vec<RepFormat>,
    pub rep_format_idx_present_flag: bool,
    /// `vps_rep_format_idx`, indexed by layer index.
    pub rep_format_idx: Vec<u8>,
    pub max_one_active_ref_layer_flag: bool,
    pub poc_lsb_aligned_flag: bool,
    /// Indexed by layer index.
    pub poc_lsb_not_present_flag: Vec<bool>,
}

impl VpsExtension {
    fn parse(reader: &mut BitReader, vps: &mut Vps) -> Result<Self, ParameterSetError> {
        let layer_count = vps.max_layers_minus1 as usize + 1;

        let mut profile_tier_levels = vec![vps.profile_tier_level.clone()];
        if vps.base_layer_internal_flag {
            profile_tier_levels.push(ProfileTierLevel::parse(reader, false, vps.max_sub_layers_minus1));
        }

        let splitting_flag = reader.flag();
        let scalability_mask_flag: [bool; MAX_SCALABILITY_TYPES] = std::array::from_fn(|_| reader.flag());
        let num_scalability_types = scalability_mask_flag.iter().filter(|&&flag| flag).count();

        let mut dimension_id_len = vec![0u8; num_scalability_types];
        let explicit_lengths = num_scalability_types.saturating_sub(splitting_flag as usize);
        for len in dimension_id_len.iter_mut().take(explicit_lengths) {
            *len = reader.u(3) as u8 + 1;
        }

        let dim_bit_offset = |lengths: &[u8], j: usize| -> u32 {
            if splitting_flag && j == num_scalability_types {
                6
            } else {
                lengths[..j].iter().map(|&len| len as u32).sum()
            }
        };
        if splitting_flag && num_scalability_types > 0 {
            // The dimensions are bit fields of the 6 bit nuh_layer_id.
            let offset = dim_bit_offset(&dimension_id_len, num_scalability_types - 1);
            if offset >= 6 {
                return Err(ParameterSetError::IncorrectData(format!(
                    "dimension_id_len values add up to {offset} bits with splitting_flag set"
                )));
            }
            dimension_id_len[num_scalability_types - 1] = (6 - offset) as u8;
        }

        let nuh_layer_id_present_flag = reader.flag();
        let mut layer_id_in_nuh = vec![0u8; layer_count];
        let mut dimension_id = vec![vec![0u8; num_scalability_types]; layer_count];
        for i in 1..layer_count {
            layer_id_in_nuh[i] = if nuh_layer_id_present_flag {
                reader.u(6) as u8
            } else {
                i as u8
            };

            for j in 0..num_scalability_types {
                dimension_id[i][j] = if splitting_flag {
                    let low = dim_bit_offset(&dimension_id_len, j);
                    let high = dim_bit_offset(&dimension_id_len, j + 1);
                    ((layer_id_in_nuh[i] as u32 & ((1 << high) - 1)) >> low) as u8
                } else {
                    reader.u(dimension_id_len[j] as u32) as u8
                };
            }
        }

        let mut layer_idx_in_vps = vec![0u8; MAX_LAYER_COUNT];
        for (i, &nuh_layer_id) in layer_id_in_nuh.iter().enumerate().skip(1) {
            layer_idx_in_vps[nuh_layer_id as usize] = i as u8;
        }

        let (view_order_idx, num_views) =
            view_order(&scalability_mask_flag, &layer_id_in_nuh, &dimension_id);

        let view_id_len = reader.u(4) as u8;
        let view_id_val = if view_id_len > 0 {
            (0..num_views).map(|_| reader.u(view_id_len as u32)).collect()
        } else {
            Vec::new()
        };

        let mut direct_dependency_flag = vec![vec![false; layer_count]; layer_count];
        for (i, row) in direct_dependency_flag.iter_mut().enumerate().skip(1) {
            for flag in row.iter_mut().take(i) {
                *flag = reader.flag();
            }
        }

        let mut extension = Self {
            splitting_flag,
            scalability_mask_flag,
            dimension_id_len,
            nuh_layer_id_present_flag,
            layer_id_in_nuh,
            layer_idx_in_vps,
            dimension_id,
            view_order_idx,
            num_views,
            view_id_len,
            view_id_val,
            direct_dependency_flag,
            dependency_flag: Vec::new(),
            id_direct_ref_layer: vec![Vec::new(); MAX_LAYER_COUNT],
            id_ref_layer: vec![Vec::new(); MAX_LAYER_COUNT],
            id_predicted_layer: vec![Vec::new(); MAX_LAYER_COUNT],
            tree_partition_layer_id_list: Vec::new(),
            num_add_layer_sets: 0,
            highest_layer_idx_plus1: Vec::new(),
            sub_layers_vps_max_minus1: Vec::new(),
            max_tid_ref_present_flag: false,
            max_tid_il_ref_pics_plus1: vec![vec![7; layer_count]; layer_count],
            default_ref_layers_active_flag: false,
            profile_tier_levels,
            num_add_olss: 0,
            default_output_layer_idc: 0,
            output_layer_sets: Vec::new(),
            rep_formats: Vec::new(),
            rep_format_idx_present_flag: false,
            rep_format_idx: Vec::new(),
            max_one_active_ref_layer_flag: false,
            poc_lsb_aligned_flag: false,
            poc_lsb_not_present_flag: vec![false; layer_count],
        };
        extension.derive_ref_layers();

        if extension.tree_partition_layer_id_list.len() > 1 {
            extension.num_add_layer_sets =
                ensure_range("num_add_layer_sets", reader.ue(), 0..=MAX_LAYER_SETS as i64 - 1)?;
        }
        for _ in 0..extension.num_add_layer_sets {
            let mut highest = vec![0; extension.tree_partition_layer_id_list.len()];
            let mut layer_ids = Vec::new();
            for (tree_idx, tree) in extension.tree_partition_layer_id_list.iter().enumerate().skip(1) {
                highest[tree_idx] = reader.u(ceil_log2(tree.len() as u32 + 1));
                layer_ids.extend(tree.iter().take(highest[tree_idx] as usize));
            }
            extension.highest_layer_idx_plus1.push(highest);
            vps.layer_sets.push(layer_ids);
        }

        let sub_layers_vps_max_minus1_present_flag = reader.flag();
        extension.sub_layers_vps_max_minus1 = (0..layer_count)
            .map(|_| {
                if sub_layers_vps_max_minus1_present_flag {
                    reader.u(3) as u8
                } else {
                    vps.max_sub_layers_minus1
                }
            })
            .collect();

        extension.max_tid_ref_present_flag = reader.flag();
        if extension.max_tid_ref_present_flag {
            for i in 0..layer_count {
                for j in i + 1..layer_count {
                    if extension.direct_dependency_flag[j][i] {
                        extension.max_tid_il_ref_pics_plus1[i][j] = reader.u(3) as u8;
                    }
                }
            }
        }

        extension.default_ref_layers_active_flag = reader.flag();

        let num_profile_tier_level_minus1 = ensure_range(
            "vps_num_profile_tier_level_minus1",
            reader.ue(),
            1..=63,
        )?;
        let first_signalled = if vps.base_layer_internal_flag { 2 } else { 1 };
        for _ in first_signalled..=num_profile_tier_level_minus1 {
            let profile_present = reader.flag();
            let ptl = ProfileTierLevel::parse(reader, profile_present, vps.max_sub_layers_minus1);
            extension.profile_tier_levels.push(ptl);
        }

        extension.parse_output_layer_sets(reader, vps, num_profile_tier_level_minus1)?;

        let num_rep_formats_minus1 = ensure_range("vps_num_rep_formats_minus1", reader.ue(), 0..=15)?;
        extension.rep_formats = (0..=num_rep_formats_minus1)
            .map(|_| parse_rep_format(reader))
            .collect();

        extension.rep_format_idx = vec![0; layer_count];
        if num_rep_formats_minus1 > 0 {
            extension.rep_format_idx_present_flag = reader.flag();
        }
        let first_layer = if vps.base_layer_internal_flag { 1 } else { 0 };
        for i in first_layer..layer_count {
            extension.rep_format_idx[i] = if extension.rep_format_idx_present_flag {
                reader.u(ceil_log2(num_rep_formats_minus1 + 1)) as u8
            } else {
                i.min(num_rep_formats_minus1 as usize) as u8
            };
        }

        extension.max_one_active_ref_layer_flag = reader.flag();
        extension.poc_lsb_aligned_flag = reader.flag();
        for i in 1..layer_count {
            let nuh_layer_id = extension.layer_id_in_nuh[i] as usize;
            if extension.id_direct_ref_layer[nuh_layer_id].is_empty() {
                extension.poc_lsb_not_present_flag[i] = reader.flag();
            }
        }

        extension.parse_dpb_size(reader, vps);

        Ok(extension)
    }

    /// Derives the transitive dependencies, the reference and predicted layer lists and the tree
    /// partitions of the independent layers (F.7.4.3.1.1).
    fn derive_ref_layers(&mut self) {
        let layer_count = self.layer_id_in_nuh.len();

        let mut dependency_flag = self.direct_dependency_flag.clone();
        for i in 0..layer_count {
            for j in 0..layer_count {
                for k in 0..i {
                    if self.direct_dependency_flag[i][k] && dependency_flag[k][j] {
                        dependency_flag[i][j] = true;
                    }
                }
            }
        }

        for i in 0..layer_count {
            let i_nuh = self.layer_id_in_nuh[i] as usize;
            for j in 0..layer_count {
                let j_nuh = self.layer_id_in_nuh[j];
                if self.direct_dependency_flag[i][j] {
                    self.id_direct_ref_layer[i_nuh].push(j_nuh);
                }
                if dependency_flag[i][j] {
                    self.id_ref_layer[i_nuh].push(j_nuh);
                }
                if dependency_flag[j][i] {
                    self.id_predicted_layer[i_nuh].push(j_nuh);
                }
            }
        }
        self.dependency_flag = dependency_flag;

        let mut in_list = [false; MAX_LAYER_COUNT];
        for &nuh_layer_id in &self.layer_id_in_nuh {
            if !self.id_direct_ref_layer[nuh_layer_id as usize].is_empty() {
                continue;
            }
            let mut tree = vec![nuh_layer_id];
            for &predicted in &self.id_predicted_layer[nuh_layer_id as usize] {
                if !in_list[predicted as usize] {
                    tree.push(predicted);
                    in_list[predicted as usize] = true;
                }
            }
            self.tree_partition_layer_id_list.push(tree);
        }
    }

    fn ols_to_layer_set(&self, vps: &Vps, ols_idx: usize, layer_set_idx_for_ols_minus1: &[u32]) -> usize {
        let num_layer_sets = (vps.num_layer_sets + self.num_add_layer_sets) as usize;
        if ols_idx < num_layer_sets {
            ols_idx
        } else {
            layer_set_idx_for_ols_minus1[ols_idx] as usize + 1
        }
    }

    fn parse_output_layer_sets(
        &mut self,
        reader: &mut BitReader,
        vps: &Vps,
        num_profile_tier_level_minus1: u32,
    ) -> Result<(), ParameterSetError> {
        let num_layer_sets = vps.num_layer_sets + self.num_add_layer_sets;
        let mut num_output_layer_sets = num_layer_sets;
        if num_layer_sets > 1 {
            self.num_add_olss = reader.ue();
            if self.num_add_olss >= MAX_LAYER_SETS {
                self.num_add_olss = 0;
            }
            num_output_layer_sets += self.num_add_olss;
            self.default_output_layer_idc = reader.u(2) as u8;
        }

        let mut layer_set_idx_for_ols_minus1 = vec![0u32; num_output_layer_sets as usize];
        self.output_layer_sets = vec![OutputLayerSet {
            layer_set_idx: 0,
            output_layer_flag: vec![true],
            necessary_layer_flag: vec![true],
            num_output_layers: 1,
            ..Default::default()
        }];

        for i in 1..num_output_layer_sets as usize {
            if num_layer_sets > 2 && i >= num_layer_sets as usize {
                layer_set_idx_for_ols_minus1[i] = reader.u(ceil_log2(num_layer_sets));
            }
            let layer_set_idx = self.ols_to_layer_set(vps, i, &layer_set_idx_for_ols_minus1);
            if layer_set_idx >= vps.layer_sets.len() {
                return Err(ParameterSetError::IncorrectData(format!(
                    "output layer set {i} refers to missing layer set {layer_set_idx}"
                )));
            }
            let layer_set = vps.layer_set(layer_set_idx);

            let output_layer_flag = if i >= vps.num_layer_sets as usize || self.default_output_layer_idc == 2 {
                layer_set.iter().map(|_| reader.flag()).collect::<Vec<_>>()
            } else {
                (0..layer_set.len())
                    .map(|j| match self.default_output_layer_idc {
                        0 => true,
                        1 => j + 1 == layer_set.len(),
                        _ => false,
                    })
                    .collect()
            };

            let necessary_layer_flag = self.necessary_layers(layer_set, &output_layer_flag);

            let profile_tier_level_idx = necessary_layer_flag
                .iter()
                .map(|&necessary| {
                    if necessary && num_profile_tier_level_minus1 > 0 {
                        reader.u(ceil_log2(num_profile_tier_level_minus1 + 1))
                    } else {
                        0
                    }
                })
                .collect();

            let num_output_layers = output_layer_flag.iter().filter(|&&flag| flag).count() as u32;
            let highest_output_layer_id = layer_set
                .iter()
                .zip(&output_layer_flag)
                .filter(|(_, output)| **output)
                .map(|(&layer_id, _)| layer_id)
                .last()
                .unwrap_or(0);

            let alt_output_layer_flag = num_output_layers == 1
                && !self.id_direct_ref_layer[highest_output_layer_id as usize].is_empty()
                && reader.flag();

            self.output_layer_sets.push(OutputLayerSet {
                layer_set_idx,
                output_layer_flag,
                necessary_layer_flag,
                profile_tier_level_idx,
                num_output_layers,
                highest_output_layer_id,
                alt_output_layer_flag,
                ..Default::default()
            });
        }

        Ok(())
    }

    fn necessary_layers(&self, layer_set: &[u8], output_layer_flag: &[bool]) -> Vec<bool> {
        let mut necessary = vec![false; layer_set.len()];
        for (idx, &output) in output_layer_flag.iter().enumerate() {
            if !output {
                continue;
            }
            necessary[idx] = true;
            let current = self.layer_idx_in_vps[layer_set[idx] as usize] as usize;
            for (ref_idx, &ref_layer_id) in layer_set.iter().enumerate().take(idx) {
                let reference = self.layer_idx_in_vps[ref_layer_id as usize] as usize;
                if self
                    .dependency_flag
                    .get(current)
                    .and_then(|row| row.get(reference))
                    .copied()
                    .unwrap_or(false)
                {
                    necessary[ref_idx] = true;
                }
            }
        }
        necessary
    }

    fn parse_dpb_size(&mut self, reader: &mut BitReader, vps: &Vps) {
        for ols in self.output_layer_sets.iter_mut().skip(1) {
            let layer_set = vps.layer_set(ols.layer_set_idx);
            // MaxSubLayersInLayerSetMinus1
            let max_sub_layer = layer_set
                .iter()
                .filter_map(|&layer_id| {
                    let idx = self.layer_idx_in_vps.get(layer_id as usize).copied()? as usize;
                    self.sub_layers_vps_max_minus1.get(idx).copied()
                })
                .max()
                .unwrap_or(vps.max_sub_layers_minus1);

            ols.sub_layer_flag_info_present_flag = reader.flag();
            for j in 0..=max_sub_layer as usize {
                let present = j == 0 || (ols.sub_layer_flag_info_present_flag && reader.flag());
                let mut dpb = OlsDpbSize {
                    sub_layer_dpb_info_present_flag: present,
                    max_vps_dec_pic_buffering_minus1: vec![0; layer_set.len()],
                    ..Default::default()
                };
                if present {
                    for (k, &layer_id) in layer_set.iter().enumerate() {
                        if ols.necessary_layer_flag[k] && (vps.base_layer_internal_flag || layer_id != 0) {
                            dpb.max_vps_dec_pic_buffering_minus1[k] = reader.ue();
                        }
                    }
                    dpb.max_vps_num_reorder_pics = reader.ue();
                    dpb.max_vps_latency_increase_plus1 = reader.ue();
                }
                ols.dpb_size.push(dpb);
            }
        }
    }

    /// Index of a layer in `vps_rep_format_idx` order.
    pub fn layer_idx(&self, nuh_layer_id: u8) -> usize {
        self.layer_idx_in_vps
            .get(nuh_layer_id as usize)
            .copied()
            .unwrap_or(0) as usize
    }

    pub fn view_order_idx(&self, nuh_layer_id: u8) -> u32 {
        self.view_order_idx
            .get(nuh_layer_id as usize)
            .copied()
            .unwrap_or(0)
    }

    pub fn direct_ref_layers(&self, nuh_layer_id: u8) -> &[u8] {
        self.id_direct_ref_layer
            .get(nuh_layer_id as usize)
            .map_or(&[], Vec::as_slice)
    }
}

fn view_order(
    scalability_mask_flag: &[bool; MAX_SCALABILITY_TYPES],
    layer_id_in_nuh: &[u8],
    dimension_id: &[Vec<u8>],
) -> (Vec<u32>, u32) {
    let mut view_order_idx = vec![0u32; MAX_LAYER_COUNT];
    let mut num_views = 1;

    for (i, &nuh_layer_id) in layer_id_in_nuh.iter().enumerate() {
        let mut dimensions = dimension_id[i].iter();
        let scalability_id: [u32; MAX_SCALABILITY_TYPES] = std::array::from_fn(|sm_idx| {
            if scalability_mask_flag[sm_idx] {
                dimensions.next().copied().unwrap_or(0) as u32
            } else {
                0
            }
        });
        let view = scalability_id[VIEW_ORDER_SCALABILITY_INDEX];
        view_order_idx[nuh_layer_id as usize] = view;

        if i > 0
            && layer_id_in_nuh[..i]
                .iter()
                .all(|&other| view_order_idx[other as usize] != view)
        {
            num_views += 1;
        }
    }

    (view_order_idx, num_views)
}

fn parse_rep_format(reader: &mut BitReader) -> RepFormat {
    let mut format = RepFormat {
        pic_width_in_luma_samples: reader.u(16) as u16,
        pic_height_in_luma_samples: reader.u(16) as u16,
        ..Default::default()
    };

    if reader.flag() {
        format.chroma_format_idc = reader.u(2) as u8;
        if format.chroma_format_idc == 3 {
            format.separate_colour_plane_flag = reader.flag();
        }
        format.bit_depth_luma_minus8 = reader.u(4) as u8;
        format.bit_depth_chroma_minus8 = reader.u(4) as u8;
        if reader.flag() {
            format.conformance_window = Some(super::vui::Window::parse(reader));
        }
    }

    format
}
