//! Bitstream builders used by the unit tests.

#[derive(Debug, Default)]
pub(crate) struct BitWriter {
    bytes: Vec<u8>,
    current: u8,
    used: u32,
}

impl BitWriter {
    pub(crate) fn u(&mut self, n: u32, value: u64) -> &mut Self {
        for i in (0..n).rev() {
            self.bit(i < 64 && (value >> i) & 1 == 1);
        }
        self
    }

    pub(crate) fn flag(&mut self, value: bool) -> &mut Self {
        self.bit(value);
        self
    }

    pub(crate) fn ue(&mut self, value: u64) -> &mut Self {
        let code = value + 1;
        let len = 64 - code.leading_zeros();
        self.u(len - 1, 0);
        self.u(len, code)
    }

    pub(crate) fn se(&mut self, value: i64) -> &mut Self {
        let code = if value > 0 {
            2 * value as u64 - 1
        } else {
            2 * value.unsigned_abs()
        };
        self.ue(code)
    }

    fn bit(&mut self, value: bool) {
        self.current = (self.current << 1) | value as u8;
        self.used += 1;
        if self.used == 8 {
            self.bytes.push(self.current);
            self.current = 0;
            self.used = 0;
        }
    }

    /// Pads with one bits to a byte boundary, like the `*_alignment_bit_equal_to_one` fields.
    pub(crate) fn align_with_ones(&mut self) -> &mut Self {
        while self.used != 0 {
            self.bit(true);
        }
        self
    }

    /// Pads with zero bits to a byte boundary.
    pub(crate) fn finish(&mut self) -> Vec<u8> {
        while self.used != 0 {
            self.bit(false);
        }
        std::mem::take(&mut self.bytes)
    }

    /// Appends `rbsp_trailing_bits()`.
    pub(crate) fn finish_rbsp(&mut self) -> Vec<u8> {
        self.bit(true);
        self.finish()
    }
}

/// Wraps an RBSP in a byte stream NAL unit: start code, two-byte header and emulation prevention.
pub(crate) fn nal_unit(nal_unit_type: u8, layer_id: u8, temporal_id: u8, rbsp: &[u8]) -> Vec<u8> {
    let mut out = vec![0, 0, 1];
    out.push((nal_unit_type << 1) | (layer_id >> 5));
    out.push(((layer_id & 0x1f) << 3) | (temporal_id + 1));

    let mut zeros = 0;
    for &byte in rbsp {
        if zeros == 2 && byte <= 3 {
            out.push(3);
            zeros = 0;
        }
        out.push(byte);
        zeros = if byte == 0 { zeros + 1 } else { 0 };
    }
    out
}

/// Syntax writers for the parameter sets and slices used by the scenario tests.
///
/// The streams are single layer, 4:2:0, 8 bit, 64x64 luma samples with 16x16 coding tree blocks.
pub(crate) mod syntax {
    use super::BitWriter;

    pub(crate) const LOG2_MAX_POC_LSB: u32 = 8;

    pub(crate) fn profile_tier_level(w: &mut BitWriter) {
        // general_profile_space, tier, profile_idc = Main
        w.u(2, 0).flag(false).u(5, 1);
        w.u(32, 0x6000_0000);
        w.u(48, 0);
        // general_level_idc = 3.0
        w.u(8, 90);
    }

    pub(crate) fn vps(id: u64) -> Vec<u8> {
        let mut w = BitWriter::default();
        w.u(4, id).flag(true).flag(true);
        // max_layers_minus1, max_sub_layers_minus1, temporal_id_nesting
        w.u(6, 0).u(3, 0).flag(true);
        w.u(16, 0xffff);
        profile_tier_level(&mut w);
        // sub_layer_ordering_info_present
        w.flag(true);
        w.ue(4).ue(2).ue(0);
        // max_layer_id, num_layer_sets_minus1
        w.u(6, 0).ue(0);
        // timing_info_present, extension
        w.flag(false).flag(false);
        w.finish_rbsp()
    }

    /// Two layer VPS with id 0 up to and including the base layer profile of
    /// `vps_extension()`.
    pub(crate) fn multi_layer_vps_prefix(w: &mut BitWriter) {
        w.u(4, 0).flag(true).flag(true);
        // max_layers_minus1 = 1, max_sub_layers_minus1 = 0, temporal_id_nesting
        w.u(6, 1).u(3, 0).flag(true);
        w.u(16, 0xffff);
        profile_tier_level(w);
        w.flag(true).ue(4).ue(2).ue(0);
        // max_layer_id = 1, two layer sets, the second one holds both layers
        w.u(6, 1).ue(1);
        w.flag(true).flag(true);
        // no timing info, vps_extension_flag and the alignment bits
        w.flag(false).flag(true).align_with_ones();
        // extension ptl for the base layer, level only
        w.u(8, 90);
    }

    /// Multi-layer VPS with `splitting_flag` set and the given explicit
    /// `dimension_id_len` values. One more scalability type than `lengths` is enabled, its
    /// length is inferred.
    pub(crate) fn vps_with_split_dimensions(lengths: &[u64]) -> Vec<u8> {
        let mut w = BitWriter::default();
        multi_layer_vps_prefix(&mut w);
        let types = lengths.len() as u32 + 1;
        let mask = ((1u64 << types) - 1) << (16 - types);
        w.flag(true).u(16, mask);
        for &len in lengths {
            w.u(3, len - 1);
        }
        // vps_nuh_layer_id_present_flag, layer_id_in_nuh[1]
        w.flag(true).u(6, 1);
        w.u(4, 0);
        w.finish_rbsp()
    }

    pub(crate) fn sps(id: u64, max_dec_pic_buffering: u64, max_num_reorder: u64) -> Vec<u8> {
        sps_with_size(id, 64, 64, max_dec_pic_buffering, max_num_reorder)
    }

    pub(crate) fn sps_with_size(
        id: u64,
        width: u64,
        height: u64,
        max_dec_pic_buffering: u64,
        max_num_reorder: u64,
    ) -> Vec<u8> {
        sps_with_block_sizes(id, width, height, max_dec_pic_buffering, max_num_reorder, 1)
    }

    /// 64x64 SPS with the given `log2_diff_max_min_luma_coding_block_size`.
    pub(crate) fn sps_with_ctb_size_diff(id: u64, diff_max_min_cb: u64) -> Vec<u8> {
        sps_with_block_sizes(id, 64, 64, 5, 0, diff_max_min_cb)
    }

    fn sps_with_block_sizes(
        id: u64,
        width: u64,
        height: u64,
        max_dec_pic_buffering: u64,
        max_num_reorder: u64,
        diff_max_min_cb: u64,
    ) -> Vec<u8> {
        let mut w = BitWriter::default();
        // vps_id, max_sub_layers_minus1, temporal_id_nesting
        w.u(4, 0).u(3, 0).flag(true);
        profile_tier_level(&mut w);
        w.ue(id);
        // chroma_format_idc, width, height, conformance_window
        w.ue(1).ue(width).ue(height).flag(false);
        // bit depths
        w.ue(0).ue(0);
        w.ue((LOG2_MAX_POC_LSB - 4) as u64);
        // sub_layer_ordering_info_present
        w.flag(true);
        w.ue(max_dec_pic_buffering - 1).ue(max_num_reorder).ue(0);
        // log2_min_cb - 3, diff_max_min_cb, log2_min_tb - 2, diff_max_min_tb, depths
        w.ue(0).ue(diff_max_min_cb).ue(0).ue(2).ue(1).ue(1);
        // scaling_list, amp, sao, pcm
        w.flag(false).flag(true).flag(false).flag(false);
        // num_short_term_ref_pic_sets
        w.ue(0);
        // long_term_ref_pics, temporal_mvp, strong_intra_smoothing, vui, extension
        w.flag(false).flag(true).flag(false).flag(false).flag(false);
        w.finish_rbsp()
    }

    pub(crate) fn pps(id: u64, sps_id: u64) -> Vec<u8> {
        let mut w = BitWriter::default();
        w.ue(id).ue(sps_id);
        // dependent_slice_segments, output_flag_present, num_extra_slice_header_bits
        w.flag(false).flag(false).u(3, 0);
        // sign_data_hiding, cabac_init_present
        w.flag(false).flag(false);
        // num_ref_idx_l0/l1_default_active_minus1
        w.ue(0).ue(0);
        // init_qp_minus26, constrained_intra, transform_skip, cu_qp_delta
        w.se(0).flag(false).flag(false).flag(false);
        // cb/cr qp offsets
        w.se(0).se(0);
        // slice_chroma_qp_offsets, weighted_pred, weighted_bipred, transquant_bypass,
        // tiles, entropy_coding_sync
        w.flag(false).flag(false).flag(false).flag(false).flag(false).flag(false);
        // loop_filter_across_slices, deblocking_filter_control_present
        w.flag(true).flag(false);
        // scaling_list_data, lists_modification, log2_parallel_merge_level_minus2
        w.flag(false).flag(false).ue(0);
        // slice_segment_header_extension, pps_extension
        w.flag(false).flag(false);
        w.finish_rbsp()
    }

    /// Short-term reference set signalled in the slice header.
    #[derive(Debug, Default, Clone)]
    pub(crate) struct SliceRps {
        /// `(delta_poc, used_by_curr_pic)`, negative deltas closest first.
        pub(crate) negative: Vec<(i32, bool)>,
        pub(crate) positive: Vec<(i32, bool)>,
    }

    pub(crate) fn slice(idr: bool, pps_id: u64, slice_type: u64, poc_lsb: u64, rps: &SliceRps) -> Vec<u8> {
        let mut w = BitWriter::default();
        // first_slice_segment_in_pic_flag
        w.flag(true);
        if idr {
            // no_output_of_prior_pics_flag
            w.flag(false);
        }
        w.ue(pps_id);
        w.ue(slice_type);
        if !idr {
            w.u(LOG2_MAX_POC_LSB, poc_lsb);
            // short_term_ref_pic_set_sps_flag
            w.flag(false);
            // num_short_term_ref_pic_sets == 0, so no inter_ref_pic_set_prediction_flag
            w.ue(rps.negative.len() as u64).ue(rps.positive.len() as u64);
            let mut previous = 0;
            for &(delta, used) in &rps.negative {
                w.ue((previous - delta - 1) as u64).flag(used);
                previous = delta;
            }
            previous = 0;
            for &(delta, used) in &rps.positive {
                w.ue((delta - previous - 1) as u64).flag(used);
                previous = delta;
            }
            // slice_temporal_mvp_enabled_flag
            w.flag(true);
        }
        if slice_type != 2 {
            // num_ref_idx_active_override_flag
            w.flag(false);
        }
        // the rest of the slice header is not parsed
        w.u(8, 0xa5);
        w.finish_rbsp()
    }
}
