use crate::parser::bit_reader::BitReader;

/// Table E-1, indexed by `aspect_ratio_idc - 1`.
const SAMPLE_ASPECT_RATIOS: [(u16, u16); 16] = [
    (1, 1),
    (12, 11),
    (10, 11),
    (16, 11),
    (40, 33),
    (24, 11),
    (20, 11),
    (32, 11),
    (80, 33),
    (18, 11),
    (15, 11),
    (64, 33),
    (160, 99),
    (4, 3),
    (3, 2),
    (2, 1),
];

const EXTENDED_SAR: u8 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingInfo {
    pub num_units_in_tick: u32,
    pub time_scale: u32,
    pub num_ticks_poc_diff_one_minus1: Option<u32>,
}

impl TimingInfo {
    pub(crate) fn parse(reader: &mut BitReader) -> Self {
        let num_units_in_tick = reader.u(32);
        let time_scale = reader.u(32);
        let num_ticks_poc_diff_one_minus1 = reader.flag().then(|| reader.ue());

        Self {
            num_units_in_tick,
            time_scale,
            num_ticks_poc_diff_one_minus1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColourDescription {
    pub colour_primaries: u8,
    pub transfer_characteristics: u8,
    pub matrix_coeffs: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoSignalType {
    pub video_format: u8,
    pub video_full_range_flag: bool,
    pub colour_description: Option<ColourDescription>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub left_offset: u32,
    pub right_offset: u32,
    pub top_offset: u32,
    pub bottom_offset: u32,
}

impl Window {
    pub(crate) fn parse(reader: &mut BitReader) -> Self {
        Self {
            left_offset: reader.ue(),
            right_offset: reader.ue(),
            top_offset: reader.ue(),
            bottom_offset: reader.ue(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitstreamRestriction {
    pub tiles_fixed_structure_flag: bool,
    pub motion_vectors_over_pic_boundaries_flag: bool,
    pub restricted_ref_pic_lists_flag: bool,
    pub min_spatial_segmentation_idc: u32,
    pub max_bytes_per_pic_denom: u32,
    pub max_bits_per_min_cu_denom: u32,
    pub log2_max_mv_length_horizontal: u32,
    pub log2_max_mv_length_vertical: u32,
}

/// `vui_parameters()` (E.2.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vui {
    pub aspect_ratio_idc: Option<u8>,
    /// Square pixels unless signalled otherwise.
    pub sar_width: u16,
    pub sar_height: u16,
    pub overscan_appropriate_flag: Option<bool>,
    pub video_signal_type: Option<VideoSignalType>,
    pub chroma_sample_loc_type: Option<(u32, u32)>,
    pub neutral_chroma_indication_flag: bool,
    pub field_seq_flag: bool,
    pub frame_field_info_present_flag: bool,
    pub default_display_window: Option<Window>,
    pub timing_info: Option<TimingInfo>,
    pub hrd_parameters: Option<HrdParameters>,
    pub bitstream_restriction: Option<BitstreamRestriction>,
}

impl Vui {
    pub(crate) fn parse(reader: &mut BitReader, max_sub_layers_minus1: u8) -> Self {
        let aspect_ratio_idc = reader.flag().then(|| reader.u(8) as u8);
        let (sar_width, sar_height) = match aspect_ratio_idc {
            Some(EXTENDED_SAR) => (reader.u(16) as u16, reader.u(16) as u16),
            Some(idc @ 1..=16) => SAMPLE_ASPECT_RATIOS[idc as usize - 1],
            _ => (1, 1),
        };

        let overscan_appropriate_flag = reader.flag().then(|| reader.flag());

        let video_signal_type = reader.flag().then(|| VideoSignalType {
            video_format: reader.u(3) as u8,
            video_full_range_flag: reader.flag(),
            colour_description: reader.flag().then(|| ColourDescription {
                colour_primaries: reader.u(8) as u8,
                transfer_characteristics: reader.u(8) as u8,
                matrix_coeffs: reader.u(8) as u8,
            }),
        });

        let chroma_sample_loc_type = reader.flag().then(|| (reader.ue(), reader.ue()));
        let neutral_chroma_indication_flag = reader.flag();
        let field_seq_flag = reader.flag();
        let frame_field_info_present_flag = reader.flag();
        let default_display_window = reader.flag().then(|| Window::parse(reader));

        let mut hrd_parameters = None;
        let timing_info = reader.flag().then(|| {
            let timing_info = TimingInfo::parse(reader);
            if reader.flag() {
                hrd_parameters = Some(HrdParameters::parse(reader, true, max_sub_layers_minus1));
            }
            timing_info
        });

        let bitstream_restriction = reader.flag().then(|| BitstreamRestriction {
            tiles_fixed_structure_flag: reader.flag(),
            motion_vectors_over_pic_boundaries_flag: reader.flag(),
            restricted_ref_pic_lists_flag: reader.flag(),
            min_spatial_segmentation_idc: reader.ue(),
            max_bytes_per_pic_denom: reader.ue(),
            max_bits_per_min_cu_denom: reader.ue(),
            log2_max_mv_length_horizontal: reader.ue(),
            log2_max_mv_length_vertical: reader.ue(),
        });

        Self {
            aspect_ratio_idc,
            sar_width,
            sar_height,
            overscan_appropriate_flag,
            video_signal_type,
            chroma_sample_loc_type,
            neutral_chroma_indication_flag,
            field_seq_flag,
            frame_field_info_present_flag,
            default_display_window,
            timing_info,
            hrd_parameters,
            bitstream_restriction,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SubPicHrdParameters {
    pub tick_divisor_minus2: u8,
    pub du_cpb_removal_delay_increment_length_minus1: u8,
    pub sub_pic_cpb_params_in_pic_timing_sei_flag: bool,
    pub dpb_output_delay_du_length_minus1: u8,
    pub cpb_size_du_scale: u8,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CpbParameters {
    pub bit_rate_value_minus1: u32,
    pub cpb_size_value_minus1: u32,
    pub cpb_size_du_value_minus1: Option<u32>,
    pub bit_rate_du_value_minus1: Option<u32>,
    pub cbr_flag: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SubLayerHrd {
    pub fixed_pic_rate_general_flag: bool,
    pub fixed_pic_rate_within_cvs_flag: bool,
    pub elemental_duration_in_tc_minus1: Option<u32>,
    pub low_delay_hrd_flag: bool,
    pub cpb_cnt_minus1: u32,
    pub nal: Vec<CpbParameters>,
    pub vcl: Vec<CpbParameters>,
}

/// `hrd_parameters()` (E.2.2).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HrdParameters {
    pub nal_hrd_parameters_present_flag: bool,
    pub vcl_hrd_parameters_present_flag: bool,
    pub sub_pic_hrd_params: Option<SubPicHrdParameters>,
    pub bit_rate_scale: u8,
    pub cpb_size_scale: u8,
    pub initial_cpb_removal_delay_length_minus1: u8,
    pub au_cpb_removal_delay_length_minus1: u8,
    pub dpb_output_delay_length_minus1: u8,
    pub sub_layers: Vec<SubLayerHrd>,
}

impl HrdParameters {
    pub(crate) fn parse(reader: &mut BitReader, common_inf_present: bool, max_sub_layers_minus1: u8) -> Self {
        let mut hrd = Self::default();

        if common_inf_present {
            hrd.nal_hrd_parameters_present_flag = reader.flag();
            hrd.vcl_hrd_parameters_present_flag = reader.flag();
            if hrd.nal_hrd_parameters_present_flag || hrd.vcl_hrd_parameters_present_flag {
                let sub_pic_present = reader.flag();
                let mut sub_pic = sub_pic_present.then(|| SubPicHrdParameters {
                    tick_divisor_minus2: reader.u(8) as u8,
                    du_cpb_removal_delay_increment_length_minus1: reader.u(5) as u8,
                    sub_pic_cpb_params_in_pic_timing_sei_flag: reader.flag(),
                    dpb_output_delay_du_length_minus1: reader.u(5) as u8,
                    cpb_size_du_scale: 0,
                });
                hrd.bit_rate_scale = reader.u(4) as u8;
                hrd.cpb_size_scale = reader.u(4) as u8;
                if let Some(sub_pic) = sub_pic.as_mut() {
                    sub_pic.cpb_size_du_scale = reader.u(4) as u8;
                }
                hrd.sub_pic_hrd_params = sub_pic;
                hrd.initial_cpb_removal_delay_length_minus1 = reader.u(5) as u8;
                hrd.au_cpb_removal_delay_length_minus1 = reader.u(5) as u8;
                hrd.dpb_output_delay_length_minus1 = reader.u(5) as u8;
            }
        }

        let sub_pic_present = hrd.sub_pic_hrd_params.is_some();
        for _ in 0..=max_sub_layers_minus1 {
            let mut sub_layer = SubLayerHrd {
                fixed_pic_rate_general_flag: reader.flag(),
                ..Default::default()
            };
            sub_layer.fixed_pic_rate_within_cvs_flag =
                sub_layer.fixed_pic_rate_general_flag || reader.flag();

            if sub_layer.fixed_pic_rate_within_cvs_flag {
                sub_layer.elemental_duration_in_tc_minus1 = Some(reader.ue());
            } else {
                sub_layer.low_delay_hrd_flag = reader.flag();
            }
            if !sub_layer.low_delay_hrd_flag {
                sub_layer.cpb_cnt_minus1 = reader.ue();
            }

            // cpb_cnt_minus1 is at most 31, anything above is a corrupt stream
            let cpb_count = sub_layer.cpb_cnt_minus1.min(31) + 1;
            if hrd.nal_hrd_parameters_present_flag {
                sub_layer.nal = parse_sub_layer_hrd(reader, cpb_count, sub_pic_present);
            }
            if hrd.vcl_hrd_parameters_present_flag {
                sub_layer.vcl = parse_sub_layer_hrd(reader, cpb_count, sub_pic_present);
            }
            hrd.sub_layers.push(sub_layer);
        }

        hrd
    }
}

fn parse_sub_layer_hrd(reader: &mut BitReader, cpb_count: u32, sub_pic_present: bool) -> Vec<CpbParameters> {
    (0..cpb_count)
        .map(|_| {
            let bit_rate_value_minus1 = reader.ue();
            let cpb_size_value_minus1 = reader.ue();
            let (cpb_size_du_value_minus1, bit_rate_du_value_minus1) = if sub_pic_present {
                (Some(reader.ue()), Some(reader.ue()))
            } else {
                (None, None)
            };
            CpbParameters {
                bit_rate_value_minus1,
                cpb_size_value_minus1,
                cpb_size_du_value_minus1,
                bit_rate_du_value_minus1,
                cbr_flag: reader.flag(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::test_bitstream::BitWriter;

    #[test]
    fn parses_aspect_ratio_signal_and_timing() {
        let mut w = BitWriter::default();
        // aspect_ratio_idc = 2 (12:11)
        w.flag(true).u(8, 2);
        // overscan
        w.flag(false);
        // video signal, full range, BT.709 colour description
        w.flag(true).u(3, 5).flag(true).flag(true).u(8, 1).u(8, 1).u(8, 1);
        // chroma loc, neutral chroma, field seq, frame field info, display window
        w.flag(false).flag(false).flag(false).flag(false).flag(false);
        // timing 1001 / 60000, no poc proportional, hrd with nal parameters
        w.flag(true).u(32, 1001).u(32, 60000).flag(false);
        w.flag(true);
        w.flag(true).flag(false).flag(false).u(4, 1).u(4, 2).u(5, 23).u(5, 23).u(5, 23);
        // sub-layer 0: fixed rate, elemental duration, cpb_cnt_minus1 = 0, one cpb
        w.flag(true).ue(0).ue(0);
        w.ue(1000).ue(2000).flag(true);
        // bitstream restriction
        w.flag(false);
        w.u(8, 0x81);
        let data = w.finish();

        let mut reader = BitReader::new(&data, false);
        let vui = Vui::parse(&mut reader, 0);

        assert_eq!((vui.sar_width, vui.sar_height), (12, 11));
        let signal = vui.video_signal_type.unwrap();
        assert!(signal.video_full_range_flag);
        assert_eq!(signal.colour_description.unwrap().matrix_coeffs, 1);
        let timing = vui.timing_info.unwrap();
        assert_eq!((timing.num_units_in_tick, timing.time_scale), (1001, 60000));
        let hrd = vui.hrd_parameters.unwrap();
        assert_eq!(hrd.sub_layers.len(), 1);
        assert_eq!(hrd.sub_layers[0].nal[0].bit_rate_value_minus1, 1000);
        assert!(hrd.sub_layers[0].nal[0].cbr_flag);
        assert_eq!(reader.u(8), 0x81);
    }

    #[test]
    fn defaults_to_square_pixels() {
        let mut w = BitWriter::default();
        w.flag(true).u(8, 0);
        w.u(16, 0);
        let data = w.finish();

        let mut reader = BitReader::new(&data, false);
        let vui = Vui::parse(&mut reader, 0);

        assert_eq!((vui.sar_width, vui.sar_height), (1, 1));
        assert!(vui.timing_info.is_none());
    }
}
