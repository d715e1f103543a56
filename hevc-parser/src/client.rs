use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::parser::{
    ReferencePictureSets,
    parameter_sets::{Level, ParameterSet, Pps, Sps, Vps},
};

/// `general_profile_idc` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Main,
    Main10,
    MainStillPicture,
    RangeExtensions,
    HighThroughput,
    MultiviewMain,
    ScalableMain,
    Other(u8),
}

impl Profile {
    fn from_profile_idc(profile_idc: u8) -> Self {
        match profile_idc {
            1 => Self::Main,
            2 => Self::Main10,
            3 => Self::MainStillPicture,
            4 => Self::RangeExtensions,
            5 => Self::HighThroughput,
            6 => Self::MultiviewMain,
            7 => Self::ScalableMain,
            other => Self::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRate {
    pub numerator: u32,
    pub denominator: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoSignalInfo {
    pub video_format: u8,
    pub video_full_range_flag: bool,
    pub colour_primaries: u8,
    pub transfer_characteristics: u8,
    pub matrix_coefficients: u8,
}

impl Default for VideoSignalInfo {
    fn default() -> Self {
        // Table E.2 "unspecified" format and E.3-E.5 "unspecified" colour description.
        Self {
            video_format: 5,
            video_full_range_flag: false,
            colour_primaries: 2,
            transfer_characteristics: 2,
            matrix_coefficients: 2,
        }
    }
}

/// Description of a coded video sequence, passed to [`DecoderClient::begin_sequence`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceInfo {
    pub profile: Profile,
    /// Luma size rounded up to a multiple of 16.
    pub coded_width: u32,
    pub coded_height: u32,
    /// Luma size after applying the conformance window.
    pub display_width: u32,
    pub display_height: u32,
    pub chroma_format_idc: u8,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    pub frame_rate: Option<FrameRate>,
    /// Display aspect ratio as a reduced fraction.
    pub display_aspect_ratio: (u32, u32),
    pub video_signal: VideoSignalInfo,
    pub min_num_decode_surfaces: u32,
    /// DPB size allowed by the level for this picture size.
    pub min_num_dpb_slots: u32,
}

/// `MaxDpbPicBuf` of Table A.8.
const MAX_DPB_PIC_BUF: u32 = 6;

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

fn reduce(numerator: u64, denominator: u64) -> (u64, u64) {
    match gcd(numerator, denominator) {
        0 => (numerator, denominator),
        divisor => (numerator / divisor, denominator / divisor),
    }
}

/// `maxDpbSize` (A.4.2) for the picture size and level of `sps`.
pub(crate) fn level_max_dpb_size(sps: &Sps, level: Level) -> u32 {
    let pic_size = sps.pic_width_in_luma_samples as u64 * sps.pic_height_in_luma_samples as u64;
    let max_luma_ps = level.max_luma_picture_size() as u64;

    let size = if pic_size <= max_luma_ps >> 2 {
        4 * MAX_DPB_PIC_BUF
    } else if pic_size <= max_luma_ps >> 1 {
        2 * MAX_DPB_PIC_BUF
    } else if pic_size <= (3 * max_luma_ps) >> 2 {
        4 * MAX_DPB_PIC_BUF / 3
    } else {
        MAX_DPB_PIC_BUF
    };
    size.min(16)
}

impl SequenceInfo {
    /// `max_dec_pic_buffering` is the largest DPB size seen in the stream so far.
    pub(crate) fn new(sps: &Sps, vps: Option<&Vps>, max_dec_pic_buffering: u32) -> Self {
        let profile_tier_level = sps
            .profile_tier_level
            .as_ref()
            .or(vps.map(|vps| &vps.profile_tier_level));
        let level = profile_tier_level.map_or(Level::default(), |ptl| ptl.general_level);
        let profile = match profile_tier_level.map_or(0, |ptl| ptl.general_profile_idc) {
            0 if sps.bit_depth_luma_minus8 == 0 => Profile::Main,
            0 if matches!(sps.bit_depth_luma_minus8, 2 | 4) => Profile::Main10,
            profile_idc => Profile::from_profile_idc(profile_idc),
        };

        let (sub_width, sub_height) = match sps.chroma_array_type() {
            1 => (2, 2),
            2 => (2, 1),
            _ => (1, 1),
        };
        let window = sps.conformance_window;
        let display_width = sps
            .pic_width_in_luma_samples
            .saturating_sub(sub_width * (window.left_offset + window.right_offset));
        let display_height = sps
            .pic_height_in_luma_samples
            .saturating_sub(sub_height * (window.top_offset + window.bottom_offset));

        let vui = sps.vui.as_ref();
        let frame_rate = vui
            .and_then(|vui| vui.timing_info.as_ref())
            .filter(|timing| timing.num_units_in_tick > 0 && timing.time_scale >= timing.num_units_in_tick)
            .map(|timing| {
                let (numerator, denominator) = reduce(timing.time_scale as u64, timing.num_units_in_tick as u64);
                FrameRate {
                    numerator: numerator as u32,
                    denominator: denominator as u32,
                }
            });

        let (sar_width, sar_height) = vui
            .filter(|vui| vui.sar_width > 0 && vui.sar_height > 0)
            .map_or((1, 1), |vui| (vui.sar_width as u64, vui.sar_height as u64));
        let (dar_width, dar_height) = reduce(sar_width * display_width as u64, sar_height * display_height as u64);

        let video_signal = vui
            .and_then(|vui| vui.video_signal_type.as_ref())
            .map_or(VideoSignalInfo::default(), |signal| {
                let mut info = VideoSignalInfo {
                    video_format: signal.video_format,
                    video_full_range_flag: signal.video_full_range_flag,
                    ..Default::default()
                };
                if let Some(colour) = signal.colour_description {
                    info.colour_primaries = colour.colour_primaries;
                    info.transfer_characteristics = colour.transfer_characteristics;
                    info.matrix_coefficients = colour.matrix_coeffs;
                }
                info
            });

        Self {
            profile,
            coded_width: sps.pic_width_in_luma_samples.next_multiple_of(16),
            coded_height: sps.pic_height_in_luma_samples.next_multiple_of(16),
            display_width,
            display_height,
            chroma_format_idc: sps.chroma_format_idc,
            bit_depth_luma_minus8: sps.bit_depth_luma_minus8,
            bit_depth_chroma_minus8: sps.bit_depth_chroma_minus8,
            frame_rate,
            display_aspect_ratio: (dar_width as u32, dar_height as u32),
            video_signal,
            min_num_decode_surfaces: max_dec_pic_buffering.max(sps.max_dec_pic_buffering) + 3,
            min_num_dpb_slots: level_max_dpb_size(sps, level),
        }
    }
}

/// Parameters of a bitstream buffer allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitstreamBufferRequest {
    pub min_size: usize,
    pub offset_alignment: usize,
    pub size_alignment: usize,
}

/// A DPB picture that the current picture may reference.
#[derive(Debug, Clone)]
pub struct ReferenceSlot<P> {
    pub dpb_slot: usize,
    pub poc: i32,
    pub long_term: bool,
    pub picture: P,
}

/// Multi-layer fields of a picture with `nuh_layer_id > 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerInfo {
    pub nuh_layer_id: u8,
    pub default_ref_layers_active_flag: bool,
    pub num_direct_ref_layers: u32,
    pub max_one_active_ref_layer_flag: bool,
    pub poc_lsb_not_present_flag: bool,
    pub num_active_ref_layer_pics: u32,
}

/// Everything needed to decode one picture.
#[derive(Clone, derivative::Derivative)]
#[derivative(Debug)]
pub struct PictureDescriptor<P> {
    pub picture: P,
    pub dpb_slot: usize,
    #[derivative(Debug = "ignore")]
    pub vps: Option<Arc<Vps>>,
    #[derivative(Debug = "ignore")]
    pub sps: Arc<Sps>,
    #[derivative(Debug = "ignore")]
    pub pps: Arc<Pps>,
    pub vps_id: u8,
    pub sps_id: u8,
    pub pps_id: u8,
    pub irap_pic_flag: bool,
    pub idr_pic_flag: bool,
    /// All slices of the picture are I slices.
    pub intra_pic_flag: bool,
    pub short_term_ref_pic_set_sps_flag: bool,
    pub pic_order_cnt_val: i32,
    pub num_bits_for_short_term_rps_in_slice: u32,
    pub num_delta_pocs_of_ref_rps_idx: u32,
    pub num_poc_total_curr: u32,
    pub reference_sets: ReferencePictureSets,
    pub references: Vec<ReferenceSlot<P>>,
    pub layer: Option<LayerInfo>,
    /// Slice NAL units of the picture, each preceded by a three byte start code.
    #[derivative(Debug = "ignore")]
    pub bitstream: Bytes,
    /// Offsets of the slice start codes in `bitstream`.
    pub slice_offsets: Vec<u32>,
}

/// Receives the output of the parser.
///
/// All methods are called synchronously from [`Parser::feed`](crate::Parser::feed) and
/// [`Parser::end_of_stream`](crate::Parser::end_of_stream).
pub trait DecoderClient {
    /// Handle to a decoded picture buffer. The parser keeps clones of it while the picture is in
    /// the DPB and drops them once it is no longer needed.
    type Picture: Clone;

    /// Called when a sequence with new properties starts. Returns the number of picture buffers
    /// the client can provide, or 0 to reject the sequence.
    fn begin_sequence(&mut self, info: &SequenceInfo) -> u32;

    /// Returns a buffer with a capacity of at least `request.min_size` bytes, holding a copy of
    /// `copy_from` if given.
    fn allocate_bitstream_buffer(&mut self, request: BitstreamBufferRequest, copy_from: Option<&[u8]>) -> Option<BytesMut> {
        let mut buffer = BytesMut::with_capacity(request.min_size.next_multiple_of(request.size_alignment.max(1)));
        if let Some(data) = copy_from {
            buffer.extend_from_slice(data);
        }
        Some(buffer)
    }

    fn allocate_picture_buffer(&mut self) -> Option<Self::Picture>;

    /// Called for every parsed parameter set when out of band parameter sets are enabled.
    /// `update_sequence_count` grows by one with each update of the same id.
    fn update_parameter_set(&mut self, _parameter_set: &ParameterSet, _update_sequence_count: u32) {}

    /// Returns false if the picture could not be decoded. It will then not be displayed.
    fn decode_picture(&mut self, descriptor: &PictureDescriptor<Self::Picture>) -> bool;

    fn display_picture(&mut self, picture: &Self::Picture, pts: i64);

    /// Receives units of the unspecified NAL unit types 48..=63.
    fn unhandled_nal_unit(&mut self, _data: &[u8]) {}
}
