/// What to do when a stream fills the DPB beyond what its parameter sets declare.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum DpbOverflowPolicy {
    /// Evict the lowest POC picture, even if it is still marked as a reference, once the DPB
    /// reaches the level limit. Output timing of non-conforming streams changes, but they keep
    /// decoding.
    #[default]
    Lenient,
    /// Evict as soon as occupancy reaches the size declared by the active SPS.
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParserOptions {
    /// Ticks per second of the timestamps passed with packets.
    pub clock_rate: i64,
    /// Forward every parsed VPS/SPS/PPS through [`DecoderClient::update_parameter_set`](crate::DecoderClient::update_parameter_set).
    pub out_of_band_parameter_sets: bool,
    pub dpb_overflow_policy: DpbOverflowPolicy,
    /// Number of payload bytes of a partially received NAL unit that are enough to decide
    /// whether it starts a new picture.
    pub min_bytes_for_boundary_detection: usize,
    pub emulation_prevention: bool,
    /// Reorder timestamps that arrive in decode order. Out of order timestamps are also detected
    /// automatically during the first pictures of a stream.
    pub filter_timestamps: bool,
    /// Smallest bitstream buffer requested from the client.
    pub min_bitstream_buffer_size: usize,
    pub bitstream_buffer_offset_alignment: usize,
    pub bitstream_buffer_size_alignment: usize,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            clock_rate: 10_000_000,
            out_of_band_parameter_sets: true,
            dpb_overflow_policy: DpbOverflowPolicy::default(),
            min_bytes_for_boundary_detection: 256,
            emulation_prevention: true,
            filter_timestamps: false,
            min_bitstream_buffer_size: 2 * 1024 * 1024,
            bitstream_buffer_offset_alignment: 256,
            bitstream_buffer_size_alignment: 256,
        }
    }
}
