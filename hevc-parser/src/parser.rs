use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use tracing::{debug, info, trace, warn};

use crate::{
    client::{
        BitstreamBufferRequest, DecoderClient, LayerInfo, PictureDescriptor, ReferenceSlot, SequenceInfo,
    },
    config::ParserOptions,
    display::DisplayQueue,
    dpb::{Dpb, OutputPicture, PictureId, ReferenceMarking},
};

use bit_reader::BitReader;
use nalu_header::{NalUnitHeader, starts_new_picture};
use nalu_splitter::{NalUnit, NaluSplitter};
use parameter_sets::{ParameterSet, ParameterSetStore, Pps, Sps, Vps};
use reference_manager::ReferenceContext;
use sei::{SeiMessage, parse_sei_rbsp};
use slice_header::SliceHeader;

pub use nalu_header::NalUnitType;
pub use parameter_sets::ParameterSetError;
pub use reference_manager::ReferencePictureSets;
pub use sei::DisplayMasteringInfo;
pub use slice_header::{LongTermRef, SliceHeaderError, SliceType};

pub(crate) mod bit_reader;
mod nalu_header;
mod nalu_splitter;
pub mod parameter_sets;
mod reference_manager;
mod sei;
mod slice_header;

#[cfg(test)]
pub(crate) mod test_bitstream;

const START_CODE: [u8; 3] = [0, 0, 1];
const MAX_SLICES_PER_PICTURE: usize = 8192;

#[derive(Debug, thiserror::Error)]
pub enum ParserError {
    #[error("The client failed to provide a {0} buffer")]
    BufferAllocationFailure(&'static str),

    #[error("The client rejected the sequence")]
    SequenceRejected,

    #[error("The parser stopped after the client rejected a sequence")]
    DecoderInitFailed,

    #[error(transparent)]
    ParameterSet(#[from] ParameterSetError),

    #[error(transparent)]
    SliceHeader(#[from] SliceHeaderError),

    #[error("Invalid NAL unit header")]
    InvalidNalUnitHeader,
}

impl ParserError {
    /// Errors that only cost the NAL unit they occurred in. These are logged and never returned
    /// from [`Parser::feed`].
    fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ParserError::ParameterSet(_) | ParserError::SliceHeader(_) | ParserError::InvalidNalUnitHeader
        )
    }
}

/// A chunk of an Annex B byte stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct BitstreamPacket<'a> {
    pub data: &'a [u8],
    /// Timestamp of the picture starting in this packet.
    pub pts: Option<i64>,
    /// The data does not continue the previously fed data.
    pub discontinuity: bool,
    /// The packet ends a picture, it can be decoded without waiting for the next one.
    pub end_of_picture: bool,
    pub end_of_stream: bool,
}

struct OpenPicture<P> {
    header: SliceHeader,
    vps: Option<Arc<Vps>>,
    sps: Arc<Sps>,
    pps: Arc<Pps>,
    slot: usize,
    id: PictureId,
    picture: P,
    poc: i32,
    intra: bool,
    reference_sets: ReferencePictureSets,
}

/// HEVC byte stream parser. Finds pictures in the stream, keeps track of the decoded picture
/// buffer and hands pictures to a [`DecoderClient`] for decoding and display.
pub struct Parser<C: DecoderClient> {
    client: C,
    options: ParserOptions,
    nalu_splitter: NaluSplitter,
    parameter_sets: ParameterSetStore,
    reference_ctx: ReferenceContext,
    dpb: Dpb<C::Picture>,
    display: DisplayQueue,
    bitstream: BytesMut,
    slice_offsets: Vec<u32>,
    picture: Option<OpenPicture<C::Picture>>,
    /// Header of the last slice, copied by dependent slice segments.
    slice_header: Option<SliceHeader>,
    /// Stream position of the first slice of the open picture.
    frame_start: u64,
    no_rasl_output_flag: bool,
    max_dec_pic_buffering: u32,
    sequence_info: Option<SequenceInfo>,
    max_frame_buffers: u32,
    decoder_init_failed: bool,
    next_picture_id: u64,
    display_mastering_info: Option<DisplayMasteringInfo>,
}

impl<C: DecoderClient> Parser<C> {
    pub fn new(client: C, options: ParserOptions) -> Self {
        Self {
            client,
            options,
            nalu_splitter: NaluSplitter::default(),
            parameter_sets: ParameterSetStore::default(),
            reference_ctx: ReferenceContext::default(),
            dpb: Dpb::new(options.dpb_overflow_policy),
            display: DisplayQueue::new(options.clock_rate, options.filter_timestamps),
            bitstream: BytesMut::new(),
            slice_offsets: Vec::new(),
            picture: None,
            slice_header: None,
            frame_start: 0,
            no_rasl_output_flag: false,
            max_dec_pic_buffering: 0,
            sequence_info: None,
            max_frame_buffers: 0,
            decoder_init_failed: false,
            next_picture_id: 0,
            display_mastering_info: None,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    pub fn into_client(self) -> C {
        self.client
    }

    /// Mastering display colour volume of the stream, if an SEI message carried one.
    pub fn display_mastering_info(&self) -> Option<&DisplayMasteringInfo> {
        self.display_mastering_info.as_ref()
    }

    /// Number of decoded pictures held in the DPB.
    pub fn dpb_fullness(&self) -> usize {
        self.dpb.fullness()
    }

    /// Parses a packet and returns the number of bytes consumed, which is always the whole
    /// packet.
    pub fn feed(&mut self, packet: BitstreamPacket) -> Result<usize, ParserError> {
        if self.decoder_init_failed {
            return Err(ParserError::DecoderInitFailed);
        }

        if packet.discontinuity {
            debug!("Stream discontinuity");
            self.finish_pending_unit()?;
            self.end_of_picture();
            self.display.clear_timestamps();
        }

        if let Some(pts) = packet.pts {
            self.display
                .queue_timestamp(pts, self.nalu_splitter.position(), packet.discontinuity);
        }

        for unit in self.nalu_splitter.push(packet.data) {
            self.handle_nal_unit(unit)?;
        }

        if self.picture.is_some() {
            let open_picture_type = self.picture.as_ref().map(|picture| picture.header.nal_unit_type);
            let emulation_prevention = self.options.emulation_prevention;
            let boundary = self
                .nalu_splitter
                .peek_open_unit(self.options.min_bytes_for_boundary_detection)
                .is_some_and(|head| starts_new_picture(head, open_picture_type, emulation_prevention));
            if boundary {
                trace!("Picture boundary found in a partially received NAL unit");
                self.end_of_picture();
            }
        }

        if packet.end_of_stream {
            self.end_of_stream()?;
        } else if packet.end_of_picture {
            self.finish_pending_unit()?;
            self.end_of_picture();
        }

        Ok(packet.data.len())
    }

    /// Decodes the last picture, outputs everything left in the DPB and resets the parser to
    /// its initial state.
    pub fn end_of_stream(&mut self) -> Result<(), ParserError> {
        if self.decoder_init_failed {
            return Err(ParserError::DecoderInitFailed);
        }

        self.finish_pending_unit()?;
        self.end_of_picture();

        let mut output = Vec::new();
        self.dpb.flush(false, &mut output);
        self.display_pictures(output);

        self.reset();
        Ok(())
    }

    fn reset(&mut self) {
        self.nalu_splitter.reset();
        self.parameter_sets.clear();
        self.reference_ctx.reset();
        self.dpb.reset();
        self.display.reset();
        self.bitstream = BytesMut::new();
        self.slice_offsets.clear();
        self.picture = None;
        self.slice_header = None;
        self.frame_start = 0;
        self.no_rasl_output_flag = false;
        self.max_dec_pic_buffering = 0;
        self.sequence_info = None;
        self.max_frame_buffers = 0;
        self.display_mastering_info = None;
    }

    fn finish_pending_unit(&mut self) -> Result<(), ParserError> {
        match self.nalu_splitter.flush() {
            Some(unit) => self.handle_nal_unit(unit),
            None => Ok(()),
        }
    }

    fn handle_nal_unit(&mut self, unit: NalUnit) -> Result<(), ParserError> {
        if unit.data.len() < 2 {
            debug!(position = unit.position, "Discarding a truncated NAL unit");
            return Ok(());
        }

        let open_picture_type = self.picture.as_ref().map(|picture| picture.header.nal_unit_type);
        if starts_new_picture(&unit.data, open_picture_type, self.options.emulation_prevention) {
            self.end_of_picture();
        }

        let offset = self.append_to_bitstream(&unit.data)?;
        let keep = match self.parse_nal_unit(&unit) {
            Ok(keep) => keep,
            Err(err) if err.is_recoverable() => {
                warn!(%err, position = unit.position, "Discarding NAL unit");
                false
            }
            Err(err) => return Err(err),
        };

        if keep && self.slice_offsets.len() < MAX_SLICES_PER_PICTURE {
            self.slice_offsets.push(offset as u32);
        } else {
            if keep {
                warn!("Too many slices in a picture, discarding slice");
            }
            self.bitstream.truncate(offset);
        }
        Ok(())
    }

    /// Appends a NAL unit with a start code to the bitstream buffer and returns its offset.
    /// A unit starting an empty buffer is copied into a newly requested one.
    fn append_to_bitstream(&mut self, data: &[u8]) -> Result<usize, ParserError> {
        let offset = self.bitstream.len();
        let needed = offset + START_CODE.len() + data.len();

        if self.bitstream.capacity() < needed {
            if offset == 0 {
                let mut unit = Vec::with_capacity(needed);
                unit.extend_from_slice(&START_CODE);
                unit.extend_from_slice(data);
                self.bitstream = allocate_bitstream(&mut self.client, &self.options, needed, Some(unit.as_slice()))?;
                return Ok(offset);
            }

            let min_size = offset + (START_CODE.len() + data.len()).max(self.options.min_bitstream_buffer_size);
            self.bitstream = allocate_bitstream(&mut self.client, &self.options, min_size, Some(&self.bitstream[..]))?;
        }

        self.bitstream.put_slice(&START_CODE);
        self.bitstream.put_slice(data);
        Ok(offset)
    }

    /// Returns true for slices that belong to the open picture.
    fn parse_nal_unit(&mut self, unit: &NalUnit) -> Result<bool, ParserError> {
        let mut reader = BitReader::new(&unit.data, self.options.emulation_prevention);
        let nal = NalUnitHeader::parse(&mut reader).ok_or(ParserError::InvalidNalUnitHeader)?;

        match nal.nal_unit_type {
            nal_unit_type if nal_unit_type.is_slice() => self.handle_slice(&mut reader, nal, unit.position),
            NalUnitType::Vps => {
                let vps = Vps::parse(&mut reader)?;
                self.insert_parameter_set(ParameterSet::Video(Arc::new(vps)));
                Ok(false)
            }
            NalUnitType::Sps => {
                let sps = Sps::parse(&mut reader, nal.layer_id, &self.parameter_sets)?;
                self.insert_parameter_set(ParameterSet::Sequence(Arc::new(sps)));
                Ok(false)
            }
            NalUnitType::Pps => {
                let pps = Pps::parse(&mut reader, &self.parameter_sets)?;
                self.insert_parameter_set(ParameterSet::Picture(Arc::new(pps)));
                Ok(false)
            }
            NalUnitType::PrefixSei | NalUnitType::SuffixSei => {
                self.handle_sei(&mut reader);
                Ok(false)
            }
            NalUnitType::Unspecified(_) => {
                self.client.unhandled_nal_unit(&unit.data);
                Ok(false)
            }
            NalUnitType::Reserved(id) => {
                debug!(id, "Discarding NAL unit of a reserved type");
                Ok(false)
            }
            nal_unit_type => {
                trace!(?nal_unit_type, "Ignoring NAL unit");
                Ok(false)
            }
        }
    }

    fn insert_parameter_set(&mut self, set: ParameterSet) {
        let update_count = self.parameter_sets.next_update_count(set.kind(), set.id());
        trace!(kind = ?set.kind(), id = set.id(), update_count, "Parameter set");
        if self.options.out_of_band_parameter_sets {
            self.client.update_parameter_set(&set, update_count);
        }
        self.parameter_sets.insert(set);
    }

    fn handle_sei(&mut self, reader: &mut BitReader) {
        for message in parse_sei_rbsp(reader) {
            match message {
                SeiMessage::MasteringDisplayColourVolume(mastering) => {
                    if self.display_mastering_info.is_none() {
                        info!(?mastering, "Mastering display colour volume");
                    }
                    self.display_mastering_info = Some(mastering);
                }
            }
        }
    }

    fn handle_slice(&mut self, reader: &mut BitReader, nal: NalUnitHeader, position: u64) -> Result<bool, ParserError> {
        let header = SliceHeader::parse(reader, nal, &self.parameter_sets, self.slice_header.as_ref())?;
        self.slice_header = Some(header.clone());

        match self.picture.as_mut() {
            Some(picture) => {
                let active_pps_id = self.parameter_sets.active_pps(header.layer_id).map(|pps| pps.id);
                if active_pps_id != Some(header.pps_id) {
                    warn!(
                        pps_id = header.pps_id,
                        ?active_pps_id,
                        "Slice refers to a different PPS than the rest of the picture"
                    );
                    return Ok(false);
                }
                picture.intra &= header.is_intra();
                Ok(true)
            }
            None => self.start_picture(header, position),
        }
    }

    /// Activates parameter sets for the first slice of a picture and reserves its DPB slot.
    fn start_picture(&mut self, header: SliceHeader, position: u64) -> Result<bool, ParserError> {
        let layer_id = header.layer_id;
        let nal_unit_type = header.nal_unit_type;

        let pps = self
            .parameter_sets
            .pps(header.pps_id)
            .cloned()
            .ok_or(SliceHeaderError::MissingPps(header.pps_id))?;
        let sps = self
            .parameter_sets
            .sps(pps.sps_id)
            .cloned()
            .ok_or(SliceHeaderError::MissingSps(pps.sps_id))?;
        if let Some(vps) = self.parameter_sets.vps(sps.vps_id).cloned() {
            self.parameter_sets.active_vps = Some(vps);
        }

        if nal_unit_type.is_irap() {
            self.no_rasl_output_flag = nal_unit_type.is_idr() || nal_unit_type.is_bla();
        }
        let new_geometry = self
            .parameter_sets
            .active_sps(layer_id)
            .is_none_or(|active| active.geometry_differs(&sps));
        if new_geometry {
            self.no_rasl_output_flag = true;
        }

        self.max_dec_pic_buffering = sps.max_dec_pic_buffering;
        if let Some(vps) = self.parameter_sets.active_vps.as_ref() {
            let layers = vps.max_layers_minus1 as u32 + 1;
            self.max_dec_pic_buffering = self
                .max_dec_pic_buffering
                .max(layers * vps.max_dec_pic_buffering());
        }

        let random_access = nal_unit_type.is_irap() && self.no_rasl_output_flag;
        let no_output_of_prior_pics = nal_unit_type.is_cra() || header.no_output_of_prior_pics_flag;

        if random_access || new_geometry || self.dpb.max_dpb_size() == 0 {
            if layer_id == 0 {
                let mut output = Vec::new();
                self.dpb.flush(no_output_of_prior_pics, &mut output);
                self.display_pictures(output);
            }
            self.start_sequence(&sps)?;
            self.parameter_sets.activate_sps(layer_id, sps.clone());
        } else if self
            .parameter_sets
            .active_sps(layer_id)
            .is_none_or(|active| active.id != sps.id)
        {
            warn!(sps_id = sps.id, "SPS changed at a picture that is not a random access point");
            return Ok(false);
        }
        self.parameter_sets.activate_pps(layer_id, pps.clone());

        let vps = self.parameter_sets.active_vps.clone();

        let poc = self
            .reference_ctx
            .picture_order_count(&header, &sps, self.no_rasl_output_flag);
        let reference_sets = self.reference_ctx.reference_picture_set(
            &header,
            &sps,
            vps.as_deref(),
            poc,
            self.no_rasl_output_flag,
            &mut self.dpb,
        );

        let output_needed = header.pic_output_flag && !(nal_unit_type.is_rasl() && self.no_rasl_output_flag);
        if random_access && no_output_of_prior_pics {
            self.dpb.clear_layer(layer_id);
        }

        let mut output = Vec::new();
        let slot = self.dpb.start_picture(
            poc,
            layer_id,
            output_needed,
            self.max_dec_pic_buffering as usize,
            &mut output,
        );
        self.display_pictures(output);

        let Some(picture) = self.client.allocate_picture_buffer() else {
            self.dpb.abort_picture();
            return Err(ParserError::BufferAllocationFailure("picture"));
        };
        let id = PictureId(self.next_picture_id);
        self.next_picture_id += 1;
        if let Some(entry) = self.dpb.entry_mut(slot) {
            entry.picture = Some((id, picture.clone()));
        }

        trace!(poc, slot, layer_id, ?nal_unit_type, "Picture start");
        self.frame_start = position;
        self.picture = Some(OpenPicture {
            intra: header.is_intra(),
            header,
            vps,
            sps,
            pps,
            slot,
            id,
            picture,
            poc,
            reference_sets,
        });
        Ok(true)
    }

    fn start_sequence(&mut self, sps: &Sps) -> Result<(), ParserError> {
        let vps = self.parameter_sets.active_vps.clone();
        let info = SequenceInfo::new(sps, vps.as_deref(), self.max_dec_pic_buffering);

        if self.sequence_info.as_ref() != Some(&info) {
            debug!(?info, "New sequence");
            let count = self.client.begin_sequence(&info);
            if count == 0 {
                self.decoder_init_failed = true;
                return Err(ParserError::SequenceRejected);
            }
            self.max_frame_buffers = count;
            self.display
                .set_frame_rate(info.frame_rate.map(|rate| (rate.numerator, rate.denominator)));
            self.sequence_info = Some(info);
        }

        let level_max_dpb_size = self
            .sequence_info
            .as_ref()
            .map_or(0, |info| info.min_num_dpb_slots);
        self.dpb
            .set_max_dpb_size(self.max_frame_buffers.min(level_max_dpb_size) as usize);
        Ok(())
    }

    /// Hands the open picture to the client and stores it in the DPB.
    fn end_of_picture(&mut self) {
        let Some(mut picture) = self.picture.take() else {
            return;
        };
        let bitstream = std::mem::take(&mut self.bitstream).freeze();
        let slice_offsets = std::mem::take(&mut self.slice_offsets);

        let entries = self.dpb.entries();
        let references = entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.is_occupied() && entry.marking.is_reference())
            .filter_map(|(dpb_slot, entry)| {
                let (_, handle) = entry.picture.as_ref()?;
                Some(ReferenceSlot {
                    dpb_slot,
                    poc: entry.poc,
                    long_term: entry.marking == ReferenceMarking::LongTerm,
                    picture: handle.clone(),
                })
            })
            .collect::<Vec<_>>();

        let is_valid = |slot: &usize| entries.get(*slot).is_some_and(|entry| entry.is_occupied());
        let sets = &mut picture.reference_sets;
        for list in [
            &mut sets.st_curr_before,
            &mut sets.st_curr_after,
            &mut sets.lt_curr,
            &mut sets.inter_layer0,
            &mut sets.inter_layer1,
        ] {
            list.retain(is_valid);
        }

        let header = &picture.header;
        let layer = picture
            .vps
            .as_ref()
            .and_then(|vps| vps.extension.as_ref())
            .filter(|_| header.layer_id > 0)
            .map(|extension| LayerInfo {
                nuh_layer_id: header.layer_id,
                default_ref_layers_active_flag: extension.default_ref_layers_active_flag,
                num_direct_ref_layers: extension.direct_ref_layers(header.layer_id).len() as u32,
                max_one_active_ref_layer_flag: extension.max_one_active_ref_layer_flag,
                poc_lsb_not_present_flag: extension
                    .poc_lsb_not_present_flag
                    .get(extension.layer_idx(header.layer_id))
                    .copied()
                    .unwrap_or(false),
                num_active_ref_layer_pics: header.num_active_ref_layer_pics,
            });

        let descriptor = PictureDescriptor {
            picture: picture.picture.clone(),
            dpb_slot: picture.slot,
            vps: picture.vps.clone(),
            sps: picture.sps.clone(),
            pps: picture.pps.clone(),
            vps_id: picture.sps.vps_id,
            sps_id: picture.sps.id,
            pps_id: picture.pps.id,
            irap_pic_flag: header.nal_unit_type.is_irap(),
            idr_pic_flag: header.nal_unit_type.is_idr(),
            intra_pic_flag: picture.intra,
            short_term_ref_pic_set_sps_flag: header.short_term_ref_pic_set_sps_flag,
            pic_order_cnt_val: picture.poc,
            num_bits_for_short_term_rps_in_slice: header.num_bits_for_short_term_rps,
            num_delta_pocs_of_ref_rps_idx: header.num_delta_pocs_of_ref_rps_idx,
            num_poc_total_curr: header.num_poc_total_curr,
            reference_sets: picture.reference_sets.clone(),
            references,
            layer,
            bitstream,
            slice_offsets,
        };

        self.display.picture_decoded(picture.id, picture.poc, self.frame_start);
        if !self.client.decode_picture(&descriptor) {
            warn!(poc = picture.poc, "The client failed to decode a picture");
            self.display.skip(picture.id);
        }

        let mut output = Vec::new();
        self.dpb
            .end_picture(picture.sps.max_num_reorder_pics as usize, &mut output);
        self.display_pictures(output);
    }

    fn display_pictures(&mut self, output: Vec<OutputPicture<C::Picture>>) {
        for picture in output {
            if let Some(pts) = self.display.display(picture.id) {
                trace!(poc = picture.poc, layer_id = picture.layer_id, pts, "Display picture");
                self.client.display_picture(&picture.picture, pts);
            }
        }
    }
}

fn allocate_bitstream<C: DecoderClient>(
    client: &mut C,
    options: &ParserOptions,
    min_size: usize,
    copy_from: Option<&[u8]>,
) -> Result<BytesMut, ParserError> {
    let request = BitstreamBufferRequest {
        min_size: min_size.max(options.min_bitstream_buffer_size),
        offset_alignment: options.bitstream_buffer_offset_alignment,
        size_alignment: options.bitstream_buffer_size_alignment,
    };
    client
        .allocate_bitstream_buffer(request, copy_from)
        .ok_or(ParserError::BufferAllocationFailure("bitstream"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{
        parameter_sets::ParameterSetKind,
        test_bitstream::{
            BitWriter, nal_unit,
            syntax::{self, SliceRps},
        },
    };

    const IDR_W_RADL: u8 = 19;
    const TRAIL_R: u8 = 1;

    #[derive(Debug, Default)]
    struct DecodedPicture {
        handle: u32,
        poc: i32,
        st_curr_before: Vec<usize>,
        references: Vec<usize>,
        bitstream: Vec<u8>,
        slice_offsets: Vec<u32>,
    }

    #[derive(Debug)]
    struct MockClient {
        surfaces: u32,
        accept_pictures: bool,
        sequences: Vec<SequenceInfo>,
        parameter_sets: Vec<(ParameterSetKind, u8, u32)>,
        decoded: Vec<DecodedPicture>,
        displayed: Vec<(u32, i64)>,
        unhandled: Vec<Vec<u8>>,
        next_picture: u32,
    }

    impl Default for MockClient {
        fn default() -> Self {
            Self {
                surfaces: 8,
                accept_pictures: true,
                sequences: Vec::new(),
                parameter_sets: Vec::new(),
                decoded: Vec::new(),
                displayed: Vec::new(),
                unhandled: Vec::new(),
                next_picture: 0,
            }
        }
    }

    impl MockClient {
        fn poc_of(&self, handle: u32) -> i32 {
            self.decoded
                .iter()
                .find(|picture| picture.handle == handle)
                .map(|picture| picture.poc)
                .unwrap()
        }

        fn displayed_pocs(&self) -> Vec<i32> {
            self.displayed.iter().map(|&(handle, _)| self.poc_of(handle)).collect()
        }
    }

    impl DecoderClient for MockClient {
        type Picture = u32;

        fn begin_sequence(&mut self, info: &SequenceInfo) -> u32 {
            self.sequences.push(info.clone());
            self.surfaces
        }

        fn allocate_picture_buffer(&mut self) -> Option<u32> {
            self.next_picture += 1;
            Some(self.next_picture)
        }

        fn update_parameter_set(&mut self, parameter_set: &ParameterSet, update_sequence_count: u32) {
            self.parameter_sets
                .push((parameter_set.kind(), parameter_set.id(), update_sequence_count));
        }

        fn decode_picture(&mut self, descriptor: &PictureDescriptor<u32>) -> bool {
            self.decoded.push(DecodedPicture {
                handle: descriptor.picture,
                poc: descriptor.pic_order_cnt_val,
                st_curr_before: descriptor.reference_sets.st_curr_before.clone(),
                references: descriptor.references.iter().map(|reference| reference.dpb_slot).collect(),
                bitstream: descriptor.bitstream.to_vec(),
                slice_offsets: descriptor.slice_offsets.clone(),
            });
            self.accept_pictures
        }

        fn display_picture(&mut self, picture: &u32, pts: i64) {
            self.displayed.push((*picture, pts));
        }

        fn unhandled_nal_unit(&mut self, data: &[u8]) {
            self.unhandled.push(data.to_vec());
        }
    }

    fn parameter_sets(max_dec_pic_buffering: u64, max_num_reorder: u64) -> Vec<u8> {
        [
            nal_unit(32, 0, 0, &syntax::vps(0)),
            nal_unit(33, 0, 0, &syntax::sps(0, max_dec_pic_buffering, max_num_reorder)),
            nal_unit(34, 0, 0, &syntax::pps(0, 0)),
        ]
        .concat()
    }

    fn idr() -> Vec<u8> {
        nal_unit(IDR_W_RADL, 0, 0, &syntax::slice(true, 0, 2, 0, &SliceRps::default()))
    }

    fn trail(poc: u64, negative: &[(i32, bool)], positive: &[(i32, bool)]) -> Vec<u8> {
        let rps = SliceRps {
            negative: negative.to_vec(),
            positive: positive.to_vec(),
        };
        let slice_type = match (negative.is_empty(), positive.is_empty()) {
            (true, true) => 2,
            (_, true) => 1,
            _ => 0,
        };
        nal_unit(TRAIL_R, 0, 0, &syntax::slice(false, 0, slice_type, poc, &rps))
    }

    fn parser() -> Parser<MockClient> {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        Parser::new(MockClient::default(), ParserOptions::default())
    }

    fn feed_all(parser: &mut Parser<MockClient>, data: &[u8]) {
        let packet = BitstreamPacket {
            data,
            end_of_stream: true,
            ..Default::default()
        };
        assert_eq!(parser.feed(packet).unwrap(), data.len());
    }

    #[test]
    fn reorders_display_by_poc() {
        let stream = [
            parameter_sets(5, 1),
            idr(),
            trail(4, &[(-4, true)], &[]),
            trail(2, &[(-2, true)], &[(2, true)]),
        ]
        .concat();
        let mut parser = parser();
        feed_all(&mut parser, &stream);

        let client = parser.client();
        assert_eq!(client.decoded.iter().map(|picture| picture.poc).collect::<Vec<_>>(), vec![0, 4, 2]);
        assert_eq!(client.displayed_pocs(), vec![0, 2, 4]);
        assert_eq!(client.decoded[2].st_curr_before.len(), 1);
    }

    #[test]
    fn hands_slices_with_start_codes_to_the_client() {
        let stream = [parameter_sets(5, 1), idr()].concat();
        let mut parser = parser();
        feed_all(&mut parser, &stream);

        let client = parser.client();
        assert_eq!(client.sequences.len(), 1);
        assert_eq!(client.sequences[0].coded_width, 64);

        let picture = &client.decoded[0];
        assert_eq!(picture.slice_offsets, vec![0]);
        assert_eq!(picture.bitstream, idr());
        assert_eq!(
            client.parameter_sets,
            vec![
                (ParameterSetKind::Video, 0, 0),
                (ParameterSetKind::Sequence, 0, 0),
                (ParameterSetKind::Picture, 0, 0),
            ]
        );
    }

    #[test]
    fn rejects_sps_with_id_past_table_and_keeps_decoding() {
        let stream = [
            parameter_sets(5, 0),
            idr(),
            nal_unit(33, 0, 0, &syntax::sps_with_size(16, 128, 128, 5, 0)),
            trail(1, &[(-1, true)], &[]),
        ]
        .concat();
        let mut parser = parser();
        let packet = BitstreamPacket {
            data: &stream,
            end_of_picture: true,
            ..Default::default()
        };
        parser.feed(packet).unwrap();

        assert_eq!(parser.parameter_sets.active_sps(0).unwrap().id, 0);
        assert_eq!(parser.parameter_sets.active_sps(0).unwrap().pic_width_in_luma_samples, 64);

        let client = parser.client();
        assert_eq!(client.decoded.iter().map(|picture| picture.poc).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(client.decoded[1].st_curr_before, vec![0]);
        assert!(
            !client
                .parameter_sets
                .iter()
                .any(|&(kind, id, _)| kind == ParameterSetKind::Sequence && id == 16)
        );
    }

    #[test]
    fn discards_malformed_parameter_sets_and_keeps_decoding() {
        let stream = [
            parameter_sets(5, 0),
            idr(),
            nal_unit(33, 0, 0, &syntax::sps_with_ctb_size_diff(0, 0xffff_fffe)),
            nal_unit(32, 0, 0, &syntax::vps_with_split_dimensions(&[8, 8, 8, 8, 8])),
            trail(1, &[(-1, true)], &[]),
        ]
        .concat();
        let mut parser = parser();
        parser
            .feed(BitstreamPacket {
                data: &stream,
                end_of_picture: true,
                ..Default::default()
            })
            .unwrap();

        assert_eq!(parser.parameter_sets.sps(0).unwrap().log2_ctb_size(), 4);
        assert_eq!(parser.parameter_sets.vps(0).unwrap().max_layers_minus1, 0);

        let client = parser.client();
        assert_eq!(client.decoded.iter().map(|picture| picture.poc).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(client.decoded[1].st_curr_before, vec![0]);
        assert_eq!(client.parameter_sets.len(), 3);
    }

    #[test]
    fn substitutes_lost_reference_and_still_decodes() {
        let stream = [parameter_sets(5, 0), idr(), trail(8, &[(-4, true)], &[])].concat();
        let mut parser = parser();
        feed_all(&mut parser, &stream);

        let client = parser.client();
        assert_eq!(client.decoded.len(), 2);
        assert_eq!(client.decoded[1].poc, 8);
        assert_eq!(client.decoded[1].st_curr_before, vec![0]);
        assert_eq!(client.decoded[1].references, vec![0]);
    }

    #[test]
    fn end_of_stream_drains_dpb_in_poc_order() {
        let stream = [
            parameter_sets(5, 4),
            idr(),
            trail(6, &[], &[]),
            trail(2, &[], &[]),
            trail(4, &[], &[]),
        ]
        .concat();
        let mut parser = parser();
        parser
            .feed(BitstreamPacket {
                data: &stream,
                end_of_picture: true,
                ..Default::default()
            })
            .unwrap();

        assert!(parser.client().displayed.is_empty());
        assert_eq!(parser.dpb_fullness(), 4);

        parser.end_of_stream().unwrap();

        assert_eq!(parser.client().displayed_pocs(), vec![0, 2, 4, 6]);
        assert_eq!(parser.dpb_fullness(), 0);
        assert!(parser.sequence_info.is_none());
        assert!(parser.parameter_sets.sps(0).is_none());
    }

    #[test]
    fn passes_timestamps_through() {
        let mut parser = parser();
        let first = [parameter_sets(5, 0), idr()].concat();
        let second = trail(1, &[(-1, true)], &[]);

        for (data, pts) in [(&first, 1000), (&second, 4000)] {
            parser
                .feed(BitstreamPacket {
                    data,
                    pts: Some(pts),
                    end_of_picture: true,
                    ..Default::default()
                })
                .unwrap();
        }

        let pts: Vec<_> = parser.client().displayed.iter().map(|&(_, pts)| pts).collect();
        assert_eq!(pts, vec![1000, 4000]);
    }

    #[test]
    fn detects_picture_boundary_in_partial_unit() {
        let options = ParserOptions {
            min_bytes_for_boundary_detection: 3,
            ..Default::default()
        };
        let mut parser = Parser::new(MockClient::default(), options);
        let stream = [parameter_sets(5, 0), idr(), trail(1, &[(-1, true)], &[])].concat();

        let split = stream.len() - 1;
        parser
            .feed(BitstreamPacket {
                data: &stream[..split],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(parser.client().decoded.len(), 1);

        parser
            .feed(BitstreamPacket {
                data: &stream[split..],
                end_of_stream: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(parser.client().decoded.len(), 2);
        assert_eq!(parser.client().displayed_pocs(), vec![0, 1]);
    }

    #[test]
    fn rejected_sequence_stops_the_parser() {
        let client = MockClient {
            surfaces: 0,
            ..Default::default()
        };
        let mut parser = Parser::new(client, ParserOptions::default());
        let stream = [parameter_sets(5, 0), idr()].concat();

        let packet = BitstreamPacket {
            data: &stream,
            end_of_picture: true,
            ..Default::default()
        };
        assert!(matches!(parser.feed(packet), Err(ParserError::SequenceRejected)));
        assert!(matches!(parser.feed(packet), Err(ParserError::DecoderInitFailed)));
        assert!(parser.client().decoded.is_empty());
    }

    #[test]
    fn pictures_the_client_fails_to_decode_are_not_displayed() {
        let client = MockClient {
            accept_pictures: false,
            ..Default::default()
        };
        let mut parser = Parser::new(client, ParserOptions::default());
        feed_all(&mut parser, &[parameter_sets(5, 0), idr()].concat());

        assert_eq!(parser.client().decoded.len(), 1);
        assert!(parser.client().displayed.is_empty());
    }

    #[test]
    fn forwards_unspecified_units_and_reads_sei() {
        let mut sei = BitWriter::default();
        sei.u(8, 137).u(8, 24);
        for value in [13250, 34500, 7500, 3000, 34000, 16000, 15635, 16450] {
            sei.u(16, value);
        }
        sei.u(32, 10_000_000).u(32, 50);

        let stream = [
            parameter_sets(5, 0),
            nal_unit(39, 0, 0, &sei.finish_rbsp()),
            nal_unit(48, 0, 0, &[0x12, 0x34]),
            idr(),
        ]
        .concat();
        let mut parser = parser();
        parser
            .feed(BitstreamPacket {
                data: &stream,
                end_of_picture: true,
                ..Default::default()
            })
            .unwrap();

        assert_eq!(parser.client().unhandled, vec![vec![0x60, 0x01, 0x12, 0x34]]);
        let mastering = parser.display_mastering_info().unwrap();
        assert_eq!(mastering.white_point, (15635, 16450));
        assert_eq!(parser.client().decoded.len(), 1);
    }

    #[test]
    fn discontinuity_decodes_pending_picture() {
        let mut parser = parser();
        let first = [parameter_sets(5, 0), idr()].concat();
        parser
            .feed(BitstreamPacket {
                data: &first,
                ..Default::default()
            })
            .unwrap();
        assert!(parser.client().decoded.is_empty());

        parser
            .feed(BitstreamPacket {
                data: &idr(),
                pts: Some(90_000),
                discontinuity: true,
                end_of_picture: true,
                ..Default::default()
            })
            .unwrap();

        assert_eq!(parser.client().decoded.len(), 2);
        assert_eq!(parser.client().displayed_pocs(), vec![0, 0]);
        assert_eq!(parser.client().displayed[1].1, 90_000);
    }
}
