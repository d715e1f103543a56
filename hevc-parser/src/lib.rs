//! An HEVC (H.265) elementary stream parser for hardware video decoders.
//!
//! # Overview
//!
//! The parser takes an Annex B byte stream in arbitrarily sized chunks, splits it into NAL
//! units, parses the parameter sets and slice headers, derives picture order counts and
//! reference picture sets, and manages the decoded picture buffer. It does not decode any
//! pixels. Instead, a [`DecoderClient`] is told when a sequence starts, gets a
//! [`PictureDescriptor`] with everything a hardware decoder needs for each picture, and is told
//! when decoded pictures should be displayed and with which timestamps.
//!
//! Single layer streams, multiview (MV-HEVC) and scalable (SHVC) streams are supported.
//!
//! # Usage
//!
//! ```no_run
//! use hevc_parser::{BitstreamPacket, DecoderClient, Parser, ParserOptions, PictureDescriptor, SequenceInfo};
//!
//! struct Client {
//!     next_picture: u32,
//! }
//!
//! impl DecoderClient for Client {
//!     type Picture = u32;
//!
//!     fn begin_sequence(&mut self, info: &SequenceInfo) -> u32 {
//!         info.min_num_decode_surfaces
//!     }
//!
//!     fn allocate_picture_buffer(&mut self) -> Option<u32> {
//!         self.next_picture += 1;
//!         Some(self.next_picture)
//!     }
//!
//!     fn decode_picture(&mut self, descriptor: &PictureDescriptor<u32>) -> bool {
//!         // submit descriptor.bitstream to the hardware decoder
//!         true
//!     }
//!
//!     fn display_picture(&mut self, picture: &u32, pts: i64) {}
//! }
//!
//! fn parse(mut reader: impl std::io::Read) -> Result<(), Box<dyn std::error::Error>> {
//!     let mut parser = Parser::new(Client { next_picture: 0 }, ParserOptions::default());
//!     let mut buffer = vec![0; 4096];
//!
//!     loop {
//!         let n = reader.read(&mut buffer)?;
//!         parser.feed(BitstreamPacket {
//!             data: &buffer[..n],
//!             end_of_stream: n == 0,
//!             ..Default::default()
//!         })?;
//!         if n == 0 {
//!             return Ok(());
//!         }
//!     }
//! }
//! ```

mod client;
mod config;
mod display;
mod dpb;
mod parser;

pub use client::{
    BitstreamBufferRequest, DecoderClient, FrameRate, LayerInfo, PictureDescriptor, Profile, ReferenceSlot,
    SequenceInfo, VideoSignalInfo,
};
pub use config::{DpbOverflowPolicy, ParserOptions};
pub use dpb::PictureId;
pub use parser::{
    BitstreamPacket, DisplayMasteringInfo, LongTermRef, NalUnitType, ParameterSetError, Parser, ParserError,
    ReferencePictureSets, SliceHeaderError, SliceType, parameter_sets,
};
