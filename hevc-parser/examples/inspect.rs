use hevc_parser::{BitstreamPacket, DecoderClient, Parser, ParserOptions, PictureDescriptor, SequenceInfo};

/// Prints what a hardware decoder would be asked to do.
struct PrintingClient {
    next_picture: u32,
}

impl DecoderClient for PrintingClient {
    type Picture = u32;

    fn begin_sequence(&mut self, info: &SequenceInfo) -> u32 {
        println!("sequence: {info:?}");
        info.min_num_decode_surfaces
    }

    fn allocate_picture_buffer(&mut self) -> Option<u32> {
        self.next_picture += 1;
        Some(self.next_picture)
    }

    fn decode_picture(&mut self, descriptor: &PictureDescriptor<u32>) -> bool {
        println!(
            "decode: picture {} poc {} slot {} slices {} refs {:?}",
            descriptor.picture,
            descriptor.pic_order_cnt_val,
            descriptor.dpb_slot,
            descriptor.slice_offsets.len(),
            descriptor.reference_sets,
        );
        true
    }

    fn display_picture(&mut self, picture: &u32, pts: i64) {
        println!("display: picture {picture} pts {pts}");
    }
}

fn main() {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(tracing::Level::INFO)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to initialize tracing");

    let args = std::env::args().collect::<Vec<_>>();
    if args.len() != 2 {
        println!("usage: {} FILENAME", args[0]);
        return;
    }

    let h265_bytestream = std::fs::read(&args[1]).unwrap_or_else(|_| panic!("read {}", args[1]));

    let mut parser = Parser::new(PrintingClient { next_picture: 0 }, ParserOptions::default());

    for chunk in h265_bytestream.chunks(4096) {
        let packet = BitstreamPacket {
            data: chunk,
            ..Default::default()
        };
        parser.feed(packet).unwrap();
    }

    parser.end_of_stream().unwrap();

    if let Some(mastering) = parser.display_mastering_info() {
        println!("mastering display: {mastering:?}");
    }
}
