use tracing::{debug, warn};

use super::bit_reader::BitReader;

const MASTERING_DISPLAY_COLOUR_VOLUME: u32 = 137;

/// `mastering_display_colour_volume()` (D.2.28). Chromaticities are in units of 0.00002,
/// luminance in units of 0.0001 candela per square metre.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DisplayMasteringInfo {
    /// Green, blue and red primaries as `(x, y)`.
    pub display_primaries: [(u16, u16); 3],
    pub white_point: (u16, u16),
    pub max_display_mastering_luminance: u32,
    pub min_display_mastering_luminance: u32,
}

impl DisplayMasteringInfo {
    fn parse(reader: &mut BitReader) -> Self {
        let mut display_primaries = [(0, 0); 3];
        for primary in display_primaries.iter_mut() {
            *primary = (reader.u(16) as u16, reader.u(16) as u16);
        }

        Self {
            display_primaries,
            white_point: (reader.u(16) as u16, reader.u(16) as u16),
            max_display_mastering_luminance: reader.u(32),
            min_display_mastering_luminance: reader.u(32),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeiMessage {
    MasteringDisplayColourVolume(DisplayMasteringInfo),
}

/// Runs the `sei_message()` loop over an SEI RBSP and returns the messages the parser
/// understands. Other payloads are skipped.
pub(crate) fn parse_sei_rbsp(reader: &mut BitReader) -> Vec<SeiMessage> {
    let mut messages = Vec::new();

    while reader.available_bits() >= 3 * 8 {
        let payload_type = read_sei_value(reader);
        let payload_size = read_sei_value(reader);

        if reader.available_bits() < payload_size as usize * 8 {
            warn!(
                payload_type,
                payload_size,
                available = reader.available_bits() / 8,
                "Ignoring truncated SEI message"
            );
            break;
        }

        let start = reader.consumed_bits();
        match payload_type {
            MASTERING_DISPLAY_COLOUR_VOLUME => {
                messages.push(SeiMessage::MasteringDisplayColourVolume(DisplayMasteringInfo::parse(
                    reader,
                )));
            }
            _ => debug!(payload_type, payload_size, "Skipping SEI message"),
        }

        let used = reader.consumed_bits() - start;
        let skip = (payload_size as usize * 8).saturating_sub(used);
        reader.skip(skip as u32);
    }

    messages
}

/// `payload_type` / `payload_size`: a run of 0xff bytes followed by the last byte.
fn read_sei_value(reader: &mut BitReader) -> u32 {
    let mut value = 0;
    loop {
        let byte = reader.u(8);
        value += byte;
        if byte != 0xff || reader.available_bits() < 8 {
            return value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::test_bitstream::BitWriter;

    #[test]
    fn parses_mastering_display_colour_volume() {
        let mut w = BitWriter::default();
        // user_data_unregistered with 3 bytes, skipped
        w.u(8, 5).u(8, 3).u(24, 0xabcdef);
        w.u(8, 137).u(8, 24);
        w.u(16, 13250).u(16, 34500);
        w.u(16, 7500).u(16, 3000);
        w.u(16, 34000).u(16, 16000);
        w.u(16, 15635).u(16, 16450);
        w.u(32, 10_000_000).u(32, 50);
        let data = w.finish_rbsp();

        let mut reader = BitReader::new(&data, false);
        let messages = parse_sei_rbsp(&mut reader);

        assert_eq!(
            messages,
            vec![SeiMessage::MasteringDisplayColourVolume(DisplayMasteringInfo {
                display_primaries: [(13250, 34500), (7500, 3000), (34000, 16000)],
                white_point: (15635, 16450),
                max_display_mastering_luminance: 10_000_000,
                min_display_mastering_luminance: 50,
            })]
        );
    }

    #[test]
    fn reads_extended_payload_type() {
        let data = [0xff, 0x02, 0x07];
        let mut reader = BitReader::new(&data, false);

        assert_eq!(read_sei_value(&mut reader), 257);
        assert_eq!(read_sei_value(&mut reader), 7);
    }

    #[test]
    fn stops_at_truncated_payload() {
        let mut w = BitWriter::default();
        w.u(8, 137).u(8, 24).u(16, 1);
        let data = w.finish_rbsp();

        let mut reader = BitReader::new(&data, false);
        assert!(parse_sei_rbsp(&mut reader).is_empty());
    }
}
