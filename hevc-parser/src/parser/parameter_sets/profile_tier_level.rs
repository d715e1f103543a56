use tracing::warn;

use crate::parser::bit_reader::BitReader;

/// Levels from Table A.8. `general_level_idc` is 30 times the level number.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    L1_0,
    L2_0,
    L2_1,
    L3_0,
    L3_1,
    L4_0,
    L4_1,
    L5_0,
    L5_1,
    L5_2,
    L6_0,
    L6_1,
    #[default]
    L6_2,
}

impl Level {
    /// Unknown values map to the highest level.
    pub fn from_level_idc(level_idc: u8) -> Self {
        match level_idc {
            30 => Self::L1_0,
            60 => Self::L2_0,
            63 => Self::L2_1,
            90 => Self::L3_0,
            93 => Self::L3_1,
            120 => Self::L4_0,
            123 => Self::L4_1,
            150 => Self::L5_0,
            153 => Self::L5_1,
            156 => Self::L5_2,
            180 => Self::L6_0,
            183 => Self::L6_1,
            186 => Self::L6_2,
            _ => {
                warn!(level_idc, "Invalid general_level_idc, assuming level 6.2");
                Self::L6_2
            }
        }
    }

    /// `MaxLumaPs`, maximum luma picture size in samples.
    pub fn max_luma_picture_size(self) -> u32 {
        match self {
            Self::L1_0 => 36_864,
            Self::L2_0 => 122_880,
            Self::L2_1 => 245_760,
            Self::L3_0 => 552_960,
            Self::L3_1 => 983_040,
            Self::L4_0 | Self::L4_1 => 2_228_224,
            Self::L5_0 | Self::L5_1 | Self::L5_2 => 8_912_896,
            Self::L6_0 | Self::L6_1 | Self::L6_2 => 35_651_584,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProfileTierLevel {
    pub general_profile_space: u8,
    pub general_tier_flag: bool,
    /// Zero when the profile is not signalled.
    pub general_profile_idc: u8,
    pub general_profile_compatibility_flags: u32,
    pub general_level_idc: u8,
    pub general_level: Level,
}

impl ProfileTierLevel {
    /// `profile_tier_level(profilePresentFlag, maxNumSubLayersMinus1)`
    pub(crate) fn parse(reader: &mut BitReader, profile_present: bool, max_sub_layers_minus1: u8) -> Self {
        let mut ptl = Self::default();

        if profile_present {
            ptl.general_profile_space = reader.u(2) as u8;
            ptl.general_tier_flag = reader.flag();
            ptl.general_profile_idc = reader.u(5) as u8;
            ptl.general_profile_compatibility_flags = reader.u(32);
            // progressive, interlaced, non packed, frame only and the reserved 43 + 1 bits
            reader.u(24);
            reader.u(24);
        }

        ptl.general_level_idc = reader.u(8) as u8;
        ptl.general_level = Level::from_level_idc(ptl.general_level_idc);

        if max_sub_layers_minus1 > 0 {
            // 2 bits per sub-layer, padded with reserved bits up to 8 sub-layers
            let present_flags = reader.u(16);
            for i in 0..max_sub_layers_minus1 as u32 {
                let sub_layer_profile_present = (present_flags >> (15 - 2 * i)) & 1 == 1;
                let sub_layer_level_present = (present_flags >> (14 - 2 * i)) & 1 == 1;
                if sub_layer_profile_present {
                    reader.u(8);
                    reader.u(32);
                    reader.u(24);
                    reader.u(24);
                }
                if sub_layer_level_present {
                    reader.u(8);
                }
            }
        }

        ptl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::test_bitstream::BitWriter;

    #[test]
    fn parses_general_and_sub_layer_fields() {
        let mut w = BitWriter::default();
        w.u(2, 0).flag(true).u(5, 2).u(32, 0x2000_0000).u(48, 0);
        w.u(8, 153);
        // sub-layer 0 has profile and level, sub-layer 1 only level
        w.u(16, 0b1101_0000_0000_0000);
        w.u(88, 0).u(8, 120);
        w.u(8, 93);
        w.u(8, 0x5a);
        let data = w.finish();

        let mut reader = BitReader::new(&data, false);
        let ptl = ProfileTierLevel::parse(&mut reader, true, 2);

        assert!(ptl.general_tier_flag);
        assert_eq!(ptl.general_profile_idc, 2);
        assert_eq!(ptl.general_level, Level::L5_1);
        assert_eq!(reader.u(8), 0x5a);
    }

    #[test]
    fn maps_unknown_level_to_highest() {
        assert_eq!(Level::from_level_idc(91), Level::L6_2);
        assert_eq!(Level::from_level_idc(63).max_luma_picture_size(), 245_760);
    }
}
