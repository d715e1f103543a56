use super::bit_reader::BitReader;

/// `nal_unit_type` values (Table 7-1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NalUnitType {
    TrailN,
    TrailR,
    TsaN,
    TsaR,
    StsaN,
    StsaR,
    RadlN,
    RadlR,
    RaslN,
    RaslR,
    BlaWLp,
    BlaWRadl,
    BlaNLp,
    IdrWRadl,
    IdrNLp,
    Cra,
    Vps,
    Sps,
    Pps,
    AccessUnitDelimiter,
    EndOfSequence,
    EndOfBitstream,
    FillerData,
    PrefixSei,
    SuffixSei,
    Reserved(u8),
    Unspecified(u8),
}

impl NalUnitType {
    pub fn from_id(id: u8) -> Self {
        match id {
            0 => Self::TrailN,
            1 => Self::TrailR,
            2 => Self::TsaN,
            3 => Self::TsaR,
            4 => Self::StsaN,
            5 => Self::StsaR,
            6 => Self::RadlN,
            7 => Self::RadlR,
            8 => Self::RaslN,
            9 => Self::RaslR,
            16 => Self::BlaWLp,
            17 => Self::BlaWRadl,
            18 => Self::BlaNLp,
            19 => Self::IdrWRadl,
            20 => Self::IdrNLp,
            21 => Self::Cra,
            32 => Self::Vps,
            33 => Self::Sps,
            34 => Self::Pps,
            35 => Self::AccessUnitDelimiter,
            36 => Self::EndOfSequence,
            37 => Self::EndOfBitstream,
            38 => Self::FillerData,
            39 => Self::PrefixSei,
            40 => Self::SuffixSei,
            48..=63 => Self::Unspecified(id),
            _ => Self::Reserved(id),
        }
    }

    pub fn id(self) -> u8 {
        match self {
            Self::TrailN => 0,
            Self::TrailR => 1,
            Self::TsaN => 2,
            Self::TsaR => 3,
            Self::StsaN => 4,
            Self::StsaR => 5,
            Self::RadlN => 6,
            Self::RadlR => 7,
            Self::RaslN => 8,
            Self::RaslR => 9,
            Self::BlaWLp => 16,
            Self::BlaWRadl => 17,
            Self::BlaNLp => 18,
            Self::IdrWRadl => 19,
            Self::IdrNLp => 20,
            Self::Cra => 21,
            Self::Vps => 32,
            Self::Sps => 33,
            Self::Pps => 34,
            Self::AccessUnitDelimiter => 35,
            Self::EndOfSequence => 36,
            Self::EndOfBitstream => 37,
            Self::FillerData => 38,
            Self::PrefixSei => 39,
            Self::SuffixSei => 40,
            Self::Reserved(id) | Self::Unspecified(id) => id,
        }
    }

    pub fn is_slice(self) -> bool {
        matches!(self.id(), 0..=9 | 16..=21)
    }

    /// Intra random access point: BLA, IDR or CRA.
    pub fn is_irap(self) -> bool {
        matches!(self.id(), 16..=21)
    }

    pub fn is_bla(self) -> bool {
        matches!(self, Self::BlaWLp | Self::BlaWRadl | Self::BlaNLp)
    }

    pub fn is_idr(self) -> bool {
        matches!(self, Self::IdrWRadl | Self::IdrNLp)
    }

    pub fn is_cra(self) -> bool {
        self == Self::Cra
    }

    pub fn is_rasl(self) -> bool {
        matches!(self, Self::RaslN | Self::RaslR)
    }

    /// RADL or RASL.
    pub fn is_leading(self) -> bool {
        matches!(self.id(), 6..=9)
    }

    /// Sub-layer non-reference picture, not used for reference by pictures of the same sub-layer.
    pub fn is_sub_layer_non_reference(self) -> bool {
        matches!(self.id(), 0..=14) && self.id() % 2 == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalUnitHeader {
    pub nal_unit_type: NalUnitType,
    pub layer_id: u8,
    pub temporal_id: u8,
}

impl NalUnitHeader {
    /// Reads `nal_unit_header()`. Returns `None` for a set forbidden bit or a zero
    /// `nuh_temporal_id_plus1`.
    pub(crate) fn parse(reader: &mut BitReader) -> Option<Self> {
        let forbidden_and_type = reader.u(7);
        let layer_id = reader.u(6) as u8;
        let temporal_id_plus1 = reader.u(3) as u8;

        if forbidden_and_type > 0x3f || temporal_id_plus1 == 0 {
            return None;
        }

        Some(Self {
            nal_unit_type: NalUnitType::from_id(forbidden_and_type as u8),
            layer_id,
            temporal_id: temporal_id_plus1 - 1,
        })
    }
}

/// Peeks at the start of a NAL unit payload (the bytes after the start code) and decides
/// whether it begins a new picture (7.4.2.4.4).
///
/// `open_picture_type` is the unit type of the picture currently being assembled, if any.
pub(crate) fn starts_new_picture(
    payload: &[u8],
    open_picture_type: Option<NalUnitType>,
    emulation_prevention: bool,
) -> bool {
    if payload.len() < 2 {
        return false;
    }
    let mut reader = BitReader::new(payload, emulation_prevention);
    let Some(header) = NalUnitHeader::parse(&mut reader) else {
        return false;
    };

    match header.nal_unit_type.id() {
        // parameter sets, AUD, EOS, EOB and reserved prefix units
        32..=37 | 41..=47 => true,
        _ if header.nal_unit_type.is_slice() => {
            if open_picture_type.is_some_and(|open| open != header.nal_unit_type) {
                return true;
            }
            // first_slice_segment_in_pic_flag
            reader.flag()
        }
        _ => false,
    }
}
