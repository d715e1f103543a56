use crate::parser::bit_reader::BitReader;

use super::{ParameterSetError, ensure_range};

/// Table 7-6, intra then inter, in coefficient scan order.
const DEFAULT_SCALING_LIST_8X8: [[u8; 64]; 2] = [
    [
        16, 16, 16, 16, 16, 16, 16, 16, 16, 16, 17, 16, 17, 16, 17, 18, 17, 18, 18, 17, 18, 21, 19,
        20, 21, 20, 19, 21, 24, 22, 22, 24, 24, 22, 22, 24, 25, 25, 27, 30, 27, 25, 25, 29, 31, 35,
        35, 31, 29, 36, 41, 44, 41, 36, 47, 54, 54, 47, 65, 70, 65, 88, 88, 115,
    ],
    [
        16, 16, 16, 16, 16, 16, 16, 16, 16, 16, 17, 17, 17, 17, 17, 18, 18, 18, 18, 18, 18, 20, 20,
        20, 20, 20, 20, 20, 24, 24, 24, 24, 24, 24, 24, 24, 25, 25, 25, 25, 25, 25, 25, 28, 28, 28,
        28, 28, 28, 33, 33, 33, 33, 33, 41, 41, 41, 41, 54, 54, 54, 71, 71, 91,
    ],
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalingListEntry {
    pub scaling_list_pred_mode_flag: bool,
    pub scaling_list_pred_matrix_id_delta: u32,
    pub scaling_list_dc_coef_minus8: i32,
    pub scaling_list_delta_coef: Vec<i8>,
}

impl Default for ScalingListEntry {
    fn default() -> Self {
        Self {
            scaling_list_pred_mode_flag: false,
            scaling_list_pred_matrix_id_delta: 0,
            scaling_list_dc_coef_minus8: 8,
            scaling_list_delta_coef: Vec::new(),
        }
    }
}

/// `scaling_list_data()`, indexed by `[sizeId][matrixId]`. The default value selects the
/// default lists of Table 7-5 and 7-6.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalingList {
    pub entries: [Vec<ScalingListEntry>; 4],
}

impl Default for ScalingList {
    fn default() -> Self {
        Self {
            entries: std::array::from_fn(|size_id| {
                vec![ScalingListEntry::default(); matrix_count(size_id)]
            }),
        }
    }
}

fn matrix_count(size_id: usize) -> usize {
    if size_id == 3 { 2 } else { 6 }
}

impl ScalingList {
    pub(crate) fn parse(reader: &mut BitReader) -> Result<Self, ParameterSetError> {
        let mut list = Self::default();

        for size_id in 0..4 {
            for matrix_id in 0..matrix_count(size_id) {
                let entry = &mut list.entries[size_id][matrix_id];
                entry.scaling_list_pred_mode_flag = reader.flag();

                if !entry.scaling_list_pred_mode_flag {
                    entry.scaling_list_pred_matrix_id_delta = ensure_range(
                        "scaling_list_pred_matrix_id_delta",
                        reader.ue(),
                        0..=matrix_id as i64,
                    )?;
                    continue;
                }

                let coef_num = 64usize.min(1 << (4 + (size_id << 1)));
                let mut next_coef = 8;
                if size_id > 1 {
                    entry.scaling_list_dc_coef_minus8 =
                        ensure_range("scaling_list_dc_coef_minus8", reader.se(), -7..=247)?;
                    next_coef = entry.scaling_list_dc_coef_minus8 + 8;
                }

                entry.scaling_list_delta_coef = Vec::with_capacity(coef_num);
                for _ in 0..coef_num {
                    let delta = ensure_range("scaling_list_delta_coef", reader.se(), -128..=127)?;
                    next_coef = (next_coef + delta) & 0xff;
                    if next_coef == 0 {
                        return Err(ParameterSetError::IncorrectData(
                            "zero ScalingList entry".into(),
                        ));
                    }
                    entry.scaling_list_delta_coef.push(delta as i8);
                }
            }
        }

        Ok(list)
    }

    /// Derives the final `ScalingFactor` values handed to the decoder.
    pub fn factors(&self) -> ScalingFactors {
        let mut factors = ScalingFactors::flat();

        for (matrix_id, entry) in self.entries[0].iter().enumerate() {
            factors.list_4x4[matrix_id] = if entry.scaling_list_pred_mode_flag {
                explicit_coefficients(entry, 8)
            } else if entry.scaling_list_pred_matrix_id_delta != 0 {
                factors.list_4x4[matrix_id - entry.scaling_list_pred_matrix_id_delta as usize]
            } else {
                [16; 16]
            };
        }

        fill_8x8(&self.entries[1], &mut factors.list_8x8, None, 1);
        fill_8x8(
            &self.entries[2],
            &mut factors.list_16x16,
            Some(&mut factors.dc_16x16[..]),
            2,
        );
        fill_8x8(
            &self.entries[3],
            &mut factors.list_32x32,
            Some(&mut factors.dc_32x32[..]),
            3,
        );

        factors
    }
}

fn explicit_coefficients<const N: usize>(entry: &ScalingListEntry, start: i32) -> [u8; N] {
    let mut next_coef = start;
    std::array::from_fn(|k| {
        let delta = entry.scaling_list_delta_coef.get(k).copied().unwrap_or(0);
        next_coef = (next_coef + delta as i32) & 0xff;
        next_coef as u8
    })
}

fn fill_8x8(entries: &[ScalingListEntry], lists: &mut [[u8; 64]], mut dc: Option<&mut [u8]>, size_id: usize) {
    for (matrix_id, entry) in entries.iter().enumerate() {
        let (list, dc_value) = if entry.scaling_list_pred_mode_flag {
            let start = if size_id < 2 {
                8
            } else {
                entry.scaling_list_dc_coef_minus8 + 8
            };
            (
                explicit_coefficients(entry, start),
                (entry.scaling_list_dc_coef_minus8 + 8) as u8,
            )
        } else if entry.scaling_list_pred_matrix_id_delta != 0 {
            let ref_matrix_id = matrix_id - entry.scaling_list_pred_matrix_id_delta as usize;
            let dc_value = dc.as_deref().map_or(16, |dc| dc[ref_matrix_id]);
            (lists[ref_matrix_id], dc_value)
        } else {
            let inter = matrix_id >= if size_id == 3 { 1 } else { 3 };
            let default = DEFAULT_SCALING_LIST_8X8[inter as usize];
            (default, default[0])
        };

        lists[matrix_id] = list;
        if let Some(dc) = dc.as_deref_mut() {
            dc[matrix_id] = dc_value;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalingFactors {
    pub list_4x4: [[u8; 16]; 6],
    pub list_8x8: [[u8; 64]; 6],
    pub list_16x16: [[u8; 64]; 6],
    pub list_32x32: [[u8; 64]; 2],
    pub dc_16x16: [u8; 6],
    pub dc_32x32: [u8; 2],
}

impl ScalingFactors {
    /// Used when scaling lists are disabled.
    pub fn flat() -> Self {
        Self {
            list_4x4: [[16; 16]; 6],
            list_8x8: [[16; 64]; 6],
            list_16x16: [[16; 64]; 6],
            list_32x32: [[16; 64]; 2],
            dc_16x16: [16; 6],
            dc_32x32: [16; 2],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::test_bitstream::BitWriter;

    #[test]
    fn derives_default_lists() {
        let factors = ScalingList::default().factors();

        assert_eq!(factors.list_4x4[5], [16; 16]);
        assert_eq!(factors.list_8x8[0][63], 115);
        assert_eq!(factors.list_8x8[3][63], 91);
        assert_eq!(factors.list_32x32[1][63], 91);
        assert_eq!(factors.dc_16x16, [16; 6]);
    }

    #[test]
    fn parses_explicit_and_copied_lists() {
        let mut w = BitWriter::default();
        for size_id in 0..4 {
            for matrix_id in 0..matrix_count(size_id) {
                if size_id == 0 && matrix_id == 0 {
                    // explicit 4x4 list, ramp of 8 + k + 1
                    w.flag(true);
                    for _ in 0..16 {
                        w.se(1);
                    }
                } else if size_id == 0 && matrix_id == 1 {
                    // copy of matrix 0
                    w.flag(false).ue(1);
                } else if size_id == 2 && matrix_id == 0 {
                    // explicit 16x16 list with dc = 20, flat
                    w.flag(true).se(12);
                    for _ in 0..64 {
                        w.se(0);
                    }
                } else {
                    w.flag(false).ue(0);
                }
            }
        }
        let data = w.finish();

        let mut reader = BitReader::new(&data, false);
        let list = ScalingList::parse(&mut reader).unwrap();
        let factors = list.factors();

        assert_eq!(factors.list_4x4[0][0], 9);
        assert_eq!(factors.list_4x4[0][15], 24);
        assert_eq!(factors.list_4x4[1], factors.list_4x4[0]);
        assert_eq!(factors.list_16x16[0], [20; 64]);
        assert_eq!(factors.dc_16x16[0], 20);
        assert_eq!(factors.dc_16x16[1], 16);
    }

    #[test]
    fn rejects_invalid_reference_matrix() {
        let mut w = BitWriter::default();
        w.flag(false).ue(1);
        let data = w.finish();

        let mut reader = BitReader::new(&data, false);
        assert!(ScalingList::parse(&mut reader).is_err());
    }
}
