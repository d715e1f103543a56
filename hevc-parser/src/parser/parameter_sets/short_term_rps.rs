use crate::parser::bit_reader::BitReader;

use super::{ParameterSetError, ensure_range};

pub const MAX_SHORT_TERM_REF_PICS: usize = 16;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RpsEntry {
    pub delta_poc: i32,
    pub used_by_curr_pic: bool,
}

/// `st_ref_pic_set(stRpsIdx)` with the derived `DeltaPocS0`/`DeltaPocS1` lists (7.4.8).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShortTermRefPicSet {
    pub inter_ref_pic_set_prediction_flag: bool,
    pub delta_idx_minus1: u32,
    pub delta_rps_sign: bool,
    pub abs_delta_rps_minus1: u32,
    /// Negative deltas, closest picture first.
    pub negative: Vec<RpsEntry>,
    /// Positive deltas, closest picture first.
    pub positive: Vec<RpsEntry>,
}

impl ShortTermRefPicSet {
    pub fn num_delta_pocs(&self) -> usize {
        self.negative.len() + self.positive.len()
    }

    /// Parses set number `idx` out of `num_short_term_ref_pic_sets`. `idx == num` is the set
    /// signalled in a slice header. `previous` holds the sets with indices below `idx`.
    pub(crate) fn parse(
        reader: &mut BitReader,
        idx: usize,
        num_short_term_ref_pic_sets: usize,
        previous: &[ShortTermRefPicSet],
    ) -> Result<Self, ParameterSetError> {
        let inter_ref_pic_set_prediction_flag = idx != 0 && reader.flag();

        if inter_ref_pic_set_prediction_flag {
            Self::parse_predicted(reader, idx, num_short_term_ref_pic_sets, previous)
        } else {
            Self::parse_explicit(reader)
        }
    }

    fn parse_predicted(
        reader: &mut BitReader,
        idx: usize,
        num_short_term_ref_pic_sets: usize,
        previous: &[ShortTermRefPicSet],
    ) -> Result<Self, ParameterSetError> {
        let delta_idx_minus1 = if idx == num_short_term_ref_pic_sets {
            reader.ue()
        } else {
            0
        };
        ensure_range("delta_idx_minus1", delta_idx_minus1, 0..=idx as i64 - 1)?;

        let delta_rps_sign = reader.flag();
        let abs_delta_rps_minus1 = ensure_range("abs_delta_rps_minus1", reader.ue(), 0..=(1 << 15) - 1)?;
        let delta_rps = (1 - 2 * delta_rps_sign as i32) * (abs_delta_rps_minus1 as i32 + 1);

        let reference = previous
            .get(idx - (delta_idx_minus1 as usize + 1))
            .ok_or(ParameterSetError::IncorrectData(
                "inter predicted RPS refers to a missing set".into(),
            ))?;
        let ref_negative = reference.negative.len();

        // (used_by_curr_pic_flag, use_delta_flag), negative entries first then positive then
        // the reference picture itself
        let flags = (0..=reference.num_delta_pocs())
            .map(|_| {
                let used = reader.flag();
                let use_delta = used || reader.flag();
                (used, use_delta)
            })
            .collect::<Vec<_>>();
        let own = flags[reference.num_delta_pocs()];

        let mut negative = Vec::new();
        for (j, entry) in reference.positive.iter().enumerate().rev() {
            let delta_poc = entry.delta_poc + delta_rps;
            let (used, use_delta) = flags[ref_negative + j];
            if delta_poc < 0 && use_delta {
                negative.push(RpsEntry {
                    delta_poc,
                    used_by_curr_pic: used,
                });
            }
        }
        if delta_rps < 0 && own.1 {
            negative.push(RpsEntry {
                delta_poc: delta_rps,
                used_by_curr_pic: own.0,
            });
        }
        for (j, entry) in reference.negative.iter().enumerate() {
            let delta_poc = entry.delta_poc + delta_rps;
            let (used, use_delta) = flags[j];
            if delta_poc < 0 && use_delta {
                negative.push(RpsEntry {
                    delta_poc,
                    used_by_curr_pic: used,
                });
            }
        }

        let mut positive = Vec::new();
        for (j, entry) in reference.negative.iter().enumerate().rev() {
            let delta_poc = entry.delta_poc + delta_rps;
            let (used, use_delta) = flags[j];
            if delta_poc > 0 && use_delta {
                positive.push(RpsEntry {
                    delta_poc,
                    used_by_curr_pic: used,
                });
            }
        }
        if delta_rps > 0 && own.1 {
            positive.push(RpsEntry {
                delta_poc: delta_rps,
                used_by_curr_pic: own.0,
            });
        }
        for (j, entry) in reference.positive.iter().enumerate() {
            let delta_poc = entry.delta_poc + delta_rps;
            let (used, use_delta) = flags[ref_negative + j];
            if delta_poc > 0 && use_delta {
                positive.push(RpsEntry {
                    delta_poc,
                    used_by_curr_pic: used,
                });
            }
        }

        ensure_range(
            "NumNegativePics + NumPositivePics",
            (negative.len() + positive.len()) as i64,
            0..=MAX_SHORT_TERM_REF_PICS as i64,
        )?;

        Ok(Self {
            inter_ref_pic_set_prediction_flag: true,
            delta_idx_minus1,
            delta_rps_sign,
            abs_delta_rps_minus1,
            negative,
            positive,
        })
    }

    fn parse_explicit(reader: &mut BitReader) -> Result<Self, ParameterSetError> {
        let max = MAX_SHORT_TERM_REF_PICS as i64;
        let num_negative_pics = ensure_range("num_negative_pics", reader.ue(), 0..=max)?;
        let num_positive_pics = ensure_range("num_positive_pics", reader.ue(), 0..=max)?;
        ensure_range(
            "num_negative_pics + num_positive_pics",
            num_negative_pics as i64 + num_positive_pics as i64,
            0..=max,
        )?;

        let mut read_entries = |count: u32, sign: i32, field: &'static str| {
            let mut delta_poc = 0;
            (0..count)
                .map(|_| -> Result<RpsEntry, ParameterSetError> {
                    let delta_poc_minus1 = ensure_range(field, reader.ue(), 0..=(1 << 15) - 1)?;
                    delta_poc += sign * (delta_poc_minus1 as i32 + 1);
                    Ok(RpsEntry {
                        delta_poc,
                        used_by_curr_pic: reader.flag(),
                    })
                })
                .collect::<Result<Vec<_>, ParameterSetError>>()
        };
        let negative = read_entries(num_negative_pics, -1, "delta_poc_s0_minus1")?;
        let positive = read_entries(num_positive_pics, 1, "delta_poc_s1_minus1")?;

        Ok(Self {
            negative,
            positive,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::test_bitstream::BitWriter;

    fn entries(list: &[RpsEntry]) -> Vec<(i32, bool)> {
        list.iter().map(|e| (e.delta_poc, e.used_by_curr_pic)).collect()
    }

    #[test]
    fn parses_explicit_set() {
        let mut w = BitWriter::default();
        w.ue(2).ue(1);
        w.ue(0).flag(true).ue(1).flag(false);
        w.ue(3).flag(true);
        let data = w.finish();

        let mut reader = BitReader::new(&data, false);
        let rps = ShortTermRefPicSet::parse(&mut reader, 0, 1, &[]).unwrap();

        assert_eq!(entries(&rps.negative), vec![(-1, true), (-3, false)]);
        assert_eq!(entries(&rps.positive), vec![(4, true)]);
        assert!(!rps.inter_ref_pic_set_prediction_flag);
    }

    #[test]
    fn rejects_too_many_pictures() {
        let mut w = BitWriter::default();
        w.ue(10).ue(7);
        let data = w.finish();

        let mut reader = BitReader::new(&data, false);
        assert!(ShortTermRefPicSet::parse(&mut reader, 0, 1, &[]).is_err());
    }

    #[test]
    fn rejects_delta_poc_wider_than_15_bits() {
        let mut w = BitWriter::default();
        w.ue(1).ue(1);
        w.ue(0).flag(true);
        w.ue(1 << 15).flag(true);
        let data = w.finish();

        let mut reader = BitReader::new(&data, false);
        assert!(matches!(
            ShortTermRefPicSet::parse(&mut reader, 0, 1, &[]),
            Err(ParameterSetError::OutOfRange { field: "delta_poc_s1_minus1", .. })
        ));
    }

    #[test]
    fn predicts_from_previous_set() {
        let reference = ShortTermRefPicSet {
            negative: vec![
                RpsEntry { delta_poc: -1, used_by_curr_pic: true },
                RpsEntry { delta_poc: -3, used_by_curr_pic: true },
            ],
            positive: vec![RpsEntry { delta_poc: 2, used_by_curr_pic: true }],
            ..Default::default()
        };

        let mut w = BitWriter::default();
        // inter_ref_pic_set_prediction_flag, delta_idx_minus1 (slice header set)
        w.flag(true).ue(0);
        // delta_rps = -1
        w.flag(true).ue(0);
        // entries -1, -3, +2 and the reference picture itself, all used
        w.flag(true).flag(true).flag(true).flag(true);
        let data = w.finish();

        let mut reader = BitReader::new(&data, false);
        let rps = ShortTermRefPicSet::parse(&mut reader, 1, 1, &[reference]).unwrap();

        assert!(rps.inter_ref_pic_set_prediction_flag);
        assert_eq!(entries(&rps.negative), vec![(-1, true), (-2, true), (-4, true)]);
        assert_eq!(entries(&rps.positive), vec![(1, true)]);
    }

    #[test]
    fn rejects_prediction_from_missing_set() {
        let mut w = BitWriter::default();
        w.flag(true).ue(3);
        let data = w.finish();

        let mut reader = BitReader::new(&data, false);
        assert!(ShortTermRefPicSet::parse(&mut reader, 1, 1, &[]).is_err());
    }
}
