use std::sync::LazyLock;

use bytes::{BufMut, Bytes, BytesMut};
use memchr::memmem::Finder;

const START_CODE: [u8; 3] = [0, 0, 1];

/// A complete NAL unit cut out of the byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NalUnit {
    /// Header and payload, without the start code and trailing zero bytes.
    pub(crate) data: Bytes,
    /// Stream position of the unit's start code.
    pub(crate) position: u64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    /// Looking for the first start code.
    #[default]
    Scanning,
    /// `buffer` starts with the start code of a unit whose end has not been seen yet.
    UnitOpen,
}

/// Splits an Annex B byte stream into NAL units.
#[derive(Debug, Default)]
pub(crate) struct NaluSplitter {
    buffer: BytesMut,
    /// Stream position of `buffer[0]`.
    buffer_position: u64,
    state: ScanState,
    previous_search_end: usize,
    head_checked: bool,
}

fn find_start_code(buf: &[u8]) -> Option<usize> {
    static FINDER: LazyLock<Finder> = LazyLock::new(|| Finder::new(&START_CODE));

    FINDER.find(buf)
}

fn trim_trailing_zeros(mut unit: BytesMut) -> Bytes {
    let len = unit.iter().rposition(|&byte| byte != 0).map_or(0, |last| last + 1);
    unit.truncate(len);
    unit.freeze()
}

impl NaluSplitter {
    /// Stream position of the next byte to be pushed.
    pub(crate) fn position(&self) -> u64 {
        self.buffer_position + self.buffer.len() as u64
    }

    pub(crate) fn push(&mut self, bytestream: &[u8]) -> Vec<NalUnit> {
        self.buffer.put(bytestream);
        let mut result = Vec::new();

        if self.state == ScanState::Scanning {
            match find_start_code(&self.buffer) {
                Some(start) => {
                    self.advance(start);
                    self.state = ScanState::UnitOpen;
                    self.previous_search_end = START_CODE.len();
                    self.head_checked = false;
                }
                None => {
                    // Keep a possible partial start code.
                    let garbage = self.buffer.len().saturating_sub(START_CODE.len() - 1);
                    self.advance(garbage);
                    return result;
                }
            }
        }

        while let Some(i) = find_start_code(&self.buffer[self.previous_search_end..]) {
            let end = self.previous_search_end + i;
            let position = self.buffer_position;
            let mut unit = self.buffer.split_to(end);
            self.buffer_position += end as u64;
            self.previous_search_end = START_CODE.len();
            self.head_checked = false;

            let _ = unit.split_to(START_CODE.len());
            result.push(NalUnit {
                data: trim_trailing_zeros(unit),
                position,
            });
        }

        // Rescan the last bytes, a start code may continue in the next push.
        self.previous_search_end = self
            .buffer
            .len()
            .saturating_sub(START_CODE.len() - 1)
            .max(START_CODE.len());

        result
    }

    /// Returns the first bytes of the unit that is still being received, once at least
    /// `min_bytes` of it are buffered. Each unit is returned at most once.
    pub(crate) fn peek_open_unit(&mut self, min_bytes: usize) -> Option<&[u8]> {
        if self.state != ScanState::UnitOpen || self.head_checked {
            return None;
        }
        let payload = &self.buffer[START_CODE.len()..];
        if payload.len() < min_bytes.max(2) {
            return None;
        }
        self.head_checked = true;
        Some(&self.buffer[START_CODE.len()..])
    }

    /// Treats the end of the buffered data as the end of the open unit.
    pub(crate) fn flush(&mut self) -> Option<NalUnit> {
        let state = std::mem::take(&mut self.state);
        let position = self.buffer_position;
        let buffered = self.buffer.len();
        let mut unit = self.buffer.split();
        self.buffer_position += buffered as u64;
        self.previous_search_end = 0;
        self.head_checked = false;

        if state != ScanState::UnitOpen {
            return None;
        }
        let _ = unit.split_to(START_CODE.len());
        let data = trim_trailing_zeros(unit);
        if data.is_empty() {
            return None;
        }
        Some(NalUnit { data, position })
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }

    fn advance(&mut self, count: usize) {
        let _ = self.buffer.split_to(count);
        self.buffer_position += count as u64;
    }
}
