/// Number of consecutive zero bytes seen right before the next byte to fetch.
///
/// After two zero bytes, a `0x03` byte is an emulation prevention byte and is dropped.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ZeroRun {
    #[default]
    None,
    One,
    TwoOrMore,
}

impl ZeroRun {
    fn after(self, byte: u8) -> Self {
        match (byte, self) {
            (0, ZeroRun::None) => ZeroRun::One,
            (0, _) => ZeroRun::TwoOrMore,
            _ => ZeroRun::None,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ByteState {
    /// Offset of the next byte to fetch. Keeps growing past the end of the data.
    pub(crate) position: usize,
    pub(crate) zero_run: ZeroRun,
    /// Number of emulation prevention bytes dropped so far.
    pub(crate) removed: usize,
}

/// Fetches one RBSP byte. Bytes past the end of `data` read as zero.
pub(crate) fn next_byte(data: &[u8], state: ByteState, emulation_prevention: bool) -> (u8, ByteState) {
    let fetch = |position: usize| data.get(position).copied().unwrap_or(0);

    let mut position = state.position;
    let mut removed = state.removed;
    let mut zero_run = state.zero_run;
    let mut byte = fetch(position);
    position += 1;

    if emulation_prevention {
        if zero_run == ZeroRun::TwoOrMore && byte == 0x03 {
            byte = fetch(position);
            position += 1;
            removed += 1;
            zero_run = ZeroRun::None;
        }
        zero_run = zero_run.after(byte);
    }

    (
        byte,
        ByteState {
            position,
            zero_run,
            removed,
        },
    )
}

/// MSB-first reader over an RBSP with transparent removal of emulation prevention bytes.
///
/// Reading past the end of the data never fails, it yields zero bits. Callers are expected
/// to range check what they read.
#[derive(Debug, Clone)]
pub(crate) struct BitReader<'a> {
    data: &'a [u8],
    state: ByteState,
    emulation_prevention: bool,
    /// 32-bit shift register, the next unread bit is at `32 - consumed` counted from the LSB.
    register: u32,
    consumed: u32,
}

impl<'a> BitReader<'a> {
    pub(crate) fn new(data: &'a [u8], emulation_prevention: bool) -> Self {
        let mut reader = Self {
            data,
            state: ByteState::default(),
            emulation_prevention,
            register: 0,
            consumed: 32,
        };
        reader.skip(0);
        reader
    }

    fn peek(&self, n: u32) -> u32 {
        if n == 0 {
            return 0;
        }
        let aligned = ((self.register as u64) << self.consumed) & 0xffff_ffff;
        (aligned >> (32 - n)) as u32
    }

    pub(crate) fn skip(&mut self, n: u32) {
        self.consumed += n;
        while self.consumed >= 8 {
            let (byte, state) = next_byte(self.data, self.state, self.emulation_prevention);
            self.state = state;
            self.register = (self.register << 8) | byte as u32;
            self.consumed -= 8;
        }
    }

    /// Reads `n` bits, `n` in `0..=32`.
    pub(crate) fn u(&mut self, n: u32) -> u32 {
        if n == 0 {
            return 0;
        }
        if n + self.consumed <= 32 {
            let bits = self.peek(n);
            self.skip(n);
            bits
        } else {
            let high = self.peek(n - 25) << 25;
            self.skip(n - 25);
            let low = self.peek(25);
            self.skip(25);
            high | low
        }
    }

    pub(crate) fn flag(&mut self) -> bool {
        self.u(1) != 0
    }

    /// Unsigned Exp-Golomb.
    pub(crate) fn ue(&mut self) -> u32 {
        let mut leading_zeros = 0;
        while leading_zeros < 32 && self.u(1) == 0 {
            leading_zeros += 1;
        }

        if leading_zeros < 32 {
            ((1u64 << leading_zeros) - 1 + self.u(leading_zeros) as u64) as u32
        } else {
            u32::MAX.wrapping_add(self.u(32))
        }
    }

    /// Signed Exp-Golomb.
    pub(crate) fn se(&mut self) -> i32 {
        let code = self.ue();
        if code & 1 == 1 {
            ((code >> 1) as i32).wrapping_add(1)
        } else {
            -((code >> 1) as i32)
        }
    }

    pub(crate) fn is_byte_aligned(&self) -> bool {
        self.consumed & 7 == 0
    }

    pub(crate) fn byte_align(&mut self) {
        self.skip((8 - (self.consumed & 7)) & 7);
    }

    pub(crate) fn is_at_end(&self) -> bool {
        self.state.position >= self.data.len()
    }

    /// `true` while non-zero bits remain after the next bit, i.e. before the RBSP stop bit.
    pub(crate) fn more_rbsp_data(&self) -> bool {
        let after_next = ((self.register as u64) << (self.consumed + 1)) & 0xffff_ffff;
        after_next != 0 || !self.is_at_end()
    }

    /// Bits read so far, not counting emulation prevention bytes.
    pub(crate) fn consumed_bits(&self) -> usize {
        (self.state.position - self.state.removed) * 8 - (32 - self.consumed) as usize
    }

    pub(crate) fn available_bits(&self) -> usize {
        let remaining = self.data.len() as i64 - self.state.position as i64;
        (remaining * 8 + (32 - self.consumed) as i64).max(0) as usize
    }
}
