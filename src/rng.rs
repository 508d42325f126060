/// Deterministic random numbers for `RAND*` functions and `RESEED`.
pub trait RandomSource {
    fn seed(&mut self, value: u32);

    fn next_u32(&mut self) -> u32;

    /// Inclusive on both ends; an inverted range is swapped.
    fn range(&mut self, min: i32, max: i32) -> i32 {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        let span = (max as i64 - min as i64 + 1) as u64;
        (min as i64 + (self.next_u32() as u64 % span) as i64) as i32
    }

    fn byte(&mut self) -> u8 {
        (self.next_u32() >> 24) as u8
    }

    fn word(&mut self) -> u16 {
        (self.next_u32() >> 16) as u16
    }

    fn long(&mut self) -> u32 {
        self.next_u32()
    }
}

#[derive(Debug, Clone)]
pub struct XorShift32 {
    state: u32,
}

impl XorShift32 {
    const DEFAULT_STATE: u32 = 0x2545_F491;

    pub fn new(seed: u32) -> Self {
        let mut rng = Self { state: 0 };
        rng.seed(seed);
        rng
    }
}

impl RandomSource for XorShift32 {
    fn seed(&mut self, value: u32) {
        // zero is a fixed point of xorshift
        self.state = if value == 0 {
            Self::DEFAULT_STATE
        } else {
            value
        };
    }

    fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }
}
