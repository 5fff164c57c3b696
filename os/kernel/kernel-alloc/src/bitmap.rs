//! Frame bitmaps: one bit per frame, set when the frame is reserved or in use.

const BITS_PER_WORD: usize = u32::BITS as usize;

/// A bitmap over `bits` frames stored in borrowed `u32` words.
///
/// Bits past `bits` in the last word are kept clear, so
/// [`count_ones`](Self::count_ones) equals the number of set frames.
pub struct Bitmap<'a> {
    words: &'a mut [u32],
    bits: usize,
}

impl<'a> Bitmap<'a> {
    /// Number of words needed for `bits` bits.
    #[inline]
    #[must_use]
    pub const fn words_for(bits: usize) -> usize {
        bits.div_ceil(BITS_PER_WORD)
    }

    /// Wrap `words`, clearing them.
    ///
    /// # Panics
    /// If `words` is too short for `bits`.
    pub fn new(words: &'a mut [u32], bits: usize) -> Self {
        assert!(words.len() >= Self::words_for(bits), "bitmap storage too small");
        words.fill(0);
        Self { words, bits }
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.bits
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bits == 0
    }

    #[inline]
    #[must_use]
    pub fn words(&self) -> &[u32] {
        &self.words[..Self::words_for(self.bits)]
    }

    #[inline]
    #[must_use]
    pub fn test(&self, bit: usize) -> bool {
        debug_assert!(bit < self.bits);
        self.words[bit / BITS_PER_WORD] & (1 << (bit % BITS_PER_WORD)) != 0
    }

    #[inline]
    pub fn set(&mut self, bit: usize) {
        debug_assert!(bit < self.bits);
        self.words[bit / BITS_PER_WORD] |= 1 << (bit % BITS_PER_WORD);
    }

    #[inline]
    pub fn clear(&mut self, bit: usize) {
        debug_assert!(bit < self.bits);
        self.words[bit / BITS_PER_WORD] &= !(1 << (bit % BITS_PER_WORD));
    }

    /// Set every bit.
    pub fn set_all(&mut self) {
        let n = Self::words_for(self.bits);
        self.words[..n].fill(u32::MAX);
        let tail = self.bits % BITS_PER_WORD;
        if tail != 0 {
            self.words[n - 1] = (1 << tail) - 1;
        }
    }

    /// Index of the lowest clear bit.
    #[must_use]
    pub fn first_unset(&self) -> Option<usize> {
        self.words()
            .iter()
            .enumerate()
            .find(|(_, w)| **w != u32::MAX)
            .map(|(i, w)| i * BITS_PER_WORD + w.trailing_ones() as usize)
            .filter(|&bit| bit < self.bits)
    }

    #[must_use]
    pub fn count_ones(&self) -> usize {
        self.words().iter().map(|w| w.count_ones() as usize).sum()
    }
}
