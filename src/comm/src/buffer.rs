/// Reusable buffer of 64-bit payload words.
///
/// Grows by doubling when a payload exceeds the current capacity and never
/// shrinks. Growth discards previous contents: outgoing buffers are freshly
/// filled before every transmission and incoming buffers are overwritten by
/// the next receive, so nothing needs to survive a reallocation.
pub struct WordBuffer {
    words: Vec<u64>,
}

impl WordBuffer {
    pub fn with_capacity(words: usize) -> Self {
        WordBuffer {
            words: vec![0; words.max(1)],
        }
    }

    pub fn capacity(&self) -> usize {
        self.words.len()
    }

    pub fn ensure_capacity(&mut self, required: usize) {
        if required <= self.words.len() {
            return;
        }
        let mut capacity = self.words.len();
        while required > capacity {
            capacity *= 2;
        }
        self.words = vec![0; capacity];
    }

    pub fn slice(&self, len: usize) -> &[u64] {
        &self.words[..len]
    }

    pub fn slice_mut(&mut self, len: usize) -> &mut [u64] {
        &mut self.words[..len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_to_power_of_two_multiple() {
        let mut buf = WordBuffer::with_capacity(8);
        buf.ensure_capacity(100);
        let capacity = buf.capacity();
        assert!(capacity >= 100);
        // doubling from 8 can only land on 8 * 2^k
        assert_eq!(capacity % 8, 0);
        assert!((capacity / 8).is_power_of_two());
        assert_eq!(capacity, 128);
    }

    #[test]
    fn never_shrinks() {
        let mut buf = WordBuffer::with_capacity(8);
        buf.ensure_capacity(1000);
        let grown = buf.capacity();
        buf.ensure_capacity(3);
        assert_eq!(buf.capacity(), grown);
    }

    #[test]
    fn exact_fit_does_not_grow() {
        let mut buf = WordBuffer::with_capacity(16);
        buf.ensure_capacity(16);
        assert_eq!(buf.capacity(), 16);
    }

    #[test]
    fn zero_capacity_still_doubles() {
        let mut buf = WordBuffer::with_capacity(0);
        assert_eq!(buf.capacity(), 1);
        buf.ensure_capacity(5);
        assert_eq!(buf.capacity(), 8);
    }
}
