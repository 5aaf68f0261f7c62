use crate::message::ProtocolError;

/// Serialization contract between the communicator and the parameter-set
/// representation used by the exploration engine.
///
/// The codec value carries the fixed ordering context both ends of a
/// connection agreed on before any job was exchanged; decoding a payload
/// with a different context than the one it was encoded under is undefined.
pub trait ColorCodec: Send + Sync + 'static {
    type Colors: Send + 'static;

    /// Number of 64-bit words [`encode`](Self::encode) fills for `colors`.
    fn word_len(&self, colors: &Self::Colors) -> usize;

    /// Serialize into `buf`, which holds exactly `word_len` words.
    fn encode(&self, colors: &Self::Colors, buf: &mut [u64]);

    /// Inverse of [`encode`](Self::encode) under the same ordering context.
    fn decode(&self, words: &[u64]) -> Result<Self::Colors, ProtocolError>;
}

/// A parameter-space subset as a bit vector: bit `i` set means parameter
/// cell `i` is part of the set. The default color representation of the
/// exploration engine; richer representations plug in via [`ColorCodec`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BitColors {
    cells: usize,
    bits: Vec<u64>,
}

fn words_for(cells: usize) -> usize {
    ((cells + 63) / 64).max(1)
}

impl BitColors {
    pub fn empty(cells: usize) -> Self {
        BitColors {
            cells,
            bits: vec![0; words_for(cells)],
        }
    }

    pub fn full(cells: usize) -> Self {
        let mut colors = BitColors::empty(cells);
        for cell in 0..cells {
            colors.set(cell);
        }
        colors
    }

    pub fn set(&mut self, cell: usize) {
        assert!(cell < self.cells, "cell {} outside universe {}", cell, self.cells);
        self.bits[cell / 64] |= 1 << (cell % 64);
    }

    pub fn contains(&self, cell: usize) -> bool {
        cell < self.cells && self.bits[cell / 64] & (1 << (cell % 64)) != 0
    }

    pub fn union_with(&mut self, other: &BitColors) {
        assert_eq!(self.cells, other.cells);
        for (word, bits) in self.bits.iter_mut().zip(&other.bits) {
            *word |= bits;
        }
    }

    pub fn intersect_with(&mut self, other: &BitColors) {
        assert_eq!(self.cells, other.cells);
        for (word, bits) in self.bits.iter_mut().zip(&other.bits) {
            *word &= bits;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|word| *word == 0)
    }
}

/// Codec for [`BitColors`]; the universe size is the ordering context.
#[derive(Clone, Copy, Debug)]
pub struct BitColorCodec {
    cells: usize,
}

impl BitColorCodec {
    pub fn new(cells: usize) -> Self {
        BitColorCodec { cells }
    }
}

impl ColorCodec for BitColorCodec {
    type Colors = BitColors;

    fn word_len(&self, colors: &BitColors) -> usize {
        colors.bits.len()
    }

    fn encode(&self, colors: &BitColors, buf: &mut [u64]) {
        buf.copy_from_slice(&colors.bits);
    }

    fn decode(&self, words: &[u64]) -> Result<BitColors, ProtocolError> {
        if words.len() != words_for(self.cells) {
            return Err(ProtocolError::MalformedColors(format!(
                "expected {} words for a universe of {} cells, got {}",
                words_for(self.cells),
                self.cells,
                words.len()
            )));
        }
        Ok(BitColors {
            cells: self.cells,
            bits: words.to_vec(),
        })
    }
}
