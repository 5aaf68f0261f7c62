pub mod local;
pub mod tcp;

use thiserror::Error;

/// Logical channel carrying fixed-width command records.
pub const COMMAND_TAG: u32 = 0;
/// Logical channel carrying variable-length payload words.
pub const DATA_TAG: u32 = 1;

// Wire codes for the two element types, doubling as their byte widths.
pub(crate) const ELEM_INT: u8 = 4;
pub(crate) const ELEM_WORD: u8 = 8;

/// Source selector for a blocking receive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Source {
    /// Accept a record from any rank.
    Any,
    /// Accept only a record sent by this rank.
    Rank(usize),
}

impl Source {
    pub(crate) fn matches(&self, rank: usize) -> bool {
        match self {
            Source::Any => true,
            Source::Rank(wanted) => *wanted == rank,
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("rank {0} cannot address itself")]
    SelfAddressed(usize),
    #[error("rank {0} outside cluster of size {1}")]
    RankOverflow(usize, usize),
    #[error("received {got} elements instead of {expected}")]
    RecvSizeMismatch { expected: usize, got: usize },
    #[error("received element type {got} instead of {expected}")]
    ElementTypeMismatch { expected: u8, got: u8 },
    #[error("cluster connection closed under rank {0}")]
    Disconnected(usize),
}

/// Blocking, typed, tagged point-to-point port the communicator runs on.
///
/// Implementations must deliver records FIFO per (sender, tag) pair and
/// must reject self-addressed sends. A receive completes only with a record
/// of exactly the requested element count; anything else is an error, not a
/// partial read.
pub trait Transport: Send + Sync {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Transmit `buf.len()` 32-bit words to `dest` on `tag`, blocking until
    /// the transport has accepted the record.
    fn send_ints(&self, buf: &[i32], dest: usize, tag: u32) -> Result<(), TransportError>;

    /// Blocking receive of exactly `buf.len()` 32-bit words on `tag`.
    /// Returns the sending rank.
    fn recv_ints(&self, buf: &mut [i32], source: Source, tag: u32)
        -> Result<usize, TransportError>;

    /// Transmit `buf.len()` 64-bit words to `dest` on `tag`.
    fn send_words(&self, buf: &[u64], dest: usize, tag: u32) -> Result<(), TransportError>;

    /// Blocking receive of exactly `buf.len()` 64-bit words on `tag`.
    /// Returns the sending rank.
    fn recv_words(&self, buf: &mut [u64], source: Source, tag: u32)
        -> Result<usize, TransportError>;
}
