use std::collections::VecDeque;
use std::sync::Mutex;

use crossbeam::channel::{unbounded, Receiver, Sender};

use super::{Source, Transport, TransportError, ELEM_INT, ELEM_WORD};

#[derive(Debug)]
enum Payload {
    Ints(Vec<i32>),
    Words(Vec<u64>),
}

impl Payload {
    fn elem_type(&self) -> u8 {
        match self {
            Payload::Ints(_) => ELEM_INT,
            Payload::Words(_) => ELEM_WORD,
        }
    }
}

#[derive(Debug)]
struct Frame {
    src: usize,
    tag: u32,
    payload: Payload,
}

/// In-process transport: every rank is a thread of the same process and
/// records travel over unbounded channels. Used by the test harness and by
/// single-host deployments of the exploration engine.
pub struct LocalTransport {
    rank: usize,
    peers: Vec<Sender<Frame>>,
    inbox: Receiver<Frame>,
    // Frames taken off the inbox while waiting for a different (source,
    // tag); drained in arrival order before the inbox so per-sender FIFO
    // is preserved.
    pending: Mutex<VecDeque<Frame>>,
}

pub struct LocalCluster;

impl LocalCluster {
    /// Wire up a cluster of `size` ranks, one transport per rank, index in
    /// the returned vector = rank.
    pub fn new(size: usize) -> Vec<LocalTransport> {
        let (txs, rxs): (Vec<_>, Vec<_>) = (0..size).map(|_| unbounded()).unzip();
        rxs.into_iter()
            .enumerate()
            .map(|(rank, inbox)| LocalTransport {
                rank,
                peers: txs.clone(),
                inbox,
                pending: Mutex::new(VecDeque::new()),
            })
            .collect()
    }
}

impl LocalTransport {
    fn post(&self, dest: usize, tag: u32, payload: Payload) -> Result<(), TransportError> {
        if dest == self.rank {
            return Err(TransportError::SelfAddressed(self.rank));
        }
        let tx = self
            .peers
            .get(dest)
            .ok_or(TransportError::RankOverflow(dest, self.peers.len()))?;
        let frame = Frame {
            src: self.rank,
            tag,
            payload,
        };
        tx.send(frame)
            .map_err(|_| TransportError::Disconnected(self.rank))
    }

    fn take_frame(&self, source: Source, tag: u32) -> Result<Frame, TransportError> {
        let mut pending = self.pending.lock().unwrap();
        if let Some(idx) = pending
            .iter()
            .position(|frame| frame.tag == tag && source.matches(frame.src))
        {
            // remove (not swap_remove) keeps arrival order for later scans
            return Ok(pending.remove(idx).unwrap());
        }
        loop {
            let frame = self
                .inbox
                .recv()
                .map_err(|_| TransportError::Disconnected(self.rank))?;
            if frame.tag == tag && source.matches(frame.src) {
                return Ok(frame);
            }
            pending.push_back(frame);
        }
    }
}

fn check_len(expected: usize, got: usize) -> Result<(), TransportError> {
    if expected != got {
        return Err(TransportError::RecvSizeMismatch { expected, got });
    }
    Ok(())
}

impl Transport for LocalTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn send_ints(&self, buf: &[i32], dest: usize, tag: u32) -> Result<(), TransportError> {
        self.post(dest, tag, Payload::Ints(buf.to_vec()))
    }

    fn recv_ints(
        &self,
        buf: &mut [i32],
        source: Source,
        tag: u32,
    ) -> Result<usize, TransportError> {
        let frame = self.take_frame(source, tag)?;
        match frame.payload {
            Payload::Ints(words) => {
                check_len(buf.len(), words.len())?;
                buf.copy_from_slice(&words);
                Ok(frame.src)
            }
            other => Err(TransportError::ElementTypeMismatch {
                expected: ELEM_INT,
                got: other.elem_type(),
            }),
        }
    }

    fn send_words(&self, buf: &[u64], dest: usize, tag: u32) -> Result<(), TransportError> {
        self.post(dest, tag, Payload::Words(buf.to_vec()))
    }

    fn recv_words(
        &self,
        buf: &mut [u64],
        source: Source,
        tag: u32,
    ) -> Result<usize, TransportError> {
        let frame = self.take_frame(source, tag)?;
        match frame.payload {
            Payload::Words(words) => {
                check_len(buf.len(), words.len())?;
                buf.copy_from_slice(&words);
                Ok(frame.src)
            }
            other => Err(TransportError::ElementTypeMismatch {
                expected: ELEM_WORD,
                got: other.elem_type(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_source_receive_returns_sender() {
        let mut cluster = LocalCluster::new(2);
        let b = cluster.pop().unwrap();
        let a = cluster.pop().unwrap();

        a.send_ints(&[1, 2, 3], 1, 0).unwrap();
        let mut buf = [0i32; 3];
        let src = b.recv_ints(&mut buf, Source::Any, 0).unwrap();
        assert_eq!(src, 0);
        assert_eq!(buf, [1, 2, 3]);
    }

    #[test]
    fn qualified_receive_parks_other_senders() {
        let mut cluster = LocalCluster::new(3);
        let c = cluster.pop().unwrap();
        let b = cluster.pop().unwrap();
        let a = cluster.pop().unwrap();

        c.send_words(&[30], 1, 1).unwrap();
        a.send_words(&[10], 1, 1).unwrap();

        // wait until both frames sit in b's inbox so the order is fixed
        while b.inbox.len() < 2 {
            std::thread::yield_now();
        }

        let mut buf = [0u64; 1];
        let src = b.recv_words(&mut buf, Source::Rank(0), 1).unwrap();
        assert_eq!((src, buf[0]), (0, 10));

        // the parked frame from rank 2 is still deliverable
        let src = b.recv_words(&mut buf, Source::Rank(2), 1).unwrap();
        assert_eq!((src, buf[0]), (2, 30));
    }

    #[test]
    fn tags_do_not_cross() {
        let mut cluster = LocalCluster::new(2);
        let b = cluster.pop().unwrap();
        let a = cluster.pop().unwrap();

        a.send_ints(&[7], 1, 1).unwrap();
        a.send_ints(&[8], 1, 0).unwrap();

        let mut buf = [0i32; 1];
        b.recv_ints(&mut buf, Source::Any, 0).unwrap();
        assert_eq!(buf[0], 8);
        b.recv_ints(&mut buf, Source::Any, 1).unwrap();
        assert_eq!(buf[0], 7);
    }

    #[test]
    fn self_send_is_rejected() {
        let mut cluster = LocalCluster::new(2);
        cluster.pop();
        let a = cluster.pop().unwrap();
        assert!(matches!(
            a.send_ints(&[0], 0, 0),
            Err(TransportError::SelfAddressed(0))
        ));
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let mut cluster = LocalCluster::new(2);
        let b = cluster.pop().unwrap();
        let a = cluster.pop().unwrap();

        a.send_ints(&[1, 2], 1, 0).unwrap();
        let mut buf = [0i32; 3];
        assert!(matches!(
            b.recv_ints(&mut buf, Source::Any, 0),
            Err(TransportError::RecvSizeMismatch {
                expected: 3,
                got: 2
            })
        ));
    }

    #[test]
    fn element_type_mismatch_is_rejected() {
        let mut cluster = LocalCluster::new(2);
        let b = cluster.pop().unwrap();
        let a = cluster.pop().unwrap();

        a.send_words(&[1], 1, 0).unwrap();
        let mut buf = [0i32; 1];
        assert!(matches!(
            b.recv_ints(&mut buf, Source::Any, 0),
            Err(TransportError::ElementTypeMismatch { .. })
        ));
    }
}
