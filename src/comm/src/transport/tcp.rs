use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Mutex;

use byteorder::{ByteOrder, LittleEndian};
use bytes::{BufMut, BytesMut};
use socket2::{Domain, Socket, Type};

use crate::config::TcpClusterConfig;

use super::{Source, Transport, TransportError, ELEM_INT, ELEM_WORD};

// magic (8) + sender rank (8) + tag (4)
const PREAMBLE_BYTES: usize = 20;
// element type (1) + element count (4)
const RECORD_HEADER_BYTES: usize = 5;

struct UnexpectedConn {
    peer: usize,
    tag: u32,
    stream: TcpStream,
}

/// Blocking TCP transport: one short-lived connection per record, carrying
/// a preamble of magic, sender rank and tag, then a typed, length-prefixed
/// little-endian word array.
///
/// The receive side accepts connections sequentially; a connection that does
/// not match the (source, tag) currently waited on is parked and drained
/// before the listener on later receives. Per (sender, tag) order holds
/// because a sender finishes writing one record before connecting for the
/// next, and the accept queue orders connections by handshake completion.
pub struct TcpTransport {
    rank: usize,
    addrs: Vec<SocketAddr>,
    magic: u64,
    listener: TcpListener,
    unexpected: Mutex<Vec<UnexpectedConn>>,
}

impl TcpTransport {
    /// Bind this rank's listen address from the cluster config.
    pub fn bind(config: &TcpClusterConfig) -> Result<Self, TransportError> {
        let addr = *config
            .addrs
            .get(config.rank)
            .ok_or(TransportError::RankOverflow(config.rank, config.addrs.len()))?;
        let socket = if addr.is_ipv4() {
            Socket::new(Domain::IPV4, Type::STREAM, None)?
        } else {
            Socket::new(Domain::IPV6, Type::STREAM, None)?
        };
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(config.listen_backlog)?;
        Ok(Self::from_listener(
            socket.into(),
            config.rank,
            config.addrs.clone(),
            config.magic,
        ))
    }

    /// Assemble a transport around an already bound listener, for
    /// deployments that exchange listen addresses out of band (e.g. after
    /// binding port 0).
    pub fn from_listener(
        listener: TcpListener,
        rank: usize,
        addrs: Vec<SocketAddr>,
        magic: u64,
    ) -> Self {
        TcpTransport {
            rank,
            addrs,
            magic,
            listener,
            unexpected: Mutex::new(Vec::new()),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    fn send_record(
        &self,
        dest: usize,
        tag: u32,
        elem: u8,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        if dest == self.rank {
            return Err(TransportError::SelfAddressed(self.rank));
        }
        let addr = self
            .addrs
            .get(dest)
            .ok_or(TransportError::RankOverflow(dest, self.addrs.len()))?;
        let mut stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;

        let elems = payload.len() / elem as usize;
        let mut header = BytesMut::with_capacity(PREAMBLE_BYTES + RECORD_HEADER_BYTES);
        header.put_u64_le(self.magic);
        header.put_u64_le(self.rank as u64);
        header.put_u32_le(tag);
        header.put_u8(elem);
        header.put_u32_le(elems as u32);

        stream.write_all(&header)?;
        stream.write_all(payload)?;
        Ok(())
    }

    /// Accept the next connection with a valid magic and read its sender
    /// rank and tag.
    fn accept_record(&self) -> Result<(usize, u32, TcpStream), TransportError> {
        loop {
            let (mut stream, _) = self.listener.accept()?;
            let mut preamble = [0u8; PREAMBLE_BYTES];
            stream.read_exact(&mut preamble)?;
            let magic = LittleEndian::read_u64(&preamble[0..8]);
            if magic != self.magic {
                log::warn!(
                    "rank {} dropping connection with invalid magic {:#x} != {:#x}",
                    self.rank,
                    magic,
                    self.magic
                );
                continue;
            }
            let peer = LittleEndian::read_u64(&preamble[8..16]) as usize;
            let tag = LittleEndian::read_u32(&preamble[16..20]);
            return Ok((peer, tag, stream));
        }
    }

    fn obtain_stream(
        &self,
        source: Source,
        tag: u32,
    ) -> Result<(usize, TcpStream), TransportError> {
        {
            let mut unexpected = self.unexpected.lock().unwrap();
            if let Some(idx) = unexpected
                .iter()
                .position(|conn| conn.tag == tag && source.matches(conn.peer))
            {
                // remove (not swap_remove) keeps arrival order for the
                // same (peer, tag)
                let conn = unexpected.remove(idx);
                return Ok((conn.peer, conn.stream));
            }
        }
        loop {
            let (peer, got_tag, stream) = self.accept_record()?;
            if got_tag == tag && source.matches(peer) {
                return Ok((peer, stream));
            }
            log::trace!(
                "rank {} parking record from {} tag {} while waiting on tag {}",
                self.rank,
                peer,
                got_tag,
                tag
            );
            self.unexpected.lock().unwrap().push(UnexpectedConn {
                peer,
                tag: got_tag,
                stream,
            });
        }
    }

    fn recv_record(
        &self,
        source: Source,
        tag: u32,
        elem: u8,
        expected_elems: usize,
    ) -> Result<(usize, Vec<u8>), TransportError> {
        let (peer, mut stream) = self.obtain_stream(source, tag)?;
        let mut header = [0u8; RECORD_HEADER_BYTES];
        stream.read_exact(&mut header)?;
        let got_elem = header[0];
        if got_elem != elem {
            return Err(TransportError::ElementTypeMismatch {
                expected: elem,
                got: got_elem,
            });
        }
        let got_elems = LittleEndian::read_u32(&header[1..5]) as usize;
        if got_elems != expected_elems {
            return Err(TransportError::RecvSizeMismatch {
                expected: expected_elems,
                got: got_elems,
            });
        }
        let mut payload = vec![0u8; got_elems * elem as usize];
        stream.read_exact(&mut payload)?;
        Ok((peer, payload))
    }
}

impl Transport for TcpTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.addrs.len()
    }

    fn send_ints(&self, buf: &[i32], dest: usize, tag: u32) -> Result<(), TransportError> {
        let mut payload = vec![0u8; buf.len() * ELEM_INT as usize];
        LittleEndian::write_i32_into(buf, &mut payload);
        self.send_record(dest, tag, ELEM_INT, &payload)
    }

    fn recv_ints(
        &self,
        buf: &mut [i32],
        source: Source,
        tag: u32,
    ) -> Result<usize, TransportError> {
        let (peer, payload) = self.recv_record(source, tag, ELEM_INT, buf.len())?;
        LittleEndian::read_i32_into(&payload, buf);
        Ok(peer)
    }

    fn send_words(&self, buf: &[u64], dest: usize, tag: u32) -> Result<(), TransportError> {
        let mut payload = vec![0u8; buf.len() * ELEM_WORD as usize];
        LittleEndian::write_u64_into(buf, &mut payload);
        self.send_record(dest, tag, ELEM_WORD, &payload)
    }

    fn recv_words(
        &self,
        buf: &mut [u64],
        source: Source,
        tag: u32,
    ) -> Result<usize, TransportError> {
        let (peer, payload) = self.recv_record(source, tag, ELEM_WORD, buf.len())?;
        LittleEndian::read_u64_into(&payload, buf);
        Ok(peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_MAGIC: u64 = 0x74657374;

    fn loopback_pair() -> (TcpTransport, TcpTransport) {
        let listeners: Vec<TcpListener> = (0..2)
            .map(|_| TcpListener::bind("127.0.0.1:0").unwrap())
            .collect();
        let addrs: Vec<SocketAddr> = listeners
            .iter()
            .map(|listener| listener.local_addr().unwrap())
            .collect();
        let mut transports = listeners
            .into_iter()
            .enumerate()
            .map(|(rank, listener)| {
                TcpTransport::from_listener(listener, rank, addrs.clone(), TEST_MAGIC)
            })
            .collect::<Vec<_>>();
        let b = transports.pop().unwrap();
        let a = transports.pop().unwrap();
        (a, b)
    }

    #[test]
    fn ints_cross_the_wire() {
        let (a, b) = loopback_pair();
        a.send_ints(&[3, -1, 7, 0, 2], 1, 0).unwrap();
        let mut buf = [0i32; 5];
        let src = b.recv_ints(&mut buf, Source::Any, 0).unwrap();
        assert_eq!(src, 0);
        assert_eq!(buf, [3, -1, 7, 0, 2]);
    }

    #[test]
    fn words_cross_the_wire_qualified() {
        let (a, b) = loopback_pair();
        a.send_words(&[u64::MAX, 1, 0], 1, 1).unwrap();
        let mut buf = [0u64; 3];
        let src = b.recv_words(&mut buf, Source::Rank(0), 1).unwrap();
        assert_eq!(src, 0);
        assert_eq!(buf, [u64::MAX, 1, 0]);
    }

    #[test]
    fn mismatched_tag_is_parked_and_recovered() {
        let (a, b) = loopback_pair();
        a.send_ints(&[11], 1, 1).unwrap();
        a.send_ints(&[22], 1, 0).unwrap();

        let mut buf = [0i32; 1];
        b.recv_ints(&mut buf, Source::Any, 0).unwrap();
        assert_eq!(buf[0], 22);
        b.recv_ints(&mut buf, Source::Any, 1).unwrap();
        assert_eq!(buf[0], 11);
    }

    #[test]
    fn self_send_is_rejected() {
        let (a, _b) = loopback_pair();
        assert!(matches!(
            a.send_ints(&[1], 0, 0),
            Err(TransportError::SelfAddressed(0))
        ));
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let (a, b) = loopback_pair();
        a.send_ints(&[1, 2, 3], 1, 0).unwrap();
        let mut buf = [0i32; 2];
        assert!(matches!(
            b.recv_ints(&mut buf, Source::Any, 0),
            Err(TransportError::RecvSizeMismatch {
                expected: 2,
                got: 3
            })
        ));
    }
}
