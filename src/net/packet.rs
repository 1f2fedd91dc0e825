use crate::error::WireError;

pub const PACKET_MAGIC: u32 = 0x4C4C_4447; // "LLDG"
pub const PACKET_HEADER_LEN: usize = 20;

/// Prefix of every datagram, little-endian on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PacketHeader {
    pub frame_counter: u32,
    pub chunk_index: u32,
    pub chunk_count: u32,
    pub total_len: u32,
}

impl PacketHeader {
    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&PACKET_MAGIC.to_le_bytes());
        out.extend_from_slice(&self.frame_counter.to_le_bytes());
        out.extend_from_slice(&self.chunk_index.to_le_bytes());
        out.extend_from_slice(&self.chunk_count.to_le_bytes());
        out.extend_from_slice(&self.total_len.to_le_bytes());
    }

    /// Split a datagram into its header and payload.
    pub fn parse(datagram: &[u8]) -> Result<(Self, &[u8]), WireError> {
        if datagram.len() < PACKET_HEADER_LEN {
            return Err(WireError::Length {
                expected: PACKET_HEADER_LEN,
                actual: datagram.len(),
            });
        }
        let word = |i: usize| {
            let mut b = [0u8; 4];
            b.copy_from_slice(&datagram[i * 4..i * 4 + 4]);
            u32::from_le_bytes(b)
        };
        if word(0) != PACKET_MAGIC {
            return Err(WireError::Magic(word(0)));
        }
        let header = Self {
            frame_counter: word(1),
            chunk_index: word(2),
            chunk_count: word(3),
            total_len: word(4),
        };
        Ok((header, &datagram[PACKET_HEADER_LEN..]))
    }

    /// Byte offset of this chunk's payload inside the frame.
    ///
    /// Every chunk but the last carries the same payload length, so the offset
    /// follows from the chunk's own length. The last chunk ends the frame.
    fn offset(&self, len: usize) -> Result<usize, WireError> {
        let bad = || WireError::Chunk {
            index: self.chunk_index,
            count: self.chunk_count,
            len,
            total_len: self.total_len,
        };
        let total = self.total_len as usize;
        let index = self.chunk_index as usize;
        let count = self.chunk_count as usize;
        if count == 0 || index >= count || len == 0 || len > total {
            return Err(bad());
        }
        if index + 1 == count {
            let offset = total - len;
            // earlier chunks must each be at least as long as this one
            if (count == 1 && offset != 0) || offset < (count - 1) * len {
                return Err(bad());
            }
            Ok(offset)
        } else {
            if len * (count - 1) >= total || len * count < total {
                return Err(bad());
            }
            Ok(index * len)
        }
    }
}

/// Split `frame` into datagrams of at most `max_payload` bytes of payload.
pub fn fragment(frame_counter: u32, frame: &[u8], max_payload: usize) -> impl Iterator<Item = Vec<u8>> + '_ {
    let max_payload = max_payload.max(1);
    let chunk_count = frame.len().div_ceil(max_payload) as u32;
    frame
        .chunks(max_payload)
        .enumerate()
        .map(move |(index, chunk)| {
            let mut datagram = Vec::with_capacity(PACKET_HEADER_LEN + chunk.len());
            PacketHeader {
                frame_counter,
                chunk_index: index as u32,
                chunk_count,
                total_len: frame.len() as u32,
            }
            .write(&mut datagram);
            datagram.extend_from_slice(chunk);
            datagram
        })
}

/// Rebuilds whole frames from datagrams arriving in any order.
///
/// Frames have a fixed length known up front; a header claiming any other
/// length is rejected before anything is allocated. Only the newest frame is
/// assembled: a chunk of a newer frame abandons the partial one, chunks of
/// frames at or below the last completed one are dropped. A long run of such
/// old chunks means the producer restarted with a fresh counter, and the
/// reassembler follows it.
#[derive(Debug)]
pub struct Reassembler {
    frame_len: usize,
    current: Option<u32>,
    last_complete: Option<u32>,
    buffer: Vec<u8>,
    received: Vec<bool>,
    missing: usize,
    stale_run: usize,
}

impl Reassembler {
    pub fn new(frame_len: usize) -> Self {
        Self {
            frame_len,
            current: None,
            last_complete: None,
            buffer: vec![0; frame_len],
            received: Vec::new(),
            missing: 0,
            stale_run: 0,
        }
    }

    /// Feed one datagram. Returns the frame counter when it completes a frame,
    /// whose bytes are then available from `frame`.
    pub fn accept(&mut self, datagram: &[u8]) -> Result<Option<u32>, WireError> {
        let (header, payload) = PacketHeader::parse(datagram)?;
        if header.total_len as usize != self.frame_len {
            return Err(WireError::Length {
                expected: self.frame_len,
                actual: header.total_len as usize,
            });
        }
        let offset = header.offset(payload.len())?;
        let counter = header.frame_counter;

        if self.last_complete.is_some_and(|last| counter <= last) {
            self.stale_run += 1;
            if self.stale_run < 2 * header.chunk_count as usize {
                return Ok(None);
            }
            log::info!("Frame counter restarted at {counter}, resynchronising");
            self.last_complete = None;
            self.current = None;
        }
        self.stale_run = 0;

        match self.current {
            Some(current) if counter < current => return Ok(None),
            Some(current) if counter == current => {}
            _ => self.start(&header),
        }

        if self.received.len() != header.chunk_count as usize {
            return Err(WireError::Chunk {
                index: header.chunk_index,
                count: header.chunk_count,
                len: payload.len(),
                total_len: header.total_len,
            });
        }

        let index = header.chunk_index as usize;
        if self.received[index] {
            return Ok(None);
        }
        self.buffer[offset..offset + payload.len()].copy_from_slice(payload);
        self.received[index] = true;
        self.missing -= 1;

        if self.missing > 0 {
            return Ok(None);
        }
        self.current = None;
        self.last_complete = Some(counter);
        Ok(Some(counter))
    }

    fn start(&mut self, header: &PacketHeader) {
        self.current = Some(header.frame_counter);
        self.received.clear();
        self.received.resize(header.chunk_count as usize, false);
        self.missing = header.chunk_count as usize;
    }

    /// Bytes of the frame `accept` just completed. A later datagram may start
    /// overwriting them.
    pub fn frame(&self) -> &[u8] {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
    }

    #[test]
    fn header_is_little_endian() {
        let mut out = Vec::new();
        PacketHeader {
            frame_counter: 0x0102_0304,
            chunk_index: 1,
            chunk_count: 2,
            total_len: 300,
        }
        .write(&mut out);
        assert_eq!(out.len(), PACKET_HEADER_LEN);
        assert_eq!(&out[..4], &PACKET_MAGIC.to_le_bytes());
        assert_eq!(&out[4..8], &[4, 3, 2, 1]);

        assert!(matches!(PacketHeader::parse(&out[..10]), Err(WireError::Length { .. })));
        out[0] ^= 1;
        assert!(matches!(PacketHeader::parse(&out), Err(WireError::Magic(_))));
    }

    #[test]
    fn reassembles_out_of_order() {
        let data = frame(1000, 7);
        let mut datagrams: Vec<Vec<u8>> = fragment(3, &data, 128).collect();
        assert_eq!(datagrams.len(), 8);
        datagrams.reverse();
        datagrams.swap(2, 5);

        let mut r = Reassembler::new(1000);
        let (last, rest) = datagrams.split_last().unwrap();
        for d in rest {
            assert_eq!(r.accept(d).unwrap(), None);
        }
        // a duplicate does not complete anything
        assert_eq!(r.accept(&rest[0]).unwrap(), None);
        assert_eq!(r.accept(last).unwrap(), Some(3));
        assert_eq!(r.frame(), &data[..]);
    }

    #[test]
    fn newer_frame_abandons_partial_one() {
        let old = frame(500, 1);
        let new = frame(500, 2);
        let mut r = Reassembler::new(500);
        let old_chunks: Vec<_> = fragment(10, &old, 100).collect();
        r.accept(&old_chunks[0]).unwrap();
        r.accept(&old_chunks[1]).unwrap();

        let mut completed = None;
        for d in fragment(11, &new, 100) {
            completed = r.accept(&d).unwrap();
        }
        assert_eq!(completed, Some(11));
        assert_eq!(r.frame(), &new[..]);

        // late chunks of frame 10 are dropped
        for d in &old_chunks[2..] {
            assert_eq!(r.accept(d).unwrap(), None);
        }
        assert_eq!(r.frame(), &new[..]);
    }

    #[test]
    fn follows_producer_restart() {
        let data = frame(300, 9);
        let mut r = Reassembler::new(300);
        let mut last = None;
        for d in fragment(500, &data, 100) {
            last = r.accept(&d).unwrap();
        }
        assert_eq!(last, Some(500));

        // one stale frame is ignored, a sustained run resynchronises
        let mut completed = Vec::new();
        for counter in 0..4 {
            for d in fragment(counter, &data, 100) {
                if let Some(c) = r.accept(&d).unwrap() {
                    completed.push(c);
                }
            }
        }
        assert_eq!(completed, vec![2, 3]);
    }

    #[test]
    fn rejects_inconsistent_chunks() {
        let data = frame(250, 0);
        let mut chunks: Vec<_> = fragment(1, &data, 100).collect();
        let mut r = Reassembler::new(250);
        // claim the middle chunk is the last one of a shorter frame
        chunks[1].truncate(PACKET_HEADER_LEN + 10);
        assert!(matches!(r.accept(&chunks[1]), Err(WireError::Chunk { .. })));

        let mut bogus = Vec::new();
        PacketHeader {
            frame_counter: 1,
            chunk_index: 4,
            chunk_count: 3,
            total_len: 250,
        }
        .write(&mut bogus);
        bogus.extend_from_slice(&[0; 50]);
        assert!(matches!(r.accept(&bogus), Err(WireError::Chunk { .. })));
    }

    #[test]
    fn rejects_frames_of_the_wrong_length() {
        let mut r = Reassembler::new(300);
        let mut forged = Vec::new();
        PacketHeader {
            frame_counter: 1,
            chunk_index: 0,
            chunk_count: 536_871,
            total_len: 512 << 20,
        }
        .write(&mut forged);
        forged.extend_from_slice(&[0; 1000]);
        assert_eq!(
            r.accept(&forged),
            Err(WireError::Length {
                expected: 300,
                actual: 512 << 20,
            })
        );
        assert_eq!(r.frame().len(), 300);

        // a well-formed frame of another size is refused the same way
        let other = frame(400, 3);
        for d in fragment(2, &other, 100) {
            assert!(matches!(r.accept(&d), Err(WireError::Length { .. })));
        }

        // the right size still gets through afterwards
        let data = frame(300, 4);
        let mut completed = None;
        for d in fragment(3, &data, 100) {
            completed = r.accept(&d).unwrap();
        }
        assert_eq!(completed, Some(3));
        assert_eq!(r.frame(), &data[..]);
    }
}
