//! Chunked command framing.
//!
//! A record that fits into one transport allocation is copied as is.
//! Anything larger is split into chunk records, each carrying the total
//! record length and the fragment offset, so the receiver can check that
//! a sequence is complete and contiguous before the reassembled record is
//! handed to the command decoder.

use std::borrow::Cow;

use super::wire_format::{
    RecordHeader, CHUNK_KIND, CHUNK_OVERHEAD, CHUNK_PREFIX_SIZE, RECORD_HEADER_SIZE,
};
use crate::error::{Result, WireError};
use crate::transport::CommandSerializer;

/// Writes records into a transport, splitting them when they are too large.
pub struct ChunkedSerializer {
    inner: Box<dyn CommandSerializer>,
    next_sequence: u32,
}

impl ChunkedSerializer {
    pub fn new(inner: Box<dyn CommandSerializer>) -> Self {
        Self {
            inner,
            next_sequence: 0,
        }
    }

    /// Swap the underlying transport and return the old one.
    pub fn replace(&mut self, inner: Box<dyn CommandSerializer>) -> Box<dyn CommandSerializer> {
        std::mem::replace(&mut self.inner, inner)
    }

    pub fn max_allocation_size(&self) -> usize {
        self.inner.max_allocation_size()
    }

    /// Serialize one complete record.
    pub fn serialize(&mut self, record: &[u8]) -> Result<()> {
        let max = self.inner.max_allocation_size();
        if record.len() <= max {
            let space = self.acquire(record.len())?;
            space.copy_from_slice(record);
            return Ok(());
        }

        if max <= CHUNK_OVERHEAD {
            return Err(WireError::Transport(format!(
                "allocation size {} cannot hold a chunk",
                max
            )));
        }
        let total = u32::try_from(record.len())
            .map_err(|_| WireError::validation(format!("record of {} bytes", record.len())))?;
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);

        let fragment_capacity = max - CHUNK_OVERHEAD;
        let mut offset = 0usize;
        for fragment in record.chunks(fragment_capacity) {
            let body_len = (CHUNK_PREFIX_SIZE + fragment.len()) as u32;
            let space = self.acquire(CHUNK_OVERHEAD + fragment.len())?;
            RecordHeader::new(CHUNK_KIND, sequence, body_len).encode_into(space);
            space[12..16].copy_from_slice(&total.to_be_bytes());
            space[16..20].copy_from_slice(&(offset as u32).to_be_bytes());
            space[CHUNK_OVERHEAD..].copy_from_slice(fragment);
            offset += fragment.len();
        }

        tracing::trace!(sequence, total, "serialized chunked record");
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }

    /// Ask for space; on refusal flush once and retry.
    fn acquire(&mut self, size: usize) -> Result<&mut [u8]> {
        if self.inner.remaining_space() < size {
            self.inner.flush()?;
        }
        self.inner
            .get_cmd_space(size)
            .ok_or_else(|| WireError::Transport(format!("no space for {} bytes after flush", size)))
    }
}

struct Assembly {
    sequence: u32,
    total: usize,
    buf: Vec<u8>,
}

/// Pulls complete records out of a byte stream, reassembling chunks.
pub struct ChunkedCommandHandler {
    max_command_size: u32,
    expected_sequence: u32,
    assembly: Option<Assembly>,
}

impl ChunkedCommandHandler {
    pub fn new(max_command_size: u32) -> Self {
        Self {
            max_command_size,
            expected_sequence: 0,
            assembly: None,
        }
    }

    /// Whether a chunk sequence has started but not completed.
    pub fn is_assembling(&self) -> bool {
        self.assembly.is_some()
    }

    /// Extract the next complete record from `data`.
    ///
    /// Consumed bytes are removed from the front of `data`. Returns
    /// `Ok(None)` when only a partial record is left; those bytes stay in
    /// `data` for the caller to resubmit with more input.
    pub fn next_command<'a>(&mut self, data: &mut &'a [u8]) -> Result<Option<Cow<'a, [u8]>>> {
        loop {
            let Some(header) = RecordHeader::decode(data) else {
                return Ok(None);
            };
            header.validate(self.max_command_size)?;
            if data.len() < header.record_len() {
                return Ok(None);
            }

            let (record, rest) = data.split_at(header.record_len());
            *data = rest;

            if !header.is_chunk() {
                if self.assembly.is_some() {
                    return Err(WireError::decode(
                        "command record interleaved with an incomplete chunk sequence",
                    ));
                }
                return Ok(Some(Cow::Borrowed(record)));
            }

            if let Some(complete) = self.push_chunk(header, &record[RECORD_HEADER_SIZE..])? {
                return Ok(Some(Cow::Owned(complete)));
            }
        }
    }

    fn push_chunk(&mut self, header: RecordHeader, body: &[u8]) -> Result<Option<Vec<u8>>> {
        if body.len() < CHUNK_PREFIX_SIZE {
            return Err(WireError::decode("chunk body shorter than its prefix"));
        }
        let total = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
        let offset = u32::from_be_bytes([body[4], body[5], body[6], body[7]]) as usize;
        let fragment = &body[CHUNK_PREFIX_SIZE..];

        if header.target != self.expected_sequence {
            return Err(WireError::decode(format!(
                "chunk sequence {} out of order, expected {}",
                header.target, self.expected_sequence
            )));
        }

        let assembly = match self.assembly.as_mut() {
            Some(assembly) => {
                if assembly.total != total as usize {
                    return Err(WireError::decode(format!(
                        "chunk total changed from {} to {}",
                        assembly.total, total
                    )));
                }
                assembly
            }
            None => {
                if (total as usize) < RECORD_HEADER_SIZE || total > self.max_command_size {
                    return Err(WireError::decode(format!("invalid chunked record length {}", total)));
                }
                self.assembly.insert(Assembly {
                    sequence: header.target,
                    total: total as usize,
                    buf: Vec::with_capacity(total as usize),
                })
            }
        };

        if offset != assembly.buf.len() {
            return Err(WireError::decode(format!(
                "chunk offset {} does not continue at {}",
                offset,
                assembly.buf.len()
            )));
        }
        if offset + fragment.len() > assembly.total {
            return Err(WireError::decode(format!(
                "chunk overshoots declared length {}",
                assembly.total
            )));
        }
        assembly.buf.extend_from_slice(fragment);

        if assembly.buf.len() < assembly.total {
            return Ok(None);
        }

        let Some(done) = self.assembly.take() else {
            return Ok(None);
        };
        self.expected_sequence = done.sequence.wrapping_add(1);

        let inner = RecordHeader::decode(&done.buf)
            .ok_or_else(|| WireError::decode("reassembled record shorter than a header"))?;
        if inner.is_chunk() || inner.record_len() != done.total {
            return Err(WireError::decode(format!(
                "reassembled record declares {} bytes, carried {}",
                inner.record_len(),
                done.total
            )));
        }
        Ok(Some(done.buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::wire_format::{WireWriter, DEFAULT_MAX_COMMAND_SIZE};
    use crate::transport::memory_pipe;

    fn record_with_payload(len: usize) -> Vec<u8> {
        let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let mut writer = WireWriter::new(1, 9);
        writer.put_bytes(&payload);
        writer.finish().unwrap().to_vec()
    }

    /// Serialize every record, then collect what the receiver reassembles.
    fn transfer(max: usize, records: &[Vec<u8>]) -> (usize, Vec<Vec<u8>>) {
        let (serializer, mut receiver) = memory_pipe(max);
        let mut chunked = ChunkedSerializer::new(Box::new(serializer));
        for record in records {
            chunked.serialize(record).unwrap();
        }
        chunked.flush().unwrap();

        let mut stream = Vec::new();
        while let Some(buf) = receiver.try_recv() {
            stream.extend_from_slice(&buf);
        }

        let mut chunk_count = 0;
        let mut cursor: &[u8] = &stream;
        while let Some(header) = RecordHeader::decode(cursor) {
            if header.is_chunk() {
                chunk_count += 1;
            }
            cursor = &cursor[header.record_len()..];
        }

        let mut handler = ChunkedCommandHandler::new(DEFAULT_MAX_COMMAND_SIZE);
        let mut data: &[u8] = &stream;
        let mut out = Vec::new();
        while let Some(record) = handler.next_command(&mut data).unwrap() {
            out.push(record.into_owned());
        }
        assert!(data.is_empty());
        assert!(!handler.is_assembling());
        (chunk_count, out)
    }

    #[test]
    fn test_small_record_is_not_chunked() {
        let record = record_with_payload(10);
        let (chunks, out) = transfer(1024, &[record.clone()]);
        assert_eq!(chunks, 0);
        assert_eq!(out, vec![record]);
    }

    #[test]
    fn test_ten_kilobytes_over_one_kilobyte_transport() {
        let record = record_with_payload(10240 - RECORD_HEADER_SIZE - 4);
        assert_eq!(record.len(), 10240);

        // Every chunk spends CHUNK_OVERHEAD of the 1024 bytes on framing.
        let fragment = 1024 - CHUNK_OVERHEAD;
        let (chunks, out) = transfer(1024, &[record.clone()]);
        assert_eq!(chunks, record.len().div_ceil(fragment));
        assert_eq!(chunks, 11);
        assert_eq!(out, vec![record]);
    }

    #[test]
    fn test_ten_fragments_of_one_kilobyte_payload() {
        let record = record_with_payload(10240 - RECORD_HEADER_SIZE - 4);
        let (chunks, out) = transfer(1024 + CHUNK_OVERHEAD, &[record.clone()]);
        assert_eq!(chunks, 10);
        assert_eq!(out, vec![record]);
    }

    #[test]
    fn test_flushed_bytes_are_exactly_the_records() {
        let record = record_with_payload(8);
        let (serializer, mut receiver) = memory_pipe(4096);
        let mut chunked = ChunkedSerializer::new(Box::new(serializer));
        chunked.serialize(&record).unwrap();
        chunked.serialize(&record).unwrap();
        chunked.flush().unwrap();

        let wire = receiver.try_recv().unwrap();
        assert_eq!(&wire[..], [record.clone(), record].concat().as_slice());
        assert!(receiver.try_recv().is_none());
    }

    #[test]
    fn test_full_buffer_is_flushed_before_the_next_record() {
        let record = record_with_payload(8);
        let (serializer, mut receiver) = memory_pipe(record.len() + 4);
        let mut chunked = ChunkedSerializer::new(Box::new(serializer));
        chunked.serialize(&record).unwrap();
        chunked.serialize(&record).unwrap();
        chunked.flush().unwrap();

        assert_eq!(&receiver.try_recv().unwrap()[..], record.as_slice());
        assert_eq!(&receiver.try_recv().unwrap()[..], record.as_slice());
        assert!(receiver.try_recv().is_none());
    }

    #[test]
    fn test_roundtrip_sizes_up_to_five_buffers() {
        let max = 256;
        let sizes = [0, 1, 200, 243, 244, 245, 256, 257, 511, 700, max * 5 - 1, max * 5];
        let records: Vec<Vec<u8>> = sizes.iter().map(|s| record_with_payload(*s)).collect();

        let (_, out) = transfer(max, &records);
        assert_eq!(out, records);
    }

    #[test]
    fn test_partial_input_is_left_unconsumed() {
        let record = record_with_payload(3000);
        let (serializer, mut receiver) = memory_pipe(1000);
        let mut chunked = ChunkedSerializer::new(Box::new(serializer));
        chunked.serialize(&record).unwrap();
        chunked.flush().unwrap();
        let mut stream = Vec::new();
        while let Some(buf) = receiver.try_recv() {
            stream.extend_from_slice(&buf);
        }

        let mut handler = ChunkedCommandHandler::new(DEFAULT_MAX_COMMAND_SIZE);
        let split = stream.len() - 7;
        let mut first: &[u8] = &stream[..split];
        assert!(handler.next_command(&mut first).unwrap().is_none());
        assert!(handler.is_assembling());

        // Resubmit the unconsumed tail together with the rest.
        let mut rest = first.to_vec();
        rest.extend_from_slice(&stream[split..]);
        let mut second: &[u8] = &rest;
        let out = handler.next_command(&mut second).unwrap().unwrap();
        assert_eq!(out.as_ref(), record.as_slice());
    }

    fn chunk(sequence: u32, total: u32, offset: u32, fragment: &[u8]) -> Vec<u8> {
        let mut out = RecordHeader::new(CHUNK_KIND, sequence, (8 + fragment.len()) as u32)
            .encode()
            .to_vec();
        out.extend_from_slice(&total.to_be_bytes());
        out.extend_from_slice(&offset.to_be_bytes());
        out.extend_from_slice(fragment);
        out
    }

    #[test]
    fn test_overshooting_chunk_is_fatal() {
        let inner = record_with_payload(20);
        let mut stream = chunk(0, inner.len() as u32, 0, &inner[..16]);
        stream.extend(chunk(0, inner.len() as u32, 16, &inner[16..]));
        stream.extend(chunk(0, inner.len() as u32, inner.len() as u32, &[0xAA]));

        let mut handler = ChunkedCommandHandler::new(DEFAULT_MAX_COMMAND_SIZE);
        let mut data: &[u8] = &stream;
        assert!(handler.next_command(&mut data).unwrap().is_some());
        // Sequence 0 already completed.
        assert!(handler.next_command(&mut data).is_err());
    }

    #[test]
    fn test_fragment_past_total_is_fatal() {
        let mut stream = chunk(0, 16, 0, &[0u8; 12]);
        stream.extend(chunk(0, 16, 12, &[0u8; 8]));

        let mut handler = ChunkedCommandHandler::new(DEFAULT_MAX_COMMAND_SIZE);
        let mut data: &[u8] = &stream;
        let err = handler.next_command(&mut data).unwrap_err();
        assert!(err.to_string().contains("overshoots"));
    }

    #[test]
    fn test_offset_gap_is_fatal() {
        let mut stream = chunk(0, 40, 0, &[0u8; 12]);
        stream.extend(chunk(0, 40, 20, &[0u8; 8]));

        let mut handler = ChunkedCommandHandler::new(DEFAULT_MAX_COMMAND_SIZE);
        let mut data: &[u8] = &stream;
        assert!(handler.next_command(&mut data).is_err());
    }

    #[test]
    fn test_interleaved_command_is_fatal() {
        let mut stream = chunk(0, 40, 0, &[0u8; 12]);
        stream.extend(record_with_payload(4));

        let mut handler = ChunkedCommandHandler::new(DEFAULT_MAX_COMMAND_SIZE);
        let mut data: &[u8] = &stream;
        assert!(handler.next_command(&mut data).is_err());
    }

    #[test]
    fn test_mismatched_inner_length_is_fatal() {
        // Inner header claims a 100-byte body but the sequence carries 4.
        let mut inner = RecordHeader::new(1, 0, 100).encode().to_vec();
        inner.extend_from_slice(&[0u8; 4]);
        let stream = chunk(0, inner.len() as u32, 0, &inner);

        let mut handler = ChunkedCommandHandler::new(DEFAULT_MAX_COMMAND_SIZE);
        let mut data: &[u8] = &stream;
        assert!(handler.next_command(&mut data).is_err());
    }

    #[test]
    fn test_oversized_header_is_fatal() {
        let stream = RecordHeader::new(1, 0, u32::MAX).encode();
        let mut handler = ChunkedCommandHandler::new(1024);
        let mut data: &[u8] = &stream;
        assert!(handler.next_command(&mut data).is_err());
    }
}
