//! Genesis snapshot file format.
//!
//! A snapshot is a framed stream of records: a metadata record carrying
//! the genesis block header, then a store-view dump bracketed by start
//! and end markers whose payload is the 8-byte big-endian height, with
//! one key/value record per trie pair in iteration order.
//!
//! Frame layout: `[1-byte tag][4-byte big-endian length][payload]`.

use crate::types::block::BlockHeader;
use std::io::{self, Read, Write};

const TAG_METADATA: u8 = 0x00;
const TAG_SV_START: u8 = 0x01;
const TAG_KV: u8 = 0x02;
const TAG_SV_END: u8 = 0x03;

/// One record of the snapshot stream.
#[derive(Clone, Debug, PartialEq)]
pub enum SnapshotRecord {
    Metadata(BlockHeader),
    SvStart(u64),
    Kv(Vec<u8>, Vec<u8>),
    SvEnd(u64),
}

fn write_frame<W: Write>(writer: &mut W, tag: u8, payload: &[u8]) -> io::Result<()> {
    writer.write_all(&[tag])?;
    writer.write_all(&(payload.len() as u32).to_be_bytes())?;
    writer.write_all(payload)
}

fn read_frame<R: Read>(reader: &mut R) -> io::Result<Option<(u8, Vec<u8>)>> {
    let mut tag = [0u8; 1];
    match reader.read_exact(&mut tag) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let mut len = [0u8; 4];
    reader.read_exact(&mut len)?;
    let mut payload = vec![0u8; u32::from_be_bytes(len) as usize];
    reader.read_exact(&mut payload)?;
    Ok(Some((tag[0], payload)))
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

/// Write a full snapshot: metadata, then the bracketed store-view dump.
/// `pairs` must already be in the trie's iteration order.
pub fn write_snapshot<W: Write>(
    writer: &mut W,
    header: &BlockHeader,
    pairs: &[(Vec<u8>, Vec<u8>)],
) -> io::Result<()> {
    let header_raw =
        bincode::serialize(header).map_err(|e| invalid(&format!("bad header: {e}")))?;
    write_frame(writer, TAG_METADATA, &header_raw)?;

    write_frame(writer, TAG_SV_START, &header.height.to_be_bytes())?;
    for (key, value) in pairs {
        let kv_raw = bincode::serialize(&(key, value))
            .map_err(|e| invalid(&format!("bad kv record: {e}")))?;
        write_frame(writer, TAG_KV, &kv_raw)?;
    }
    write_frame(writer, TAG_SV_END, &header.height.to_be_bytes())
}

/// Read and validate a snapshot stream back into its header and pairs.
pub fn read_snapshot<R: Read>(
    reader: &mut R,
) -> io::Result<(BlockHeader, Vec<(Vec<u8>, Vec<u8>)>)> {
    let (tag, payload) = read_frame(reader)?.ok_or_else(|| invalid("empty snapshot"))?;
    if tag != TAG_METADATA {
        return Err(invalid("snapshot must begin with a metadata record"));
    }
    let header: BlockHeader =
        bincode::deserialize(&payload).map_err(|e| invalid(&format!("bad header: {e}")))?;

    let (tag, payload) = read_frame(reader)?.ok_or_else(|| invalid("missing SVStart"))?;
    if tag != TAG_SV_START || payload.len() != 8 {
        return Err(invalid("malformed SVStart record"));
    }
    let start_height = u64::from_be_bytes(payload.try_into().expect("length checked"));
    if start_height != header.height {
        return Err(invalid("SVStart height does not match the metadata header"));
    }

    let mut pairs = Vec::new();
    loop {
        let (tag, payload) = read_frame(reader)?.ok_or_else(|| invalid("missing SVEnd"))?;
        match tag {
            TAG_KV => {
                let (key, value): (Vec<u8>, Vec<u8>) = bincode::deserialize(&payload)
                    .map_err(|e| invalid(&format!("bad kv record: {e}")))?;
                pairs.push((key, value));
            }
            TAG_SV_END => {
                if payload.len() != 8 {
                    return Err(invalid("malformed SVEnd record"));
                }
                let end_height = u64::from_be_bytes(payload.try_into().expect("length checked"));
                if end_height != start_height {
                    return Err(invalid("SVEnd height does not match SVStart"));
                }
                return Ok((header, pairs));
            }
            _ => return Err(invalid("unexpected record inside store-view dump")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::block::Block;

    fn sample_pairs() -> Vec<(Vec<u8>, Vec<u8>)> {
        vec![
            (b"chainid".to_vec(), b"meridian-test".to_vec()),
            (b"ls/validators".to_vec(), vec![1, 2, 3]),
        ]
    }

    #[test]
    fn test_roundtrip() {
        let header = Block::genesis("meridian-test").header;
        let pairs = sample_pairs();

        let mut buf = Vec::new();
        write_snapshot(&mut buf, &header, &pairs).unwrap();

        let (decoded_header, decoded_pairs) = read_snapshot(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded_header, header);
        assert_eq!(decoded_pairs, pairs);
    }

    #[test]
    fn test_sv_start_is_big_endian_height() {
        let header = Block::genesis("meridian-test").header;
        let mut buf = Vec::new();
        write_snapshot(&mut buf, &header, &[]).unwrap();

        // Skip the metadata frame, then inspect the SVStart payload.
        let meta_len = u32::from_be_bytes(buf[1..5].try_into().unwrap()) as usize;
        let sv_start = &buf[5 + meta_len..];
        assert_eq!(sv_start[0], TAG_SV_START);
        assert_eq!(&sv_start[5..13], &header.height.to_be_bytes());
    }

    #[test]
    fn test_truncated_stream_rejected() {
        let header = Block::genesis("meridian-test").header;
        let mut buf = Vec::new();
        write_snapshot(&mut buf, &header, &sample_pairs()).unwrap();

        buf.truncate(buf.len() - 4);
        assert!(read_snapshot(&mut buf.as_slice()).is_err());
    }

    #[test]
    fn test_missing_metadata_rejected() {
        let mut buf = Vec::new();
        write_frame(&mut buf, TAG_SV_START, &1u64.to_be_bytes()).unwrap();
        assert!(read_snapshot(&mut buf.as_slice()).is_err());
    }
}
