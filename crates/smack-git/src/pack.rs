//! Pack-file wire format: `PACK`, version 2, object count, per-object
//! varint type/size headers with zlib bodies, SHA-1 trailer. Delta encodings
//! are rejected on read and never produced on write.

use std::io::Write;

use anyhow::{bail, Context, Result};
use flate2::write::ZlibEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};
use sha1::{Digest, Sha1};

use crate::object::ObjectType;

/// Builds a pack stream from full objects, in whatever order the caller's
/// map yields them.
pub fn write_pack<'a, I>(objects: I, count: usize) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = (ObjectType, &'a [u8])>,
{
    let mut out = Vec::new();
    out.extend_from_slice(b"PACK");
    out.extend_from_slice(&2u32.to_be_bytes());
    out.extend_from_slice(&(count as u32).to_be_bytes());

    for (kind, content) in objects {
        write_object_header(&mut out, kind, content.len());

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(content)?;
        out.extend_from_slice(&encoder.finish()?);
    }

    let checksum = Sha1::digest(&out);
    out.extend_from_slice(&checksum);
    Ok(out)
}

/// Variable-length header: the first byte carries the type in bits 4-6 and
/// the low size nibble; continuation bytes add 7 size bits each.
fn write_object_header(out: &mut Vec<u8>, kind: ObjectType, size: usize) {
    let mut size = size;
    let mut byte = (kind.pack_code() << 4) | (size & 0x0f) as u8;
    size >>= 4;

    while size > 0 {
        out.push(byte | 0x80);
        byte = (size & 0x7f) as u8;
        size >>= 7;
    }
    out.push(byte);
}

/// Reads every object out of a pack stream. `OFS_DELTA` and `REF_DELTA`
/// entries abort the whole read.
pub fn read_pack(data: &[u8]) -> Result<Vec<(ObjectType, Vec<u8>)>> {
    if data.len() < 12 {
        bail!("packfile too short");
    }
    if &data[..4] != b"PACK" {
        bail!("bad pack signature");
    }
    let version = u32::from_be_bytes(data[4..8].try_into().unwrap());
    if version != 2 {
        bail!("unsupported pack version: {version}");
    }
    let count = u32::from_be_bytes(data[8..12].try_into().unwrap()) as usize;

    let mut objects = Vec::with_capacity(count);
    let mut pos = 12;

    for index in 0..count {
        let (kind, size, header_len) = read_object_header(&data[pos..])
            .with_context(|| format!("failed to read object header {index}"))?;
        pos += header_len;

        let (content, consumed) = inflate(&data[pos..], size)
            .with_context(|| format!("failed to read object content {index}"))?;
        if content.len() != size {
            bail!(
                "object {index} size mismatch: header {} inflated {}",
                size,
                content.len()
            );
        }
        pos += consumed;

        objects.push((kind, content));
    }

    Ok(objects)
}

fn read_object_header(data: &[u8]) -> Result<(ObjectType, usize, usize)> {
    if data.is_empty() {
        bail!("truncated object header");
    }

    let first = data[0];
    let kind = ObjectType::from_pack_code((first >> 4) & 0x07)?;
    let mut size = (first & 0x0f) as usize;
    let mut shift = 4;
    let mut read = 1;

    let mut byte = first;
    while byte & 0x80 != 0 {
        if read >= data.len() {
            bail!("truncated object header");
        }
        byte = data[read];
        size |= ((byte & 0x7f) as usize) << shift;
        shift += 7;
        read += 1;
    }

    Ok((kind, size, read))
}

/// Inflates one zlib stream from the front of `data`, returning the output
/// and the number of compressed bytes consumed (the only way to find where
/// the next pack entry begins).
fn inflate(data: &[u8], expected: usize) -> Result<(Vec<u8>, usize)> {
    let mut z = Decompress::new(true);
    let mut out = Vec::with_capacity(expected.max(64));

    loop {
        let consumed = z.total_in() as usize;
        if consumed > data.len() {
            bail!("zlib consumed past end of input");
        }
        let before = z.total_in();
        let status = z
            .decompress_vec(&data[consumed..], &mut out, FlushDecompress::None)
            .context("zlib inflate failed")?;

        match status {
            Status::StreamEnd => break,
            Status::Ok | Status::BufError => {
                if out.len() == out.capacity() {
                    out.reserve(out.capacity().max(64));
                } else if z.total_in() == before {
                    bail!("truncated zlib stream");
                }
            }
        }
    }

    Ok((out, z.total_in() as usize))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_round_trips_multiple_objects() {
        let blob = b"<h1>hi</h1>".to_vec();
        let tree = b"fake tree body".to_vec();
        let big = vec![b'x'; 5000]; // forces multi-byte size headers

        let objects: Vec<(ObjectType, &[u8])> = vec![
            (ObjectType::Blob, blob.as_slice()),
            (ObjectType::Tree, tree.as_slice()),
            (ObjectType::Blob, big.as_slice()),
        ];
        let pack = write_pack(objects, 3).unwrap();

        assert_eq!(&pack[..4], b"PACK");
        assert_eq!(u32::from_be_bytes(pack[4..8].try_into().unwrap()), 2);
        assert_eq!(u32::from_be_bytes(pack[8..12].try_into().unwrap()), 3);

        let parsed = read_pack(&pack).unwrap();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0], (ObjectType::Blob, blob));
        assert_eq!(parsed[1], (ObjectType::Tree, tree));
        assert_eq!(parsed[2], (ObjectType::Blob, big));
    }

    #[test]
    fn trailer_is_sha1_of_preceding_bytes() {
        let pack = write_pack(vec![(ObjectType::Blob, b"x".as_slice())], 1).unwrap();
        let (body, trailer) = pack.split_at(pack.len() - 20);
        assert_eq!(trailer, Sha1::digest(body).as_slice());
    }

    #[test]
    fn empty_pack_is_valid() {
        let pack = write_pack(Vec::<(ObjectType, &[u8])>::new(), 0).unwrap();
        assert!(read_pack(&pack).unwrap().is_empty());
    }

    #[test]
    fn delta_objects_abort_the_read() {
        let mut pack = Vec::new();
        pack.extend_from_slice(b"PACK");
        pack.extend_from_slice(&2u32.to_be_bytes());
        pack.extend_from_slice(&1u32.to_be_bytes());
        // OFS_DELTA (type 6), size 1.
        pack.push((6 << 4) | 1);

        let err = read_pack(&pack).unwrap_err();
        assert!(format!("{err:#}").contains("delta objects not supported"));
    }

    #[test]
    fn bad_signature_is_rejected() {
        assert!(read_pack(b"JUNK00000000").is_err());
    }

    #[test]
    fn header_varint_round_trips_edge_sizes() {
        for size in [0usize, 15, 16, 127, 128, 4096, 1 << 20] {
            let mut out = Vec::new();
            write_object_header(&mut out, ObjectType::Blob, size);
            let (kind, parsed, read) = read_object_header(&out).unwrap();
            assert_eq!(kind, ObjectType::Blob);
            assert_eq!(parsed, size);
            assert_eq!(read, out.len());
        }
    }
}
