//! LEB128 varints and the delta-coded postings stream of the UDFT3 format.

use crate::index::Posting;

pub fn encode_varint(mut v: u32, out: &mut Vec<u8>) {
    while v >= 0x80 {
        out.push((v as u8 & 0x7F) | 0x80);
        v >>= 7;
    }
    out.push(v as u8);
}

/// Decode one varint starting at `*pos`, advancing it. `None` on truncation or overflow.
pub fn decode_varint(input: &[u8], pos: &mut usize) -> Option<u32> {
    let mut result: u32 = 0;
    let mut shift = 0u32;
    loop {
        let byte = *input.get(*pos)?;
        *pos += 1;
        let bits = u32::from(byte & 0x7F);
        if shift == 28 && bits > 0x0F {
            return None;
        }
        result |= bits << shift;
        if byte & 0x80 == 0 {
            return Some(result);
        }
        shift += 7;
        if shift > 28 {
            return None;
        }
    }
}

/// Encode postings (sorted by doc id) as (delta, tf) varint pairs.
pub fn encode_postings(postings: &[Posting]) -> Vec<u8> {
    let mut out = Vec::with_capacity(postings.len() * 2);
    let mut prev = 0u32;
    for (i, p) in postings.iter().enumerate() {
        let delta = if i == 0 { p.doc_id } else { p.doc_id - prev };
        encode_varint(delta, &mut out);
        encode_varint(p.tf, &mut out);
        prev = p.doc_id;
    }
    out
}

pub fn decode_postings(bytes: &[u8], count: u32) -> Option<Vec<Posting>> {
    let mut out = Vec::with_capacity((count as usize).min(bytes.len() / 2));
    walk_postings(bytes, count, |p| out.push(p))?;
    Some(out)
}

/// Walk a postings stream without materializing it; returns the last (largest) doc id.
pub fn scan_postings(bytes: &[u8], count: u32) -> Option<Option<u32>> {
    let mut last = None;
    walk_postings(bytes, count, |p| last = Some(p.doc_id))?;
    Some(last)
}

fn walk_postings(bytes: &[u8], count: u32, mut visit: impl FnMut(Posting)) -> Option<()> {
    let mut pos = 0usize;
    let mut prev = 0u32;
    for i in 0..count {
        let delta = decode_varint(bytes, &mut pos)?;
        let tf = decode_varint(bytes, &mut pos)?;
        if i > 0 && delta == 0 {
            return None;
        }
        let doc_id = if i == 0 { delta } else { prev.checked_add(delta)? };
        prev = doc_id;
        visit(Posting { doc_id, tf });
    }
    Some(())
}
