//! H.264 NAL unit plumbing between the container (AVCC, length-prefixed) and the codec
//! (Annex-B, start-code delimited).

/// NAL unit type for H.264, from the low five bits of the header byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NalType {
    Slice,
    Idr,
    Sei,
    Sps,
    Pps,
    Aud,
    Other(u8),
}

impl From<u8> for NalType {
    fn from(header: u8) -> Self {
        match header & 0x1F {
            1 => Self::Slice,
            5 => Self::Idr,
            6 => Self::Sei,
            7 => Self::Sps,
            8 => Self::Pps,
            9 => Self::Aud,
            other => Self::Other(other),
        }
    }
}

pub const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// Convert length-prefixed NAL units to Annex-B. A truncated trailing unit is dropped.
pub fn avcc_to_annexb(avcc: &[u8], length_size: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(avcc.len() + 64);
    let mut offset = 0;

    while offset + length_size <= avcc.len() {
        let nal_len = avcc[offset..offset + length_size]
            .iter()
            .fold(0usize, |acc, &b| (acc << 8) | usize::from(b));
        offset += length_size;
        if offset + nal_len > avcc.len() {
            break;
        }
        out.extend_from_slice(&START_CODE);
        out.extend_from_slice(&avcc[offset..offset + nal_len]);
        offset += nal_len;
    }

    out
}

/// Split an Annex-B stream into NAL unit payloads (start codes removed).
///
/// Accepts both 3- and 4-byte start codes.
pub fn split_annexb(data: &[u8]) -> Vec<&[u8]> {
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            starts.push(i + 3);
            i += 3;
        } else {
            i += 1;
        }
    }

    let mut units = Vec::with_capacity(starts.len());
    for (n, &start) in starts.iter().enumerate() {
        let mut end = match starts.get(n + 1) {
            Some(&next) => next - 3,
            None => data.len(),
        };
        // A 4-byte start code leaves one zero byte at the tail of the previous unit.
        while end > start && data[end - 1] == 0 && starts.get(n + 1).is_some() {
            end -= 1;
        }
        if end > start {
            units.push(&data[start..end]);
        }
    }
    units
}

/// Convert Annex-B to 4-byte length-prefixed AVCC, dropping parameter sets and access unit
/// delimiters (they live in the `avcC` box, not in samples).
pub fn annexb_to_avcc(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for nal in split_annexb(data) {
        match NalType::from(nal[0]) {
            NalType::Sps | NalType::Pps | NalType::Aud => continue,
            _ => {}
        }
        out.extend_from_slice(&(nal.len() as u32).to_be_bytes());
        out.extend_from_slice(nal);
    }
    out
}

/// Prepend SPS/PPS to an Annex-B access unit.
pub fn prepend_sps_pps(sps: &[u8], pps: &[u8], frame: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(sps.len() + pps.len() + frame.len() + 8);
    out.extend_from_slice(&START_CODE);
    out.extend_from_slice(sps);
    out.extend_from_slice(&START_CODE);
    out.extend_from_slice(pps);
    out.extend_from_slice(frame);
    out
}

/// Parameter sets found in an Annex-B stream: `(sps, pps)`, first of each.
pub fn find_parameter_sets(data: &[u8]) -> (Option<Vec<u8>>, Option<Vec<u8>>) {
    let mut sps = None;
    let mut pps = None;
    for nal in split_annexb(data) {
        match NalType::from(nal[0]) {
            NalType::Sps if sps.is_none() => sps = Some(nal.to_vec()),
            NalType::Pps if pps.is_none() => pps = Some(nal.to_vec()),
            _ => {}
        }
    }
    (sps, pps)
}

/// `true` when the access unit contains an IDR slice.
pub fn contains_idr(data: &[u8]) -> bool {
    split_annexb(data)
        .iter()
        .any(|nal| NalType::from(nal[0]) == NalType::Idr)
}

#[cfg(test)]
#[path = "../../tests/unit/media/nal.rs"]
mod tests;
