pub(crate) fn mul_div255_u16(x: u16, y: u16) -> u16 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u16
}

pub(crate) fn mul_div255_u8(x: u16, y: u16) -> u8 {
    mul_div255_u16(x, y) as u8
}

/// Premultiply straight-alpha RGBA8 pixels in place.
pub(crate) fn premultiply_rgba8_in_place(rgba: &mut [u8]) {
    for px in rgba.chunks_exact_mut(4) {
        let a = u16::from(px[3]);
        if a == 255 {
            continue;
        }
        px[0] = mul_div255_u8(u16::from(px[0]), a);
        px[1] = mul_div255_u8(u16::from(px[1]), a);
        px[2] = mul_div255_u8(u16::from(px[2]), a);
    }
}

/// Undo premultiplication in place, for encoders that expect straight alpha (PNG).
pub(crate) fn unpremultiply_rgba8_in_place(rgba: &mut [u8]) {
    for px in rgba.chunks_exact_mut(4) {
        let a = u32::from(px[3]);
        if a == 255 || a == 0 {
            continue;
        }
        for c in &mut px[..3] {
            *c = ((u32::from(*c) * 255 + a / 2) / a).min(255) as u8;
        }
    }
}

/// Flatten premultiplied RGBA8 over an opaque background, writing packed RGB8.
pub(crate) fn flatten_premul_to_rgb8(dst: &mut Vec<u8>, src_premul: &[u8], bg: [u8; 3]) {
    dst.clear();
    dst.reserve(src_premul.len() / 4 * 3);
    for s in src_premul.chunks_exact(4) {
        let inv = 255u16 - u16::from(s[3]);
        for c in 0..3 {
            let v = u16::from(s[c]) + mul_div255_u16(u16::from(bg[c]), inv);
            dst.push(v.min(255) as u8);
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/math.rs"]
mod tests;
