//! RGB565 packing plus the YUV math the camera backends repack with.

/// Packs 8-bit RGB into RGB565.
pub fn pack(r: u8, g: u8, b: u8) -> u16 {
    (((r as u16) & 0xF8) << 8) | (((g as u16) & 0xFC) << 3) | ((b as u16) >> 3)
}

/// Expands RGB565 back to 8-bit channels, replicating the high bits so
/// full-scale values round-trip to 255.
pub fn unpack(pixel: u16) -> (u8, u8, u8) {
    let r5 = ((pixel >> 11) & 0x1F) as u8;
    let g6 = ((pixel >> 5) & 0x3F) as u8;
    let b5 = (pixel & 0x1F) as u8;
    ((r5 << 3) | (r5 >> 2), (g6 << 2) | (g6 >> 4), (b5 << 3) | (b5 >> 2))
}

/// Reads the pixel at `index` from a little-endian RGB565 buffer.
pub fn get(data: &[u8], index: usize) -> u16 {
    u16::from_le_bytes([data[index * 2], data[index * 2 + 1]])
}

/// Writes the pixel at `index` into a little-endian RGB565 buffer.
pub fn put(data: &mut [u8], index: usize, pixel: u16) {
    data[index * 2..index * 2 + 2].copy_from_slice(&pixel.to_le_bytes());
}

/// BT.601 YUV to RGB.
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;
    let r = y + 1.402 * v;
    let g = y - 0.344 * u - 0.714 * v;
    let b = y + 1.772 * u;
    (
        r.clamp(0.0, 255.0) as u8,
        g.clamp(0.0, 255.0) as u8,
        b.clamp(0.0, 255.0) as u8,
    )
}
