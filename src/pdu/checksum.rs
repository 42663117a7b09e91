//! Fletcher checksum as used for LSPs (ISO 8473 annex C).

/// Number of bytes which can be summed before the accumulators have to be reduced.
const MODX: usize = 4102;

/// Compute the checksum over `data` and store it at `offset`. Any value present at `offset` is
/// ignored. Returns the stored checksum.
///
/// # Panics
///
/// Panics if `offset + 2 > data.len()`.
pub fn compute(data: &mut [u8], offset: usize) -> u16 {
    data[offset] = 0;
    data[offset + 1] = 0;

    let (c0, c1) = sums(data);
    let mut x = ((data.len() - offset - 1) as i64 * c0 - c1) % 255;
    if x <= 0 {
        x += 255;
    }
    let mut y = 510 - c0 - x;
    if y > 255 {
        y -= 255;
    }

    data[offset] = x as u8;
    data[offset + 1] = y as u8;
    u16::from_be_bytes([x as u8, y as u8])
}

/// Verify a checksum previously stored with [`compute`].
pub fn verify(data: &[u8]) -> bool {
    sums(data) == (0, 0)
}

fn sums(data: &[u8]) -> (i64, i64) {
    let (mut c0, mut c1) = (0i64, 0i64);
    for chunk in data.chunks(MODX) {
        for b in chunk {
            c0 += *b as i64;
            c1 += c0;
        }
        c0 %= 255;
        c1 %= 255;
    }
    (c0, c1)
}
