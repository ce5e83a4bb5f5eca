//! Pitch-aware plane copies.

/// Copy `height` rows of `row_size` bytes from `src` to `dst`, honoring the
/// pitch of each side. Used by copy-on-write and by filters that repack
/// planes.
pub fn copy_plane(
    dst: &mut [u8],
    dst_pitch: usize,
    src: &[u8],
    src_pitch: usize,
    row_size: usize,
    height: usize,
) {
    if row_size == 0 || height == 0 {
        return;
    }
    if dst_pitch == src_pitch && src_pitch == row_size {
        // Contiguous planes copy in one shot.
        let len = row_size * height;
        dst[..len].copy_from_slice(&src[..len]);
        return;
    }
    for y in 0..height {
        let s = y * src_pitch;
        let d = y * dst_pitch;
        dst[d..d + row_size].copy_from_slice(&src[s..s + row_size]);
    }
}
