//! Frame Surface (FS) — the mapped linear framebuffer. Grounded on
//! `screen_init`/`putpixel`/`memsetb`-based `draw_rectangle` in
//! `original_source/uspace/fb/fb.c`; the surface owns the same fields the
//! source keeps in `screenbuffer_t`'s companion `fb_info` globals (`addr`,
//! `xres`, `yres`, `scanline`, `pixelbytes`, `visual`).

use alloc::vec::Vec;

use crate::color::{Color, PixelFormat};

/// The mapped display plane. Never resized after construction; destroyed
/// only when the server tears down.
pub struct FrameSurface {
    base: Vec<u8>,
    width: u16,
    height: u16,
    scanline: usize,
    format: PixelFormat,
    invert_colors: bool,
    /// Lazily grown scratch line reused by `fill_rect`, per spec.md §4.2
    /// ("first line built in a scratch buffer ... then copied row by row").
    scratch: Vec<u8>,
}

impl FrameSurface {
    /// `scanline` is in bytes and must be at least `width * bytes_per_pixel`.
    pub fn new(width: u16, height: u16, scanline: usize, format: PixelFormat, invert_colors: bool) -> FrameSurface {
        let len = scanline * height as usize;
        FrameSurface {
            base: alloc::vec![0u8; len],
            width,
            height,
            scanline,
            format,
            invert_colors,
            scratch: Vec::new(),
        }
    }

    pub fn width(&self) -> u16 { self.width }
    pub fn height(&self) -> u16 { self.height }
    pub fn format(&self) -> PixelFormat { self.format }

    fn offset(&self, x: u16, y: u16) -> usize {
        y as usize * self.scanline + x as usize * self.format.bytes_per_pixel()
    }

    fn wire(&self, color: Color) -> Color {
        if self.invert_colors { color.complement() } else { color }
    }

    /// No clipping; caller guarantees `x < width`, `y < height`.
    pub fn put_pixel(&mut self, x: u16, y: u16, color: Color) {
        let bpp = self.format.bytes_per_pixel();
        let off = self.offset(x, y);
        let color = self.wire(color);
        self.format.pack(color, &mut self.base[off..off + bpp]);
    }

    pub fn get_pixel(&self, x: u16, y: u16) -> Color {
        let bpp = self.format.bytes_per_pixel();
        let off = self.offset(x, y);
        let raw = self.format.unpack(&self.base[off..off + bpp]);
        self.wire(raw)
    }

    /// Builds one scanline of `w` pixels in the scratch buffer, then
    /// `memcpy`s it into every row of the rectangle.
    pub fn fill_rect(&mut self, x: u16, y: u16, w: u16, h: u16, color: Color) {
        let bpp = self.format.bytes_per_pixel();
        let row_bytes = w as usize * bpp;
        if self.scratch.len() < row_bytes {
            self.scratch.resize(row_bytes, 0);
        }
        let wire = self.wire(color);
        for col in 0..w as usize {
            self.format.pack(wire, &mut self.scratch[col * bpp..col * bpp + bpp]);
        }
        for row in 0..h {
            let off = self.offset(x, y + row);
            self.base[off..off + row_bytes].copy_from_slice(&self.scratch[..row_bytes]);
        }
    }

    /// Row-by-row `memcpy` from `src`, which must already be encoded in
    /// this surface's codec (`src_stride` bytes per row, `w * bytes_per_pixel`
    /// bytes of which are meaningful).
    pub fn blit(&mut self, dst_x: u16, dst_y: u16, src: &[u8], src_stride: usize, w: u16, h: u16) {
        let bpp = self.format.bytes_per_pixel();
        let row_bytes = w as usize * bpp;
        for row in 0..h {
            let src_off = row as usize * src_stride;
            let dst_off = self.offset(dst_x, dst_y + row);
            self.base[dst_off..dst_off + row_bytes].copy_from_slice(&src[src_off..src_off + row_bytes]);
        }
    }

    /// Bitwise-NOT the unpacked 24-bit RGB at `(x,y)` and write it back.
    /// Applied on the decoded value so it composes correctly with
    /// `invert_colors` (both are involutions, and involutions compose).
    pub fn invert(&mut self, x: u16, y: u16) {
        let c = self.get_pixel(x, y);
        self.put_pixel(x, y, c.complement());
    }

    /// Direct row-major byte access for snapshotting into a pixmap.
    pub fn row_bytes(&self, y: u16) -> &[u8] {
        let off = y as usize * self.scanline;
        &self.base[off..off + self.width as usize * self.format.bytes_per_pixel()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface(invert: bool) -> FrameSurface {
        FrameSurface::new(32, 32, 32 * 4, PixelFormat::Argb8888, invert)
    }

    #[test]
    fn fill_then_readback() {
        let mut fs = surface(false);
        fs.fill_rect(10, 10, 20, 20, Color::rgb(0xff, 0, 0));
        for y in 10..30 {
            for x in 10..30 {
                assert_eq!(fs.get_pixel(x, y), Color::rgb(0xff, 0, 0));
            }
        }
        assert_eq!(fs.get_pixel(0, 0), Color::rgb(0, 0, 0));
    }

    #[test]
    fn invert_is_an_involution() {
        let mut fs = surface(false);
        fs.put_pixel(5, 5, Color::rgb(10, 20, 30));
        fs.invert(5, 5);
        fs.invert(5, 5);
        assert_eq!(fs.get_pixel(5, 5), Color::rgb(10, 20, 30));
    }

    #[test]
    fn invert_colors_is_symmetric_round_trip() {
        let mut fs = surface(true);
        let c = Color::rgb(10, 20, 30);
        fs.put_pixel(1, 1, c);
        assert_eq!(fs.get_pixel(1, 1), c);
    }

    #[test]
    fn blit_copies_rows_verbatim() {
        let mut fs = surface(false);
        let bpp = PixelFormat::Argb8888.bytes_per_pixel();
        let mut src = alloc::vec![0u8; 4 * bpp * 4];
        for row in 0..4 {
            for col in 0..4 {
                let off = row * 4 * bpp + col * bpp;
                PixelFormat::Argb8888.pack(Color::rgb(row as u8, col as u8, 0), &mut src[off..off + bpp]);
            }
        }
        fs.blit(2, 2, &src, 4 * bpp, 4, 4);
        for row in 0..4u16 {
            for col in 0..4u16 {
                assert_eq!(fs.get_pixel(2 + col, 2 + row), Color::rgb(row as u8, col as u8, 0));
            }
        }
    }
}
