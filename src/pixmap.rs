//! Pixmap Store (PS) — fixed-capacity table of off-screen bitmaps.
//! Grounded on `pixmap_t`/`shm2pixmap`/`vp2pixmap`/`vp_draw_pixmap` in
//! `original_source/uspace/fb/fb.c`.

use alloc::vec::Vec;

use crate::arena::{Arena, Handle};
use crate::color::Color;
use crate::error::{FbError, FbResult};
use crate::ppm;
use crate::surface::FrameSurface;
use crate::viewport::Viewport;

pub const MAX_PIXMAPS: usize = 256;

pub struct Pixmap {
    width: u16,
    height: u16,
    /// Row-major, encoded in the surface's codec so blits are `memcpy`.
    pixels: Vec<u8>,
    bpp: usize,
}

impl Pixmap {
    pub fn width(&self) -> u16 { self.width }
    pub fn height(&self) -> u16 { self.height }

    fn row(&self, y: u16) -> &[u8] {
        let row_bytes = self.width as usize * self.bpp;
        let off = y as usize * row_bytes;
        &self.pixels[off..off + row_bytes]
    }
}

pub struct PixmapStore {
    table: Arena<Pixmap>,
}

impl PixmapStore {
    pub fn new() -> PixmapStore { PixmapStore { table: Arena::with_capacity(MAX_PIXMAPS) } }

    pub fn get(&self, h: Handle) -> FbResult<&Pixmap> { self.table.get(h).ok_or(FbError::NotFound) }

    /// Looks up the handle currently occupying wire id `id`, used by the
    /// session layer to translate the small-integer pixmap ids the
    /// protocol carries into arena handles.
    pub fn handle_at(&self, id: usize) -> Option<Handle> { self.table.handle_at(id) }

    /// Decodes `shm` as a PPM and stores it as a new pixmap, encoded in
    /// `fs`'s codec so later draws are plain memcpy.
    pub fn create_from_shm(&mut self, fs: &FrameSurface, shm: &[u8]) -> FbResult<Handle> {
        let decoded = ppm::decode(shm)?;
        let bpp = fs.format().bytes_per_pixel();
        let mut pixels = alloc::vec![0u8; decoded.width as usize * decoded.height as usize * bpp];
        for y in 0..decoded.height {
            for x in 0..decoded.width {
                let src_off = (y as usize * decoded.width as usize + x as usize) * 3;
                let rgb = &decoded.rgb[src_off..src_off + 3];
                let color = Color::rgb(rgb[0], rgb[1], rgb[2]);
                let dst_off = (y as usize * decoded.width as usize + x as usize) * bpp;
                fs.format().pack(color, &mut pixels[dst_off..dst_off + bpp]);
            }
        }
        let pixmap = Pixmap { width: decoded.width, height: decoded.height, pixels, bpp };
        self.table.insert(pixmap).ok_or(FbError::LimitExceeded)
    }

    /// Copies the current contents of `viewport` out of `fs` into a new
    /// pixmap, clipped to FS extents.
    pub fn snapshot(&mut self, fs: &FrameSurface, viewport: &Viewport) -> FbResult<Handle> {
        let rect = viewport.rect();
        let bpp = fs.format().bytes_per_pixel();
        let w = rect.w.min(fs.width().saturating_sub(rect.x));
        let h = rect.h.min(fs.height().saturating_sub(rect.y));
        let mut pixels = alloc::vec![0u8; w as usize * h as usize * bpp];
        for row in 0..h {
            let src = fs.row_bytes(rect.y + row);
            let src_off = rect.x as usize * bpp;
            let row_bytes = w as usize * bpp;
            let dst_off = row as usize * row_bytes;
            pixels[dst_off..dst_off + row_bytes].copy_from_slice(&src[src_off..src_off + row_bytes]);
        }
        self.table.insert(Pixmap { width: w, height: h, pixels, bpp }).ok_or(FbError::LimitExceeded)
    }

    /// Draws a pixmap into a viewport at its origin, clipping to
    /// `min(pixmap, viewport)` dimensions silently (spec.md §4.4).
    pub fn draw(&self, fs: &mut FrameSurface, viewport: &Viewport, h: Handle) -> FbResult<()> {
        self.draw_at(fs, viewport, h, 0, 0)
    }

    /// Draws a pixmap into a viewport at offset `(x,y)`, clipping to the
    /// viewport bounds.
    pub fn draw_at(&self, fs: &mut FrameSurface, viewport: &Viewport, h: Handle, x: u16, y: u16) -> FbResult<()> {
        let pixmap = self.get(h)?;
        let rect = viewport.rect();
        if x >= rect.w || y >= rect.h {
            return Ok(());
        }
        let realw = pixmap.width.min(rect.w - x);
        let realh = pixmap.height.min(rect.h - y);
        for row in 0..realh {
            let src = pixmap.row(row);
            fs.blit(rect.x + x, rect.y + y + row, &src[..realw as usize * pixmap.bpp], pixmap.width as usize * pixmap.bpp, realw, 1);
        }
        Ok(())
    }

    pub fn destroy(&mut self, h: Handle) -> FbResult<()> {
        self.table.remove(h).map(|_| ()).ok_or(FbError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::PixelFormat;
    use crate::geometry::Rect;
    use crate::style::GFX_DEFAULT_STYLE;

    #[test]
    fn table_bound_is_enforced() {
        let fs = FrameSurface::new(8, 8, 8 * 4, PixelFormat::Argb8888, false);
        let mut store = PixmapStore::new();
        let ppm_4x4 = b"P3 1 1 255\n255 0 0\n";
        for _ in 0..MAX_PIXMAPS {
            store.create_from_shm(&fs, ppm_4x4).unwrap();
        }
        assert_eq!(store.create_from_shm(&fs, ppm_4x4).unwrap_err(), FbError::LimitExceeded);
    }

    #[test]
    fn ppm_to_pixmap_to_viewport_matches_corner() {
        let mut fs = FrameSurface::new(20, 20, 20 * 4, PixelFormat::Argb8888, false);
        let mut vp = Viewport::new(Rect::new(0, 0, 16, 16), 20, 20, GFX_DEFAULT_STYLE).unwrap();
        vp.clear(&mut fs);
        let mut store = PixmapStore::new();
        let src = b"P3 4 4 255\n\
            255 0 0  0 255 0  0 0 255  255 255 0\n\
            0 0 0  128 128 128  255 255 255  64 64 64\n\
            1 2 3  4 5 6  7 8 9  10 11 12\n\
            13 14 15  16 17 18  19 20 21  22 23 24\n";
        let h = store.create_from_shm(&fs, src).unwrap();
        store.draw(&mut fs, &vp, h).unwrap();
        assert_eq!(fs.get_pixel(0, 0), Color::rgb(255, 0, 0));
        assert_eq!(fs.get_pixel(3, 0), Color::rgb(255, 255, 0));
        // Untouched beyond the 4x4 pixmap.
        assert_eq!(fs.get_pixel(10, 10), GFX_DEFAULT_STYLE.bg_color);
    }

    #[test]
    fn destroy_frees_slot_for_reuse() {
        let fs = FrameSurface::new(8, 8, 8 * 4, PixelFormat::Argb8888, false);
        let mut store = PixmapStore::new();
        let h = store.create_from_shm(&fs, b"P3 1 1 255\n1 2 3\n").unwrap();
        store.destroy(h).unwrap();
        assert_eq!(store.get(h).unwrap_err(), FbError::NotFound);
        assert!(store.create_from_shm(&fs, b"P3 1 1 255\n1 2 3\n").is_ok());
    }
}
