//! Client Graphics Context (CGC) — the drawing-side API layered over a
//! small ops vtable, one-to-one with `gfx_context_ops_t` and the
//! `gfx_set_clip_rect`/`gfx_set_color`/`gfx_fill_rect`/`gfx_update`/
//! `gfx_bitmap_*` free functions exercised against a fake in-process server
//! in `original_source/uspace/lib/ipcgfx/test/ipcgfx.c`. That file wires its
//! `test_gc_ops` table to a real IPC connection purely so the test can run
//! over the loopback transport; `LocalGc` below plays the same role without
//! a connection, and a real deployment's IPC-backed `GraphicsContextOps`
//! would be interchangeable with it behind `GraphicsContext<O>`.

use alloc::vec::Vec;

use crate::arena::{Arena, Handle};
use crate::color::Color;
use crate::error::{FbError, FbResult};
use crate::geometry::{Point, Rect};
use crate::surface::FrameSurface;

/// Bitmap creation flags, mirroring `gfx_bitmap_params_t` (spec.md §4.8).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct BitmapParams {
    pub rect: Rect,
    /// Mirrors `bmpf_direct_output`: the context allocates the backing
    /// store itself and hands it back so the caller can write pixels
    /// straight into it, skipping the copy `bitmap_render` would otherwise
    /// need to perform from a caller-owned buffer.
    pub direct_output: bool,
}

/// Describes a bitmap's backing store, mirroring `gfx_bitmap_alloc_t`
/// (`pitch`, `off0`, `pixels`).
#[derive(Debug, Clone, PartialEq)]
pub struct BitmapAlloc {
    pub pitch: usize,
    pub off0: usize,
    pub pixels: Vec<u8>,
}

/// The vtable a graphics context is built on (spec.md §4.8). Every method
/// here corresponds to one entry of `gfx_context_ops_t`.
pub trait GraphicsContextOps {
    /// Opaque per-context bitmap identifier, analogous to the `void *`
    /// the source's ops table passes around.
    type Bitmap;

    fn set_clip_rect(&mut self, rect: Option<Rect>) -> FbResult<()>;
    fn set_color(&mut self, color: Color) -> FbResult<()>;
    fn fill_rect(&mut self, rect: Rect) -> FbResult<()>;
    fn update(&mut self) -> FbResult<()>;
    fn bitmap_create(&mut self, params: &BitmapParams, alloc: Option<BitmapAlloc>) -> FbResult<(Self::Bitmap, BitmapAlloc)>;
    fn bitmap_destroy(&mut self, bitmap: Self::Bitmap) -> FbResult<()>;
    fn bitmap_render(&mut self, bitmap: &Self::Bitmap, srect: Rect, offs: Point) -> FbResult<()>;
    fn bitmap_get_alloc(&self, bitmap: &Self::Bitmap) -> FbResult<BitmapAlloc>;

    /// Writes `data` into the bitmap's backing store at byte `offset`.
    /// The source hands a direct-output bitmap's shared memory address
    /// back to the client so it can `memcpy` into it directly; crossing a
    /// Rust trait boundary can't hand out a raw pointer that way, so this
    /// method stands in for that write.
    fn bitmap_write(&mut self, bitmap: &Self::Bitmap, offset: usize, data: &[u8]) -> FbResult<()>;
}

/// The client-facing handle, wrapping whichever `GraphicsContextOps` is
/// behind it (local/direct or IPC-backed) behind one API, mirroring
/// `gfx_context_t` plus the free functions that operate on it.
pub struct GraphicsContext<O: GraphicsContextOps> {
    ops: O,
}

impl<O: GraphicsContextOps> GraphicsContext<O> {
    pub fn new(ops: O) -> GraphicsContext<O> { GraphicsContext { ops } }

    /// `rect = None` clears clipping entirely (`gfx_set_clip_rect(gc, NULL)`).
    pub fn set_clip_rect(&mut self, rect: Option<Rect>) -> FbResult<()> { self.ops.set_clip_rect(rect) }
    pub fn set_color(&mut self, color: Color) -> FbResult<()> { self.ops.set_color(color) }
    pub fn fill_rect(&mut self, rect: Rect) -> FbResult<()> { self.ops.fill_rect(rect) }
    pub fn update(&mut self) -> FbResult<()> { self.ops.update() }

    pub fn bitmap_create(&mut self, params: &BitmapParams, alloc: Option<BitmapAlloc>) -> FbResult<Bitmap<O>> {
        let (handle, alloc) = self.ops.bitmap_create(params, alloc)?;
        Ok(Bitmap { handle: Some(handle), alloc, direct_output: params.direct_output })
    }
}

/// A created bitmap, bound to the context that created it. Destruction is
/// explicit via `destroy`, matching `gfx_bitmap_destroy`'s call convention
/// rather than an RAII `Drop`.
pub struct Bitmap<O: GraphicsContextOps> {
    handle: Option<O::Bitmap>,
    alloc: BitmapAlloc,
    direct_output: bool,
}

impl<O: GraphicsContextOps> Bitmap<O> {
    pub fn alloc(&self) -> &BitmapAlloc { &self.alloc }
    pub fn is_direct_output(&self) -> bool { self.direct_output }

    /// Writes pixel bytes directly into the bitmap's backing store. For a
    /// direct-output bitmap this is the whole point: the write lands where
    /// `bitmap_render` will read from without any intervening copy on the
    /// context's side.
    pub fn write_pixels(&mut self, gc: &mut GraphicsContext<O>, offset: usize, data: &[u8]) -> FbResult<()> {
        let handle = self.handle.as_ref().ok_or(FbError::NotFound)?;
        gc.ops.bitmap_write(handle, offset, data)?;
        self.alloc.pixels[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Renders source rectangle `srect` of the bitmap at offset `offs` in
    /// the context's clip/target, mirroring `gfx_bitmap_render`.
    pub fn render(&self, gc: &mut GraphicsContext<O>, srect: Rect, offs: Point) -> FbResult<()> {
        let handle = self.handle.as_ref().ok_or(FbError::NotFound)?;
        gc.ops.bitmap_render(handle, srect, offs)
    }

    /// Re-reads the allocation description from the context, e.g. after a
    /// write performed directly against the context rather than through
    /// `write_pixels`.
    pub fn refresh_alloc(&mut self, gc: &GraphicsContext<O>) -> FbResult<()> {
        let handle = self.handle.as_ref().ok_or(FbError::NotFound)?;
        self.alloc = gc.ops.bitmap_get_alloc(handle)?;
        Ok(())
    }

    pub fn destroy(mut self, gc: &mut GraphicsContext<O>) -> FbResult<()> {
        let handle = self.handle.take().ok_or(FbError::NotFound)?;
        gc.ops.bitmap_destroy(handle)
    }
}

struct LocalBitmap {
    rect: Rect,
    pitch: usize,
    pixels: Vec<u8>,
}

const MAX_LOCAL_BITMAPS: usize = 32;

/// A `GraphicsContextOps` that draws straight into an owned `FrameSurface`,
/// standing in for the connection-backed GC the source's test harness
/// stands up in `test_ipcgc_conn`/`test_gc_ops`. Grounded method-for-method
/// on `test_gc_set_clip_rect`/`test_gc_set_color`/`test_gc_fill_rect`/
/// `test_gc_update`/`test_gc_bitmap_create`/`test_gc_bitmap_destroy`/
/// `test_gc_bitmap_render`/`test_gc_bitmap_get_alloc`.
pub struct LocalGc {
    fs: FrameSurface,
    clip: Option<Rect>,
    color: Color,
    bitmaps: Arena<LocalBitmap>,
}

impl LocalGc {
    pub fn new(fs: FrameSurface) -> LocalGc {
        LocalGc { fs, clip: None, color: Color::default(), bitmaps: Arena::with_capacity(MAX_LOCAL_BITMAPS) }
    }

    pub fn surface(&self) -> &FrameSurface { &self.fs }

    fn clip_intersect(&self, rect: Rect) -> Rect {
        let c = match self.clip {
            None => return rect,
            Some(c) => c,
        };
        let x0 = rect.x.max(c.x);
        let y0 = rect.y.max(c.y);
        let x1 = rect.x1().min(c.x1());
        let y1 = rect.y1().min(c.y1());
        if x1 > x0 && y1 > y0 { Rect::new(x0, y0, x1 - x0, y1 - y0) } else { Rect::new(x0, y0, 0, 0) }
    }
}

/// Convenience constructor for the common case: a local context drawing
/// directly onto its own frame surface.
pub fn local_context(fs: FrameSurface) -> GraphicsContext<LocalGc> { GraphicsContext::new(LocalGc::new(fs)) }

impl GraphicsContextOps for LocalGc {
    type Bitmap = Handle;

    fn set_clip_rect(&mut self, rect: Option<Rect>) -> FbResult<()> {
        self.clip = rect;
        Ok(())
    }

    fn set_color(&mut self, color: Color) -> FbResult<()> {
        self.color = color;
        Ok(())
    }

    fn fill_rect(&mut self, rect: Rect) -> FbResult<()> {
        let clipped = self.clip_intersect(rect).clip_to_bounds(self.fs.width(), self.fs.height());
        if clipped.w == 0 || clipped.h == 0 {
            return Ok(());
        }
        self.fs.fill_rect(clipped.x, clipped.y, clipped.w, clipped.h, self.color);
        Ok(())
    }

    fn update(&mut self) -> FbResult<()> {
        // Every draw above already lands directly on `fs`; nothing is
        // buffered client-side that needs flushing in this implementation.
        Ok(())
    }

    fn bitmap_create(&mut self, params: &BitmapParams, alloc: Option<BitmapAlloc>) -> FbResult<(Handle, BitmapAlloc)> {
        if params.rect.w == 0 || params.rect.h == 0 {
            return Err(FbError::InvalidArgs);
        }
        let bpp = self.fs.format().bytes_per_pixel();
        let pitch = params.rect.w as usize * bpp;
        let pixels = match alloc {
            Some(a) => a.pixels,
            None => alloc::vec![0u8; pitch * params.rect.h as usize],
        };
        if pixels.len() < pitch * params.rect.h as usize {
            return Err(FbError::InvalidArgs);
        }
        let out_alloc = BitmapAlloc { pitch, off0: 0, pixels: pixels.clone() };
        let handle = self.bitmaps.insert(LocalBitmap { rect: params.rect, pitch, pixels }).ok_or(FbError::LimitExceeded)?;
        Ok((handle, out_alloc))
    }

    fn bitmap_destroy(&mut self, bitmap: Handle) -> FbResult<()> {
        self.bitmaps.remove(bitmap).map(|_| ()).ok_or(FbError::NotFound)
    }

    fn bitmap_render(&mut self, bitmap: &Handle, srect: Rect, offs: Point) -> FbResult<()> {
        let bm = self.bitmaps.get(*bitmap).ok_or(FbError::NotFound)?;
        let bpp = self.fs.format().bytes_per_pixel();
        let w = srect.w.min(bm.rect.w.saturating_sub(srect.x));
        let h = srect.h.min(bm.rect.h.saturating_sub(srect.y));
        // Re-clip against the Frame Surface: `offs` is caller-controlled and
        // the bitmap-bounds-clipped w/h above says nothing about the
        // destination's own bounds.
        let dest = Rect::new(offs.x, offs.y, w, h).clip_to_bounds(self.fs.width(), self.fs.height());
        if dest.w == 0 || dest.h == 0 {
            return Ok(());
        }
        let row_bytes = dest.w as usize * bpp;
        let pitch = bm.pitch;
        for row in 0..dest.h {
            let src_off = (srect.y + row) as usize * pitch + srect.x as usize * bpp;
            self.fs.blit(dest.x, dest.y + row, &bm.pixels[src_off..src_off + row_bytes], pitch, dest.w, 1);
        }
        Ok(())
    }

    fn bitmap_get_alloc(&self, bitmap: &Handle) -> FbResult<BitmapAlloc> {
        let bm = self.bitmaps.get(*bitmap).ok_or(FbError::NotFound)?;
        Ok(BitmapAlloc { pitch: bm.pitch, off0: 0, pixels: bm.pixels.clone() })
    }

    fn bitmap_write(&mut self, bitmap: &Handle, offset: usize, data: &[u8]) -> FbResult<()> {
        let bm = self.bitmaps.get_mut(*bitmap).ok_or(FbError::NotFound)?;
        if offset + data.len() > bm.pixels.len() {
            return Err(FbError::InvalidArgs);
        }
        bm.pixels[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::PixelFormat;

    fn surface() -> FrameSurface { FrameSurface::new(64, 64, 64 * 4, PixelFormat::Argb8888, false) }

    #[test]
    fn fill_rect_is_clipped_to_clip_rect() {
        let mut gc = local_context(surface());
        gc.set_clip_rect(Some(Rect::new(10, 10, 10, 10))).unwrap();
        gc.set_color(Color::rgb(0xff, 0, 0)).unwrap();
        gc.fill_rect(Rect::new(0, 0, 64, 64)).unwrap();
        assert_eq!(gc.ops.surface().get_pixel(15, 15), Color::rgb(0xff, 0, 0));
        assert_eq!(gc.ops.surface().get_pixel(5, 5), Color::default());
        assert_eq!(gc.ops.surface().get_pixel(25, 25), Color::default());
    }

    #[test]
    fn clearing_clip_rect_restores_unclipped_fills() {
        let mut gc = local_context(surface());
        gc.set_clip_rect(Some(Rect::new(0, 0, 4, 4))).unwrap();
        gc.set_clip_rect(None).unwrap();
        gc.set_color(Color::rgb(0, 0xff, 0)).unwrap();
        gc.fill_rect(Rect::new(0, 0, 64, 64)).unwrap();
        assert_eq!(gc.ops.surface().get_pixel(63, 63), Color::rgb(0, 0xff, 0));
    }

    #[test]
    fn bitmap_create_destroy_round_trips() {
        let mut gc = local_context(surface());
        let bmp = gc.bitmap_create(&BitmapParams { rect: Rect::new(0, 0, 4, 4), direct_output: false }, None).unwrap();
        assert_eq!(bmp.alloc().pixels.len(), 4 * 4 * 4);
        bmp.destroy(&mut gc).unwrap();
    }

    #[test]
    fn bitmap_create_rejects_zero_sized_rect() {
        let mut gc = local_context(surface());
        let err = gc.bitmap_create(&BitmapParams { rect: Rect::new(0, 0, 0, 4), direct_output: false }, None).unwrap_err();
        assert_eq!(err, FbError::InvalidArgs);
    }

    /// Scenario: a client creates a direct-output bitmap, writes pixels
    /// straight into its backing store (no intervening upload step), then
    /// renders it — the rendered pixels must match what was written.
    #[test]
    fn direct_output_bitmap_write_then_render_round_trips() {
        let mut gc = local_context(surface());
        let params = BitmapParams { rect: Rect::new(0, 0, 2, 2), direct_output: true };
        let mut bmp = gc.bitmap_create(&params, None).unwrap();
        assert!(bmp.is_direct_output());

        let bpp = PixelFormat::Argb8888.bytes_per_pixel();
        let mut row0 = alloc::vec![0u8; 2 * bpp];
        PixelFormat::Argb8888.pack(Color::rgb(1, 2, 3), &mut row0[0..bpp]);
        PixelFormat::Argb8888.pack(Color::rgb(4, 5, 6), &mut row0[bpp..2 * bpp]);
        bmp.write_pixels(&mut gc, 0, &row0).unwrap();

        let mut row1 = alloc::vec![0u8; 2 * bpp];
        PixelFormat::Argb8888.pack(Color::rgb(7, 8, 9), &mut row1[0..bpp]);
        PixelFormat::Argb8888.pack(Color::rgb(10, 11, 12), &mut row1[bpp..2 * bpp]);
        let pitch = bmp.alloc().pitch;
        bmp.write_pixels(&mut gc, pitch, &row1).unwrap();

        bmp.render(&mut gc, Rect::new(0, 0, 2, 2), Point::new(10, 10)).unwrap();

        assert_eq!(gc.ops.surface().get_pixel(10, 10), Color::rgb(1, 2, 3));
        assert_eq!(gc.ops.surface().get_pixel(11, 10), Color::rgb(4, 5, 6));
        assert_eq!(gc.ops.surface().get_pixel(10, 11), Color::rgb(7, 8, 9));
        assert_eq!(gc.ops.surface().get_pixel(11, 11), Color::rgb(10, 11, 12));

        bmp.destroy(&mut gc).unwrap();
    }

    #[test]
    fn fill_rect_is_clamped_to_frame_surface_bounds() {
        let mut gc = local_context(surface());
        gc.set_color(Color::rgb(0xff, 0, 0)).unwrap();
        // Right edge overflows u16; must not panic and must not paint past
        // the real surface.
        assert!(gc.fill_rect(Rect::new(0xF000, 0, 0x2000, 10)).is_ok());
        assert_eq!(gc.ops.surface().get_pixel(63, 0), Color::default());
    }

    #[test]
    fn bitmap_render_clamps_offset_to_frame_surface_bounds() {
        let mut gc = local_context(surface());
        let params = BitmapParams { rect: Rect::new(0, 0, 4, 4), direct_output: false };
        let bmp = gc.bitmap_create(&params, None).unwrap();
        // An offscreen destination offset must be clamped away rather than
        // panicking on an out-of-range blit.
        bmp.render(&mut gc, Rect::new(0, 0, 4, 4), Point::new(1000, 1000)).unwrap();
    }

    #[test]
    fn bitmap_render_clips_to_source_rect_bounds() {
        let mut gc = local_context(surface());
        let params = BitmapParams { rect: Rect::new(0, 0, 4, 4), direct_output: false };
        let bmp = gc.bitmap_create(&params, None).unwrap();
        // Requesting a source rect larger than the bitmap must not panic
        // and must clip silently, matching the Pixmap Store's own clipping
        // convention.
        bmp.render(&mut gc, Rect::new(0, 0, 100, 100), Point::new(0, 0)).unwrap();
    }
}
