//! Viewport Engine (VE) — a rectangular sub-region of the Frame Surface
//! with its own text grid, cursor and optional back buffer. Grounded on
//! `viewport_t` and `scroll_port_db`/`scroll_port_nodb`/`draw_glyph` in
//! `original_source/uspace/fb/fb.c` (newer revision).

use alloc::vec::Vec;

use crate::color::Color;
use crate::error::{FbError, FbResult};
use crate::font::{FontTable, FONT_H, FONT_W};
use crate::geometry::Rect;
use crate::style::Style;
use crate::surface::FrameSurface;

pub const MAX_VIEWPORTS: usize = 128;

pub struct Viewport {
    rect: Rect,
    rows: u16,
    cols: u16,
    style: Style,
    cursor_row: u16,
    cursor_col: u16,
    cursor_active: bool,
    cursor_shown: bool,
    back_buffer: Option<Vec<u8>>,
    back_offset: u16,
    paused_count: u32,
}

impl Viewport {
    /// Fails with `InvalidArgs` if the rectangle has a zero dimension, does
    /// not fit within `(fs_width, fs_height)`, or is smaller than one
    /// glyph cell (spec.md §4.3).
    pub fn new(rect: Rect, fs_width: u16, fs_height: u16, style: Style) -> FbResult<Viewport> {
        if rect.w == 0 || rect.h == 0 {
            return Err(FbError::InvalidArgs);
        }
        if !rect.fits_within(fs_width, fs_height) {
            return Err(FbError::InvalidArgs);
        }
        if rect.w < FONT_W || rect.h < FONT_H {
            return Err(FbError::InvalidArgs);
        }
        Ok(Viewport {
            rect,
            rows: rect.h / FONT_H,
            cols: rect.w / FONT_W,
            style,
            cursor_row: 0,
            cursor_col: 0,
            cursor_active: false,
            cursor_shown: false,
            back_buffer: None,
            back_offset: 0,
            paused_count: 0,
        })
    }

    pub fn rect(&self) -> Rect { self.rect }
    pub fn rows(&self) -> u16 { self.rows }
    pub fn cols(&self) -> u16 { self.cols }
    pub fn style(&self) -> Style { self.style }
    pub fn set_style(&mut self, style: Style) { self.style = style; }
    pub fn cursor_active(&self) -> bool { self.cursor_active }
    pub fn has_double_buffer(&self) -> bool { self.back_buffer.is_some() }

    fn bytes_per_pixel(&self, fs: &FrameSurface) -> usize { fs.format().bytes_per_pixel() }

    /// Writes one pixel at viewport-relative `(x,y)` through to FS (unless
    /// suspended by `paused_count`) and, if present, to the back buffer at
    /// the rotated offset.
    fn put_pixel(&mut self, fs: &mut FrameSurface, x: u16, y: u16, color: Color) {
        if self.paused_count == 0 {
            fs.put_pixel(self.rect.x + x, self.rect.y + y, color);
        }
        if let Some(buf) = &mut self.back_buffer {
            let bpp = fs.format().bytes_per_pixel();
            let by = (y + self.back_offset) % self.rect.h;
            let off = (by as usize * self.rect.w as usize + x as usize) * bpp;
            fs.format().pack(color, &mut buf[off..off + bpp]);
        }
    }

    pub fn clear(&mut self, fs: &mut FrameSurface) {
        let bg = self.style.bg_color;
        if self.paused_count == 0 {
            fs.fill_rect(self.rect.x, self.rect.y, self.rect.w, self.rect.h, bg);
        }
        if self.back_buffer.is_some() {
            self.fill_back_rect(fs, 0, 0, self.rect.w, self.rect.h, bg);
        }
        self.cursor_shown = false;
    }

    fn fill_back_rect(&mut self, fs: &FrameSurface, x: u16, y: u16, w: u16, h: u16, color: Color) {
        let bpp = fs.format().bytes_per_pixel();
        let rect_h = self.rect.h;
        let rect_w = self.rect.w as usize;
        let back_offset = self.back_offset;
        if let Some(buf) = &mut self.back_buffer {
            let mut packed = alloc::vec![0u8; bpp];
            fs.format().pack(color, &mut packed);
            for row in y..y + h {
                let by = (row + back_offset) % rect_h;
                for col in x..x + w {
                    let off = (by as usize * rect_w + col as usize) * bpp;
                    buf[off..off + bpp].copy_from_slice(&packed);
                }
            }
        }
    }

    /// Enables or disables double buffering, (de)allocating the back
    /// buffer. Enabling re-synchronises it from the current FS contents.
    pub fn set_double_buffer(&mut self, fs: &FrameSurface, enable: bool) {
        if enable {
            let bpp = self.bytes_per_pixel(fs);
            let mut buf = alloc::vec![0u8; self.rect.w as usize * self.rect.h as usize * bpp];
            for row in 0..self.rect.h {
                let src = fs.row_bytes(self.rect.y + row);
                let row_off = (row as usize * self.rect.w as usize) * bpp;
                let row_bytes = self.rect.w as usize * bpp;
                let src_off = self.rect.x as usize * bpp;
                buf[row_off..row_off + row_bytes].copy_from_slice(&src[src_off..src_off + row_bytes]);
            }
            self.back_buffer = Some(buf);
            self.back_offset = 0;
        } else {
            self.back_buffer = None;
            self.back_offset = 0;
        }
    }

    pub fn suspend(&mut self) { self.paused_count += 1; }
    pub fn resume(&mut self) { self.paused_count = self.paused_count.saturating_sub(1); }

    /// Scrolls by `n * FONT_H` pixels; positive scrolls content up
    /// (revealing new rows at the bottom), negative scrolls down.
    /// `|n| >= rows` is rejected by the caller (session layer), not here.
    pub fn scroll(&mut self, fs: &mut FrameSurface, n: i32) {
        if n == 0 {
            return;
        }
        let delta = (n.unsigned_abs() as u16).saturating_mul(FONT_H).min(self.rect.h);
        let bg = self.style.bg_color;
        if let Some(_) = &self.back_buffer {
            if n > 0 {
                self.back_offset = (self.back_offset + delta) % self.rect.h;
                let exposed_start = self.rect.h - delta;
                self.fill_back_rect(fs, 0, exposed_start, self.rect.w, delta, bg);
            } else {
                self.back_offset = (self.back_offset + self.rect.h - delta % self.rect.h) % self.rect.h;
                self.fill_back_rect(fs, 0, 0, self.rect.w, delta, bg);
            }
            self.refresh_from_back_buffer(fs);
        } else if n > 0 {
            let bpp = fs.format().bytes_per_pixel();
            let move_rows = self.rect.h - delta;
            for row in 0..move_rows {
                let src_y = self.rect.y + row + delta;
                let row_bytes = self.rect.w as usize * bpp;
                let src_off_in_row = self.rect.x as usize * bpp;
                let src = fs.row_bytes(src_y)[src_off_in_row..src_off_in_row + row_bytes].to_vec();
                let dst_y = self.rect.y + row;
                fs.blit(self.rect.x, dst_y, &src, row_bytes, self.rect.w, 1);
            }
            fs.fill_rect(self.rect.x, self.rect.y + move_rows, self.rect.w, delta, bg);
        } else {
            let bpp = fs.format().bytes_per_pixel();
            let move_rows = self.rect.h - delta;
            for row in (0..move_rows).rev() {
                let src_y = self.rect.y + row;
                let row_bytes = self.rect.w as usize * bpp;
                let src_off_in_row = self.rect.x as usize * bpp;
                let src = fs.row_bytes(src_y)[src_off_in_row..src_off_in_row + row_bytes].to_vec();
                let dst_y = self.rect.y + row + delta;
                fs.blit(self.rect.x, dst_y, &src, row_bytes, self.rect.w, 1);
            }
            fs.fill_rect(self.rect.x, self.rect.y, self.rect.w, delta, bg);
        }
        self.cursor_shown = false;
    }

    fn refresh_from_back_buffer(&mut self, fs: &mut FrameSurface) {
        if self.paused_count > 0 {
            return;
        }
        let bpp = fs.format().bytes_per_pixel();
        let rect_w = self.rect.w;
        let rect_h = self.rect.h;
        let back_offset = self.back_offset;
        if let Some(buf) = self.back_buffer.clone() {
            for row in 0..rect_h {
                let by = (row + back_offset) % rect_h;
                let off = (by as usize * rect_w as usize) * bpp;
                let row_bytes = rect_w as usize * bpp;
                fs.blit(self.rect.x, self.rect.y + row, &buf[off..off + row_bytes], row_bytes, rect_w, 1);
            }
        }
    }

    fn draw_glyph_at(&mut self, fs: &mut FrameSurface, font: &FontTable, g: u8, col: u16, row: u16, style: Style, transparent: bool) {
        let base_x = col * FONT_W;
        let base_y = row * FONT_H;
        for fy in 0..FONT_H {
            for fx in 0..FONT_W {
                if font.glyph_bit(g, fy, fx) {
                    self.put_pixel(fs, base_x + fx, base_y + fy, style.fg_color);
                } else if !transparent {
                    self.put_pixel(fs, base_x + fx, base_y + fy, style.bg_color);
                }
            }
        }
    }

    pub fn draw_glyph(&mut self, fs: &mut FrameSurface, font: &FontTable, g: u8, col: u16, row: u16, style: Style, transparent: bool) -> FbResult<()> {
        if col >= self.cols || row >= self.rows {
            return Err(FbError::InvalidArgs);
        }
        self.draw_glyph_at(fs, font, g, col, row, style, transparent);
        Ok(())
    }

    /// Inverts every pixel of the cell at `(row,col)`.
    pub fn invert_char(&mut self, fs: &mut FrameSurface, col: u16, row: u16) -> FbResult<()> {
        if col >= self.cols || row >= self.rows {
            return Err(FbError::InvalidArgs);
        }
        let base_x = col * FONT_W;
        let base_y = row * FONT_H;
        for fy in 0..FONT_H {
            for fx in 0..FONT_W {
                let (vx, vy) = (base_x + fx, base_y + fy);
                let c = if self.paused_count == 0 {
                    fs.get_pixel(self.rect.x + vx, self.rect.y + vy)
                } else {
                    Color::default()
                };
                self.put_pixel(fs, vx, vy, c.complement());
            }
        }
        Ok(())
    }

    pub fn cursor_pos(&self) -> (u16, u16) { (self.cursor_row, self.cursor_col) }

    pub fn set_cursor_active(&mut self, fs: &mut FrameSurface, active: bool) -> FbResult<()> {
        if self.cursor_active == active {
            return Ok(());
        }
        self.cursor_active = active;
        if !active && self.cursor_shown {
            self.cursor_hide(fs)?;
        }
        Ok(())
    }

    /// Moves the cursor, hiding it at the old cell and showing it at the
    /// new one (skipped entirely if the target cell is unchanged).
    pub fn cursor_goto(&mut self, fs: &mut FrameSurface, row: u16, col: u16) -> FbResult<()> {
        if row >= self.rows || col >= self.cols {
            return Err(FbError::InvalidArgs);
        }
        if (row, col) == (self.cursor_row, self.cursor_col) {
            return Ok(());
        }
        if self.cursor_shown {
            self.cursor_hide(fs)?;
        }
        self.cursor_row = row;
        self.cursor_col = col;
        if self.cursor_active {
            self.cursor_show(fs)?;
        }
        Ok(())
    }

    pub fn cursor_show(&mut self, fs: &mut FrameSurface) -> FbResult<()> {
        if self.cursor_active && !self.cursor_shown {
            self.invert_char(fs, self.cursor_col, self.cursor_row)?;
            self.cursor_shown = true;
        }
        Ok(())
    }

    pub fn cursor_hide(&mut self, fs: &mut FrameSurface) -> FbResult<()> {
        if self.cursor_shown {
            self.invert_char(fs, self.cursor_col, self.cursor_row)?;
            self.cursor_shown = false;
        }
        Ok(())
    }

    pub fn cursor_blink(&mut self, fs: &mut FrameSurface) -> FbResult<()> {
        if !self.cursor_active {
            return Ok(());
        }
        if self.cursor_shown {
            self.cursor_hide(fs)
        } else {
            self.cursor_show(fs)
        }
    }

    /// Writes a character cell, hiding the cursor first unless the write
    /// targets the same cell the cursor currently occupies (the draw
    /// itself restores the correct pixels in that case).
    pub fn putchar_cell(&mut self, fs: &mut FrameSurface, font: &FontTable, row: u16, col: u16, ch: u8, style: Style, transparent: bool) -> FbResult<()> {
        if row >= self.rows || col >= self.cols {
            return Err(FbError::InvalidArgs);
        }
        let targets_cursor_cell = (row, col) == (self.cursor_row, self.cursor_col);
        if self.cursor_shown && !targets_cursor_cell {
            self.cursor_hide(fs)?;
        } else if targets_cursor_cell {
            self.cursor_shown = false;
        }
        self.draw_glyph_at(fs, font, ch, col, row, style, transparent);
        if targets_cursor_cell && self.cursor_active {
            self.cursor_show(fs)?;
        }
        Ok(())
    }

    /// Clears then repaints every cell from `cells` (row-major, `rows*cols`
    /// long), skipping cells that match a blank cell in the current style,
    /// then reinstates the cursor.
    pub fn draw_text_data(&mut self, fs: &mut FrameSurface, font: &FontTable, cells: &[crate::style::Cell]) -> FbResult<()> {
        if cells.len() != self.rows as usize * self.cols as usize {
            return Err(FbError::InvalidArgs);
        }
        self.clear(fs);
        for row in 0..self.rows {
            for col in 0..self.cols {
                let cell = cells[row as usize * self.cols as usize + col as usize];
                if cell.character == b' ' && cell.style == self.style {
                    continue;
                }
                let transparent = cell.style == self.style;
                self.draw_glyph_at(fs, font, cell.character, col, row, cell.style, transparent);
            }
        }
        if self.cursor_active {
            self.cursor_shown = false;
            self.cursor_show(fs)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::PixelFormat;
    use crate::font::DEFAULT_FONT;
    use crate::style::GFX_DEFAULT_STYLE;

    fn surface() -> FrameSurface { FrameSurface::new(160, 128, 160 * 4, PixelFormat::Argb8888, false) }

    #[test]
    fn rejects_undersized_and_out_of_bounds_rects() {
        assert_eq!(
            Viewport::new(Rect::new(0, 0, 4, 16), 160, 128, GFX_DEFAULT_STYLE).unwrap_err(),
            FbError::InvalidArgs
        );
        assert_eq!(
            Viewport::new(Rect::new(150, 0, 16, 16), 160, 128, GFX_DEFAULT_STYLE).unwrap_err(),
            FbError::InvalidArgs
        );
        assert!(Viewport::new(Rect::new(0, 0, 16, 16), 160, 128, GFX_DEFAULT_STYLE).is_ok());
    }

    #[test]
    fn clear_fills_background() {
        let mut fs = surface();
        let mut vp = Viewport::new(Rect::new(0, 0, 32, 32), 160, 128, GFX_DEFAULT_STYLE).unwrap();
        vp.clear(&mut fs);
        assert_eq!(fs.get_pixel(5, 5), GFX_DEFAULT_STYLE.bg_color);
    }

    #[test]
    fn scroll_preserves_content_and_clears_exposed_band() {
        let mut fs = surface();
        let mut vp = Viewport::new(Rect::new(0, 0, 32, 64), 160, 128, GFX_DEFAULT_STYLE).unwrap();
        vp.clear(&mut fs);
        for y in 0..64u16 {
            for x in 0..32u16 {
                fs.put_pixel(x, y, Color::rgb(0, 0, (y % 256) as u8));
            }
        }
        vp.scroll(&mut fs, 1);
        for y in 0..(64 - FONT_H) {
            for x in 0..32u16 {
                assert_eq!(fs.get_pixel(x, y), Color::rgb(0, 0, ((y + FONT_H) % 256) as u8));
            }
        }
        for y in (64 - FONT_H)..64 {
            for x in 0..32u16 {
                assert_eq!(fs.get_pixel(x, y), GFX_DEFAULT_STYLE.bg_color);
            }
        }
    }

    #[test]
    fn cursor_show_hide_is_idempotent_and_restores_cell() {
        let mut fs = surface();
        let mut vp = Viewport::new(Rect::new(0, 0, 32, 32), 160, 128, GFX_DEFAULT_STYLE).unwrap();
        vp.clear(&mut fs);
        vp.set_cursor_active(&mut fs, true).unwrap();
        let before: Vec<Color> = (0..FONT_H).flat_map(|y| (0..FONT_W).map(move |x| (x, y))).map(|(x, y)| fs.get_pixel(x, y)).collect();
        vp.cursor_show(&mut fs).unwrap();
        vp.cursor_show(&mut fs).unwrap();
        vp.cursor_hide(&mut fs).unwrap();
        vp.cursor_hide(&mut fs).unwrap();
        let after: Vec<Color> = (0..FONT_H).flat_map(|y| (0..FONT_W).map(move |x| (x, y))).map(|(x, y)| fs.get_pixel(x, y)).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn double_buffer_matches_fs_after_refresh() {
        let mut fs = surface();
        let mut vp = Viewport::new(Rect::new(0, 0, 32, 32), 160, 128, GFX_DEFAULT_STYLE).unwrap();
        vp.clear(&mut fs);
        vp.set_double_buffer(&fs, true);
        vp.putchar_cell(&mut fs, &DEFAULT_FONT, 0, 0, b'A', GFX_DEFAULT_STYLE, false).unwrap();
        vp.refresh_from_back_buffer(&mut fs);
        for y in 0..32u16 {
            for x in 0..32u16 {
                let bpp = fs.format().bytes_per_pixel();
                let by = (y + vp.back_offset) % vp.rect.h;
                let off = (by as usize * vp.rect.w as usize + x as usize) * bpp;
                let back_color = fs.format().unpack(&vp.back_buffer.as_ref().unwrap()[off..off + bpp]);
                assert_eq!(fs.get_pixel(x, y), back_color);
            }
        }
    }
}
