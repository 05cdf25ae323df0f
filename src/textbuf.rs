//! Text Cell Buffer (TCB) — a host-side logical screen used by
//! console-style clients to track what should be on screen, independent
//! of the Frame Surface. Grounded on `screenbuffer_t` / `get_field_at` /
//! `screenbuffer_putchar` in `original_source/console/screenbuffer.h`.

use alloc::vec::Vec;

use crate::style::{Cell, Style};

pub struct TextCellBuffer {
    size_x: u16,
    size_y: u16,
    cells: Vec<Cell>,
    cursor_x: u16,
    cursor_y: u16,
    current_style: Style,
    top_line: u16,
}

impl TextCellBuffer {
    pub fn new(size_x: u16, size_y: u16, default_style: Style) -> TextCellBuffer {
        let cells = alloc::vec![Cell::blank(default_style); size_x as usize * size_y as usize];
        TextCellBuffer { size_x, size_y, cells, cursor_x: 0, cursor_y: 0, current_style: default_style, top_line: 0 }
    }

    pub fn size(&self) -> (u16, u16) { (self.size_x, self.size_y) }
    pub fn cursor(&self) -> (u16, u16) { (self.cursor_x, self.cursor_y) }
    pub fn style(&self) -> Style { self.current_style }

    /// Updates the current style without touching any existing cell
    /// content, matching `screenbuffer_set_style` in the source.
    pub fn set_style(&mut self, style: Style) { self.current_style = style; }

    /// Clears one physical row in place without touching `top_line`,
    /// matching `screenbuffer_clear_line` in the source. `logical_y` is
    /// still expressed in logical coordinates; only the addressing is
    /// physical.
    pub fn clear_line(&mut self, logical_y: u16) { self.clear_logical_row(logical_y); }

    /// Logical row `y` lives at physical row `(y + top_line) mod size_y`.
    fn physical_row(&self, logical_y: u16) -> u16 { (logical_y + self.top_line) % self.size_y }

    fn index(&self, x: u16, physical_y: u16) -> usize { physical_y as usize * self.size_x as usize + x as usize }

    pub fn get(&self, x: u16, logical_y: u16) -> Cell { self.cells[self.index(x, self.physical_row(logical_y))] }

    fn set(&mut self, x: u16, logical_y: u16, cell: Cell) {
        let py = self.physical_row(logical_y);
        let idx = self.index(x, py);
        self.cells[idx] = cell;
    }

    fn clear_logical_row(&mut self, logical_y: u16) {
        for x in 0..self.size_x {
            self.set(x, logical_y, Cell::blank(self.current_style));
        }
    }

    /// Scrolls the logical window down by one row: the previous row 0
    /// disappears, a fresh blank row appears at the bottom.
    fn scroll_one(&mut self) {
        self.top_line = (self.top_line + 1) % self.size_y;
        self.clear_logical_row(self.size_y - 1);
    }

    /// Writes `c` at the cursor and advances it. `'\n'` moves to column 0
    /// of the next row. Column overflow wraps to the next row; row
    /// overflow scrolls.
    pub fn putchar(&mut self, c: u8) {
        if c == b'\n' {
            self.cursor_x = 0;
            self.advance_row();
            return;
        }
        self.set(self.cursor_x, self.cursor_y, Cell { character: c, style: self.current_style });
        self.cursor_x += 1;
        if self.cursor_x >= self.size_x {
            self.cursor_x = 0;
            self.advance_row();
        }
    }

    fn advance_row(&mut self) {
        self.cursor_y += 1;
        if self.cursor_y >= self.size_y {
            self.cursor_y = self.size_y - 1;
            self.scroll_one();
        }
    }

    pub fn clear(&mut self) {
        for cell in &mut self.cells {
            *cell = Cell::blank(self.current_style);
        }
        self.cursor_x = 0;
        self.cursor_y = 0;
        self.top_line = 0;
    }

    pub fn goto_pos(&mut self, x: u16, y: u16) -> bool {
        if x >= self.size_x || y >= self.size_y {
            return false;
        }
        self.cursor_x = x;
        self.cursor_y = y;
        true
    }

    /// Emits cells in logical row-major order, already unrolled through
    /// `top_line`, suitable for the DRAW-TEXT-DATA interchange wire format.
    pub fn copy_out(&self, dest: &mut [Cell]) {
        debug_assert_eq!(dest.len(), self.size_x as usize * self.size_y as usize);
        for y in 0..self.size_y {
            for x in 0..self.size_x {
                dest[y as usize * self.size_x as usize + x as usize] = self.get(x, y);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::style::TEXT_DEFAULT_STYLE;

    #[test]
    fn cyclic_invariant_after_putchar_and_scroll() {
        let mut tcb = TextCellBuffer::new(4, 3, TEXT_DEFAULT_STYLE);
        for _ in 0..4 * 3 + 2 {
            tcb.putchar(b'x');
        }
        for y in 0..3u16 {
            for x in 0..4u16 {
                let logical = tcb.get(x, y);
                let physical = tcb.cells[tcb.index(x, (y + tcb.top_line) % tcb.size_y)];
                assert_eq!(logical, physical);
            }
        }
    }

    #[test]
    fn line_fill_wrap_and_scroll_scenario() {
        let mut tcb = TextCellBuffer::new(80, 25, TEXT_DEFAULT_STYLE);
        for _ in 0..80 {
            tcb.putchar(b'A');
        }
        tcb.putchar(b'B');
        assert_eq!(tcb.cursor(), (1, 1));
        for x in 0..80u16 {
            assert_eq!(tcb.get(x, 0).character, b'A');
        }
        assert_eq!(tcb.get(0, 1).character, b'B');
    }

    #[test]
    fn clear_line_blanks_row_without_moving_top_line() {
        let mut tcb = TextCellBuffer::new(4, 3, TEXT_DEFAULT_STYLE);
        for _ in 0..4 {
            tcb.putchar(b'x');
        }
        let before_top_line = tcb.top_line;
        tcb.clear_line(0);
        assert_eq!(tcb.top_line, before_top_line);
        for x in 0..4u16 {
            assert_eq!(tcb.get(x, 0).character, b' ');
        }
    }

    #[test]
    fn newline_moves_to_column_zero_next_row() {
        let mut tcb = TextCellBuffer::new(10, 5, TEXT_DEFAULT_STYLE);
        tcb.putchar(b'a');
        tcb.putchar(b'\n');
        assert_eq!(tcb.cursor(), (0, 1));
    }

    #[test]
    fn clear_resets_cursor_and_top_line() {
        let mut tcb = TextCellBuffer::new(4, 3, TEXT_DEFAULT_STYLE);
        for _ in 0..20 {
            tcb.putchar(b'z');
        }
        tcb.clear();
        assert_eq!(tcb.cursor(), (0, 0));
        assert_eq!(tcb.top_line, 0);
        assert_eq!(tcb.get(0, 0).character, b' ');
    }

    #[test]
    fn copy_out_matches_logical_order() {
        let mut tcb = TextCellBuffer::new(3, 2, TEXT_DEFAULT_STYLE);
        tcb.putchar(b'1');
        tcb.putchar(b'2');
        tcb.putchar(b'3');
        tcb.putchar(b'4');
        let mut out = alloc::vec![Cell::blank(TEXT_DEFAULT_STYLE); 6];
        tcb.copy_out(&mut out);
        assert_eq!(out[0].character, b'1');
        assert_eq!(out[3].character, b'4');
    }
}
