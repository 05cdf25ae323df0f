//! Hosted preview window: renders a [`FrameSurface`] into a desktop window
//! via `minifb`, standing in for the real display controller the way
//! `graphics-server`'s own `backend/minifb.rs` stands in for the
//! Precursor's LCD panel in hosted builds. Unlike that backend (a 1bpp
//! 336x536 panel), this one assumes the 32bpp `Argb8888` visual used
//! throughout this crate's hosted config and just blits rows straight
//! through, since `minifb::Window::update_with_buffer` already wants
//! `0x00RRGGBB`-packed `u32`s.

use minifb::{Window, WindowOptions};

use crate::surface::FrameSurface;

const MAX_FPS: u64 = 60;

pub struct PreviewWindow {
    window: Window,
    width: usize,
    height: usize,
}

impl PreviewWindow {
    pub fn new(title: &str, width: u16, height: u16) -> PreviewWindow {
        let mut window = Window::new(title, width as usize, height as usize, WindowOptions::default())
            .unwrap_or_else(|e| panic!("{}", e));
        window.limit_update_rate(Some(std::time::Duration::from_micros(1_000_000 / MAX_FPS)));
        PreviewWindow { window, width: width as usize, height: height as usize }
    }

    pub fn is_open(&self) -> bool { self.window.is_open() }

    /// Repacks `fs`'s rows into a `u32`-per-pixel buffer and pushes it to
    /// the window. `fs` need not be `Argb8888`; every visual round-trips
    /// through `Color`, so the preview renders any configured format.
    pub fn present(&mut self, fs: &FrameSurface) {
        let mut frame = vec![0u32; self.width * self.height];
        for y in 0..fs.height().min(self.height as u16) {
            for x in 0..fs.width().min(self.width as u16) {
                let c = fs.get_pixel(x, y);
                frame[y as usize * self.width + x as usize] = u32::from(c) & 0x00ff_ffff;
            }
        }
        let _ = self.window.update_with_buffer(&frame, self.width, self.height);
    }
}

#[cfg(test)]
mod tests {
    // `minifb::Window::new` opens a real OS window, so this module has no
    // unit tests; `PreviewWindow` is exercised by running the server
    // binary with the `hosted` feature enabled.
}
