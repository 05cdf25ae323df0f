//! Animation Engine (AE) — fixed-capacity table of looped pixmap
//! sequences bound to viewports, ticked by the server's idle path.
//! Grounded on `animation_t` / `anim_tick` in
//! `original_source/uspace/fb/fb.c`. Preserves the spec's corrected
//! `MAX_ANIMATIONS` check (§9 open question: the source tests the wrong
//! loop variable in the drop branch; here the animation id is used
//! consistently).

use alloc::vec::Vec;

use crate::arena::{Arena, Handle};
use crate::error::{FbError, FbResult};
use crate::pixmap::PixmapStore;
use crate::surface::FrameSurface;
use crate::viewport::Viewport;

pub const MAX_ANIMATIONS: usize = 4;
pub const MAX_FRAMES: usize = 8;

/// Every 8th tick actually advances a frame, so the effective animation
/// rate is `idle_tick_rate / TICK_DIVIDER`.
const TICK_DIVIDER: u8 = 8;

pub struct Animation {
    viewport: Handle,
    enabled: bool,
    position: usize,
    frames: Vec<Handle>,
    divider: u8,
}

impl Animation {
    pub fn viewport(&self) -> Handle { self.viewport }
    pub fn is_enabled(&self) -> bool { self.enabled }
}

pub struct AnimationEngine {
    table: Arena<Animation>,
    /// Count of enabled animations; the session loop uses
    /// `enabled_count > 0` to decide between blocking and timed waits.
    enabled_count: u32,
}

impl AnimationEngine {
    pub fn new() -> AnimationEngine { AnimationEngine { table: Arena::with_capacity(MAX_ANIMATIONS), enabled_count: 0 } }

    pub fn any_enabled(&self) -> bool { self.enabled_count > 0 }

    /// Looks up the handle currently occupying wire id `id`, used by the
    /// session layer to translate the small-integer animation ids the
    /// protocol carries into arena handles.
    pub fn handle_at(&self, id: usize) -> Option<Handle> { self.table.handle_at(id) }

    pub fn create(&mut self, viewport: Handle) -> FbResult<Handle> {
        self.table
            .insert(Animation { viewport, enabled: false, position: 0, frames: Vec::new(), divider: 0 })
            .ok_or(FbError::LimitExceeded)
    }

    pub fn drop_animation(&mut self, h: Handle) -> FbResult<()> {
        let was_enabled = self.table.get(h).ok_or(FbError::NotFound)?.enabled;
        self.table.remove(h).ok_or(FbError::NotFound)?;
        if was_enabled {
            self.enabled_count = self.enabled_count.saturating_sub(1);
        }
        Ok(())
    }

    pub fn add_frame(&mut self, h: Handle, pixmap: Handle) -> FbResult<()> {
        let anim = self.table.get_mut(h).ok_or(FbError::NotFound)?;
        if anim.frames.len() >= MAX_FRAMES {
            return Err(FbError::LimitExceeded);
        }
        anim.frames.push(pixmap);
        Ok(())
    }

    pub fn change_viewport(&mut self, h: Handle, viewport: Handle) -> FbResult<()> {
        let anim = self.table.get_mut(h).ok_or(FbError::NotFound)?;
        anim.viewport = viewport;
        Ok(())
    }

    pub fn start(&mut self, h: Handle) -> FbResult<()> {
        let anim = self.table.get_mut(h).ok_or(FbError::NotFound)?;
        if !anim.enabled {
            anim.enabled = true;
            self.enabled_count += 1;
        }
        Ok(())
    }

    pub fn stop(&mut self, h: Handle) -> FbResult<()> {
        let anim = self.table.get_mut(h).ok_or(FbError::NotFound)?;
        if anim.enabled {
            anim.enabled = false;
            self.enabled_count = self.enabled_count.saturating_sub(1);
        }
        Ok(())
    }

    /// Advances every enabled animation by one idle tick, a no-op unless
    /// `any_enabled()`. `viewports` is the session's viewport table; an
    /// animation bound to a since-deleted viewport is silently skipped.
    pub fn tick(&mut self, fs: &mut FrameSurface, pixmaps: &PixmapStore, viewports: &mut Arena<Viewport>) {
        if self.enabled_count == 0 {
            return;
        }
        for (_, anim) in self.table.iter_mut() {
            if !anim.enabled || anim.frames.is_empty() {
                continue;
            }
            anim.divider = anim.divider.wrapping_add(1);
            if anim.divider % TICK_DIVIDER != 0 {
                continue;
            }
            if let Some(vp) = viewports.get_mut(anim.viewport) {
                let frame = anim.frames[anim.position];
                let _ = pixmaps.draw(fs, vp, frame);
                anim.position = (anim.position + 1) % anim.frames.len();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_handle(n: u16) -> Handle {
        let mut a: Arena<()> = Arena::with_capacity(n as usize + 1);
        for _ in 0..=n {
            a.insert(());
        }
        a.handle_at(n as usize).unwrap()
    }

    #[test]
    fn table_bound_is_enforced() {
        let mut ae = AnimationEngine::new();
        let dummy = fake_handle(0);
        for _ in 0..MAX_ANIMATIONS {
            assert!(ae.create(dummy).is_ok());
        }
        assert_eq!(ae.create(dummy).unwrap_err(), FbError::LimitExceeded);
    }

    #[test]
    fn frame_bound_is_enforced() {
        let mut ae = AnimationEngine::new();
        let dummy = fake_handle(0);
        let h = ae.create(dummy).unwrap();
        for _ in 0..MAX_FRAMES {
            ae.add_frame(h, dummy).unwrap();
        }
        assert_eq!(ae.add_frame(h, dummy).unwrap_err(), FbError::LimitExceeded);
    }

    #[test]
    fn start_stop_tracks_enabled_count() {
        let mut ae = AnimationEngine::new();
        let dummy = fake_handle(0);
        let h = ae.create(dummy).unwrap();
        assert!(!ae.any_enabled());
        ae.start(h).unwrap();
        assert!(ae.any_enabled());
        ae.stop(h).unwrap();
        assert!(!ae.any_enabled());
    }

    #[test]
    fn drop_of_enabled_animation_clears_enabled_count() {
        let mut ae = AnimationEngine::new();
        let dummy = fake_handle(0);
        let h = ae.create(dummy).unwrap();
        ae.start(h).unwrap();
        ae.drop_animation(h).unwrap();
        assert!(!ae.any_enabled());
    }
}
