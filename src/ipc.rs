//! IPC method table (spec.md §4.7, §6 "IPC method set"). `Opcode` is the
//! numeric ABI the session loop dispatches on; grounded on the
//! `num_derive::FromPrimitive`/`ToPrimitive` opcode pattern used throughout
//! the corpus (`graphics-server`'s own `Opcode`, `ticktimer-server`'s
//! `Opcode`) rather than hand-rolling a `TryFrom<usize>` match.
//!
//! Scalar messages carry small integers directly (`xous::Message::Scalar`);
//! the handful of requests that move a variable-length payload (SHARE-AREA,
//! DRAW-TEXT-DATA's interchange buffer, bitmap create/render/write) go over
//! a lent `xous_ipc::Buffer`, mirroring how `graphics-server::Gfx` lends a
//! `TextView` for `DrawTextView`.

#[derive(Debug, Copy, Clone, PartialEq, Eq, num_derive::FromPrimitive, num_derive::ToPrimitive)]
#[repr(usize)]
pub enum Opcode {
    /// Not sent by clients; the heartbeat thread's self-message driving
    /// cursor blink and animation ticks (SPEC_FULL.md §5).
    IdleTick = 0,

    Hangup,
    PrepareShm,
    ShareArea,
    DropShm,
    Shm2Pixmap,
    DrawPpm,
    DrawTextData,
    Putchar,
    TransPutchar,
    Clear,
    CursorGoto,
    CursorVisibility,
    GetCSize,
    GetResolution,
    Scroll,
    ViewportCreate,
    ViewportSwitch,
    ViewportDelete,
    ViewportDb,
    SetStyle,
    AnimCreate,
    AnimDrop,
    AnimAddPixmap,
    AnimChgViewport,
    AnimStart,
    AnimStop,
    Vp2Pixmap,
    VpDraw,
    DropPixmap,
    PointerMove,

    GcSetClipRect,
    GcSetColor,
    GcFillRect,
    GcUpdate,
    GcBitmapCreate,
    GcBitmapDestroy,
    GcBitmapRender,
    GcBitmapGetAlloc,
    GcBitmapWrite,
}

/// Packs a `(x, y)` pair the way spec.md §3 specifies for scalar IPC
/// arguments (`VIEWPORT-CREATE`'s `(x<<16)|y`, `(w<<16)|h`).
pub fn pack_xy(x: u16, y: u16) -> usize { (x as usize) << 16 | y as usize }

pub fn unpack_xy(packed: usize) -> (u16, u16) { ((packed >> 16) as u16, packed as u16) }

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::{FromPrimitive, ToPrimitive};

    #[test]
    fn opcode_round_trips_through_usize() {
        let all = [
            Opcode::IdleTick,
            Opcode::Hangup,
            Opcode::ViewportCreate,
            Opcode::GcBitmapWrite,
            Opcode::PointerMove,
        ];
        for op in all {
            let n = op.to_usize().unwrap();
            assert_eq!(Opcode::from_usize(n), Some(op));
        }
    }

    #[test]
    fn xy_packing_matches_wire_layout() {
        assert_eq!(pack_xy(0x1234, 0x5678), 0x1234_5678);
        assert_eq!(unpack_xy(0x1234_5678), (0x1234, 0x5678));
    }
}
