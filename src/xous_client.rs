//! Thin xous IPC stubs layered over the session protocol (§4.7) and the
//! CGC ops vtable (§4.8). Grounded on `graphics-server::Gfx`'s
//! `xous::send_message`/`xous_ipc::Buffer::lend` marshalling pattern from
//! the teacher crate, generalized to this crate's own `Opcode` table.
//!
//! These are the "remote" half of the CGC contract ("both direct and
//! remote GCs are interchangeable", spec.md §4.8); `client::LocalGc` is the
//! direct half. A real deployment would hand either one to code written
//! against `GraphicsContextOps` without it noticing the difference.

use alloc::vec::Vec;

use num_traits::ToPrimitive;
use rkyv::{Archive, Deserialize, Serialize};
use xous::{send_message, Message};
use xous_ipc::Buffer;

use crate::client::{BitmapAlloc, BitmapParams, GraphicsContextOps};
use crate::color::Color;
use crate::error::{FbError, FbResult};
use crate::geometry::{Point, Rect};
use crate::ipc::{pack_xy, unpack_xy, Opcode};

fn xous_err_to_fb(_e: xous::Error) -> FbError { FbError::Refused }

fn reply_to_result(code: usize) -> FbResult<()> {
    if code == 0 { Ok(()) } else { Err(FbError::from_reply_code(code).unwrap_or(FbError::Unsupported)) }
}

/// A connection to the framebuffer server's text/viewport/pixmap/animation
/// protocol (spec.md §4.7). Each call opens one blocking exchange and
/// waits for the reply, per spec.md §4.8's "at most one outstanding call
/// per GC is in flight".
pub struct FbSession {
    conn: xous::CID,
}

impl FbSession {
    pub fn new(xns: &xous_names::XousNames, server_name: &str) -> FbResult<FbSession> {
        let conn = xns.request_connection_blocking(server_name).map_err(|_| FbError::Refused)?;
        Ok(FbSession { conn })
    }

    fn scalar(&self, op: Opcode, a1: usize, a2: usize, a3: usize, a4: usize) -> FbResult<usize> {
        match send_message(self.conn, Message::new_blocking_scalar(op.to_usize().unwrap(), a1, a2, a3, a4))
            .map_err(xous_err_to_fb)?
        {
            xous::Result::Scalar1(code) => {
                if code == 0 { Ok(0) } else { Err(FbError::from_reply_code(code).unwrap_or(FbError::Unsupported)) }
            }
            xous::Result::Scalar2(code, payload) => {
                if code == 0 { Ok(payload) } else { Err(FbError::from_reply_code(code).unwrap_or(FbError::Unsupported)) }
            }
            _ => Err(FbError::Unsupported),
        }
    }

    pub fn hangup(&self) -> FbResult<()> { self.scalar(Opcode::Hangup, 0, 0, 0, 0).map(|_| ()) }

    pub fn clear(&self) -> FbResult<()> { self.scalar(Opcode::Clear, 0, 0, 0, 0).map(|_| ()) }

    pub fn putchar(&self, row: u16, col: u16, ch: u8, transparent: bool) -> FbResult<()> {
        let op = if transparent { Opcode::TransPutchar } else { Opcode::Putchar };
        self.scalar(op, row as usize, col as usize, ch as usize, 0).map(|_| ())
    }

    pub fn cursor_goto(&self, row: u16, col: u16) -> FbResult<()> {
        self.scalar(Opcode::CursorGoto, row as usize, col as usize, 0, 0).map(|_| ())
    }

    pub fn cursor_visibility(&self, show: bool) -> FbResult<()> {
        self.scalar(Opcode::CursorVisibility, show as usize, 0, 0, 0).map(|_| ())
    }

    pub fn get_csize(&self) -> FbResult<(u16, u16)> {
        let packed = self.scalar(Opcode::GetCSize, 0, 0, 0, 0)?;
        Ok(unpack_xy(packed))
    }

    pub fn get_resolution(&self) -> FbResult<(u16, u16)> {
        let packed = self.scalar(Opcode::GetResolution, 0, 0, 0, 0)?;
        Ok(unpack_xy(packed))
    }

    pub fn scroll(&self, n: i32) -> FbResult<()> { self.scalar(Opcode::Scroll, n as usize, 0, 0, 0).map(|_| ()) }

    pub fn viewport_create(&self, rect: Rect) -> FbResult<u16> {
        let id = self.scalar(Opcode::ViewportCreate, pack_xy(rect.x, rect.y), pack_xy(rect.w, rect.h), 0, 0)?;
        Ok(id as u16)
    }

    pub fn viewport_switch(&self, id: u16) -> FbResult<()> {
        self.scalar(Opcode::ViewportSwitch, id as usize, 0, 0, 0).map(|_| ())
    }

    pub fn viewport_delete(&self, id: u16) -> FbResult<()> {
        self.scalar(Opcode::ViewportDelete, id as usize, 0, 0, 0).map(|_| ())
    }

    pub fn viewport_db(&self, id: u16, enable: bool) -> FbResult<()> {
        self.scalar(Opcode::ViewportDb, id as usize, enable as usize, 0, 0).map(|_| ())
    }

    pub fn set_style(&self, fg: Color, bg: Color) -> FbResult<()> {
        self.scalar(Opcode::SetStyle, u32::from(fg) as usize, u32::from(bg) as usize, 0, 0).map(|_| ())
    }

    pub fn anim_create(&self) -> FbResult<u16> { Ok(self.scalar(Opcode::AnimCreate, 0, 0, 0, 0)? as u16) }
    pub fn anim_drop(&self, id: u16) -> FbResult<()> { self.scalar(Opcode::AnimDrop, id as usize, 0, 0, 0).map(|_| ()) }
    pub fn anim_add_pixmap(&self, anim: u16, pixmap: u16) -> FbResult<()> {
        self.scalar(Opcode::AnimAddPixmap, anim as usize, pixmap as usize, 0, 0).map(|_| ())
    }
    pub fn anim_start(&self, id: u16) -> FbResult<()> { self.scalar(Opcode::AnimStart, id as usize, 0, 0, 0).map(|_| ()) }
    pub fn anim_stop(&self, id: u16) -> FbResult<()> { self.scalar(Opcode::AnimStop, id as usize, 0, 0, 0).map(|_| ()) }

    pub fn vp_draw(&self, pixmap: u16) -> FbResult<()> { self.scalar(Opcode::VpDraw, pixmap as usize, 0, 0, 0).map(|_| ()) }
    pub fn drop_pixmap(&self, pixmap: u16) -> FbResult<()> { self.scalar(Opcode::DropPixmap, pixmap as usize, 0, 0, 0).map(|_| ()) }

    pub fn pointer_move(&self, x: u16, y: u16) -> FbResult<()> {
        self.scalar(Opcode::PointerMove, x as usize, y as usize, 0, 0).map(|_| ())
    }
}

impl Drop for FbSession {
    fn drop(&mut self) {
        let _ = xous::disconnect(self.conn);
    }
}

/// Opaque per-connection bitmap id handed back by `GcBitmapCreate`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RemoteBitmap(u16);

/// Wire payload for `GcBitmapCreate`: request fields in, reply fields
/// written back into the same buffer by the server, matching how
/// `graphics-server::Gfx::draw_text_view` round-trips a `TextView`
/// through one `lend_mut` call.
#[derive(Debug, Default, Archive, Serialize, Deserialize)]
pub struct BitmapCreateMsg {
    pub rect: (u16, u16, u16, u16),
    pub direct_output: bool,
    pub seed: Vec<u8>,
    pub id: u16,
    pub pitch: usize,
    pub pixels: Vec<u8>,
}

#[derive(Debug, Default, Archive, Serialize, Deserialize)]
pub struct BitmapAllocMsg {
    pub id: u16,
    pub pitch: usize,
    pub off0: usize,
    pub pixels: Vec<u8>,
}

#[derive(Debug, Default, Archive, Serialize, Deserialize)]
pub struct BitmapWriteMsg {
    pub id: u16,
    pub offset: usize,
    pub data: Vec<u8>,
}

/// IPC-backed `GraphicsContextOps`, the remote counterpart to
/// `client::LocalGc`. Bulk pixel payloads (bitmap seed data, render
/// sources, direct-output writes) travel over a lent `xous_ipc::Buffer`
/// rather than scalar arguments, mirroring spec.md §4.8's "possibly
/// transfer a pixel area via bulk data write" step of the CGC exchange.
pub struct XousGc {
    conn: xous::CID,
}

impl XousGc {
    pub fn new(xns: &xous_names::XousNames, server_name: &str) -> FbResult<XousGc> {
        let conn = xns.request_connection_blocking(server_name).map_err(|_| FbError::Refused)?;
        Ok(XousGc { conn })
    }

    fn scalar(&self, op: Opcode, a1: usize, a2: usize, a3: usize, a4: usize) -> FbResult<usize> {
        match send_message(self.conn, Message::new_blocking_scalar(op.to_usize().unwrap(), a1, a2, a3, a4))
            .map_err(xous_err_to_fb)?
        {
            xous::Result::Scalar1(code) => {
                if code == 0 { Ok(0) } else { Err(FbError::from_reply_code(code).unwrap_or(FbError::Unsupported)) }
            }
            xous::Result::Scalar2(code, payload) => {
                if code == 0 { Ok(payload) } else { Err(FbError::from_reply_code(code).unwrap_or(FbError::Unsupported)) }
            }
            _ => Err(FbError::Unsupported),
        }
    }
}

impl GraphicsContextOps for XousGc {
    type Bitmap = RemoteBitmap;

    fn set_clip_rect(&mut self, rect: Option<Rect>) -> FbResult<()> {
        match rect {
            Some(r) => self.scalar(Opcode::GcSetClipRect, 1, pack_xy(r.x, r.y), pack_xy(r.w, r.h), 0).map(|_| ()),
            None => self.scalar(Opcode::GcSetClipRect, 0, 0, 0, 0).map(|_| ()),
        }
    }

    fn set_color(&mut self, color: Color) -> FbResult<()> {
        self.scalar(Opcode::GcSetColor, u32::from(color) as usize, 0, 0, 0).map(|_| ())
    }

    fn fill_rect(&mut self, rect: Rect) -> FbResult<()> {
        self.scalar(Opcode::GcFillRect, pack_xy(rect.x, rect.y), pack_xy(rect.w, rect.h), 0, 0).map(|_| ())
    }

    fn update(&mut self) -> FbResult<()> { self.scalar(Opcode::GcUpdate, 0, 0, 0, 0).map(|_| ()) }

    fn bitmap_create(&mut self, params: &BitmapParams, alloc: Option<BitmapAlloc>) -> FbResult<(RemoteBitmap, BitmapAlloc)> {
        let msg = BitmapCreateMsg {
            rect: (params.rect.x, params.rect.y, params.rect.w, params.rect.h),
            direct_output: params.direct_output,
            seed: alloc.map(|a| a.pixels).unwrap_or_default(),
            ..Default::default()
        };
        let mut buf = Buffer::into_buf(msg).map_err(|_| FbError::OutOfMemory)?;
        buf.lend_mut(self.conn, Opcode::GcBitmapCreate.to_u32().unwrap()).map_err(xous_err_to_fb)?;
        let reply = buf.to_original::<BitmapCreateMsg, _>().map_err(|_| FbError::Unsupported)?;
        let alloc = BitmapAlloc { pitch: reply.pitch, off0: 0, pixels: reply.pixels };
        Ok((RemoteBitmap(reply.id), alloc))
    }

    fn bitmap_destroy(&mut self, bitmap: RemoteBitmap) -> FbResult<()> {
        self.scalar(Opcode::GcBitmapDestroy, bitmap.0 as usize, 0, 0, 0).map(|_| ())
    }

    fn bitmap_render(&mut self, bitmap: &RemoteBitmap, srect: Rect, offs: Point) -> FbResult<()> {
        self.scalar(
            Opcode::GcBitmapRender,
            bitmap.0 as usize,
            pack_xy(srect.x, srect.y),
            pack_xy(srect.w, srect.h),
            pack_xy(offs.x, offs.y),
        )
        .map(|_| ())
    }

    fn bitmap_get_alloc(&self, bitmap: &RemoteBitmap) -> FbResult<BitmapAlloc> {
        let msg = BitmapAllocMsg { id: bitmap.0, ..Default::default() };
        let mut buf = Buffer::into_buf(msg).map_err(|_| FbError::OutOfMemory)?;
        buf.lend_mut(self.conn, Opcode::GcBitmapGetAlloc.to_u32().unwrap()).map_err(xous_err_to_fb)?;
        let reply = buf.to_original::<BitmapAllocMsg, _>().map_err(|_| FbError::Unsupported)?;
        Ok(BitmapAlloc { pitch: reply.pitch, off0: reply.off0, pixels: reply.pixels })
    }

    fn bitmap_write(&mut self, bitmap: &RemoteBitmap, offset: usize, data: &[u8]) -> FbResult<()> {
        let msg = BitmapWriteMsg { id: bitmap.0, offset, data: data.to_vec() };
        let mut buf = Buffer::into_buf(msg).map_err(|_| FbError::OutOfMemory)?;
        buf.lend_mut(self.conn, Opcode::GcBitmapWrite.to_u32().unwrap()).map_err(xous_err_to_fb)?;
        let code = buf.to_original::<usize, _>().unwrap_or(0);
        reply_to_result(code)
    }
}

impl Drop for XousGc {
    fn drop(&mut self) {
        let _ = xous::disconnect(self.conn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xy_round_trips_for_viewport_create_wire_args() {
        let rect = Rect::new(3, 4, 100, 50);
        let (x, y) = unpack_xy(pack_xy(rect.x, rect.y));
        let (w, h) = unpack_xy(pack_xy(rect.w, rect.h));
        assert_eq!((x, y, w, h), (3, 4, 100, 50));
    }
}
