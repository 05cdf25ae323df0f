//! Server Session FSM (SSFSM) — the per-connection dispatch loop.
//! Grounded on the request-handling `switch` in `fb_client_connection()`
//! and the viewport/pixmap/animation tables in
//! `original_source/uspace/fb/fb.c`. `FbServer` owns the process-wide
//! state (Frame Surface plus the bounded viewport/pixmap/animation
//! tables); `Connection` is the one-at-a-time client session layered on
//! top of it, matching spec.md §5 ("the server enforces `accepted = false`
//! after the first, so in practice there is one active client at a time").

use alloc::vec::Vec;

use crate::animation::AnimationEngine;
use crate::arena::{Arena, Handle};
use crate::client::{BitmapAlloc, BitmapParams};
use crate::color::Color;
use crate::config::BootConfig;
use crate::error::{FbError, FbResult};
use crate::font::{FontTable, DEFAULT_FONT};
use crate::geometry::{Point, Rect};
use crate::pixmap::PixmapStore;
use crate::ppm;
use crate::style::{Cell, Style, CELL_WIRE_SIZE, GFX_DEFAULT_STYLE};
use crate::surface::FrameSurface;
use crate::viewport::Viewport;

/// Per-connection bound on client-owned CGC bitmaps (spec.md §4.8), kept
/// independent of the Pixmap Store's 256-slot table since these are
/// client-private allocations rather than server-resident resources.
pub const MAX_GC_BITMAPS: usize = 64;

struct ClientBitmap {
    rect: Rect,
    pitch: usize,
    pixels: Vec<u8>,
}

/// Number of idle ticks between two 250ms wakeups (spec.md §4.7 step 1):
/// the session loop's own wait primitive has no timeout concept in this
/// crate's transport model (see SPEC_FULL.md §5), so the 250ms cadence is
/// accounted for by the caller invoking `on_idle_tick` on its own
/// scheduling clock and this module simply trusting that cadence.
pub const IDLE_TIMEOUT_MS: u64 = 250;

/// What a SHARE-AREA token, once PREPARE-SHM'd, is reserved for. Without a
/// pending reservation, a SHARE-AREA installs as the text interchange
/// buffer (spec.md §4.7).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum PendingUse {
    Pixmap { token: u32 },
}

/// Per-connection state (spec.md §3 "Connection state (SSFSM)").
pub struct Connection {
    active_viewport: Handle,
    shared_pixels: Option<Vec<u8>>,
    shared_text: Option<Vec<Cell>>,
    pending: Option<PendingUse>,
    hangup_requested: bool,
    /// CGC state (spec.md §4.8): the clip rect and color `set_clip_rect`/
    /// `set_color` install, applied by a later `fill_rect`.
    gc_clip: Option<Rect>,
    gc_color: Color,
    gc_bitmaps: Arena<ClientBitmap>,
}

impl Connection {
    fn new(default_viewport: Handle) -> Connection {
        Connection {
            active_viewport: default_viewport,
            shared_pixels: None,
            shared_text: None,
            pending: None,
            hangup_requested: false,
            gc_clip: None,
            gc_color: Color::default(),
            gc_bitmaps: Arena::with_capacity(MAX_GC_BITMAPS),
        }
    }

    fn clip_intersect(&self, rect: Rect) -> Rect {
        let c = match self.gc_clip {
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

/// Every request the session FSM understands (spec.md §4.7's method
/// table, with ids resolved to the in-process arguments they carry).
pub enum Request {
    Hangup,
    PrepareShm { token: u32 },
    ShareArea { token: u32, data: Vec<u8> },
    DropShm,
    Shm2Pixmap,
    DrawPpm { x: u16, y: u16 },
    DrawTextData,
    Putchar { row: u16, col: u16, ch: u8, transparent: bool },
    Clear,
    CursorGoto { row: u16, col: u16 },
    CursorVisibility(bool),
    GetCSize,
    GetResolution,
    Scroll(i32),
    ViewportCreate { rect: Rect },
    ViewportSwitch(u16),
    ViewportDelete(u16),
    ViewportDb { id: u16, enable: bool },
    SetStyle { fg: Color, bg: Color },
    AnimCreate,
    AnimDrop(u16),
    AnimAddPixmap { anim: u16, pixmap: u16 },
    AnimChgViewport { anim: u16, viewport: u16 },
    AnimStart(u16),
    AnimStop(u16),
    Vp2Pixmap,
    VpDraw(u16),
    DropPixmap(u16),
    PointerMove { x: u16, y: u16 },
    /// CGC requests (spec.md §4.8), marshaled onto the same per-connection
    /// exchange as the text/viewport/pixmap/animation protocol.
    GcSetClipRect(Option<Rect>),
    GcSetColor(Color),
    GcFillRect(Rect),
    GcUpdate,
    GcBitmapCreate { params: BitmapParams, seed: Option<Vec<u8>> },
    GcBitmapDestroy(u16),
    GcBitmapRender { id: u16, srect: Rect, offs: Point },
    GcBitmapGetAlloc(u16),
    GcBitmapWrite { id: u16, offset: usize, data: Vec<u8> },
}

/// Replies carried back on the same exchange the request arrived on.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Ack,
    Id(u16),
    CSize { rows: u16, cols: u16 },
    Resolution { width: u16, height: u16 },
    /// Server-side base address of a freshly mapped SHARE-AREA. In this
    /// crate's transport model (SPEC_FULL.md §0) the payload already
    /// travels in-process as bytes, so this is a synthetic token rather
    /// than a real mapped address; real deployments with an actual
    /// shared-address-area handover would thread the mapping's address
    /// through here instead.
    SharedAddr(usize),
    Alloc(BitmapAlloc),
}

/// Process-wide framebuffer server state: the Frame Surface plus the
/// bounded viewport/pixmap/animation tables (spec.md §3 "Bounded tables").
/// Owns at most one `Connection` at a time.
pub struct FbServer {
    fs: FrameSurface,
    font: &'static FontTable,
    viewports: Arena<Viewport>,
    default_viewport: Handle,
    pixmaps: PixmapStore,
    animations: AnimationEngine,
    connection: Option<Connection>,
    next_shared_token: usize,
}

impl FbServer {
    /// Maps the framebuffer per `config` and creates the implicit default
    /// viewport (id 0, full screen), per spec.md §4.7 ("The first message
    /// in the channel opens an implicit default viewport").
    pub fn new(config: BootConfig) -> FbServer {
        let fs = FrameSurface::new(
            config.width as u16,
            config.height as u16,
            config.scanline_bytes(),
            config.visual,
            config.invert_colors,
        );
        let mut viewports = Arena::with_capacity(crate::viewport::MAX_VIEWPORTS);
        let default_rect = Rect::new(0, 0, config.width as u16, config.height as u16);
        let default_viewport = viewports
            .insert(Viewport::new(default_rect, config.width as u16, config.height as u16, GFX_DEFAULT_STYLE).expect("default viewport covers the whole frame surface"))
            .expect("fresh arena has room for the default viewport");
        FbServer {
            fs,
            font: &DEFAULT_FONT,
            viewports,
            default_viewport,
            pixmaps: PixmapStore::new(),
            animations: AnimationEngine::new(),
            connection: None,
            next_shared_token: 0,
        }
    }

    pub fn fs(&self) -> &FrameSurface { &self.fs }
    pub fn resolution(&self) -> (u16, u16) { (self.fs.width(), self.fs.height()) }

    /// Accepts a new connection, refusing a second concurrent one (spec.md
    /// §7 `Refused`, §8 "Single-client lock").
    pub fn connect(&mut self) -> FbResult<()> {
        if self.connection.is_some() {
            log::warn!("connection attempt refused: a session is already active");
            return Err(FbError::Refused);
        }
        self.connection = Some(Connection::new(self.default_viewport));
        log::info!("session accepted");
        Ok(())
    }

    fn conn(&self) -> FbResult<&Connection> { self.connection.as_ref().ok_or(FbError::Refused) }
    fn conn_mut(&mut self) -> FbResult<&mut Connection> { self.connection.as_mut().ok_or(FbError::Refused) }

    /// Whether the session loop should wait with the 250ms idle timeout
    /// rather than blocking indefinitely (spec.md §4.7 step 1).
    pub fn needs_idle_timeout(&self) -> bool {
        let active_viewport = match &self.connection {
            Some(c) => c.active_viewport,
            None => return false,
        };
        let cursor_active = self.viewports.get(active_viewport).map(|v| v.cursor_active()).unwrap_or(false);
        cursor_active || self.animations.any_enabled()
    }

    /// Runs on every idle-timer wakeup: blinks the active viewport's
    /// cursor and advances all enabled animations by one tick.
    pub fn on_idle_tick(&mut self) {
        if let Some(conn) = &self.connection {
            if let Some(vp) = self.viewports.get_mut(conn.active_viewport) {
                let _ = vp.cursor_blink(&mut self.fs);
            }
        }
        self.animations.tick(&mut self.fs, &self.pixmaps, &mut self.viewports);
    }

    fn active_viewport_handle(&self) -> FbResult<Handle> { Ok(self.conn()?.active_viewport) }

    fn viewport_handle(&self, id: u16) -> FbResult<Handle> { self.viewports.handle_at(id as usize).ok_or(FbError::NotFound) }
    fn pixmap_handle(&self, id: u16) -> FbResult<Handle> { self.pixmaps.handle_at(id as usize).ok_or(FbError::NotFound) }
    fn anim_handle(&self, id: u16) -> FbResult<Handle> { self.animations.handle_at(id as usize).ok_or(FbError::NotFound) }

    /// Dispatches one request. Per spec.md §7, a failing request leaves
    /// all state bit-identical to its pre-call state: every handler below
    /// validates before mutating, so on `Err` nothing has changed.
    pub fn dispatch(&mut self, req: Request) -> FbResult<Reply> {
        match req {
            Request::Hangup => self.handle_hangup(),
            Request::PrepareShm { token } => self.handle_prepare_shm(token),
            Request::ShareArea { token, data } => self.handle_share_area(token, data),
            Request::DropShm => self.handle_drop_shm(),
            Request::Shm2Pixmap => self.handle_shm2pixmap(),
            Request::DrawPpm { x, y } => self.handle_draw_ppm(x, y),
            Request::DrawTextData => self.handle_draw_text_data(),
            Request::Putchar { row, col, ch, transparent } => self.handle_putchar(row, col, ch, transparent),
            Request::Clear => self.handle_clear(),
            Request::CursorGoto { row, col } => self.handle_cursor_goto(row, col),
            Request::CursorVisibility(show) => self.handle_cursor_visibility(show),
            Request::GetCSize => self.handle_get_csize(),
            Request::GetResolution => self.handle_get_resolution(),
            Request::Scroll(n) => self.handle_scroll(n),
            Request::ViewportCreate { rect } => self.handle_viewport_create(rect),
            Request::ViewportSwitch(id) => self.handle_viewport_switch(id),
            Request::ViewportDelete(id) => self.handle_viewport_delete(id),
            Request::ViewportDb { id, enable } => self.handle_viewport_db(id, enable),
            Request::SetStyle { fg, bg } => self.handle_set_style(fg, bg),
            Request::AnimCreate => self.handle_anim_create(),
            Request::AnimDrop(id) => self.handle_anim_drop(id),
            Request::AnimAddPixmap { anim, pixmap } => self.handle_anim_add_pixmap(anim, pixmap),
            Request::AnimChgViewport { anim, viewport } => self.handle_anim_chg_viewport(anim, viewport),
            Request::AnimStart(id) => self.handle_anim_start(id),
            Request::AnimStop(id) => self.handle_anim_stop(id),
            Request::Vp2Pixmap => self.handle_vp2pixmap(),
            Request::VpDraw(id) => self.handle_vp_draw(id),
            Request::DropPixmap(id) => self.handle_drop_pixmap(id),
            Request::PointerMove { .. } => Ok(Reply::Ack),
            Request::GcSetClipRect(rect) => self.handle_gc_set_clip_rect(rect),
            Request::GcSetColor(color) => self.handle_gc_set_color(color),
            Request::GcFillRect(rect) => self.handle_gc_fill_rect(rect),
            Request::GcUpdate => Ok(Reply::Ack),
            Request::GcBitmapCreate { params, seed } => self.handle_gc_bitmap_create(params, seed),
            Request::GcBitmapDestroy(id) => self.handle_gc_bitmap_destroy(id),
            Request::GcBitmapRender { id, srect, offs } => self.handle_gc_bitmap_render(id, srect, offs),
            Request::GcBitmapGetAlloc(id) => self.handle_gc_bitmap_get_alloc(id),
            Request::GcBitmapWrite { id, offset, data } => self.handle_gc_bitmap_write(id, offset, data),
        }
    }

    fn handle_gc_set_clip_rect(&mut self, rect: Option<Rect>) -> FbResult<Reply> {
        self.conn_mut()?.gc_clip = rect;
        Ok(Reply::Ack)
    }

    fn handle_gc_set_color(&mut self, color: Color) -> FbResult<Reply> {
        self.conn_mut()?.gc_color = color;
        Ok(Reply::Ack)
    }

    /// Fills `rect` intersected with the installed clip rect directly on
    /// the Frame Surface, independent of any viewport's text grid (spec.md
    /// §4.8's CGC sits alongside SSFSM's text/pixmap protocol, not inside
    /// it).
    fn handle_gc_fill_rect(&mut self, rect: Rect) -> FbResult<Reply> {
        let conn = self.conn()?;
        let clipped = conn.clip_intersect(rect).clip_to_bounds(self.fs.width(), self.fs.height());
        let color = conn.gc_color;
        if clipped.w != 0 && clipped.h != 0 {
            self.fs.fill_rect(clipped.x, clipped.y, clipped.w, clipped.h, color);
        }
        Ok(Reply::Ack)
    }

    fn handle_gc_bitmap_create(&mut self, params: BitmapParams, seed: Option<Vec<u8>>) -> FbResult<Reply> {
        if params.rect.w == 0 || params.rect.h == 0 {
            return Err(FbError::InvalidArgs);
        }
        let bpp = self.fs.format().bytes_per_pixel();
        let pitch = params.rect.w as usize * bpp;
        let len = pitch * params.rect.h as usize;
        let pixels = match seed {
            Some(p) if p.len() >= len => p,
            Some(_) => return Err(FbError::InvalidArgs),
            None => alloc::vec![0u8; len],
        };
        let conn = self.conn_mut()?;
        let h = conn
            .gc_bitmaps
            .insert(ClientBitmap { rect: params.rect, pitch, pixels })
            .ok_or(FbError::LimitExceeded)?;
        Ok(Reply::Id(h.slot() as u16))
    }

    fn gc_bitmap_handle(&self, id: u16) -> FbResult<Handle> {
        self.conn()?.gc_bitmaps.handle_at(id as usize).ok_or(FbError::NotFound)
    }

    fn handle_gc_bitmap_destroy(&mut self, id: u16) -> FbResult<Reply> {
        let h = self.gc_bitmap_handle(id)?;
        self.conn_mut()?.gc_bitmaps.remove(h).ok_or(FbError::NotFound)?;
        Ok(Reply::Ack)
    }

    /// Renders source rectangle `srect` of bitmap `id` at offset `offs` on
    /// the Frame Surface, clipping silently to the bitmap's own bounds, as
    /// the Pixmap Store does for VP_DRAW.
    fn handle_gc_bitmap_render(&mut self, id: u16, srect: Rect, offs: Point) -> FbResult<Reply> {
        let h = self.gc_bitmap_handle(id)?;
        let bpp = self.fs.format().bytes_per_pixel();
        let conn = self.conn()?;
        let bm = conn.gc_bitmaps.get(h).ok_or(FbError::NotFound)?;
        let w = srect.w.min(bm.rect.w.saturating_sub(srect.x));
        let h_px = srect.h.min(bm.rect.h.saturating_sub(srect.y));
        // Re-clip against the Frame Surface itself: `offs` and the
        // bitmap-bounds-clipped w/h above are still client-controlled and
        // could otherwise address past the end of the destination.
        let dest = Rect::new(offs.x, offs.y, w, h_px).clip_to_bounds(self.fs.width(), self.fs.height());
        if dest.w == 0 || dest.h == 0 {
            return Ok(Reply::Ack);
        }
        let row_bytes = dest.w as usize * bpp;
        let pitch = bm.pitch;
        let pixels = bm.pixels.clone();
        for row in 0..dest.h {
            let src_off = (srect.y + row) as usize * pitch + srect.x as usize * bpp;
            self.fs.blit(dest.x, dest.y + row, &pixels[src_off..src_off + row_bytes], pitch, dest.w, 1);
        }
        Ok(Reply::Ack)
    }

    fn handle_gc_bitmap_get_alloc(&mut self, id: u16) -> FbResult<Reply> {
        let h = self.gc_bitmap_handle(id)?;
        let bm = self.conn()?.gc_bitmaps.get(h).ok_or(FbError::NotFound)?;
        Ok(Reply::Alloc(BitmapAlloc { pitch: bm.pitch, off0: 0, pixels: bm.pixels.clone() }))
    }

    /// A `direct_output` bitmap's writes land here rather than in the
    /// client's own memory, since this crate's transport model keeps the
    /// backing store server-side (SPEC_FULL.md §0).
    fn handle_gc_bitmap_write(&mut self, id: u16, offset: usize, data: Vec<u8>) -> FbResult<Reply> {
        let h = self.gc_bitmap_handle(id)?;
        let conn = self.conn_mut()?;
        let bm = conn.gc_bitmaps.get_mut(h).ok_or(FbError::NotFound)?;
        if offset + data.len() > bm.pixels.len() {
            return Err(FbError::InvalidArgs);
        }
        bm.pixels[offset..offset + data.len()].copy_from_slice(&data);
        Ok(Reply::Ack)
    }

    /// Releases every non-default viewport created on this connection,
    /// unmaps the shared area, and lets animations fall quiescent
    /// naturally. Per Design Notes §9, the source's cleanup bug (it
    /// assigns to a local pointer instead of the table slot) is fixed
    /// here: every non-default slot is actually freed.
    fn handle_hangup(&mut self) -> FbResult<Reply> {
        let default = self.default_viewport;
        let doomed: Vec<Handle> = self.viewports.iter().map(|(h, _)| h).filter(|h| *h != default).collect();
        for h in doomed {
            self.viewports.remove(h);
        }
        self.connection = None;
        log::info!("session hung up");
        Ok(Reply::Ack)
    }

    fn handle_prepare_shm(&mut self, token: u32) -> FbResult<Reply> {
        let conn = self.conn_mut()?;
        if conn.pending.is_some() {
            return Err(FbError::Busy);
        }
        conn.pending = Some(PendingUse::Pixmap { token });
        Ok(Reply::Ack)
    }

    /// Installs `data` as the pixmap source if a matching PREPARE-SHM
    /// token is pending, else as the text interchange buffer (spec.md
    /// §4.7). The source's "first byte must be 'P'" check (§9 open
    /// question) is not special-cased here: a non-PPM pixmap source
    /// simply fails with `InvalidArgs` at SHM2PIXMAP time via the PPM
    /// decoder, per the spec's own recommended resolution, rather than
    /// looping forever.
    fn handle_share_area(&mut self, token: u32, data: Vec<u8>) -> FbResult<Reply> {
        let addr = self.next_shared_token;
        self.next_shared_token += 1;
        let conn = self.conn_mut()?;
        match conn.pending {
            Some(PendingUse::Pixmap { token: expected }) if expected == token => {
                conn.shared_pixels = Some(data);
                conn.pending = None;
            }
            _ => {
                if data.len() % CELL_WIRE_SIZE != 0 {
                    return Err(FbError::InvalidArgs);
                }
                let cells = data.chunks_exact(CELL_WIRE_SIZE).map(Cell::from_wire).collect();
                conn.shared_text = Some(cells);
            }
        }
        Ok(Reply::SharedAddr(addr))
    }

    fn handle_drop_shm(&mut self) -> FbResult<Reply> {
        let conn = self.conn_mut()?;
        conn.shared_pixels = None;
        conn.shared_text = None;
        conn.pending = None;
        Ok(Reply::Ack)
    }

    fn handle_shm2pixmap(&mut self) -> FbResult<Reply> {
        let data = self.conn()?.shared_pixels.as_ref().ok_or(FbError::InvalidArgs)?.clone();
        let h = self.pixmaps.create_from_shm(&self.fs, &data)?;
        Ok(Reply::Id(h.slot() as u16))
    }

    fn handle_draw_ppm(&mut self, x: u16, y: u16) -> FbResult<Reply> {
        let data = self.conn()?.shared_pixels.as_ref().ok_or(FbError::InvalidArgs)?.clone();
        let decoded = ppm::decode(&data)?;
        let bpp = self.fs.format().bytes_per_pixel();
        let mut pixels = alloc::vec![0u8; decoded.width as usize * decoded.height as usize * bpp];
        for i in 0..(decoded.width as usize * decoded.height as usize) {
            let rgb = &decoded.rgb[i * 3..i * 3 + 3];
            self.fs.format().pack(Color::rgb(rgb[0], rgb[1], rgb[2]), &mut pixels[i * bpp..i * bpp + bpp]);
        }
        let vp_h = self.active_viewport_handle()?;
        let rect = self.viewports.get(vp_h).ok_or(FbError::NotFound)?.rect();
        if x >= rect.w || y >= rect.h {
            return Ok(Reply::Ack);
        }
        let draw_w = decoded.width.min(rect.w - x);
        let draw_h = decoded.height.min(rect.h - y);
        let row_bytes = decoded.width as usize * bpp;
        for row in 0..draw_h {
            let src_off = row as usize * row_bytes;
            self.fs.blit(rect.x + x, rect.y + y + row, &pixels[src_off..src_off + draw_w as usize * bpp], row_bytes, draw_w, 1);
        }
        Ok(Reply::Ack)
    }

    /// Fails if the interchange buffer's size doesn't match `rows*cols`
    /// (spec.md §4.7 DRAW-TEXT-DATA notes).
    fn handle_draw_text_data(&mut self) -> FbResult<Reply> {
        let vp_h = self.active_viewport_handle()?;
        let (rows, cols) = {
            let vp = self.viewports.get(vp_h).ok_or(FbError::NotFound)?;
            (vp.rows(), vp.cols())
        };
        let expected = rows as usize * cols as usize;
        let cells = self.conn()?.shared_text.as_ref().ok_or(FbError::InvalidArgs)?;
        if cells.len() != expected {
            return Err(FbError::InvalidArgs);
        }
        let cells = cells.clone();
        let font = self.font;
        let vp = self.viewports.get_mut(vp_h).ok_or(FbError::NotFound)?;
        vp.draw_text_data(&mut self.fs, font, &cells)
    }

    fn handle_putchar(&mut self, row: u16, col: u16, ch: u8, transparent: bool) -> FbResult<Reply> {
        let vp_h = self.active_viewport_handle()?;
        let style = self.viewports.get(vp_h).ok_or(FbError::NotFound)?.style();
        let font = self.font;
        let vp = self.viewports.get_mut(vp_h).ok_or(FbError::NotFound)?;
        vp.putchar_cell(&mut self.fs, font, row, col, ch, style, transparent)?;
        Ok(Reply::Ack)
    }

    fn handle_clear(&mut self) -> FbResult<Reply> {
        let vp_h = self.active_viewport_handle()?;
        let vp = self.viewports.get_mut(vp_h).ok_or(FbError::NotFound)?;
        vp.clear(&mut self.fs);
        Ok(Reply::Ack)
    }

    fn handle_cursor_goto(&mut self, row: u16, col: u16) -> FbResult<Reply> {
        let vp_h = self.active_viewport_handle()?;
        let vp = self.viewports.get_mut(vp_h).ok_or(FbError::NotFound)?;
        vp.cursor_goto(&mut self.fs, row, col)?;
        Ok(Reply::Ack)
    }

    fn handle_cursor_visibility(&mut self, show: bool) -> FbResult<Reply> {
        let vp_h = self.active_viewport_handle()?;
        let vp = self.viewports.get_mut(vp_h).ok_or(FbError::NotFound)?;
        vp.set_cursor_active(&mut self.fs, show)?;
        Ok(Reply::Ack)
    }

    fn handle_get_csize(&mut self) -> FbResult<Reply> {
        let vp_h = self.active_viewport_handle()?;
        let vp = self.viewports.get(vp_h).ok_or(FbError::NotFound)?;
        Ok(Reply::CSize { rows: vp.rows(), cols: vp.cols() })
    }

    fn handle_get_resolution(&mut self) -> FbResult<Reply> {
        Ok(Reply::Resolution { width: self.fs.width(), height: self.fs.height() })
    }

    fn handle_scroll(&mut self, n: i32) -> FbResult<Reply> {
        let vp_h = self.active_viewport_handle()?;
        let rows = self.viewports.get(vp_h).ok_or(FbError::NotFound)?.rows();
        if n.unsigned_abs() > rows as u32 {
            return Err(FbError::InvalidArgs);
        }
        let vp = self.viewports.get_mut(vp_h).ok_or(FbError::NotFound)?;
        vp.scroll(&mut self.fs, n);
        Ok(Reply::Ack)
    }

    fn handle_viewport_create(&mut self, rect: Rect) -> FbResult<Reply> {
        let (fw, fh) = (self.fs.width(), self.fs.height());
        let viewport = Viewport::new(rect, fw, fh, GFX_DEFAULT_STYLE)?;
        let h = self.viewports.insert(viewport).ok_or(FbError::LimitExceeded)?;
        Ok(Reply::Id(h.slot() as u16))
    }

    fn handle_viewport_switch(&mut self, id: u16) -> FbResult<Reply> {
        let h = self.viewport_handle(id)?;
        self.conn_mut()?.active_viewport = h;
        Ok(Reply::Ack)
    }

    /// Frees the slot and its back buffer. If the deleted viewport was
    /// active, the session falls back to the default viewport, which is
    /// never itself deletable by id (the default viewport's slot can only
    /// be freed by `handle_hangup`, and only the connection that didn't
    /// create it would try to anyway).
    fn handle_viewport_delete(&mut self, id: u16) -> FbResult<Reply> {
        let h = self.viewport_handle(id)?;
        self.viewports.remove(h).ok_or(FbError::NotFound)?;
        let default_viewport = self.default_viewport;
        let conn = self.conn_mut()?;
        if conn.active_viewport == h {
            conn.active_viewport = default_viewport;
        }
        Ok(Reply::Ack)
    }

    fn handle_viewport_db(&mut self, id: u16, enable: bool) -> FbResult<Reply> {
        let h = self.viewport_handle(id)?;
        let fs = &self.fs;
        let vp = self.viewports.get_mut(h).ok_or(FbError::NotFound)?;
        vp.set_double_buffer(fs, enable);
        Ok(Reply::Ack)
    }

    fn handle_set_style(&mut self, fg: Color, bg: Color) -> FbResult<Reply> {
        let vp_h = self.active_viewport_handle()?;
        let vp = self.viewports.get_mut(vp_h).ok_or(FbError::NotFound)?;
        vp.set_style(Style::new(fg, bg));
        Ok(Reply::Ack)
    }

    fn handle_anim_create(&mut self) -> FbResult<Reply> {
        let vp = self.active_viewport_handle()?;
        let h = self.animations.create(vp)?;
        Ok(Reply::Id(h.slot() as u16))
    }

    fn handle_anim_drop(&mut self, id: u16) -> FbResult<Reply> {
        let h = self.anim_handle(id)?;
        self.animations.drop_animation(h)?;
        Ok(Reply::Ack)
    }

    fn handle_anim_add_pixmap(&mut self, anim: u16, pixmap: u16) -> FbResult<Reply> {
        let anim_h = self.anim_handle(anim)?;
        let pixmap_h = self.pixmap_handle(pixmap)?;
        self.animations.add_frame(anim_h, pixmap_h)?;
        Ok(Reply::Ack)
    }

    fn handle_anim_chg_viewport(&mut self, anim: u16, viewport: u16) -> FbResult<Reply> {
        let anim_h = self.anim_handle(anim)?;
        let vp_h = self.viewport_handle(viewport)?;
        self.animations.change_viewport(anim_h, vp_h)?;
        Ok(Reply::Ack)
    }

    fn handle_anim_start(&mut self, id: u16) -> FbResult<Reply> {
        let h = self.anim_handle(id)?;
        self.animations.start(h)?;
        Ok(Reply::Ack)
    }

    fn handle_anim_stop(&mut self, id: u16) -> FbResult<Reply> {
        let h = self.anim_handle(id)?;
        self.animations.stop(h)?;
        Ok(Reply::Ack)
    }

    fn handle_vp2pixmap(&mut self) -> FbResult<Reply> {
        let vp_h = self.active_viewport_handle()?;
        let vp = self.viewports.get(vp_h).ok_or(FbError::NotFound)?;
        let h = self.pixmaps.snapshot(&self.fs, vp)?;
        Ok(Reply::Id(h.slot() as u16))
    }

    fn handle_vp_draw(&mut self, id: u16) -> FbResult<Reply> {
        let pixmap_h = self.pixmap_handle(id)?;
        let vp_h = self.active_viewport_handle()?;
        let vp = self.viewports.get(vp_h).ok_or(FbError::NotFound)?;
        self.pixmaps.draw(&mut self.fs, vp, pixmap_h)?;
        Ok(Reply::Ack)
    }

    fn handle_drop_pixmap(&mut self, id: u16) -> FbResult<Reply> {
        let h = self.pixmap_handle(id)?;
        self.pixmaps.destroy(h)?;
        Ok(Reply::Ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::PixelFormat;

    fn server() -> FbServer {
        let mut s = FbServer::new(BootConfig::hosted(160, 128, PixelFormat::Argb8888));
        s.connect().unwrap();
        s
    }

    #[test]
    fn second_connection_is_refused_until_hangup() {
        let mut s = server();
        assert_eq!(s.connect().unwrap_err(), FbError::Refused);
        s.dispatch(Request::Hangup).unwrap();
        assert!(s.connect().is_ok());
    }

    #[test]
    fn viewport_table_bound_is_enforced() {
        let mut s = server();
        for _ in 0..crate::viewport::MAX_VIEWPORTS - 1 {
            assert!(s.dispatch(Request::ViewportCreate { rect: Rect::new(0, 0, 16, 16) }).is_ok());
        }
        assert_eq!(
            s.dispatch(Request::ViewportCreate { rect: Rect::new(0, 0, 16, 16) }).unwrap_err(),
            FbError::LimitExceeded
        );
    }

    #[test]
    fn hangup_frees_non_default_viewports_but_keeps_default() {
        let mut s = server();
        let id = match s.dispatch(Request::ViewportCreate { rect: Rect::new(0, 0, 16, 16) }).unwrap() {
            Reply::Id(id) => id,
            _ => panic!("expected Id"),
        };
        s.dispatch(Request::Hangup).unwrap();
        s.connect().unwrap();
        // The freed slot is available again for a brand new viewport.
        let new_id = match s.dispatch(Request::ViewportCreate { rect: Rect::new(0, 0, 16, 16) }).unwrap() {
            Reply::Id(id) => id,
            _ => panic!("expected Id"),
        };
        assert_eq!(new_id, id);
        // Default viewport (id 0) is still addressable.
        assert!(s.dispatch(Request::ViewportSwitch(0)).is_ok());
    }

    #[test]
    fn prepare_shm_then_share_area_targets_pixmap_source() {
        let mut s = server();
        s.dispatch(Request::PrepareShm { token: 7 }).unwrap();
        assert_eq!(s.dispatch(Request::PrepareShm { token: 8 }).unwrap_err(), FbError::Busy);
        let ppm = b"P3 1 1 255\n255 0 0\n".to_vec();
        s.dispatch(Request::ShareArea { token: 7, data: ppm }).unwrap();
        let id = match s.dispatch(Request::Shm2Pixmap).unwrap() {
            Reply::Id(id) => id,
            _ => panic!("expected Id"),
        };
        assert_eq!(id, 0);
    }

    #[test]
    fn share_area_without_prepare_targets_text_interchange() {
        let mut s = server();
        let (rows, cols) = match s.dispatch(Request::GetCSize).unwrap() {
            Reply::CSize { rows, cols } => (rows, cols),
            _ => panic!("expected CSize"),
        };
        let mut data = alloc::vec![0u8; rows as usize * cols as usize * CELL_WIRE_SIZE];
        for chunk in data.chunks_exact_mut(CELL_WIRE_SIZE) {
            Cell { character: b'x', style: GFX_DEFAULT_STYLE }.to_wire(chunk);
        }
        s.dispatch(Request::ShareArea { token: 0, data }).unwrap();
        assert!(s.dispatch(Request::DrawTextData).is_ok());
    }

    #[test]
    fn draw_text_data_rejects_wrong_sized_interchange_buffer() {
        let mut s = server();
        s.dispatch(Request::ShareArea { token: 0, data: alloc::vec![0u8; CELL_WIRE_SIZE] }).unwrap();
        assert_eq!(s.dispatch(Request::DrawTextData).unwrap_err(), FbError::InvalidArgs);
    }

    #[test]
    fn invalid_args_leaves_state_untouched() {
        let mut s = server();
        let before = s.fs().get_pixel(0, 0);
        assert_eq!(s.dispatch(Request::Scroll(10_000)).unwrap_err(), FbError::InvalidArgs);
        assert_eq!(s.fs().get_pixel(0, 0), before);
    }

    #[test]
    fn gc_fill_rect_is_clipped_to_clip_rect() {
        let mut s = server();
        s.dispatch(Request::GcSetClipRect(Some(Rect::new(10, 10, 10, 10)))).unwrap();
        s.dispatch(Request::GcSetColor(Color::rgb(0xff, 0, 0))).unwrap();
        s.dispatch(Request::GcFillRect(Rect::new(0, 0, 160, 128))).unwrap();
        assert_eq!(s.fs().get_pixel(15, 15), Color::rgb(0xff, 0, 0));
        assert_eq!(s.fs().get_pixel(5, 5), Color::default());
    }

    #[test]
    fn gc_bitmap_direct_output_write_then_render_round_trips() {
        let mut s = server();
        let params = BitmapParams { rect: Rect::new(0, 0, 2, 2), direct_output: true };
        let id = match s.dispatch(Request::GcBitmapCreate { params, seed: None }).unwrap() {
            Reply::Id(id) => id,
            _ => panic!("expected Id"),
        };
        let alloc = match s.dispatch(Request::GcBitmapGetAlloc(id)).unwrap() {
            Reply::Alloc(a) => a,
            _ => panic!("expected Alloc"),
        };
        let bpp = s.fs().format().bytes_per_pixel();
        let mut row = alloc::vec![0u8; 2 * bpp];
        s.fs().format().pack(Color::rgb(1, 2, 3), &mut row[0..bpp]);
        s.fs().format().pack(Color::rgb(4, 5, 6), &mut row[bpp..2 * bpp]);
        s.dispatch(Request::GcBitmapWrite { id, offset: 0, data: row }).unwrap();
        let _ = alloc.pitch;
        s.dispatch(Request::GcBitmapRender { id, srect: Rect::new(0, 0, 2, 2), offs: Point::new(20, 20) }).unwrap();
        assert_eq!(s.fs().get_pixel(20, 20), Color::rgb(1, 2, 3));
        assert_eq!(s.fs().get_pixel(21, 20), Color::rgb(4, 5, 6));
    }

    #[test]
    fn gc_bitmap_table_bound_is_enforced() {
        let mut s = server();
        for _ in 0..MAX_GC_BITMAPS {
            let params = BitmapParams { rect: Rect::new(0, 0, 2, 2), direct_output: false };
            assert!(s.dispatch(Request::GcBitmapCreate { params, seed: None }).is_ok());
        }
        let params = BitmapParams { rect: Rect::new(0, 0, 2, 2), direct_output: false };
        assert_eq!(
            s.dispatch(Request::GcBitmapCreate { params, seed: None }).unwrap_err(),
            FbError::LimitExceeded
        );
    }

    #[test]
    fn scroll_rejects_huge_negative_count_without_truncation() {
        let mut s = server();
        assert_eq!(s.dispatch(Request::Scroll(i32::MIN)).unwrap_err(), FbError::InvalidArgs);
    }

    #[test]
    fn gc_fill_rect_is_clamped_to_frame_surface_bounds() {
        let mut s = server();
        s.dispatch(Request::GcSetColor(Color::rgb(0xff, 0, 0))).unwrap();
        // A rect whose right edge would overflow u16 must not panic and
        // must not paint past the real frame surface bounds.
        assert!(s.dispatch(Request::GcFillRect(Rect::new(0xF000, 0, 0x2000, 10))).is_ok());
        let (w, _) = s.resolution();
        assert_eq!(s.fs().get_pixel(w - 1, 0), Color::default());
    }

    #[test]
    fn gc_bitmap_render_clamps_offset_to_frame_surface_bounds() {
        let mut s = server();
        let params = BitmapParams { rect: Rect::new(0, 0, 2, 2), direct_output: false };
        let id = match s.dispatch(Request::GcBitmapCreate { params, seed: None }).unwrap() {
            Reply::Id(id) => id,
            _ => panic!("expected Id"),
        };
        // Offscreen offset must be clamped away rather than panicking on an
        // out-of-range blit.
        let (w, h) = s.resolution();
        assert!(s.dispatch(Request::GcBitmapRender { id, srect: Rect::new(0, 0, 2, 2), offs: Point::new(w, h) }).is_ok());
    }

    #[test]
    fn needs_idle_timeout_tracks_cursor_and_animation_state() {
        let mut s = server();
        assert!(!s.needs_idle_timeout());
        s.dispatch(Request::CursorVisibility(true)).unwrap();
        assert!(s.needs_idle_timeout());
    }
}
