//! Core IPC-driven display/framebuffer subsystem and client session
//! protocol (spec.md §1 OVERVIEW).
//!
//! Layout follows the source's own module boundaries: a Frame Surface
//! owning the mapped display plane ([`surface`]), a Viewport Engine laid
//! over it ([`viewport`]), a Pixmap Store and Animation Engine for
//! decoded-image playback ([`pixmap`], [`animation`]), a Text Cell Buffer
//! independent of any one frame surface ([`textbuf`]), the Client Graphics
//! Context vtable ([`client`]), and the Server Session FSM tying all of the
//! above into one per-connection dispatch loop ([`session`]). [`ipc`] and
//! [`xous_client`] carry the wire format and the xous-backed client/server
//! glue; everything below that is `no_std` and transport-agnostic.
#![cfg_attr(target_os = "none", no_std)]

extern crate alloc;

pub mod animation;
pub mod arena;
pub mod client;
pub mod color;
pub mod config;
pub mod error;
pub mod font;
pub mod geometry;
pub mod ipc;
pub mod pixmap;
pub mod ppm;
pub mod session;
pub mod style;
pub mod surface;
pub mod textbuf;
pub mod viewport;

pub mod xous_client;

#[cfg(all(feature = "hosted", any(windows, unix)))]
pub mod backend;

pub use animation::AnimationEngine;
pub use arena::{Arena, Handle};
pub use client::{local_context, Bitmap, BitmapAlloc, BitmapParams, GraphicsContext, GraphicsContextOps, LocalGc};
pub use color::{Color, PixelFormat};
pub use config::BootConfig;
pub use error::{FbError, FbResult};
pub use font::{FontTable, DEFAULT_FONT};
pub use geometry::{Point, Rect};
pub use ipc::Opcode;
pub use pixmap::PixmapStore;
pub use session::{Connection, FbServer, Reply, Request};
pub use style::{Cell, Style};
pub use surface::FrameSurface;
pub use textbuf::TextCellBuffer;
pub use viewport::Viewport;

/// Server process name registered with `xous-names`, used by both
/// `main.rs` and `xous_client::FbSession`/`XousGc` to find each other.
pub const SERVER_NAME_FB: &str = "_Framebuffer server_";
