//! display server access
//!
//! Owns the X11 connection and answers the questions setup asks: are the
//! required extensions present, what does a window look like, which windows
//! exist at all. The connection is built once in main and handed by
//! reference to everything that needs it.

use std::os::unix::io::{AsRawFd, RawFd};

use anyhow::{Context, Result};
use tracing::debug;
use x11rb::connection::{Connection, RequestConnection};
use x11rb::protocol::composite::ConnectionExt as CompositeExt;
use x11rb::protocol::damage::ConnectionExt as DamageExt;
use x11rb::protocol::render::ConnectionExt as RenderExt;
use x11rb::protocol::xproto::{
    Atom, AtomEnum, ConnectionExt, EventMask, MapState, Screen, Visualid, Window,
};
use x11rb::protocol::{composite, damage, render};
use x11rb::rust_connection::RustConnection;

// extension versions this tool speaks
const COMPOSITE_VERSION: (u32, u32) = (0, 4);
const DAMAGE_VERSION: (u32, u32) = (1, 1);
const RENDER_VERSION: (u32, u32) = (0, 11);

/// One open display connection plus the screen it landed on.
pub struct DisplayServer {
    pub conn: RustConnection,
    screen_num: usize,
    atom_utf8_string: Atom,
    atom_net_wm_name: Atom,
}

/// Merged geometry and attributes of a window, the shape setup works with.
#[derive(Debug, Clone, Copy)]
pub struct WindowInfo {
    pub root: Window,
    pub x: i16,
    pub y: i16,
    pub width: u16,
    pub height: u16,
    pub border_width: u16,
    pub visual: Visualid,
    pub all_event_masks: EventMask,
    pub viewable: bool,
}

impl DisplayServer {
    /// Connect and verify the display can do composited capture, damage
    /// reporting and server-side scaled copies. Any gap is fatal here,
    /// before a single window is touched.
    pub fn open(display: Option<&str>) -> Result<Self> {
        let (conn, screen_num) =
            x11rb::connect(display).context("failed to connect to X display")?;

        let atom_utf8_string = conn.intern_atom(true, b"UTF8_STRING")?.reply()?.atom;
        let atom_net_wm_name = conn.intern_atom(true, b"_NET_WM_NAME")?.reply()?.atom;

        let this = Self {
            conn,
            screen_num,
            atom_utf8_string,
            atom_net_wm_name,
        };
        this.check_extensions()?;
        Ok(this)
    }

    fn check_extensions(&self) -> Result<()> {
        self.conn
            .extension_information(composite::X11_EXTENSION_NAME)?
            .context("Composite extension not available")?;
        self.conn
            .extension_information(damage::X11_EXTENSION_NAME)?
            .context("Damage extension not available")?;
        self.conn
            .extension_information(render::X11_EXTENSION_NAME)?
            .context("Render extension not available")?;

        let comp = self
            .conn
            .composite_query_version(COMPOSITE_VERSION.0, COMPOSITE_VERSION.1)?
            .reply()
            .context("Composite version handshake failed")?;
        let dmg = self
            .conn
            .damage_query_version(DAMAGE_VERSION.0, DAMAGE_VERSION.1)?
            .reply()
            .context("Damage version handshake failed")?;
        let rend = self
            .conn
            .render_query_version(RENDER_VERSION.0, RENDER_VERSION.1)?
            .reply()
            .context("Render version handshake failed")?;

        debug!(
            "extensions: composite {}.{}, damage {}.{}, render {}.{}",
            comp.major_version,
            comp.minor_version,
            dmg.major_version,
            dmg.minor_version,
            rend.major_version,
            rend.minor_version,
        );
        Ok(())
    }

    pub fn screen(&self) -> &Screen {
        &self.conn.setup().roots[self.screen_num]
    }

    /// Raw connection fd, for waiting on readability without reading.
    pub fn fd(&self) -> RawFd {
        self.conn.stream().as_raw_fd()
    }

    /// Merged geometry and attributes. Fails when the id does not name a
    /// window on this display.
    pub fn window_info(&self, window: Window) -> Result<WindowInfo> {
        let geom_cookie = self.conn.get_geometry(window)?;
        let attr_cookie = self.conn.get_window_attributes(window)?;

        let geom = geom_cookie
            .reply()
            .with_context(|| format!("no such window: {window:#010x}"))?;
        let attrs = attr_cookie
            .reply()
            .with_context(|| format!("no attributes for window {window:#010x}"))?;

        Ok(WindowInfo {
            root: geom.root,
            x: geom.x,
            y: geom.y,
            width: geom.width,
            height: geom.height,
            border_width: geom.border_width,
            visual: attrs.visual,
            all_event_masks: attrs.all_event_masks,
            viewable: attrs.map_state == MapState::VIEWABLE,
        })
    }

    /// Window title: _NET_WM_NAME, falling back to WM_NAME.
    pub fn window_name(&self, window: Window) -> Result<Option<String>> {
        if self.atom_net_wm_name != x11rb::NONE && self.atom_utf8_string != x11rb::NONE {
            let prop = self
                .conn
                .get_property(
                    false,
                    window,
                    self.atom_net_wm_name,
                    self.atom_utf8_string,
                    0,
                    1024,
                )?
                .reply()?;
            if prop.value_len > 0 {
                return Ok(Some(String::from_utf8_lossy(&prop.value).into_owned()));
            }
        }

        let prop = self
            .conn
            .get_property(false, window, AtomEnum::WM_NAME, AtomEnum::ANY, 0, 1024)?
            .reply()?;
        if prop.value_len > 0 {
            Ok(Some(String::from_utf8_lossy(&prop.value).into_owned()))
        } else {
            Ok(None)
        }
    }

    /// Viewable children of the root, in stacking order, for `list`.
    pub fn list_windows(&self) -> Result<Vec<(Window, WindowInfo, Option<String>)>> {
        let tree = self.conn.query_tree(self.screen().root)?.reply()?;
        let mut out = Vec::new();
        for child in tree.children {
            let info = match self.window_info(child) {
                Ok(info) => info,
                Err(_) => continue, // raced with destruction
            };
            if !info.viewable {
                continue;
            }
            let name = self.window_name(child).unwrap_or(None);
            out.push((child, info, name));
        }
        Ok(out)
    }
}
