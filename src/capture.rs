//! composited capture and scaled repaint
//!
//! The source window is redirected to an offscreen buffer, that buffer is
//! named as a pixmap, and a damage object reports whenever it changes.
//! Repainting is a single render composite from the pixmap picture, which
//! carries a 1/scale transform and nearest filtering, onto the mirror
//! picture. A damage subtract then re-arms notification. Every resource
//! acquired here is released on drop, in reverse acquisition order.

use anyhow::{Context, Result};
use x11rb::connection::Connection;
use x11rb::protocol::composite::{ConnectionExt as CompositeExt, Redirect};
use x11rb::protocol::damage::{self, ConnectionExt as DamageExt, ReportLevel};
use x11rb::protocol::render::{
    self, ConnectionExt as RenderExt, CreatePictureAux, PictOp, Pictformat, Picture, Transform,
};
use x11rb::protocol::xproto::{ConnectionExt, Pixmap, Visualid, Window};
use x11rb::rust_connection::RustConnection;

use crate::error::SessionError;
use crate::geometry::Scale;

const FIXED_SHIFT: i32 = 16;

/// 16.16 fixed point, the render extension's matrix element format.
fn double_to_fixed(d: f64) -> render::Fixed {
    (d * f64::from(1 << FIXED_SHIFT)) as render::Fixed
}

/// Transform for the source picture. Render transforms map destination
/// coordinates back into source coordinates, so magnifying by `s` means a
/// diagonal of 1/s.
fn magnify_transform(scale: Scale) -> Transform {
    let inv = double_to_fixed(1.0 / f64::from(scale.factor()));
    Transform {
        matrix11: inv,
        matrix12: 0,
        matrix13: 0,
        matrix21: 0,
        matrix22: inv,
        matrix23: 0,
        matrix31: 0,
        matrix32: 0,
        matrix33: double_to_fixed(1.0),
    }
}

/// Picture format for a visual, from the server's format catalogue.
fn find_visual_format(conn: &RustConnection, visual: Visualid) -> Result<Pictformat> {
    let formats = conn.render_query_pict_formats()?.reply()?;
    for screen in &formats.screens {
        for depth in &screen.depths {
            for pv in &depth.visuals {
                if pv.visual == visual {
                    return Ok(pv.format);
                }
            }
        }
    }
    anyhow::bail!("no picture format for visual {visual:#x}")
}

struct RedirectGuard<'c> {
    conn: &'c RustConnection,
    window: Window,
}

impl Drop for RedirectGuard<'_> {
    fn drop(&mut self) {
        let _ = self
            .conn
            .composite_unredirect_window(self.window, Redirect::AUTOMATIC);
    }
}

struct NamedPixmap<'c> {
    conn: &'c RustConnection,
    id: Pixmap,
}

impl Drop for NamedPixmap<'_> {
    fn drop(&mut self) {
        let _ = self.conn.free_pixmap(self.id);
    }
}

struct DamageHandle<'c> {
    conn: &'c RustConnection,
    id: damage::Damage,
}

impl Drop for DamageHandle<'_> {
    fn drop(&mut self) {
        let _ = self.conn.damage_destroy(self.id);
    }
}

struct PictureHandle<'c> {
    conn: &'c RustConnection,
    id: Picture,
}

impl Drop for PictureHandle<'_> {
    fn drop(&mut self) {
        let _ = self.conn.render_free_picture(self.id);
    }
}

/// The server-side resources backing the scaled view of one source window.
/// Field order is drop order: damage first, pictures, then the pixmap, and
/// the redirect last.
pub struct ScaledView<'c> {
    conn: &'c RustConnection,
    source: Window,
    width: u16,
    height: u16,
    damage: DamageHandle<'c>,
    mirror_picture: PictureHandle<'c>,
    source_picture: PictureHandle<'c>,
    #[allow(dead_code)]
    pixmap: NamedPixmap<'c>,
    #[allow(dead_code)]
    redirect: RedirectGuard<'c>,
}

impl<'c> ScaledView<'c> {
    /// Wire up capture of `source` and scaled painting onto `mirror`, whose
    /// extent is `width` by `height` (the source extent times the scale).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        conn: &'c RustConnection,
        source: Window,
        source_visual: Visualid,
        mirror: Window,
        mirror_visual: Visualid,
        scale: Scale,
        width: u16,
        height: u16,
    ) -> Result<Self> {
        let source_format = find_visual_format(conn, source_visual)?;
        let mirror_format = find_visual_format(conn, mirror_visual)?;

        conn.composite_redirect_window(source, Redirect::AUTOMATIC)?
            .check()
            .context("source window cannot be captured")?;
        let redirect = RedirectGuard {
            conn,
            window: source,
        };

        let pixmap_id = conn.generate_id()?;
        conn.composite_name_window_pixmap(source, pixmap_id)?
            .check()
            .context("failed to name the source's composited pixmap")?;
        let pixmap = NamedPixmap {
            conn,
            id: pixmap_id,
        };

        let damage_id = conn.generate_id()?;
        conn.damage_create(damage_id, source, ReportLevel::NON_EMPTY)?
            .check()
            .context("failed to create damage object on the source")?;
        let damage = DamageHandle {
            conn,
            id: damage_id,
        };

        let source_pic = conn.generate_id()?;
        conn.render_create_picture(source_pic, pixmap_id, source_format, &CreatePictureAux::new())?
            .check()
            .context("failed to create source picture")?;
        let source_picture = PictureHandle {
            conn,
            id: source_pic,
        };

        conn.render_set_picture_transform(source_pic, magnify_transform(scale))?
            .check()
            .context("failed to set the scale transform")?;
        conn.render_set_picture_filter(source_pic, b"nearest", &[])?
            .check()
            .context("failed to set the scale filter")?;

        let mirror_pic = conn.generate_id()?;
        conn.render_create_picture(mirror_pic, mirror, mirror_format, &CreatePictureAux::new())?
            .check()
            .context("failed to create mirror picture")?;
        let mirror_picture = PictureHandle {
            conn,
            id: mirror_pic,
        };

        Ok(Self {
            conn,
            source,
            width,
            height,
            damage,
            mirror_picture,
            source_picture,
            pixmap,
            redirect,
        })
    }

    pub fn damage(&self) -> damage::Damage {
        self.damage.id
    }

    /// One full-rectangle scaled copy onto the mirror. Checked, so a source
    /// that went away surfaces here as `SourceLost`.
    pub fn copy_frame(&self) -> Result<(), SessionError> {
        self.conn
            .render_composite(
                PictOp::SRC,
                self.source_picture.id,
                x11rb::NONE,
                self.mirror_picture.id,
                0,
                0,
                0,
                0,
                0,
                0,
                self.width,
                self.height,
            )?
            .check()
            .map_err(|e| SessionError::from_reply(e, self.source))?;
        Ok(())
    }

    /// Acknowledge the accumulated damage so the next accumulation
    /// renotifies. Always called after `copy_frame` for a notification.
    pub fn clear_damage(&self) -> Result<(), SessionError> {
        self.conn
            .damage_subtract(self.damage.id, x11rb::NONE, x11rb::NONE)?;
        Ok(())
    }
}
