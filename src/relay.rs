//! input relay to the source window
//!
//! Everything the display server delivers to the mirror window is relayed to
//! the source as a synthetic event. Exactly five kinds carry the pointer
//! position an application acts on, and only those get their event-relative
//! coordinates mapped back to source space; every other kind is relayed
//! bit-for-bit so the source sees what the mirror saw.

use x11rb::protocol::xproto::Window;
use x11rb::protocol::Event;

use crate::geometry::Scale;

/// The window the display server delivered `event` to, for the kinds that
/// have one. Most carry it in `event` or `window`; CreateNotify names the
/// parent and SelectionClear the owner. Kinds without a delivery window
/// (keymap state, keyboard mapping changes, selection handshakes this
/// client never initiates, protocol errors, extension events) yield None
/// and are never relayed.
pub fn delivery_window(event: &Event) -> Option<Window> {
    match event {
        Event::KeyPress(e) | Event::KeyRelease(e) => Some(e.event),
        Event::ButtonPress(e) | Event::ButtonRelease(e) => Some(e.event),
        Event::MotionNotify(e) => Some(e.event),
        Event::EnterNotify(e) | Event::LeaveNotify(e) => Some(e.event),
        Event::FocusIn(e) | Event::FocusOut(e) => Some(e.event),
        Event::Expose(e) => Some(e.window),
        Event::VisibilityNotify(e) => Some(e.window),
        Event::PropertyNotify(e) => Some(e.window),
        Event::ClientMessage(e) => Some(e.window),
        Event::ColormapNotify(e) => Some(e.window),
        Event::ResizeRequest(e) => Some(e.window),
        Event::ConfigureNotify(e) => Some(e.event),
        Event::MapNotify(e) => Some(e.event),
        Event::UnmapNotify(e) => Some(e.event),
        Event::ReparentNotify(e) => Some(e.event),
        Event::GravityNotify(e) => Some(e.event),
        Event::CirculateNotify(e) => Some(e.event),
        Event::DestroyNotify(e) => Some(e.event),
        Event::CreateNotify(e) => Some(e.parent),
        Event::SelectionClear(e) => Some(e.owner),
        _ => None,
    }
}

/// The 32-byte wire payload to relay for an event delivered to the mirror.
/// Pointer and key events get `event_x`/`event_y` divided down by the scale;
/// all other fields, and all other kinds in full, are preserved exactly.
pub fn relay_payload(event: &Event, scale: Scale) -> Option<[u8; 32]> {
    match event {
        Event::KeyPress(e) | Event::KeyRelease(e) => {
            let mut out = *e;
            let (x, y) = scale.to_source(e.event_x, e.event_y);
            out.event_x = x;
            out.event_y = y;
            Some(out.into())
        }
        Event::ButtonPress(e) | Event::ButtonRelease(e) => {
            let mut out = *e;
            let (x, y) = scale.to_source(e.event_x, e.event_y);
            out.event_x = x;
            out.event_y = y;
            Some(out.into())
        }
        Event::MotionNotify(e) => {
            let mut out = *e;
            let (x, y) = scale.to_source(e.event_x, e.event_y);
            out.event_x = x;
            out.event_y = y;
            Some(out.into())
        }
        Event::EnterNotify(e) | Event::LeaveNotify(e) => Some((*e).into()),
        Event::FocusIn(e) | Event::FocusOut(e) => Some((*e).into()),
        Event::Expose(e) => Some((*e).into()),
        Event::VisibilityNotify(e) => Some((*e).into()),
        Event::PropertyNotify(e) => Some((*e).into()),
        Event::ClientMessage(e) => Some((*e).into()),
        Event::ColormapNotify(e) => Some((*e).into()),
        Event::ConfigureNotify(e) => Some((*e).into()),
        Event::MapNotify(e) => Some((*e).into()),
        Event::UnmapNotify(e) => Some((*e).into()),
        Event::ReparentNotify(e) => Some((*e).into()),
        Event::GravityNotify(e) => Some((*e).into()),
        Event::CirculateNotify(e) => Some((*e).into()),
        Event::DestroyNotify(e) => Some((*e).into()),
        Event::ResizeRequest(e) => Some((*e).into()),
        Event::CreateNotify(e) => Some((*e).into()),
        Event::SelectionClear(e) => Some((*e).into()),
        _ => None,
    }
}
