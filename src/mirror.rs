//! Mirror session: window setup, event classification, and the main loop
//!
//! One session mirrors one source window. Damage notifications trigger a
//! full scaled repaint followed by a damage acknowledge, input events on
//! the mirror are rewritten into source coordinates and sent on, and
//! everything else is dropped. The loop drains pending events, flushes,
//! then waits for the connection to become readable with a timeout so a
//! shutdown request is honored within a bounded delay.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, trace, warn};
use x11rb::connection::Connection;
use x11rb::errors::ConnectionError;
use x11rb::protocol::damage;
use x11rb::protocol::xproto::{
    AtomEnum, ChangeWindowAttributesAux, ConnectionExt, CreateWindowAux, EventMask, PropMode,
    Window, WindowClass,
};
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;
use x11rb::wrapper::ConnectionExt as _;

use crate::capture::ScaledView;
use crate::display::{DisplayServer, WindowInfo};
use crate::error::SessionError;
use crate::geometry::Scale;
use crate::relay;

const POLL_TIMEOUT_MS: i32 = 100;

struct MirrorWindow<'c> {
    conn: &'c RustConnection,
    id: Window,
    width: u16,
    height: u16,
}

impl Drop for MirrorWindow<'_> {
    fn drop(&mut self) {
        let _ = self.conn.destroy_window(self.id);
    }
}

/// Create and map the mirror window: source geometry times the scale, on
/// the same root, selecting the same events the source has selected so
/// input aimed at the mirror reaches us.
fn create_mirror<'c>(
    display: &'c DisplayServer,
    source: &WindowInfo,
    scale: Scale,
    title: &str,
) -> Result<MirrorWindow<'c>> {
    let (width, height) = scale
        .scaled_extent(source.width, source.height)
        .context("scaled mirror size exceeds the protocol limit")?;

    let id = display.conn.generate_id()?;
    display
        .conn
        .create_window(
            x11rb::COPY_DEPTH_FROM_PARENT,
            id,
            source.root,
            source.x,
            source.y,
            width,
            height,
            source.border_width,
            WindowClass::INPUT_OUTPUT,
            0,
            &CreateWindowAux::new().event_mask(source.all_event_masks),
        )?
        .check()
        .context("failed to create the mirror window")?;
    let mirror = MirrorWindow {
        conn: &display.conn,
        id,
        width,
        height,
    };

    display.conn.change_property8(
        PropMode::REPLACE,
        id,
        AtomEnum::WM_NAME,
        AtomEnum::STRING,
        title.as_bytes(),
    )?;
    display.conn.map_window(id)?;
    Ok(mirror)
}

/// Session effects, separated from classification so the loop logic can be
/// exercised without a display server.
pub(crate) trait SessionOps {
    fn copy_frame(&mut self) -> Result<(), SessionError>;
    fn clear_damage(&mut self) -> Result<(), SessionError>;
    fn deliver(&mut self, payload: [u8; 32]) -> Result<(), SessionError>;
}

struct LiveOps<'c> {
    conn: &'c RustConnection,
    view: ScaledView<'c>,
    source: Window,
}

impl SessionOps for LiveOps<'_> {
    fn copy_frame(&mut self) -> Result<(), SessionError> {
        self.view.copy_frame()
    }

    fn clear_damage(&mut self) -> Result<(), SessionError> {
        self.view.clear_damage()
    }

    fn deliver(&mut self, payload: [u8; 32]) -> Result<(), SessionError> {
        self.conn
            .send_event(false, self.source, EventMask::NO_EVENT, payload)?
            .check()
            .map_err(|e| SessionError::from_reply(e, self.source))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Disposition {
    Refresh,
    Relay([u8; 32]),
    SourceResized { width: u16, height: u16 },
    SourceGone,
    Discard,
}

/// Sort one event into what the session does about it. Damage on our
/// damage object means repaint, structure events on the source drive the
/// session's lifetime, and anything delivered to the mirror window is
/// relayed. The rest is noise.
fn classify(
    event: &Event,
    source: Window,
    mirror: Window,
    damage: damage::Damage,
    scale: Scale,
) -> Disposition {
    match event {
        Event::DamageNotify(e) if e.damage == damage => Disposition::Refresh,
        Event::DestroyNotify(e) if e.window == source => Disposition::SourceGone,
        Event::ConfigureNotify(e) if e.window == source => Disposition::SourceResized {
            width: e.width,
            height: e.height,
        },
        _ if relay::delivery_window(event) == Some(mirror) => {
            match relay::relay_payload(event, scale) {
                Some(payload) => Disposition::Relay(payload),
                None => Disposition::Discard,
            }
        }
        _ => Disposition::Discard,
    }
}

fn apply<O: SessionOps>(
    ops: &mut O,
    disposition: Disposition,
    source: Window,
) -> Result<(), SessionError> {
    match disposition {
        Disposition::Refresh => {
            ops.copy_frame()?;
            ops.clear_damage()
        }
        Disposition::Relay(payload) => ops.deliver(payload),
        Disposition::SourceGone => Err(SessionError::SourceLost(source)),
        Disposition::SourceResized { .. } | Disposition::Discard => Ok(()),
    }
}

struct Session<'a> {
    display: &'a DisplayServer,
    ops: LiveOps<'a>,
    mirror: MirrorWindow<'a>,
    source: Window,
    scale: Scale,
    source_extent: (u16, u16),
    shutdown: Arc<AtomicBool>,
}

impl Session<'_> {
    fn handle(&mut self, event: &Event) -> Result<(), SessionError> {
        if let Event::Error(err) = event {
            warn!(
                "unexpected X11 error: {:?} (major opcode {})",
                err.error_kind, err.major_opcode
            );
            return Ok(());
        }

        let disposition = classify(
            event,
            self.source,
            self.mirror.id,
            self.ops.view.damage(),
            self.scale,
        );
        match disposition {
            Disposition::SourceResized { width, height } => {
                if (width, height) != self.source_extent {
                    warn!(
                        "source resized to {}x{}; the mirror keeps its {}x{} extent",
                        width, height, self.mirror.width, self.mirror.height
                    );
                    self.source_extent = (width, height);
                }
                Ok(())
            }
            Disposition::Discard => {
                trace!("discarding event: {:?}", event);
                Ok(())
            }
            _ => apply(&mut self.ops, disposition, self.source),
        }
    }

    fn run(&mut self) -> Result<(), SessionError> {
        while !self.shutdown.load(Ordering::SeqCst) {
            while let Some(event) = self.display.conn.poll_for_event()? {
                self.handle(&event)?;
            }
            self.display.conn.flush()?;
            wait_readable(self.display.fd())?;
        }
        info!("shutting down");
        Ok(())
    }
}

/// Wait for the connection socket to become readable, or the timeout. A
/// signal wakeup counts as readable so the shutdown flag gets rechecked.
fn wait_readable(fd: RawFd) -> Result<(), SessionError> {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let rc = unsafe { libc::poll(&mut pollfd, 1, POLL_TIMEOUT_MS) };
    if rc < 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::Interrupted {
            return Ok(());
        }
        return Err(SessionError::Connection(ConnectionError::IoError(err)));
    }
    Ok(())
}

/// Mirror `source` at `scale` until the source goes away, the connection
/// drops, or `shutdown` is raised.
pub fn run(
    display: &DisplayServer,
    source: Window,
    scale: Scale,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let info = display.window_info(source)?;
    if !info.viewable {
        anyhow::bail!("source window {source:#010x} is not viewable; map it first");
    }

    let title = match display.window_name(source)? {
        Some(name) => format!("{name} [x{scale}]"),
        None => format!("{source:#x} [x{scale}]"),
    };
    let mirror = create_mirror(display, &info, scale, &title)?;

    // structure events tell us when the source is destroyed or resized
    display
        .conn
        .change_window_attributes(
            source,
            &ChangeWindowAttributesAux::new().event_mask(EventMask::STRUCTURE_NOTIFY),
        )?
        .check()
        .context("failed to watch the source window")?;

    let view = ScaledView::new(
        &display.conn,
        source,
        info.visual,
        mirror.id,
        display.screen().root_visual,
        scale,
        mirror.width,
        mirror.height,
    )?;
    view.copy_frame()?;

    info!(
        "mirroring {:#010x} {}x{} onto {:#010x} at x{}",
        source, info.width, info.height, mirror.id, scale
    );

    let mut session = Session {
        display,
        ops: LiveOps {
            conn: &display.conn,
            view,
            source,
        },
        mirror,
        source,
        scale,
        source_extent: (info.width, info.height),
        shutdown,
    };
    let outcome = session.run();

    // teardown requests queue up in the drop impls; push them out even on
    // the error path
    drop(session);
    let _ = display.conn.flush();
    Ok(outcome?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use x11rb::protocol::damage::{NotifyEvent as DamageNotifyEvent, ReportLevel};
    use x11rb::protocol::xproto::{
        ButtonPressEvent, ConfigureNotifyEvent, DestroyNotifyEvent, KeyButMask, MapNotifyEvent,
        Property, PropertyNotifyEvent, Rectangle, BUTTON_PRESS_EVENT, CONFIGURE_NOTIFY_EVENT,
        DESTROY_NOTIFY_EVENT, MAP_NOTIFY_EVENT, PROPERTY_NOTIFY_EVENT,
    };
    use x11rb::x11_utils::TryParse;

    const SOURCE: Window = 0x0040_0001;
    const MIRROR: Window = 0x0260_0002;
    const DAMAGE: damage::Damage = 0x0040_0007;

    #[derive(Debug, PartialEq)]
    enum Op {
        Copy,
        Clear,
        Deliver,
    }

    #[derive(Default)]
    struct Recorder {
        ops: Vec<Op>,
        payloads: Vec<[u8; 32]>,
    }

    impl SessionOps for Recorder {
        fn copy_frame(&mut self) -> Result<(), SessionError> {
            self.ops.push(Op::Copy);
            Ok(())
        }

        fn clear_damage(&mut self) -> Result<(), SessionError> {
            self.ops.push(Op::Clear);
            Ok(())
        }

        fn deliver(&mut self, payload: [u8; 32]) -> Result<(), SessionError> {
            self.ops.push(Op::Deliver);
            self.payloads.push(payload);
            Ok(())
        }
    }

    fn drive(rec: &mut Recorder, events: &[Event], scale: Scale) -> Result<(), SessionError> {
        for event in events {
            apply(rec, classify(event, SOURCE, MIRROR, DAMAGE, scale), SOURCE)?;
        }
        Ok(())
    }

    fn scale(factor: u16) -> Scale {
        Scale::new(factor).unwrap()
    }

    fn area(width: u16, height: u16) -> Rectangle {
        Rectangle {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    fn damage_notify(damage: damage::Damage) -> Event {
        Event::DamageNotify(DamageNotifyEvent {
            response_type: damage::NOTIFY_EVENT,
            level: ReportLevel::NON_EMPTY,
            sequence: 0,
            drawable: SOURCE,
            damage,
            timestamp: 0,
            area: area(10, 10),
            geometry: area(100, 50),
        })
    }

    fn button_press(event_x: i16, event_y: i16) -> Event {
        Event::ButtonPress(ButtonPressEvent {
            response_type: BUTTON_PRESS_EVENT,
            detail: 1,
            sequence: 0,
            time: 0,
            root: 0x123,
            event: MIRROR,
            child: x11rb::NONE,
            root_x: 400,
            root_y: 300,
            event_x,
            event_y,
            state: KeyButMask::default(),
            same_screen: true,
        })
    }

    #[test]
    fn test_each_damage_notification_repaints_then_acknowledges() {
        let mut rec = Recorder::default();
        let burst = [damage_notify(DAMAGE), damage_notify(DAMAGE), damage_notify(DAMAGE)];
        drive(&mut rec, &burst, scale(2)).unwrap();
        assert_eq!(
            rec.ops,
            vec![Op::Copy, Op::Clear, Op::Copy, Op::Clear, Op::Copy, Op::Clear]
        );
    }

    #[test]
    fn test_input_interleaved_with_damage_keeps_arrival_order() {
        let mut rec = Recorder::default();
        let events = [damage_notify(DAMAGE), button_press(10, 10), damage_notify(DAMAGE)];
        drive(&mut rec, &events, scale(2)).unwrap();
        assert_eq!(
            rec.ops,
            vec![Op::Copy, Op::Clear, Op::Deliver, Op::Copy, Op::Clear]
        );
    }

    #[test]
    fn test_delivered_payload_has_rescaled_coordinates() {
        let mut rec = Recorder::default();
        drive(&mut rec, &[button_press(150, 80)], scale(2)).unwrap();
        assert_eq!(rec.payloads.len(), 1);
        let (parsed, _) = ButtonPressEvent::try_parse(&rec.payloads[0]).unwrap();
        assert_eq!(parsed.event_x, 75);
        assert_eq!(parsed.event_y, 40);
        assert_eq!(parsed.event, MIRROR);
        assert_eq!(parsed.detail, 1);
    }

    #[test]
    fn test_unrelated_events_are_dropped() {
        let mut rec = Recorder::default();
        let events = [
            // damage object we never created
            damage_notify(0x99),
            Event::PropertyNotify(PropertyNotifyEvent {
                response_type: PROPERTY_NOTIFY_EVENT,
                sequence: 0,
                window: SOURCE,
                atom: 39,
                time: 0,
                state: Property::NEW_VALUE,
            }),
            Event::MapNotify(MapNotifyEvent {
                response_type: MAP_NOTIFY_EVENT,
                sequence: 0,
                event: SOURCE,
                window: SOURCE,
                override_redirect: false,
            }),
        ];
        drive(&mut rec, &events, scale(2)).unwrap();
        assert!(rec.ops.is_empty());
        assert!(rec.payloads.is_empty());
    }

    #[test]
    fn test_source_destruction_stops_processing() {
        let mut rec = Recorder::default();
        let events = [
            Event::DestroyNotify(DestroyNotifyEvent {
                response_type: DESTROY_NOTIFY_EVENT,
                sequence: 0,
                event: SOURCE,
                window: SOURCE,
            }),
            damage_notify(DAMAGE),
        ];
        let err = drive(&mut rec, &events, scale(2)).unwrap_err();
        assert!(matches!(err, SessionError::SourceLost(SOURCE)));
        assert!(rec.ops.is_empty());
    }

    fn configure(event: Window, window: Window) -> Event {
        Event::ConfigureNotify(ConfigureNotifyEvent {
            response_type: CONFIGURE_NOTIFY_EVENT,
            sequence: 0,
            event,
            window,
            above_sibling: x11rb::NONE,
            x: 5,
            y: 5,
            width: 640,
            height: 480,
            border_width: 0,
            override_redirect: false,
        })
    }

    #[test]
    fn test_configure_events_split_by_window() {
        let on_source = configure(SOURCE, SOURCE);
        assert_eq!(
            classify(&on_source, SOURCE, MIRROR, DAMAGE, scale(2)),
            Disposition::SourceResized {
                width: 640,
                height: 480
            }
        );

        // the mirror's own configure events are input to forward, not a resize
        let on_mirror = configure(MIRROR, MIRROR);
        assert!(matches!(
            classify(&on_mirror, SOURCE, MIRROR, DAMAGE, scale(2)),
            Disposition::Relay(_)
        ));
    }
}
