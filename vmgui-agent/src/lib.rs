//! High-level, agent-side bindings to the cross-domain GUI protocol.
//!
//! This provides a high-level API intended for direct consumption by a
//! guest display-server integration.  It builds on several lower-level
//! crates:
//!
//! - `vmgui-proto` provides the protocol definition.
//! - `vmgui-proto-agent` decodes host-originated messages.
//! - `vmgui-client` handles the framed, reconnect-capable transport.
//! - `vmgui-shmem` manages shared-memory frame export.
//!
//! In turn, this crate provides:
//!
//! - An [`Agent`] that owns the connection to the host and creates windows.
//! - [`Window`] handles that manage their own lifecycle: creating one sends
//!   `CREATE` (and an initial `CONFIGURE`), and destroying one recursively
//!   destroys its descendants, since the wire protocol has no notion of a
//!   window's children.
//! - A [`Buffer`] abstraction for double-buffered frame export, so that a
//!   `WINDOW_DUMP` is only announced once a frame is complete.
//! - A [`KeyTracker`] that implements the keymap-reconciliation rule of the
//!   agent event loop: on `KEYMAP_NOTIFY`, synthesize releases for keys the
//!   host believes are down but the guest also still believes are down,
//!   without a second source telling the guest they were ever released.

#![forbid(missing_docs)]

mod buffer;
mod error;
mod window;

pub use buffer::Buffer;
pub use error::{Error, RecoverableError};

use std::cell::RefCell;
use std::num::NonZeroU32;
use std::rc::Rc;

use tracing::{debug, warn};
use window::WindowTree;

struct Shared {
    client: vmgui_client::Client,
    exporter: vmgui_shmem::FrameExporter,
    tree: WindowTree,
}

/// The guest-side connection to the host's GUI daemon.
pub struct Agent {
    shared: Rc<RefCell<Shared>>,
    xconf: vmgui_proto::XConf,
}

impl Agent {
    /// Connects to the host, negotiating the protocol version, and checks
    /// that the root window's pixel depth is one this agent can export
    /// frames for.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionFatal`] if the connection could not be
    /// established, or [`Error::ProcessFatal`] if the host's root window
    /// depth is not [`vmgui_proto::FRAME_BPP`] (REDESIGN FLAG R3: this is a
    /// startup-time fatal error, never a degraded-rendering fallback).
    pub fn connect(domain: u16, peer: u16) -> Result<Self, Error> {
        let (client, xconf) = vmgui_client::Client::agent(domain).map_err(Error::SessionFatal)?;
        if xconf.depth() != vmgui_proto::FRAME_BPP {
            return Err(Error::ProcessFatal(format!(
                "host root window depth is {} bpp, but this agent only supports {} bpp",
                xconf.depth(),
                vmgui_proto::FRAME_BPP
            )));
        }
        let exporter = vmgui_shmem::new(peer).map_err(Error::SessionFatal)?;
        debug!(depth = xconf.depth(), "connected to host daemon");
        Ok(Self {
            shared: Rc::new(RefCell::new(Shared {
                client,
                exporter,
                tree: WindowTree::default(),
            })),
            xconf,
        })
    }

    /// Returns the root window configuration the host sent at connection
    /// time.
    pub fn root_config(&self) -> vmgui_proto::XConf {
        self.xconf
    }

    /// Returns whether the underlying connection needs [`Agent::reconnect`]
    /// before further I/O can succeed.
    pub fn needs_reconnect(&self) -> bool {
        self.shared.borrow().client.needs_reconnect()
    }

    /// Re-establishes the connection to the host after a fatal I/O error.
    /// All windows are considered gone; callers must recreate them.
    pub fn reconnect(&mut self) -> Result<(), Error> {
        self.shared
            .borrow_mut()
            .client
            .reconnect()
            .map_err(Error::SessionFatal)
    }

    /// Reads the next fully-buffered host-originated event, if any.
    ///
    /// Returns `Ok(None)` both when no message is fully buffered yet and
    /// when the message that was read should not be acted on (an event for
    /// a window this agent has already destroyed, or a message with
    /// malformed clipboard data) — both are logged and treated the same as
    /// "nothing to do right now", per the recoverable-error tier.
    pub fn poll_event(&self) -> Result<Option<(NonZeroU32, AgentEvent)>, Error> {
        use std::task::Poll;
        let mut shared = self.shared.borrow_mut();
        let msg = match shared.client.read_message() {
            Poll::Pending => return Ok(None),
            Poll::Ready(Err(e)) => return Err(Error::SessionFatal(e)),
            Poll::Ready(Ok(msg)) => msg,
        };
        let header = msg.header();
        let parsed = match vmgui_proto_agent::Event::parse(header, msg.body()) {
            Ok(v) => v,
            Err(vmgui_proto_agent::Error::BadUtf8(e)) => {
                warn!(window = header.window, error = %e, "dropped clipboard message with invalid UTF-8");
                return Ok(None);
            }
        };
        let (window, event) = match parsed {
            None => return Ok(None),
            Some(v) => v,
        };
        let window = match NonZeroU32::new(window) {
            Some(w) => w,
            None => return Ok(None),
        };
        if !shared.tree.contains(window) {
            warn!(window = window.get(), "event for an unknown window, ignoring");
            return Ok(None);
        }
        let owned = match event {
            vmgui_proto_agent::Event::Keypress(m) => AgentEvent::Keypress(m),
            vmgui_proto_agent::Event::Button(m) => AgentEvent::Button(m),
            vmgui_proto_agent::Event::Motion(m) => AgentEvent::Motion(m),
            vmgui_proto_agent::Event::Crossing(m) => AgentEvent::Crossing(m),
            vmgui_proto_agent::Event::Focus(m) => AgentEvent::Focus(m),
            vmgui_proto_agent::Event::Map(m) => AgentEvent::Map(m),
            vmgui_proto_agent::Event::Configure(m) => AgentEvent::Configure(m),
            vmgui_proto_agent::Event::Close => AgentEvent::Close,
            vmgui_proto_agent::Event::ClipboardReq => AgentEvent::ClipboardReq,
            vmgui_proto_agent::Event::ClipboardData { untrusted_data } => {
                AgentEvent::ClipboardData(untrusted_data.to_owned())
            }
            vmgui_proto_agent::Event::Keymap(m) => AgentEvent::Keymap(m),
            vmgui_proto_agent::Event::WindowFlags(m) => AgentEvent::WindowFlags(m),
        };
        Ok(Some((window, owned)))
    }

    /// Creates a new top-level window.
    pub fn create_window(
        &self,
        rectangle: vmgui_proto::Rectangle,
        override_redirect: bool,
    ) -> Result<Window, Error> {
        self.create_window_inner(rectangle, None, override_redirect)
    }

    /// Creates a window that is transient for (and destroyed together with)
    /// `parent`.
    pub fn create_child_window(
        &self,
        rectangle: vmgui_proto::Rectangle,
        parent: &Window,
        override_redirect: bool,
    ) -> Result<Window, Error> {
        self.create_window_inner(rectangle, Some(parent.id), override_redirect)
    }

    fn create_window_inner(
        &self,
        rectangle: vmgui_proto::Rectangle,
        parent: Option<NonZeroU32>,
        override_redirect: bool,
    ) -> Result<Window, Error> {
        let mut shared = self.shared.borrow_mut();
        let id = shared.tree.allocate(parent);
        let create = vmgui_proto::Create {
            rectangle,
            parent,
            override_redirect: override_redirect as u32,
        };
        shared
            .client
            .send(&create, id)
            .map_err(Error::SessionFatal)?;
        let configure = vmgui_proto::Configure {
            rectangle,
            override_redirect: override_redirect as u32,
        };
        shared
            .client
            .send(&configure, id)
            .map_err(Error::SessionFatal)?;
        drop(shared);
        Ok(Window {
            id,
            shared: self.shared.clone(),
        })
    }
}

/// A live window.
///
/// Dropping a [`Window`] destroys it and, recursively, every window created
/// as one of its children via [`Agent::create_child_window`].
pub struct Window {
    id: NonZeroU32,
    shared: Rc<RefCell<Shared>>,
}

impl Window {
    /// This window's protocol id.
    pub fn id(&self) -> NonZeroU32 {
        self.id
    }

    /// Maps the window.
    pub fn map(&self, info: vmgui_proto::MapInfo) -> Result<(), Error> {
        self.shared
            .borrow_mut()
            .client
            .send(&info, self.id)
            .map_err(Error::SessionFatal)
    }

    /// Unmaps the window.
    pub fn unmap(&self) -> Result<(), Error> {
        self.shared
            .borrow_mut()
            .client
            .send(&vmgui_proto::Unmap {}, self.id)
            .map_err(Error::SessionFatal)
    }

    /// Moves and/or resizes the window.
    pub fn configure(&self, rectangle: vmgui_proto::Rectangle, override_redirect: bool) -> Result<(), Error> {
        let msg = vmgui_proto::Configure {
            rectangle,
            override_redirect: override_redirect as u32,
        };
        self.shared
            .borrow_mut()
            .client
            .send(&msg, self.id)
            .map_err(Error::SessionFatal)
    }

    /// Sets the window's title (`WM_NAME`).  The caller is responsible for
    /// the same sanitization the host re-applies on receipt; this does not
    /// re-implement that check.
    pub fn set_title(&self, title: &str) -> Result<(), Error> {
        let mut data = [0u8; 128];
        let bytes = title.as_bytes();
        let n = bytes.len().min(data.len() - 1);
        data[..n].copy_from_slice(&bytes[..n]);
        self.shared
            .borrow_mut()
            .client
            .send(&vmgui_proto::WmName { data }, self.id)
            .map_err(Error::SessionFatal)
    }

    /// Sets the window class (`WM_CLASS`).
    pub fn set_class(&self, res_class: &str, res_name: &str) -> Result<(), Error> {
        let mut msg = vmgui_proto::WmClass::default();
        let cn = res_class.as_bytes().len().min(msg.res_class.len() - 1);
        msg.res_class[..cn].copy_from_slice(&res_class.as_bytes()[..cn]);
        let nn = res_name.as_bytes().len().min(msg.res_name.len() - 1);
        msg.res_name[..nn].copy_from_slice(&res_name.as_bytes()[..nn]);
        self.shared
            .borrow_mut()
            .client
            .send(&msg, self.id)
            .map_err(Error::SessionFatal)
    }

    /// Docks this window into the host's tray.
    pub fn dock(&self) -> Result<(), Error> {
        self.shared
            .borrow_mut()
            .client
            .send(&vmgui_proto::Dock {}, self.id)
            .map_err(Error::SessionFatal)
    }

    /// Sets the cursor glyph.
    pub fn set_cursor(&self, cursor: u32) -> Result<(), Error> {
        self.shared
            .borrow_mut()
            .client
            .send(&vmgui_proto::Cursor { cursor }, self.id)
            .map_err(Error::SessionFatal)
    }

    /// Allocates a double-buffered frame for this window and sends the
    /// front buffer's `WINDOW_DUMP`.
    pub fn alloc_buffer(&self, width: u32, height: u32) -> Result<Buffer, Error> {
        let mut shared = self.shared.borrow_mut();
        let buf = Buffer::new(&mut shared.exporter, width, height).map_err(Error::SessionFatal)?;
        shared
            .client
            .send_raw(buf.front().msg(), self.id, vmgui_proto::MSG_WINDOW_DUMP)
            .map_err(Error::SessionFatal)?;
        Ok(buf)
    }

    /// Notifies the host that the given rectangle of the window's current
    /// frame buffer has changed.
    pub fn damage(&self, rectangle: vmgui_proto::Rectangle) -> Result<(), Error> {
        let msg = vmgui_proto::ShmImage { rectangle };
        self.shared
            .borrow_mut()
            .client
            .send(&msg, self.id)
            .map_err(Error::SessionFatal)
    }
}

/// A host-originated event, decoded and with its clipboard payload (if any)
/// copied into an owned `String` so it outlives the read that produced it.
#[non_exhaustive]
#[derive(Debug)]
pub enum AgentEvent {
    /// A key has been pressed or released.
    Keypress(vmgui_proto::Keypress),
    /// A button has been pressed or released.
    Button(vmgui_proto::Button),
    /// The pointer has moved.
    Motion(vmgui_proto::Motion),
    /// The pointer has entered or left the window.
    Crossing(vmgui_proto::Crossing),
    /// The window has gained or lost focus.
    Focus(vmgui_proto::Focus),
    /// The window should be mapped, with the given transient/override info.
    Map(vmgui_proto::MapInfo),
    /// The window has been moved and/or resized.
    Configure(vmgui_proto::Configure),
    /// The host is requesting that the window be closed.
    Close,
    /// The host is requesting the current clipboard contents.
    ClipboardReq,
    /// Clipboard contents sent by the host.  UNTRUSTED.
    ClipboardData(String),
    /// The host keymap has changed.
    Keymap(vmgui_proto::KeymapNotify),
    /// Window manager flags have been set or cleared.
    WindowFlags(vmgui_proto::WindowFlags),
}

impl Drop for Window {
    fn drop(&mut self) {
        let mut shared = self.shared.borrow_mut();
        let order = shared.tree.remove_subtree(self.id);
        for window in order {
            if let Err(e) = shared.client.send(&vmgui_proto::Destroy {}, window) {
                warn!(window = window.get(), error = %e, "failed to send DESTROY while tearing down a window");
            }
        }
    }
}

/// Tracks which keys this guest believes are currently pressed, to implement
/// the keymap-reconciliation rule: on `KEYMAP_NOTIFY`, any key the host
/// reports as up that the guest still believes is down must have its
/// release synthesized locally, since the guest may otherwise never learn
/// that the key came up (for example, if the release happened while a
/// different window had focus).
#[derive(Debug, Default)]
pub struct KeyTracker {
    /// Bitmap of currently-pressed keycodes, one bit per code, 2048 codes.
    pressed: [u8; 256],
}

impl KeyTracker {
    fn bit(keycode: u32) -> Option<(usize, u8)> {
        let keycode = keycode as usize;
        if keycode >= 256 * 8 {
            return None;
        }
        Some((keycode / 8, 1 << (keycode % 8)))
    }

    /// Records that `keycode` is now pressed or released.
    pub fn set(&mut self, keycode: u32, pressed: bool) {
        if let Some((byte, mask)) = Self::bit(keycode) {
            if pressed {
                self.pressed[byte] |= mask;
            } else {
                self.pressed[byte] &= !mask;
            }
        }
    }

    /// Given the host's reported keymap (32 bytes, 256 keycodes), returns
    /// the keycodes this tracker believes are still down but the host does
    /// not — the set of releases that must be synthesized.
    pub fn reconcile(&mut self, host_keymap: &[u8; 32]) -> Vec<u32> {
        let mut releases = Vec::new();
        for byte in 0..32 {
            let stuck = self.pressed[byte] & !host_keymap[byte];
            for bit in 0..8 {
                if stuck & (1 << bit) != 0 {
                    let keycode = (byte * 8 + bit) as u32;
                    releases.push(keycode);
                    self.set(keycode, false);
                }
            }
        }
        releases
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconcile_synthesizes_missing_releases() {
        let mut tracker = KeyTracker::default();
        tracker.set(5, true);
        tracker.set(12, true);
        let mut host_keymap = [0u8; 32];
        host_keymap[1] |= 1 << 4; // keycode 12 still down per host
        let releases = tracker.reconcile(&host_keymap);
        assert_eq!(releases, vec![5]);
        assert_eq!(tracker.reconcile(&host_keymap), Vec::<u32>::new());
    }

    #[test]
    fn out_of_range_keycodes_are_ignored() {
        let mut tracker = KeyTracker::default();
        tracker.set(u32::MAX, true);
        assert_eq!(tracker.pressed, [0u8; 256]);
    }

    proptest::proptest! {
        /// After reconciling against any host keymap, no keycode the
        /// tracker still believes is pressed can be one the host reports
        /// as up — every such stuck key must have been reconciled away.
        #[test]
        fn reconcile_leaves_no_keys_the_host_reports_up(
            pressed_keycodes in proptest::collection::vec(0u32..2048, 0..20),
            host_keymap in proptest::array::uniform32(proptest::num::u8::ANY),
        ) {
            let mut tracker = KeyTracker::default();
            for &k in &pressed_keycodes {
                tracker.set(k, true);
            }
            tracker.reconcile(&host_keymap);
            for byte in 0..32 {
                proptest::prop_assert_eq!(tracker.pressed[byte] & !host_keymap[byte], 0);
            }
        }
    }
}
