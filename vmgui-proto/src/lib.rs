//! # Wire format of the cross-domain GUI virtualization protocol
//!
//! ## Transport and terminology
//!
//! This protocol is spoken over a byte-oriented ring transport between an
//! unprivileged guest virtual machine and a trusted host.  The guest side is
//! the *agent*: it observes its own display server and forwards
//! window-lifecycle, damage, and selection events.  The host side is the
//! *daemon*: it mirrors those windows on the host display and re-injects
//! input, focus, and clipboard events back into the guest.
//!
//! ## Message format
//!
//! Each message is a plain-old-data struct that is cast to a byte slice and
//! sent directly over the transport, without any marshalling step.  This is
//! safe because no message defined here has any padding bytes, and every
//! possible bit pattern is valid for every field.  All messages are in
//! native byte order, which is assumed identical on both sides of the
//! transport.
//!
//! This is natural to implement in C but requires care in Rust, since
//! casting a struct reference to a byte slice is `unsafe`.  This crate uses
//! `vmgui-wire`'s `castable!` macro to define structs that can be safely
//! cast to and from a byte slice; if a struct could not be safely cast (for
//! example, because the compiler would insert padding), the macro produces a
//! compile-time error instead.
//!
//! Both the agent and the daemon MUST send each message atomically.  The
//! daemon MAY use blocking I/O over the transport; the agent MUST NOT block
//! on the daemon, to avoid deadlocks, and so buffers outgoing messages and
//! flushes them at every opportunity (see `vmgui-client`).
//!
//! ## Window IDs
//!
//! Every surface is identified by a 32-bit unsigned window ID chosen by the
//! agent.  Zero is reserved and means "no window" (for example, using zero
//! as a window's parent means the window has no parent).  It is a protocol
//! error for the agent to send a message referencing a window that does not
//! exist, including one it has already destroyed; because of unavoidable
//! races, either side may receive events for a window that the other side
//! has already torn down, and such messages MUST be ignored rather than
//! treated as fatal.
//!
//! ## Unrecognized messages
//!
//! The daemon MUST treat a message with an unknown type as a protocol error
//! and terminate the session.  The agent MAY log the header of such a
//! message but MUST otherwise ignore it; the daemon never sends a message
//! type the agent doesn't understand without the agent being able to skip
//! it safely, using `untrusted_len`.
//!
//! ## Trust model
//!
//! Both sides treat the other as untrusted and validate everything they
//! receive before acting on it. This is a deliberate divergence from designs
//! where only one side validates: it is required for memory safety here, and
//! it also makes mistakes in either implementation easier to catch.

#![forbid(missing_docs)]
#![no_std]
use core::convert::TryFrom;
use core::num::NonZeroU32;
use core::result::Result;

/// Maximum window width, in pixels.
pub const MAX_WINDOW_WIDTH: u32 = 8192;

/// Maximum window height, in pixels.
pub const MAX_WINDOW_HEIGHT: u32 = 3072;

/// Maximum size of a clipboard message, in bytes.
pub const MAX_CLIPBOARD_SIZE: u32 = 65_000;

/// Default cursor ID.
pub const CURSOR_DEFAULT: u32 = 0;

/// Flag that must be set to request an X11-style cursor glyph.
pub const CURSOR_X11: u32 = 0x100;

/// Highest X11-style cursor glyph index that can be requested.
pub const CURSOR_X11_MAX: u32 = 0x19a;

/// Bits-per-pixel supported by the frame exporter/importer; see
/// REDESIGN FLAG R3 (unsupported depths are a fatal agent-side
/// configuration error, never a silent fallback).
pub const FRAME_BPP: u32 = 24;

/// Number of bytes in a shared page.
pub const PAGE_SIZE: u32 = 1 << 12;

/// Maximum size of a shared memory frame, in bytes: the largest window,
/// at 4 bytes per pixel (the over-the-wire pixel stride used for shared
/// frames, independent of `FRAME_BPP`).
pub const MAX_FRAME_BYTES: u32 = MAX_WINDOW_WIDTH * MAX_WINDOW_HEIGHT * 4;

/// Maximum number of page references in a single `MFNDUMP` message.
pub const MAX_MFN_COUNT: u32 = (MAX_FRAME_BYTES + PAGE_SIZE - 1) / PAGE_SIZE;

/// Maximum number of grant references in a single `WINDOW_DUMP` message.
pub const MAX_GRANT_REFS_COUNT: u32 = (MAX_FRAME_BYTES + PAGE_SIZE - 1) / PAGE_SIZE;

/// Default listening port of the ring transport.
pub const LISTENING_PORT: i16 = 6000;

/// Sub-type of `WINDOW_DUMP` messages carrying grant references (as opposed
/// to raw page references).
pub const WINDOW_DUMP_TYPE_GRANT_REFS: u32 = 0;

/// Protocol major version implemented by this crate.
pub const PROTOCOL_MAJOR: u32 = 1;

/// Protocol minor version implemented by this crate.
pub const PROTOCOL_MINOR: u32 = 0;

/// Encodes a protocol version as sent by the agent at connection time.
pub const fn encode_version(major: u32, minor: u32) -> u32 {
    (major << 16) | minor
}

/// Decodes a protocol version into `(major, minor)`.
pub const fn decode_version(version: u32) -> (u32, u32) {
    (version >> 16, version & 0xFFFF)
}

/// Returns whether a guest-advertised version is acceptable to a host
/// implementing `(host_major, host_minor)`: the major version must match
/// exactly and the guest's minor version must not exceed the host's.
pub fn version_compatible(guest_version: u32, host_major: u32, host_minor: u32) -> bool {
    let (major, minor) = decode_version(guest_version);
    major == host_major && minor <= host_minor
}

// This allows pattern-matching against constant values without a huge amount
// of boilerplate code: `enum_const!` generates both a C-like enum and a set
// of free constants sharing the enum's discriminant values, plus a
// `TryFrom<u32>` impl.
macro_rules! enum_const {
    (
        #[repr($t: ty)]
        $(#[$i: meta])*
        $p: vis enum $n: ident {
            $(
                $(#[$j: meta])*
                ($const_name: ident, $variant_name: ident) $(= $e: expr)?
            ),*$(,)?
        }
    ) => {
        $(#[$i])*
        #[repr($t)]
        $p enum $n {
            $(
                $(#[$j])*
                $variant_name $(= $e)?,
            )*
        }

        $(
            $(#[$j])*
            $p const $const_name: $t = $n::$variant_name as $t;
        )*

        impl $crate::TryFrom::<$t> for $n {
            type Error = $t;
            #[allow(non_upper_case_globals)]
            #[inline]
            fn try_from(value: $t) -> $crate::Result<Self, $t> {
                match value {
                    $(
                        $const_name => return $crate::Result::Ok($n::$variant_name),
                    )*
                    other => $crate::Result::Err(other),
                }
            }
        }
    }
}

enum_const! {
    #[repr(u32)]
    /// Message types.  The legacy host→agent "run this command" message has
    /// been removed entirely from this enum (REDESIGN FLAG R1): its wire
    /// value is simply unassigned, so the codec treats it like any other
    /// unrecognized type.
    pub enum Msg {
        /// Daemon ⇒ agent: a key has been pressed or released.
        (MSG_KEYPRESS, Keypress) = 124,
        /// Daemon ⇒ agent: a button has been pressed or released.
        (MSG_BUTTON, Button),
        /// Daemon ⇒ agent: the pointer has moved.
        (MSG_MOTION, Motion),
        /// Daemon ⇒ agent: the pointer has crossed the edge of a window.
        (MSG_CROSSING, Crossing),
        /// Daemon ⇒ agent: a window has just gained or lost focus.
        (MSG_FOCUS, Focus),
        /// Agent ⇒ daemon: create a window.
        (MSG_CREATE, Create) = 130,
        /// Agent ⇒ daemon: destroy a window.
        (MSG_DESTROY, Destroy),
        /// Bidirectional: map a window.
        (MSG_MAP, Map),
        /// Agent ⇒ daemon: unmap a window.
        (MSG_UNMAP, Unmap),
        /// Bidirectional: configure (move/resize) a window.
        (MSG_CONFIGURE, Configure),
        /// Agent ⇒ daemon: dump raw page references backing a window's frame.
        (MSG_MFNDUMP, MfnDump),
        /// Agent ⇒ daemon: redraw a given area of the screen from shared memory.
        (MSG_SHMIMAGE, ShmImage),
        /// Daemon ⇒ agent: request that a window be closed.
        (MSG_CLOSE, Close),
        /// Daemon ⇒ agent: request clipboard data.
        (MSG_CLIPBOARD_REQ, ClipboardReq),
        /// Bidirectional: clipboard data.
        (MSG_CLIPBOARD_DATA, ClipboardData),
        /// Agent ⇒ daemon: set the title (`WM_NAME`) of a window.
        (MSG_WMNAME, WmName),
        /// Daemon ⇒ agent: the keymap has changed.
        (MSG_KEYMAP_NOTIFY, KeymapNotify),
        /// Agent ⇒ daemon: dock a window into the host tray.
        (MSG_DOCK, Dock),
        /// Agent ⇒ daemon: set window manager hints.
        (MSG_WINDOW_HINTS, WindowHints),
        /// Bidirectional: set window manager flags.
        (MSG_WINDOW_FLAGS, WindowFlags),
        /// Agent ⇒ daemon: set the window class (`WM_CLASS`).
        (MSG_WMCLASS, WmClass),
        /// Agent ⇒ daemon: send a shared-memory frame descriptor.
        (MSG_WINDOW_DUMP, WindowDump),
        /// Agent ⇒ daemon: set the cursor glyph.
        (MSG_CURSOR, Cursor),
    }
}

enum_const! {
    #[repr(u32)]
    /// State of a button event.
    pub enum ButtonEvent {
        /// A button has been pressed.
        (EV_BUTTON_PRESS, Press) = 4,
        /// A button has been released.
        (EV_BUTTON_RELEASE, Release) = 5,
    }
}

enum_const! {
    #[repr(u32)]
    /// State of a key event.
    pub enum KeyEvent {
        /// The key was pressed.
        (EV_KEY_PRESS, Press) = 2,
        /// The key was released.
        (EV_KEY_RELEASE, Release) = 3,
    }
}

enum_const! {
    #[repr(u32)]
    /// Direction of a focus-change event.
    pub enum FocusEvent {
        /// The window now has focus.
        (EV_FOCUS_IN, In) = 9,
        /// The window has lost focus.
        (EV_FOCUS_OUT, Out) = 10,
    }
}

/// Flags for [`WindowHints`].  These are a bitmask.
#[repr(u32)]
pub enum WindowHintsFlags {
    /// User-specified position is valid.
    USPosition = 1 << 0,
    /// Program-specified position is valid.
    PPosition = 1 << 2,
    /// Minimum size is valid.
    PMinSize = 1 << 4,
    /// Maximum size is valid.
    PMaxSize = 1 << 5,
    /// Resize increment is valid.
    PResizeInc = 1 << 6,
    /// Base size is valid.
    PBaseSize = 1 << 8,
}

/// Flags for [`WindowFlags`].  These are a bitmask; see §4.5's rule that
/// `set` and `unset` must be disjoint.
#[repr(u32)]
pub enum WindowFlag {
    /// Fullscreen has been requested.  The daemon may honor this as a real
    /// fullscreen, or rewrite it to a maximize pseudo-ack; see §4.7.
    Fullscreen = 1 << 0,
    /// The window demands the user's attention.
    DemandsAttention = 1 << 1,
    /// The window should be minimized.
    Minimize = 1 << 2,
}

/// Trait for wire-format message bodies, giving each its [`Msg`] discriminant.
pub trait Message: vmgui_wire::Castable + core::default::Default {
    /// The kind of the message.
    const KIND: Msg;
}

vmgui_wire::castable! {
    /// A message header as it appears on the wire.  All fields are in
    /// native byte order.
    pub struct Header {
        /// Type of the message; must be a value in [`Msg`].
        pub ty: u32,
        /// Window to which the message is directed.
        ///
        /// For all messages *except* CREATE, the window MUST already exist.
        /// For CREATE, the window MUST NOT already exist.
        pub window: u32,
        /// UNTRUSTED length value.  The agent MAY use this to skip an
        /// unrecognized message.  The daemon MUST NOT use this to compute the
        /// message length without first sanitizing it against
        /// [`msg_length_limits`].
        pub untrusted_len: u32,
    }

    /// X and Y coordinates relative to the top-left of the screen.
    pub struct Coordinates {
        /// X coordinate, in pixels.
        x: u32,
        /// Y coordinate, in pixels.
        y: u32,
    }

    /// A window size.
    pub struct WindowSize {
        /// Width, in pixels.
        width: u32,
        /// Height, in pixels.
        height: u32,
    }

    /// An (x, y, width, height) tuple.
    pub struct Rectangle {
        /// Coordinates of the top-left corner of the rectangle.
        top_left: Coordinates,
        /// Size of the rectangle.
        size: WindowSize,
    }

    /// Daemon ⇒ agent: root window configuration, sent once at connection
    /// time without a [`Header`].
    pub struct XConf {
        /// Root window size.
        size: WindowSize,
        /// Pixel depth of the root window.
        depth: u32,
        /// Memory, in KiB, required to back the root window.
        mem: u32,
    }

    /// Bidirectional: metadata about a mapping.
    pub struct MapInfo {
        /// The window this one is `transient_for`, or 0 if none.
        transient_for: u32,
        /// 1 if this window should bypass the window manager (popups,
        /// fullscreen); 0 if it should be managed normally.  Other values
        /// are a protocol violation.
        override_redirect: u32,
    }

    /// Agent ⇒ daemon: create a window.  MUST be followed by a
    /// [`Configure`].  The window is not implicitly mapped.
    pub struct Create {
        /// Rectangle the window is to occupy.  It is a protocol error for
        /// the width or height to be zero or to exceed
        /// [`MAX_WINDOW_WIDTH`]/[`MAX_WINDOW_HEIGHT`].
        rectangle: Rectangle,
        /// Parent window, or [`None`] for no parent.  A parent that does
        /// not name a known window is treated as "no parent", not as an
        /// error — see the registry's CREATE handling.
        parent: Option<NonZeroU32>,
        /// 1 if override-redirect; 0 otherwise.
        override_redirect: u32,
    }

    /// Daemon ⇒ agent: a key has been pressed or released.
    pub struct Keypress {
        /// MUST be [`EV_KEY_PRESS`] or [`EV_KEY_RELEASE`].
        ty: u32,
        /// Coordinates of the key event.
        coordinates: Coordinates,
        /// Modifier state bitmask.
        state: u32,
        /// Key code.
        keycode: u32,
    }

    /// Daemon ⇒ agent: a button has been pressed or released.
    pub struct Button {
        /// MUST be [`EV_BUTTON_PRESS`] or [`EV_BUTTON_RELEASE`].
        ty: u32,
        /// Coordinates of the button event.
        coordinates: Coordinates,
        /// Modifier state bitmask.
        state: u32,
        /// Button number.
        button: u32,
    }

    /// Daemon ⇒ agent: the pointer has moved.
    pub struct Motion {
        /// Coordinates of the motion event.
        coordinates: Coordinates,
        /// Bitmask of buttons currently pressed.
        state: u32,
        /// Whether this is a hint event (coalesced motion).
        is_hint: u32,
    }

    /// Daemon ⇒ agent: the pointer crossed a window boundary.
    pub struct Crossing {
        /// Type of the crossing (enter/leave).
        ty: u32,
        /// Coordinates of the crossing.
        coordinates: Coordinates,
        /// Modifier state bitmask.
        state: u32,
        /// Crossing mode.
        mode: u32,
        /// Crossing detail.
        detail: u32,
        /// Whether the window has focus.
        focus: u32,
    }

    /// Bidirectional: move and/or resize a window.
    pub struct Configure {
        /// Desired rectangle.
        rectangle: Rectangle,
        /// 1 if override-redirect; 0 otherwise.
        override_redirect: u32,
    }

    /// Agent ⇒ daemon: repaint the given region of the window from shared
    /// memory (damage notification).
    pub struct ShmImage {
        /// Rectangle to repaint.
        rectangle: Rectangle,
    }

    /// Daemon ⇒ agent: a window has gained or lost focus.
    pub struct Focus {
        /// MUST be [`EV_FOCUS_IN`] or [`EV_FOCUS_OUT`].
        ty: u32,
        /// Reserved; daemons MUST set this to 0.
        mode: u32,
        /// Focus detail, 0 through 7.
        detail: u32,
    }

    /// Agent ⇒ daemon: set the window's name (`WM_NAME`).
    pub struct WmName {
        /// NUL-terminated name, already sanitized by the sender.  The
        /// daemon re-sanitizes on receipt regardless (§4.5).
        data: [u8; 128],
    }

    /// Agent ⇒ daemon: unmap the window.  A no-op if already unmapped.
    pub struct Unmap {}

    /// Agent ⇒ daemon: dock the window into the host's tray.  A no-op if
    /// already docked.
    pub struct Dock {}

    /// Agent ⇒ daemon: destroy the window.  The agent SHOULD NOT reuse the
    /// window ID for as long as possible, to make races less likely.
    pub struct Destroy {}

    /// Daemon ⇒ agent: keymap change notification.
    pub struct KeymapNotify {
        /// Bitmap of currently-pressed keys, as queried by the host.
        keys: [u8; 32],
    }

    /// Agent ⇒ daemon: set window manager size hints.
    pub struct WindowHints {
        /// Which of the following fields are valid; see [`WindowHintsFlags`].
        flags: u32,
        /// Minimum size.
        min_size: WindowSize,
        /// Maximum size.
        max_size: WindowSize,
        /// Resize increment.
        size_increment: WindowSize,
        /// Base size.
        size_base: WindowSize,
    }

    /// Bidirectional: set window manager flags.
    pub struct WindowFlags {
        /// Flags to set; see [`WindowFlag`].
        set: u32,
        /// Flags to unset.  Per §4.5, `set` and `unset` MUST be disjoint.
        unset: u32,
    }

    /// Agent ⇒ daemon: a fixed-size header preceding `num_mfn` page
    /// references (each a `u32`, appended out of band of this struct).
    pub struct MfnDumpHeader {
        /// Reserved; SHOULD be 0.
        shmid: u32,
        /// Width of the frame, in pixels.
        width: u32,
        /// Height of the frame, in pixels.
        height: u32,
        /// Bits per pixel; MUST equal [`FRAME_BPP`].
        bpp: u32,
        /// Byte offset into the first page; MUST be less than [`PAGE_SIZE`].
        off: u32,
        /// Number of page references that follow.
        num_mfn: u32,
        /// Reserved; SHOULD be 0.
        domid: u32,
    }

    /// Agent ⇒ daemon: set the window class (`WM_CLASS`).
    pub struct WmClass {
        /// Window class.
        res_class: [u8; 64],
        /// Instance name.
        res_name: [u8; 64],
    }

    /// Agent ⇒ daemon: fixed header of a shared-memory frame descriptor;
    /// the grant/page references themselves follow out of band.
    pub struct WindowDumpHeader {
        /// Sub-type: [`WINDOW_DUMP_TYPE_GRANT_REFS`] or another importer
        /// variant.
        ty: u32,
        /// Width, in pixels.
        width: u32,
        /// Height, in pixels.
        height: u32,
        /// Bits per pixel; MUST equal [`FRAME_BPP`].
        bpp: u32,
    }

    /// Agent ⇒ daemon: set the cursor glyph.
    pub struct Cursor {
        /// Cursor identifier; see §4.5's CURSOR sanitization rule.
        cursor: u32,
    }
}

impl WindowSize {
    /// Builds a size from its components.
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Width, in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height, in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }
}

impl Coordinates {
    /// Builds a coordinate pair.
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// X coordinate, in pixels.
    pub fn x(&self) -> u32 {
        self.x
    }

    /// Y coordinate, in pixels.
    pub fn y(&self) -> u32 {
        self.y
    }
}

impl Rectangle {
    /// Builds a rectangle from its corner and size.
    pub fn new(top_left: Coordinates, size: WindowSize) -> Self {
        Self { top_left, size }
    }

    /// Coordinates of the top-left corner.
    pub fn top_left(&self) -> Coordinates {
        self.top_left
    }

    /// Size of the rectangle.
    pub fn size(&self) -> WindowSize {
        self.size
    }
}

impl XConf {
    /// Builds a root window configuration.
    pub fn new(size: WindowSize, depth: u32, mem: u32) -> Self {
        Self { size, depth, mem }
    }

    /// Size of the root window.
    pub fn size(&self) -> WindowSize {
        self.size
    }

    /// Pixel depth of the root window.  REDESIGN FLAG R3: any value other
    /// than 24 (see [`FRAME_BPP`]) is a fatal agent configuration error.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Memory, in KiB, required to back the root window.
    pub fn mem(&self) -> u32 {
        self.mem
    }
}

macro_rules! impl_message {
    ($(($t: ty, $kind: expr),)+) => {
        $(impl Message for $t {
            const KIND: Msg = $kind;
        })+
    }
}

impl_message! {
    (MapInfo, Msg::Map),
    (Create, Msg::Create),
    (Keypress, Msg::Keypress),
    (Button, Msg::Button),
    (Motion, Msg::Motion),
    (Crossing, Msg::Crossing),
    (Configure, Msg::Configure),
    (ShmImage, Msg::ShmImage),
    (Focus, Msg::Focus),
    (WmName, Msg::WmName),
    (KeymapNotify, Msg::KeymapNotify),
    (WindowHints, Msg::WindowHints),
    (WindowFlags, Msg::WindowFlags),
    (WmClass, Msg::WmClass),
    (WindowDumpHeader, Msg::WindowDump),
    (Cursor, Msg::Cursor),
    (Destroy, Msg::Destroy),
    (Dock, Msg::Dock),
    (Unmap, Msg::Unmap),
}

/// Gets the length limits of a message of a given type, or `None` for an
/// unknown message (for which there are no limits, and which is therefore
/// always a protocol error on the daemon side).
pub fn msg_length_limits(ty: u32) -> Option<core::ops::RangeInclusive<usize>> {
    use core::mem::size_of;
    Some(match Msg::try_from(ty).ok()? {
        Msg::ClipboardData => 0..=MAX_CLIPBOARD_SIZE as _,
        Msg::Button => size_of::<Button>()..=size_of::<Button>(),
        Msg::Keypress => size_of::<Keypress>()..=size_of::<Keypress>(),
        Msg::Motion => size_of::<Motion>()..=size_of::<Motion>(),
        Msg::Crossing => size_of::<Crossing>()..=size_of::<Crossing>(),
        Msg::Focus => size_of::<Focus>()..=size_of::<Focus>(),
        Msg::Create => size_of::<Create>()..=size_of::<Create>(),
        Msg::Destroy => 0..=0,
        Msg::Map => size_of::<MapInfo>()..=size_of::<MapInfo>(),
        Msg::Unmap => 0..=0,
        Msg::Configure => size_of::<Configure>()..=size_of::<Configure>(),
        Msg::MfnDump => {
            size_of::<MfnDumpHeader>()..=size_of::<MfnDumpHeader>() + 4 * MAX_MFN_COUNT as usize
        }
        Msg::ShmImage => size_of::<ShmImage>()..=size_of::<ShmImage>(),
        Msg::Close => 0..=0,
        Msg::ClipboardReq => 0..=0,
        Msg::WmName => size_of::<WmName>()..=size_of::<WmName>(),
        Msg::KeymapNotify => size_of::<KeymapNotify>()..=size_of::<KeymapNotify>(),
        Msg::Dock => 0..=0,
        Msg::WindowHints => size_of::<WindowHints>()..=size_of::<WindowHints>(),
        Msg::WindowFlags => size_of::<WindowFlags>()..=size_of::<WindowFlags>(),
        Msg::WmClass => size_of::<WmClass>()..=size_of::<WmClass>(),
        Msg::WindowDump => {
            size_of::<WindowDumpHeader>()
                ..=size_of::<WindowDumpHeader>() + size_of::<u32>() * MAX_GRANT_REFS_COUNT as usize
        }
        Msg::Cursor => size_of::<Cursor>()..=size_of::<Cursor>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_handshake() {
        assert!(version_compatible(encode_version(1, 0), 1, 3));
        assert!(version_compatible(encode_version(1, 3), 1, 3));
        assert!(!version_compatible(encode_version(1, 4), 1, 3));
        assert!(!version_compatible(encode_version(2, 0), 1, 3));
    }

    #[test]
    fn execute_is_not_a_known_message() {
        // The legacy EXECUTE message must not round-trip through the enum
        // at all (REDESIGN FLAG R1): every value a prior protocol revision
        // might have used for it is simply unassigned here.
        assert!(msg_length_limits(0xFFFF_FFFF).is_none());
    }

    #[test]
    fn mfndump_bound_matches_max_mfn_count() {
        let limits = msg_length_limits(MSG_MFNDUMP).unwrap();
        let header_len = core::mem::size_of::<MfnDumpHeader>();
        assert_eq!(*limits.end(), header_len + 4 * MAX_MFN_COUNT as usize);
    }
}
