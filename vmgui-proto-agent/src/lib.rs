//! Agent-side decoder for daemon-to-agent GUI protocol messages.
//!
//! This crate performs no I/O: it turns a `(Header, body)` pair already read
//! off the ring transport into a typed [`Event`].  It does not validate
//! message bodies beyond what is needed to construct the event (for example,
//! clipboard data is checked for UTF-8 validity, since [`Event::ClipboardData`]
//! carries a `&str`); the daemon-side input sanitizer is a separate,
//! stricter, stateful component and is out of scope here.

#![no_std]
#![forbid(missing_docs)]

use core::convert::TryFrom;
use vmgui_proto::Msg;
use vmgui_wire::Castable;

/// Errors when parsing an agent-side message.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Error {
    /// Clipboard data was not valid UTF-8.
    BadUtf8(core::str::Utf8Error),
}

/// A decoded daemon ⇒ agent event, together with the window it targets.
///
/// Message types that only ever flow agent ⇒ daemon (`Create`, `Destroy`,
/// `Unmap`, `MfnDump`, `ShmImage`, `WmName`, `Dock`, `WindowHints`,
/// `WmClass`, `WindowDump`, `Cursor`) have no variant here: receiving one of
/// them is not a parse error, but [`parse`] returns `Ok(None)` for it, since
/// it is not a message the agent is meant to act on.
#[non_exhaustive]
pub enum Event<'a> {
    /// A key has been pressed or released.
    Keypress(vmgui_proto::Keypress),
    /// A button has been pressed or released.
    Button(vmgui_proto::Button),
    /// The pointer has moved.
    Motion(vmgui_proto::Motion),
    /// The pointer has entered or left a window.
    Crossing(vmgui_proto::Crossing),
    /// A window has gained or lost focus.
    Focus(vmgui_proto::Focus),
    /// The window should be mapped, with the given transient/override info.
    Map(vmgui_proto::MapInfo),
    /// The window has been moved and/or resized.
    Configure(vmgui_proto::Configure),
    /// The daemon is requesting that a window be closed.
    Close,
    /// The daemon is requesting the current clipboard contents.
    ClipboardReq,
    /// Clipboard contents sent by the daemon (for example, in response to a
    /// paste into a guest window).  UNTRUSTED, though guaranteed valid UTF-8.
    ClipboardData {
        /// UNTRUSTED clipboard data.
        untrusted_data: &'a str,
    },
    /// The host keymap has changed.
    Keymap(vmgui_proto::KeymapNotify),
    /// Window manager flags have been set or cleared.
    WindowFlags(vmgui_proto::WindowFlags),
}

impl<'a> Event<'a> {
    /// Parses a message already read off the transport.
    ///
    /// # Panics
    ///
    /// Panics if `body.len()` does not match `header.untrusted_len`; callers
    /// are expected to have read exactly that many bytes already.
    ///
    /// # Errors
    ///
    /// Fails if the body cannot be decoded as the message type named by the
    /// header (currently, only possible for clipboard data that is not valid
    /// UTF-8).
    ///
    /// # Return
    ///
    /// Returns `Ok(Some((window, event)))` on success, or `Ok(None)` if the
    /// header names a message type the agent never receives (either an
    /// agent ⇒ daemon message, or a type unknown to this crate).
    pub fn parse(
        header: vmgui_proto::Header,
        body: &'a [u8],
    ) -> Result<Option<(u32, Self)>, Error> {
        assert_eq!(
            header.untrusted_len as usize,
            body.len(),
            "body length does not match the length already read for this header"
        );
        let ty = match Msg::try_from(header.ty) {
            Ok(ty) => ty,
            Err(_) => return Ok(None),
        };
        let event = match ty {
            Msg::Keypress => Event::Keypress(Castable::from_bytes(body)),
            Msg::Button => Event::Button(Castable::from_bytes(body)),
            Msg::Motion => Event::Motion(Castable::from_bytes(body)),
            Msg::Crossing => Event::Crossing(Castable::from_bytes(body)),
            Msg::Focus => Event::Focus(Castable::from_bytes(body)),
            Msg::Map => Event::Map(Castable::from_bytes(body)),
            Msg::Configure => Event::Configure(Castable::from_bytes(body)),
            Msg::Close => Event::Close,
            Msg::ClipboardReq => Event::ClipboardReq,
            Msg::ClipboardData => {
                let untrusted_data = core::str::from_utf8(body).map_err(Error::BadUtf8)?;
                Event::ClipboardData { untrusted_data }
            }
            Msg::KeymapNotify => Event::Keymap(Castable::from_bytes(body)),
            Msg::WindowFlags => Event::WindowFlags(Castable::from_bytes(body)),
            // Agent ⇒ daemon only; the agent does not act on these if it
            // somehow receives one echoed back.
            Msg::Create
            | Msg::Destroy
            | Msg::Unmap
            | Msg::MfnDump
            | Msg::ShmImage
            | Msg::WmName
            | Msg::Dock
            | Msg::WindowHints
            | Msg::WmClass
            | Msg::WindowDump
            | Msg::Cursor => return Ok(None),
        };
        Ok(Some((header.window, event)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(ty: u32, window: u32, len: u32) -> vmgui_proto::Header {
        vmgui_proto::Header {
            ty,
            window,
            untrusted_len: len,
        }
    }

    #[test]
    fn close_has_no_body() {
        let h = header(vmgui_proto::MSG_CLOSE, 7, 0);
        let (window, event) = Event::parse(h, &[]).unwrap().unwrap();
        assert_eq!(window, 7);
        assert!(matches!(event, Event::Close));
    }

    #[test]
    fn clipboard_data_requires_utf8() {
        let h = header(vmgui_proto::MSG_CLIPBOARD_DATA, 1, 4);
        let bad = [0xff, 0xfe, 0xfd, 0xfc];
        assert_eq!(Event::parse(h, &bad), Err(Error::BadUtf8(core::str::from_utf8(&bad).unwrap_err())));

        let good = *b"hi!!";
        let (_, event) = Event::parse(h, &good).unwrap().unwrap();
        match event {
            Event::ClipboardData { untrusted_data } => assert_eq!(untrusted_data, "hi!!"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn agent_only_messages_are_ignored() {
        let h = header(vmgui_proto::MSG_CREATE, 1, core::mem::size_of::<vmgui_proto::Create>() as u32);
        let body = [0u8; core::mem::size_of::<vmgui_proto::Create>()];
        assert!(Event::parse(h, &body).unwrap().is_none());
    }

    #[test]
    fn unknown_message_is_ignored_not_an_error() {
        let h = header(0xFFFF_FFFF, 1, 0);
        assert!(Event::parse(h, &[]).unwrap().is_none());
    }
}
