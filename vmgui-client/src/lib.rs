//! A framed, reconnect-capable client for the cross-domain GUI protocol.
//!
//! This is the layer both the agent and the daemon build on: it turns the
//! raw byte stream of a [`vmgui_channel::Channel`] into whole protocol
//! messages, buffers outgoing writes so that a stalled peer cannot cause a
//! blocking write, and knows how to re-run the version handshake after an
//! I/O error forces a reconnect.

#![forbid(missing_docs)]

use std::convert::TryInto as _;
use std::io;
use std::num::NonZeroU32;
use std::task::Poll;

use vmgui_proto::{Header, XConf};
use vmgui_wire::Castable as _;

mod buffer;

/// A client connection to a peer speaking the cross-domain GUI protocol.
#[derive(Debug)]
pub struct Client {
    raw: buffer::RawMessageStream,
}

impl Client {
    /// Connects as the agent side: listens for, and accepts, a connection
    /// from the host daemon, negotiates the protocol version, and returns
    /// the root window configuration the daemon sent back.
    pub fn agent(domain: u16) -> io::Result<(Self, XConf)> {
        let (raw, conf) = buffer::RawMessageStream::agent(domain)?;
        Ok((Self { raw }, conf))
    }

    /// Connects as the daemon side: dials the guest domain, validates its
    /// advertised protocol version, and sends it the given root window
    /// configuration.
    pub fn daemon(domain: u16, xconf: XConf) -> io::Result<Self> {
        Ok(Self {
            raw: buffer::RawMessageStream::daemon(domain, xconf)?,
        })
    }

    /// Sends a typed message.  This never blocks: outgoing bytes are queued
    /// until there is space on the transport.
    pub fn send<T: vmgui_proto::Message>(&mut self, message: &T, window: NonZeroU32) -> io::Result<()> {
        self.send_raw(message.as_bytes(), window, T::KIND as u32)
    }

    /// Raw version of [`Client::send`].  Prefer [`Client::send`] where the
    /// message type is statically known.
    pub fn send_raw(&mut self, message: &[u8], window: NonZeroU32, ty: u32) -> io::Result<()> {
        let untrusted_len: u32 = message
            .len()
            .try_into()
            .expect("message length must fit in a u32");
        let header = Header {
            ty,
            window: window.into(),
            untrusted_len,
        };
        self.raw.write(header.as_bytes())?;
        self.raw.write(message)?;
        Ok(())
    }

    /// Acknowledges a readiness event (as reported by `poll`, `epoll`, or
    /// similar).  Must be called before further I/O after the underlying
    /// file descriptor becomes ready.
    pub fn wait(&mut self) {
        self.raw.wait()
    }

    /// Reads the next complete message, if any is fully buffered.
    ///
    /// Returns `Poll::Pending` if no full message is available yet.  On
    /// error, the connection needs a [`Client::reconnect`] before further
    /// I/O can succeed; see [`Client::needs_reconnect`].
    pub fn read_message(&mut self) -> Poll<io::Result<IncomingMessage<'_>>> {
        match self.raw.read_message() {
            Ok(None) => Poll::Pending,
            Ok(Some((header, body))) => Poll::Ready(Ok(IncomingMessage { header, body })),
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    /// Returns whether [`Client::reconnect`] must be called before further
    /// I/O can succeed.
    pub fn needs_reconnect(&self) -> bool {
        self.raw.needs_reconnect()
    }

    /// Tears down the current transport and re-runs the handshake for this
    /// client's role.  Any messages queued but not yet flushed are lost.
    pub fn reconnect(&mut self) -> io::Result<()> {
        self.raw.reconnect()
    }

    /// Returns, and clears, whether a reconnect has happened since the last
    /// call to this method.
    pub fn reconnected(&mut self) -> bool {
        self.raw.reconnected()
    }
}

impl std::os::unix::io::AsRawFd for Client {
    fn as_raw_fd(&self) -> std::os::raw::c_int {
        self.raw.as_raw_fd()
    }
}

/// A message header and body read by [`Client::read_message`].
pub struct IncomingMessage<'a> {
    header: Header,
    body: &'a [u8],
}

impl<'a> IncomingMessage<'a> {
    /// Returns the header as read off the wire.
    pub fn header(&self) -> Header {
        self.header
    }

    /// Returns the message type.  UNTRUSTED: validate against [`vmgui_proto::Msg`]
    /// before trusting it to mean anything.
    pub fn ty(&self) -> u32 {
        self.header.ty
    }

    /// Returns the raw, already-length-validated message body.
    pub fn body(&self) -> &'a [u8] {
        self.body
    }

    /// Decodes the body as a specific message type.
    ///
    /// # Panics
    ///
    /// Panics if `T::KIND` does not match the header's message type; callers
    /// are expected to dispatch on [`IncomingMessage::ty`] first.
    pub fn read<T: vmgui_proto::Message>(&self) -> T {
        assert_eq!(
            T::KIND as u32, self.header.ty,
            "wrong message type passed to IncomingMessage::read()"
        );
        T::from_bytes(self.body)
    }
}
