//! Buffered, framed I/O on top of a raw [`vmgui_channel::Channel`].
//!
//! Outgoing messages are queued rather than written synchronously, so that a
//! slow or stalled peer never makes a write block: see §4.1's requirement
//! that the agent side must not block on the daemon.

use std::collections::VecDeque;
use std::convert::TryInto;
use std::io::{self, Error, ErrorKind};
use std::mem::size_of;
use std::ops::Range;

use vmgui_channel::Channel;
use vmgui_proto::{Header, XConf};
use vmgui_wire::Castable as _;

#[derive(Debug)]
enum ReadState {
    ReadingHeader,
    ReadingBody(Header, usize),
    Discard(usize),
    Error,
}

#[derive(Debug)]
enum Role {
    Agent { domain: u16 },
    Daemon { domain: u16, xconf: XConf },
}

/// A framed message stream, with reconnect support.
#[derive(Debug)]
pub(crate) struct RawMessageStream {
    channel: Channel,
    role: Role,
    queue: VecDeque<Vec<u8>>,
    offset: usize,
    state: ReadState,
    buffer: Vec<u8>,
    needs_reconnect: bool,
    reconnected: bool,
}

fn u32_to_usize(i: u32) -> usize {
    let [] = [0; if u32::MAX as usize as u32 == u32::MAX {
        0
    } else {
        1
    }];
    i.try_into()
        .expect("u32 always fits in a usize, or the above statement would not compile")
}

impl RawMessageStream {
    fn write_slice(channel: &mut Channel, slice: &[u8]) -> io::Result<usize> {
        let space = channel.buffer_space();
        if space == 0 {
            Ok(0)
        } else {
            let to_write = space.min(slice.len());
            channel.send(&slice[..to_write])
        }
    }

    fn drain(&mut self) -> io::Result<usize> {
        let mut written = 0;
        loop {
            let front: &mut _ = match self.queue.front_mut() {
                None => break Ok(written),
                Some(e) => e,
            };
            let to_write = &front[self.offset..];
            if to_write.is_empty() {
                self.queue.pop_front();
                self.offset = 0;
                continue;
            }
            let written_this_time = Self::write_slice(&mut self.channel, to_write)?;
            written += written_this_time;
            self.offset += written_this_time;
            if written_this_time < to_write.len() {
                break Ok(written);
            }
        }
    }

    pub fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        if let Err(e) = self.drain() {
            self.needs_reconnect = true;
            return Err(e);
        }
        if !self.queue.is_empty() {
            self.queue.push_back(buf.to_owned());
            return Ok(());
        }
        assert_eq!(self.offset, 0);
        let written = match Self::write_slice(&mut self.channel, buf) {
            Ok(w) => w,
            Err(e) => {
                self.needs_reconnect = true;
                return Err(e);
            }
        };
        if written != buf.len() {
            assert!(written < buf.len());
            self.queue.push_back(buf[written..].to_owned());
        }
        Ok(())
    }

    #[inline]
    fn recv(&mut self, s: Range<usize>) -> io::Result<usize> {
        self.channel.recv(&mut self.buffer[s]).map_err(|e| {
            self.state = ReadState::Error;
            self.needs_reconnect = true;
            e
        })
    }

    pub fn wait(&mut self) {
        self.channel.wait()
    }

    /// If there is nothing to read, returns `Ok(None)` immediately;
    /// otherwise returns `Ok(Some(msg))` once a full message has been read,
    /// or `Err` if the stream failed (in which case a reconnect is needed).
    pub fn read_message(&mut self) -> io::Result<Option<(Header, &[u8])>> {
        self.drain()?;
        let mut ready = self.channel.data_ready();
        loop {
            if ready == 0 {
                break Ok(None);
            }
            match self.state {
                ReadState::Error => {
                    break Err(Error::new(ErrorKind::Other, "stream already in error state"))
                }
                ReadState::ReadingHeader if ready >= size_of::<Header>() => {
                    let mut header = <Header as Default>::default();
                    let n = self.channel.recv(header.as_mut_bytes()).map_err(|e| {
                        self.state = ReadState::Error;
                        self.needs_reconnect = true;
                        e
                    })?;
                    if n != size_of::<Header>() {
                        self.needs_reconnect = true;
                        break Err(Error::new(
                            ErrorKind::UnexpectedEof,
                            "failed to read a full message header",
                        ));
                    }
                    ready -= size_of::<Header>();
                    let untrusted_len = u32_to_usize(header.untrusted_len);
                    match vmgui_proto::msg_length_limits(header.ty) {
                        None => self.state = ReadState::Discard(untrusted_len),
                        Some(max_len) if max_len.contains(&untrusted_len) => {
                            self.buffer.resize(untrusted_len, 0);
                            self.state = ReadState::ReadingBody(header, 0)
                        }
                        Some(_) => {
                            self.state = ReadState::Error;
                            break Err(Error::new(
                                ErrorKind::InvalidData,
                                "incoming message has an invalid size for its type",
                            ));
                        }
                    }
                }
                ReadState::ReadingHeader => break Ok(None),
                ReadState::Discard(len) => {
                    self.buffer.resize(256.min(len).max(self.buffer.len()), 0);
                    let buf_len = self.buffer.len();
                    let bytes_read = self.recv(0..ready.min(len.min(buf_len)))?;
                    if len == bytes_read {
                        self.state = ReadState::ReadingHeader
                    } else if bytes_read == 0 {
                        self.needs_reconnect = true;
                        break Err(Error::new(ErrorKind::UnexpectedEof, "EOF on the ring"));
                    } else {
                        assert!(len > bytes_read);
                        self.state = ReadState::Discard(len - bytes_read)
                    }
                }
                ReadState::ReadingBody(header, read_so_far) => {
                    let buffer_len = self.buffer.len();
                    let to_read = ready.min(buffer_len - read_so_far);
                    let bytes_read = self.recv(read_so_far..read_so_far + to_read)?;
                    if bytes_read == to_read {
                        self.state = ReadState::ReadingHeader;
                        break Ok(Some((header, &self.buffer[..])));
                    } else if bytes_read == 0 {
                        self.needs_reconnect = true;
                        break Err(Error::new(ErrorKind::UnexpectedEof, "EOF on the ring"));
                    } else {
                        assert!(to_read > bytes_read);
                        self.state = ReadState::ReadingBody(header, read_so_far + bytes_read)
                    }
                }
            }
        }
    }

    /// Performs the agent-side handshake: accept a connection, send this
    /// implementation's protocol version, and read the resulting root
    /// window configuration.
    pub fn agent(domain: u16) -> io::Result<(Self, XConf)> {
        let channel = Channel::server(domain, vmgui_proto::LISTENING_PORT.into(), 4096, 4096)?;
        loop {
            match channel.status() {
                vmgui_channel::Status::Waiting => channel.wait(),
                vmgui_channel::Status::Connected => break,
                vmgui_channel::Status::Disconnected => {
                    return Err(Error::new(
                        ErrorKind::Other,
                        "did not get a connection from the host daemon",
                    ))
                }
            }
        }
        let mut res = Self {
            channel,
            role: Role::Agent { domain },
            queue: Default::default(),
            offset: 0,
            state: ReadState::ReadingHeader,
            buffer: vec![],
            needs_reconnect: false,
            reconnected: false,
        };
        let version = vmgui_proto::encode_version(vmgui_proto::PROTOCOL_MAJOR, vmgui_proto::PROTOCOL_MINOR);
        res.write(version.as_bytes())?;
        res.drain()?;
        let mut conf = XConf::default();
        res.channel.recv(conf.as_mut_bytes())?;
        Ok((res, conf))
    }

    /// Performs the daemon-side handshake: connect to the agent, read and
    /// validate its advertised version, then send the root window
    /// configuration.
    pub fn daemon(domain: u16, xconf: XConf) -> io::Result<Self> {
        let mut channel = Channel::client(domain, vmgui_proto::LISTENING_PORT.into())?;
        let mut version = 0u32;
        channel.recv(version.as_mut_bytes())?;
        if !vmgui_proto::version_compatible(
            version,
            vmgui_proto::PROTOCOL_MAJOR,
            vmgui_proto::PROTOCOL_MINOR,
        ) {
            return Err(Error::new(
                ErrorKind::InvalidData,
                "guest advertised an incompatible protocol version",
            ));
        }
        let mut res = Self {
            channel,
            role: Role::Daemon { domain, xconf },
            queue: Default::default(),
            offset: 0,
            state: ReadState::ReadingHeader,
            buffer: vec![],
            needs_reconnect: false,
            reconnected: false,
        };
        let xconf_bytes = match &res.role {
            Role::Daemon { xconf, .. } => *xconf,
            Role::Agent { .. } => unreachable!(),
        };
        res.write(xconf_bytes.as_bytes())?;
        res.drain()?;
        Ok(res)
    }

    /// Tears down the current channel and performs a fresh handshake of the
    /// same role.  Buffered, unflushed output is discarded: the peer is
    /// assumed to have restarted and lost its own state too.
    pub fn reconnect(&mut self) -> io::Result<()> {
        match self.role {
            Role::Agent { domain } => {
                let (fresh, _conf) = Self::agent(domain)?;
                *self = fresh;
            }
            Role::Daemon { domain, xconf } => {
                let fresh = Self::daemon(domain, xconf)?;
                *self = fresh;
            }
        }
        self.reconnected = true;
        self.needs_reconnect = false;
        Ok(())
    }

    /// Returns, and clears, the "did a reconnect happen" flag.
    pub fn reconnected(&mut self) -> bool {
        std::mem::take(&mut self.reconnected)
    }

    /// Returns whether [`Self::reconnect`] must be called before further I/O
    /// can succeed.
    pub fn needs_reconnect(&self) -> bool {
        self.needs_reconnect
    }

    pub fn as_raw_fd(&self) -> std::os::raw::c_int {
        self.channel.fd()
    }
}
