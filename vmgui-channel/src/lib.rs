//! A safe wrapper around the ring transport that carries the GUI protocol
//! between a guest agent and its host daemon.
#![forbid(clippy::all, improper_ctypes, improper_ctypes_definitions)]

use std::io::{Error, Read, Write};
use std::os::raw::{c_int, c_void};
use std::os::unix::prelude::RawFd;

/// Status of a ring.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Status {
    /// The remote end disconnected, or the remote domain is dead.
    Disconnected,
    /// Both ends are connected.
    Connected,
    /// The server side is initialized and waiting for the client to connect.
    Waiting,
}

/// A ring-transport endpoint.
///
/// The [`Read`] implementation does not read from the slice passed to it
/// before filling it, and is safe to call even if that slice is
/// uninitialized memory.
#[derive(Debug)]
pub struct Channel {
    inner: *mut vmgui_channel_sys::libvchan_t,
}

fn c_int_to_usize(i: c_int) -> usize {
    assert!(i >= 0, "c_int_to_usize passed negative number");
    const _: () = assert!(c_int::MAX as usize as c_int == c_int::MAX);
    i as usize
}

impl Channel {
    /// Creates a listening ring that accepts a connection from the given
    /// domain on the given port.
    #[inline]
    pub fn server(
        domain: impl Into<u16>,
        port: c_int,
        read_min: usize,
        write_min: usize,
    ) -> Result<Self, Error> {
        fn server_inner(
            domain: u16,
            port: c_int,
            read_min: usize,
            write_min: usize,
        ) -> Result<Channel, Error> {
            let ptr = unsafe {
                vmgui_channel_sys::libvchan_server_init(domain.into(), port, read_min, write_min)
            };
            if ptr.is_null() {
                Err(Error::last_os_error())
            } else {
                Ok(Channel { inner: ptr })
            }
        }
        server_inner(domain.into(), port, read_min, write_min)
    }

    /// Creates a ring that connects to the given domain via the given port.
    #[inline]
    pub fn client(domain: impl Into<u16>, port: c_int) -> Result<Self, Error> {
        fn client_inner(domain: u16, port: c_int) -> Result<Channel, Error> {
            let ptr = unsafe { vmgui_channel_sys::libvchan_client_init(domain.into(), port) };
            if ptr.is_null() {
                Err(Error::last_os_error())
            } else {
                Ok(Channel { inner: ptr })
            }
        }
        client_inner(domain.into(), port)
    }

    /// Returns the underlying file descriptor.  The only valid use of this
    /// descriptor is to pass it to `poll` or similar; reading or writing it
    /// directly bypasses the ring's framing.
    pub fn fd(&self) -> RawFd {
        unsafe { vmgui_channel_sys::libvchan_fd_for_select(self.inner) }
    }

    /// Returns the current status of the ring.
    pub fn status(&self) -> Status {
        match unsafe { vmgui_channel_sys::libvchan_is_open(self.inner) } {
            vmgui_channel_sys::VCHAN_DISCONNECTED => Status::Disconnected,
            vmgui_channel_sys::VCHAN_CONNECTED => Status::Connected,
            vmgui_channel_sys::VCHAN_WAITING => Status::Waiting,
            _ => panic!("bad return value from libvchan_is_open()"),
        }
    }

    /// Returns the number of bytes that can be read without blocking.
    pub fn data_ready(&self) -> usize {
        let s = unsafe { vmgui_channel_sys::libvchan_data_ready(self.inner) };
        assert!(s >= 0, "number of bytes ready to read cannot be negative");
        c_int_to_usize(s)
    }

    /// Returns the number of bytes that can be written without blocking.
    pub fn buffer_space(&self) -> usize {
        let s = unsafe { vmgui_channel_sys::libvchan_buffer_space(self.inner) };
        assert!(s >= 0, "number of bytes that can be sent cannot be negative");
        c_int_to_usize(s)
    }

    /// Blocks until I/O in some direction becomes possible.  If an event has
    /// already happened on the file descriptor, returns immediately and
    /// clears the pending-event flag.
    pub fn wait(&self) {
        unsafe { vmgui_channel_sys::libvchan_wait(self.inner) };
    }

    /// Writes the entire buffer as a single ring message.
    pub fn send(&mut self, buffer: &[u8]) -> Result<usize, Error> {
        let res = unsafe {
            vmgui_channel_sys::libvchan_send(self.inner, buffer.as_ptr() as _, buffer.len())
        };
        if res == -1 {
            Err(Error::last_os_error())
        } else {
            assert!(res >= 0, "sent negative number of bytes?");
            assert_eq!(res as usize, buffer.len(), "short write on the ring");
            Ok(res as _)
        }
    }

    /// # Safety
    ///
    /// `ptr` must be valid to write to for `size` bytes.
    unsafe fn unsafe_recv(&mut self, ptr: *mut c_void, size: usize) -> Result<usize, Error> {
        let res = vmgui_channel_sys::libvchan_recv(self.inner, ptr, size);
        if res == -1 {
            Err(Error::last_os_error())
        } else {
            assert!(res >= 0, "received negative number of bytes?");
            assert_eq!(res as usize, size, "short read on the ring");
            Ok(res as _)
        }
    }

    /// Blocks until `buffer` is completely filled.
    pub fn recv(&mut self, buffer: &mut [u8]) -> Result<usize, Error> {
        unsafe { self.unsafe_recv(buffer.as_mut_ptr() as _, buffer.len()) }
    }

    /// Receives a plain-old-data struct directly into its native
    /// representation.  Blocks until the read is complete.
    #[cfg(feature = "castable")]
    pub fn recv_struct<T: vmgui_wire::Castable>(&mut self) -> Result<T, Error> {
        let mut datum = std::mem::MaybeUninit::<T>::uninit();
        unsafe { self.unsafe_recv(datum.as_mut_ptr() as *mut _, std::mem::size_of::<T>()) }?;
        // SAFETY: libvchan_recv fully initialized the buffer, and a
        // Castable type has no invalid bit pattern.
        unsafe { Ok(datum.assume_init()) }
    }
}

impl Write for Channel {
    fn write(&mut self, buffer: &[u8]) -> Result<usize, Error> {
        let res = unsafe {
            vmgui_channel_sys::libvchan_write(self.inner, buffer.as_ptr() as _, buffer.len())
        };
        if res == -1 {
            Err(Error::last_os_error())
        } else {
            assert!(res >= 0, "wrote negative number of bytes?");
            Ok(res as _)
        }
    }

    fn flush(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

impl Read for Channel {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, Error> {
        let res = unsafe {
            vmgui_channel_sys::libvchan_read(self.inner, buffer.as_mut_ptr() as _, buffer.len())
        };
        if res == -1 {
            Err(Error::last_os_error())
        } else {
            assert!(res >= 0, "read negative number of bytes?");
            Ok(res as _)
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        unsafe { vmgui_channel_sys::libvchan_close(self.inner) }
    }
}
