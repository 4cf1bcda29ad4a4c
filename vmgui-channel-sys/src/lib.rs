//! Raw bindings to the ring transport library linking guests to their host.
//!
//! The functions declared here are exactly the ABI of the system's
//! `vchan-xen` library; this crate does not rename or reshape them, since
//! doing so would make linking against the real library impossible.  See
//! `vmgui-channel` for a safe, idiomatic wrapper.
#![forbid(clippy::all)]

use std::os::raw::{c_int, c_void};

/// Opaque handle to an open ring.  Only ever touched through a pointer.
#[repr(C)]
#[allow(non_camel_case_types)]
pub struct libvchan_t {
    _unused: [u8; 0],
}

/// Remote end disconnected, or the remote domain is dead.
pub const VCHAN_DISCONNECTED: c_int = 0;
/// Both ends are connected.
pub const VCHAN_CONNECTED: c_int = 1;
/// Server side initialized; waiting for the client to connect.
pub const VCHAN_WAITING: c_int = 2;

#[link(name = "vchan-xen")]
extern "C" {
    pub fn libvchan_server_init(
        domain: c_int,
        port: c_int,
        read_min: usize,
        write_min: usize,
    ) -> *mut libvchan_t;
    pub fn libvchan_client_init(domain: c_int, port: c_int) -> *mut libvchan_t;
    pub fn libvchan_write(ctrl: *mut libvchan_t, data: *const c_void, size: usize) -> c_int;
    pub fn libvchan_send(ctrl: *mut libvchan_t, data: *const c_void, size: usize) -> c_int;
    pub fn libvchan_read(ctrl: *mut libvchan_t, data: *mut c_void, size: usize) -> c_int;
    pub fn libvchan_recv(ctrl: *mut libvchan_t, data: *mut c_void, size: usize) -> c_int;
    pub fn libvchan_wait(ctrl: *mut libvchan_t) -> c_int;
    pub fn libvchan_close(ctrl: *mut libvchan_t);
    pub fn libvchan_fd_for_select(ctrl: *const libvchan_t) -> c_int;
    pub fn libvchan_is_open(ctrl: *const libvchan_t) -> c_int;
    pub fn libvchan_data_ready(ctrl: *const libvchan_t) -> c_int;
    pub fn libvchan_buffer_space(ctrl: *const libvchan_t) -> c_int;
}
