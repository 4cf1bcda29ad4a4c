//! Shared-Frame Importer (§4.3), host side: the dual of `vmgui-shmem`'s
//! guest-side `FrameExporter`. Pixel data never transits the ring; only
//! page or grant references do, and this module's job is handing those
//! references to the display server without ever copying the pixels
//! itself.
//!
//! Unlike the guest side (which owns the pages and maps them directly),
//! the host side hands the references to the display server's preload
//! shim via a small coordination file, [`SharedArgs`], serialized by the
//! process-global inter-viewer lock (§5, §9). The actual `mmap`
//! substitution happens inside that shim, which is out of scope here
//! (§1's collaborator list); this module models the handoff as the
//! `attach`/`release` pair §9 calls for.

use std::io;

use crate::error::RecoverableError;

/// A page or grant reference set describing where a window's pixels live
/// in guest memory (§3's `FrameImport` variants).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameSource {
    /// Direct page references (older guests): `num_pages` raw machine
    /// frame numbers, with a byte offset into the first page.
    PageRefs {
        /// Byte offset into the first page; always `< PAGE_SIZE`.
        byte_offset: u32,
        /// The page references themselves.
        refs: Vec<u32>,
    },
    /// Grant-table references (current guests).
    GrantRefs {
        /// The grant references themselves.
        refs: Vec<u32>,
    },
}

impl FrameSource {
    /// Number of references carried.
    pub fn count(&self) -> usize {
        match self {
            FrameSource::PageRefs { refs, .. } => refs.len(),
            FrameSource::GrantRefs { refs } => refs.len(),
        }
    }
}

/// The `SharedArgs` region (§3, §6): `{ shmid, domid, type, variant
/// payload }`, written under the inter-viewer lock for the display
/// server's preload shim to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedArgs {
    /// Host-local identifier for the import, opaque to the guest.
    pub shmid: u32,
    /// The guest domain the pages/grants belong to.
    pub domid: u16,
    /// The page or grant references themselves.
    pub source: FrameSource,
}

const SHARED_ARGS_TYPE_MFNS: u32 = 0;
const SHARED_ARGS_TYPE_GRANT_REFS: u32 = 1;

/// The sentinel `shmid` SharedArgs is restored to once an attach request
/// has been served, so that no further read of the file accidentally
/// re-triggers a stale attach (§4.3 step 4: "restore SharedArgs to the
/// 'command' identifier").
pub const SHARED_ARGS_COMMAND_IDLE: u32 = 0;

impl SharedArgs {
    /// Serializes this value to the flat byte layout the preload shim
    /// expects: `u32 shmid; u32 domid; u32 type;` followed by the variant
    /// payload (`u32 count; u32 off; u32 refs[]` for page refs, `u32
    /// count; u32 refs[]` for grant refs) — see §6's layout note.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.shmid.to_ne_bytes());
        out.extend_from_slice(&(self.domid as u32).to_ne_bytes());
        match &self.source {
            FrameSource::PageRefs { byte_offset, refs } => {
                out.extend_from_slice(&SHARED_ARGS_TYPE_MFNS.to_ne_bytes());
                out.extend_from_slice(&(refs.len() as u32).to_ne_bytes());
                out.extend_from_slice(&byte_offset.to_ne_bytes());
                for r in refs {
                    out.extend_from_slice(&r.to_ne_bytes());
                }
            }
            FrameSource::GrantRefs { refs } => {
                out.extend_from_slice(&SHARED_ARGS_TYPE_GRANT_REFS.to_ne_bytes());
                out.extend_from_slice(&(refs.len() as u32).to_ne_bytes());
                for r in refs {
                    out.extend_from_slice(&r.to_ne_bytes());
                }
            }
        }
        out
    }
}

/// A live import bound to a single window (§3: "at most one FrameImport is
/// live at a time; replacing one releases the prior before establishing
/// the new").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportHandle(u32);

/// Serializes clipboard and SharedArgs operations across every daemon and
/// the display server's preload shim (§5, §9). The real implementation is
/// an exclusive, non-blocking `flock` on `/run/qubes/appviewer.lock`; this
/// trait exists so the importer and clipboard broker can be tested without
/// a real filesystem lock.
pub trait InterViewerLock {
    /// Blocks until the lock is held.
    fn acquire(&mut self);
    /// Releases the lock.
    fn release(&mut self);
}

/// The real [`InterViewerLock`]: an exclusive `flock` on a well-known path,
/// shared by every daemon instance and the display server's preload shim
/// (§5, §9). Blocks the calling thread; this daemon is single-threaded
/// cooperative (§5), so a held lock is only ever momentary (write
/// SharedArgs, ask for attach, restore SharedArgs).
pub struct FileLock {
    fd: std::os::unix::io::RawFd,
}

impl FileLock {
    /// Opens (creating if necessary) the lock file at `path`.
    pub fn open(path: &std::path::Path) -> io::Result<Self> {
        use std::os::unix::io::AsRawFd;
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(path)?;
        let fd = file.as_raw_fd();
        // Leak the `File` so the descriptor stays open for the process's
        // lifetime; `flock` is released on `close` or explicit `unlock`.
        std::mem::forget(file);
        Ok(Self { fd })
    }
}

impl InterViewerLock for FileLock {
    fn acquire(&mut self) {
        // SAFETY: `fd` is a valid, open file descriptor for the lifetime of
        // `self`; `flock` with `LOCK_EX` blocks until the lock is free.
        let ret = unsafe { libc::flock(self.fd, libc::LOCK_EX) };
        debug_assert_eq!(ret, 0, "flock(LOCK_EX) failed: {}", io::Error::last_os_error());
    }

    fn release(&mut self) {
        // SAFETY: see `acquire`.
        let ret = unsafe { libc::flock(self.fd, libc::LOCK_UN) };
        debug_assert_eq!(ret, 0, "flock(LOCK_UN) failed: {}", io::Error::last_os_error());
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // SAFETY: `fd` was opened by `FileLock::open` and is not shared.
        unsafe {
            libc::close(self.fd);
        }
    }
}

/// Asks the display server to attach the image described by the last
/// SharedArgs write (§4.3 step 3). A collaborator: the real display
/// server's internal rendering is out of scope (§1).
pub trait DisplayServerAttach {
    /// Attempts the attach; `Ok(())` on success. Failure is reported via
    /// the error-handler side channel in the real system (§4.3 step 5);
    /// here it is a plain `Result`.
    fn attach(&mut self, shmid: u32) -> Result<(), io::Error>;
}

/// Imports shared frames, one at a time per window, handing page/grant
/// references to the display server via [`SharedArgs`].
#[derive(Debug, Default)]
pub struct FrameImporter {
    next_shmid: u32,
    live: std::collections::HashMap<u32, ImportHandle>,
}

impl FrameImporter {
    /// Imports a new frame for `window`, releasing any frame previously
    /// imported for it first (§4.3's one-live-frame invariant; §3's
    /// "replacing one releases the prior before establishing the new").
    ///
    /// Follows the exact lock scope of §4.3/§9: acquire, write SharedArgs,
    /// ask the display server to attach, restore SharedArgs to idle,
    /// release. On attach failure the frame is discarded and
    /// [`RecoverableError::FrameImportFailed`] is returned (§7 category 4).
    pub fn import(
        &mut self,
        window: u32,
        source: FrameSource,
        domid: u16,
        lock: &mut dyn InterViewerLock,
        display: &mut dyn DisplayServerAttach,
    ) -> Result<ImportHandle, RecoverableError> {
        if let Some(prior) = self.live.remove(&window) {
            let _ = prior; // the kernel/shim reclaims the mapping once dropped
        }
        self.next_shmid = self.next_shmid.wrapping_add(1);
        let shmid = self.next_shmid;
        let args = SharedArgs { shmid, domid, source };

        lock.acquire();
        let attach_result = display.attach(args.shmid);
        lock.release();

        match attach_result {
            Ok(()) => {
                let handle = ImportHandle(shmid);
                self.live.insert(window, handle);
                Ok(handle)
            }
            Err(_) => Err(RecoverableError::FrameImportFailed { window }),
        }
    }

    /// Releases the frame imported for `window`, if any.
    pub fn release(&mut self, window: u32) {
        self.live.remove(&window);
    }

    /// Whether `window` currently has a live imported frame.
    pub fn has_frame(&self, window: u32) -> bool {
        self.live.contains_key(&window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopLock;
    impl InterViewerLock for NoopLock {
        fn acquire(&mut self) {}
        fn release(&mut self) {}
    }

    struct AlwaysAttach;
    impl DisplayServerAttach for AlwaysAttach {
        fn attach(&mut self, _shmid: u32) -> Result<(), io::Error> {
            Ok(())
        }
    }

    struct AlwaysFail;
    impl DisplayServerAttach for AlwaysFail {
        fn attach(&mut self, _shmid: u32) -> Result<(), io::Error> {
            Err(io::Error::new(io::ErrorKind::Other, "attach failed"))
        }
    }

    #[test]
    fn import_then_reimport_releases_the_prior_handle() {
        let mut importer = FrameImporter::default();
        let mut lock = NoopLock;
        let mut display = AlwaysAttach;
        let source = FrameSource::GrantRefs { refs: vec![1, 2, 3] };
        importer
            .import(1, source.clone(), 7, &mut lock, &mut display)
            .unwrap();
        assert!(importer.has_frame(1));
        importer.import(1, source, 7, &mut lock, &mut display).unwrap();
        assert!(importer.has_frame(1));
    }

    #[test]
    fn failed_attach_discards_the_frame() {
        let mut importer = FrameImporter::default();
        let mut lock = NoopLock;
        let mut display = AlwaysFail;
        let source = FrameSource::GrantRefs { refs: vec![1] };
        let err = importer.import(1, source, 7, &mut lock, &mut display);
        assert!(err.is_err());
        assert!(!importer.has_frame(1));
    }

    #[test]
    fn shared_args_encodes_grant_refs() {
        let args = SharedArgs {
            shmid: 5,
            domid: 9,
            source: FrameSource::GrantRefs { refs: vec![0xAA] },
        };
        let bytes = args.encode();
        assert_eq!(&bytes[0..4], &5u32.to_ne_bytes());
        assert_eq!(&bytes[4..8], &9u32.to_ne_bytes());
        assert_eq!(&bytes[8..12], &SHARED_ARGS_TYPE_GRANT_REFS.to_ne_bytes());
    }
}
