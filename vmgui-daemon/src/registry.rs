//! Window Registry (§4.4): the dual remote-id / local-id index of every
//! window the daemon currently mirrors, plus the parent/transient/embedder
//! edges between them.
//!
//! All host-side message handlers other than `CREATE` and `CLIPBOARD_DATA`
//! begin with [`Registry::lookup_by_remote`]; a miss there is a protocol
//! error and terminates the session (see `vmgui-daemon::error::SessionFatalError::UnknownWindow`).

use std::collections::HashMap;

use crate::sanitize::ValidatedGeometry;

/// The guest's whole-screen pseudo-window (§3, §4.4): remote id 0, which
/// backs child windows whose own frame has not yet been imported.
pub const FULLSCREEN_WINDOW: u32 = 0;

/// Opaque host-side window identity.  In a full build this is the X11
/// window id the daemon created to mirror a guest window; this crate
/// treats it as an opaque `u64` handed out by the display-server
/// collaborator (out of scope per §1).
pub type LocalId = u64;

/// Where a `CONFIGURE` request the daemon sent to the guest currently
/// stands (§4.7's configure state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigureState {
    /// No configure request is outstanding.
    Idle,
    /// A `CONFIGURE` was sent to the guest and no matching ack has arrived.
    Sent,
}

/// The window-manager flags a window may carry (§3's `flags_set`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowFlagsState {
    /// Guest or host asked for fullscreen (possibly rewritten; see
    /// [`WindowRecord::fullscreen_pseudo_acked`]).
    pub fullscreen: bool,
    /// The window demands the user's attention.
    pub demands_attention: bool,
    /// The window should be minimized.
    pub minimize: bool,
}

/// A single mirrored window (§3's `WindowRecord`).
#[derive(Debug, Clone)]
pub struct WindowRecord {
    /// The id the guest uses to refer to this window.
    pub remote_id: u32,
    /// The id the host display server uses.
    pub local_id: LocalId,
    /// The window's parent, or [`None`] for the root.  A `CREATE` naming an
    /// unknown parent resolves to `None` (root), per §4.4 — never an error.
    pub parent: Option<u32>,
    /// The window this one is `transient_for`, if any.
    pub transient_for: Option<u32>,
    /// Current (already-sanitized) geometry.
    pub geometry: ValidatedGeometry,
    /// Whether this window bypasses the window manager.
    pub override_redirect: bool,
    pub is_mapped: bool,
    pub is_docked: bool,
    /// Configure handshake state; see [`ConfigureState`].
    pub configure_state: ConfigureState,
    /// Set when the host rewrote a `FULLSCREEN` request into
    /// `MAXIMIZED_VERT ∧ MAXIMIZED_HORZ` (§4.7's fullscreen pseudo-ack) and
    /// is still waiting to rewrite the matching WM ack back to the guest.
    pub fullscreen_pseudo_acked: bool,
    pub flags: WindowFlagsState,
    /// Whether a shared-memory frame is currently imported for this
    /// window (§3's `FrameImport`'s one-live-at-a-time invariant; the
    /// import handle itself lives in `vmgui_daemon::frame::FrameImporter`,
    /// keyed by `remote_id`, not duplicated here).
    pub has_frame: bool,
}

/// The dual-indexed registry of live windows.
#[derive(Debug, Default)]
pub struct Registry {
    by_remote: HashMap<u32, WindowRecord>,
    by_local: HashMap<LocalId, u32>,
}

impl Registry {
    /// Inserts a new window.  `remote_id` MUST NOT already be present; a
    /// `CREATE` for an already-live remote id is a protocol error the
    /// caller must check for before calling this (§3's handle-uniqueness
    /// invariant).
    pub fn insert(&mut self, record: WindowRecord) {
        self.by_local.insert(record.local_id, record.remote_id);
        self.by_remote.insert(record.remote_id, record);
    }

    /// Looks up a window by the id the guest used to address it.
    pub fn lookup_by_remote(&self, remote_id: u32) -> Option<&WindowRecord> {
        self.by_remote.get(&remote_id)
    }

    /// Mutable version of [`Registry::lookup_by_remote`].
    pub fn lookup_by_remote_mut(&mut self, remote_id: u32) -> Option<&mut WindowRecord> {
        self.by_remote.get_mut(&remote_id)
    }

    /// Looks up a window by its host-side identity.
    pub fn lookup_by_local(&self, local_id: LocalId) -> Option<&WindowRecord> {
        self.by_local.get(&local_id).and_then(|r| self.by_remote.get(r))
    }

    /// Removes a window, returning its record if it was present.
    pub fn remove(&mut self, remote_id: u32) -> Option<WindowRecord> {
        let record = self.by_remote.remove(&remote_id)?;
        self.by_local.remove(&record.local_id);
        Some(record)
    }

    /// Resolves a `CREATE` message's raw `parent` field: an unknown parent
    /// silently becomes "no parent" (root), per §4.4 — this is never an
    /// error, unlike every other reference in the protocol.
    pub fn resolve_parent(&self, parent: Option<u32>) -> Option<u32> {
        parent.filter(|p| self.by_remote.contains_key(p))
    }

    /// Number of windows currently registered, excluding the fullscreen
    /// pseudo-window if present.  Used by the §8 registry round-trip
    /// property: a well-formed CREATE..DESTROY sequence for a window
    /// leaves this count unchanged.
    pub fn len(&self) -> usize {
        self.by_remote.len()
    }

    /// Whether the registry has no windows at all.
    pub fn is_empty(&self) -> bool {
        self.by_remote.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sanitize::ValidatedGeometry;

    fn geom(x: i32, y: i32, w: u32, h: u32) -> ValidatedGeometry {
        ValidatedGeometry { x, y, w, h }
    }

    fn record(remote_id: u32, local_id: LocalId, parent: Option<u32>) -> WindowRecord {
        WindowRecord {
            remote_id,
            local_id,
            parent,
            transient_for: None,
            geometry: geom(0, 0, 100, 100),
            override_redirect: false,
            is_mapped: false,
            is_docked: false,
            configure_state: ConfigureState::Idle,
            fullscreen_pseudo_acked: false,
            flags: WindowFlagsState::default(),
            has_frame: false,
        }
    }

    #[test]
    fn create_then_destroy_round_trips_the_count() {
        let mut reg = Registry::default();
        assert_eq!(reg.len(), 0);
        reg.insert(record(1, 100, None));
        assert_eq!(reg.len(), 1);
        reg.remove(1);
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn unknown_parent_resolves_to_root() {
        let reg = Registry::default();
        assert_eq!(reg.resolve_parent(Some(42)), None);
    }

    #[test]
    fn known_parent_is_kept() {
        let mut reg = Registry::default();
        reg.insert(record(1, 100, None));
        assert_eq!(reg.resolve_parent(Some(1)), Some(1));
    }

    #[test]
    fn lookup_by_local_follows_the_dual_index() {
        let mut reg = Registry::default();
        reg.insert(record(7, 777, None));
        assert_eq!(reg.lookup_by_local(777).unwrap().remote_id, 7);
        assert!(reg.lookup_by_local(778).is_none());
    }

    proptest::proptest! {
        /// §8's registry round-trip property: inserting then removing any
        /// number of distinct windows leaves the registry exactly as empty
        /// as it started, regardless of insertion order.
        #[test]
        fn insert_then_remove_every_window_empties_the_registry(
            ids in proptest::collection::hash_set(1u32..10_000, 0..50)
        ) {
            let mut reg = Registry::default();
            for (i, &id) in ids.iter().enumerate() {
                reg.insert(record(id, i as LocalId + 1, None));
            }
            proptest::prop_assert_eq!(reg.len(), ids.len());
            for &id in &ids {
                proptest::prop_assert!(reg.remove(id).is_some());
            }
            proptest::prop_assert!(reg.is_empty());
        }
    }
}
