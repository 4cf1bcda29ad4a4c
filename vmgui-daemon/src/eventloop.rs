//! Daemon Event Loop (§4.7): the Configure state machine, override-redirect
//! policy, and the per-message dispatch that ties the registry, sanitizer,
//! clipboard broker, frame importer and tray adapter together.
//!
//! Handlers here are pure with respect to the outside world: instead of
//! calling a display server or wire transport directly, each handler
//! mutates [`Registry`]/[`ClipboardBroker`]/[`FrameImporter`] state and
//! returns a list of [`Effect`]s describing what must happen next. The real
//! binary entrypoint is the only place that interprets `Effect`s against a
//! live ring connection and display server; this split is what lets every
//! handler in this module be exercised with nothing but fakes (§10.4).

use vmgui_proto::WindowFlag;

use crate::clipboard::{ClipboardBroker, PolicyOracle};
use crate::config::Config;
use crate::error::{Error, RecoverableError, SessionFatalError};
use crate::frame::{DisplayServerAttach, FrameImporter, FrameSource, InterViewerLock};
use crate::registry::{ConfigureState, LocalId, Registry, WindowFlagsState, WindowRecord};
use crate::sanitize::{
    self, OperatorDecision, OperatorPrompt, ValidatedGeometry, VerifyViolation,
};

/// Something the real binary must do in response to one guest message.
/// Ordering within a handler's returned `Vec` matters (e.g. a display
/// mutation is always listed before the wire ack it enables).
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Ask the display server to create a child window, tagged with the
    /// [`LocalId`] this daemon has already committed to the registry.
    DisplayCreate {
        local_id: LocalId,
        parent: Option<LocalId>,
        geometry: ValidatedGeometry,
        override_redirect: bool,
    },
    DisplayDestroy { local_id: LocalId },
    DisplayMap { local_id: LocalId },
    DisplayUnmap { local_id: LocalId },
    DisplayMoveResize { local_id: LocalId, geometry: ValidatedGeometry },
    DisplaySetTitle { local_id: LocalId, title: String },
    DisplaySetClass { local_id: LocalId, class: String },
    DisplaySetCursor { local_id: LocalId, cursor: u32 },
    DisplayDock { local_id: LocalId },
    /// Maximize (not fullscreen) the window, used for the §4.7 pseudo-ack
    /// rewrite.
    DisplayMaximize { local_id: LocalId },
    /// One-shot notice to the user that an override-redirect request was
    /// capped (§4.7, §8 scenario 3).
    NotifyOverrideRedirectCapped { local_id: LocalId },
    /// Re-send a `CONFIGURE` to the guest with the daemon's chosen geometry.
    SendConfigure { window: u32, geometry: ValidatedGeometry },
    /// Ack a `WINDOW_FLAGS` change back to the guest.
    SendWindowFlagsAck { window: u32, set: u32, unset: u32 },
    /// Send a `CLIPBOARD_REQ` to the named VM's agent.
    SendClipboardReq { window: u32 },
    /// Deliver pasted clipboard bytes to a window.
    DeliverClipboardData { window: u32, data: Vec<u8> },
}

/// The single state record threaded through every handler (§9: "carry a
/// single explicit configuration/state record through every handler,
/// rather than process-wide singletons, except where semantics require a
/// singleton" — the clipboard slot and frame importer are such singletons,
/// and live here as fields rather than free-standing statics).
#[derive(Debug)]
pub struct Daemon {
    pub registry: Registry,
    pub clipboard: ClipboardBroker,
    pub importer: FrameImporter,
    pub config: Config,
    /// Size of the guest's root/fullscreen window, once known (from the
    /// initial `XConf` handshake); `None` until then.
    pub root_size: Option<(u32, u32)>,
    /// Whether the one-shot override-redirect-capped notice has already
    /// been shown this session (§4.7, §8 scenario 3: never repeated).
    override_redirect_notice_shown: bool,
    next_local_id: LocalId,
}

impl Daemon {
    pub fn new(config: Config) -> Self {
        Daemon {
            registry: Registry::default(),
            clipboard: ClipboardBroker::default(),
            importer: FrameImporter::default(),
            config,
            root_size: None,
            override_redirect_notice_shown: false,
            next_local_id: 1,
        }
    }

    fn alloc_local_id(&mut self) -> LocalId {
        let id = self.next_local_id;
        self.next_local_id += 1;
        id
    }

    /// Records the guest's screen size, learned once at connection time.
    pub fn set_root_size(&mut self, width: u32, height: u32) {
        self.root_size = Some((width, height));
    }

    /// Decides whether an override-redirect request for a window of this
    /// size must be forced off (§4.7: area exceeds
    /// `override_redirect_max_percent` of the root's), and whether the
    /// one-shot notice should fire alongside it.
    fn force_override_redirect(
        &mut self,
        requested: bool,
        local_id: LocalId,
        w: u32,
        h: u32,
    ) -> (bool, Vec<Effect>) {
        let mut effects = Vec::new();
        if !requested {
            return (false, effects);
        }
        let Some((root_w, root_h)) = self.root_size else {
            return (true, effects);
        };
        let area = w as u64 * h as u64;
        let root_area = root_w as u64 * root_h as u64;
        let capped = area.saturating_mul(100) > root_area * self.config.override_redirect_max_percent as u64;
        if capped {
            if !self.override_redirect_notice_shown {
                self.override_redirect_notice_shown = true;
                effects.push(Effect::NotifyOverrideRedirectCapped { local_id });
            }
            (false, effects)
        } else {
            (true, effects)
        }
    }

    /// Resolves a VERIFY failure against the operator prompt, mapping its
    /// decision to either a recoverable ignore (no mutation occurred) or a
    /// session-fatal termination, matching R2's "decide before touching
    /// state" ordering.
    fn resolve_violation(
        violation: VerifyViolation,
        prompt: &mut dyn OperatorPrompt,
    ) -> Error {
        match prompt.ask(violation) {
            OperatorDecision::Ignore => Error::Recoverable(RecoverableError::GuestViolationIgnored {
                window: violation.window,
                field: violation.field,
            }),
            OperatorDecision::Terminate => {
                Error::SessionFatal(SessionFatalError::GuestTerminated { window: violation.window })
            }
        }
    }

    /// `CREATE` (§4.2, §4.4, §4.7).
    pub fn handle_create(
        &mut self,
        remote_id: u32,
        parent: Option<u32>,
        x: i32,
        y: i32,
        w: u32,
        h: u32,
        override_redirect: bool,
        prompt: &mut dyn OperatorPrompt,
    ) -> Result<Vec<Effect>, Error> {
        if self.registry.lookup_by_remote(remote_id).is_some() {
            return Err(Error::SessionFatal(SessionFatalError::DuplicateWindow { window: remote_id }));
        }
        if let Err(violation) = sanitize::verify_nonzero_dimensions(remote_id, w, h) {
            return Err(Self::resolve_violation(violation, prompt));
        }
        let geometry = sanitize::sanitize_geometry(x, y, w, h);
        let resolved_parent = self.registry.resolve_parent(parent);
        let local_id = self.alloc_local_id();
        let (override_redirect, mut effects) =
            self.force_override_redirect(override_redirect, local_id, geometry.w, geometry.h);

        let parent_local = resolved_parent.and_then(|p| self.registry.lookup_by_remote(p)).map(|r| r.local_id);
        effects.insert(
            0,
            Effect::DisplayCreate {
                local_id,
                parent: parent_local,
                geometry,
                override_redirect,
            },
        );

        self.registry.insert(WindowRecord {
            remote_id,
            local_id,
            parent: resolved_parent,
            transient_for: None,
            geometry,
            override_redirect,
            is_mapped: false,
            is_docked: false,
            configure_state: ConfigureState::Idle,
            fullscreen_pseudo_acked: false,
            flags: WindowFlagsState::default(),
            has_frame: false,
        });
        Ok(effects)
    }

    /// `DESTROY`.
    pub fn handle_destroy(&mut self, remote_id: u32) -> Result<Vec<Effect>, Error> {
        let record = self
            .registry
            .remove(remote_id)
            .ok_or(Error::SessionFatal(SessionFatalError::UnknownWindow { window: remote_id }))?;
        self.importer.release(remote_id);
        Ok(vec![Effect::DisplayDestroy { local_id: record.local_id }])
    }

    /// `MAP`: applies the same override-redirect force/notice rule as
    /// `CREATE`, since the guest may request o-r only at map time.
    pub fn handle_map(
        &mut self,
        remote_id: u32,
        transient_for: Option<u32>,
        override_redirect: bool,
    ) -> Result<Vec<Effect>, Error> {
        let local_id = {
            let record = self
                .registry
                .lookup_by_remote(remote_id)
                .ok_or(Error::SessionFatal(SessionFatalError::UnknownWindow { window: remote_id }))?;
            record.local_id
        };
        let (w, h) = {
            let record = self.registry.lookup_by_remote(remote_id).unwrap();
            (record.geometry.w, record.geometry.h)
        };
        let (override_redirect, mut effects) =
            self.force_override_redirect(override_redirect, local_id, w, h);

        let resolved_transient = self.registry.resolve_parent(transient_for);
        let record = self.registry.lookup_by_remote_mut(remote_id).unwrap();
        record.override_redirect = override_redirect;
        record.transient_for = resolved_transient;
        record.is_mapped = true;
        effects.push(Effect::DisplayMap { local_id });
        Ok(effects)
    }

    /// `UNMAP`.
    pub fn handle_unmap(&mut self, remote_id: u32) -> Result<Vec<Effect>, Error> {
        let record = self
            .registry
            .lookup_by_remote_mut(remote_id)
            .ok_or(Error::SessionFatal(SessionFatalError::UnknownWindow { window: remote_id }))?;
        record.is_mapped = false;
        Ok(vec![Effect::DisplayUnmap { local_id: record.local_id }])
    }

    /// A guest-originated `CONFIGURE` (an ack of a prior daemon request, or
    /// the guest informing the daemon of its own geometry change). Per
    /// §4.7: a matching ack in state `Sent` returns to `Idle`; a mismatch
    /// re-emits the request with the daemon's canonical geometry.
    pub fn handle_configure_from_guest(
        &mut self,
        remote_id: u32,
        x: i32,
        y: i32,
        w: u32,
        h: u32,
    ) -> Result<Vec<Effect>, Error> {
        let geometry = sanitize::sanitize_geometry(x, y, w, h);
        let record = self
            .registry
            .lookup_by_remote_mut(remote_id)
            .ok_or(Error::SessionFatal(SessionFatalError::UnknownWindow { window: remote_id }))?;

        match record.configure_state {
            ConfigureState::Sent if record.geometry == geometry => {
                record.configure_state = ConfigureState::Idle;
                Ok(Vec::new())
            }
            ConfigureState::Sent => {
                record.geometry = geometry;
                Ok(vec![
                    Effect::DisplayMoveResize { local_id: record.local_id, geometry },
                    Effect::SendConfigure { window: remote_id, geometry },
                ])
            }
            ConfigureState::Idle => {
                record.geometry = geometry;
                Ok(vec![Effect::DisplayMoveResize { local_id: record.local_id, geometry }])
            }
        }
    }

    /// Host-initiated `CONFIGURE` (e.g. the window manager moved the
    /// mirror): marks the state machine `Sent` and emits the wire message.
    pub fn send_configure_request(&mut self, remote_id: u32, geometry: ValidatedGeometry) -> Result<Vec<Effect>, Error> {
        let record = self
            .registry
            .lookup_by_remote_mut(remote_id)
            .ok_or(Error::SessionFatal(SessionFatalError::UnknownWindow { window: remote_id }))?;
        record.configure_state = ConfigureState::Sent;
        Ok(vec![Effect::SendConfigure { window: remote_id, geometry }])
    }

    /// `WINDOW_FLAGS` from the guest. A `FULLSCREEN` set is rewritten to a
    /// plain maximize unless the configuration allows real fullscreen
    /// (§4.7's pseudo-ack rewrite).
    pub fn handle_window_flags_from_guest(
        &mut self,
        remote_id: u32,
        set: u32,
        unset: u32,
        prompt: &mut dyn OperatorPrompt,
    ) -> Result<Vec<Effect>, Error> {
        let validated = match sanitize::sanitize_window_flags(remote_id, set, unset) {
            Ok(v) => v,
            Err(violation) => return Err(Self::resolve_violation(violation, prompt)),
        };
        let local_id = {
            let record = self
                .registry
                .lookup_by_remote(remote_id)
                .ok_or(Error::SessionFatal(SessionFatalError::UnknownWindow { window: remote_id }))?;
            record.local_id
        };

        let fullscreen_bit = WindowFlag::Fullscreen as u32;
        let wants_fullscreen = validated.set & fullscreen_bit != 0;
        let allow_real = self.config.allow_fullscreen;

        let record = self.registry.lookup_by_remote_mut(remote_id).unwrap();
        if validated.set & WindowFlag::DemandsAttention as u32 != 0 {
            record.flags.demands_attention = true;
        }
        if validated.unset & WindowFlag::DemandsAttention as u32 != 0 {
            record.flags.demands_attention = false;
        }
        if validated.set & WindowFlag::Minimize as u32 != 0 {
            record.flags.minimize = true;
        }
        if validated.unset & WindowFlag::Minimize as u32 != 0 {
            record.flags.minimize = false;
        }

        let mut effects = Vec::new();
        if wants_fullscreen {
            if allow_real {
                record.flags.fullscreen = true;
                effects.push(Effect::SendWindowFlagsAck { window: remote_id, set: fullscreen_bit, unset: 0 });
            } else {
                record.fullscreen_pseudo_acked = true;
                effects.push(Effect::DisplayMaximize { local_id });
            }
        } else if validated.unset & fullscreen_bit != 0 {
            record.flags.fullscreen = false;
            record.fullscreen_pseudo_acked = false;
            effects.push(Effect::SendWindowFlagsAck { window: remote_id, set: 0, unset: fullscreen_bit });
        }
        Ok(effects)
    }

    /// The host window manager's maximize ack, rewritten back to a
    /// `FULLSCREEN` ack for the guest if this window has a pseudo-ack
    /// pending (§4.7's rewrite, completed on the way back).
    pub fn host_maximize_ack(&mut self, remote_id: u32) -> Vec<Effect> {
        let Some(record) = self.registry.lookup_by_remote_mut(remote_id) else {
            return Vec::new();
        };
        if !record.fullscreen_pseudo_acked {
            return Vec::new();
        }
        record.fullscreen_pseudo_acked = false;
        record.flags.fullscreen = true;
        vec![Effect::SendWindowFlagsAck {
            window: remote_id,
            set: WindowFlag::Fullscreen as u32,
            unset: 0,
        }]
    }

    /// `WMNAME`.
    pub fn handle_wmname(&mut self, remote_id: u32, raw: &[u8]) -> Result<Vec<Effect>, Error> {
        let title = sanitize::sanitize_title(raw, self.config.allow_utf8_titles);
        let local_id = self
            .registry
            .lookup_by_remote(remote_id)
            .ok_or(Error::SessionFatal(SessionFatalError::UnknownWindow { window: remote_id }))?
            .local_id;
        let title = if self.config.prefix_titles_with_vmname {
            format!("{}: {}", self.config.name, title)
        } else {
            title
        };
        Ok(vec![Effect::DisplaySetTitle { local_id, title }])
    }

    /// `WMCLASS`.
    pub fn handle_wmclass(&mut self, remote_id: u32, raw: &[u8]) -> Result<Vec<Effect>, Error> {
        let class = sanitize::sanitize_title(raw, self.config.allow_utf8_titles);
        let local_id = self
            .registry
            .lookup_by_remote(remote_id)
            .ok_or(Error::SessionFatal(SessionFatalError::UnknownWindow { window: remote_id }))?
            .local_id;
        Ok(vec![Effect::DisplaySetClass { local_id, class }])
    }

    /// `CURSOR`.
    pub fn handle_cursor(
        &mut self,
        remote_id: u32,
        cursor: u32,
        prompt: &mut dyn OperatorPrompt,
    ) -> Result<Vec<Effect>, Error> {
        let cursor = match sanitize::verify_cursor(remote_id, cursor) {
            Ok(c) => c,
            Err(violation) => return Err(Self::resolve_violation(violation, prompt)),
        };
        let local_id = self
            .registry
            .lookup_by_remote(remote_id)
            .ok_or(Error::SessionFatal(SessionFatalError::UnknownWindow { window: remote_id }))?
            .local_id;
        Ok(vec![Effect::DisplaySetCursor { local_id, cursor }])
    }

    /// `DOCK` (tray icon docking request).
    pub fn handle_dock(&mut self, remote_id: u32) -> Result<Vec<Effect>, Error> {
        let record = self
            .registry
            .lookup_by_remote_mut(remote_id)
            .ok_or(Error::SessionFatal(SessionFatalError::UnknownWindow { window: remote_id }))?;
        record.is_docked = true;
        Ok(vec![Effect::DisplayDock { local_id: record.local_id }])
    }

    /// `MFNDUMP`/`SHMIMAGE`: imports the shared frame, updating
    /// `has_frame` only on success. The cross-check failure (§8 scenario 6)
    /// is session-fatal and is checked *before* anything else runs, per
    /// [`sanitize::verify_mfndump_bounds`]'s contract.
    pub fn handle_frame_import(
        &mut self,
        remote_id: u32,
        width: u32,
        height: u32,
        off: u32,
        source: FrameSource,
        domid: u16,
        lock: &mut dyn InterViewerLock,
        display: &mut dyn DisplayServerAttach,
    ) -> Result<Vec<Effect>, Error> {
        if let Err(violation) =
            sanitize::verify_mfndump_bounds(remote_id, width, height, vmgui_proto::FRAME_BPP, off, source.count() as u32)
        {
            return Err(Error::SessionFatal(SessionFatalError::GuestTerminated { window: violation.window }));
        }
        if self.registry.lookup_by_remote(remote_id).is_none() {
            return Err(Error::SessionFatal(SessionFatalError::UnknownWindow { window: remote_id }));
        }
        match self.importer.import(remote_id, source, domid, lock, display) {
            Ok(_handle) => {
                self.registry.lookup_by_remote_mut(remote_id).unwrap().has_frame = true;
                Ok(Vec::new())
            }
            Err(e) => Err(Error::Recoverable(e)),
        }
    }

    /// `CLIPBOARD_REQ` from the guest (a request to read the current host
    /// clipboard into the guest).
    pub fn handle_clipboard_req(&mut self, remote_id: u32) -> Vec<Effect> {
        self.clipboard.request_sent();
        vec![Effect::SendClipboardReq { window: remote_id }]
    }

    /// `CLIPBOARD_DATA` from the guest (a copy).
    pub fn handle_clipboard_data(
        &mut self,
        raw: &[u8],
        source_vm: String,
        timestamp: u32,
    ) -> Result<Vec<Effect>, Error> {
        self.clipboard
            .receive_copy(raw, source_vm, timestamp)
            .map_err(Error::Recoverable)?;
        Ok(Vec::new())
    }

    /// A host-side paste request (e.g. a configured accelerator fired in
    /// some other VM's mirrored window), targeting `remote_id`'s guest.
    pub fn try_paste_into(
        &mut self,
        remote_id: u32,
        event_timestamp: u32,
        dest_vm: &str,
        policy: &mut dyn PolicyOracle,
    ) -> Vec<Effect> {
        match self.clipboard.try_paste(event_timestamp, dest_vm, policy) {
            Some(data) => vec![Effect::DeliverClipboardData { window: remote_id, data }],
            None => Vec::new(),
        }
    }
}

/// Whether a sibling window sitting just below a newly-mapped
/// override-redirect window is (by window class) a configured screensaver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SiblingInfo {
    pub local_id: LocalId,
    pub is_screensaver: bool,
}

/// Where the newly-mapped override-redirect window should be restacked to
/// (§4.7: "placed just above [the screensaver], not necessarily on top of
/// everything").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestackTarget {
    /// No screensaver sibling found; stack on top as usual.
    Top,
    /// Stack directly above this sibling.
    AboveSibling(LocalId),
}

/// Pure restacking decision (§4.7, §9): scans siblings from the bottom of
/// the stack upward and targets the lowest screensaver found, so the new
/// window covers the screensaver without also covering unrelated windows
/// stacked above it.
pub fn screensaver_restack_target(siblings_bottom_to_top: &[SiblingInfo]) -> RestackTarget {
    for sibling in siblings_bottom_to_top {
        if sibling.is_screensaver {
            return RestackTarget::AboveSibling(sibling.local_id);
        }
    }
    RestackTarget::Top
}

/// Clamps an override-redirect window's geometry so at least a
/// `border`-pixel strip remains on screen, unless the window lies entirely
/// off-screen to begin with (§4.7's force-on-screen rule).
pub fn force_on_screen(root_w: u32, root_h: u32, geometry: ValidatedGeometry, border: i32) -> ValidatedGeometry {
    let w = geometry.w as i32;
    let h = geometry.h as i32;
    if geometry.x + w <= 0 || geometry.y + h <= 0 || geometry.x >= root_w as i32 || geometry.y >= root_h as i32 {
        return geometry;
    }
    let max_x = root_w as i32 - border;
    let max_y = root_h as i32 - border;
    let min_x = border - w;
    let min_y = border - h;
    ValidatedGeometry {
        x: geometry.x.clamp(min_x, max_x),
        y: geometry.y.clamp(min_y, max_y),
        w: geometry.w,
        h: geometry.h,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::FixedPolicy;
    use crate::config::{Config, OverrideRedirectPolicy};
    use crate::frame::{DisplayServerAttach, InterViewerLock};
    use crate::sanitize::FixedAnswer;
    use crate::tray::TrayMode;
    use std::io;

    fn config() -> Config {
        Config {
            domain: 5,
            name: "work".to_owned(),
            target_domain: 5,
            frame_color: None,
            label_index: 0,
            icon: None,
            log_level: tracing::Level::INFO,
            invisible: false,
            out_of_band_clipboard: false,
            prefix_titles_with_vmname: false,
            trayicon_mode: TrayMode::Background,
            screensaver_names: Vec::new(),
            override_redirect: OverrideRedirectPolicy::Allow,
            override_redirect_max_percent: 90,
            allow_utf8_titles: true,
            allow_fullscreen: false,
        }
    }

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

    #[test]
    fn create_then_map_then_destroy_round_trips_the_registry() {
        let mut daemon = Daemon::new(config());
        let mut prompt = FixedAnswer(OperatorDecision::Ignore);
        daemon
            .handle_create(1, None, 0, 0, 100, 100, false, &mut prompt)
            .unwrap();
        assert_eq!(daemon.registry.len(), 1);
        daemon.handle_map(1, None, false).unwrap();
        assert!(daemon.registry.lookup_by_remote(1).unwrap().is_mapped);
        daemon.handle_destroy(1).unwrap();
        assert_eq!(daemon.registry.len(), 0);
    }

    #[test]
    fn duplicate_create_is_session_fatal() {
        let mut daemon = Daemon::new(config());
        let mut prompt = FixedAnswer(OperatorDecision::Ignore);
        daemon
            .handle_create(1, None, 0, 0, 100, 100, false, &mut prompt)
            .unwrap();
        let err = daemon.handle_create(1, None, 0, 0, 100, 100, false, &mut prompt);
        assert!(matches!(
            err,
            Err(Error::SessionFatal(SessionFatalError::DuplicateWindow { window: 1 }))
        ));
    }

    #[test]
    fn zero_area_create_ignored_leaves_no_window() {
        let mut daemon = Daemon::new(config());
        let mut prompt = FixedAnswer(OperatorDecision::Ignore);
        let err = daemon.handle_create(1, None, 0, 0, 0, 100, false, &mut prompt);
        assert!(err.is_err());
        assert_eq!(daemon.registry.len(), 0);
    }

    #[test]
    fn oversized_override_redirect_is_capped_once() {
        let mut daemon = Daemon::new(config());
        daemon.set_root_size(1920, 1080);
        let mut prompt = FixedAnswer(OperatorDecision::Ignore);
        let effects = daemon
            .handle_create(1, None, 0, 0, 1920, 1080, true, &mut prompt)
            .unwrap();
        assert!(!daemon.registry.lookup_by_remote(1).unwrap().override_redirect);
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::NotifyOverrideRedirectCapped { .. })));

        let effects2 = daemon
            .handle_create(2, None, 0, 0, 1920, 1080, true, &mut prompt)
            .unwrap();
        assert!(!effects2
            .iter()
            .any(|e| matches!(e, Effect::NotifyOverrideRedirectCapped { .. })));
    }

    #[test]
    fn configure_ack_matching_geometry_returns_to_idle() {
        let mut daemon = Daemon::new(config());
        let mut prompt = FixedAnswer(OperatorDecision::Ignore);
        daemon
            .handle_create(1, None, 0, 0, 100, 100, false, &mut prompt)
            .unwrap();
        let geometry = ValidatedGeometry { x: 10, y: 10, w: 200, h: 200 };
        daemon.send_configure_request(1, geometry).unwrap();
        assert_eq!(
            daemon.registry.lookup_by_remote(1).unwrap().configure_state,
            ConfigureState::Sent
        );
        let effects = daemon.handle_configure_from_guest(1, 10, 10, 200, 200).unwrap();
        assert!(effects.is_empty());
        assert_eq!(
            daemon.registry.lookup_by_remote(1).unwrap().configure_state,
            ConfigureState::Idle
        );
    }

    #[test]
    fn configure_ack_mismatch_reissues_the_request() {
        let mut daemon = Daemon::new(config());
        let mut prompt = FixedAnswer(OperatorDecision::Ignore);
        daemon
            .handle_create(1, None, 0, 0, 100, 100, false, &mut prompt)
            .unwrap();
        let geometry = ValidatedGeometry { x: 10, y: 10, w: 200, h: 200 };
        daemon.send_configure_request(1, geometry).unwrap();
        let effects = daemon.handle_configure_from_guest(1, 0, 0, 50, 50).unwrap();
        assert!(effects.iter().any(|e| matches!(e, Effect::SendConfigure { .. })));
        assert_eq!(
            daemon.registry.lookup_by_remote(1).unwrap().configure_state,
            ConfigureState::Sent
        );
    }

    #[test]
    fn fullscreen_request_is_rewritten_to_maximize_by_default() {
        let mut daemon = Daemon::new(config());
        let mut prompt = FixedAnswer(OperatorDecision::Ignore);
        daemon
            .handle_create(1, None, 0, 0, 100, 100, false, &mut prompt)
            .unwrap();
        let effects = daemon
            .handle_window_flags_from_guest(1, WindowFlag::Fullscreen as u32, 0, &mut prompt)
            .unwrap();
        assert!(effects.iter().any(|e| matches!(e, Effect::DisplayMaximize { .. })));
        assert!(daemon.registry.lookup_by_remote(1).unwrap().fullscreen_pseudo_acked);

        let ack_effects = daemon.host_maximize_ack(1);
        assert!(ack_effects.iter().any(
            |e| matches!(e, Effect::SendWindowFlagsAck { set, .. } if *set == WindowFlag::Fullscreen as u32)
        ));
        assert!(daemon.registry.lookup_by_remote(1).unwrap().flags.fullscreen);
    }

    #[test]
    fn fullscreen_request_is_honored_when_allowed() {
        let mut cfg = config();
        cfg.allow_fullscreen = true;
        let mut daemon = Daemon::new(cfg);
        let mut prompt = FixedAnswer(OperatorDecision::Ignore);
        daemon
            .handle_create(1, None, 0, 0, 100, 100, false, &mut prompt)
            .unwrap();
        let effects = daemon
            .handle_window_flags_from_guest(1, WindowFlag::Fullscreen as u32, 0, &mut prompt)
            .unwrap();
        assert!(effects.iter().any(|e| matches!(e, Effect::SendWindowFlagsAck { .. })));
        assert!(daemon.registry.lookup_by_remote(1).unwrap().flags.fullscreen);
        assert!(!daemon.registry.lookup_by_remote(1).unwrap().fullscreen_pseudo_acked);
    }

    #[test]
    fn unknown_window_operations_are_session_fatal() {
        let mut daemon = Daemon::new(config());
        let err = daemon.handle_unmap(42);
        assert!(matches!(
            err,
            Err(Error::SessionFatal(SessionFatalError::UnknownWindow { window: 42 }))
        ));
    }

    #[test]
    fn mfndump_bound_violation_is_session_fatal_without_mutating_the_registry() {
        let mut daemon = Daemon::new(config());
        let mut prompt = FixedAnswer(OperatorDecision::Ignore);
        daemon
            .handle_create(1, None, 0, 0, 4096, 4096, false, &mut prompt)
            .unwrap();
        let mut lock = NoopLock;
        let mut display = AlwaysAttach;
        let source = FrameSource::GrantRefs { refs: vec![1] };
        let err = daemon.handle_frame_import(1, 4096, 4096, 0, source, 7, &mut lock, &mut display);
        assert!(err.is_err());
        assert!(!daemon.registry.lookup_by_remote(1).unwrap().has_frame);
    }

    #[test]
    fn clipboard_copy_then_policy_denied_paste_drops_silently() {
        let mut daemon = Daemon::new(config());
        daemon.handle_clipboard_req(1);
        daemon
            .handle_clipboard_data(b"secret", "source-vm".to_owned(), 1000)
            .unwrap();
        let mut policy = FixedPolicy(false);
        let effects = daemon.try_paste_into(1, 1001, "dest-vm", &mut policy);
        assert!(effects.is_empty());
    }

    #[test]
    fn clipboard_copy_then_allowed_paste_delivers_data() {
        let mut daemon = Daemon::new(config());
        daemon.handle_clipboard_req(1);
        daemon
            .handle_clipboard_data(b"secret", "source-vm".to_owned(), 1000)
            .unwrap();
        let mut policy = FixedPolicy(true);
        let effects = daemon.try_paste_into(1, 1001, "dest-vm", &mut policy);
        assert!(matches!(&effects[..], [Effect::DeliverClipboardData { data, .. }] if data == b"secret"));
    }

    #[test]
    fn screensaver_restack_targets_the_lowest_screensaver_sibling() {
        let siblings = [
            SiblingInfo { local_id: 1, is_screensaver: false },
            SiblingInfo { local_id: 2, is_screensaver: true },
            SiblingInfo { local_id: 3, is_screensaver: false },
        ];
        assert_eq!(screensaver_restack_target(&siblings), RestackTarget::AboveSibling(2));
    }

    #[test]
    fn no_screensaver_sibling_stacks_on_top() {
        let siblings = [SiblingInfo { local_id: 1, is_screensaver: false }];
        assert_eq!(screensaver_restack_target(&siblings), RestackTarget::Top);
    }

    #[test]
    fn force_on_screen_clamps_a_window_dragged_past_the_edge() {
        let geometry = ValidatedGeometry { x: 1900, y: 10, w: 100, h: 100 };
        let clamped = force_on_screen(1920, 1080, geometry, 1);
        assert_eq!(clamped.x, 1919);
    }

    #[test]
    fn force_on_screen_leaves_a_fully_offscreen_window_untouched() {
        let geometry = ValidatedGeometry { x: -500, y: -500, w: 100, h: 100 };
        let clamped = force_on_screen(1920, 1080, geometry, 1);
        assert_eq!(clamped, geometry);
    }
}
