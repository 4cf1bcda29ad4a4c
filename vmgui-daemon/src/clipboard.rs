//! Clipboard Broker (§4.8): a single process-wide, file-backed clipboard
//! slot shared by every daemon instance, guarded against races by a
//! monotonic timestamp rather than a transfer protocol.
//!
//! Two transport paths exist (in-band over `CLIPBOARD_REQ`/`CLIPBOARD_DATA`,
//! or out-of-band via a helper process); this module implements the state
//! machine common to both and leaves the actual byte transport, and the
//! dom0-side policy oracle, as collaborators (§1).

use vmgui_proto::MAX_CLIPBOARD_SIZE;

use crate::error::RecoverableError;

/// Modifier bit for `Control`.
pub const MOD_CONTROL: u32 = 1 << 0;
/// Modifier bit for `Shift`.
pub const MOD_SHIFT: u32 = 1 << 1;
/// Modifier bit for `Alt`/`Mod1`.
pub const MOD_ALT: u32 = 1 << 2;
/// Modifier bit for `Super`/`Mod4`.
pub const MOD_SUPER: u32 = 1 << 3;

/// A parsed `(mod_mask, keysym)` accelerator, as described in §4.8/§9:
/// parsed once at startup from a configuration string, then checked
/// against every incoming `KeyPress` before it is forwarded to the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accelerator {
    /// Bitwise OR of the `MOD_*` constants.
    pub mod_mask: u32,
    /// The keysym (or, for the common case, the plain ASCII code of the
    /// key) this accelerator fires on.
    pub keysym: u32,
}

/// Parses one accelerator from a hyphen-separated spec such as
/// `"ctrl-shift-c"`: every token but the last is a modifier name
/// (`ctrl`/`shift`/`alt`/`super`, case-insensitive); the last token is
/// either a single ASCII character or a decimal keysym value.
pub fn parse_accelerator(spec: &str) -> Option<Accelerator> {
    let mut tokens: Vec<&str> = spec.split('-').filter(|t| !t.is_empty()).collect();
    let key_token = tokens.pop()?;
    let mut mod_mask = 0u32;
    for token in tokens {
        mod_mask |= match token.to_ascii_lowercase().as_str() {
            "ctrl" | "control" => MOD_CONTROL,
            "shift" => MOD_SHIFT,
            "alt" | "mod1" => MOD_ALT,
            "super" | "mod4" => MOD_SUPER,
            _ => return None,
        };
    }
    let keysym = if let Ok(n) = key_token.parse::<u32>() {
        n
    } else {
        let mut chars = key_token.chars();
        let c = chars.next()?;
        if chars.next().is_some() {
            return None;
        }
        c as u32
    };
    Some(Accelerator { mod_mask, keysym })
}

/// Returns whether an incoming `(mod_mask, keysym)` key event matches
/// either the configured copy or paste accelerator, per §4.8/§9: "the host
/// key-event handler checks an incoming KeyPress against both pairs before
/// forwarding it".
pub fn matches_accelerator(accel: Accelerator, mod_mask: u32, keysym: u32) -> bool {
    accel.mod_mask == mod_mask && accel.keysym == keysym
}

/// Allows or denies a clipboard transfer between two VMs. A collaborator:
/// the real implementation talks to a dom0-side UNIX socket or a helper
/// invocation (§4.8).
pub trait PolicyOracle {
    /// Returns whether a paste from `source_vm` into `dest_vm` is allowed.
    fn allow(&mut self, source_vm: &str, dest_vm: &str) -> bool;
}

/// An always-allow/always-deny [`PolicyOracle`] for tests and for a
/// `--no-clipboard-policy` escape hatch.
pub struct FixedPolicy(pub bool);

impl PolicyOracle for FixedPolicy {
    fn allow(&mut self, _source_vm: &str, _dest_vm: &str) -> bool {
        self.0
    }
}

/// The single, process-wide clipboard slot (§3's `ClipboardSlot`).
#[derive(Debug, Default)]
pub struct ClipboardSlot {
    data: Vec<u8>,
    source_vm: Option<String>,
    /// Timestamp (ms, wrapping 32-bit) of the triggering key event at last
    /// mutation.
    timestamp: u32,
}

impl ClipboardSlot {
    /// Overwrites the slot (a `COPY`). `data` is truncated to
    /// [`MAX_CLIPBOARD_SIZE`] if needed; the real sender is expected to
    /// respect the limit already (it is also enforced by the wire codec's
    /// per-type maxima), but this never panics on oversized input.
    pub fn copy(&mut self, data: &[u8], source_vm: String, timestamp: u32) {
        let n = data.len().min(MAX_CLIPBOARD_SIZE as usize);
        self.data = data[..n].to_vec();
        self.source_vm = Some(source_vm);
        self.timestamp = timestamp;
    }

    /// Truncates the slot and clears its source, as happens after a
    /// successful paste (§3: "consumed by PASTE, truncated on read by
    /// destination").
    pub fn clear(&mut self) {
        self.data.clear();
        self.source_vm = None;
    }

    /// Current contents, without consuming them.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The VM that last wrote to the slot, if any.
    pub fn source_vm(&self) -> Option<&str> {
        self.source_vm.as_deref()
    }
}

/// Whether a paste with `event_timestamp` against a slot last mutated at
/// `file_timestamp` is fresh (§3, §4.8, §8): fresh iff
/// `event_timestamp - file_timestamp` (wrapping 32-bit subtraction) lies in
/// `[1, 2^31)`. A difference of exactly `0` means the event is the copy
/// itself (or concurrent with it) and is treated as stale, matching the
/// "strictly later" framing of the §8 round-trip property.
pub fn is_fresh(file_timestamp: u32, event_timestamp: u32) -> bool {
    let diff = event_timestamp.wrapping_sub(file_timestamp);
    (1..(1u32 << 31)).contains(&diff)
}

/// The clipboard broker: the slot, plus the single in-flight-request
/// invariant (§4.8: "at most one in-flight `clipboard_requested` per
/// daemon").
#[derive(Debug, Default)]
pub struct ClipboardBroker {
    slot: ClipboardSlot,
    request_pending: bool,
}

impl ClipboardBroker {
    /// Records that a `CLIPBOARD_REQ` was just sent to the guest.
    pub fn request_sent(&mut self) {
        self.request_pending = true;
    }

    /// Handles an incoming `CLIPBOARD_DATA` from the guest (a `COPY`).
    /// Dropped with [`RecoverableError::UnmatchedClipboardData`] if no
    /// request is pending (§4.8's invariant).
    pub fn receive_copy(
        &mut self,
        data: &[u8],
        source_vm: String,
        timestamp: u32,
    ) -> Result<(), RecoverableError> {
        if !self.request_pending {
            return Err(RecoverableError::UnmatchedClipboardData);
        }
        self.request_pending = false;
        self.slot.copy(data, source_vm, timestamp);
        Ok(())
    }

    /// Attempts a paste into `dest_vm` triggered by a key event at
    /// `event_timestamp`. Returns the slot's bytes (and clears it) only if
    /// the event is fresh (§8) *and* the policy oracle allows the
    /// transfer; otherwise the attempt is silently dropped (§4.8: "Denied
    /// ⇒ silently drop").
    pub fn try_paste(
        &mut self,
        event_timestamp: u32,
        dest_vm: &str,
        policy: &mut dyn PolicyOracle,
    ) -> Option<Vec<u8>> {
        let source_vm = self.slot.source_vm()?.to_owned();
        if !is_fresh(self.slot.timestamp, event_timestamp) {
            return None;
        }
        if !policy.allow(&source_vm, dest_vm) {
            return None;
        }
        let data = self.slot.data().to_vec();
        self.slot.clear();
        Some(data)
    }

    /// The slot, for read-only inspection (tests, status reporting).
    pub fn slot(&self) -> &ClipboardSlot {
        &self.slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_then_fresh_allowed_paste_round_trips_and_clears() {
        let mut broker = ClipboardBroker::default();
        broker.request_sent();
        broker
            .receive_copy(b"HELLO", "source-vm".to_owned(), 1000)
            .unwrap();
        let mut policy = FixedPolicy(true);
        let pasted = broker.try_paste(1001, "dest-vm", &mut policy).unwrap();
        assert_eq!(pasted, b"HELLO");
        assert!(broker.slot().data().is_empty());
        assert!(broker.slot().source_vm().is_none());
    }

    #[test]
    fn policy_denied_paste_leaves_the_slot_untouched() {
        let mut broker = ClipboardBroker::default();
        broker.request_sent();
        broker
            .receive_copy(b"HELLO", "source-vm".to_owned(), 1000)
            .unwrap();
        let mut policy = FixedPolicy(false);
        assert!(broker.try_paste(1001, "dest-vm", &mut policy).is_none());
        assert_eq!(broker.slot().data(), b"HELLO");
    }

    #[test]
    fn unmatched_clipboard_data_is_dropped() {
        let mut broker = ClipboardBroker::default();
        let err = broker.receive_copy(b"HELLO", "source-vm".to_owned(), 1000);
        assert!(matches!(err, Err(RecoverableError::UnmatchedClipboardData)));
    }

    #[test]
    fn staleness_window_matches_spec() {
        assert!(!is_fresh(1000, 1000));
        assert!(is_fresh(1000, 1001));
        assert!(is_fresh(1000, 1000u32.wrapping_add((1u32 << 31) - 1)));
        assert!(!is_fresh(1000, 1000u32.wrapping_add(1u32 << 31)));
    }

    #[test]
    fn accelerator_parses_modifiers_and_ascii_key() {
        let a = parse_accelerator("ctrl-shift-c").unwrap();
        assert_eq!(a.mod_mask, MOD_CONTROL | MOD_SHIFT);
        assert_eq!(a.keysym, b'c' as u32);
    }

    #[test]
    fn accelerator_accepts_numeric_keysym() {
        let a = parse_accelerator("ctrl-65").unwrap();
        assert_eq!(a.keysym, 65);
    }

    #[test]
    fn unknown_modifier_rejects_the_spec() {
        assert!(parse_accelerator("hyper-c").is_none());
    }

    proptest::proptest! {
        /// §8's staleness property: a paste is fresh iff the wrapping
        /// difference lands in `[1, 2^31)`, for any pair of 32-bit
        /// timestamps, not just the boundary values exercised above.
        #[test]
        fn freshness_matches_the_wrapping_difference_window(file_ts: u32, event_ts: u32) {
            let diff = event_ts.wrapping_sub(file_ts);
            let expected = (1..(1u32 << 31)).contains(&diff);
            proptest::prop_assert_eq!(is_fresh(file_ts, event_ts), expected);
        }
    }
}
