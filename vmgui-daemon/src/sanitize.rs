//! Input Sanitizer (§4.5): validates every untrusted field from the guest
//! *before* any `WindowRecord` is touched.
//!
//! Two kinds of rule exist here:
//!
//! - Plain normalization (geometry clamping, WMNAME/WMCLASS byte
//!   replacement) always succeeds and produces a validated value.
//! - "VERIFY" checks (§4.5, §7 category 3) can fail; a failure is reported
//!   as a [`VerifyViolation`] rather than applied, and the caller resolves
//!   it via the operator Terminate/Ignore dialog (a collaborator, modeled
//!   here as the [`OperatorPrompt`] trait) before deciding what to do next.
//!
//! REDESIGN FLAG R2: every function in this module takes untrusted input
//! and returns either a fully-formed owned value or an error — never a
//! partially-applied mutation. Callers in `eventloop` only write the result
//! into a `WindowRecord` after a `Result::Ok` (or, for a VERIFY failure
//! resolved as "ignore", after doing nothing at all).

use vmgui_proto::{MAX_WINDOW_HEIGHT, MAX_WINDOW_WIDTH};

/// A VERIFY-class check failed on a message targeting `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyViolation {
    /// The window the offending message targeted.
    pub window: u32,
    /// Human-readable name of the check that failed, used in the operator
    /// dialog and the log line (§10.1: errors carry enough context to log
    /// without re-deriving it from the wire bytes).
    pub field: &'static str,
}

/// The operator's resolution of a [`VerifyViolation`] (§4.5, §7 category 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorDecision {
    /// Kill the guest via the external `qvm-kill` helper and exit.
    Terminate,
    /// Drop the offending message; the session continues unmodified.
    Ignore,
}

/// Presents the Terminate/Ignore choice to the operator.  A collaborator:
/// the real implementation shells out to `kdialog`/`zenity` (§9); this
/// crate only depends on the interface, so tests can supply a fixed answer.
pub trait OperatorPrompt {
    /// Asks whether to terminate the guest after `violation`.
    fn ask(&mut self, violation: VerifyViolation) -> OperatorDecision;
}

/// An [`OperatorPrompt`] that always answers the same way; used in tests
/// and anywhere a non-interactive policy (e.g. `--verify-always-terminate`)
/// is configured.
pub struct FixedAnswer(pub OperatorDecision);

impl OperatorPrompt for FixedAnswer {
    fn ask(&mut self, _violation: VerifyViolation) -> OperatorDecision {
        self.0
    }
}

/// A window geometry that has passed clamping (§3's `WindowRecord::geometry`
/// bounds: `w,h ≤ MAX_W,MAX_H`, `|x|,|y| ≤ MAX_W,MAX_H`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedGeometry {
    /// X coordinate.
    pub x: i32,
    /// Y coordinate.
    pub y: i32,
    /// Width, in pixels.
    pub w: u32,
    /// Height, in pixels.
    pub h: u32,
}

/// Clamps an untrusted geometry to the bounds in §3.  This never fails: out
/// of range values are clamped, not rejected, matching the plain
/// normalization rules of §4.5 (width/height, x/y).
pub fn sanitize_geometry(x: i32, y: i32, w: u32, h: u32) -> ValidatedGeometry {
    let max_x = MAX_WINDOW_WIDTH as i32;
    let max_y = MAX_WINDOW_HEIGHT as i32;
    ValidatedGeometry {
        x: x.clamp(-max_x, max_x),
        y: y.clamp(-max_y, max_y),
        w: w.min(MAX_WINDOW_WIDTH),
        h: h.min(MAX_WINDOW_HEIGHT),
    }
}

/// VERIFY: a `CREATE`'s width and height must both be nonzero (a zero-area
/// window is nonsensical and, in the original implementation, a sign of a
/// confused or hostile guest).
pub fn verify_nonzero_dimensions(window: u32, w: u32, h: u32) -> Result<(), VerifyViolation> {
    if w == 0 || h == 0 {
        Err(VerifyViolation {
            window,
            field: "create.width/height nonzero",
        })
    } else {
        Ok(())
    }
}

/// A validated, disjoint `WINDOW_FLAGS` set/unset pair (§4.5: `flags_set ∩
/// flags_unset` must be empty; unknown bits are stripped).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ValidatedWindowFlags {
    /// Flags to set, restricted to bits this daemon recognizes.
    pub set: u32,
    /// Flags to unset, restricted to bits this daemon recognizes.
    pub unset: u32,
}

const KNOWN_WINDOW_FLAG_BITS: u32 = vmgui_proto::WindowFlag::Fullscreen as u32
    | vmgui_proto::WindowFlag::DemandsAttention as u32
    | vmgui_proto::WindowFlag::Minimize as u32;

/// VERIFY: `set` and `unset` must be disjoint; unknown bits are silently
/// stripped from both (stripping is plain normalization, the disjointness
/// check is VERIFY).
pub fn sanitize_window_flags(
    window: u32,
    set: u32,
    unset: u32,
) -> Result<ValidatedWindowFlags, VerifyViolation> {
    let set = set & KNOWN_WINDOW_FLAG_BITS;
    let unset = unset & KNOWN_WINDOW_FLAG_BITS;
    if set & unset != 0 {
        return Err(VerifyViolation {
            window,
            field: "window_flags.set ∩ unset == ∅",
        });
    }
    Ok(ValidatedWindowFlags { set, unset })
}

/// VERIFY: a `CURSOR` id must be [`vmgui_proto::CURSOR_DEFAULT`] or an
/// X11-style glyph request (`CURSOR_X11` bit set) with an index below
/// [`vmgui_proto::CURSOR_X11_MAX`].
pub fn verify_cursor(window: u32, cursor: u32) -> Result<u32, VerifyViolation> {
    if cursor == vmgui_proto::CURSOR_DEFAULT {
        return Ok(cursor);
    }
    if cursor & vmgui_proto::CURSOR_X11 != 0 {
        let index = cursor & !vmgui_proto::CURSOR_X11;
        if index < vmgui_proto::CURSOR_X11_MAX {
            return Ok(cursor);
        }
    }
    Err(VerifyViolation {
        window,
        field: "cursor.id valid",
    })
}

/// Replaces every byte outside `{0x20..=0x7E}` with `_`, honoring a
/// configured allowance for UTF-8 (§4.5: "If UTF-8 is permitted by config,
/// accept byte sequences forming exactly one valid UTF-8 scalar per decode
/// step ... otherwise replace"). This never fails: it always produces a
/// printable string, truncated to `data`'s declared length.
pub fn sanitize_title(data: &[u8], allow_utf8: bool) -> String {
    let nul = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    let data = &data[..nul];
    if allow_utf8 {
        sanitize_utf8_or_replace(data)
    } else {
        data.iter()
            .map(|&b| if (0x20..=0x7E).contains(&b) { b as char } else { '_' })
            .collect()
    }
}

fn sanitize_utf8_or_replace(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        match std::str::from_utf8(&data[i..]) {
            Ok(rest) => {
                out.push_str(rest);
                break;
            }
            Err(e) => {
                let valid_up_to = e.valid_up_to();
                // SAFETY: `from_utf8` guarantees `data[i..i+valid_up_to]` is valid UTF-8.
                out.push_str(unsafe {
                    std::str::from_utf8_unchecked(&data[i..i + valid_up_to])
                });
                let skip = e.error_len().unwrap_or(1).max(1);
                out.push('_');
                i += valid_up_to + skip;
            }
        }
    }
    out
}

/// VERIFY: MFNDUMP's page count must be nonzero, within bound, and
/// consistent with the declared geometry (§4.5's cross-check:
/// `(4·w·h + off + PAGE-1) / PAGE > num_mfn ⇒ fatal`).  Unlike the other
/// checks in this module, the cross-check failure is session-fatal in the
/// original design (processing must abort *before* reading the MFN array
/// at all, per §8 scenario 6), so this returns a plain error rather than
/// going through the operator dialog.
pub fn verify_mfndump_bounds(
    window: u32,
    width: u32,
    height: u32,
    bpp: u32,
    off: u32,
    num_mfn: u32,
) -> Result<(), VerifyViolation> {
    let _ = bpp; // historically unchecked; kept as a named, ignored parameter for clarity
    if num_mfn == 0 || num_mfn > vmgui_proto::MAX_MFN_COUNT {
        return Err(VerifyViolation {
            window,
            field: "mfndump.num_mfn bound",
        });
    }
    if width > MAX_WINDOW_WIDTH || height > MAX_WINDOW_HEIGHT {
        return Err(VerifyViolation {
            window,
            field: "mfndump.width/height bound",
        });
    }
    if off >= vmgui_proto::PAGE_SIZE {
        return Err(VerifyViolation {
            window,
            field: "mfndump.off < PAGE_SIZE",
        });
    }
    let required = (4u64 * width as u64 * height as u64 + off as u64
        + vmgui_proto::PAGE_SIZE as u64
        - 1)
        / vmgui_proto::PAGE_SIZE as u64;
    if required > num_mfn as u64 {
        return Err(VerifyViolation {
            window,
            field: "mfndump.num_mfn consistent with geometry",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_clamps_rather_than_rejects() {
        let g = sanitize_geometry(-100_000, 100_000, u32::MAX, u32::MAX);
        assert_eq!(g.x, -(MAX_WINDOW_WIDTH as i32));
        assert_eq!(g.y, MAX_WINDOW_HEIGHT as i32);
        assert_eq!(g.w, MAX_WINDOW_WIDTH);
        assert_eq!(g.h, MAX_WINDOW_HEIGHT);
    }

    #[test]
    fn window_flags_reject_overlap() {
        assert!(sanitize_window_flags(1, 0b01, 0b01).is_err());
    }

    #[test]
    fn window_flags_strip_unknown_bits() {
        let f = sanitize_window_flags(1, 1 << 30, 0).unwrap();
        assert_eq!(f.set, 0);
    }

    #[test]
    fn cursor_default_is_always_valid() {
        assert!(verify_cursor(1, vmgui_proto::CURSOR_DEFAULT).is_ok());
    }

    #[test]
    fn cursor_x11_out_of_range_is_rejected() {
        let bad = vmgui_proto::CURSOR_X11 | vmgui_proto::CURSOR_X11_MAX;
        assert!(verify_cursor(1, bad).is_err());
    }

    #[test]
    fn title_fragmented_by_control_bytes() {
        let mut data = [0u8; 128];
        data[0] = b'h';
        data[1] = 0x01;
        data[2] = b'i';
        assert_eq!(sanitize_title(&data, false), "h_i");
    }

    #[test]
    fn title_replaces_high_bytes_when_utf8_disabled() {
        let mut data = [0u8; 128];
        data[0] = 0xff;
        data[1] = b'x';
        assert_eq!(sanitize_title(&data, false), "_x");
    }

    #[test]
    fn mfndump_bound_is_enforced() {
        assert!(verify_mfndump_bounds(1, 100, 100, 24, 0, vmgui_proto::MAX_MFN_COUNT + 1).is_err());
    }

    #[test]
    fn mfndump_cross_check_catches_too_few_pages() {
        // A 4096x4096 (clamped elsewhere, but exercised directly here)
        // frame needs far more than one page.
        assert!(verify_mfndump_bounds(1, 4096, 4096, 24, 0, 1).is_err());
    }

    #[test]
    fn mfndump_accepts_a_consistent_declaration() {
        assert!(verify_mfndump_bounds(1, 16, 16, 24, 0, 1).is_ok());
    }
}
