//! CLI entrypoint: parses configuration, opens the ring connection to the
//! named guest domain, and drives the event loop until the session ends or
//! a process-fatal error occurs (§6, §7).
//!
//! Detecting the host's actual root window size/depth and talking to the
//! real display server are collaborator concerns out of scope for this
//! crate (§1); this binary stands in a fixed root configuration so the
//! wire handshake itself is exercised end to end.

use std::fs;
use std::mem::size_of;
use std::process::ExitCode;
use std::task::Poll;

use clap::Parser;

use vmgui_daemon::config::{CliArgs, Config, FileConfig};
use vmgui_daemon::error::SessionFatalError;
use vmgui_daemon::frame::{DisplayServerAttach, FileLock, FrameSource, InterViewerLock};
use vmgui_daemon::sanitize::{FixedAnswer, OperatorDecision, OperatorPrompt};
use vmgui_daemon::{Daemon, Effect, Error};
use vmgui_proto::Msg;

fn load_config() -> Result<Config, String> {
    let cli = CliArgs::parse();
    let file = match &cli.config_file {
        Some(path) => {
            let text = fs::read_to_string(path)
                .map_err(|e| format!("reading config file {}: {}", path.display(), e))?;
            toml::from_str(&text).map_err(|e| format!("parsing config file {}: {}", path.display(), e))?
        }
        None => FileConfig::default(),
    };
    Config::build(file, cli).map_err(|e| e.to_string())
}

/// The real display server's "attach this shared frame" call is a
/// collaborator concern out of scope for this crate (§1); this binary
/// acknowledges every attach request without touching a display.
struct NullDisplayServer;

impl DisplayServerAttach for NullDisplayServer {
    fn attach(&mut self, _shmid: u32) -> Result<(), std::io::Error> {
        Ok(())
    }
}

fn main() -> ExitCode {
    let config = match load_config() {
        Ok(config) => config,
        Err(message) => {
            eprintln!("vmgui-daemon: {}", message);
            return ExitCode::FAILURE;
        }
    };

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .init();

    tracing::info!(domain = config.domain, name = %config.name, "starting daemon");

    let domain = match u16::try_from(config.domain) {
        Ok(d) => d,
        Err(_) => {
            eprintln!("vmgui-daemon: domain id {} does not fit in 16 bits", config.domain);
            return ExitCode::FAILURE;
        }
    };

    // A real build would query the host display server for its actual
    // root geometry; that query is a collaborator concern (§1), so a fixed
    // Full HD / 24bpp root is advertised here.
    let size = vmgui_proto::WindowSize::new(1920, 1080);
    let xconf = vmgui_proto::XConf::new(size, vmgui_proto::FRAME_BPP, 1920 * 1080 * 4 / 1024);

    let client = match vmgui_client::Client::daemon(domain, xconf) {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to guest domain");
            return ExitCode::FAILURE;
        }
    };

    let mut lock = match FileLock::open(std::path::Path::new("/run/vmgui/appviewer.lock")) {
        Ok(lock) => lock,
        Err(e) => {
            tracing::error!(error = %e, "failed to open the inter-viewer lock");
            return ExitCode::FAILURE;
        }
    };

    let mut daemon = Daemon::new(config);
    daemon.set_root_size(size.width(), size.height());

    match run(client, &mut daemon, &mut lock) {
        Ok(()) => ExitCode::SUCCESS,
        Err(Error::ProcessFatal(message)) => {
            tracing::error!(%message, "process-fatal error");
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!(error = %e, "guest session ended");
            ExitCode::SUCCESS
        }
    }
}

/// Applies (by logging; the real display server is a collaborator concern
/// out of scope for this crate, §1) every [`Effect`] a handler returned.
fn apply_effects(effects: Vec<Effect>) {
    for effect in effects {
        tracing::debug!(?effect, "applying effect");
    }
}

/// Runs a handler's result through the session: a recoverable error is
/// logged and drops the offending message without ending the session
/// (§7 category 1); anything else propagates and ends the loop.
fn settle(result: Result<Vec<Effect>, Error>) -> Result<Vec<Effect>, Error> {
    match result {
        Ok(effects) => Ok(effects),
        Err(Error::Recoverable(e)) => {
            tracing::warn!(error = %e, "dropping message");
            Ok(Vec::new())
        }
        Err(e) => Err(e),
    }
}

/// Decodes one message read off the ring and dispatches it into the
/// matching [`Daemon::handle_*`] call, mirroring the agent side's
/// `vmgui_proto_agent::Event::parse`/dispatch pattern. Message types the
/// guest never legitimately originates (the daemon⇒agent-only half of
/// [`Msg`]) and types this daemon does not recognize at all are both
/// treated as session-fatal (§4.2).
fn dispatch(
    message: &vmgui_client::IncomingMessage<'_>,
    daemon: &mut Daemon,
    prompt: &mut dyn OperatorPrompt,
    lock: &mut dyn InterViewerLock,
    display: &mut dyn DisplayServerAttach,
    clipboard_clock: &mut u32,
) -> Result<Vec<Effect>, Error> {
    let ty = message.ty();
    let window = message.header().window;

    let result: Result<Vec<Effect>, Error> = match Msg::try_from(ty) {
        Ok(Msg::Create) => {
            let body: vmgui_proto::Create = message.read();
            let top_left = body.rectangle.top_left();
            let size = body.rectangle.size();
            daemon.handle_create(
                window,
                body.parent.map(|p| p.get()),
                top_left.x() as i32,
                top_left.y() as i32,
                size.width(),
                size.height(),
                body.override_redirect != 0,
                prompt,
            )
        }
        Ok(Msg::Destroy) => {
            let _: vmgui_proto::Destroy = message.read();
            daemon.handle_destroy(window)
        }
        Ok(Msg::Map) => {
            let body: vmgui_proto::MapInfo = message.read();
            daemon.handle_map(
                window,
                (body.transient_for != 0).then_some(body.transient_for),
                body.override_redirect != 0,
            )
        }
        Ok(Msg::Unmap) => {
            let _: vmgui_proto::Unmap = message.read();
            daemon.handle_unmap(window)
        }
        Ok(Msg::Configure) => {
            let body: vmgui_proto::Configure = message.read();
            let top_left = body.rectangle.top_left();
            let size = body.rectangle.size();
            daemon.handle_configure_from_guest(
                window,
                top_left.x() as i32,
                top_left.y() as i32,
                size.width(),
                size.height(),
            )
        }
        Ok(Msg::MfnDump) => {
            let header_len = size_of::<vmgui_proto::MfnDumpHeader>();
            if message.body().len() < header_len {
                Err(Error::SessionFatal(SessionFatalError::UnknownMessageType { ty }))
            } else {
                let header: vmgui_proto::MfnDumpHeader =
                    vmgui_wire::Castable::from_bytes(&message.body()[..header_len]);
                let refs = message.body()[header_len..]
                    .chunks_exact(4)
                    .map(|c| u32::from_ne_bytes(c.try_into().unwrap()))
                    .collect();
                let source = FrameSource::PageRefs { byte_offset: header.off, refs };
                daemon.handle_frame_import(
                    window,
                    header.width,
                    header.height,
                    header.off,
                    source,
                    header.domid as u16,
                    lock,
                    display,
                )
            }
        }
        Ok(Msg::ShmImage) => {
            // A plain damage/redraw notification; repainting from shared
            // memory is the display server's job (§1), not this daemon's.
            let _: vmgui_proto::ShmImage = message.read();
            Ok(Vec::new())
        }
        Ok(Msg::ClipboardReq) => Ok(daemon.handle_clipboard_req(window)),
        Ok(Msg::ClipboardData) => {
            // The triggering key event's timestamp is a host input-handling
            // collaborator concern this binary does not model (§1); a local
            // monotonic counter stands in for it.
            *clipboard_clock = clipboard_clock.wrapping_add(1);
            daemon.handle_clipboard_data(message.body(), daemon.config.name.clone(), *clipboard_clock)
        }
        Ok(Msg::WmName) => {
            let body: vmgui_proto::WmName = message.read();
            daemon.handle_wmname(window, &body.data)
        }
        Ok(Msg::Dock) => {
            let _: vmgui_proto::Dock = message.read();
            daemon.handle_dock(window)
        }
        Ok(Msg::WindowHints) => {
            // Size hints are forwarded to the display server verbatim in
            // the real system; nothing in this registry models them.
            let _: vmgui_proto::WindowHints = message.read();
            Ok(Vec::new())
        }
        Ok(Msg::WindowFlags) => {
            let body: vmgui_proto::WindowFlags = message.read();
            daemon.handle_window_flags_from_guest(window, body.set, body.unset, prompt)
        }
        Ok(Msg::WmClass) => {
            let body: vmgui_proto::WmClass = message.read();
            daemon.handle_wmclass(window, &body.res_class)
        }
        Ok(Msg::WindowDump) => {
            let header_len = size_of::<vmgui_proto::WindowDumpHeader>();
            if message.body().len() < header_len {
                Err(Error::SessionFatal(SessionFatalError::UnknownMessageType { ty }))
            } else {
                let header: vmgui_proto::WindowDumpHeader =
                    vmgui_wire::Castable::from_bytes(&message.body()[..header_len]);
                let refs = message.body()[header_len..]
                    .chunks_exact(4)
                    .map(|c| u32::from_ne_bytes(c.try_into().unwrap()))
                    .collect();
                let source = FrameSource::GrantRefs { refs };
                daemon.handle_frame_import(
                    window,
                    header.width,
                    header.height,
                    0,
                    source,
                    daemon.config.target_domain as u16,
                    lock,
                    display,
                )
            }
        }
        Ok(Msg::Cursor) => {
            let body: vmgui_proto::Cursor = message.read();
            daemon.handle_cursor(window, body.cursor, prompt)
        }
        // Daemon ⇒ agent-only message types: the guest must never send
        // these, so receiving one is as fatal as a type outside `Msg`
        // entirely (§4.2).
        Ok(Msg::Keypress)
        | Ok(Msg::Button)
        | Ok(Msg::Motion)
        | Ok(Msg::Crossing)
        | Ok(Msg::Focus)
        | Ok(Msg::Close)
        | Ok(Msg::KeymapNotify) => Err(Error::SessionFatal(SessionFatalError::UnknownMessageType { ty })),
        Err(_) => Err(Error::SessionFatal(SessionFatalError::UnknownMessageType { ty })),
    };
    settle(result)
}

/// Drives the ring until the guest disconnects or a process-fatal error
/// occurs. Message decoding and dispatch into [`Daemon`]'s handlers lives
/// in [`dispatch`]; interpreting the [`Effect`]s produced by each handler
/// against the real display server is, again, a collaborator concern this
/// binary only logs rather than performs (see [`apply_effects`]).
fn run(mut client: vmgui_client::Client, daemon: &mut Daemon, lock: &mut FileLock) -> Result<(), Error> {
    tracing::debug!(windows = daemon.registry.len(), "entering event loop");
    let mut prompt = FixedAnswer(OperatorDecision::Ignore);
    let mut display = NullDisplayServer;
    let mut clipboard_clock: u32 = 0;
    loop {
        client.wait();
        match client.read_message() {
            Poll::Pending => continue,
            Poll::Ready(Ok(message)) => {
                let effects = dispatch(&message, daemon, &mut prompt, lock, &mut display, &mut clipboard_clock)?;
                apply_effects(effects);
            }
            Poll::Ready(Err(e)) => {
                tracing::warn!(error = %e, "ring I/O error, ending session");
                return Ok(());
            }
        }
        if client.needs_reconnect() {
            if let Err(e) = client.reconnect() {
                tracing::warn!(error = %e, "reconnect failed");
                return Ok(());
            }
        }
    }
}
