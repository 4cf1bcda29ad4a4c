//! Daemon configuration (§6, §10.3): a single validated options struct
//! assembled from three layered sources in increasing precedence —
//! compiled-in defaults, an optional TOML file, and CLI flags — so that
//! every field is validated exactly once, before the event loop starts.

use std::fmt;

use clap::Parser;
use serde::Deserialize;

use crate::tray::TrayMode;

/// Whether override-redirect windows are allowed to bypass the window
/// manager at all (§6's `--override-redirect` flag).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideRedirectPolicy {
    /// Honor override-redirect, subject to the §4.7 area cap.
    Allow,
    /// Never honor override-redirect; every window is managed.
    Disabled,
}

/// Raw, unvalidated configuration as read from a TOML file (§10.3's file
/// layer). Every field is optional so a partial file only overrides what
/// it names; CLI flags take precedence over this layer, which in turn
/// takes precedence over compiled-in defaults.
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub domain: Option<u32>,
    pub name: Option<String>,
    pub target_domain: Option<u32>,
    pub frame_color: Option<String>,
    pub label_index: Option<u8>,
    pub icon: Option<String>,
    pub verbosity: Option<i32>,
    pub invisible: Option<bool>,
    pub out_of_band_clipboard: Option<bool>,
    pub prefix_titles_with_vmname: Option<bool>,
    pub trayicon_mode: Option<String>,
    pub screensaver_names: Option<Vec<String>>,
    pub override_redirect: Option<OverrideRedirectPolicy>,
    pub override_redirect_max_percent: Option<u32>,
    pub allow_utf8_titles: Option<bool>,
    pub allow_fullscreen: Option<bool>,
}

/// CLI flags (§6). Mirrors [`FileConfig`]'s fields one-for-one so both
/// layers deserialize into the same shape before merging.
#[derive(Debug, Parser)]
#[command(name = "vmgui-daemon", about = "Host-side cross-domain GUI daemon")]
pub struct CliArgs {
    /// Guest domain id.
    #[arg(short = 'd')]
    pub domain: Option<u32>,

    /// Guest name.
    #[arg(short = 'N')]
    pub name: Option<String>,

    /// Target domain id (defaults to `-d`).
    #[arg(short = 't')]
    pub target_domain: Option<u32>,

    /// Config file path.
    #[arg(short = 'C')]
    pub config_file: Option<std::path::PathBuf>,

    /// Frame color, as `#rrggbb`.
    #[arg(short = 'c')]
    pub frame_color: Option<String>,

    /// Label index.
    #[arg(short = 'l')]
    pub label_index: Option<u8>,

    /// Icon path or name.
    #[arg(short = 'i')]
    pub icon: Option<String>,

    /// Increase log verbosity; may be repeated.
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Decrease log verbosity; may be repeated.
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// Background without waiting for the connection.
    #[arg(short = 'n')]
    pub background_nowait: bool,

    /// Foreground (do not fork).
    #[arg(short = 'f')]
    pub foreground: bool,

    /// Invisible mode: no local windows at all.
    #[arg(short = 'I')]
    pub invisible: bool,

    /// Use the out-of-band clipboard path.
    #[arg(short = 'Q')]
    pub out_of_band_clipboard: bool,

    /// Send SIGUSR1 to this pid once connected.
    #[arg(short = 'K')]
    pub notify_pid: Option<u32>,

    /// Extra `name=type:value` X11 property to install on every window;
    /// may be repeated.
    #[arg(short = 'p')]
    pub extra_properties: Vec<String>,

    /// Prefix window titles with the VM name.
    #[arg(short = 'T')]
    pub prefix_titles_with_vmname: bool,

    /// Tray icon rendering mode.
    #[arg(long = "trayicon-mode")]
    pub trayicon_mode: Option<String>,

    /// Screensaver window class name; may be given up to 10 times.
    #[arg(long = "screensaver-name")]
    pub screensaver_names: Vec<String>,

    /// Whether override-redirect windows may bypass the window manager.
    #[arg(long = "override-redirect", value_enum)]
    pub override_redirect: Option<OverrideRedirectCli>,
}

/// `clap`-friendly mirror of [`OverrideRedirectPolicy`] (`clap`'s
/// `value_enum` derive needs a type it controls).
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OverrideRedirectCli {
    /// See [`OverrideRedirectPolicy::Allow`].
    Allow,
    /// See [`OverrideRedirectPolicy::Disabled`].
    Disabled,
}

impl From<OverrideRedirectCli> for OverrideRedirectPolicy {
    fn from(v: OverrideRedirectCli) -> Self {
        match v {
            OverrideRedirectCli::Allow => OverrideRedirectPolicy::Allow,
            OverrideRedirectCli::Disabled => OverrideRedirectPolicy::Disabled,
        }
    }
}

/// Default override-redirect area cap (§4.7): 90% of the root window area.
pub const DEFAULT_OVERRIDE_REDIRECT_MAX_PERCENT: u32 = 90;

/// A fully validated configuration, ready for the event loop (§10.3).
#[derive(Debug, Clone)]
pub struct Config {
    pub domain: u32,
    pub name: String,
    pub target_domain: u32,
    pub frame_color: Option<String>,
    pub label_index: u8,
    pub icon: Option<String>,
    pub log_level: tracing::Level,
    pub invisible: bool,
    pub out_of_band_clipboard: bool,
    pub prefix_titles_with_vmname: bool,
    pub trayicon_mode: TrayMode,
    pub screensaver_names: Vec<String>,
    pub override_redirect: OverrideRedirectPolicy,
    pub override_redirect_max_percent: u32,
    pub allow_utf8_titles: bool,
    /// Whether a guest may obtain real (non-pseudo) fullscreen (§4.7's
    /// fullscreen pseudo-ack rewrite is only skipped when this is set).
    pub allow_fullscreen: bool,
}

/// A configuration validation failure (§7 category 2: `ProcessFatal`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError(pub String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid configuration: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

fn valid_vm_name(name: &str) -> bool {
    let mut chars = name.chars();
    let first_ok = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic());
    first_ok
        && name.len() <= 31
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn parse_trayicon_mode(spec: &str) -> Result<TrayMode, ConfigError> {
    let mut parts = spec.split('+');
    let base = parts.next().unwrap_or("");
    match base {
        "bg" => Ok(TrayMode::Background),
        "border1" => Ok(TrayMode::Border { width: 1 }),
        "border2" => Ok(TrayMode::Border { width: 2 }),
        "tint" => {
            let mut reduced_saturation = false;
            let mut white_hack = false;
            let mut border_width = 0u8;
            for modifier in parts {
                match modifier {
                    "border1" => border_width = 1,
                    "border2" => border_width = 2,
                    "saturation50" => reduced_saturation = true,
                    "whitehack" => white_hack = true,
                    other => {
                        return Err(ConfigError(format!(
                            "unknown trayicon-mode modifier {:?}",
                            other
                        )))
                    }
                }
            }
            Ok(TrayMode::Tint {
                reduced_saturation,
                white_hack,
                border_width,
            })
        }
        other => Err(ConfigError(format!("unknown trayicon-mode {:?}", other))),
    }
}

impl Config {
    /// Merges compiled-in defaults, an optional TOML file, and CLI flags
    /// (in that precedence order) and validates the result.
    pub fn build(file: FileConfig, cli: CliArgs) -> Result<Self, ConfigError> {
        let domain = cli
            .domain
            .or(file.domain)
            .ok_or_else(|| ConfigError("-d <domain id> is required".into()))?;
        if domain == 0 {
            return Err(ConfigError("domain id must be > 0".into()));
        }

        let name = cli
            .name
            .or(file.name)
            .ok_or_else(|| ConfigError("-N <name> is required".into()))?;
        if !valid_vm_name(&name) {
            return Err(ConfigError(format!(
                "name {:?} does not match [A-Za-z][A-Za-z0-9_-]*, <=31 chars",
                name
            )));
        }

        let target_domain = cli.target_domain.or(file.target_domain).unwrap_or(domain);

        let verbosity = file.verbosity.unwrap_or(0) + cli.verbose as i32 - cli.quiet as i32;
        let log_level = match verbosity {
            v if v <= -2 => tracing::Level::ERROR,
            -1 => tracing::Level::WARN,
            0 => tracing::Level::INFO,
            1 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        };

        let trayicon_spec = cli
            .trayicon_mode
            .or(file.trayicon_mode)
            .unwrap_or_else(|| "bg".to_owned());
        let trayicon_mode = parse_trayicon_mode(&trayicon_spec)?;

        let override_redirect = cli
            .override_redirect
            .map(OverrideRedirectPolicy::from)
            .or(file.override_redirect)
            .unwrap_or(OverrideRedirectPolicy::Allow);

        let mut screensaver_names = file.screensaver_names.unwrap_or_default();
        screensaver_names.extend(cli.screensaver_names);
        if screensaver_names.len() > 10 {
            return Err(ConfigError("at most 10 --screensaver-name flags".into()));
        }

        Ok(Config {
            domain,
            name,
            target_domain,
            frame_color: cli.frame_color.or(file.frame_color),
            label_index: cli.label_index.or(file.label_index).unwrap_or(0),
            icon: cli.icon.or(file.icon),
            log_level,
            invisible: cli.invisible || file.invisible.unwrap_or(false),
            out_of_band_clipboard: cli.out_of_band_clipboard
                || file.out_of_band_clipboard.unwrap_or(false),
            prefix_titles_with_vmname: cli.prefix_titles_with_vmname
                || file.prefix_titles_with_vmname.unwrap_or(false),
            trayicon_mode,
            screensaver_names,
            override_redirect,
            override_redirect_max_percent: file
                .override_redirect_max_percent
                .unwrap_or(DEFAULT_OVERRIDE_REDIRECT_MAX_PERCENT),
            allow_utf8_titles: file.allow_utf8_titles.unwrap_or(true),
            allow_fullscreen: file.allow_fullscreen.unwrap_or(false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli() -> CliArgs {
        CliArgs {
            domain: None,
            name: None,
            target_domain: None,
            config_file: None,
            frame_color: None,
            label_index: None,
            icon: None,
            verbose: 0,
            quiet: 0,
            background_nowait: false,
            foreground: false,
            invisible: false,
            out_of_band_clipboard: false,
            notify_pid: None,
            extra_properties: vec![],
            prefix_titles_with_vmname: false,
            trayicon_mode: None,
            screensaver_names: vec![],
            override_redirect: None,
        }
    }

    #[test]
    fn missing_domain_is_a_config_error() {
        let err = Config::build(FileConfig::default(), cli()).unwrap_err();
        assert!(err.0.contains("domain"));
    }

    #[test]
    fn cli_domain_and_name_are_enough_to_validate() {
        let mut args = cli();
        args.domain = Some(5);
        args.name = Some("work".to_owned());
        let cfg = Config::build(FileConfig::default(), args).unwrap();
        assert_eq!(cfg.domain, 5);
        assert_eq!(cfg.target_domain, 5);
    }

    #[test]
    fn invalid_name_is_rejected() {
        let mut args = cli();
        args.domain = Some(5);
        args.name = Some("1bad".to_owned());
        assert!(Config::build(FileConfig::default(), args).is_err());
    }

    #[test]
    fn cli_overrides_file() {
        let mut file = FileConfig::default();
        file.domain = Some(1);
        file.name = Some("file-name".to_owned());
        let mut args = cli();
        args.domain = Some(2);
        let cfg = Config::build(file, args).unwrap();
        assert_eq!(cfg.domain, 2);
        assert_eq!(cfg.name, "file-name");
    }

    #[test]
    fn trayicon_tint_modifiers_parse() {
        let mut args = cli();
        args.domain = Some(5);
        args.name = Some("work".to_owned());
        args.trayicon_mode = Some("tint+saturation50+whitehack".to_owned());
        let cfg = Config::build(FileConfig::default(), args).unwrap();
        match cfg.trayicon_mode {
            TrayMode::Tint {
                reduced_saturation,
                white_hack,
                ..
            } => {
                assert!(reduced_saturation);
                assert!(white_hack);
            }
            _ => panic!("expected Tint"),
        }
    }

    #[test]
    fn too_many_screensaver_names_is_rejected() {
        let mut args = cli();
        args.domain = Some(5);
        args.name = Some("work".to_owned());
        args.screensaver_names = (0..11).map(|i| format!("s{}", i)).collect();
        assert!(Config::build(FileConfig::default(), args).is_err());
    }
}
