// Command line interface definition

use std::path::PathBuf;

use clap::Parser;

use stillshot::BackendKind;

#[derive(Parser, Debug)]
#[command(name = "stillshot")]
#[command(about = "Capture a still image of one or more monitors")]
#[command(version)]
pub struct Cli {
    /// Capture backend: auto, x11, wlr or portal
    #[arg(long, default_value = "auto")]
    pub backend: BackendKind,

    /// Monitor name to capture, or "all" to stitch every monitor
    #[arg(long)]
    pub monitor: Option<String>,

    /// List monitors visible to the backend and exit
    #[arg(long)]
    pub list_monitors: bool,

    /// Print the monitor list as JSON instead of text
    #[arg(long, requires = "list_monitors")]
    pub json: bool,

    /// Output PNG path
    #[arg(short, long, default_value = "capture.png")]
    pub output: PathBuf,

    /// Ask the portal to show its interactive screenshot dialog
    #[arg(long)]
    pub portal_interactive: bool,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["stillshot"]);
        assert_eq!(cli.backend, BackendKind::Auto);
        assert_eq!(cli.monitor, None);
        assert!(!cli.list_monitors);
        assert!(!cli.json);
        assert_eq!(cli.output, PathBuf::from("capture.png"));
        assert!(!cli.portal_interactive);
        assert!(!cli.debug);
    }

    #[test]
    fn test_backend_and_monitor_flags() {
        let cli = Cli::parse_from([
            "stillshot",
            "--backend",
            "wlr",
            "--monitor",
            "DP-1",
            "-o",
            "/tmp/shot.png",
        ]);
        assert_eq!(cli.backend, BackendKind::Wlr);
        assert_eq!(cli.monitor.as_deref(), Some("DP-1"));
        assert_eq!(cli.output, PathBuf::from("/tmp/shot.png"));
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        assert!(Cli::try_parse_from(["stillshot", "--backend", "dxgi"]).is_err());
    }

    #[test]
    fn test_json_requires_list_monitors() {
        assert!(Cli::try_parse_from(["stillshot", "--json"]).is_err());
        assert!(Cli::try_parse_from(["stillshot", "--list-monitors", "--json"]).is_ok());
    }
}
