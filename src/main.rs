// Stillshot - still-frame screen capture for X11 and Wayland
// Binary entry point: picks a backend, captures once, writes a PNG.

mod cli;

use anyhow::{bail, Context, Result};
use clap::Parser;

use stillshot::{create_backend, BackendKind, MonitorInfo};

fn init_logging(debug: bool) {
    // Log to both stderr and a file next to the exe for diagnostics.
    let log_path = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.join("stillshot.log")));
    let log_file = log_path.as_ref().and_then(|p| std::fs::File::create(p).ok());

    let default_filter = if debug { "debug" } else { "info" };
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter));
    builder.format_timestamp_secs();
    if let Some(file) = log_file {
        use std::io::Write;
        let file = std::sync::Mutex::new(file);
        builder.format(move |buf, record| {
            let line = format!(
                "[{} {} {}] {}\n",
                buf.timestamp_seconds(),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args(),
            );
            let _ = buf.write_all(line.as_bytes());
            if let Ok(mut f) = file.lock() {
                let _ = f.write_all(line.as_bytes());
                let _ = f.flush();
            }
            Ok(())
        });
    }
    builder.init();
}

fn print_monitor_list(backend_name: &str, monitors: &[MonitorInfo]) {
    println!("Backend: {backend_name}");
    if monitors.is_empty() {
        println!("(no monitors reported)");
        return;
    }
    for (i, monitor) in monitors.iter().enumerate() {
        let primary = if monitor.primary { " primary" } else { "" };
        println!(
            "[{i}] {} {},{} {}x{} scale={}{primary}",
            monitor.name, monitor.x, monitor.y, monitor.width, monitor.height, monitor.scale
        );
    }
}

fn run(args: cli::Cli) -> Result<()> {
    let backend =
        create_backend(args.backend, args.portal_interactive).context("failed to create backend")?;

    if !backend.is_available() {
        match args.backend {
            BackendKind::Wlr => bail!("compositor does not support wlr-screencopy"),
            BackendKind::Portal => bail!("xdg-desktop-portal is missing or unavailable"),
            BackendKind::X11 => bail!("X11 backend unavailable (DISPLAY missing or access denied)"),
            BackendKind::Auto => bail!("backend '{}' is not available", backend.name()),
        }
    }

    if args.list_monitors {
        let monitors = backend.list_monitors();
        if args.json {
            println!("{}", serde_json::to_string_pretty(&monitors)?);
        } else {
            print_monitor_list(backend.name(), &monitors);
        }
        return Ok(());
    }

    let result = backend.capture_once(args.monitor.as_deref());
    if result.image.is_empty() {
        bail!("capture failed on backend '{}'", backend.name());
    }
    log::debug!(
        "capture size: {}x{}",
        result.image.width,
        result.image.height
    );
    log::debug!("monitors: {}", result.monitors.len());

    image::save_buffer(
        &args.output,
        &result.image.data,
        result.image.width,
        result.image.height,
        image::ExtendedColorType::Rgba8,
    )
    .with_context(|| format!("failed to write {}", args.output.display()))?;

    match result.selected.and_then(|i| result.monitors.get(i)) {
        Some(monitor) => println!(
            "Captured {} ({}x{}) to {}",
            monitor.name,
            result.image.width,
            result.image.height,
            args.output.display()
        ),
        None => println!(
            "Captured {}x{} to {}",
            result.image.width,
            result.image.height,
            args.output.display()
        ),
    }
    Ok(())
}

fn main() {
    let args = cli::Cli::parse();
    init_logging(args.debug);

    if let Err(e) = run(args) {
        log::error!("Fatal: {e:#}");
        std::process::exit(1);
    }
}
