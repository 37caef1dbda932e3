use anyhow::Context;
use beamctl::{
    init_logging, Config, DeviceConnection, DeviceProfile, FramingEvent, FramingKind,
    FramingManager, FramingOptions, Point, StaticDocument, BUILD_DATE, VERSION,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Laser engraver device control
#[derive(Parser, Debug)]
#[command(name = "beamctl", version)]
#[command(about = "Frame jobs and query laser engravers over the network", long_about = None)]
struct Cli {
    /// Configuration file (TOML or JSON); defaults to the platform config directory
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Trace a rectangle on the machine
    Frame {
        #[command(flatten)]
        device: DeviceArgs,

        /// Framing kind (framing, hull, area-check, rotate-axis, rotate-framing, contour)
        #[arg(long, default_value = "framing")]
        kind: FramingKind,

        #[arg(long)]
        x0: f64,
        #[arg(long)]
        y0: f64,
        #[arg(long)]
        x1: f64,
        #[arg(long)]
        y1: f64,

        /// Repeat the outline until interrupted
        #[arg(long = "loop")]
        loop_mode: bool,

        /// Low-power preview in percent
        #[arg(long)]
        low_power: Option<f64>,
    },
    /// Print the machine status report
    Report {
        #[command(flatten)]
        device: DeviceArgs,
    },
}

#[derive(clap::Args, Debug)]
struct DeviceArgs {
    /// Device host; overrides the configured host
    #[arg(long)]
    host: Option<String>,

    /// Control port; overrides the configured port
    #[arg(long)]
    port: Option<u16>,

    /// Serial of the configured device profile to use
    #[arg(long)]
    serial: Option<String>,
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    let path = match path {
        Some(path) => path,
        None => Config::default_path()?,
    };
    Config::load_or_default(&path).with_context(|| format!("loading {}", path.display()))
}

fn select_profile(config: &Config, serial: Option<&str>) -> anyhow::Result<DeviceProfile> {
    match serial {
        Some(serial) => Ok(config.device(serial)?.clone()),
        None => Ok(config.devices.first().cloned().unwrap_or_default()),
    }
}

async fn connect(config: &Config, args: &DeviceArgs) -> anyhow::Result<DeviceConnection> {
    let host = args.host.as_deref().unwrap_or(&config.connection.host);
    let port = args.port.unwrap_or(config.connection.port);
    let connect_timeout = Duration::from_millis(config.connection.connect_timeout_ms);
    let request_timeout = Duration::from_millis(config.connection.request_timeout_ms);
    tracing::info!("Connecting to {}:{}", host, port);
    DeviceConnection::connect(host, port, connect_timeout, request_timeout)
        .await
        .with_context(|| format!("connecting to {}:{}", host, port))
}

/// Exit status of a framing run
///
/// A run stopped by the operator is a normal exit; loop runs only end that way.
fn frame_outcome(completed: bool, stopped: bool) -> anyhow::Result<()> {
    if !completed && !stopped {
        anyhow::bail!("framing did not complete");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging()?;
    tracing::info!("beamctl {} (built {})", VERSION, BUILD_DATE);

    let config = load_config(cli.config)?;

    match cli.command {
        Command::Report { device } => {
            let conn = connect(&config, &device).await?;
            let report = conn.report().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Frame {
            device,
            kind,
            x0,
            y0,
            x1,
            y1,
            loop_mode,
            low_power,
        } => {
            let profile = select_profile(&config, device.serial.as_deref())?;
            if profile.family.is_promark() {
                anyhow::bail!("{} devices are framed through their galvo backend", profile.family);
            }
            let conn = Arc::new(connect(&config, &device).await?);
            let document = StaticDocument::rectangle(Point::new(x0, y0), Point::new(x1, y1));
            let manager = Arc::new(FramingManager::raw(
                conn,
                profile,
                config.framing.clone(),
                Arc::new(document),
            ));

            let mut events = manager.subscribe();
            tokio::spawn(async move {
                while let Ok(event) = events.recv().await {
                    match event {
                        FramingEvent::Alert(text) => eprintln!("error: {}", text),
                        FramingEvent::Warning { text, .. } => eprintln!("warning: {}", text),
                        FramingEvent::Message(text) => println!("{}", text),
                        other => tracing::debug!("{}", other),
                    }
                }
            });

            let stopped = Arc::new(AtomicBool::new(false));
            let stopper = manager.clone();
            let stop_flag = stopped.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    stop_flag.store(true, Ordering::SeqCst);
                    stopper.stop_framing().await;
                }
            });

            let options = FramingOptions {
                low_power,
                loop_mode: Some(loop_mode),
            };
            let completed = manager.start_framing(kind, options).await;
            manager.end_session().await?;
            frame_outcome(completed, stopped.load(Ordering::SeqCst))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stopped_run_exits_cleanly() {
        assert!(frame_outcome(true, false).is_ok());
        assert!(frame_outcome(false, true).is_ok());
        assert!(frame_outcome(false, false).is_err());
    }

    #[test]
    fn test_frame_args_parse() {
        let cli = Cli::try_parse_from([
            "beamctl", "frame", "--host", "10.0.0.2", "--kind", "hull", "--x0", "0", "--y0", "0",
            "--x1", "20", "--y1", "10", "--loop",
        ])
        .unwrap();
        let Command::Frame { kind, loop_mode, device, .. } = cli.command else {
            panic!("expected frame command");
        };
        assert_eq!(kind, FramingKind::Hull);
        assert!(loop_mode);
        assert_eq!(device.host.as_deref(), Some("10.0.0.2"));
    }
}
