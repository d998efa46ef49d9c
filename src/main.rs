use anyhow::Context;
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use imagebroker::chain::ErrorPolicy;
use imagebroker::config::{BrokerConfig, DEFAULT_CONFIG_FILE, app_name, version};
use imagebroker::display::{DEFAULT_MAX_HEIGHT, DEFAULT_MAX_WIDTH, DisplayOptions, HeadlessSurface};
use imagebroker::runtime::SyntheticRuntime;
use imagebroker::utils::sos::SignalOfStop;
use imagebroker::{ImageBroker, RunSummary};
use std::path::PathBuf;
use std::process;

const WINDOW_TITLE: &str = "Image Broker";

fn cli() -> Command {
    Command::new(app_name())
        .version(version())
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file with the `IFF` and `chains` sections.")
                .value_parser(value_parser!(PathBuf))
                .default_value(DEFAULT_CONFIG_FILE),
        )
        .arg(
            Arg::new("exporter")
                .short('e')
                .long("exporter")
                .value_name("STAGE")
                .help("Export stage of the first chain to display."),
        )
        .arg(
            Arg::new("max-width")
                .long("max-width")
                .value_name("PIXELS")
                .help("Maximum output width (default 1280).")
                .value_parser(value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new("max-height")
                .long("max-height")
                .value_name("PIXELS")
                .help("Maximum output height (default 1024).")
                .value_parser(value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new("headless")
                .long("headless")
                .help("Run without a window; stop with Ctrl-C.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("stop-on-error")
                .long("stop-on-error")
                .help("Stop when a chain reports an error instead of only logging it.")
                .action(ArgAction::SetTrue),
        )
}

fn main() {
    tracing_subscriber::fmt::init();

    let matches = cli().get_matches();
    if let Err(e) = run(&matches) {
        log::error!("{e:#}");
        process::exit(1);
    }
}

fn run(matches: &ArgMatches) -> anyhow::Result<()> {
    let path = matches
        .get_one::<PathBuf>("config")
        .cloned()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let mut config = BrokerConfig::load(&path)?;
    if let Some(exporter) = matches.get_one::<String>("exporter") {
        config.set_exporter(exporter.clone());
    }

    let options = DisplayOptions {
        max_width: matches
            .get_one::<u32>("max-width")
            .copied()
            .unwrap_or(DEFAULT_MAX_WIDTH),
        max_height: matches
            .get_one::<u32>("max-height")
            .copied()
            .unwrap_or(DEFAULT_MAX_HEIGHT),
        ..DisplayOptions::default()
    };
    let policy = if matches.get_flag("stop-on-error") {
        ErrorPolicy::Escalate
    } else {
        ErrorPolicy::Log
    };

    // Ctrl-C leaves the display loop so the chains still get stopped and
    // released before the runtime is finalized
    let stop = SignalOfStop::new();
    let on_interrupt = stop.clone();
    ctrlc::set_handler(move || {
        log::info!("Interrupted, stopping the program");
        on_interrupt.cancel();
    })
    .context("Error setting Ctrl-C handler")?;

    let runtime = SyntheticRuntime::new();
    let broker = ImageBroker::new(&runtime, config, stop.clone())
        .with_display_options(options)
        .with_error_policy(policy);

    let summary = if matches.get_flag("headless") {
        broker.run(&mut HeadlessSurface::new(stop))?
    } else {
        run_windowed(&broker)?
    };

    log::info!(
        "Done: presented={} delivered={} dropped={} runtime errors={}",
        summary.display.presented,
        summary.frames_delivered,
        summary.frames_dropped,
        summary.runtime_notifications
    );
    Ok(())
}

#[cfg(feature = "window")]
fn run_windowed(broker: &ImageBroker<'_>) -> anyhow::Result<RunSummary> {
    log::info!("Press Esc to terminate the program");
    let mut surface = imagebroker::display::WindowSurface::open(WINDOW_TITLE)?;
    Ok(broker.run(&mut surface)?)
}

#[cfg(not(feature = "window"))]
fn run_windowed(_broker: &ImageBroker<'_>) -> anyhow::Result<RunSummary> {
    anyhow::bail!("{WINDOW_TITLE}: built without the `window` feature, use --headless")
}
