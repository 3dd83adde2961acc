use clap::{App, Arg};
use colored::*;
use scalebus::button::PushButton;
use scalebus::config::DeviceConfig;
use scalebus::sensor::{Scale, SimulatedLoadCell};
use scalebus::transport::{LoopbackTransport, TopicRouter, Transport};
use scalebus::units::{Logic, LogicEvent, WeightMeter, WeightReport};
use scalebus::{Bus, Driver, Message, Scheduler};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_DURATION_S: &str = "20";
const DEFAULT_LOAD_G: &str = "250";
const SIMULATED_ZERO_SAMPLE: i32 = -1_200;

fn is_number<T: std::str::FromStr>(value: String) -> Result<(), String> {
    value
        .parse::<T>()
        .map(|_| ())
        .map_err(|_| format!("'{}' is not a valid number", value))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("scale-sim")
        .version("0.1.0")
        .author("Embedded Scale Engineering Team")
        .about("⚖️  Load-cell scale simulator running the message bus on the host")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON device configuration")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("device-id")
                .long("device-id")
                .value_name("ID")
                .help("Device identifier used in topics")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("read-period")
                .long("read-period")
                .value_name("MS")
                .help("Milliseconds between periodic readings")
                .takes_value(true)
                .validator(is_number::<u64>),
        )
        .arg(
            Arg::with_name("duration")
                .short("d")
                .long("duration")
                .value_name("SECONDS")
                .help("How long to run the simulation")
                .takes_value(true)
                .default_value(DEFAULT_DURATION_S)
                .validator(is_number::<u64>),
        )
        .arg(
            Arg::with_name("load")
                .short("l")
                .long("load")
                .value_name("GRAMS")
                .help("Load placed on the simulated cell after taring")
                .takes_value(true)
                .default_value(DEFAULT_LOAD_G)
                .validator(is_number::<f32>),
        )
        .arg(
            Arg::with_name("press-every")
                .long("press-every")
                .value_name("SECONDS")
                .help("Simulate a button press at this interval")
                .takes_value(true)
                .validator(is_number::<u64>),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Trace every bus and scheduler operation"),
        )
        .get_matches();

    let default_filter = if matches.is_present("verbose") { "trace" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let mut config = match matches.value_of("config") {
        Some(path) => DeviceConfig::load(path)?,
        None => DeviceConfig::default(),
    };
    if let Some(device_id) = matches.value_of("device-id") {
        config.device_id = device_id.to_owned();
    }
    if let Some(period) = matches.value_of("read-period") {
        config.read_period_ms = period.parse()?;
    }
    config.validate()?;

    let duration = Duration::from_secs(matches.value_of("duration").unwrap_or(DEFAULT_DURATION_S).parse()?);
    let load: f32 = matches.value_of("load").unwrap_or(DEFAULT_LOAD_G).parse()?;

    println!("{}", "⚖️  Scale Bus Simulator".bold());
    println!("{}", "=======================".bold());
    println!("   Device:       {}", config.device_id.cyan());
    println!("   Priorities:   {}", config.priorities);
    println!("   Read period:  {} ms", config.read_period_ms);
    println!("   Load:         {} g", load);

    let bus = Arc::new(Bus::new(config.priorities)?);
    let scheduler = Arc::new(Scheduler::new());
    let router = Arc::new(TopicRouter::new());
    let transport = Arc::new(LoopbackTransport::new(Arc::clone(&router)));

    let mut cell = SimulatedLoadCell::new(SIMULATED_ZERO_SAMPLE).with_busy_polls(2);
    let scale = {
        let mut scale = Scale::new(cell.clone());
        scale.tare(config.tare_samples)?;
        cell.set_load(load);
        *scale.cell_mut() = cell;
        scale
    };

    let meter = Arc::new(WeightMeter::new(
        Arc::clone(&bus),
        scale,
        config.avg_samples,
        config.tare_samples,
    ));
    let logic = Arc::new(Logic::new(
        Arc::clone(&bus),
        Arc::clone(&scheduler),
        transport.clone(),
        config.logic_config(),
    )?);
    logic.attach(&router)?;

    // Stand-in for the remote side of the broker.
    let weight_topic = logic.weight_topic().to_owned();
    router.add_handler(&weight_topic, |topic, payload| {
        match serde_json::from_slice::<WeightReport>(payload) {
            Ok(report) => println!(
                "📡 {} {:>9.2} g  (raw {:.2}, avg {:.2} over {})",
                topic.dimmed(),
                report.weight,
                report.raw,
                report.average,
                report.samples
            ),
            Err(e) => warn!("undecodable report on {}: {}", topic, e),
        }
    });
    transport.subscribe(&weight_topic, config.qos)?;

    bus.add_system(meter);
    bus.add_system(Arc::clone(&logic));
    bus.enqueue(Message::to(LogicEvent::Start.addr()));

    let driver = Arc::new(
        Driver::new(Arc::clone(&bus), Arc::clone(&scheduler)).with_dispatch_limit(config.max_dispatch_per_tick),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let driver_task = tokio::spawn({
        let driver = Arc::clone(&driver);
        let tick = config.tick();
        async move { driver.run(tick, shutdown_rx).await }
    });

    let button_task = matches
        .value_of("press-every")
        .map(str::parse::<u64>)
        .transpose()?
        .filter(|secs| *secs > 0)
        .map(|secs| {
            let mut button = PushButton::new(
                Arc::clone(&bus),
                Message::to(LogicEvent::ButtonPressed.addr()),
                0,
                false,
            );
            tokio::spawn(async move {
                let mut interval = time::interval(Duration::from_secs(secs));
                interval.tick().await;
                loop {
                    interval.tick().await;
                    match button.click() {
                        Ok(_) => println!("🔘 {}", "button pressed".yellow()),
                        Err(e) => warn!("button press lost: {}", e),
                    }
                }
            })
        });

    tokio::select! {
        _ = time::sleep(duration) => info!("simulation time elapsed"),
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }

    shutdown_tx.send(true)?;
    driver_task.await?;
    if let Some(task) = button_task {
        task.abort();
    }

    let bus_stats = bus.stats();
    let scheduler_stats = scheduler.stats();
    let driver_stats = driver.stats();
    println!();
    println!("{}", "Summary".bold().underline());
    println!("   Readings published:  {}", logic.published().to_string().green());
    println!("   Messages dispatched: {}", bus_stats.total_dispatched);
    println!("   Messages pending:    {}", bus_stats.pending);
    println!("   Scheduled / flushed: {} / {}", scheduler_stats.total_scheduled, scheduler_stats.total_flushed);
    println!("   Driver ticks:        {}", driver_stats.ticks);
    if driver_stats.failed_ticks > 0 {
        println!("   Failed ticks:        {}", driver_stats.failed_ticks.to_string().red());
    }

    Ok(())
}
