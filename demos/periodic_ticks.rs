use anyhow::Result;
use canmon::transport::virtual_bus::VirtualBus;
use canmon::{CancelToken, ConsolePresenter, Monitor, MonitorConfig, TickAccounting};
use clap::Parser;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Idle channel, ticks only. Compare `--idle-only` with the default while
/// the simulator is on to see the accounting difference.
#[derive(Parser)]
struct Args {
    #[arg(short, long, default_value_t = 0.25)]
    ticktime: f64,
    #[arg(short, long, default_value_t = 3)]
    seconds: u64,
    #[arg(long)]
    idle_only: bool,
    #[arg(long)]
    simulate: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let cancel = CancelToken::new();
    let monitor = Monitor::new(
        MonitorConfig {
            ticktime: args.ticktime,
            accounting: if args.idle_only { TickAccounting::IdleOnly } else { TickAccounting::WallClock },
            simulate: args.simulate.then(Default::default),
            ..Default::default()
        },
        Box::new(VirtualBus::new(canmon::transport::virtual_bus::VirtualConfig { echo: true, channels: 1 })),
        Arc::new(ConsolePresenter::new(60)),
        cancel.clone(),
    );

    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_secs(args.seconds));
        cancel.cancel();
    });
    let summary = monitor.run()?;
    let _ = stopper.join();

    let expected = (args.seconds as f64 / args.ticktime).floor();
    println!("{} ticks in {}s (ideal {})", summary.ticks, args.seconds, expected);
    Ok(())
}
