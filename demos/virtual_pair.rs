use anyhow::Result;
use canmon::transport::virtual_bus::VirtualBus;
use canmon::{CancelToken, ConsolePresenter, GeneratorConfig, Monitor, MonitorConfig, RecordingPresenter};
use clap::Parser;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Two monitors on one virtual channel: the first simulates traffic, the
/// second only listens and prints what it sees.
#[derive(Parser)]
struct Args {
    #[arg(short, long, default_value_t = 0)]
    channel: u32,
    /// Seconds to run before stopping both sides.
    #[arg(short, long, default_value_t = 5)]
    seconds: u64,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let bus = VirtualBus::default();
    let cancel = CancelToken::new();

    let sender_view = Arc::new(RecordingPresenter::default());
    let sender = Monitor::new(
        MonitorConfig {
            channel: args.channel,
            simulate: Some(GeneratorConfig { interval: Duration::from_millis(500) }),
            ..Default::default()
        },
        Box::new(bus.clone()),
        sender_view.clone(),
        cancel.clone(),
    );
    let listener = Monitor::new(
        MonitorConfig { channel: args.channel, ticktime: 1.0, simulate: None, ..Default::default() },
        Box::new(bus),
        Arc::new(ConsolePresenter::new(ConsolePresenter::terminal_width())),
        cancel.clone(),
    );

    let tx = thread::spawn(move || sender.run());
    let rx = thread::spawn(move || listener.run());

    thread::sleep(Duration::from_secs(args.seconds));
    cancel.cancel();

    let sent = tx.join().expect("sender panicked")?;
    let seen = rx.join().expect("listener panicked")?;
    println!("Sent {} frames, listener saw {} ({} ticks)", sent.sent, seen.received, seen.ticks);
    Ok(())
}
