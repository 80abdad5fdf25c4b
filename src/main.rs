use anyhow::{bail, Context, Result};
use canmon::transport::slcan::{SlcanConfig, SlcanConnector};
use canmon::transport::virtual_bus::{VirtualBus, VirtualConfig};
use canmon::{
    Bitrate, CancelToken, ConsolePresenter, Connector, GeneratorConfig, Monitor, MonitorConfig,
    Presenter, TickAccounting,
};
use clap::{Parser, ValueEnum};
use log::info;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// In-process virtual bus
    Virtual,
    /// Serial-line CAN adapter
    Slcan,
    /// Linux SocketCAN interface
    Socketcan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Accounting {
    /// Advance ticks by measured time on every poll
    Wall,
    /// Advance ticks by the poll timeout on idle polls only
    Idle,
}

#[derive(Parser)]
#[command(version, about = "Simulate and monitor a CAN channel.")]
struct Args {
    /// CAN channel number to use.
    #[arg(default_value_t = 0)]
    channel: u32,
    /// Bitrate for the CAN channel. Options: 1M, 500K, 250K, 125K, 100K, 62K, 50K, 83K, 10K
    #[arg(short, long, default_value = "500K")]
    bitrate: Bitrate,
    /// If greater than zero, display 'tick' every this many seconds.
    #[arg(short, long, default_value_t = 0.0, allow_negative_numbers = true)]
    ticktime: f64,
    #[arg(long, value_enum, default_value_t = Backend::Virtual, env = "CANMON_BACKEND")]
    backend: Backend,
    /// Serial port of the SLCAN adapter.
    #[arg(long, default_value = "/dev/ttyACM0", env = "CANMON_PORT")]
    port: String,
    /// Adapter does not take a channel digit before each command.
    #[arg(long)]
    single_channel: bool,
    /// SocketCAN interface prefix; the channel number is appended.
    #[arg(long, default_value = "can")]
    iface_prefix: String,
    /// Virtual bus: also receive our own transmissions.
    #[arg(long)]
    echo: bool,
    /// Monitor only, do not inject frames.
    #[arg(long)]
    no_sim: bool,
    /// Seconds between simulated frames.
    #[arg(long, default_value_t = 1.0)]
    sim_interval: f64,
    #[arg(long, value_enum, default_value_t = Accounting::Wall)]
    tick_accounting: Accounting,
    /// Display width; defaults to $COLUMNS, then the terminal size, then 80.
    #[arg(long)]
    width: Option<usize>,
}

impl Args {
    fn connector(&self) -> Result<Box<dyn Connector>> {
        let connector: Box<dyn Connector> = match self.backend {
            Backend::Virtual => Box::new(VirtualBus::new(VirtualConfig {
                echo: self.echo,
                ..Default::default()
            })),
            Backend::Slcan => Box::new(SlcanConnector::new(SlcanConfig {
                port: self.port.clone(),
                multi_channel: !self.single_channel,
                ..Default::default()
            })),
            #[cfg(target_os = "linux")]
            Backend::Socketcan => Box::new(canmon::transport::socket_can::SocketCanConnector::new(
                self.iface_prefix.clone(),
            )),
            #[cfg(not(target_os = "linux"))]
            Backend::Socketcan => bail!("SocketCAN is only available on Linux"),
        };
        Ok(connector)
    }

    fn monitor_config(&self) -> Result<MonitorConfig> {
        let simulate = if self.no_sim {
            None
        } else {
            if !(self.sim_interval > 0.0) {
                bail!("--sim-interval must be greater than zero");
            }
            let interval = Duration::try_from_secs_f64(self.sim_interval)
                .context("--sim-interval out of range")?;
            Some(GeneratorConfig { interval })
        };
        Ok(MonitorConfig {
            channel: self.channel,
            bitrate: self.bitrate,
            ticktime: self.ticktime,
            accounting: match self.tick_accounting {
                Accounting::Wall => TickAccounting::WallClock,
                Accounting::Idle => TickAccounting::IdleOnly,
            },
            simulate,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let connector = args.connector()?;
    let config = args.monitor_config()?;
    let width = args.width.unwrap_or_else(ConsolePresenter::terminal_width);
    let presenter: Arc<dyn Presenter> = Arc::new(ConsolePresenter::new(width));
    let cancel = CancelToken::new();

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping");
            ctrl_c.cancel();
        }
    });

    let mode = if args.no_sim { "Listening" } else { "Listening and simulating" };
    println!("{} on CAN channel {} ({})...", mode, args.channel, args.bitrate);
    let monitor = Monitor::new(config, connector, presenter.clone(), cancel);
    let summary = tokio::task::spawn_blocking(move || monitor.run())
        .await
        .context("monitor task failed")?
        .with_context(|| format!("Channel {} stopped with an error", args.channel))?;

    presenter.notice("Stopped monitoring.");
    info!("{:?}", summary);
    Ok(())
}
