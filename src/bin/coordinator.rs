use std::{path::PathBuf, process, sync::Arc};

use structopt::StructOpt;
use tokio::signal;
use tracing::warn;
use tracing_subscriber::FmtSubscriber;

use secagg::{
    coordinator::{bind_and_serve, Coordinator},
    settings::CoordinatorSettings,
};

#[derive(Debug, StructOpt)]
#[structopt(name = "coordinator")]
struct Opt {
    /// Path of the configuration file
    #[structopt(short, parse(from_os_str))]
    config_path: PathBuf,
}

#[tokio::main]
async fn main() {
    let opt = Opt::from_args();

    let settings = CoordinatorSettings::new(opt.config_path).unwrap_or_else(|err| {
        eprintln!("{}", err);
        process::exit(1);
    });
    let CoordinatorSettings {
        session: session_settings,
        network: network_settings,
        log: log_settings,
    } = settings;

    let _fmt_subscriber = FmtSubscriber::builder()
        .with_env_filter(log_settings.filter)
        .with_ansi(true)
        .init();

    sodiumoxide::init().unwrap();

    let coordinator = Arc::new(Coordinator::new(session_settings.into()));

    tokio::select! {
        result = bind_and_serve(coordinator, network_settings.endpoint()) => {
            if let Err(err) = result {
                warn!(error = %err, "shutting down: listener terminated");
            }
        }
        _ = signal::ctrl_c() => {
            warn!("shutting down: received ctrl-c");
        }
    }
}
