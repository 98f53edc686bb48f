use std::{path::PathBuf, process};

use structopt::StructOpt;
use tracing_subscriber::FmtSubscriber;

use secagg::{client::Client, settings::ClientSettings};

#[derive(Debug, StructOpt)]
#[structopt(name = "client")]
struct Opt {
    /// Path of the configuration file
    #[structopt(short, parse(from_os_str))]
    config_path: PathBuf,

    /// This client's private vector, e.g. `--value 30,45,12`
    #[structopt(short, long, use_delimiter = true, required = true)]
    value: Vec<u64>,
}

#[tokio::main]
async fn main() {
    let opt = Opt::from_args();

    let settings = ClientSettings::new(opt.config_path).unwrap_or_else(|err| {
        eprintln!("{}", err);
        process::exit(1);
    });

    let _fmt_subscriber = FmtSubscriber::builder()
        .with_env_filter(settings.log.filter)
        .with_ansi(true)
        .init();

    sodiumoxide::init().unwrap();

    let client = Client::new(settings.network.endpoint(), opt.value);
    match client.run().await {
        Ok(aggregate) => println!("{:?}", aggregate),
        Err(err) => {
            eprintln!("client failed: {}", err);
            process::exit(1);
        }
    }
}
