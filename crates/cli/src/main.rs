use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use libris_kernel::settings::Settings;
use libris_throttle::Rate;

#[derive(Debug, Parser)]
#[command(name = "libris", version, about = "Library circulation service")]
struct Cli {
    /// Directory holding `base.toml` and `<env>.toml`
    #[arg(long, global = true, env = "LIBRIS_CONFIG_DIR", default_value = "config")]
    config_dir: PathBuf,

    /// Environment overlay to load (local, staging, production)
    #[arg(long, global = true, env = "LIBRIS_ENV", default_value = "local")]
    env: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the HTTP service
    Serve,
    /// Print the effective settings as JSON
    Settings,
    /// Parse a throttle rate such as `5/day` and print its meaning
    CheckRate { rate: String },
}

impl Cli {
    fn settings(&self) -> anyhow::Result<Settings> {
        Settings::load_from(&self.config_dir, &self.env).context("failed to load Libris settings")
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve => {
            let settings = cli.settings()?;
            libris_telemetry::init(&settings.telemetry)?;
            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to build tokio runtime")?
                .block_on(libris_app::serve(settings))
        }
        Command::Settings => {
            let settings = cli.settings()?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
        Command::CheckRate { rate } => {
            let parsed: Rate = rate
                .parse()
                .with_context(|| format!("invalid rate '{rate}'"))?;
            println!(
                "{parsed}: {} requests per {}s",
                parsed.limit,
                parsed.period.as_secs()
            );
            Ok(())
        }
    }
}
