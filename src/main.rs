use clap::Parser;
use mcu_serial_term_lib::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let cli = Cli::parse();

  env_logger::Builder::new()
    .filter_level(cli.log_level())
    .parse_default_env()
    .init();

  mcu_serial_term_lib::run(cli).await
}
