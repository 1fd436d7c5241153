pub mod serial;
pub mod sink;
pub mod config;
pub mod console;
pub mod cli;

use std::sync::Arc;
use std::time::Duration;
use anyhow::{bail, Context};

use cli::Cli;
use config::{AppConfig, SendDefaults};
use console::{print_ports, Console};
use serial::unified::{SerialSession, SerialSessionBuilder};
use serial::{ConnectionParams, SendRequest, SerialInterface, Transport};
use sink::ConsoleSink;

/// Build the session from the command line and run until the operator quits
pub async fn run(cli: Cli) -> anyhow::Result<()> {
  let mut config = match &cli.config {
    Some(path) => AppConfig::load(path)
      .with_context(|| format!("Failed to load config '{}'", path.display()))?,
    None => AppConfig::default(),
  };
  cli.apply(&mut config);

  if cli.list {
    let ports = serial::list_ports().context("Failed to enumerate serial ports")?;
    print_ports(&ports, &mut std::io::stdout())?;
    return Ok(());
  }

  let sink = Arc::new(ConsoleSink::new(config.display.show_timestamps));
  let mut session = SerialSessionBuilder::new(SerialInterface::new(), sink.clone())
    .policy(config.poll.clone())
    .framer(config.framer.clone())
    .build();
  session.start()?;

  if cli.test {
    let params = self_test_port(&session, &config)?;
    return self_test(&mut session, params, config.send, SelfTestPace::default()).await;
  }

  if !config.connection.port_name.is_empty() {
    // A failed startup connect is already reported by the sink; stay in the shell
    if let Err(e) = session.connect(config.connection.clone()).await {
      log::warn!("Startup connect failed: {}", e);
    }
  }

  let mut console = Console::new(session, sink, &config);
  console.run().await?;
  log::info!("MCU serial terminal exited");
  Ok(())
}

/// Pauses between self-test steps
#[derive(Debug, Clone, Copy)]
pub struct SelfTestPace {
  /// Wait after connecting for the device to boot and print its banner
  pub settle: Duration,
  /// Wait after each quick command for the reply
  pub reply: Duration,
}

impl Default for SelfTestPace {
  fn default() -> Self {
    Self { settle: Duration::from_secs(5), reply: Duration::from_secs(2) }
  }
}

/// Resolve the port for `--test`: the configured one, else the first listed
fn self_test_port(session: &SerialSession<SerialInterface>, config: &AppConfig) -> anyhow::Result<ConnectionParams> {
  let mut params = config.connection.clone();
  if params.port_name.is_empty() {
    let ports = session.list_ports().context("Failed to enumerate serial ports")?;
    print_ports(&ports, &mut std::io::stdout())?;
    match ports.first() {
      Some(port) => params.port_name = port.port_name.clone(),
      None => bail!("No serial ports available for the self-test"),
    }
  }
  Ok(params)
}

/// Connect, send `AT` and `STATUS`, disconnect and stop the reader.
///
/// The reader is stopped even when a step fails. A step failure is what
/// gets returned; a stop failure is only returned when every step passed.
pub async fn self_test<T: Transport>(
  session: &mut SerialSession<T>,
  params: ConnectionParams,
  send: SendDefaults,
  pace: SelfTestPace,
) -> anyhow::Result<()> {
  println!("Self-test on {} ({})", params.port_name, params.framing());
  let result = async {
    session.connect(params).await?;
    tokio::time::sleep(pace.settle).await;
    for command in ["AT", "STATUS"] {
      session.send(SendRequest::text(command, send.append_cr, send.append_lf)).await?;
      tokio::time::sleep(pace.reply).await;
    }
    tokio::time::sleep(pace.reply / 2).await;
    session.disconnect().await
  }
  .await;

  let stopped = session.stop().await;
  match (result, stopped) {
    (Err(e), Err(stop_err)) => {
      log::error!("Reader did not stop cleanly after the self-test: {}", stop_err);
      Err(e).context("Self-test failed")
    }
    (Err(e), Ok(())) => Err(e).context("Self-test failed"),
    (Ok(()), stopped) => stopped.context("Self-test passed but the reader did not stop"),
  }
}
