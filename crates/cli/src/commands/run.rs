use std::fs::OpenOptions;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use spool::{EventSink, SpoolDirectorySource};
use tracing::info;
use zipspool_core::Config;

use crate::sink::JsonLinesSink;

/// How often the host checks whether the poll task died
const LIVENESS_INTERVAL: Duration = Duration::from_millis(250);

/// Run the spooling source until ctrl-c or a fatal error
pub async fn cmd_run(config: Config, output: Option<PathBuf>) -> Result<()> {
  let sink: Arc<dyn EventSink> = match &output {
    Some(path) => {
      let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open output file {}", path.display()))?;
      Arc::new(JsonLinesSink::new(BufWriter::new(file)))
    }
    None => Arc::new(JsonLinesSink::new(std::io::stdout())),
  };

  let mut source = SpoolDirectorySource::new(sink);
  source.configure(config.source).context("Invalid source configuration")?;
  source.start().context("Failed to start spooling source")?;

  let ctrl_c = tokio::signal::ctrl_c();
  tokio::pin!(ctrl_c);
  let mut liveness = tokio::time::interval(LIVENESS_INTERVAL);

  loop {
    tokio::select! {
      biased;
      result = &mut ctrl_c => {
        result.context("Failed to listen for ctrl-c")?;
        info!("Received ctrl-c, stopping");
        break;
      }
      _ = liveness.tick() => {
        if !source.is_running() {
          break;
        }
      }
    }
  }

  source.stop().await;

  let counters = source.counters();
  info!(
    events_accepted = counters.events_accepted,
    batches_accepted = counters.batches_accepted,
    batches_rejected = counters.batches_rejected,
    "Run finished"
  );

  if source.has_fatal_error() {
    bail!("Spooling source stopped after a fatal error, see log for details");
  }
  Ok(())
}
