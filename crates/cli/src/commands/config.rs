use std::path::Path;

use anyhow::{Context, Result};
use zipspool_core::Config;

/// Print a commented configuration with every default spelled out
pub fn cmd_config_template(spool_dir: &str) -> Result<()> {
  print!("{}", Config::generate_template(spool_dir));
  Ok(())
}

/// Load and validate a configuration file, then summarize it
pub fn cmd_config_check(path: &Path) -> Result<()> {
  let config = Config::load(path).with_context(|| format!("Invalid configuration {}", path.display()))?;
  let source = &config.source;

  println!("Configuration OK: {}", path.display());
  if let Some(dir) = &source.spool_dir {
    println!("  spool_dir:      {}", dir.display());
  }
  if let Some(dir) = source.resolved_tracker_dir() {
    println!("  tracker_dir:    {}", dir.display());
  }
  println!("  charset:        {}", source.encoding()?.name());
  println!("  consume_order:  {:?}", source.consume_order);
  println!("  delete_policy:  {:?}", source.delete_policy);
  println!("  batch_size:     {}", source.batch_size);
  Ok(())
}
