//! Interactive confirmation for destructive commands.

use std::io::{self, BufRead, IsTerminal, Write};

use anyhow::{Result, bail};

/// Ask a yes/no question on stderr. `force` answers yes without asking.
pub fn confirm(message: &str, force: bool) -> Result<bool> {
  if force {
    return Ok(true);
  }

  let stdin = io::stdin();
  if !stdin.is_terminal() || !io::stderr().is_terminal() {
    bail!("Refusing to continue without confirmation; pass --force when not running on a terminal");
  }

  eprint!("{} [y/N] ", message);
  io::stderr().flush()?;

  let mut answer = String::new();
  stdin.lock().read_line(&mut answer)?;
  Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
  matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
