use std::io::Write;

use serde::Serialize;

use crate::error::CliError;

/// Writes `value` to stdout as one JSON document.
pub fn render<T: Serialize>(value: &T, pretty: bool) -> Result<(), CliError> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{text}")?;
    Ok(())
}
