//! External LTL→DFA translation
//!
//! The engine does not compile temporal logic itself: a formula is handed to
//! an external translator expected to print the textual DFA spec on stdout.
//! The command comes from `$HEDFA_LTL2DFA` (default `ltl2dfa`) and is invoked
//! as `<cmd> <num_ap> <formula>`. Spawn failures, nonzero exits, and
//! non-UTF-8 output all surface as [`Error::BadLtl`]; unparsable-but-textual
//! output is caught by the spec parser downstream.
#![forbid(unsafe_code)]

use std::process::Command;

use crate::Error;

/// Environment variable overriding the translator command.
pub const TRANSLATOR_ENV: &str = "HEDFA_LTL2DFA";

const DEFAULT_TRANSLATOR: &str = "ltl2dfa";

/// Run the external translator and return its stdout.
pub fn translate(formula: &str, num_ap: usize) -> Result<String, Error> {
    let cmd = std::env::var(TRANSLATOR_ENV).unwrap_or_else(|_| DEFAULT_TRANSLATOR.to_string());
    tracing::debug!(%cmd, num_ap, formula, "invoking LTL translator");
    let output = Command::new(&cmd)
        .arg(num_ap.to_string())
        .arg(formula)
        .output()
        .map_err(|e| Error::BadLtl(format!("spawn translator `{cmd}`: {e}")))?;
    if !output.status.success() {
        return Err(Error::BadLtl(format!(
            "translator `{cmd}` failed ({}): {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    String::from_utf8(output.stdout)
        .map_err(|e| Error::BadLtl(format!("translator output is not UTF-8: {e}")))
}
