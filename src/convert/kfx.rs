//! KFX Output plugin detection.
//!
//! Producing KFX requires a third-party Calibre plugin. The gate probes
//! `calibre-customize -l` and looks for the plugin's listing line; batch
//! KFX work refuses to start when the gate fails and the config requires
//! the plugin.

use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

/// Probe timeout: a wedged Calibre install must not hang the batch.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// The plugin listing line, as `calibre-customize -l` prints it.
static KFX_PLUGIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)KFX Output.*Convert ebooks to KFX format")
        .unwrap_or_else(|e| panic!("invalid KFX plugin regex: {e}"))
});

/// Presence gate for the Calibre KFX Output plugin.
#[derive(Debug, Clone)]
pub struct KfxPluginGate {
    command: PathBuf,
}

impl Default for KfxPluginGate {
    fn default() -> Self {
        Self::new()
    }
}

impl KfxPluginGate {
    /// Gate probing the system `calibre-customize`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            command: PathBuf::from("calibre-customize"),
        }
    }

    /// Gate probing a custom command (for testing with stub executables).
    #[must_use]
    pub fn with_command(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
        }
    }

    /// Runs the probe. Succeeds iff the plugin listing contains the KFX
    /// Output line; a missing tool, non-zero exit, or timeout all fail the
    /// gate rather than erroring.
    #[instrument(skip(self))]
    pub async fn is_available(&self) -> bool {
        let probe = Command::new(&self.command)
            .arg("-l")
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(PROBE_TIMEOUT, probe).await {
            Ok(Ok(output)) => output,
            Ok(Err(error)) => {
                warn!(%error, command = %self.command.display(), "calibre-customize not runnable");
                return false;
            }
            Err(_) => {
                warn!("timeout while listing Calibre plugins");
                return false;
            }
        };

        if !output.status.success() {
            warn!(
                status = %output.status,
                "calibre-customize -l failed; treating KFX plugin as missing"
            );
            return false;
        }

        let listing = String::from_utf8_lossy(&output.stdout);
        let found = KFX_PLUGIN_RE.is_match(&listing);
        debug!(found, "KFX Output plugin probe");
        found
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_regex_matches_listing_line() {
        let listing = "KFX Output (2, 17, 0) - Convert ebooks to KFX format\n\
                       EPUB Output (1, 0, 0) - Convert ebooks to EPUB format";
        assert!(KFX_PLUGIN_RE.is_match(listing));
    }

    #[test]
    fn test_plugin_regex_is_case_insensitive() {
        assert!(KFX_PLUGIN_RE.is_match("kfx output - convert ebooks to kfx format"));
    }

    #[test]
    fn test_plugin_regex_rejects_other_plugins() {
        assert!(!KFX_PLUGIN_RE.is_match("EPUB Output - Convert ebooks to EPUB format"));
        assert!(!KFX_PLUGIN_RE.is_match("KFX Input - Read KFX books"));
    }

    #[tokio::test]
    async fn test_missing_command_fails_gate() {
        let gate = KfxPluginGate::with_command("/nonexistent/calibre-customize");
        assert!(!gate.is_available().await);
    }
}
