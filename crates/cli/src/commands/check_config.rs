//! Check-config command - Load a configuration file and report its settings

use std::path::Path;

use anyhow::{Context, Result};
use intake_call_engine::IntakeConfig;
use tracing::info;

/// Execute check-config command
pub fn execute(path: &Path) -> Result<()> {
    info!("🔍 Checking configuration {}", path.display());
    let config = IntakeConfig::from_file(path)
        .with_context(|| format!("configuration {} is invalid", path.display()))?;

    let monitoring = &config.monitoring;
    println!("\n═══ Intake Configuration ═══");
    println!("✅ {} is valid", path.display());
    println!("👤 Default agent capacity: {}", config.agents.default_capacity);
    println!(
        "🩺 Degraded after: {:?}, unresponsive after: {:?}",
        monitoring.degraded_after(),
        monitoring.unresponsive_after()
    );
    println!("⏱️ Tick interval: {:?}", monitoring.tick_interval());
    println!("📈 Queue overflow threshold: {}", monitoring.queue_overflow_threshold);
    println!("📨 Handler timeout: {:?}", config.events.handler_timeout());
    println!(
        "💾 Storage: {}",
        config.database.url.as_deref().unwrap_or("in-memory")
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config_file(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    #[test]
    fn test_valid_file_passes() {
        let file = config_file(
            ".toml",
            "[agents]\ndefault_capacity = 2\n\n[monitoring]\ntick_interval_ms = 250\n",
        );
        assert!(execute(file.path()).is_ok());
    }

    #[test]
    fn test_inverted_health_thresholds_fail() {
        let file = config_file(
            ".toml",
            "[monitoring]\ndegraded_after_ms = 5000\nunresponsive_after_ms = 1000\n",
        );
        let err = execute(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("unresponsive_after_ms"));
    }

    #[test]
    fn test_unknown_format_and_missing_file_fail() {
        let file = config_file(".ini", "[agents]\n");
        assert!(execute(file.path()).is_err());
        assert!(execute(Path::new("/nonexistent/intake.toml")).is_err());
    }
}
