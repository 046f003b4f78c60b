use anyhow::{anyhow, Result};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

pub(crate) fn parse_log_level(value: &str) -> Result<LevelFilter, String> {
    value
        .trim()
        .parse::<LevelFilter>()
        .map_err(|_| format!("unknown log level '{value}' (expected off|error|warn|info|debug|trace)"))
}

/// Installs the stderr subscriber. `RUST_LOG` directives override `default_level`.
pub(crate) fn init_tracing(default_level: LevelFilter) -> Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|error| anyhow!("failed to install tracing subscriber: {error}"))
}

#[cfg(test)]
mod tests {
    use tracing::level_filters::LevelFilter;

    use super::parse_log_level;

    #[test]
    fn unit_parse_log_level_accepts_names_case_insensitively() {
        assert_eq!(parse_log_level("DEBUG"), Ok(LevelFilter::DEBUG));
        assert_eq!(parse_log_level(" warn "), Ok(LevelFilter::WARN));
    }

    #[test]
    fn regression_parse_log_level_rejects_unknown_names() {
        let error = parse_log_level("loud").expect_err("unknown level");
        assert!(error.contains("unknown log level 'loud'"));
    }
}
