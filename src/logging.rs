use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_DIRECTIVE: &str = "android_x86_hook=info";
const VERBOSE_DIRECTIVE: &str = "android_x86_hook=debug";

/// Filter for the stderr layer: `--verbose` wins, then `RUST_LOG`, then the default.
pub fn filter(verbose: bool, rust_log: Option<&str>) -> EnvFilter {
    if verbose {
        return EnvFilter::new(VERBOSE_DIRECTIVE);
    }
    match rust_log {
        Some(directives) if !directives.trim().is_empty() => EnvFilter::new(directives),
        _ => EnvFilter::new(DEFAULT_DIRECTIVE),
    }
}

/// Install the global subscriber. Logs go to stderr so stdout stays free for
/// command output.
pub fn init(verbose: bool) {
    let rust_log = std::env::var("RUST_LOG").ok();
    let terminal_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(filter(verbose, rust_log.as_deref()));

    let _ = tracing_subscriber::registry().with(terminal_layer).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_overrides_env() {
        let f = filter(true, Some("warn"));
        assert_eq!(f.to_string(), VERBOSE_DIRECTIVE);
    }

    #[test]
    fn env_used_when_set() {
        let f = filter(false, Some("warn"));
        assert_eq!(f.to_string(), "warn");
    }

    #[test]
    fn default_when_env_blank() {
        assert_eq!(filter(false, None).to_string(), DEFAULT_DIRECTIVE);
        assert_eq!(filter(false, Some("  ")).to_string(), DEFAULT_DIRECTIVE);
    }
}
