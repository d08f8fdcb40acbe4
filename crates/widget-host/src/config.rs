use clap::Parser;

/// Host configuration, parsed from the command line.
#[derive(Parser, Debug, Clone)]
#[command(name = "widget-host")]
#[command(about = "Serve widget objects over line-delimited comm frames on stdin/stdout")]
pub struct HostConfig {
    /// Number of base widgets to open at startup
    #[arg(short, long, default_value_t = 1)]
    pub widgets: usize,

    /// Send a display message for each startup widget
    #[arg(short, long)]
    pub display: bool,

    /// Adopt `jupyter.widget` comms opened by the front end
    #[arg(long)]
    pub accept_remote: bool,

    /// Enable verbose logging
    #[arg(long)]
    pub verbose: bool,
}

impl HostConfig {
    /// Default `tracing` filter when `RUST_LOG` is not set.
    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "debug,widget_host=debug,widget_core=debug"
        } else {
            "info,widget_host=info,widget_core=info"
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            widgets: 1,
            display: false,
            accept_remote: false,
            verbose: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_parser() {
        let parsed = HostConfig::try_parse_from(["widget-host"]).unwrap();
        let default = HostConfig::default();

        assert_eq!(parsed.widgets, default.widgets);
        assert_eq!(parsed.display, default.display);
        assert_eq!(parsed.accept_remote, default.accept_remote);
        assert_eq!(parsed.verbose, default.verbose);
    }

    #[test]
    fn test_parse_flags() {
        let config = HostConfig::try_parse_from([
            "widget-host",
            "--widgets",
            "3",
            "--display",
            "--accept-remote",
            "--verbose",
        ])
        .unwrap();

        assert_eq!(config.widgets, 3);
        assert!(config.display);
        assert!(config.accept_remote);
        assert!(config.log_filter().starts_with("debug"));
    }

    #[test]
    fn test_rejects_bad_count() {
        assert!(HostConfig::try_parse_from(["widget-host", "--widgets", "many"]).is_err());
    }
}
