use tracing_subscriber::EnvFilter;

/// Format of emitted log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, clap::Args)]
pub struct LogArgs {
    /// Filter of logged events, as a level ("info") or as
    /// comma-separated directives ("pl_session=debug,warn").
    #[clap(long = "log.level", env = "PLSD_LOG", default_value = "info")]
    pub level: String,
    #[clap(long = "log.format", value_enum, default_value = "text")]
    pub format: LogFormat,
}

/// Install the global tracing subscriber, which writes to stderr.
pub fn init_logging(args: &LogArgs) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_new(&args.level)?;

    let builder = tracing_subscriber::fmt::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339());

    let result = match args.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder
            .json()
            // Otherwise fields are nested under "fields".
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .try_init(),
    };
    result.map_err(|err| anyhow::anyhow!(err))
}

#[cfg(test)]
mod test {
    use super::{LogArgs, LogFormat};
    use clap::Parser;

    #[derive(clap::Parser)]
    struct Cmd {
        #[clap(flatten)]
        log: LogArgs,
    }

    #[test]
    fn test_log_args() {
        let cmd = Cmd::parse_from(["plsd", "--log.level=pl_session=debug", "--log.format", "json"]);
        assert_eq!(cmd.log.level, "pl_session=debug");
        assert_eq!(cmd.log.format, LogFormat::Json);
    }
}
