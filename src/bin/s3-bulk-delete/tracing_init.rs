// Initializes the tracing subscriber for the CLI binary.
//
// Events at warn level and above go to stderr, everything else to stdout.

use std::env;
use std::io::IsTerminal;

use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::MakeWriterExt;

use s3_bulk_delete::config::TracingConfig;

const EVENT_FILTER_ENV_VAR: &str = "RUST_LOG";

pub fn init_tracing(config: &TracingConfig) {
    let fmt_span = if config.span_events_tracing {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let writer = std::io::stderr
        .with_max_level(Level::WARN)
        .or_else(std::io::stdout);

    let subscriber_builder = tracing_subscriber::fmt()
        .with_writer(writer)
        .compact()
        .with_ansi(!config.disable_color_tracing && std::io::stdout().is_terminal())
        .with_span_events(fmt_span);

    let tracing_level = config.tracing_level;
    let (event_filter, show_target) = build_event_filter(
        tracing_level,
        config.aws_sdk_tracing,
        env::var(EVENT_FILTER_ENV_VAR).ok(),
    );

    let subscriber_builder = subscriber_builder
        .with_env_filter(event_filter)
        .with_target(show_target);
    if config.json_tracing {
        subscriber_builder.json().init();
    } else {
        subscriber_builder.init();
    }
}

/// Event filter directives and whether event targets are worth showing.
fn build_event_filter(
    tracing_level: log::Level,
    aws_sdk_tracing: bool,
    env_filter: Option<String>,
) -> (String, bool) {
    if aws_sdk_tracing {
        return (
            format!(
                "s3_bulk_delete={tracing_level},aws_smithy_runtime={tracing_level},aws_config={tracing_level},aws_sigv4={tracing_level}"
            ),
            true,
        );
    }

    match env_filter {
        Some(env_filter) => (env_filter, true),
        None => (format!("s3_bulk_delete={tracing_level}"), false),
    }
}
