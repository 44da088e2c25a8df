//! Logger bootstrap for the keyledger binaries. Library code only talks to the
//! `log` facade; nothing here runs unless a binary asks for it.

use env_logger::{Builder, Target};
use log::{LevelFilter, Record};
use serde_json::{json, Value};
use std::env;
use std::io::Write;
use std::sync::OnceLock;

static INIT: OnceLock<()> = OnceLock::new();

const FILTER_ENV: &str = "RUST_LOG";
const FORMAT_ENV: &str = "KEYLEDGER_LOG_FORMAT";
const LEVEL_ENV: &str = "KEYLEDGER_LOG_LEVEL";

/// HTTP client internals that only get as chatty as `warn`, even when the
/// keyledger level is `debug`. An explicit `RUST_LOG` overrides this.
const HTTP_TARGETS: &[&str] = &["hyper", "hyper_util", "reqwest", "rustls"];

/// Initialise the global logger on stderr.
///
/// The first caller wins; later calls are no-ops. `RUST_LOG` is used verbatim
/// when set. Otherwise the level comes from `KEYLEDGER_LOG_LEVEL`, then
/// `default_level`. Output is one JSON object per line unless
/// `KEYLEDGER_LOG_FORMAT=plain`.
pub fn init(default_level: &str) {
    let _ = INIT.get_or_init(|| {
        let settings = LogSettings::resolve(|name| env::var(name).ok(), default_level);
        install(&settings);
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Json,
    Plain,
}

impl LogFormat {
    fn parse(value: Option<&str>) -> Self {
        match value.map(|raw| raw.trim().to_ascii_lowercase()).as_deref() {
            Some("plain") | Some("text") => LogFormat::Plain,
            _ => LogFormat::Json,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct LogSettings {
    filters: String,
    format: LogFormat,
}

impl LogSettings {
    fn resolve(lookup: impl Fn(&str) -> Option<String>, default_level: &str) -> Self {
        let present = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let format = LogFormat::parse(present(FORMAT_ENV).as_deref());

        if let Some(explicit) = present(FILTER_ENV) {
            return Self {
                filters: explicit,
                format,
            };
        }

        let level = present(LEVEL_ENV).unwrap_or_else(|| default_level.to_string());
        let mut directives = vec![level.clone()];
        if let Ok(base) = level.parse::<LevelFilter>() {
            let http = base.min(LevelFilter::Warn).to_string().to_ascii_lowercase();
            directives.extend(HTTP_TARGETS.iter().map(|target| format!("{target}={http}")));
        }

        Self {
            filters: directives.join(","),
            format,
        }
    }
}

fn install(settings: &LogSettings) {
    let mut builder = Builder::new();
    builder.parse_filters(&settings.filters).target(Target::Stderr);
    match settings.format {
        LogFormat::Json => builder.format(|buf, record| {
            let line = json_line(&buf.timestamp().to_string(), record);
            writeln!(buf, "{line}")
        }),
        LogFormat::Plain => builder.format(|buf, record| {
            writeln!(
                buf,
                "{} {:<5} {} - {}",
                buf.timestamp(),
                record.level().to_string().to_ascii_lowercase(),
                record.target(),
                record.args()
            )
        }),
    };

    if let Err(err) = builder.try_init() {
        eprintln!("failed to initialize logger: {err}");
    }
}

fn json_line(timestamp: &str, record: &Record<'_>) -> Value {
    json!({
        "timestamp": timestamp,
        "level": record.level().to_string().to_ascii_lowercase(),
        "target": record.target(),
        "message": record.args().to_string(),
    })
}
