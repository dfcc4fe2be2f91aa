use clap::ValueEnum;
use tracing::Level;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
#[value(rename_all = "kebab-case")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(val: LogLevel) -> Self {
        match val {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

// stderr へローカル時刻付きで出力する. RUST_LOG が設定されていればそちらを優先
pub fn init_logging(level: LogLevel) {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level.into()).into())
        .from_env_lossy();

    let subscriber = Registry::default().with(filter).with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_timer(ChronoLocal::rfc_3339())
            .with_target(false),
    );

    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("logger already initialized: {}", err);
    }
}
