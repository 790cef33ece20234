//! Logging setup plus a diagnostic channel with a thread-local sink.
//!
//! Planner and cursor internals emit `diag!` lines (target `bisongate::diag`)
//! that tests can capture per-thread without racing on the global logger.

use std::cell::RefCell;

/// Configure logging globally for the process.
/// - dir: base directory for logs; if None, current directory.
/// - level: error|warn|info|debug|trace
/// - retention: number of rolled files to keep (default 7)
pub fn configure_logging(
    dir: Option<&std::path::Path>,
    level: Option<&str>,
    retention: Option<usize>,
) {
    configure_logging_with_diag(dir, level, retention, false);
}

/// Configure logging globally with optional diag routing to files.
/// If `enable_diag` is true, messages logged via the `diag!` macro (target `bisongate::diag`)
/// will also be persisted to a `diag.log` rolling file in the base directory.
pub fn configure_logging_with_diag(
    dir: Option<&std::path::Path>,
    level: Option<&str>,
    retention: Option<usize>,
    enable_diag: bool,
) {
    use log::LevelFilter;
    use log4rs::append::rolling_file::RollingFileAppender;
    use log4rs::append::rolling_file::policy::compound::{
        CompoundPolicy, roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger,
    };
    use log4rs::config::{Appender, Config, Logger, Root};
    use log4rs::encode::pattern::PatternEncoder;
    use std::path::PathBuf;
    let base = dir
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    let keep = retention.unwrap_or(7) as u32;
    let lvl = match level.unwrap_or("info").to_ascii_lowercase().as_str() {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    };
    let enc_pattern = "{d(%Y-%m-%d %H:%M:%S%.3f)} [{l}] {t} - {m}{n}";
    let roller = FixedWindowRoller::builder()
        .build(&format!("{}", base.join("app.{}.log").display()), keep)
        .unwrap();
    let policy =
        CompoundPolicy::new(Box::new(SizeTrigger::new(10 * 1024 * 1024)), Box::new(roller));
    let appender = RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(enc_pattern)))
        .build(base.join("app.log"), Box::new(policy))
        .unwrap();
    let audit_roller = FixedWindowRoller::builder()
        .build(&format!("{}", base.join("audit.{}.log").display()), keep)
        .unwrap();
    let audit_policy =
        CompoundPolicy::new(Box::new(SizeTrigger::new(10 * 1024 * 1024)), Box::new(audit_roller));
    let audit_appender = RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(enc_pattern)))
        .build(base.join("audit.log"), Box::new(audit_policy))
        .unwrap();
    let mut builder = Config::builder()
        .appender(Appender::builder().build("app", Box::new(appender)))
        .appender(Appender::builder().build("audit", Box::new(audit_appender)))
        .logger(Logger::builder().appender("audit").additive(false).build("bisongate::audit", lvl));

    if enable_diag {
        let diag_roller = FixedWindowRoller::builder()
            .build(&format!("{}", base.join("diag.{}.log").display()), keep)
            .unwrap();
        let diag_policy = CompoundPolicy::new(
            Box::new(SizeTrigger::new(10 * 1024 * 1024)),
            Box::new(diag_roller),
        );
        let diag_appender = RollingFileAppender::builder()
            .encoder(Box::new(PatternEncoder::new(enc_pattern)))
            .build(base.join("diag.log"), Box::new(diag_policy))
            .unwrap();
        builder = builder
            .appender(Appender::builder().build("diag", Box::new(diag_appender)))
            .logger(
                Logger::builder()
                    .appender("diag")
                    .additive(false)
                    .build("bisongate::diag", LevelFilter::Trace),
            );
    } else {
        builder = builder.logger(
            Logger::builder().additive(false).build("bisongate::diag", LevelFilter::Trace),
        );
    }

    let config = builder.build(Root::builder().appender("app").build(lvl)).unwrap();
    let _ = log4rs::init_config(config);
}

/// Configure logging from environment variables if present:
/// - BISONGATE_LOG_DIR
/// - BISONGATE_LOG_LEVEL
/// - BISONGATE_LOG_RETENTION
/// - BISONGATE_DIAG
pub fn configure_from_env() {
    let dir = std::env::var("BISONGATE_LOG_DIR").ok().map(std::path::PathBuf::from);
    let level = std::env::var("BISONGATE_LOG_LEVEL").ok();
    let retention =
        std::env::var("BISONGATE_LOG_RETENTION").ok().and_then(|s| s.parse::<usize>().ok());
    let diag_enabled = std::env::var("BISONGATE_DIAG")
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false);
    configure_logging_with_diag(dir.as_deref(), level.as_deref(), retention, diag_enabled);
}

thread_local! {
    static TL_SINK: RefCell<Option<Vec<String>>> = const { RefCell::new(None) };
}

/// Guard that disables the thread-local diag sink on drop.
pub struct DiagSinkGuard;
impl Drop for DiagSinkGuard {
    fn drop(&mut self) {
        TL_SINK.with(|s| *s.borrow_mut() = None);
    }
}

/// Enable the thread-local diag sink for the current thread. Returns a guard that disables it on drop.
pub fn enable_diag_sink() -> DiagSinkGuard {
    TL_SINK.with(|s| *s.borrow_mut() = Some(Vec::new()));
    DiagSinkGuard
}

/// Push a message into the thread-local sink if enabled.
pub fn diag_write(msg: &str) {
    TL_SINK.with(|s| {
        if let Some(buf) = s.borrow_mut().as_mut() {
            buf.push(msg.to_owned());
        }
    });
}

/// Drain and return the captured messages for the current thread. If disabled, returns an empty vec.
pub fn diag_drain() -> Vec<String> {
    TL_SINK.with(|s| match s.borrow_mut().as_mut() {
        Some(buf) => {
            let out = buf.clone();
            buf.clear();
            out
        }
        None => Vec::new(),
    })
}

/// Peek at the current captured messages without clearing them.
pub fn diag_snapshot() -> Vec<String> {
    TL_SINK.with(|s| s.borrow().as_ref().cloned().unwrap_or_default())
}

/// Emit a diagnostic line and capture it in the thread-local sink if enabled.
#[macro_export]
macro_rules! diag {
    ($($arg:tt)*) => {{
        let __s = format!($($arg)*);
        $crate::logger::diag_write(&__s);
        log::log!(target: "bisongate::diag", log::Level::Trace, "{}", __s);
    }};
}
