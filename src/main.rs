use dotenvy::dotenv;
use regex::Regex;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::{error, info};
use tracing_subscriber::{prelude::*, EnvFilter};
use transmission_tg_control::bot::run_bot;
use transmission_tg_control::config::Settings;

const DEFAULT_LOG_FILTER: &str = "transmission_tg_control=info,teloxide=warn,reqwest=warn,hyper=warn";
const DEBUG_LOG_FILTER: &str = "transmission_tg_control=debug,teloxide=info,reqwest=warn,hyper=warn";

/// Regex patterns for redacting sensitive data
struct RedactionPatterns {
    token1: Regex,
    token2: Regex,
    token3: Regex,
    userinfo: Regex,
    basic_auth: Regex,
    /// Literal secrets known only after the configuration is loaded
    secrets: RwLock<Vec<String>>,
}

impl RedactionPatterns {
    /// Initialize all regex patterns
    ///
    /// # Errors
    ///
    /// Returns an error if any regex pattern is invalid
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            token1: Regex::new(r"(https?://[^/]+/bot)([0-9]+:[A-Za-z0-9_-]+)(/['\s]*)")?,
            token2: Regex::new(r"([0-9]{8,10}:[A-Za-z0-9_-]{35})")?,
            token3: Regex::new(r"(bot[0-9]{8,10}:)[A-Za-z0-9_-]+")?,
            userinfo: Regex::new(r"(https?://[^:/@\s]+:)[^@\s]+@")?,
            basic_auth: Regex::new(r"(?i)(authorization:\s*basic\s+)[A-Za-z0-9+/=]+")?,
            secrets: RwLock::new(Vec::new()),
        })
    }

    /// Mask `secret` verbatim from now on. Empty values are ignored.
    fn add_secret(&self, secret: &str) {
        if secret.is_empty() {
            return;
        }
        if let Ok(mut secrets) = self.secrets.write() {
            secrets.push(secret.to_string());
        }
    }

    fn redact(&self, input: &str) -> String {
        let mut output = input.to_string();
        output = self
            .token1
            .replace_all(&output, "$1[TELEGRAM_TOKEN]$3")
            .to_string();
        output = self
            .token2
            .replace_all(&output, "[TELEGRAM_TOKEN]")
            .to_string();
        output = self
            .token3
            .replace_all(&output, "$1[TELEGRAM_TOKEN]")
            .to_string();
        output = self.userinfo.replace_all(&output, "$1[MASKED]@").to_string();
        output = self
            .basic_auth
            .replace_all(&output, "$1[MASKED]")
            .to_string();
        if let Ok(secrets) = self.secrets.read() {
            for secret in secrets.iter() {
                output = output.replace(secret.as_str(), "[MASKED]");
            }
        }
        output
    }
}

struct RedactingWriter<W: Write> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> RedactingWriter<W> {
    const fn new(inner: W, patterns: Arc<RedactionPatterns>) -> Self {
        Self { inner, patterns }
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let redacted = self.patterns.redact(&s);
        self.inner.write_all(redacted.as_bytes())?;
        // The caller's buffer was consumed even if the redacted length differs.
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct RedactingMakeWriter<F> {
    make_inner: F,
    patterns: Arc<RedactionPatterns>,
}

impl<F> RedactingMakeWriter<F> {
    const fn new(make_inner: F, patterns: Arc<RedactionPatterns>) -> Self {
        Self {
            make_inner,
            patterns,
        }
    }
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::new((self.make_inner)(), self.patterns.clone())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    // Before logging, so nothing is ever written unredacted
    let patterns = Arc::new(RedactionPatterns::new().map_err(|e| {
        eprintln!("Failed to compile regex patterns: {e}");
        e
    })?);

    init_logging(Arc::clone(&patterns));

    info!("Starting Transmission Telegram control bot...");

    let settings = init_settings();
    patterns.add_secret(&settings.bot_token);
    patterns.add_secret(&settings.transmission_rpc.password);

    info!(
        rpc = %settings.transmission_rpc.url,
        poll_interval = ?settings.poll_interval(),
        categories = ?settings.categories.keys().collect::<Vec<_>>(),
        "Configuration summary"
    );

    run_bot(settings).await;

    Ok(())
}

fn debug_mode() -> bool {
    std::env::var("DEBUG_MODE").is_ok_and(|v| matches!(v.trim(), "1" | "true"))
}

fn init_logging(patterns: Arc<RedactionPatterns>) {
    let make_writer = RedactingMakeWriter::new(io::stderr, patterns);
    let default_filter = if debug_mode() {
        DEBUG_LOG_FILTER
    } else {
        DEFAULT_LOG_FILTER
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
}

fn init_settings() -> Arc<Settings> {
    let Some(path) = std::env::args_os().nth(1).map(PathBuf::from) else {
        error!("Usage: transmission-tg-control <config.json>");
        std::process::exit(1);
    };

    match Settings::load(&path) {
        Ok(s) => {
            info!(path = %path.display(), "Configuration loaded successfully.");
            Arc::new(s)
        }
        Err(e) => {
            error!(path = %path.display(), "Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    }
}
