mod api;

use api::{HubState, WriteMode};
use clap::Parser;
use presence_core::{AccumulatorOptions, SystemClock};
use presence_storage::StatusStore;
use std::{
    fs::OpenOptions,
    io::{self, Write},
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, Mutex},
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

const DEFAULT_ADDR: &str = "127.0.0.1:8787";
const SERVICE_NAME: &str = "presence-hub";

#[derive(Clone, Debug)]
struct Config {
    addr: String,
    auth_token: Option<String>,
    kv_path: Option<PathBuf>,
    write_mode: WriteMode,
    clamp_negative_elapsed: bool,
    debug: bool,
    log_dir: String,
}

#[derive(Parser, Debug)]
#[command(name = "presence-hub")]
struct Args {
    #[arg(long, default_value = "")]
    addr: String,
    /// Shared secret for heartbeat writes; empty accepts anonymous writes.
    #[arg(long, default_value = "")]
    auth_token: String,
    /// SQLite file backing the status slots; empty keeps them in memory.
    #[arg(long, default_value = "")]
    kv_path: String,
    #[arg(long, value_enum, default_value_t = WriteMode::LastWriteWins)]
    write_mode: WriteMode,
    #[arg(long, default_value_t = false)]
    clamp_negative_elapsed: bool,
    #[arg(long, default_value_t = false)]
    debug: bool,
    #[arg(long, default_value = "")]
    log_dir: String,
}

#[tokio::main]
async fn main() {
    let config = load_config();
    let _log_guard = init_logging(&config);
    let addr: SocketAddr = match config.addr.parse() {
        Ok(value) => value,
        Err(err) => {
            error!(event = "invalid_addr", error = %err, addr = %config.addr);
            return;
        }
    };

    let store = Arc::new(StatusStore::open(config.kv_path.as_deref()));
    let hub = Arc::new(HubState::new(
        store.clone(),
        Arc::new(SystemClock),
        config.auth_token.clone(),
        config.write_mode,
        AccumulatorOptions {
            clamp_negative_elapsed: config.clamp_negative_elapsed,
        },
        SERVICE_NAME.to_string(),
    ));
    if !hub.requires_auth() {
        warn!(event = "auth_disabled", "heartbeat writes accepted without a token");
    }

    let app = api::router(hub);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(value) => value,
        Err(err) => {
            error!(event = "hub_error", error = %err);
            return;
        }
    };

    info!(
        event = "hub_start",
        addr = %config.addr,
        durable = store.is_durable(),
        write_mode = ?config.write_mode
    );

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!(event = "hub_error", error = %err);
    }
    info!(event = "hub_stop");
}

fn load_config() -> Config {
    let args = Args::parse();
    Config {
        addr: resolve_flag(&args.addr, "PRESENCE_ADDR").unwrap_or_else(|| DEFAULT_ADDR.to_string()),
        auth_token: resolve_flag(&args.auth_token, "PRESENCE_AUTH_TOKEN"),
        kv_path: resolve_flag(&args.kv_path, "PRESENCE_KV_PATH").map(PathBuf::from),
        write_mode: args.write_mode,
        clamp_negative_elapsed: args.clamp_negative_elapsed,
        debug: args.debug || env_true("PRESENCE_DEBUG"),
        log_dir: resolve_flag(&args.log_dir, "PRESENCE_LOG_DIR")
            .unwrap_or_else(|| ".presence/logs".to_string()),
    }
}

/// Flag value when set, otherwise the environment variable, otherwise `None`.
fn resolve_flag(flag: &str, env_key: &str) -> Option<String> {
    if !flag.trim().is_empty() {
        return Some(flag.to_string());
    }
    match std::env::var(env_key) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

fn env_true(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}

fn init_logging(config: &Config) -> Option<LogGuard> {
    let level = if config.debug {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("PRESENCE_LOG_LEVEL") {
        level
    } else {
        "info".to_string()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let writer = match open_log_file(&config.log_dir) {
        Ok(log_guard) => log_guard,
        Err(err) => {
            eprintln!("log_file_error: {err}");
            LogGuard { file: None }
        }
    };
    let file = writer.file.clone();
    let make_writer = BoxMakeWriter::new(move || MultiWriter::new(file.clone()));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(writer)
}

struct LogGuard {
    file: Option<Arc<Mutex<std::fs::File>>>,
}

struct MultiWriter {
    stdout: io::Stdout,
    file: Option<Arc<Mutex<std::fs::File>>>,
}

impl MultiWriter {
    fn new(file: Option<Arc<Mutex<std::fs::File>>>) -> Self {
        Self {
            stdout: io::stdout(),
            file,
        }
    }
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = self.stdout.write_all(buf);
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.write_all(buf);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.stdout.flush();
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
        Ok(())
    }
}

fn open_log_file(log_dir: &str) -> io::Result<LogGuard> {
    if log_dir.trim().is_empty() {
        return Ok(LogGuard { file: None });
    }
    let dir = PathBuf::from(log_dir);
    if std::fs::create_dir_all(&dir).is_err() {
        return Ok(LogGuard { file: None });
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(format!("{SERVICE_NAME}.log")))?;
    Ok(LogGuard {
        file: Some(Arc::new(Mutex::new(file))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_takes_precedence_over_environment() {
        assert_eq!(
            resolve_flag("0.0.0.0:9000", "PRESENCE_TEST_UNSET_ADDR"),
            Some("0.0.0.0:9000".to_string())
        );
        assert_eq!(resolve_flag("  ", "PRESENCE_TEST_UNSET_ADDR"), None);
    }

    #[test]
    fn log_file_is_created_inside_log_dir() {
        let dir = tempfile::tempdir().expect("temp dir");
        let guard = open_log_file(&dir.path().to_string_lossy()).expect("open log");
        assert!(guard.file.is_some());
        assert!(dir.path().join("presence-hub.log").exists());

        let none = open_log_file("").expect("no log dir");
        assert!(none.file.is_none());
    }
}
