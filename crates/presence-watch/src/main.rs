use anyhow::Result;
use clap::Parser;
use presence_core::{Clock, SystemClock};
use presence_watch::{
    poll_once, render_card, resolve_endpoint, HttpStatusSource, PollerConfig, PresencePoller,
    PresenceView, DEFAULT_ENDPOINT, DEFAULT_POLL_MS,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "presence-watch")]
struct Args {
    #[arg(long, default_value = "http://127.0.0.1:8787")]
    base_url: String,
    /// Status path or absolute URL.
    #[arg(long, env = "PRESENCE_STATUS_URL", default_value = DEFAULT_ENDPOINT)]
    endpoint: String,
    #[arg(long, default_value_t = DEFAULT_POLL_MS)]
    poll_ms: u64,
    /// Fetch once, print the card and exit.
    #[arg(long, default_value_t = false)]
    once: bool,
    /// Hide the endpoint footer.
    #[arg(long, default_value_t = false)]
    compact: bool,
    #[arg(long, default_value_t = false)]
    debug: bool,
}

fn init_logging(debug: bool) {
    let level = if debug {
        "debug".to_string()
    } else {
        std::env::var("PRESENCE_LOG_LEVEL").unwrap_or_else(|_| "warn".to_string())
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn print_card(view: &PresenceView, endpoint: Option<&str>) {
    println!();
    for line in render_card(view, endpoint) {
        println!("{line}");
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    let url = resolve_endpoint(&args.base_url, &args.endpoint);
    let footer = (!args.compact).then_some(url.as_str());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let config = PollerConfig::new(url.clone(), args.poll_ms);
    let source = HttpStatusSource::new(url.clone(), config.poll_interval)?;

    if args.once {
        let update = poll_once(&source, clock.as_ref(), config.poll_interval).await;
        print_card(&PresenceView::derive(&update, clock.now_ms()), footer);
        return Ok(());
    }

    let handle = PresencePoller::spawn(source, config, clock.clone());
    let mut updates = handle.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let latest = updates.borrow_and_update().clone();
                if let Some(update) = latest {
                    print_card(&PresenceView::derive(&update, clock.now_ms()), footer);
                }
            }
        }
    }

    handle.dispose().await;
    info!(event = "watch_stop");
    Ok(())
}
