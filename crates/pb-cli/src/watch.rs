//! Monitor driven by navigation events read from stdin
//!
//! Each input line is `<tab id> <url>`; a line with only a tab id is an
//! update that carried no URL. Redirects are written to stdout as JSON lines.

use std::io::Write;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use pb_runtime::{BackgroundMonitor, NavigationEvent, TabController, TabError, TabId};

use crate::store::{runtime, Store};

const EVENT_QUEUE: usize = 256;

/// Reports redirects on stdout instead of driving a browser.
pub struct StdoutTabs;

impl TabController for StdoutTabs {
    async fn redirect(&self, tab_id: TabId, url: &str) -> Result<(), TabError> {
        let line = json!({ "tabId": tab_id, "redirect": url });
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", line)
            .and_then(|()| stdout.flush())
            .map_err(|e| TabError {
                tab_id,
                reason: e.to_string(),
            })
    }
}

pub fn parse_event(line: &str) -> Result<Option<NavigationEvent>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let (tab, url) = match line.split_once(char::is_whitespace) {
        Some((tab, url)) => (tab, Some(url.trim())),
        None => (line, None),
    };
    let tab_id = tab
        .parse::<TabId>()
        .map_err(|e| format!("Invalid tab id '{}': {}", tab, e))?;
    Ok(Some(NavigationEvent {
        tab_id,
        url: url.filter(|u| !u.is_empty()).map(str::to_string),
    }))
}

pub fn run_monitor(store: Store) -> Result<(), String> {
    runtime()?.block_on(run_monitor_async(store))
}

async fn run_monitor_async(store: Store) -> Result<(), String> {
    let bridge = store.bridge();
    let (cache, sync) = bridge
        .attach()
        .await
        .map_err(|e| format!("Failed to load rule tree: {}", e))?;
    let watcher = store
        .storage
        .spawn_watcher(vec![bridge.key().to_string()], store.config.poll_interval());

    log::info!(
        "Monitoring with {} rules from {}",
        cache.snapshot().rule_count(),
        store.dir.display()
    );

    let monitor = BackgroundMonitor::new(cache, StdoutTabs, store.config.monitor_settings());
    let (sender, receiver) = mpsc::channel(EVENT_QUEUE);

    let reader = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match parse_event(&line) {
                    Ok(Some(event)) => {
                        if sender.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => log::warn!("{}", e),
                },
                Ok(None) => break,
                Err(e) => {
                    log::error!("Failed to read navigation events: {}", e);
                    break;
                }
            }
        }
    });

    let redirects = monitor.run(receiver).await;
    watcher.abort();
    sync.abort();
    let _ = reader.await;

    log::info!("Navigation stream ended; {} tab(s) redirected", redirects);
    Ok(())
}
