/// Cooperative cancellation.
///
/// A `StopFlag` is shared between the runner and every monitor task. It is
/// raised by Ctrl-C, SIGTERM, or the appearance of the configured STOP file;
/// loops check it once per iteration and wind down on their own.
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct StopFlag {
    inner: Arc<AtomicBool>,
}

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.inner.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, waking early (within `tick`) if stop is requested.
    /// Returns true when the full duration elapsed.
    pub async fn sleep(&self, duration: Duration, tick: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + duration;
        loop {
            if self.is_stop_requested() {
                return false;
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return true;
            }
            tokio::time::sleep((deadline - now).min(tick)).await;
        }
    }
}

/// Install handlers that raise `flag` on SIGINT, SIGTERM, or the STOP file.
///
/// The watcher tasks live for the rest of the process.
pub fn install(flag: StopFlag, stop_file: PathBuf) {
    let on_signal = flag.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::warn!("stop requested by signal, finishing current case");
        on_signal.request_stop();
    });

    tokio::spawn(async move {
        loop {
            if flag.is_stop_requested() {
                return;
            }
            if stop_file.exists() {
                tracing::warn!(path = %stop_file.display(), "STOP file detected");
                flag.request_stop();
                return;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
