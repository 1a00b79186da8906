//! Cooperative shutdown flag for the worker loop.
//!
//! INT/TERM set the flag; the loop finishes its current job and exits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag {
    requested: Arc<AtomicBool>,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self {
            requested: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    /// Spawn signal listeners that set the flag on INT/TERM.
    pub fn listen_for_signals(&self) {
        let flag = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received interrupt, finishing current job");
                flag.request();
            }
        });

        #[cfg(unix)]
        {
            let flag = self.clone();
            tokio::spawn(async move {
                let Ok(mut term) =
                    tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                else {
                    return;
                };
                if term.recv().await.is_some() {
                    info!("Received SIGTERM, finishing current job");
                    flag.request();
                }
            });
        }
    }
}
