use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Input that counts as the player still being there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    MouseMove,
    MouseDown,
    KeyPress,
    KeyDown,
    TouchMove,
    Click,
    Scroll,
}

impl Activity {
    pub const ALL: [Activity; 7] = [
        Activity::MouseMove,
        Activity::MouseDown,
        Activity::KeyPress,
        Activity::TouchMove,
        Activity::Click,
        Activity::KeyDown,
        Activity::Scroll,
    ];
}

/// Fires a callback once the player has been idle for `limit`.
///
/// Activity resets the countdown, at most once per `debounce`.
pub struct InactivityMonitor {
    reset_tx: mpsc::Sender<()>,
    debounce: Duration,
    last_accepted: Mutex<Option<Instant>>,
    handle: JoinHandle<()>,
}

impl InactivityMonitor {
    pub fn spawn<F, Fut>(limit: Duration, debounce: Duration, on_idle: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (reset_tx, mut reset_rx) = mpsc::channel::<()>(8);

        let handle = tokio::spawn(async move {
            let sleep = tokio::time::sleep(limit);
            tokio::pin!(sleep);

            loop {
                tokio::select! {
                    _ = &mut sleep => {
                        log::info!("[Inactivity] Idle for {:?}, logging out", limit);
                        on_idle().await;
                        break;
                    }
                    msg = reset_rx.recv() => {
                        if msg.is_none() {
                            break;
                        }
                        sleep.as_mut().reset(Instant::now() + limit);
                    }
                }
            }
        });

        Self {
            reset_tx,
            debounce,
            last_accepted: Mutex::new(None),
            handle,
        }
    }

    /// Record player input. Returns false when debounced.
    pub fn record(&self, activity: Activity) -> bool {
        let now = Instant::now();
        {
            let mut last = self.last_accepted.lock().unwrap_or_else(|e| e.into_inner());
            if last.is_some_and(|at| now.duration_since(at) < self.debounce) {
                return false;
            }
            *last = Some(now);
        }

        log::trace!("[Inactivity] {:?} resets idle timer", activity);
        // A full channel already holds a pending reset.
        let _ = self.reset_tx.try_send(());
        true
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for InactivityMonitor {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
