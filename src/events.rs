use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Everything the presentation layer needs to redraw the widgets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum GateEvent {
    TimerTick { remaining: u64, low: bool },
    TimeUp,
    AdStarted { duration_secs: u64 },
    AdProgress { seconds_left: u64 },
    AdFinished { credited: u64, remaining: u64 },
    AdCancelled,
    PromptDismissed,
    CoinsUpdated { coins: u64, daily_earned: u64, highlight: bool },
    SyncCompleted,
    SyncFailed { reason: String },
    ZoomChanged { level: f64 },
    AuthStateChanged { authenticated: bool, username: Option<String> },
}

impl GateEvent {
    pub fn name(&self) -> &'static str {
        match self {
            GateEvent::TimerTick { .. } => "timer:tick",
            GateEvent::TimeUp => "timer:time-up",
            GateEvent::AdStarted { .. } => "ad:started",
            GateEvent::AdProgress { .. } => "ad:progress",
            GateEvent::AdFinished { .. } => "ad:finished",
            GateEvent::AdCancelled => "ad:cancelled",
            GateEvent::PromptDismissed => "prompt:dismissed",
            GateEvent::CoinsUpdated { .. } => "coins:updated",
            GateEvent::SyncCompleted => "sync:completed",
            GateEvent::SyncFailed { .. } => "sync:failed",
            GateEvent::ZoomChanged { .. } => "zoom:changed",
            GateEvent::AuthStateChanged { .. } => "auth:state-changed",
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<GateEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    pub fn emit(&self, event: GateEvent) {
        log::debug!("Emitting {}", event.name());
        // Nobody listening is not an error.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GateEvent> {
        self.tx.subscribe()
    }
}
