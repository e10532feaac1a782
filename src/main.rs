use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

use playtime_gate::{
    format_remaining, Activity, AuthProvider, Config, DeviceMode, GateEvent, LocalStore,
    MemoryAuth, MemoryProfiles, PlaytimeGate, ProfileStore, SupabaseClient, SystemCalendar,
};

const HELP: &str = "\
commands:
  signup <username> <email> <password>
  login <username|email> <password>
  logout
  check-username <name> | check-email <email>
  start <mobile|desktop>     choose device mode and start the timer
  ad | skip-ad               watch / dismiss the reward ad
  coins <n>                  award coins
  zoom-in | zoom-out
  hide | unload              page visibility hooks
  sync                       force a remote flush
  touch                      simulate player input
  status | help | quit";

fn build_backends(config: &Config) -> Result<(Arc<dyn AuthProvider>, Arc<dyn ProfileStore>), String> {
    match (&config.backend_url, &config.anon_key) {
        (Some(url), Some(key)) => {
            let client = Arc::new(SupabaseClient::new(url, key.clone()).map_err(|e| e.to_string())?);
            let auth: Arc<dyn AuthProvider> = client.clone();
            let profiles: Arc<dyn ProfileStore> = client;
            Ok((auth, profiles))
        }
        _ => {
            log::warn!("No backend configured, accounts and profiles live in memory only");
            Ok((Arc::new(MemoryAuth::new()), Arc::new(MemoryProfiles::new())))
        }
    }
}

fn print_event(event: &GateEvent) {
    match event {
        GateEvent::TimerTick { remaining, .. } if remaining % 10 != 0 => {}
        GateEvent::TimerTick { remaining, low } => {
            println!("[{}] {}{}", event.name(), format_remaining(*remaining), if *low { " (low)" } else { "" });
        }
        GateEvent::AdProgress { seconds_left } if seconds_left % 5 != 0 => {}
        other => match serde_json::to_string(other) {
            Ok(json) => println!("[{}] {}", other.name(), json),
            Err(_) => println!("[{}]", other.name()),
        },
    }
}

/// What the command loop does after a line
enum Flow {
    Continue,
    Quit,
    /// The page went away; its final flush already ran
    Unloaded,
}

async fn handle(gate: &Arc<PlaytimeGate>, line: &str) -> Result<Flow, String> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let Some((command, args)) = parts.split_first() else {
        return Ok(Flow::Continue);
    };
    gate.record_activity(Activity::KeyPress);

    match (*command, args) {
        ("signup", [username, email, password]) => {
            let user = gate.sign_up(username, email, password).await.map_err(|e| e.to_string())?;
            println!("signed up as {}", user.username);
        }
        ("login", [identifier, password]) => {
            let user = gate.sign_in(identifier, password).await.map_err(|e| e.to_string())?;
            println!("signed in as {}", user.username);
        }
        ("logout", []) => gate.logout().await.map_err(|e| e.to_string())?,
        ("check-username", [name]) => println!("{:?}", gate.check_username(name).await),
        ("check-email", [email]) => println!("{:?}", gate.check_email(email).await),
        ("start", [mode]) => {
            let mode = DeviceMode::parse(mode).ok_or("device mode must be mobile or desktop")?;
            gate.select_device_mode(mode).map_err(|e| e.to_string())?;
        }
        ("ad", []) => gate.watch_ad(),
        ("skip-ad", []) => gate.dismiss_ad(),
        ("coins", [amount]) => {
            let amount: u64 = amount.parse().map_err(|_| "amount must be a number")?;
            println!("{:?}", gate.add_coins(amount));
        }
        ("zoom-in", []) => {
            gate.zoom_in().map_err(|e| e.to_string())?;
        }
        ("zoom-out", []) => {
            gate.zoom_out().map_err(|e| e.to_string())?;
        }
        ("hide", []) => gate.on_visibility_hidden().await,
        ("unload", []) => {
            if let Err(e) = gate.on_unload().await {
                log::error!("Unload flush task failed: {}", e);
            }
            return Ok(Flow::Unloaded);
        }
        ("sync", []) => println!("{:?}", gate.flush(true).await.map_err(|e| e.to_string())?),
        ("touch", []) => {
            gate.record_activity(Activity::MouseMove);
        }
        ("status", []) => {
            let state = gate.snapshot();
            println!(
                "user={} phase={:?} remaining={} coins={} today={} zoom={}",
                state.user.map(|u| u.username).unwrap_or_else(|| "-".to_string()),
                state.ticker,
                format_remaining(state.clock.remaining_seconds),
                state.currency.coins,
                state.currency.daily_earned,
                gate.zoom_level()
            );
        }
        ("help", []) => println!("{}", HELP),
        ("quit", []) => return Ok(Flow::Quit),
        _ => println!("unknown command, try 'help'"),
    }
    Ok(Flow::Continue)
}

#[tokio::main]
async fn main() {
    // Initialize logger
    env_logger::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    };

    let store = match LocalStore::open(&config.data_dir) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let (auth, profiles) = match build_backends(&config) {
        Ok(backends) => backends,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    };

    let gate = PlaytimeGate::new(config, store, auth, profiles, Arc::new(SystemCalendar));

    let mut events = gate.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("Event printer lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    if let Err(e) = gate.initialize().await {
        log::error!("Initialization failed: {}", e);
    }
    println!("{}", HELP);

    let mut unloaded = false;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match handle(&gate, line.trim()).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Quit) => break,
                Ok(Flow::Unloaded) => {
                    unloaded = true;
                    break;
                }
                Err(message) => println!("error: {}", message),
            },
            Ok(None) => break,
            Err(e) => {
                log::error!("Failed to read input: {}", e);
                break;
            }
        }
    }

    if !unloaded {
        gate.on_visibility_hidden().await;
    }
    gate.shutdown();
}
