use sensor_chat_rust::domain::models::{
    AppEvent, ChatMessage, ConnectionState, MessageSeverity, TelemetryReading,
};
use sensor_chat_rust::domain::settings::{Settings, SettingsService};
use sensor_chat_rust::infrastructure::bluetooth::{BleAdapter, BleSessionManager};
use sensor_chat_rust::infrastructure::inference::{ChatReply, InferenceClient, ThrottleState};
use sensor_chat_rust::infrastructure::logging;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
enum BluetoothCommand {
    StartScan,
    StopScan,
    ListDevices,
    /// 1-based index into the device list, or a peripheral id
    Connect(String),
    Disconnect,
    ShowValue,
}

enum Input {
    Bluetooth(BluetoothCommand),
    Chat(String),
    Help,
    Quit,
}

fn parse_input(line: &str) -> Input {
    let mut parts = line.splitn(2, char::is_whitespace);
    let head = parts.next().unwrap_or_default();
    let arg = parts.next().map(str::trim).unwrap_or_default();

    match head {
        "/scan" => Input::Bluetooth(BluetoothCommand::StartScan),
        "/stop" => Input::Bluetooth(BluetoothCommand::StopScan),
        "/devices" => Input::Bluetooth(BluetoothCommand::ListDevices),
        "/connect" => Input::Bluetooth(BluetoothCommand::Connect(arg.to_string())),
        "/disconnect" => Input::Bluetooth(BluetoothCommand::Disconnect),
        "/value" => Input::Bluetooth(BluetoothCommand::ShowValue),
        "/help" => Input::Help,
        "/quit" | "/exit" => Input::Quit,
        _ => Input::Chat(line.to_string()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut settings_service = SettingsService::new()?;
    settings_service.get_mut().inference.apply_env_overrides();
    let settings = settings_service.get().clone();

    let _logging_guard = logging::init_logger(&settings.log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    info!(
        "Starting Sensor Chat (settings: {})",
        settings_service.path().display()
    );

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let bluetooth_tx = spawn_bluetooth(&settings, event_tx);

    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            print_event(&event);
        }
    });

    let chat = match InferenceClient::from_settings(&settings.inference, Arc::new(ThrottleState::new()))
    {
        Ok(client) => Some(client),
        Err(e) => {
            warn!("Chat disabled: {}", e);
            None
        }
    };

    print_help();
    let mut history: Vec<ChatMessage> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        match parse_input(line.trim()) {
            Input::Quit => break,
            Input::Help => print_help(),
            Input::Bluetooth(command) => match &bluetooth_tx {
                Some(tx) => {
                    if tx.send(command).is_err() {
                        error!("Bluetooth worker stopped");
                    }
                }
                None => println!("Bluetooth is not available on this platform."),
            },
            Input::Chat(text) => {
                let Some(client) = &chat else {
                    println!("Chat is not configured (set an endpoint and api key).");
                    continue;
                };
                match client.send(&text, &history).await {
                    Ok(ChatReply::Skipped) => {}
                    Ok(ChatReply::Assistant(reply)) => {
                        println!("assistant> {}", reply);
                        history.push(ChatMessage::user(text));
                        history.push(ChatMessage::assistant(reply));
                    }
                    Ok(ChatReply::Throttled(advice)) | Ok(ChatReply::RateLimitExceeded(advice)) => {
                        println!("assistant> {}", advice);
                    }
                    Err(e) => {
                        error!("Chat request failed: {}", e);
                        println!("error> {}", e);
                    }
                }
            }
        }
    }

    info!("Shutting down");
    Ok(())
}

#[cfg(windows)]
fn spawn_bluetooth(
    settings: &Settings,
    event_tx: mpsc::UnboundedSender<AppEvent>,
) -> Option<mpsc::UnboundedSender<BluetoothCommand>> {
    use sensor_chat_rust::infrastructure::bluetooth::winrt::WinRtAdapter;
    use sensor_chat_rust::infrastructure::permissions::DesktopPermissionGate;

    let manager = BleSessionManager::new(
        Arc::new(WinRtAdapter::new()),
        Arc::new(DesktopPermissionGate),
        (&settings.ble).into(),
        event_tx,
    );
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run_bluetooth(manager, rx));
    Some(tx)
}

#[cfg(not(windows))]
fn spawn_bluetooth(
    _settings: &Settings,
    _event_tx: mpsc::UnboundedSender<AppEvent>,
) -> Option<mpsc::UnboundedSender<BluetoothCommand>> {
    warn!("No Bluetooth backend for this platform; telemetry disabled");
    None
}

#[cfg_attr(not(windows), allow(dead_code))]
async fn run_bluetooth<A: BleAdapter>(
    mut manager: BleSessionManager<A>,
    mut commands: mpsc::UnboundedReceiver<BluetoothCommand>,
) {
    while let Some(command) = commands.recv().await {
        match command {
            BluetoothCommand::StartScan => {
                manager.scan_for_peripherals().await;
            }
            BluetoothCommand::StopScan => manager.stop_scan().await,
            BluetoothCommand::ListDevices => {
                let devices = manager.discovered_devices();
                if devices.is_empty() {
                    println!("No devices found yet.");
                }
                for (i, device) in devices.iter().enumerate() {
                    println!(
                        "  {}. {} [{}] {}",
                        i + 1,
                        device.name,
                        device.id,
                        device
                            .signal_strength
                            .map(|rssi| format!("{} dBm", rssi))
                            .unwrap_or_default()
                    );
                }
            }
            BluetoothCommand::Connect(target) => {
                let id = match target.parse::<usize>() {
                    Ok(index) if index >= 1 => manager
                        .discovered_devices()
                        .get(index - 1)
                        .map(|d| d.id.clone())
                        .unwrap_or(target),
                    _ => target,
                };
                manager.connect_to_device_id(&id).await;
            }
            BluetoothCommand::Disconnect => manager.disconnect_from_device().await,
            BluetoothCommand::ShowValue => match manager.telemetry() {
                TelemetryReading::Value(v) => println!("value: {}", v),
                TelemetryReading::NoValue => println!("value: --"),
            },
        }
    }
}

fn print_event(event: &AppEvent) {
    match event {
        AppEvent::DeviceFound(device) => println!("found: {} [{}]", device.name, device.id),
        AppEvent::ConnectionState(state) => match state {
            ConnectionState::Disconnected => println!("state: disconnected"),
            ConnectionState::Connecting => println!("state: connecting"),
            ConnectionState::Connected(device) => println!("state: connected to {}", device.name),
            ConnectionState::Disconnecting => println!("state: disconnecting"),
        },
        AppEvent::Telemetry(TelemetryReading::Value(v)) => println!("value: {}", v),
        AppEvent::Telemetry(TelemetryReading::NoValue) => {}
        AppEvent::LogMessage(message) => {
            let tag = match message.severity {
                MessageSeverity::Info => "info",
                MessageSeverity::Success => "ok",
                MessageSeverity::Warning => "warn",
                MessageSeverity::Error => "error",
            };
            println!("[{}] {}", tag, message.message);
        }
    }
}

fn print_help() {
    println!("Commands:");
    println!("  /scan                 start scanning for sensors");
    println!("  /stop                 stop scanning");
    println!("  /devices              list discovered sensors");
    println!("  /connect <n|id>       connect to a sensor");
    println!("  /disconnect           disconnect the current sensor");
    println!("  /value                show the latest reading");
    println!("  /quit                 exit");
    println!("Anything else is sent to the assistant.");
}
