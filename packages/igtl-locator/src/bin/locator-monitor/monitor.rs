use crate::cli::Cli;
use crate::exit_codes;
use crate::output;
use igtl_locator::{
    event_channel, ChannelState, ErrorKind, IgtlClient, LocatorBridge, LocatorConfig, SceneGraph,
};
use std::time::Duration;
use tokio::time::Instant;

type Bridge = LocatorBridge<IgtlClient, SceneGraph>;

const STATUS_INTERVAL: Duration = Duration::from_secs(1);

pub async fn execute(args: Cli) -> i32 {
    let mut config = match LocatorConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::CONFIG_ERROR;
        }
    };
    args.apply(&mut config);
    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return exit_codes::CONFIG_ERROR;
    }

    let (events, receiver) = event_channel();
    let client = IgtlClient::new(events.clone());
    let scene = SceneGraph::with_observer(events);
    let mut bridge = LocatorBridge::new(config, client, scene, receiver);

    match bridge.toggle_connection(true).await {
        Ok(Some(connected)) => log::info!(
            "Monitoring {}:{} (attempt {})",
            connected.host,
            connected.port,
            connected.attempt
        ),
        Ok(None) => {}
        Err(e) => {
            eprintln!("Error: {}", e);
            return match e.kind() {
                ErrorKind::Unreachable => exit_codes::UNREACHABLE,
                ErrorKind::Config => exit_codes::CONFIG_ERROR,
                _ => exit_codes::EXECUTION_ERROR,
            };
        }
    }

    if !args.no_track {
        if let Err(e) = bridge.toggle_tracking(true).await {
            eprintln!("Error: {}", e);
            bridge.shutdown().await;
            return exit_codes::EXECUTION_ERROR;
        }
    }

    let lost = run(&mut bridge, args.duration).await;

    // Capture the panel before shutdown clears it
    let panel = bridge.panel();
    bridge.shutdown().await;

    if args.json {
        let written = output::to_json(&panel, args.compact).and_then(|json| output::write_line(&json));
        if let Err(e) = written {
            eprintln!("Error: {}", e);
            return exit_codes::EXECUTION_ERROR;
        }
    }

    if lost {
        eprintln!("Error: connection to {} lost", bridge.config().address());
        exit_codes::CONNECTION_LOST
    } else {
        exit_codes::SUCCESS
    }
}

/// Drive the bridge until Ctrl-C, the deadline, or connection loss.
/// Returns true when the connection was lost.
async fn run(bridge: &mut Bridge, duration: Option<u64>) -> bool {
    let deadline = duration.map(|secs| Instant::now() + Duration::from_secs(secs));
    let stop_at = async move {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(stop_at);
    let mut status = tokio::time::interval(STATUS_INTERVAL);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted");
                return false;
            }
            _ = &mut stop_at => {
                log::info!("Monitoring period elapsed");
                return false;
            }
            alive = bridge.next_event() => {
                if !alive {
                    return true;
                }
                bridge.pump_events();
                activate_selected(bridge);
                if !bridge.connection().is_connected() {
                    return true;
                }
            }
            _ = status.tick() => report(bridge),
        }
    }
}

/// Keep every channel with a selected stream active
fn activate_selected(bridge: &mut Bridge) {
    let desired: Vec<bool> = bridge
        .panel()
        .channels
        .iter()
        .map(|channel| channel.stream.is_some())
        .collect();
    let refresh = bridge.apply_panel(&desired);
    for index in refresh.activated {
        log::info!("Channel {} activated", index);
    }
    for (index, kind) in refresh.rejected {
        log::debug!("Channel {} not activated: {:?}", index, kind);
    }
}

fn report(bridge: &Bridge) {
    for channel in bridge.channels().channels() {
        if channel.state() != ChannelState::Active {
            continue;
        }
        let Some(stream) = channel.bound_stream() else {
            continue;
        };
        match stream.latest_pose() {
            Some(pose) => {
                let p = pose.position();
                log::info!(
                    "ch{} {} ({:.2}, {:.2}, {:.2}) [{} updates]",
                    channel.index(),
                    stream.id(),
                    p.x,
                    p.y,
                    p.z,
                    stream.update_count()
                );
            }
            None => log::info!("ch{} {} (no pose yet)", channel.index(), stream.id()),
        }
    }
}
