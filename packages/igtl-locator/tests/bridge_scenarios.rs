// End-to-end locator scenarios against a scripted device link and the in-memory scene

use async_trait::async_trait;
use igtl_locator::{
    default_color, event_channel, BridgeEvent, ChannelState, ColorMap, ControlQuery, DeviceLink,
    ErrorKind, EventSender, LocatorBridge, LocatorConfig, LocatorError, LocatorResult, Pose,
    Rgb, SceneGraph, StreamId,
};
use std::time::Duration;

/// Link that refuses the first `failures` starts
struct ScriptedLink {
    failures: u32,
    starts: u32,
    target: Option<(String, u16)>,
    connected: bool,
}

impl ScriptedLink {
    fn failing(failures: u32) -> Self {
        Self {
            failures,
            starts: 0,
            target: None,
            connected: false,
        }
    }
}

#[async_trait]
impl DeviceLink for ScriptedLink {
    fn set_client_target(&mut self, host: &str, port: u16) {
        self.target = Some((host.to_string(), port));
    }

    async fn start(&mut self) -> bool {
        self.starts += 1;
        self.connected = self.starts > self.failures;
        self.connected
    }

    async fn stop(&mut self) {
        self.connected = false;
    }

    async fn send_control_query(&mut self, _query: &ControlQuery) -> LocatorResult<()> {
        if self.connected {
            Ok(())
        } else {
            Err(LocatorError::NotConnected)
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

type Bridge = LocatorBridge<ScriptedLink, SceneGraph>;

fn setup(failures: u32) -> (Bridge, EventSender) {
    let (tx, rx) = event_channel();
    let bridge = LocatorBridge::new(
        LocatorConfig::default(),
        ScriptedLink::failing(failures),
        SceneGraph::with_observer(tx.clone()),
        rx,
    );
    (bridge, tx)
}

fn announce(bridge: &mut Bridge, tx: &EventSender, names: &[&str]) {
    for name in names {
        tx.send(BridgeEvent::StreamAnnounced(StreamId::from(*name))).unwrap();
    }
    bridge.pump_events();
}

#[tokio::test(start_paused = true)]
async fn test_connect_succeeds_on_third_attempt() {
    let (mut bridge, _tx) = setup(2);

    let connected = bridge.toggle_connection(true).await.unwrap().unwrap();

    assert_eq!(connected.host, "localhost");
    assert_eq!(connected.port, 18944);
    assert_eq!(connected.attempt, 3);
    assert_eq!(bridge.connection().link().starts, 3);
    assert_eq!(
        bridge.connection().link().target,
        Some(("localhost".to_string(), 18944))
    );
    assert!(bridge.panel().connection_active);
}

#[tokio::test(start_paused = true)]
async fn test_all_attempts_fail() {
    let (mut bridge, _tx) = setup(u32::MAX);
    let started = tokio::time::Instant::now();

    let err = bridge.toggle_connection(true).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Unreachable);
    assert_eq!(bridge.connection().link().starts, 10);
    // Nine waits between ten attempts
    assert!(started.elapsed() >= Duration::from_millis(2700));
    assert!(!bridge.panel().connection_active);
}

#[tokio::test(start_paused = true)]
async fn test_port_change_applies_to_next_connection() {
    let (mut bridge, _tx) = setup(0);
    bridge.set_port(18945);

    let connected = bridge.toggle_connection(true).await.unwrap().unwrap();
    assert_eq!(connected.port, 18945);
    assert_eq!(bridge.panel().port, 18945);
}

#[test]
fn test_shared_stream_released_once() {
    let (mut bridge, tx) = setup(0);
    announce(&mut bridge, &tx, &["Tool_A"]);
    bridge.select_stream(2, Some(&StreamId::from("Tool_A"))).unwrap();

    let first = bridge.toggle_active(0, true).unwrap();
    let second = bridge.toggle_active(2, true).unwrap();
    assert_eq!(first, second);
    assert_eq!(bridge.scene().marker_count(), 1);

    let released = bridge.deactivate_channels(&[0, 2]).unwrap();

    assert_eq!(released, vec![StreamId::from("Tool_A")]);
    assert_eq!(bridge.scene().removed_markers(), ["Needle_Tool_A"]);
    assert_eq!(bridge.channel_view(0).unwrap().state, ChannelState::Selected);
    assert_eq!(bridge.channel_view(2).unwrap().state, ChannelState::Selected);
}

#[test]
fn test_activate_without_stream() {
    let (mut bridge, _tx) = setup(0);

    let err = bridge.toggle_active(4, true).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NoStreamSelected);
    assert_eq!(bridge.scene().marker_count(), 0);
    assert!(!bridge.channel_view(4).unwrap().toggle);
}

#[test]
fn test_activating_active_channel_is_rejected() {
    let (mut bridge, tx) = setup(0);
    announce(&mut bridge, &tx, &["Tool_A"]);
    bridge.toggle_active(0, true).unwrap();

    let err = bridge.toggle_active(0, true).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateActivation);
    assert!(bridge.channel_view(0).unwrap().toggle);
    assert_eq!(bridge.scene().marker_count(), 1);
}

#[test]
fn test_default_color_is_dark_red() {
    let colors = ColorMap::new();
    assert_eq!(
        colors.color_for(&StreamId::from("Tool_A"), 0),
        Rgb::new(0.5, 0.0, 0.0)
    );
}

#[test]
fn test_color_override_survives_reactivation() {
    let (mut bridge, tx) = setup(0);
    announce(&mut bridge, &tx, &["Tool_A", "Tool_B"]);
    let teal = Rgb::new(0.0, 0.8, 0.8);

    bridge.toggle_active(0, true).unwrap();
    bridge.pick_color(0, teal).unwrap();
    bridge.toggle_active(0, false).unwrap();
    assert_eq!(bridge.scene().marker_count(), 0);

    let marker = bridge.toggle_active(0, true).unwrap().unwrap();
    assert_eq!(bridge.scene().color_of(marker), Some(teal));

    let other = bridge.toggle_active(1, true).unwrap().unwrap();
    assert_eq!(bridge.scene().color_of(other), Some(default_color(1)));
}

#[test]
fn test_override_does_not_carry_to_reannounced_tool() {
    let (mut bridge, tx) = setup(0);
    announce(&mut bridge, &tx, &["Tool_A"]);
    bridge.toggle_active(0, true).unwrap();
    bridge.pick_color(0, Rgb::new(0.9, 0.9, 0.1)).unwrap();

    tx.send(BridgeEvent::StreamRemoved(StreamId::from("Tool_A"))).unwrap();
    announce(&mut bridge, &tx, &["Tool_A2"]);

    let view = bridge.channel_view(0).unwrap();
    assert_eq!(view.stream, Some(StreamId::from("Tool_A2")));
    assert_eq!(view.color, None);

    let marker = bridge.toggle_active(0, true).unwrap().unwrap();
    assert_eq!(bridge.scene().color_of(marker), Some(Rgb::new(0.5, 0.0, 0.0)));
    assert_eq!(bridge.scene().marker_names(), vec!["Needle_Tool_A2"]);
}

#[test]
fn test_color_follows_stream_not_channel() {
    let (mut bridge, tx) = setup(0);
    announce(&mut bridge, &tx, &["Tool_A"]);

    // First creation on channel 0 pins dark red for the stream
    bridge.toggle_active(0, true).unwrap();
    bridge.toggle_active(0, false).unwrap();

    bridge.select_stream(3, Some(&StreamId::from("Tool_A"))).unwrap();
    let marker = bridge.toggle_active(3, true).unwrap().unwrap();
    assert_eq!(bridge.scene().color_of(marker), Some(default_color(0)));
}

#[test]
fn test_stream_removal_clears_bound_channels() {
    let (mut bridge, tx) = setup(0);
    announce(&mut bridge, &tx, &["Tool_A", "Tool_B"]);
    bridge.select_stream(2, Some(&StreamId::from("Tool_A"))).unwrap();
    bridge.apply_panel(&[true, true, true]);
    assert_eq!(bridge.scene().marker_count(), 2);

    tx.send(BridgeEvent::StreamRemoved(StreamId::from("Tool_A"))).unwrap();
    bridge.pump_events();

    let panel = bridge.panel();
    assert_eq!(panel.channels[0].state, ChannelState::Empty);
    assert_eq!(panel.channels[1].state, ChannelState::Active);
    assert_eq!(panel.channels[2].state, ChannelState::Empty);
    assert_eq!(panel.candidates, vec![StreamId::from("Tool_B")]);
    assert_eq!(bridge.scene().removed_markers(), ["Needle_Tool_A"]);
}

#[test]
fn test_rebinding_active_channel() {
    let (mut bridge, tx) = setup(0);
    announce(&mut bridge, &tx, &["Tool_A", "Tool_B"]);
    bridge.toggle_active(0, true).unwrap();

    let view = bridge.select_stream(0, Some(&StreamId::from("Tool_B"))).unwrap();

    assert_eq!(view.state, ChannelState::Selected);
    assert!(!view.toggle);
    assert_eq!(bridge.scene().removed_markers(), ["Needle_Tool_A"]);
    assert_eq!(bridge.scene().marker_count(), 0);
}

#[test]
fn test_selecting_unknown_stream() {
    let (mut bridge, _tx) = setup(0);
    let err = bridge
        .select_stream(0, Some(&StreamId::from("Ghost")))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StreamNotFound);
    assert_eq!(bridge.channel_view(0).unwrap().state, ChannelState::Empty);
}

#[test]
fn test_poses_before_activation_are_applied_on_activation() {
    let (mut bridge, tx) = setup(0);
    tx.send(BridgeEvent::PoseUpdated {
        stream: StreamId::from("Tool_C"),
        pose: Pose::from_translation(0.0, 12.5, 0.0),
    })
    .unwrap();
    bridge.pump_events();

    // Implicit announcement through the first pose
    assert_eq!(bridge.channel_view(0).unwrap().state, ChannelState::Selected);

    let marker = bridge.toggle_active(0, true).unwrap().unwrap();
    let pose = bridge.scene().marker(marker).unwrap().pose.unwrap();
    assert_eq!(pose.translation.vector.y, 12.5);
}

#[test]
fn test_auto_select_can_be_disabled() {
    let (tx, rx) = event_channel();
    let config = LocatorConfig {
        auto_select: false,
        ..LocatorConfig::default()
    };
    let mut bridge = LocatorBridge::new(
        config,
        ScriptedLink::failing(0),
        SceneGraph::with_observer(tx.clone()),
        rx,
    );
    announce(&mut bridge, &tx, &["Tool_A"]);

    assert_eq!(bridge.panel().candidates, vec![StreamId::from("Tool_A")]);
    assert_eq!(bridge.channel_view(0).unwrap().state, ChannelState::Empty);
}

#[test]
fn test_panel_serializes() {
    let (mut bridge, tx) = setup(0);
    announce(&mut bridge, &tx, &["Tool_A"]);
    bridge.toggle_active(0, true).unwrap();

    let json = serde_json::to_value(bridge.panel()).unwrap();
    assert_eq!(json["port"], 18944);
    assert_eq!(json["channels"][0]["stream"], "Tool_A");
    assert_eq!(json["channels"][0]["state"], "Active");
    assert_eq!(json["channels"][1]["color"], serde_json::Value::Null);
}
