// Locator bridge - the single owner of all locator state
//
// The bridge holds the connection manager, the stream registry, the channel binding
// and the marker lifecycle. Control surfaces call its `&mut self` methods; events
// from the device I/O task (and from the scene) arrive on an mpsc queue and are only
// applied when the owner drains it with `pump_events` or `next_event`, so channel and
// colour state are never touched from the I/O task.
//
// Failed requests are reported as errors and leave the affected toggle off; the
// `PanelView` returned by `panel()` is derived from the live state, so a control
// surface that re-renders it after each call shows the reverted toggle.

use crate::channel::{ChannelBinding, ChannelState};
use crate::config::LocatorConfig;
use crate::connection::{Connected, ConnectionManager};
use crate::device::DeviceLink;
use crate::error::{ErrorKind, LocatorError, LocatorResult};
use crate::marker::{MarkerLifecycle, ReleaseOutcome};
use crate::registry::StreamRegistry;
use crate::scene::Scene;
use crate::types::{BridgeEvent, MarkerRef, Pose, Rgb, StreamId};
use serde::Serialize;
use tokio::sync::mpsc;

pub type EventSender = mpsc::UnboundedSender<BridgeEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<BridgeEvent>;

/// Queue between the I/O side and the bridge
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// What a control surface shows for one channel row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelView {
    pub index: usize,
    pub state: ChannelState,
    pub stream: Option<StreamId>,
    pub toggle: bool,
    pub selector_enabled: bool,
    /// `None` renders as the neutral indicator
    pub color: Option<Rgb>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PanelView {
    pub host: String,
    pub port: u16,
    pub connection_active: bool,
    pub tracking_active: bool,
    pub candidates: Vec<StreamId>,
    pub channels: Vec<ChannelView>,
}

/// Result of a full-panel refresh
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PanelRefresh {
    pub activated: Vec<usize>,
    pub rejected: Vec<(usize, ErrorKind)>,
    pub released: Vec<StreamId>,
}

pub struct LocatorBridge<L: DeviceLink, S: Scene> {
    config: LocatorConfig,
    connection: ConnectionManager<L>,
    registry: StreamRegistry,
    channels: ChannelBinding,
    markers: MarkerLifecycle<S>,
    events: EventReceiver,
}

impl<L: DeviceLink, S: Scene> LocatorBridge<L, S> {
    pub fn new(config: LocatorConfig, link: L, scene: S, events: EventReceiver) -> Self {
        Self {
            connection: ConnectionManager::new(link, config.retry),
            registry: StreamRegistry::new(config.query_resolution_ms),
            channels: ChannelBinding::new(config.channels),
            markers: MarkerLifecycle::new(scene, config.geometry),
            events,
            config,
        }
    }

    pub fn config(&self) -> &LocatorConfig {
        &self.config
    }

    pub fn connection(&self) -> &ConnectionManager<L> {
        &self.connection
    }

    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    pub fn channels(&self) -> &ChannelBinding {
        &self.channels
    }

    pub fn markers(&self) -> &MarkerLifecycle<S> {
        &self.markers
    }

    pub fn scene(&self) -> &S {
        self.markers.scene()
    }

    pub fn scene_mut(&mut self) -> &mut S {
        self.markers.scene_mut()
    }

    pub fn set_host(&mut self, host: impl Into<String>) {
        self.config.host = host.into();
    }

    /// Port used by the next connection
    pub fn set_port(&mut self, port: u16) {
        self.config.port = port;
    }

    /// Connect or disconnect the device link
    pub async fn toggle_connection(&mut self, on: bool) -> LocatorResult<Option<Connected>> {
        if !on {
            self.disconnect().await;
            return Ok(None);
        }

        // Wind the previous session down so none of its queued events reach the new one
        if self.connection.is_connected() {
            self.disconnect().await;
        } else {
            self.pump_events();
        }

        let host = self.config.host.clone();
        match self.connection.connect(&host, self.config.port).await {
            Ok(connected) => Ok(Some(connected)),
            Err(e) => {
                log::warn!("Connection toggle reverted: {}", e);
                self.teardown_streams();
                Err(e.into())
            }
        }
    }

    async fn disconnect(&mut self) {
        if self.registry.is_querying() && self.connection.is_connected() {
            if let Err(e) = self.registry.stop_query(self.connection.link_mut()).await {
                log::warn!("Stop query not sent: {}", e);
            }
        }
        self.registry.reset_query();
        self.connection.disconnect().await;
        // The link queues removals for its streams before `stop` returns
        self.pump_events();
        self.teardown_streams();
    }

    /// Start or stop periodic pose announcements
    pub async fn toggle_tracking(&mut self, on: bool) -> LocatorResult<()> {
        if !self.connection.is_connected() {
            self.registry.reset_query();
            log::warn!("Tracking toggle reverted: not connected");
            return Err(LocatorError::NotConnected);
        }
        let link = self.connection.link_mut();
        let result = if on {
            self.registry.start_query(link).await
        } else {
            self.registry.stop_query(link).await
        };
        if let Err(e) = &result {
            log::warn!("Tracking query failed: {}", e);
        }
        result
    }

    /// Bind a channel to a live stream, or clear it with `None`.
    /// Rebinding an active channel deactivates it; activation must be requested again.
    pub fn select_stream(&mut self, index: usize, stream: Option<&StreamId>) -> LocatorResult<ChannelView> {
        let tracked = match stream {
            Some(id) => Some(
                self.registry
                    .get(id)
                    .ok_or_else(|| LocatorError::StreamNotFound(id.to_string()))?,
            ),
            None => None,
        };
        self.channels
            .select_stream(index, tracked.as_ref(), &mut self.markers)?;
        self.channel_view(index)
    }

    /// Activate or deactivate one channel
    pub fn toggle_active(&mut self, index: usize, on: bool) -> LocatorResult<Option<MarkerRef>> {
        if on {
            match self.channels.activate(index, &mut self.markers) {
                Ok(marker) => Ok(Some(marker)),
                Err(e) => {
                    log::warn!("Channel {} toggle reverted: {}", index, e);
                    Err(e)
                }
            }
        } else {
            self.channels.deactivate(index, &mut self.markers)?;
            Ok(None)
        }
    }

    /// Deactivate several channels together; shared markers are released once
    pub fn deactivate_channels(&mut self, indices: &[usize]) -> LocatorResult<Vec<StreamId>> {
        // Range errors abort before anything is deactivated
        for index in indices {
            self.channels.channel(*index)?;
        }
        let mut batch = self.channels.batch();
        for index in indices {
            batch.deactivate(*index)?;
        }
        Ok(released_ids(batch.commit(&mut self.markers)))
    }

    /// Bring every channel to the desired toggle state in one pass. Channels missing
    /// from `desired` are treated as off.
    pub fn apply_panel(&mut self, desired: &[bool]) -> PanelRefresh {
        let mut refresh = PanelRefresh::default();
        let capacity = self.channels.capacity();
        let want = |index: usize| desired.get(index).copied().unwrap_or(false);

        for index in 0..capacity {
            let Ok(channel) = self.channels.channel(index) else {
                continue;
            };
            if !want(index) || channel.is_active() {
                continue;
            }
            match self.channels.activate(index, &mut self.markers) {
                Ok(_) => refresh.activated.push(index),
                Err(e) => {
                    log::debug!("Channel {} stays off: {}", index, e);
                    refresh.rejected.push((index, e.kind()));
                }
            }
        }

        let mut batch = self.channels.batch();
        for index in (0..capacity).filter(|i| !want(*i)) {
            if let Err(e) = batch.deactivate(index) {
                log::warn!("Channel {} not deactivated: {}", index, e);
            }
        }
        refresh.released = released_ids(batch.commit(&mut self.markers));
        refresh
    }

    /// Operator colour choice for the stream selected on `index`
    pub fn pick_color(&mut self, index: usize, color: Rgb) -> LocatorResult<ChannelView> {
        let stream = self
            .channels
            .channel(index)?
            .stream_id()
            .cloned()
            .ok_or(LocatorError::NoStreamSelected(index))?;
        if let Err(e) = self.markers.set_color_override(&stream, color) {
            log::warn!("Colour for {} stored but not applied: {}", stream, e);
        }
        self.channel_view(index)
    }

    /// Apply every queued event without waiting. Returns the number applied.
    pub fn pump_events(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event);
            applied += 1;
        }
        applied
    }

    /// Wait for the next event and apply it. Returns false once every sender is gone.
    pub async fn next_event(&mut self) -> bool {
        match self.events.recv().await {
            Some(event) => {
                self.handle_event(event);
                true
            }
            None => false,
        }
    }

    fn handle_event(&mut self, event: BridgeEvent) {
        match event {
            BridgeEvent::StreamAnnounced(stream) => {
                if self.registry.on_stream_announced(&stream).is_some() {
                    self.auto_select();
                }
            }
            BridgeEvent::StreamRemoved(stream) => {
                self.drop_stream(&stream);
                self.auto_select();
            }
            BridgeEvent::PoseUpdated { stream, pose } => self.apply_pose(stream, pose),
            BridgeEvent::MarkerRemoved(marker) => {
                if self.markers.on_marker_removed(marker).is_some() {
                    for index in self.channels.forget_marker(marker) {
                        log::info!("Channel {} deactivated, its marker left the scene", index);
                    }
                }
            }
            BridgeEvent::ConnectionLost => {
                self.connection.mark_lost();
                self.registry.reset_query();
                self.teardown_streams();
            }
        }
    }

    fn apply_pose(&mut self, stream: StreamId, pose: Pose) {
        if self.registry.update_pose(&stream, pose.clone()).is_some() {
            self.auto_select();
        }
        self.markers.update_pose(&stream, &pose);
    }

    /// Bind live streams no channel holds yet to the lowest `Empty` channels,
    /// in announcement order
    fn auto_select(&mut self) {
        if !self.config.auto_select {
            return;
        }
        let unbound: Vec<StreamId> = self
            .registry
            .list_live_streams()
            .into_iter()
            .filter(|stream| self.channels.bound_to(stream).is_empty())
            .collect();
        let empty: Vec<usize> = self
            .channels
            .channels()
            .iter()
            .filter(|c| c.state() == ChannelState::Empty)
            .map(|c| c.index())
            .collect();

        for (index, stream) in empty.into_iter().zip(unbound) {
            let Some(tracked) = self.registry.get(&stream) else {
                continue;
            };
            match self
                .channels
                .select_stream(index, Some(&tracked), &mut self.markers)
            {
                Ok(_) => log::debug!("Channel {} auto-selected {}", index, stream),
                Err(e) => log::warn!("Auto-select of {} failed: {}", stream, e),
            }
        }
    }

    /// Unbind every channel from a vanished stream and release its marker once
    fn drop_stream(&mut self, stream: &StreamId) {
        self.registry.on_stream_removed(stream);
        let bound = self.channels.bound_to(stream);

        let mut batch = self.channels.batch();
        for index in &bound {
            if let Err(e) = batch.deactivate(*index) {
                log::warn!("Channel {} not deactivated: {}", index, e);
            }
        }
        let released = batch.commit(&mut self.markers);
        if released.is_empty() && self.markers.marker_for(stream).is_some() {
            self.markers.release(stream);
        }

        for index in bound {
            if let Err(e) = self.channels.clear(index) {
                log::warn!("Channel {} not cleared: {}", index, e);
            }
        }
    }

    fn teardown_streams(&mut self) {
        let leftover: Vec<StreamId> = self.registry.list_live_streams();
        for stream in leftover {
            self.drop_stream(&stream);
        }
    }

    /// Deactivate everything and close the connection
    pub async fn shutdown(&mut self) {
        let all: Vec<usize> = (0..self.channels.capacity()).collect();
        if let Err(e) = self.deactivate_channels(&all) {
            log::warn!("Shutdown deactivation: {}", e);
        }
        self.disconnect().await;
    }

    pub fn channel_view(&self, index: usize) -> LocatorResult<ChannelView> {
        let channel = self.channels.channel(index)?;
        Ok(ChannelView {
            index,
            state: channel.state(),
            stream: channel.stream_id().cloned(),
            toggle: channel.is_active(),
            selector_enabled: !channel.is_active(),
            color: channel
                .stream_id()
                .and_then(|s| self.markers.colors().stored(s)),
        })
    }

    pub fn panel(&self) -> PanelView {
        PanelView {
            host: self.config.host.clone(),
            port: self.config.port,
            connection_active: self.connection.is_connected(),
            tracking_active: self.registry.is_querying(),
            candidates: self.registry.candidates(self.channels.capacity()),
            channels: (0..self.channels.capacity())
                .filter_map(|i| self.channel_view(i).ok())
                .collect(),
        }
    }
}

fn released_ids(released: Vec<(StreamId, ReleaseOutcome)>) -> Vec<StreamId> {
    released.into_iter().map(|(stream, _)| stream).collect()
}
