// Channel binding - the locator channel state machine
//
// A fixed array of channel slots. Each slot moves through
//
//   Empty --select--> Selected --activate--> Active
//                        ^                      |
//                        +------deactivate------+
//
// Deactivation never destroys a marker directly. Channels are deactivated inside a
// `ReleaseBatch`, which collects the distinct streams they were bound to; on commit
// each stream's marker is released exactly once, and only when no channel is still
// active on that stream.

use crate::error::{LocatorError, LocatorResult};
use crate::marker::{MarkerLifecycle, ReleaseOutcome};
use crate::registry::TrackedStream;
use crate::scene::Scene;
use crate::types::{MarkerRef, StreamId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, Weak};

pub const DEFAULT_CHANNEL_CAPACITY: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelState {
    Empty,
    Selected,
    Active,
}

#[derive(Debug, Default)]
pub struct Channel {
    index: usize,
    stream_id: Option<StreamId>,
    stream: Option<Weak<TrackedStream>>,
    active: bool,
    marker: Option<MarkerRef>,
}

impl Channel {
    fn new(index: usize) -> Self {
        Self {
            index,
            ..Self::default()
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> ChannelState {
        match (&self.stream_id, self.active) {
            (None, _) => ChannelState::Empty,
            (Some(_), false) => ChannelState::Selected,
            (Some(_), true) => ChannelState::Active,
        }
    }

    pub fn stream_id(&self) -> Option<&StreamId> {
        self.stream_id.as_ref()
    }

    /// The bound stream, if it is still live
    pub fn bound_stream(&self) -> Option<Arc<TrackedStream>> {
        self.stream
            .as_ref()
            .and_then(Weak::upgrade)
            .filter(|s| s.is_live())
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn marker(&self) -> Option<MarkerRef> {
        self.marker
    }

    fn bind(&mut self, stream: &Arc<TrackedStream>) {
        self.stream_id = Some(stream.id().clone());
        self.stream = Some(Arc::downgrade(stream));
    }

    fn unbind(&mut self) {
        self.stream_id = None;
        self.stream = None;
    }
}

pub struct ChannelBinding {
    channels: Vec<Channel>,
}

impl ChannelBinding {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: (0..capacity).map(Channel::new).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.channels.len()
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn channel(&self, index: usize) -> LocatorResult<&Channel> {
        self.channels
            .get(index)
            .ok_or(LocatorError::ChannelOutOfRange {
                index,
                capacity: self.channels.len(),
            })
    }

    fn channel_mut(&mut self, index: usize) -> LocatorResult<&mut Channel> {
        let capacity = self.channels.len();
        self.channels
            .get_mut(index)
            .ok_or(LocatorError::ChannelOutOfRange { index, capacity })
    }

    /// Number of channels currently active on `stream`
    pub fn active_on(&self, stream: &StreamId) -> usize {
        self.channels
            .iter()
            .filter(|c| c.active && c.stream_id.as_ref() == Some(stream))
            .count()
    }

    pub fn bound_to(&self, stream: &StreamId) -> Vec<usize> {
        self.channels
            .iter()
            .filter(|c| c.stream_id.as_ref() == Some(stream))
            .map(|c| c.index)
            .collect()
    }

    /// Bind `stream` to a channel (or clear it with `None`).
    ///
    /// An active channel is deactivated first and its release committed; the channel
    /// then waits in `Selected` for an explicit `activate`.
    pub fn select_stream<S: Scene>(
        &mut self,
        index: usize,
        stream: Option<&Arc<TrackedStream>>,
        markers: &mut MarkerLifecycle<S>,
    ) -> LocatorResult<Vec<(StreamId, ReleaseOutcome)>> {
        let channel = self.channel(index)?;
        let unchanged = match (channel.stream_id(), stream) {
            (Some(current), Some(next)) => current == next.id() && channel.bound_stream().is_some(),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            return Ok(Vec::new());
        }

        let released = if channel.is_active() {
            let mut batch = self.batch();
            batch.deactivate(index)?;
            batch.commit(markers)
        } else {
            Vec::new()
        };

        let channel = self.channel_mut(index)?;
        match stream {
            Some(stream) => {
                log::debug!("Channel {} selects {}", index, stream.id());
                channel.bind(stream);
            }
            None => {
                log::debug!("Channel {} cleared", index);
                channel.unbind();
            }
        }
        Ok(released)
    }

    /// Activate a `Selected` channel and make sure its stream has a marker
    pub fn activate<S: Scene>(
        &mut self,
        index: usize,
        markers: &mut MarkerLifecycle<S>,
    ) -> LocatorResult<MarkerRef> {
        let channel = self.channel(index)?;
        if channel.is_active() {
            return Err(LocatorError::DuplicateActivation(index));
        }
        let stream = channel
            .bound_stream()
            .ok_or(LocatorError::NoStreamSelected(index))?;

        let marker = markers.ensure(stream.id(), index)?;
        if let Some(pose) = stream.latest_pose() {
            markers.update_pose(stream.id(), &pose);
        }

        let channel = self.channel_mut(index)?;
        channel.active = true;
        channel.marker = Some(marker);
        log::info!("Channel {} active on {}", index, stream.id());
        Ok(marker)
    }

    /// Deactivate a single channel; shorthand for a one-channel batch
    pub fn deactivate<S: Scene>(
        &mut self,
        index: usize,
        markers: &mut MarkerLifecycle<S>,
    ) -> LocatorResult<Vec<(StreamId, ReleaseOutcome)>> {
        let mut batch = self.batch();
        batch.deactivate(index)?;
        Ok(batch.commit(markers))
    }

    /// Start a deactivation batch
    pub fn batch(&mut self) -> ReleaseBatch<'_> {
        ReleaseBatch {
            binding: self,
            pending: BTreeSet::new(),
        }
    }

    /// Return a channel to `Empty`. The caller releases its marker first.
    pub fn clear(&mut self, index: usize) -> LocatorResult<()> {
        let channel = self.channel_mut(index)?;
        channel.active = false;
        channel.marker = None;
        channel.unbind();
        Ok(())
    }

    /// Drop a marker the scene removed on its own; affected channels fall back to
    /// `Selected`. Returns their indices.
    pub fn forget_marker(&mut self, marker: MarkerRef) -> Vec<usize> {
        let mut affected = Vec::new();
        for channel in self.channels.iter_mut().filter(|c| c.marker == Some(marker)) {
            channel.active = false;
            channel.marker = None;
            affected.push(channel.index);
        }
        affected
    }
}

/// Channels deactivated together; their markers are released on `commit`
#[must_use = "markers are only released when the batch is committed"]
pub struct ReleaseBatch<'a> {
    binding: &'a mut ChannelBinding,
    pending: BTreeSet<StreamId>,
}

impl ReleaseBatch<'_> {
    /// Deactivate one channel. Returns false if it was not active.
    pub fn deactivate(&mut self, index: usize) -> LocatorResult<bool> {
        let channel = self.binding.channel_mut(index)?;
        if !channel.active {
            return Ok(false);
        }
        channel.active = false;
        channel.marker = None;
        if let Some(stream) = channel.stream_id.clone() {
            log::debug!("Channel {} deactivated, {} pending release", index, stream);
            self.pending.insert(stream);
        }
        Ok(true)
    }

    pub fn pending(&self) -> &BTreeSet<StreamId> {
        &self.pending
    }

    /// Release each pending stream's marker once, skipping streams another channel
    /// still keeps active
    pub fn commit<S: Scene>(self, markers: &mut MarkerLifecycle<S>) -> Vec<(StreamId, ReleaseOutcome)> {
        let mut released = Vec::with_capacity(self.pending.len());
        for stream in self.pending {
            if self.binding.active_on(&stream) > 0 {
                log::debug!("{} still active on another channel, keeping marker", stream);
                continue;
            }
            let outcome = markers.release(&stream);
            released.push((stream, outcome));
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StreamRegistry;
    use crate::scene::SceneGraph;
    use crate::types::MarkerGeometry;

    struct Fixture {
        registry: StreamRegistry,
        channels: ChannelBinding,
        markers: MarkerLifecycle<SceneGraph>,
    }

    impl Fixture {
        fn new(streams: &[&str]) -> Self {
            let mut registry = StreamRegistry::new(50);
            for name in streams {
                registry.on_stream_announced(&StreamId::from(*name));
            }
            Self {
                registry,
                channels: ChannelBinding::new(DEFAULT_CHANNEL_CAPACITY),
                markers: MarkerLifecycle::new(SceneGraph::new(), MarkerGeometry::default()),
            }
        }

        fn select(&mut self, index: usize, name: &str) -> Vec<(StreamId, ReleaseOutcome)> {
            let stream = self.registry.get(&StreamId::from(name)).unwrap();
            self.channels
                .select_stream(index, Some(&stream), &mut self.markers)
                .unwrap()
        }

        fn assert_invariants(&self) {
            for channel in self.channels.channels() {
                let expected = channel.is_active() && channel.stream_id().is_some();
                assert_eq!(channel.marker().is_some(), expected, "channel {}", channel.index());
            }
        }
    }

    #[test]
    fn test_state_transitions() {
        let mut fx = Fixture::new(&["Tool_A"]);
        assert_eq!(fx.channels.channel(0).unwrap().state(), ChannelState::Empty);

        fx.select(0, "Tool_A");
        assert_eq!(fx.channels.channel(0).unwrap().state(), ChannelState::Selected);

        fx.channels.activate(0, &mut fx.markers).unwrap();
        assert_eq!(fx.channels.channel(0).unwrap().state(), ChannelState::Active);
        fx.assert_invariants();

        fx.channels.deactivate(0, &mut fx.markers).unwrap();
        assert_eq!(fx.channels.channel(0).unwrap().state(), ChannelState::Selected);
        assert_eq!(fx.markers.scene().marker_count(), 0);
        fx.assert_invariants();
    }

    #[test]
    fn test_activate_without_stream_is_rejected() {
        let mut fx = Fixture::new(&["Tool_A"]);
        let err = fx.channels.activate(1, &mut fx.markers).unwrap_err();

        assert!(matches!(err, LocatorError::NoStreamSelected(1)));
        assert!(!fx.channels.channel(1).unwrap().is_active());
        assert_eq!(fx.markers.scene().marker_count(), 0);
    }

    #[test]
    fn test_duplicate_activation_is_rejected() {
        let mut fx = Fixture::new(&["Tool_A"]);
        fx.select(0, "Tool_A");
        fx.channels.activate(0, &mut fx.markers).unwrap();

        let err = fx.channels.activate(0, &mut fx.markers).unwrap_err();
        assert!(matches!(err, LocatorError::DuplicateActivation(0)));
        assert_eq!(fx.markers.scene().marker_count(), 1);
    }

    #[test]
    fn test_batch_releases_shared_stream_once() {
        let mut fx = Fixture::new(&["Tool_A"]);
        for index in 0..DEFAULT_CHANNEL_CAPACITY {
            fx.select(index, "Tool_A");
            fx.channels.activate(index, &mut fx.markers).unwrap();
        }
        assert_eq!(fx.markers.scene().marker_count(), 1);

        let mut batch = fx.channels.batch();
        for index in 0..DEFAULT_CHANNEL_CAPACITY {
            assert!(batch.deactivate(index).unwrap());
        }
        assert_eq!(batch.pending().len(), 1);
        let released = batch.commit(&mut fx.markers);

        assert_eq!(released, vec![(StreamId::from("Tool_A"), ReleaseOutcome::Removed)]);
        assert_eq!(fx.markers.scene().removed_markers(), ["Needle_Tool_A"]);
        assert_eq!(fx.markers.scene().marker_count(), 0);
        fx.assert_invariants();
    }

    #[test]
    fn test_partial_deactivation_keeps_shared_marker() {
        let mut fx = Fixture::new(&["Tool_A"]);
        fx.select(0, "Tool_A");
        fx.select(2, "Tool_A");
        fx.channels.activate(0, &mut fx.markers).unwrap();
        fx.channels.activate(2, &mut fx.markers).unwrap();

        let released = fx.channels.deactivate(0, &mut fx.markers).unwrap();
        assert!(released.is_empty());
        assert_eq!(fx.markers.scene().marker_count(), 1);

        let released = fx.channels.deactivate(2, &mut fx.markers).unwrap();
        assert_eq!(released.len(), 1);
        assert_eq!(fx.markers.scene().marker_count(), 0);
    }

    #[test]
    fn test_rebinding_active_channel_requires_new_activation() {
        let mut fx = Fixture::new(&["Tool_A", "Tool_B"]);
        fx.select(0, "Tool_A");
        fx.channels.activate(0, &mut fx.markers).unwrap();

        let released = fx.select(0, "Tool_B");
        assert_eq!(released, vec![(StreamId::from("Tool_A"), ReleaseOutcome::Removed)]);

        let channel = fx.channels.channel(0).unwrap();
        assert_eq!(channel.state(), ChannelState::Selected);
        assert_eq!(channel.stream_id(), Some(&StreamId::from("Tool_B")));
        assert_eq!(fx.markers.scene().marker_count(), 0);
        fx.assert_invariants();

        fx.channels.activate(0, &mut fx.markers).unwrap();
        assert_eq!(fx.markers.scene().marker_names(), vec!["Needle_Tool_B"]);
    }

    #[test]
    fn test_reselecting_same_stream_is_noop() {
        let mut fx = Fixture::new(&["Tool_A"]);
        fx.select(0, "Tool_A");
        fx.channels.activate(0, &mut fx.markers).unwrap();

        assert!(fx.select(0, "Tool_A").is_empty());
        assert!(fx.channels.channel(0).unwrap().is_active());
    }

    #[test]
    fn test_removed_stream_cannot_activate() {
        let mut fx = Fixture::new(&["Tool_A"]);
        fx.select(0, "Tool_A");
        fx.registry.on_stream_removed(&StreamId::from("Tool_A"));

        let err = fx.channels.activate(0, &mut fx.markers).unwrap_err();
        assert!(matches!(err, LocatorError::NoStreamSelected(0)));
    }

    #[test]
    fn test_out_of_range() {
        let mut fx = Fixture::new(&[]);
        let err = fx.channels.activate(DEFAULT_CHANNEL_CAPACITY, &mut fx.markers).unwrap_err();
        assert!(matches!(err, LocatorError::ChannelOutOfRange { index: 5, capacity: 5 }));
    }

    #[test]
    fn test_forget_marker_falls_back_to_selected() {
        let mut fx = Fixture::new(&["Tool_A"]);
        fx.select(1, "Tool_A");
        fx.select(3, "Tool_A");
        let marker = fx.channels.activate(1, &mut fx.markers).unwrap();
        fx.channels.activate(3, &mut fx.markers).unwrap();

        assert_eq!(fx.channels.forget_marker(marker), vec![1, 3]);
        assert_eq!(fx.channels.channel(1).unwrap().state(), ChannelState::Selected);
        fx.assert_invariants();
    }
}
