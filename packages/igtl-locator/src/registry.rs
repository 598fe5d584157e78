// Stream registry
//
// Table of live pose streams in announcement order. The registry owns the streams;
// channels only keep weak references, so a removed stream disappears from every
// binding at once.

use crate::device::{ControlQuery, DeviceLink, QueryKind};
use crate::error::LocatorResult;
use crate::types::{Pose, StreamId};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// A live pose source announced by the device
#[derive(Debug)]
pub struct TrackedStream {
    id: StreamId,
    live: AtomicBool,
    pose: RwLock<Option<Pose>>,
    updates: AtomicU64,
}

impl TrackedStream {
    fn new(id: StreamId) -> Self {
        Self {
            id,
            live: AtomicBool::new(true),
            pose: RwLock::new(None),
            updates: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &StreamId {
        &self.id
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Relaxed)
    }

    pub fn latest_pose(&self) -> Option<Pose> {
        self.pose.read().clone()
    }

    pub fn update_count(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }

    fn set_pose(&self, pose: Pose) {
        *self.pose.write() = Some(pose);
        self.updates.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct StreamRegistry {
    streams: Vec<Arc<TrackedStream>>,
    querying: bool,
    resolution_ms: u32,
}

impl StreamRegistry {
    pub fn new(resolution_ms: u32) -> Self {
        Self {
            streams: Vec::new(),
            querying: false,
            resolution_ms,
        }
    }

    /// Ask the device to start announcing poses
    pub async fn start_query<L: DeviceLink + ?Sized>(&mut self, link: &mut L) -> LocatorResult<()> {
        let query = ControlQuery::tracking(QueryKind::Start, self.resolution_ms);
        link.send_control_query(&query).await?;
        self.querying = true;
        log::info!("Tracking query started ({} ms)", self.resolution_ms);
        Ok(())
    }

    /// Ask the device to stop announcing poses
    pub async fn stop_query<L: DeviceLink + ?Sized>(&mut self, link: &mut L) -> LocatorResult<()> {
        let query = ControlQuery::tracking(QueryKind::Stop, self.resolution_ms);
        self.querying = false;
        link.send_control_query(&query).await?;
        log::info!("Tracking query stopped");
        Ok(())
    }

    pub fn is_querying(&self) -> bool {
        self.querying
    }

    /// Forget the query state without messaging the device, e.g. after the link dropped
    pub fn reset_query(&mut self) {
        self.querying = false;
    }

    /// Register a stream. Returns its position, or `None` if it was already live.
    pub fn on_stream_announced(&mut self, id: &StreamId) -> Option<usize> {
        if self.position(id).is_some() {
            return None;
        }
        log::info!("Stream announced: {}", id);
        self.streams.push(Arc::new(TrackedStream::new(id.clone())));
        Some(self.streams.len() - 1)
    }

    /// Drop a stream. Returns false if it was not live.
    pub fn on_stream_removed(&mut self, id: &StreamId) -> bool {
        let Some(index) = self.position(id) else {
            return false;
        };
        let stream = self.streams.remove(index);
        stream.live.store(false, Ordering::Relaxed);
        log::info!("Stream removed: {}", id);
        true
    }

    /// Store the latest pose; unknown streams are announced implicitly.
    /// Returns the announcement position when the pose created the stream.
    pub fn update_pose(&mut self, id: &StreamId, pose: Pose) -> Option<usize> {
        let announced = self.on_stream_announced(id);
        if let Some(stream) = self.get(id) {
            stream.set_pose(pose);
        }
        announced
    }

    pub fn get(&self, id: &StreamId) -> Option<Arc<TrackedStream>> {
        self.streams.iter().find(|s| s.id() == id).cloned()
    }

    pub fn list_live_streams(&self) -> Vec<StreamId> {
        self.streams.iter().map(|s| s.id().clone()).collect()
    }

    /// Selection candidates for a panel of `capacity` channels
    pub fn candidates(&self, capacity: usize) -> Vec<StreamId> {
        self.streams
            .iter()
            .take(capacity)
            .map(|s| s.id().clone())
            .collect()
    }

    /// Remove every stream, e.g. on connection teardown
    pub fn clear(&mut self) -> Vec<StreamId> {
        self.streams
            .drain(..)
            .map(|s| {
                s.live.store(false, Ordering::Relaxed);
                s.id().clone()
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    fn position(&self, id: &StreamId) -> Option<usize> {
        self.streams.iter().position(|s| s.id() == id)
    }
}
