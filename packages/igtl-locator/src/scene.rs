// Scene collaborator
//
// The bridge never renders anything itself. It talks to the host scene through the
// `Scene` trait: markers are created from a geometry descriptor, bound to a pose
// source, coloured through their display sub-object and removed again.
//
// `SceneGraph` is an in-memory implementation used by the headless monitor and tests.

use crate::bridge::EventSender;
use crate::error::{LocatorError, LocatorResult};
use crate::types::{BridgeEvent, DisplayRef, MarkerGeometry, MarkerRef, Pose, Rgb, StreamId};
use nalgebra::Isometry3;
use std::collections::HashMap;

pub trait Scene: Send {
    /// Create a named marker together with its display sub-object
    fn create_marker(&mut self, name: &str, geometry: &MarkerGeometry) -> LocatorResult<MarkerRef>;

    /// Make the marker follow the poses of `stream`
    fn bind_pose_source(&mut self, marker: MarkerRef, stream: &StreamId) -> LocatorResult<()>;

    fn set_display_color(&mut self, marker: MarkerRef, color: Rgb) -> LocatorResult<()>;

    fn update_pose(&mut self, marker: MarkerRef, pose: &Pose) -> LocatorResult<()>;

    fn display_of(&self, marker: MarkerRef) -> Option<DisplayRef>;

    /// Returns false when the display was already gone
    fn remove_display(&mut self, display: DisplayRef) -> bool;

    /// Returns false when the marker was already gone
    fn remove_marker(&mut self, marker: MarkerRef) -> bool;

    fn find_marker_by_name(&self, name: &str) -> Option<MarkerRef>;
}

#[derive(Debug, Clone)]
pub struct MarkerNode {
    pub name: String,
    pub geometry: MarkerGeometry,
    pub display: Option<DisplayRef>,
    pub pose_source: Option<StreamId>,
    pub pose: Option<Isometry3<f64>>,
}

#[derive(Debug, Clone)]
pub struct DisplayNode {
    pub marker: MarkerRef,
    pub color: Rgb,
}

/// Colour every display starts with before the lifecycle applies its own
pub const INITIAL_DISPLAY_COLOR: Rgb = Rgb::new(0.5, 0.5, 1.0);

#[derive(Default)]
pub struct SceneGraph {
    next_id: u64,
    markers: HashMap<MarkerRef, MarkerNode>,
    displays: HashMap<DisplayRef, DisplayNode>,
    removed: Vec<String>,
    observer: Option<EventSender>,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report externally removed markers onto the bridge queue
    pub fn with_observer(observer: EventSender) -> Self {
        Self {
            observer: Some(observer),
            ..Self::default()
        }
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn marker(&self, marker: MarkerRef) -> Option<&MarkerNode> {
        self.markers.get(&marker)
    }

    pub fn marker_by_name(&self, name: &str) -> Option<&MarkerNode> {
        self.markers.values().find(|node| node.name == name)
    }

    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    pub fn display_count(&self) -> usize {
        self.displays.len()
    }

    pub fn color_of(&self, marker: MarkerRef) -> Option<Rgb> {
        let display = self.markers.get(&marker)?.display?;
        self.displays.get(&display).map(|d| d.color)
    }

    /// Names of markers removed through `remove_marker`, in removal order
    pub fn removed_markers(&self) -> &[String] {
        &self.removed
    }

    pub fn marker_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.markers.values().map(|m| m.name.clone()).collect();
        names.sort();
        names
    }

    /// Remove a marker the way a user deleting it in the host would
    pub fn remove_externally(&mut self, marker: MarkerRef) {
        if let Some(node) = self.markers.remove(&marker) {
            if let Some(display) = node.display {
                self.displays.remove(&display);
            }
            log::debug!("Marker {} removed externally", node.name);
            if let Some(observer) = &self.observer {
                let _ = observer.send(BridgeEvent::MarkerRemoved(marker));
            }
        }
    }

    /// Drop only the display sub-object, leaving a bare marker behind
    pub fn detach_display(&mut self, marker: MarkerRef) {
        if let Some(node) = self.markers.get_mut(&marker) {
            if let Some(display) = node.display.take() {
                self.displays.remove(&display);
            }
        }
    }
}

impl Scene for SceneGraph {
    fn create_marker(&mut self, name: &str, geometry: &MarkerGeometry) -> LocatorResult<MarkerRef> {
        let marker = MarkerRef(self.next_id());
        let display = DisplayRef(self.next_id());

        self.displays.insert(
            display,
            DisplayNode {
                marker,
                color: INITIAL_DISPLAY_COLOR,
            },
        );
        self.markers.insert(
            marker,
            MarkerNode {
                name: name.to_string(),
                geometry: *geometry,
                display: Some(display),
                pose_source: None,
                pose: None,
            },
        );

        log::debug!("Created marker {} ({})", name, marker);
        Ok(marker)
    }

    fn bind_pose_source(&mut self, marker: MarkerRef, stream: &StreamId) -> LocatorResult<()> {
        let node = self
            .markers
            .get_mut(&marker)
            .ok_or_else(|| LocatorError::MarkerNotFound(marker.to_string()))?;
        node.pose_source = Some(stream.clone());
        Ok(())
    }

    fn set_display_color(&mut self, marker: MarkerRef, color: Rgb) -> LocatorResult<()> {
        let node = self
            .markers
            .get(&marker)
            .ok_or_else(|| LocatorError::MarkerNotFound(marker.to_string()))?;
        let display = node
            .display
            .and_then(|d| self.displays.get_mut(&d))
            .ok_or_else(|| LocatorError::DisplayNotFound(node.name.clone()))?;
        display.color = color;
        Ok(())
    }

    fn update_pose(&mut self, marker: MarkerRef, pose: &Pose) -> LocatorResult<()> {
        let node = self
            .markers
            .get_mut(&marker)
            .ok_or_else(|| LocatorError::MarkerNotFound(marker.to_string()))?;
        node.pose = Some(pose.transform);
        Ok(())
    }

    fn display_of(&self, marker: MarkerRef) -> Option<DisplayRef> {
        self.markers.get(&marker)?.display
    }

    fn remove_display(&mut self, display: DisplayRef) -> bool {
        match self.displays.remove(&display) {
            Some(node) => {
                if let Some(marker) = self.markers.get_mut(&node.marker) {
                    marker.display = None;
                }
                true
            }
            None => false,
        }
    }

    fn remove_marker(&mut self, marker: MarkerRef) -> bool {
        match self.markers.remove(&marker) {
            Some(node) => {
                log::debug!("Removed marker {}", node.name);
                self.removed.push(node.name);
                true
            }
            None => false,
        }
    }

    fn find_marker_by_name(&self, name: &str) -> Option<MarkerRef> {
        self.markers
            .iter()
            .find(|(_, node)| node.name == name)
            .map(|(marker, _)| *marker)
    }
}
