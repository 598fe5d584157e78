// Marker lifecycle
//
// Owns the scene collaborator and the explicit stream -> marker mapping. A stream has
// at most one marker no matter how many channels are bound to it; `ensure` looks the
// marker up (mapping first, then the scene by name) before creating a new one.

use crate::color::ColorMap;
use crate::error::{LocatorError, LocatorResult};
use crate::scene::Scene;
use crate::types::{MarkerGeometry, MarkerRef, Pose, Rgb, StreamId};
use std::collections::HashMap;

/// What `release` found in the scene
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Marker and display were both removed
    Removed,
    /// The marker was removed but had no display left
    DisplayMissing,
    /// Nothing to remove; the marker was already gone
    MarkerMissing,
}

pub struct MarkerLifecycle<S: Scene> {
    scene: S,
    geometry: MarkerGeometry,
    markers: HashMap<StreamId, MarkerRef>,
    colors: ColorMap,
}

impl<S: Scene> MarkerLifecycle<S> {
    pub fn new(scene: S, geometry: MarkerGeometry) -> Self {
        Self {
            scene,
            geometry,
            markers: HashMap::new(),
            colors: ColorMap::new(),
        }
    }

    pub fn scene(&self) -> &S {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut S {
        &mut self.scene
    }

    pub fn colors(&self) -> &ColorMap {
        &self.colors
    }

    pub fn marker_for(&self, stream: &StreamId) -> Option<MarkerRef> {
        self.markers.get(stream).copied()
    }

    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    /// Return the marker of `stream`, creating it on first use
    pub fn ensure(&mut self, stream: &StreamId, channel_index: usize) -> LocatorResult<MarkerRef> {
        if let Some(marker) = self.markers.get(stream) {
            return Ok(*marker);
        }

        let name = stream.marker_name();
        if let Some(marker) = self.scene.find_marker_by_name(&name) {
            log::debug!("Adopting existing marker {} for {}", name, stream);
            self.markers.insert(stream.clone(), marker);
            return Ok(marker);
        }

        let marker = self.scene.create_marker(&name, &self.geometry)?;
        if let Err(e) = self.scene.bind_pose_source(marker, stream) {
            self.scene.remove_marker(marker);
            return Err(e);
        }

        let color = self.colors.resolve(stream, channel_index);
        if let Err(e) = self.scene.set_display_color(marker, color) {
            log::warn!("Could not colour {}: {}", name, e);
        }

        log::info!("Locator {} created for channel {}", name, channel_index);
        self.markers.insert(stream.clone(), marker);
        Ok(marker)
    }

    /// Remove the marker of `stream` and its display from the scene
    pub fn release(&mut self, stream: &StreamId) -> ReleaseOutcome {
        let marker = self
            .markers
            .remove(stream)
            .or_else(|| self.scene.find_marker_by_name(&stream.marker_name()));

        let Some(marker) = marker else {
            log::warn!("{}", LocatorError::MarkerNotFound(stream.marker_name()));
            return ReleaseOutcome::MarkerMissing;
        };

        let display_removed = match self.scene.display_of(marker) {
            Some(display) => self.scene.remove_display(display),
            None => false,
        };

        if !self.scene.remove_marker(marker) {
            log::warn!("{}", LocatorError::MarkerNotFound(stream.marker_name()));
            return ReleaseOutcome::MarkerMissing;
        }

        log::info!("Locator {} removed", stream.marker_name());
        if display_removed {
            ReleaseOutcome::Removed
        } else {
            log::warn!("{}", LocatorError::DisplayNotFound(stream.marker_name()));
            ReleaseOutcome::DisplayMissing
        }
    }

    /// Forward a pose to the stream's marker, if it has one
    pub fn update_pose(&mut self, stream: &StreamId, pose: &Pose) -> bool {
        let Some(marker) = self.markers.get(stream).copied() else {
            return false;
        };
        match self.scene.update_pose(marker, pose) {
            Ok(()) => true,
            Err(e) => {
                log::debug!("Pose for {} dropped: {}", stream, e);
                false
            }
        }
    }

    /// Record an operator colour and apply it to the live marker, if any
    pub fn set_color_override(&mut self, stream: &StreamId, color: Rgb) -> LocatorResult<()> {
        self.colors.set_override(stream, color);
        self.apply_color(stream)
    }

    pub fn apply_color(&mut self, stream: &StreamId) -> LocatorResult<()> {
        let (Some(marker), Some(color)) = (self.markers.get(stream).copied(), self.colors.stored(stream))
        else {
            return Ok(());
        };
        self.scene.set_display_color(marker, color)
    }

    /// Forget a marker the scene removed on its own
    pub fn on_marker_removed(&mut self, marker: MarkerRef) -> Option<StreamId> {
        let stream = self
            .markers
            .iter()
            .find(|(_, m)| **m == marker)
            .map(|(s, _)| s.clone())?;
        self.markers.remove(&stream);
        log::info!("Locator {} was removed from the scene", stream.marker_name());
        Some(stream)
    }
}
