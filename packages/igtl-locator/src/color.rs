// Colour assignment for locator markers
//
// Every channel index maps onto a fixed cyclic palette. The first time a marker is
// created for a stream, the palette colour of the creating channel is recorded for
// that stream; operator overrides replace the entry. Entries live for the session.

use crate::types::{Rgb, StreamId};
use std::collections::HashMap;

/// Default palette, repeating every `PALETTE.len()` channels
pub const PALETTE: [Rgb; 5] = [
    Rgb::new(0.5, 0.0, 0.0), // dark red
    Rgb::new(0.0, 0.5, 0.0), // dark green
    Rgb::new(0.0, 0.0, 0.5), // dark blue
    Rgb::new(0.5, 0.0, 0.5), // dark magenta
    Rgb::new(0.0, 0.5, 0.5), // dark cyan
];

pub fn default_color(channel_index: usize) -> Rgb {
    PALETTE[channel_index % PALETTE.len()]
}

#[derive(Debug, Default, Clone)]
pub struct ColorMap {
    entries: HashMap<StreamId, Rgb>,
}

impl ColorMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an operator choice for a stream
    pub fn set_override(&mut self, stream: &StreamId, color: Rgb) {
        log::debug!("Colour override for {}: {:?}", stream, color);
        self.entries.insert(stream.clone(), color.clamped());
    }

    /// Stored colour, falling back to the palette entry of `channel_index`
    pub fn color_for(&self, stream: &StreamId, channel_index: usize) -> Rgb {
        self.entries
            .get(stream)
            .copied()
            .unwrap_or_else(|| default_color(channel_index))
    }

    /// Like [`ColorMap::color_for`], but pins the default so later channels reuse it
    pub fn resolve(&mut self, stream: &StreamId, channel_index: usize) -> Rgb {
        *self
            .entries
            .entry(stream.clone())
            .or_insert_with(|| default_color(channel_index))
    }

    /// Colour shown next to a selector; `None` renders as the neutral indicator
    pub fn stored(&self, stream: &StreamId) -> Option<Rgb> {
        self.entries.get(stream).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
