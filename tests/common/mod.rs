#![allow(dead_code)]

use std::cell::RefCell;

use discolour::error::HostError;
use discolour::host::{LayerHost, LayerId, LayerInfo, NewLayer, PixelType};
use discolour::pixels::{PixelRegion, Rect, RegionAccess, Tile, TileMut};
use discolour::progress::ProgressSink;
use discolour::CanvasState;

/// Keeps every progress call for later inspection.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    pub labels: Vec<String>,
    pub fractions: Vec<f64>,
    pub messages: Vec<String>,
    pub ends: usize,
}

impl ProgressSink for RecordingProgress {
    fn init(&mut self, label: &str) {
        self.labels.push(label.to_string());
    }

    fn update(&mut self, fraction: f64) {
        self.fractions.push(fraction);
    }

    fn end(&mut self) {
        self.ends += 1;
    }

    fn message(&mut self, text: &str) {
        self.messages.push(text.to_string());
    }
}

/// Deterministic, non-uniform pixel data for a `w`x`h` layer.
pub fn pattern(w: u32, h: u32, channels: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(w as usize * h as usize * channels);
    for y in 0..h {
        for x in 0..w {
            for c in 0..channels {
                data.push(((x * 7 + y * 13 + c as u32 * 29) % 256) as u8);
            }
        }
    }
    data
}

/// Single-layer canvas named "Background" filled with [`pattern`].
pub fn canvas_with(w: u32, h: u32, pixel_type: PixelType, tile_size: u32) -> (CanvasState, LayerId) {
    let mut state = CanvasState::with_tile_size(w, h, tile_size);
    let data = pattern(w, h, pixel_type.channels());
    let id = state.push_raw_layer("Background", pixel_type, w, h, &data).unwrap();
    (state, id)
}

/// Row-major bytes of the attached layer called `name`.
pub fn layer_bytes(state: &CanvasState, name: &str) -> Vec<u8> {
    state.layer_by_name(name).unwrap().pixels.to_raw()
}

/// Wraps a canvas and fails pixel reads once `writes_allowed` writes have
/// gone through. Region requests are recorded; `refuse_removal` makes every
/// `remove_layer` fail.
pub struct FailingHost {
    pub inner: CanvasState,
    pub writes_allowed: usize,
    pub refuse_removal: bool,
    pub regions: RefCell<Vec<(LayerId, RegionAccess)>>,
    writes: usize,
}

impl FailingHost {
    pub fn new(inner: CanvasState, writes_allowed: usize) -> Self {
        Self {
            inner,
            writes_allowed,
            refuse_removal: false,
            regions: RefCell::new(Vec::new()),
            writes: 0,
        }
    }

    fn read(&self, layer: LayerId) -> Result<(), HostError> {
        if self.writes >= self.writes_allowed {
            Err(HostError::UnknownLayer(layer))
        } else {
            Ok(())
        }
    }
}

impl LayerHost for FailingHost {
    fn tile_width(&self) -> u32 {
        self.inner.tile_width()
    }

    fn tile_height(&self) -> u32 {
        self.inner.tile_height()
    }

    fn layer_info(&self, layer: LayerId) -> Result<LayerInfo, HostError> {
        self.inner.layer_info(layer)
    }

    fn layers(&self) -> Vec<LayerId> {
        self.inner.layers()
    }

    fn layer_position(&self, layer: LayerId) -> Result<usize, HostError> {
        self.inner.layer_position(layer)
    }

    fn create_layer(&mut self, spec: &NewLayer) -> Result<LayerId, HostError> {
        self.inner.create_layer(spec)
    }

    fn add_layer(&mut self, layer: LayerId, position: usize) -> Result<(), HostError> {
        self.inner.add_layer(layer, position)
    }

    fn remove_layer(&mut self, layer: LayerId) -> Result<(), HostError> {
        if self.refuse_removal {
            return Err(HostError::NotAttached(layer));
        }
        self.inner.remove_layer(layer)
    }

    fn rename_layer(&mut self, layer: LayerId, name: &str) -> Result<(), HostError> {
        self.inner.rename_layer(layer, name)
    }

    fn clear_layer(&mut self, layer: LayerId) -> Result<(), HostError> {
        self.inner.clear_layer(layer)
    }

    fn get_pixel(&self, layer: LayerId, x: u32, y: u32, out: &mut [u8]) -> Result<(), HostError> {
        self.read(layer)?;
        self.inner.get_pixel(layer, x, y, out)
    }

    fn set_pixel(&mut self, layer: LayerId, x: u32, y: u32, pixel: &[u8]) -> Result<(), HostError> {
        self.writes += 1;
        self.inner.set_pixel(layer, x, y, pixel)
    }

    fn get_region(&self, layer: LayerId, rect: Rect, access: RegionAccess) -> Result<PixelRegion, HostError> {
        self.regions.borrow_mut().push((layer, access));
        if access == RegionAccess::ReadOnly {
            self.read(layer)?;
        }
        self.inner.get_region(layer, rect, access)
    }

    fn put_region(&mut self, layer: LayerId, region: &PixelRegion) -> Result<(), HostError> {
        self.writes += 1;
        self.inner.put_region(layer, region)
    }

    fn get_tile(&self, layer: LayerId, col: u32, row: u32) -> Result<Tile, HostError> {
        self.read(layer)?;
        self.inner.get_tile(layer, col, row)
    }

    fn get_tile_mut(&mut self, layer: LayerId, col: u32, row: u32) -> Result<TileMut<'_>, HostError> {
        self.writes += 1;
        self.inner.get_tile_mut(layer, col, row)
    }

    fn flush(&mut self, layer: LayerId) -> Result<(), HostError> {
        self.inner.flush(layer)
    }

    fn merge_shadow(&mut self, layer: LayerId, undoable: bool) -> Result<(), HostError> {
        self.inner.merge_shadow(layer, undoable)
    }

    fn update(&mut self, layer: LayerId, rect: Rect) -> Result<(), HostError> {
        self.inner.update(layer, rect)
    }

    fn begin_undo_group(&mut self, label: &str) {
        self.inner.begin_undo_group(label)
    }

    fn end_undo_group(&mut self) -> Result<(), HostError> {
        self.inner.end_undo_group()
    }
}
