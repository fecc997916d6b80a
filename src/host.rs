//! The host boundary: everything the engine needs from the application that
//! owns the image. The engine only ever talks to a [`LayerHost`]; the
//! in-process [`crate::canvas::CanvasState`] is one implementation.

use std::fmt;

use crate::error::HostError;
use crate::pixels::{PixelRegion, Rect, RegionAccess, Tile, TileGrid, TileMut};

/// Opaque layer handle, stable for the lifetime of the image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(pub(crate) u64);

impl LayerId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Pixel layout tag of a layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelType {
    Gray,
    GrayA,
    Rgb,
    Rgba,
    /// Three color channels followed by `n - 3` pass-through channels.
    Extended(u8),
}

impl PixelType {
    pub fn channels(&self) -> usize {
        match self {
            PixelType::Gray => 1,
            PixelType::GrayA => 2,
            PixelType::Rgb => 3,
            PixelType::Rgba => 4,
            PixelType::Extended(n) => *n as usize,
        }
    }

    pub fn from_channels(n: usize) -> Option<Self> {
        match n {
            1 => Some(PixelType::Gray),
            2 => Some(PixelType::GrayA),
            3 => Some(PixelType::Rgb),
            4 => Some(PixelType::Rgba),
            5..=crate::pixels::MAX_CHANNELS => Some(PixelType::Extended(n as u8)),
            _ => None,
        }
    }
}

/// Layer compositing mode. Carried through replace operations untouched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
    Difference,
    Additive,
}

impl BlendMode {
    pub fn name(&self) -> &'static str {
        match self {
            BlendMode::Normal => "Normal",
            BlendMode::Multiply => "Multiply",
            BlendMode::Screen => "Screen",
            BlendMode::Overlay => "Overlay",
            BlendMode::Darken => "Darken",
            BlendMode::Lighten => "Lighten",
            BlendMode::Difference => "Difference",
            BlendMode::Additive => "Additive",
        }
    }

    /// Convert to a stable u8 for binary serialization
    pub fn to_u8(&self) -> u8 {
        match self {
            BlendMode::Normal => 0,
            BlendMode::Multiply => 1,
            BlendMode::Screen => 2,
            BlendMode::Overlay => 3,
            BlendMode::Darken => 4,
            BlendMode::Lighten => 5,
            BlendMode::Difference => 6,
            BlendMode::Additive => 7,
        }
    }

    /// Reconstruct from a u8 (defaults to Normal for unknown values)
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => BlendMode::Multiply,
            2 => BlendMode::Screen,
            3 => BlendMode::Overlay,
            4 => BlendMode::Darken,
            5 => BlendMode::Lighten,
            6 => BlendMode::Difference,
            7 => BlendMode::Additive,
            _ => BlendMode::Normal,
        }
    }
}

/// Attributes of an existing layer.
#[derive(Clone, Debug, PartialEq)]
pub struct LayerInfo {
    pub id: LayerId,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub pixel_type: PixelType,
    pub opacity: f32,
    pub blend_mode: BlendMode,
}

impl LayerInfo {
    pub fn channels(&self) -> usize {
        self.pixel_type.channels()
    }

    pub fn bounds(&self) -> Rect {
        Rect::full(self.width, self.height)
    }

    /// Same width, height, channel layout and pixel type.
    pub fn same_shape(&self, other: &LayerInfo) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.pixel_type == other.pixel_type
    }
}

/// Parameters for [`LayerHost::create_layer`].
#[derive(Clone, Debug, PartialEq)]
pub struct NewLayer {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub pixel_type: PixelType,
    pub opacity: f32,
    pub blend_mode: BlendMode,
}

impl NewLayer {
    /// A layer with the geometry, type, opacity and blend mode of `info`.
    pub fn like(info: &LayerInfo, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            width: info.width,
            height: info.height,
            pixel_type: info.pixel_type,
            opacity: info.opacity,
            blend_mode: info.blend_mode,
        }
    }
}

/// Services consumed from the image host. All calls are synchronous.
///
/// Layer positions count from the top of the stack (0 = topmost).
pub trait LayerHost {
    // ---- tiling geometry ----------------------------------------------------

    fn tile_width(&self) -> u32;
    fn tile_height(&self) -> u32;

    fn tile_grid(&self, layer: LayerId) -> Result<TileGrid, HostError> {
        let info = self.layer_info(layer)?;
        Ok(TileGrid::new(info.width, info.height, self.tile_width(), self.tile_height()))
    }

    // ---- layer model --------------------------------------------------------

    fn layer_info(&self, layer: LayerId) -> Result<LayerInfo, HostError>;

    /// Attached layers, top to bottom.
    fn layers(&self) -> Vec<LayerId>;

    fn layer_position(&self, layer: LayerId) -> Result<usize, HostError> {
        self.layers()
            .iter()
            .position(|&l| l == layer)
            .ok_or(HostError::NotAttached(layer))
    }

    /// Attached layer carrying `name`, if any.
    fn find_layer(&self, name: &str) -> Option<LayerId> {
        self.layers()
            .into_iter()
            .find(|&l| self.layer_info(l).is_ok_and(|info| info.name == name))
    }

    fn create_layer(&mut self, spec: &NewLayer) -> Result<LayerId, HostError>;
    fn add_layer(&mut self, layer: LayerId, position: usize) -> Result<(), HostError>;
    fn remove_layer(&mut self, layer: LayerId) -> Result<(), HostError>;
    fn rename_layer(&mut self, layer: LayerId, name: &str) -> Result<(), HostError>;
    /// Reset every pixel to zero (transparent).
    fn clear_layer(&mut self, layer: LayerId) -> Result<(), HostError>;

    // ---- pixel access -------------------------------------------------------

    /// Copy pixel `(x, y)` into `out` (exactly one pixel's worth of bytes).
    fn get_pixel(&self, layer: LayerId, x: u32, y: u32, out: &mut [u8]) -> Result<(), HostError>;
    fn set_pixel(&mut self, layer: LayerId, x: u32, y: u32, pixel: &[u8]) -> Result<(), HostError>;

    /// Snapshot `rect` of the layer. Shadow regions start from the current
    /// shadow contents (or the live pixels when no shadow exists yet).
    fn get_region(&self, layer: LayerId, rect: Rect, access: RegionAccess) -> Result<PixelRegion, HostError>;
    /// Write a writable region back: `Direct` regions into the live pixels,
    /// `Shadow` regions into the shadow buffer.
    fn put_region(&mut self, layer: LayerId, region: &PixelRegion) -> Result<(), HostError>;

    fn get_tile(&self, layer: LayerId, col: u32, row: u32) -> Result<Tile, HostError>;
    fn get_tile_mut(&mut self, layer: LayerId, col: u32, row: u32) -> Result<TileMut<'_>, HostError>;

    // ---- lifecycle ----------------------------------------------------------

    fn flush(&mut self, layer: LayerId) -> Result<(), HostError>;
    /// Replace the live pixels with the shadow buffer, journaling the change
    /// when `undoable`.
    fn merge_shadow(&mut self, layer: LayerId, undoable: bool) -> Result<(), HostError>;
    /// Mark `rect` for redisplay.
    fn update(&mut self, layer: LayerId, rect: Rect) -> Result<(), HostError>;

    // ---- undo scope ---------------------------------------------------------

    fn begin_undo_group(&mut self, label: &str);
    fn end_undo_group(&mut self) -> Result<(), HostError>;
}
