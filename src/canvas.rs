use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::error::HostError;
use crate::history::{Command, GroupCommand, HistoryManager, LayerOpCommand, LayerOperation};
use crate::host::{BlendMode, LayerHost, LayerId, LayerInfo, NewLayer, PixelType};
use crate::pixels::{
    self, MAX_CHANNELS, PixelBuffer, PixelRegion, Rect, RegionAccess, Tile, TileGrid, TileMut,
};

// ============================================================================
// TILED IMAGE – sparse chunk storage (Vec-indexed for speed)
// ============================================================================

pub const CHUNK_SIZE: u32 = 64;

/// Largest layer accepted by the reference host (~256 megapixels).
const MAX_PIXELS: u64 = 256_000_000;

/// Sparse tiled image backed by a flat `Vec<Option<Arc<Vec<u8>>>>`.
/// Chunk coordinates are mapped to a flat index via `cy * chunks_per_row + cx`.
///
/// Chunks are wrapped in `Arc` for copy-on-write semantics: `clone()` only
/// bumps reference counts, and every mutation goes through `Arc::make_mut`
/// so only the touched chunk is copied. Undo snapshots rely on this.
///
/// Every chunk is a full `chunk_size × chunk_size` block of `channels`-byte
/// pixels; chunks on the right/bottom edges carry padding that is never read.
#[derive(Clone, Debug)]
pub struct TiledImage {
    width: u32,
    height: u32,
    channels: usize,
    chunk_size: u32,
    chunks_per_row: u32,
    chunks: Vec<Option<Arc<Vec<u8>>>>,
}

impl TiledImage {
    // ---- construction -------------------------------------------------------

    /// Create an empty (all-zero) tiled image with the default chunk size.
    pub fn new(width: u32, height: u32, channels: usize) -> Self {
        Self::with_chunk_size(width, height, channels, CHUNK_SIZE)
    }

    pub fn with_chunk_size(width: u32, height: u32, channels: usize, chunk_size: u32) -> Self {
        debug_assert!(channels > 0 && channels <= MAX_CHANNELS);
        let chunk_size = chunk_size.max(1);
        let chunks_per_row = width.div_ceil(chunk_size);
        let chunks_per_col = height.div_ceil(chunk_size);
        let total = chunks_per_row as usize * chunks_per_col as usize;
        Self {
            width,
            height,
            channels,
            chunk_size,
            chunks_per_row,
            chunks: vec![None; total],
        }
    }

    /// Import from a flat row-major byte slice of `width * height * channels`
    /// bytes. Only chunks with at least one non-zero byte are stored.
    /// Parallelised with rayon.
    pub fn from_raw(
        width: u32,
        height: u32,
        channels: usize,
        chunk_size: u32,
        data: &[u8],
    ) -> Option<Self> {
        if data.len() != width as usize * height as usize * channels {
            return None;
        }
        let mut img = Self::with_chunk_size(width, height, channels, chunk_size);

        let cs = img.chunk_size;
        let chunks_x = img.chunks_per_row as usize;
        let total_chunks = img.chunks.len();
        let chunk_stride = img.chunk_stride();
        let chunk_len = img.chunk_len();

        let chunk_results: Vec<(usize, Option<Arc<Vec<u8>>>)> = (0..total_chunks)
            .into_par_iter()
            .map(|flat| {
                let cx = (flat % chunks_x) as u32;
                let cy = (flat / chunks_x) as u32;
                let base_x = cx * cs;
                let base_y = cy * cs;

                let cw = cs.min(width - base_x);
                let ch = cs.min(height - base_y);
                let row_bytes = cw as usize * channels;
                let mut chunk_data = vec![0u8; chunk_len];
                let mut has_content = false;

                for ly in 0..ch as usize {
                    let src_start = ((base_y as usize + ly) * width as usize + base_x as usize) * channels;
                    let src_row = &data[src_start..src_start + row_bytes];
                    let dst_start = ly * chunk_stride;
                    chunk_data[dst_start..dst_start + row_bytes].copy_from_slice(src_row);
                    has_content = has_content || src_row.iter().any(|&b| b != 0);
                }

                (flat, has_content.then(|| Arc::new(chunk_data)))
            })
            .collect();

        for (idx, chunk) in chunk_results {
            img.chunks[idx] = chunk;
        }
        Some(img)
    }

    /// Flatten into a row-major byte vector.
    pub fn to_raw(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.extract_region(Rect::full(self.width, self.height), &mut buf);
        buf
    }

    /// Same pixels, re-chunked at `chunk_size`.
    pub fn rechunked(&self, chunk_size: u32) -> Self {
        if chunk_size == self.chunk_size {
            return self.clone();
        }
        let raw = self.to_raw();
        Self::from_raw(self.width, self.height, self.channels, chunk_size, &raw)
            .unwrap_or_else(|| Self::with_chunk_size(self.width, self.height, self.channels, chunk_size))
    }

    // ---- region copies ------------------------------------------------------

    /// Chunk-aware region extraction into `buf` (resized to fit). Only
    /// overlapping populated chunks are visited; rows are copied with memcpy.
    pub fn extract_region(&self, rect: Rect, buf: &mut Vec<u8>) {
        let n = self.channels;
        buf.clear();
        buf.resize(rect.width as usize * rect.height as usize * n, 0);
        if rect.is_empty() {
            return;
        }

        let cs = self.chunk_size;
        let right = rect.right().min(self.width);
        let bottom = rect.bottom().min(self.height);
        let chunk_stride = self.chunk_stride();
        let dst_stride = rect.width as usize * n;

        for cy in rect.y / cs..bottom.div_ceil(cs) {
            for cx in rect.x / cs..right.div_ceil(cs) {
                let chunk = match self.get_chunk(cx, cy) {
                    Some(c) => c,
                    None => continue, // all zero, already cleared
                };
                let base_x = cx * cs;
                let base_y = cy * cs;

                let ox = rect.x.max(base_x);
                let oy = rect.y.max(base_y);
                let ox2 = right.min(base_x + cs);
                let oy2 = bottom.min(base_y + cs);
                if ox >= ox2 || oy >= oy2 {
                    continue;
                }

                let row_bytes = (ox2 - ox) as usize * n;
                for sy in oy..oy2 {
                    let src = (sy - base_y) as usize * chunk_stride + (ox - base_x) as usize * n;
                    let dst = (sy - rect.y) as usize * dst_stride + (ox - rect.x) as usize * n;
                    buf[dst..dst + row_bytes].copy_from_slice(&chunk[src..src + row_bytes]);
                }
            }
        }
    }

    /// Write a row-major block of `rect.width * rect.height` pixels at
    /// `rect`, using bulk chunk row copies. Parts outside the image are
    /// ignored. Missing chunks are only created where the block is non-zero.
    pub fn blit_region(&mut self, rect: Rect, data: &[u8]) {
        let n = self.channels;
        debug_assert_eq!(data.len(), rect.width as usize * rect.height as usize * n);
        if rect.is_empty() {
            return;
        }

        let cs = self.chunk_size;
        let right = rect.right().min(self.width);
        let bottom = rect.bottom().min(self.height);
        let chunk_stride = self.chunk_stride();
        let chunk_len = self.chunk_len();
        let src_stride = rect.width as usize * n;

        for cy in rect.y / cs..bottom.div_ceil(cs) {
            for cx in rect.x / cs..right.div_ceil(cs) {
                let base_x = cx * cs;
                let base_y = cy * cs;
                let ox = rect.x.max(base_x);
                let oy = rect.y.max(base_y);
                let ox2 = right.min(base_x + cs);
                let oy2 = bottom.min(base_y + cs);
                if ox >= ox2 || oy >= oy2 {
                    continue;
                }

                let row_bytes = (ox2 - ox) as usize * n;
                let src_offset = |sy: u32| (sy - rect.y) as usize * src_stride + (ox - rect.x) as usize * n;

                let idx = self.flat_index(cx, cy);
                let slot = &mut self.chunks[idx];
                if slot.is_none()
                    && (oy..oy2).all(|sy| {
                        let s = src_offset(sy);
                        data[s..s + row_bytes].iter().all(|&b| b == 0)
                    })
                {
                    continue;
                }

                let chunk = Arc::make_mut(slot.get_or_insert_with(|| Arc::new(vec![0u8; chunk_len])));
                for sy in oy..oy2 {
                    let s = src_offset(sy);
                    let d = (sy - base_y) as usize * chunk_stride + (ox - base_x) as usize * n;
                    chunk[d..d + row_bytes].copy_from_slice(&data[s..s + row_bytes]);
                }
            }
        }
    }

    // ---- indexing helpers ----------------------------------------------------

    #[inline(always)]
    fn flat_index(&self, cx: u32, cy: u32) -> usize {
        cy as usize * self.chunks_per_row as usize + cx as usize
    }

    #[inline(always)]
    fn chunk_len(&self) -> usize {
        self.chunk_size as usize * self.chunk_size as usize * self.channels
    }

    /// Bytes per chunk row.
    #[inline(always)]
    pub fn chunk_stride(&self) -> usize {
        self.chunk_size as usize * self.channels
    }

    #[inline(always)]
    fn local_offset(&self, x: u32, y: u32) -> usize {
        let lx = (x % self.chunk_size) as usize;
        let ly = (y % self.chunk_size) as usize;
        ly * self.chunk_stride() + lx * self.channels
    }

    // ---- pixel access -------------------------------------------------------

    /// Read a pixel (all-zero for missing chunks or out-of-bounds).
    #[inline]
    pub fn get_pixel(&self, x: u32, y: u32) -> &[u8] {
        let n = self.channels;
        if x >= self.width || y >= self.height {
            return pixels::transparent_pixel(n);
        }
        let idx = self.flat_index(x / self.chunk_size, y / self.chunk_size);
        match self.chunks[idx].as_ref() {
            Some(chunk) => {
                let off = self.local_offset(x, y);
                &chunk[off..off + n]
            }
            None => pixels::transparent_pixel(n),
        }
    }

    /// Write a pixel (creates the chunk on demand, COW-clones if shared).
    #[inline]
    pub fn put_pixel(&mut self, x: u32, y: u32, pixel: &[u8]) {
        debug_assert_eq!(pixel.len(), self.channels);
        if x >= self.width || y >= self.height {
            return;
        }
        let n = self.channels;
        let off = self.local_offset(x, y);
        let chunk = self.ensure_chunk_mut(x / self.chunk_size, y / self.chunk_size);
        chunk[off..off + n].copy_from_slice(pixel);
    }

    /// Read-only access to a chunk (if it exists).
    pub fn get_chunk(&self, cx: u32, cy: u32) -> Option<&Arc<Vec<u8>>> {
        if cx >= self.chunks_per_row {
            return None;
        }
        self.chunks.get(self.flat_index(cx, cy)).and_then(|c| c.as_ref())
    }

    /// Get or create a chunk, returning a mutable reference (COW-safe).
    /// The chunk coordinate must lie inside the grid.
    pub fn ensure_chunk_mut(&mut self, cx: u32, cy: u32) -> &mut Vec<u8> {
        let idx = self.flat_index(cx, cy);
        let len = self.chunk_len();
        let arc = self.chunks[idx].get_or_insert_with(|| Arc::new(vec![0u8; len]));
        Arc::make_mut(arc)
    }

    /// Place a fully-built chunk. Returns `false` when the coordinate or the
    /// byte length does not fit.
    pub fn set_chunk(&mut self, cx: u32, cy: u32, data: Vec<u8>) -> bool {
        if cx >= self.chunks_per_row || data.len() != self.chunk_len() {
            return false;
        }
        let idx = self.flat_index(cx, cy);
        match self.chunks.get_mut(idx) {
            Some(slot) => {
                *slot = Some(Arc::new(data));
                true
            }
            None => false,
        }
    }

    /// Iterator over populated chunk coordinates.
    pub fn chunk_keys(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        let cpr = self.chunks_per_row.max(1) as usize;
        self.chunks.iter().enumerate().filter_map(move |(i, slot)| {
            slot.as_ref().map(|_| ((i % cpr) as u32, (i / cpr) as u32))
        })
    }

    /// Number of populated chunks.
    pub fn chunk_count(&self) -> usize {
        self.chunks.iter().filter(|c| c.is_some()).count()
    }

    /// Drop all chunks (make the image all-zero).
    pub fn clear(&mut self) {
        for slot in &mut self.chunks {
            *slot = None;
        }
    }

    pub fn width(&self) -> u32 { self.width }
    pub fn height(&self) -> u32 { self.height }
    pub fn channels(&self) -> usize { self.channels }
    pub fn chunk_size(&self) -> u32 { self.chunk_size }

    /// Approximate memory usage in bytes.
    /// Shared (COW) chunks are counted at minimal cost (Arc pointer only)
    /// since their pixel data is shared with undo snapshots.
    pub fn memory_bytes(&self) -> usize {
        let chunk_byte_size = self.chunk_len();
        self.chunks
            .iter()
            .filter_map(|c| c.as_ref())
            .map(|arc| {
                if Arc::strong_count(arc) == 1 {
                    chunk_byte_size
                } else {
                    std::mem::size_of::<usize>() * 2
                }
            })
            .sum()
    }
}

// ============================================================================
// LAYER
// ============================================================================

#[derive(Clone, Debug)]
pub struct Layer {
    pub id: LayerId,
    pub name: String,
    pub visible: bool,
    pub opacity: f32,
    pub blend_mode: BlendMode,
    pub pixel_type: PixelType,
    pub pixels: TiledImage,
    /// Write-side scratch copy, folded into `pixels` by `merge_shadow`.
    pub shadow: Option<TiledImage>,
    /// `pixels` as they were before the first direct write since the last
    /// flush. Flushing journals the difference.
    pending: Option<TiledImage>,
}

impl Layer {
    pub fn new(id: LayerId, name: String, pixels: TiledImage, pixel_type: PixelType) -> Self {
        Self {
            id,
            name,
            visible: true,
            opacity: 1.0,
            blend_mode: BlendMode::Normal,
            pixel_type,
            pixels,
            shadow: None,
            pending: None,
        }
    }

    pub fn width(&self) -> u32 { self.pixels.width() }
    pub fn height(&self) -> u32 { self.pixels.height() }

    pub fn info(&self) -> LayerInfo {
        LayerInfo {
            id: self.id,
            name: self.name.clone(),
            width: self.width(),
            height: self.height(),
            pixel_type: self.pixel_type,
            opacity: self.opacity,
            blend_mode: self.blend_mode,
        }
    }

    /// Copy for the undo journal: live pixels only.
    fn snapshot(&self) -> Layer {
        Layer {
            shadow: None,
            pending: None,
            ..self.clone()
        }
    }

    fn note_direct_write(&mut self) {
        if self.pending.is_none() {
            self.pending = Some(self.pixels.clone());
        }
    }
}

// ============================================================================
// CANVAS STATE – in-process layer host
// ============================================================================

/// Undo group being collected.
struct PendingGroup {
    label: String,
    depth: u32,
    commands: Vec<Box<dyn Command>>,
}

/// A multi-layer image with shadow buffers and an undo journal.
///
/// Journaling follows the host contract: layer structure changes, shadow
/// merges, clears and flushed direct writes are recorded; direct writes
/// that are never flushed before the undo group closes are not.
pub struct CanvasState {
    pub width: u32,
    pub height: u32,
    tile_size: u32,
    /// Attached layers, top first.
    pub layers: Vec<Layer>,
    /// Created but not yet added.
    detached: Vec<Layer>,
    pub active_layer_index: usize,
    next_layer_id: u64,
    pub history: HistoryManager,
    undo_group: Option<PendingGroup>,
    pub dirty_rect: Option<Rect>,
}

impl CanvasState {
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_tile_size(width, height, CHUNK_SIZE)
    }

    pub fn with_tile_size(width: u32, height: u32, tile_size: u32) -> Self {
        Self {
            width,
            height,
            tile_size: tile_size.max(1),
            layers: Vec::new(),
            detached: Vec::new(),
            active_layer_index: 0,
            next_layer_id: 1,
            history: HistoryManager::default(),
            undo_group: None,
            dirty_rect: None,
        }
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    // ---- lookup -------------------------------------------------------------

    /// Attached or detached layer by id.
    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.iter().chain(self.detached.iter()).find(|l| l.id == id)
    }

    pub fn layer_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.layers.iter_mut().chain(self.detached.iter_mut()).find(|l| l.id == id)
    }

    pub fn layer_by_name(&self, name: &str) -> Option<&Layer> {
        self.layers.iter().find(|l| l.name == name)
    }

    pub fn attached_index(&self, id: LayerId) -> Option<usize> {
        self.layers.iter().position(|l| l.id == id)
    }

    pub fn active_layer(&self) -> Option<LayerId> {
        self.layers.get(self.active_layer_index).map(|l| l.id)
    }

    fn name_taken(&self, name: &str, except: Option<LayerId>) -> bool {
        self.layers.iter().any(|l| l.name == name && Some(l.id) != except)
    }

    fn next_id(&mut self) -> LayerId {
        let id = LayerId(self.next_layer_id);
        self.next_layer_id += 1;
        id
    }

    fn layer_ref(&self, id: LayerId) -> Result<&Layer, HostError> {
        self.layer(id).ok_or(HostError::UnknownLayer(id))
    }

    fn layer_ref_mut(&mut self, id: LayerId) -> Result<&mut Layer, HostError> {
        self.layer_mut(id).ok_or(HostError::UnknownLayer(id))
    }

    // ---- building images ----------------------------------------------------

    /// Append a layer at the bottom of the stack without journaling it.
    /// Used when loading files.
    pub fn push_layer(
        &mut self,
        name: &str,
        pixel_type: PixelType,
        pixels: TiledImage,
    ) -> Result<LayerId, HostError> {
        check_channels(pixel_type)?;
        if pixels.channels() != pixel_type.channels() {
            return Err(HostError::PixelSize {
                expected: pixel_type.channels(),
                actual: pixels.channels(),
            });
        }
        check_geometry(pixels.width(), pixels.height())?;
        if self.name_taken(name, None) {
            return Err(HostError::NameInUse(name.to_string()));
        }
        let id = self.next_id();
        let pixels = pixels.rechunked(self.tile_size);
        self.layers.push(Layer::new(id, name.to_string(), pixels, pixel_type));
        self.mark_dirty(None);
        Ok(id)
    }

    /// Append a layer built from row-major bytes.
    pub fn push_raw_layer(
        &mut self,
        name: &str,
        pixel_type: PixelType,
        width: u32,
        height: u32,
        data: &[u8],
    ) -> Result<LayerId, HostError> {
        let n = check_channels(pixel_type)?;
        let pixels = TiledImage::from_raw(width, height, n, self.tile_size, data).ok_or(
            HostError::PixelSize {
                expected: width as usize * height as usize * n,
                actual: data.len(),
            },
        )?;
        self.push_layer(name, pixel_type, pixels)
    }

    // ---- history ------------------------------------------------------------

    pub fn set_max_undo_steps(&mut self, steps: usize) {
        self.history.set_max_history_size(steps);
    }

    pub fn undo(&mut self) -> Option<String> {
        if self.undo_group.is_some() {
            warn!("undo requested while an undo group is open");
            return None;
        }
        let mut history = std::mem::take(&mut self.history);
        let result = history.undo(self);
        self.history = history;
        result
    }

    pub fn redo(&mut self) -> Option<String> {
        if self.undo_group.is_some() {
            warn!("redo requested while an undo group is open");
            return None;
        }
        let mut history = std::mem::take(&mut self.history);
        let result = history.redo(self);
        self.history = history;
        result
    }

    fn record(&mut self, operation: LayerOperation) {
        let command: Box<dyn Command> = Box::new(LayerOpCommand::new(operation));
        match self.undo_group.as_mut() {
            Some(group) => group.commands.push(command),
            None => self.history.push(command),
        }
    }

    /// Insert a layer without journaling (history replay).
    pub(crate) fn attach_unrecorded(&mut self, index: usize, layer: Layer) {
        self.detached.retain(|l| l.id != layer.id);
        self.layers.retain(|l| l.id != layer.id);
        let index = index.min(self.layers.len());
        self.layers.insert(index, layer);
        self.clamp_active();
    }

    /// Remove a layer without journaling (history replay).
    pub(crate) fn detach_unrecorded(&mut self, id: LayerId) -> Option<Layer> {
        let index = self.attached_index(id)?;
        let layer = self.layers.remove(index);
        self.clamp_active();
        Some(layer)
    }

    fn clamp_active(&mut self) {
        self.active_layer_index = self.active_layer_index.min(self.layers.len().saturating_sub(1));
    }

    pub fn mark_dirty(&mut self, rect: Option<Rect>) {
        let full = Rect::full(self.width, self.height);
        let new_rect = rect.unwrap_or(full);
        // Merge with any existing dirty rect so we never lose pending updates
        self.dirty_rect = Some(match self.dirty_rect {
            Some(existing) => union(existing, new_rect),
            None => new_rect,
        });
    }

    // ---- compositing --------------------------------------------------------

    /// Flatten the visible layers into one RGBA buffer of the canvas size.
    ///
    /// Gray layers expand to RGB; the fourth channel of extended layers is
    /// treated as alpha. Rows are blended in parallel.
    pub fn composite(&self) -> Vec<u8> {
        let w = self.width as usize;
        let mut out = vec![0u8; w * self.height as usize * 4];
        if w == 0 {
            return out;
        }

        // Bottom to top.
        let planes: Vec<(&Layer, Vec<u8>)> = self
            .layers
            .iter()
            .rev()
            .filter(|l| l.visible && l.opacity > 0.0)
            .map(|l| (l, l.pixels.to_raw()))
            .collect();

        out.par_chunks_mut(w * 4).enumerate().for_each(|(y, row)| {
            let y = y as u32;
            for (layer, raw) in &planes {
                if y >= layer.height() {
                    continue;
                }
                let n = layer.pixels.channels();
                let lw = layer.width() as usize;
                for x in 0..w.min(lw) {
                    let off = (y as usize * lw + x) * n;
                    let top = expand_rgba(&raw[off..off + n]);
                    let dst = &mut row[x * 4..x * 4 + 4];
                    let base = [dst[0], dst[1], dst[2], dst[3]];
                    dst.copy_from_slice(&blend_pixel(base, top, layer.blend_mode, layer.opacity));
                }
            }
        });
        out
    }
}

fn check_channels(pixel_type: PixelType) -> Result<usize, HostError> {
    let n = pixel_type.channels();
    if n == 0 || n > MAX_CHANNELS {
        return Err(HostError::InvalidGeometry(format!(
            "{} channels per pixel is not supported",
            n
        )));
    }
    Ok(n)
}

fn check_geometry(width: u32, height: u32) -> Result<(), HostError> {
    if width as u64 * height as u64 > MAX_PIXELS {
        return Err(HostError::InvalidGeometry(format!(
            "{}x{} exceeds {} pixels",
            width, height, MAX_PIXELS
        )));
    }
    Ok(())
}

fn union(a: Rect, b: Rect) -> Rect {
    let x = a.x.min(b.x);
    let y = a.y.min(b.y);
    Rect::new(x, y, a.right().max(b.right()) - x, a.bottom().max(b.bottom()) - y)
}

fn expand_rgba(px: &[u8]) -> [u8; 4] {
    match px.len() {
        1 => [px[0], px[0], px[0], 255],
        2 => [px[0], px[0], px[0], px[1]],
        3 => [px[0], px[1], px[2], 255],
        _ => [px[0], px[1], px[2], px[3]],
    }
}

fn overlay_channel(base: f32, top: f32) -> f32 {
    if base < 0.5 {
        2.0 * base * top
    } else {
        1.0 - 2.0 * (1.0 - base) * (1.0 - top)
    }
}

fn blend_channel(mode: BlendMode, base: f32, top: f32) -> f32 {
    match mode {
        BlendMode::Normal => top,
        BlendMode::Multiply => base * top,
        BlendMode::Screen => 1.0 - (1.0 - base) * (1.0 - top),
        BlendMode::Overlay => overlay_channel(base, top),
        BlendMode::Darken => base.min(top),
        BlendMode::Lighten => base.max(top),
        BlendMode::Difference => (base - top).abs(),
        BlendMode::Additive => (base + top).min(1.0),
    }
}

/// Source-over compositing of `top` onto `base` with a blend mode.
pub fn blend_pixel(base: [u8; 4], top: [u8; 4], mode: BlendMode, opacity: f32) -> [u8; 4] {
    // Fast path: fully transparent top pixel — nothing to blend
    if top[3] == 0 {
        return base;
    }
    // Fast path: Normal blend, full opacity, fully opaque top pixel — just overwrite
    if mode == BlendMode::Normal && opacity >= 1.0 && top[3] == 255 {
        return top;
    }

    let opacity = opacity.clamp(0.0, 1.0);
    let base_a = base[3] as f32 / 255.0;
    let top_a = (top[3] as f32 / 255.0) * opacity;

    let out_a = top_a + base_a * (1.0 - top_a);
    if out_a == 0.0 {
        return [0, 0, 0, 0];
    }

    let mut out = [0u8; 4];
    for c in 0..3 {
        let b = base[c] as f32 / 255.0;
        let t = top[c] as f32 / 255.0;
        let blended = blend_channel(mode, b, t);
        let v = (blended * top_a + b * base_a * (1.0 - top_a)) / out_a;
        out[c] = (v * 255.0).round().clamp(0.0, 255.0) as u8;
    }
    out[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
    out
}

// ============================================================================
// HOST IMPLEMENTATION
// ============================================================================

impl LayerHost for CanvasState {
    fn tile_width(&self) -> u32 {
        self.tile_size
    }

    fn tile_height(&self) -> u32 {
        self.tile_size
    }

    fn layer_info(&self, layer: LayerId) -> Result<LayerInfo, HostError> {
        Ok(self.layer_ref(layer)?.info())
    }

    fn layers(&self) -> Vec<LayerId> {
        self.layers.iter().map(|l| l.id).collect()
    }

    fn layer_position(&self, layer: LayerId) -> Result<usize, HostError> {
        match self.attached_index(layer) {
            Some(index) => Ok(index),
            None if self.layer(layer).is_some() => Err(HostError::NotAttached(layer)),
            None => Err(HostError::UnknownLayer(layer)),
        }
    }

    fn create_layer(&mut self, spec: &NewLayer) -> Result<LayerId, HostError> {
        let n = check_channels(spec.pixel_type)?;
        check_geometry(spec.width, spec.height)?;

        let id = self.next_id();
        let pixels = TiledImage::with_chunk_size(spec.width, spec.height, n, self.tile_size);
        let mut layer = Layer::new(id, spec.name.clone(), pixels, spec.pixel_type);
        layer.opacity = spec.opacity;
        layer.blend_mode = spec.blend_mode;
        self.detached.push(layer);
        debug!("created layer {} '{}' {}x{}", id, spec.name, spec.width, spec.height);
        Ok(id)
    }

    fn add_layer(&mut self, layer: LayerId, position: usize) -> Result<(), HostError> {
        if self.attached_index(layer).is_some() {
            return Err(HostError::AlreadyAttached(layer));
        }
        let slot = self
            .detached
            .iter()
            .position(|l| l.id == layer)
            .ok_or(HostError::UnknownLayer(layer))?;
        if self.name_taken(&self.detached[slot].name, None) {
            return Err(HostError::NameInUse(self.detached[slot].name.clone()));
        }

        let new_layer = self.detached.remove(slot);
        let index = position.min(self.layers.len());
        let snapshot = new_layer.snapshot();
        self.layers.insert(index, new_layer);
        self.clamp_active();
        self.record(LayerOperation::Add { index, layer: snapshot });
        self.mark_dirty(None);
        Ok(())
    }

    fn remove_layer(&mut self, layer: LayerId) -> Result<(), HostError> {
        let Some(index) = self.attached_index(layer) else {
            // Never-attached layers are simply discarded.
            let before = self.detached.len();
            self.detached.retain(|l| l.id != layer);
            return if self.detached.len() < before {
                Ok(())
            } else {
                Err(HostError::UnknownLayer(layer))
            };
        };

        let removed = self.layers.remove(index);
        self.clamp_active();
        debug!("removed layer {} '{}' from position {}", removed.id, removed.name, index);
        self.record(LayerOperation::Delete { index, layer: removed.snapshot() });
        self.mark_dirty(None);
        Ok(())
    }

    fn rename_layer(&mut self, layer: LayerId, name: &str) -> Result<(), HostError> {
        let attached = self.attached_index(layer).is_some();
        if attached && self.name_taken(name, Some(layer)) {
            return Err(HostError::NameInUse(name.to_string()));
        }
        let target = self.layer_ref_mut(layer)?;
        if target.name == name {
            return Ok(());
        }
        let old_name = std::mem::replace(&mut target.name, name.to_string());
        if attached {
            self.record(LayerOperation::Rename {
                id: layer,
                old_name,
                new_name: name.to_string(),
            });
        }
        Ok(())
    }

    fn clear_layer(&mut self, layer: LayerId) -> Result<(), HostError> {
        let attached = self.attached_index(layer).is_some();
        let target = self.layer_ref_mut(layer)?;
        let before = target.pending.take().unwrap_or_else(|| target.pixels.clone());
        target.pixels.clear();
        target.shadow = None;
        let after = target.pixels.clone();

        if attached && before.chunk_count() > 0 {
            self.record(LayerOperation::Pixels { id: layer, before, after });
        }
        Ok(())
    }

    fn get_pixel(&self, layer: LayerId, x: u32, y: u32, out: &mut [u8]) -> Result<(), HostError> {
        let src = self.layer_ref(layer)?;
        let (width, height) = (src.width(), src.height());
        if x >= width || y >= height {
            return Err(HostError::PixelOutOfBounds { x, y, width, height });
        }
        let px = src.pixels.get_pixel(x, y);
        if out.len() != px.len() {
            return Err(HostError::PixelSize { expected: px.len(), actual: out.len() });
        }
        out.copy_from_slice(px);
        Ok(())
    }

    fn set_pixel(&mut self, layer: LayerId, x: u32, y: u32, pixel: &[u8]) -> Result<(), HostError> {
        let dst = self.layer_ref_mut(layer)?;
        let (width, height) = (dst.width(), dst.height());
        if x >= width || y >= height {
            return Err(HostError::PixelOutOfBounds { x, y, width, height });
        }
        let n = dst.pixels.channels();
        if pixel.len() != n {
            return Err(HostError::PixelSize { expected: n, actual: pixel.len() });
        }
        dst.note_direct_write();
        dst.pixels.put_pixel(x, y, pixel);
        Ok(())
    }

    fn get_region(&self, layer: LayerId, rect: Rect, access: RegionAccess) -> Result<PixelRegion, HostError> {
        let src = self.layer_ref(layer)?;
        check_region(rect, src.width(), src.height())?;

        let image = match access {
            RegionAccess::Shadow => src.shadow.as_ref().unwrap_or(&src.pixels),
            RegionAccess::ReadOnly | RegionAccess::Direct => &src.pixels,
        };
        let n = image.channels();
        let mut data = Vec::new();
        image.extract_region(rect, &mut data);
        let buffer = PixelBuffer::from_raw(rect.width, rect.height, n, data).ok_or_else(|| {
            HostError::InvalidGeometry(format!("region {}x{} of {} channels", rect.width, rect.height, n))
        })?;
        Ok(PixelRegion::new(rect, access, buffer))
    }

    fn put_region(&mut self, layer: LayerId, region: &PixelRegion) -> Result<(), HostError> {
        let dst = self.layer_ref_mut(layer)?;
        let rect = region.rect();
        check_region(rect, dst.width(), dst.height())?;
        let n = dst.pixels.channels();
        if region.channels() != n {
            return Err(HostError::PixelSize { expected: n, actual: region.channels() });
        }

        match region.access() {
            RegionAccess::ReadOnly => return Err(HostError::ReadOnlyRegion),
            RegionAccess::Direct => {
                dst.note_direct_write();
                dst.pixels.blit_region(rect, region.as_bytes());
            }
            RegionAccess::Shadow => {
                if dst.shadow.is_none() {
                    dst.shadow = Some(dst.pixels.clone());
                }
                if let Some(shadow) = dst.shadow.as_mut() {
                    shadow.blit_region(rect, region.as_bytes());
                }
            }
        }
        Ok(())
    }

    fn get_tile(&self, layer: LayerId, col: u32, row: u32) -> Result<Tile, HostError> {
        let src = self.layer_ref(layer)?;
        let grid = TileGrid::new(src.width(), src.height(), self.tile_size, self.tile_size);
        let extent = grid.extent(col, row).ok_or(HostError::TileOutOfBounds {
            col,
            row,
            cols: grid.cols(),
            rows: grid.rows(),
        })?;
        Ok(Tile::new(
            col,
            row,
            extent,
            src.pixels.channels(),
            src.pixels.chunk_stride(),
            src.pixels.get_chunk(col, row).cloned(),
        ))
    }

    fn get_tile_mut(&mut self, layer: LayerId, col: u32, row: u32) -> Result<TileMut<'_>, HostError> {
        let tile_size = self.tile_size;
        let dst = self.layer_ref_mut(layer)?;
        let grid = TileGrid::new(dst.width(), dst.height(), tile_size, tile_size);
        let extent = grid.extent(col, row).ok_or(HostError::TileOutOfBounds {
            col,
            row,
            cols: grid.cols(),
            rows: grid.rows(),
        })?;
        dst.note_direct_write();
        let channels = dst.pixels.channels();
        let stride = dst.pixels.chunk_stride();
        let data = dst.pixels.ensure_chunk_mut(col, row);
        Ok(TileMut::new(col, row, extent, channels, stride, data.as_mut_slice()))
    }

    fn flush(&mut self, layer: LayerId) -> Result<(), HostError> {
        let attached = self.attached_index(layer).is_some();
        let target = self.layer_ref_mut(layer)?;
        let Some(before) = target.pending.take() else {
            return Ok(());
        };
        let after = target.pixels.clone();
        if attached {
            self.record(LayerOperation::Pixels { id: layer, before, after });
        }
        Ok(())
    }

    fn merge_shadow(&mut self, layer: LayerId, undoable: bool) -> Result<(), HostError> {
        let attached = self.attached_index(layer).is_some();
        let target = self.layer_ref_mut(layer)?;
        let shadow = target.shadow.take().ok_or(HostError::NoShadow(layer))?;
        let current = std::mem::replace(&mut target.pixels, shadow);
        let before = target.pending.take().unwrap_or(current);
        let after = target.pixels.clone();

        if undoable && attached {
            self.record(LayerOperation::Pixels { id: layer, before, after });
        }
        Ok(())
    }

    fn update(&mut self, layer: LayerId, rect: Rect) -> Result<(), HostError> {
        self.layer_ref(layer)?;
        self.mark_dirty(Some(rect));
        Ok(())
    }

    fn begin_undo_group(&mut self, label: &str) {
        match self.undo_group.as_mut() {
            Some(group) => group.depth += 1,
            None => {
                debug!("undo group '{}' opened", label);
                self.undo_group = Some(PendingGroup {
                    label: label.to_string(),
                    depth: 1,
                    commands: Vec::new(),
                });
            }
        }
    }

    fn end_undo_group(&mut self) -> Result<(), HostError> {
        let group = self.undo_group.as_mut().ok_or(HostError::UndoGroupUnbalanced)?;
        group.depth -= 1;
        if group.depth > 0 {
            return Ok(());
        }
        let Some(group) = self.undo_group.take() else {
            return Ok(());
        };

        // Direct writes that were never flushed are not journaled.
        let mut unflushed = 0usize;
        for layer in self.layers.iter_mut().chain(self.detached.iter_mut()) {
            if layer.pending.take().is_some() {
                unflushed += 1;
            }
        }
        debug!(
            "undo group '{}' closed with {} step(s), {} unflushed layer(s)",
            group.label,
            group.commands.len(),
            unflushed
        );

        if !group.commands.is_empty() {
            self.history.push(Box::new(GroupCommand::new(group.label, group.commands)));
        }
        Ok(())
    }
}

fn check_region(rect: Rect, width: u32, height: u32) -> Result<(), HostError> {
    if rect.fits_within(width, height) {
        Ok(())
    } else {
        Err(HostError::RegionOutOfBounds {
            x: rect.x,
            y: rect.y,
            w: rect.width,
            h: rect.height,
            width,
            height,
        })
    }
}
