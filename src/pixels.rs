// ============================================================================
// PIXEL CONTAINERS — flat buffers, regions, tiles and tile-grid geometry
// ============================================================================
//
// Everything here is row-major: pixel (x, y) of a `width`-wide buffer with
// `channels` bytes per pixel starts at `(y * width + x) * channels`.
// ============================================================================

use std::sync::Arc;

/// Largest pixel size (in channels) the host model supports.
pub const MAX_CHANNELS: usize = 16;

/// A pixel of all-zero channels, returned by reference for unpopulated tiles.
static TRANSPARENT_PIXEL: [u8; MAX_CHANNELS] = [0; MAX_CHANNELS];

/// All-zero pixel of `channels` bytes.
#[inline]
pub(crate) fn transparent_pixel(channels: usize) -> &'static [u8] {
    &TRANSPARENT_PIXEL[..channels]
}

/// Axis-aligned pixel rectangle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// The rectangle covering a whole `width × height` layer.
    pub const fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Exclusive right edge.
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    /// True when the rectangle lies entirely inside a `width × height` layer.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        (self.x as u64 + self.width as u64) <= width as u64
            && (self.y as u64 + self.height as u64) <= height as u64
    }
}

// ============================================================================
// PIXEL BUFFER
// ============================================================================

/// Flat, strided container for `width × height` pixels of `channels` bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    channels: usize,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Wrap existing bytes; `None` when the length does not match the shape.
    pub fn from_raw(width: u32, height: u32, channels: usize, data: Vec<u8>) -> Option<Self> {
        if data.len() != width as usize * height as usize * channels {
            return None;
        }
        Some(Self { width, height, channels, data })
    }

    pub fn width(&self) -> u32 { self.width }
    pub fn height(&self) -> u32 { self.height }
    pub fn channels(&self) -> usize { self.channels }

    #[inline(always)]
    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * self.channels
    }

    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let off = self.offset(x, y);
        &self.data[off..off + self.channels]
    }

    #[inline]
    pub fn pixel_mut(&mut self, x: u32, y: u32) -> &mut [u8] {
        let off = self.offset(x, y);
        let n = self.channels;
        &mut self.data[off..off + n]
    }

    pub fn as_raw(&self) -> &[u8] { &self.data }
}

// ============================================================================
// PIXEL REGION
// ============================================================================

/// How a region is requested from the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegionAccess {
    /// Snapshot for reading; cannot be written back.
    ReadOnly,
    /// Writes go straight into the live layer.
    Direct,
    /// Writes go into the layer's shadow buffer and must be merged.
    Shadow,
}

/// Rectangular view over a layer, detached from the host's storage.
///
/// Pixel indexing is region-local: `(0, 0)` is the region's top-left corner.
#[derive(Clone, Debug)]
pub struct PixelRegion {
    rect: Rect,
    access: RegionAccess,
    buffer: PixelBuffer,
}

impl PixelRegion {
    pub fn new(rect: Rect, access: RegionAccess, buffer: PixelBuffer) -> Self {
        debug_assert_eq!(buffer.width(), rect.width);
        debug_assert_eq!(buffer.height(), rect.height);
        Self { rect, access, buffer }
    }

    pub fn rect(&self) -> Rect { self.rect }
    pub fn access(&self) -> RegionAccess { self.access }
    pub fn channels(&self) -> usize { self.buffer.channels() }

    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        self.buffer.pixel(x, y)
    }

    #[inline]
    pub fn pixel_mut(&mut self, x: u32, y: u32) -> &mut [u8] {
        self.buffer.pixel_mut(x, y)
    }

    /// Whole region as one contiguous row-major slice.
    pub fn as_bytes(&self) -> &[u8] {
        self.buffer.as_raw()
    }
}

// ============================================================================
// TILE GRID — the host's native tiling geometry
// ============================================================================

/// Partition of a `width × height` raster into `tile_width × tile_height`
/// tiles. Boundary tiles on the right/bottom edges are clipped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileGrid {
    pub width: u32,
    pub height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
}

impl TileGrid {
    pub fn new(width: u32, height: u32, tile_width: u32, tile_height: u32) -> Self {
        debug_assert!(tile_width > 0 && tile_height > 0);
        Self { width, height, tile_width, tile_height }
    }

    /// Number of tile columns.
    pub fn cols(&self) -> u32 {
        self.width.div_ceil(self.tile_width)
    }

    /// Number of tile rows.
    pub fn rows(&self) -> u32 {
        self.height.div_ceil(self.tile_height)
    }

    pub fn len(&self) -> usize {
        self.cols() as usize * self.rows() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Effective pixel extent of tile `(col, row)`, or `None` outside the grid.
    pub fn extent(&self, col: u32, row: u32) -> Option<Rect> {
        if col >= self.cols() || row >= self.rows() {
            return None;
        }
        let x = col * self.tile_width;
        let y = row * self.tile_height;
        Some(Rect::new(
            x,
            y,
            self.tile_width.min(self.width - x),
            self.tile_height.min(self.height - y),
        ))
    }

    /// Fraction of the grid completed when tile `(col, row)` starts,
    /// visiting columns outermost.
    pub fn progress_at(&self, col: u32, row: u32) -> f64 {
        let total = self.len();
        if total == 0 {
            return 1.0;
        }
        (col as f64 * self.rows() as f64 + row as f64) / total as f64
    }

    /// Every tile as `(col, row, extent)`, columns outermost.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32, Rect)> + '_ {
        let rows = self.rows();
        (0..self.cols()).flat_map(move |col| {
            (0..rows).filter_map(move |row| self.extent(col, row).map(|r| (col, row, r)))
        })
    }
}

// ============================================================================
// TILES — host-native storage units
// ============================================================================

/// Read handle to one tile. Holds a shared reference to the tile bytes so
/// the host's storage is never copied; `None` data means "never written".
#[derive(Clone, Debug)]
pub struct Tile {
    col: u32,
    row: u32,
    extent: Rect,
    channels: usize,
    stride: usize,
    data: Option<Arc<Vec<u8>>>,
}

impl Tile {
    pub fn new(
        col: u32,
        row: u32,
        extent: Rect,
        channels: usize,
        stride: usize,
        data: Option<Arc<Vec<u8>>>,
    ) -> Self {
        Self { col, row, extent, channels, stride, data }
    }

    pub fn col(&self) -> u32 { self.col }
    pub fn row(&self) -> u32 { self.row }
    pub fn extent(&self) -> Rect { self.extent }
    pub fn ewidth(&self) -> u32 { self.extent.width }
    pub fn eheight(&self) -> u32 { self.extent.height }
    pub fn channels(&self) -> usize { self.channels }

    /// Tile-local pixel read. Unpopulated tiles read as all-zero.
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        debug_assert!(x < self.extent.width && y < self.extent.height);
        match &self.data {
            Some(data) => {
                let off = y as usize * self.stride + x as usize * self.channels;
                &data[off..off + self.channels]
            }
            None => &TRANSPARENT_PIXEL[..self.channels],
        }
    }
}

/// Write handle to one tile, borrowing the host's storage directly.
/// Writes are persisted by the host when the handle is released.
#[derive(Debug)]
pub struct TileMut<'a> {
    col: u32,
    row: u32,
    extent: Rect,
    channels: usize,
    stride: usize,
    data: &'a mut [u8],
}

impl<'a> TileMut<'a> {
    pub fn new(
        col: u32,
        row: u32,
        extent: Rect,
        channels: usize,
        stride: usize,
        data: &'a mut [u8],
    ) -> Self {
        Self { col, row, extent, channels, stride, data }
    }

    pub fn col(&self) -> u32 { self.col }
    pub fn row(&self) -> u32 { self.row }
    pub fn extent(&self) -> Rect { self.extent }
    pub fn ewidth(&self) -> u32 { self.extent.width }
    pub fn eheight(&self) -> u32 { self.extent.height }
    pub fn channels(&self) -> usize { self.channels }

    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let off = y as usize * self.stride + x as usize * self.channels;
        &self.data[off..off + self.channels]
    }

    /// Tile-local mutable pixel. Coordinates must lie inside the effective
    /// extent; padding beyond it is never handed out.
    #[inline]
    pub fn pixel_mut(&mut self, x: u32, y: u32) -> &mut [u8] {
        assert!(
            x < self.extent.width && y < self.extent.height,
            "tile pixel ({x}, {y}) outside effective extent {}x{}",
            self.extent.width,
            self.extent.height
        );
        let off = y as usize * self.stride + x as usize * self.channels;
        let n = self.channels;
        &mut self.data[off..off + n]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn grid_counts_round_up() {
        let grid = TileGrid::new(130, 64, 64, 64);
        assert_eq!(grid.cols(), 3);
        assert_eq!(grid.rows(), 1);
        assert_eq!(grid.len(), 3);
    }

    #[test]
    fn grid_partitions_raster_exactly_once() {
        for &(w, h, tw, th) in &[(130u32, 70u32, 64u32, 64u32), (7, 5, 3, 2), (64, 64, 64, 64), (1, 1, 64, 64)] {
            let grid = TileGrid::new(w, h, tw, th);
            let mut seen = HashSet::new();
            let mut total = 0u64;
            for (_, _, r) in grid.iter() {
                assert!(r.width <= tw && r.height <= th);
                assert!(r.fits_within(w, h));
                total += r.area();
                for y in r.y..r.bottom() {
                    for x in r.x..r.right() {
                        assert!(seen.insert((x, y)), "pixel ({x},{y}) covered twice");
                    }
                }
            }
            assert_eq!(total, w as u64 * h as u64);
        }
    }

    #[test]
    fn boundary_tiles_are_clipped() {
        let grid = TileGrid::new(100, 70, 64, 64);
        assert_eq!(grid.extent(1, 1), Some(Rect::new(64, 64, 36, 6)));
        assert_eq!(grid.extent(2, 0), None);
    }

    #[test]
    fn empty_raster_has_no_tiles() {
        let grid = TileGrid::new(0, 10, 64, 64);
        assert!(grid.is_empty());
        assert_eq!(grid.iter().count(), 0);
        assert_eq!(grid.progress_at(0, 0), 1.0);
    }

    #[test]
    fn progress_follows_column_major_tile_order() {
        let grid = TileGrid::new(128, 192, 64, 64);
        let fractions: Vec<f64> = grid.iter().map(|(i, j, _)| grid.progress_at(i, j)).collect();
        assert_eq!(fractions.len(), 6);
        assert!(fractions.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(fractions[0], 0.0);
        assert_eq!(grid.progress_at(1, 0), 0.5);
    }

    #[test]
    fn unpopulated_tile_reads_zero() {
        let tile = Tile::new(0, 0, Rect::new(0, 0, 4, 4), 4, 16, None);
        assert_eq!(tile.pixel(3, 3), &[0, 0, 0, 0]);
    }

    #[test]
    fn region_wraps_row_major_bytes() {
        assert!(PixelBuffer::from_raw(2, 1, 3, vec![1, 2, 3]).is_none());
        let buffer = PixelBuffer::from_raw(2, 1, 3, vec![1, 2, 3, 4, 5, 6]).unwrap();
        let region = PixelRegion::new(Rect::full(2, 1), RegionAccess::Shadow, buffer);
        assert_eq!(region.pixel(1, 0), &[4, 5, 6]);
        assert_eq!(region.as_bytes().len(), 6);
    }
}
