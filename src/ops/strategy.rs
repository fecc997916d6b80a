// ============================================================================
// ACCESS STRATEGIES — four ways of moving pixels through a transform
// ============================================================================
//
// All strategies honour the same contract: given a source layer and a
// destination layer of identical shape, every destination pixel ends up as
// `transform(source pixel)`. They differ only in how pixels travel between
// the host and the transform, which is what decides throughput:
//
//   Direct          one host call per pixel read and per pixel write
//   RegionBuffered  one region snapshot, per-pixel indexing, one shadow merge
//   BulkArray       one contiguous array in, one contiguous array out
//   TileNative      host tiles in place, bounded memory per step
// ============================================================================

use std::fmt;
use std::str::FromStr;

use tracing::debug;

use crate::error::TransformError;
use crate::host::{LayerHost, LayerId, LayerInfo};
use crate::ops::channels::PixelTransform;
use crate::pixels::{MAX_CHANNELS, PixelBuffer, PixelRegion, RegionAccess};
use crate::progress::ProgressReporter;

/// Shared interface of the four strategies.
pub trait AccessStrategy {
    fn name(&self) -> &'static str;

    /// Transform `source` into `destination`. Both must already exist with
    /// identical geometry and pixel type; `destination` may equal `source`
    /// only for strategies that read each pixel before writing it.
    fn run(
        &self,
        host: &mut dyn LayerHost,
        source: LayerId,
        destination: LayerId,
        transform: &dyn PixelTransform,
        progress: &mut ProgressReporter<'_>,
    ) -> Result<(), TransformError>;
}

/// Check the shared preconditions and return the source layer's info.
pub fn check_layers(
    host: &dyn LayerHost,
    source: LayerId,
    destination: LayerId,
    transform: &dyn PixelTransform,
) -> Result<LayerInfo, TransformError> {
    let src = host.layer_info(source)?;
    let channels = src.channels();
    if channels < transform.min_channels() {
        return Err(TransformError::PreconditionViolation(format!(
            "layer '{}' has {} channel(s); {} needs at least {}",
            src.name,
            channels,
            transform.label().to_lowercase(),
            transform.min_channels()
        )));
    }
    if channels > MAX_CHANNELS {
        return Err(TransformError::PreconditionViolation(format!(
            "layer '{}' has {} channels; at most {} are supported",
            src.name, channels, MAX_CHANNELS
        )));
    }
    if destination != source {
        let dst = host.layer_info(destination)?;
        if !src.same_shape(&dst) {
            return Err(TransformError::PreconditionViolation(format!(
                "destination '{}' is {}x{} {:?} but source '{}' is {}x{} {:?}",
                dst.name, dst.width, dst.height, dst.pixel_type,
                src.name, src.width, src.height, src.pixel_type
            )));
        }
    }
    Ok(src)
}

// ============================================================================
// DIRECT — per-pixel host round trips
// ============================================================================

/// Reads and writes one pixel at a time through the host, columns outermost.
#[derive(Clone, Copy, Debug, Default)]
pub struct Direct;

impl AccessStrategy for Direct {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn run(
        &self,
        host: &mut dyn LayerHost,
        source: LayerId,
        destination: LayerId,
        transform: &dyn PixelTransform,
        progress: &mut ProgressReporter<'_>,
    ) -> Result<(), TransformError> {
        let info = check_layers(host, source, destination, transform)?;
        let n = info.channels();
        let mut src_px = [0u8; MAX_CHANNELS];
        let mut dst_px = [0u8; MAX_CHANNELS];

        for x in 0..info.width {
            progress.update(x as f64 / info.width as f64);
            for y in 0..info.height {
                host.get_pixel(source, x, y, &mut src_px[..n])?;
                transform.apply(&src_px[..n], &mut dst_px[..n]);
                host.set_pixel(destination, x, y, &dst_px[..n])?;
            }
        }

        host.update(destination, info.bounds())?;
        Ok(())
    }
}

// ============================================================================
// REGION BUFFERED — whole-layer regions, per-pixel indexing, one merge
// ============================================================================

/// Snapshots the source into a read region, writes through a shadow region,
/// then merges the shadow into the destination once.
#[derive(Clone, Copy, Debug, Default)]
pub struct RegionBuffered;

impl AccessStrategy for RegionBuffered {
    fn name(&self) -> &'static str {
        "region"
    }

    fn run(
        &self,
        host: &mut dyn LayerHost,
        source: LayerId,
        destination: LayerId,
        transform: &dyn PixelTransform,
        progress: &mut ProgressReporter<'_>,
    ) -> Result<(), TransformError> {
        let info = check_layers(host, source, destination, transform)?;
        let rect = info.bounds();

        let src = host.get_region(source, rect, RegionAccess::ReadOnly)?;
        let mut dst = host.get_region(destination, rect, RegionAccess::Shadow)?;

        for x in 0..info.width {
            progress.update(x as f64 / info.width as f64);
            for y in 0..info.height {
                transform.apply(src.pixel(x, y), dst.pixel_mut(x, y));
            }
        }

        host.put_region(destination, &dst)?;
        host.flush(destination)?;
        host.merge_shadow(destination, true)?;
        host.update(destination, rect)?;
        Ok(())
    }
}

// ============================================================================
// BULK ARRAY — one contiguous array in, one out
// ============================================================================

/// Copies the whole source into one array, transforms into a second array
/// and hands it back to the host in a single bulk write.
#[derive(Clone, Copy, Debug, Default)]
pub struct BulkArray;

impl AccessStrategy for BulkArray {
    fn name(&self) -> &'static str {
        "bulk"
    }

    fn run(
        &self,
        host: &mut dyn LayerHost,
        source: LayerId,
        destination: LayerId,
        transform: &dyn PixelTransform,
        progress: &mut ProgressReporter<'_>,
    ) -> Result<(), TransformError> {
        let info = check_layers(host, source, destination, transform)?;
        let rect = info.bounds();
        let n = info.channels();
        let w = info.width as usize;

        let src_rgn = host.get_region(source, rect, RegionAccess::ReadOnly)?;
        let src = src_rgn.as_bytes();
        let mut out = vec![0u8; src.len()];

        // Regions are row-major, so pixel (x, y) lives at (y * W + x) * N.
        for y in 0..info.height as usize {
            progress.update(y as f64 / info.height as f64);
            for x in 0..w {
                let pos = (y * w + x) * n;
                transform.apply(&src[pos..pos + n], &mut out[pos..pos + n]);
            }
        }
        drop(src_rgn);

        let buffer = PixelBuffer::from_raw(info.width, info.height, n, out).ok_or_else(|| {
            TransformError::PreconditionViolation(format!(
                "source region does not cover {}x{} pixels",
                info.width, info.height
            ))
        })?;
        let dst = PixelRegion::new(rect, RegionAccess::Shadow, buffer);
        host.put_region(destination, &dst)?;
        host.flush(destination)?;
        host.merge_shadow(destination, true)?;
        host.update(destination, rect)?;
        Ok(())
    }
}

// ============================================================================
// TILE NATIVE — the host's own tiles, one at a time
// ============================================================================

/// Walks the host tile grid, columns outermost, transforming each tile's
/// effective extent straight into the destination tile.
#[derive(Clone, Copy, Debug, Default)]
pub struct TileNative;

impl AccessStrategy for TileNative {
    fn name(&self) -> &'static str {
        "tile"
    }

    fn run(
        &self,
        host: &mut dyn LayerHost,
        source: LayerId,
        destination: LayerId,
        transform: &dyn PixelTransform,
        progress: &mut ProgressReporter<'_>,
    ) -> Result<(), TransformError> {
        let info = check_layers(host, source, destination, transform)?;
        let grid = host.tile_grid(source)?;
        debug!(
            cols = grid.cols(),
            rows = grid.rows(),
            tile_w = grid.tile_width,
            tile_h = grid.tile_height,
            "tile grid"
        );

        for (col, row, _) in grid.iter() {
            progress.update(grid.progress_at(col, row));
            let src = host.get_tile(source, col, row)?;
            let mut dst = host.get_tile_mut(destination, col, row)?;
            for x in 0..src.ewidth() {
                for y in 0..src.eheight() {
                    transform.apply(src.pixel(x, y), dst.pixel_mut(x, y));
                }
            }
        }

        host.flush(destination)?;
        host.update(destination, info.bounds())?;
        Ok(())
    }
}

// ============================================================================
// SELECTION
// ============================================================================

/// Strategy selector used by settings and the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum StrategyKind {
    Direct,
    RegionBuffered,
    BulkArray,
    #[default]
    TileNative,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 4] = [
        StrategyKind::Direct,
        StrategyKind::RegionBuffered,
        StrategyKind::BulkArray,
        StrategyKind::TileNative,
    ];

    pub fn strategy(&self) -> &'static dyn AccessStrategy {
        match self {
            StrategyKind::Direct => &Direct,
            StrategyKind::RegionBuffered => &RegionBuffered,
            StrategyKind::BulkArray => &BulkArray,
            StrategyKind::TileNative => &TileNative,
        }
    }

    pub fn name(&self) -> &'static str {
        self.strategy().name()
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "direct" => Ok(StrategyKind::Direct),
            "region" | "region-buffered" => Ok(StrategyKind::RegionBuffered),
            "bulk" | "bulk-array" => Ok(StrategyKind::BulkArray),
            "tile" | "tile-native" => Ok(StrategyKind::TileNative),
            other => Err(format!(
                "unknown strategy '{other}' (expected direct, region, bulk or tile)"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::CanvasState;
    use crate::host::PixelType;
    use crate::ops::channels::Discolour;
    use crate::progress::NullProgress;

    #[test]
    fn mismatched_destination_is_rejected_untouched() {
        let mut canvas = CanvasState::with_tile_size(4, 4, 2);
        let src = canvas.push_raw_layer("A", PixelType::Rgb, 4, 4, &[90; 48]).unwrap();
        let narrow = canvas.push_raw_layer("B", PixelType::Rgb, 3, 4, &[5; 36]).unwrap();
        let wider = canvas.push_raw_layer("C", PixelType::Rgba, 4, 4, &[6; 64]).unwrap();

        for kind in StrategyKind::ALL {
            for dst in [narrow, wider] {
                let before = canvas.layer(dst).unwrap().pixels.to_raw();
                let mut sink = NullProgress;
                let mut progress = ProgressReporter::start(&mut sink, "test");
                let err = kind.strategy().run(&mut canvas, src, dst, &Discolour, &mut progress).unwrap_err();
                drop(progress);

                assert!(matches!(err, TransformError::PreconditionViolation(_)), "{kind}: {err:?}");
                assert_eq!(canvas.layer(dst).unwrap().pixels.to_raw(), before, "{kind}");
            }
        }
        assert_eq!(canvas.history.undo_count(), 0);
    }

    #[test]
    fn strategy_names_round_trip() {
        for kind in StrategyKind::ALL {
            assert_eq!(kind.name().parse::<StrategyKind>(), Ok(kind));
        }
        assert!("fastest".parse::<StrategyKind>().is_err());
    }
}
