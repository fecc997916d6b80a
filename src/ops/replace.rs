// ============================================================================
// UNDO-SAFE LAYER REPLACEMENT
// ============================================================================
//
// Replacing a layer's content is done by building a new layer next to it,
// transforming into the new layer, and only then swapping the two. Every
// host mutation happens inside one undo group, so the whole replace is one
// undo step. The undo group and the progress report are both scoped guards:
// they are closed on every exit path, including errors.
// ============================================================================

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::str::FromStr;

use tracing::{debug, error, info, warn};

use crate::error::TransformError;
use crate::host::{LayerHost, LayerId, NewLayer};
use crate::ops::channels::{ColorChannel, IsolateChannel, PixelTransform};
use crate::ops::strategy::{AccessStrategy, Direct, check_layers};
use crate::pixels::Rect;
use crate::progress::{ProgressReporter, ProgressSink};

// ============================================================================
// UNDO SCOPE
// ============================================================================

/// An open undo group. Derefs to the host; closes the group on drop.
pub struct UndoScope<'h> {
    host: &'h mut dyn LayerHost,
}

impl<'h> UndoScope<'h> {
    pub fn begin(host: &'h mut dyn LayerHost, label: &str) -> Self {
        host.begin_undo_group(label);
        Self { host }
    }
}

impl<'h> Deref for UndoScope<'h> {
    type Target = dyn LayerHost + 'h;

    fn deref(&self) -> &Self::Target {
        self.host
    }
}

impl<'h> DerefMut for UndoScope<'h> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.host
    }
}

impl Drop for UndoScope<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.host.end_undo_group() {
            error!("failed to close undo group: {}", e);
        }
    }
}

// ============================================================================
// FAILURE POLICY
// ============================================================================

/// What happens to the half-built layer when a transform fails midway.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Remove the new layer; the original stays untouched.
    #[default]
    Rollback,
    /// Swap the partially written layer in anyway.
    KeepPartial,
}

impl FailurePolicy {
    pub fn name(&self) -> &'static str {
        match self {
            FailurePolicy::Rollback => "rollback",
            FailurePolicy::KeepPartial => "keep-partial",
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rollback" => Ok(FailurePolicy::Rollback),
            "keep-partial" | "keep_partial" | "partial" => Ok(FailurePolicy::KeepPartial),
            other => Err(format!(
                "unknown failure policy '{other}' (expected rollback or keep-partial)"
            )),
        }
    }
}

// ============================================================================
// REPLACE
// ============================================================================

/// Outcome of a successful replace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplaceReport {
    /// The layer now holding the transformed pixels.
    pub layer: LayerId,
    /// The layer that was removed.
    pub replaced: LayerId,
    pub name: String,
    pub position: usize,
    pub strategy: &'static str,
}

/// Replace `layer` with `transform(layer)` as a single undo step.
///
/// Errors are reported through `progress.message` and returned; the undo
/// group and the progress report are closed either way.
pub fn replace_layer(
    host: &mut dyn LayerHost,
    layer: LayerId,
    strategy: &dyn AccessStrategy,
    transform: &dyn PixelTransform,
    policy: FailurePolicy,
    progress: &mut dyn ProgressSink,
) -> Result<ReplaceReport, TransformError> {
    let label = operation_label(host, layer, transform);
    let mut reporter = ProgressReporter::start(progress, &label);

    let result = {
        let mut scope = UndoScope::begin(host, &label);
        replace_in_scope(&mut *scope, layer, strategy, transform, policy, &mut reporter)
    };

    match &result {
        Ok(report) => info!(
            "replaced '{}' at position {} using {} strategy",
            report.name, report.position, report.strategy
        ),
        Err(e) => {
            error!("{} failed: {}", label, e);
            reporter.message(&format!("Unexpected error: {e}"));
        }
    }
    result
}

fn replace_in_scope(
    host: &mut dyn LayerHost,
    layer: LayerId,
    strategy: &dyn AccessStrategy,
    transform: &dyn PixelTransform,
    policy: FailurePolicy,
    progress: &mut ProgressReporter<'_>,
) -> Result<ReplaceReport, TransformError> {
    let info = check_layers(host, layer, layer, transform)?;
    let position = host.layer_position(layer)?;

    let temp_name = unique_name(host, &format!("{} temp", info.name));
    let temp = host.create_layer(&NewLayer::like(&info, temp_name))?;
    host.add_layer(temp, position)?;
    host.clear_layer(temp)?;
    host.flush(temp)?;
    debug!("created {} for '{}' at position {}", temp, info.name, position);

    if let Err(e) = strategy.run(host, layer, temp, transform, progress) {
        match policy {
            FailurePolicy::Rollback => {
                if let Err(cleanup) = host.remove_layer(temp) {
                    warn!("could not remove partial layer {}: {}", temp, cleanup);
                }
            }
            FailurePolicy::KeepPartial => {
                warn!("keeping partially transformed layer for '{}'", info.name);
                let kept = host
                    .flush(temp)
                    .map_err(TransformError::from)
                    .and_then(|()| swap_in(host, layer, temp, &info.name));
                if let Err(cleanup) = kept {
                    warn!("could not swap in partial layer {}: {}", temp, cleanup);
                }
            }
        }
        return Err(e);
    }

    // Persist per-pixel writes so the swap undoes and redoes as a whole.
    host.flush(temp)?;
    swap_in(host, layer, temp, &info.name)?;
    progress.update(1.0);

    Ok(ReplaceReport {
        layer: temp,
        replaced: layer,
        name: info.name,
        position,
        strategy: strategy.name(),
    })
}

/// Remove the original, then give its name to the replacement. The order
/// matters: sibling layers may never share a name.
fn swap_in(
    host: &mut dyn LayerHost,
    original: LayerId,
    replacement: LayerId,
    name: &str,
) -> Result<(), TransformError> {
    host.remove_layer(original)?;
    host.rename_layer(replacement, name)?;
    Ok(())
}

/// `base`, or `base #2`, `base #3`, ... whichever is free.
pub(crate) fn unique_name(host: &dyn LayerHost, base: &str) -> String {
    if host.find_layer(base).is_none() {
        return base.to_string();
    }
    let mut n = 2u32;
    loop {
        let candidate = format!("{base} #{n}");
        if host.find_layer(&candidate).is_none() {
            return candidate;
        }
        n += 1;
    }
}

fn operation_label(host: &dyn LayerHost, layer: LayerId, transform: &dyn PixelTransform) -> String {
    match host.layer_info(layer) {
        Ok(info) => format!("{} {}...", transform.label(), info.name),
        Err(_) => format!("{} layer {}...", transform.label(), layer),
    }
}

// ============================================================================
// IN PLACE
// ============================================================================

/// Per-pixel transform written straight back into `layer`.
///
/// This skips the build-and-swap protocol: there is no new layer, and the
/// per-pixel writes are not journaled by the host, so undoing the group
/// does not restore the original pixels. Kept for comparison with the
/// conforming strategies.
pub fn transform_in_place(
    host: &mut dyn LayerHost,
    layer: LayerId,
    transform: &dyn PixelTransform,
    progress: &mut dyn ProgressSink,
) -> Result<(), TransformError> {
    let label = operation_label(host, layer, transform);
    let mut reporter = ProgressReporter::start(progress, &label);

    let result = {
        let mut scope = UndoScope::begin(host, &label);
        Direct.run(&mut *scope, layer, layer, transform, &mut reporter)
    };

    if let Err(e) = &result {
        error!("{} failed: {}", label, e);
        reporter.message(&format!("Unexpected error: {e}"));
    }
    result
}

// ============================================================================
// SPLIT CHANNELS
// ============================================================================

/// Add three layers above `layer` holding its red, green and blue channels
/// (other colors zeroed, extra channels copied). The source is kept.
///
/// Returns the new layers in red, green, blue order.
pub fn split_channels(
    host: &mut dyn LayerHost,
    layer: LayerId,
    policy: FailurePolicy,
    progress: &mut dyn ProgressSink,
) -> Result<Vec<LayerId>, TransformError> {
    let label = match host.layer_info(layer) {
        Ok(info) => format!("Splitting {}...", info.name),
        Err(_) => format!("Splitting layer {}...", layer),
    };
    let mut reporter = ProgressReporter::start(progress, &label);

    let result = {
        let mut scope = UndoScope::begin(host, &label);
        split_in_scope(&mut *scope, layer, policy, &mut reporter)
    };

    if let Err(e) = &result {
        error!("{} failed: {}", label, e);
        reporter.message(&format!("Unexpected error: {e}"));
    }
    result
}

fn split_in_scope(
    host: &mut dyn LayerHost,
    layer: LayerId,
    policy: FailurePolicy,
    progress: &mut ProgressReporter<'_>,
) -> Result<Vec<LayerId>, TransformError> {
    let isolate = ColorChannel::ALL.map(IsolateChannel);
    let info = check_layers(host, layer, layer, &isolate[0])?;
    let position = host.layer_position(layer)?;

    let mut created = Vec::with_capacity(3);
    for channel in ColorChannel::ALL {
        let name = unique_name(host, &format!("{} {}", info.name, channel.name()));
        let id = host.create_layer(&NewLayer::like(&info, name))?;
        host.add_layer(id, position)?;
        host.clear_layer(id)?;
        host.flush(id)?;
        created.push(id);
    }

    if let Err(e) = fill_channel_layers(host, layer, &created, &isolate, progress) {
        if policy == FailurePolicy::Rollback {
            for id in &created {
                if let Err(cleanup) = host.remove_layer(*id) {
                    warn!("could not remove partial layer {}: {}", id, cleanup);
                }
            }
        }
        return Err(e);
    }

    progress.update(1.0);
    Ok(created)
}

fn fill_channel_layers(
    host: &mut dyn LayerHost,
    source: LayerId,
    targets: &[LayerId],
    transforms: &[IsolateChannel; 3],
    progress: &mut ProgressReporter<'_>,
) -> Result<(), TransformError> {
    let grid = host.tile_grid(source)?;
    for (col, row, _) in grid.iter() {
        progress.update(grid.progress_at(col, row));
        let src = host.get_tile(source, col, row)?;
        for (target, transform) in targets.iter().zip(transforms.iter()) {
            let mut dst = host.get_tile_mut(*target, col, row)?;
            for x in 0..src.ewidth() {
                for y in 0..src.eheight() {
                    transform.apply(src.pixel(x, y), dst.pixel_mut(x, y));
                }
            }
        }
    }
    for target in targets {
        host.flush(*target)?;
        host.update(*target, Rect::full(grid.width, grid.height))?;
    }
    Ok(())
}
