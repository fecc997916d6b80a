//! Layer operations built on the host boundary.

pub mod channels;
pub mod replace;
pub mod strategy;

use crate::error::TransformError;
use crate::host::{LayerHost, LayerId};
use crate::progress::ProgressSink;
use crate::settings::EngineSettings;

use channels::{Discolour, Invert, PixelTransform};
use replace::{FailurePolicy, ReplaceReport};
use strategy::StrategyKind;

/// Strategy and failure policy bundled for repeated use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Engine {
    pub strategy: StrategyKind,
    pub policy: FailurePolicy,
}

impl Engine {
    pub fn new(strategy: StrategyKind, policy: FailurePolicy) -> Self {
        Self { strategy, policy }
    }

    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self::new(settings.strategy, settings.failure_policy)
    }

    /// Replace `layer` with its gray version.
    pub fn discolour(
        &self,
        host: &mut dyn LayerHost,
        layer: LayerId,
        progress: &mut dyn ProgressSink,
    ) -> Result<ReplaceReport, TransformError> {
        self.apply(host, layer, &Discolour, progress)
    }

    /// Replace `layer` with its color negative.
    pub fn invert(
        &self,
        host: &mut dyn LayerHost,
        layer: LayerId,
        progress: &mut dyn ProgressSink,
    ) -> Result<ReplaceReport, TransformError> {
        self.apply(host, layer, &Invert, progress)
    }

    pub fn apply(
        &self,
        host: &mut dyn LayerHost,
        layer: LayerId,
        transform: &dyn PixelTransform,
        progress: &mut dyn ProgressSink,
    ) -> Result<ReplaceReport, TransformError> {
        replace::replace_layer(host, layer, self.strategy.strategy(), transform, self.policy, progress)
    }

    /// Gray `layer` where it lies, without the replace protocol.
    pub fn discolour_in_place(
        &self,
        host: &mut dyn LayerHost,
        layer: LayerId,
        progress: &mut dyn ProgressSink,
    ) -> Result<(), TransformError> {
        replace::transform_in_place(host, layer, &Discolour, progress)
    }

    pub fn split_channels(
        &self,
        host: &mut dyn LayerHost,
        layer: LayerId,
        progress: &mut dyn ProgressSink,
    ) -> Result<Vec<LayerId>, TransformError> {
        replace::split_channels(host, layer, self.policy, progress)
    }
}
