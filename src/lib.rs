//! Tiled pixel transform engine.
//!
//! Layer transforms (discolour, invert, channel split) run against any
//! [`LayerHost`] through one of four pixel access strategies. Each
//! transform builds a replacement layer, fills it, and swaps it in as a
//! single undo step. [`CanvasState`] is the in-memory reference host used
//! by the command line and the tests.

pub mod canvas;
pub mod cli;
pub mod error;
pub mod history;
pub mod host;
pub mod io;
pub mod logger;
pub mod ops;
pub mod pixels;
pub mod progress;
pub mod settings;

pub use canvas::{CanvasState, TiledImage};
pub use error::{HostError, IoError, SettingsError, TransformError};
pub use host::{LayerHost, LayerId, LayerInfo, NewLayer, PixelType};
pub use ops::Engine;
pub use ops::channels::{Discolour, Invert, PixelTransform};
pub use ops::replace::{FailurePolicy, ReplaceReport};
pub use ops::strategy::{AccessStrategy, StrategyKind};
pub use progress::{NullProgress, ProgressSink};
pub use settings::EngineSettings;
