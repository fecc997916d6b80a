// ============================================================================
// discolour CLI — headless layer transforms via command-line arguments
// ============================================================================
//
// Usage examples:
//   discolour discolour -i photo.png -o gray.png
//   discolour discolour -i "shots/*.jpg" --output-dir gray/ --strategy region
//   discolour invert --input-dir scans/ --output-dir inverted/
//   discolour split -i photo.png --output-dir channels/ --project
//   discolour export -i photo.png --output-dir out/
//   discolour open-as-layer -i base.png --layer logo.png -o combined.dcl
//
// Every command loads files into an in-memory layered image and runs the
// same engine calls a host integration would make.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use tracing::{debug, info};

use crate::canvas::CanvasState;
use crate::host::{LayerHost, LayerId};
use crate::io::{
    self, PROJECT_EXTENSION, SaveFormat, encode_and_write, export_layer, layer_image, load_image_sync,
    open_as_layer, save_image, save_project,
};
use crate::ops::Engine;
use crate::ops::replace::FailurePolicy;
use crate::ops::strategy::StrategyKind;
use crate::progress::LogProgress;
use crate::settings::EngineSettings;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// discolour headless layer processor.
#[derive(Parser, Debug)]
#[command(
    name = "discolour",
    version,
    about = "Tiled layer transforms: discolour, invert, split and export images",
    long_about = "Load PNG, JPEG, BMP, GIF or DCL project files, transform their layers\n\
                  as single undoable operations, and write the results back out.\n\n\
                  Example:\n  \
                  discolour discolour -i photo.png -o gray.png\n  \
                  discolour discolour -i \"*.jpg\" --output-dir gray/ --strategy bulk"
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Mirror log output to stderr and print per-file timing.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Settings file to read instead of the one in the config directory.
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replace layers with their gray version.
    Discolour(DiscolourArgs),
    /// Invert the colors of every image in a directory.
    Invert(InvertArgs),
    /// Split a layer into red, green and blue layers.
    Split(SplitArgs),
    /// Save the active layer as PNG, JPEG and BMP.
    Export(ExportArgs),
    /// Add image files as new layers on top of a base image.
    OpenAsLayer(OpenAsLayerArgs),
}

/// Engine overrides shared by the transforming commands.
#[derive(Args, Debug, Clone, Default)]
pub struct EngineArgs {
    /// Pixel access strategy: direct, region, bulk, tile or in-place.
    #[arg(long, value_name = "MODE")]
    pub strategy: Option<StrategyChoice>,

    /// Tile edge length used for loaded images.
    #[arg(long, value_name = "N")]
    pub tile_size: Option<u32>,

    /// What to do with a half-written layer on failure: rollback or keep-partial.
    #[arg(long, value_name = "POLICY")]
    pub failure_policy: Option<FailurePolicy>,

    /// JPEG quality (1-100).
    #[arg(short, long, value_name = "1-100", value_parser = clap::value_parser!(u8).range(1..=100))]
    pub quality: Option<u8>,
}

#[derive(Args, Debug)]
pub struct DiscolourArgs {
    /// Input file(s). Glob patterns accepted (e.g. "*.png", "shots/*.jpg").
    #[arg(short, long, required = true, num_args = 1..)]
    pub input: Vec<String>,

    /// Output file path. Only valid for single-file input.
    #[arg(short, long, value_name = "FILE", conflicts_with = "output_dir")]
    pub output: Option<PathBuf>,

    /// Output directory for batch processing.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Output format: png, jpg, bmp, gif or dcl. Defaults to the input's format.
    #[arg(short, long, value_name = "FORMAT")]
    pub format: Option<String>,

    /// Discolour every layer instead of only the active one.
    #[arg(long)]
    pub all_layers: bool,

    #[command(flatten)]
    pub engine: EngineArgs,
}

#[derive(Args, Debug)]
pub struct InvertArgs {
    /// Directory of images to invert.
    #[arg(long, value_name = "DIR")]
    pub input_dir: PathBuf,

    /// Directory the inverted images are written to, under their original names.
    #[arg(long, value_name = "DIR")]
    pub output_dir: PathBuf,

    #[command(flatten)]
    pub engine: EngineArgs,
}

#[derive(Args, Debug)]
pub struct SplitArgs {
    #[arg(short, long, value_name = "FILE")]
    pub input: PathBuf,

    #[arg(long, value_name = "DIR")]
    pub output_dir: PathBuf,

    /// Write one layered project instead of one PNG per channel.
    #[arg(long)]
    pub project: bool,

    #[command(flatten)]
    pub engine: EngineArgs,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    #[arg(short, long, value_name = "FILE")]
    pub input: PathBuf,

    #[arg(long, value_name = "DIR")]
    pub output_dir: PathBuf,

    /// Formats to write, comma separated.
    #[arg(long, value_delimiter = ',', default_value = "png,jpg,bmp")]
    pub formats: Vec<String>,

    #[command(flatten)]
    pub engine: EngineArgs,
}

#[derive(Args, Debug)]
pub struct OpenAsLayerArgs {
    /// Base image or project.
    #[arg(short, long, value_name = "FILE")]
    pub input: PathBuf,

    /// Image file(s) to add, bottom to top.
    #[arg(short, long, required = true, num_args = 1.., value_name = "FILE")]
    pub layer: Vec<PathBuf>,

    /// Output file. A `.dcl` path keeps the layers; other formats are flattened.
    #[arg(short, long, value_name = "FILE")]
    pub output: PathBuf,

    #[command(flatten)]
    pub engine: EngineArgs,
}

/// `--strategy` value: one of the replacing strategies, or the in-place variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrategyChoice {
    Replace(StrategyKind),
    InPlace,
}

impl fmt::Display for StrategyChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyChoice::Replace(kind) => kind.fmt(f),
            StrategyChoice::InPlace => f.write_str("in-place"),
        }
    }
}

impl FromStr for StrategyChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "in-place" | "in_place" | "inplace" => Ok(StrategyChoice::InPlace),
            other => other
                .parse()
                .map(StrategyChoice::Replace)
                .map_err(|_| format!("unknown strategy '{other}' (expected direct, region, bulk, tile or in-place)")),
        }
    }
}

impl CliArgs {
    /// The command's engine overrides.
    fn engine_args(&self) -> &EngineArgs {
        match &self.command {
            Command::Discolour(a) => &a.engine,
            Command::Invert(a) => &a.engine,
            Command::Split(a) => &a.engine,
            Command::Export(a) => &a.engine,
            Command::OpenAsLayer(a) => &a.engine,
        }
    }
}

impl EngineArgs {
    /// Apply command-line overrides on top of the stored settings.
    pub fn apply(&self, mut settings: EngineSettings) -> EngineSettings {
        if let Some(StrategyChoice::Replace(kind)) = self.strategy {
            settings.strategy = kind;
        }
        if let Some(n) = self.tile_size.filter(|&n| n > 0) {
            settings.tile_size = n;
        }
        if let Some(policy) = self.failure_policy {
            settings.failure_policy = policy;
        }
        if let Some(q) = self.quality {
            settings.jpeg_quality = q;
        }
        settings
    }

    fn in_place(&self) -> bool {
        self.strategy == Some(StrategyChoice::InPlace)
    }
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run one command and return an OS exit code.
/// `0` = every file succeeded, `1` = one or more files failed.
pub fn run(args: CliArgs) -> ExitCode {
    let stored = match &args.config {
        Some(path) => match EngineSettings::load_from(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("error: could not read settings '{}': {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => EngineSettings::load(),
    };
    let settings = args.engine_args().apply(stored);
    debug!(?settings, "effective settings");

    let ok = match &args.command {
        Command::Discolour(a) => run_discolour(a, &settings, args.verbose),
        Command::Invert(a) => run_invert(a, &settings, args.verbose),
        Command::Split(a) => report(run_split(a, &settings)),
        Command::Export(a) => report(run_export(a, &settings)),
        Command::OpenAsLayer(a) => report(run_open_as_layer(a, &settings)),
    };

    if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}

fn report(result: Result<Vec<PathBuf>, String>) -> bool {
    match result {
        Ok(written) => {
            for path in written {
                println!("  → {}", path.display());
            }
            true
        }
        Err(e) => {
            eprintln!("error: {}", e);
            false
        }
    }
}

// ============================================================================
// discolour
// ============================================================================

fn run_discolour(args: &DiscolourArgs, settings: &EngineSettings, verbose: bool) -> bool {
    let inputs = resolve_inputs(&args.input);
    if inputs.is_empty() {
        eprintln!("error: no input files matched the given pattern(s).");
        return false;
    }

    if inputs.len() > 1 && args.output.is_some() {
        eprintln!(
            "error: {} input files given but --output only accepts a single file path.\n\
             Use --output-dir to specify a destination directory for batch processing.",
            inputs.len()
        );
        return false;
    }

    let format = match &args.format {
        Some(f) => match parse_format(f) {
            Some(ext) => Some(ext),
            None => {
                eprintln!("error: unknown output format '{}'.", f);
                return false;
            }
        },
        None => None,
    };

    if let Some(dir) = &args.output_dir {
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!("error: could not create output directory '{}': {}", dir.display(), e);
            return false;
        }
    }

    let total = inputs.len();
    let multi = total > 1;
    let mut any_failure = false;

    for (idx, input_path) in inputs.iter().enumerate() {
        if multi || verbose {
            println!("[{}/{}] {}", idx + 1, total, input_path.display());
        }
        let file_start = Instant::now();

        let Some(output_path) =
            build_output_path(input_path, args.output.as_deref(), args.output_dir.as_deref(), format)
        else {
            eprintln!("  error: cannot determine output path for '{}'.", input_path.display());
            any_failure = true;
            continue;
        };

        match discolour_one(input_path, &output_path, args, settings) {
            Ok(()) => {
                if verbose || multi {
                    println!(
                        "  → {} ({:.0}ms)",
                        output_path.display(),
                        file_start.elapsed().as_secs_f64() * 1000.0
                    );
                }
            }
            Err(e) => {
                eprintln!("  error: {}", e);
                any_failure = true;
            }
        }
    }

    !any_failure
}

fn discolour_one(input: &Path, output: &Path, args: &DiscolourArgs, settings: &EngineSettings) -> Result<(), String> {
    let mut state = load(input, settings)?;
    let engine = Engine::from_settings(settings);
    let mut progress = LogProgress::default();

    let targets: Vec<LayerId> = if args.all_layers {
        state.layers.iter().map(|l| l.id).collect()
    } else {
        state.active_layer().into_iter().collect()
    };
    if targets.is_empty() {
        return Err(format!("'{}' has no layers", input.display()));
    }

    for layer in targets {
        if args.engine.in_place() {
            engine
                .discolour_in_place(&mut state, layer, &mut progress)
                .map_err(|e| format!("discolour failed: {}", e))?;
        } else {
            engine
                .discolour(&mut state, layer, &mut progress)
                .map_err(|e| format!("discolour failed: {}", e))?;
        }
    }

    save_image(&state, output, settings.jpeg_quality).map_err(|e| format!("save failed: {}", e))
}

// ============================================================================
// invert
// ============================================================================

fn run_invert(args: &InvertArgs, settings: &EngineSettings, verbose: bool) -> bool {
    let entries = match std::fs::read_dir(&args.input_dir) {
        Ok(entries) => entries,
        Err(e) => {
            eprintln!("error: could not read input directory '{}': {}", args.input_dir.display(), e);
            return false;
        }
    };
    let mut inputs: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|p| p.is_file() && SaveFormat::from_path(p).is_some())
        .collect();
    inputs.sort();

    if let Err(e) = std::fs::create_dir_all(&args.output_dir) {
        eprintln!("error: could not create output directory '{}': {}", args.output_dir.display(), e);
        return false;
    }
    if args.engine.in_place() {
        eprintln!("error: invert has no in-place variant.");
        return false;
    }

    let engine = Engine::from_settings(settings);
    let total = inputs.len();
    let mut any_failure = false;
    info!("inverting {} file(s) from {}", total, args.input_dir.display());

    for (idx, input_path) in inputs.iter().enumerate() {
        if verbose {
            println!("[{}/{}] {}", idx + 1, total, input_path.display());
        }
        let Some(file_name) = input_path.file_name() else { continue };
        let output_path = args.output_dir.join(file_name);

        let result = load(input_path, settings).and_then(|mut state| {
            let layer = state
                .layers
                .first()
                .map(|l| l.id)
                .ok_or_else(|| format!("'{}' has no layers", input_path.display()))?;
            engine
                .invert(&mut state, layer, &mut LogProgress::default())
                .map_err(|e| format!("invert failed: {}", e))?;
            save_image(&state, &output_path, settings.jpeg_quality).map_err(|e| format!("save failed: {}", e))
        });

        // One bad file does not stop the batch.
        match result {
            Ok(()) if verbose => println!("  → {}", output_path.display()),
            Ok(()) => {}
            Err(e) => {
                eprintln!("  error: {}: {}", input_path.display(), e);
                any_failure = true;
            }
        }
    }

    !any_failure
}

// ============================================================================
// split / export / open-as-layer
// ============================================================================

fn run_split(args: &SplitArgs, settings: &EngineSettings) -> Result<Vec<PathBuf>, String> {
    let mut state = load(&args.input, settings)?;
    let layer = active(&state, &args.input)?;
    let created = Engine::from_settings(settings)
        .split_channels(&mut state, layer, &mut LogProgress::default())
        .map_err(|e| format!("split failed: {}", e))?;

    std::fs::create_dir_all(&args.output_dir).map_err(|e| e.to_string())?;

    if args.project {
        let stem = file_stem(&args.input)?;
        let path = args.output_dir.join(format!("{}.{}", stem, PROJECT_EXTENSION));
        save_project(&state, &path).map_err(|e| format!("save failed: {}", e))?;
        return Ok(vec![path]);
    }

    let mut written = Vec::with_capacity(created.len());
    for id in created {
        let info = state.layer_info(id).map_err(|e| e.to_string())?;
        let path = args.output_dir.join(format!("{}.{}", info.name, SaveFormat::Png.extension()));
        let image = layer_image(&state, id).map_err(|e| e.to_string())?;
        encode_and_write(&image, &path, SaveFormat::Png, settings.jpeg_quality)
            .map_err(|e| format!("save failed: {}", e))?;
        written.push(path);
    }
    Ok(written)
}

fn run_export(args: &ExportArgs, settings: &EngineSettings) -> Result<Vec<PathBuf>, String> {
    let formats = args
        .formats
        .iter()
        .map(|f| SaveFormat::from_extension(f).ok_or_else(|| format!("unknown export format '{}'", f)))
        .collect::<Result<Vec<_>, _>>()?;

    let state = load(&args.input, settings)?;
    let layer = active(&state, &args.input)?;
    let name = state.layer_info(layer).map_err(|e| e.to_string())?.name;
    export_layer(&state, layer, &args.output_dir, &name, &formats, settings.jpeg_quality)
        .map_err(|e| format!("export failed: {}", e))
}

fn run_open_as_layer(args: &OpenAsLayerArgs, settings: &EngineSettings) -> Result<Vec<PathBuf>, String> {
    let mut state = load(&args.input, settings)?;
    for path in &args.layer {
        open_as_layer(&mut state, path).map_err(|e| format!("'{}': {}", path.display(), e))?;
    }
    if let Some(parent) = args.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    }
    save_image(&state, &args.output, settings.jpeg_quality).map_err(|e| format!("save failed: {}", e))?;
    Ok(vec![args.output.clone()])
}

// ============================================================================
// Helpers
// ============================================================================

fn load(path: &Path, settings: &EngineSettings) -> Result<CanvasState, String> {
    let mut state = load_image_sync(path, settings.tile_size).map_err(|e| format!("load failed: {}", e))?;
    state.set_max_undo_steps(settings.max_undo_steps);
    Ok(state)
}

fn active(state: &CanvasState, path: &Path) -> Result<LayerId, String> {
    state
        .active_layer()
        .ok_or_else(|| format!("'{}' has no layers", path.display()))
}

fn file_stem(path: &Path) -> Result<String, String> {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .ok_or_else(|| format!("'{}' has no file name", path.display()))
}

/// Files named on the command line, in argument order without repeats.
///
/// An argument naming an existing file is taken as is, so a bad file still
/// gets its own error line. Anything else is a glob; its matches are kept only
/// when they are files we can read (PNG, JPEG, BMP, GIF or a `.dcl` project).
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut inputs: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let found: Vec<PathBuf> = if Path::new(pattern).is_file() {
            vec![PathBuf::from(pattern)]
        } else {
            match glob::glob(pattern) {
                Ok(paths) => paths
                    .flatten()
                    .filter(|p| p.is_file() && io::is_supported_input(p))
                    .collect(),
                Err(e) => {
                    eprintln!("warning: invalid glob '{}': {}", pattern, e);
                    continue;
                }
            }
        };

        if found.is_empty() {
            eprintln!("warning: '{}' matched no readable files.", pattern);
        }
        for path in found {
            if inputs.contains(&path) {
                debug!("{} given twice, processing once", path.display());
            } else {
                inputs.push(path);
            }
        }
    }

    inputs
}

/// Normalised extension for a `--format` value, or `None` if unknown.
fn parse_format(format_arg: &str) -> Option<&'static str> {
    let lower = format_arg.to_lowercase();
    if lower == PROJECT_EXTENSION {
        return Some(PROJECT_EXTENSION);
    }
    SaveFormat::from_extension(&lower).map(|f| f.extension())
}

/// Where a discoloured file is written.
///
/// `--output` wins outright. Otherwise the name is the input stem plus the
/// `--format` extension, or the input's own extension (`.dcl` projects stay
/// projects). With `--output-dir` it lands there; without, next to the
/// input, gaining a `_gray` suffix rather than overwriting it.
fn build_output_path(
    input: &Path,
    output: Option<&Path>,
    output_dir: Option<&Path>,
    format: Option<&str>,
) -> Option<PathBuf> {
    if let Some(out) = output {
        return Some(out.to_path_buf());
    }

    let stem = input.file_stem()?.to_string_lossy().into_owned();
    let ext = match format {
        Some(f) => f.to_string(),
        None => input.extension()?.to_string_lossy().into_owned(),
    };
    let dir = match output_dir {
        Some(dir) => dir,
        None => input.parent().unwrap_or(Path::new(".")),
    };

    let path = dir.join(format!("{stem}.{ext}"));
    if output_dir.is_none() && path == input {
        return Some(dir.join(format!("{stem}_gray.{ext}")));
    }
    Some(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_choice_parses_in_place_and_kinds() {
        assert_eq!("in-place".parse::<StrategyChoice>(), Ok(StrategyChoice::InPlace));
        assert_eq!(
            "bulk".parse::<StrategyChoice>(),
            Ok(StrategyChoice::Replace(StrategyKind::BulkArray))
        );
        assert!("fastest".parse::<StrategyChoice>().is_err());
    }

    #[test]
    fn overrides_replace_stored_settings() {
        let args = EngineArgs {
            strategy: Some(StrategyChoice::Replace(StrategyKind::Direct)),
            tile_size: Some(16),
            failure_policy: Some(FailurePolicy::KeepPartial),
            quality: None,
        };
        let s = args.apply(EngineSettings::default());
        assert_eq!(s.strategy, StrategyKind::Direct);
        assert_eq!(s.tile_size, 16);
        assert_eq!(s.failure_policy, FailurePolicy::KeepPartial);
        assert_eq!(s.jpeg_quality, EngineSettings::default().jpeg_quality);
    }

    #[test]
    fn in_place_keeps_stored_strategy() {
        let args = EngineArgs { strategy: Some(StrategyChoice::InPlace), ..Default::default() };
        assert!(args.in_place());
        assert_eq!(args.apply(EngineSettings::default()).strategy, StrategyKind::TileNative);
    }

    #[test]
    fn output_path_priority() {
        let input = Path::new("shots/photo.png");
        assert_eq!(
            build_output_path(input, Some(Path::new("x.jpg")), None, None),
            Some(PathBuf::from("x.jpg"))
        );
        assert_eq!(
            build_output_path(input, None, Some(Path::new("out")), Some("jpg")),
            Some(PathBuf::from("out/photo.jpg"))
        );
        assert_eq!(
            build_output_path(input, None, None, None),
            Some(PathBuf::from("shots/photo_gray.png"))
        );
        assert_eq!(
            build_output_path(input, None, None, Some("bmp")),
            Some(PathBuf::from("shots/photo.bmp"))
        );
    }

    #[test]
    fn projects_keep_their_extension() {
        let input = Path::new("work/scene.dcl");
        assert_eq!(
            build_output_path(input, None, Some(Path::new("gray")), None),
            Some(PathBuf::from("gray/scene.dcl"))
        );
        assert_eq!(
            build_output_path(input, None, None, Some("png")),
            Some(PathBuf::from("work/scene.png"))
        );
        assert_eq!(build_output_path(Path::new("work/noext"), None, None, None), None);
    }

    #[test]
    fn inputs_keep_order_and_skip_unreadable_matches() {
        let dir = std::env::temp_dir().join(format!("discolour-inputs-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        for name in ["b.png", "a.gif", "notes.txt", "c.dcl"] {
            std::fs::write(dir.join(name), b"x").unwrap();
        }
        let literal = dir.join("b.png").to_string_lossy().into_owned();
        let pattern = dir.join("*").to_string_lossy().into_owned();
        let missing = dir.join("*.jpg").to_string_lossy().into_owned();

        let inputs = resolve_inputs(&[literal, pattern, missing]);
        let names: Vec<_> = inputs
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["b.png", "a.gif", "c.dcl"]);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn format_names_normalise() {
        assert_eq!(parse_format("JPEG"), Some("jpg"));
        assert_eq!(parse_format("dcl"), Some("dcl"));
        assert_eq!(parse_format("tiff"), None);
    }

    #[test]
    fn parses_subcommands() {
        let args = CliArgs::try_parse_from([
            "discolour", "discolour", "-i", "a.png", "b.png", "--output-dir", "out", "--strategy", "region", "-v",
        ])
        .unwrap();
        assert!(args.verbose);
        match args.command {
            Command::Discolour(d) => {
                assert_eq!(d.input, vec!["a.png", "b.png"]);
                assert_eq!(d.engine.strategy, Some(StrategyChoice::Replace(StrategyKind::RegionBuffered)));
            }
            other => panic!("unexpected command {:?}", other),
        }

        let args = CliArgs::try_parse_from(["discolour", "export", "-i", "a.png", "--output-dir", "o"]).unwrap();
        match args.command {
            Command::Export(e) => assert_eq!(e.formats, vec!["png", "jpg", "bmp"]),
            other => panic!("unexpected command {:?}", other),
        }
    }
}
