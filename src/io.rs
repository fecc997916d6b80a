use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use image::codecs::bmp::BmpEncoder;
use image::codecs::gif::GifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ColorType, DynamicImage, ImageEncoder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::canvas::{CanvasState, TiledImage};
use crate::error::IoError;
use crate::host::{BlendMode, LayerHost, LayerId, NewLayer, PixelType};
use crate::ops::replace::{UndoScope, unique_name};
use crate::pixels::{PixelBuffer, PixelRegion, Rect, RegionAccess};

/// Extension of the native layered project format.
pub const PROJECT_EXTENSION: &str = "dcl";

// ============================================================================
// SAVE FORMATS
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveFormat {
    Png,
    Jpeg,
    Bmp,
    Gif,
}

impl SaveFormat {
    pub const ALL: [SaveFormat; 4] = [SaveFormat::Png, SaveFormat::Jpeg, SaveFormat::Bmp, SaveFormat::Gif];

    pub fn extension(&self) -> &'static str {
        match self {
            SaveFormat::Png => "png",
            SaveFormat::Jpeg => "jpg",
            SaveFormat::Bmp => "bmp",
            SaveFormat::Gif => "gif",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "png" => Some(SaveFormat::Png),
            "jpg" | "jpeg" => Some(SaveFormat::Jpeg),
            "bmp" => Some(SaveFormat::Bmp),
            "gif" => Some(SaveFormat::Gif),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension().and_then(|e| e.to_str()).and_then(Self::from_extension)
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase()
}

/// True for paths this module can read.
pub fn is_supported_input(path: &Path) -> bool {
    let ext = extension_of(path);
    ext == PROJECT_EXTENSION || SaveFormat::from_extension(&ext).is_some()
}

// ============================================================================
// PROJECT FILE FORMAT
// ============================================================================

/// Magic header for the tiled sparse format
const PROJECT_MAGIC_V1: &str = "DCL1";

/// Maximum supported canvas dimension in pixels (per axis).
/// Prevents memory exhaustion from crafted project files.
const MAX_CANVAS_DIM: u32 = 32_768;
/// Maximum number of layers in a project file.
const MAX_LAYERS: usize = 256;

/// Serializable project file — sparse tiled format
#[derive(Serialize, Deserialize)]
struct ProjectFileV1 {
    magic: String,
    width: u32,
    height: u32,
    tile_size: u32,
    active_layer_index: usize,
    /// Top to bottom.
    layers: Vec<LayerDataV1>,
}

/// Serializable layer data — sparse chunks
#[derive(Serialize, Deserialize)]
struct LayerDataV1 {
    name: String,
    visible: bool,
    opacity: f32,
    blend_mode: u8,
    channels: u8,
    width: u32,
    height: u32,
    chunks: Vec<ChunkData>,
}

/// A single serialisable chunk (`tile_size² × channels` bytes of pixel data)
#[derive(Serialize, Deserialize)]
struct ChunkData {
    cx: u32,
    cy: u32,
    pixels: Vec<u8>,
}

fn build_project(state: &CanvasState) -> ProjectFileV1 {
    let layers = state
        .layers
        .iter()
        .map(|layer| {
            let chunks = layer
                .pixels
                .chunk_keys()
                .filter_map(|(cx, cy)| {
                    layer.pixels.get_chunk(cx, cy).map(|chunk| ChunkData {
                        cx,
                        cy,
                        pixels: chunk.as_ref().clone(),
                    })
                })
                .collect();

            LayerDataV1 {
                name: layer.name.clone(),
                visible: layer.visible,
                opacity: layer.opacity,
                blend_mode: layer.blend_mode.to_u8(),
                channels: layer.pixel_type.channels() as u8,
                width: layer.width(),
                height: layer.height(),
                chunks,
            }
        })
        .collect();

    ProjectFileV1 {
        magic: PROJECT_MAGIC_V1.to_string(),
        width: state.width,
        height: state.height,
        tile_size: state.tile_size(),
        active_layer_index: state.active_layer_index,
        layers,
    }
}

/// Save all layers as a project file.
pub fn save_project(state: &CanvasState, path: &Path) -> Result<(), IoError> {
    let project = build_project(state);
    let writer = BufWriter::new(File::create(path)?);
    bincode::serialize_into(writer, &project)?;
    info!("saved project {} ({} layers)", path.display(), project.layers.len());
    Ok(())
}

/// Load a project file. The journal of the returned image is empty.
pub fn load_project(path: &Path) -> Result<CanvasState, IoError> {
    let raw = std::fs::read(path)?;
    if raw.len() < 12 {
        return Err(IoError::InvalidProject("file too small".into()));
    }

    // bincode encodes a String as: 8-byte length prefix + UTF-8 data.
    // The magic is 4 chars, so bytes 8..12 hold it.
    let magic = std::str::from_utf8(&raw[8..12]).unwrap_or("");
    if magic != PROJECT_MAGIC_V1 {
        return Err(IoError::InvalidProject(format!("unknown magic '{}'", magic)));
    }

    let project: ProjectFileV1 = bincode::deserialize(&raw)?;
    if project.width == 0 || project.height == 0 {
        return Err(IoError::InvalidProject("canvas dimensions cannot be zero".into()));
    }
    if project.width > MAX_CANVAS_DIM || project.height > MAX_CANVAS_DIM {
        return Err(IoError::InvalidProject(format!(
            "canvas size {}x{} exceeds maximum allowed {}x{}",
            project.width, project.height, MAX_CANVAS_DIM, MAX_CANVAS_DIM
        )));
    }
    if project.layers.is_empty() {
        return Err(IoError::InvalidProject("project contains no layers".into()));
    }
    if project.layers.len() > MAX_LAYERS {
        return Err(IoError::InvalidProject(format!(
            "project contains {} layers, which exceeds the maximum of {}",
            project.layers.len(),
            MAX_LAYERS
        )));
    }
    if project.tile_size == 0 {
        return Err(IoError::InvalidProject("tile size cannot be zero".into()));
    }

    let mut state = CanvasState::with_tile_size(project.width, project.height, project.tile_size);
    for ld in project.layers {
        if ld.width > MAX_CANVAS_DIM || ld.height > MAX_CANVAS_DIM {
            return Err(IoError::InvalidProject(format!(
                "layer '{}' is {}x{}",
                ld.name, ld.width, ld.height
            )));
        }
        let pixel_type = PixelType::from_channels(ld.channels as usize).ok_or_else(|| {
            IoError::InvalidProject(format!("layer '{}' has {} channels", ld.name, ld.channels))
        })?;

        let mut tiled = TiledImage::with_chunk_size(ld.width, ld.height, pixel_type.channels(), project.tile_size);
        for cd in ld.chunks {
            let (cx, cy, len) = (cd.cx, cd.cy, cd.pixels.len());
            if !tiled.set_chunk(cx, cy, cd.pixels) {
                return Err(IoError::InvalidProject(format!(
                    "chunk ({},{}) in layer '{}' does not fit ({} bytes)",
                    cx, cy, ld.name, len
                )));
            }
        }

        let id = state.push_layer(&ld.name, pixel_type, tiled)?;
        if let Some(layer) = state.layer_mut(id) {
            layer.visible = ld.visible;
            layer.opacity = ld.opacity.clamp(0.0, 1.0);
            layer.blend_mode = BlendMode::from_u8(ld.blend_mode);
        }
    }
    state.active_layer_index = project.active_layer_index.min(state.layers.len() - 1);
    debug!("loaded project {} ({} layers)", path.display(), state.layers.len());
    Ok(state)
}

// ============================================================================
// SYNCHRONOUS IMAGE LOADER (CLI / headless mode)
// ============================================================================

/// Decode an image file into a pixel type and row-major bytes.
/// 8-bit gray/RGB(A) layouts are kept; anything else becomes RGBA.
fn decode_image(path: &Path) -> Result<(PixelType, u32, u32, Vec<u8>), IoError> {
    let img = image::open(path)?;
    let (w, h) = (img.width(), img.height());
    Ok(match img {
        DynamicImage::ImageLuma8(buf) => (PixelType::Gray, w, h, buf.into_raw()),
        DynamicImage::ImageLumaA8(buf) => (PixelType::GrayA, w, h, buf.into_raw()),
        DynamicImage::ImageRgb8(buf) => (PixelType::Rgb, w, h, buf.into_raw()),
        DynamicImage::ImageRgba8(buf) => (PixelType::Rgba, w, h, buf.into_raw()),
        other => (PixelType::Rgba, w, h, other.to_rgba8().into_raw()),
    })
}

fn layer_name_for(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("Background")
        .to_string()
}

/// Synchronously load an image into a single-layer [`CanvasState`]
/// named after the file stem. Project files keep their layers.
pub fn load_image_sync(path: &Path, tile_size: u32) -> Result<CanvasState, IoError> {
    let ext = extension_of(path);
    if ext == PROJECT_EXTENSION {
        return load_project(path);
    }
    if SaveFormat::from_extension(&ext).is_none() {
        return Err(IoError::UnsupportedFormat(path.display().to_string()));
    }

    let (pixel_type, w, h, data) = decode_image(path)?;
    let mut state = CanvasState::with_tile_size(w, h, tile_size);
    state.push_raw_layer(&layer_name_for(path), pixel_type, w, h, &data)?;
    debug!("loaded {} as {}x{} {:?}", path.display(), w, h, pixel_type);
    Ok(state)
}

/// Add `path` as a new top layer of `host`, as one undo step.
/// The layer is named after the file stem, made unique among siblings.
pub fn open_as_layer(host: &mut dyn LayerHost, path: &Path) -> Result<LayerId, IoError> {
    let (pixel_type, w, h, data) = decode_image(path)?;
    let name = unique_name(host, &layer_name_for(path));
    let label = format!("Open as Layer {}", name);

    let mut scope = UndoScope::begin(host, &label);
    let id = scope.create_layer(&NewLayer {
        name,
        width: w,
        height: h,
        pixel_type,
        opacity: 1.0,
        blend_mode: BlendMode::Normal,
    })?;
    scope.add_layer(id, 0)?;

    let rect = Rect::full(w, h);
    let buffer = PixelBuffer::from_raw(w, h, pixel_type.channels(), data)
        .ok_or_else(|| IoError::UnsupportedFormat(path.display().to_string()))?;
    scope.put_region(id, &PixelRegion::new(rect, RegionAccess::Direct, buffer))?;
    scope.flush(id)?;
    scope.update(id, rect)?;
    info!("opened {} as layer {}", path.display(), id);
    Ok(id)
}

// ============================================================================
// ENCODING
// ============================================================================

/// Pixels of one layer as an `image` buffer.
pub fn layer_image(state: &CanvasState, layer: LayerId) -> Result<DynamicImage, IoError> {
    let src = state
        .layer(layer)
        .ok_or(crate::error::HostError::UnknownLayer(layer))?;
    let (w, h) = (src.width(), src.height());
    let raw = src.pixels.to_raw();
    let bad = || IoError::UnsupportedFormat(format!("layer '{}'", src.name));
    Ok(match src.pixel_type {
        PixelType::Gray => DynamicImage::ImageLuma8(image::GrayImage::from_raw(w, h, raw).ok_or_else(bad)?),
        PixelType::GrayA => {
            DynamicImage::ImageLumaA8(image::GrayAlphaImage::from_raw(w, h, raw).ok_or_else(bad)?)
        }
        PixelType::Rgb => DynamicImage::ImageRgb8(image::RgbImage::from_raw(w, h, raw).ok_or_else(bad)?),
        PixelType::Rgba => DynamicImage::ImageRgba8(image::RgbaImage::from_raw(w, h, raw).ok_or_else(bad)?),
        PixelType::Extended(n) => {
            return Err(IoError::UnsupportedFormat(format!(
                "layer '{}' has {} channels; only gray and RGB(A) layers can be saved",
                src.name, n
            )));
        }
    })
}

/// The image a plain (non-project) save writes: the only layer as-is, or
/// the flattened composite of a multi-layer image.
pub fn flattened_image(state: &CanvasState) -> Result<DynamicImage, IoError> {
    match state.layers.as_slice() {
        [only] => layer_image(state, only.id),
        _ => image::RgbaImage::from_raw(state.width, state.height, state.composite())
            .map(DynamicImage::ImageRgba8)
            .ok_or_else(|| IoError::UnsupportedFormat("composite".into())),
    }
}

/// Encode and write an image to a file.
/// JPEG has no alpha channel, so alpha is dropped there.
pub fn encode_and_write(image: &DynamicImage, path: &Path, format: SaveFormat, quality: u8) -> Result<(), IoError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    let (w, h) = (image.width(), image.height());

    match format {
        SaveFormat::Png => {
            PngEncoder::new(&mut writer).write_image(image.as_bytes(), w, h, image.color())?;
        }
        SaveFormat::Jpeg => {
            let mut encoder = JpegEncoder::new_with_quality(&mut writer, quality);
            match image {
                DynamicImage::ImageLuma8(gray) => encoder.encode(gray.as_raw(), w, h, ColorType::L8)?,
                other => {
                    let rgb = other.to_rgb8();
                    encoder.encode(rgb.as_raw(), w, h, ColorType::Rgb8)?;
                }
            }
        }
        SaveFormat::Bmp => {
            let mut encoder = BmpEncoder::new(&mut writer);
            encoder.encode(image.as_bytes(), w, h, image.color())?;
        }
        SaveFormat::Gif => {
            let rgba = image.to_rgba8();
            let mut encoder = GifEncoder::new(&mut writer);
            encoder.encode(rgba.as_raw(), w, h, ColorType::Rgba8)?;
        }
    }
    debug!("wrote {} as {:?}", path.display(), format);
    Ok(())
}

/// Save an image to `path`: a project file for `.dcl`, otherwise the
/// flattened image in the format named by the extension.
pub fn save_image(state: &CanvasState, path: &Path, quality: u8) -> Result<(), IoError> {
    if extension_of(path) == PROJECT_EXTENSION {
        return save_project(state, path);
    }
    let format = SaveFormat::from_path(path).ok_or_else(|| IoError::UnsupportedFormat(path.display().to_string()))?;
    encode_and_write(&flattened_image(state)?, path, format, quality)
}

/// Write one layer to `dir` once per format, as `<stem>.<ext>`.
pub fn export_layer(
    state: &CanvasState,
    layer: LayerId,
    dir: &Path,
    stem: &str,
    formats: &[SaveFormat],
    quality: u8,
) -> Result<Vec<PathBuf>, IoError> {
    std::fs::create_dir_all(dir)?;
    let image = layer_image(state, layer)?;
    let mut written = Vec::with_capacity(formats.len());
    for format in formats {
        let path = dir.join(format!("{}.{}", stem, format.extension()));
        encode_and_write(&image, &path, *format, quality)?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("discolour-io-{}-{}", tag, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn rgb_canvas() -> (CanvasState, LayerId) {
        let mut state = CanvasState::with_tile_size(3, 2, 2);
        let data = [10, 20, 30, 40, 40, 40, 0, 0, 0, 255, 0, 0, 1, 2, 3, 100, 100, 101];
        let id = state.push_raw_layer("Photo", PixelType::Rgb, 3, 2, &data).unwrap();
        (state, id)
    }

    #[test]
    fn png_keeps_layer_pixels_and_type() {
        let dir = temp_dir("png");
        let (state, id) = rgb_canvas();
        let path = dir.join("photo.png");
        save_image(&state, &path, 90).unwrap();

        let loaded = load_image_sync(&path, 64).unwrap();
        let layer = &loaded.layers[0];
        assert_eq!(layer.name, "photo");
        assert_eq!(layer.pixel_type, PixelType::Rgb);
        assert_eq!(layer.pixels.to_raw(), state.layer(id).unwrap().pixels.to_raw());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn project_keeps_layers() {
        let dir = temp_dir("project");
        let (mut state, _) = rgb_canvas();
        state.push_raw_layer("Mask", PixelType::Gray, 3, 2, &[0, 1, 2, 3, 4, 5]).unwrap();
        let path = dir.join("scene.dcl");
        save_image(&state, &path, 90).unwrap();

        let loaded = load_image_sync(&path, 64).unwrap();
        let names: Vec<&str> = loaded.layers.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["Photo", "Mask"]);
        assert_eq!(loaded.tile_size(), 2);
        assert_eq!(loaded.layers[1].pixels.to_raw(), vec![0, 1, 2, 3, 4, 5]);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn garbage_is_not_a_project() {
        let dir = temp_dir("garbage");
        let path = dir.join("bad.dcl");
        std::fs::write(&path, b"definitely not a project file").unwrap();
        assert!(matches!(load_project(&path), Err(IoError::InvalidProject(_))));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn open_as_layer_is_one_undo_step() {
        let dir = temp_dir("open");
        let (state, _) = rgb_canvas();
        let path = dir.join("Photo.png");
        save_image(&state, &path, 90).unwrap();

        let (mut target, _) = rgb_canvas();
        let id = open_as_layer(&mut target, &path).unwrap();
        assert_eq!(target.layers[0].id, id);
        assert_eq!(target.layers[0].name, "Photo #2");
        assert_eq!(target.layers[0].pixels.to_raw(), target.layers[1].pixels.to_raw());

        target.undo();
        assert_eq!(target.layers.len(), 1);
        target.redo();
        assert_eq!(target.layers[0].pixels.to_raw(), target.layers[1].pixels.to_raw());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn export_writes_every_format() {
        let dir = temp_dir("export");
        let (state, id) = rgb_canvas();
        let written = export_layer(&state, id, &dir, "photo", &SaveFormat::ALL, 90).unwrap();
        assert_eq!(written.len(), 4);
        assert!(written.iter().all(|p| p.exists()));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn extended_layers_cannot_be_encoded() {
        let mut state = CanvasState::new(1, 1);
        let id = state.push_raw_layer("X", PixelType::Extended(5), 1, 1, &[1, 2, 3, 4, 5]).unwrap();
        assert!(matches!(layer_image(&state, id), Err(IoError::UnsupportedFormat(_))));
    }
}
