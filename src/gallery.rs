// The `gallery` subcommand: regroups generated images by prompt and style,
// then composites each group into a labeled contact-sheet grid.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use log::{error, info, warn};
use rusttype::Font;

use crate::grouping;
use crate::metadata;
use crate::text::{fit_text, ScaledFont, TextMeasure};

const GRID_COLUMNS: u32 = 4;
const GRID_ROWS: u32 = 4;

/// Margins around the grid and separation between cells, before scaling.
const GALLERY_BORDER: f32 = 30.0;
const GALLERY_GAP: f32 = 24.0;

/// Nominal caption label metrics at scale 1.
const LABEL_FONT_SIZE: f32 = 64.0;
const LABEL_WIDTH: f32 = 512.0;
const LABEL_HEIGHT: f32 = 64.0;

/// Top banner reserved for the prompt text, before scaling.
const PROMPT_BAND_HEIGHT: f32 = 200.0;
const PROMPT_TEXT_COLOR: Rgb<u8> = Rgb([0x33, 0x33, 0x44]);

const JPEG_QUALITY: u8 = 80;

/// Only files named like this are accepted as gallery input.
const INPUT_PREFIX: &str = "zi";

/// Caption text colors, chosen by case-insensitive keyword lookup against the
/// style name.
const COLORS_BY_WORD: &[(&str, [u8; 3])] = &[
    ("PHOTO", [0x00, 0x6e, 0x18]),
    ("NEON", [0xc9, 0x00, 0xc9]),
    ("VINTAGE", [0x83, 0x4c, 0x0d]),
    ("RETRO", [0x6e, 0x3f, 0x09]),
    ("B&W", [0x5f, 0x5f, 0x5f]),
];

fn caption_color(style_name: &str) -> Rgb<u8> {
    let upper = style_name.to_uppercase();
    for (word, color) in COLORS_BY_WORD {
        if upper.contains(word) {
            return Rgb(*color);
        }
    }
    Rgb([0, 0, 0])
}

#[derive(Args, Debug)]
pub struct GalleryArgs {
    /// Image files (or directories containing them) to include
    #[arg(required = true)]
    pub images: Vec<PathBuf>,

    /// Scaling factor for the gallery cells, clamped to (0.01, 1.0]
    #[arg(long, short)]
    pub scale: Option<f32>,

    /// Save galleries as JPEG instead of PNG
    #[arg(long, short)]
    pub jpeg: bool,

    /// Directory where galleries are written
    #[arg(long, short, default_value = ".")]
    pub output_dir: PathBuf,

    /// Filename prefix for generated galleries
    #[arg(long, default_value = "gallery")]
    pub prefix: String,

    /// Do not draw caption labels on the cells
    #[arg(long)]
    pub no_label: bool,

    /// Write each group's prompt in a banner above the grid
    #[arg(long)]
    pub write_prompt: bool,

    /// TTF font to use for all text (otherwise a fonts/ directory is searched)
    #[arg(long)]
    pub font: Option<PathBuf>,
}

//---------------------------------- fonts ----------------------------------

/// The fonts the renderer may use. Either can be absent; rendering degrades
/// to label-less output instead of failing.
#[derive(Default)]
pub struct GalleryFonts {
    pub label: Option<Font<'static>>,
    pub prompt: Option<Font<'static>>,
}

impl GalleryFonts {
    /// Loads fonts from an explicit file, or from the first `fonts/`
    /// directory found under the given search roots. A `robotoslab` TTF is
    /// preferred for labels and an `opensans` one for prompts, with any other
    /// TTF as the shared fallback.
    pub fn load(explicit: Option<&Path>, search_roots: &[PathBuf]) -> Self {
        if let Some(path) = explicit {
            let font = load_font(path);
            if font.is_none() {
                warn!("Could not load font from {}", path.display());
            }
            return Self {
                label: font.clone(),
                prompt: font,
            };
        }

        for root in search_roots {
            let font_dir = root.join("fonts");
            let Ok(entries) = std::fs::read_dir(&font_dir) else {
                continue;
            };
            let mut label_file = None;
            let mut prompt_file = None;
            let mut default_file = None;
            for entry in entries.flatten() {
                let path = entry.path();
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                let name = name.to_lowercase();
                if !name.ends_with(".ttf") {
                    continue;
                }
                if name.contains("robotoslab") {
                    label_file = Some(path);
                } else if name.contains("opensans") {
                    prompt_file = Some(path);
                } else if default_file.is_none() {
                    default_file = Some(path);
                }
            }
            let label = label_file.or_else(|| default_file.clone());
            let prompt = prompt_file.or(default_file);
            if label.is_some() || prompt.is_some() {
                return Self {
                    label: label.and_then(|p| load_font(&p)),
                    prompt: prompt.and_then(|p| load_font(&p)),
                };
            }
        }
        Self::default()
    }
}

fn load_font(path: &Path) -> Option<Font<'static>> {
    let data = std::fs::read(path).ok()?;
    Font::try_from_vec(data)
}

//------------------------------- grid layout -------------------------------

/// Cell placement for a bordered, gapped grid. The last (possibly partial)
/// row is centered by sharing the width of its unfilled columns.
#[derive(Debug, Clone, Copy)]
pub struct GridLayout {
    pub columns: u32,
    pub rows: u32,
    pub cell_width: u32,
    pub cell_height: u32,
    pub border: u32,
    pub gap: u32,
    pub slots: u32,
}

impl GridLayout {
    pub fn canvas_size(&self) -> (u32, u32) {
        let width =
            self.border * 2 + self.gap * (self.columns - 1) + self.cell_width * self.columns;
        let height =
            self.border * 2 + self.gap * (self.rows - 1) + self.cell_height * self.rows;
        (width, height)
    }

    fn complete_rows(&self) -> u32 {
        self.slots.saturating_sub(1) / self.columns
    }

    fn last_row_offset(&self) -> u32 {
        if self.complete_rows() >= self.rows {
            return 0;
        }
        let filled = self.slots - self.complete_rows() * self.columns;
        (self.columns - filled) * (self.cell_width + self.gap) / 2
    }

    /// Top-left pixel of a slot's cell, or None when the slot falls outside
    /// the grid.
    pub fn cell_origin(&self, index: u32) -> Option<(u32, u32)> {
        let row = index / self.columns;
        let col = index % self.columns;
        if row >= self.rows {
            return None;
        }
        let mut x = self.border + (self.cell_width + self.gap) * col;
        let y = self.border + (self.cell_height + self.gap) * row;
        if row >= self.complete_rows() {
            x += self.last_row_offset();
        }
        Some((x, y))
    }
}

//----------------------------- label rendering -----------------------------

/// Draws the caption label: a rounded, opaque white box anchored to the
/// bottom-right corner, grown to fit the text, with the text optically
/// centered inside it.
fn draw_caption(image: &mut RgbImage, text: &str, color: Rgb<u8>, font: &Font<'static>) {
    let scaled = ScaledFont::new(font, LABEL_FONT_SIZE);
    // Minimum margin between the box border and the text.
    let margin = scaled.line_width("m");

    let text_width = scaled.line_width(text);
    let text_height = scaled.line_height();
    let label_width = LABEL_WIDTH.max(text_width + margin);
    let label_height = LABEL_HEIGHT.max(text_height + margin / 2.0);

    let (image_width, image_height) = image.dimensions();
    let left = image_width as f32 - label_width;
    let top = image_height as f32 - label_height;
    let radius = label_height / 3.0;

    // Main box, a left extension below the corner radius, and the circle
    // that rounds the extension's top edge.
    let white = Rgb([255u8, 255, 255]);
    draw_filled_rect_mut(
        image,
        Rect::at(left as i32, top as i32).of_size(label_width as u32, label_height as u32),
        white,
    );
    draw_filled_rect_mut(
        image,
        Rect::at((left - radius) as i32, (top + radius) as i32)
            .of_size(radius as u32, (label_height - radius) as u32),
        white,
    );
    draw_filled_circle_mut(
        image,
        (left as i32, (top + radius) as i32),
        radius as i32,
        white,
    );

    let text_x = left - radius / 2.0 + (label_width - text_width) / 2.0;
    let text_y = top + (label_height - text_height) / 2.0;
    draw_text_mut(
        image,
        color,
        text_x as i32,
        text_y as i32,
        scaled.scale(),
        scaled.font(),
        text,
    );
}

/// Style name as shown on the caption: optional `STYLE:` prefix stripped.
fn caption_text(style_name: &str) -> &str {
    style_name
        .strip_prefix("STYLE:")
        .unwrap_or(style_name)
        .trim()
}

//----------------------------- prompt banner ------------------------------

/// Returns a taller canvas with a white banner above the gallery and the
/// prompt text written into it, centered. Font sizes are tried in descending
/// order until the wrapped block fits; the smallest size is force-drawn.
fn add_prompt_banner(
    gallery: RgbImage,
    prompt: &str,
    font: &Font<'static>,
    scale: f32,
) -> RgbImage {
    let band_height = (PROMPT_BAND_HEIGHT * scale) as u32;
    let (width, height) = gallery.dimensions();
    let mut canvas = RgbImage::from_pixel(width, height + band_height, Rgb([255, 255, 255]));
    imageops::replace(&mut canvas, &gallery, 0, band_height as i64);

    // Box the text must fit in, inset from the banner.
    let box_left = 16.0;
    let box_top = 8.0;
    let box_width = width as f32 - 2.0 * box_left;
    let box_height = band_height as f32 - 2.0 * box_top;

    let largest = (LABEL_FONT_SIZE * scale * 1.3).max(12.0) as i32;
    let mut sizes: Vec<f32> = (10..=largest).rev().step_by(2).map(|s| s as f32).collect();
    if sizes.is_empty() {
        sizes.push(10.0);
    }
    let smallest = *sizes.last().unwrap();

    for size in sizes {
        let scaled = ScaledFont::new(font, size);
        let (lines, _) = fit_text(&scaled, prompt, box_width);
        let block_height = lines.len() as f32 * scaled.line_height();
        let is_last = size == smallest;
        if block_height <= box_height || is_last {
            // Optical centering: ascent/descent-derived block height plus the
            // descent/4 nudge so cap-height text does not sit visually low.
            let mut y = box_top + (box_height - block_height) / 2.0 + scaled.descent() / 4.0;
            for line in &lines {
                let x = (width as f32 - scaled.line_width(line)) / 2.0;
                draw_text_mut(
                    &mut canvas,
                    PROMPT_TEXT_COLOR,
                    x as i32,
                    y as i32,
                    scaled.scale(),
                    scaled.font(),
                    line,
                );
                y += scaled.line_height();
            }
            break;
        }
    }
    canvas
}

//----------------------------- grid compositor -----------------------------

pub struct GalleryOptions {
    pub columns: u32,
    pub rows: u32,
    pub image_scale: f32,
    pub draw_labels: bool,
    pub write_prompt: bool,
}

/// Composites one prompt group into a gallery image. Returns the image plus
/// the text chunks of the first slot image, for re-embedding on save.
pub fn build_gallery(
    slots: &[Option<PathBuf>],
    style_list: &[String],
    fonts: &GalleryFonts,
    prompt: &str,
    options: &GalleryOptions,
) -> Result<(RgbImage, Vec<(String, String)>)> {
    let scale = options.image_scale;

    // The first image that opens determines the cell size and donates its
    // metadata; every later image is resized to match.
    let mut cell = None;
    for path in slots.iter().flatten() {
        match image::open(path) {
            Ok(img) => {
                let img = img.to_rgb8();
                let (w, h) = img.dimensions();
                cell = Some((
                    ((w as f32 * scale) as u32).max(1),
                    ((h as f32 * scale) as u32).max(1),
                    metadata::read_text_chunks(path).unwrap_or_default(),
                ));
                break;
            }
            Err(e) => warn!("Skipping {}: {}", path.display(), e),
        }
    }
    let Some((cell_width, cell_height, chunks)) = cell else {
        bail!("no valid image found in this group");
    };

    let layout = GridLayout {
        columns: options.columns,
        rows: options.rows,
        cell_width,
        cell_height,
        border: (GALLERY_BORDER * scale) as u32,
        gap: (GALLERY_GAP * scale) as u32,
        slots: slots.len() as u32,
    };
    let (canvas_width, canvas_height) = layout.canvas_size();
    let mut canvas = RgbImage::from_pixel(canvas_width, canvas_height, Rgb([0, 0, 0]));

    for (i, path) in slots.iter().enumerate() {
        let Some(path) = path else {
            continue;
        };
        let Some((x, y)) = layout.cell_origin(i as u32) else {
            break;
        };
        let mut img = match image::open(path) {
            Ok(img) => img.to_rgb8(),
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };

        if options.draw_labels {
            if let (Some(style_name), Some(font)) = (style_list.get(i), fonts.label.as_ref()) {
                let name = caption_text(style_name);
                info!(" - {}", name);
                draw_caption(&mut img, name, caption_color(name), font);
            }
        }

        let resized = imageops::resize(&img, cell_width, cell_height, FilterType::Lanczos3);
        imageops::replace(&mut canvas, &resized, x as i64, y as i64);
    }

    if options.write_prompt && !prompt.is_empty() {
        if let Some(font) = fonts.prompt.as_ref() {
            canvas = add_prompt_banner(canvas, prompt, font, scale);
        }
    }

    Ok((canvas, chunks))
}

//--------------------------------- saving ----------------------------------

/// Saves a gallery as PNG (re-embedding the given text chunks) or JPEG.
pub fn save_gallery(
    path: &Path,
    image: &RgbImage,
    chunks: &[(String, String)],
    jpeg: bool,
) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    if jpeg {
        let mut encoder =
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY);
        encoder
            .encode(
                image.as_raw(),
                image.width(),
                image.height(),
                image::ColorType::Rgb8,
            )
            .with_context(|| format!("failed to encode {}", path.display()))?;
    } else {
        let mut encoder = png::Encoder::new(writer, image.width(), image.height());
        encoder.set_color(png::ColorType::Rgb);
        encoder.set_depth(png::BitDepth::Eight);
        for (keyword, text) in chunks {
            encoder
                .add_itxt_chunk(keyword.clone(), text.clone())
                .with_context(|| format!("failed to embed {} chunk", keyword))?;
        }
        let mut png_writer = encoder
            .write_header()
            .with_context(|| format!("failed to write {}", path.display()))?;
        png_writer
            .write_image_data(image.as_raw())
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    Ok(())
}

//--------------------------------- driver ----------------------------------

fn is_valid_input(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let name = name.to_lowercase();
    name.starts_with(INPUT_PREFIX) && name.ends_with(".png")
}

/// Expands the argument list into accepted image files. Directories
/// contribute their matching entries, sorted for determinism.
fn collect_inputs(args: &[PathBuf]) -> Vec<PathBuf> {
    let mut inputs = Vec::new();
    for arg in args {
        if arg.is_dir() {
            let Ok(entries) = std::fs::read_dir(arg) else {
                continue;
            };
            let mut found: Vec<PathBuf> = entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| is_valid_input(p))
                .collect();
            found.sort();
            inputs.extend(found);
        } else if is_valid_input(arg) {
            inputs.push(arg.clone());
        }
    }
    inputs
}

fn clamp_scale(scale: f32) -> f32 {
    scale.clamp(0.01, 1.0)
}

pub fn run(args: &GalleryArgs) -> Result<()> {
    let inputs = collect_inputs(&args.images);
    if inputs.is_empty() {
        bail!("no images found (expected {}*.png files)", INPUT_PREFIX);
    }
    let scale = args.scale.map(clamp_scale).unwrap_or(0.5);

    // Pair every input with its embedded workflow; images without one cannot
    // be grouped and are dropped here.
    let images: Vec<(PathBuf, serde_json::Value)> = inputs
        .iter()
        .filter_map(|path| {
            metadata::workflow_from_image(path).map(|wf| (path.clone(), wf))
        })
        .collect();

    let Some(style_list) = grouping::extract_style_list(&images) else {
        bail!("no style list found in any input image");
    };
    info!("Found {} styles", style_list.len());
    let groups = grouping::group_by_prompt_and_style(&images, &style_list);
    if groups.is_empty() {
        info!("No images with an enabled style; nothing to do");
        return Ok(());
    }

    let search_roots = {
        let mut roots: Vec<PathBuf> = Vec::new();
        if let Some(parent) = inputs[0].parent() {
            roots.push(parent.to_path_buf());
        }
        roots.push(PathBuf::from("."));
        roots
    };
    let fonts = GalleryFonts::load(args.font.as_deref(), &search_roots);
    if fonts.label.is_none() && !args.no_label {
        warn!("No label font found; captions will be skipped");
    }

    let options = GalleryOptions {
        columns: GRID_COLUMNS,
        rows: GRID_ROWS,
        image_scale: scale,
        draw_labels: !args.no_label,
        write_prompt: args.write_prompt,
    };
    let extension = if args.jpeg { "jpg" } else { "png" };

    for (index, (prompt, slots)) in groups.iter().enumerate() {
        let short: String = prompt.chars().take(40).collect();
        info!("Prompt: {:?}", short);
        let output = args
            .output_dir
            .join(format!("{}{}.{}", args.prefix, index, extension));
        let result = build_gallery(slots, &style_list, &fonts, prompt, &options)
            .and_then(|(image, chunks)| save_gallery(&output, &image, &chunks, args.jpeg));
        match result {
            Ok(()) => info!("Wrote {}", output.display()),
            Err(e) => error!("{}: {:#}", output.display(), e),
        }
    }
    Ok(())
}
