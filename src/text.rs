// Pixel-width text wrapping for caption and prompt rendering.
//
// Measurement goes through a small trait so the wrapping logic can be tested
// with a fixed-width fake instead of a real TTF file.

use rusttype::{point, Font, Scale};

/// Minimum width the iterative fit is allowed to shrink a box to.
pub const MIN_FIT_WIDTH: f32 = 300.0;

/// Width decrement per fit iteration (the box loses 20 px on each side).
const FIT_SHRINK_STEP: f32 = 40.0;

/// Last-line/first-line percentage below which a trailing line counts as
/// visually short.
const SHORT_LAST_LINE_PERCENT: f32 = 35.0;

const MAX_FIT_ITERATIONS: usize = 9;

pub trait TextMeasure {
    /// Rendered width of a single line, in pixels.
    fn line_width(&self, text: &str) -> f32;
    fn ascent(&self) -> f32;
    /// Positive distance below the baseline.
    fn descent(&self) -> f32;

    /// Height of a single line box (cap to bottom of descenders).
    fn line_height(&self) -> f32 {
        self.ascent() + self.descent()
    }
}

/// A rusttype font at a fixed scale.
pub struct ScaledFont<'f> {
    font: &'f Font<'static>,
    scale: Scale,
}

impl<'f> ScaledFont<'f> {
    pub fn new(font: &'f Font<'static>, size: f32) -> Self {
        Self {
            font,
            scale: Scale::uniform(size),
        }
    }

    pub fn font(&self) -> &'f Font<'static> {
        self.font
    }

    pub fn scale(&self) -> Scale {
        self.scale
    }
}

impl TextMeasure for ScaledFont<'_> {
    fn line_width(&self, text: &str) -> f32 {
        self.font
            .layout(text, self.scale, point(0.0, 0.0))
            .last()
            .map(|glyph| glyph.position().x + glyph.unpositioned().h_metrics().advance_width)
            .unwrap_or(0.0)
    }

    fn ascent(&self) -> f32 {
        self.font.v_metrics(self.scale).ascent
    }

    fn descent(&self) -> f32 {
        -self.font.v_metrics(self.scale).descent
    }
}

/// Greedy word wrap by pixel width. A single word wider than the limit gets a
/// line of its own rather than being broken. Returns the lines and the length
/// of the last line as a percentage of the first.
pub fn wrap_text(measure: &impl TextMeasure, text: &str, width: f32) -> (Vec<String>, f32) {
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let candidate = if current.is_empty() {
            word.to_owned()
        } else {
            format!("{} {}", current, word)
        };
        if measure.line_width(&candidate) <= width || current.is_empty() {
            current = candidate;
        } else {
            lines.push(current);
            current = word.to_owned();
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }

    let percent = match (lines.first(), lines.last()) {
        (Some(first), Some(last)) if !first.is_empty() => {
            100.0 * last.chars().count() as f32 / first.chars().count() as f32
        }
        _ => 100.0,
    };
    (lines, percent)
}

/// Wraps text, iteratively narrowing the target width to avoid a visually
/// short trailing line. Gives up once the last line is long enough, the box
/// has reached MIN_FIT_WIDTH, or after MAX_FIT_ITERATIONS passes. Returns the
/// lines and the width actually used.
pub fn fit_text(measure: &impl TextMeasure, text: &str, width: f32) -> (Vec<String>, f32) {
    let mut width = width;
    let (mut lines, mut last_line_percent) = wrap_text(measure, text, width);
    for _ in 1..MAX_FIT_ITERATIONS {
        if last_line_percent > SHORT_LAST_LINE_PERCENT || width - FIT_SHRINK_STEP < MIN_FIT_WIDTH
        {
            break;
        }
        width -= FIT_SHRINK_STEP;
        (lines, last_line_percent) = wrap_text(measure, text, width);
    }
    (lines, width)
}
