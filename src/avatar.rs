use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use image::imageops::FilterType;
use tiny_skia::{
    Color, FillRule, IntSize, Paint, PathBuilder, Pixmap, PixmapPaint, Rect, Transform,
};

use crate::schema::Emotion;

/// Reference canvas height the face geometry was designed against; all
/// primitives scale with the actual output height.
const BASE_CANVAS: f32 = 1080.0;

/// Mouth opening in reference units: closed lips are 10 tall and a shout
/// peaks at 80. Continuous on purpose; the discrete three-state mouth used
/// by the live preview lives in [`crate::live`] and must stay independent.
const MOUTH_BASE_HEIGHT: f32 = 10.0;
const MOUTH_AMPLITUDE_SCALE: f32 = 70.0;

/// Draws one avatar frame from amplitude + emotion + optional backdrop.
///
/// Pure with respect to its inputs: same arguments, same pixels. Background
/// images are decoded and scaled once at preload time so per-frame work is
/// composition only.
pub struct FrameSynthesizer {
    width: u32,
    height: u32,
    backgrounds: HashMap<PathBuf, Pixmap>,
}

impl FrameSynthesizer {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            bail!("frame size must be non-zero, got {width}x{height}");
        }
        Ok(Self {
            width,
            height,
            backgrounds: HashMap::new(),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Decodes a background image and scales it to the canvas. Call once per
    /// distinct background before the render loop; a missing or unreadable
    /// image is a setup failure, not a per-frame one.
    pub fn preload_background(&mut self, path: &Path) -> Result<()> {
        if self.backgrounds.contains_key(path) {
            return Ok(());
        }
        let decoded = image::ImageReader::open(path)
            .with_context(|| format!("failed to open background '{}'", path.display()))?
            .decode()
            .with_context(|| format!("failed to decode background '{}'", path.display()))?
            .resize_exact(self.width, self.height, FilterType::Triangle)
            .to_rgba8();

        let mut data = decoded.into_raw();
        premultiply_rgba(&mut data);
        let size = IntSize::from_wh(self.width, self.height)
            .ok_or_else(|| anyhow!("invalid background size {}x{}", self.width, self.height))?;
        let pixmap = Pixmap::from_vec(data, size)
            .ok_or_else(|| anyhow!("background '{}' buffer mismatch", path.display()))?;
        self.backgrounds.insert(path.to_path_buf(), pixmap);
        Ok(())
    }

    /// Renders one RGBA frame. Returns `None` when the pixel buffer cannot
    /// be allocated; the export loop counts the frame as dropped and sends
    /// a substitute in its slot so later frames keep their timestamps.
    pub fn render(
        &self,
        amplitude: f32,
        emotion: Emotion,
        background: Option<&Path>,
    ) -> Option<Vec<u8>> {
        let mut pixmap = Pixmap::new(self.width, self.height)?;

        match background.and_then(|path| self.backgrounds.get(path)) {
            Some(image) => {
                pixmap.fill(backdrop_color(emotion));
                pixmap.draw_pixmap(
                    0,
                    0,
                    image.as_ref(),
                    &PixmapPaint::default(),
                    Transform::identity(),
                    None,
                );
            }
            None => pixmap.fill(backdrop_color(emotion)),
        }

        self.draw_face(&mut pixmap, amplitude.clamp(0.0, 1.0), emotion)?;
        Some(pixmap.take())
    }

    fn draw_face(&self, pixmap: &mut Pixmap, amplitude: f32, emotion: Emotion) -> Option<()> {
        let s = self.height as f32 / BASE_CANVAS;
        let cx = self.width as f32 / 2.0;
        let cy = self.height as f32 / 2.0;

        let mut paint = Paint::default();
        paint.anti_alias = true;

        // Face disc.
        paint.set_color_rgba8(255, 242, 179, 255);
        let mut face = PathBuilder::new();
        face.push_circle(cx, cy, 300.0 * s);
        let face = face.finish()?;
        pixmap.fill_path(&face, &paint, FillRule::Winding, Transform::identity(), None);

        // Eyes, shaped by emotion.
        paint.set_color_rgba8(0, 0, 0, 255);
        let (eye_w, eye_h) = match emotion {
            Emotion::Neutral => (40.0, 60.0),
            Emotion::Happy => (44.0, 26.0),
            Emotion::Angry | Emotion::Sad => (40.0, 44.0),
        };
        for side in [-1.0f32, 1.0] {
            let eye_cx = cx + side * 100.0 * s;
            let eye_cy = cy - 60.0 * s;
            let mut eye = PathBuilder::new();
            eye.push_oval(Rect::from_xywh(
                eye_cx - eye_w * s / 2.0,
                eye_cy - eye_h * s / 2.0,
                eye_w * s,
                eye_h * s,
            )?);
            let eye = eye.finish()?;
            pixmap.fill_path(&eye, &paint, FillRule::Winding, Transform::identity(), None);

            // Brow bars tilt inward for anger, outward for sadness.
            let brow_tilt = match emotion {
                Emotion::Angry => Some(side * 18.0),
                Emotion::Sad => Some(-side * 14.0),
                Emotion::Neutral | Emotion::Happy => None,
            };
            if let Some(degrees) = brow_tilt {
                let brow_cy = cy - 120.0 * s;
                let mut brow = PathBuilder::new();
                brow.push_rect(Rect::from_xywh(
                    eye_cx - 35.0 * s,
                    brow_cy - 6.0 * s,
                    70.0 * s,
                    12.0 * s,
                )?);
                let brow = brow
                    .finish()?
                    .transform(Transform::from_rotate_at(degrees, eye_cx, brow_cy))?;
                pixmap.fill_path(&brow, &paint, FillRule::Winding, Transform::identity(), None);
            }
        }

        // Mouth: height follows amplitude linearly.
        let mouth_h = (MOUTH_BASE_HEIGHT + MOUTH_AMPLITUDE_SCALE * amplitude) * s;
        let mouth_w = 100.0 * s;
        paint.set_color_rgba8(230, 51, 51, 255);
        let mut mouth = PathBuilder::new();
        mouth.push_oval(Rect::from_xywh(
            cx - mouth_w / 2.0,
            cy + 100.0 * s - mouth_h / 2.0,
            mouth_w,
            mouth_h,
        )?);
        let mouth = mouth.finish()?;
        pixmap.fill_path(&mouth, &paint, FillRule::Winding, Transform::identity(), None);

        Some(())
    }
}

fn backdrop_color(emotion: Emotion) -> Color {
    match emotion {
        Emotion::Neutral => Color::from_rgba8(255, 255, 255, 255),
        Emotion::Happy => Color::from_rgba8(255, 247, 224, 255),
        Emotion::Angry => Color::from_rgba8(255, 228, 225, 255),
        Emotion::Sad => Color::from_rgba8(226, 239, 255, 255),
    }
}

fn premultiply_rgba(data: &mut [u8]) {
    for pixel in data.chunks_exact_mut(4) {
        let alpha = pixel[3] as u16;
        if alpha == 255 {
            continue;
        }
        for channel in &mut pixel[..3] {
            *channel = ((*channel as u16 * alpha + 127) / 255) as u8;
        }
    }
}
