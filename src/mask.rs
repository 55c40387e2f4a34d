use image::{Rgb, RgbImage, RgbaImage};

use crate::errors::{Result, SegError};
use crate::mincut::CutResult;
use crate::superpixel::SuperpixelSet;
use crate::ClassId;

/// Color written for pixels no class claimed (fully transparent).
pub const UNLABELED_COLOR: u32 = 0x0000_0000;

/// Semi-transparent class colors, `0xAABBGGRR`.
pub const DEFAULT_CLASS_COLORS: [u32; 13] = [
    0x8800_0000,
    0x8836_43f4,
    0x88f3_9621,
    0x8850_af4c,
    0x8800_6cef,
    0x8848_5579,
    0x8838_9f68,
    0x8863_1ee9,
    0x88b0_279c,
    0x88b5_513f,
    0x8888_9600,
    0x8839_dccd,
    0x888b_7d60,
];

/// Maps class ids to packed colors. Byte order in memory is R, G, B, A.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassPalette {
    colors: Vec<u32>,
}

impl Default for ClassPalette {
    fn default() -> Self {
        Self::new(DEFAULT_CLASS_COLORS.to_vec())
    }
}

impl ClassPalette {
    pub const fn new(colors: Vec<u32>) -> Self {
        Self { colors }
    }

    pub fn color(&self, class_id: ClassId) -> Option<u32> {
        self.colors.get(class_id as usize).copied()
    }

    /// Overrides an existing class color or appends the next one.
    pub fn set_color(&mut self, class_id: ClassId, color: u32) -> Result<()> {
        let index = class_id as usize;
        match index.cmp(&self.colors.len()) {
            std::cmp::Ordering::Less => self.colors[index] = color,
            std::cmp::Ordering::Equal => self.colors.push(color),
            std::cmp::Ordering::Greater => {
                return Err(SegError::Validation {
                    field: "palette".to_string(),
                    reason: format!(
                        "class {} would leave a gap after {} colors",
                        class_id,
                        self.colors.len()
                    ),
                })
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }
}

/// Per-pixel class labels, row-major. `None` is the unlabeled background.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColoredMask {
    width: u32,
    height: u32,
    labels: Vec<Option<ClassId>>,
}

impl ColoredMask {
    pub fn unlabeled(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            labels: vec![None; width as usize * height as usize],
        }
    }

    pub const fn width(&self) -> u32 {
        self.width
    }

    pub const fn height(&self) -> u32 {
        self.height
    }

    pub fn labels(&self) -> &[Option<ClassId>] {
        &self.labels
    }

    /// Label at `(x, y)`; `None` for unlabeled pixels and for coordinates outside the mask.
    pub fn get(&self, x: u32, y: u32) -> Option<ClassId> {
        self.index(x, y).and_then(|index| self.labels[index])
    }

    pub fn set(&mut self, x: u32, y: u32, label: Option<ClassId>) -> Result<()> {
        let index = self.index(x, y).ok_or_else(|| SegError::Validation {
            field: "mask".to_string(),
            reason: format!(
                "pixel ({}, {}) lies outside the {}x{} mask",
                x, y, self.width, self.height
            ),
        })?;
        self.labels[index] = label;
        Ok(())
    }

    fn index(&self, x: u32, y: u32) -> Option<usize> {
        (x < self.width && y < self.height)
            .then(|| y as usize * self.width as usize + x as usize)
    }

    pub fn count(&self, label: Option<ClassId>) -> usize {
        self.labels.iter().filter(|&&l| l == label).count()
    }

    /// Packed colors, one per pixel. Labels without a palette entry render as unlabeled.
    pub fn to_colors(&self, palette: &ClassPalette) -> Vec<u32> {
        self.labels
            .iter()
            .map(|label| {
                label
                    .and_then(|class_id| palette.color(class_id))
                    .unwrap_or(UNLABELED_COLOR)
            })
            .collect()
    }

    pub fn to_rgba_image(&self, palette: &ClassPalette) -> RgbaImage {
        let raw = self
            .to_colors(palette)
            .into_iter()
            .flat_map(u32::to_le_bytes)
            .collect::<Vec<u8>>();
        RgbaImage::from_raw(self.width, self.height, raw)
            .unwrap_or_else(|| RgbaImage::new(self.width, self.height))
    }

    /// Alpha-composites the class colors over `image`.
    pub fn blend_onto(&self, image: &RgbImage, palette: &ClassPalette) -> Result<RgbaImage> {
        if image.dimensions() != (self.width, self.height) {
            return Err(SegError::Validation {
                field: "image".to_string(),
                reason: format!(
                    "dimensions {:?} do not match mask {}x{}",
                    image.dimensions(),
                    self.width,
                    self.height
                ),
            });
        }

        let colors = self.to_colors(palette);
        let blended = image
            .pixels()
            .zip(colors)
            .flat_map(|(&Rgb([red, green, blue]), color)| {
                let [cr, cg, cb, ca] = color.to_le_bytes();
                let alpha = ca as f32 / 255.0;
                let mix = |base: u8, over: u8| {
                    (base as f32 * (1.0 - alpha) + over as f32 * alpha).round() as u8
                };
                [mix(red, cr), mix(green, cg), mix(blue, cb), 255]
            })
            .collect::<Vec<u8>>();

        RgbaImage::from_raw(self.width, self.height, blended).ok_or_else(|| {
            SegError::ImageProcessing {
                path: "unknown".to_string(),
                operation: "mask blending".to_string(),
                source: "failed to create ImageBuffer from blended pixels".into(),
            }
        })
    }
}

/// Merges per-class cuts into one mask.
///
/// A superpixel claimed by several classes goes to the lowest class id; one claimed by none
/// stays unlabeled.
pub fn resolve_mask(superpixels: &SuperpixelSet, cuts: &[&CutResult]) -> ColoredMask {
    let mut mask = ColoredMask::unlabeled(superpixels.width(), superpixels.height());
    for superpixel in superpixels.iter() {
        let winner = cuts
            .iter()
            .filter(|cut| cut.is_assigned(superpixel.id))
            .map(|cut| cut.class_id)
            .min();
        if winner.is_some() {
            for &pixel in &superpixel.pixels {
                mask.labels[pixel as usize] = winner;
            }
        }
    }
    mask
}
