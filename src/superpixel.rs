use std::collections::{BTreeSet, HashMap};

use image::{Rgb, RgbImage};
use rayon::prelude::*;
use tracing::debug;

use crate::config::{SegmentationConfig, SuperpixelMode};
use crate::errors::{Result, SegError};
use crate::traits::SuperpixelGenerator;

/// Contiguous cluster of pixels treated as one graph node.
#[derive(Debug, Clone, PartialEq)]
pub struct Superpixel {
    pub id: usize,
    /// Row-major pixel indices, ascending.
    pub pixels: Vec<u32>,
    pub mean_color: [f32; 3],
    /// Ids of superpixels sharing a 4-neighbour boundary, ascending.
    pub neighbors: Vec<usize>,
}

impl Superpixel {
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// Euclidean distance between mean colors.
    pub fn color_distance(&self, other: &Superpixel) -> f64 {
        self.mean_color
            .iter()
            .zip(other.mean_color.iter())
            .map(|(a, b)| {
                let d = *a as f64 - *b as f64;
                d * d
            })
            .sum::<f64>()
            .sqrt()
    }
}

/// Dense superpixel arena plus the per-pixel label map it was built from.
#[derive(Debug, Clone, Default)]
pub struct SuperpixelSet {
    width: u32,
    height: u32,
    labels: Vec<u32>,
    superpixels: Vec<Superpixel>,
}

impl SuperpixelSet {
    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            labels: Vec::new(),
            superpixels: Vec::new(),
        }
    }

    /// Builds the arena from a row-major label map.
    ///
    /// Labels are renumbered densely in order of first appearance. Contiguity of each label
    /// is the caller's responsibility.
    pub fn from_labels(image: &RgbImage, labels: &[u32]) -> Result<Self> {
        let (width, height) = image.dimensions();
        let expected = width as usize * height as usize;
        if labels.len() != expected {
            return Err(SegError::Validation {
                field: "labels".to_string(),
                reason: format!(
                    "{} labels given for a {}x{} image",
                    labels.len(),
                    width,
                    height
                ),
            });
        }
        Ok(Self::assemble(image, labels))
    }

    /// `labels` must hold exactly one entry per pixel.
    pub(crate) fn assemble(image: &RgbImage, labels: &[u32]) -> Self {
        let (width, height) = image.dimensions();
        let n = width as usize * height as usize;
        if n == 0 {
            return Self::empty(width, height);
        }

        let mut dense = Vec::with_capacity(n);
        let mut lookup: HashMap<u32, u32> = HashMap::new();
        for &label in labels {
            let next = lookup.len() as u32;
            dense.push(*lookup.entry(label).or_insert(next));
        }

        let count = lookup.len();
        let mut pixels: Vec<Vec<u32>> = vec![Vec::new(); count];
        let mut sums = vec![[0f64; 3]; count];
        let mut neighbors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); count];
        let w = width as usize;

        for (index, (&label, &Rgb(color))) in dense.iter().zip(image.pixels()).enumerate() {
            let label = label as usize;
            pixels[label].push(index as u32);
            for (sum, channel) in sums[label].iter_mut().zip(color) {
                *sum += channel as f64;
            }

            let x = index % w;
            let right = (x + 1 < w).then(|| dense[index + 1] as usize);
            let down = (index + w < n).then(|| dense[index + w] as usize);
            for other in right.into_iter().chain(down) {
                if other != label {
                    neighbors[label].insert(other);
                    neighbors[other].insert(label);
                }
            }
        }

        let superpixels = pixels
            .into_iter()
            .zip(sums)
            .zip(neighbors)
            .enumerate()
            .map(|(id, ((pixels, sum), neighbors))| {
                let len = pixels.len() as f64;
                Superpixel {
                    id,
                    mean_color: sum.map(|s| (s / len) as f32),
                    pixels,
                    neighbors: neighbors.into_iter().collect(),
                }
            })
            .collect();

        Self {
            width,
            height,
            labels: dense,
            superpixels,
        }
    }

    pub const fn width(&self) -> u32 {
        self.width
    }

    pub const fn height(&self) -> u32 {
        self.height
    }

    pub fn len(&self) -> usize {
        self.superpixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.superpixels.is_empty()
    }

    pub fn get(&self, id: usize) -> Option<&Superpixel> {
        self.superpixels.get(id)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Superpixel> {
        self.superpixels.iter()
    }

    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    /// Superpixel owning pixel `(x, y)`.
    pub fn label_at(&self, x: u32, y: u32) -> Option<usize> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.labels
            .get(y as usize * self.width as usize + x as usize)
            .map(|&l| l as usize)
    }

    pub fn are_adjacent(&self, a: usize, b: usize) -> bool {
        self.superpixels
            .get(a)
            .is_some_and(|sp| sp.neighbors.binary_search(&b).is_ok())
    }

    /// Number of undirected adjacency pairs.
    pub fn edge_count(&self) -> usize {
        self.superpixels.iter().map(|sp| sp.neighbors.len()).sum::<usize>() / 2
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlicOptions {
    pub mode: SuperpixelMode,
    pub max_clusters: u32,
    pub compactness: f32,
    pub iterations: u32,
}

impl Default for SlicOptions {
    fn default() -> Self {
        Self::from(&SegmentationConfig::default())
    }
}

impl From<&SegmentationConfig> for SlicOptions {
    fn from(config: &SegmentationConfig) -> Self {
        Self {
            mode: config.superpixel_mode,
            max_clusters: config.max_clusters,
            compactness: config.compactness,
            iterations: config.iterations,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Center {
    color: [f32; 3],
    x: f32,
    y: f32,
}

/// Grid-seeded color/space clustering with connectivity enforcement.
#[derive(Debug, Clone, Default)]
pub struct SlicGenerator {
    options: SlicOptions,
}

impl SlicGenerator {
    pub const fn new(options: SlicOptions) -> Self {
        Self { options }
    }

    pub fn per_pixel() -> Self {
        Self::new(SlicOptions {
            mode: SuperpixelMode::PerPixel,
            ..Default::default()
        })
    }

    pub const fn options(&self) -> &SlicOptions {
        &self.options
    }

    fn cluster(&self, image: &RgbImage) -> Vec<u32> {
        let (width, height) = image.dimensions();
        let (w, h) = (width as usize, height as usize);
        let n = w * h;
        let step = ((n as f64 / self.options.max_clusters.max(1) as f64)
            .sqrt()
            .round() as usize)
            .max(1);
        let grid_w = w.div_ceil(step);
        let grid_h = h.div_ceil(step);

        let colors: Vec<[f32; 3]> = image
            .pixels()
            .map(|&Rgb(c)| c.map(|v| v as f32))
            .collect();

        let mut centers: Vec<Center> = (0..grid_h)
            .flat_map(|gy| (0..grid_w).map(move |gx| (gx, gy)))
            .map(|(gx, gy)| {
                let cx = (gx * step + step / 2).min(w - 1);
                let cy = (gy * step + step / 2).min(h - 1);
                let (x, y) = lowest_gradient(&colors, w, h, cx, cy);
                Center {
                    color: colors[y * w + x],
                    x: x as f32,
                    y: y as f32,
                }
            })
            .collect();

        let spatial_weight = (self.options.compactness / step as f32).powi(2);
        let mut labels = vec![0u32; n];

        for _ in 0..self.options.iterations.max(1) {
            labels.par_chunks_mut(w).enumerate().for_each(|(y, row)| {
                let gy = y / step;
                for (x, label) in row.iter_mut().enumerate() {
                    let gx = x / step;
                    let color = colors[y * w + x];
                    let mut best = (f32::INFINITY, 0u32);
                    for ny in gy.saturating_sub(1)..=(gy + 1).min(grid_h - 1) {
                        for nx in gx.saturating_sub(1)..=(gx + 1).min(grid_w - 1) {
                            let index = ny * grid_w + nx;
                            let center = &centers[index];
                            let dc: f32 = color
                                .iter()
                                .zip(center.color.iter())
                                .map(|(a, b)| (a - b) * (a - b))
                                .sum();
                            let dx = x as f32 - center.x;
                            let dy = y as f32 - center.y;
                            let d = dc + spatial_weight * (dx * dx + dy * dy);
                            if d < best.0 {
                                best = (d, index as u32);
                            }
                        }
                    }
                    *label = best.1;
                }
            });

            let mut sums = vec![[0f64; 5]; centers.len()];
            let mut counts = vec![0usize; centers.len()];
            for (index, &label) in labels.iter().enumerate() {
                let sum = &mut sums[label as usize];
                let color = colors[index];
                sum[0] += color[0] as f64;
                sum[1] += color[1] as f64;
                sum[2] += color[2] as f64;
                sum[3] += (index % w) as f64;
                sum[4] += (index / w) as f64;
                counts[label as usize] += 1;
            }
            for ((center, sum), count) in centers.iter_mut().zip(sums).zip(counts) {
                if count == 0 {
                    continue;
                }
                let count = count as f64;
                center.color = [
                    (sum[0] / count) as f32,
                    (sum[1] / count) as f32,
                    (sum[2] / count) as f32,
                ];
                center.x = (sum[3] / count) as f32;
                center.y = (sum[4] / count) as f32;
            }
        }

        // Fragments under a quarter of the mean cluster size are merged away.
        let mean_size = n / centers.len().max(1);
        enforce_connectivity(&labels, w, h, (mean_size / 4).max(1))
    }
}

impl SuperpixelGenerator for SlicGenerator {
    fn generate(&self, image: &RgbImage) -> SuperpixelSet {
        let (width, height) = image.dimensions();
        let n = width as u64 * height as u64;
        if n == 0 {
            return SuperpixelSet::empty(width, height);
        }

        let labels: Vec<u32> = if self.options.mode == SuperpixelMode::PerPixel
            || self.options.max_clusters as u64 >= n
        {
            (0..n as u32).collect()
        } else {
            self.cluster(image)
        };

        let set = SuperpixelSet::assemble(image, &labels);
        debug!(
            "Generated {} superpixels with {} adjacencies for {}x{} image",
            set.len(),
            set.edge_count(),
            width,
            height
        );
        set
    }
}

/// Moves a grid seed to the smoothest pixel of its 3x3 neighbourhood.
fn lowest_gradient(
    colors: &[[f32; 3]],
    w: usize,
    h: usize,
    cx: usize,
    cy: usize,
) -> (usize, usize) {
    let at = |x: usize, y: usize| colors[y * w + x];
    let dist = |a: [f32; 3], b: [f32; 3]| -> f32 {
        a.iter().zip(b.iter()).map(|(p, q)| (p - q) * (p - q)).sum()
    };

    let mut best = (f32::INFINITY, (cx, cy));
    for y in cy.saturating_sub(1)..=(cy + 1).min(h - 1) {
        for x in cx.saturating_sub(1)..=(cx + 1).min(w - 1) {
            let gx = dist(at((x + 1).min(w - 1), y), at(x.saturating_sub(1), y));
            let gy = dist(at(x, (y + 1).min(h - 1)), at(x, y.saturating_sub(1)));
            if gx + gy < best.0 {
                best = (gx + gy, (x, y));
            }
        }
    }
    best.1
}

/// Relabels 4-connected components; components under `min_size` are absorbed by the
/// component left of (or above) their first pixel.
fn enforce_connectivity(labels: &[u32], w: usize, h: usize, min_size: usize) -> Vec<u32> {
    const UNSET: u32 = u32::MAX;
    let n = w * h;
    let mut out = vec![UNSET; n];
    let mut next = 0u32;
    let mut queue: Vec<usize> = Vec::new();

    for start in 0..n {
        if out[start] != UNSET {
            continue;
        }
        let original = labels[start];
        let adjacent = if start % w > 0 {
            Some(out[start - 1])
        } else if start >= w {
            Some(out[start - w])
        } else {
            None
        };

        queue.clear();
        queue.push(start);
        out[start] = next;
        let mut head = 0;
        while head < queue.len() {
            let p = queue[head];
            head += 1;
            let (x, y) = (p % w, p / w);
            let candidates = [
                (x > 0).then(|| p - 1),
                (x + 1 < w).then(|| p + 1),
                (y > 0).then(|| p - w),
                (y + 1 < h).then(|| p + w),
            ];
            for q in candidates.into_iter().flatten() {
                if out[q] == UNSET && labels[q] == original {
                    out[q] = next;
                    queue.push(q);
                }
            }
        }

        match adjacent {
            Some(label) if queue.len() < min_size => {
                for &p in &queue {
                    out[p] = label;
                }
            }
            _ => next += 1,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_tone(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, _| {
            if x < width / 2 {
                Rgb([0, 0, 0])
            } else {
                Rgb([255, 255, 255])
            }
        })
    }

    fn is_contiguous(set: &SuperpixelSet, id: usize) -> bool {
        let sp = set.get(id).unwrap();
        let w = set.width() as usize;
        let members: BTreeSet<u32> = sp.pixels.iter().copied().collect();
        let mut seen = BTreeSet::new();
        let mut stack = vec![sp.pixels[0]];
        while let Some(p) = stack.pop() {
            if !seen.insert(p) {
                continue;
            }
            let p = p as usize;
            let (x, y) = (p % w, p / w);
            let mut next = vec![];
            if x > 0 {
                next.push(p - 1);
            }
            if x + 1 < w {
                next.push(p + 1);
            }
            if y > 0 {
                next.push(p - w);
            }
            next.push(p + w);
            for q in next {
                if members.contains(&(q as u32)) {
                    stack.push(q as u32);
                }
            }
        }
        seen.len() == members.len()
    }

    #[test]
    fn test_per_pixel_mode() {
        let image = two_tone(4, 3);
        let set = SlicGenerator::per_pixel().generate(&image);
        assert_eq!(set.len(), 12);
        // 3 rows of 3 horizontal pairs + 2 rows of 4 vertical pairs
        assert_eq!(set.edge_count(), 17);
        assert_eq!(set.label_at(3, 2), Some(11));
        assert_eq!(set.get(11).unwrap().mean_color, [255.0; 3]);
        assert!(set.are_adjacent(0, 1));
        assert!(set.are_adjacent(0, 4));
        assert!(!set.are_adjacent(0, 5));
    }

    #[test]
    fn test_empty_image() {
        let set = SlicGenerator::default().generate(&RgbImage::new(0, 5));
        assert!(set.is_empty());
        assert_eq!(set.height(), 5);
    }

    #[test]
    fn test_slic_partition_and_contiguity() {
        let image = RgbImage::from_fn(40, 30, |x, y| {
            Rgb([(x * 6) as u8, (y * 8) as u8, ((x + y) * 3) as u8])
        });
        let generator = SlicGenerator::new(SlicOptions {
            max_clusters: 24,
            ..Default::default()
        });
        let set = generator.generate(&image);
        assert!(set.len() > 1);

        let mut covered = vec![0u32; 40 * 30];
        for sp in set.iter() {
            assert!(!sp.is_empty());
            for &p in &sp.pixels {
                covered[p as usize] += 1;
                assert_eq!(set.labels()[p as usize] as usize, sp.id);
            }
            assert!(is_contiguous(&set, sp.id), "superpixel {} is split", sp.id);
            for &other in &sp.neighbors {
                assert!(set.are_adjacent(other, sp.id));
            }
        }
        assert!(covered.iter().all(|&c| c == 1));
    }

    #[test]
    fn test_slic_respects_strong_edges() {
        let image = two_tone(20, 10);
        let generator = SlicGenerator::new(SlicOptions {
            max_clusters: 8,
            ..Default::default()
        });
        let set = generator.generate(&image);
        for sp in set.iter() {
            let first = image.as_raw()[sp.pixels[0] as usize * 3];
            assert!(sp
                .pixels
                .iter()
                .all(|&p| image.as_raw()[p as usize * 3] == first));
        }
    }

    #[test]
    fn test_single_row_keeps_color_edge() {
        let image = two_tone(100, 1);
        let generator = SlicGenerator::new(SlicOptions {
            max_clusters: 4,
            ..Default::default()
        });
        let set = generator.generate(&image);
        assert!(set.len() > 1);
        for sp in set.iter() {
            let first = sp.pixels[0] < 50;
            assert!(
                sp.pixels.iter().all(|&p| (p < 50) == first),
                "superpixel {} crosses x=50: {:?}",
                sp.id,
                sp.pixels
            );
        }
    }

    #[test]
    fn test_from_labels_checks_size_and_renumbers() -> Result<()> {
        let image = two_tone(3, 1);
        assert!(matches!(
            SuperpixelSet::from_labels(&image, &[0, 1]),
            Err(SegError::Validation { .. })
        ));

        let set = SuperpixelSet::from_labels(&image, &[7, 7, 2])?;
        assert_eq!(set.labels(), &[0, 0, 1]);
        assert!(set.are_adjacent(0, 1));
        Ok(())
    }

    #[test]
    fn test_slic_is_deterministic() {
        let image = RgbImage::from_fn(33, 17, |x, y| Rgb([(x * y % 251) as u8, x as u8, y as u8]));
        let generator = SlicGenerator::new(SlicOptions {
            max_clusters: 10,
            ..Default::default()
        });
        let a = generator.generate(&image);
        let b = generator.generate(&image);
        assert_eq!(a.labels(), b.labels());
    }

    #[test]
    fn test_small_components_are_absorbed() {
        // A lone pixel of label 1 inside label 0 gets merged when min_size is 2.
        let labels = vec![0, 0, 0, 0, 1, 0, 0, 0, 0];
        assert_eq!(enforce_connectivity(&labels, 3, 3, 2), vec![0; 9]);
        let kept = enforce_connectivity(&labels, 3, 3, 1);
        assert_eq!(kept[4], 1);

        // Same label in two disconnected pieces becomes two superpixels.
        let labels = vec![0, 1, 0];
        assert_eq!(enforce_connectivity(&labels, 3, 1, 1), vec![0, 1, 2]);
    }
}
