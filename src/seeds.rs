use ndarray::Array2;
use tracing::{debug, warn};

use crate::config::SeedPolicy;
use crate::errors::SegError;
use crate::mask::ClassPalette;
use crate::polygon::PolygonStore;
use crate::superpixel::SuperpixelSet;
use crate::traits::PolygonRasterizer;
use crate::ClassId;

/// Exclusive class seeds per superpixel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassSeedSet {
    classes: Vec<ClassId>,
    seeds: Vec<Vec<usize>>,
    owner: Vec<Option<ClassId>>,
}

impl ClassSeedSet {
    /// Participating classes, ascending.
    pub fn classes(&self) -> &[ClassId] {
        &self.classes
    }

    /// Seed superpixels of `class_id`, ascending. Empty for unknown classes.
    pub fn seeds_of(&self, class_id: ClassId) -> &[usize] {
        self.classes
            .binary_search(&class_id)
            .map(|i| self.seeds[i].as_slice())
            .unwrap_or(&[])
    }

    /// Class a superpixel seeds, if any.
    pub fn owner(&self, superpixel: usize) -> Option<ClassId> {
        self.owner.get(superpixel).copied().flatten()
    }

    pub fn seed_count(&self) -> usize {
        self.seeds.iter().map(Vec::len).sum()
    }
}

/// Decides which superpixels seed which class from polygon overlap and class points.
///
/// With [`SeedPolicy::Majority`] a superpixel needs more than half of its pixels enclosed
/// by a class's polygons. When several classes qualify, the larger overlap wins and ties go
/// to the lower class id. Class points count as full overlap for the superpixel containing
/// them. Polygons and points that cannot be used are returned as errors and skipped.
pub fn project_seeds<R: PolygonRasterizer>(
    superpixels: &SuperpixelSet,
    store: &PolygonStore,
    policy: SeedPolicy,
    palette: &ClassPalette,
    rasterizer: &R,
) -> (ClassSeedSet, Vec<SegError>) {
    let (width, height) = (superpixels.width(), superpixels.height());
    let (valid, mut rejected) = store.partition_valid(palette);

    let classes: Vec<ClassId> = store
        .class_ids()
        .into_iter()
        .filter(|&c| palette.color(c).is_some())
        .collect();
    let column = |class_id: ClassId| classes.binary_search(&class_id).ok();

    let mut counts = Array2::<u32>::zeros((superpixels.len(), classes.len()));
    let labels = superpixels.labels();
    let mut enclosed = vec![false; labels.len()];
    let mut touched: Vec<usize> = Vec::new();

    for (col, &class_id) in classes.iter().enumerate() {
        for (_, polygon) in valid.iter().filter(|(_, p)| p.class_id == class_id) {
            for (x, y) in rasterizer.enclosed_pixels(polygon, width, height) {
                if x >= width || y >= height {
                    continue;
                }
                let index = y as usize * width as usize + x as usize;
                if !enclosed[index] {
                    enclosed[index] = true;
                    touched.push(index);
                    counts[[labels[index] as usize, col]] += 1;
                }
            }
        }
        for index in touched.drain(..) {
            enclosed[index] = false;
        }
    }

    for (i, point) in store.class_points().iter().enumerate() {
        let Some(col) = column(point.class_id) else {
            let err = SegError::Validation {
                field: format!("class point {}", i),
                reason: format!("class {} has no palette color", point.class_id),
            };
            warn!("Skipping class point: {}", err);
            rejected.push(err);
            continue;
        };
        let superpixel = (point.x >= 0 && point.y >= 0)
            .then(|| superpixels.label_at(point.x as u32, point.y as u32))
            .flatten();
        match superpixel.and_then(|id| superpixels.get(id)) {
            Some(sp) => counts[[sp.id, col]] = sp.len() as u32,
            None => {
                let err = SegError::Validation {
                    field: format!("class point {}", i),
                    reason: format!(
                        "({}, {}) lies outside the {}x{} image",
                        point.x, point.y, width, height
                    ),
                };
                warn!("Skipping class point: {}", err);
                rejected.push(err);
            }
        }
    }

    let mut seeds = vec![Vec::new(); classes.len()];
    let mut owner = vec![None; superpixels.len()];
    for sp in superpixels.iter() {
        let members = sp.len() as u32;
        let mut best: Option<(usize, u32)> = None;
        for (col, &overlap) in counts.row(sp.id).iter().enumerate() {
            if !policy.qualifies(overlap, members) {
                continue;
            }
            if best.map_or(true, |(_, top)| overlap > top) {
                best = Some((col, overlap));
            }
        }
        if let Some((col, _)) = best {
            seeds[col].push(sp.id);
            owner[sp.id] = Some(classes[col]);
        }
    }

    for (class_id, list) in classes.iter().zip(&seeds) {
        debug!("Class {} has {} seed superpixels", class_id, list.len());
    }

    (
        ClassSeedSet {
            classes,
            seeds,
            owner,
        },
        rejected,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::BlockGenerator;
    use crate::polygon::ScanlineRasterizer;
    use crate::superpixel::SlicGenerator;
    use crate::traits::SuperpixelGenerator;
    use image::RgbImage;
    use std::io;
    use std::sync::{Arc, Mutex};

    fn project(
        superpixels: &SuperpixelSet,
        store: &PolygonStore,
        policy: SeedPolicy,
    ) -> (ClassSeedSet, Vec<SegError>) {
        project_seeds(
            superpixels,
            store,
            policy,
            &ClassPalette::default(),
            &ScanlineRasterizer,
        )
    }

    #[test]
    fn test_majority_versus_any_overlap() {
        // 4x4 image as four 2x2 blocks; the box covers 3 of block 0's pixels and 1 of block 1's.
        let superpixels = BlockGenerator::new(2).generate(&RgbImage::new(4, 4));
        let mut store = PolygonStore::new();
        store.add_polygon_with_vertices(0, [(0, 0), (3, 0), (3, 1), (1, 1), (1, 2), (0, 2)]);

        let (seeds, rejected) = project(&superpixels, &store, SeedPolicy::Majority);
        assert!(rejected.is_empty());
        assert_eq!(seeds.seeds_of(0), &[0]);

        let (seeds, _) = project(&superpixels, &store, SeedPolicy::AnyOverlap);
        assert_eq!(seeds.seeds_of(0), &[0, 1]);
    }

    #[test]
    fn test_conflict_prefers_larger_overlap_then_lower_class() {
        let superpixels = BlockGenerator::new(2).generate(&RgbImage::new(4, 2));
        let mut store = PolygonStore::new();
        // Class 1 covers all of block 0, class 0 covers 3 of its 4 pixels.
        store.add_bounding_box(1, 0, 0, 2, 2);
        store.add_polygon_with_vertices(0, [(0, 0), (2, 0), (2, 1), (1, 1), (1, 2), (0, 2)]);
        // Both classes cover all of block 1.
        store.add_bounding_box(0, 2, 0, 2, 2);
        store.add_bounding_box(1, 2, 0, 2, 2);

        let (seeds, _) = project(&superpixels, &store, SeedPolicy::Majority);
        assert_eq!(seeds.owner(0), Some(1));
        assert_eq!(seeds.owner(1), Some(0));
        assert_eq!(seeds.seed_count(), 2);
    }

    #[test]
    fn test_same_class_overlaps_count_once() {
        let superpixels = SlicGenerator::per_pixel().generate(&RgbImage::new(2, 1));
        let mut store = PolygonStore::new();
        store.add_bounding_box(3, 0, 0, 1, 1);
        store.add_bounding_box(3, 0, 0, 1, 1);

        let (seeds, _) = project(&superpixels, &store, SeedPolicy::Majority);
        assert_eq!(seeds.classes(), &[3]);
        assert_eq!(seeds.seeds_of(3), &[0]);
        assert_eq!(seeds.owner(1), None);
    }

    #[test]
    fn test_class_points_and_rejections() {
        let superpixels = BlockGenerator::new(2).generate(&RgbImage::new(4, 4));
        let mut store = PolygonStore::new();
        store.add_class_point(2, 3, 3);
        store.add_class_point(2, 30, 3);
        store.add_class_point(50, 0, 0);
        store.add_polygon_with_vertices(4, [(0, 0), (1, 1)]);

        let (seeds, rejected) = project(&superpixels, &store, SeedPolicy::Majority);
        assert_eq!(seeds.seeds_of(2), &[3]);
        assert_eq!(seeds.classes(), &[2, 4]);
        assert!(seeds.seeds_of(4).is_empty());
        assert_eq!(rejected.len(), 3);
    }

    #[derive(Clone, Default)]
    struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CaptureWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_skipped_class_points_are_logged() {
        let superpixels = BlockGenerator::new(2).generate(&RgbImage::new(4, 4));
        let mut store = PolygonStore::new();
        store.add_class_point(2, 3, 3);
        store.add_class_point(2, 30, 3);
        store.add_class_point(50, 0, 0);

        let writer = CaptureWriter::default();
        let make_writer = writer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || make_writer.clone())
            .with_ansi(false)
            .finish();
        let (_, rejected) = tracing::subscriber::with_default(subscriber, || {
            project(&superpixels, &store, SeedPolicy::Majority)
        });

        let logs = String::from_utf8(writer.0.lock().unwrap().clone()).unwrap();
        let warnings: Vec<_> = logs
            .lines()
            .filter(|line| line.contains("Skipping class point"))
            .collect();
        assert_eq!(rejected.len(), 2);
        assert_eq!(warnings.len(), 2);
        assert!(warnings.iter().any(|line| line.contains("class 50 has no palette color")));
    }
}
