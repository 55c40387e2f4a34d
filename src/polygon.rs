use std::collections::BTreeSet;

use tracing::warn;

use crate::errors::{Result, SegError};
use crate::mask::{ClassPalette, ColoredMask};
use crate::traits::PolygonRasterizer;
use crate::ClassId;

pub type PolygonId = usize;

/// Closed loop of integer vertices tagged with a class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Polygon {
    pub class_id: ClassId,
    vertices: Vec<(i32, i32)>,
}

/// Single-pixel seed tagged with a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassPoint {
    pub class_id: ClassId,
    pub x: i32,
    pub y: i32,
}

impl Polygon {
    pub fn new(class_id: ClassId, vertices: Vec<(i32, i32)>) -> Self {
        Self { class_id, vertices }
    }

    pub fn vertices(&self) -> &[(i32, i32)] {
        &self.vertices
    }

    /// Vertices with consecutive duplicates and the closing repeat of the first vertex removed.
    pub fn ring(&self) -> Vec<(i32, i32)> {
        let mut ring: Vec<(i32, i32)> = Vec::with_capacity(self.vertices.len());
        for &v in &self.vertices {
            if ring.last() != Some(&v) {
                ring.push(v);
            }
        }
        while ring.len() > 1 && ring.first() == ring.last() {
            ring.pop();
        }
        ring
    }

    /// Twice the signed shoelace area of the ring.
    pub fn twice_area(&self) -> i64 {
        let ring = self.ring();
        let n = ring.len();
        (0..n)
            .map(|i| {
                let (x0, y0) = ring[i];
                let (x1, y1) = ring[(i + 1) % n];
                x0 as i64 * y1 as i64 - x1 as i64 * y0 as i64
            })
            .sum()
    }

    /// Rejects rings that cannot enclose a well-defined region.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let ring = self.ring();
        let distinct: BTreeSet<_> = ring.iter().collect();
        if distinct.len() < 3 {
            return Err(format!(
                "fewer than 3 distinct vertices ({} given)",
                distinct.len()
            ));
        }
        if self.twice_area() == 0 {
            return Err("zero area".to_string());
        }

        let n = ring.len();
        for i in 0..n {
            let a = (ring[i], ring[(i + 1) % n]);
            for j in (i + 2)..n {
                if i == 0 && j == n - 1 {
                    continue;
                }
                let b = (ring[j], ring[(j + 1) % n]);
                if segments_intersect(a.0, a.1, b.0, b.1) {
                    return Err(format!("edges {} and {} intersect", i, j));
                }
            }
        }
        Ok(())
    }
}

fn orientation(p: (i32, i32), q: (i32, i32), r: (i32, i32)) -> i64 {
    let v = (q.0 as i64 - p.0 as i64) * (r.1 as i64 - p.1 as i64)
        - (q.1 as i64 - p.1 as i64) * (r.0 as i64 - p.0 as i64);
    v.signum()
}

fn on_segment(p: (i32, i32), q: (i32, i32), r: (i32, i32)) -> bool {
    q.0 >= p.0.min(r.0) && q.0 <= p.0.max(r.0) && q.1 >= p.1.min(r.1) && q.1 <= p.1.max(r.1)
}

fn segments_intersect(p1: (i32, i32), p2: (i32, i32), p3: (i32, i32), p4: (i32, i32)) -> bool {
    let d1 = orientation(p3, p4, p1);
    let d2 = orientation(p3, p4, p2);
    let d3 = orientation(p1, p2, p3);
    let d4 = orientation(p1, p2, p4);

    if d1 != d2 && d3 != d4 && d1 != 0 && d2 != 0 && d3 != 0 && d4 != 0 {
        return true;
    }
    (d1 == 0 && on_segment(p3, p1, p4))
        || (d2 == 0 && on_segment(p3, p2, p4))
        || (d3 == 0 && on_segment(p1, p3, p2))
        || (d4 == 0 && on_segment(p1, p4, p2))
}

/// Even-odd scanline fill sampled at pixel centers.
///
/// A pixel `(x, y)` is enclosed when `(x + 0.5, y + 0.5)` lies inside the ring, so a
/// polygon with vertices `(0,0) (2,0) (2,4) (0,4)` covers exactly columns 0 and 1.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanlineRasterizer;

impl PolygonRasterizer for ScanlineRasterizer {
    fn enclosed_pixels(&self, polygon: &Polygon, width: u32, height: u32) -> Vec<(u32, u32)> {
        let ring = polygon.ring();
        if ring.len() < 3 || width == 0 || height == 0 {
            return Vec::new();
        }

        let y_min = ring.iter().map(|v| v.1).min().unwrap_or(0).max(0) as i64;
        let y_max = (ring.iter().map(|v| v.1).max().unwrap_or(0) as i64).min(height as i64);

        let n = ring.len();
        let mut pixels = Vec::new();
        let mut crossings: Vec<f64> = Vec::with_capacity(n);
        for y in y_min..y_max {
            let yc = y as f64 + 0.5;
            crossings.clear();
            for i in 0..n {
                let (ax, ay) = (ring[i].0 as f64, ring[i].1 as f64);
                let (bx, by) = (ring[(i + 1) % n].0 as f64, ring[(i + 1) % n].1 as f64);
                if (ay <= yc) != (by <= yc) {
                    crossings.push(ax + (yc - ay) * (bx - ax) / (by - ay));
                }
            }
            crossings.sort_by(f64::total_cmp);

            for span in crossings.chunks_exact(2) {
                let start = ((span[0] - 0.5).ceil() as i64).max(0);
                let end = ((span[1] - 0.5).ceil() as i64).min(width as i64);
                for x in start..end {
                    pixels.push((x as u32, y as u32));
                }
            }
        }
        pixels
    }
}

/// Polygons and point seeds supplied by the caller for one run.
#[derive(Debug, Clone, Default)]
pub struct PolygonStore {
    polygons: Vec<Polygon>,
    points: Vec<ClassPoint>,
}

impl PolygonStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts an empty polygon to be filled with [`Self::add_line_to_polygon`].
    pub fn add_polygon(&mut self, class_id: ClassId) -> PolygonId {
        self.polygons.push(Polygon::new(class_id, Vec::new()));
        self.polygons.len() - 1
    }

    pub fn add_polygon_with_vertices<I>(&mut self, class_id: ClassId, vertices: I) -> PolygonId
    where
        I: IntoIterator<Item = (i32, i32)>,
    {
        self.polygons
            .push(Polygon::new(class_id, vertices.into_iter().collect()));
        self.polygons.len() - 1
    }

    /// Appends an edge. Shared endpoints with the previous edge and the closing vertex are
    /// not duplicated.
    pub fn add_line_to_polygon(
        &mut self,
        polygon: PolygonId,
        from: (i32, i32),
        to: (i32, i32),
    ) -> Result<()> {
        let count = self.polygons.len();
        let target = self
            .polygons
            .get_mut(polygon)
            .ok_or_else(|| SegError::Validation {
                field: "polygon".to_string(),
                reason: format!("id {} out of range ({} polygons)", polygon, count),
            })?;
        if target.vertices.last() != Some(&from) {
            target.vertices.push(from);
        }
        if target.vertices.first() != Some(&to) {
            target.vertices.push(to);
        }
        Ok(())
    }

    pub fn add_bounding_box(
        &mut self,
        class_id: ClassId,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
    ) -> PolygonId {
        self.add_polygon_with_vertices(
            class_id,
            [
                (x, y),
                (x + width, y),
                (x + width, y + height),
                (x, y + height),
            ],
        )
    }

    /// Adds a polygon given in `[0, 1]` image-relative coordinates.
    pub fn add_normalized_polygon(
        &mut self,
        class_id: ClassId,
        points: &[(f32, f32)],
        width: u32,
        height: u32,
    ) -> PolygonId {
        self.add_polygon_with_vertices(
            class_id,
            points.iter().map(|&(x, y)| {
                (
                    (x * width as f32).round() as i32,
                    (y * height as f32).round() as i32,
                )
            }),
        )
    }

    pub fn add_class_point(&mut self, class_id: ClassId, x: i32, y: i32) {
        self.points.push(ClassPoint { class_id, x, y });
    }

    /// Adds a point given in image-relative coordinates, each within `[0, 1)`.
    pub fn add_normalized_class_point(
        &mut self,
        class_id: ClassId,
        x: f32,
        y: f32,
        width: u32,
        height: u32,
    ) -> Result<()> {
        let unit = 0.0..1.0;
        if !(unit.contains(&x) && unit.contains(&y)) {
            return Err(SegError::Validation {
                field: "class point".to_string(),
                reason: format!("normalized ({}, {}) lies outside [0, 1)", x, y),
            });
        }
        let column = ((x * width as f32).floor() as i32).min(width as i32 - 1);
        let row = ((y * height as f32).floor() as i32).min(height as i32 - 1);
        self.add_class_point(class_id, column.max(0), row.max(0));
        Ok(())
    }

    pub fn polygon(&self, id: PolygonId) -> Option<&Polygon> {
        self.polygons.get(id)
    }

    pub fn polygons(&self) -> &[Polygon] {
        &self.polygons
    }

    pub fn class_points(&self) -> &[ClassPoint] {
        &self.points
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty() && self.points.is_empty()
    }

    pub fn clear(&mut self) {
        self.polygons.clear();
        self.points.clear();
    }

    /// Every class referenced by a polygon or a point, ascending.
    pub fn class_ids(&self) -> BTreeSet<ClassId> {
        self.polygons
            .iter()
            .map(|p| p.class_id)
            .chain(self.points.iter().map(|p| p.class_id))
            .collect()
    }

    /// Splits polygons into usable ones and rejections.
    ///
    /// A polygon is rejected when its ring is malformed or its class has no palette color.
    pub fn partition_valid(
        &self,
        palette: &ClassPalette,
    ) -> (Vec<(PolygonId, &Polygon)>, Vec<SegError>) {
        let mut valid = Vec::with_capacity(self.polygons.len());
        let mut rejected = Vec::new();
        for (id, polygon) in self.polygons.iter().enumerate() {
            if palette.color(polygon.class_id).is_none() {
                rejected.push(SegError::Validation {
                    field: format!("polygon {}", id),
                    reason: format!("class {} has no palette color", polygon.class_id),
                });
                continue;
            }
            match polygon.validate() {
                Ok(()) => valid.push((id, polygon)),
                Err(reason) => rejected.push(SegError::MalformedPolygon {
                    polygon: id,
                    class_id: polygon.class_id,
                    reason,
                }),
            }
        }
        for err in &rejected {
            warn!("Skipping polygon: {}", err);
        }
        (valid, rejected)
    }
}

/// Paints every usable polygon's interior into a fresh mask in insertion order.
pub fn overlay_polygons<R: PolygonRasterizer>(
    store: &PolygonStore,
    width: u32,
    height: u32,
    palette: &ClassPalette,
    rasterizer: &R,
) -> (ColoredMask, Vec<SegError>) {
    let mut mask = ColoredMask::unlabeled(width, height);
    let (valid, mut rejected) = store.partition_valid(palette);
    for (_, polygon) in valid {
        let painted = rasterizer
            .enclosed_pixels(polygon, width, height)
            .into_iter()
            .try_for_each(|(x, y)| mask.set(x, y, Some(polygon.class_id)));
        if let Err(err) = painted {
            warn!("Rasterizer produced an unusable pixel: {}", err);
            rejected.push(err);
        }
    }
    (mask, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(class_id: ClassId, x0: i32, y0: i32, x1: i32, y1: i32) -> Polygon {
        Polygon::new(class_id, vec![(x0, y0), (x1, y0), (x1, y1), (x0, y1)])
    }

    #[test]
    fn test_rectangle_rasterization() {
        let pixels = ScanlineRasterizer.enclosed_pixels(&rect(0, 0, 0, 2, 4), 4, 4);
        assert_eq!(pixels.len(), 8);
        assert!(pixels.iter().all(|&(x, y)| x < 2 && y < 4));
    }

    #[test]
    fn test_rasterization_clips_to_image() {
        let pixels = ScanlineRasterizer.enclosed_pixels(&rect(0, -5, -5, 100, 100), 3, 2);
        assert_eq!(pixels.len(), 6);
    }

    #[test]
    fn test_triangle_rasterization() {
        let triangle = Polygon::new(0, vec![(0, 0), (4, 0), (0, 4)]);
        let pixels = ScanlineRasterizer.enclosed_pixels(&triangle, 4, 4);
        // Centers strictly below the hypotenuse x + y = 4.
        assert_eq!(pixels.len(), 6);
        assert!(pixels.iter().all(|&(x, y)| x + y < 3));
    }

    #[test]
    fn test_concave_rasterization() {
        // U shape: the notch between x=1..3, y=0..2 stays empty.
        let u = Polygon::new(
            0,
            vec![(0, 0), (1, 0), (1, 2), (3, 2), (3, 0), (4, 0), (4, 4), (0, 4)],
        );
        let pixels = ScanlineRasterizer.enclosed_pixels(&u, 4, 4);
        assert_eq!(pixels.len(), 12);
        assert!(!pixels.contains(&(1, 0)));
        assert!(!pixels.contains(&(2, 1)));
    }

    #[test]
    fn test_validation() {
        assert!(rect(0, 0, 0, 3, 3).validate().is_ok());
        assert!(Polygon::new(0, vec![(0, 0), (1, 1)]).validate().is_err());
        assert!(Polygon::new(0, vec![(0, 0), (1, 1), (2, 2)])
            .validate()
            .unwrap_err()
            .contains("zero area"));

        let bowtie = Polygon::new(0, vec![(0, 0), (4, 4), (4, 0), (0, 2)]);
        assert!(bowtie.validate().unwrap_err().contains("intersect"));
    }

    #[test]
    fn test_add_line_to_polygon() -> Result<()> {
        let mut store = PolygonStore::new();
        let id = store.add_polygon(1);
        store.add_line_to_polygon(id, (0, 0), (5, 0))?;
        store.add_line_to_polygon(id, (5, 0), (5, 5))?;
        store.add_line_to_polygon(id, (5, 5), (0, 0))?;

        let polygon = store.polygon(id).unwrap();
        assert_eq!(polygon.vertices(), &[(0, 0), (5, 0), (5, 5)]);
        assert!(polygon.validate().is_ok());

        assert!(store.add_line_to_polygon(7, (0, 0), (1, 1)).is_err());
        Ok(())
    }

    #[test]
    fn test_store_helpers() {
        let mut store = PolygonStore::new();
        store.add_bounding_box(2, 1, 1, 2, 2);
        store.add_normalized_polygon(0, &[(0.0, 0.0), (0.5, 0.0), (0.5, 1.0)], 10, 10);
        store.add_class_point(4, 3, 3);

        assert_eq!(store.polygon(1).unwrap().vertices(), &[(0, 0), (5, 0), (5, 10)]);
        assert_eq!(store.class_ids().into_iter().collect::<Vec<_>>(), vec![0, 2, 4]);

        let pixels = ScanlineRasterizer.enclosed_pixels(store.polygon(0).unwrap(), 10, 10);
        assert_eq!(pixels.len(), 4);

        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn test_normalized_class_point() -> Result<()> {
        let mut store = PolygonStore::new();
        store.add_normalized_class_point(1, 0.0, 0.0, 10, 4)?;
        store.add_normalized_class_point(2, 0.55, 0.99, 10, 4)?;
        assert_eq!(
            store.class_points(),
            &[
                ClassPoint { class_id: 1, x: 0, y: 0 },
                ClassPoint { class_id: 2, x: 5, y: 3 },
            ]
        );

        for (x, y) in [(1.0, 0.5), (0.5, 1.0), (-0.1, 0.5), (0.5, f32::NAN)] {
            assert!(matches!(
                store.add_normalized_class_point(0, x, y, 10, 4),
                Err(SegError::Validation { .. })
            ));
        }
        assert_eq!(store.class_points().len(), 2);
        Ok(())
    }

    #[test]
    fn test_partition_valid() {
        let mut store = PolygonStore::new();
        store.add_bounding_box(0, 0, 0, 2, 2);
        store.add_polygon_with_vertices(1, [(0, 0), (1, 1)]);
        store.add_bounding_box(99, 0, 0, 2, 2);

        let (valid, rejected) = store.partition_valid(&ClassPalette::default());
        assert_eq!(valid.len(), 1);
        assert_eq!(rejected.len(), 2);
        assert!(matches!(
            rejected[0],
            SegError::MalformedPolygon { polygon: 1, class_id: 1, .. }
        ));
        assert!(matches!(rejected[1], SegError::Validation { .. }));
    }

    #[test]
    fn test_overlay_later_polygons_win() {
        let mut store = PolygonStore::new();
        store.add_bounding_box(0, 0, 0, 4, 4);
        store.add_bounding_box(1, 1, 1, 2, 2);

        let (mask, rejected) =
            overlay_polygons(&store, 4, 4, &ClassPalette::default(), &ScanlineRasterizer);
        assert!(rejected.is_empty());
        assert_eq!(mask.get(0, 0), Some(0));
        assert_eq!(mask.get(1, 1), Some(1));
        assert_eq!(mask.get(2, 2), Some(1));
        assert_eq!(mask.get(3, 3), Some(0));
    }
}
