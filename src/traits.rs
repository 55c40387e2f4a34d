use image::RgbImage;

use crate::errors::Result;
use crate::graph::FlowNetwork;
use crate::mincut::CutResult;
use crate::polygon::Polygon;
use crate::superpixel::SuperpixelSet;

/// Partitions an image into contiguous superpixels.
///
/// Implementations must assign every pixel to exactly one superpixel, keep every
/// superpixel 4-connected, and return an empty set for a zero-pixel image.
pub trait SuperpixelGenerator: Send + Sync {
    fn generate(&self, image: &RgbImage) -> SuperpixelSet;
}

/// Turns a polygon into the pixels it encloses, clipped to the image.
pub trait PolygonRasterizer: Send + Sync {
    fn enclosed_pixels(&self, polygon: &Polygon, width: u32, height: u32) -> Vec<(u32, u32)>;
}

/// Maximum flow / minimum s-t cut on one class's network.
///
/// The returned source side must be the set of superpixels reachable from the source in
/// the residual graph after a maximum flow.
pub trait MinCutSolver: Send + Sync {
    fn min_cut(&self, network: &FlowNetwork) -> Result<CutResult>;
}
