pub mod config;
pub mod errors;
pub mod graph;
pub mod io;
pub mod mask;
pub mod mincut;
pub mod polygon;
pub mod seeds;
pub mod superpixel;
pub mod traits;

pub mod mocks;

use image::RgbImage;
use indicatif::{ParallelProgressIterator, ProgressBar};
use rayon::prelude::*;
use tracing::{debug, info, warn};

pub use config::{Config, SegmentationConfig, SeedPolicy};
pub use errors::{Result, SegError};
pub use graph::{CapacityModel, FlowNetwork};
pub use mask::{resolve_mask, ClassPalette, ColoredMask};
pub use mincut::{CutResult, DinicSolver};
pub use polygon::{Polygon, PolygonStore, ScanlineRasterizer};
pub use seeds::{project_seeds, ClassSeedSet};
pub use superpixel::{SlicGenerator, SlicOptions, SuperpixelSet};
pub use traits::*;

#[cfg(test)]
pub use mocks::*;

/// Integer class label; also the index into the class palette.
pub type ClassId = u32;

/// What happened to one participating class.
#[derive(Debug)]
pub struct ClassOutcome {
    pub class_id: ClassId,
    pub seed_count: usize,
    pub cut: Result<CutResult>,
}

#[derive(Debug)]
pub struct SegmentationOutput {
    pub mask: ColoredMask,
    pub superpixel_count: usize,
    /// Polygons and class points that were skipped, in discovery order.
    pub rejected_polygons: Vec<SegError>,
    /// One entry per participating class, ascending by class id.
    pub classes: Vec<ClassOutcome>,
}

impl SegmentationOutput {
    pub fn outcome(&self, class_id: ClassId) -> Option<&ClassOutcome> {
        self.classes.iter().find(|o| o.class_id == class_id)
    }

    pub fn failed_classes(&self) -> impl Iterator<Item = (ClassId, &SegError)> {
        self.classes
            .iter()
            .filter_map(|o| o.cut.as_ref().err().map(|e| (o.class_id, e)))
    }
}

/// Superpixel generation, seed projection, one min-cut per class and mask resolution.
pub struct SeedSegmenter<G: SuperpixelGenerator, S: MinCutSolver> {
    generator: G,
    solver: S,
    config: SegmentationConfig,
    rasterizer: ScanlineRasterizer,
    progress: Option<ProgressBar>,
}

impl<G: SuperpixelGenerator, S: MinCutSolver> SeedSegmenter<G, S> {
    pub const fn new(generator: G, solver: S, config: SegmentationConfig) -> Self {
        Self {
            generator,
            solver,
            config,
            rasterizer: ScanlineRasterizer,
            progress: None,
        }
    }

    /// Reports per-class progress on `progress`; its length is set on every run.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    pub const fn config(&self) -> &SegmentationConfig {
        &self.config
    }

    pub fn segment(&self, image: &RgbImage, store: &PolygonStore) -> Result<SegmentationOutput> {
        self.config.validate()?;
        let (width, height) = image.dimensions();

        let superpixels = self.generator.generate(image);
        let (seeds, rejected_polygons) = project_seeds(
            &superpixels,
            store,
            self.config.seed_policy,
            &self.config.palette,
            &self.rasterizer,
        );

        if superpixels.is_empty() || seeds.classes().is_empty() {
            debug!(
                "Nothing to segment ({} superpixels, {} classes)",
                superpixels.len(),
                seeds.classes().len()
            );
            return Ok(SegmentationOutput {
                mask: ColoredMask::unlabeled(width, height),
                superpixel_count: superpixels.len(),
                rejected_polygons,
                classes: Vec::new(),
            });
        }

        let model = CapacityModel::from(&self.config);
        let progress = self.progress.clone().unwrap_or_else(ProgressBar::hidden);
        progress.set_length(seeds.classes().len() as u64);

        let mut classes: Vec<ClassOutcome> = seeds
            .classes()
            .par_iter()
            .progress_with(progress.clone())
            .map(|&class_id| {
                let seed_count = seeds.seeds_of(class_id).len();
                if seed_count == 0 {
                    warn!("Class {} has no seed superpixels", class_id);
                }
                let cut = FlowNetwork::build(&superpixels, &seeds, class_id, &model)
                    .and_then(|network| self.solver.min_cut(&network));
                ClassOutcome {
                    class_id,
                    seed_count,
                    cut,
                }
            })
            .collect();
        progress.finish();
        classes.sort_by_key(|o| o.class_id);

        for outcome in &classes {
            if let Err(err) = &outcome.cut {
                warn!("Class {} dropped from the mask: {}", outcome.class_id, err);
            }
        }

        let cuts: Vec<&CutResult> = classes.iter().filter_map(|o| o.cut.as_ref().ok()).collect();
        let mask = resolve_mask(&superpixels, &cuts);
        info!(
            "Segmented {}x{} image: {} superpixels, {} classes, {} labeled pixels",
            width,
            height,
            superpixels.len(),
            classes.len(),
            mask.labels().len() - mask.count(None)
        );

        Ok(SegmentationOutput {
            mask,
            superpixel_count: superpixels.len(),
            rejected_polygons,
            classes,
        })
    }

    /// Paints polygon interiors directly, skipping superpixels and cuts.
    pub fn overlay(&self, image: &RgbImage, store: &PolygonStore) -> (ColoredMask, Vec<SegError>) {
        let (width, height) = image.dimensions();
        polygon::overlay_polygons(store, width, height, &self.config.palette, &self.rasterizer)
    }
}

impl SeedSegmenter<SlicGenerator, DinicSolver> {
    /// Stock generator and solver configured from `config`.
    pub fn from_config(config: SegmentationConfig) -> Self {
        let generator = SlicGenerator::new(SlicOptions::from(&config));
        let solver = match config.solve_timeout {
            Some(timeout) => DinicSolver::new().with_timeout(timeout),
            None => DinicSolver::new(),
        };
        Self::new(generator, solver, config)
    }
}
