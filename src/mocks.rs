use image::RgbImage;

use crate::errors::{Result, SegError};
use crate::graph::FlowNetwork;
use crate::mincut::{CutResult, DinicSolver};
use crate::superpixel::SuperpixelSet;
use crate::traits::{MinCutSolver, SuperpixelGenerator};
use crate::ClassId;

/// Fixed square-block superpixels for tests.
///
/// Cuts the image into `block`×`block` squares (smaller at the right and bottom edges),
/// numbered row-major from the top-left.
#[derive(Debug, Clone, Copy)]
pub struct BlockGenerator {
    pub block: u32,
}

impl BlockGenerator {
    pub const fn new(block: u32) -> Self {
        Self { block }
    }
}

impl SuperpixelGenerator for BlockGenerator {
    fn generate(&self, image: &RgbImage) -> SuperpixelSet {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return SuperpixelSet::empty(width, height);
        }
        let block = self.block.max(1);
        let per_row = width.div_ceil(block);
        let labels = (0..height)
            .flat_map(|y| (0..width).map(move |x| (y / block) * per_row + x / block))
            .collect::<Vec<u32>>();
        SuperpixelSet::assemble(image, &labels)
    }
}

/// Solver that fails for one class and solves every other class exactly.
#[derive(Debug, Clone, Copy)]
pub struct FailingSolver {
    pub class_id: ClassId,
}

impl FailingSolver {
    pub const fn new(class_id: ClassId) -> Self {
        Self { class_id }
    }
}

impl MinCutSolver for FailingSolver {
    fn min_cut(&self, network: &FlowNetwork) -> Result<CutResult> {
        if network.class_id() == self.class_id {
            return Err(SegError::Solver {
                class_id: self.class_id,
                reason: "injected failure".to_string(),
            });
        }
        DinicSolver::new().min_cut(network)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::CapacityModel;
    use crate::seeds::ClassSeedSet;

    #[test]
    fn test_block_generator_layout() {
        let set = BlockGenerator::new(2).generate(&RgbImage::new(5, 3));
        // 3 blocks across, 2 down
        assert_eq!(set.len(), 6);
        assert_eq!(set.label_at(0, 0), Some(0));
        assert_eq!(set.label_at(4, 0), Some(2));
        assert_eq!(set.label_at(1, 2), Some(3));
        assert_eq!(set.get(2).map(|sp| sp.len()), Some(2));
        assert!(set.are_adjacent(0, 1));
        assert!(set.are_adjacent(0, 3));
        assert!(!set.are_adjacent(0, 4));
    }

    #[test]
    fn test_block_generator_empty_image() {
        let set = BlockGenerator::new(4).generate(&RgbImage::new(0, 7));
        assert!(set.is_empty());
    }

    #[test]
    fn test_failing_solver_only_fails_its_class() -> Result<()> {
        let set = BlockGenerator::new(1).generate(&RgbImage::new(2, 2));
        let seeds = ClassSeedSet::default();

        let failing = FailingSolver::new(1);
        let network = FlowNetwork::build(&set, &seeds, 1, &CapacityModel::default())?;
        assert!(matches!(
            failing.min_cut(&network),
            Err(SegError::Solver { class_id: 1, .. })
        ));

        let network = FlowNetwork::build(&set, &seeds, 0, &CapacityModel::default())?;
        let cut = failing.min_cut(&network)?;
        assert_eq!(cut.assigned_count(), 0);
        Ok(())
    }
}
