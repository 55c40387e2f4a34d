use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use image::ImageFormat;

use crate::errors::{Result, SegError};
use crate::mask::ClassPalette;
use crate::polygon::PolygonStore;
use crate::ClassId;

/// How a superpixel's overlap with a class's polygons turns it into a seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SeedPolicy {
    /// More than half of the member pixels are enclosed.
    #[default]
    Majority,
    /// At least one member pixel is enclosed.
    AnyOverlap,
}

impl SeedPolicy {
    pub const fn qualifies(self, overlap: u32, members: u32) -> bool {
        match self {
            Self::Majority => overlap as u64 * 2 > members as u64,
            Self::AnyOverlap => overlap > 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SuperpixelMode {
    /// SLIC-style clustering followed by connectivity enforcement.
    #[default]
    Slic,
    /// One superpixel per pixel.
    PerPixel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum RunMode {
    /// Superpixels + per-class min-cut.
    #[default]
    Autoseg,
    /// Per-pixel graph, no clustering.
    Simple,
    /// Paint polygon interiors only.
    Overlay,
}

/// Library-level settings for one segmentation run.
#[derive(Debug, Clone)]
pub struct SegmentationConfig {
    pub superpixel_mode: SuperpixelMode,
    /// Upper bound on the number of initial clusters.
    pub max_clusters: u32,
    /// Weight of spatial distance against color distance during clustering.
    pub compactness: f32,
    pub iterations: u32,
    pub seed_policy: SeedPolicy,
    /// Color distance at which edge capacity has fallen to `exp(-1/2)` of its maximum.
    pub similarity_sigma: f64,
    /// Capacity of an edge between identically colored superpixels.
    pub capacity_scale: u32,
    pub solve_timeout: Option<Duration>,
    pub palette: ClassPalette,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            superpixel_mode: SuperpixelMode::Slic,
            max_clusters: 1000,
            compactness: 10.0,
            iterations: 10,
            seed_policy: SeedPolicy::Majority,
            similarity_sigma: 30.0,
            capacity_scale: 1000,
            solve_timeout: None,
            palette: ClassPalette::default(),
        }
    }
}

impl SegmentationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_clusters == 0 {
            return Err(SegError::Validation {
                field: "max_clusters".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if !(self.compactness.is_finite() && self.compactness >= 0.0) {
            return Err(SegError::Validation {
                field: "compactness".to_string(),
                reason: format!("must be a finite non-negative number, got {}", self.compactness),
            });
        }
        if !(self.similarity_sigma.is_finite() && self.similarity_sigma > 0.0) {
            return Err(SegError::Validation {
                field: "similarity_sigma".to_string(),
                reason: format!("must be a finite positive number, got {}", self.similarity_sigma),
            });
        }
        if self.capacity_scale == 0 {
            return Err(SegError::Validation {
                field: "capacity_scale".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.palette.is_empty() {
            return Err(SegError::Validation {
                field: "palette".to_string(),
                reason: "needs at least one class color".to_string(),
            });
        }
        Ok(())
    }
}

/// The `CLS` part of a seed argument: a numeric id or a name declared with `--class-name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassRef {
    Id(ClassId),
    Name(String),
}

impl ClassRef {
    /// Maps a name to its position in `names`; ids pass through.
    pub fn resolve(&self, names: &[String]) -> Result<ClassId> {
        match self {
            Self::Id(class_id) => Ok(*class_id),
            Self::Name(name) => names
                .iter()
                .position(|n| n == name)
                .map(|index| index as ClassId)
                .ok_or_else(|| SegError::Validation {
                    field: "class".to_string(),
                    reason: format!("`{}` is not a declared class name", name),
                }),
        }
    }
}

/// A polygon seed given on the command line as `CLS:X,Y X,Y X,Y`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolygonArg {
    pub class: ClassRef,
    pub vertices: Vec<(i32, i32)>,
}

/// A bounding box seed given as `CLS:X,Y,W,H`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoxArg {
    pub class: ClassRef,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// A point seed given as `CLS:X,Y`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointArg {
    pub class: ClassRef,
    pub x: i32,
    pub y: i32,
}

/// A point seed in image-relative coordinates, `CLS:X,Y` with both in `[0, 1)`.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedPointArg {
    pub class: ClassRef,
    pub x: f32,
    pub y: f32,
}

/// A palette override given as `CLS:0xAABBGGRR` or `CLS:<decimal>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorArg {
    pub class: ClassRef,
    pub color: u32,
}

#[derive(Parser, Clone, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Encoded image, or a raw `.bin` RGBA/RGB buffer (requires --width/--height)
    pub input: PathBuf,

    /// Mask destination; `.bin` writes one little-endian u32 per pixel
    #[arg(default_value = "mask.png")]
    pub output: PathBuf,

    #[arg(short, long = "polygon", value_parser = parse_polygon)]
    pub polygons: Vec<PolygonArg>,

    #[arg(short, long = "bbox", value_parser = parse_box)]
    pub boxes: Vec<BoxArg>,

    #[arg(long = "point", value_parser = parse_point)]
    pub points: Vec<PointArg>,

    #[arg(long = "normalized-point", value_parser = parse_normalized_point)]
    pub normalized_points: Vec<NormalizedPointArg>,

    /// Names classes in order: the first is class 0, the next class 1, and so on
    #[arg(long = "class-name")]
    pub class_names: Vec<String>,

    #[arg(long = "class-color", value_parser = parse_color)]
    pub class_colors: Vec<ColorArg>,

    #[arg(short, long, value_enum, default_value_t = RunMode::Autoseg)]
    pub mode: RunMode,

    #[arg(long, default_value_t = 1000)]
    pub max_clusters: u32,

    #[arg(long, default_value_t = 10.0)]
    pub compactness: f32,

    #[arg(long, default_value_t = 10)]
    pub iterations: u32,

    #[arg(long, value_enum, default_value_t = SeedPolicy::Majority)]
    pub seed_policy: SeedPolicy,

    #[arg(long, default_value_t = 30.0)]
    pub sigma: f64,

    #[arg(long, default_value_t = 1000)]
    pub capacity_scale: u32,

    #[arg(long)]
    pub timeout_ms: Option<u64>,

    #[arg(long)]
    pub width: Option<u32>,

    #[arg(long)]
    pub height: Option<u32>,

    /// Composite the mask over the input image instead of writing the bare mask
    #[arg(long)]
    pub blend: bool,

    #[arg(short, long, default_value = "png", value_parser = check_format)]
    pub format: String,

    #[arg(short, long)]
    pub num_threads: Option<usize>,

    #[arg(long)]
    pub debug: bool,
}

impl Config {
    pub fn segmentation_config(&self) -> Result<SegmentationConfig> {
        let mut overrides = self
            .class_colors
            .iter()
            .map(|c| Ok((c.class.resolve(&self.class_names)?, c.color)))
            .collect::<Result<Vec<_>>>()?;
        // Ascending ids so appended classes never leave a gap.
        overrides.sort_by_key(|&(class_id, _)| class_id);
        let mut palette = ClassPalette::default();
        for (class_id, color) in overrides {
            palette.set_color(class_id, color)?;
        }

        Ok(SegmentationConfig {
            superpixel_mode: match self.mode {
                RunMode::Simple => SuperpixelMode::PerPixel,
                RunMode::Autoseg | RunMode::Overlay => SuperpixelMode::Slic,
            },
            max_clusters: self.max_clusters,
            compactness: self.compactness,
            iterations: self.iterations,
            seed_policy: self.seed_policy,
            similarity_sigma: self.sigma,
            capacity_scale: self.capacity_scale,
            solve_timeout: self.timeout_ms.map(Duration::from_millis),
            palette,
        })
    }

    /// Collects every seed argument into a polygon store, boxes becoming 4-vertex polygons.
    ///
    /// `width` and `height` scale the normalized points.
    pub fn polygon_store(&self, width: u32, height: u32) -> Result<PolygonStore> {
        let names = &self.class_names;
        let mut store = PolygonStore::new();
        for polygon in &self.polygons {
            store.add_polygon_with_vertices(
                polygon.class.resolve(names)?,
                polygon.vertices.iter().copied(),
            );
        }
        for b in &self.boxes {
            store.add_bounding_box(b.class.resolve(names)?, b.x, b.y, b.width, b.height);
        }
        for p in &self.points {
            store.add_class_point(p.class.resolve(names)?, p.x, p.y);
        }
        for p in &self.normalized_points {
            store.add_normalized_class_point(p.class.resolve(names)?, p.x, p.y, width, height)?;
        }
        Ok(store)
    }
}

fn split_class(s: &str) -> std::result::Result<(ClassRef, &str), String> {
    let (class, rest) = s
        .split_once(':')
        .ok_or_else(|| format!("`{}` is missing the `CLS:` prefix", s))?;
    let class = class.trim();
    if class.is_empty() {
        return Err(format!("`{}` has an empty class", s));
    }
    let class = match class.parse::<ClassId>() {
        Ok(class_id) => ClassRef::Id(class_id),
        Err(_) if class.starts_with(|c: char| c.is_ascii_digit()) => {
            return Err(format!("invalid class id `{}`", class));
        }
        Err(_) => ClassRef::Name(class.to_string()),
    };
    Ok((class, rest))
}

fn parse_ints(s: &str, expected: usize) -> std::result::Result<Vec<i32>, String> {
    let values = s
        .split(',')
        .map(|v| {
            v.trim()
                .parse::<i32>()
                .map_err(|e| format!("invalid coordinate `{}`: {}", v, e))
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if values.len() != expected {
        return Err(format!(
            "expected {} comma separated values, got {} in `{}`",
            expected,
            values.len(),
            s
        ));
    }
    Ok(values)
}

fn parse_floats(s: &str) -> std::result::Result<(f32, f32), String> {
    let values = s
        .split(',')
        .map(|v| {
            v.trim()
                .parse::<f32>()
                .map_err(|e| format!("invalid coordinate `{}`: {}", v, e))
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;
    match values[..] {
        [x, y] => Ok((x, y)),
        _ => Err(format!("expected `X,Y`, got `{}`", s)),
    }
}

fn parse_polygon(s: &str) -> std::result::Result<PolygonArg, String> {
    let (class, rest) = split_class(s)?;
    let vertices = rest
        .split_whitespace()
        .map(|pair| parse_ints(pair, 2).map(|v| (v[0], v[1])))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if vertices.is_empty() {
        return Err(format!("polygon `{}` has no vertices", s));
    }
    Ok(PolygonArg { class, vertices })
}

fn parse_box(s: &str) -> std::result::Result<BoxArg, String> {
    let (class, rest) = split_class(s)?;
    let v = parse_ints(rest, 4)?;
    Ok(BoxArg {
        class,
        x: v[0],
        y: v[1],
        width: v[2],
        height: v[3],
    })
}

fn parse_point(s: &str) -> std::result::Result<PointArg, String> {
    let (class, rest) = split_class(s)?;
    let v = parse_ints(rest, 2)?;
    Ok(PointArg {
        class,
        x: v[0],
        y: v[1],
    })
}

fn parse_normalized_point(s: &str) -> std::result::Result<NormalizedPointArg, String> {
    let (class, rest) = split_class(s)?;
    let (x, y) = parse_floats(rest)?;
    Ok(NormalizedPointArg { class, x, y })
}

fn parse_color(s: &str) -> std::result::Result<ColorArg, String> {
    let (class, rest) = split_class(s)?;
    let rest = rest.trim();
    let color = match rest
        .strip_prefix("0x")
        .or_else(|| rest.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => rest.parse::<u32>(),
    }
    .map_err(|e| format!("invalid color `{}`: {}", rest, e))?;
    Ok(ColorArg { class, color })
}

fn check_format(s: &str) -> std::result::Result<String, String> {
    let supported: Vec<_> = ImageFormat::all()
        .filter(|f| f.writing_enabled())
        .flat_map(|f| f.extensions_str())
        .map(|s| format!("`{}`", s))
        .collect();
    let supported_message = format!("Supported formats: {}", supported.join(", "));

    let format = ImageFormat::from_extension(s)
        .ok_or(format!("{} is not supported. {}", s, supported_message))?;
    if !format.writing_enabled() {
        return Err(format!("{} is not supported. {}", s, supported_message));
    }

    Ok(s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() -> Result<()> {
        SegmentationConfig::default().validate()
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let config = SegmentationConfig {
            similarity_sigma: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SegError::Validation { ref field, .. }) if field == "similarity_sigma"
        ));

        let config = SegmentationConfig {
            max_clusters: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_seed_policy_thresholds() {
        assert!(SeedPolicy::Majority.qualifies(3, 5));
        assert!(!SeedPolicy::Majority.qualifies(2, 4));
        assert!(SeedPolicy::AnyOverlap.qualifies(1, 100));
        assert!(!SeedPolicy::AnyOverlap.qualifies(0, 1));
    }

    #[test]
    fn test_parse_seed_arguments() {
        let polygon = parse_polygon("1:0,0 10,0 10,5").unwrap();
        assert_eq!(polygon.class, ClassRef::Id(1));
        assert_eq!(polygon.vertices, vec![(0, 0), (10, 0), (10, 5)]);

        let b = parse_box("0:2,3,4,5").unwrap();
        assert_eq!((b.x, b.y, b.width, b.height), (2, 3, 4, 5));

        let p = parse_point("2:7,8").unwrap();
        assert_eq!((p.class, p.x, p.y), (ClassRef::Id(2), 7, 8));

        let p = parse_point("sky:7,8").unwrap();
        assert_eq!(p.class, ClassRef::Name("sky".to_string()));

        let p = parse_normalized_point("0:0.25,0.5").unwrap();
        assert_eq!((p.x, p.y), (0.25, 0.5));

        assert!(parse_polygon("0,0 1,1").is_err());
        assert!(parse_box("0:1,2,3").is_err());
        assert!(parse_point("1x:1,2").is_err());
        assert!(parse_point(":1,2").is_err());
        assert!(parse_normalized_point("0:0.5").is_err());
    }

    #[test]
    fn test_parse_class_color() {
        let c = parse_color("1:0xFF0000FF").unwrap();
        assert_eq!((c.class, c.color), (ClassRef::Id(1), 0xFF00_00FF));

        let c = parse_color("road:255").unwrap();
        assert_eq!((c.class, c.color), (ClassRef::Name("road".to_string()), 255));

        assert!(parse_color("1:0xZZ").is_err());
        assert!(parse_color("1:0x1FFFFFFFF").is_err());
    }

    #[test]
    fn test_class_names_resolve_to_ids() -> Result<()> {
        let config = Config::parse_from([
            "polyseg-rs",
            "in.png",
            "--class-name",
            "sky",
            "--class-name",
            "road",
            "--bbox",
            "road:0,0,2,2",
            "--point",
            "sky:3,3",
            "-p",
            "5:0,0 2,0 2,2",
        ]);
        let store = config.polygon_store(8, 8)?;
        assert_eq!(store.polygons()[0].class_id, 5);
        assert_eq!(store.polygons()[1].class_id, 1);
        assert_eq!(store.class_points()[0].class_id, 0);

        let config = Config::parse_from(["polyseg-rs", "in.png", "--point", "grass:1,1"]);
        assert!(matches!(
            config.polygon_store(8, 8),
            Err(SegError::Validation { ref field, .. }) if field == "class"
        ));
        Ok(())
    }

    #[test]
    fn test_class_colors_override_palette() -> Result<()> {
        let defaults = ClassPalette::default();
        let appended = defaults.len() as ClassId;
        let config = Config::parse_from([
            "polyseg-rs".to_string(),
            "in.png".to_string(),
            "--class-name".to_string(),
            "sky".to_string(),
            "--class-color".to_string(),
            format!("{}:0xFF123456", appended),
            "--class-color".to_string(),
            "sky:0xFF00FF00".to_string(),
        ]);
        let palette = config.segmentation_config()?.palette;
        assert_eq!(palette.color(0), Some(0xFF00_FF00));
        assert_eq!(palette.color(1), defaults.color(1));
        assert_eq!(palette.color(appended), Some(0xFF12_3456));

        let config = Config::parse_from([
            "polyseg-rs".to_string(),
            "in.png".to_string(),
            "--class-color".to_string(),
            format!("{}:0xFF000000", appended + 1),
        ]);
        assert!(config.segmentation_config().is_err());
        Ok(())
    }

    #[test]
    fn test_normalized_points_scale_to_image() -> Result<()> {
        let config = Config::parse_from([
            "polyseg-rs",
            "in.png",
            "--normalized-point",
            "1:0.5,0.25",
        ]);
        let store = config.polygon_store(20, 8)?;
        assert_eq!(
            (store.class_points()[0].x, store.class_points()[0].y),
            (10, 2)
        );

        let config = Config::parse_from([
            "polyseg-rs",
            "in.png",
            "--normalized-point",
            "1:1.0,0.25",
        ]);
        assert!(config.polygon_store(20, 8).is_err());
        Ok(())
    }

    #[test]
    fn test_cli_parsing() {
        let config = Config::parse_from([
            "polyseg-rs",
            "in.png",
            "out.bin",
            "-p",
            "0:0,0 4,0 4,4",
            "--bbox",
            "1:5,5,3,3",
            "--point",
            "1:9,9",
            "--mode",
            "simple",
        ]);
        assert_eq!(config.mode, RunMode::Simple);
        assert_eq!(
            config.segmentation_config().unwrap().superpixel_mode,
            SuperpixelMode::PerPixel
        );

        let store = config.polygon_store(16, 16).unwrap();
        assert_eq!(store.polygons().len(), 2);
        assert_eq!(store.class_points().len(), 1);
    }

    #[test]
    fn test_check_format() {
        assert!(check_format("png").is_ok());
        assert!(check_format("nope").is_err());
    }
}
