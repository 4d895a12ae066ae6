//! Sliced model storage: volumes, layers and parts.
//!
//! The planner consumes layers that have already been decomposed into
//! parts; this module only holds that data and answers simple queries
//! about it.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SlicerError};
use crate::path::Polygons;
use crate::point::{Coord, Point, Point3};

/// One connected printable region within a layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlicePart {
    /// Outline of the part. The first polygon is the outer wall,
    /// the rest are holes.
    pub outline: Polygons,
    /// Infill lines and patterns for this part.
    #[serde(default)]
    pub infill: Polygons,
}

/// A single layer from slicing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SliceLayer {
    /// Z height of the top of this layer (microns).
    pub print_z: Coord,
    /// Parts of this layer.
    #[serde(default)]
    pub parts: Vec<SlicePart>,
}

impl SliceLayer {
    /// Create a new empty layer.
    pub fn new(print_z: Coord) -> Self {
        Self {
            print_z,
            parts: Vec::new(),
        }
    }

    /// All part outlines merged into one region, for travel combing.
    pub fn comb_boundary(&self) -> Polygons {
        let mut boundary = Polygons::new();
        for part in &self.parts {
            for poly in &part.outline {
                boundary.push(poly.clone());
            }
        }
        boundary
    }
}

/// All layers belonging to one mesh volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SliceVolume {
    /// Layers from bottom to top.
    #[serde(default)]
    pub layers: Vec<SliceLayer>,
}

/// The complete sliced model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SliceDataStorage {
    /// Minimum corner of the model bounding box (microns).
    #[serde(default)]
    pub model_min: Point3,
    /// Size of the model bounding box (microns).
    #[serde(default)]
    pub model_size: Point3,
    /// Mesh volumes.
    #[serde(default)]
    pub volumes: Vec<SliceVolume>,
}

impl SliceDataStorage {
    /// Number of layers of the tallest volume.
    pub fn layer_count(&self) -> usize {
        self.volumes.iter().map(|v| v.layers.len()).max().unwrap_or(0)
    }

    /// Highest print Z of any layer.
    pub fn max_print_z(&self) -> Coord {
        self.volumes
            .iter()
            .flat_map(|v| v.layers.iter())
            .map(|l| l.print_z)
            .max()
            .unwrap_or(0)
    }

    /// Recompute `model_min` and `model_size` from the stored outlines.
    pub fn update_bounds(&mut self) {
        let mut min = Point::new(Coord::MAX, Coord::MAX);
        let mut max = Point::new(Coord::MIN, Coord::MIN);
        let mut any = false;
        for layer in self.volumes.iter().flat_map(|v| v.layers.iter()) {
            for p in layer
                .parts
                .iter()
                .flat_map(|part| part.outline.iter())
                .flat_map(|poly| poly.points.iter())
            {
                min = Point::new(min.x.min(p.x), min.y.min(p.y));
                max = Point::new(max.x.max(p.x), max.y.max(p.y));
                any = true;
            }
        }
        if !any {
            return;
        }
        self.model_min = Point3::new(min.x, min.y, 0);
        self.model_size = Point3::new(max.x - min.x, max.y - min.y, self.max_print_z());
    }

    /// Check that every layer is usable by the planner.
    pub fn validate(&self) -> Result<()> {
        for (volume_idx, volume) in self.volumes.iter().enumerate() {
            let mut last_z = Coord::MIN;
            for (layer_idx, layer) in volume.layers.iter().enumerate() {
                if layer.print_z <= last_z {
                    return Err(SlicerError::InvalidSettings(format!(
                        "volume {volume_idx} layer {layer_idx}: print_z must increase"
                    )));
                }
                last_z = layer.print_z;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::Polygon;

    fn square_part(min: Coord, max: Coord) -> SlicePart {
        SlicePart {
            outline: Polygons::from(vec![Polygon::new(vec![
                Point::new(min, min),
                Point::new(max, min),
                Point::new(max, max),
                Point::new(min, max),
            ])]),
            infill: Polygons::new(),
        }
    }

    #[test]
    fn test_bounds() {
        let mut layer = SliceLayer::new(300);
        layer.parts.push(square_part(1000, 5000));
        layer.parts.push(square_part(7000, 9000));
        let mut storage = SliceDataStorage {
            volumes: vec![SliceVolume { layers: vec![layer] }],
            ..Default::default()
        };
        storage.update_bounds();
        assert_eq!(storage.model_min, Point3::new(1000, 1000, 0));
        assert_eq!(storage.model_size, Point3::new(8000, 8000, 300));
        assert_eq!(storage.layer_count(), 1);
        assert!(storage.validate().is_ok());
    }

    #[test]
    fn test_comb_boundary_merges_parts() {
        let mut layer = SliceLayer::new(200);
        layer.parts.push(square_part(0, 10));
        layer.parts.push(square_part(20, 30));
        assert_eq!(layer.comb_boundary().len(), 2);
    }

    #[test]
    fn test_validate_rejects_unordered_layers() {
        let storage = SliceDataStorage {
            volumes: vec![SliceVolume {
                layers: vec![SliceLayer::new(400), SliceLayer::new(200)],
            }],
            ..Default::default()
        };
        assert!(storage.validate().is_err());
    }
}
