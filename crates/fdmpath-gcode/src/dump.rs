//! Plain-text diagnostic dumps of parts, part entry/exit points and part
//! order, for offline inspection of the planner's choices.
//!
//! Every writer is constructed explicitly, written to layer by layer and
//! closed with `close()`, which flushes and hands back the sink.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use fdmpath_slicer::{Point, Point3, SliceDataStorage};

use crate::error::Result;
use crate::planner::PartPointsMap;

/// File name used by [`PartsWriter::create`].
pub const PARTS_FILE_NAME: &str = "parts_by_layers.txt";
/// File name used by [`PointPairsWriter::create`].
pub const POINT_PAIRS_FILE_NAME: &str = "parts_points_pairs.txt";
/// File name used by [`PartsOrderWriter::create`].
pub const PARTS_ORDER_FILE_NAME: &str = "parts_order.txt";

/// Coordinate frame of dumped points.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CoordinateFrame {
    /// Coordinates as stored.
    #[default]
    Raw,
    /// Coordinates relative to the model's minimum corner.
    ModelRelative(Point3),
}

impl CoordinateFrame {
    fn map(&self, p: Point) -> Point {
        match self {
            CoordinateFrame::Raw => p,
            CoordinateFrame::ModelRelative(min) => p - min.xy(),
        }
    }
}

fn create_file(dir: &Path, name: &str) -> Result<BufWriter<File>> {
    Ok(BufWriter::new(File::create(dir.join(name))?))
}

/// Writes every part outline of a sliced model.
pub struct PartsWriter<W: Write> {
    out: W,
    frame: CoordinateFrame,
}

impl PartsWriter<BufWriter<File>> {
    /// Create `parts_by_layers.txt` in `dir`.
    pub fn create(dir: &Path, frame: CoordinateFrame) -> Result<Self> {
        Ok(Self::new(create_file(dir, PARTS_FILE_NAME)?, frame))
    }
}

impl<W: Write> PartsWriter<W> {
    /// Write to `out`.
    pub fn new(out: W, frame: CoordinateFrame) -> Self {
        Self { out, frame }
    }

    /// Dump all outlines, grouped by volume, layer and part.
    pub fn write_storage(&mut self, storage: &SliceDataStorage) -> Result<()> {
        writeln!(
            self.out,
            "model size:{} {}",
            storage.model_size.x, storage.model_size.y
        )?;
        for (volume_idx, volume) in storage.volumes.iter().enumerate() {
            writeln!(self.out, "volume index:{volume_idx}")?;
            for (layer_nr, layer) in volume.layers.iter().enumerate() {
                writeln!(self.out, "layer index:{layer_nr}")?;
                for (part_nr, part) in layer.parts.iter().enumerate() {
                    writeln!(self.out, "part index:{part_nr}")?;
                    // The first outline is the outer wall.
                    for (outline_nr, outline) in part.outline.iter().enumerate() {
                        writeln!(self.out, "outline index:{outline_nr}")?;
                        for &p in &outline.points {
                            let p = self.frame.map(p);
                            write!(self.out, "{} {} ", p.x, p.y)?;
                        }
                        writeln!(self.out)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Flush and return the sink.
    pub fn close(mut self) -> Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}

/// Writes the entry and exit point of every printed part.
pub struct PointPairsWriter<W: Write> {
    out: W,
    frame: CoordinateFrame,
}

impl PointPairsWriter<BufWriter<File>> {
    /// Create `parts_points_pairs.txt` in `dir`.
    pub fn create(dir: &Path, frame: CoordinateFrame) -> Result<Self> {
        Ok(Self::new(create_file(dir, POINT_PAIRS_FILE_NAME)?, frame))
    }
}

impl<W: Write> PointPairsWriter<W> {
    /// Write to `out`.
    pub fn new(out: W, frame: CoordinateFrame) -> Self {
        Self { out, frame }
    }

    /// Start a volume.
    pub fn write_volume_index(&mut self, volume_idx: usize) -> Result<()> {
        writeln!(self.out, "volume index:{volume_idx}")?;
        Ok(())
    }

    /// Start a layer.
    pub fn write_layer_index(&mut self, layer_nr: usize) -> Result<()> {
        writeln!(self.out, "layer index:{layer_nr}")?;
        Ok(())
    }

    /// Dump one layer's part entry/exit points in part index order.
    pub fn write_point_pairs(&mut self, pairs: &PartPointsMap) -> Result<()> {
        for (part, &(entry, exit)) in pairs {
            let entry = self.frame.map(entry);
            let exit = self.frame.map(exit);
            writeln!(self.out, "part index:{part}")?;
            writeln!(self.out, "{} {} {} {}", entry.x, entry.y, exit.x, exit.y)?;
        }
        Ok(())
    }

    /// Flush and return the sink.
    pub fn close(mut self) -> Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}

/// Writes the order in which parts were printed on each layer.
pub struct PartsOrderWriter<W: Write> {
    out: W,
}

impl PartsOrderWriter<BufWriter<File>> {
    /// Create `parts_order.txt` in `dir`.
    pub fn create(dir: &Path) -> Result<Self> {
        Ok(Self::new(create_file(dir, PARTS_ORDER_FILE_NAME)?))
    }
}

impl<W: Write> PartsOrderWriter<W> {
    /// Write to `out`.
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Start a volume.
    pub fn write_volume_index(&mut self, volume_idx: usize) -> Result<()> {
        writeln!(self.out, "volume index:{volume_idx}")?;
        Ok(())
    }

    /// Dump the part order of one layer.
    pub fn write_parts_order(&mut self, layer_nr: usize, order: &[usize]) -> Result<()> {
        writeln!(self.out, "layer index:{layer_nr}")?;
        let order: Vec<String> = order.iter().map(usize::to_string).collect();
        writeln!(self.out, "{}", order.join(" "))?;
        Ok(())
    }

    /// Flush and return the sink.
    pub fn close(mut self) -> Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fdmpath_slicer::{Polygon, Polygons, SliceLayer, SlicePart, SliceVolume};

    fn storage() -> SliceDataStorage {
        let mut layer = SliceLayer::new(200);
        layer.parts.push(SlicePart {
            outline: Polygons::from(vec![Polygon::new(vec![
                Point::new(1000, 2000),
                Point::new(3000, 2000),
                Point::new(3000, 4000),
            ])]),
            infill: Polygons::new(),
        });
        SliceDataStorage {
            model_min: Point3::new(1000, 2000, 0),
            model_size: Point3::new(2000, 2000, 200),
            volumes: vec![SliceVolume { layers: vec![layer] }],
        }
    }

    #[test]
    fn test_parts_raw_and_relative() {
        let storage = storage();

        let mut raw = PartsWriter::new(Vec::new(), CoordinateFrame::Raw);
        raw.write_storage(&storage).unwrap();
        let raw = String::from_utf8(raw.close().unwrap()).unwrap();
        assert_eq!(
            raw,
            "model size:2000 2000\nvolume index:0\nlayer index:0\npart index:0\n\
             outline index:0\n1000 2000 3000 2000 3000 4000 \n"
        );

        let mut relative = PartsWriter::new(Vec::new(), CoordinateFrame::ModelRelative(storage.model_min));
        relative.write_storage(&storage).unwrap();
        let relative = String::from_utf8(relative.close().unwrap()).unwrap();
        assert!(relative.ends_with("outline index:0\n0 0 2000 0 2000 2000 \n"));
    }

    #[test]
    fn test_point_pairs() {
        let mut pairs = PartPointsMap::new();
        pairs.insert(1, (Point::new(1500, 2500), Point::new(1600, 2600)));
        pairs.insert(0, (Point::new(1000, 2000), Point::new(1000, 2000)));

        let mut writer = PointPairsWriter::new(Vec::new(), CoordinateFrame::ModelRelative(Point3::new(1000, 2000, 0)));
        writer.write_volume_index(0).unwrap();
        writer.write_layer_index(3).unwrap();
        writer.write_point_pairs(&pairs).unwrap();
        let out = String::from_utf8(writer.close().unwrap()).unwrap();
        assert_eq!(
            out,
            "volume index:0\nlayer index:3\npart index:0\n0 0 0 0\npart index:1\n500 500 600 600\n"
        );
    }

    #[test]
    fn test_files_in_directory() {
        let dir = tempfile::tempdir().unwrap();

        let mut order = PartsOrderWriter::create(dir.path()).unwrap();
        order.write_volume_index(0).unwrap();
        order.write_parts_order(0, &[2, 0, 1]).unwrap();
        order.close().unwrap();

        let mut parts = PartsWriter::create(dir.path(), CoordinateFrame::Raw).unwrap();
        parts.write_storage(&storage()).unwrap();
        parts.close().unwrap();

        let pairs = PointPairsWriter::create(dir.path(), CoordinateFrame::Raw).unwrap();
        pairs.close().unwrap();

        let order = std::fs::read_to_string(dir.path().join(PARTS_ORDER_FILE_NAME)).unwrap();
        assert_eq!(order, "volume index:0\nlayer index:0\n2 0 1\n");
        assert!(dir.path().join(PARTS_FILE_NAME).exists());
        assert!(dir.path().join(POINT_PAIRS_FILE_NAME).exists());
    }
}
