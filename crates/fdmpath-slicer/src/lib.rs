#![warn(missing_docs)]

//! Layer geometry for the fdmpath toolpath planner.
//!
//! This crate holds everything the planner needs to know about a sliced
//! model without knowing anything about G-code: integer-micron points and
//! polygons, the sliced layer storage, and the collaborators the planner
//! consults while ordering and routing moves.
//!
//! # Example
//!
//! ```
//! use fdmpath_slicer::{BoundaryRouter, Comb, Point, Polygon, Polygons};
//!
//! let outline = Polygon::new(vec![
//!     Point::new(0, 0),
//!     Point::new(20_000, 0),
//!     Point::new(20_000, 20_000),
//!     Point::new(0, 20_000),
//! ]);
//! let comb = Comb::new(Polygons::from(vec![outline]));
//! let route = comb.route(Point::new(1000, 1000), Point::new(19_000, 19_000));
//! assert_eq!(route, Some(Vec::new()));
//! ```

pub mod comb;
pub mod error;
pub mod fill_tree;
pub mod order;
pub mod path;
pub mod point;
pub mod slice;
pub mod time_estimate;

pub use comb::{BoundaryRouter, Comb};
pub use error::{Result, SlicerError};
pub use fill_tree::SpaceFillingTree;
pub use order::{end_vertex, NearestVertexOptimizer, PartOrderOptimizer};
pub use path::{Polygon, Polygons};
pub use point::{int2mm, mm2int, Coord, Point, Point3, PointMatrix};
pub use slice::{SliceDataStorage, SliceLayer, SlicePart, SliceVolume};
pub use time_estimate::{MotionLimits, TimeEstimator, TrapezoidTimeEstimator};
