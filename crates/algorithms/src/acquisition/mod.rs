//! Boundary collaborators: imagery and field plot suppliers

mod plots;
mod supplier;

pub use plots::PlotTable;
pub use supplier::{AcquisitionRequest, BBox, GeoTiffDirectorySupplier, ImagerySupplier};
