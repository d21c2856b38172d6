//! Reading and writing rasters as GeoTIFF

mod native;

pub use native::{
    read_band, read_geotiff, read_geotiff_from_buffer, write_band, write_geotiff,
    write_geotiff_to_buffer,
};
