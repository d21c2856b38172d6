//! GeoTIFF reading/writing with the `tiff` crate
//!
//! Each band is stored as its own 64-bit float page, named through the
//! `ImageDescription` tag. Georeferencing uses ModelPixelScale/ModelTiepoint
//! for north-up grids and ModelTransformation otherwise; the CRS is stored as
//! an EPSG code in the GeoKey directory.

use crate::crs::{CrsKind, CRS};
use crate::error::{Error, Result};
use crate::raster::{GeoTransform, MultiBandRaster, Raster};
use ndarray::{Array2, Array3, Axis};
use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::colortype::Gray64Float;
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;
use tracing::warn;

const MODEL_PIXEL_SCALE: Tag = Tag::ModelPixelScaleTag;
const MODEL_TIEPOINT: Tag = Tag::ModelTiepointTag;
const MODEL_TRANSFORMATION: Tag = Tag::ModelTransformationTag;
const GEO_KEY_DIRECTORY: Tag = Tag::GeoKeyDirectoryTag;

const GT_MODEL_TYPE: u16 = 1024;
const GT_RASTER_TYPE: u16 = 1025;
const GEOGRAPHIC_TYPE: u16 = 2048;
const PROJECTED_CS_TYPE: u16 = 3072;

/// Read a (possibly multi-page) GeoTIFF file into a MultiBandRaster
pub fn read_geotiff<P: AsRef<Path>>(path: P) -> Result<MultiBandRaster> {
    let file = File::open(path.as_ref())?;
    decode_geotiff(BufReader::new(file))
}

/// Read a GeoTIFF from an in-memory buffer
pub fn read_geotiff_from_buffer(data: &[u8]) -> Result<MultiBandRaster> {
    decode_geotiff(Cursor::new(data))
}

/// Read a single band GeoTIFF (the first page) as a Raster
pub fn read_band<P: AsRef<Path>>(path: P) -> Result<Raster> {
    let raster = read_geotiff(path)?;
    let name = raster
        .band_names()
        .first()
        .cloned()
        .ok_or_else(|| Error::Other("GeoTIFF contains no image".into()))?;
    raster
        .band_raster(&name)
        .ok_or_else(|| Error::Other(format!("band '{}' not found", name)))
}

/// Write a MultiBandRaster to a GeoTIFF file
pub fn write_geotiff<P: AsRef<Path>>(raster: &MultiBandRaster, path: P) -> Result<()> {
    let file = File::create(path.as_ref())?;
    encode_geotiff(raster, BufWriter::new(file))
}

/// Write a MultiBandRaster to an in-memory GeoTIFF buffer
pub fn write_geotiff_to_buffer(raster: &MultiBandRaster) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    encode_geotiff(raster, Cursor::new(&mut buf))?;
    Ok(buf)
}

/// Write a single-band Raster under the given band name
pub fn write_band<P: AsRef<Path>>(raster: &Raster, name: &str, path: P) -> Result<()> {
    let stack = MultiBandRaster::from_bands(vec![(name.to_string(), raster.clone())])?;
    write_geotiff(&stack, path)
}

fn tiff_err(context: &str) -> impl Fn(tiff::TiffError) -> Error + '_ {
    move |e| Error::Other(format!("{}: {}", context, e))
}

fn decode_geotiff<R>(reader: R) -> Result<MultiBandRaster>
where
    R: std::io::Read + std::io::Seek,
{
    let mut decoder = Decoder::new(reader).map_err(tiff_err("TIFF decode error"))?;

    let mut pages: Vec<Array2<f64>> = Vec::new();
    let mut names = Vec::new();
    let mut transform = GeoTransform::default();
    let mut crs = None;

    loop {
        let (width, height) = decoder
            .dimensions()
            .map_err(tiff_err("Cannot read dimensions"))?;
        let (rows, cols) = (height as usize, width as usize);

        if let Some(first) = pages.first() {
            if first.dim() != (rows, cols) {
                return Err(Error::SizeMismatch {
                    er: first.nrows(),
                    ec: first.ncols(),
                    ar: rows,
                    ac: cols,
                });
            }
        } else {
            match read_geotransform(&mut decoder)? {
                Some(gt) => transform = gt,
                None => warn!("GeoTIFF has no georeferencing tags, using identity transform"),
            }
            crs = read_crs(&mut decoder)?;
            if crs.is_none() {
                warn!("GeoTIFF has no EPSG code in its GeoKey directory");
            }
        }

        let name = decoder
            .get_tag_ascii_string(Tag::ImageDescription)
            .ok()
            .map(|s| s.trim_end_matches('\0').to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("band_{}", pages.len() + 1));

        let result = decoder
            .read_image()
            .map_err(tiff_err("Cannot read image data"))?;
        let data = decoding_result_to_f64(result)?;

        if data.len() != rows * cols {
            return Err(Error::InvalidDimensions {
                width: cols,
                height: rows,
            });
        }

        pages.push(
            Array2::from_shape_vec((rows, cols), data).map_err(|e| Error::Other(e.to_string()))?,
        );
        names.push(name);

        if !decoder.more_images() {
            break;
        }
        decoder.next_image().map_err(tiff_err("Cannot advance page"))?;
    }

    let views: Vec<_> = pages.iter().map(|p| p.view()).collect();
    let data: Array3<f64> =
        ndarray::stack(Axis(0), &views).map_err(|e| Error::Other(e.to_string()))?;

    MultiBandRaster::new(names, data, transform, crs)
}

macro_rules! widen {
    ($buf:expr) => {
        $buf.into_iter().map(|v| v as f64).collect()
    };
}

fn decoding_result_to_f64(result: DecodingResult) -> Result<Vec<f64>> {
    let data = match result {
        DecodingResult::F64(buf) => buf,
        DecodingResult::F32(buf) => widen!(buf),
        DecodingResult::U8(buf) => widen!(buf),
        DecodingResult::U16(buf) => widen!(buf),
        DecodingResult::U32(buf) => widen!(buf),
        DecodingResult::I8(buf) => widen!(buf),
        DecodingResult::I16(buf) => widen!(buf),
        DecodingResult::I32(buf) => widen!(buf),
        _ => return Err(Error::UnsupportedDataType("Unsupported TIFF pixel format".to_string())),
    };
    Ok(data)
}

fn find_tag<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
    tag: Tag,
) -> Result<Option<tiff::decoder::ifd::Value>> {
    decoder.find_tag(tag).map_err(tiff_err("Cannot read tag"))
}

/// `Ok(None)` when the page carries no georeferencing tags
fn read_geotransform<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
) -> Result<Option<GeoTransform>> {
    if let Some(value) = find_tag(decoder, MODEL_TRANSFORMATION)? {
        let m = value.into_f64_vec().map_err(tiff_err("Bad transformation tag"))?;
        if m.len() < 8 {
            return Err(Error::Other(format!(
                "transformation tag has {} values, expected 16",
                m.len()
            )));
        }
        return Ok(Some(GeoTransform::from_gdal([m[3], m[0], m[1], m[7], m[4], m[5]])));
    }

    let scale = find_tag(decoder, MODEL_PIXEL_SCALE)?;
    let tiepoint = find_tag(decoder, MODEL_TIEPOINT)?;
    let (scale, tiepoint) = match (scale, tiepoint) {
        (None, None) => return Ok(None),
        (Some(s), Some(t)) => (
            s.into_f64_vec().map_err(tiff_err("Bad pixel scale tag"))?,
            t.into_f64_vec().map_err(tiff_err("Bad tiepoint tag"))?,
        ),
        _ => return Err(Error::Other("pixel scale and tiepoint tags must appear together".into())),
    };

    if scale.len() < 2 || tiepoint.len() < 6 {
        return Err(Error::Other("Cannot determine geotransform".into()));
    }
    // tiepoint: [I, J, K, X, Y, Z], scale: [ScaleX, ScaleY, ScaleZ]
    let origin_x = tiepoint[3] - tiepoint[0] * scale[0];
    let origin_y = tiepoint[4] + tiepoint[1] * scale[1];
    Ok(Some(GeoTransform::new(origin_x, origin_y, scale[0], -scale[1])))
}

fn read_crs<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>) -> Result<Option<CRS>> {
    let keys = match find_tag(decoder, GEO_KEY_DIRECTORY)? {
        Some(value) => value.into_u16_vec().map_err(tiff_err("Bad GeoKey directory"))?,
        None => return Ok(None),
    };
    let Some(&count) = keys.get(3) else {
        return Ok(None);
    };

    // Entries after the 4-short header: [key, location, count, value]
    let mut geographic = None;
    for entry in keys[4..].chunks_exact(4).take(count as usize) {
        if entry[1] != 0 {
            continue;
        }
        match entry[0] {
            PROJECTED_CS_TYPE => return Ok(Some(CRS::from_epsg(entry[3] as u32))),
            GEOGRAPHIC_TYPE => geographic = Some(CRS::from_epsg(entry[3] as u32)),
            _ => {}
        }
    }
    Ok(geographic)
}

fn geo_keys(crs: Option<&CRS>) -> Vec<u16> {
    // GTRasterTypeGeoKey = RasterPixelIsArea
    let mut entries: Vec<[u16; 4]> = vec![[GT_RASTER_TYPE, 0, 1, 1]];

    if let Some(code) = crs.and_then(CRS::epsg).and_then(|c| u16::try_from(c).ok()) {
        let geographic = matches!(crs.and_then(CRS::kind), Some(CrsKind::Geographic));
        if geographic {
            entries.push([GT_MODEL_TYPE, 0, 1, 2]);
            entries.push([GEOGRAPHIC_TYPE, 0, 1, code]);
        } else {
            entries.push([GT_MODEL_TYPE, 0, 1, 1]);
            entries.push([PROJECTED_CS_TYPE, 0, 1, code]);
        }
    }
    entries.sort_by_key(|e| e[0]);

    let mut keys = vec![1, 1, 0, entries.len() as u16];
    keys.extend(entries.into_iter().flatten());
    keys
}

fn encode_geotiff<W>(raster: &MultiBandRaster, writer: W) -> Result<()>
where
    W: std::io::Write + std::io::Seek,
{
    if raster.band_count() == 0 {
        return Err(Error::Other("cannot write a raster with zero bands".into()));
    }

    let mut encoder = TiffEncoder::new(writer).map_err(tiff_err("TIFF encoder error"))?;
    let (rows, cols) = raster.shape();
    let gt = raster.transform();
    let keys = geo_keys(raster.crs());

    for (name, band) in raster.bands() {
        let data: Vec<f64> = band.iter().copied().collect();

        let mut image = encoder
            .new_image::<Gray64Float>(cols as u32, rows as u32)
            .map_err(tiff_err("Cannot create TIFF image"))?;

        image
            .encoder()
            .write_tag(Tag::ImageDescription, name)
            .map_err(tiff_err("Cannot write band name"))?;

        if gt.is_north_up() {
            let scale = [gt.pixel_width, -gt.pixel_height, 0.0];
            image
                .encoder()
                .write_tag(MODEL_PIXEL_SCALE, &scale[..])
                .map_err(tiff_err("Cannot write scale tag"))?;

            let tiepoint = [0.0, 0.0, 0.0, gt.origin_x, gt.origin_y, 0.0];
            image
                .encoder()
                .write_tag(MODEL_TIEPOINT, &tiepoint[..])
                .map_err(tiff_err("Cannot write tiepoint tag"))?;
        } else {
            let matrix = [
                gt.pixel_width, gt.row_rotation, 0.0, gt.origin_x,
                gt.col_rotation, gt.pixel_height, 0.0, gt.origin_y,
                0.0, 0.0, 0.0, 0.0,
                0.0, 0.0, 0.0, 1.0,
            ];
            image
                .encoder()
                .write_tag(MODEL_TRANSFORMATION, &matrix[..])
                .map_err(tiff_err("Cannot write transformation tag"))?;
        }

        image
            .encoder()
            .write_tag(GEO_KEY_DIRECTORY, keys.as_slice())
            .map_err(tiff_err("Cannot write geokey tag"))?;

        image
            .write_data(&data)
            .map_err(tiff_err("Cannot write image data"))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_raster(transform: GeoTransform, crs: Option<CRS>) -> MultiBandRaster {
        let mut data = Array3::zeros((3, 4, 5));
        for ((b, r, c), v) in data.indexed_iter_mut() {
            *v = b as f64 * 100.0 + r as f64 * 10.0 + c as f64 + 0.125;
        }
        data[(1, 2, 3)] = f64::NAN;
        MultiBandRaster::new(
            vec!["B2".into(), "B4".into(), "B8".into()],
            data,
            transform,
            crs,
        )
        .unwrap()
    }

    fn assert_same(a: &MultiBandRaster, b: &MultiBandRaster) {
        assert_eq!(a.band_names(), b.band_names());
        assert_eq!(a.shape(), b.shape());
        assert_eq!(a.transform(), b.transform());
        assert_eq!(a.crs(), b.crs());
        for (x, y) in a.data().iter().zip(b.data().iter()) {
            assert!(x == y || (x.is_nan() && y.is_nan()), "{x} != {y}");
        }
    }

    #[test]
    fn test_buffer_roundtrip_projected() {
        let raster = sample_raster(
            GeoTransform::new(500_000.0, 4_650_000.0, 10.0, -20.0),
            Some(CRS::utm(33, true)),
        );
        let buf = write_geotiff_to_buffer(&raster).unwrap();
        let back = read_geotiff_from_buffer(&buf).unwrap();
        assert_same(&raster, &back);
    }

    #[test]
    fn test_buffer_roundtrip_geographic() {
        let raster = sample_raster(GeoTransform::new(12.0, 46.0, 0.001, -0.001), Some(CRS::wgs84()));
        let back = read_geotiff_from_buffer(&write_geotiff_to_buffer(&raster).unwrap()).unwrap();
        assert_same(&raster, &back);
    }

    #[test]
    fn test_file_roundtrip_rotated() {
        let mut gt = GeoTransform::new(100.0, 200.0, 2.0, -2.0);
        gt.row_rotation = 0.5;
        let raster = sample_raster(gt, None);

        let tmp = tempfile::NamedTempFile::new().unwrap();
        write_geotiff(&raster, tmp.path()).unwrap();
        let back = read_geotiff(tmp.path()).unwrap();
        assert_same(&raster, &back);
    }

    #[test]
    fn test_geotiff_tags_written() {
        let raster = sample_raster(
            GeoTransform::new(500_000.0, 4_650_000.0, 10.0, -20.0),
            Some(CRS::utm(33, true)),
        );
        let buf = write_geotiff_to_buffer(&raster).unwrap();
        let mut decoder = Decoder::new(Cursor::new(buf)).unwrap();
        assert_eq!(
            decoder.get_tag_f64_vec(Tag::ModelPixelScaleTag).unwrap(),
            vec![10.0, 20.0, 0.0]
        );
        let tiepoint = decoder.get_tag_f64_vec(Tag::ModelTiepointTag).unwrap();
        assert_eq!((tiepoint[3], tiepoint[4]), (500_000.0, 4_650_000.0));
        let keys = decoder.get_tag_u16_vec(Tag::GeoKeyDirectoryTag).unwrap();
        assert!(keys.chunks_exact(4).any(|e| e == [PROJECTED_CS_TYPE, 0, 1, 32633]));
    }

    #[test]
    fn test_plain_tiff_without_georeferencing() {
        let mut buf = Vec::new();
        {
            let mut encoder = TiffEncoder::new(Cursor::new(&mut buf)).unwrap();
            encoder
                .write_image::<Gray64Float>(2, 2, &[1.0, 2.0, 3.0, 4.0])
                .unwrap();
        }
        let back = read_geotiff_from_buffer(&buf).unwrap();
        assert_eq!(back.transform(), &GeoTransform::default());
        assert_eq!(back.crs(), None);
        assert_eq!(back.band_names(), &["band_1".to_string()]);
    }

    #[test]
    fn test_single_band_helpers() {
        let mut band = Raster::filled(3, 3, 150.0);
        band.set_transform(GeoTransform::new(0.0, 30.0, 10.0, -10.0));
        band.set_crs(Some(CRS::utm(18, false)));

        let tmp = tempfile::NamedTempFile::new().unwrap();
        write_band(&band, "Biomass", tmp.path()).unwrap();
        let back = read_band(tmp.path()).unwrap();
        assert_eq!(back.get(2, 2).unwrap(), 150.0);
        assert_eq!(back.crs(), Some(&CRS::utm(18, false)));
        assert_eq!(read_geotiff(tmp.path()).unwrap().band_names(), &["Biomass".to_string()]);
    }
}
