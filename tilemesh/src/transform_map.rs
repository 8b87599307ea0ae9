use crate::error::{ModelError, Result};
use crate::model::{CoordinateTransform, InvertibleCoordinateTransform};
use crate::transform_mesh::{contains, TransformMesh};
use log::{debug, trace};
use std::io::{ErrorKind, Read, Write};

/// Dense per-pixel lookup table of a transformation.
///
/// Every pixel `(x, y)` of a `width × height` raster stores one location
/// `(x', y')` as two `f32`. Pixels the transformation does not cover hold `NaN`.
/// Maps built with [`TransformMap::from_inverse`] or [`TransformMap::from_mesh`]
/// are pull maps: the stored location is where the pixel of the warped image
/// should be sampled in the source image.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformMap {
    width: usize,
    height: usize,
    /// `width * height * 2` values, row-major, `(x', y')` interleaved.
    data: Vec<f32>,
}

impl TransformMap {
    /// Creates a map of the given size with every pixel unmapped.
    pub fn new(width: usize, height: usize) -> Self {
        TransformMap { width, height, data: vec![f32::NAN; width * height * 2] }
    }

    /// Tabulates `transform.apply_inverse` at every pixel.
    ///
    /// # Parameters
    /// - `transform`: Maps source to target; its inverse is sampled.
    /// - `width`, `height`: Size of the target raster.
    ///
    /// # Returns
    /// A map where each target pixel holds its source location, or `NaN` where
    /// the inverse fails.
    pub fn from_inverse<T: InvertibleCoordinateTransform + ?Sized>(
        transform: &T,
        width: usize,
        height: usize,
    ) -> Self {
        let mut map = TransformMap::new(width, height);
        for y in 0..height {
            for x in 0..width {
                if let Ok(p) = transform.apply_inverse([x as f64, y as f64]) {
                    map.set(x, y, p);
                }
            }
        }
        map
    }

    /// Tabulates `transform.apply` at every pixel.
    pub fn from_transform<T: CoordinateTransform + ?Sized>(transform: &T, width: usize, height: usize) -> Self {
        let mut map = TransformMap::new(width, height);
        for y in 0..height {
            for x in 0..width {
                map.set(x, y, transform.apply([x as f64, y as f64]));
            }
        }
        map
    }

    /// Same table as `from_inverse(mesh, ..)`, built by rasterizing each triangle
    /// in target space through its inverse affine instead of searching the
    /// containing triangle per pixel.
    ///
    /// Degenerate triangles cover no pixels and are skipped.
    pub fn from_mesh(mesh: &TransformMesh, width: usize, height: usize) -> Self {
        let mut map = TransformMap::new(width, height);
        if width == 0 || height == 0 {
            return map;
        }
        for (t, triangle) in mesh.triangles().iter().enumerate() {
            let inverse = match triangle.model.create_inverse() {
                Ok(inverse) => inverse,
                Err(e) => {
                    trace!("triangle {} skipped: {}", t, e);
                    continue;
                }
            };
            let corners = triangle.vertices.map(|v| mesh.target(v));
            let min_x = corners.iter().map(|c| c[0]).fold(f64::MAX, f64::min).floor().max(0.0);
            let min_y = corners.iter().map(|c| c[1]).fold(f64::MAX, f64::min).floor().max(0.0);
            let max_x = corners.iter().map(|c| c[0]).fold(f64::MIN, f64::max).ceil().min((width - 1) as f64);
            let max_y = corners.iter().map(|c| c[1]).fold(f64::MIN, f64::max).ceil().min((height - 1) as f64);
            if min_x > max_x || min_y > max_y {
                continue;
            }
            for y in min_y as usize..=max_y as usize {
                for x in min_x as usize..=max_x as usize {
                    let p = [x as f64, y as f64];
                    if contains(corners, p) {
                        map.set(x, y, inverse.apply(p));
                    }
                }
            }
        }
        debug!("rasterized {} triangles into a {}x{} map", mesh.triangles().len(), width, height);
        map
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Location stored at pixel `(x, y)`; `NaN` outside the raster.
    pub fn get(&self, x: usize, y: usize) -> [f32; 2] {
        if x >= self.width || y >= self.height {
            return [f32::NAN; 2];
        }
        let index = (y * self.width + x) * 2;
        [self.data[index], self.data[index + 1]]
    }

    /// Stores `p` at pixel `(x, y)`.
    ///
    /// # Panics
    /// If `(x, y)` lies outside the raster.
    pub fn set(&mut self, x: usize, y: usize, p: [f64; 2]) {
        assert!(x < self.width && y < self.height, "pixel ({}, {}) outside {}x{}", x, y, self.width, self.height);
        let index = (y * self.width + x) * 2;
        self.data[index] = p[0] as f32;
        self.data[index + 1] = p[1] as f32;
    }

    /// Bilinear lookup at a fractional pixel location.
    ///
    /// # Returns
    /// The interpolated location, or `NaN` if `(x, y)` is outside the raster or
    /// any of the four surrounding pixels is unmapped.
    ///
    /// # Examples
    /// ```
    /// # use tilemesh::transform_map::TransformMap;
    /// # use tilemesh::translation_model::TranslationModel;
    /// let map = TransformMap::from_transform(&TranslationModel::new(2.0, 3.0), 4, 3);
    /// assert_eq!(map.map_pixel(1.5, 0.5), [3.5, 3.5]);
    /// assert!(map.map_pixel(-1.0, 0.0)[0].is_nan());
    /// ```
    pub fn map_pixel(&self, x: f64, y: f64) -> [f64; 2] {
        if !(x >= 0.0 && y >= 0.0) || x > (self.width as f64 - 1.0) || y > (self.height as f64 - 1.0) {
            return [f64::NAN; 2];
        }
        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let xr = x - x0 as f64;
        let yr = y - y0 as f64;

        let corners = [self.get(x0, y0), self.get(x1, y0), self.get(x1, y1), self.get(x0, y1)];
        if corners.iter().any(|c| c[0].is_nan() || c[1].is_nan()) {
            return [f64::NAN; 2];
        }
        let [a, b, c, d] = corners.map(|c| [c[0] as f64, c[1] as f64]);
        let mut result = [0.0; 2];
        for k in 0..2 {
            let top = a[k] * (1.0 - xr) + b[k] * xr;
            let bottom = d[k] * (1.0 - xr) + c[k] * xr;
            result[k] = top * (1.0 - yr) + bottom * yr;
        }
        result
    }

    /// Fraction of pixels holding a location, in `[0, 1]`.
    pub fn used_area(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        let used = self.data.chunks_exact(2).filter(|p| !p[0].is_nan() && !p[1].is_nan()).count();
        used as f64 / (self.width * self.height) as f64
    }

    /// Writes the binary map: big-endian `u32` width and height, then `height`
    /// rows of `width` big-endian `f32` pairs.
    ///
    /// # Errors
    /// [`ModelError::InvalidFormat`] if a dimension does not fit in `u32`, or the
    /// writer's I/O error.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let width = u32::try_from(self.width)
            .map_err(|_| ModelError::InvalidFormat(format!("width {} exceeds u32", self.width)))?;
        let height = u32::try_from(self.height)
            .map_err(|_| ModelError::InvalidFormat(format!("height {} exceeds u32", self.height)))?;
        let mut bytes = Vec::with_capacity(8 + self.data.len() * 4);
        bytes.extend_from_slice(&width.to_be_bytes());
        bytes.extend_from_slice(&height.to_be_bytes());
        for &value in &self.data {
            bytes.extend_from_slice(&value.to_be_bytes());
        }
        writer.write_all(&bytes)?;
        Ok(())
    }

    /// Reads a map written by [`TransformMap::write_to`].
    ///
    /// # Errors
    /// [`ModelError::InvalidFormat`] if the header is truncated or the body is
    /// shorter or longer than the header announces.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut header = [0u8; 8];
        reader.read_exact(&mut header).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => ModelError::InvalidFormat("truncated header".to_string()),
            _ => ModelError::Io(e),
        })?;
        let width = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let height = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;

        let mut body = Vec::new();
        reader.read_to_end(&mut body)?;
        let expected = width
            .checked_mul(height)
            .and_then(|n| n.checked_mul(8))
            .ok_or_else(|| ModelError::InvalidFormat(format!("{}x{} map is too large", width, height)))?;
        if body.len() != expected {
            return Err(ModelError::InvalidFormat(format!(
                "{}x{} map needs {} bytes of data, found {}",
                width,
                height,
                expected,
                body.len()
            )));
        }
        let data = body
            .chunks_exact(4)
            .map(|b| f32::from_be_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Ok(TransformMap { width, height, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translation_model::TranslationModel;
    use approx::assert_abs_diff_eq;
    use std::io::Cursor;

    #[test]
    fn inverse_table_pulls_from_the_source() {
        let map = TransformMap::from_inverse(&TranslationModel::new(2.0, 3.0), 5, 4);
        assert_eq!(map.get(4, 3), [2.0, 0.0]);
        assert_eq!(map.get(0, 0), [-2.0, -3.0]);
        assert!(map.get(5, 0)[0].is_nan());
        assert_eq!(map.used_area(), 1.0);
    }

    #[test]
    fn unmapped_corner_poisons_interpolation() {
        let mut map = TransformMap::from_transform(&TranslationModel::new(1.0, 1.0), 3, 3);
        // pixel (1, 1)
        map.data[8] = f32::NAN;
        assert!(map.map_pixel(0.5, 0.5)[0].is_nan());
        assert_eq!(map.map_pixel(2.0, 2.0), [3.0, 3.0]);
        assert_abs_diff_eq!(map.used_area(), 8.0 / 9.0, epsilon = 1e-12);
    }

    #[test]
    fn rasterized_mesh_matches_the_searched_inverse() {
        let mut mesh = TransformMesh::new(2, 2, 10.0, 10.0);
        mesh.init(&TranslationModel::new(1.0, 1.0)).unwrap();
        let fast = TransformMap::from_mesh(&mesh, 12, 12);
        let slow = TransformMap::from_inverse(&mesh, 12, 12);

        assert!(fast.get(0, 0)[0].is_nan());
        assert!(slow.get(0, 0)[0].is_nan());
        for (x, y) in [(5, 5), (1, 1), (11, 11), (3, 9)] {
            let (f, s) = (fast.get(x, y), slow.get(x, y));
            assert_abs_diff_eq!(f[0], x as f32 - 1.0, epsilon = 1e-4);
            assert_abs_diff_eq!(f[1], y as f32 - 1.0, epsilon = 1e-4);
            assert_abs_diff_eq!(f[0], s[0], epsilon = 1e-4);
            assert_abs_diff_eq!(f[1], s[1], epsilon = 1e-4);
        }
        assert_abs_diff_eq!(fast.used_area(), 121.0 / 144.0, epsilon = 1e-12);
    }

    #[test]
    fn binary_layout_is_big_endian() {
        let mut map = TransformMap::new(2, 1);
        map.set(0, 0, [1.0, 2.0]);
        map.set(1, 0, [-0.5, 4.0]);
        let mut bytes = Vec::new();
        map.write_to(&mut bytes).unwrap();

        assert_eq!(bytes.len(), 8 + 16);
        assert_eq!(&bytes[..8], &[0, 0, 0, 2, 0, 0, 0, 1]);
        assert_eq!(&bytes[8..12], &1.0f32.to_be_bytes());
        assert_eq!(&bytes[12..16], &2.0f32.to_be_bytes());

        let read = TransformMap::read_from(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(read, map);
    }

    #[test]
    fn truncated_files_are_rejected() {
        let mut bytes = Vec::new();
        TransformMap::new(3, 2).write_to(&mut bytes).unwrap();

        let err = TransformMap::read_from(&mut Cursor::new(&bytes[..5])).unwrap_err();
        assert!(matches!(err, ModelError::InvalidFormat(_)));
        let err = TransformMap::read_from(&mut Cursor::new(&bytes[..bytes.len() - 1])).unwrap_err();
        assert!(matches!(err, ModelError::InvalidFormat(_)));
    }
}
