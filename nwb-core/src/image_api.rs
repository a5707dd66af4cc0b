//! Conversion between stored images and comparable pixel arrays
//!
//! Stored images (`GrayscaleImage`) carry a container name and a flat pixel
//! buffer. `deserialize` drops the name and reshapes the pixels so two images
//! compare by content alone.

use ndarray::Array2;

use crate::document::GrayscaleImage;
use crate::error::{NwbError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub data: Array2<f32>,
    pub spacing: [f64; 2],
    pub unit: String,
}

pub fn deserialize(image: &GrayscaleImage) -> Result<Image> {
    let [rows, cols] = image.shape;
    let data = Array2::from_shape_vec((rows, cols), image.pixels.clone()).map_err(|e| {
        NwbError::schema(format!(
            "image '{}' pixels do not fit shape {:?}: {}",
            image.name, image.shape, e
        ))
    })?;
    Ok(Image {
        data,
        spacing: image.spacing,
        unit: image.unit.clone(),
    })
}

pub fn serialize(image: &Image, name: impl Into<String>) -> GrayscaleImage {
    let (rows, cols) = image.data.dim();
    GrayscaleImage {
        name: name.into(),
        pixels: image.data.iter().copied().collect(),
        shape: [rows, cols],
        spacing: image.spacing,
        unit: image.unit.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_deserialize_ignores_name() {
        let image = Image {
            data: array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]],
            spacing: [0.78, 0.78],
            unit: "mm".to_string(),
        };
        let a = serialize(&image, "max_projection");
        let b = serialize(&image, "something_else");
        assert_ne!(a, b);
        assert_eq!(deserialize(&a).unwrap(), deserialize(&b).unwrap());
        assert_eq!(deserialize(&a).unwrap(), image);
    }

    #[test]
    fn test_deserialize_rejects_bad_shape() {
        let stored = GrayscaleImage {
            name: "broken".to_string(),
            pixels: vec![0.0; 5],
            shape: [2, 3],
            spacing: [1.0, 1.0],
            unit: "mm".to_string(),
        };
        assert!(matches!(deserialize(&stored), Err(NwbError::Schema(_))));
    }
}
