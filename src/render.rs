//! Mask overlay and output encoding.

use std::io::Cursor;

use image::{imageops, imageops::FilterType, DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use ndarray::ArrayView2;

use crate::errors::{Result, SegError};

/// Distinct colours for class ids 1.., cycled when there are more classes.
const PALETTE: [[u8; 3]; 14] = [
    [230, 25, 75],
    [60, 180, 75],
    [255, 225, 25],
    [0, 130, 200],
    [245, 130, 48],
    [145, 30, 180],
    [70, 240, 240],
    [240, 50, 230],
    [210, 245, 60],
    [250, 190, 212],
    [0, 128, 128],
    [220, 190, 255],
    [170, 110, 40],
    [128, 0, 0],
];

pub fn class_color(class_id: u32) -> Rgb<u8> {
    if class_id == 0 {
        return Rgb([0, 0, 0]);
    }
    Rgb(PALETTE[(class_id as usize - 1) % PALETTE.len()])
}

/// Blend the colour of every accepted class over the image.
///
/// `labels` is `[height, width]` and must match the image; pixels whose label
/// is not in `accepted` keep their original colour.
pub fn overlay_mask(
    image: &RgbImage,
    labels: ArrayView2<u32>,
    accepted: &[u32],
    alpha: f32,
) -> Result<RgbaImage> {
    let (width, height) = image.dimensions();
    if labels.dim() != (height as usize, width as usize) {
        return Err(SegError::validation(
            "mask",
            format!(
                "size {}x{} does not match image {}x{}",
                labels.dim().1,
                labels.dim().0,
                width,
                height
            ),
        ));
    }

    let blend = |c: u8, m: u8| -> u8 {
        (f32::from(c) * (1.0 - alpha) + f32::from(m) * alpha)
            .round()
            .clamp(0.0, 255.0) as u8
    };

    Ok(RgbaImage::from_fn(width, height, |x, y| {
        let Rgb([red, green, blue]) = *image.get_pixel(x, y);
        let label = labels[[y as usize, x as usize]];
        if accepted.contains(&label) {
            let Rgb([mr, mg, mb]) = class_color(label);
            Rgba([blend(red, mr), blend(green, mg), blend(blue, mb), 255])
        } else {
            Rgba([red, green, blue, 255])
        }
    }))
}

pub fn resize_for_display(image: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    imageops::resize(image, width, height, FilterType::Lanczos3)
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    encode(&DynamicImage::ImageRgba8(image.clone()), ImageFormat::Png)
}

pub fn encode(image: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    // jpeg has no alpha channel
    let image = if format == ImageFormat::Jpeg {
        DynamicImage::ImageRgb8(image.to_rgb8())
    } else {
        image.clone()
    };
    image
        .write_to(&mut buffer, format)
        .map_err(|e| SegError::Encoding {
            format: format!("{:?}", format),
            source: e,
        })?;
    Ok(buffer.into_inner())
}

/// Decode an uploaded image, guessing the format from its bytes.
pub fn decode(bytes: &[u8], name: &str) -> Result<RgbImage> {
    let image = image::load_from_memory(bytes).map_err(|e| SegError::ImageProcessing {
        path: name.to_string(),
        operation: "decode upload".to_string(),
        source: Box::new(e),
    })?;
    Ok(image.to_rgb8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_overlay_only_touches_accepted_labels() -> Result<()> {
        let image = RgbImage::from_pixel(4, 2, Rgb([100, 100, 100]));
        let mut labels = Array2::<u32>::zeros((2, 4));
        labels[[0, 0]] = 1;
        labels[[1, 3]] = 2;

        let overlay = overlay_mask(&image, labels.view(), &[1], 0.5)?;
        let Rgb([r, g, b]) = class_color(1);
        let mix = |c: u8| ((100.0 + f32::from(c)) / 2.0).round() as u8;

        assert_eq!(overlay.get_pixel(0, 0), &Rgba([mix(r), mix(g), mix(b), 255]));
        // class 2 is predicted but not accepted
        assert_eq!(overlay.get_pixel(3, 1), &Rgba([100, 100, 100, 255]));
        assert_eq!(overlay.get_pixel(1, 0), &Rgba([100, 100, 100, 255]));
        Ok(())
    }

    #[test]
    fn test_overlay_rejects_mismatched_mask() {
        let image = RgbImage::new(4, 2);
        let labels = Array2::<u32>::zeros((4, 2));
        assert!(overlay_mask(&image, labels.view(), &[], 0.5).is_err());
    }

    #[test]
    fn test_palette_cycles() {
        assert_eq!(class_color(0), Rgb([0, 0, 0]));
        assert_eq!(class_color(1), class_color(1 + PALETTE.len() as u32));
        assert_ne!(class_color(1), class_color(2));
    }

    #[test]
    fn test_png_encode_decode() -> Result<()> {
        let image = RgbaImage::from_pixel(3, 5, Rgba([1, 2, 3, 255]));
        let bytes = encode_png(&image)?;
        assert_eq!(&bytes[1..4], b"PNG");

        let decoded = decode(&bytes, "result.png")?;
        assert_eq!(decoded.dimensions(), (3, 5));
        assert_eq!(decoded.get_pixel(2, 4), &Rgb([1, 2, 3]));
        Ok(())
    }

    #[test]
    fn test_encode_failure_is_not_a_client_error() {
        // dds has a decoder only
        let result = encode(&DynamicImage::new_rgba8(2, 2), ImageFormat::Dds);
        match result {
            Err(err @ SegError::Encoding { .. }) => assert!(!err.is_client_error()),
            other => panic!("unexpected result: {:?}", other.map(|b| b.len())),
        }
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            decode(b"definitely not an image", "upload.jpg"),
            Err(SegError::ImageProcessing { .. })
        ));
    }

    #[test]
    fn test_resize_for_display() {
        let image = RgbaImage::new(362, 562);
        assert_eq!(resize_for_display(&image, 336, 562).dimensions(), (336, 562));
    }
}
