use image::imageops::{self, FilterType};
use image::{ImageFormat, Rgba, RgbaImage};
use std::path::Path;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::domain::{FILE_EXTENSION, MARKED_FILE_EXTENSION};
use crate::error::Result;

/// Backgrounds darker than this get an inverted watermark
const DARK_BACKGROUND: f64 = 0.4;

pub fn load_watermark(path: &Path) -> Result<RgbaImage> {
    Ok(image::open(path)?.to_rgba8())
}

/// "Over" composite of one RGBA pixel onto another
pub fn alpha_composite(src: Rgba<u8>, dst: Rgba<u8>) -> Rgba<u8> {
    let src_a = f64::from(src[3]) / 255.0;
    let dst_a = f64::from(dst[3]) / 255.0;
    let out_a = src_a + dst_a * (1.0 - src_a);
    if out_a <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }

    let channel = |i: usize| {
        let value = (f64::from(src[i]) * src_a + f64::from(dst[i]) * dst_a * (1.0 - src_a)) / out_a;
        value.round().clamp(0.0, 255.0) as u8
    };
    Rgba([
        channel(0),
        channel(1),
        channel(2),
        (out_a * 255.0).round().clamp(0.0, 255.0) as u8,
    ])
}

/// Watermark of side `min(w, h) / 4` at the left edge, bottom at 5/6 height
pub fn paste_watermark(image: &RgbaImage, watermark: &RgbaImage) -> RgbaImage {
    let (width, height) = image.dimensions();
    let side = width.min(height) / 4;
    if side == 0 {
        return image.clone();
    }

    let mut mark = imageops::resize(watermark, side, side, FilterType::Lanczos3);
    let bottom = (u64::from(height) * 5 / 6) as u32;
    let top = bottom - side;

    let mut brightness = 0.0;
    for y in top..bottom {
        for x in 0..side {
            let pixel = image.get_pixel(x, y);
            brightness += pixel.0[..3].iter().map(|c| f64::from(*c) / 255.0).sum::<f64>();
        }
    }
    let mean = brightness / f64::from(side * side * 3);
    if mean < DARK_BACKGROUND {
        for pixel in mark.pixels_mut() {
            for c in 0..3 {
                pixel[c] = 255 - pixel[c];
            }
        }
    }

    let transparent = Rgba([0, 0, 0, 0]);
    RgbaImage::from_fn(width, height, |x, y| {
        let src = if x < side && (top..bottom).contains(&y) {
            *mark.get_pixel(x, y - top)
        } else {
            transparent
        };
        alpha_composite(src, *image.get_pixel(x, y))
    })
}

/// Watermark every original under `root` that has no marked sibling yet
pub fn mark_images(root: &Path, watermark: &RgbaImage) -> Result<usize> {
    let mut marked = 0;

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                continue;
            }
        };
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().map_or(true, |ext| ext != FILE_EXTENSION)
        {
            continue;
        }

        let save_path = path.with_extension(MARKED_FILE_EXTENSION);
        if save_path.exists() {
            continue;
        }

        match mark_image(path, &save_path, watermark) {
            Ok(()) => {
                info!("Marked {}", save_path.display());
                marked += 1;
            }
            Err(e) => warn!("Failed to mark {}: {}", path.display(), e),
        }
    }

    Ok(marked)
}

fn mark_image(path: &Path, save_path: &Path, watermark: &RgbaImage) -> Result<()> {
    let image = image::open(path)?.to_rgba8();
    let marked = paste_watermark(&image, watermark);

    let partial = save_path.with_extension(format!("{}.part", MARKED_FILE_EXTENSION));
    marked.save_with_format(&partial, ImageFormat::Png)?;
    std::fs::rename(&partial, save_path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn solid(width: u32, height: u32, rgba: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba(rgba))
    }

    #[test]
    fn test_alpha_composite() {
        let half_red = Rgba([255, 0, 0, 128]);
        let blue = Rgba([0, 0, 255, 255]);
        assert_eq!(alpha_composite(half_red, blue), Rgba([128, 0, 127, 255]));

        assert_eq!(
            alpha_composite(Rgba([9, 9, 9, 0]), Rgba([1, 2, 3, 0])),
            Rgba([0, 0, 0, 0])
        );
        assert_eq!(
            alpha_composite(Rgba([9, 9, 9, 0]), Rgba([1, 2, 3, 255])),
            Rgba([1, 2, 3, 255])
        );
    }

    #[test]
    fn test_watermark_on_light_background() {
        let image = solid(8, 12, [255, 255, 255, 255]);
        let watermark = solid(2, 2, [0, 0, 0, 255]);
        let marked = paste_watermark(&image, &watermark);

        // side 2, rows 8..10, columns 0..2
        assert_eq!(*marked.get_pixel(0, 8), Rgba([0, 0, 0, 255]));
        assert_eq!(*marked.get_pixel(1, 9), Rgba([0, 0, 0, 255]));
        assert_eq!(*marked.get_pixel(2, 8), Rgba([255, 255, 255, 255]));
        assert_eq!(*marked.get_pixel(0, 7), Rgba([255, 255, 255, 255]));
        assert_eq!(*marked.get_pixel(0, 10), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn test_watermark_inverted_on_dark_background() {
        let image = solid(8, 12, [10, 10, 10, 255]);
        let watermark = solid(2, 2, [0, 0, 0, 255]);
        let marked = paste_watermark(&image, &watermark);

        assert_eq!(*marked.get_pixel(0, 8), Rgba([255, 255, 255, 255]));
        assert_eq!(*marked.get_pixel(5, 5), Rgba([10, 10, 10, 255]));
    }

    #[test]
    fn test_tiny_images_are_unchanged() {
        let image = solid(3, 3, [1, 2, 3, 255]);
        let watermark = solid(2, 2, [0, 0, 0, 255]);
        assert_eq!(paste_watermark(&image, &watermark), image);
    }

    #[test]
    fn test_mark_images_once() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("wall").join("2016.09");
        std::fs::create_dir_all(&nested).unwrap();
        let original = nested.join("-1_1.jpg");
        RgbImage::from_pixel(16, 16, Rgb([200, 200, 200]))
            .save(&original)
            .unwrap();

        let watermark = solid(4, 4, [0, 0, 0, 255]);
        assert_eq!(mark_images(dir.path(), &watermark).unwrap(), 1);

        let marked_path = original.with_extension("png");
        let marked = image::open(&marked_path).unwrap().to_rgba8();
        assert_eq!(marked.dimensions(), (16, 16));
        assert!(!marked_path.with_extension("png.part").exists());

        assert_eq!(mark_images(dir.path(), &watermark).unwrap(), 0);
    }
}
