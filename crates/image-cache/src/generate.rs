//! Rendition pipeline: decode, scale per fill-mode, pad, write PNG
//!
//! Runs detached on a worker pool. Failures end the attempt and are only
//! logged; the caller has already shown the original source and a later
//! lookup will simply try again.

use crate::error::{CacheError, Result};
use crate::pending::PendingGuard;
use crate::target::{FillMode, TargetSpec};
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, ImageReader, RgbaImage};
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

/// Size of the scaled image before any padding or cropping.
///
/// Aspect-preserving modes use integer arithmetic: the candidate width for the
/// target height is `th * sw / sh`, and the mode decides whether that width or
/// the full target width wins. Dimensions never drop below one pixel.
pub fn scaled_size(source: (u32, u32), target: &TargetSpec) -> (u32, u32) {
    let (sw, sh) = (source.0 as u64, source.1 as u64);
    let (tw, th) = (target.width as u64, target.height as u64);

    if target.fill_mode == FillMode::Stretch || sw == 0 || sh == 0 {
        return (target.width, target.height);
    }

    let rw = th * sw / sh;
    let use_height = match target.fill_mode {
        FillMode::PreserveAspectFit => rw <= tw,
        _ => rw >= tw,
    };

    let (w, h) = if use_height {
        (rw, th)
    } else {
        (tw, tw * sh / sw)
    };
    (clamp_dimension(w), clamp_dimension(h))
}

fn clamp_dimension(value: u64) -> u32 {
    value.clamp(1, u32::MAX as u64) as u32
}

/// Scale `image` into the target box. Crop and Fit results are centred on a
/// transparent canvas of exactly the target size.
pub fn render(image: DynamicImage, target: &TargetSpec) -> RgbaImage {
    let rgba = image.into_rgba8();
    let (w, h) = scaled_size(rgba.dimensions(), target);
    let scaled = imageops::resize(&rgba, w, h, FilterType::Lanczos3);

    if !target.fill_mode.pads() {
        return scaled;
    }

    let mut canvas = RgbaImage::new(target.width, target.height);
    let x = (target.width as i64 - w as i64) / 2;
    let y = (target.height as i64 - h as i64) / 2;
    imageops::replace(&mut canvas, &scaled, x, y);
    canvas
}

fn decode(source: &Path) -> Result<DynamicImage> {
    let decode_error = |source_err: image::ImageError| CacheError::Decode {
        path: source.to_path_buf(),
        source: source_err,
    };

    ImageReader::open(source)
        .map_err(|e| decode_error(e.into()))?
        .with_guessed_format()
        .map_err(|e| decode_error(e.into()))?
        .decode()
        .map_err(decode_error)
}

fn encode_png(image: RgbaImage) -> std::result::Result<Vec<u8>, image::ImageError> {
    let mut buffer = Vec::new();
    DynamicImage::ImageRgba8(image).write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)?;
    Ok(buffer)
}

/// Write `data` to `cache_path` through a temporary sibling so the cache file
/// only ever appears complete.
fn write_atomically(cache_path: &Path, data: &[u8]) -> Result<()> {
    let parent = match cache_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|e| CacheError::CreateDir {
        path: parent.to_path_buf(),
        source: e,
    })?;

    let save_error = |reason: String| CacheError::Save {
        path: cache_path.to_path_buf(),
        reason,
    };

    let mut tmp = tempfile::Builder::new()
        .prefix(".")
        .suffix(".png.part")
        .tempfile_in(parent)
        .map_err(|e| save_error(e.to_string()))?;
    tmp.write_all(data).map_err(|e| save_error(e.to_string()))?;
    tmp.persist(cache_path)
        .map_err(|e| save_error(e.error.to_string()))?;
    Ok(())
}

/// Produce the cache file for `source` at `target`.
pub fn generate(source: &Path, cache_path: &Path, target: &TargetSpec) -> Result<()> {
    let image = decode(source)?;
    let rendered = render(image, target);
    let data = encode_png(rendered).map_err(|e| CacheError::Save {
        path: cache_path.to_path_buf(),
        reason: e.to_string(),
    })?;
    write_atomically(cache_path, &data)
}

/// Body of a detached generation task. The claim on the cache path is
/// released when `guard` drops, whatever the outcome.
pub(crate) fn run_detached(source: PathBuf, target: TargetSpec, guard: PendingGuard) {
    let cache_path = guard.path();
    match generate(&source, cache_path, &target) {
        Ok(()) => log::debug!(
            "Cached {} as {}",
            source.display(),
            cache_path.display()
        ),
        Err(e) => log::warn!("{}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pending::PendingRegistry;
    use anyhow::Result;
    use image::{GenericImageView, Rgba};
    use std::sync::Arc;
    use tempfile::tempdir;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);

    /// Left half red, right half blue.
    fn split_image(width: u32, height: u32) -> DynamicImage {
        let img = RgbaImage::from_fn(width, height, |x, _| if x < width / 2 { RED } else { BLUE });
        DynamicImage::ImageRgba8(img)
    }

    fn is_reddish(p: &Rgba<u8>) -> bool {
        p[0] > 200 && p[2] < 60 && p[3] == 255
    }

    fn is_bluish(p: &Rgba<u8>) -> bool {
        p[2] > 200 && p[0] < 60 && p[3] == 255
    }

    #[test]
    fn test_scaled_size_arithmetic() {
        let fit = |w, h| TargetSpec::new(w, h, FillMode::PreserveAspectFit);
        let crop = |w, h| TargetSpec::new(w, h, FillMode::PreserveAspectCrop);
        let stretch = |w, h| TargetSpec::new(w, h, FillMode::Stretch);

        assert_eq!(scaled_size((100, 50), &fit(50, 50)), (50, 25));
        assert_eq!(scaled_size((100, 50), &crop(50, 50)), (100, 50));
        assert_eq!(scaled_size((100, 50), &stretch(50, 50)), (50, 50));

        assert_eq!(scaled_size((50, 100), &fit(50, 50)), (25, 50));
        assert_eq!(scaled_size((50, 100), &crop(50, 50)), (50, 100));

        // Truncating division, as in 1920x1080 into 100x100
        assert_eq!(scaled_size((1920, 1080), &fit(100, 100)), (100, 56));
        assert_eq!(scaled_size((1920, 1080), &crop(100, 100)), (177, 100));

        // Upscaling is allowed
        assert_eq!(scaled_size((10, 5), &fit(40, 40)), (40, 20));

        // Extreme aspect ratios never collapse to zero
        assert_eq!(scaled_size((10_000, 1), &fit(50, 50)), (50, 1));
    }

    #[test]
    fn test_fit_pads_above_and_below() {
        let target = TargetSpec::new(50, 50, FillMode::PreserveAspectFit);
        let out = render(split_image(100, 50), &target);

        assert_eq!(out.dimensions(), (50, 50));
        // 50x25 centred vertically at y = 12
        for x in [0, 10, 25, 40, 49] {
            assert_eq!(out.get_pixel(x, 0)[3], 0);
            assert_eq!(out.get_pixel(x, 11)[3], 0);
            assert_eq!(out.get_pixel(x, 12)[3], 255);
            assert_eq!(out.get_pixel(x, 36)[3], 255);
            assert_eq!(out.get_pixel(x, 37)[3], 0);
            assert_eq!(out.get_pixel(x, 49)[3], 0);
        }
        assert!(is_reddish(out.get_pixel(5, 24)));
        assert!(is_bluish(out.get_pixel(45, 24)));
    }

    #[test]
    fn test_crop_covers_whole_canvas() {
        let target = TargetSpec::new(50, 50, FillMode::PreserveAspectCrop);
        let out = render(split_image(100, 50), &target);

        assert_eq!(out.dimensions(), (50, 50));
        assert!(out.pixels().all(|p| p[3] == 255));
        // Centre 50 columns of the 100-wide image survive
        assert!(is_reddish(out.get_pixel(5, 25)));
        assert!(is_bluish(out.get_pixel(45, 25)));
    }

    #[test]
    fn test_stretch_distorts() {
        let target = TargetSpec::new(50, 50, FillMode::Stretch);
        let out = render(split_image(100, 50), &target);

        assert_eq!(out.dimensions(), (50, 50));
        assert!(out.pixels().all(|p| p[3] == 255));
        // Each half of the source now spans half the square, top to bottom
        for y in [0, 25, 49] {
            assert!(is_reddish(out.get_pixel(10, y)));
            assert!(is_bluish(out.get_pixel(40, y)));
        }
    }

    #[test]
    fn test_generate_writes_png() -> Result<()> {
        let temp_dir = tempdir()?;
        let source = temp_dir.path().join("source.jpg");
        split_image(100, 50).to_rgb8().save(&source)?;

        let cache_dir = temp_dir.path().join("nested").join("cache");
        let cache_path = cache_dir.join("key@50x50-fit.png");
        generate(&source, &cache_path, &TargetSpec::new(50, 50, FillMode::PreserveAspectFit))?;

        let written = image::open(&cache_path)?;
        assert_eq!(written.dimensions(), (50, 50));
        assert_eq!(written.get_pixel(25, 0)[3], 0);

        // Only the finished file is left behind
        let entries: Vec<_> = fs::read_dir(&cache_dir)?.collect::<std::io::Result<Vec<_>>>()?;
        assert_eq!(entries.len(), 1);
        Ok(())
    }

    #[test]
    fn test_source_without_extension_still_decodes() -> Result<()> {
        let temp_dir = tempdir()?;
        let png = temp_dir.path().join("source.png");
        split_image(8, 8).save(&png)?;
        let bare = temp_dir.path().join("source");
        fs::rename(&png, &bare)?;

        let cache_path = temp_dir.path().join("out.png");
        generate(&bare, &cache_path, &TargetSpec::new(4, 4, FillMode::Stretch))?;
        assert!(cache_path.exists());
        Ok(())
    }

    #[test]
    fn test_decode_failure_writes_nothing() -> Result<()> {
        let temp_dir = tempdir()?;
        let source = temp_dir.path().join("corrupt.png");
        fs::write(&source, b"definitely not an image")?;
        let cache_path = temp_dir.path().join("cache").join("out.png");

        let err = generate(&source, &cache_path, &TargetSpec::new(10, 10, FillMode::Stretch)).unwrap_err();
        assert!(matches!(err, CacheError::Decode { .. }));
        assert!(!cache_path.exists());
        assert!(!temp_dir.path().join("cache").exists());
        Ok(())
    }

    #[test]
    fn test_unwritable_directory_is_reported() -> Result<()> {
        let temp_dir = tempdir()?;
        let source = temp_dir.path().join("source.png");
        split_image(4, 4).save(&source)?;

        // A regular file where the cache directory should be
        let blocker = temp_dir.path().join("blocker");
        fs::write(&blocker, b"")?;
        let cache_path = blocker.join("out.png");

        let err = generate(&source, &cache_path, &TargetSpec::new(2, 2, FillMode::Stretch)).unwrap_err();
        assert!(matches!(err, CacheError::CreateDir { .. }));
        Ok(())
    }

    #[test]
    fn test_detached_run_releases_claim() -> Result<()> {
        let temp_dir = tempdir()?;
        let registry = Arc::new(PendingRegistry::new());
        let target = TargetSpec::new(4, 4, FillMode::PreserveAspectCrop);

        let good = temp_dir.path().join("good.png");
        split_image(8, 4).save(&good)?;
        let good_out = temp_dir.path().join("cache").join("good@4x4-crop.png");
        let guard = registry.try_acquire(&good_out).unwrap();
        run_detached(good.clone(), target, guard);
        assert!(good_out.exists());
        assert!(registry.is_empty());

        let bad = temp_dir.path().join("missing.png");
        let bad_out = temp_dir.path().join("cache").join("bad@4x4-crop.png");
        let guard = registry.try_acquire(&bad_out).unwrap();
        run_detached(bad, target, guard);
        assert!(!bad_out.exists());
        assert!(registry.is_empty());
        Ok(())
    }
}
