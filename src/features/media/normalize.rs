use image::{DynamicImage, GenericImageView, imageops::FilterType};
use std::io::Cursor;

use crate::config::MediaConfig;

use super::bounds::{ContentBounds, content_bounds};

/// 四周边框像素数之和相对于 2×(宽+高) 的百分比。
///
/// 以像素数计，不是面积占比；与裁剪决策使用同一口径。
pub fn border_percentage(bounds: &ContentBounds, width: u32, height: u32) -> f64 {
    let left = bounds.min_x;
    let right = width - 1 - bounds.max_x;
    let top = bounds.min_y;
    let bottom = height - 1 - bounds.max_y;
    let border_pixels = (left + right + top + bottom) as f64;
    let total_perimeter_unit = (2 * (width + height)) as f64;
    100.0 * border_pixels / total_perimeter_unit
}

/// 统一的图像后处理入口：去边框 + 精确尺寸适配。
///
/// 后处理是尽力而为的：解码/编码任一环节失败都吞掉错误，
/// 原样返回输入字节，绝不让整个生成请求因此失败。
/// 仅当确实发生了裁剪或缩放时才重新编码，否则返回原始字节。
pub fn normalize(bytes: &[u8], target: Option<(u32, u32)>, cfg: &MediaConfig) -> Vec<u8> {
    match normalize_inner(bytes, target, cfg) {
        Ok(Some(out)) => out,
        Ok(None) => bytes.to_vec(),
        Err(e) => {
            tracing::debug!("图像后处理失败，原样返回: {}", e);
            bytes.to_vec()
        }
    }
}

/// Ok(None) 表示无需任何改动（边框可忽略且尺寸已满足）。
fn normalize_inner(
    bytes: &[u8],
    target: Option<(u32, u32)>,
    cfg: &MediaConfig,
) -> Result<Option<Vec<u8>>, image::ImageError> {
    let img = image::load_from_memory(bytes)?;

    let (img, trimmed) = trim_border(img, cfg);

    let (cur_w, cur_h) = img.dimensions();
    let needs_resize = match target {
        Some((w, h)) => w > 0 && h > 0 && (w != cur_w || h != cur_h),
        None => false,
    };

    if !trimmed && !needs_resize {
        return Ok(None);
    }

    let img = if needs_resize {
        let (w, h) = target.expect("needs_resize implies target");
        cover_resize(&img, w, h)
    } else {
        img
    };

    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)?;
    Ok(Some(out))
}

/// 去除近白边框。
///
/// 边框占比低于 `min_border_percentage` 时视为可忽略，跳过裁剪，
/// 避免对近满幅图做破坏性裁切；无内容像素时同样保持原样。
fn trim_border(img: DynamicImage, cfg: &MediaConfig) -> (DynamicImage, bool) {
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();

    let Some(bounds) = content_bounds(&rgba, cfg.border_threshold) else {
        return (img, false);
    };

    if border_percentage(&bounds, width, height) < cfg.min_border_percentage {
        return (img, false);
    }

    if bounds.width() == width && bounds.height() == height {
        return (img, false);
    }

    let cropped = img.crop_imm(bounds.min_x, bounds.min_y, bounds.width(), bounds.height());
    (cropped, true)
}

/// cover/居中裁剪适配：填满目标尺寸，溢出部分对称裁掉，不留白边。
fn cover_resize(img: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    img.resize_to_fill(width, height, FilterType::Lanczos3)
}

#[cfg(test)]
mod tests {
    use super::{border_percentage, normalize};
    use crate::config::MediaConfig;
    use crate::features::media::bounds::{ContentBounds, content_bounds};
    use image::{GenericImageView, Rgba, RgbaImage};
    use std::io::Cursor;

    fn encode_png(img: &RgbaImage) -> Vec<u8> {
        let mut out = Vec::new();
        image::DynamicImage::ImageRgba8(img.clone())
            .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
            .expect("encode png");
        out
    }

    fn framed_image(w: u32, h: u32, margin: u32) -> RgbaImage {
        let mut img = RgbaImage::from_pixel(w, h, Rgba([255, 255, 255, 255]));
        for y in margin..h - margin {
            for x in margin..w - margin {
                img.put_pixel(x, y, Rgba([40, 40, 40, 255]));
            }
        }
        img
    }

    #[test]
    fn border_percentage_matches_hand_computed_value() {
        // 100×100，四边各 10px：border=40，2×(100+100)=400 → 10%。
        let b = ContentBounds {
            min_x: 10,
            min_y: 10,
            max_x: 89,
            max_y: 89,
        };
        let pct = border_percentage(&b, 100, 100);
        assert!((pct - 10.0).abs() < 1e-9);
    }

    #[test]
    fn all_white_input_is_returned_unchanged() {
        let img = RgbaImage::from_pixel(50, 50, Rgba([255, 255, 255, 255]));
        let bytes = encode_png(&img);
        let out = normalize(&bytes, None, &MediaConfig::default());
        assert_eq!(out, bytes);
    }

    #[test]
    fn negligible_border_skips_crop_and_keeps_bytes() {
        // 仅左侧 1px 白边：1/400 = 0.25% < 1% → 不裁剪，字节原样。
        let mut img = RgbaImage::from_pixel(100, 100, Rgba([255, 255, 255, 255]));
        for y in 0..100 {
            for x in 1..100 {
                img.put_pixel(x, y, Rgba([0, 0, 0, 255]));
            }
        }
        let bytes = encode_png(&img);
        assert!(content_bounds(&img, 240).is_some());
        let out = normalize(&bytes, None, &MediaConfig::default());
        assert_eq!(out, bytes);
    }

    #[test]
    fn wide_border_is_cropped_to_content() {
        let img = framed_image(100, 100, 10);
        let bytes = encode_png(&img);
        let out = normalize(&bytes, None, &MediaConfig::default());
        let decoded = image::load_from_memory(&out).expect("decode output");
        assert_eq!(decoded.dimensions(), (80, 80));
    }

    #[test]
    fn target_dimensions_are_exact() {
        let img = framed_image(200, 100, 15);
        let bytes = encode_png(&img);
        let out = normalize(&bytes, Some((512, 512)), &MediaConfig::default());
        let decoded = image::load_from_memory(&out).expect("decode output");
        assert_eq!(decoded.dimensions(), (512, 512));
    }

    #[test]
    fn cover_fit_crops_instead_of_letterboxing() {
        // 全内容的 400×100 → 200×200：等比填满后对称裁剪，不留白边。
        let img = RgbaImage::from_pixel(400, 100, Rgba([10, 10, 10, 255]));
        let bytes = encode_png(&img);
        let out = normalize(&bytes, Some((200, 200)), &MediaConfig::default());
        let decoded = image::load_from_memory(&out).expect("decode output");
        assert_eq!(decoded.dimensions(), (200, 200));
    }

    #[test]
    fn undecodable_bytes_pass_through() {
        let garbage = b"definitely not an image".to_vec();
        let out = normalize(&garbage, Some((64, 64)), &MediaConfig::default());
        assert_eq!(out, garbage);
    }
}
