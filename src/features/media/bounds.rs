use image::RgbaImage;

/// 非近白内容的外接矩形（闭区间，像素坐标）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentBounds {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl ContentBounds {
    /// 外接矩形宽度（闭区间，含两端）
    pub fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    /// 外接矩形高度（闭区间，含两端）
    pub fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }
}

/// 扫描整幅图像，返回所有"内容像素"的外接矩形。
///
/// 内容像素的判定：R/G/B 任一通道严格小于 `threshold`（即不近白）。
/// 逐行单遍扫描维护各轴向 min/max；不能采样或提前退出，
/// 后续任何一个像素都可能扩大外接矩形。
/// 全图无内容像素时返回 None，调用方应保持图像原样。
pub fn content_bounds(img: &RgbaImage, threshold: u8) -> Option<ContentBounds> {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return None;
    }

    let mut min_x = width;
    let mut min_y = height;
    let mut max_x = 0u32;
    let mut max_y = 0u32;

    for (x, y, pixel) in img.enumerate_pixels() {
        let [r, g, b, _] = pixel.0;
        if r < threshold || g < threshold || b < threshold {
            if x < min_x {
                min_x = x;
            }
            if x > max_x {
                max_x = x;
            }
            if y < min_y {
                min_y = y;
            }
            if y > max_y {
                max_y = y;
            }
        }
    }

    if min_x > max_x || min_y > max_y {
        return None;
    }

    Some(ContentBounds {
        min_x,
        min_y,
        max_x,
        max_y,
    })
}
