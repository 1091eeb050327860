use image::{DynamicImage, GrayImage, Luma};
use imageproc::filter::median_filter;

const CLAHE_TILES: u32 = 8;
const CLAHE_CLIP_LIMIT: f32 = 2.0;

/// Denoise + local contrast equalisation. The result keeps the input's colour
/// layout: gray in, gray out; colour in, RGB(A) out.
pub fn enhance(image: &DynamicImage) -> DynamicImage {
    let gray = image.to_luma8();
    let equalized = clahe(&median_filter(&gray, 1, 1), CLAHE_TILES, CLAHE_CLIP_LIMIT);
    let out = DynamicImage::ImageLuma8(equalized);

    match image {
        DynamicImage::ImageLuma8(_) => out,
        DynamicImage::ImageLumaA8(_) => DynamicImage::ImageLumaA8(out.to_luma_alpha8()),
        other if other.color().has_alpha() => DynamicImage::ImageRgba8(out.to_rgba8()),
        _ => DynamicImage::ImageRgb8(out.to_rgb8()),
    }
}

/// Contrast-limited adaptive histogram equalisation with bilinear blending
/// between neighbouring tile mappings.
pub fn clahe(gray: &GrayImage, tiles: u32, clip_limit: f32) -> GrayImage {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return gray.clone();
    }

    let tile_w = w.div_ceil(tiles.min(w));
    let tile_h = h.div_ceil(tiles.min(h));
    let tiles_x = w.div_ceil(tile_w);
    let tiles_y = h.div_ceil(tile_h);

    let mut luts = Vec::with_capacity((tiles_x * tiles_y) as usize);
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(w);
            let y1 = (y0 + tile_h).min(h);
            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[gray.get_pixel(x, y)[0] as usize] += 1;
                }
            }
            luts.push(tile_lut(hist, (x1 - x0) * (y1 - y0), clip_limit));
        }
    }

    let lut = |tx: u32, ty: u32| &luts[(ty * tiles_x + tx) as usize];

    // Position of a pixel between tile centres along one axis.
    let axis = |p: u32, size: u32, count: u32| -> (u32, u32, f32) {
        let f = (p as f32 + 0.5) / size as f32 - 0.5;
        let lo = f.floor().max(0.0) as u32;
        let lo = lo.min(count - 1);
        let hi = (lo + 1).min(count - 1);
        let t = (f - lo as f32).clamp(0.0, 1.0);
        (lo, hi, t)
    };

    GrayImage::from_fn(w, h, |x, y| {
        let v = gray.get_pixel(x, y)[0] as usize;
        let (x0, x1, ax) = axis(x, tile_w, tiles_x);
        let (y0, y1, ay) = axis(y, tile_h, tiles_y);
        let top = lut(x0, y0)[v] as f32 * (1.0 - ax) + lut(x1, y0)[v] as f32 * ax;
        let bottom = lut(x0, y1)[v] as f32 * (1.0 - ax) + lut(x1, y1)[v] as f32 * ax;
        Luma([(top * (1.0 - ay) + bottom * ay).round().clamp(0.0, 255.0) as u8])
    })
}

fn tile_lut(mut hist: [u32; 256], area: u32, clip_limit: f32) -> [u8; 256] {
    let limit = ((clip_limit * area as f32 / 256.0) as u32).max(1);

    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }
    let share = excess / 256;
    let residual = (excess % 256) as usize;
    for bin in hist.iter_mut() {
        *bin += share;
    }
    if residual > 0 {
        let step = (256 / residual).max(1);
        for bin in hist.iter_mut().step_by(step).take(residual) {
            *bin += 1;
        }
    }

    let scale = 255.0 / area as f32;
    let mut lut = [0u8; 256];
    let mut cdf = 0u32;
    for (value, count) in hist.iter().enumerate() {
        cdf += count;
        lut[value] = (cdf as f32 * scale).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    fn spread(img: &GrayImage) -> u8 {
        let min = img.pixels().map(|p| p[0]).min().unwrap();
        let max = img.pixels().map(|p| p[0]).max().unwrap();
        max - min
    }

    #[test]
    fn median_removes_isolated_speck() {
        let mut g = GrayImage::from_pixel(9, 9, Luma([200]));
        g.put_pixel(4, 4, Luma([0]));
        let out = enhance(&DynamicImage::ImageLuma8(g)).to_luma8();
        assert_eq!(spread(&out), 0);
    }

    #[test]
    fn uniform_input_stays_uniform() {
        let g = GrayImage::from_pixel(64, 48, Luma([120]));
        let out = clahe(&g, 8, 2.0);
        assert_eq!(out.dimensions(), (64, 48));
        assert_eq!(spread(&out), 0);
    }

    #[test]
    fn bimodal_tiles_gain_contrast() {
        let g = GrayImage::from_fn(256, 256, |x, y| if (x + y) % 2 == 0 { Luma([100]) } else { Luma([110]) });
        let out = clahe(&g, 8, 2.0);
        let dark = out.get_pixel(0, 0)[0];
        let light = out.get_pixel(1, 0)[0];
        assert!(light - dark > 10, "{dark} -> {light}");
        assert_eq!(spread(&out), light - dark);
    }

    #[test]
    fn tiny_images_do_not_panic() {
        let g = GrayImage::from_fn(3, 2, |x, y| Luma([(x * 40 + y * 10) as u8]));
        assert_eq!(clahe(&g, 8, 2.0).dimensions(), (3, 2));
    }

    #[test]
    fn colour_layout_is_preserved() {
        let gray = DynamicImage::ImageLuma8(GrayImage::from_pixel(16, 16, Luma([50])));
        assert!(matches!(enhance(&gray), DynamicImage::ImageLuma8(_)));

        let rgb = DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 16, Rgb([10, 200, 30])));
        let out = enhance(&rgb);
        assert!(matches!(out, DynamicImage::ImageRgb8(_)));
        assert_eq!((out.width(), out.height()), (16, 16));

        let rgba = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 255])));
        assert!(matches!(enhance(&rgba), DynamicImage::ImageRgba8(_)));
    }
}
