//! Scale-to-fit and overlay compositing, applied to every sampled frame
//! before quantization.

use imgref::{ImgRef, ImgVec};
use rgb::{ComponentBytes, RGBA8};

use crate::error::{Error, GifResult};
use crate::{Frame, MaxSize};

/// Largest size that fits within `bound` while keeping the source aspect
/// ratio. Never upscales beyond the source resolution.
pub(crate) fn fit_dimensions((width, height): (usize, usize), bound: MaxSize) -> (usize, usize) {
    let scale = (f64::from(bound.width) / width as f64)
        .min(f64::from(bound.height) / height as f64)
        .min(1.0);
    if scale >= 1.0 {
        return (width, height);
    }
    (
        ((width as f64 * scale).round() as usize).max(1),
        ((height as f64 * scale).round() as usize).max(1),
    )
}

/// Scales the frame into `bound` and composites `overlay` (top-left anchored)
/// over the scaled pixels.
pub(crate) fn transform(frame: Frame, bound: MaxSize, overlay: Option<ImgRef<'_, RGBA8>>) -> GifResult<Frame> {
    if bound.width == 0 || bound.height == 0 {
        return Err(Error::Transform("maximum size must have positive dimensions".into()));
    }
    let Frame { image, pts } = frame;
    let mut image = scale_to_fit(image, bound);
    if let Some(overlay) = overlay {
        composite_over(&mut image, overlay);
    }
    Ok(Frame { image, pts })
}

fn scale_to_fit(image: ImgVec<RGBA8>, bound: MaxSize) -> ImgVec<RGBA8> {
    let (dst_width, dst_height) = fit_dimensions((image.width(), image.height()), bound);
    if dst_width == image.width() && dst_height == image.height() {
        return image;
    }

    let (buf, src_width, src_height) = image.into_contiguous_buf();
    let mut resizer = resize::new(
        src_width,
        src_height,
        dst_width,
        dst_height,
        resize::Pixel::RGBA,
        resize::Type::Lanczos3,
    );
    let mut dst = vec![RGBA8::new(0, 0, 0, 0); dst_width * dst_height];
    resizer.resize(buf.as_bytes(), dst.as_bytes_mut());
    ImgVec::new(dst, dst_width, dst_height)
}

/// Standard src-over blend of straight-alpha pixels. Overlay pixels with
/// alpha 0 leave the base untouched. The overlay is clipped to the base
/// frame's extent.
fn composite_over(base: &mut ImgVec<RGBA8>, overlay: ImgRef<'_, RGBA8>) {
    for (base_row, overlay_row) in base.rows_mut().zip(overlay.rows()) {
        for (base_px, overlay_px) in base_row.iter_mut().zip(overlay_row.iter()) {
            *base_px = over(*base_px, *overlay_px);
        }
    }
}

#[inline]
fn over(dst: RGBA8, src: RGBA8) -> RGBA8 {
    if src.a == 0 {
        return dst;
    }
    if src.a == 255 {
        return src;
    }
    let src_a = u32::from(src.a);
    let dst_a = u32::from(dst.a);
    let inv = 255 - src_a;
    // out_a scaled by 255 to keep the channel math integral
    let out_a255 = src_a * 255 + dst_a * inv;
    if out_a255 == 0 {
        return RGBA8::new(0, 0, 0, 0);
    }
    let channel = |s: u8, d: u8| -> u8 {
        let num = u32::from(s) * src_a * 255 + u32::from(d) * dst_a * inv;
        ((num + out_a255 / 2) / out_a255) as u8
    };
    RGBA8::new(
        channel(src.r, dst.r),
        channel(src.g, dst.g),
        channel(src.b, dst.b),
        ((out_a255 + 127) / 255) as u8,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: usize, height: usize, px: RGBA8) -> ImgVec<RGBA8> {
        ImgVec::new(vec![px; width * height], width, height)
    }

    #[test]
    fn fit_never_upscales() {
        assert_eq!(fit_dimensions((10, 10), MaxSize { width: 100, height: 100 }), (10, 10));
    }

    #[test]
    fn fit_preserves_aspect_ratio() {
        assert_eq!(fit_dimensions((100, 50), MaxSize { width: 40, height: 40 }), (40, 20));
        assert_eq!(fit_dimensions((50, 100), MaxSize { width: 40, height: 40 }), (20, 40));
        assert_eq!(fit_dimensions((1920, 1080), MaxSize { width: 480, height: 480 }), (480, 270));
    }

    #[test]
    fn fit_bounds_both_dimensions() {
        let (w, h) = fit_dimensions((640, 480), MaxSize { width: 100, height: 30 });
        assert!(w <= 100 && h <= 30);
        assert_eq!((w, h), (40, 30));
    }

    #[test]
    fn zero_bound_is_rejected() {
        let frame = Frame::new(solid(4, 4, RGBA8::new(1, 2, 3, 255)), 0.0);
        let err = transform(frame, MaxSize { width: 0, height: 10 }, None).unwrap_err();
        assert!(matches!(err, Error::Transform(_)));
    }

    #[test]
    fn transparent_overlay_is_identity() {
        let base_px = RGBA8::new(9, 8, 7, 255);
        let frame = Frame::new(solid(6, 6, base_px), 0.0);
        let overlay = solid(6, 6, RGBA8::new(200, 100, 50, 0));
        let out = transform(frame, MaxSize { width: 6, height: 6 }, Some(overlay.as_ref())).unwrap();
        assert!(out.image.rows().all(|row| row.iter().all(|px| *px == base_px)));
    }

    #[test]
    fn opaque_overlay_replaces_base() {
        let overlay_px = RGBA8::new(200, 100, 50, 255);
        let frame = Frame::new(solid(6, 6, RGBA8::new(9, 8, 7, 255)), 0.0);
        let overlay = solid(2, 2, overlay_px);
        let out = transform(frame, MaxSize { width: 6, height: 6 }, Some(overlay.as_ref())).unwrap();
        // top-left 2x2 replaced, rest untouched
        let rows: Vec<&[RGBA8]> = out.image.rows().collect();
        assert_eq!(rows[0][0], overlay_px);
        assert_eq!(rows[1][1], overlay_px);
        assert_eq!(rows[2][2], RGBA8::new(9, 8, 7, 255));
    }

    #[test]
    fn half_alpha_blends_toward_overlay() {
        let out = over(RGBA8::new(0, 0, 0, 255), RGBA8::new(255, 255, 255, 128));
        assert_eq!(out.a, 255);
        assert!(out.r >= 127 && out.r <= 129, "got {}", out.r);
    }
}
