use image::RgbaImage;
use std::io::Cursor;

use crate::buffer::PixelBuffer;
use crate::error::EditorError;
use crate::layer::{BlendMode, Layer};
use crate::stack::LayerStack;

/// Composite every visible layer of the stack into `target`.
/// Layers are drawn in ascending z_index (lowest first / behind).
/// Each layer's alpha is multiplied by its opacity and combined with the
/// result beneath it through the layer's blend mode.
pub fn composite(stack: &LayerStack, target: &mut PixelBuffer) {
    target.clear();
    composite_layers(stack.ordered().into_iter(), target);
}

/// Composite an arbitrary ordered run of layers onto `target` without
/// clearing it first. Used by merge as well as the full composite.
pub fn composite_layers<'a>(layers: impl Iterator<Item = &'a Layer>, target: &mut PixelBuffer) {
    for layer in layers.filter(|l| l.visible) {
        let opacity = layer.opacity() as f32 / 100.0;
        blend_layer(target, layer.buffer(), opacity, layer.blend_mode);
    }
}

/// Draw `top` over `target` with normal blending at full opacity.
pub fn overlay(target: &mut PixelBuffer, top: &PixelBuffer) {
    blend_layer(target, top, 1.0, BlendMode::Normal);
}

/// Allocate a canvas of the stack's canonical size and composite into it.
pub fn render(stack: &LayerStack) -> Result<PixelBuffer, EditorError> {
    let (width, height) = stack.dimensions();
    let mut canvas = PixelBuffer::new(width, height)?;
    composite(stack, &mut canvas);
    Ok(canvas)
}

/// Encode a composed buffer as PNG bytes for download/export.
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, EditorError> {
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, image::ImageFormat::Png)
        .map_err(|e| EditorError::Decode(e.to_string()))?;
    Ok(bytes.into_inner())
}

/// Blend a source buffer onto the destination.
/// Source is scaled to fit the destination if sizes differ.
pub fn blend_layer(dst: &mut PixelBuffer, src: &PixelBuffer, opacity: f32, mode: BlendMode) {
    if opacity <= 0.0 {
        return;
    }

    if src.dimensions() == dst.dimensions() {
        blend_direct(dst, src.as_image(), opacity, mode);
    } else {
        // Layers always match the canonical size; this only guards against
        // a foreign buffer slipping in mid-resize.
        let (width, height) = dst.dimensions();
        let scaled = image::imageops::resize(
            src.as_image(),
            width,
            height,
            image::imageops::FilterType::Nearest,
        );
        blend_direct(dst, &scaled, opacity, mode);
    }
}

/// Direct pixel-by-pixel blend (src over dst through `mode`) with opacity multiplier.
fn blend_direct(dst: &mut PixelBuffer, src: &RgbaImage, opacity: f32, mode: BlendMode) {
    let dst_buf: &mut [u8] = dst.raw_mut();
    let src_buf: &[u8] = src.as_raw();
    let len = dst_buf.len().min(src_buf.len());

    // Process 4 bytes at a time (RGBA)
    let mut i = 0;
    while i + 3 < len {
        let top = [src_buf[i], src_buf[i + 1], src_buf[i + 2], src_buf[i + 3]];
        if top[3] != 0 {
            let base = [dst_buf[i], dst_buf[i + 1], dst_buf[i + 2], dst_buf[i + 3]];
            let px = blend_pixel(base, top, mode, opacity);
            dst_buf[i..i + 4].copy_from_slice(&px);
        }
        i += 4;
    }
}

/// Blend a single straight-alpha pixel `top` over `base`.
pub fn blend_pixel(base: [u8; 4], top: [u8; 4], mode: BlendMode, opacity: f32) -> [u8; 4] {
    if top[3] == 0 {
        return base;
    }
    if mode == BlendMode::Normal && opacity >= 1.0 && top[3] == 255 {
        return top;
    }

    let opacity = opacity.clamp(0.0, 1.0);
    let b = |c: usize| base[c] as f32 / 255.0;
    let t = |c: usize| top[c] as f32 / 255.0;
    let base_a = b(3);
    let top_a = t(3) * opacity;

    let mut mixed = [0.0f32; 3];
    for (c, slot) in mixed.iter_mut().enumerate() {
        let (cb, cs) = (b(c), t(c));
        *slot = match mode {
            BlendMode::Normal => cs,
            BlendMode::Multiply => cb * cs,
            BlendMode::Screen => 1.0 - (1.0 - cb) * (1.0 - cs),
            BlendMode::Overlay => overlay_channel(cb, cs),
            BlendMode::SoftLight => soft_light_channel(cb, cs),
        };
    }

    let out_a = top_a + base_a * (1.0 - top_a);
    if out_a == 0.0 {
        return [0, 0, 0, 0];
    }

    let mut out = [0u8; 4];
    for c in 0..3 {
        // Where the backdrop is transparent the source colour shows unmixed.
        let blended = mixed[c] * base_a + t(c) * (1.0 - base_a);
        let v = (blended * top_a + b(c) * base_a * (1.0 - top_a)) / out_a;
        out[c] = (v * 255.0).round().clamp(0.0, 255.0) as u8;
    }
    out[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
    out
}

fn overlay_channel(base: f32, top: f32) -> f32 {
    if base < 0.5 {
        2.0 * base * top
    } else {
        1.0 - 2.0 * (1.0 - base) * (1.0 - top)
    }
}

/// W3C soft-light.
fn soft_light_channel(base: f32, top: f32) -> f32 {
    if top <= 0.5 {
        base - (1.0 - 2.0 * top) * base * (1.0 - base)
    } else {
        let d = if base <= 0.25 {
            ((16.0 * base - 12.0) * base + 4.0) * base
        } else {
            base.sqrt()
        };
        base + (2.0 * top - 1.0) * (d - base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::LayerKind;
    use image::Rgba;

    fn two_layer_stack() -> LayerStack {
        let mut stack = LayerStack::new(8, 8);
        let bg = stack.create_layer(LayerKind::Image, "Background").unwrap();
        stack
            .pixels_mut(bg)
            .unwrap()
            .fill_rect(0, 0, 8, 8, Rgba([200, 100, 50, 255]));
        let top = stack.create_layer(LayerKind::Drawing, "Top").unwrap();
        stack
            .pixels_mut(top)
            .unwrap()
            .fill_rect(0, 0, 4, 8, Rgba([0, 0, 255, 255]));
        stack
    }

    #[test]
    fn test_composite_is_idempotent() {
        let stack = two_layer_stack();
        let a = render(&stack).unwrap();
        let b = render(&stack).unwrap();
        assert_eq!(a.as_raw(), b.as_raw());
    }

    #[test]
    fn test_invisible_layer_is_skipped() {
        let mut stack = two_layer_stack();
        let top = stack.active_layer_id().unwrap();
        stack.layer_mut(top).unwrap().visible = false;
        let out = render(&stack).unwrap();
        assert_eq!(out.pixel(0, 0), Some(Rgba([200, 100, 50, 255])));
    }

    #[test]
    fn test_layer_opacity_scales_alpha() {
        let mut stack = two_layer_stack();
        let top = stack.active_layer_id().unwrap();
        stack.layer_mut(top).unwrap().set_opacity(50);
        let px = render(&stack).unwrap().pixel(0, 0).unwrap();
        assert!(px[2] > 100 && px[2] < 160, "blue {}", px[2]);
        assert!(px[0] > 80 && px[0] < 120, "red {}", px[0]);
    }

    #[test]
    fn test_multiply_and_screen_formulas() {
        let base = [128, 128, 128, 255];
        let top = [128, 255, 0, 255];
        let m = blend_pixel(base, top, BlendMode::Multiply, 1.0);
        assert_eq!(m, [64, 128, 0, 255]);
        let s = blend_pixel(base, top, BlendMode::Screen, 1.0);
        assert_eq!(s[1], 255);
        assert_eq!(s[2], 128);
    }

    #[test]
    fn test_soft_light_neutral_top_keeps_base() {
        let base = [90, 160, 220, 255];
        let out = blend_pixel(base, [128, 128, 128, 255], BlendMode::SoftLight, 1.0);
        for c in 0..3 {
            assert!((out[c] as i32 - base[c] as i32).abs() <= 1);
        }
    }

    #[test]
    fn test_overlay_darkens_shadows_and_lightens_highlights() {
        // Dark backdrop channel multiplies, light backdrop channel screens.
        let dark = blend_pixel([64, 64, 64, 255], [200, 200, 200, 255], BlendMode::Overlay, 1.0);
        assert_eq!(dark, [100, 100, 100, 255]);
        let light = blend_pixel([192, 192, 192, 255], [64, 64, 64, 255], BlendMode::Overlay, 1.0);
        assert_eq!(light, [161, 161, 161, 255]);

        let mixed = blend_pixel([64, 192, 128, 255], [200, 64, 128, 255], BlendMode::Overlay, 1.0);
        assert_eq!(&mixed[..2], &[100, 161]);
    }

    #[test]
    fn test_multiply_at_half_opacity_over_opaque_base() {
        let out = blend_pixel([200, 100, 50, 255], [100, 200, 0, 255], BlendMode::Multiply, 0.5);
        let expected = [139, 89, 25, 255];
        for c in 0..4 {
            assert!((out[c] as i32 - expected[c] as i32).abs() <= 1, "channel {}: {:?}", c, out);
        }
    }

    #[test]
    fn test_merge_applies_blend_mode() {
        let mut stack = two_layer_stack();
        let ids = stack.ordered_ids();
        stack.layer_mut(ids[1]).unwrap().blend_mode = BlendMode::Multiply;
        let merged = stack.merge_layers(&ids).unwrap();

        let buffer = stack.get(merged).unwrap().buffer();
        // Blue multiplied over orange keeps only the blue channel of the base.
        assert_eq!(buffer.pixel(0, 0), Some(Rgba([0, 0, 50, 255])));
        assert_eq!(buffer.pixel(6, 0), Some(Rgba([200, 100, 50, 255])));
        assert_eq!(render(&stack).unwrap().pixel(0, 0), Some(Rgba([0, 0, 50, 255])));
    }

    #[test]
    fn test_blend_over_transparent_backdrop_keeps_source() {
        let out = blend_pixel([0, 0, 0, 0], [10, 20, 30, 255], BlendMode::Multiply, 1.0);
        assert_eq!(out, [10, 20, 30, 255]);
    }

    #[test]
    fn test_encode_png_roundtrips_dimensions() {
        let stack = two_layer_stack();
        let png = encode_png(render(&stack).unwrap().as_image()).unwrap();
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 8));
    }
}
