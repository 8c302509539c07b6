use crate::geometry::{overlay_rect, DisplaySize, PixelRect};
use crate::model::DetectedObject;
use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::{Rgba, RgbaImage};
use std::fmt::Write as _;

pub const BOX_COLOR: Rgba<u8> = Rgba([59, 130, 246, 255]);
const BOX_COLOR_HEX: &str = "#3b82f6";
const TAG_HEIGHT: f64 = 24.0;
const TAG_MAX_WIDTH: f64 = 120.0;

/// SVG overlay sized to the displayed image.
///
/// Returns `None` while the display size is unknown (zero), matching an
/// overlay that stays hidden until the image has been laid out.
pub fn render_svg(
    objects: &[DetectedObject],
    display: DisplaySize,
    image_href: Option<&str>,
) -> Option<String> {
    if display.is_empty() {
        return None;
    }
    let w = round_to(display.width, 2);
    let h = round_to(display.height, 2);

    let mut out = String::new();
    let _ = writeln!(
        out,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#
    );
    if let Some(href) = image_href {
        let _ = writeln!(
            out,
            r#"  <image href="{}" x="0" y="0" width="{w}" height="{h}" preserveAspectRatio="none" opacity="0.9"/>"#,
            escape_xml(href)
        );
    }
    for (idx, obj) in objects.iter().enumerate() {
        let rect = overlay_rect(&obj.box_2d, display);
        write_svg_object(&mut out, idx, &obj.name, rect);
    }
    out.push_str("</svg>\n");
    Some(out)
}

fn write_svg_object(out: &mut String, idx: usize, name: &str, rect: PixelRect) {
    let x = round_to(rect.x, 2);
    let y = round_to(rect.y, 2);
    let tag_y = round_to((rect.y - TAG_HEIGHT).max(0.0), 2);
    let tag_w = round_to(rect.width.min(TAG_MAX_WIDTH), 2);
    let text_x = round_to(rect.x + 6.0, 2);
    let text_y = round_to((rect.y - 7.0).max(16.0), 2);

    let _ = writeln!(out, r#"  <g data-index="{idx}">"#);
    let _ = writeln!(
        out,
        r#"    <rect x="{x}" y="{y}" width="{}" height="{}" fill="none" stroke="{BOX_COLOR_HEX}" stroke-width="2" stroke-dasharray="4"/>"#,
        round_to(rect.width, 2),
        round_to(rect.height, 2),
    );
    let _ = writeln!(
        out,
        r#"    <rect x="{x}" y="{tag_y}" width="{tag_w}" height="{TAG_HEIGHT}" fill="{BOX_COLOR_HEX}" rx="4"/>"#
    );
    let _ = writeln!(
        out,
        r#"    <text x="{text_x}" y="{text_y}" fill="white" font-size="12" font-weight="bold" font-family="sans-serif">{}</text>"#,
        escape_xml(name)
    );
    out.push_str("  </g>\n");
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Burns the boxes into a copy of the image at natural resolution.
///
/// The bitmap font only covers ASCII, so tags carry the 1-based object
/// number plus the name when it is ASCII.
pub fn render_raster(image: &RgbaImage, objects: &[DetectedObject]) -> RgbaImage {
    let mut out = image.clone();
    let (img_w, img_h) = out.dimensions();
    if img_w == 0 || img_h == 0 {
        return out;
    }
    let scale = auto_scale(img_w, img_h);
    let stroke = scale_default(2.0, scale, 2);
    let dash = scale_default(4.0, scale, 4);
    let text_scale = scale.round().max(1.0) as u32;
    let display = DisplaySize::natural(img_w, img_h);

    for (idx, obj) in objects.iter().enumerate() {
        let rect = overlay_rect(&obj.box_2d, display);
        let x = rect.x.round() as u32;
        let y = rect.y.round() as u32;
        let w = rect.width.round().max(1.0) as u32;
        let h = rect.height.round().max(1.0) as u32;

        draw_rect_outline(&mut out, x, y, w, h, auto_outline_color(BOX_COLOR), stroke + 2, 0);
        draw_rect_outline(&mut out, x, y, w, h, BOX_COLOR, stroke, dash);

        let label = tag_label(idx, &obj.name);
        let tag_h = (TAG_HEIGHT * scale).round() as i32;
        let tag_w = (TAG_MAX_WIDTH * scale).min(f64::from(w)).round().max(f64::from(tag_h)) as i32;
        let tag_x = x as i32;
        let tag_y = (y as i32 - tag_h).max(0);
        fill_rect_alpha(&mut out, tag_x, tag_y, tag_x + tag_w, tag_y + tag_h, BOX_COLOR);

        let pad = (6.0 * scale).round() as i32;
        let max_chars = ((tag_w - pad) / (8 * text_scale as i32)).max(1) as usize;
        let label: String = label.chars().take(max_chars).collect();
        let (_, _, _, text_bottom) = text_bbox(0, 0, &label, text_scale);
        let text_y = tag_y + (tag_h - text_bottom) / 2;
        draw_bitmap_text(&mut out, tag_x + pad, text_y, &label, Rgba([255, 255, 255, 255]), text_scale);
    }
    out
}

fn tag_label(idx: usize, name: &str) -> String {
    let name = name.trim();
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_graphic() || c == ' ') {
        format!("{} {name}", idx + 1)
    } else {
        format!("{}", idx + 1)
    }
}

fn auto_scale(img_w: u32, img_h: u32) -> f64 {
    let max_dim = f64::from(img_w.max(img_h).max(1));
    (max_dim / 1200.0).clamp(1.0, 2.0)
}

fn scale_default(value: f64, scale: f64, min_value: u32) -> u32 {
    ((value * scale).round() as i64).max(i64::from(min_value)) as u32
}

fn round_to(v: f64, digits: u32) -> f64 {
    let factor = 10f64.powi(digits as i32);
    (v * factor).round() / factor
}

fn color_luma(color: Rgba<u8>) -> f64 {
    let [r, g, b, _] = color.0;
    (0.2126 * f64::from(r) + 0.7152 * f64::from(g) + 0.0722 * f64::from(b)) / 255.0
}

fn auto_outline_color(color: Rgba<u8>) -> Rgba<u8> {
    if color_luma(color) > 0.6 {
        Rgba([0, 0, 0, 160])
    } else {
        Rgba([255, 255, 255, 160])
    }
}

fn blend_pixel(dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
    let a = f64::from(src[3]) / 255.0;
    if a <= 0.0 {
        return dst;
    }
    let inv = 1.0 - a;
    let mix = |d: u8, s: u8| (f64::from(d) * inv + f64::from(s) * a).round().clamp(0.0, 255.0) as u8;
    let out_a = (f64::from(dst[3]) + f64::from(src[3]) * inv)
        .round()
        .clamp(0.0, 255.0) as u8;
    Rgba([mix(dst[0], src[0]), mix(dst[1], src[1]), mix(dst[2], src[2]), out_a])
}

/// Outline of `thickness` pixels growing outward; `dash > 0` draws dash/gap runs.
#[allow(clippy::too_many_arguments)]
fn draw_rect_outline(
    img: &mut RgbaImage,
    x: u32,
    y: u32,
    w: u32,
    h: u32,
    color: Rgba<u8>,
    thickness: u32,
    dash: u32,
) {
    if w == 0 || h == 0 {
        return;
    }
    let img_w = img.width();
    let img_h = img.height();

    let x0 = x.min(img_w.saturating_sub(1));
    let y0 = y.min(img_h.saturating_sub(1));
    let x1 = (x + w.saturating_sub(1)).min(img_w.saturating_sub(1));
    let y1 = (y + h.saturating_sub(1)).min(img_h.saturating_sub(1));
    let on = |i: u32| dash == 0 || (i / dash) % 2 == 0;

    for t in 0..thickness.max(1) {
        let tx0 = x0.saturating_sub(t);
        let ty0 = y0.saturating_sub(t);
        let tx1 = (x1 + t).min(img_w.saturating_sub(1));
        let ty1 = (y1 + t).min(img_h.saturating_sub(1));

        for xx in tx0..=tx1 {
            if on(xx - tx0) {
                let top = *img.get_pixel(xx, ty0);
                img.put_pixel(xx, ty0, blend_pixel(top, color));
                let bottom = *img.get_pixel(xx, ty1);
                img.put_pixel(xx, ty1, blend_pixel(bottom, color));
            }
        }
        for yy in ty0..=ty1 {
            if on(yy - ty0) {
                let left = *img.get_pixel(tx0, yy);
                img.put_pixel(tx0, yy, blend_pixel(left, color));
                let right = *img.get_pixel(tx1, yy);
                img.put_pixel(tx1, yy, blend_pixel(right, color));
            }
        }
    }
}

fn fill_rect_alpha(img: &mut RgbaImage, x0: i32, y0: i32, x1: i32, y1: i32, color: Rgba<u8>) {
    if img.width() == 0 || img.height() == 0 {
        return;
    }
    let max_x_img = img.width() as i32 - 1;
    let max_y_img = img.height() as i32 - 1;
    let min_x = x0.min(x1).clamp(0, max_x_img);
    let max_x = x0.max(x1).clamp(0, max_x_img);
    let min_y = y0.min(y1).clamp(0, max_y_img);
    let max_y = y0.max(y1).clamp(0, max_y_img);
    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let dst = *img.get_pixel(x as u32, y as u32);
            img.put_pixel(x as u32, y as u32, blend_pixel(dst, color));
        }
    }
}

fn draw_bitmap_text(img: &mut RgbaImage, x: i32, y: i32, text: &str, color: Rgba<u8>, scale: u32) {
    let scale_i = scale.max(1) as i32;
    let mut cursor_x = x;
    for ch in text.chars() {
        let Some(glyph) = BASIC_FONTS.get(ch).or_else(|| BASIC_FONTS.get('?')) else {
            cursor_x += 8 * scale_i;
            continue;
        };
        for (row_idx, row) in glyph.iter().enumerate() {
            for col_idx in 0..8 {
                if (*row >> col_idx) & 1 == 0 {
                    continue;
                }
                let px = cursor_x + col_idx * scale_i;
                let py = y + row_idx as i32 * scale_i;
                for sy in 0..scale_i {
                    for sx in 0..scale_i {
                        let (tx, ty) = (px + sx, py + sy);
                        if tx >= 0 && ty >= 0 && tx < img.width() as i32 && ty < img.height() as i32 {
                            let dst = *img.get_pixel(tx as u32, ty as u32);
                            img.put_pixel(tx as u32, ty as u32, blend_pixel(dst, color));
                        }
                    }
                }
            }
        }
        cursor_x += 8 * scale_i;
    }
}

fn text_bbox(x: i32, y: i32, text: &str, scale: u32) -> (i32, i32, i32, i32) {
    let scale_i = scale.max(1) as i32;
    let width_chars = text.chars().count() as i32;
    (x, y, x + width_chars * 8 * scale_i, y + 8 * scale_i)
}
