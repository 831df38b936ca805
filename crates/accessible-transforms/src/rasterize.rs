//! Element rasterizer.
//!
//! The element is cloned into a standalone SVG (`foreignObject` wrapper with
//! every computed style inlined), the rendering engine paints that SVG to a
//! PNG, and the PNG is flattened onto white and encoded as JPEG.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder, Rgb, RgbImage};

use accessible_core::error::{AccessibleError, Result};
use accessible_core::surface::{LayoutBox, LiveDocument};

pub const DEFAULT_JPEG_QUALITY: u8 = 70;

const MARGINS: [&str; 4] = ["margin-top", "margin-bottom", "margin-left", "margin-right"];

/// `prop: value;` pairs joined by spaces. Double quotes become single quotes
/// so the result can sit inside a double-quoted attribute.
pub fn inline_style(properties: &[(String, String)]) -> String {
    properties
        .iter()
        .map(|(prop, value)| format!("{}: {};", prop, value.replace('"', "'")))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Leading unsigned integer of a computed value, 0 when there is none.
pub fn leading_integer(value: &str) -> u32 {
    let digits: String = value.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

/// Canvas size: the layout box truncated toward zero, plus the margins.
pub fn dimensions(layout: LayoutBox, style: &[(String, String)]) -> (u32, u32) {
    let margin = |name: &str| {
        style
            .iter()
            .find(|(prop, _)| prop == name)
            .map(|(_, value)| leading_integer(value))
            .unwrap_or(0)
    };
    let [top, bottom, left, right] = MARGINS.map(margin);

    let width = (layout.width.trunc() as u32)
        .saturating_add(left)
        .saturating_add(right);
    let height = (layout.height.trunc() as u32)
        .saturating_add(top)
        .saturating_add(bottom);
    (width, height)
}

pub fn build_svg(tag: &str, style: &str, inner_html: &str, width: u32, height: u32) -> String {
    format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}">
		<foreignObject width="100%" height="100%">
			<{tag} xmlns="http://www.w3.org/1999/xhtml" style="{style}">{inner_html}</{tag}>
		</foreignObject>
	</svg>"#
    )
}

/// Flatten a (possibly transparent) PNG onto white and encode it as JPEG.
pub fn png_to_jpeg(png: &[u8], quality: u8) -> Result<Vec<u8>> {
    let rgba = image::load_from_memory(png)
        .map_err(|e| AccessibleError::Image(format!("rendered bitmap did not decode: {}", e)))?
        .to_rgba8();
    let (width, height) = rgba.dimensions();

    let mut flat = RgbImage::new(width, height);
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = a as u32;
        let over_white = |c: u8| ((c as u32 * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        flat.put_pixel(x, y, Rgb([over_white(r), over_white(g), over_white(b)]));
    }

    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(Cursor::new(&mut buf), quality.clamp(1, 100));
    encoder
        .write_image(flat.as_raw(), width, height, ExtendedColorType::Rgb8)
        .map_err(|e| AccessibleError::Image(format!("JPEG encoding failed: {}", e)))?;
    Ok(buf)
}

/// Rasterize `element` to JPEG. `index` is the 1-based position used in errors.
pub async fn rasterize<D: LiveDocument>(
    document: &D,
    element: &D::Element,
    index: usize,
    quality: u8,
) -> Result<Vec<u8>> {
    let properties = document.computed_style(element).await?;
    let layout = document.layout_box(element).await?;
    let (width, height) = dimensions(layout, &properties);
    if width == 0 || height == 0 {
        return Err(AccessibleError::rasterization(
            index,
            format!("element has no area ({}x{})", width, height),
        ));
    }

    let tag = document.tag_name(element).await?;
    let inner = document.inner_html(element).await?;
    let svg = build_svg(&tag, &inline_style(&properties), &inner, width, height);

    let png = document
        .rasterize_svg(&svg, width, height)
        .await
        .map_err(|e| AccessibleError::rasterization(index, e))?;
    let jpeg = png_to_jpeg(&png, quality).map_err(|e| AccessibleError::rasterization(index, e))?;

    log::debug!(
        "{}: element {} rendered at {}x{} ({} bytes)",
        document.location(),
        index,
        width,
        height,
        jpeg.len()
    );
    Ok(jpeg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{png_bytes, FakeDocument};

    fn props(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_inline_style() {
        let style = inline_style(&props(&[
            ("display", "inline"),
            ("font-family", "\"Noto Sans\", serif"),
        ]));
        assert_eq!(style, "display: inline; font-family: 'Noto Sans', serif;");
    }

    #[test]
    fn test_leading_integer() {
        assert_eq!(leading_integer("16px"), 16);
        assert_eq!(leading_integer("12.75px"), 12);
        assert_eq!(leading_integer("auto"), 0);
        assert_eq!(leading_integer("-4px"), 0);
        assert_eq!(leading_integer(""), 0);
    }

    #[test]
    fn test_dimensions_add_margins() {
        let layout = LayoutBox {
            width: 120.9,
            height: 40.2,
        };
        let style = props(&[
            ("margin-top", "16px"),
            ("margin-bottom", "16px"),
            ("margin-left", "auto"),
            ("margin-right", "3.5px"),
        ]);
        assert_eq!(dimensions(layout, &style), (123, 72));
        assert_eq!(dimensions(layout, &[]), (120, 40));
    }

    #[test]
    fn test_build_svg() {
        let svg = build_svg("span", "color: red;", "⠓⠑", 10, 20);
        assert!(svg.starts_with(r#"<svg xmlns="http://www.w3.org/2000/svg" width="10" height="20">"#));
        assert!(svg.contains(r#"<foreignObject width="100%" height="100%">"#));
        assert!(svg.contains(
            r#"<span xmlns="http://www.w3.org/1999/xhtml" style="color: red;">⠓⠑</span>"#
        ));
    }

    #[test]
    fn test_transparent_png_becomes_white_jpeg() {
        let png = png_bytes(4, 3, [0, 0, 0, 0]);
        let jpeg = png_to_jpeg(&png, 70).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        let decoded = image::load_from_memory(&jpeg).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (4, 3));
        assert!(decoded.pixels().all(|p| p.0.iter().all(|&c| c > 245)));
    }

    #[test]
    fn test_opaque_pixels_survive() {
        let png = png_bytes(8, 8, [0, 0, 0, 255]);
        let decoded = image::load_from_memory(&png_to_jpeg(&png, 90).unwrap())
            .unwrap()
            .to_rgb8();
        assert!(decoded.pixels().all(|p| p.0.iter().all(|&c| c < 10)));
    }

    #[test]
    fn test_garbage_bitmap_is_an_error() {
        assert!(matches!(
            png_to_jpeg(b"not a png", 70),
            Err(AccessibleError::Image(_))
        ));
    }

    #[tokio::test]
    async fn test_rasterize_element() {
        let doc = FakeDocument::new(
            "ch1.xhtml",
            r#"<html><head></head><body><span class="braille">⠓⠑⠇⠇⠕</span></body></html>"#,
        );
        let el = doc.query_all(".braille").await.unwrap()[0];
        let jpeg = rasterize(&doc, &el, 1, 70).await.unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        let svgs = doc.rendered_svgs();
        assert_eq!(svgs.len(), 1);
        assert!(svgs[0].contains(r#"<span xmlns="http://www.w3.org/1999/xhtml""#));
        assert!(svgs[0].contains("font-family: 'Noto Sans', serif;"));
        assert!(svgs[0].contains(">⠓⠑⠇⠇⠕</span>"));
    }

    #[tokio::test]
    async fn test_engine_rejection_names_index() {
        let doc = FakeDocument::new(
            "ch1.xhtml",
            r#"<html><head></head><body><span class="braille"><i data-fail="">x</i></span></body></html>"#,
        );
        let el = doc.query_all(".braille").await.unwrap()[0];
        match rasterize(&doc, &el, 2, 70).await {
            Err(AccessibleError::RasterizationFailed { index, .. }) => assert_eq!(index, 2),
            other => panic!("expected RasterizationFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_zero_area_fails() {
        let doc = FakeDocument::new(
            "ch1.xhtml",
            r#"<html><head></head><body><span class="braille"></span></body></html>"#,
        );
        let el = doc.query_all(".braille").await.unwrap()[0];
        match rasterize(&doc, &el, 1, 70).await {
            Err(AccessibleError::RasterizationFailed { index, reason }) => {
                assert_eq!(index, 1);
                assert!(reason.contains("no area"));
            }
            other => panic!("expected RasterizationFailed, got {:?}", other),
        }
        assert!(doc.rendered_svgs().is_empty());
    }
}
