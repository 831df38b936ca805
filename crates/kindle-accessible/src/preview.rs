//! Local gallery of the generated images, grouped by page.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use accessible_core::model::ConvertedImage;
use accessible_utils::href::encode_href;

/// Images grouped by page name, both in first-seen order.
fn group_by_page(images: &[ConvertedImage]) -> Vec<(String, Vec<&ConvertedImage>)> {
    let mut groups: Vec<(String, Vec<&ConvertedImage>)> = Vec::new();
    for image in images {
        let page = image.page_name();
        match groups.iter_mut().find(|(name, _)| *name == page) {
            Some((_, members)) => members.push(image),
            None => groups.push((page, vec![image])),
        }
    }
    groups
}

fn render_index(images: &[ConvertedImage]) -> String {
    let mut html = String::from(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
         <title>kindle-accessible preview</title>\n\
         <style>body{font-family:sans-serif;margin:2em}figure{display:inline-block;margin:.5em;\
         padding:.5em;border:1px solid #ccc}img{max-width:100%}</style>\n</head>\n<body>\n",
    );
    html.push_str(&format!("<h1>{} image(s)</h1>\n", images.len()));

    for (page, members) in group_by_page(images) {
        html.push_str(&format!(
            "<section>\n<h2>{}</h2>\n",
            html_escape::encode_text(&page)
        ));
        for image in members {
            // alt_text is already escaped for attribute and text use.
            html.push_str(&format!(
                "<figure><img src=\"{}\" alt=\"{}\" title=\"{}\"><figcaption>{}</figcaption></figure>\n",
                html_escape::encode_double_quoted_attribute(&encode_href(image.file_name())),
                image.alt_text,
                image.alt_text,
                image.alt_text
            ));
        }
        html.push_str("</section>\n");
    }

    html.push_str("</body>\n</html>\n");
    html
}

/// Write every image and an `index.html` into `dir`; returns the index path.
pub fn write_gallery(dir: &Path, images: &[ConvertedImage]) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    for image in images {
        let path = dir.join(image.file_name());
        std::fs::write(&path, &image.image_bytes)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    let index = dir.join("index.html");
    std::fs::write(&index, render_index(images))
        .with_context(|| format!("Failed to write {}", index.display()))?;
    Ok(index)
}
