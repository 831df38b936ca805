//! Page conversion: match elements, rasterize them, and rewrite the page
//! with `<img>` replacements.

pub mod alt_text;
pub mod matcher;
pub mod page;
pub mod rasterize;

#[cfg(test)]
mod testing;

pub use page::ImageReplacement;
