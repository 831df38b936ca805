//! In-memory rendering engine for unit tests.
//!
//! The DOM is a `scraper` tree mutated in place. Computed styles and layout
//! are synthetic but deterministic. Markers in an element's inner markup steer
//! the SVG painter: `data-fail` rejects the SVG, `data-garbage` returns bytes
//! that are not a PNG, `data-slow` never finishes within a minute.
//! Selectors go through `scraper`, with `:lang(x)` supported on top.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::time::Duration;

use ego_tree::{NodeId, NodeRef, Tree};
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, Rgba, RgbaImage};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};

use accessible_core::error::{AccessibleError, Result};
use accessible_core::surface::{LayoutBox, LiveDocument, RenderSurface};

pub const CHAR_WIDTH: f64 = 10.4;
pub const LINE_HEIGHT: f64 = 20.7;

static LANG_PSEUDO: Lazy<Regex> = Lazy::new(|| Regex::new(r":lang\(\s*([\w-]+)\s*\)").unwrap());

fn parse_selector(query: &str) -> Result<Selector> {
    let rewritten = LANG_PSEUDO.replace_all(query, r#"[lang|="$1"]"#);
    Selector::parse(&rewritten)
        .map_err(|e| AccessibleError::invalid_selector(query, format!("{:?}", e)))
}

pub fn png_bytes(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, Rgba(rgba));
    let mut buf = Vec::new();
    PngEncoder::new(&mut buf)
        .write_image(img.as_raw(), width, height, ExtendedColorType::Rgba8)
        .unwrap();
    buf
}

pub struct FakeDocument {
    location: String,
    html: RefCell<Html>,
    injected_styles: RefCell<Vec<NodeId>>,
    svgs: RefCell<Vec<String>>,
    queries: Cell<usize>,
    validated: RefCell<Vec<String>>,
}

impl FakeDocument {
    pub fn new(location: &str, markup: &str) -> Self {
        Self {
            location: location.to_string(),
            html: RefCell::new(Html::parse_document(markup)),
            injected_styles: RefCell::new(Vec::new()),
            svgs: RefCell::new(Vec::new()),
            queries: Cell::new(0),
            validated: RefCell::new(Vec::new()),
        }
    }

    /// `id` attribute of `element`, empty if it has none.
    pub fn id_of(&self, element: NodeId) -> String {
        let html = self.html.borrow();
        let id = html
            .tree
            .get(element)
            .and_then(ElementRef::wrap)
            .and_then(|e| e.value().id())
            .unwrap_or_default()
            .to_string();
        id
    }

    pub fn query_count(&self) -> usize {
        self.queries.get()
    }

    /// Queries passed to `validate_query`, in call order.
    pub fn validated_queries(&self) -> Vec<String> {
        self.validated.borrow().clone()
    }

    /// Every SVG handed to the painter, in call order.
    pub fn rendered_svgs(&self) -> Vec<String> {
        self.svgs.borrow().clone()
    }

    pub fn markup(&self) -> String {
        let html = self.html.borrow();
        let markup = html.root_element().html();
        markup
    }

    fn pre_style_active(&self) -> bool {
        let html = self.html.borrow();
        self.injected_styles
            .borrow()
            .iter()
            .any(|id| html.tree.get(*id).is_some_and(|n| n.parent().is_some()))
    }

    fn with_element<R>(&self, element: &NodeId, f: impl FnOnce(ElementRef<'_>) -> R) -> Result<R> {
        let html = self.html.borrow();
        let value = html.tree.get(*element).and_then(ElementRef::wrap).map(f);
        value.ok_or_else(|| AccessibleError::Surface(format!("stale element {:?}", element)))
    }

    fn head(&self) -> Result<NodeId> {
        let selector = Selector::parse("head").unwrap();
        let html = self.html.borrow();
        let head = html.root_element().select(&selector).next().map(|e| e.id());
        head.ok_or_else(|| AccessibleError::Surface("document has no <head>".to_string()))
    }

    /// Parse `markup` and copy its top-level nodes into the tree, detached.
    fn parse_nodes(&self, markup: &str) -> Vec<NodeId> {
        let fragment = Html::parse_fragment(markup);
        let mut html = self.html.borrow_mut();
        fragment
            .root_element()
            .children()
            .map(|child| graft(&mut html.tree, child))
            .collect()
    }
}

fn graft(tree: &mut Tree<Node>, source: NodeRef<'_, Node>) -> NodeId {
    let id = tree.orphan(source.value().clone()).id();
    for child in source.children() {
        let child_id = graft(tree, child);
        tree.get_mut(id).unwrap().append_id(child_id);
    }
    id
}

impl LiveDocument for FakeDocument {
    type Element = NodeId;

    fn location(&self) -> &str {
        &self.location
    }

    async fn validate_query(&self, query: &str) -> Result<()> {
        self.validated.borrow_mut().push(query.to_string());
        parse_selector(query).map(|_| ())
    }

    async fn query_all(&self, query: &str) -> Result<Vec<NodeId>> {
        self.queries.set(self.queries.get() + 1);
        let selector = parse_selector(query)?;
        let html = self.html.borrow();
        let found = html.root_element().select(&selector).map(|e| e.id()).collect();
        Ok(found)
    }

    async fn inner_html(&self, element: &NodeId) -> Result<String> {
        self.with_element(element, |e| e.inner_html())
    }

    async fn tag_name(&self, element: &NodeId) -> Result<String> {
        self.with_element(element, |e| e.value().name().to_string())
    }

    async fn computed_style(&self, element: &NodeId) -> Result<Vec<(String, String)>> {
        let font_size = if self.pre_style_active() { "28px" } else { "16px" };
        let display = self.with_element(element, |e| match e.value().name() {
            "p" | "div" => "block",
            _ => "inline",
        })?;
        Ok([
            ("display", display),
            ("font-family", "\"Noto Sans\", serif"),
            ("font-size", font_size),
            ("margin-top", "4px"),
            ("margin-bottom", "4px"),
            ("margin-left", "0px"),
            ("margin-right", "auto"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect())
    }

    async fn layout_box(&self, element: &NodeId) -> Result<LayoutBox> {
        let chars = self.with_element(element, |e| {
            e.text().map(|t| t.chars().count()).sum::<usize>()
        })?;
        if chars == 0 {
            return Ok(LayoutBox::default());
        }
        Ok(LayoutBox {
            width: chars as f64 * CHAR_WIDTH,
            height: LINE_HEIGHT,
        })
    }

    async fn rasterize_svg(&self, svg: &str, width: u32, height: u32) -> Result<Vec<u8>> {
        self.svgs.borrow_mut().push(svg.to_string());
        if svg.contains("data-fail") {
            return Err(AccessibleError::Surface("SVG image failed to load".to_string()));
        }
        if svg.contains("data-slow") {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        if svg.contains("data-garbage") {
            return Ok(b"garbage".to_vec());
        }
        Ok(png_bytes(width, height, [0, 0, 0, 255]))
    }

    async fn inject_style(&self, css: &str) -> Result<NodeId> {
        let head = self.head()?;
        let nodes = self.parse_nodes(&format!("<style>{}</style>", css));
        let style = *nodes
            .first()
            .ok_or_else(|| AccessibleError::Surface("style did not parse".to_string()))?;
        self.html.borrow_mut().tree.get_mut(head).unwrap().append_id(style);
        self.injected_styles.borrow_mut().push(style);
        Ok(style)
    }

    async fn append_to_head(&self, markup: &str) -> Result<()> {
        let head = self.head()?;
        let nodes = self.parse_nodes(markup);
        let mut html = self.html.borrow_mut();
        for node in nodes {
            html.tree.get_mut(head).unwrap().append_id(node);
        }
        Ok(())
    }

    async fn insert_after(&self, element: &NodeId, markup: &str) -> Result<()> {
        let nodes = self.parse_nodes(markup);
        let mut html = self.html.borrow_mut();
        let mut anchor = *element;
        for node in nodes {
            html.tree
                .get_mut(anchor)
                .ok_or_else(|| AccessibleError::Surface("stale element".to_string()))?
                .insert_id_after(node);
            anchor = node;
        }
        Ok(())
    }

    async fn remove(&self, element: &NodeId) -> Result<()> {
        let mut html = self.html.borrow_mut();
        if let Some(mut node) = html.tree.get_mut(*element) {
            node.detach();
        }
        Ok(())
    }

    async fn serialize(&self) -> Result<String> {
        Ok(self.markup())
    }
}

/// Serves fixed page markup by archive path.
pub struct FakeSurface {
    pages: HashMap<String, String>,
    pub loaded: Vec<String>,
}

impl FakeSurface {
    pub fn new(pages: &[(&str, &str)]) -> Self {
        Self {
            pages: pages
                .iter()
                .map(|(path, html)| (path.to_string(), html.to_string()))
                .collect(),
            loaded: Vec::new(),
        }
    }
}

impl RenderSurface for FakeSurface {
    type Document = FakeDocument;

    async fn load(&mut self, page_path: &str) -> Result<FakeDocument> {
        self.loaded.push(page_path.to_string());
        let html = self
            .pages
            .get(page_path)
            .ok_or_else(|| AccessibleError::Surface(format!("no such page: {}", page_path)))?;
        Ok(FakeDocument::new(page_path, html))
    }
}
