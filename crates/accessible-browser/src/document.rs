use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::page::Page;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use accessible_core::error::{AccessibleError, Result};
use accessible_core::surface::{LayoutBox, LiveDocument};

use crate::script;

/// Handle to an element registered in the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle(u32);

#[derive(Deserialize)]
struct Rect {
    width: f64,
    height: f64,
}

/// A page loaded in Chromium.
pub struct ChromeDocument {
    page: Page,
    location: String,
}

impl ChromeDocument {
    pub(crate) fn new(page: Page, location: &str) -> Self {
        Self {
            page,
            location: location.to_string(),
        }
    }

    async fn eval<T: DeserializeOwned>(&self, expression: String) -> Result<T> {
        let params = EvaluateParams::builder()
            .expression(expression)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(AccessibleError::Surface)?;
        let result = self
            .page
            .evaluate_expression(params)
            .await
            .map_err(|e| AccessibleError::Surface(format!("{}: {}", self.location, e)))?;
        result.into_value().map_err(|e| {
            AccessibleError::Surface(format!("{}: unexpected script result: {}", self.location, e))
        })
    }

    async fn run(&self, expression: String) -> Result<()> {
        self.eval::<serde_json::Value>(expression).await.map(|_| ())
    }
}

impl LiveDocument for ChromeDocument {
    type Element = NodeHandle;

    fn location(&self) -> &str {
        &self.location
    }

    async fn query_all(&self, query: &str) -> Result<Vec<NodeHandle>> {
        let handles: Vec<u32> = self
            .eval(script::query_all(query))
            .await
            .map_err(|e| match e {
                AccessibleError::Surface(msg) if msg.contains("not a valid selector") => {
                    AccessibleError::invalid_selector(query, msg)
                }
                other => other,
            })?;
        Ok(handles.into_iter().map(NodeHandle).collect())
    }

    async fn validate_query(&self, query: &str) -> Result<()> {
        let error: Option<String> = self.eval(script::validate_query(query)).await?;
        match error {
            Some(reason) => Err(AccessibleError::invalid_selector(query, reason)),
            None => Ok(()),
        }
    }

    async fn inner_html(&self, element: &NodeHandle) -> Result<String> {
        self.eval(script::inner_html(element.0)).await
    }

    async fn tag_name(&self, element: &NodeHandle) -> Result<String> {
        self.eval(script::tag_name(element.0)).await
    }

    async fn computed_style(&self, element: &NodeHandle) -> Result<Vec<(String, String)>> {
        self.eval(script::computed_style(element.0)).await
    }

    async fn layout_box(&self, element: &NodeHandle) -> Result<LayoutBox> {
        let rect: Rect = self.eval(script::layout_box(element.0)).await?;
        Ok(LayoutBox {
            width: rect.width,
            height: rect.height,
        })
    }

    async fn rasterize_svg(&self, svg: &str, width: u32, height: u32) -> Result<Vec<u8>> {
        let data_url: String = self.eval(script::rasterize_svg(svg, width, height)).await?;
        script::decode_png_data_url(&data_url)
    }

    async fn inject_style(&self, css: &str) -> Result<NodeHandle> {
        let handle: u32 = self.eval(script::inject_style(css)).await?;
        Ok(NodeHandle(handle))
    }

    async fn append_to_head(&self, markup: &str) -> Result<()> {
        self.run(script::append_to_head(markup)).await
    }

    async fn insert_after(&self, element: &NodeHandle, markup: &str) -> Result<()> {
        self.run(script::insert_after(element.0, markup)).await
    }

    async fn remove(&self, element: &NodeHandle) -> Result<()> {
        self.run(script::remove(element.0)).await
    }

    async fn serialize(&self) -> Result<String> {
        self.eval(script::SERIALIZE.to_string()).await
    }
}

/// Block until the loaded document and its fonts are ready.
pub(crate) async fn wait_until_ready(page: &Page, location: &str) -> Result<()> {
    ChromeDocument::new(page.clone(), location)
        .run(script::READY.to_string())
        .await
}
