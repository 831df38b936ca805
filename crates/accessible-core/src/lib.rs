pub mod config;
pub mod error;
pub mod model;
pub mod paths;
pub mod session;
pub mod surface;
pub mod timeout;

pub use config::AccessibilityConfig;
pub use error::{AccessibleError, ErrorKind, Result};
pub use model::{ConvertedImage, PageContext, PageConversionResult, ReplacementRule};
pub use session::{ConversionSession, TimeoutPolicy, WorkflowDriver};
