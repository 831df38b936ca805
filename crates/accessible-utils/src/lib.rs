pub mod archive;
pub mod encoding;
pub mod href;
pub mod mime;
