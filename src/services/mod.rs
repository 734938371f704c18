//! Stateless services used by the pipeline and the HTTP layer

pub mod codec;
pub mod dilation;

pub use codec::{ImageCodec, ImageSource, ALLOWED_CONTENT_TYPES};
pub use dilation::MaskDilator;
