//! Shared fixtures for integration tests

#![allow(dead_code)]

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use inpaint_server::{
    backends::MockModelFactory, config::ServiceConfig, context::AppContext, types::PixelBuffer,
};
use std::{io::Cursor, sync::Arc};

/// Gradient image whose pixels depend on `seed`
pub fn test_image(width: u32, height: u32, seed: u8) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([seed, (x % 256) as u8, (y % 256) as u8])
    })
}

pub fn pixel_buffer(width: u32, height: u32, seed: u8) -> PixelBuffer {
    PixelBuffer::from_rgb(test_image(width, height, seed)).unwrap()
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(test_image(width, height, 40))
        .write_to(&mut buffer, ImageFormat::Png)
        .unwrap();
    buffer.into_inner()
}

pub fn png_data_uri(width: u32, height: u32) -> String {
    format!("data:image/png;base64,{}", STANDARD.encode(png_bytes(width, height)))
}

/// Dimensions of the image inside a PNG data URI
pub fn data_uri_dimensions(uri: &str) -> (u32, u32) {
    let payload = uri
        .strip_prefix("data:image/png;base64,")
        .expect("PNG data URI");
    let bytes = STANDARD.decode(payload).unwrap();
    let image = image::load_from_memory(&bytes).unwrap();
    (image.width(), image.height())
}

pub fn mock_config() -> ServiceConfig {
    ServiceConfig::builder().use_mock_models(true).build().unwrap()
}

/// Context over a clone of `factory`, so the caller can inspect its call log
pub fn mock_context(factory: &MockModelFactory) -> Arc<AppContext> {
    AppContext::new(mock_config(), Arc::new(factory.clone())).unwrap()
}
