//! Validation utilities for request parameters

pub mod numeric;
pub mod prompts;

pub use numeric::NumericValidator;
pub use prompts::{
    PromptValidator, DEFAULT_INFERENCE_STEPS, INFERENCE_STEPS_RANGE, MAX_DILATE_KERNEL,
    MAX_PROMPT_CHARS,
};
