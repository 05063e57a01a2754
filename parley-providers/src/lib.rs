//! Text generation providers for parley
//!
//! This crate defines the generation seam used by the conversation manager
//! and ships a Gemini REST implementation of it.

pub mod base;
pub mod gemini;

pub use base::{
    GenerationConfig, GenerationProvider, HarmBlockThreshold, HarmCategory, ProviderError,
    ProviderResult, SafetySetting,
};
pub use gemini::GeminiClient;
