pub mod gemini;
pub mod image;
