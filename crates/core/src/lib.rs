//! WorldSense Core
//!
//! Contracts for the inference collaborators a session server talks to, plus
//! reference backends for OpenAI-compatible services:
//!
//! - `image`: decoding and validation of base64 image payloads.
//! - `responder`: vision-language generation, single-shot and streamed.
//! - `transcriber`: speech-to-text.
//! - `synthesizer`: text-to-speech stored as fetchable audio files.

pub mod image;
pub mod responder;
pub mod synthesizer;
pub mod transcriber;

pub use image::{DecodeError, ImageFormat, ImageFrame};
pub use responder::{GenerationOptions, OpenAICompatibleResponder, Responder, TokenStream};
pub use synthesizer::{SpeechFileSynthesizer, Synthesizer, VoiceInfo};
pub use transcriber::{AudioClip, OpenAITranscriber, Transcriber, Transcription};
