//! Language-model analysis of parsed scripts.
//!
//! [`AnalysisClient`] owns the prompts, the retry loop and reply parsing;
//! the transport is any [`LlmBackend`], normally [`OpenAiBackend`].

pub mod backend;
pub mod client;
pub mod openai;
pub mod retry;

pub use backend::{LlmBackend, LlmError};
pub use client::{extract_json, AnalysisClient, AnalysisError, AnalysisTask, FullAnalysis};
pub use openai::OpenAiBackend;
pub use retry::{with_retry, Classify, ErrorKind, Exhausted, RetryPolicy};
