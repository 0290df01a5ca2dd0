//! Client for the remote video generation provider.
//!
//! The provider renders one short clip per asynchronous task. This crate
//! creates those tasks, polls them, and downloads the finished clips.
//! [`DashScopeProvider`] speaks the DashScope HTTP API; anything else can be
//! plugged in through [`GenerationProvider`].

pub mod client;
pub mod config;
pub mod dashscope;
pub mod error;
pub mod provider;
pub mod retry;
pub mod types;

pub use client::RemoteTaskClient;
pub use config::ProviderConfig;
pub use dashscope::DashScopeProvider;
pub use error::{ProviderError, ProviderResult};
pub use provider::GenerationProvider;
pub use retry::{retry_async, FailureTracker, RetryConfig};
pub use types::{segment_prompt, ProviderResponse, TaskHandle, TaskParams, TaskPoll};
