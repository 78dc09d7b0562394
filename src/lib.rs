//! # glow_ambientd
//!
//! A Linux daemon that fades an ambient LED fixture (a PiGlow on I²C) with the
//! solar day and switches it off while a watched host is unreachable.
//!
//! ## Features
//!
//! - **Solar fades**: full brightness is reached at sunset and darkness at
//!   sunrise, each over a configurable transition centered on the event
//! - **Liveness gating**: a ping-based monitor pauses the cycle with a quick
//!   fade to off when the watched host goes down, and fades back up on return
//! - **Single brightness owner**: every level change goes through one task
//! - **Partial reload**: SIGHUP (or a file change) swaps in new coordinates
//!
//! ## Architecture
//!
//! The daemon uses a provider-based dependency injection system with:
//! - [`SystemCoordinator`](coordinator::SystemCoordinator) - Main lifecycle manager
//! - [`EventBus`](event::EventBus) - Inter-service communication
//! - [`AppState`](app_context::AppState) - Shared application state
//! - Service providers for modular functionality
//!
//! ## Example
//!
//! ```no_run
//! use glow_ambientd::{application::Application, config::ConfigManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config_manager = ConfigManager::load(None).await?;
//!     Application::builder()
//!         .with_config_manager(config_manager)
//!         .build()
//!         .await?
//!         .run()
//!         .await
//! }
//! ```

pub mod app_context;
pub mod application;
pub mod brightness;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod drivers;
pub mod event;
pub mod liveness;
pub mod pause;
pub mod providers;
pub mod scheduler;
pub mod solar;
pub mod task_manager;
