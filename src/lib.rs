#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Outreach Core
//!
//! Reliable delivery and retry orchestration core for a multi-tenant
//! lead-conversion platform.
//!
//! ## Overview
//!
//! Every outbound side-effecting action (an AI call, an SMS, an email, a
//! replayed webhook) goes through this crate so that it executes despite
//! unreliable downstream providers, without duplicate execution, without
//! hammering a provider that is already failing, and with a durable record
//! of permanently-failed work. The crate also owns the multi-step follow-up
//! campaign engine: a time-displaced, cancellable sequence of
//! channel-switching outreach actions per lead.
//!
//! ## Architecture
//!
//! A durable **priority task queue** holds all deferred work; a periodic
//! **dispatcher** claims due batches atomically (safe across processes) and
//! runs each task through an idempotency check, a per-dependency **circuit
//! breaker**, and an in-process **retry loop**. Failures either reschedule
//! the task on an exponential backoff curve or land it in the **dead-letter
//! sink** for operator review. Campaign steps, booking confirmations,
//! reminders, and webhook replays are all just tasks on the same queue.
//!
//! ## Module Organization
//!
//! - [`queue`] - Durable priority queue and the dispatch pipeline
//! - [`retry`] - Backoff curves and the in-process retry loop
//! - [`resilience`] - Per-dependency circuit breakers
//! - [`idempotency`] - Duplicate-request suppression
//! - [`dlq`] - Dead-letter sink and operator tooling
//! - [`followup`] - Follow-up campaign orchestration
//! - [`webhook`] - Webhook redelivery
//! - [`events`] - Domain events and alert forwarding
//! - [`storage`] - Store traits with in-memory and PostgreSQL backends
//! - [`services`] - Traits for the outward-facing provider seams
//! - [`config`] - YAML configuration with environment overlays
//! - [`bootstrap`] - Wires everything into a runnable system
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use outreach_core::bootstrap::{Collaborators, CoreSystem, Stores};
//! use outreach_core::config::CoreConfig;
//! use outreach_core::services::{HttpWebhookPoster, LogAlertSender};
//! # use outreach_core::services::{MessageSender, LeadStatusProvider};
//! # use std::sync::Arc;
//!
//! # fn example(
//! #     message_sender: Arc<dyn MessageSender>,
//! #     lead_status: Arc<dyn LeadStatusProvider>,
//! # ) -> outreach_core::error::Result<()> {
//! let collaborators = Collaborators {
//!     message_sender,
//!     lead_status,
//!     alert_sender: Arc::new(LogAlertSender),
//!     webhook_poster: Arc::new(HttpWebhookPoster::default()),
//! };
//! let mut system = CoreSystem::new(CoreConfig::default(), Stores::in_memory(), collaborators);
//! let handles = system.start()?;
//! # let _ = handles;
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod config;
pub mod dlq;
pub mod error;
pub mod events;
pub mod followup;
pub mod idempotency;
pub mod logging;
pub mod models;
pub mod queue;
pub mod resilience;
pub mod retry;
pub mod services;
pub mod storage;
pub mod webhook;

pub use error::{CoreError, ExecutionError, Result, StorageError};
