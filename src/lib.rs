//! # pipeline-orchestrator
//!
//! Workflow orchestration engine for a multi-step report analysis pipeline.
//!
//! A task is accepted through direct creation or at-least-once push
//! delivery, tracked through its workflow's statuses in a [`store::TaskStore`],
//! and driven by a [`workflow::WorkflowExecutor`] that calls the data-fetch,
//! inference, and chart services through the [`resilience`] wrapper.
//! Completed results go to a [`publish::ResultPublisher`].

pub mod collaborator;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod model;
pub mod publish;
pub mod resilience;
pub mod server;
pub mod store;
pub mod telemetry;
pub mod workflow;
