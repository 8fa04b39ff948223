//! Genrelay - streaming chat relay and image-generation job service.

// ============================================================================
// Core Infrastructure
// ============================================================================

pub mod background;
pub mod commands;
pub mod config;

// ============================================================================
// Server & HTTP
// ============================================================================

pub mod api;
pub mod handlers;
pub mod server;
pub mod sse;

// ============================================================================
// Domain
// ============================================================================

pub mod diversify;
pub mod jobs;
pub mod llm;
pub mod persist;
pub mod relay;
pub mod worker;
