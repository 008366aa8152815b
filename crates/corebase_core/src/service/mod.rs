//! Business layer.
//!
//! # Responsibility
//! - Compose repositories under one unit of work for use-case code.
//! - Keep callers decoupled from session ownership details.

pub mod business_service;
