// ==============================================================================
// lib.rs - Genetics Sample Index Library
// ==============================================================================
// Description: Library interface for the sample index and variant staging engine
// Author: Matt Barham
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 0.1.0
// ==============================================================================

pub mod config;
pub mod error;
pub mod genotype;
pub mod index;
pub mod metadata;
pub mod models;
pub mod parsers;
pub mod schema;
pub mod source;
pub mod stage;

pub use error::{IndexError, Result};
