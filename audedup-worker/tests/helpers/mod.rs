//! Test Helper Utilities
//!
//! Shared utilities for testing audedup-worker

#![allow(dead_code)]

pub mod audio_generator;
pub mod db_utils;

pub use audio_generator::{write_melody_wav, write_text_file, AudioConfig};
pub use db_utils::{create_test_db, seed_track, seed_unknown};
