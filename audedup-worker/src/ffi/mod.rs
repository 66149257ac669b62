//! Foreign function interfaces

pub mod chromaprint;
