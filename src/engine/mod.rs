// src/engine/mod.rs
//
// Pure grading logic. Nothing here touches storage.

pub mod clock;
pub mod normalize;
pub mod ranking;
pub mod scoring;
