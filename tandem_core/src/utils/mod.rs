// tandem_core/src/utils/mod.rs

pub mod linalg;
pub mod rotations;
