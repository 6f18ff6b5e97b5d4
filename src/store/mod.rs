//! On-disk stores shared across runs.

mod checkpoints;

pub use checkpoints::{CHECKPOINT_DIR, CheckpointStore};
