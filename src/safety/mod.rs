//! Filesystem safety for user-controlled names.
//!
//! Everything that turns request data into a path goes through here:
//! - Upload file names are sanitized and de-duplicated before they are written
//! - Download paths (run id + file name) are resolved and checked for containment
//!
//! ```text
//!  upload "../../etc/x y.png" ──► safe_filename ──► "x_y.png"
//!                                      │
//!                                      └──► unique_filename ──► "x_y-1.png"
//!
//!  GET /api/file/{run_id}/{name} ──► resolve(root, root/run_id)
//!                                       └──► resolve(run_dir, run_dir/name)
//! ```

mod filenames;
mod path_guard;

pub use filenames::{UsedNames, indexed_filename, safe_filename, split_extension, unique_filename};
pub use path_guard::resolve;
