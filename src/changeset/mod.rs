//! Change previews.
//!
//! Updates are never applied directly: they are staged as a change set,
//! summarised, and then either executed or deleted.

mod previewer;
mod summary;

pub use previewer::{ChangeHandle, ChangePreviewer, StageOutcome, change_set_name};
