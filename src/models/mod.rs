//! Data models

mod audit;
mod patch;
mod project;
mod requirement;
mod sprint;
mod task;

pub use audit::*;
pub use patch::{double_option, ApplyPatch, NewEntity};
pub use project::*;
pub use requirement::*;
pub use sprint::*;
pub use task::*;
