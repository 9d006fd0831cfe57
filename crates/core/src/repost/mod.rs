//! Backdated repost.
//!
//! A change at posting time `T` invalidates every later movement of the
//! affected pairs and, through dependencies, of other pairs. This module
//! determines that scope and recomputes it in one chronological pass.

pub mod engine;
pub mod scope;
pub mod types;


pub use engine::RepostEngine;
pub use types::{RepostOutcome, RepostReason, RepostTrigger, RepostWindow};
