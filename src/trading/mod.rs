//! Trading logic: position sizing, cap discovery, order submission.

mod caps;
mod sizer;
mod submitter;

pub use caps::CapCache;
pub use sizer::{apply_caps, plan_size, SizeCaps};
pub use submitter::{EntryOrder, OrderSubmitter};
