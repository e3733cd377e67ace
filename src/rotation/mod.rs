//! Log rotation engine
//!
//! A [`RotatingFile`] writes to a time/size-rotated series of files behind a
//! stable alias path. Closed files are compressed and pruned by a background
//! maintenance worker.

mod alias;
mod clock;
mod compress;
mod controller;
mod maintenance;
mod policy;
mod sweep;

pub use alias::TEMP_LINK_SUFFIX;
pub use clock::{Clock, ManualClock, SystemClock};
pub use compress::{archive_path, compress};
pub use controller::RotatingFile;
pub use maintenance::RotationEvent;
pub use policy::{
    default_name_pattern, pattern_to_glob, Retention, RotationPolicy, RotationPolicyBuilder,
    ARCHIVE_EXTENSION, DEFAULT_TIMESTAMP_FORMAT,
};
pub use sweep::{plan, sweep, SweepReport, LOCK_SUFFIX};
