//! beacon-core: Pure parsing + deduplication library for beacon relays.
//!
//! No async and no network: the frame parser, the dedup window state
//! machine, and the envelope model. `beacon-gateway` wraps these in the
//! actor, hand-off, and transport runtime.

pub mod clock;
pub mod config;
pub mod envelope;
pub mod frame;
pub mod location;
pub mod types;
pub mod window;

// Re-export commonly used types at crate root
pub use clock::{Clock, ManualClock, SystemClock};
pub use envelope::{group_by_location, Credentials, Envelope, LocationGroup, PublishItem};
pub use frame::{parse_frame, ControlFrame, ControlKind, DataFrame, ParsedFrame, RawFrame};
pub use location::{LocationFix, LocationProvider, NoLocation, SharedLocation};
pub use types::*;
pub use window::{Admission, DedupWindow, DetectionRecord, WindowEntry, WindowStats};
