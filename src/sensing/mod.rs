pub mod capture;
pub mod foreground;
pub mod notifications;
pub mod phash;
pub mod slot;
pub mod throttle;

pub use capture::{run_frame_source, CaptureSurface, CommandCapture};
pub use foreground::{
    CommandUsageStats, ForegroundResolver, UsageRecord, UsageStatsSource, UNKNOWN_APP,
};
pub use notifications::{run_notification_feed, NotificationFilter};
pub use slot::{latest_slot, SlotClosed, SlotReceiver, SlotSender};
pub use throttle::{Admission, GatePermit, ThrottleGate};
