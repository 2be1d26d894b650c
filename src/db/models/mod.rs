pub mod pending_event;

pub use pending_event::{BufferEntry, EntryDefect};
