//! Rate limit classes and their token bucket parameters.

/// The message classes that are rate limited individually per user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageClass {
    Action,
    Chat,
    DmCommand,
}

/// The refill window shared by all classes, in seconds.
pub const RATE_WINDOW_SECS: u64 = 60;

impl MessageClass {
    /// The bucket size, i.e. how many messages of this class are allowed
    /// per [`RATE_WINDOW_SECS`].
    pub fn burst(&self) -> u32 {
        match self {
            MessageClass::Action => 30,
            MessageClass::Chat => 20,
            MessageClass::DmCommand => 60,
        }
    }
}

/// How many rate limit violations within the window close the connection.
pub const VIOLATION_LIMIT: u32 = 10;
