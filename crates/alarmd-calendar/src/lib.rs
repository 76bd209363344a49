//! Just enough iCalendar (RFC 5545) to schedule email alarms: a reader for
//! the component tree, event detail extraction for notification bodies, and
//! the reference [`IcsRecurrenceAdvancer`].

pub mod details;
pub mod ics;
pub mod recurrence;
pub mod rrule;

pub use details::{EventDetails, Person};
pub use ics::{parse_calendar, Component, IcsError, Property};
pub use recurrence::IcsRecurrenceAdvancer;
