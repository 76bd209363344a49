use chrono::{DateTime, Utc};
use serde::Serialize;

use alarmd_calendar::details::select_event;
use alarmd_calendar::{parse_calendar, EventDetails, Person};
use alarmd_core::duration::format_duration;
use alarmd_core::event::AlarmEvent;
use alarmd_core::settings::{Language, ResolvedSettings};

use crate::error::TriggerError;

/// Everything the `event-alarm` templates can reference.
#[derive(Debug, Clone, Serialize)]
pub struct AlarmContentModel {
    pub summary: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub videoconference: Option<String>,
    pub organizer: Option<Person>,
    pub attendees: Vec<Person>,
    pub resources: Vec<Person>,
    /// Event start in the recipient's timezone.
    pub start: String,
    pub timezone: String,
    /// Time left until the event starts, in words.
    pub remaining: String,
}

impl AlarmContentModel {
    pub fn build(
        alarm: &AlarmEvent,
        settings: &ResolvedSettings,
        now: DateTime<Utc>,
    ) -> Result<Self, TriggerError> {
        let calendar = parse_calendar(&alarm.ics)?;
        let event = select_event(&calendar, alarm.recurrence_id.as_deref())
            .ok_or_else(|| TriggerError::Content(format!("no VEVENT in {}", alarm.event_uid)))?;
        let details = EventDetails::from_component(event);

        let local_start = alarm.event_start_time.with_timezone(&settings.timezone);
        let start = match settings.language {
            Language::English => local_start.format("%Y-%m-%d %H:%M").to_string(),
            Language::French => local_start.format("%d/%m/%Y %H:%M").to_string(),
        };

        Ok(Self {
            summary: details.summary,
            location: details.location,
            description: details.description,
            videoconference: details.videoconference,
            organizer: details.organizer,
            attendees: details.attendees,
            resources: details.resources,
            start,
            timezone: settings.timezone.name().to_string(),
            remaining: format_duration(alarm.event_start_time - now, settings.language),
        })
    }
}
