use serde::Serialize;

use crate::ics::{format_utc, Component, Property};

pub const VIDEOCONFERENCE_PROPERTY: &str = "X-OPENPAAS-VIDEOCONFERENCE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Person {
    pub email: String,
    pub name: Option<String>,
    #[serde(skip)]
    pub partstat: Option<String>,
    #[serde(skip)]
    pub cutype: Option<String>,
}

impl Person {
    pub fn from_property(prop: &Property) -> Option<Person> {
        let email = strip_mailto(&prop.value);
        if email.is_empty() {
            return None;
        }
        Some(Person {
            email,
            name: prop
                .param("CN")
                .map(str::trim)
                .filter(|cn| !cn.is_empty())
                .map(str::to_string),
            partstat: prop.param("PARTSTAT").map(str::to_ascii_uppercase),
            cutype: prop.param("CUTYPE").map(str::to_ascii_uppercase),
        })
    }

    pub fn is_resource(&self) -> bool {
        self.cutype.as_deref() == Some("RESOURCE")
    }

    pub fn has_accepted(&self) -> bool {
        self.partstat.as_deref() == Some("ACCEPTED")
    }

    /// CN when present, otherwise the address.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.email)
    }
}

pub fn strip_mailto(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("mailto:") => trimmed[7..].trim().to_string(),
        _ => trimmed.to_string(),
    }
}

/// The parts of a VEVENT that end up in a notification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventDetails {
    pub uid: Option<String>,
    pub summary: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub organizer: Option<Person>,
    pub attendees: Vec<Person>,
    pub resources: Vec<Person>,
    pub videoconference: Option<String>,
    pub status: Option<String>,
    pub sequence: i64,
}

impl EventDetails {
    pub fn from_component(event: &Component) -> EventDetails {
        let (resources, attendees): (Vec<Person>, Vec<Person>) = event
            .properties("ATTENDEE")
            .filter_map(Person::from_property)
            .partition(Person::is_resource);

        EventDetails {
            uid: event.text("UID"),
            summary: event.text("SUMMARY"),
            location: event.text("LOCATION"),
            description: event.text("DESCRIPTION"),
            organizer: event.property("ORGANIZER").and_then(Person::from_property),
            attendees,
            resources,
            videoconference: event.text(VIDEOCONFERENCE_PROPERTY),
            status: event.text("STATUS").map(|s| s.trim().to_ascii_uppercase()),
            sequence: sequence_of(event),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.status.as_deref() == Some("CANCELLED")
    }
}

pub(crate) fn sequence_of(event: &Component) -> i64 {
    event
        .property("SEQUENCE")
        .and_then(|prop| prop.value.trim().parse().ok())
        .unwrap_or(0)
}

/// The VEVENT an alarm row refers to: the override whose RECURRENCE-ID
/// matches `recurrence_id`, otherwise the first VEVENT.
pub fn select_event<'a>(calendar: &'a Component, recurrence_id: Option<&str>) -> Option<&'a Component> {
    if let Some(wanted) = recurrence_id {
        let matched = calendar.components("VEVENT").find(|event| {
            event.property("RECURRENCE-ID").is_some_and(|prop| {
                prop.value.trim() == wanted
                    || prop
                        .date_value()
                        .map(|date| format_utc(date.to_utc()) == wanted)
                        .unwrap_or(false)
            })
        });
        if matched.is_some() {
            return matched;
        }
    }
    calendar.components("VEVENT").next()
}
