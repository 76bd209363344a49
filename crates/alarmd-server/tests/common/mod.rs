#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::{Mutex, Notify};

use alarmd_calendar::IcsRecurrenceAdvancer;
use alarmd_core::clock::{Clock, ManualClock};
use alarmd_core::config::{SchedulerConfig, SchedulerMode};
use alarmd_core::event::AlarmEvent;
use alarmd_core::lease::LeaseProvider;
use alarmd_core::settings::{ResolvedSettings, SettingsResolver, StaticSettingsResolver};
use alarmd_core::store::{AlarmStore, MemoryAlarmStore};
use alarmd_server::error::TriggerError;
use alarmd_server::mail::{Mail, MailSender};
use alarmd_server::render::MessageGeneratorFactory;
use alarmd_server::scheduler::{AlarmScheduler, AlarmTrigger};

pub const BOB: &str = "bob@example.org";
pub const SENDER: &str = "no-reply@example.org";

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0)
        .single()
        .expect("valid instant")
}

/// One VEVENT with an email alarm `minutes_before` the start, attended by Bob.
pub fn event_ics(uid: &str, start: DateTime<Utc>, rrule: Option<&str>, minutes_before: i64) -> String {
    let rrule = rrule.map(|r| format!("RRULE:{r}\r\n")).unwrap_or_default();
    format!(
        "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//test//EN\r\n\
         BEGIN:VEVENT\r\nUID:{uid}\r\nSUMMARY:Standup\r\n\
         DTSTART:{start}\r\n{rrule}\
         ORGANIZER;CN=Alice:mailto:alice@example.org\r\n\
         ATTENDEE;PARTSTAT=ACCEPTED:mailto:{BOB}\r\n\
         BEGIN:VALARM\r\nACTION:EMAIL\r\nTRIGGER:-PT{minutes_before}M\r\n\
         ATTENDEE:mailto:{BOB}\r\nSUMMARY:alarm\r\nEND:VALARM\r\n\
         END:VEVENT\r\nEND:VCALENDAR\r\n",
        start = start.format("%Y%m%dT%H%M%SZ"),
    )
}

pub fn alarm_row(uid: &str, start: DateTime<Utc>, minutes_before: i64) -> AlarmEvent {
    AlarmEvent {
        event_uid: uid.to_string(),
        alarm_time: start - Duration::minutes(minutes_before),
        event_start_time: start,
        recurring: false,
        recurrence_id: None,
        recipient: BOB.to_string(),
        ics: event_ics(uid, start, None, minutes_before),
    }
}

/// Keeps every mail instead of sending it.
#[derive(Default)]
pub struct RecordingMailSender {
    pub sent: Mutex<Vec<Mail>>,
}

impl RecordingMailSender {
    pub async fn sent(&self) -> Vec<Mail> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl MailSender for RecordingMailSender {
    async fn send(&self, mail: &Mail) -> Result<(), TriggerError> {
        self.sent.lock().await.push(mail.clone());
        Ok(())
    }
}

pub struct FailingMailSender;

#[async_trait]
impl MailSender for FailingMailSender {
    async fn send(&self, _mail: &Mail) -> Result<(), TriggerError> {
        Err(TriggerError::Send("connection refused".to_string()))
    }
}

/// Panics in the middle of a send.
pub struct PanickingMailSender;

#[async_trait]
impl MailSender for PanickingMailSender {
    async fn send(&self, _mail: &Mail) -> Result<(), TriggerError> {
        panic!("mail transport crashed");
    }
}

/// Signals `entered` on each send, then blocks until `gate` opens.
#[derive(Default)]
pub struct GatedMailSender {
    pub entered: Notify,
    pub gate: Notify,
    pub inner: RecordingMailSender,
}

#[async_trait]
impl MailSender for GatedMailSender {
    async fn send(&self, mail: &Mail) -> Result<(), TriggerError> {
        self.entered.notify_one();
        self.gate.notified().await;
        self.inner.send(mail).await
    }
}

pub fn scheduler_config(mode: SchedulerMode) -> SchedulerConfig {
    SchedulerConfig {
        mode,
        ..SchedulerConfig::default()
    }
}

/// Wire a scheduler with the embedded templates and the ICS advancer.
pub fn build_scheduler(
    clock: Arc<dyn Clock>,
    store: Arc<dyn AlarmStore>,
    leases: Arc<dyn LeaseProvider>,
    mailer: Arc<dyn MailSender>,
    settings: Arc<dyn SettingsResolver>,
    config: SchedulerConfig,
) -> AlarmScheduler {
    let trigger = AlarmTrigger::new(
        Arc::clone(&clock),
        Arc::clone(&store),
        settings,
        Arc::new(IcsRecurrenceAdvancer::new(Arc::clone(&clock))),
        Arc::new(MessageGeneratorFactory::embedded().expect("templates")),
        mailer,
        SENDER,
    );
    AlarmScheduler::new(clock, store, leases, trigger, config)
}

pub struct Harness {
    pub clock: ManualClock,
    pub store: Arc<MemoryAlarmStore>,
}

impl Harness {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            clock: ManualClock::new(now),
            store: Arc::new(MemoryAlarmStore::new()),
        }
    }

    pub fn scheduler(
        &self,
        leases: Arc<dyn LeaseProvider>,
        mailer: Arc<dyn MailSender>,
        settings: Option<ResolvedSettings>,
        config: SchedulerConfig,
    ) -> AlarmScheduler {
        build_scheduler(
            Arc::new(self.clock.clone()),
            self.store.clone(),
            leases,
            mailer,
            Arc::new(StaticSettingsResolver(settings)),
            config,
        )
    }
}
