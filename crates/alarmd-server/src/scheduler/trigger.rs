use std::sync::Arc;

use tracing::{debug, error, info};

use alarmd_core::clock::{truncate_to_millis, Clock};
use alarmd_core::error::SettingsError;
use alarmd_core::event::AlarmEvent;
use alarmd_core::recurrence::RecurrenceAdvancer;
use alarmd_core::settings::{ResolvedSettings, SettingsResolver};
use alarmd_core::store::AlarmStore;

use crate::error::TriggerError;
use crate::mail::{Mail, MailSender};
use crate::render::{MessageGeneratorFactory, TemplateType};
use crate::scheduler::content::AlarmContentModel;

/// What happened to an alarm that was processed without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Sent,
    /// The event had already started.
    Stale,
    /// The recipient opted out of alarm emails.
    Disabled,
}

/// Delivers one alarm and then deletes or reschedules its row.
pub struct AlarmTrigger {
    clock: Arc<dyn Clock>,
    store: Arc<dyn AlarmStore>,
    settings: Arc<dyn SettingsResolver>,
    advancer: Arc<dyn RecurrenceAdvancer>,
    messages: Arc<MessageGeneratorFactory>,
    mailer: Arc<dyn MailSender>,
    sender: String,
}

impl AlarmTrigger {
    pub fn new(
        clock: Arc<dyn Clock>,
        store: Arc<dyn AlarmStore>,
        settings: Arc<dyn SettingsResolver>,
        advancer: Arc<dyn RecurrenceAdvancer>,
        messages: Arc<MessageGeneratorFactory>,
        mailer: Arc<dyn MailSender>,
        sender: impl Into<String>,
    ) -> Self {
        Self {
            clock,
            store,
            settings,
            advancer,
            messages,
            mailer,
            sender: sender.into(),
        }
    }

    /// Send the notification unless the event already started or the
    /// recipient opted out, then clean up the row.
    ///
    /// On a render or send error the store is left untouched.
    pub async fn send_and_cleanup(&self, alarm: &AlarmEvent) -> Result<TriggerOutcome, TriggerError> {
        let now = truncate_to_millis(self.clock.now());

        if alarm.is_stale(now) {
            debug!(alarm = %alarm, "event already started, dropping alarm");
            self.cleanup(alarm).await.map_err(TriggerError::Store)?;
            return Ok(TriggerOutcome::Stale);
        }

        let settings = self.settings_for(&alarm.recipient).await;
        if !settings.alarms_enabled {
            debug!(alarm = %alarm, "alarm emails disabled by recipient");
            self.cleanup(alarm).await.map_err(TriggerError::Store)?;
            return Ok(TriggerOutcome::Disabled);
        }

        let model = AlarmContentModel::build(alarm, &settings, now)?;
        let message = self
            .messages
            .for_language(TemplateType::EventAlarm, settings.language)
            .generate(&model)?;
        let mail = Mail {
            from: self.sender.clone(),
            to: vec![alarm.recipient.clone()],
            subject: message.subject,
            text: message.text,
            html: message.html,
        };
        self.mailer.send(&mail).await?;
        info!(alarm = %alarm, "alarm email sent");

        if let Err(err) = self.cleanup(alarm).await {
            error!(alarm = %alarm, error = %err, "failed to clean up alarm after delivery");
            return Err(TriggerError::Cleanup(err));
        }
        Ok(TriggerOutcome::Sent)
    }

    /// Defaults apply whenever the recipient's settings cannot be read.
    async fn settings_for(&self, recipient: &str) -> ResolvedSettings {
        match self.settings.resolve(recipient).await {
            Ok(Some(settings)) => settings,
            Ok(None) => ResolvedSettings::default(),
            Err(SettingsError::DomainNotFound(domain)) => {
                debug!(recipient, domain = %domain, "no domain for recipient, using default settings");
                ResolvedSettings::default()
            }
            Err(err) => {
                error!(recipient, error = %err, "failed to resolve settings, using defaults");
                ResolvedSettings::default()
            }
        }
    }

    async fn cleanup(&self, alarm: &AlarmEvent) -> anyhow::Result<()> {
        if !alarm.recurring {
            return self.store.delete(&alarm.event_uid, &alarm.recipient).await;
        }

        let Some(next) = self.advancer.advance(&alarm.ics, &alarm.recipient)? else {
            debug!(alarm = %alarm, "recurring series has no further alarm");
            return self.store.delete(&alarm.event_uid, &alarm.recipient).await;
        };

        let mut kept = false;
        for recipient in &next.recipients {
            self.store.update(&alarm.rescheduled(&next, recipient)).await?;
            kept |= recipient.eq_ignore_ascii_case(&alarm.recipient);
        }
        if !kept {
            self.store.delete(&alarm.event_uid, &alarm.recipient).await?;
        }
        debug!(
            alarm = %alarm,
            next_alarm = %next.alarm_time,
            recipients = next.recipients.len(),
            "recurring alarm rescheduled"
        );
        Ok(())
    }
}
