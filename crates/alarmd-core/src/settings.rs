use async_trait::async_trait;
use chrono_tz::Tz;

use crate::error::SettingsError;

pub const LANGUAGE_KEY: &str = "core.language";
pub const TIMEZONE_KEY: &str = "core.datetime";
pub const ALARM_EMAILS_KEY: &str = "calendar.alarmEmails";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Language {
    #[default]
    English,
    French,
}

impl Language {
    /// Accepts bare tags and regional variants (`fr`, `fr-FR`, `fr_CA`).
    /// Unsupported languages fall back to English.
    pub fn from_tag(tag: &str) -> Language {
        let primary = tag
            .trim()
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        match primary.as_str() {
            "fr" => Language::French,
            _ => Language::English,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Language::English => "en",
            Language::French => "fr",
        }
    }
}

/// Per-recipient settings that shape an alarm notification.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSettings {
    pub language: Language,
    pub timezone: Tz,
    /// When false the recipient has opted out of alarm emails.
    pub alarms_enabled: bool,
}

impl Default for ResolvedSettings {
    fn default() -> Self {
        Self {
            language: Language::English,
            timezone: Tz::UTC,
            alarms_enabled: true,
        }
    }
}

impl ResolvedSettings {
    /// Apply raw key/value pairs on top of the defaults. Unknown keys and
    /// unparsable values are ignored.
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut settings = ResolvedSettings::default();
        for (key, value) in pairs {
            match key {
                LANGUAGE_KEY => settings.language = Language::from_tag(value),
                TIMEZONE_KEY => {
                    if let Ok(tz) = value.trim().parse::<Tz>() {
                        settings.timezone = tz;
                    }
                }
                ALARM_EMAILS_KEY => {
                    if let Ok(enabled) = value.trim().to_ascii_lowercase().parse::<bool>() {
                        settings.alarms_enabled = enabled;
                    }
                }
                _ => {}
            }
        }
        settings
    }
}

#[async_trait]
pub trait SettingsResolver: Send + Sync + 'static {
    /// `Ok(None)` when the recipient has no stored settings.
    async fn resolve(&self, recipient: &str) -> Result<Option<ResolvedSettings>, SettingsError>;
}

/// Resolves every recipient to the same settings.
pub struct StaticSettingsResolver(pub Option<ResolvedSettings>);

#[async_trait]
impl SettingsResolver for StaticSettingsResolver {
    async fn resolve(&self, _recipient: &str) -> Result<Option<ResolvedSettings>, SettingsError> {
        Ok(self.0.clone())
    }
}
