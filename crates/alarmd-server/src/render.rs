use include_dir::{include_dir, Dir, DirEntry};
use minijinja::{AutoEscape, Environment};
use serde::Serialize;

use alarmd_core::settings::Language;

use crate::error::TriggerError;

static TEMPLATES: Dir<'static> = include_dir!("$CARGO_MANIFEST_DIR/templates");

const SUBJECT: &str = "subject.jinja";
const TEXT_BODY: &str = "body.txt.jinja";
const HTML_BODY: &str = "body.html.jinja";

/// Template families shipped with the binary. Each lives under
/// `templates/<family>/<language>/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateType {
    EventAlarm,
}

impl TemplateType {
    pub fn dir(&self) -> &'static str {
        match self {
            TemplateType::EventAlarm => "event-alarm",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// Owns the compiled template set and hands out per-language generators.
pub struct MessageGeneratorFactory {
    env: Environment<'static>,
}

impl MessageGeneratorFactory {
    /// Load every template embedded at build time.
    pub fn embedded() -> Result<Self, TriggerError> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.set_auto_escape_callback(|name| {
            if name.ends_with(".html.jinja") {
                AutoEscape::Html
            } else {
                AutoEscape::None
            }
        });
        register_dir(&mut env, &TEMPLATES)?;
        Ok(Self { env })
    }

    /// Generator for `language`, or for English when that family has no
    /// translation.
    pub fn for_language(&self, template: TemplateType, language: Language) -> MessageGenerator<'_> {
        let language = if self.has_language(template, language) {
            language
        } else {
            Language::English
        };
        MessageGenerator {
            env: &self.env,
            prefix: format!("{}/{}", template.dir(), language.tag()),
        }
    }

    fn has_language(&self, template: TemplateType, language: Language) -> bool {
        let name = format!("{}/{}/{}", template.dir(), language.tag(), SUBJECT);
        self.env.get_template(&name).is_ok()
    }
}

fn register_dir(env: &mut Environment<'static>, dir: &'static Dir<'static>) -> Result<(), TriggerError> {
    for entry in dir.entries() {
        match entry {
            DirEntry::Dir(sub) => register_dir(env, sub)?,
            DirEntry::File(file) => {
                let Some(name) = file.path().to_str() else {
                    continue;
                };
                let source = file
                    .contents_utf8()
                    .ok_or_else(|| TriggerError::Render(format!("template {name} is not UTF-8")))?;
                env.add_template(name, source)?;
            }
        }
    }
    Ok(())
}

pub struct MessageGenerator<'a> {
    env: &'a Environment<'static>,
    prefix: String,
}

impl MessageGenerator<'_> {
    pub fn generate<S: Serialize>(&self, model: &S) -> Result<RenderedMessage, TriggerError> {
        let subject = self.render(SUBJECT, model)?;
        Ok(RenderedMessage {
            // Header value: one line, no surrounding whitespace.
            subject: subject.split_whitespace().collect::<Vec<_>>().join(" "),
            text: self.render(TEXT_BODY, model)?,
            html: self.render(HTML_BODY, model)?,
        })
    }

    fn render<S: Serialize>(&self, file: &str, model: &S) -> Result<String, TriggerError> {
        let template = self.env.get_template(&format!("{}/{}", self.prefix, file))?;
        Ok(template.render(model)?)
    }
}
