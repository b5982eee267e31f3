//! Built-in message templates, rendered with handlebars.
//!
//! Templates are registered per locale under `"{locale}/{name}"`. Output is
//! plain text, so HTML escaping is off, and strict mode turns a misspelled
//! field into an error instead of an empty string.

use handlebars::Handlebars;
use serde::Serialize;

use super::{RenderError, Renderer, Topic};

/// Locale used when a subscriber's locale has no template set.
pub const FALLBACK_LOCALE: &str = "en";

/// Template for operator announcements sent to every subscriber.
pub const NOTICE_TEMPLATE: &str = "notice";
/// Template for subscriber feedback forwarded to the operator.
pub const FEEDBACK_TEMPLATE: &str = "feedback";

const BUILT_IN: &[(&str, &str, &str)] = &[
    (
        "en",
        super::TOPIC_TEMPLATE,
        "{{feed}}: {{title}}{{#if text}}\n\n{{text}}{{/if}}{{#if link}}\n\n{{link}}{{/if}}",
    ),
    (
        "ru",
        super::TOPIC_TEMPLATE,
        "{{feed}}: {{title}}{{#if text}}\n\n{{text}}{{/if}}{{#if link}}\n\nЧитать: {{link}}{{/if}}",
    ),
    ("en", NOTICE_TEMPLATE, "Announcement\n\n{{message}}"),
    ("ru", NOTICE_TEMPLATE, "Объявление\n\n{{message}}"),
    ("en", FEEDBACK_TEMPLATE, "Feedback from subscriber {{subscriber}}\n\n{{message}}"),
    ("ru", FEEDBACK_TEMPLATE, "Отзыв от подписчика {{subscriber}}\n\n{{message}}"),
];

#[derive(Serialize)]
struct TopicData<'a> {
    feed: &'a str,
    title: &'a str,
    text: &'a str,
    link: &'a str,
    date: String,
}

impl<'a> From<&'a Topic> for TopicData<'a> {
    fn from(topic: &'a Topic) -> Self {
        Self {
            feed: &topic.feed,
            title: &topic.title,
            text: &topic.text,
            link: topic.link.as_deref().unwrap_or_default(),
            date: topic
                .published
                .map(|d| d.format("%Y-%m-%d %H:%M UTC").to_string())
                .unwrap_or_default(),
        }
    }
}

/// Renders the compiled-in templates plus any loaded at runtime.
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    registry: Handlebars<'static>,
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRenderer {
    pub fn new() -> Self {
        let mut registry = Handlebars::new();
        registry.register_escape_fn(handlebars::no_escape);
        registry.set_strict_mode(true);

        let mut renderer = Self { registry };
        for (locale, name, source) in BUILT_IN {
            // Compiled-in sources are covered by the tests below
            if let Err(e) = renderer.load(locale, name, source) {
                tracing::error!(locale, name, error = %e, "Built-in template failed to compile");
            }
        }
        renderer
    }

    /// Adds or replaces a template.
    pub fn load(&mut self, locale: &str, name: &str, source: &str) -> Result<(), RenderError> {
        self.registry
            .register_template_string(&key(locale, name), source)?;
        Ok(())
    }

    /// Renders any serializable data with the template for `locale`,
    /// falling back to the English set.
    pub fn render_data<T: Serialize>(
        &self,
        locale: &str,
        template: &str,
        data: &T,
    ) -> Result<String, RenderError> {
        let exact = key(locale, template);
        let name = if self.registry.has_template(&exact) {
            exact
        } else {
            let fallback = key(FALLBACK_LOCALE, template);
            if !self.registry.has_template(&fallback) {
                return Err(RenderError::UnknownTemplate(template.to_string()));
            }
            fallback
        };

        let text = self.registry.render(&name, data)?;
        Ok(text.trim().to_string())
    }
}

impl Renderer for TemplateRenderer {
    fn render(&self, locale: &str, template: &str, topic: &Topic) -> Result<String, RenderError> {
        self.render_data(locale, template, &TopicData::from(topic))
    }
}

fn key(locale: &str, name: &str) -> String {
    format!("{}/{name}", locale.trim().to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn topic() -> Topic {
        Topic {
            feed: "Rust Blog".into(),
            title: "Announcing Rust 1.80".into(),
            text: "The Rust team is happy to announce...".into(),
            link: Some("https://blog.rust-lang.org/2024/07/25/Rust-1.80.0.html".into()),
            published: Some(Utc.with_ymd_and_hms(2024, 7, 25, 0, 0, 0).unwrap()),
        }
    }

    #[test]
    fn test_english_topic() {
        let text = TemplateRenderer::new().render("en", "topic", &topic()).unwrap();
        assert_eq!(
            text,
            "Rust Blog: Announcing Rust 1.80\n\n\
             The Rust team is happy to announce...\n\n\
             https://blog.rust-lang.org/2024/07/25/Rust-1.80.0.html"
        );
    }

    #[test]
    fn test_russian_topic() {
        let text = TemplateRenderer::new().render("RU", "topic", &topic()).unwrap();
        assert!(text.ends_with("Читать: https://blog.rust-lang.org/2024/07/25/Rust-1.80.0.html"));
    }

    #[test]
    fn test_unknown_locale_falls_back_to_english() {
        let renderer = TemplateRenderer::new();
        assert_eq!(
            renderer.render("de", "topic", &topic()).unwrap(),
            renderer.render("en", "topic", &topic()).unwrap()
        );
    }

    #[test]
    fn test_empty_sections_leave_no_gap() {
        let mut topic = topic();
        topic.text.clear();
        let renderer = TemplateRenderer::new();
        assert_eq!(
            renderer.render("en", "topic", &topic).unwrap(),
            "Rust Blog: Announcing Rust 1.80\n\nhttps://blog.rust-lang.org/2024/07/25/Rust-1.80.0.html"
        );

        topic.link = None;
        assert_eq!(renderer.render("ru", "topic", &topic).unwrap(), "Rust Blog: Announcing Rust 1.80");
    }

    #[test]
    fn test_markup_is_not_escaped() {
        let mut topic = topic();
        topic.title = "Tom & Jerry <3".into();
        let text = TemplateRenderer::new().render("en", "topic", &topic).unwrap();
        assert!(text.starts_with("Rust Blog: Tom & Jerry <3"));
    }

    #[test]
    fn test_unknown_template() {
        let err = TemplateRenderer::new().render("en", "welcome", &topic()).unwrap_err();
        assert!(matches!(err, RenderError::UnknownTemplate(name) if name == "welcome"));
    }

    #[test]
    fn test_custom_template_fields() {
        let mut renderer = TemplateRenderer::new();
        renderer.load("en", "brief", "[{{ date }}] {{title}}").unwrap();
        let text = renderer.render("en", "brief", &topic()).unwrap();
        assert_eq!(text, "[2024-07-25 00:00 UTC] Announcing Rust 1.80");

        assert!(matches!(
            renderer.load("en", "broken", "{{#if title}}unclosed"),
            Err(RenderError::Template(_))
        ));

        renderer.load("en", "typo", "{{titel}}").unwrap();
        assert!(matches!(
            renderer.render("en", "typo", &topic()),
            Err(RenderError::Render(_))
        ));
    }

    #[test]
    fn test_notice_and_feedback_templates() {
        #[derive(Serialize)]
        struct Message<'a> {
            subscriber: i64,
            message: &'a str,
        }
        let renderer = TemplateRenderer::new();
        let data = Message {
            subscriber: 42,
            message: "Maintenance tonight",
        };

        assert_eq!(
            renderer.render_data("en", NOTICE_TEMPLATE, &data).unwrap(),
            "Announcement\n\nMaintenance tonight"
        );
        assert_eq!(
            renderer.render_data("ru", FEEDBACK_TEMPLATE, &data).unwrap(),
            "Отзыв от подписчика 42\n\nMaintenance tonight"
        );
    }
}
