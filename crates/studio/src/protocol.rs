//! Messages exchanged between the host and the sandboxed preview.
//!
//! The two sides never share memory. Every message carries a `type` tag from
//! a closed set; anything else arriving from the preview is dropped.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Console entries kept by the host. Oldest are discarded first.
pub const CONSOLE_CAPACITY: usize = 50;

/// Host -> preview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HostMessage {
    ToggleAnnotate {
        active: bool,
    },
    Scroll {
        position: ScrollPosition,
    },
    Reload,
    /// Direct style mutation of the elements matching `selector` whose top
    /// edge lies within a few pixels of `top`.
    ApplyStyle {
        selector: String,
        top: f64,
        property: String,
        value: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollPosition {
    Top,
    Bottom,
}

/// Preview -> host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PreviewMessage {
    Console {
        level: ConsoleLevel,
        message: String,
    },
    Inspect(SelectedElement),
}

impl PreviewMessage {
    /// Parse a raw message posted by the preview. Malformed or unknown
    /// messages yield `None` and are otherwise ignored.
    pub fn parse(raw: &str) -> Option<Self> {
        match serde_json::from_str(raw) {
            Ok(msg) => Some(msg),
            Err(e) => {
                debug!("Ignoring preview message: {e}");
                None
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Log,
    Error,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub top: f64,
    pub left: f64,
    pub width: f64,
    pub height: f64,
}

/// Computed style snapshot taken at click time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ElementStyles {
    pub font_family: String,
    pub font_size: String,
    pub line_height: String,
    pub color: String,
    pub background_color: String,
    pub text_align: String,
}

impl ElementStyles {
    /// Look up a property by its camelCase DOM name.
    pub fn get(&self, property: &str) -> Option<&str> {
        let value = match property {
            "fontFamily" => &self.font_family,
            "fontSize" => &self.font_size,
            "lineHeight" => &self.line_height,
            "color" => &self.color,
            "backgroundColor" => &self.background_color,
            "textAlign" => &self.text_align,
            _ => return None,
        };
        Some(value.as_str())
    }

    /// Record a property change. Returns false for properties outside the snapshot.
    pub fn set(&mut self, property: &str, value: &str) -> bool {
        let slot = match property {
            "fontFamily" => &mut self.font_family,
            "fontSize" => &mut self.font_size,
            "lineHeight" => &mut self.line_height,
            "color" => &mut self.color,
            "backgroundColor" => &mut self.background_color,
            "textAlign" => &mut self.text_align,
            _ => return false,
        };
        *slot = value.to_string();
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedElement {
    pub tag_name: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub classes: String,
    #[serde(default)]
    pub rect: Rect,
    #[serde(default)]
    pub styles: ElementStyles,
}

impl SelectedElement {
    /// `tag#id` when the element has an id, otherwise `tag.class.class`.
    pub fn selector(&self) -> String {
        let mut selector = self.tag_name.clone();
        if !self.id.is_empty() {
            selector.push('#');
            selector.push_str(&self.id);
        } else {
            for class in self.classes.split_whitespace() {
                selector.push('.');
                selector.push_str(class);
            }
        }
        selector
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsoleEntry {
    pub level: ConsoleLevel,
    pub message: String,
}

/// Ring buffer of forwarded console output.
#[derive(Debug, Default)]
pub struct ConsoleLog {
    entries: VecDeque<ConsoleEntry>,
}

impl ConsoleLog {
    pub fn push(&mut self, level: ConsoleLevel, message: String) {
        if self.entries.len() == CONSOLE_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(ConsoleEntry { level, message });
    }

    pub fn entries(&self) -> impl Iterator<Item = &ConsoleEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_message_wire_format() {
        let msg = serde_json::to_value(HostMessage::ToggleAnnotate { active: true }).unwrap();
        assert_eq!(msg, serde_json::json!({ "type": "toggle-annotate", "active": true }));

        let msg = serde_json::to_value(HostMessage::Scroll { position: ScrollPosition::Bottom }).unwrap();
        assert_eq!(msg, serde_json::json!({ "type": "scroll", "position": "bottom" }));
    }

    #[test]
    fn test_parse_inspect() {
        let raw = r#"{"type":"inspect","tagName":"button","id":"","classes":"cta",
            "rect":{"top":120.5,"left":10,"width":80,"height":32},
            "styles":{"fontFamily":"Inter","fontSize":"16px","lineHeight":"24px",
                      "color":"rgb(255, 255, 255)","backgroundColor":"rgb(37, 99, 235)","textAlign":"center"}}"#;
        let Some(PreviewMessage::Inspect(el)) = PreviewMessage::parse(raw) else {
            panic!("expected inspect message");
        };
        assert_eq!(el.tag_name, "button");
        assert_eq!(el.classes, "cta");
        assert_eq!(el.rect.top, 120.5);
        assert_eq!(el.styles.text_align, "center");
        assert_eq!(el.selector(), "button.cta");
    }

    #[test]
    fn test_parse_console() {
        let raw = r#"{"type":"console","level":"error","message":"boom"}"#;
        assert_eq!(
            PreviewMessage::parse(raw),
            Some(PreviewMessage::Console { level: ConsoleLevel::Error, message: "boom".into() })
        );
    }

    #[test]
    fn test_parse_rejects_unknown_and_malformed() {
        assert_eq!(PreviewMessage::parse(r#"{"type":"navigate","url":"x"}"#), None);
        assert_eq!(PreviewMessage::parse("not json"), None);
        assert_eq!(PreviewMessage::parse(r#"{"level":"log","message":"no tag"}"#), None);
    }

    #[test]
    fn test_selector_prefers_id() {
        let el = SelectedElement {
            tag_name: "div".into(),
            id: "hero".into(),
            classes: "p-4 flex".into(),
            ..Default::default()
        };
        assert_eq!(el.selector(), "div#hero");

        let el = SelectedElement { id: String::new(), ..el };
        assert_eq!(el.selector(), "div.p-4.flex");
    }

    #[test]
    fn test_console_ring_buffer() {
        let mut log = ConsoleLog::default();
        for i in 0..60 {
            log.push(ConsoleLevel::Log, format!("line {i}"));
        }
        assert_eq!(log.len(), CONSOLE_CAPACITY);
        assert_eq!(log.entries().next().unwrap().message, "line 10");
        assert_eq!(log.entries().last().unwrap().message, "line 59");
    }

    #[test]
    fn test_style_snapshot_set_get() {
        let mut styles = ElementStyles::default();
        assert!(styles.set("textAlign", "right"));
        assert_eq!(styles.get("textAlign"), Some("right"));
        assert!(!styles.set("zIndex", "3"));
        assert_eq!(styles.get("zIndex"), None);
    }
}
