//! Preview introspection tools the model may call.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use serde_json::json;

use crate::api::{FunctionDeclaration, ToolCall};
use crate::protocol::ScrollPosition;

/// The live preview as seen by tool calls.
pub trait PreviewSurface {
    fn scroll_to(&mut self, position: ScrollPosition);
    fn reload(&mut self);
    /// Known style properties of the element matching `selector`, if any.
    fn computed_style(&self, selector: &str) -> Option<BTreeMap<String, String>>;
    fn html_snapshot(&self) -> String;
}

pub static PREVIEW_TOOLS: Lazy<Vec<FunctionDeclaration>> = Lazy::new(|| {
    vec![
        FunctionDeclaration {
            name: "scroll_to_top".into(),
            description: "Scroll the live preview to the top of the page".into(),
            parameters: None,
        },
        FunctionDeclaration {
            name: "scroll_to_bottom".into(),
            description: "Scroll the live preview to the bottom of the page".into(),
            parameters: None,
        },
        FunctionDeclaration {
            name: "reload_preview".into(),
            description: "Reload the live preview, discarding direct style edits".into(),
            parameters: None,
        },
        FunctionDeclaration {
            name: "get_computed_style".into(),
            description: "Read the known computed style of an element in the live preview".into(),
            parameters: Some(json!({
                "type": "object",
                "properties": {
                    "selector": {
                        "type": "string",
                        "description": "CSS selector of the element, e.g. 'button.cta' or 'div#hero'"
                    }
                },
                "required": ["selector"]
            })),
        },
        FunctionDeclaration {
            name: "get_html_snapshot".into(),
            description: "Return a truncated snapshot of the live preview's HTML".into(),
            parameters: None,
        },
    ]
});

/// Run one tool call against the preview and describe what happened.
pub fn execute(call: &ToolCall, surface: &mut dyn PreviewSurface) -> String {
    let result = match call.name.as_str() {
        "scroll_to_top" => {
            surface.scroll_to(ScrollPosition::Top);
            "Scrolled preview to top.".to_string()
        }
        "scroll_to_bottom" => {
            surface.scroll_to(ScrollPosition::Bottom);
            "Scrolled preview to bottom.".to_string()
        }
        "reload_preview" => {
            surface.reload();
            "Reloaded preview.".to_string()
        }
        "get_computed_style" => match call.args.get("selector").and_then(|s| s.as_str()) {
            Some(selector) => match surface.computed_style(selector) {
                Some(styles) => format!(
                    "Style of `{selector}`: {}",
                    serde_json::to_string(&styles).unwrap_or_default()
                ),
                None => format!("No element matches `{selector}`."),
            },
            None => "Missing 'selector' argument.".to_string(),
        },
        "get_html_snapshot" => format!("HTML snapshot:\n{}", surface.html_snapshot()),
        other => format!("Unknown tool: {other}"),
    };
    format!("> [{}] {result}", call.name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[derive(Default)]
    struct FakeSurface {
        scrolled: Option<ScrollPosition>,
        reloads: usize,
    }

    impl PreviewSurface for FakeSurface {
        fn scroll_to(&mut self, position: ScrollPosition) {
            self.scrolled = Some(position);
        }

        fn reload(&mut self) {
            self.reloads += 1;
        }

        fn computed_style(&self, selector: &str) -> Option<BTreeMap<String, String>> {
            (selector == "h1").then(|| BTreeMap::from([("color".to_string(), "red".to_string())]))
        }

        fn html_snapshot(&self) -> String {
            "<h1>Hi</h1>".into()
        }
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall { name: name.into(), args }
    }

    #[test]
    fn test_declarations_are_well_formed() {
        assert_eq!(PREVIEW_TOOLS.len(), 5);
        for tool in PREVIEW_TOOLS.iter() {
            assert!(!tool.description.is_empty());
            if let Some(ref params) = tool.parameters {
                assert_eq!(params["type"], "object");
            }
        }
    }

    #[test]
    fn test_scroll_and_reload() {
        let mut surface = FakeSurface::default();
        let note = execute(&call("scroll_to_bottom", Value::Null), &mut surface);
        assert_eq!(note, "> [scroll_to_bottom] Scrolled preview to bottom.");
        assert_eq!(surface.scrolled, Some(ScrollPosition::Bottom));

        execute(&call("reload_preview", json!({})), &mut surface);
        assert_eq!(surface.reloads, 1);
    }

    #[test]
    fn test_computed_style() {
        let mut surface = FakeSurface::default();
        let note = execute(&call("get_computed_style", json!({ "selector": "h1" })), &mut surface);
        assert_eq!(note, r#"> [get_computed_style] Style of `h1`: {"color":"red"}"#);

        let note = execute(&call("get_computed_style", json!({ "selector": "nav" })), &mut surface);
        assert!(note.contains("No element matches `nav`."));

        let note = execute(&call("get_computed_style", json!({})), &mut surface);
        assert!(note.contains("Missing 'selector'"));
    }

    #[test]
    fn test_snapshot_and_unknown() {
        let mut surface = FakeSurface::default();
        assert!(execute(&call("get_html_snapshot", Value::Null), &mut surface).ends_with("<h1>Hi</h1>"));
        assert_eq!(
            execute(&call("delete_everything", Value::Null), &mut surface),
            "> [delete_everything] Unknown tool: delete_everything"
        );
    }
}
