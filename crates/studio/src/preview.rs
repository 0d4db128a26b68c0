//! Sandboxed preview document and its host-side mirror.

use std::collections::BTreeMap;

use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::extract::body_markup;
use crate::protocol::{ElementStyles, HostMessage, ScrollPosition, SelectedElement};
use crate::tools::PreviewSurface;

/// The preview may run scripts and keep its own origin, nothing else:
/// no top-level navigation, popups, forms or access to host storage.
pub const SANDBOX: &str = "allow-scripts allow-same-origin";

const TAILWIND_CDN: &str = r#"<script src="https://cdn.tailwindcss.com"></script>"#;

const STYLE_RESET: &str = "\
body { margin: 0; font-family: sans-serif; transition: all 0.2s ease; }
* { transition: outline 0.1s ease; }
html.__annotate *:hover { outline: 2px solid #3b82f6 !important; outline-offset: -2px; cursor: crosshair !important; }
::-webkit-scrollbar { width: 6px; }
::-webkit-scrollbar-thumb { background: #cbd5e1; border-radius: 10px; }
";

/// Injected ahead of the generated markup. Forwards console output, reports
/// clicked elements while annotating and executes host commands.
const BOOTSTRAP: &str = r#"
(function () {
  var annotating = __ANNOTATING__;
  function post(msg) {
    try { window.parent.postMessage(msg, '*'); } catch (e) {}
  }
  function stringify(value) {
    if (typeof value === 'string') return value;
    try { return JSON.stringify(value); } catch (e) { return String(value); }
  }
  ['log', 'error'].forEach(function (level) {
    var original = console[level];
    console[level] = function () {
      var args = Array.prototype.slice.call(arguments);
      post({ type: 'console', level: level, message: args.map(stringify).join(' ') });
      original.apply(console, arguments);
    };
  });
  window.addEventListener('error', function (e) {
    post({ type: 'console', level: 'error', message: String(e.message) });
  });
  function setAnnotating(active) {
    annotating = active;
    document.documentElement.classList.toggle('__annotate', active);
    if (document.body) document.body.style.cursor = active ? 'crosshair' : '';
  }
  document.addEventListener('click', function (e) {
    if (!annotating) return;
    var target = e.target;
    if (!target || target === document.body || target === document.documentElement) return;
    e.preventDefault();
    e.stopPropagation();
    var rect = target.getBoundingClientRect();
    var cs = window.getComputedStyle(target);
    post({
      type: 'inspect',
      tagName: target.tagName.toLowerCase(),
      id: target.id || '',
      classes: typeof target.className === 'string' ? target.className.trim() : '',
      rect: { top: rect.top, left: rect.left, width: rect.width, height: rect.height },
      styles: {
        fontFamily: cs.fontFamily.split(',')[0].replace(/['"]/g, ''),
        fontSize: cs.fontSize,
        lineHeight: cs.lineHeight,
        color: cs.color,
        backgroundColor: cs.backgroundColor,
        textAlign: cs.textAlign
      }
    });
  }, true);
  window.addEventListener('message', function (e) {
    var msg = e.data;
    if (!msg || typeof msg !== 'object') return;
    switch (msg.type) {
      case 'toggle-annotate':
        setAnnotating(!!msg.active);
        break;
      case 'scroll':
        window.scrollTo(0, msg.position === 'bottom' ? document.body.scrollHeight : 0);
        break;
      case 'reload':
        window.location.reload();
        break;
      case 'apply-style':
        document.querySelectorAll(msg.selector).forEach(function (el) {
          if (Math.abs(el.getBoundingClientRect().top - msg.top) < 5) el.style[msg.property] = msg.value;
        });
        break;
    }
  });
  document.addEventListener('DOMContentLoaded', function () { setAnnotating(annotating); });
})();
"#;

/// Build the self-contained preview document. Empty code renders nothing.
pub fn build_document(code: &str, annotating: bool, tailwind: bool) -> String {
    if code.is_empty() {
        return String::new();
    }
    let html_class = if annotating { r#" class="__annotate""# } else { "" };
    let tailwind = if tailwind { TAILWIND_CDN } else { "" };
    let bootstrap = BOOTSTRAP.replace("__ANNOTATING__", if annotating { "true" } else { "false" });

    format!(
        "<!DOCTYPE html>\n<html{html_class}>\n<head>\n<meta charset=\"utf-8\">\n{tailwind}\n\
         <style>\n{STYLE_RESET}</style>\n<script>{bootstrap}</script>\n</head>\n\
         <body class=\"bg-gray-50 h-screen\">\n<div id=\"root\">{}</div>\n</body>\n</html>\n",
        body_markup(code)
    )
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeviceFrame {
    #[default]
    Desktop,
    Tablet,
    Mobile,
}

impl DeviceFrame {
    pub fn width(self) -> &'static str {
        match self {
            Self::Desktop => "100%",
            Self::Tablet => "768px",
            Self::Mobile => "375px",
        }
    }
}

impl std::str::FromStr for DeviceFrame {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "desktop" => Ok(Self::Desktop),
            "tablet" => Ok(Self::Tablet),
            "mobile" => Ok(Self::Mobile),
            other => Err(format!("unknown device frame: {other}")),
        }
    }
}

fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
    out
}

/// A host page embedding `document` in a sandboxed iframe.
pub fn host_page(document: &str, device: DeviceFrame) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>Preview</title>\n\
         <style>body {{ margin: 0; background: #131314; display: flex; justify-content: center; }} \
         iframe {{ border: 0; height: 100vh; background: white; }}</style>\n</head>\n<body>\n\
         <iframe id=\"preview\" sandbox=\"{SANDBOX}\" style=\"width: {}\" srcdoc=\"{}\"></iframe>\n\
         <script>window.addEventListener('message', function (e) {{ console.log('[preview]', e.data); }});</script>\n\
         </body>\n</html>\n",
        device.width(),
        escape_attr(document)
    )
}

/// Host-side view of the live preview.
///
/// Keeps the current document, relays host commands to the sandbox and
/// mirrors what the host knows about its elements: the last inspected
/// element and any direct style edits applied since the last (re)load.
pub struct PreviewFrame {
    code: String,
    annotating: bool,
    document: String,
    tailwind: bool,
    snapshot_limit: usize,
    outbox: Option<UnboundedSender<HostMessage>>,
    inspected: Option<SelectedElement>,
    overrides: BTreeMap<String, BTreeMap<String, String>>,
    scroll: ScrollPosition,
}

impl PreviewFrame {
    pub fn new(tailwind: bool, snapshot_limit: usize) -> Self {
        Self {
            code: String::new(),
            annotating: false,
            document: String::new(),
            tailwind,
            snapshot_limit,
            outbox: None,
            inspected: None,
            overrides: BTreeMap::new(),
            scroll: ScrollPosition::Top,
        }
    }

    /// Route host commands to a loaded preview. Without a connection they are dropped.
    pub fn connect(&mut self, outbox: UnboundedSender<HostMessage>) {
        self.outbox = Some(outbox);
    }

    /// Rebuild the document when the code or annotate flag changed.
    /// Returns true if a new document was built.
    ///
    /// Only new code resets the mirror. An annotate toggle reaches the live
    /// sandbox as a message, so its elements and direct edits survive.
    pub fn render(&mut self, code: &str, annotating: bool) -> bool {
        if self.code == code && self.annotating == annotating && !self.document.is_empty() {
            return false;
        }
        if self.code != code {
            self.inspected = None;
            self.overrides.clear();
            self.scroll = ScrollPosition::Top;
        }
        self.code = code.to_string();
        self.annotating = annotating;
        self.document = build_document(code, annotating, self.tailwind);
        true
    }

    pub fn document(&self) -> &str {
        &self.document
    }

    pub fn scroll_position(&self) -> ScrollPosition {
        self.scroll
    }

    pub fn post(&mut self, message: HostMessage) {
        let Some(ref outbox) = self.outbox else {
            debug!("No preview connected, dropping {message:?}");
            return;
        };
        if outbox.send(message).is_err() {
            debug!("Preview channel closed");
            self.outbox = None;
        }
    }

    pub fn set_annotating(&mut self, active: bool) {
        self.post(HostMessage::ToggleAnnotate { active });
    }

    pub fn observe(&mut self, element: &SelectedElement) {
        self.inspected = Some(element.clone());
    }

    /// Direct style mutation in the live sandbox. The generated source is untouched.
    pub fn apply_style(&mut self, element: &SelectedElement, property: &str, value: &str) {
        let selector = element.selector();
        self.overrides
            .entry(selector.clone())
            .or_default()
            .insert(property.to_string(), value.to_string());
        self.post(HostMessage::ApplyStyle {
            selector,
            top: element.rect.top,
            property: property.to_string(),
            value: value.to_string(),
        });
    }
}

impl PreviewSurface for PreviewFrame {
    fn scroll_to(&mut self, position: ScrollPosition) {
        self.scroll = position;
        self.post(HostMessage::Scroll { position });
    }

    fn reload(&mut self) {
        self.overrides.clear();
        self.scroll = ScrollPosition::Top;
        self.post(HostMessage::Reload);
    }

    fn computed_style(&self, selector: &str) -> Option<BTreeMap<String, String>> {
        let overrides = self.overrides.get(selector);
        let inspected = self
            .inspected
            .as_ref()
            .filter(|el| el.selector() == selector);
        if inspected.is_none() && overrides.is_none() {
            return None;
        }

        let mut styles = BTreeMap::new();
        if let Some(el) = inspected {
            snapshot_into(&el.styles, &mut styles);
        }
        if let Some(overrides) = overrides {
            styles.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        Some(styles)
    }

    /// The document's `<body>` onward, truncated to the snapshot limit.
    fn html_snapshot(&self) -> String {
        let body = self
            .document
            .find("<body")
            .map(|i| &self.document[i..])
            .unwrap_or(&self.document);
        let mut chars = body.chars();
        let snapshot: String = chars.by_ref().take(self.snapshot_limit).collect();
        if chars.next().is_some() {
            format!("{snapshot}...")
        } else {
            snapshot
        }
    }
}

fn snapshot_into(styles: &ElementStyles, out: &mut BTreeMap<String, String>) {
    for property in ["fontFamily", "fontSize", "lineHeight", "color", "backgroundColor", "textAlign"] {
        if let Some(value) = styles.get(property).filter(|v| !v.is_empty()) {
            out.insert(property.to_string(), value.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Rect;
    use tokio::sync::mpsc;

    fn button() -> SelectedElement {
        SelectedElement {
            tag_name: "button".into(),
            classes: "cta".into(),
            rect: Rect { top: 40.0, ..Default::default() },
            styles: ElementStyles { text_align: "center".into(), ..Default::default() },
            ..Default::default()
        }
    }

    #[test]
    fn test_document_contains_markup_and_shim() {
        let doc = build_document("<form>...</form>", false, true);
        assert!(doc.contains(r#"<div id="root"><form>...</form></div>"#));
        assert!(doc.contains("cdn.tailwindcss.com"));
        assert!(doc.contains("type: 'console'"));
        assert!(doc.contains("var annotating = false;"));
        assert!(!doc.contains(r#"<html class="__annotate">"#));
    }

    #[test]
    fn test_document_in_annotate_mode() {
        let doc = build_document("<p>hi</p>", true, false);
        assert!(doc.contains(r#"<html class="__annotate">"#));
        assert!(doc.contains("var annotating = true;"));
        assert!(!doc.contains("cdn.tailwindcss.com"));
    }

    #[test]
    fn test_document_embeds_body_of_full_page() {
        let doc = build_document("<html><body><main>app</main></body></html>", false, true);
        assert!(doc.contains(r#"<div id="root"><main>app</main></div>"#));
    }

    #[test]
    fn test_empty_code_renders_nothing() {
        assert_eq!(build_document("", true, true), "");
    }

    #[test]
    fn test_host_page_is_sandboxed() {
        let page = host_page("<p class=\"x\">a & b</p>", DeviceFrame::Mobile);
        assert!(page.contains(r#"sandbox="allow-scripts allow-same-origin""#));
        assert!(page.contains("srcdoc=\"&lt;p class=&quot;x&quot;&gt;a &amp; b&lt;/p&gt;\""));
        assert!(page.contains("width: 375px"));
    }

    #[test]
    fn test_render_only_on_change() {
        let mut frame = PreviewFrame::new(false, 100);
        assert!(frame.render("<p>a</p>", false));
        assert!(!frame.render("<p>a</p>", false));
        assert!(frame.render("<p>a</p>", true));
        assert!(frame.render("<p>b</p>", true));
        assert!(frame.document().contains("<p>b</p>"));
    }

    #[test]
    fn test_messages_dropped_without_connection() {
        let mut frame = PreviewFrame::new(false, 100);
        frame.set_annotating(true);
        frame.reload();

        let (tx, mut rx) = mpsc::unbounded_channel();
        frame.connect(tx);
        frame.set_annotating(true);
        assert_eq!(rx.try_recv().unwrap(), HostMessage::ToggleAnnotate { active: true });
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_apply_style_posts_and_mirrors() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut frame = PreviewFrame::new(false, 100);
        frame.connect(tx);
        frame.render("<button class=\"cta\">Go</button>", true);

        let el = button();
        frame.observe(&el);
        frame.apply_style(&el, "textAlign", "left");

        assert_eq!(
            rx.try_recv().unwrap(),
            HostMessage::ApplyStyle {
                selector: "button.cta".into(),
                top: 40.0,
                property: "textAlign".into(),
                value: "left".into(),
            }
        );
        let styles = frame.computed_style("button.cta").unwrap();
        assert_eq!(styles.get("textAlign").map(String::as_str), Some("left"));
        assert!(frame.computed_style("h1").is_none());

        frame.reload();
        let styles = frame.computed_style("button.cta").unwrap();
        assert_eq!(styles.get("textAlign").map(String::as_str), Some("center"));
    }

    #[test]
    fn test_annotate_toggle_keeps_direct_edits() {
        let mut frame = PreviewFrame::new(false, 100);
        frame.render("<button class=\"cta\">Go</button>", true);
        let el = button();
        frame.observe(&el);
        frame.apply_style(&el, "textAlign", "left");

        assert!(frame.render("<button class=\"cta\">Go</button>", false));
        let styles = frame.computed_style("button.cta").unwrap();
        assert_eq!(styles.get("textAlign").map(String::as_str), Some("left"));

        frame.render("<button class=\"cta\">Stop</button>", false);
        assert!(frame.computed_style("button.cta").is_none());
    }

    #[test]
    fn test_html_snapshot_truncates() {
        let mut frame = PreviewFrame::new(false, 20);
        frame.render("<p>a fairly long paragraph</p>", false);
        let snapshot = frame.html_snapshot();
        assert!(snapshot.starts_with("<body"));
        assert!(snapshot.ends_with("..."));
        assert_eq!(snapshot.chars().count(), 23);
    }
}
