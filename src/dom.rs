use serde::{Deserialize, Serialize};

use crate::engine::{Engine, EngineResult, evaluate_json};
use crate::types::MARKUP_TRUNCATE_CHARS;

/// JavaScript injected into the page to produce a structured DOM snapshot.
///
/// The script:
///   1. Skips script, style, noscript, svg, link, meta elements.
///   2. Walks every element in document order (capped at 5000).
///   3. Stamps each captured element with `data-uip="<epoch>:<uid>"`, clearing
///      the previous snapshot's stamps first. A stamp is therefore only valid
///      until the next snapshot.
///   4. Records tag, id, role, accessible label and name hints, placeholder, test id, a
///      collapsed text prefix, classes, computed display/visibility, a pointer
///      cursor the element sets itself (not one inherited from its parent),
///      rendered size and whether the element accepts text.
///
/// Returns `JSON.stringify`'d output so the CDP client hands back a string.
pub const SNAPSHOT_JS: &str = r#"
(() => {
  const SKIP = new Set(['SCRIPT','STYLE','NOSCRIPT','SVG','LINK','META','TEMPLATE','HEAD']);
  const MAX = 5000;
  const TEXT_INPUTS = new Set(['text','search','email','url','tel','password','number','']);
  const epoch = Date.now().toString(36);
  for (const el of document.querySelectorAll('[data-uip]')) el.removeAttribute('data-uip');

  const nodes = [];

  function editable(el) {
    if (el.isContentEditable) return true;
    if (el.tagName === 'TEXTAREA') return !el.disabled && !el.readOnly;
    if (el.tagName === 'INPUT') {
      const t = (el.getAttribute('type') || '').toLowerCase();
      return TEXT_INPUTS.has(t) && !el.disabled && !el.readOnly;
    }
    return false;
  }

  function nameHint(el) {
    const ids = el.getAttribute('aria-labelledby');
    if (ids) {
      const t = ids.split(/\s+/)
        .map(i => document.getElementById(i))
        .filter(Boolean)
        .map(e => (e.textContent || '').trim())
        .join(' ');
      if (t) return t;
    }
    return el.getAttribute('title') || el.getAttribute('alt');
  }

  function visit(el, parent, parentCursor) {
    if (nodes.length >= MAX) return;
    if (SKIP.has(el.tagName)) return;
    const uid = nodes.length;
    const s = getComputedStyle(el);
    const r = el.getBoundingClientRect();
    el.setAttribute('data-uip', epoch + ':' + uid);
    nodes.push({
      uid,
      parent,
      tag: el.tagName.toLowerCase(),
      id: el.id || null,
      role: el.getAttribute('role'),
      label: el.getAttribute('aria-label'),
      nameHint: nameHint(el),
      placeholder: el.getAttribute('placeholder') || el.getAttribute('data-placeholder'),
      testId: el.getAttribute('data-testid'),
      text: (el.textContent || '').replace(/\s+/g, ' ').trim().slice(0, 200),
      classes: Array.from(el.classList),
      display: s.display,
      visibility: s.visibility,
      width: r.width,
      height: r.height,
      pointer: s.cursor === 'pointer' && parentCursor !== 'pointer',
      focusable: el.hasAttribute('tabindex'),
      editable: editable(el),
      contentEditable: el.isContentEditable,
    });
    for (const child of el.children) visit(child, uid, s.cursor);
  }

  if (document.body) visit(document.body, null, '');
  return JSON.stringify({ epoch, nodes });
})()
"#;

/// Clears the focused field's content. Best-effort: returns false when nothing
/// editable is focused.
pub const CLEAR_FOCUSED_JS: &str = r#"
(() => {
  const el = document.activeElement;
  if (!el) return JSON.stringify(false);
  if (el.tagName === 'INPUT' || el.tagName === 'TEXTAREA') {
    el.select();
    document.execCommand('delete');
    if (el.value) {
      el.value = '';
      el.dispatchEvent(new Event('input', { bubbles: true }));
    }
    return JSON.stringify(true);
  }
  if (el.isContentEditable) {
    const range = document.createRange();
    range.selectNodeContents(el);
    const sel = window.getSelection();
    sel.removeAllRanges();
    sel.addRange(range);
    document.execCommand('delete');
    return JSON.stringify(true);
  }
  return JSON.stringify(false);
})()
"#;

/// Short visible text snippets, used when the page never looks ready.
pub const TEXT_DUMP_JS: &str = r#"
(() => JSON.stringify(
  Array.from(document.querySelectorAll('div,nav,aside,section,main,header'))
    .filter(e => e.offsetParent !== null)
    .map(e => (e.textContent || '').replace(/\s+/g, ' ').trim())
    .filter(t => t && t.length < 200)
    .slice(0, 25)
))()
"#;

pub const LOCATION_JS: &str =
    "JSON.stringify({ url: window.location.href, title: document.title })";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DomNode {
    pub uid: usize,
    pub parent: Option<usize>,
    pub tag: String,
    pub id: Option<String>,
    pub role: Option<String>,
    pub label: Option<String>,
    /// `aria-labelledby` text, `title` or `alt`.
    pub name_hint: Option<String>,
    pub placeholder: Option<String>,
    pub test_id: Option<String>,
    pub text: String,
    pub classes: Vec<String>,
    pub display: String,
    pub visibility: String,
    pub width: f64,
    pub height: f64,
    pub pointer: bool,
    pub focusable: bool,
    pub editable: bool,
    pub content_editable: bool,
}

const INTERACTIVE_TAGS: &[&str] = &["a", "button", "select", "summary", "option", "label"];
const INTERACTIVE_ROLES: &[&str] = &[
    "button", "link", "menuitem", "tab", "option", "treeitem", "checkbox", "switch", "textbox",
    "combobox",
];

impl DomNode {
    /// Exists with non-zero rendered size and is not hidden by display or
    /// visibility. Absolute: a matched-but-invisible node is never a result.
    pub fn is_visible(&self) -> bool {
        self.width > 0.0
            && self.height > 0.0
            && self.display != "none"
            && self.visibility != "hidden"
            && self.visibility != "collapse"
    }

    pub fn is_interactive(&self) -> bool {
        INTERACTIVE_TAGS.contains(&self.tag.as_str())
            || (self.tag == "input" && !self.editable)
            || self
                .role
                .as_deref()
                .is_some_and(|r| INTERACTIVE_ROLES.contains(&r))
            || self.pointer
            || self.focusable
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }

    /// Accessible name: `aria-label`, falling back to text.
    pub fn accessible_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.text)
    }
}

/// A structured capture of the page. `nodes[i].uid == i`, in document order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DomSnapshot {
    pub epoch: String,
    pub nodes: Vec<DomNode>,
    #[serde(skip)]
    children: Vec<Vec<usize>>,
}

impl DomSnapshot {
    pub fn new(epoch: impl Into<String>, mut nodes: Vec<DomNode>) -> Self {
        for (i, node) in nodes.iter_mut().enumerate() {
            node.uid = i;
        }
        let mut children = vec![Vec::new(); nodes.len()];
        for node in &nodes {
            if let Some(p) = node.parent.filter(|p| *p < children.len()) {
                children[p].push(node.uid);
            }
        }
        Self {
            epoch: epoch.into(),
            nodes,
            children,
        }
    }

    pub fn node(&self, uid: usize) -> Option<&DomNode> {
        self.nodes.get(uid)
    }

    pub fn children(&self, uid: usize) -> &[usize] {
        self.children.get(uid).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Descendants of `uid` (excluding itself) in document order.
    pub fn descendants(&self, uid: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack: Vec<usize> = self.children(uid).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).iter().rev());
        }
        out
    }

    pub fn is_ancestor(&self, ancestor: usize, uid: usize) -> bool {
        let mut cur = self.node(uid).and_then(|n| n.parent);
        while let Some(p) = cur {
            if p == ancestor {
                return true;
            }
            cur = self.node(p).and_then(|n| n.parent);
        }
        false
    }

    /// Visible itself, with no `display: none` ancestor. Computed
    /// `visibility` is per node, so a visible child of a hidden parent shows.
    pub fn is_rendered(&self, uid: usize) -> bool {
        let mut cur = Some(uid);
        while let Some(id) = cur {
            match self.node(id) {
                Some(n) if n.display != "none" => cur = n.parent,
                _ => return false,
            }
        }
        self.node(uid).is_some_and(DomNode::is_visible)
    }

    /// CSS selector matching the stamp `SNAPSHOT_JS` left on node `uid`.
    pub fn stamp_selector(&self, uid: usize) -> String {
        format!("[data-uip=\"{}:{}\"]", self.epoch, uid)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageLocation {
    pub url: String,
    pub title: String,
}

/// Capture a structured DOM snapshot from the current page.
pub fn capture_snapshot<E: Engine + ?Sized>(engine: &E) -> EngineResult<DomSnapshot> {
    #[derive(Deserialize)]
    struct Raw {
        epoch: String,
        nodes: Vec<DomNode>,
    }
    let raw: Raw = evaluate_json(engine, SNAPSHOT_JS)?;
    Ok(DomSnapshot::new(raw.epoch, raw.nodes))
}

/// Full document markup, truncated for very large pages.
pub fn capture_markup<E: Engine + ?Sized>(engine: &E) -> EngineResult<String> {
    let raw = engine.markup()?;
    if raw.len() > MARKUP_TRUNCATE_CHARS {
        let mut cut = MARKUP_TRUNCATE_CHARS;
        while !raw.is_char_boundary(cut) {
            cut -= 1;
        }
        Ok(format!(
            "{}\n<!-- truncated, {} total chars -->",
            &raw[..cut],
            raw.len()
        ))
    } else {
        Ok(raw)
    }
}

/// Current URL and title.
pub fn page_location<E: Engine + ?Sized>(engine: &E) -> PageLocation {
    evaluate_json(engine, LOCATION_JS).unwrap_or_else(|_| PageLocation {
        url: "unknown".to_string(),
        title: "untitled".to_string(),
    })
}

pub fn visible_text_snippets<E: Engine + ?Sized>(engine: &E) -> Vec<String> {
    evaluate_json(engine, TEXT_DUMP_JS).unwrap_or_default()
}

/// Clear the focused field. Returns whether anything was cleared.
pub fn clear_focused<E: Engine + ?Sized>(engine: &E) -> EngineResult<bool> {
    evaluate_json(engine, CLEAR_FOCUSED_JS)
}


#[cfg(test)]
mod tests {
    use super::fixture::*;
    use super::*;

    #[test]
    fn descendants_are_in_document_order() {
        let mut b = Builder::new();
        let nav = b.add(0, "nav", "A B");
        let a = b.add(nav, "a", "A");
        let span = b.add(a, "span", "A");
        let bb = b.add(nav, "a", "B");
        let snap = b.build();
        assert_eq!(snap.descendants(nav), vec![a, span, bb]);
        assert!(snap.is_ancestor(nav, span));
        assert!(!snap.is_ancestor(bb, span));
    }

    #[test]
    fn hidden_ancestor_hides_descendants() {
        let mut b = Builder::new();
        let dialog = b.add(0, "div", "Create project");
        let button = b.add(dialog, "button", "Create project");
        b.with(dialog, |n| n.display = "none".into());
        let snap = b.build();
        assert!(snap.node(button).unwrap().is_visible());
        assert!(!snap.is_rendered(button));
    }

    #[test]
    fn visible_child_of_visibility_hidden_parent_shows() {
        let mut b = Builder::new();
        let wrapper = b.add(0, "div", "Create project");
        let button = b.add(wrapper, "button", "Create project");
        b.with(wrapper, |n| n.visibility = "hidden".into());
        let snap = b.build();
        assert!(!snap.is_rendered(wrapper));
        assert!(snap.is_rendered(button));
    }

    #[test]
    fn zero_size_is_invisible() {
        let mut b = Builder::new();
        let x = b.add(0, "button", "x");
        b.with(x, |n| n.height = 0.0);
        assert!(!b.build().is_rendered(x));
    }

    #[test]
    fn snapshot_decodes_script_payload() {
        let raw = r#"{"epoch":"k1","nodes":[
            {"uid":0,"parent":null,"tag":"body","text":"Hi","classes":[],"display":"block","visibility":"visible","width":10,"height":10},
            {"uid":1,"parent":0,"tag":"button","label":"Add project","text":"","classes":["sc-cpSJdf","hVYWuk"],"display":"inline-flex","visibility":"visible","width":24,"height":24,"pointer":true}
        ]}"#;
        #[derive(Deserialize)]
        struct Raw {
            epoch: String,
            nodes: Vec<DomNode>,
        }
        let raw: Raw = serde_json::from_str(raw).unwrap();
        let snap = DomSnapshot::new(raw.epoch, raw.nodes);
        assert_eq!(snap.children(0), &[1]);
        assert!(snap.node(1).unwrap().has_class("hVYWuk"));
        assert_eq!(snap.stamp_selector(1), "[data-uip=\"k1:1\"]");
    }
}
