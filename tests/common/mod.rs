//! A scripted page standing in for Chrome.
#![allow(dead_code)]

use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use uipilot::config::{RunConfig, SiteProfile, Timings};
use uipilot::dom::{self, DomNode};
use uipilot::engine::{Engine, EngineResult};
use uipilot::error::EngineError;
use uipilot::instrument;
use uipilot::session::StorageState;

/// Builds the node list of one screen. uid 0 is `body`.
pub struct ScreenBuilder {
    nodes: Vec<DomNode>,
    on_click: HashMap<usize, usize>,
}

impl ScreenBuilder {
    pub fn new() -> Self {
        Self {
            nodes: vec![node("body", None, "")],
            on_click: HashMap::new(),
        }
    }

    pub fn add(&mut self, parent: usize, tag: &str, text: &str) -> usize {
        self.nodes.push(node(tag, Some(parent), text));
        self.nodes.len() - 1
    }

    pub fn with(&mut self, uid: usize, f: impl FnOnce(&mut DomNode)) -> &mut Self {
        f(&mut self.nodes[uid]);
        self
    }

    /// Clicking `uid` switches the page to screen `next`.
    pub fn leads_to(&mut self, uid: usize, next: usize) -> &mut Self {
        self.on_click.insert(uid, next);
        self
    }

    pub fn build(self) -> Screen {
        let nodes = self
            .nodes
            .into_iter()
            .enumerate()
            .map(|(i, mut n)| {
                n.uid = i;
                n
            })
            .collect();
        Screen {
            nodes,
            on_click: self.on_click,
        }
    }
}

fn node(tag: &str, parent: Option<usize>, text: &str) -> DomNode {
    DomNode {
        parent,
        tag: tag.to_string(),
        text: text.to_string(),
        display: "block".to_string(),
        visibility: "visible".to_string(),
        width: 120.0,
        height: 24.0,
        editable: matches!(tag, "input" | "textarea"),
        ..Default::default()
    }
}

pub fn hide(n: &mut DomNode) {
    n.display = "none".to_string();
    n.width = 0.0;
    n.height = 0.0;
}

pub struct Screen {
    pub nodes: Vec<DomNode>,
    pub on_click: HashMap<usize, usize>,
}

#[derive(Debug, Default)]
pub struct PageState {
    pub screen: usize,
    pub epoch: u64,
    pub url: String,
    pub probe_installed: bool,
    pub navigations: Vec<String>,
    pub clicks: Vec<String>,
    pub focused: Option<usize>,
    pub typed: String,
    pub keystrokes: usize,
    pub restored: bool,
    pub saves: usize,
}

/// How a scripted navigation goes wrong.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NavigateFault {
    /// The page loads but never signals ready.
    Timeout,
    /// The browser refuses the request outright.
    Refused,
}

pub struct FakeEngine {
    screens: Vec<Screen>,
    navigate_fault: Option<NavigateFault>,
    rejected_clicks: Vec<String>,
    rerender_on_scroll: bool,
    pub state: Mutex<PageState>,
}

impl FakeEngine {
    pub fn new(screens: Vec<Screen>) -> Self {
        Self {
            screens,
            navigate_fault: None,
            rejected_clicks: Vec::new(),
            rerender_on_scroll: false,
            state: Mutex::new(PageState::default()),
        }
    }

    pub fn failing_navigation(mut self, fault: NavigateFault) -> Self {
        self.navigate_fault = Some(fault);
        self
    }

    /// Clicks on elements with this accessible name are intercepted.
    pub fn rejecting_clicks_on(mut self, name: &str) -> Self {
        self.rejected_clicks.push(name.to_string());
        self
    }

    /// Scrolling re-renders the page, restamping every node.
    pub fn rerendering_on_scroll(mut self) -> Self {
        self.rerender_on_scroll = true;
        self
    }

    pub fn page(&self) -> std::sync::MutexGuard<'_, PageState> {
        self.state.lock().unwrap()
    }

    fn find(&self, selector: &str) -> Option<usize> {
        let page = self.page();
        let nodes = &self.screens[page.screen].nodes;
        if let Some(stamp) = attr_value(selector, "data-uip") {
            let (epoch, uid) = stamp.split_once(':')?;
            // Handles from an older snapshot are stale.
            if epoch != format!("e{}", page.epoch) {
                return None;
            }
            return uid.parse().ok().filter(|u: &usize| *u < nodes.len());
        }
        let matching = |value: &str, attr: fn(&DomNode) -> Option<&str>| {
            nodes.iter().find(|n| attr(n) == Some(value)).map(|n| n.uid)
        };
        if let Some(id) = attr_value(selector, "id") {
            return matching(&id, |n| n.id.as_deref());
        }
        if let Some(test_id) = attr_value(selector, "data-testid") {
            return matching(&test_id, |n| n.test_id.as_deref());
        }
        if let Some(label) = attr_value(selector, "aria-label") {
            return matching(&label, |n| n.label.as_deref());
        }
        None
    }

    fn snapshot_json(&self) -> String {
        let mut page = self.page();
        page.epoch += 1;
        json!({
            "epoch": format!("e{}", page.epoch),
            "nodes": self.screens[page.screen].nodes,
        })
        .to_string()
    }

    fn probe_json(&self) -> String {
        let page = self.page();
        if !page.probe_installed {
            return json!({ "installed": false }).to_string();
        }
        json!({
            "installed": true,
            "signal": {
                "lastChangeTimestamp": 1000.0,
                "addedCount": 4,
                "removedCount": 0,
                "attributeChangeCount": 2,
                "sampledAt": 60000.0
            },
            "ringLength": 6,
            "overlays": []
        })
        .to_string()
    }
}

/// `[attr="value"]` anywhere in `selector`.
fn attr_value(selector: &str, attr: &str) -> Option<String> {
    let open = format!("[{attr}=\"");
    let start = selector.find(&open)? + open.len();
    let end = selector[start..].find("\"]")? + start;
    Some(selector[start..end].replace("\\\"", "\"").replace("\\\\", "\\"))
}

impl Engine for FakeEngine {
    fn navigate(&self, url: &str) -> EngineResult<()> {
        if self.navigate_fault == Some(NavigateFault::Refused) {
            return Err(EngineError::Protocol(format!("net::ERR_CONNECTION_REFUSED at {url}")));
        }
        let mut page = self.page();
        page.url = url.to_string();
        page.screen = 0;
        page.probe_installed = false;
        page.navigations.push(url.to_string());
        match self.navigate_fault {
            Some(NavigateFault::Timeout) => Err(EngineError::Timeout(format!("load of {url}"))),
            _ => Ok(()),
        }
    }

    fn evaluate(&self, script: &str) -> EngineResult<Value> {
        let out = if script == dom::SNAPSHOT_JS {
            self.snapshot_json()
        } else if script == instrument::READ_JS {
            self.probe_json()
        } else if script == instrument::INSTALL_JS {
            self.page().probe_installed = true;
            "true".to_string()
        } else if script == instrument::STOP_JS {
            let mut page = self.page();
            let was = page.probe_installed;
            page.probe_installed = false;
            was.to_string()
        } else if script == dom::CLEAR_FOCUSED_JS {
            self.page().typed.clear();
            "true".to_string()
        } else if script == dom::LOCATION_JS {
            json!({ "url": self.page().url.clone(), "title": "fake" }).to_string()
        } else if script == dom::TEXT_DUMP_JS {
            "[]".to_string()
        } else {
            return Ok(Value::Null);
        };
        Ok(Value::String(out))
    }

    fn scroll_into_view(&self, selector: &str) -> EngineResult<()> {
        self.find(selector)
            .ok_or_else(|| EngineError::Interaction(format!("no node for {selector}")))?;
        if self.rerender_on_scroll {
            self.page().epoch += 1;
        }
        Ok(())
    }

    fn click(&self, selector: &str) -> EngineResult<()> {
        let uid = self
            .find(selector)
            .ok_or_else(|| EngineError::Interaction(format!("no node for {selector}")))?;
        let mut page = self.page();
        let screen = &self.screens[page.screen];
        let name = screen.nodes[uid].accessible_name().to_string();
        if self.rejected_clicks.contains(&name) {
            return Err(EngineError::Interaction(format!(
                "{name} is covered by another element"
            )));
        }
        let next = screen.on_click.get(&uid).copied();
        page.clicks.push(name);
        page.focused = Some(uid);
        if let Some(next) = next {
            page.screen = next;
        }
        Ok(())
    }

    fn focus(&self, selector: &str) -> EngineResult<()> {
        let uid = self
            .find(selector)
            .ok_or_else(|| EngineError::Interaction(format!("no node for {selector}")))?;
        self.page().focused = Some(uid);
        Ok(())
    }

    fn type_text(&self, text: &str, delay: &dyn Fn() -> Duration) -> EngineResult<()> {
        let mut page = self.page();
        if page.focused.is_none() {
            return Err(EngineError::Interaction("nothing focused".into()));
        }
        for ch in text.chars() {
            page.typed.push(ch);
            page.keystrokes += 1;
            let _ = delay();
        }
        Ok(())
    }

    fn screenshot(&self) -> EngineResult<Vec<u8>> {
        Ok(b"\x89PNG fake".to_vec())
    }

    fn markup(&self) -> EngineResult<String> {
        Ok(format!(
            "<html><body data-screen=\"{}\"></body></html>",
            self.page().screen
        ))
    }

    fn save_state(&self, path: &Path) -> EngineResult<()> {
        let state = StorageState {
            cookies: vec![json!({ "name": "sid", "value": "fake", "domain": "app.test" })],
            saved_at: Some(chrono::Utc::now()),
            ..Default::default()
        };
        state
            .save(path)
            .map_err(|e| EngineError::Io(std::io::Error::other(e.to_string())))?;
        self.page().saves += 1;
        Ok(())
    }

    fn restore_state(&self, path: &Path) -> EngineResult<()> {
        let loaded = StorageState::load(path)
            .map_err(|e| EngineError::Io(std::io::Error::other(e.to_string())))?;
        self.page().restored = loaded.is_some();
        Ok(())
    }
}

/// Every element of the create-project flow present and visible.
pub fn full_dashboard() -> Screen {
    let mut b = ScreenBuilder::new();
    let header = b.add(0, "header", "Projects");
    let crumb = b.add(header, "span", "Projects");
    b.with(crumb, |n| n.pointer = true);

    let aside = b.add(0, "aside", "Inbox Workspace Projects Views");
    let inbox = b.add(aside, "a", "Inbox");
    b.with(inbox, |n| n.pointer = true);
    let section = b.add(aside, "div", "Workspace Projects Views");
    b.add(section, "button", "Workspace");
    let items = b.add(section, "div", "Projects Views");
    b.add(items, "a", "Projects");
    b.add(items, "a", "Views");

    let main = b.add(0, "main", "Add project");
    let add = b.add(main, "button", "Add project");
    b.with(add, |n| n.label = Some("Add project".into()));

    let dialog = b.add(0, "div", "Project name Create project");
    b.with(dialog, |n| n.role = Some("dialog".into()));
    let editor = b.add(dialog, "div", "");
    b.with(editor, |n| {
        n.classes = vec!["ProseMirror".into(), "editor".into()];
        n.content_editable = true;
        n.editable = true;
        n.placeholder = Some("Project name".into());
    });
    b.add(dialog, "button", "Create project");
    b.build()
}

/// The sidebar renders but the creation button stays hidden and no dialog
/// ever opens.
pub fn dashboard_without_add() -> Screen {
    let mut b = ScreenBuilder::new();
    let aside = b.add(0, "aside", "Inbox Workspace Projects");
    b.add(aside, "a", "Inbox");
    let section = b.add(aside, "div", "Workspace Projects");
    b.add(section, "button", "Workspace");
    b.add(section, "a", "Projects");

    let main = b.add(0, "main", "Add project");
    let add = b.add(main, "button", "Add project");
    b.with(add, hide);
    b.build()
}

pub fn test_config(dir: &Path) -> RunConfig {
    RunConfig {
        profile_dir: dir.join("profile"),
        state_file: dir.join("state").join("session.json"),
        capture_dir: dir.join("captures"),
        timings: Timings::immediate(),
        site: SiteProfile::linear(),
        ..Default::default()
    }
}
