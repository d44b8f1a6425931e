//! Maps a human-authored target description to an element of a DOM snapshot.
//!
//! [`resolve`] is a pure function of the snapshot, the target text and the
//! site profile. Strategies run in a fixed order and the first visible match
//! wins:
//!
//! 1. landmark: for targets a [`LandmarkRule`] names, find a structural
//!    container (nav/aside/sidebar), then the section inside it identified by
//!    the rule's keyword, then the target inside that section;
//! 2. keyword class: for targets containing a [`KeywordClass`] trigger, the
//!    first interactive element whose text, accessible label or class
//!    fingerprint matches;
//! 3. generic: text containment, then accessible-label containment, then
//!    explicit role with a matching name.
//!
//! Not finding anything is a normal outcome ([`Resolution::Unresolved`]).

use serde::{Deserialize, Serialize};

use crate::config::{FieldPattern, KeywordClass, LandmarkRule, SiteProfile};
use crate::dom::{DomNode, DomSnapshot};

/// How far up a text match may be promoted to reach its clickable ancestor.
const PROMOTE_DEPTH: usize = 4;

const CONTAINER_TAGS: &[&str] = &["nav", "aside"];
const CONTAINER_ROLES: &[&str] = &["navigation", "complementary"];
const CONTAINER_HINT: &str = "sidebar";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Landmark,
    KeywordClass,
    TextContent,
    AccessibleLabel,
    RoleWithLabel,
    EditableField,
}

/// Every strategy `resolve` tries, in order.
pub const RESOLUTION_ORDER: [Strategy; 5] = [
    Strategy::Landmark,
    Strategy::KeywordClass,
    Strategy::TextContent,
    Strategy::AccessibleLabel,
    Strategy::RoleWithLabel,
];

/// A selector built from stable attributes; safe to re-resolve later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Locator {
    pub selector: String,
    pub uid: usize,
    pub strategy: Strategy,
}

/// Points at the snapshot stamp of one element. Only valid until the next
/// snapshot; never reuse it across a DOM mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementHandle {
    pub selector: String,
    pub epoch: String,
    pub uid: usize,
    pub strategy: Strategy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Resolution {
    Locator(Locator),
    Handle(ElementHandle),
    Unresolved { target: String },
}

impl Resolution {
    pub fn selector(&self) -> Option<&str> {
        match self {
            Resolution::Locator(l) => Some(&l.selector),
            Resolution::Handle(h) => Some(&h.selector),
            Resolution::Unresolved { .. } => None,
        }
    }

    pub fn uid(&self) -> Option<usize> {
        match self {
            Resolution::Locator(l) => Some(l.uid),
            Resolution::Handle(h) => Some(h.uid),
            Resolution::Unresolved { .. } => None,
        }
    }

    pub fn strategy(&self) -> Option<Strategy> {
        match self {
            Resolution::Locator(l) => Some(l.strategy),
            Resolution::Handle(h) => Some(h.strategy),
            Resolution::Unresolved { .. } => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, Resolution::Unresolved { .. })
    }
}

/// Trim, case-fold and collapse whitespace.
pub fn normalize(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn contains(haystack: &str, needle: &str) -> bool {
    !needle.is_empty() && normalize(haystack).contains(needle)
}

fn opt_contains(haystack: Option<&str>, needle: &str) -> bool {
    haystack.is_some_and(|h| contains(h, needle))
}

pub fn resolve(snapshot: &DomSnapshot, target: &str, site: &SiteProfile) -> Resolution {
    let wanted = normalize(target);
    if wanted.is_empty() {
        return Resolution::Unresolved {
            target: target.to_string(),
        };
    }

    for strategy in RESOLUTION_ORDER {
        let hit = match strategy {
            Strategy::Landmark => site
                .landmarks
                .iter()
                .filter(|rule| rule.targets.iter().any(|t| normalize(t) == wanted))
                .find_map(|rule| by_landmark(snapshot, &wanted, rule)),
            Strategy::KeywordClass => site
                .keyword_classes
                .iter()
                .filter(|class| class.triggers.iter().any(|t| wanted.contains(&normalize(t))))
                .find_map(|class| by_keyword_class(snapshot, class)),
            Strategy::TextContent => by_text(snapshot, &wanted),
            Strategy::AccessibleLabel => by_label(snapshot, &wanted),
            Strategy::RoleWithLabel => by_role(snapshot, &wanted),
            Strategy::EditableField => None,
        };
        if let Some(uid) = hit {
            return to_resolution(snapshot, uid, strategy);
        }
    }

    Resolution::Unresolved {
        target: target.to_string(),
    }
}

/// First visible editable field, probing `patterns` in order. Within the first
/// pattern that has any visible match, a field whose label, placeholder or
/// name mentions `target` is preferred.
pub fn find_editable(
    snapshot: &DomSnapshot,
    target: Option<&str>,
    patterns: &[FieldPattern],
) -> Resolution {
    let wanted = target.map(normalize).filter(|t| !t.is_empty());

    for pattern in patterns {
        let visible: Vec<&DomNode> = snapshot
            .nodes
            .iter()
            .filter(|n| field_matches(n, pattern) && snapshot.is_rendered(n.uid))
            .collect();
        let Some(first) = visible.first() else {
            continue;
        };
        let chosen = wanted
            .as_deref()
            .and_then(|w| {
                visible.iter().find(|n| {
                    opt_contains(n.label.as_deref(), w)
                        || opt_contains(n.placeholder.as_deref(), w)
                        || opt_contains(n.name_hint.as_deref(), w)
                })
            })
            .unwrap_or(first);
        return to_resolution(snapshot, chosen.uid, Strategy::EditableField);
    }

    Resolution::Unresolved {
        target: target.unwrap_or("editable field").to_string(),
    }
}

fn field_matches(node: &DomNode, pattern: &FieldPattern) -> bool {
    match pattern {
        FieldPattern::Classes(classes) => {
            !classes.is_empty() && classes.iter().all(|c| node.has_class(c))
        }
        FieldPattern::Role(role) => node.role.as_deref() == Some(role.as_str()),
        FieldPattern::ContentEditable => node.content_editable,
        FieldPattern::Tag(tag) => node.tag == *tag && node.editable,
    }
}

fn is_container(node: &DomNode) -> bool {
    CONTAINER_TAGS.contains(&node.tag.as_str())
        || node
            .role
            .as_deref()
            .is_some_and(|r| CONTAINER_ROLES.contains(&r))
        || opt_contains(node.id.as_deref(), CONTAINER_HINT)
        || node.classes.iter().any(|c| contains(c, CONTAINER_HINT))
}

fn by_landmark(snapshot: &DomSnapshot, wanted: &str, rule: &LandmarkRule) -> Option<usize> {
    let keyword = normalize(&rule.keyword);

    for container in snapshot.nodes.iter().filter(|n| is_container(n)) {
        let scope: Vec<usize> = std::iter::once(container.uid)
            .chain(snapshot.descendants(container.uid))
            .collect();

        // Section anchors: an id naming the keyword, or the heading whose own
        // text is the keyword.
        let anchors = scope.iter().copied().filter(|&uid| {
            let Some(node) = snapshot.node(uid) else {
                return false;
            };
            opt_contains(node.id.as_deref(), &keyword)
                || (normalize(&node.text) == keyword
                    && !snapshot
                        .children(uid)
                        .iter()
                        .any(|&c| snapshot.node(c).is_some_and(|n| normalize(&n.text) == keyword)))
        });

        for anchor in anchors {
            // Widen from the anchor towards the container until the section
            // holding the target is reached.
            let mut region = Some(anchor);
            while let Some(r) = region {
                let within: Vec<usize> = snapshot
                    .descendants(r)
                    .into_iter()
                    .filter(|&uid| uid != anchor && !snapshot.is_ancestor(uid, anchor))
                    .collect();
                let exact = |n: &DomNode| normalize(&n.text) == wanted;
                let loose = |n: &DomNode| contains(&n.text, wanted);
                if let Some(uid) = first_text_match(snapshot, &within, r, exact)
                    .or_else(|| first_text_match(snapshot, &within, r, loose))
                {
                    return Some(uid);
                }
                if r == container.uid {
                    break;
                }
                region = snapshot.node(r).and_then(|n| n.parent);
            }
        }
    }
    None
}

fn by_keyword_class(snapshot: &DomSnapshot, class: &KeywordClass) -> Option<usize> {
    let texts: Vec<String> = class.texts.iter().map(|t| normalize(t)).collect();
    let labels: Vec<String> = class.labels.iter().map(|t| normalize(t)).collect();

    let matches = |n: &DomNode| {
        n.is_interactive()
            && (texts.iter().any(|t| contains(&n.text, t))
                || labels.iter().any(|l| opt_contains(n.label.as_deref(), l))
                || class.class_fingerprints.iter().any(|f| n.has_class(f)))
    };

    let candidates: Vec<usize> = snapshot
        .nodes
        .iter()
        .filter(|n| matches(n) && snapshot.is_rendered(n.uid))
        .map(|n| n.uid)
        .collect();

    // A clickable wrapper's text includes its children's; prefer the
    // innermost visible interactive match.
    candidates.iter().copied().find(|&uid| {
        !candidates
            .iter()
            .any(|&other| other != uid && snapshot.is_ancestor(uid, other))
    })
}

fn by_text(snapshot: &DomSnapshot, wanted: &str) -> Option<usize> {
    let all: Vec<usize> = snapshot.nodes.iter().map(|n| n.uid).collect();
    first_text_match(snapshot, &all, 0, |n| contains(&n.text, wanted))
}

fn by_label(snapshot: &DomSnapshot, wanted: &str) -> Option<usize> {
    snapshot
        .nodes
        .iter()
        .filter(|n| {
            opt_contains(n.label.as_deref(), wanted) || opt_contains(n.placeholder.as_deref(), wanted)
        })
        .map(|n| n.uid)
        .find(|&uid| snapshot.is_rendered(uid))
}

fn by_role(snapshot: &DomSnapshot, wanted: &str) -> Option<usize> {
    snapshot
        .nodes
        .iter()
        .filter(|n| {
            n.role.is_some()
                && (opt_contains(n.name_hint.as_deref(), wanted)
                    || contains(n.accessible_name(), wanted))
        })
        .map(|n| n.uid)
        .find(|&uid| snapshot.is_rendered(uid))
}

/// Among `scope`, the deepest visible nodes satisfying `pred` in document
/// order, promoted to their nearest interactive ancestor below `boundary`; the
/// first one that is visible.
fn first_text_match(
    snapshot: &DomSnapshot,
    scope: &[usize],
    boundary: usize,
    pred: impl Fn(&DomNode) -> bool,
) -> Option<usize> {
    scope
        .iter()
        .copied()
        .filter(|&uid| snapshot.is_rendered(uid) && snapshot.node(uid).is_some_and(&pred))
        .filter(|&uid| {
            !snapshot
                .children(uid)
                .iter()
                .any(|&c| snapshot.is_rendered(c) && snapshot.node(c).is_some_and(&pred))
        })
        .map(|uid| promote(snapshot, uid, boundary))
        .find(|&uid| snapshot.is_rendered(uid))
}

fn promote(snapshot: &DomSnapshot, uid: usize, boundary: usize) -> usize {
    let mut cur = uid;
    for _ in 0..=PROMOTE_DEPTH {
        let Some(node) = snapshot.node(cur) else {
            break;
        };
        if node.is_interactive() {
            return cur;
        }
        match node.parent {
            Some(p) if p != boundary && cur != boundary => cur = p,
            _ => break,
        }
    }
    uid
}

fn to_resolution(snapshot: &DomSnapshot, uid: usize, strategy: Strategy) -> Resolution {
    let Some(node) = snapshot.node(uid) else {
        return Resolution::Unresolved {
            target: String::new(),
        };
    };
    let stable = node
        .id
        .as_deref()
        .filter(|id| !id.is_empty() && unique_by(snapshot, id, |n| n.id.as_deref()))
        .map(|id| format!("[id=\"{}\"]", css_escape(id)))
        .or_else(|| {
            node.test_id
                .as_deref()
                .filter(|t| unique_by(snapshot, t, |n| n.test_id.as_deref()))
                .map(|t| format!("[data-testid=\"{}\"]", css_escape(t)))
        })
        .or_else(|| {
            node.label
                .as_deref()
                .filter(|l| unique_by(snapshot, l, |n| n.label.as_deref()))
                .map(|l| format!("{}[aria-label=\"{}\"]", node.tag, css_escape(l)))
        });

    match stable {
        Some(selector) => Resolution::Locator(Locator {
            selector,
            uid,
            strategy,
        }),
        None => Resolution::Handle(ElementHandle {
            selector: snapshot.stamp_selector(uid),
            epoch: snapshot.epoch.clone(),
            uid,
            strategy,
        }),
    }
}

fn unique_by(
    snapshot: &DomSnapshot,
    value: &str,
    attr: impl Fn(&DomNode) -> Option<&str>,
) -> bool {
    snapshot.nodes.iter().filter(|n| attr(n) == Some(value)).count() == 1
}

fn css_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
