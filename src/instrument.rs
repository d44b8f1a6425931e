//! In-page probe reporting DOM activity, focus and overlays.
//!
//! The probe lives under one namespaced global and has an explicit lifecycle:
//! installing stops any previous instance first, so each page (and each new
//! document after a navigation) gets a fresh observer. The host only ever
//! reads it; the probe overwrites its state continuously.

use serde::Deserialize;
use tracing::debug;

use crate::engine::{Engine, EngineResult, evaluate_json};
use crate::stabilize::SignalSource;
use crate::types::{FocusRecord, MutationSignal, OverlayDescriptor};

/// Installs the probe. Keeps a 200-entry mutation ring, the latest mutation
/// record, the last focused element type, and rescans for overlays every
/// 800ms (visible, fixed/absolute, wider than 30% of the viewport and taller
/// than 100px).
pub const INSTALL_JS: &str = r#"
(() => {
  const NS = '__uipilotProbe';
  if (window[NS] && typeof window[NS].stop === 'function') window[NS].stop();

  const RING = 200;
  const SCAN_MS = 800;
  const probe = {
    ring: [],
    last: { added: 0, removed: 0, attrs: 0, time: Date.now() },
    totals: { added: 0, removed: 0, attrs: 0 },
    focus: null,
    overlays: [],
    observer: null,
    timer: null,
    onFocus: null,
  };

  probe.observer = new MutationObserver((records) => {
    let added = 0, removed = 0, attrs = 0;
    for (const r of records) {
      if (r.type === 'childList') {
        added += r.addedNodes.length;
        removed += r.removedNodes.length;
      } else if (r.type === 'attributes') {
        attrs += 1;
      }
    }
    const entry = { added, removed, attrs, time: Date.now() };
    probe.ring.push(entry);
    if (probe.ring.length > RING) probe.ring.shift();
    probe.last = entry;
    probe.totals.added += added;
    probe.totals.removed += removed;
    probe.totals.attrs += attrs;
  });
  probe.observer.observe(document.documentElement || document, {
    subtree: true,
    childList: true,
    attributes: true,
    attributeFilter: ['style', 'class', 'hidden', 'aria-hidden', 'open'],
  });

  probe.onFocus = (e) => {
    const t = e.target;
    if (!t || !t.tagName) return;
    probe.focus = { tag: t.tagName.toLowerCase(), role: t.getAttribute('role'), time: Date.now() };
  };
  document.addEventListener('focus', probe.onFocus, true);

  const scan = () => {
    const vw = window.innerWidth || 1, found = [];
    for (const el of document.querySelectorAll('body *')) {
      const s = getComputedStyle(el);
      if (s.position !== 'fixed' && s.position !== 'absolute') continue;
      if (s.display === 'none' || s.visibility === 'hidden') continue;
      const r = el.getBoundingClientRect();
      if (r.width <= vw * 0.3 || r.height <= 100) continue;
      const z = parseInt(s.zIndex, 10);
      found.push({
        tag: el.tagName.toLowerCase(),
        stackOrder: Number.isNaN(z) ? 0 : z,
        boundingBox: { x: r.x, y: r.y, width: r.width, height: r.height },
        role: el.getAttribute('role'),
      });
    }
    probe.overlays = found;
  };
  scan();
  probe.timer = setInterval(scan, SCAN_MS);

  probe.stop = () => {
    probe.observer.disconnect();
    clearInterval(probe.timer);
    document.removeEventListener('focus', probe.onFocus, true);
    delete window[NS];
  };
  window[NS] = probe;
  return JSON.stringify(true);
})()
"#;

/// Reads the probe's current state without consuming anything.
pub const READ_JS: &str = r#"
(() => {
  const p = window.__uipilotProbe;
  if (!p) return JSON.stringify({ installed: false });
  return JSON.stringify({
    installed: true,
    signal: {
      lastChangeTimestamp: p.last.time,
      addedCount: p.totals.added,
      removedCount: p.totals.removed,
      attributeChangeCount: p.totals.attrs,
      sampledAt: Date.now(),
    },
    ringLength: p.ring.length,
    focus: p.focus,
    overlays: p.overlays,
  });
})()
"#;

pub const STOP_JS: &str = r#"
(() => {
  const p = window.__uipilotProbe;
  if (p) p.stop();
  return JSON.stringify(!!p);
})()
"#;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProbeState {
    pub installed: bool,
    pub signal: Option<MutationSignal>,
    pub ring_length: usize,
    pub focus: Option<FocusRecord>,
    pub overlays: Vec<OverlayDescriptor>,
}

/// Host-side handle on the probe of one page.
pub struct Instrumentation<'a, E: Engine + ?Sized> {
    engine: &'a E,
}

impl<'a, E: Engine + ?Sized> Instrumentation<'a, E> {
    pub fn new(engine: &'a E) -> Self {
        Self { engine }
    }

    /// (Re)install the probe. Mutations before this call are not seen.
    pub fn start(&self) -> EngineResult<()> {
        let _: bool = evaluate_json(self.engine, INSTALL_JS)?;
        debug!("probe installed");
        Ok(())
    }

    pub fn stop(&self) -> EngineResult<bool> {
        evaluate_json(self.engine, STOP_JS)
    }

    /// Read the probe, reinstalling it if the document was replaced.
    pub fn read(&self) -> EngineResult<ProbeState> {
        let state: ProbeState = evaluate_json(self.engine, READ_JS)?;
        if state.installed {
            return Ok(state);
        }
        debug!("probe missing, reinstalling");
        self.start()?;
        evaluate_json(self.engine, READ_JS)
    }

    pub fn overlays(&self) -> Vec<OverlayDescriptor> {
        self.read().map(|s| s.overlays).unwrap_or_default()
    }
}

impl<E: Engine + ?Sized> SignalSource for Instrumentation<'_, E> {
    fn sample(&self) -> EngineResult<Option<MutationSignal>> {
        Ok(self.read()?.signal)
    }
}
