//! Embedded static assets for the browser client.
//!
//! The page is intentionally small: it opens the SSE stream, renders the
//! event feed, and plays alert audio plus the pre-generated cloud cues.
//! Anything fancier belongs in a real frontend served elsewhere.

pub const INDEX_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>radar</title>
<meta name="viewport" content="width=device-width, initial-scale=1">
<style>
  body { font: 14px/1.4 ui-monospace, monospace; background: #0b0e11; color: #d7dde4; margin: 0; }
  header { display: flex; align-items: center; gap: 1rem; padding: .75rem 1rem; border-bottom: 1px solid #222a33; }
  header h1 { font-size: 1rem; margin: 0; }
  #cloud { color: #8aa0b4; }
  #cloud.up { color: #4cc38a; }
  #cloud.down { color: #e5484d; }
  button { background: #1a232e; color: inherit; border: 1px solid #2c3947; border-radius: 4px; padding: .35rem .8rem; cursor: pointer; }
  #events { list-style: none; margin: 0; padding: .5rem 1rem; }
  #events li { padding: .15rem 0; border-bottom: 1px solid #151b22; }
  #events li.up { color: #4cc38a; }
  #events li.down { color: #e5484d; }
  .t { color: #5b6b7b; margin-right: .5rem; }
</style>
</head>
<body>
<header>
  <h1>market radar</h1>
  <button id="enable">Enable Audio</button>
  <span id="cloud">cloud: waiting…</span>
</header>
<ul id="events"></ul>
<script src="/app.js"></script>
</body>
</html>
"#;

pub const APP_JS: &str = r#"'use strict';

const list = document.getElementById('events');
const cloudEl = document.getElementById('cloud');
let audioEnabled = false;
let cues = {};

document.getElementById('enable').addEventListener('click', () => {
  audioEnabled = true;
  document.getElementById('enable').textContent = 'Audio On';
});

fetch('/api/cues')
  .then((r) => r.json())
  .then((j) => { cues = j.cues || {}; })
  .catch(() => {});

function play(url) {
  if (!audioEnabled || !url) return;
  new Audio(url).play().catch(() => {});
}

function cueFor(dir, strength) {
  const strong = strength >= 0.75;
  if (dir === 'up') return strong ? cues.upStrong : cues.up;
  if (dir === 'down') return strong ? cues.downStrong : cues.down;
  return cues.flat;
}

function renderCloud(ev) {
  cloudEl.textContent = ev.message || 'cloud';
  cloudEl.className = ev.direction || '';
}

function renderAlert(ev) {
  const li = document.createElement('li');
  li.className = ev.direction || '';
  const t = document.createElement('span');
  t.className = 't';
  t.textContent = new Date(ev.time).toLocaleTimeString();
  li.appendChild(t);
  li.appendChild(document.createTextNode(ev.message || ev.type));
  list.prepend(li);
  while (list.children.length > 200) list.removeChild(list.lastChild);
  play(ev.audio_url);
}

let lastCueAt = 0;
function onCloud(ev) {
  renderCloud(ev);
  // audible cue, throttled by the suggested rate
  const rate = ev.rate_hz || 0;
  if (rate <= 0) return;
  const now = Date.now();
  if (now - lastCueAt >= 1000 / rate) {
    lastCueAt = now;
    play(cueFor(ev.direction, ev.strength || 0));
  }
}

const es = new EventSource('/events');
es.onmessage = (m) => {
  let ev;
  try { ev = JSON.parse(m.data); } catch { return; }
  if (ev.type === 'cloud') onCloud(ev);
  else if (ev.type === 'cloud_pulse') { /* pulses drive nothing in the minimal UI */ }
  else renderAlert(ev);
};
"#;
