//! Web UI - the single dashboard page
//!
//! Pico CSS (classless) for layout; the page draws everything from
//! `/api/view` and redraws whenever an event arrives on `/api/events`.

use axum::{
    extract::State,
    response::{Html, IntoResponse},
};

use crate::api::AppState;

/// HTML document wrapper with Pico CSS
fn html_doc(title: &str, content: &str, script: &str) -> String {
    let version = env!("PFD_VERSION");
    format!(
        r##"<!DOCTYPE html>
<html lang="en" data-theme="dark">
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>{title} - Print Farm Dashboard</title>
    <link rel="stylesheet" href="https://cdn.jsdelivr.net/npm/@picocss/pico@2/css/pico.min.css">
    <style>
        :root {{ --pico-font-size: 15px; }}
        small {{ color: var(--pico-muted-color); }}
        .summary {{ display: flex; gap: 1.5rem; flex-wrap: wrap; }}
        .filters {{ display: flex; gap: 1rem; align-items: end; }}
        .filters select {{ margin: 0; }}
        .printer-grid {{ display: grid; grid-template-columns: repeat(auto-fill, minmax(320px, 1fr)); gap: 1rem; }}
        .printer-card header {{ display: flex; justify-content: space-between; align-items: center; }}
        .badge {{ padding: 0.1rem 0.5rem; border-radius: 0.5rem; font-size: 0.8rem; }}
        .status-offline {{ background: #444; }}
        .status-printing {{ background: #1f6f3f; }}
        .status-paused {{ background: #8a6d1a; }}
        .status-error {{ background: #8a1f1f; }}
        .status-online {{ background: #1f4f8a; }}
        .controls {{ display: flex; flex-wrap: wrap; gap: 0.5rem; margin-top: 0.5rem; }}
        .controls button {{ margin: 0; padding: 0.4rem 0.8rem; }}
        .thumb {{ width: 64px; height: 64px; object-fit: contain; cursor: pointer; float: right; }}
        .jog-grid {{ display: grid; grid-template-columns: repeat(4, auto); gap: 0.5rem; }}
        .jog-grid button {{ margin: 0; }}
        .distance button.active {{ background: var(--pico-primary-background); color: var(--pico-primary-inverse); }}
        #toasts {{ position: fixed; right: 1rem; bottom: 1rem; display: flex; flex-direction: column; gap: 0.5rem; z-index: 1000; }}
        .toast {{ padding: 0.5rem 1rem; border-radius: 0.5rem; cursor: pointer; }}
        .toast-info {{ background: #1f4f8a; }}
        .toast-success {{ background: #1f6f3f; }}
        .toast-warning {{ background: #8a6d1a; }}
        .toast-error {{ background: #8a1f1f; }}
        .danger {{ background: var(--pico-del-color); border-color: var(--pico-del-color); }}
    </style>
</head>
<body>
    <header class="container">
        <nav>
            <ul><li><strong>Print Farm</strong></li></ul>
            <ul>
                <li><a href="#" data-tab="printers" onclick="selectTab('printers');return false;">Printers</a></li>
                <li><a href="#" data-tab="files" onclick="selectTab('files');return false;">Files</a></li>
            </ul>
        </nav>
    </header>
    <main class="container">
        {content}
    </main>
    <footer class="container">
        <small>Print Farm Dashboard v{version}</small>
    </footer>
    <div id="toasts"></div>
    <script>
{script}
    </script>
</body>
</html>"##
    )
}

const DASHBOARD_CONTENT: &str = r#"
<section id="tab-printers">
    <div class="summary" id="summary"></div>
    <div class="filters">
        <label>Status
            <select id="filter-status" onchange="applyFilters()">
                <option value="all">All</option>
                <option value="printing">Printing</option>
                <option value="paused">Paused</option>
                <option value="idle">Idle</option>
                <option value="offline">Offline</option>
            </select>
        </label>
        <label>Type
            <select id="filter-type" onchange="applyFilters()"><option value="all">All</option></select>
        </label>
        <button class="secondary" onclick="refreshNow()">Refresh</button>
    </div>
    <div id="printers" class="printer-grid" aria-busy="true"></div>
</section>
<section id="tab-files" hidden>
    <div class="controls">
        <button onclick="post('/api/files/upload/open')">Upload G-code</button>
        <button class="secondary" onclick="loadFiles()">Reload</button>
    </div>
    <table>
        <thead><tr><th>File</th><th>Size</th><th>Send to</th><th></th></tr></thead>
        <tbody id="files"></tbody>
    </table>
</section>
<dialog id="modal"><article id="modal-body"></article></dialog>
"#;

const DASHBOARD_SCRIPT: &str = r#"
let view = null;
let files = [];
let shownModal = '';
let toastTimer = null;

const esc = (s) => String(s ?? '').replace(/[&<>"']/g, c => ({'&':'&amp;','<':'&lt;','>':'&gt;','"':'&quot;',"'":'&#39;'}[c]));
const enc = encodeURIComponent;

async function post(url, body, method) {
    const opts = { method: method || 'POST', headers: {} };
    if (body !== undefined) {
        if (body instanceof Blob) {
            opts.body = body;
        } else {
            opts.headers['Content-Type'] = 'application/json';
            opts.body = JSON.stringify(body);
        }
    }
    try {
        const res = await fetch(url, opts);
        return await res.json().catch(() => ({}));
    } catch (e) {
        return { success: false, error: String(e) };
    } finally {
        loadView();
    }
}

async function loadView() {
    try {
        view = await (await fetch('/api/view')).json();
        render();
    } catch (e) {
        document.getElementById('printers').innerHTML = `<p class="status-err">${esc(e)}</p>`;
    }
}

function render() {
    const grid = document.getElementById('printers');
    grid.removeAttribute('aria-busy');
    const s = view.summary;
    document.getElementById('summary').innerHTML =
        `<span>Total <strong>${s.total}</strong></span><span>Printing <strong>${s.printing}</strong></span>` +
        `<span>Idle <strong>${s.idle}</strong></span><span>Offline <strong>${s.offline}</strong></span>`;

    const typeSel = document.getElementById('filter-type');
    typeSel.innerHTML = '<option value="all">All</option>' +
        view.printer_types.map(t => `<option value="${esc(t)}">${esc(t)}</option>`).join('');
    typeSel.value = view.filters.type;
    document.getElementById('filter-status').value = view.filters.status;

    if (view.phase === 'loading') {
        grid.setAttribute('aria-busy', 'true');
        grid.innerHTML = '';
    } else if (view.phase === 'error') {
        grid.innerHTML = `<article><p class="status-err">${esc(view.message)}</p><button onclick="refreshNow()">Retry</button></article>`;
    } else if (view.phase === 'empty') {
        grid.innerHTML = '<article><p>No printers configured.</p></article>';
    } else {
        grid.innerHTML = view.cards.map(card).join('') || '<p><small>No printers match the filters.</small></p>';
    }

    renderToasts();
    renderModal();
    showTab(view.active_tab || 'printers');
}

function temp(label, t) {
    return t ? `<span>${label} ${esc(t.actual)}° / ${esc(t.target)}°</span> ` : '';
}

function card(c) {
    const n = enc(c.name);
    const b = c.buttons;
    const btn = (cond, label, action, cls) =>
        cond ? `<button class="${cls || ''}" onclick='act("${n}", ${JSON.stringify(action)})'>${label}</button>` : '';
    const thumb = c.thumbnail_file
        ? `<img class="thumb" alt="" src="/api/printers/${n}/thumbnail?file=${enc(c.thumbnail_file)}" onclick='post("/api/printers/${n}/thumbnail/open?file=${enc(c.thumbnail_file)}")'>`
        : '';
    const chambers = c.chambers.map(ch =>
        `<span>${esc(ch.name)} ${esc(ch.actual)}°${ch.target ? ' / ' + esc(ch.target) + '°' : ''}</span> `).join('');
    const pos = c.position ? `<small>X ${esc(c.position.x)} Y ${esc(c.position.y)} Z ${esc(c.position.z)}</small>` : '';
    return `<article class="printer-card">
        <header><strong>${esc(c.name)}</strong><span class="badge ${esc('status-' + c.badge)}">${esc(c.status_text)}</span></header>
        ${thumb}
        <small>${esc(c.printer_type)}</small>
        <p>${esc(c.progress.file_label)}</p>
        <progress value="${c.progress.percent}" max="100"></progress>
        <small>${esc(c.progress.label)}</small>
        <p>${temp('Hotend', c.extruder)}${temp('Bed', c.bed)}${chambers}</p>
        <p><small>Elapsed ${esc(c.print_time)} · Remaining ${esc(c.remaining_time)}</small></p>
        ${pos}
        ${c.message ? `<p><small>${esc(c.message)}</small></p>` : ''}
        <div class="controls">
            ${btn(b.pause, 'Pause', {action: 'pause'})}
            ${btn(b.resume, 'Resume', {action: 'resume'})}
            ${btn(b.cancel, 'Cancel', {action: 'cancel'}, 'danger')}
            ${btn(b.reprint, 'Reprint', {action: 'reprint'})}
            ${b.movement ? `<button class="secondary" onclick='post("/api/printers/${n}/movement")'>Move</button>` : ''}
            ${c.has_status ? `<button class="secondary" onclick='post("/api/printers/${n}/temperature/open")'>Temp</button>` : ''}
            ${c.camera_available ? `<button class="secondary" onclick='openCamera("${n}")'>Camera</button>` : ''}
        </div>
        ${c.updated ? `<footer><small>Updated ${esc(c.updated)}</small></footer>` : ''}
    </article>`;
}

function act(name, action) {
    return post(`/api/printers/${name}/actions`, action);
}

function openCamera(name) {
    return post(`/api/printers/${name}/camera`, { page_url: window.location.href });
}

function renderToasts() {
    clearTimeout(toastTimer);
    // toasts expire server side without an event
    if (view.toasts.length) toastTimer = setTimeout(loadView, 1000);
    document.getElementById('toasts').innerHTML = view.toasts.map(t =>
        `<div class="toast toast-${esc(t.kind)}" onclick="post('/api/notifications/${t.id}', undefined, 'DELETE')">${esc(t.message)}</div>`
    ).join('');
}

function modalHeader(title, kind) {
    return `<header><button aria-label="Close" rel="prev" onclick="closeModal('${kind}', 'button')"></button><strong>${esc(title)}</strong></header>`;
}

function renderModal() {
    const dialog = document.getElementById('modal');
    const body = document.getElementById('modal-body');
    const m = view.modals[view.modals.length - 1];
    const key = JSON.stringify(m || null);
    if (key === shownModal) return;
    shownModal = key;
    if (!m) {
        if (dialog.open) dialog.close();
        return;
    }
    const c = m.content;
    const err = m.error ? `<p class="status-err">${esc(m.error)}</p>` : '';
    const busy = m.loading ? '<p aria-busy="true"></p>' : '';
    let html = '';
    switch (c.kind) {
        case 'confirm':
            html = modalHeader(c.title, 'confirm') + `<p>${esc(c.message)}</p>` +
                `<footer><button class="secondary" onclick="closeModal('confirm', 'button')">Back</button>` +
                `<button class="${c.danger ? 'danger' : ''}" onclick="post('/api/confirm')">${esc(c.confirm_label)}</button></footer>`;
            break;
        case 'camera':
            html = modalHeader(`${c.printer} camera`, 'camera') + busy + err +
                (c.snapshot_url ? `<img alt="snapshot" src="${esc(c.snapshot_url)}">` : '');
            break;
        case 'movement': {
            const d = [0.1, 1, 10, 100].map(v =>
                `<button class="${v === c.distance ? 'active' : 'secondary'}" onclick="post('/api/movement/distance', {distance: ${v}})">${v}</button>`).join('');
            const jog = ['X', 'Y', 'Z'].map(a =>
                `<button onclick="post('/api/movement/jog', {axis: '${a}', direction: -1})">${a}-</button>` +
                `<button onclick="post('/api/movement/jog', {axis: '${a}', direction: 1})">${a}+</button>` +
                `<button class="secondary" onclick="post('/api/movement/home', {axis: '${a}'})">Home ${a}</button><span></span>`).join('');
            html = modalHeader(`Move ${c.printer}`, 'movement') + `<div class="distance controls">${d}</div>` +
                `<div class="jog-grid">${jog}</div>` +
                `<button onclick="post('/api/movement/home', {})">Home all</button>`;
            break;
        }
        case 'upload':
            html = modalHeader('Upload G-code', 'upload') + busy + err +
                '<input type="file" id="upload-file" accept=".gcode,.gco,.gc">' +
                '<button onclick="uploadFile()">Upload</button>';
            break;
        case 'thumbnail':
            html = modalHeader(c.file, 'thumbnail') + busy +
                (c.blob !== null ? `<img alt="" src="/api/blobs/${c.blob}">` : '');
            break;
        case 'temperature': {
            const rows = Object.keys(c.presets).sort().map(h =>
                `<p><strong>${esc(h)}</strong> ` + c.presets[h].map(v =>
                    `<button class="secondary" onclick="setTemp('${enc(c.printer)}', '${esc(h)}', ${v})">${v}°</button>`).join(' ') + '</p>').join('');
            html = modalHeader(`Temperatures on ${c.printer}`, 'temperature') + rows;
            break;
        }
    }
    body.innerHTML = html;
    if (!dialog.open) dialog.showModal();
}

function closeModal(kind, reason) {
    return post(`/api/modals/${kind}/close`, { reason });
}

function setTemp(name, heater, temperature) {
    return post(`/api/printers/${name}/temperature`, { heater, temperature });
}

async function uploadFile() {
    const input = document.getElementById('upload-file');
    if (!input.files.length) return;
    const file = input.files[0];
    await post(`/api/files?name=${enc(file.name)}`, file);
    loadFiles();
}

async function loadFiles() {
    try {
        const res = await fetch('/api/files');
        files = res.ok ? await res.json() : [];
    } catch (e) {
        files = [];
    }
    const printers = view ? view.cards.map(c => c.name) : [];
    const opts = printers.map(p => `<option value="${esc(p)}">${esc(p)}</option>`).join('');
    document.getElementById('files').innerHTML = files.map((f, i) =>
        `<tr><td>${esc(f.name)}</td><td>${(f.size / 1024).toFixed(1)} KB</td>` +
        `<td><select id="send-${i}">${opts}</select></td>` +
        `<td><button onclick="sendFile(${i})">Print</button> ` +
        `<button class="secondary" onclick="deleteFile(${i})">Delete</button></td></tr>`).join('');
}

async function sendFile(i) {
    const printer = document.getElementById(`send-${i}`).value;
    await post('/api/files/send', { printer, file: files[i].name, start: true });
}

async function deleteFile(i) {
    if (!confirm(`Delete ${files[i].name}?`)) return;
    await post(`/api/files/${enc(files[i].name)}`, undefined, 'DELETE');
    loadFiles();
}

function applyFilters() {
    post('/api/filters', {
        status: document.getElementById('filter-status').value,
        type: document.getElementById('filter-type').value,
    });
}

function refreshNow() {
    post('/api/refresh');
}

function showTab(tab) {
    ['printers', 'files'].forEach(t => {
        document.getElementById(`tab-${t}`).hidden = t !== tab;
        const link = document.querySelector(`nav a[data-tab="${t}"]`);
        if (t === tab) link.setAttribute('aria-current', 'page'); else link.removeAttribute('aria-current');
    });
}

function selectTab(tab) {
    showTab(tab);
    if (tab === 'files') loadFiles();
    post('/api/preferences', { active_tab: tab });
}

document.addEventListener('keydown', (e) => {
    if (e.key === 'Escape') {
        e.preventDefault();
        post('/api/modals/escape');
    }
});

document.getElementById('modal').addEventListener('click', (e) => {
    const m = view && view.modals[view.modals.length - 1];
    if (e.target.id === 'modal' && m) closeModal(m.content.kind, 'backdrop');
});

document.addEventListener('visibilitychange', () => {
    post('/api/visibility', { visible: !document.hidden });
});

const events = new EventSource('/api/events');
events.onmessage = () => loadView();

loadView();
"#;

/// GET / - Printer dashboard
pub async fn dashboard_page(State(_state): State<AppState>) -> impl IntoResponse {
    Html(html_doc("Dashboard", DASHBOARD_CONTENT, DASHBOARD_SCRIPT))
}
