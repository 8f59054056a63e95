//! `GET /status`: a hand-rolled, auto-refreshing HTML view of the hub's
//! current state. No templating crate — built the same way the source's
//! placeholder pages are, with `format!` and a literal style block.

use axum::extract::State;
use axum::response::Html;

use crate::state::AppState;

pub async fn status_handler(State(state): State<AppState>) -> Html<String> {
    let view = state.status_view().await;
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    let nodes_rows: String = if view.nodes.is_empty() {
        "<tr><td colspan=\"3\">no nodes connected</td></tr>".to_owned()
    } else {
        view.nodes
            .iter()
            .map(|node| {
                let label = node.label.as_deref().unwrap_or("(no label yet)");
                let reading = view
                    .snapshot
                    .get(&node.id)
                    .map(|frame| serde_json::to_string(frame).unwrap_or_default())
                    .unwrap_or_else(|| "(no reading yet)".to_owned());
                format!(
                    "<tr><td>{}</td><td>{}</td><td><code>{}</code></td></tr>",
                    escape(&node.remote_addr),
                    escape(label),
                    escape(&reading)
                )
            })
            .collect()
    };

    let clients_rows: String = if view.clients.is_empty() {
        "<li>no clients connected</li>".to_owned()
    } else {
        view.clients
            .iter()
            .map(|addr| format!("<li>{}</li>", escape(addr)))
            .collect()
    };

    let body = format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta http-equiv="refresh" content="2">
  <title>telemetry master — status</title>
  <style>
    body {{ font-family: monospace; background: #0f1117; color: #e1e4e8; padding: 2rem; }}
    table {{ border-collapse: collapse; width: 100%; }}
    td, th {{ border: 1px solid #30363d; padding: 0.4rem 0.6rem; text-align: left; }}
    h1 {{ color: #8b949e; }}
  </style>
</head>
<body>
  <h1>telemetry master</h1>
  <p>wall clock: {now}</p>
  <p>broadcast period: {broadcast_ms} ms &mdash; persist period: {persist_ms} ms</p>
  <p>database: {db_path}</p>
  <h2>nodes ({node_count})</h2>
  <table><tr><th>remote addr</th><th>label</th><th>last reading</th></tr>{nodes_rows}</table>
  <h2>clients ({client_count})</h2>
  <ul>{clients_rows}</ul>
</body>
</html>"#,
        now = now,
        broadcast_ms = state.config.broadcast_period_ms,
        persist_ms = state.config.persist_period_ms,
        db_path = state
            .config
            .db_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(in-memory)".to_owned()),
        node_count = view.nodes.len(),
        nodes_rows = nodes_rows,
        client_count = view.clients.len(),
        clients_rows = clients_rows,
    );

    Html(body)
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
