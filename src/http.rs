//! HTTP boundary: thin dispatcher from go-e style routes to the fleet.
//!
//! Routes, with and without a leading 1-based client id segment (a missing,
//! non-numeric or out-of-range id falls back to client 1):
//!
//! | Route                | Response                                       |
//! |----------------------|------------------------------------------------|
//! | `/{id}/status`       | go-e status object (forced refresh)            |
//! | `/{id}/register`     | raw register bank as a JSON array (cached)     |
//! | `/{id}/mqtt?payload=`| command endpoint, echoes `{success, payload}`  |
//! | anything else        | templated HTML page from the assets directory  |
//!
//! Template pages may contain `<?hdec token?>` processing instructions;
//! tokens come from a closed, enumerated set and are substituted from a
//! wallbox snapshot. Nothing is ever evaluated.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::extract::{Path as PathParam, Query, State};
use axum::response::Html;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::fleet::Fleet;
use crate::status::{render, GoeStatus, StatusSnapshot};
use crate::transport::Transport;

/// Compiled-in fallback page, used when the assets directory has no
/// `index.html`.
const DEFAULT_INDEX: &str = include_str!("../assets/index.html");

/// Shared state of all HTTP handlers.
pub struct AppState<T: Transport> {
    fleet: Arc<Fleet<T>>,
    assets_dir: PathBuf,
}

impl<T: Transport> Clone for AppState<T> {
    fn clone(&self) -> Self {
        Self {
            fleet: Arc::clone(&self.fleet),
            assets_dir: self.assets_dir.clone(),
        }
    }
}

/// Build the router serving `fleet`.
pub fn router<T>(fleet: Arc<Fleet<T>>, assets_dir: PathBuf) -> Router
where
    T: Transport + Send + 'static,
{
    let state = AppState { fleet, assets_dir };
    Router::new()
        .route("/status", get(status_default::<T>))
        .route("/{id}/status", get(status_by_id::<T>))
        .route("/register", get(registers_default::<T>))
        .route("/{id}/register", get(registers_by_id::<T>))
        .route("/mqtt", get(command_default::<T>))
        .route("/{id}/mqtt", get(command_by_id::<T>))
        .fallback(get(page::<T>))
        .with_state(state)
}

fn parse_client_id(raw: &str) -> usize {
    raw.parse().unwrap_or(1)
}

async fn status_default<T: Transport>(State(state): State<AppState<T>>) -> Json<GoeStatus> {
    status_for(&state, 1).await
}

async fn status_by_id<T: Transport>(
    State(state): State<AppState<T>>,
    PathParam(id): PathParam<String>,
) -> Json<GoeStatus> {
    status_for(&state, parse_client_id(&id)).await
}

async fn status_for<T: Transport>(state: &AppState<T>, client_id: usize) -> Json<GoeStatus> {
    let mut wallbox = state.fleet.adapter(client_id).lock().await;
    let snapshot = wallbox.snapshot().await;
    Json(render(&snapshot))
}

async fn registers_default<T: Transport>(State(state): State<AppState<T>>) -> Json<Vec<u16>> {
    registers_for(&state, 1).await
}

async fn registers_by_id<T: Transport>(
    State(state): State<AppState<T>>,
    PathParam(id): PathParam<String>,
) -> Json<Vec<u16>> {
    registers_for(&state, parse_client_id(&id)).await
}

async fn registers_for<T: Transport>(state: &AppState<T>, client_id: usize) -> Json<Vec<u16>> {
    // Served from whatever is currently cached; no forced refresh.
    let wallbox = state.fleet.adapter(client_id).lock().await;
    Json(wallbox.raw_registers().to_vec())
}

#[derive(Debug, Deserialize)]
struct CommandQuery {
    payload: Option<String>,
}

#[derive(Debug, Serialize)]
struct CommandReply {
    success: bool,
    payload: String,
}

async fn command_default<T: Transport>(
    State(state): State<AppState<T>>,
    Query(query): Query<CommandQuery>,
) -> Json<CommandReply> {
    command_for(&state, 1, query).await
}

async fn command_by_id<T: Transport>(
    State(state): State<AppState<T>>,
    PathParam(id): PathParam<String>,
    Query(query): Query<CommandQuery>,
) -> Json<CommandReply> {
    command_for(&state, parse_client_id(&id), query).await
}

async fn command_for<T: Transport>(
    state: &AppState<T>,
    client_id: usize,
    query: CommandQuery,
) -> Json<CommandReply> {
    let payload = query.payload.unwrap_or_default();
    let success = apply_command(state, client_id, &payload).await;
    debug!(client_id, payload = %payload, success, "command");
    Json(CommandReply { success, payload })
}

async fn apply_command<T: Transport>(
    state: &AppState<T>,
    client_id: usize,
    payload: &str,
) -> bool {
    let Some((key, value)) = payload.split_once('=') else {
        return false;
    };
    match key {
        "amp" | "amx" => match value.parse::<u16>() {
            Ok(amps) => {
                let mut wallbox = state.fleet.adapter(client_id).lock().await;
                wallbox.set_current_preset_amps(amps).await;
                true
            }
            Err(_) => false,
        },
        // Observed go-e contract: the literal value "0" allows charging.
        "alw" => {
            let mut wallbox = state.fleet.adapter(client_id).lock().await;
            wallbox.set_allowed(value == "0");
            true
        }
        _ => false,
    }
}

// ============================================================================
// Templated pages
// ============================================================================

async fn page<T: Transport>(
    State(state): State<AppState<T>>,
    uri: axum::http::Uri,
) -> Html<String> {
    let (client_id, file) = split_client_id(uri.path());
    let source = load_page(&state.assets_dir, file).await;
    let mut wallbox = state.fleet.adapter(client_id).lock().await;
    let snapshot = wallbox.snapshot().await;
    drop(wallbox);
    Html(render_template(&source, &snapshot))
}

/// Split an optional leading numeric segment off the request path:
/// `/2/info.html` → `(2, "info.html")`, `/info.html` → `(1, "info.html")`.
fn split_client_id(path: &str) -> (usize, &str) {
    let trimmed = path.trim_start_matches('/');
    match trimmed.split_once('/') {
        Some((first, rest)) if first.chars().all(|c| c.is_ascii_digit()) && !first.is_empty() => {
            (parse_client_id(first), rest)
        }
        _ => (1, trimmed),
    }
}

/// Load a page from the assets directory, falling back to `index.html` and
/// finally to the compiled-in default. Only plain file names below the
/// assets directory are accepted.
async fn load_page(assets_dir: &Path, file: &str) -> String {
    let requested = Path::new(file);
    let safe = !file.is_empty()
        && requested
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if safe {
        if let Ok(body) = tokio::fs::read_to_string(assets_dir.join(requested)).await {
            return body;
        }
    }
    match tokio::fs::read_to_string(assets_dir.join("index.html")).await {
        Ok(body) => body,
        Err(_) => DEFAULT_INDEX.to_string(),
    }
}

/// Substitute `<?hdec token?>` processing instructions. Unknown tokens render
/// as an HTML comment so a typo is visible in the page source.
fn render_template(source: &str, snapshot: &StatusSnapshot) -> String {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    while let Some(start) = rest.find("<?hdec") {
        out.push_str(&rest[..start]);
        let tail = &rest[start + "<?hdec".len()..];
        match tail.find("?>") {
            Some(end) => {
                let token = tail[..end].trim();
                match template_value(snapshot, token) {
                    Some(value) => out.push_str(&value),
                    None => out.push_str("<!-- unknown token -->"),
                }
                rest = &tail[end + 2..];
            }
            None => {
                // Unterminated instruction; emit verbatim.
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// The closed set of template tokens.
fn template_value(snapshot: &StatusSnapshot, token: &str) -> Option<String> {
    let value = match token {
        "client_id" => snapshot.client_id.to_string(),
        "state" => snapshot.state_raw.to_string(),
        "temperature" => format!("{:.1}", snapshot.temperature_celsius),
        "power_kw" => format!("{:.3}", snapshot.power_kw),
        "session_energy_kwh" => format!("{:.3}", snapshot.session_energy_kwh),
        "total_energy_kwh" => format!("{:.3}", snapshot.total_energy_kwh),
        "preset_amps" => format!("{}", snapshot.preset_amps as i64),
        "voltage_l1" => snapshot.voltages[0].to_string(),
        "voltage_l2" => snapshot.voltages[1].to_string(),
        "voltage_l3" => snapshot.voltages[2].to_string(),
        "current_l1" => format!("{:.1}", f64::from(snapshot.currents_raw[0]) / 10.0),
        "current_l2" => format!("{:.1}", f64::from(snapshot.currents_raw[1]) / 10.0),
        "current_l3" => format!("{:.1}", f64::from(snapshot.currents_raw[2]) / 10.0),
        "hw_min_current" => snapshot.hw_min_current.to_string(),
        "hw_max_current" => snapshot.hw_max_current.to_string(),
        "locked" => snapshot.locked.to_string(),
        "allowed" => snapshot.allowed.to_string(),
        "layout_version" => format!("{:#x}", snapshot.layout_version),
        "logistic" => snapshot.logistic.trim_end_matches('\0').to_string(),
        _ => return None,
    };
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::DEFAULT_RETRY_COOLDOWN;
    use crate::registers::REG_CURRENT_PRESET;
    use crate::testutil::FakeTransport;
    use crate::wallbox::{WallboxAdapter, DEFAULT_CACHE_TTL};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn fleet(count: u8) -> Arc<Fleet<FakeTransport>> {
        Arc::new(Fleet::new(
            (1..=count)
                .map(|id| {
                    WallboxAdapter::new(
                        FakeTransport::wallbox(u16::from(id), 0x108),
                        id,
                        DEFAULT_CACHE_TTL,
                        DEFAULT_RETRY_COOLDOWN,
                    )
                })
                .collect(),
        ))
    }

    fn app(fleet: Arc<Fleet<FakeTransport>>) -> Router {
        router(fleet, PathBuf::from("assets"))
    }

    async fn get_json(app: Router, uri: &str) -> serde_json::Value {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&body).expect("json")
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_route() {
        let value = get_json(app(fleet(1)), "/status").await;
        assert_eq!(value["car"], "2");
        assert_eq!(value["amp"], "16");
        assert_eq!(value["hdec_mbusid"], "1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_route_with_id() {
        let value = get_json(app(fleet(2)), "/2/status").await;
        assert_eq!(value["hdec_mbusid"], "2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_range_id_falls_back_to_first() {
        let value = get_json(app(fleet(2)), "/99/status").await;
        assert_eq!(value["hdec_mbusid"], "1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_route_serves_cached_bank() {
        let value = get_json(app(fleet(1)), "/register").await;
        let bank = value.as_array().expect("array");
        assert_eq!(bank.len(), 820);
        // No refresh happened, so the bank is still zero-initialised.
        assert_eq!(bank[5], 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_amp_writes_preset() {
        let fleet = fleet(1);
        let app_instance = app(Arc::clone(&fleet));
        // First status poll establishes the link and probes the hw range.
        let _ = get_json(app_instance.clone(), "/status").await;

        let value = get_json(app_instance, "/mqtt?payload=amp=10").await;
        assert_eq!(value["success"], true);
        assert_eq!(value["payload"], "amp=10");

        let wallbox = fleet.adapter(1).lock().await;
        assert!(wallbox.session().writes.contains(&(REG_CURRENT_PRESET, 100)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_alw_mapping_is_inverted() {
        let fleet = fleet(1);
        let app_instance = app(Arc::clone(&fleet));

        let value = get_json(app_instance.clone(), "/mqtt?payload=alw=0").await;
        assert_eq!(value["success"], true);
        assert!(fleet.adapter(1).lock().await.is_allowed());

        let value = get_json(app_instance, "/mqtt?payload=alw=1").await;
        assert_eq!(value["success"], true);
        assert!(!fleet.adapter(1).lock().await.is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_rejects_garbage() {
        let fleet = fleet(1);
        let app_instance = app(Arc::clone(&fleet));

        let value = get_json(app_instance.clone(), "/mqtt?payload=amp=lots").await;
        assert_eq!(value["success"], false);
        let value = get_json(app_instance.clone(), "/mqtt?payload=nonsense").await;
        assert_eq!(value["success"], false);
        let value = get_json(app_instance, "/mqtt").await;
        assert_eq!(value["success"], false);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_serves_rendered_template() {
        let response = app(fleet(1))
            .oneshot(
                Request::builder()
                    .uri("/some/unknown/page")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let text = String::from_utf8(body.to_vec()).expect("utf-8");
        assert!(text.contains("Wallbox 1"));
        assert!(!text.contains("<?hdec"));
    }

    #[test]
    fn test_split_client_id() {
        assert_eq!(split_client_id("/2/info.html"), (2, "info.html"));
        assert_eq!(split_client_id("/info.html"), (1, "info.html"));
        assert_eq!(split_client_id("/"), (1, ""));
        assert_eq!(split_client_id("/abc/info.html"), (1, "abc/info.html"));
    }

    #[test]
    fn test_template_substitution_is_closed() {
        let snapshot = StatusSnapshot {
            client_id: 3,
            layout_version: 0x108,
            state_raw: 7,
            allowed: true,
            locked: false,
            preset_amps: 16.0,
            temperature_celsius: 25.3,
            session_energy_kwh: 0.5,
            total_energy_kwh: 85.536,
            power_kw: 0.69,
            voltages: [230, 230, 0],
            currents_raw: [10, 10, 0],
            hw_min_current: 6,
            hw_max_current: 16,
            logistic: "HDEC\0\0".to_string(),
        };
        let out = render_template(
            "id=<?hdec client_id?> t=<?hdec temperature?> x=<?hdec eval_me()?>",
            &snapshot,
        );
        assert_eq!(out, "id=3 t=25.3 x=<!-- unknown token -->");

        // Unterminated instructions pass through verbatim.
        assert_eq!(render_template("a <?hdec state", &snapshot), "a <?hdec state");
    }
}
