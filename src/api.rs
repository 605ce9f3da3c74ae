use std::io::Read;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, UdpSocket};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use mdns_sd::{ServiceDaemon, ServiceInfo};
use serde::{Deserialize, Serialize};
use tiny_http::{Header, Method, Response, Server, StatusCode};

use crate::countdown::model::{Countdown, parse_instant};
use crate::countdown::remaining::{TimeRemaining, compute};
use crate::store::{ChangeSignal, CountdownStore, StoreError};

pub const DISCOVERY_PROBE_TOKEN: &str = "TICKDOWN_DISCOVER_V1";
pub const MDNS_SERVICE_TYPE: &str = "_tickdown._tcp.local.";

#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    pub bind_addr: String,
    pub port: u16,
    pub discovery_enabled: bool,
    pub discovery_udp_port: u16,
    pub mdns_enabled: bool,
    pub mdns_instance: String,
}

#[derive(Debug)]
struct ApiStats {
    server_started_unix_ms: i64,
    total_requests: AtomicU64,
}

/// Local HTTP face of the countdown store. Plays the role a hosted backend
/// would: remote clients list, create, and delete entries here and poll the
/// revision to learn that something changed.
pub struct ApiServer {
    stop: Arc<AtomicBool>,
    http_join: Option<JoinHandle<()>>,
    discovery_join: Option<JoinHandle<()>>,
    mdns: Option<ServiceDaemon>,
}

impl ApiServer {
    pub fn start(
        config: ApiServerConfig,
        store: Arc<Mutex<CountdownStore>>,
        signal: Arc<ChangeSignal>,
    ) -> Result<Self> {
        let bind = format!("{}:{}", config.bind_addr, config.port);
        let server = Server::http(&bind)
            .map_err(|err| anyhow::anyhow!("failed to start API server on {bind}: {err}"))?;
        let stats = Arc::new(ApiStats {
            server_started_unix_ms: Utc::now().timestamp_millis(),
            total_requests: AtomicU64::new(0),
        });
        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_thread = Arc::clone(&stop);
        let http_join =
            thread::spawn(move || run_server_loop(server, store, signal, stats, stop_for_thread));

        let discovery_join = if config.discovery_enabled {
            let discovery_bind = format!("{}:{}", config.bind_addr, config.discovery_udp_port);
            let discovery_socket = UdpSocket::bind(&discovery_bind).map_err(|err| {
                anyhow::anyhow!("failed to start discovery UDP responder on {discovery_bind}: {err}")
            })?;
            let _ = discovery_socket.set_read_timeout(Some(Duration::from_millis(200)));
            let stop_for_discovery = Arc::clone(&stop);
            Some(thread::spawn(move || {
                run_discovery_loop(discovery_socket, config.port, stop_for_discovery)
            }))
        } else {
            None
        };

        let mdns = if config.mdns_enabled {
            match start_mdns_advertisement(config.port, &config.mdns_instance) {
                Ok(daemon) => Some(daemon),
                Err(err) => {
                    log::warn!("mDNS advertisement disabled: {err}");
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            stop,
            http_join: Some(http_join),
            discovery_join,
            mdns,
        })
    }
}

impl Drop for ApiServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.http_join.take() {
            let _ = join.join();
        }
        if let Some(join) = self.discovery_join.take() {
            let _ = join.join();
        }
        if let Some(mdns) = self.mdns.take() {
            let _ = mdns.shutdown();
        }
    }
}

fn run_server_loop(
    server: Server,
    store: Arc<Mutex<CountdownStore>>,
    signal: Arc<ChangeSignal>,
    stats: Arc<ApiStats>,
    stop: Arc<AtomicBool>,
) {
    while !stop.load(Ordering::Relaxed) {
        match server.recv_timeout(Duration::from_millis(200)) {
            Ok(Some(request)) => handle_request(request, &store, &signal, &stats),
            Ok(None) => continue,
            Err(_) => continue,
        }
    }
}

fn run_discovery_loop(socket: UdpSocket, api_port: u16, stop: Arc<AtomicBool>) {
    let mut buffer = [0_u8; 512];
    while !stop.load(Ordering::Relaxed) {
        match socket.recv_from(&mut buffer) {
            Ok((len, source)) => {
                if !is_local_network_ip(source.ip()) {
                    continue;
                }
                let probe = std::str::from_utf8(&buffer[..len]).unwrap_or_default();
                if !is_discovery_probe(probe) {
                    continue;
                }
                let payload = build_discovery_payload(api_port);
                let _ = socket.send_to(payload.as_bytes(), source);
            }
            Err(err)
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(_) => continue,
        }
    }
}

fn is_discovery_probe(raw: &str) -> bool {
    raw.trim() == DISCOVERY_PROBE_TOKEN
}

fn build_discovery_payload(api_port: u16) -> String {
    #[derive(Serialize)]
    struct DiscoveryResponse {
        service: &'static str,
        version: u8,
        api_port: u16,
        server_time_unix_ms: i64,
    }

    let payload = DiscoveryResponse {
        service: "tickdown",
        version: 1,
        api_port,
        server_time_unix_ms: Utc::now().timestamp_millis(),
    };
    serde_json::to_string(&payload).unwrap_or_else(|_| {
        format!(
            "{{\"service\":\"tickdown\",\"version\":1,\"api_port\":{},\"server_time_unix_ms\":{}}}",
            api_port,
            Utc::now().timestamp_millis()
        )
    })
}

fn start_mdns_advertisement(api_port: u16, instance_prefix: &str) -> Result<ServiceDaemon> {
    let daemon = ServiceDaemon::new()
        .map_err(|err| anyhow::anyhow!("could not create mDNS daemon: {err}"))?;

    let hostname = detect_hostname();
    let instance = if instance_prefix.trim().is_empty() {
        hostname.clone()
    } else {
        format!("{}-{}", instance_prefix.trim(), hostname)
    };
    let host_name = format!("{hostname}.local.");
    let mut addresses = detect_mdns_addresses();
    if addresses.is_empty() {
        addresses.push(Ipv4Addr::LOCALHOST.into());
    }

    let service = ServiceInfo::new(
        MDNS_SERVICE_TYPE,
        &instance,
        &host_name,
        addresses.as_slice(),
        api_port,
        None,
    )
    .map_err(|err| anyhow::anyhow!("could not create mDNS service info: {err}"))?;
    daemon
        .register(service)
        .map_err(|err| anyhow::anyhow!("could not register mDNS service: {err}"))?;
    Ok(daemon)
}

fn detect_hostname() -> String {
    let candidate = std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::env::var("COMPUTERNAME").ok())
        .unwrap_or_else(|| "tickdown".to_string());
    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        "tickdown".to_string()
    } else {
        trimmed
            .chars()
            .map(|ch| {
                if ch.is_ascii_alphanumeric() || ch == '-' {
                    ch.to_ascii_lowercase()
                } else {
                    '-'
                }
            })
            .collect::<String>()
    }
}

fn detect_mdns_addresses() -> Vec<IpAddr> {
    let mut addresses = Vec::<IpAddr>::new();
    if let Ok(socket) = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        && socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).is_ok()
        && let Ok(local) = socket.local_addr()
    {
        let ip = local.ip();
        if ip.is_ipv4() && !ip.is_loopback() {
            addresses.push(ip);
        }
    }
    addresses.sort();
    addresses.dedup();
    addresses
}

/// List/response view of a countdown with its remaining time computed at
/// response time.
#[derive(Debug, Clone, Serialize)]
struct CountdownView {
    id: String,
    title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    target_instant: DateTime<Utc>,
    created_instant: DateTime<Utc>,
    remaining: TimeRemaining,
    display: String,
}

impl CountdownView {
    fn from_countdown(countdown: &Countdown, now: DateTime<Utc>) -> Self {
        let remaining = compute(countdown.target_utc, now);
        Self {
            id: countdown.id.clone(),
            title: countdown.title.clone(),
            description: countdown.description.clone(),
            target_instant: countdown.target_utc,
            created_instant: countdown.created_utc,
            display: remaining.display(),
            remaining,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateCountdownBody {
    title: String,
    target_instant: String,
    #[serde(default)]
    description: Option<String>,
}

fn handle_request(
    mut request: tiny_http::Request,
    store: &Arc<Mutex<CountdownStore>>,
    signal: &Arc<ChangeSignal>,
    stats: &Arc<ApiStats>,
) {
    let Some(remote_addr) = request.remote_addr() else {
        let _ = send_text(request, StatusCode(400), "missing remote address");
        return;
    };
    if !is_local_network_ip(remote_addr.ip()) {
        let _ = send_text(request, StatusCode(403), "forbidden: local network only");
        return;
    }
    stats.total_requests.fetch_add(1, Ordering::Relaxed);

    let url = request.url().to_string();
    let (path, _query) = split_path_query(&url);
    let method = request.method().clone();

    match (&method, path) {
        (Method::Get, "/v1") => {
            #[derive(Serialize)]
            struct ApiIndexResponse {
                api_base: String,
                countdowns_url: String,
                revision_url: String,
                state_url: String,
                health_url: String,
            }

            let base_url = request_base_url(&request);
            let payload = ApiIndexResponse {
                countdowns_url: format!("{base_url}/v1/countdowns"),
                revision_url: format!("{base_url}/v1/revision"),
                state_url: format!("{base_url}/v1/state"),
                health_url: format!("{base_url}/healthz"),
                api_base: base_url,
            };
            let _ = send_json(request, StatusCode(200), &payload);
        }
        (Method::Get, "/v1/state") => {
            #[derive(Serialize)]
            struct StateResponse {
                countdown_count: usize,
                revision: u64,
                total_requests: u64,
                server_started_unix_ms: i64,
                server_time_unix_ms: i64,
            }

            let Ok(guard) = store.lock() else {
                let _ = send_text(request, StatusCode(500), "internal state lock error");
                return;
            };
            let payload = StateResponse {
                countdown_count: guard.len(),
                revision: signal.revision(),
                total_requests: stats.total_requests.load(Ordering::Relaxed),
                server_started_unix_ms: stats.server_started_unix_ms,
                server_time_unix_ms: Utc::now().timestamp_millis(),
            };
            drop(guard);
            let _ = send_json(request, StatusCode(200), &payload);
        }
        (Method::Get, "/v1/countdowns") => {
            #[derive(Serialize)]
            struct CountdownListResponse {
                count: usize,
                revision: u64,
                countdowns: Vec<CountdownView>,
            }

            let Ok(guard) = store.lock() else {
                let _ = send_text(request, StatusCode(500), "internal state lock error");
                return;
            };
            let now = Utc::now();
            let countdowns = guard
                .list()
                .iter()
                .map(|countdown| CountdownView::from_countdown(countdown, now))
                .collect::<Vec<_>>();
            drop(guard);
            let payload = CountdownListResponse {
                count: countdowns.len(),
                revision: signal.revision(),
                countdowns,
            };
            let _ = send_json(request, StatusCode(200), &payload);
        }
        (Method::Post, "/v1/countdowns") => {
            let mut body = String::new();
            if request.as_reader().read_to_string(&mut body).is_err() {
                let _ = send_text(request, StatusCode(400), "unreadable request body");
                return;
            }
            let parsed = match serde_json::from_str::<CreateCountdownBody>(&body) {
                Ok(parsed) => parsed,
                Err(err) => {
                    let _ =
                        send_text(request, StatusCode(400), &format!("invalid JSON body: {err}"));
                    return;
                }
            };
            let target_utc = match parse_instant(&parsed.target_instant) {
                Ok(target_utc) => target_utc,
                Err(err) => {
                    let _ = send_text(request, StatusCode(400), &format!("{err:#}"));
                    return;
                }
            };

            let Ok(mut guard) = store.lock() else {
                let _ = send_text(request, StatusCode(500), "internal state lock error");
                return;
            };
            let now = Utc::now();
            let created = guard.create(&parsed.title, target_utc, parsed.description, now);
            drop(guard);
            match created {
                Ok(countdown) => {
                    let view = CountdownView::from_countdown(&countdown, now);
                    let _ = send_json(request, StatusCode(201), &view);
                }
                Err(err @ StoreError::EmptyTitle) => {
                    let _ = send_text(request, StatusCode(400), &err.to_string());
                }
                Err(err) => {
                    log::error!("countdown create failed: {err}");
                    let _ = send_text(request, StatusCode(500), &err.to_string());
                }
            }
        }
        (Method::Delete | Method::Post, _) if countdown_path_id(path).is_some() => {
            let id = countdown_path_id(path).unwrap_or_default().to_string();
            let Ok(mut guard) = store.lock() else {
                let _ = send_text(request, StatusCode(500), "internal state lock error");
                return;
            };
            let deleted = guard.delete(&id);
            drop(guard);
            match deleted {
                Ok(_removed) => {
                    #[derive(Serialize)]
                    struct DeleteResponse {
                        deleted: bool,
                        id: String,
                    }
                    let _ =
                        send_json(request, StatusCode(200), &DeleteResponse { deleted: true, id });
                }
                Err(err @ StoreError::UnknownId(_)) => {
                    let _ = send_text(request, StatusCode(404), &err.to_string());
                }
                Err(err) => {
                    log::error!("countdown delete failed: {err}");
                    let _ = send_text(request, StatusCode(500), &err.to_string());
                }
            }
        }
        (Method::Get, "/v1/revision") => {
            #[derive(Serialize)]
            struct RevisionResponse {
                revision: u64,
            }
            let payload = RevisionResponse {
                revision: signal.revision(),
            };
            let _ = send_json(request, StatusCode(200), &payload);
        }
        (Method::Get, "/healthz") => {
            let _ = send_text(request, StatusCode(200), "ok");
        }
        (Method::Get, _) => {
            let _ = send_text(request, StatusCode(404), "not found");
        }
        _ => {
            let _ = send_text(request, StatusCode(405), "method not allowed");
        }
    }
}

/// Resolves `/v1/countdowns/<id>` and `/v1/countdowns/<id>/delete` to the
/// embedded id. Anything else is not a per-countdown route.
fn countdown_path_id(path: &str) -> Option<&str> {
    let rest = path.strip_prefix("/v1/countdowns/")?;
    let id = rest.strip_suffix("/delete").unwrap_or(rest);
    if id.is_empty() || id.contains('/') {
        return None;
    }
    Some(id)
}

fn send_json<T: Serialize>(
    request: tiny_http::Request,
    status: StatusCode,
    body: &T,
) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    let content_type = Header::from_str("Content-Type: application/json; charset=utf-8")
        .map_err(|_| anyhow::anyhow!("failed to build content-type header"))?;
    request.respond(
        Response::from_data(payload)
            .with_status_code(status)
            .with_header(content_type),
    )?;
    Ok(())
}

fn send_text(request: tiny_http::Request, status: StatusCode, body: &str) -> Result<()> {
    let content_type = Header::from_str("Content-Type: text/plain; charset=utf-8")
        .map_err(|_| anyhow::anyhow!("failed to build content-type header"))?;
    request.respond(
        Response::from_string(body.to_string())
            .with_status_code(status)
            .with_header(content_type),
    )?;
    Ok(())
}

fn split_path_query(url: &str) -> (&str, &str) {
    match url.split_once('?') {
        Some((path, query)) => (path, query),
        None => (url, ""),
    }
}

fn request_base_url(request: &tiny_http::Request) -> String {
    for header in request.headers() {
        if header.field.equiv("Host") {
            let host = header.value.as_str().trim();
            if !host.is_empty() {
                return format!("http://{host}");
            }
        }
    }
    "http://127.0.0.1:8141".to_string()
}

fn is_local_network_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unique_local()
                || v6.is_unicast_link_local()
                || is_ipv4_mapped_local(v6)
        }
    }
}

fn is_ipv4_mapped_local(v6: Ipv6Addr) -> bool {
    match v6.to_ipv4_mapped() {
        Some(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        None => false,
    }
}
