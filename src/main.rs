use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

mod backend;
mod map;
mod message;
mod session;
mod storage;
mod store;

use map::facility::{age_label, cost_label, kakao_map_link};
use map::reconciler::{MarkerReconciler, Selection};
use map::viewport::{LatLngBounds, MapSurface, ViewportController};
use message::{GeoPoint, MessageKind};
use session::SendOutcome;

/// Stand-in for the embedded map SDK: the "camera" is just the last center
/// the user set, and the visible region is a fixed box around it.
#[derive(Default)]
struct TerminalSurface {
    center: Mutex<Option<GeoPoint>>,
}

impl TerminalSurface {
    fn set_center(&self, center: GeoPoint) {
        *self.center.lock().unwrap() = Some(center);
    }
}

impl MapSurface for TerminalSurface {
    fn bounds(&self) -> Option<LatLngBounds> {
        let center = (*self.center.lock().unwrap())?;
        Some(LatLngBounds {
            min_lat: center.lat - 0.05,
            max_lat: center.lat + 0.05,
            min_lon: center.lng - 0.06,
            max_lon: center.lng + 0.06,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    if let Err(e) = dotenvy::dotenv() {
        info!("No .env file found or failed to load: {}", e);
    }

    // Initialize logging with default filter if RUST_LOG is not set
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    info!("nadri chat client starting...");

    let api_base =
        std::env::var("NADRI_API_BASE").unwrap_or_else(|_| "http://localhost:8080".into());
    let stream_status = std::env::var("NADRI_STREAM_STATUS").is_ok_and(|v| v == "1");

    // Persisted state lives in ~/.nadri/nadri.db unless overridden.
    let db_path = match std::env::var("NADRI_DB") {
        Ok(path) => PathBuf::from(path),
        Err(_) => {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
            PathBuf::from(home).join(".nadri").join("nadri.db")
        }
    };

    info!("Initializing storage at {}", db_path.display());
    let storage = Arc::new(storage::SqliteStorage::new(&db_path).await?);
    storage.init().await?;

    let conversations = Arc::new(store::ConversationStore::new(storage.clone()));
    conversations.load().await;
    let conversation_id = conversations.ensure_conversation_id().await;
    info!("Conversation {}", conversation_id);

    let http = Arc::new(backend::HttpBackend::new(api_base)?);
    let controller = Arc::new(session::ChatController::new(
        conversations.clone(),
        http.clone(),
        stream_status,
    ));

    let surface = Arc::new(TerminalSurface::default());
    let viewport = ViewportController::new(storage.clone(), surface.clone());
    surface.set_center(viewport.restore_or_default().await);

    let reconciler = MarkerReconciler::new(http);

    let restored = conversations.messages().await;
    if !restored.is_empty() {
        println!("--- 이전 대화 {}건 복원됨 ---", restored.len());
        for message in &restored {
            print_message(message);
        }
    }

    println!("메시지를 입력하세요. /help 로 명령어 목록, Ctrl+C 로 종료.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                controller.on_unload().await;
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    controller.on_unload().await;
                    break;
                };

                let input = line.trim();
                if input.starts_with('/') {
                    run_command(input, &controller, &viewport, &surface, &reconciler).await;
                    continue;
                }

                match controller.send(input).await {
                    SendOutcome::EmptyInput => continue,
                    SendOutcome::Busy => {
                        println!("(이전 요청을 처리하는 중이에요)");
                        continue;
                    }
                    SendOutcome::Sent => {
                        if let Some(reply) = conversations.messages().await.last() {
                            print_message(reply);
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

async fn run_command(
    input: &str,
    controller: &session::ChatController,
    viewport: &ViewportController,
    surface: &TerminalSurface,
    reconciler: &MarkerReconciler,
) {
    let mut parts = input.split_whitespace();
    let command = parts.next().unwrap_or_default();

    match command {
        "/help" => {
            println!("/reset                대화 초기화");
            println!("/center <lat> <lng>   지도 중심 이동");
            println!("/search [카테고리]     현재 화면의 시설 검색");
            println!("/pick <번호>          검색 결과에서 시설 선택");
            println!("/close                시설 상세 닫기");
        }
        "/reset" => {
            controller.reset().await;
            println!("(대화를 초기화했어요)");
        }
        "/center" => {
            let lat = parts.next().and_then(|v| v.parse::<f64>().ok());
            let lng = parts.next().and_then(|v| v.parse::<f64>().ok());
            match (lat, lng) {
                (Some(lat), Some(lng)) => {
                    let center = GeoPoint { lat, lng };
                    surface.set_center(center);
                    viewport.on_idle(center).await;
                    println!("지도 중심: {}, {}", lat, lng);
                }
                _ => println!("사용법: /center <lat> <lng>"),
            }
        }
        "/search" => {
            let Some(bounds) = viewport.current_bounds() else {
                println!("지도 중심을 먼저 설정하세요 (/center)");
                return;
            };
            reconciler.refresh(&bounds, parts.next()).await;
            print_markers(&reconciler.markers().await);
        }
        "/pick" => {
            let markers = reconciler.markers().await;
            let picked = parts
                .next()
                .and_then(|v| v.parse::<usize>().ok())
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| markers.get(i));
            match picked {
                Some(facility) => {
                    reconciler.select(facility.clone()).await;
                    if let Some(selection) = reconciler.selection().await {
                        print_selection(&selection);
                    }
                }
                None => println!("사용법: /pick <번호> (1 ~ {})", markers.len()),
            }
        }
        "/close" => {
            reconciler.deselect().await;
            println!("(시설 상세를 닫았어요)");
        }
        _ => println!("알 수 없는 명령어예요. /help 를 입력해 보세요."),
    }
}

fn print_markers(markers: &[map::facility::Facility]) {
    if markers.is_empty() {
        println!("이 영역에는 시설이 없어요.");
        return;
    }
    for (i, facility) in markers.iter().enumerate() {
        let category = facility.category2.as_deref().unwrap_or("-");
        let address = facility.address.as_deref().unwrap_or("");
        println!("{:>3}. {} [{}] {}", i + 1, facility.name, category, address);
    }
}

fn print_selection(selection: &Selection) {
    let facility = &selection.facility;
    println!("■ {}", facility.name);
    if let Some(address) = &facility.address {
        println!("  {}", address);
    }
    println!(
        "  {}",
        kakao_map_link(&facility.name, facility.lat, facility.lon)
    );

    let programs: Vec<_> = selection
        .programs
        .iter()
        .filter(|p| p.is_meaningful())
        .collect();
    if programs.is_empty() {
        println!("  등록된 프로그램이 없어요.");
        return;
    }
    for program in programs {
        let note = program.note.as_deref().unwrap_or("프로그램");
        let mut details = Vec::new();
        if let Some(day) = &program.day {
            details.push(day.clone());
        }
        if let Some(time) = &program.time {
            details.push(time.clone());
        }
        if let Some(label) = program.cost.as_ref().and_then(cost_label) {
            details.push(label);
        }
        if let Some(label) = age_label(program.age_min, program.age_max) {
            details.push(label);
        }
        println!("  - {} ({})", note, details.join(" / "));
    }
}

fn print_message(message: &message::Message) {
    let speaker = match message.role {
        message::MessageRole::User => "나",
        message::MessageRole::Assistant => "가이드",
    };
    println!("[{}] {}", speaker, message.content);

    if message.kind == MessageKind::Map {
        if let Some(entries) = &message.data {
            for entry in entries {
                for marker in &entry.markers {
                    let desc = marker.desc.as_deref().unwrap_or("");
                    println!("  📍 {} {}", marker.name, desc);
                }
                if let (Some(name), Some(lat), Some(lng)) =
                    (entry.name.as_deref(), entry.lat, entry.lng)
                {
                    if entry.markers.is_empty() {
                        println!("  📍 {} {}", name, entry.desc.as_deref().unwrap_or(""));
                        println!("  {}", kakao_map_link(name, lat, lng));
                    }
                }
            }
        }
        if let Some(link) = &message.link {
            println!("  🔗 {}", link);
        }
    }
}
