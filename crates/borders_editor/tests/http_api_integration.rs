use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use borders_editor::api::{ApiRequest, BordersApi, HttpBordersApi};
use borders_editor::command::Notice;
use borders_editor::entity::{BorderId, SimplificationLevel};
use borders_editor::error::EditorError;
use borders_editor::geometry::BBox;
use borders_editor::runtime::Runtime;
use borders_editor::session::{EditorSession, SessionOptions};
use borders_editor::settings::Settings;
use borders_editor::viewport::Viewport;
use serde_json::{Value, json};

#[derive(Debug, Clone)]
struct ScriptedResponse {
    status: u16,
    body: String,
}

impl ScriptedResponse {
    fn json_value(body: Value) -> Self {
        Self {
            status: 200,
            body: body.to_string(),
        }
    }

    fn empty() -> Self {
        Self {
            status: 200,
            body: String::new(),
        }
    }

    fn server_error() -> Self {
        Self {
            status: 500,
            body: "internal error".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct RecordedRequest {
    method: String,
    target: String,
    body: String,
}

struct ServerHarness {
    address: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    stop: Arc<AtomicBool>,
    join_handle: Option<thread::JoinHandle<()>>,
}

impl ServerHarness {
    fn base_url(&self) -> String {
        format!("http://{}", self.address)
    }

    fn recorded(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl Drop for ServerHarness {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = TcpStream::connect(&self.address);
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.join();
        }
    }
}

fn find_header_end(bytes: &[u8]) -> Option<usize> {
    bytes.windows(4).position(|window| window == b"\r\n\r\n")
}

fn parse_request(stream: &mut TcpStream) -> Option<RecordedRequest> {
    let mut bytes = Vec::new();
    let mut buf = [0_u8; 4096];
    let mut content_length = 0_usize;
    let mut header_end = None;

    stream.set_read_timeout(Some(Duration::from_secs(2))).ok()?;

    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(read) => {
                bytes.extend_from_slice(&buf[..read]);

                if header_end.is_none()
                    && let Some(pos) = find_header_end(&bytes)
                {
                    header_end = Some(pos + 4);
                    let header_text = String::from_utf8_lossy(&bytes[..pos]).to_string();
                    for line in header_text.lines() {
                        let lower = line.to_ascii_lowercase();
                        if lower.starts_with("content-length:")
                            && let Some(value) = line.split(':').nth(1)
                        {
                            content_length = value.trim().parse::<usize>().unwrap_or(0);
                        }
                    }
                }

                if let Some(end) = header_end
                    && bytes.len() >= end + content_length
                {
                    break;
                }
            }
            Err(error)
                if error.kind() == std::io::ErrorKind::WouldBlock
                    || error.kind() == std::io::ErrorKind::TimedOut =>
            {
                break;
            }
            Err(_) => return None,
        }
    }

    let end = header_end?;
    if bytes.len() < end + content_length {
        return None;
    }

    let header_text = String::from_utf8_lossy(&bytes[..end]).to_string();
    let request_line = header_text.lines().next()?.to_string();
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let target = parts.next().map_or_else(|| "/".to_string(), ToOwned::to_owned);
    let body = String::from_utf8_lossy(&bytes[end..end + content_length]).to_string();

    Some(RecordedRequest {
        method,
        target,
        body,
    })
}

fn write_response(stream: &mut TcpStream, response: &ScriptedResponse) {
    let reason = if response.status == 200 { "OK" } else { "Error" };
    let payload = format!(
        "HTTP/1.1 {} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        response.status,
        response.body.len(),
        response.body
    );
    let _ = stream.write_all(payload.as_bytes());
    let _ = stream.flush();
}

/// Answers requests in order; the last response repeats once the script runs out.
fn start_scripted_server(responses: Vec<ScriptedResponse>) -> ServerHarness {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server");
    listener
        .set_nonblocking(true)
        .expect("set nonblocking listener");

    let address = listener.local_addr().expect("local addr").to_string();
    let stop = Arc::new(AtomicBool::new(false));
    let requests = Arc::new(Mutex::new(Vec::new()));
    let queue = Arc::new(Mutex::new(VecDeque::from(responses)));

    let stop_clone = Arc::clone(&stop);
    let requests_clone = Arc::clone(&requests);

    let join_handle = thread::spawn(move || {
        loop {
            if stop_clone.load(Ordering::SeqCst) {
                break;
            }

            match listener.accept() {
                Ok((mut stream, _addr)) => {
                    // Accepted sockets inherit non-blocking mode on some platforms.
                    let _ = stream.set_nonblocking(false);
                    if let Some(recorded) = parse_request(&mut stream) {
                        let response = {
                            let mut guard = queue.lock().expect("queue lock");
                            if guard.len() > 1 {
                                guard.pop_front().expect("queued response")
                            } else {
                                guard
                                    .front()
                                    .cloned()
                                    .unwrap_or_else(|| ScriptedResponse::json_value(json!({})))
                            }
                        };
                        requests_clone
                            .lock()
                            .expect("requests lock")
                            .push(recorded);
                        write_response(&mut stream, &response);
                    }
                }
                Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(10));
                }
                Err(_) => break,
            }
        }
    });

    ServerHarness {
        address,
        requests,
        stop,
        join_handle: Some(join_handle),
    }
}

fn settings_for(base_url: &str) -> Settings {
    Settings {
        api_url: format!("{base_url}/"),
        connect_timeout: Duration::from_millis(500),
        request_timeout: Duration::from_secs(3),
        retries: 2,
        ..Settings::default()
    }
}

fn bbox() -> BBox {
    BBox::new(8.5, 49.0, 10.25, 51.0).expect("bbox")
}

fn polygon_feature(id: i64, name: &str) -> Value {
    json!({
        "type": "Feature",
        "geometry": {"type": "Polygon", "coordinates": [[[8.6, 49.1], [9.0, 49.1], [9.0, 49.5], [8.6, 49.1]]]},
        "properties": {"id": id, "name": name, "admin_level": 4, "count_k": 120, "disabled": false}
    })
}

#[test]
fn read_requests_are_sent_as_get_with_encoded_query() {
    let server = start_scripted_server(vec![ScriptedResponse::json_value(json!({
        "status": "ok",
        "geojson": {"type": "FeatureCollection", "features": []}
    }))]);
    let mut api = HttpBordersApi::new(&settings_for(&server.base_url())).expect("client");

    let body = api
        .call(&ApiRequest::Bbox {
            bbox: bbox(),
            simplify: SimplificationLevel::Coarse,
            table: None,
        })
        .expect("bbox call");
    assert_eq!(body["status"], "ok");

    api.call(&ApiRequest::Search {
        query: "Rhein Main".to_string(),
    })
    .expect("search call");

    let recorded = server.recorded();
    assert_eq!(recorded.len(), 2);
    assert_eq!(recorded[0].method, "GET");
    assert_eq!(
        recorded[0].target,
        "/bbox?simplify=2&xmin=8.5&xmax=10.25&ymin=49&ymax=51"
    );
    assert_eq!(recorded[1].target, "/search?q=Rhein+Main");
}

#[test]
fn comment_is_posted_as_form_body() {
    let server = start_scripted_server(vec![ScriptedResponse::json_value(json!({"status": "ok"}))]);
    let mut api = HttpBordersApi::new(&settings_for(&server.base_url())).expect("client");

    api.call(&ApiRequest::Comment {
        id: BorderId(42),
        comment: "needs review & split".to_string(),
    })
    .expect("comment call");

    let recorded = server.recorded();
    assert_eq!(recorded[0].method, "POST");
    assert_eq!(recorded[0].target, "/comment");
    assert_eq!(recorded[0].body, "id=42&comment=needs+review+%26+split");
}

#[test]
fn reads_retry_server_errors_but_mutations_do_not() {
    let server = start_scripted_server(vec![
        ScriptedResponse::server_error(),
        ScriptedResponse::json_value(json!({"osm": true})),
        ScriptedResponse::server_error(),
    ]);
    let mut api = HttpBordersApi::new(&settings_for(&server.base_url())).expect("client");

    let body = api.call(&ApiRequest::Config).expect("config after retry");
    assert_eq!(body["osm"], true);

    let error = api
        .call(&ApiRequest::Rename {
            id: BorderId(1),
            new_name: "North".to_string(),
        })
        .expect_err("rename is not retried");
    assert!(error.is_transport());

    let targets: Vec<String> = server
        .recorded()
        .into_iter()
        .map(|request| request.target)
        .collect();
    assert_eq!(targets, vec!["/config", "/config", "/rename?id=1&new_name=North"]);
}

#[test]
fn empty_body_is_reported_without_retry() {
    let server = start_scripted_server(vec![ScriptedResponse::empty()]);
    let mut api = HttpBordersApi::new(&settings_for(&server.base_url())).expect("client");

    match api.call(&ApiRequest::Config).expect_err("empty body") {
        EditorError::InvalidArgument { message } => {
            assert!(message.contains("empty response for config"));
        }
        other => panic!("expected InvalidArgument, got {other}"),
    }
    assert_eq!(server.recorded().len(), 1);
}

#[test]
fn unreachable_server_becomes_failure_notice_and_session_survives() {
    let address = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr").to_string()
    };
    let mut settings = settings_for(&format!("http://{address}"));
    settings.retries = 0;
    let api = HttpBordersApi::new(&settings).expect("client");
    let mut runtime = Runtime::new(EditorSession::new(SessionOptions::from(&settings)), api);
    let mut notices: Vec<Notice> = Vec::new();

    let stats = runtime.start(&mut notices);
    assert_eq!(stats.failed, 1);
    assert!(matches!(
        notices[..],
        [Notice::Failure { ref endpoint, .. }] if endpoint == "config"
    ));
    assert!(!runtime.session().is_read_only());
}

#[test]
fn rejected_rename_over_http_keeps_the_draft() {
    let server = start_scripted_server(vec![
        ScriptedResponse::json_value(json!({"readonly": false, "mwm_size_thr": 71680})),
        ScriptedResponse::json_value(json!({
            "status": "ok",
            "geojson": {"type": "FeatureCollection", "features": [polygon_feature(7, "Hessen")]}
        })),
        ScriptedResponse::json_value(json!({"status": "name_is_busy"})),
    ]);
    let settings = settings_for(&server.base_url());
    let api = HttpBordersApi::new(&settings).expect("client");
    let mut runtime = Runtime::new(EditorSession::new(SessionOptions::from(&settings)), api);
    let mut notices: Vec<Notice> = Vec::new();

    runtime.start(&mut notices);
    runtime.dispatch(
        "settle",
        |session| {
            Ok(session.settle_viewport(Viewport {
                bbox: bbox(),
                zoom: 8.0,
            }))
        },
        &mut notices,
    );
    runtime.session_mut().select(Some(BorderId(7)));
    runtime.dispatch("begin-rename", EditorSession::begin_rename, &mut notices);
    runtime.dispatch(
        "rename-draft",
        |session| {
            session.set_rename_draft("Hesse")?;
            session.commit_rename()
        },
        &mut notices,
    );

    assert!(matches!(
        notices[..],
        [Notice::Rejected { ref status, .. }] if status == "name_is_busy"
    ));
    let borders_editor::modes::EditMode::Renaming(state) = runtime.session().mode() else {
        panic!("rename mode should stay open");
    };
    assert_eq!(state.draft, "Hesse");

    let recorded = server.recorded();
    assert_eq!(recorded.len(), 3);
    assert_eq!(recorded[2].target, "/rename?id=7&new_name=Hesse");
}
