use super::*;

use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{Multipart, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Form, Json, Router,
};
use shared::protocol::CollationOptions;
use tokio::{net::TcpListener, sync::Mutex};

use crate::{
    cookies::SessionCookies,
    notice::NoticeOrigin,
    workflow::{SessionContext, WorkflowController},
    ClientEvent,
};

#[derive(Clone, Default)]
struct Recorded {
    queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
    forms: Arc<Mutex<Vec<Vec<(String, String)>>>>,
    files: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
}

async fn spawn_service(app: Router) -> String {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

fn service_at(root: &str) -> HttpCollationService {
    let endpoints = ServiceEndpoints::new(&format!("{root}/collate"))
        .expect("endpoints")
        .with_transcription_base_url(&format!("{root}/msview/"))
        .expect("transcription endpoints");
    HttpCollationService::new(endpoints).expect("client")
}

async fn record_query(
    State(recorded): State<Recorded>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<serde_json::Value> {
    recorded.queries.lock().await.push(query);
    Json(serde_json::json!({ "status": "ok" }))
}

async fn record_form(
    State(recorded): State<Recorded>,
    Form(form): Form<Vec<(String, String)>>,
) -> Json<serde_json::Value> {
    recorded.forms.lock().await.push(form);
    Json(serde_json::json!({ "status": "collated" }))
}

async fn record_upload(State(recorded): State<Recorded>, mut multipart: Multipart) -> StatusCode {
    while let Some(field) = multipart.next_field().await.expect("field") {
        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.expect("bytes").to_vec();
        recorded.files.lock().await.push((filename, bytes));
    }
    StatusCode::OK
}

#[test]
fn base_url_gains_trailing_slash_so_endpoints_nest() {
    let endpoints = ServiceEndpoints::new("http://collatex.test/app/collate").expect("endpoints");
    assert_eq!(endpoints.base_url.as_str(), "http://collatex.test/app/collate/");
    assert_eq!(
        endpoints.collate("/setNameLang").expect("join").as_str(),
        "http://collatex.test/app/collate/setNameLang"
    );
    assert_eq!(
        endpoints.transcription("session_xml").expect("join").as_str(),
        "http://collatex.test/app/collate/session_xml"
    );
}

#[test]
fn invalid_base_url_is_a_validation_error() {
    let err = ServiceEndpoints::new("not a url").expect_err("invalid");
    assert!(matches!(err, ClientError::Validation(_)));
}

#[tokio::test]
async fn name_and_language_travel_as_query_parameters() {
    let recorded = Recorded::default();
    let app = Router::new()
        .route("/collate/setNameLang", get(record_query))
        .with_state(recorded.clone());
    let service = service_at(&spawn_service(app).await);

    let response = service
        .set_name_lang(&SetNameLangQuery {
            name: "Parzival".to_string(),
            language: "German".to_string(),
        })
        .await
        .expect("set name");
    assert!(response.is_ok());

    let queries = recorded.queries.lock().await;
    assert_eq!(queries[0].get("name").map(String::as_str), Some("Parzival"));
    assert_eq!(queries[0].get("language").map(String::as_str), Some("German"));
}

#[tokio::test]
async fn registered_texts_are_parsed() {
    let app = Router::new().route(
        "/collate/return_texts",
        get(|| async {
            Json(serde_json::json!([
                { "text": "t1", "autosigil": "A", "title": "Witness 1" }
            ]))
        }),
    );
    let service = service_at(&spawn_service(app).await);

    let texts = service.return_texts().await.expect("texts");
    assert_eq!(texts.len(), 1);
    assert_eq!(texts[0].text.as_str(), "t1");
    assert_eq!(texts[0].autosigil, "A");
}

#[tokio::test]
async fn unauthorized_means_session_expired() {
    let app = Router::new().route(
        "/collate/return_texts",
        get(|| async { StatusCode::UNAUTHORIZED }),
    );
    let service = service_at(&spawn_service(app).await);

    let err = service.return_texts().await.expect_err("must fail");
    assert_eq!(err, ClientError::SessionExpired);
}

#[tokio::test]
async fn unparseable_success_body_is_a_generic_server_error() {
    let app = Router::new().route(
        "/collate/return_texts",
        get(|| async { "<html>not json</html>" }),
    );
    let service = service_at(&spawn_service(app).await);

    let err = service.return_texts().await.expect_err("must fail");
    assert_eq!(err, ClientError::Server(GENERIC_SERVER_ERROR.to_string()));
}

#[tokio::test]
async fn structured_error_body_supplies_the_message() {
    let app = Router::new().route(
        "/collate/collate_sources",
        post(|| async {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "no texts selected" })),
            )
        }),
    );
    let service = service_at(&spawn_service(app).await);

    let err = service.collate_sources(&[]).await.expect_err("must fail");
    assert_eq!(err, ClientError::Server("no texts selected".to_string()));
}

#[tokio::test]
async fn refused_connection_is_a_network_error() {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let service = service_at(&format!("http://{addr}"));

    let err = service.return_texts().await.expect_err("must fail");
    assert!(matches!(err, ClientError::Network(_)), "unexpected: {err:?}");
}

#[tokio::test]
async fn collation_form_is_posted_urlencoded() {
    let recorded = Recorded::default();
    let app = Router::new()
        .route("/collate/collate_sources", post(record_form))
        .with_state(recorded.clone());
    let service = service_at(&spawn_service(app).await);

    let form = vec![
        ("text".to_string(), "t1".to_string()),
        ("sigil_t1".to_string(), "A".to_string()),
    ];
    let ack = service.collate_sources(&form).await.expect("collate");
    assert_eq!(ack["status"], "collated");
    assert_eq!(recorded.forms.lock().await[0], form);
}

#[tokio::test]
async fn upload_sends_file_as_multipart() {
    let recorded = Recorded::default();
    let app = Router::new()
        .route("/collate/upload", post(record_upload))
        .with_state(recorded.clone());
    let service = service_at(&spawn_service(app).await);

    service
        .upload_file("witness-a.xml", b"<TEI/>".to_vec())
        .await
        .expect("upload");

    let files = recorded.files.lock().await;
    assert_eq!(
        files[0],
        ("witness-a.xml".to_string(), b"<TEI/>".to_vec())
    );
}

#[tokio::test]
async fn reload_posts_session_expired_flag_to_base_url() {
    let recorded = Recorded::default();
    let app = Router::new()
        .route("/collate/", post(record_form))
        .with_state(recorded.clone());
    let service = service_at(&spawn_service(app).await);

    service.reload_session_expired().await.expect("reload");
    assert_eq!(
        recorded.forms.lock().await[0],
        vec![(SESSION_EXPIRED_FIELD.to_string(), "1".to_string())]
    );
}

#[tokio::test]
async fn display_result_returns_body_and_content_type() {
    let app = Router::new().route(
        "/collate/result/display",
        post(|| async { ([(header::CONTENT_TYPE, "text/html")], "<table/>") }),
    );
    let service = service_at(&spawn_service(app).await);

    let result = service
        .fetch_result(ResultKind::Display)
        .await
        .expect("result");
    assert_eq!(result.content_type.as_deref(), Some("text/html"));
    assert_eq!(result.body_text(), "<table/>");
}

#[tokio::test]
async fn session_cookie_is_kept_between_requests() {
    let app = Router::new()
        .route(
            "/collate/setNameLang",
            get(|| async {
                (
                    [(header::SET_COOKIE, "collatex_session=abc123; Path=/")],
                    Json(serde_json::json!({ "status": "ok" })),
                )
            }),
        )
        .route(
            "/collate/return_texts",
            get(|headers: HeaderMap| async move {
                let has_session = headers
                    .get(header::COOKIE)
                    .and_then(|value| value.to_str().ok())
                    .is_some_and(|value| value.contains("collatex_session=abc123"));
                if has_session {
                    Json(serde_json::json!([])).into_response()
                } else {
                    StatusCode::UNAUTHORIZED.into_response()
                }
            }),
        );
    let service = service_at(&spawn_service(app).await);

    service
        .set_name_lang(&SetNameLangQuery {
            name: "Parzival".to_string(),
            language: "German".to_string(),
        })
        .await
        .expect("set name");
    let texts = service.return_texts().await.expect("cookie carried");
    assert!(texts.is_empty());
}

#[tokio::test]
async fn transcription_endpoints_use_their_own_base_url() {
    let app = Router::new()
        .route(
            "/msview/convert_transcription",
            post(|| async {
                Json(serde_json::json!({
                    "textcontent": "<p/>",
                    "textdescription": "MS",
                    "textsigil": "M",
                    "textidentifier": "ms-1",
                    "warnings": ["w1"]
                }))
            }),
        )
        .route(
            "/msview/reset_all",
            post(|| async { Json(serde_json::json!({ "xmltemplate": "<TEI/>" })) }),
        )
        .route("/msview/session_json", get(|| async { "{\"witnesses\":[]}" }));
    let service = service_at(&spawn_service(app).await);

    let converted = service
        .convert_transcription(&[("markuptext".to_string(), "x".to_string())])
        .await
        .expect("convert");
    assert_eq!(converted.textsigil, "M");
    assert_eq!(converted.warnings, vec!["w1".to_string()]);

    let reset = service.reset_all().await.expect("reset");
    assert_eq!(reset.xmltemplate, "<TEI/>");

    let export = service
        .download_session(ExportFormat::Json)
        .await
        .expect("export");
    assert_eq!(export, b"{\"witnesses\":[]}".to_vec());
}

#[tokio::test]
async fn unreadable_collation_ack_surfaces_one_generic_server_notice() {
    let app = Router::new()
        .route(
            "/collate/setNameLang",
            get(|| async { Json(serde_json::json!({ "status": "ok" })) }),
        )
        .route(
            "/collate/return_texts",
            get(|| async {
                Json(serde_json::json!([
                    { "text": "t1", "autosigil": "A", "title": "Witness 1" },
                    { "text": "t2", "autosigil": "B", "title": "Witness 2" }
                ]))
            }),
        )
        .route("/collate/collate_sources", post(|| async { "garbage{" }));
    let root = spawn_service(app).await;
    let controller = WorkflowController::new(
        Arc::new(service_at(&root)),
        SessionContext::new(format!("{root}/collate")),
    );
    let mut rx = controller.subscribe_events();

    controller
        .set_name_and_language("Parzival", "German")
        .await
        .expect("name/lang");
    controller.refresh_registered_texts().await.expect("texts");
    let err = controller
        .collate(CollationOptions::new())
        .await
        .expect_err("must fail");
    assert_eq!(err, ClientError::Server(GENERIC_SERVER_ERROR.to_string()));

    let mut notices = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let ClientEvent::Notice(notice) = event {
            notices.push(notice);
        }
    }
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].origin, NoticeOrigin::ServerError);
    assert_eq!(notices[0].message, GENERIC_SERVER_ERROR);
}

#[tokio::test]
async fn structured_session_expired_code_means_session_expired() {
    let app = Router::new()
        .route(
            "/collate/return_texts",
            get(|| async {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({
                        "code": "session_expired",
                        "message": "session gone"
                    })),
                )
            }),
        )
        .route(
            "/collate/setNameLang",
            get(|| async {
                Json(serde_json::json!({ "code": "session_expired", "message": "session gone" }))
            }),
        );
    let service = service_at(&spawn_service(app).await);

    let err = service.return_texts().await.expect_err("must fail");
    assert_eq!(err, ClientError::SessionExpired);

    let err = service
        .set_name_lang(&SetNameLangQuery {
            name: "Parzival".to_string(),
            language: "German".to_string(),
        })
        .await
        .expect_err("must fail");
    assert_eq!(err, ClientError::SessionExpired);
}

#[tokio::test]
async fn html_error_page_is_shown_as_its_text() {
    let app = Router::new().route(
        "/collate/collate_sources",
        post(|| async {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/html")],
                "<h1>Internal Server Error</h1>",
            )
        }),
    );
    let service = service_at(&spawn_service(app).await);

    let err = service.collate_sources(&[]).await.expect_err("must fail");
    assert_eq!(
        err,
        ClientError::Server("<h1>Internal Server Error</h1>".to_string())
    );
}

#[tokio::test]
async fn empty_error_body_falls_back_to_generic_message() {
    let app = Router::new().route(
        "/collate/collate_sources",
        post(|| async { StatusCode::BAD_GATEWAY }),
    );
    let service = service_at(&spawn_service(app).await);

    let err = service.collate_sources(&[]).await.expect_err("must fail");
    match err {
        ClientError::Server(message) => {
            assert!(message.starts_with(GENERIC_SERVER_ERROR), "{message}");
            assert!(message.contains("502"), "{message}");
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn unauthorized_refresh_posts_one_reload_and_raises_no_notice() {
    let recorded = Recorded::default();
    let app = Router::new()
        .route(
            "/collate/return_texts",
            get(|| async { StatusCode::UNAUTHORIZED }),
        )
        .route("/collate/", post(record_form))
        .with_state(recorded.clone());
    let root = spawn_service(app).await;
    let controller = WorkflowController::new(
        Arc::new(service_at(&root)),
        SessionContext::new(format!("{root}/collate")),
    );
    let mut rx = controller.subscribe_events();

    let err = controller
        .refresh_registered_texts()
        .await
        .expect_err("must fail");
    assert_eq!(err, ClientError::SessionExpired);

    let forms = recorded.forms.lock().await;
    assert_eq!(forms.len(), 1);
    assert_eq!(
        forms[0],
        vec![(SESSION_EXPIRED_FIELD.to_string(), "1".to_string())]
    );

    let mut reloaded = 0;
    while let Ok(event) = rx.try_recv() {
        match event {
            ClientEvent::Notice(notice) => panic!("unexpected notice: {notice:?}"),
            ClientEvent::SessionReloaded => reloaded += 1,
            _ => {}
        }
    }
    assert_eq!(reloaded, 1);
    assert!(controller.snapshot().await.notice.is_none());
}

#[tokio::test]
async fn saved_session_cookie_is_sent_by_the_next_client() {
    let app = Router::new()
        .route(
            "/collate/setNameLang",
            get(|| async {
                (
                    [(header::SET_COOKIE, "collatex_session=abc123; Path=/")],
                    Json(serde_json::json!({ "status": "ok" })),
                )
            }),
        )
        .route(
            "/collate/return_texts",
            get(|headers: HeaderMap| async move {
                let has_session = headers
                    .get(header::COOKIE)
                    .and_then(|value| value.to_str().ok())
                    .is_some_and(|value| value.contains("collatex_session=abc123"));
                if has_session {
                    Json(serde_json::json!([
                        { "text": "t1", "autosigil": "A", "title": "Witness 1" }
                    ]))
                    .into_response()
                } else {
                    Json(serde_json::json!([])).into_response()
                }
            }),
        );
    let root = spawn_service(app).await;
    let suffix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let path = std::env::temp_dir().join(format!("collatex_service_cookies_{suffix}.json"));

    let first_run = SessionCookies::load(&path).expect("load");
    let first = {
        let endpoints = service_at(&root).endpoints().clone();
        HttpCollationService::with_cookie_jar(endpoints, None, first_run.jar()).expect("client")
    };
    first
        .set_name_lang(&SetNameLangQuery {
            name: "Parzival".to_string(),
            language: "German".to_string(),
        })
        .await
        .expect("set name");
    let endpoints = first.endpoints();
    first_run
        .save([&endpoints.base_url, &endpoints.transcription_base_url])
        .expect("save");

    let fresh = service_at(&root);
    assert!(fresh.return_texts().await.expect("texts").is_empty());

    let second_run = SessionCookies::load(&path).expect("reload");
    let second = HttpCollationService::with_cookie_jar(
        endpoints.clone(),
        None,
        second_run.jar(),
    )
    .expect("client");
    let texts = second.return_texts().await.expect("texts");
    assert_eq!(texts.len(), 1);
    assert_eq!(texts[0].text.as_str(), "t1");

    std::fs::remove_file(path).expect("cleanup");
}
