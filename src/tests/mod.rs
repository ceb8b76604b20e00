use chrono::NaiveDate;
use serde_json::json;

use crate::client::{ApiError, ListQuery, RestClient};
use crate::config::{ConfigFile, ResourceSpec};
use crate::controller::{ControllerState, LoadOutcome, Removal, ResourceController};
use crate::list::{self, ClientFilter, Pager};
use crate::record::{
    parse_list_envelope, parse_record_envelope, Draft, ImageRef, ListPage, Record,
};
use crate::session::Session;
use crate::upload::{self, UploadStrategy};

fn record(value: serde_json::Value) -> Record {
    Record::from_value(value).unwrap()
}

fn sample_records(n: usize) -> Vec<Record> {
    (1..=n)
        .map(|i| record(json!({ "_id": format!("id-{i}"), "name": format!("record {i}") })))
        .collect()
}

fn page_of(n: usize) -> ListPage {
    ListPage {
        records: sample_records(n),
        total_pages: None,
        total: None,
    }
}

// Points at a closed port; only tests that never expect a successful round
// trip use it.
fn offline_controller(resource: ResourceSpec, page_size: usize) -> ResourceController {
    let client = RestClient::new(reqwest::Client::new(), "http://127.0.0.1:9/api", None).unwrap();
    ResourceController::new(client, resource, page_size)
}

#[test]
fn envelope_accepts_bare_array() {
    let page = parse_list_envelope(json!([{ "_id": "a" }, { "_id": "b" }])).unwrap();
    assert_eq!(page.records.len(), 2);
    assert_eq!(page.total_pages, None);
}

#[test]
fn envelope_accepts_data_object_with_counts() {
    let page = parse_list_envelope(json!({
        "data": [{ "_id": "a" }, { "_id": "b" }, { "_id": "c" }],
        "totalPages": 7,
        "total": 61
    }))
    .unwrap();
    assert_eq!(page.records.len(), 3);
    assert_eq!(page.total_pages, Some(7));
    assert_eq!(page.total, Some(61));
}

#[test]
fn envelope_rejects_unexpected_shapes() {
    assert!(parse_list_envelope(json!("nope")).is_err());
    assert!(parse_list_envelope(json!({ "items": [] })).is_err());
    assert!(parse_list_envelope(json!({ "data": "nope" })).is_err());
    assert!(parse_list_envelope(json!([1, 2])).is_err());
}

#[test]
fn record_envelope_accepts_both_shapes() {
    let bare = parse_record_envelope(json!({ "_id": "a", "name": "x" })).unwrap();
    let wrapped = parse_record_envelope(json!({ "data": { "_id": "a", "name": "x" } })).unwrap();
    assert_eq!(bare, wrapped);
    assert!(parse_record_envelope(json!([1])).is_err());
}

#[test]
fn record_id_normalizes_numbers() {
    let rec = record(json!({ "id": 42 }));
    assert_eq!(rec.id("id"), Some("42".to_string()));
    assert_eq!(rec.id("_id"), None);
}

#[test]
fn pager_twelve_records_page_size_five() {
    let pager = Pager::new(5);
    let items: Vec<usize> = (1..=12).collect();
    assert_eq!(pager.total_pages(12), 3);
    assert_eq!(pager.slice(&items, 1), &[1, 2, 3, 4, 5]);
    assert_eq!(pager.slice(&items, 3), &[11, 12]);
}

#[test]
fn pager_clamps_out_of_range_pages() {
    let pager = Pager::new(5);
    let items: Vec<usize> = (1..=12).collect();
    assert_eq!(pager.clamp(0, 12), 1);
    assert_eq!(pager.clamp(9, 12), 3);
    assert_eq!(pager.slice(&items, 99), &[11, 12]);
    let empty: Vec<usize> = Vec::new();
    assert_eq!(pager.clamp(4, 0), 1);
    assert!(pager.slice(&empty, 1).is_empty());
}

#[test]
fn pager_page_sizes_follow_the_formula() {
    let pager = Pager::new(4);
    let items: Vec<usize> = (1..=10).collect();
    for k in 1..=pager.total_pages(items.len()) {
        let expected = usize::min(4, items.len() - (k - 1) * 4);
        assert_eq!(pager.slice(&items, k).len(), expected);
    }
}

#[test]
fn filter_is_idempotent() {
    let records = vec![
        record(json!({ "_id": "1", "name": "Plumbing quote" })),
        record(json!({ "_id": "2", "name": "Roofing enquiry" })),
        record(json!({ "_id": "3", "name": "plumbing callback" })),
    ];
    let filter = ClientFilter {
        search: Some("plumbing".to_string()),
        ..Default::default()
    };
    let once: Vec<String> = list::apply(&records, &filter)
        .iter()
        .map(|r| r.id("_id").unwrap())
        .collect();
    let twice_input: Vec<Record> = list::apply(&records, &filter)
        .into_iter()
        .cloned()
        .collect();
    let twice: Vec<String> = list::apply(&twice_input, &filter)
        .iter()
        .map(|r| r.id("_id").unwrap())
        .collect();
    assert_eq!(once, vec!["1".to_string(), "3".to_string()]);
    assert_eq!(once, twice);
}

#[test]
fn filter_matches_category_and_dates() {
    let records = vec![
        record(json!({ "_id": "1", "category": "Awards", "createdAt": "2024-03-10T09:30:00Z" })),
        record(json!({ "_id": "2", "category": "Events", "createdAt": "2024-05-01" })),
        record(json!({ "_id": "3", "category": "awards", "createdAt": "2023-12-31T23:59:59Z" })),
    ];
    let filter = ClientFilter {
        category: Some("awards".to_string()),
        from_date: Some(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
        ..Default::default()
    };
    let hits: Vec<String> = list::apply(&records, &filter)
        .iter()
        .map(|r| r.id("_id").unwrap())
        .collect();
    assert_eq!(hits, vec!["1".to_string()]);
}

#[test]
fn filter_regex_applies_to_string_fields() {
    let records = vec![
        record(json!({ "_id": "1", "email": "a@test.com" })),
        record(json!({ "_id": "2", "email": "b@other.org" })),
    ];
    let filter = ClientFilter {
        pattern: Some(regex::Regex::new(r"\.com$").unwrap()),
        ..Default::default()
    };
    assert_eq!(list::apply(&records, &filter).len(), 1);
}

#[test]
fn later_issued_load_wins_regardless_of_completion_order() {
    let mut controller = offline_controller(ResourceSpec::named("enquiries"), 5);
    let first = controller.begin_load(ListQuery::default());
    let second = controller.begin_load(ListQuery {
        search: Some("x".to_string()),
        ..Default::default()
    });

    // The second request resolves first and is applied.
    let outcome = controller.apply_load(&second, Ok(page_of(2))).unwrap();
    assert_eq!(outcome, LoadOutcome::Applied);
    assert_eq!(controller.records().len(), 2);

    // The first (superseded) response arrives late and is discarded.
    let outcome = controller.apply_load(&first, Ok(page_of(12))).unwrap();
    assert_eq!(outcome, LoadOutcome::Stale);
    assert_eq!(controller.records().len(), 2);
    assert_eq!(controller.state(), ControllerState::Ready);
}

#[test]
fn failed_load_keeps_previous_collection() {
    let mut controller = offline_controller(ResourceSpec::named("enquiries"), 5);
    let ticket = controller.begin_load(ListQuery::default());
    controller.apply_load(&ticket, Ok(page_of(4))).unwrap();

    let ticket = controller.begin_load(ListQuery::default());
    let err = controller
        .apply_load(&ticket, Err(ApiError::shape("body is not valid JSON")))
        .unwrap_err();
    assert!(matches!(err, ApiError::UnexpectedShape { .. }));
    assert_eq!(controller.records().len(), 4);
    assert_eq!(controller.state(), ControllerState::Error);
    assert!(controller.last_error().unwrap().contains("unexpected"));
}

#[test]
fn displayed_size_tracks_response_for_both_envelopes() {
    let mut controller = offline_controller(ResourceSpec::named("enquiries"), 10);
    let ticket = controller.begin_load(ListQuery::default());
    let bare = parse_list_envelope(json!([{ "_id": "a" }, { "_id": "b" }])).unwrap();
    controller.apply_load(&ticket, Ok(bare)).unwrap();
    assert_eq!(controller.records().len(), 2);

    let ticket = controller.begin_load(ListQuery::default());
    let wrapped =
        parse_list_envelope(json!({ "data": [{ "_id": "a" }, { "_id": "b" }, { "_id": "c" }] }))
            .unwrap();
    controller.apply_load(&ticket, Ok(wrapped)).unwrap();
    assert_eq!(controller.records().len(), 3);
}

#[tokio::test]
async fn declined_confirmation_issues_no_delete() {
    let mut controller = offline_controller(ResourceSpec::named("enquiries"), 5);
    let ticket = controller.begin_load(ListQuery::default());
    controller.apply_load(&ticket, Ok(page_of(3))).unwrap();

    let removal = controller.remove("id-2", || false).await.unwrap();
    assert_eq!(removal, Removal::Declined);
    assert_eq!(controller.records().len(), 3);
    assert_eq!(controller.state(), ControllerState::Ready);
}

#[tokio::test]
async fn confirmed_delete_reaches_the_wire() {
    // The backend is unroutable, so a confirmed delete surfaces a transport
    // error; the collection is left as-is.
    let mut controller = offline_controller(ResourceSpec::named("enquiries"), 5);
    let ticket = controller.begin_load(ListQuery::default());
    controller.apply_load(&ticket, Ok(page_of(3))).unwrap();

    let err = controller.remove("id-2", || true).await.unwrap_err();
    assert!(matches!(err, ApiError::Transport { .. }));
    assert_eq!(controller.records().len(), 3);
    assert_eq!(controller.state(), ControllerState::Error);
}

#[tokio::test]
async fn create_validation_fails_before_any_network_call() {
    let mut resource = ResourceSpec::named("jobs");
    resource.required = vec!["title".to_string(), "location".to_string()];
    let mut controller = offline_controller(resource, 5);

    let mut draft = Draft::new();
    draft.set("title", json!("   "));
    let err = controller.create(&draft).await.unwrap_err();
    assert!(err.is_validation());
    assert!(err.to_string().contains("title"));
    assert!(err.to_string().contains("location"));
    // Never transitioned to Submitting: the draft was rejected client-side.
    assert_eq!(controller.state(), ControllerState::Idle);
}

#[test]
fn controller_pagination_follows_the_filtered_length() {
    let mut controller = offline_controller(ResourceSpec::named("enquiries"), 5);
    let ticket = controller.begin_load(ListQuery::default());
    controller.apply_load(&ticket, Ok(page_of(12))).unwrap();

    assert_eq!(controller.total_pages(), 3);
    controller.set_page(3);
    assert_eq!(controller.page_records().len(), 2);
    controller.set_page(99);
    assert_eq!(controller.page(), 3);

    controller.set_filter(ClientFilter {
        search: Some("record 1".to_string()),
        ..Default::default()
    });
    // Matches "record 1" and "record 10".."record 12".
    assert_eq!(controller.page(), 1);
    assert_eq!(controller.total_pages(), 1);
    assert_eq!(controller.page_records().len(), 4);
}

#[test]
fn server_pagination_counts_are_authoritative() {
    let mut controller = offline_controller(ResourceSpec::named("enquiries"), 5);
    let ticket = controller.begin_load(ListQuery {
        page: Some(2),
        limit: Some(10),
        ..Default::default()
    });
    let page = ListPage {
        records: sample_records(10),
        total_pages: Some(6),
        total: Some(57),
    };
    controller.apply_load(&ticket, Ok(page)).unwrap();

    assert_eq!(controller.total_pages(), 6);
    assert_eq!(controller.page(), 2);
    // The loaded collection already is one server page.
    assert_eq!(controller.page_records().len(), 10);
}

#[test]
fn server_page_number_reports_the_requested_page() {
    // Asking the server for a page past its count must not be recaptioned:
    // whatever came back is labeled with the page that was requested.
    let mut controller = offline_controller(ResourceSpec::named("enquiries"), 5);
    let ticket = controller.begin_load(ListQuery {
        page: Some(9),
        limit: Some(10),
        ..Default::default()
    });
    let page = ListPage {
        records: Vec::new(),
        total_pages: Some(6),
        total: Some(57),
    };
    controller.apply_load(&ticket, Ok(page)).unwrap();

    assert_eq!(controller.page(), 9);
    assert_eq!(controller.total_pages(), 6);
    assert!(controller.page_records().is_empty());

    // Neither a filter swap nor a repeated set_page drags it back down.
    controller.set_filter(ClientFilter::default());
    controller.set_page(9);
    assert_eq!(controller.page(), 9);
}

#[test]
fn editing_works_on_a_copy_of_the_list_entry() {
    let mut controller = offline_controller(ResourceSpec::named("jobs"), 5);
    let ticket = controller.begin_load(ListQuery::default());
    controller.apply_load(&ticket, Ok(page_of(3))).unwrap();

    let mut draft = controller.draft_for("id-2").unwrap();
    assert_eq!(draft.get("name"), Some(&json!("record 2")));

    draft.set("name", json!("renamed"));
    // The loaded collection is untouched until the remote update lands.
    assert_eq!(
        controller.records()[1].get("name"),
        Some(&json!("record 2"))
    );
    assert!(controller.draft_for("id-99").is_none());
}

#[test]
fn draft_payload_strips_bookkeeping_and_inlines_urls() {
    let mut draft = Draft::new();
    draft.set("_id", json!("abc"));
    draft.set("__v", json!(3));
    draft.set("title", json!("Award"));
    draft.set_image("image", ImageRef::Persisted("https://cdn/img.png".to_string()));

    let payload = draft.to_json_payload("_id").unwrap();
    assert_eq!(payload.get("_id"), None);
    assert_eq!(payload.get("__v"), None);
    assert_eq!(payload.get("title"), Some(&json!("Award")));
    assert_eq!(payload.get("image"), Some(&json!("https://cdn/img.png")));
}

#[test]
fn pending_file_blocks_json_serialization() {
    let mut draft = Draft::new();
    draft.set("title", json!("Award"));
    draft.set_image("image", ImageRef::Pending("/tmp/award.png".into()));
    assert!(draft.has_pending_files());
    let err = draft.to_json_payload("_id").unwrap_err();
    assert!(err.contains("image"));
}

#[tokio::test]
async fn multipart_form_carries_text_and_file_parts() {
    let path = std::env::temp_dir().join("opsdesk-form-test.png");
    tokio::fs::write(&path, b"not really a png").await.unwrap();

    let mut draft = Draft::new();
    draft.set("_id", json!("abc"));
    draft.set("title", json!("Award"));
    draft.set("year", json!(2024));
    draft.set_image("image", ImageRef::Pending(path.clone()));

    let form = upload::build_record_form(&draft, "_id").await.unwrap();
    // The boundary existing is enough to prove the form assembled; part
    // contents are reqwest-internal.
    assert!(!form.boundary().is_empty());

    tokio::fs::remove_file(&path).await.ok();
}

// Accepts one HTTP request, returns it lowercased for inspection, and
// answers with the given JSON body.
async fn serve_one_request(listener: tokio::net::TcpListener, body: &'static str) -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn header_end(buf: &[u8]) -> Option<usize> {
        buf.windows(4).position(|w| w == b"\r\n\r\n")
    }

    let (mut socket, _) = listener.accept().await.unwrap();
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = header_end(&buf) {
            let headers = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let content_length = headers
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + content_length {
                break;
            }
        }
        if n == 0 {
            break;
        }
    }
    let response = format!(
        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    socket.write_all(response.as_bytes()).await.unwrap();
    String::from_utf8_lossy(&buf).to_lowercase()
}

#[tokio::test]
async fn two_step_upload_carries_the_session_token() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(serve_one_request(
        listener,
        r#"{"url":"https://cdn/img.png"}"#,
    ));

    let path = std::env::temp_dir().join("opsdesk-token-test.png");
    tokio::fs::write(&path, b"png bytes").await.unwrap();
    let image = ImageRef::Pending(path.clone());
    let upload_url =
        reqwest::Url::parse(&format!("http://{addr}/api/gallery/upload")).unwrap();

    let persisted =
        upload::upload_binary(&reqwest::Client::new(), Some("tok123"), upload_url, &image)
            .await
            .unwrap();
    assert_eq!(persisted, "https://cdn/img.png");

    let request = server.await.unwrap();
    assert!(request.contains("authorization: bearer tok123"));

    tokio::fs::remove_file(&path).await.ok();
}

#[tokio::test]
async fn missing_upload_file_reports_the_path() {
    let mut draft = Draft::new();
    draft.set_image(
        "image",
        ImageRef::Pending("/nonexistent/opsdesk-missing.png".into()),
    );
    let err = upload::build_record_form(&draft, "_id").await.unwrap_err();
    assert!(matches!(err, ApiError::FileRead { .. }));
    assert!(err.to_string().contains("opsdesk-missing.png"));
}

#[test]
fn list_query_serializes_the_wire_parameter_names() {
    let query = ListQuery {
        page: Some(2),
        limit: Some(10),
        search: Some("plumber".to_string()),
        from_date: NaiveDate::from_ymd_opt(2024, 1, 1),
        to_date: NaiveDate::from_ymd_opt(2024, 6, 30),
        category: Some("Awards".to_string()),
    };
    let pairs = query.query_pairs();
    assert_eq!(
        pairs,
        vec![
            ("page", "2".to_string()),
            ("limit", "10".to_string()),
            ("search", "plumber".to_string()),
            ("fromDate", "2024-01-01".to_string()),
            ("toDate", "2024-06-30".to_string()),
            ("category", "Awards".to_string()),
        ]
    );
    assert!(ListQuery::default().query_pairs().is_empty());
}

#[test]
fn session_gates_resources_by_role() {
    let mut resource = ResourceSpec::named("jobs");
    resource.roles = vec!["admin".to_string()];

    let logged_out = Session::default();
    assert!(!logged_out.can_access(&resource));

    let employee = Session {
        authenticated: true,
        user_id: Some("u1".to_string()),
        role: Some("employee".to_string()),
        token: Some("t".to_string()),
    };
    assert!(!employee.can_access(&resource));

    let admin = Session {
        role: Some("Admin".to_string()),
        ..employee.clone()
    };
    assert!(admin.can_access(&resource));

    let open = ResourceSpec::named("enquiries");
    assert!(employee.can_access(&open));
}

#[test]
fn config_yaml_parses_resource_specs() {
    let yaml = r#"
base_url: http://127.0.0.1:4000/api
page_size: 10
resources:
  - name: enquiries
    required: [firstName, email]
    date_field: createdAt
  - name: gallery
    upload: multipart
    roles: [admin]
"#;
    let cfg: ConfigFile = serde_yaml::from_str(yaml).unwrap();
    let resources = cfg.resources.unwrap();
    assert_eq!(resources.len(), 2);
    assert_eq!(resources[0].id_field, "_id");
    assert_eq!(resources[0].upload, UploadStrategy::TwoStep);
    assert_eq!(resources[1].upload, UploadStrategy::Multipart);
    assert_eq!(resources[1].roles, vec!["admin".to_string()]);
    assert_eq!(resources[1].collection_path(), "gallery");
}

#[test]
fn column_set_puts_the_id_first() {
    let records = vec![
        record(json!({ "_id": "1", "zeta": 1, "alpha": 2, "__v": 0 })),
        record(json!({ "_id": "2", "beta": 3 })),
    ];
    let refs: Vec<&Record> = records.iter().collect();
    let columns = Record::column_set(&refs, "_id");
    assert_eq!(columns, vec!["_id", "alpha", "beta", "zeta"]);
}
