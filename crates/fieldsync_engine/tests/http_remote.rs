//! Events API over HTTP, against a mock server.

use fieldsync_engine::{
    EventRemoteDataSource, HttpEventRemote, IntegrationIssuePredicate, SyncConfig, SyncError,
    EVENT_COUNT_HEADER, EVENT_COUNT_LOWER_BOUND_HEADER, REQUEST_ID_HEADER,
};
use fieldsync_events::{
    EnrolmentRecordEventType, EventScope, EventScopePayload, EventScopeType, Modality,
    RemoteEventQuery, ScopeUpload, Timestamp, UploadEventsBody,
};
use fieldsync_testkit::consent_event;
use flate2::read::GzDecoder;
use std::io::Read;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const RECORDS: &str = r#"[
  {"id":"r1","payload":{"type":"EnrolmentRecordCreation","subjectId":"s1","projectId":"p1","moduleId":"m1","attendantId":"u1","biometricReferences":[]}},
  {"id":"r2","payload":{"type":"EnrolmentRecordDeletion","subjectId":"s0","projectId":"p1","moduleId":"m1","attendantId":"u1"}}
]"#;

fn remote(server: &MockServer) -> HttpEventRemote<fieldsync_engine::ReqwestClient> {
    HttpEventRemote::from_config(&SyncConfig::new(server.uri())).unwrap()
}

fn query() -> RemoteEventQuery {
    RemoteEventQuery {
        project_id: "p1".into(),
        user_id: None,
        module_id: Some("m1".into()),
        subject_id: None,
        modes: vec![Modality::Fingerprint],
        last_event_id: Some("r0".into()),
    }
}

fn gunzip(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    GzDecoder::new(body).read_to_end(&mut out).unwrap();
    out
}

fn session_body() -> UploadEventsBody {
    let mut scope = EventScope::new(
        "scope-1",
        "p1",
        EventScopeType::Session,
        Timestamp(1),
        EventScopePayload::default(),
    );
    scope.close(Timestamp(2), None);
    UploadEventsBody::for_scope_type(
        EventScopeType::Session,
        vec![ScopeUpload {
            scope,
            events: vec![consent_event(1)],
        }],
    )
}

#[tokio::test]
async fn count_sends_partition_parameters() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/projects/p1/events/count"))
        .and(query_param("l_moduleId", "m1"))
        .and(query_param("l_mode", "FINGERPRINT"))
        .and(query_param("lastEventId", "r0"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"[{"type":"EnrolmentRecordCreation","count":4},{"type":"EnrolmentRecordMove","count":1}]"#,
        ))
        .mount(&server)
        .await;

    let counts = remote(&server).count(&query()).await.unwrap();
    assert_eq!(counts.len(), 2);
    assert_eq!(
        counts[0].event_type,
        EnrolmentRecordEventType::EnrolmentRecordCreation
    );
    assert_eq!(counts[0].count, 4);
}

#[tokio::test]
async fn download_streams_records_and_reads_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/projects/p1/events"))
        .and(query_param("lastEventId", "r0"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(RECORDS)
                .insert_header(EVENT_COUNT_HEADER, "120")
                .insert_header(EVENT_COUNT_LOWER_BOUND_HEADER, "true")
                .insert_header(REQUEST_ID_HEADER, "req-7"),
        )
        .mount(&server)
        .await;

    let mut stream = remote(&server).get_events(&query()).await.unwrap();
    assert_eq!(stream.total_count, Some(120));
    assert!(stream.is_lower_bound);
    assert_eq!(stream.request_id.as_deref(), Some("req-7"));

    let mut ids = Vec::new();
    while let Some(record) = stream.receiver.recv().await {
        ids.push(record.unwrap().id);
    }
    assert_eq!(ids, vec!["r1", "r2"]);
}

#[tokio::test]
async fn truncated_download_ends_with_a_structure_error() {
    let server = MockServer::start().await;
    let truncated = &RECORDS[..RECORDS.find("},\n").unwrap() + 3];
    Mock::given(method("GET"))
        .and(path("/projects/p1/events"))
        .respond_with(ResponseTemplate::new(200).set_body_string(truncated))
        .mount(&server)
        .await;

    let mut stream = remote(&server).get_events(&query()).await.unwrap();
    assert_eq!(stream.total_count, None);
    let first = stream.receiver.recv().await.unwrap().unwrap();
    assert_eq!(first.id, "r1");
    let last = stream.receiver.recv().await.unwrap().unwrap_err();
    assert!(matches!(last, SyncError::StreamStructure(_)));
    assert!(stream.receiver.recv().await.is_none());
}

#[tokio::test]
async fn maintenance_carries_the_estimated_outage() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/projects/p1/events"))
        .respond_with(
            ResponseTemplate::new(503).set_body_string(r#"{"error":"002","estimatedOutage":600}"#),
        )
        .mount(&server)
        .await;

    let err = remote(&server).get_events(&query()).await.unwrap_err();
    assert!(matches!(
        err,
        SyncError::BackendMaintenance {
            estimated_outage_secs: Some(600)
        }
    ));
}

#[tokio::test]
async fn error_statuses_are_classified() {
    let server = MockServer::start().await;
    for (project, status) in [("auth", 401u16), ("bad", 400), ("down", 500)] {
        Mock::given(method("GET"))
            .and(path(format!("/projects/{project}/events/count")))
            .respond_with(ResponseTemplate::new(status).set_body_string("nope"))
            .mount(&server)
            .await;
    }
    let remote = remote(&server);
    let count = |project: &str| {
        let mut q = query();
        q.project_id = project.to_string();
        q
    };

    let err = remote.count(&count("auth")).await.unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(err, SyncError::Unauthorized { status: 401 }));

    let err = remote.count(&count("bad")).await.unwrap_err();
    assert!(matches!(err, SyncError::CloudIntegration { status: 400 }));

    let err = remote.count(&count("down")).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(err.status(), Some(500));
}

#[tokio::test]
async fn integration_predicate_is_configurable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/projects/p1/events/count"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&server)
        .await;
    let config =
        SyncConfig::new(server.uri()).with_integration_issue(IntegrationIssuePredicate::never());
    let remote = HttpEventRemote::from_config(&config).unwrap();

    let err = remote.count(&query()).await.unwrap_err();
    assert!(matches!(err, SyncError::Http { status: 400, .. }));
}

#[tokio::test]
async fn upload_posts_the_grouped_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/projects/p1/events"))
        .and(query_param("acceptInvalidEvents", "true"))
        .and(header("content-encoding", "gzip"))
        .respond_with(ResponseTemplate::new(201).insert_header(REQUEST_ID_HEADER, "up-1"))
        .mount(&server)
        .await;

    let result = remote(&server)
        .post("p1", &session_body(), true)
        .await
        .unwrap();
    assert_eq!(result.status, 201);
    assert_eq!(result.request_id.as_deref(), Some("up-1"));

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&gunzip(&requests[0].body)).unwrap();
    assert_eq!(body["sessions"][0]["id"], "scope-1");
    assert_eq!(body["sessions"][0]["events"][0]["payload"]["type"], "CONSENT");
    assert!(body["eventDownSyncs"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn quarantine_uploads_raw_strings() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/projects/p1/dump"))
        .and(query_param("type", "CORRUPTED_EVENTS"))
        .and(header("content-encoding", "gzip"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    remote(&server)
        .dump_invalid_events("p1", vec!["{broken".into()])
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let body: Vec<String> = serde_json::from_slice(&gunzip(&requests[0].body)).unwrap();
    assert_eq!(body, vec!["{broken".to_string()]);
}
