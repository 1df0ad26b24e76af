//! End-to-end coverage of the concrete scenarios from the design: one
//! request against a local stub server per scenario, exercised through the
//! real `Executor`/`run_chain` path rather than through unit-level helpers.

mod support;

use indexmap::IndexMap;
use route_monitor::chain::run_chain;
use route_monitor::config::{RouteConfig, WaitFor};
use route_monitor::executor::Executor;
use route_monitor::scheduler::StopSignal;
use std::sync::{Arc, Mutex};
use support::{Response, TestServer};

fn base_route(name: &str, url: String) -> RouteConfig {
    RouteConfig {
        name: name.to_string(),
        url,
        method: "GET".to_string(),
        interval: 60.0,
        timeout: 5.0,
        headers: IndexMap::new(),
        params: IndexMap::new(),
        data: None,
        json_body: None,
        allow_redirects: true,
        verify_ssl: true,
        ca_bundle: None,
        body_max_chars: 2048,
        file_upload: None,
        basic_auth: None,
        multipart_json_field: "json".to_string(),
        multipart_json_fields: Vec::new(),
        json_query_param: None,
        encoding_file: "utf-8".to_string(),
        encoding_json: "utf-8".to_string(),
        delay_before: None,
        children_delay: 0.0,
        wait_for: None,
        tags: Vec::new(),
        monitor_type: "http".to_string(),
        enabled: true,
        children: Vec::new(),
    }
}

#[tokio::test]
async fn simple_get_is_recorded_ok() {
    let server = TestServer::spawn(|_path, _method| Response::json(200, "OK", r#"{"ok":1}"#));
    let route = base_route("ping", server.url("/y"));

    let executor = Executor::new();
    let (record, _json, has_response) = executor.execute_once(&route, None).await;

    assert!(has_response);
    assert!(record.ok);
    assert_eq!(record.status_code, Some(200));
    assert_eq!(record.body_excerpt.as_deref(), Some(r#"{"ok":1}"#));
    assert!(!record.body_truncated);
    assert!(record.error.is_none());
}

#[tokio::test]
async fn long_body_is_truncated_at_body_max_chars() {
    let long_body = "abcdefghij".repeat(10);
    let body_for_handler = long_body.clone();
    let server = TestServer::spawn(move |_p, _m| Response::text(200, "OK", &body_for_handler));

    let mut route = base_route("truncated", server.url("/"));
    route.body_max_chars = 5;

    let executor = Executor::new();
    let (record, _json, _has_response) = executor.execute_once(&route, None).await;

    assert_eq!(record.body_excerpt.as_deref(), Some("abcde..."));
    assert!(record.body_truncated);
}

#[tokio::test]
async fn unreachable_server_is_a_transport_failure() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    // Listener above is dropped immediately, so nothing answers this port.
    let mut route = base_route("unreachable", format!("http://127.0.0.1:{port}/"));
    route.timeout = 1.0;

    let executor = Executor::new();
    let (record, _json, has_response) = executor.execute_once(&route, None).await;

    assert!(!has_response);
    assert!(!record.ok);
    assert!(record.status_code.is_none());
    assert!(record.error.as_deref().is_some_and(|e| !e.is_empty()));
}

#[tokio::test]
async fn pre_delay_counts_toward_response_time_even_without_wait_for() {
    let server = TestServer::spawn(|_p, _m| Response::json(200, "OK", "{}"));

    let mut route = base_route("delayed", server.url("/"));
    route.delay_before = Some(1.0);

    let stop = StopSignal::new();
    let record = run_chain(&Executor::new(), &route, &stop)
        .await
        .expect("chain produces a record");

    assert!(record.ok);
    assert!(record.response_time_ms >= 1000.0);
}

#[tokio::test]
async fn wait_for_retries_until_the_path_appears() {
    let seen = Arc::new(Mutex::new(0u32));
    let seen_in_handler = seen.clone();
    let server = TestServer::spawn(move |_p, _m| {
        let mut count = seen_in_handler.lock().unwrap();
        *count += 1;
        if *count < 3 {
            Response::json(200, "OK", "{}")
        } else {
            Response::json(200, "OK", r#"{"token":"T"}"#)
        }
    });

    let mut route = base_route("wait-for", server.url("/"));
    route.wait_for = Some(WaitFor {
        path: "$.token".to_string(),
        attempts: 3,
        delay: 1.0,
    });

    let stop = StopSignal::new();
    let record = run_chain(&Executor::new(), &route, &stop)
        .await
        .expect("chain produces a record");

    assert!(record.ok);
    assert!(record.response_time_ms >= 2000.0);
    assert_eq!(*seen.lock().unwrap(), 3);
}

#[tokio::test]
async fn wait_for_exhausting_attempts_marks_the_record_failed() {
    let server = TestServer::spawn(|_p, _m| Response::json(200, "OK", "{}"));

    let mut route = base_route("never-appears", server.url("/"));
    route.wait_for = Some(WaitFor {
        path: "$.token".to_string(),
        attempts: 2,
        delay: 0.0,
    });

    let stop = StopSignal::new();
    let record = run_chain(&Executor::new(), &route, &stop)
        .await
        .expect("chain produces a record");

    assert!(!record.ok);
    assert_eq!(
        record.error.as_deref(),
        Some("path $.token not found after 2 attempts")
    );
}

#[tokio::test]
async fn child_is_templated_from_parent_response_and_reported_when_all_ok() {
    let server = TestServer::spawn(|path, _m| match path {
        "/root" => Response::json(200, "OK", r#"{"id":42}"#),
        "/item/42" => Response::json(200, "OK", r#"{"item":true}"#),
        _ => Response::text(404, "Not Found", ""),
    });

    let mut root = base_route("root", server.url("/root"));
    let child_url = format!("http://127.0.0.1:{}/item/", server.port) + "{{ $.id }}";
    let child = base_route("child", child_url);
    root.children = vec![child];

    let stop = StopSignal::new();
    let record = run_chain(&Executor::new(), &root, &stop)
        .await
        .expect("chain produces a record");

    // All nodes ok => the reported record is the last one in tree order: the child.
    assert_eq!(record.name, "child");
    assert!(record.ok);
}

#[tokio::test]
async fn child_failure_is_the_reported_record() {
    let server = TestServer::spawn(|path, _m| match path {
        "/root" => Response::json(200, "OK", r#"{"id":1}"#),
        _ => Response::json(500, "Internal Server Error", r#"{"error":"boom"}"#),
    });

    let mut root = base_route("root", server.url("/root"));
    let child = base_route("child", server.url("/child"));
    root.children = vec![child];

    let stop = StopSignal::new();
    let record = run_chain(&Executor::new(), &root, &stop)
        .await
        .expect("chain produces a record");

    assert_eq!(record.name, "child");
    assert!(!record.ok);
    assert_eq!(record.status_code, Some(500));
}

#[tokio::test]
async fn disabled_child_is_skipped_and_does_not_block_siblings() {
    let server = TestServer::spawn(|path, _m| match path {
        "/root" => Response::json(200, "OK", r#"{"id":1}"#),
        "/enabled-child" => Response::json(200, "OK", "{}"),
        _ => Response::text(404, "Not Found", ""),
    });

    let mut root = base_route("root", server.url("/root"));
    let mut disabled_child = base_route("disabled-child", server.url("/disabled-child"));
    disabled_child.enabled = false;
    let enabled_child = base_route("enabled-child", server.url("/enabled-child"));
    root.children = vec![disabled_child, enabled_child];

    let stop = StopSignal::new();
    let record = run_chain(&Executor::new(), &root, &stop)
        .await
        .expect("chain produces a record");

    assert_eq!(record.name, "enabled-child");
    assert!(record.ok);
}
