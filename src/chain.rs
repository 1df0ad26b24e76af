//! # chain.rs
//!
//! Walks a route's child tree depth-first, running the wait-for retry loop
//! at each node and folding the results into one outcome per chain run.
//! Mirrors `_collect_chain_results` / `_execute_request` /
//! `_select_chain_result` in the original implementation.

use crate::config::RouteConfig;
use crate::executor::Executor;
use crate::jsonpath;
use crate::result::ResultRecord;
use crate::scheduler::StopSignal;
use crate::value::Value;
use std::sync::Arc;

/// Runs the whole chain rooted at `config` and returns the single record the
/// scheduler should persist: the first `ok == false` record in tree order,
/// else the last one, with `response_time_ms` overwritten by the cumulative
/// time spent across the whole chain.
pub async fn run_chain(
    executor: &Executor,
    config: &RouteConfig,
    stop: &Arc<StopSignal>,
) -> Option<ResultRecord> {
    let (results, total_time) = collect_chain_results(executor, config, None, 0.0, stop).await;
    let mut selected = select_chain_result(results)?;
    selected.response_time_ms = round2(total_time);
    Some(selected)
}

fn select_chain_result(results: Vec<ResultRecord>) -> Option<ResultRecord> {
    if let Some(failing) = results.iter().position(|r| !r.ok) {
        return results.into_iter().nth(failing);
    }
    results.into_iter().last()
}

fn collect_chain_results<'a>(
    executor: &'a Executor,
    config: &'a RouteConfig,
    context: Option<&'a Value>,
    parent_children_delay: f64,
    stop: &'a Arc<StopSignal>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = (Vec<ResultRecord>, f64)> + 'a>> {
    Box::pin(async move {
        let effective_delay = config.delay_before.unwrap_or(parent_children_delay);
        let (record, response_json, has_response) =
            execute_with_retries(executor, config, context, effective_delay, stop).await;
        let mut total_time = record.response_time_ms;
        let mut results = vec![record];

        if !config.children.is_empty() {
            if !has_response {
                log::debug!("skipping children of {}: no response obtained", config.name);
            } else {
                for child in &config.children {
                    if !child.enabled {
                        continue;
                    }
                    let (child_results, child_time) = collect_chain_results(
                        executor,
                        child,
                        response_json.as_ref(),
                        config.children_delay,
                        stop,
                    )
                    .await;
                    results.extend(child_results);
                    total_time += child_time;
                }
            }
        }

        (results, total_time)
    })
}

async fn execute_with_retries(
    executor: &Executor,
    config: &RouteConfig,
    context: Option<&Value>,
    pre_delay: f64,
    stop: &Arc<StopSignal>,
) -> (ResultRecord, Option<Value>, bool) {
    let attempts = config.wait_for.as_ref().map(|w| w.attempts).unwrap_or(1);
    let mut total_time_ms = 0.0;

    if pre_delay > 0.0 {
        crate::scheduler::cancellable_sleep(pre_delay, stop).await;
        total_time_ms += pre_delay * 1000.0;
    }

    let mut last: Option<(ResultRecord, Option<Value>, bool)> = None;
    let mut wait_failed = false;

    for attempt in 0..attempts {
        let (record, response_json, has_response) = executor.execute_once(config, context).await;
        total_time_ms += record.response_time_ms;

        let satisfied = match &config.wait_for {
            None => true,
            Some(wait_for) => {
                has_response
                    && response_json
                        .as_ref()
                        .map(|json| jsonpath::extract(json, &wait_for.path).into_option().is_some())
                        .unwrap_or(false)
            }
        };
        wait_failed = !satisfied;
        last = Some((record, response_json, has_response));

        if config.wait_for.is_none() || satisfied {
            break;
        }
        if attempt + 1 < attempts {
            if let Some(wait_for) = &config.wait_for {
                crate::scheduler::cancellable_sleep(wait_for.delay, stop).await;
                total_time_ms += wait_for.delay * 1000.0;
            }
        }
    }

    let (mut record, response_json, has_response) = last.expect("attempts is always >= 1");
    record.response_time_ms = round2(total_time_ms);
    if config.wait_for.is_some() && wait_failed {
        record.ok = false;
        if record.error.is_none() {
            let wait_for = config.wait_for.as_ref().unwrap();
            record.error = Some(format!(
                "path {} not found after {attempts} attempts",
                wait_for.path
            ));
        }
    }
    (record, response_json, has_response)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouteConfig;
    use chrono::Utc;

    fn route(name: &str) -> RouteConfig {
        RouteConfig {
            name: name.to_string(),
            url: "http://127.0.0.1:9/unused".to_string(),
            method: "GET".to_string(),
            interval: 60.0,
            timeout: 1.0,
            headers: Default::default(),
            params: Default::default(),
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

    fn rec(ok: bool) -> ResultRecord {
        ResultRecord {
            name: "x".to_string(),
            url: "http://x".to_string(),
            method: "GET".to_string(),
            timestamp: Utc::now(),
            response_time_ms: 1.0,
            tags: vec![],
            status_code: Some(if ok { 200 } else { 500 }),
            reason: None,
            ok,
            body_excerpt: None,
            body_truncated: false,
            error: None,
        }
    }

    #[test]
    fn selects_first_failing_else_last() {
        let all_ok = vec![rec(true), rec(true)];
        assert!(select_chain_result(all_ok).unwrap().ok);

        let with_failure = vec![rec(true), rec(false), rec(true)];
        assert!(!select_chain_result(with_failure).unwrap().ok);
    }

    #[test]
    fn empty_results_select_none() {
        assert!(select_chain_result(Vec::new()).is_none());
    }

    #[test]
    fn route_fixture_builds() {
        let r = route("demo");
        assert_eq!(r.name, "demo");
    }
}
