//! Built-in routines registered by the CLI binary.

use std::thread;
use std::time::Duration;

use taskmill_scheduler::{ExitStatus, RoutineContext, RoutineRegistry, RoutineSnapshot};

/// Registry with every routine this binary ships.
pub fn builtin_registry() -> RoutineRegistry {
    let mut registry = RoutineRegistry::new();
    registry.register("taskmill.delay", delay);
    registry.register("taskmill.http-request", http_request);
    registry
}

const MAX_DELAY_SECS: u64 = 600;

/// Sleep for `params.duration_secs` seconds. Exists to exercise lock
/// behaviour: a long delay keeps the task visibly "running".
fn delay(ctx: &RoutineContext<'_>) -> Result<RoutineSnapshot, String> {
    let secs = ctx
        .params
        .get("duration_secs")
        .and_then(|v| v.as_u64())
        .unwrap_or(1)
        .min(MAX_DELAY_SECS);
    thread::sleep(Duration::from_secs(secs));
    Ok(RoutineSnapshot::ok(Some(format!("slept {secs}s"))))
}

/// GET `params.url` with an optional Authorization header.
///
/// A transport-level failure (connect error, deadline hit) reports
/// `Timeout`; any response other than 200 reports `Knockout`.
fn http_request(ctx: &RoutineContext<'_>) -> Result<RoutineSnapshot, String> {
    let url = ctx
        .params
        .get("url")
        .and_then(|v| v.as_str())
        .ok_or("missing 'url' parameter")?;
    let timeout = ctx
        .params
        .get("timeout")
        .and_then(|v| v.as_u64())
        .unwrap_or(180);

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(timeout))
        .build()
        .map_err(|e| format!("http client: {e}"))?;

    let mut request = client.get(url);
    if let (Some(auth_type), Some(auth_key)) = (
        ctx.params.get("auth_type").and_then(|v| v.as_str()),
        ctx.params.get("auth_key").and_then(|v| v.as_str()),
    ) {
        request = request.header(
            reqwest::header::AUTHORIZATION,
            format!("{auth_type} {auth_key}"),
        );
    }

    match request.send() {
        Err(e) => Ok(RoutineSnapshot::failed(
            ExitStatus::Timeout,
            format!("request to {url} failed: {e}"),
        )),
        Ok(response) => {
            let status = response.status();
            if status.as_u16() == 200 {
                let bytes = response.text().map(|b| b.len()).unwrap_or(0);
                Ok(RoutineSnapshot::ok(Some(format!(
                    "{url} responded 200 ({bytes} bytes)"
                ))))
            } else {
                Ok(RoutineSnapshot::failed(
                    ExitStatus::Knockout,
                    format!("{url} responded {status}"),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_contains_builtins() {
        let registry = builtin_registry();
        assert!(registry.contains("taskmill.delay"));
        assert!(registry.contains("taskmill.http-request"));
    }

    #[test]
    fn delay_reports_duration() {
        let params = serde_json::json!({"duration_secs": 0});
        let snap = delay(&RoutineContext {
            task_id: 1,
            task_type: "taskmill.delay",
            params: &params,
        })
        .unwrap();
        assert_eq!(snap.status, ExitStatus::Ok);
        assert_eq!(snap.output.as_deref(), Some("slept 0s"));
    }

    #[test]
    fn http_request_requires_url() {
        let params = serde_json::json!({});
        let err = http_request(&RoutineContext {
            task_id: 1,
            task_type: "taskmill.http-request",
            params: &params,
        })
        .unwrap_err();
        assert!(err.contains("url"));
    }

    #[test]
    fn http_request_unreachable_host_is_timeout() {
        // Reserved TEST-NET-1 address, nothing listens there.
        let params = serde_json::json!({"url": "http://192.0.2.1/", "timeout": 1});
        let snap = http_request(&RoutineContext {
            task_id: 1,
            task_type: "taskmill.http-request",
            params: &params,
        })
        .unwrap();
        assert_eq!(snap.status, ExitStatus::Timeout);
    }
}
