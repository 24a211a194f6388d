use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    if let Some(resp) = handlers::core::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::courses::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::people::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::attendance::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::gradebook::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::reports::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::backup::try_handle(state, &req) {
        return resp;
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(method: &str, params: serde_json::Value) -> Request {
        Request {
            id: "1".to_string(),
            method: method.to_string(),
            params,
        }
    }

    #[test]
    fn unknown_methods_are_not_implemented() {
        let mut state = AppState::default();
        let resp = handle_request(&mut state, request("grid.get", json!({})));
        assert_eq!(resp["error"]["code"], "not_implemented");
    }

    #[test]
    fn table_methods_need_a_workspace() {
        let mut state = AppState::default();
        for method in ["courses.list", "attendance.open", "gradebook.open", "ids.generate"] {
            let resp = handle_request(&mut state, request(method, json!({ "courseId": "X" })));
            assert_eq!(resp["error"]["code"], "no_workspace", "{method}");
        }
        let resp = handle_request(&mut state, request("health", json!({})));
        assert_eq!(resp["ok"], true);
    }
}
