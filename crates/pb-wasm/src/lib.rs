//! WebAssembly bindings for PageBlocker
//!
//! The background script calls `init` once with the stored document and
//! `refresh` on every storage change notification; `check_navigation` only
//! ever reads the cached tree. The editor page uses the stateless
//! `upsert_at`/`delete_at` helpers, which take and return whole documents.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use chrono::NaiveTime;
use wasm_bindgen::prelude::*;

use pb_core::url::is_same_page;
use pb_core::{
    decode_str, encode_string, MatchResult, Matcher, Node, RawNode, RuleTree, TreeCache, UnknownKindPolicy,
};

struct MonitorState {
    cache: TreeCache,
    fail_closed: AtomicBool,
}

impl MonitorState {
    fn new(tree: RuleTree) -> Self {
        Self {
            cache: TreeCache::new(tree),
            fail_closed: AtomicBool::new(false),
        }
    }

    fn policy(&self) -> UnknownKindPolicy {
        if self.fail_closed.load(Ordering::Relaxed) {
            UnknownKindPolicy::FailClosed
        } else {
            UnknownKindPolicy::FailOpen
        }
    }

    fn check(&self, url: &str, blocked_page_url: &str, now: Option<NaiveTime>) -> MatchResult {
        if is_same_page(url, blocked_page_url) {
            return MatchResult::allow();
        }
        let tree = self.cache.snapshot();
        Matcher::new(self.policy()).match_url_at(url, tree.root(), now)
    }
}

static MONITOR_STATE: OnceLock<MonitorState> = OnceLock::new();

fn warn(message: &str) {
    web_sys::console::warn_1(&JsValue::from_str(message));
}

fn state() -> Result<&'static MonitorState, JsValue> {
    MONITOR_STATE
        .get()
        .ok_or_else(|| JsValue::from_str("Not initialized. Call init() first."))
}

// =============================================================================
// Background
// =============================================================================

#[wasm_bindgen]
pub fn init(document_json: &str) -> Result<(), JsValue> {
    if MONITOR_STATE.get().is_some() {
        return Err(JsValue::from_str("Already initialized. Use refresh() to replace the tree."));
    }
    let tree = decode_str(document_json)
        .map_err(|e| JsValue::from_str(&format!("Failed to load rule tree: {}", e)))?;
    MONITOR_STATE
        .set(MonitorState::new(tree))
        .map_err(|_| JsValue::from_str("Failed to set monitor state"))
}

/// Replace the cached tree. An invalid document is rejected and the
/// previous tree stays in use.
#[wasm_bindgen]
pub fn refresh(document_json: &str) -> Result<(), JsValue> {
    let state = state()?;
    match decode_str(document_json) {
        Ok(tree) => {
            state.cache.refresh(tree);
            Ok(())
        }
        Err(e) => {
            let message = format!("Ignoring invalid rule tree update: {}", e);
            warn(&message);
            Err(JsValue::from_str(&message))
        }
    }
}

#[wasm_bindgen]
pub fn is_initialized() -> bool {
    MONITOR_STATE.get().is_some()
}

#[wasm_bindgen]
pub fn set_unknown_kind_policy(policy: &str) -> Result<(), JsValue> {
    let policy = UnknownKindPolicy::from_str(policy)
        .ok_or_else(|| JsValue::from_str(&format!("Unknown policy: {}", policy)))?;
    state()?
        .fail_closed
        .store(policy == UnknownKindPolicy::FailClosed, Ordering::Relaxed);
    Ok(())
}

#[wasm_bindgen]
pub fn get_tree_info() -> JsValue {
    let result = js_sys::Object::new();
    match MONITOR_STATE.get() {
        Some(state) => {
            let tree = state.cache.snapshot();
            let _ = js_sys::Reflect::set(&result, &"initialized".into(), &JsValue::from(true));
            let _ = js_sys::Reflect::set(&result, &"rootName".into(), &JsValue::from_str(tree.name()));
            let _ = js_sys::Reflect::set(&result, &"rules".into(), &JsValue::from(tree.rule_count() as u32));
            let _ = js_sys::Reflect::set(
                &result,
                &"generation".into(),
                &JsValue::from(state.cache.generation() as f64),
            );
        }
        None => {
            let _ = js_sys::Reflect::set(&result, &"initialized".into(), &JsValue::from(false));
        }
    }
    result.into()
}

/// Decide whether a tab navigating to `url` must be redirected.
///
/// `blocked_page_url` is the absolute URL of the blocked page (as returned by
/// `runtime.getURL`); only that exact page is exempt. Returns
/// `{ blocked, rulePath }`. Before `init`, nothing is blocked.
#[wasm_bindgen]
pub fn check_navigation(url: &str, blocked_page_url: &str, enforce_schedules: bool) -> JsValue {
    let result = match MONITOR_STATE.get() {
        Some(state) => {
            let now = enforce_schedules.then(local_time).flatten();
            state.check(url, blocked_page_url, now)
        }
        None => MatchResult::allow(),
    };

    let js_result = js_sys::Object::new();
    let _ = js_sys::Reflect::set(&js_result, &"blocked".into(), &JsValue::from(result.is_blocked()));
    if let Some(path) = result.rule_path {
        let array = js_sys::Array::new();
        for segment in path {
            array.push(&JsValue::from_str(&segment));
        }
        let _ = js_sys::Reflect::set(&js_result, &"rulePath".into(), &array);
    }
    js_result.into()
}

fn local_time() -> Option<NaiveTime> {
    let date = js_sys::Date::new_0();
    NaiveTime::from_hms_opt(date.get_hours(), date.get_minutes(), date.get_seconds())
}

// =============================================================================
// Editor
// =============================================================================

/// Document for a fresh install: an empty root group.
#[wasm_bindgen]
pub fn default_document(root_name: &str) -> Result<String, JsValue> {
    encode_string(&RuleTree::new(root_name)).map_err(|e| JsValue::from_str(&e.to_string()))
}

/// Upsert `node_json` at `path_json` (an array of keys) in the document.
/// Returns the updated document; the input is never modified.
///
/// Nodes of unknown type are rejected, and no document is returned while
/// one remains anywhere in the tree.
#[wasm_bindgen]
pub fn upsert_at(document_json: &str, path_json: &str, node_json: &str) -> Result<String, JsValue> {
    upsert_document(document_json, path_json, node_json).map_err(|e| JsValue::from_str(&e))
}

/// Delete the node at `path_json` from the document. Returns the updated
/// document, unless nodes of unknown type remain in it.
#[wasm_bindgen]
pub fn delete_at(document_json: &str, path_json: &str) -> Result<String, JsValue> {
    delete_document(document_json, path_json).map_err(|e| JsValue::from_str(&e))
}

fn load_path(document_json: &str, path_json: &str) -> Result<(RuleTree, Vec<String>), String> {
    let tree = decode_str(document_json).map_err(|e| e.to_string())?;
    let path: Vec<String> =
        serde_json::from_str(path_json).map_err(|e| format!("Invalid pathname: {}", e))?;
    Ok((tree, path))
}

fn upsert_document(document_json: &str, path_json: &str, node_json: &str) -> Result<String, String> {
    let (mut tree, path) = load_path(document_json, path_json)?;
    let raw: RawNode = serde_json::from_str(node_json).map_err(|e| format!("Invalid node: {}", e))?;
    let node = Node::try_from(raw).map_err(|e| e.to_string())?;
    if let Node::Unknown(unknown) = &node {
        return Err(format!("Unknown rule type `{}`", unknown.raw.kind));
    }
    tree.upsert_node_from_pathname(&path, node)
        .map_err(|e| e.to_string())?;
    encode_checked(&tree)
}

fn delete_document(document_json: &str, path_json: &str) -> Result<String, String> {
    let (mut tree, path) = load_path(document_json, path_json)?;
    tree.delete_node_from_pathname(&path)
        .map_err(|e| e.to_string())?;
    encode_checked(&tree)
}

/// Encode an edited tree for saving, refusing while unknown nodes remain.
fn encode_checked(tree: &RuleTree) -> Result<String, String> {
    let unknown = tree.unknown_nodes();
    if !unknown.is_empty() {
        let paths = unknown.iter().map(|path| path.join("/")).collect::<Vec<_>>();
        return Err(format!(
            "Refusing to save while rules of unknown type remain at: {}",
            paths.join(", ")
        ));
    }
    encode_string(tree).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "schemaVersion": 2,
        "root": {
            "type": "Group", "name": "All pages", "isRoot": true,
            "startTime": null, "endTime": null,
            "children": [
                { "type": "Group", "name": "social", "startTime": null, "endTime": null, "children": [
                    { "type": "UrlRule", "name": "fb", "url": "facebook.com", "startTime": null, "endTime": null }
                ]},
                { "type": "WordRule", "word": "casino", "startTime": "09:00", "endTime": "17:00" }
            ]
        }
    }"#;

    const PAGE: &str = "chrome-extension://abc/blocked.html";

    const WITH_UNKNOWN: &str = r#"{
        "schemaVersion": 2,
        "root": {
            "type": "Group", "name": "All pages", "isRoot": true, "children": [
                { "type": "ByRegex", "name": "re" },
                { "type": "UrlRule", "url": "a.com" }
            ]
        }
    }"#;

    fn state() -> MonitorState {
        MonitorState::new(decode_str(DOC).unwrap())
    }

    #[test]
    fn test_check_blocks_and_reports_path() {
        let state = state();
        let result = state.check("https://www.facebook.com/feed", PAGE, None);
        assert!(result.is_blocked());
        assert_eq!(result.rule_path, Some(vec!["social".to_string(), "fb".to_string()]));
        assert!(!state.check("https://example.org", PAGE, None).is_blocked());
    }

    #[test]
    fn test_check_skips_only_the_blocked_page() {
        let state = state();
        assert!(!state.check(PAGE, PAGE, None).is_blocked());
        assert!(!state.check("chrome-extension://abc/blocked.html?from=fb", PAGE, None).is_blocked());
        assert!(state.check("https://facebook.com/blocked.html", PAGE, None).is_blocked());
        assert!(state.check("https://facebook.com/blocked.html", "/blocked.html", None).is_blocked());
    }

    #[test]
    fn test_check_honors_schedule() {
        let state = state();
        let noon = NaiveTime::from_hms_opt(12, 0, 0);
        let night = NaiveTime::from_hms_opt(22, 0, 0);
        assert!(state.check("https://casino.example", PAGE, noon).is_blocked());
        assert!(!state.check("https://casino.example", PAGE, night).is_blocked());
    }

    #[test]
    fn test_refresh_replaces_snapshot() {
        let state = state();
        state.cache.refresh(RuleTree::default());
        assert!(!state.check("https://facebook.com", PAGE, None).is_blocked());
        assert_eq!(state.cache.generation(), 1);
    }

    #[test]
    fn test_upsert_and_delete_documents() {
        let node = r#"{ "type": "UrlRule", "url": "x.com" }"#;
        let updated = upsert_document(DOC, r#"["social", "x.com"]"#, node).unwrap();
        let tree = decode_str(&updated).unwrap();
        assert!(tree.get_node_from_pathname(&["social", "x.com"]).is_ok());

        let updated = delete_document(&updated, r#"["social"]"#).unwrap();
        let tree = decode_str(&updated).unwrap();
        assert!(tree.get_node_from_pathname(&["social"]).is_err());
        assert_eq!(tree.root().children().len(), 1);
    }

    #[test]
    fn test_editor_helpers_report_errors() {
        assert!(delete_document(DOC, r#"["missing"]"#).unwrap_err().contains("missing"));
        assert!(delete_document(DOC, "[]").is_err());
        assert!(upsert_document(DOC, r#"["a"]"#, r#"{ "type": "UrlRule" }"#).is_err());
        assert!(upsert_document(DOC, "not json", "{}").unwrap_err().starts_with("Invalid pathname"));
    }

    #[test]
    fn test_upsert_rejects_unknown_kind() {
        let err = upsert_document(DOC, r#"["re"]"#, r#"{ "type": "ByRegex", "name": "re" }"#).unwrap_err();
        assert!(err.contains("ByRegex"));
    }

    #[test]
    fn test_document_with_unknown_nodes_not_returned() {
        let err = upsert_document(WITH_UNKNOWN, r#"["b.com"]"#, r#"{ "type": "UrlRule", "url": "b.com" }"#)
            .unwrap_err();
        assert!(err.starts_with("Refusing to save"));
        assert!(err.contains("re"));
        assert!(delete_document(WITH_UNKNOWN, r#"["a.com"]"#).is_err());
    }

    #[test]
    fn test_unknown_node_can_be_deleted_or_replaced() {
        let deleted = decode_str(&delete_document(WITH_UNKNOWN, r#"["re"]"#).unwrap()).unwrap();
        assert!(deleted.unknown_nodes().is_empty());
        assert_eq!(deleted.rule_count(), 1);

        let node = r#"{ "type": "UrlRule", "name": "re", "url": "regex.example" }"#;
        let replaced = decode_str(&upsert_document(WITH_UNKNOWN, r#"["re"]"#, node).unwrap()).unwrap();
        assert!(replaced.unknown_nodes().is_empty());
        assert_eq!(replaced.get_node_from_pathname(&["re"]).unwrap().kind_code(), "UrlRule");
    }

    #[cfg(target_arch = "wasm32")]
    mod bindings {
        use super::*;
        use wasm_bindgen_test::wasm_bindgen_test;

        fn get(value: &JsValue, key: &str) -> JsValue {
            js_sys::Reflect::get(value, &JsValue::from_str(key)).unwrap()
        }

        // Single test: the monitor state is process-wide and set once
        #[wasm_bindgen_test]
        fn test_check_navigation_through_bindings() {
            assert_eq!(get(&get_tree_info(), "initialized").as_bool(), Some(false));
            let before = check_navigation("https://www.facebook.com/feed", PAGE, false);
            assert_eq!(get(&before, "blocked").as_bool(), Some(false));

            init(DOC).unwrap();
            assert!(init(DOC).is_err());
            let info = get_tree_info();
            assert_eq!(get(&info, "initialized").as_bool(), Some(true));
            assert_eq!(get(&info, "rules").as_f64(), Some(2.0));

            let result = check_navigation("https://www.facebook.com/blocked.html", PAGE, false);
            assert_eq!(get(&result, "blocked").as_bool(), Some(true));
            let path = js_sys::Array::from(&get(&result, "rulePath"));
            assert_eq!(path.length(), 2);
            assert_eq!(path.get(1).as_string().as_deref(), Some("fb"));

            let result = check_navigation(PAGE, PAGE, false);
            assert_eq!(get(&result, "blocked").as_bool(), Some(false));

            assert!(refresh(WITH_UNKNOWN).is_ok());
            assert!(refresh("{}").is_err());
            assert_eq!(get(&get_tree_info(), "rules").as_f64(), Some(2.0));
            set_unknown_kind_policy("fail-closed").unwrap();
            let result = check_navigation("https://example.org", PAGE, false);
            assert_eq!(get(&result, "blocked").as_bool(), Some(true));
        }
    }
}
