//! End-to-end tests for admission handling
//!
//! Reviews are fed in as raw JSON bodies, the way the API server sends them,
//! and the decoded patch is checked against the expected rewrite.

#[cfg(test)]
mod handler_tests {
    use crate::admission::{
        AdmissionHandler, AdmissionOutcome, PatchType, DEFAULT_API_VERSION, REVIEW_KIND,
    };
    use crate::namespace::NamespaceFilter;
    use crate::transform::OvercommitRatios;
    use serde_json::{json, Value};

    fn handler(cpu: f64, memory: f64, namespaces: &[&str]) -> AdmissionHandler {
        let allowlist = namespaces.iter().map(|ns| ns.to_string()).collect();
        AdmissionHandler::new(
            OvercommitRatios::new(cpu, memory),
            NamespaceFilter::new(allowlist),
        )
    }

    fn review(uid: &str, namespace: &str, containers: Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": uid,
                "namespace": namespace,
                "operation": "CREATE",
                "object": {
                    "apiVersion": "v1",
                    "kind": "Pod",
                    "metadata": {"name": "web-0", "namespace": namespace},
                    "spec": {"containers": containers}
                }
            }
        }))
        .unwrap()
    }

    fn decoded_patch(body: &[u8], handler: &AdmissionHandler) -> Option<Value> {
        let response = handler.handle(body);
        assert!(response.response.allowed);
        response
            .patch_bytes()
            .map(|bytes| serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn test_rewrites_requests_with_json_patch() {
        let handler = handler(2.0, 2.0, &[]);
        let body = review(
            "uid-1",
            "prod",
            json!([{"name": "app", "resources": {"requests": {"cpu": "1", "memory": "512Mi"}}}]),
        );

        let response = handler.handle(&body);
        assert_eq!(response.api_version, DEFAULT_API_VERSION);
        assert_eq!(response.kind, REVIEW_KIND);
        assert_eq!(response.response.uid, "uid-1");
        assert_eq!(response.response.patch_type, Some(PatchType::JsonPatch));

        let patch: Value = serde_json::from_slice(&response.patch_bytes().unwrap()).unwrap();
        assert_eq!(
            patch,
            json!([{
                "op": "add",
                "path": "/spec/containers/0/resources/requests",
                "value": {"cpu": "500m", "memory": "256Mi"}
            }])
        );
    }

    #[test]
    fn test_garbage_body_is_allowed() {
        let handler = handler(2.0, 2.0, &[]);
        let response = handler.handle(b"{not json");

        assert!(response.response.allowed);
        assert_eq!(response.response.uid, "");
        assert!(response.response.patch.is_none());
        assert!(response.response.patch_type.is_none());
    }

    #[test]
    fn test_missing_request_is_allowed() {
        let handler = handler(2.0, 2.0, &[]);
        let response = handler.handle(br#"{"apiVersion": "admission.k8s.io/v1"}"#);

        assert!(response.response.allowed);
        assert!(response.response.patch.is_none());
    }

    #[test]
    fn test_undecodable_pod_keeps_uid() {
        let handler = handler(2.0, 2.0, &[]);
        let body = serde_json::to_vec(&json!({
            "request": {
                "uid": "uid-bad-pod",
                "object": {"apiVersion": "v1", "kind": "Pod", "spec": {"containers": "nope"}}
            }
        }))
        .unwrap();

        let response = handler.handle(&body);
        assert!(response.response.allowed);
        assert_eq!(response.response.uid, "uid-bad-pod");
        assert!(response.response.patch.is_none());
    }

    #[test]
    fn test_missing_object_is_allowed() {
        let handler = handler(2.0, 2.0, &[]);
        let response = handler.handle(br#"{"request": {"uid": "uid-empty"}}"#);

        assert!(response.response.allowed);
        assert_eq!(response.response.uid, "uid-empty");
        assert!(response.response.patch.is_none());
    }

    #[test]
    fn test_namespace_outside_allowlist_is_not_patched() {
        let handler = handler(2.0, 2.0, &["prod"]);
        let body = review(
            "uid-ks",
            "kube-system",
            json!([{"name": "dns", "resources": {"requests": {"cpu": "4", "memory": "4Gi"}}}]),
        );

        assert_eq!(decoded_patch(&body, &handler), None);
    }

    #[test]
    fn test_namespace_inside_allowlist_is_patched() {
        let handler = handler(2.0, 2.0, &["staging", "prod"]);
        let body = review(
            "uid-prod",
            "prod",
            json!([{"name": "app", "resources": {"requests": {"cpu": "2"}}}]),
        );

        assert!(decoded_patch(&body, &handler).is_some());
    }

    #[test]
    fn test_request_namespace_is_used_when_pod_has_none() {
        let handler = handler(2.0, 2.0, &["prod"]);
        let body = serde_json::to_vec(&json!({
            "request": {
                "uid": "uid-gen",
                "namespace": "prod",
                "object": {
                    "apiVersion": "v1",
                    "kind": "Pod",
                    "metadata": {"generateName": "web-"},
                    "spec": {"containers": [
                        {"name": "app", "resources": {"requests": {"cpu": "2"}}}
                    ]}
                }
            }
        }))
        .unwrap();

        let patch = decoded_patch(&body, &handler).unwrap();
        assert_eq!(patch[0]["value"], json!({"cpu": "1"}));
    }

    #[test]
    fn test_only_changed_container_appears() {
        let handler = handler(2.0, 2.0, &[]);
        let body = review(
            "uid-multi",
            "default",
            json!([
                {"name": "init-free"},
                {"name": "tiny", "resources": {"requests": {"cpu": "50m", "memory": "2Mi"}}},
                {"name": "app", "resources": {"requests": {"memory": "1Gi"}}}
            ]),
        );

        let patch = decoded_patch(&body, &handler).unwrap();
        let ops = patch.as_array().unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0]["path"], "/spec/containers/1/resources/requests");
        assert_eq!(ops[0]["value"], json!({"cpu": "25m", "memory": "1Mi"}));
        assert_eq!(ops[1]["path"], "/spec/containers/2/resources/requests");
        assert_eq!(ops[1]["value"], json!({"memory": "512Mi"}));
    }

    #[test]
    fn test_floors_leave_requests_unchanged() {
        let handler = handler(2.0, 2.0, &[]);
        let body = review(
            "uid-floor",
            "default",
            json!([{"name": "app", "resources": {"requests": {"cpu": "100m", "memory": "4Mi"}}}]),
        );

        let response = handler.handle(&body);
        assert_eq!(response.response.uid, "uid-floor");
        assert!(response.response.patch.is_none());
    }

    #[test]
    fn test_unit_ratios_never_patch() {
        let handler = handler(1.0, 1.0, &[]);
        let body = review(
            "uid-unit",
            "default",
            json!([{"name": "app", "resources": {"requests": {"cpu": "8", "memory": "16Gi"}}}]),
        );

        assert_eq!(decoded_patch(&body, &handler), None);
    }

    #[test]
    fn test_pod_without_spec_is_unchanged() {
        let handler = handler(2.0, 2.0, &[]);
        let body = serde_json::to_vec(&json!({
            "request": {
                "uid": "uid-nospec",
                "object": {"apiVersion": "v1", "kind": "Pod", "metadata": {"name": "x"}}
            }
        }))
        .unwrap();

        let response = handler.handle(&body);
        assert_eq!(response.response.uid, "uid-nospec");
        assert!(response.response.patch.is_none());
    }

    #[test]
    fn test_echoes_request_api_version() {
        let handler = handler(2.0, 2.0, &[]);
        let body = br#"{"apiVersion": "admission.k8s.io/v1beta1", "request": {"uid": "u"}}"#;

        let response = handler.handle(body);
        assert_eq!(response.api_version, "admission.k8s.io/v1beta1");
        assert_eq!(response.kind, REVIEW_KIND);
    }

    #[test]
    fn test_unparseable_quantity_skips_only_that_container() {
        let handler = handler(2.0, 2.0, &[]);
        let body = review(
            "uid-bad-q",
            "default",
            json!([
                {"name": "broken", "resources": {"requests": {"cpu": "two"}}},
                {"name": "app", "resources": {"requests": {"cpu": "2"}}}
            ]),
        );

        let patch = decoded_patch(&body, &handler).unwrap();
        let ops = patch.as_array().unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0]["path"], "/spec/containers/1/resources/requests");
    }

    #[test]
    fn test_answer_reports_outcome() {
        let handler = handler(2.0, 2.0, &["prod"]);
        let resized = json!([{"name": "app", "resources": {"requests": {"cpu": "2"}}}]);
        let floored = json!([{"name": "app", "resources": {"requests": {"cpu": "100m"}}}]);

        let cases = [
            (review("a", "prod", resized.clone()), AdmissionOutcome::Patched),
            (review("b", "prod", floored), AdmissionOutcome::Unchanged),
            (review("c", "kube-system", resized), AdmissionOutcome::Filtered),
            (b"{not json".to_vec(), AdmissionOutcome::Malformed),
        ];
        for (body, expected) in cases {
            let (response, outcome) = handler.answer(&body);
            assert!(response.response.allowed);
            assert_eq!(outcome, expected);
        }
    }
}
