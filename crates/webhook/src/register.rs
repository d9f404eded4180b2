//! MutatingWebhookConfiguration registration

use anyhow::{bail, Context, Result};
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhook, MutatingWebhookConfiguration, RuleWithOperations, ServiceReference,
    WebhookClientConfig,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::ByteString;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use tracing::info;

pub const CONFIGURATION_NAME: &str = "pod-mutating-webhook";
pub const WEBHOOK_NAME: &str = "pod-mutator.overcommit.dev";
const FIELD_MANAGER: &str = "pod-overcommit-webhook";
const MUTATE_PATH: &str = "/mutate";

/// Build the configuration pointing the API server at `<namespace>/<service>`
pub fn webhook_configuration(
    service: &str,
    namespace: &str,
    ca_bundle: &[u8],
) -> Result<MutatingWebhookConfiguration> {
    if ca_bundle.is_empty() {
        bail!("CA bundle is empty");
    }

    let webhook = MutatingWebhook {
        name: WEBHOOK_NAME.to_string(),
        admission_review_versions: vec!["v1".to_string()],
        side_effects: "None".to_string(),
        failure_policy: Some("Ignore".to_string()),
        rules: Some(vec![RuleWithOperations {
            operations: Some(vec!["CREATE".to_string()]),
            api_groups: Some(vec![String::new()]),
            api_versions: Some(vec!["v1".to_string()]),
            resources: Some(vec!["pods".to_string()]),
            ..Default::default()
        }]),
        client_config: WebhookClientConfig {
            service: Some(ServiceReference {
                name: service.to_string(),
                namespace: namespace.to_string(),
                path: Some(MUTATE_PATH.to_string()),
                ..Default::default()
            }),
            ca_bundle: Some(ByteString(ca_bundle.to_vec())),
            ..Default::default()
        },
        // Empty selector matches every namespace; scoping happens in the handler
        namespace_selector: Some(LabelSelector::default()),
        ..Default::default()
    };

    Ok(MutatingWebhookConfiguration {
        metadata: ObjectMeta {
            name: Some(CONFIGURATION_NAME.to_string()),
            ..Default::default()
        },
        webhooks: Some(vec![webhook]),
    })
}

/// Create or update the webhook configuration with server-side apply
pub async fn register(service: &str, namespace: &str, ca_bundle: &[u8]) -> Result<()> {
    let configuration = webhook_configuration(service, namespace, ca_bundle)?;

    info!(
        configuration = CONFIGURATION_NAME,
        webhook = WEBHOOK_NAME,
        service = %service,
        namespace = %namespace,
        path = MUTATE_PATH,
        ca_bundle_bytes = ca_bundle.len(),
        "Registering mutating webhook"
    );

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let api: Api<MutatingWebhookConfiguration> = Api::all(client);

    api.patch(
        CONFIGURATION_NAME,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(&configuration),
    )
    .await
    .with_context(|| format!("Failed to apply MutatingWebhookConfiguration {CONFIGURATION_NAME}"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_shape() {
        let configuration =
            webhook_configuration("pod-manager", "overcommit", b"-----BEGIN CERTIFICATE-----")
                .unwrap();

        assert_eq!(configuration.metadata.name.as_deref(), Some(CONFIGURATION_NAME));
        let webhooks = configuration.webhooks.unwrap();
        assert_eq!(webhooks.len(), 1);

        let webhook = &webhooks[0];
        assert_eq!(webhook.name, WEBHOOK_NAME);
        assert_eq!(webhook.admission_review_versions, vec!["v1"]);
        assert_eq!(webhook.side_effects, "None");
        assert_eq!(webhook.failure_policy.as_deref(), Some("Ignore"));
        assert_eq!(webhook.namespace_selector, Some(LabelSelector::default()));

        let rule = &webhook.rules.as_ref().unwrap()[0];
        assert_eq!(rule.operations, Some(vec!["CREATE".to_string()]));
        assert_eq!(rule.resources, Some(vec!["pods".to_string()]));
        assert_eq!(rule.api_groups, Some(vec![String::new()]));

        let service = webhook.client_config.service.as_ref().unwrap();
        assert_eq!(service.name, "pod-manager");
        assert_eq!(service.namespace, "overcommit");
        assert_eq!(service.path.as_deref(), Some("/mutate"));
        assert_eq!(
            webhook.client_config.ca_bundle,
            Some(ByteString(b"-----BEGIN CERTIFICATE-----".to_vec()))
        );
    }

    #[test]
    fn test_serializes_with_type_meta() {
        let configuration = webhook_configuration("svc", "ns", b"ca").unwrap();
        let json = serde_json::to_value(&configuration).unwrap();

        assert_eq!(json["apiVersion"], "admissionregistration.k8s.io/v1");
        assert_eq!(json["kind"], "MutatingWebhookConfiguration");
        assert_eq!(json["webhooks"][0]["clientConfig"]["caBundle"], "Y2E=");
    }

    #[test]
    fn test_empty_ca_bundle_is_rejected() {
        assert!(webhook_configuration("svc", "ns", b"").is_err());
    }
}
