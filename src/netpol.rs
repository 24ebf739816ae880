//! Network policy for the migration worker
//!
//! When running as a cluster job, an egress-only policy lets the worker
//! reach both instances and the outgoing-IP echo service. Skipped when
//! running outside the cluster.

use std::collections::BTreeMap;

use k8s_openapi::api::networking::v1::{
    IPBlock, NetworkPolicy, NetworkPolicyEgressRule, NetworkPolicyPeer, NetworkPolicySpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::{Api, PostParams};
use kube::core::ObjectMeta;
use thiserror::Error;
use tracing::info;

use crate::instance::FINALIZE_LABEL;
use crate::manager::Manager;
use crate::resolved::Instance;

/// Set only when the process runs inside a pod
const IN_CLUSTER_ENV: &str = "KUBERNETES_SERVICE_HOST";

/// Label the migration job's pods carry; the policy selects on it
pub const MIGRATION_NAME_LABEL: &str = "migrator.nais.io/migration-name";

/// Anycast addresses of the outgoing-IP echo service
const IP_ECHO_SERVICE_IPS: [&str; 3] = ["104.26.13.205", "104.26.12.205", "172.67.74.152"];

#[derive(Error, Debug)]
pub enum NetpolError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

pub type Result<T, E = NetpolError> = std::result::Result<T, E>;

/// `migration-<appName>-<targetName>`, used both as the policy name and
/// as the pod-selector label value.
pub fn network_policy_name(app_name: &str, target_name: &str) -> String {
    format!("migration-{app_name}-{target_name}")
}

/// Build the egress-only policy permitting traffic to both instances and
/// the echo service.
pub fn build_network_policy(
    namespace: &str,
    app_name: &str,
    source: &Instance,
    target: &Instance,
) -> NetworkPolicy {
    let name = network_policy_name(app_name, &target.name);

    let mut peers: Vec<NetworkPolicyPeer> = vec![
        ip_block(&source.primary_ip),
        ip_block(&target.primary_ip),
    ];
    peers.extend(IP_ECHO_SERVICE_IPS.iter().map(|ip| ip_block(ip)));

    NetworkPolicy {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([
                ("app".to_string(), app_name.to_string()),
                ("team".to_string(), namespace.to_string()),
                (FINALIZE_LABEL.to_string(), app_name.to_string()),
            ])),
            ..Default::default()
        },
        spec: Some(NetworkPolicySpec {
            pod_selector: LabelSelector {
                match_labels: Some(BTreeMap::from([(
                    MIGRATION_NAME_LABEL.to_string(),
                    name,
                )])),
                ..Default::default()
            },
            egress: Some(vec![NetworkPolicyEgressRule {
                to: Some(peers),
                ports: None,
            }]),
            policy_types: Some(vec!["Egress".to_string()]),
            ..Default::default()
        }),
    }
}

fn ip_block(ip: &str) -> NetworkPolicyPeer {
    NetworkPolicyPeer {
        ip_block: Some(IPBlock {
            cidr: format!("{ip}/32"),
            except: None,
        }),
        ..Default::default()
    }
}

/// Create the policy, or update it in place when it already exists. A
/// no-op outside the cluster.
pub async fn create_network_policy(
    mgr: &Manager,
    source: &Instance,
    target: &Instance,
) -> Result<()> {
    if std::env::var(IN_CLUSTER_ENV).is_err() {
        info!("not running in kubernetes, skipping network policy creation");
        return Ok(());
    }

    let policy = build_network_policy(&mgr.namespace, &mgr.app_name, source, target);
    let name = policy
        .metadata
        .name
        .clone()
        .unwrap_or_default();

    let policies: Api<NetworkPolicy> = Api::namespaced(mgr.kube.clone(), &mgr.namespace);

    info!(name = %name, "creating network policy");
    match policies.create(&PostParams::default(), &policy).await {
        Ok(_) => Ok(()),
        Err(err) if crate::k8s::is_already_exists(&err) => {
            info!(name = %name, "network policy already exists, updating");
            // Carry the server's resourceVersion into the replacement
            let existing = policies.get(&name).await?;
            let mut replacement = policy;
            replacement.metadata.resource_version = existing.metadata.resource_version;
            policies
                .replace(&name, &PostParams::default(), &replacement)
                .await?;
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

/// Delete every network policy matching the label selector.
pub async fn delete_labeled_network_policies(mgr: &Manager, selector: &str) -> Result<()> {
    use kube::api::{DeleteParams, ListParams};

    let policies: Api<NetworkPolicy> = Api::namespaced(mgr.kube.clone(), &mgr.namespace);
    policies
        .delete_collection(
            &DeleteParams::default(),
            &ListParams::default().labels(selector),
        )
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(name: &str, ip: &str) -> Instance {
        Instance {
            name: name.to_string(),
            primary_ip: ip.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn policy_name_combines_app_and_target() {
        assert_eq!(
            network_policy_name("myapp", "myapp-v2"),
            "migration-myapp-myapp-v2"
        );
    }

    #[test]
    fn policy_is_egress_only_and_selects_the_migration_pod() {
        let source = instance("myapp", "10.0.0.1");
        let target = instance("myapp-v2", "10.0.0.2");
        let policy = build_network_policy("myteam", "myapp", &source, &target);

        let spec = policy.spec.unwrap();
        assert_eq!(spec.policy_types, Some(vec!["Egress".to_string()]));
        assert!(spec.ingress.is_none());

        let selector = spec.pod_selector.match_labels.unwrap();
        assert_eq!(
            selector.get(MIGRATION_NAME_LABEL),
            Some(&"migration-myapp-myapp-v2".to_string())
        );
    }

    #[test]
    fn policy_allows_both_instances_and_the_echo_service() {
        let source = instance("myapp", "10.0.0.1");
        let target = instance("myapp-v2", "10.0.0.2");
        let policy = build_network_policy("myteam", "myapp", &source, &target);

        let egress = policy.spec.unwrap().egress.unwrap();
        let cidrs: Vec<String> = egress[0]
            .to
            .as_ref()
            .unwrap()
            .iter()
            .map(|peer| peer.ip_block.as_ref().unwrap().cidr.clone())
            .collect();

        assert_eq!(cidrs.len(), 5);
        assert!(cidrs.contains(&"10.0.0.1/32".to_string()));
        assert!(cidrs.contains(&"10.0.0.2/32".to_string()));
        assert!(cidrs.contains(&"104.26.13.205/32".to_string()));
    }

    #[test]
    fn policy_carries_the_finalize_label() {
        let source = instance("myapp", "10.0.0.1");
        let target = instance("myapp-v2", "10.0.0.2");
        let policy = build_network_policy("myteam", "myapp", &source, &target);

        let labels = policy.metadata.labels.unwrap();
        assert_eq!(labels.get(FINALIZE_LABEL), Some(&"myapp".to_string()));
    }
}
