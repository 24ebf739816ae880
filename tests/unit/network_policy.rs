//! Unit tests for the migration network policy

use cloudsql_migrator::instance::FINALIZE_LABEL;
use cloudsql_migrator::netpol::{build_network_policy, network_policy_name, MIGRATION_NAME_LABEL};
use cloudsql_migrator::resolved::Instance;

fn instance(name: &str, ip: &str) -> Instance {
    Instance {
        name: name.to_string(),
        primary_ip: ip.to_string(),
        ..Default::default()
    }
}

#[test]
fn policy_name_and_namespace() {
    let source = instance("myapp", "34.1.1.1");
    let target = instance("myapp-v2", "34.2.2.2");
    let policy = build_network_policy("myteam", "myapp", &source, &target);

    assert_eq!(
        policy.metadata.name.as_deref(),
        Some("migration-myapp-myapp-v2")
    );
    assert_eq!(policy.metadata.namespace.as_deref(), Some("myteam"));
}

#[test]
fn labels_identify_owner_team_and_teardown_phase() {
    let source = instance("myapp", "34.1.1.1");
    let target = instance("myapp-v2", "34.2.2.2");
    let policy = build_network_policy("myteam", "myapp", &source, &target);

    let labels = policy.metadata.labels.unwrap();
    assert_eq!(labels.get("app"), Some(&"myapp".to_string()));
    assert_eq!(labels.get("team"), Some(&"myteam".to_string()));
    assert_eq!(labels.get(FINALIZE_LABEL), Some(&"myapp".to_string()));
}

#[test]
fn selector_matches_the_migration_job_pod_label() {
    let source = instance("myapp", "34.1.1.1");
    let target = instance("myapp-v2", "34.2.2.2");
    let policy = build_network_policy("myteam", "myapp", &source, &target);

    let selector = policy
        .spec
        .unwrap()
        .pod_selector
        .match_labels
        .unwrap();
    assert_eq!(
        selector.get(MIGRATION_NAME_LABEL),
        Some(&network_policy_name("myapp", "myapp-v2"))
    );
}

#[test]
fn egress_covers_both_instances_and_the_full_echo_service_set() {
    let source = instance("myapp", "34.1.1.1");
    let target = instance("myapp-v2", "34.2.2.2");
    let policy = build_network_policy("myteam", "myapp", &source, &target);

    let egress = policy.spec.unwrap().egress.unwrap();
    assert_eq!(egress.len(), 1);

    let cidrs: Vec<String> = egress[0]
        .to
        .as_ref()
        .unwrap()
        .iter()
        .map(|peer| peer.ip_block.as_ref().unwrap().cidr.clone())
        .collect();

    assert_eq!(
        cidrs,
        vec![
            "34.1.1.1/32",
            "34.2.2.2/32",
            "104.26.13.205/32",
            "104.26.12.205/32",
            "172.67.74.152/32",
        ]
    );
}
