// Test code is allowed to panic on failure
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

//! Property-based tests for the pure transformation logic

use kube::core::ObjectMeta;
use proptest::prelude::*;

use cloudsql_migrator::config::InstanceSettings;
use cloudsql_migrator::crd::{
    Application, ApplicationSpec, AuthorizedNetwork, CloudSqlInstance, DatabaseFlag, GcpSpec,
    InstanceFlag,
};
use cloudsql_migrator::instance::{
    append_auth_net_if_not_exists, define_instance, strip_pgaudit_flags,
};
use cloudsql_migrator::resolved::migration_name;

fn name_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,78}"
}

fn optional_string() -> impl Strategy<Value = Option<String>> {
    proptest::option::of("[a-z0-9-]{1,20}")
}

fn flag_strategy() -> impl Strategy<Value = DatabaseFlag> {
    (
        prop_oneof![
            Just("cloudsql.enable_pgaudit".to_string()),
            Just("pgaudit.log".to_string()),
            Just("pgaudit.role".to_string()),
            Just("cloudsql.enable_pglogical".to_string()),
            Just("max_connections".to_string()),
            Just("work_mem".to_string()),
            "[a-z_.]{1,30}",
        ],
        "[a-z0-9]{1,8}",
    )
        .prop_map(|(name, value)| DatabaseFlag { name, value })
}

fn application(instance: CloudSqlInstance) -> Application {
    Application {
        metadata: ObjectMeta {
            name: Some("app".to_string()),
            namespace: Some("team".to_string()),
            ..Default::default()
        },
        spec: ApplicationSpec {
            image: "image".to_string(),
            replicas: None,
            gcp: Some(GcpSpec {
                sql_instances: vec![instance],
                ..Default::default()
            }),
            rest: Default::default(),
        },
        status: None,
    }
}

fn instance_strategy() -> impl Strategy<Value = CloudSqlInstance> {
    (
        name_strategy(),
        optional_string(),
        optional_string(),
        proptest::option::of(1i64..=4096),
        proptest::option::of(any::<bool>()),
        any::<bool>(),
    )
        .prop_map(|(name, kind, tier, disk_size, disk_autoresize, cascading_delete)| {
            CloudSqlInstance {
                name: Some(name),
                kind,
                tier,
                disk_size,
                disk_autoresize,
                cascading_delete,
                ..Default::default()
            }
        })
}

fn settings_strategy() -> impl Strategy<Value = InstanceSettings> {
    (
        name_strategy(),
        optional_string(),
        optional_string(),
        proptest::option::of(1i64..=4096),
        proptest::option::of(any::<bool>()),
    )
        .prop_map(|(name, kind, tier, disk_size, disk_autoresize)| InstanceSettings {
            name,
            kind,
            tier,
            disk_size,
            disk_autoresize,
        })
}

proptest! {
    /// The defined instance is named by the settings and never cascades,
    /// and every unset override keeps the source value.
    #[test]
    fn define_instance_respects_overrides(
        source in instance_strategy(),
        settings in settings_strategy(),
    ) {
        let app = application(source.clone());
        let target = define_instance(&settings, &app).unwrap();

        prop_assert_eq!(target.name.as_deref(), Some(settings.name.as_str()));
        prop_assert!(!target.cascading_delete);

        match &settings.kind {
            Some(kind) => prop_assert_eq!(target.kind.as_ref(), Some(kind)),
            None => prop_assert_eq!(&target.kind, &source.kind),
        }
        match &settings.tier {
            Some(tier) => prop_assert_eq!(target.tier.as_ref(), Some(tier)),
            None => prop_assert_eq!(&target.tier, &source.tier),
        }
    }

    /// Enabling disk autoresize always zeroes the disk size.
    #[test]
    fn autoresize_zeroes_disk_size(
        source in instance_strategy(),
        mut settings in settings_strategy(),
    ) {
        settings.disk_autoresize = Some(true);
        let app = application(source);
        let target = define_instance(&settings, &app).unwrap();

        prop_assert_eq!(target.disk_autoresize, Some(true));
        prop_assert_eq!(target.disk_size, None);
    }

    /// Stripping removes exactly the pgaudit flags, reports whether any
    /// were present, and is idempotent.
    #[test]
    fn strip_pgaudit_is_exact_and_idempotent(
        mut flags in proptest::collection::vec(flag_strategy(), 0..12),
    ) {
        let had_pgaudit = flags.iter().any(|f| {
            f.name == "cloudsql.enable_pgaudit" || f.name.starts_with("pgaudit.")
        });
        let kept: Vec<String> = flags
            .iter()
            .filter(|f| f.name != "cloudsql.enable_pgaudit" && !f.name.starts_with("pgaudit."))
            .map(|f| f.name.clone())
            .collect();

        let removed = strip_pgaudit_flags(&mut flags);
        prop_assert_eq!(removed, had_pgaudit);

        let names: Vec<String> = flags.iter().map(|f| f.name.clone()).collect();
        prop_assert_eq!(names, kept);

        prop_assert!(!strip_pgaudit_flags(&mut flags));
    }

    /// Appending is idempotent on the CIDR value.
    #[test]
    fn append_auth_net_is_idempotent(
        existing in proptest::collection::vec("[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,3}/32", 0..6),
        candidate in "[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,3}/32",
    ) {
        let mut networks: Vec<AuthorizedNetwork> = existing
            .iter()
            .map(|value| AuthorizedNetwork { name: None, value: value.clone() })
            .collect();

        let entry = AuthorizedNetwork {
            name: Some("candidate".to_string()),
            value: candidate.clone(),
        };

        append_auth_net_if_not_exists(&mut networks, entry.clone());
        let after_first = networks.len();
        append_auth_net_if_not_exists(&mut networks, entry);
        prop_assert_eq!(networks.len(), after_first);

        let occurrences = networks.iter().filter(|n| n.value == candidate).count();
        prop_assert_eq!(occurrences, 1);
    }

    /// Migration names are deterministic and bounded.
    #[test]
    fn migration_name_is_deterministic_and_bounded(
        source in name_strategy(),
        target in name_strategy(),
    ) {
        let a = migration_name(&source, &target);
        let b = migration_name(&source, &target);
        prop_assert_eq!(&a, &b);
        prop_assert!(a.len() <= 60);
    }

    /// Distinct input pairs produce distinct migration names.
    #[test]
    fn migration_name_separates_distinct_pairs(
        source in name_strategy(),
        target_a in name_strategy(),
        target_b in name_strategy(),
    ) {
        prop_assume!(target_a != target_b);
        // Joining with '-' is ambiguous in principle; the pairs produced
        // here differ in the target component only
        let a = migration_name(&source, &target_a);
        let b = migration_name(&source, &target_b);
        prop_assert_ne!(a, b);
    }
}

/// App-level flag stripping mirrors the declarative-object stripping.
#[test]
fn app_flag_stripping_matches() {
    use cloudsql_migrator::instance::strip_pgaudit_app_flags;

    let mut flags = vec![
        InstanceFlag {
            name: "pgaudit.log".to_string(),
            value: "all".to_string(),
        },
        InstanceFlag {
            name: "max_connections".to_string(),
            value: "100".to_string(),
        },
    ];
    assert!(strip_pgaudit_app_flags(&mut flags));
    assert_eq!(flags.len(), 1);
    assert_eq!(flags[0].name, "max_connections");
}
