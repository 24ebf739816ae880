//! Unit tests for target-instance definition

use cloudsql_migrator::config::InstanceSettings;
use cloudsql_migrator::instance::define_instance;

use crate::fixtures::*;

mod define_instance_tests {
    use super::*;

    #[test]
    fn name_only_settings_keep_source_values() {
        let app = application(configured_source_instance());
        let settings = InstanceSettings {
            name: TARGET_INSTANCE_NAME.to_string(),
            ..Default::default()
        };

        let target = define_instance(&settings, &app).unwrap();

        assert_eq!(target.name.as_deref(), Some(TARGET_INSTANCE_NAME));
        assert_eq!(target.kind.as_deref(), Some(SOURCE_TYPE));
        assert_eq!(target.tier.as_deref(), Some(SOURCE_TIER));
        assert_eq!(target.disk_size, Some(SOURCE_DISK_SIZE));
        assert_eq!(target.disk_autoresize, None);
    }

    #[test]
    fn bare_source_yields_bare_target() {
        let app = application(bare_source_instance());
        let settings = InstanceSettings {
            name: TARGET_INSTANCE_NAME.to_string(),
            ..Default::default()
        };

        let target = define_instance(&settings, &app).unwrap();

        assert_eq!(target.name.as_deref(), Some(TARGET_INSTANCE_NAME));
        assert_eq!(target.kind, None);
        assert_eq!(target.tier, None);
        assert_eq!(target.disk_size, None);
        assert_eq!(target.disk_autoresize, None);
    }

    #[test]
    fn complete_settings_override_source_values() {
        let app = application(configured_source_instance());
        let settings = InstanceSettings {
            name: TARGET_INSTANCE_NAME.to_string(),
            kind: Some(TARGET_TYPE.to_string()),
            tier: Some(TARGET_TIER.to_string()),
            disk_size: Some(TARGET_DISK_SIZE),
            disk_autoresize: Some(false),
        };

        let target = define_instance(&settings, &app).unwrap();

        assert_eq!(target.name.as_deref(), Some(TARGET_INSTANCE_NAME));
        assert_eq!(target.kind.as_deref(), Some(TARGET_TYPE));
        assert_eq!(target.tier.as_deref(), Some(TARGET_TIER));
        assert_eq!(target.disk_size, Some(TARGET_DISK_SIZE));
        assert_eq!(target.disk_autoresize, Some(false));
    }

    #[test]
    fn cascading_delete_is_always_disabled() {
        let app = application(configured_source_instance());
        assert!(app.sql_instance().unwrap().cascading_delete);

        let settings = InstanceSettings {
            name: TARGET_INSTANCE_NAME.to_string(),
            ..Default::default()
        };

        let target = define_instance(&settings, &app).unwrap();
        assert!(!target.cascading_delete);
    }

    #[test]
    fn enabling_disk_autoresize_zeroes_disk_size() {
        let app = application(configured_source_instance());
        let settings = InstanceSettings {
            name: TARGET_INSTANCE_NAME.to_string(),
            disk_size: Some(TARGET_DISK_SIZE),
            disk_autoresize: Some(true),
            ..Default::default()
        };

        let target = define_instance(&settings, &app).unwrap();
        assert_eq!(target.disk_autoresize, Some(true));
        assert_eq!(target.disk_size, None);
    }

    #[test]
    fn unset_disk_autoresize_keeps_configured_disk_size() {
        let app = application(bare_source_instance());
        let settings = InstanceSettings {
            name: TARGET_INSTANCE_NAME.to_string(),
            disk_size: Some(TARGET_DISK_SIZE),
            disk_autoresize: None,
            ..Default::default()
        };

        let target = define_instance(&settings, &app).unwrap();
        assert_eq!(target.disk_autoresize, None);
        assert_eq!(target.disk_size, Some(TARGET_DISK_SIZE));
    }

    #[test]
    fn application_without_instance_is_an_error() {
        let mut app = application(bare_source_instance());
        app.spec.gcp = None;

        let settings = InstanceSettings {
            name: TARGET_INSTANCE_NAME.to_string(),
            ..Default::default()
        };

        assert!(define_instance(&settings, &app).is_err());
    }

    #[test]
    fn source_flags_and_databases_are_carried_over() {
        let app = application(configured_source_instance());
        let settings = InstanceSettings {
            name: TARGET_INSTANCE_NAME.to_string(),
            ..Default::default()
        };

        let target = define_instance(&settings, &app).unwrap();
        // The copy is deep: flag filtering happens later, in the helper
        // application builder
        assert_eq!(target.flags.len(), 1);
        assert_eq!(target.databases.len(), 1);
        assert_eq!(target.databases[0].name, "mydb");
    }
}
