//! Unit tests for phase structure: step counts, exit codes and the
//! branch decisions each phase makes.

use cloudsql_migrator::phases::{finalize, promote, rollback, setup, PhaseError};

mod step_counts {
    use super::*;

    // External tooling renders progress bars from these totals; changing
    // a phase's step list means changing its announced total in lockstep.
    #[test]
    fn announced_totals() {
        assert_eq!(setup::STEPS_TOTAL, 20);
        assert_eq!(promote::STEPS_TOTAL, 19);
        assert_eq!(finalize::STEPS_TOTAL, 11);
        assert_eq!(rollback::STEPS_TOTAL, 17);
    }
}

mod exit_codes {
    use super::*;

    #[test]
    fn equal_source_and_target_names_fail_with_code_six() {
        // Step 4 of setup checks the names; codes 1 and 2 are reserved
        let err = setup::validate_names("myapp", "myapp").unwrap_err();
        assert!(err
            .to_string()
            .contains("source and target instance cannot be the same"));

        let phase_err = PhaseError::at(4, err);
        assert_eq!(phase_err.exit_code(), 6);
    }

    #[test]
    fn distinct_names_pass() {
        assert!(setup::validate_names("myapp", "myapp-v2").is_ok());
    }

    #[test]
    fn lag_timeout_during_readiness_check_maps_to_code_nine() {
        // The readiness gate is promote step 7
        let phase_err = PhaseError::at(7, "replication lag predicate not satisfied");
        assert_eq!(phase_err.exit_code(), 9);
    }
}

mod promote_branching {
    use super::*;
    use cloudsql_migrator::phases::promote::{classify_job, PromotionReadiness};

    #[test]
    fn helper_gone_semantics_rely_on_completed_job_being_success() {
        // After a finished cutover the job reports COMPLETED; a promote
        // re-run must treat that as done rather than an error
        let readiness = classify_job("m", Some("COMPLETED"), None).unwrap();
        assert_eq!(readiness, Some(PromotionReadiness::AlreadyPromoted));
    }

    #[test]
    fn foreign_job_states_abort_the_phase() {
        assert!(classify_job("m", Some("DRAFT"), None).is_err());
        assert!(classify_job("m", Some("STOPPED"), Some("CDC")).is_err());
    }
}

mod rollback_branching {
    use cloudsql_migrator::crd::{
        Application, ApplicationSpec, CloudSqlInstance, GcpSpec,
    };
    use cloudsql_migrator::phases::rollback::application_on_source;
    use kube::core::ObjectMeta;

    fn app_with_instance(name: Option<&str>) -> Application {
        Application {
            metadata: ObjectMeta {
                name: Some("myapp".to_string()),
                namespace: Some("myteam".to_string()),
                ..Default::default()
            },
            spec: ApplicationSpec {
                image: "img".to_string(),
                replicas: None,
                gcp: Some(GcpSpec {
                    sql_instances: vec![CloudSqlInstance {
                        name: name.map(str::to_string),
                        ..Default::default()
                    }],
                    rest: Default::default(),
                }),
                rest: Default::default(),
            },
            status: None,
        }
    }

    #[test]
    fn rollback_before_promote_skips_the_scale_down() {
        // Setup never changes the application's instance entry, so a
        // rollback directly after setup sees the source name unchanged
        let app = app_with_instance(Some("myapp"));
        assert!(application_on_source(&app, "myapp"));
    }

    #[test]
    fn rollback_after_promote_scales_down() {
        let app = app_with_instance(Some("myapp-v2"));
        assert!(!application_on_source(&app, "myapp"));
    }

    #[test]
    fn unnamed_instance_entry_falls_back_to_the_application_name() {
        let app = app_with_instance(None);
        assert!(application_on_source(&app, "myapp"));
        assert!(!application_on_source(&app, "other"));
    }
}
