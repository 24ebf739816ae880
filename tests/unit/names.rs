//! Unit tests for derived-name generation

use cloudsql_migrator::resolved::{helper_name, migration_name};

#[test]
fn migration_name_joins_with_dash() {
    assert_eq!(migration_name("myapp", "myapp-v2"), "myapp-myapp-v2");
}

#[test]
fn migration_name_is_capped_at_sixty_characters() {
    let source = "source-instance-with-a-rather-excessive-name-for-testing";
    let target = "target-instance-with-a-rather-excessive-name-for-testing";
    let name = migration_name(source, target);
    assert!(name.len() <= 60, "got {} chars: {name}", name.len());
}

#[test]
fn migration_name_is_stable_across_calls() {
    let source = "s".repeat(100);
    let target = "t".repeat(100);
    assert_eq!(
        migration_name(&source, &target),
        migration_name(&source, &target)
    );
}

#[test]
fn truncated_names_differing_only_in_the_tail_stay_distinct() {
    // Both inputs share the first 60 characters, so naive truncation
    // would collide
    let prefix = "p".repeat(64);
    let a = migration_name(&prefix, "alpha");
    let b = migration_name(&prefix, "bravo");
    assert_ne!(a, b);
}

#[test]
fn helper_name_is_a_valid_object_name() {
    let name = helper_name("myapp");
    assert_eq!(name, "migrator-myapp");

    let long = helper_name(&"x".repeat(200));
    assert!(long.len() <= 63);
    assert!(long.starts_with("migrator-"));
    assert!(long
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
}

#[test]
fn helper_names_for_distinct_instances_are_distinct() {
    let shared = "i".repeat(80);
    let a = helper_name(&format!("{shared}-one"));
    let b = helper_name(&format!("{shared}-two"));
    assert_ne!(a, b);
}
