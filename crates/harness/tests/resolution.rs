use chrono::Duration;

use devcat_core::{DeviceId, GroupId, NewOverride, Scope, TypedValue};
use devcat_engine::{
    CatalogFilter, EngineError, Mode, OverrideRequest, ResolveOptions, ValueSource,
};
use devcat_harness::TestCatalog;
use devcat_storage::OverrideLog;

fn acme_catalog() -> Result<TestCatalog, Box<dyn std::error::Error>> {
    let mut catalog = TestCatalog::new()?;
    catalog.add_device(
        "d1",
        "g1",
        &[
            ("vendor", "Acme"),
            ("model", "PLC-100"),
            ("category", "IT"),
            ("risk_score", "4.5"),
            ("is_eol", "Active"),
            ("created_at", "2023-01-01"),
        ],
    )?;
    catalog.add_device(
        "d2",
        "g1",
        &[("vendor", "Acme"), ("model", "PLC-200"), ("category", "IT")],
    )?;
    catalog.add_device("d3", "g2", &[("vendor", "Siemens"), ("model", "S7")])?;
    Ok(catalog)
}

// ============================================================================
// Precedence
// ============================================================================

#[test]
fn every_base_field_resolves_without_overrides() -> Result<(), Box<dyn std::error::Error>> {
    let catalog = acme_catalog()?;
    for field in ["vendor", "model", "category", "risk_score", "is_eol", "created_at"] {
        let resolved = catalog
            .engine
            .resolve_field(&"d1".into(), field, ResolveOptions::effective())?;
        assert_eq!(resolved.source, ValueSource::Base, "{field}");
    }
    assert_eq!(catalog.effective("d1", "risk_score")?, "4.5");
    Ok(())
}

#[test]
fn device_override_beats_newer_group_override() -> Result<(), Box<dyn std::error::Error>> {
    let mut catalog = acme_catalog()?;
    catalog.set("d1", "category", "Medical")?;
    catalog.advance(Duration::days(3));
    catalog.set_group("d1", "category", "OT", true)?;

    assert_eq!(catalog.effective("d1", "category")?, "Medical");
    assert_eq!(catalog.effective("d2", "category")?, "OT");
    Ok(())
}

#[test]
fn blank_override_is_no_opinion() -> Result<(), Box<dyn std::error::Error>> {
    let mut catalog = acme_catalog()?;
    let blank = catalog.set("d1", "vendor", "   ")?;
    assert_eq!(blank.new_value(), "");
    assert_eq!(catalog.effective("d1", "vendor")?, "Acme");

    catalog.set_group("d1", "vendor", "", true)?;
    assert_eq!(catalog.effective("d2", "vendor")?, "Acme");
    Ok(())
}

#[test]
fn newer_blank_hides_older_value_in_same_scope() -> Result<(), Box<dyn std::error::Error>> {
    let mut catalog = acme_catalog()?;
    catalog.set("d1", "model", "PLC-100X")?;
    catalog.set("d1", "model", "")?;
    assert_eq!(catalog.effective("d1", "model")?, "PLC-100");
    Ok(())
}

#[test]
fn validated_view_never_uses_unvalidated_entries() -> Result<(), Box<dyn std::error::Error>> {
    let mut catalog = acme_catalog()?;
    catalog.set_validated("d1", "vendor", "Acme Industrial")?;
    catalog.set("d1", "vendor", "Acme Ind.")?;
    catalog.set("d1", "model", "PLC-101")?;
    catalog.set_group("d1", "category", "OT", false)?;
    catalog.set_group("d1", "is_eol", "EOL", true)?;

    let effective = catalog.engine.get_effective_record(&"d1".into(), Mode::Effective)?;
    let validated = catalog
        .engine
        .get_effective_record(&"d1".into(), Mode::EffectiveValidated)?;

    for (name, field) in &validated.fields {
        if let Some(id) = field.entry_id {
            let entry = catalog.engine.storage().get_entry(id)?.ok_or("winner vanished")?;
            assert!(entry.is_validated(), "{name} resolved to unvalidated entry");
        }
    }
    // Validated outranks the newer unvalidated edit in both views.
    assert_eq!(effective.value("vendor"), "Acme Industrial");
    assert_eq!(validated.value("vendor"), "Acme Industrial");
    assert_eq!(effective.value("model"), "PLC-101");
    assert_eq!(validated.value("model"), "PLC-100");
    assert_eq!(validated.value("category"), "IT");
    assert_eq!(validated.value("is_eol"), "EOL");
    Ok(())
}

// ============================================================================
// Group scope
// ============================================================================

#[test]
fn group_override_reaches_devices_added_later() -> Result<(), Box<dyn std::error::Error>> {
    let mut catalog = acme_catalog()?;
    let entry = catalog.set_group("d1", "patching_responsibility", "Vendor", true)?;
    assert_eq!(entry.group_id(), &GroupId::from("g1"));

    catalog.add_device("d4", "g1", &[("vendor", "Acme"), ("model", "PLC-300")])?;
    assert_eq!(catalog.effective("d4", "patching_responsibility")?, "Vendor");
    assert_eq!(catalog.effective("d2", "patching_responsibility")?, "Vendor");
    assert_eq!(catalog.effective("d3", "patching_responsibility")?, "");
    assert_eq!(catalog.engine.storage().entry_count()?, 1);
    Ok(())
}

#[test]
fn device_scope_edit_does_not_leak_to_siblings() -> Result<(), Box<dyn std::error::Error>> {
    let mut catalog = acme_catalog()?;
    catalog.set("d1", "device_type", "Controller")?;
    assert_eq!(catalog.effective("d1", "device_type")?, "Controller");
    assert_eq!(catalog.effective("d2", "device_type")?, "");
    Ok(())
}

#[test]
fn group_variants_report_differences() -> Result<(), Box<dyn std::error::Error>> {
    let mut catalog = acme_catalog()?;
    catalog.set("d2", "model", "PLC-050")?;
    catalog.set_group("d1", "category", "OT", true)?;

    let variants = catalog.engine.get_group_variants(&"g1".into(), Mode::Effective)?;
    let order: Vec<&str> = variants.devices.iter().map(|d| d.device_id.as_str()).collect();
    assert_eq!(order, ["d2", "d1"]);
    assert!(variants.diff_fields.contains(&"model".to_string()));
    assert!(variants.diff_fields.contains(&"risk_score".to_string()));
    assert!(!variants.diff_fields.contains(&"category".to_string()));
    assert!(!variants.diff_fields.contains(&"vendor".to_string()));

    let empty = catalog.engine.get_group_variants(&"nope".into(), Mode::Effective)?;
    assert!(empty.devices.is_empty());
    assert!(empty.diff_fields.is_empty());
    Ok(())
}

#[test]
fn group_listing_uses_effective_values() -> Result<(), Box<dyn std::error::Error>> {
    let mut catalog = acme_catalog()?;
    catalog.set_group("d3", "vendor", "ABB", false)?;
    catalog.set("d2", "image_url", "https://img.acme.com/plc-200.png")?;

    let groups = catalog.engine.list_groups(&CatalogFilter::default(), Mode::Effective)?;
    let order: Vec<&str> = groups.iter().map(|g| g.group_id.as_str()).collect();
    assert_eq!(order, ["g2", "g1"]);
    assert_eq!(groups[0].vendor, "ABB");
    assert_eq!(groups[0].sample_image_url, None);
    assert_eq!(groups[1].variant_count, 2);
    assert_eq!(groups[1].model, "PLC-100");
    assert_eq!(
        groups[1].sample_image_url.as_deref(),
        Some("https://img.acme.com/plc-200.png")
    );

    let by_base_vendor = catalog.engine.list_groups(
        &CatalogFilter {
            vendor: Some("siemens".into()),
            ..Default::default()
        },
        Mode::Effective,
    )?;
    assert!(by_base_vendor.is_empty());

    let validated_view = catalog.engine.list_groups(
        &CatalogFilter {
            vendor: Some("siem".into()),
            ..Default::default()
        },
        Mode::EffectiveValidated,
    )?;
    assert_eq!(validated_view.len(), 1);

    let stats = catalog.engine.catalog_stats()?;
    assert_eq!((stats.total_devices, stats.vendors, stats.total_overrides), (3, 2, 2));
    Ok(())
}

#[test]
fn catalog_listing_uses_effective_values() -> Result<(), Box<dyn std::error::Error>> {
    let mut catalog = acme_catalog()?;
    catalog.set("d2", "vendor", "Beckhoff")?;
    catalog.set("d1", "potential_cves", "CVE-2021-44228")?;

    let all = catalog.engine.list_catalog(&CatalogFilter::default(), Mode::Effective)?;
    let order: Vec<&str> = all.iter().map(|r| r.device_id.as_str()).collect();
    assert_eq!(order, ["d1", "d2", "d3"]);
    assert_eq!(all[1].value("vendor"), "Beckhoff");
    assert_eq!(all[1].source("vendor"), Some(ValueSource::DeviceOverride));

    let acme = catalog.engine.list_catalog(
        &CatalogFilter {
            vendor: Some("ACME".into()),
            ..Default::default()
        },
        Mode::Effective,
    )?;
    let order: Vec<&str> = acme.iter().map(|r| r.device_id.as_str()).collect();
    assert_eq!(order, ["d1"]);

    let partial = catalog.engine.list_catalog(
        &CatalogFilter {
            vendor: Some("Beck".into()),
            ..Default::default()
        },
        Mode::Effective,
    )?;
    assert!(partial.is_empty(), "vendor filter is an exact match");

    let by_cve = catalog.engine.list_catalog(
        &CatalogFilter {
            search: Some("log4".into()),
            ..Default::default()
        },
        Mode::Effective,
    )?;
    assert!(by_cve.is_empty());
    let by_cve = catalog.engine.list_catalog(
        &CatalogFilter {
            search: Some("cve-2021-44228".into()),
            category: Some("it".into()),
            ..Default::default()
        },
        Mode::Effective,
    )?;
    assert_eq!(by_cve.len(), 1);
    assert_eq!(by_cve[0].device_id.as_str(), "d1");

    let validated = catalog.engine.list_catalog(
        &CatalogFilter {
            vendor: Some("acme".into()),
            ..Default::default()
        },
        Mode::EffectiveValidated,
    )?;
    assert_eq!(validated.len(), 2, "unvalidated vendor edit is ignored");
    Ok(())
}

// ============================================================================
// Coercion
// ============================================================================

#[test]
fn values_are_stored_in_canonical_form() -> Result<(), Box<dyn std::error::Error>> {
    let mut catalog = acme_catalog()?;
    let score = catalog.set("d1", "risk_score", " 7.25 ")?;
    assert_eq!(score.new_value(), "7.3");
    let cves = catalog.set("d1", "potential_cves", r#"["CVE-2021-44228", "CVE-2019-0708"]"#)?;
    assert_eq!(cves.new_value(), "CVE-2021-44228, CVE-2019-0708");
    let flag = catalog.set("d1", "needs_vector", "yes")?;
    assert_eq!(flag.new_value(), "true");

    let resolved = catalog
        .engine
        .resolve_field(&"d1".into(), "risk_score", Mode::Effective)?;
    assert_eq!(resolved.value.as_numeric().map(|n| n.units()), Some(73));
    Ok(())
}

#[test]
fn stale_entries_that_no_longer_coerce_are_skipped() -> Result<(), Box<dyn std::error::Error>> {
    let mut catalog = acme_catalog()?;
    catalog.set_group("d1", "risk_score", "6", false)?;

    // Written directly, as if accepted under an older rule set.
    let changed_at = catalog.advance(Duration::seconds(1));
    let stale = catalog.engine.storage_mut().append(&NewOverride {
        device_id: "d1".into(),
        group_id: "g1".into(),
        field_name: "risk_score".into(),
        new_value: "critical".into(),
        is_validated: true,
        scope: Scope::Device,
        changed_at,
        editor_id: "legacy".into(),
        editor_name: "Importer".into(),
        note: None,
        previous_value: None,
    })?;

    let resolved = catalog
        .engine
        .resolve_field(&"d1".into(), "risk_score", Mode::Effective)?;
    assert_eq!(resolved.text, "6.0");
    assert_eq!(resolved.source, ValueSource::GroupOverride);
    assert_eq!(resolved.skipped, vec![stale.id]);

    let record = catalog.engine.get_effective_record(&"d1".into(), Mode::Effective)?;
    assert_eq!(record.value("risk_score"), "6.0");
    Ok(())
}

#[test]
fn base_value_that_fails_coercion_is_still_returned() -> Result<(), Box<dyn std::error::Error>> {
    let mut catalog = TestCatalog::new()?;
    catalog.add_device("d9", "g9", &[("risk_score", "unknown")])?;
    let resolved = catalog
        .engine
        .resolve_field(&"d9".into(), "risk_score", Mode::Effective)?;
    assert_eq!(resolved.text, "unknown");
    assert_eq!(resolved.value, TypedValue::Text("unknown".into()));
    Ok(())
}

// ============================================================================
// Submission errors
// ============================================================================

#[test]
fn submission_rejections_name_the_field() -> Result<(), Box<dyn std::error::Error>> {
    let mut catalog = acme_catalog()?;

    match catalog.set("d1", "colour", "red") {
        Err(EngineError::InvalidField { field, .. }) => assert_eq!(field, "colour"),
        other => panic!("expected InvalidField, got {other:?}"),
    }
    match catalog.set("d1", "created_at", "2020-01-01") {
        Err(EngineError::InvalidField { field, reason }) => {
            assert_eq!(field, "created_at");
            assert!(reason.contains("read-only"));
        }
        other => panic!("expected InvalidField, got {other:?}"),
    }
    match catalog.set("d1", "potential_cves", "CVE-2021-1, log4shell") {
        Err(EngineError::InvalidValue { field, reason }) => {
            assert_eq!(field, "potential_cves");
            assert!(reason.contains("CVE"), "{reason}");
        }
        other => panic!("expected InvalidValue, got {other:?}"),
    }
    match catalog.set("d1", "links", "not a url") {
        Err(EngineError::InvalidValue { field, .. }) => assert_eq!(field, "links"),
        other => panic!("expected InvalidValue, got {other:?}"),
    }
    match catalog.set("ghost", "vendor", "Acme") {
        Err(EngineError::DeviceNotFound(id)) => assert_eq!(id, DeviceId::from("ghost")),
        other => panic!("expected DeviceNotFound, got {other:?}"),
    }

    assert_eq!(catalog.engine.storage().entry_count()?, 0);
    Ok(())
}

#[test]
fn reads_reject_unknown_devices_and_fields() -> Result<(), Box<dyn std::error::Error>> {
    let catalog = acme_catalog()?;
    assert!(matches!(
        catalog.engine.get_effective_record(&"ghost".into(), Mode::Effective),
        Err(EngineError::DeviceNotFound(_))
    ));
    assert!(matches!(
        catalog.engine.resolve_field(&"d1".into(), "colour", Mode::Effective),
        Err(EngineError::InvalidField { .. })
    ));
    // Registered but absent from the base record: resolves to blank.
    assert_eq!(catalog.effective("d1", "cps_vector")?, "");
    Ok(())
}

// ============================================================================
// History-aware reads
// ============================================================================

#[test]
fn previous_value_is_captured_on_submit() -> Result<(), Box<dyn std::error::Error>> {
    let mut catalog = acme_catalog()?;
    let first = catalog.set("d1", "vendor", "Acme Corp")?;
    assert_eq!(first.body.previous_value.as_deref(), Some("Acme"));

    let second = catalog.submit(
        OverrideRequest::new("d1", "vendor", "ACME")
            .editor("u-2", "Jordan")
            .note("matches nameplate"),
    )?;
    assert_eq!(second.body.previous_value.as_deref(), Some("Acme Corp"));
    assert_eq!(second.body.note.as_deref(), Some("matches nameplate"));
    Ok(())
}

#[test]
fn point_in_time_view() -> Result<(), Box<dyn std::error::Error>> {
    let mut catalog = acme_catalog()?;
    let first = catalog.set("d1", "model", "PLC-100A")?;
    catalog.advance(Duration::hours(2));
    catalog.set("d1", "model", "PLC-100B")?;

    let then = ResolveOptions::effective().at(first.changed_at());
    let record = catalog.engine.get_effective_record(&"d1".into(), then)?;
    assert_eq!(record.value("model"), "PLC-100A");

    let before = ResolveOptions::effective().at(first.changed_at() - Duration::seconds(1));
    let record = catalog.engine.get_effective_record(&"d1".into(), before)?;
    assert_eq!(record.value("model"), "PLC-100");

    assert_eq!(catalog.effective("d1", "model")?, "PLC-100B");
    Ok(())
}
