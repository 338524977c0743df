//! Standalone volume entry points

mod common;

use cloudwright_cloud::{CloudError, Diagnostics, SerializationGuard, VolumeSpec};
use cloudwright_virak::{VirakProvider, VolumeResourceSpec, VolumeState};
use common::{FakeVirak, ZONE, init_tracing};
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

fn provider(fake: &FakeVirak) -> VirakProvider {
    init_tracing();
    VirakProvider::new(fake.shared()).with_guard(Arc::new(SerializationGuard::new()))
}

fn spec(instance_id: Option<&str>) -> VolumeResourceSpec {
    VolumeResourceSpec {
        zone_id: ZONE.into(),
        volume: VolumeSpec::new("archive", 50, "hdd"),
        instance_id: instance_id.map(str::to_string),
    }
}

fn state_of(fake: &FakeVirak, volume_id: &str) -> VolumeState {
    let summary = fake.volume(volume_id).unwrap();
    VolumeState {
        volume: cloudwright_cloud::ResourceRef::new(ZONE, volume_id),
        name: summary.name,
        size: summary.size,
        service_offering_id: "hdd".into(),
        status: summary.status,
        attached_instance_id: summary.attached_instance_id,
    }
}

#[tokio::test(start_paused = true)]
async fn test_create_unattached_volume() {
    let fake = FakeVirak::new();
    fake.set_creation_lag(2);
    let provider = provider(&fake);
    let mut diags = Diagnostics::new();

    let state = assert_ok!(provider.create_volume(&spec(None), &mut diags).await);

    assert_eq!(state.status, "ALLOCATED");
    assert_eq!(state.size, 50);
    assert!(state.attached_instance_id.is_none());
    assert!(fake.calls_of("attach_volume").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_create_and_attach_volume() {
    let fake = FakeVirak::new();
    let web = fake.add_instance("web", "Running");
    let provider = provider(&fake);
    let mut diags = Diagnostics::new();

    let state = assert_ok!(provider.create_volume(&spec(Some(&web)), &mut diags).await);

    assert_eq!(state.attached_instance_id.as_deref(), Some(web.as_str()));
    assert_eq!(state.status, "ATTACHED");
    assert_eq!(fake.data_volumes(&web), vec![state.volume.id.clone()]);
    assert!(diags.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_create_for_unknown_instance_makes_no_volume() {
    let fake = FakeVirak::new();
    let provider = provider(&fake);
    let mut diags = Diagnostics::new();

    let err = assert_err!(provider.create_volume(&spec(Some("i-missing")), &mut diags).await);

    assert!(matches!(err, CloudError::InvalidConfig(_)));
    assert!(fake.mutations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_move_between_instances() {
    let fake = FakeVirak::new();
    let web = fake.add_instance("web", "Running");
    let db = fake.add_instance("db", "Stopped");
    let volume = fake.add_volume("archive", Some(&web));
    let provider = provider(&fake);
    let mut diags = Diagnostics::new();

    let state = assert_ok!(
        provider
            .move_volume_attachment(&state_of(&fake, &volume), Some(&db), &mut diags)
            .await
    );

    assert_eq!(
        fake.mutations(),
        vec![
            format!("detach_volume {} {}", volume, web),
            format!("attach_volume {} {}", volume, db),
        ]
    );
    assert_eq!(state.attached_instance_id.as_deref(), Some(db.as_str()));
    assert!(fake.data_volumes(&web).is_empty());
    assert_eq!(fake.data_volumes(&db), vec![volume]);
}

#[tokio::test(start_paused = true)]
async fn test_move_to_nothing_detaches() {
    let fake = FakeVirak::new();
    let web = fake.add_instance("web", "Running");
    let volume = fake.add_volume("archive", Some(&web));
    let provider = provider(&fake);
    let mut diags = Diagnostics::new();

    let state = assert_ok!(
        provider
            .move_volume_attachment(&state_of(&fake, &volume), None, &mut diags)
            .await
    );

    assert!(state.attached_instance_id.is_none());
    assert_eq!(state.status, "ALLOCATED");
    assert_eq!(fake.calls_of("attach_volume").len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_delete_attached_volume() {
    let fake = FakeVirak::new();
    let web = fake.add_instance("web", "Running");
    let volume = fake.add_volume("archive", Some(&web));
    let provider = provider(&fake);
    let mut diags = Diagnostics::new();

    assert_ok!(provider.delete_volume(&state_of(&fake, &volume), &mut diags).await);

    assert!(fake.volume(&volume).is_none());
    assert_eq!(
        fake.mutations(),
        vec![
            format!("detach_volume {} {}", volume, web),
            format!("delete_volume {}", volume),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_delete_blocked_on_forbidden_detach() {
    let fake = FakeVirak::new();
    let web = fake.add_instance("web", "Running");
    let volume = fake.add_volume("archive", Some(&web));
    fake.fail("detach_volume", 1, "403 Forbidden");
    let provider = provider(&fake);
    let mut diags = Diagnostics::new();

    let err = assert_err!(provider.delete_volume(&state_of(&fake, &volume), &mut diags).await);

    assert!(matches!(err, CloudError::ApiError(ref m) if m.contains("permission denied")));
    assert!(fake.calls_of("delete_volume").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_delete_with_destroyed_holder() {
    let fake = FakeVirak::new();
    let volume = fake.add_volume("archive", Some("i-destroyed"));
    fake.set_volume_status(&volume, "ALLOCATED");
    let provider = provider(&fake);
    let mut diags = Diagnostics::new();

    assert_ok!(provider.delete_volume(&state_of(&fake, &volume), &mut diags).await);

    assert!(fake.volume(&volume).is_none());
    assert!(diags.warnings().any(|d| d.summary == "Volume Detachment Skipped"));
}

#[tokio::test(start_paused = true)]
async fn test_delete_when_detach_reports_not_attached() {
    let fake = FakeVirak::new();
    let web = fake.add_instance("web", "Running");
    let volume = fake.add_volume("archive", Some(&web));
    fake.set_volume_status(&volume, "ALLOCATED");
    fake.fail(
        "detach_volume",
        1,
        &format!("400: volume {} is not attached to instance {}", volume, web),
    );
    let provider = provider(&fake);
    let mut diags = Diagnostics::new();

    assert_ok!(provider.delete_volume(&state_of(&fake, &volume), &mut diags).await);

    assert!(fake.volume(&volume).is_none());
    assert!(!diags.has_error());
    assert_eq!(diags.warnings().count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_delete_refused_unless_allocated() {
    let fake = FakeVirak::new();
    let web = fake.add_instance("web", "Running");
    let volume = fake.add_volume("archive", Some(&web));
    fake.fail("detach_volume", 1, "500 internal error");
    let provider = provider(&fake);
    let mut diags = Diagnostics::new();

    let err = assert_err!(provider.delete_volume(&state_of(&fake, &volume), &mut diags).await);

    assert!(matches!(err, CloudError::InvariantViolation(_)));
    assert!(diags.warnings().any(|d| d.summary == "Volume Detachment Failed"));
    assert!(fake.calls_of("delete_volume").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_delete_missing_volume_is_noop() {
    let fake = FakeVirak::new();
    let volume = fake.add_volume("archive", None);
    let provider = provider(&fake);
    let state = state_of(&fake, &volume);
    let mut gone = state.clone();
    gone.volume.id = "vol-gone".into();
    let mut diags = Diagnostics::new();

    assert_ok!(provider.delete_volume(&gone, &mut diags).await);
    assert!(assert_ok!(provider.read_volume(&gone).await).is_none());
    assert!(fake.mutations().is_empty());
}
