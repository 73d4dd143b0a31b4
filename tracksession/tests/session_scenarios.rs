//! Session integration tests.
//!
//! Tests the full pipeline: reading -> continuity decision -> SQLite -> query.
//! Every test runs against a file-backed database in a temp dir and a manual clock.
//!
//! Run with: `cargo test --test session_scenarios`
//! Add `-- --nocapture` with `RUST_LOG=debug` to see the session log.

use std::sync::Arc;

use tempfile::TempDir;
use tracksession::{
    ManualClock, NewMeasurement, NewTrack, NoCar, Position, PropertyKey, PropertyMap,
    SessionConfig, SessionManager, TrackDatabase, TrackError, TrackFilter, TrackMetadata,
    TrackStatus, properties,
};

const MIN: i64 = 60_000;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Helper: session over a temp database, with the clock at t=0.
fn setup_session() -> (SessionManager, Arc<ManualClock>, TempDir) {
    init_logger();
    let tmp_dir = TempDir::new().expect("failed to create temp dir");
    let db_path = tmp_dir.path().join("tracks.db");
    let store = TrackDatabase::open(db_path.to_str().unwrap()).expect("failed to open store");

    let clock = Arc::new(ManualClock::new(0));
    let session = SessionManager::new(
        store,
        SessionConfig::default(),
        clock.clone(),
        Arc::new(NoCar),
    );
    (session, clock, tmp_dir)
}

/// Helper: advance the clock to `time` and append a reading taken at that time.
fn append_at(
    session: &SessionManager,
    clock: &ManualClock,
    time: i64,
    lat: f64,
    lon: f64,
) -> tracksession::AppendOutcome {
    clock.set(time);
    let reading = NewMeasurement::new(time, Position::new(lat, lon))
        .with_property(PropertyKey::Speed, 42.0)
        .with_property(PropertyKey::Rpm, 2100.0);
    session
        .append_reading(reading, false)
        .expect("append failed")
}

#[test]
fn test_continuity_scenario() {
    let (session, clock, _tmp) = setup_session();

    let a0 = append_at(&session, &clock, 0, 52.0, 7.0);
    let a1 = append_at(&session, &clock, 5 * MIN, 52.01, 7.01);
    assert_eq!(a0.track_id, a1.track_id);
    assert!(a0.created_track);
    assert!(!a1.created_track);

    let a = session.get_track(a0.track_id, false).unwrap().unwrap();
    let times: Vec<i64> = a
        .measurements()
        .loaded()
        .unwrap()
        .iter()
        .map(|m| m.time)
        .collect();
    assert_eq!(times, vec![0, 5 * MIN]);

    // Twenty minutes after the previous reading, same spot
    let b = append_at(&session, &clock, 25 * MIN, 52.01, 7.01);
    assert_ne!(b.track_id, a0.track_id);
    assert!(b.created_track);

    let a_after = session.get_track(a0.track_id, false).unwrap().unwrap();
    assert_eq!(a_after, a);
    assert_eq!(a_after.status(), TrackStatus::Active);
    assert_eq!(session.count_tracks().unwrap(), 2);
}

#[test]
fn test_readings_within_gaps_share_a_track() {
    let (session, clock, _tmp) = setup_session();

    // Fifteen minutes apart exactly and ~1.4 km per step
    let mut ids = Vec::new();
    for step in 0..4 {
        let outcome = append_at(
            &session,
            &clock,
            step * 15 * MIN,
            52.0 + step as f64 * 0.01,
            7.0 + step as f64 * 0.01,
        );
        ids.push(outcome.track_id);
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);
}

#[test]
fn test_distance_jump_starts_new_track() {
    let (session, clock, _tmp) = setup_session();

    let first = append_at(&session, &clock, 0, 52.0, 7.0);
    // ~3.3 km north, two minutes later (past the cached fast path)
    let second = append_at(&session, &clock, 2 * MIN, 52.03, 7.0);
    assert_ne!(first.track_id, second.track_id);

    // And the new track keeps collecting nearby readings
    let third = append_at(&session, &clock, 4 * MIN, 52.031, 7.0);
    assert_eq!(second.track_id, third.track_id);
}

#[test]
fn test_finished_guard() {
    let (session, clock, _tmp) = setup_session();
    let first = append_at(&session, &clock, 0, 52.0, 7.0);
    session.finish_active().unwrap();

    let reading = NewMeasurement::new(MIN, Position::new(52.0, 7.0));
    let err = session
        .append_to_track(first.track_id, reading.clone(), false)
        .unwrap_err();
    assert!(matches!(err, TrackError::TrackAlreadyFinished { .. }));

    session
        .append_to_track(first.track_id, reading, true)
        .unwrap();
    let track = session.get_track(first.track_id, false).unwrap().unwrap();
    assert_eq!(track.measurements().loaded().unwrap().len(), 2);
    assert_eq!(track.status(), TrackStatus::Finished);

    // The session itself moves on to a fresh track
    let next = append_at(&session, &clock, 2 * MIN, 52.0, 7.0);
    assert_ne!(next.track_id, first.track_id);
}

#[test]
fn test_finish_active_outcomes() {
    let (session, clock, _tmp) = setup_session();

    let recorded = append_at(&session, &clock, 0, 52.0, 7.0);
    let outcome = session.finish_active().unwrap().unwrap();
    assert!(!outcome.deleted);
    assert_eq!(outcome.track.id(), recorded.track_id);
    let stored = session.get_track(recorded.track_id, true).unwrap().unwrap();
    assert_eq!(stored.status(), TrackStatus::Finished);
    assert_eq!(stored.end_time(), Some(0));

    clock.set(MIN);
    let empty = session
        .resolve_active_track(Some(Position::new(52.0, 7.0)))
        .unwrap();
    assert_ne!(empty, recorded.track_id);
    let outcome = session.finish_active().unwrap().unwrap();
    assert!(outcome.deleted);
    assert_eq!(outcome.track.id(), empty);
    assert!(!session.has_track(empty).unwrap());
    assert_eq!(session.active_track_id().unwrap(), None);
}

#[test]
fn test_local_and_remote_listing() {
    let (session, _clock, _tmp) = setup_session();

    let local = session.create_track(&NewTrack::new("Local"), false).unwrap();
    let mut remote = NewTrack::new("Remote");
    remote.remote_id = Some("5a1b".to_string());
    remote.status = TrackStatus::Finished;
    let remote = session.create_track(&remote, false).unwrap();
    let marked = session.create_track(&NewTrack::new("Uploaded"), false).unwrap();
    assert!(session.mark_remote(marked, "77ff").unwrap());

    let local_ids: Vec<_> = session
        .list_tracks(TrackFilter::Local, true)
        .unwrap()
        .iter()
        .map(|t| t.id())
        .collect();
    assert_eq!(local_ids, vec![local]);

    let remote_tracks = session.list_tracks(TrackFilter::Remote, true).unwrap();
    let remote_ids: Vec<_> = remote_tracks.iter().map(|t| t.id()).collect();
    assert_eq!(remote_ids, vec![remote, marked]);
    assert!(remote_tracks.iter().all(|t| t.remote_id.is_some()));
    assert_eq!(session.count_remote_tracks().unwrap(), 2);

    assert_eq!(session.delete_all_remote_tracks().unwrap(), 2);
    assert_eq!(session.count_tracks().unwrap(), 1);
}

#[test]
fn test_remote_import_skips_finished_check() {
    let (session, _clock, _tmp) = setup_session();

    let mut import = NewTrack::new("Downloaded");
    import.remote_id = Some("abc".to_string());
    import.status = TrackStatus::Finished;
    import.measurements = vec![
        NewMeasurement::new(0, Position::new(51.0, 6.0)),
        NewMeasurement::new(1000, Position::new(51.0001, 6.0)),
    ];

    assert!(matches!(
        session.create_track(&import, false),
        Err(TrackError::TrackAlreadyFinished { .. })
    ));
    assert_eq!(session.count_tracks().unwrap(), 0);

    let id = session.create_track(&import, true).unwrap();
    let track = session.get_track(id, false).unwrap().unwrap();
    assert_eq!(track.measurements().loaded().unwrap().len(), 2);
    assert!(track.is_remote());
}

#[test]
fn test_properties_survive_storage() {
    let (session, clock, _tmp) = setup_session();

    let mut props = PropertyMap::new();
    for (i, key) in PropertyKey::ALL.iter().enumerate() {
        props.insert(*key, i as f64 * 1.25 - 3.0);
    }
    let encoded = properties::encode(&props).unwrap();
    assert_eq!(properties::decode(Some(&encoded)).unwrap(), props);

    clock.set(0);
    let mut reading = NewMeasurement::new(0, Position::new(52.0, 7.0));
    reading.properties = props.clone();
    let outcome = session.append_reading(reading, false).unwrap();

    let track = session.get_track(outcome.track_id, false).unwrap().unwrap();
    let stored = &track.measurements().loaded().unwrap()[0];
    for (key, value) in &props {
        let got = stored.property(*key).unwrap();
        assert!((got - value).abs() < 1e-9, "{key}: {got} != {value}");
    }
}

#[test]
fn test_metadata_merge_persists() {
    let (session, clock, tmp) = setup_session();

    session
        .merge_device_metadata(TrackMetadata::new().with("obdDevice", "OBDLink MX"))
        .unwrap();
    let first = append_at(&session, &clock, 0, 52.0, 7.0);
    let merged = session
        .update_track_metadata(
            first.track_id,
            &TrackMetadata::new().with("appVersion", "4.2.0"),
        )
        .unwrap();
    assert_eq!(merged.len(), 2);
    drop(session);

    // Reopen from disk
    let db_path = tmp.path().join("tracks.db");
    let store = TrackDatabase::open(db_path.to_str().unwrap()).unwrap();
    let track = store.get_track(first.track_id, true).unwrap().unwrap();
    assert_eq!(track.metadata.get("obdDevice"), Some("OBDLink MX"));
    assert_eq!(track.metadata.get("appVersion"), Some("4.2.0"));
}

#[test]
fn test_concurrent_appends_share_one_track() {
    const THREADS: i64 = 8;
    let (session, clock, _tmp) = setup_session();
    let session = Arc::new(session);
    clock.set(0);

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let session = Arc::clone(&session);
            std::thread::spawn(move || {
                let reading = NewMeasurement::new(i, Position::new(52.0 + i as f64 * 1e-5, 7.0))
                    .with_property(PropertyKey::Speed, 50.0);
                session.append_reading(reading, false)
            })
        })
        .collect();

    let outcomes: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("thread panicked").expect("append failed"))
        .collect();

    let track_id = outcomes[0].track_id;
    assert!(outcomes.iter().all(|o| o.track_id == track_id));
    assert_eq!(outcomes.iter().filter(|o| o.created_track).count(), 1);
    assert_eq!(session.count_tracks().unwrap(), 1);

    let track = session.get_track(track_id, false).unwrap().unwrap();
    assert_eq!(track.measurements().loaded().unwrap().len(), THREADS as usize);
}
