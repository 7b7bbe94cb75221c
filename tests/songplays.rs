use sparkify_lake::songplays::PARTITION_SHIFT;
use sparkify_lake::testing::{catalog_record, event_record, sequenced, song_play};
use sparkify_lake::{
    CatalogIndex, CatalogMatch, CatalogRecord, EventRecord, EventScope, Sequenced, build_artists,
    build_songplays, build_songs,
};

const TS: i64 = 1_541_000_000_000;

fn index(catalog: Vec<CatalogRecord>, tolerance: f64) -> CatalogIndex {
    let catalog = sequenced(catalog);
    CatalogIndex::build(&build_songs(&catalog), &build_artists(&catalog), tolerance)
}

fn plays(events: Vec<EventRecord>) -> Vec<Sequenced<EventRecord>> {
    sequenced(events)
}

#[test]
fn matched_play_carries_song_and_artist() {
    let idx = index(vec![catalog_record("S1", "Test", "A1", "Art", 200.0)], 0.5);
    let events = plays(vec![song_play("U1", "free", TS, "Test", "Art", 200.05)]);

    let (rows, stats) = build_songplays(&events, &idx, &EventScope::default());

    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.song_id.as_deref(), Some("S1"));
    assert_eq!(row.artist_id.as_deref(), Some("A1"));
    assert_eq!(row.user_id.as_deref(), Some("U1"));
    assert_eq!(row.level.as_deref(), Some("free"));
    assert_eq!(row.start_time, TS);
    assert_eq!((row.year, row.month), (2018, 10));
    assert_eq!(stats.matched, 1);
    assert_eq!(stats.unmatched, 0);
}

#[test]
fn unmatched_play_is_kept_with_null_keys() {
    let idx = index(vec![catalog_record("S1", "Test", "A1", "Art", 200.0)], 0.5);
    let events = plays(vec![
        song_play("U1", "free", TS, "Unknown", "Art", 200.0),
        song_play("U1", "free", TS + 1, "Test", "Art", 230.0),
        EventRecord { length: None, ..song_play("U1", "free", TS + 2, "Test", "Art", 200.0) },
    ]);

    let (rows, stats) = build_songplays(&events, &idx, &EventScope::default());

    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.song_id.is_none() && r.artist_id.is_none()));
    assert_eq!(stats.unmatched, 3);
    assert_eq!(stats.song_plays, 3);
}

#[test]
fn matching_is_exact_on_title_and_artist() {
    let idx = index(vec![catalog_record("S1", "Test", "A1", "Art", 200.0)], 0.5);
    assert_eq!(idx.lookup("test", "Art", 200.0), CatalogMatch::None);
    assert_eq!(idx.lookup("Test", "Art ", 200.0), CatalogMatch::None);
    assert!(matches!(idx.lookup("Test", "Art", 200.5), CatalogMatch::Unique(_)));
    assert_eq!(idx.lookup("Test", "Art", 200.51), CatalogMatch::None);
}

#[test]
fn ambiguous_match_picks_lowest_song_id() {
    let idx = index(
        vec![
            catalog_record("S9", "Same", "A2", "Art", 180.0),
            catalog_record("S3", "Same", "A1", "Art", 180.2),
            catalog_record("S5", "Same", "A3", "Other", 180.0),
        ],
        0.5,
    );
    let events = plays(vec![song_play("U1", "paid", TS, "Same", "Art", 180.1)]);

    let (rows, stats) = build_songplays(&events, &idx, &EventScope::default());

    assert_eq!(rows[0].song_id.as_deref(), Some("S3"));
    assert_eq!(rows[0].artist_id.as_deref(), Some("A1"));
    assert_eq!(stats.ambiguous, 1);
    assert_eq!(stats.matched, 1);
    match idx.lookup("Same", "Art", 180.1) {
        CatalogMatch::Ambiguous { chosen, candidates } => {
            assert_eq!(chosen.song_id, "S3");
            assert_eq!(candidates, 2);
        }
        other => panic!("expected ambiguous match, got {other:?}"),
    }
}

#[test]
fn only_song_play_events_become_facts() {
    let idx = index(vec![], 0.5);
    let events = plays(vec![
        event_record("U1", "free", TS, "Home"),
        song_play("U1", "free", TS + 5, "x", "y", 1.0),
        event_record("U1", "free", TS + 9, "Logout"),
    ]);

    let (rows, stats) = build_songplays(&events, &idx, &EventScope::default());
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].start_time, TS + 5);
    assert_eq!(stats.song_plays, 1);
}

#[test]
fn ids_are_dense_and_increasing_within_partition() {
    let idx = index(vec![], 0.5);
    // October and November 2018, given out of order.
    let nov = 1_541_500_000_000;
    let events = plays(vec![
        song_play("U1", "free", nov + 10, "x", "y", 1.0),
        song_play("U1", "free", TS + 30, "x", "y", 1.0),
        song_play("U2", "free", TS + 10, "x", "y", 1.0),
        song_play("U3", "free", nov, "x", "y", 1.0),
        song_play("U4", "free", TS + 10, "x", "y", 1.0),
    ]);

    let (rows, _) = build_songplays(&events, &idx, &EventScope::default());

    let oct: Vec<(i64, Option<&str>)> = rows
        .iter()
        .filter(|r| r.month == 10)
        .map(|r| (r.songplay_id, r.user_id.as_deref()))
        .collect();
    assert_eq!(oct, vec![(0, Some("U2")), (1, Some("U4")), (2, Some("U1"))]);

    let nov_ids: Vec<i64> = rows.iter().filter(|r| r.month == 11).map(|r| r.songplay_id).collect();
    let base = 1i64 << PARTITION_SHIFT;
    assert_eq!(nov_ids, vec![base, base + 1]);

    let mut unique: Vec<i64> = rows.iter().map(|r| r.songplay_id).collect();
    unique.dedup();
    assert_eq!(unique.len(), rows.len());
}

#[test]
fn songs_without_known_artist_are_not_indexed() {
    let songs = build_songs(&sequenced(vec![catalog_record("S1", "Test", "A1", "Art", 200.0)]));
    let idx = CatalogIndex::build(&songs, &[], 0.5);
    assert_eq!(idx.lookup("Test", "Art", 200.0), CatalogMatch::None);
}

#[test]
fn out_of_range_play_is_counted_not_silently_lost() {
    let idx = index(vec![], 0.5);
    let events = plays(vec![
        song_play("U1", "free", TS, "x", "y", 1.0),
        song_play("U9", "free", 9_000_000_000_000_000_000, "x", "y", 1.0),
    ]);
    let scope = EventScope::default();

    let (rows, stats) = build_songplays(&events, &idx, &scope);

    assert_eq!(rows.len(), 1);
    assert_eq!(stats.song_plays, 1);
    assert_eq!(stats.out_of_range, 1);

    let users = sparkify_lake::build_users(&events, &scope, true);
    let ids: Vec<&str> = users.iter().map(|u| u.user_id.as_str()).collect();
    assert_eq!(ids, vec!["U1"]);
    assert_eq!(sparkify_lake::build_time(&events, &scope).len(), 1);
}
