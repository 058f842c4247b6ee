//! End-to-end runs of the journal, catalog and resolver pipeline against
//! scripted volumes.

use std::collections::HashMap;

use usntrace::ntfs::scripted::{
    enum_response, journal_response, ScriptedDevice, ScriptedResponse, ScriptedVolumes,
    SyntheticRecord,
};
use usntrace::ntfs::structs::{fsctl, usn_reason};
use usntrace::{
    ChangeReason, Frn, JournalDescriptor, MultiVolumeScanner, ScanConfig, UsnTraceError, VolumeId,
    VolumeScanner,
};

fn volume(letter: char) -> VolumeId {
    VolumeId::new(letter).unwrap()
}

fn descriptor() -> JournalDescriptor {
    JournalDescriptor {
        journal_id: 0x01D5_0000_0000_0042,
        first_usn: 0,
        next_usn: 9000,
        lowest_valid_usn: 4096,
        max_usn: i64::MAX,
        max_size: 32 * 1024 * 1024,
        allocation_delta: 8 * 1024 * 1024,
    }
}

fn entry(frn: u64, parent: u64, name: &str) -> SyntheticRecord {
    SyntheticRecord::new(Frn(frn), Frn(parent), name)
}

/// Volume holding `C:\Users\a.txt` plus a journal mentioning the file
fn users_volume() -> ScriptedDevice {
    ScriptedDevice::new()
        .with_journal(descriptor())
        .push_journal_reply(journal_response(
            5000,
            &[
                entry(200, 100, "a.txt")
                    .with_usn(4096)
                    .with_reason(usn_reason::FILE_CREATE)
                    .with_timestamp(132_223_104_000_000_000),
                entry(200, 100, "a.txt")
                    .with_usn(4160)
                    .with_reason(usn_reason::DATA_EXTEND | usn_reason::CLOSE),
            ],
        ))
        .push_journal(ScriptedResponse::EndOfData)
        .push_enum_reply(enum_response(
            Frn(101),
            &[entry(100, 5, "Users").directory()],
        ))
        .push_enum_reply(enum_response(Frn(201), &[entry(200, 100, "a.txt")]))
        .push_enum(ScriptedResponse::EndOfData)
}

#[test]
fn end_to_end_users_file() {
    let scanner = VolumeScanner::new(ScriptedVolumes::new().with_volume(volume('C'), users_volume()));

    let map = scanner
        .build_path_map(volume('C'), &HashMap::from([(Frn(200), Frn(100))]))
        .unwrap();
    assert_eq!(map.resolved_paths.len(), 1);
    assert_eq!(map.path_for(Frn(200)), Some("C:\\Users\\a.txt"));
    assert_eq!(map.stats.fully_resolved, 1);
    assert_eq!(map.stats.true_orphans, 0);
    assert_eq!(map.stats.deleted_files, 0);
}

#[test]
fn trace_joins_journal_with_paths() {
    let scanner = VolumeScanner::new(ScriptedVolumes::new().with_volume(volume('C'), users_volume()));
    let trace = scanner.trace_volume(volume('C')).unwrap();

    assert_eq!(trace.records.len(), 2);
    assert_eq!(trace.records[0].usn, 4096);
    assert_eq!(trace.records[0].reason(), ChangeReason::Created);
    assert_eq!(trace.records[0].datetime().format("%Y").to_string(), "2020");
    assert_eq!(trace.records[1].reason_names(), vec!["DataExtend", "Close"]);

    for record in &trace.records {
        assert_eq!(trace.paths.display_path(record).as_deref(), Some("C:\\Users\\a.txt"));
    }
    assert_eq!(trace.paths.stats.total_requested, 1);
}

#[test]
fn journal_starts_at_lowest_valid_usn() {
    let device = users_volume();
    let provider = ScriptedVolumes::new().with_volume(volume('C'), device.clone());
    let scanner = VolumeScanner::new(provider);
    scanner.read_journal_entries(volume('C')).unwrap();

    // Reads run on a fresh copy per open; replay on our own copy to inspect
    let mut device = device;
    let cancel = std::sync::atomic::AtomicBool::new(false);
    usntrace::ntfs::JournalReader::new(&mut device)
        .read_entries(&cancel)
        .unwrap();
    assert_eq!(device.journal_starts(), vec![4096, 5000]);
}

#[test]
fn renamed_and_reused_directories_fall_back_by_entry_index() {
    // Directory entry 0x30 was deleted and reused: the live catalog holds
    // sequence 2, while a file still points at sequence 1
    let live = Frn::new(0x30, 2);
    let stale = Frn::new(0x30, 1);
    let device = ScriptedDevice::new().push_enum_reply(enum_response(
        Frn(0x1000),
        &[
            SyntheticRecord::new(live, Frn(5), "Projects").directory(),
            SyntheticRecord::new(Frn(0x500), stale, "plan.docx"),
        ],
    ));

    let scanner = VolumeScanner::new(ScriptedVolumes::new().with_volume(volume('E'), device));
    let map = scanner
        .build_path_map(volume('E'), &HashMap::from([(Frn(0x500), stale)]))
        .unwrap();
    assert_eq!(map.path_for(Frn(0x500)), Some("E:\\Projects\\plan.docx"));
    assert_eq!(map.stats.fallback_matches, 1);
}

#[test]
fn deleted_and_orphaned_files_are_counted() {
    let device = ScriptedDevice::new().push_enum_reply(enum_response(
        Frn(0x1000),
        &[
            entry(100, 5, "Users").directory(),
            entry(200, 100, "a.txt"),
            entry(300, 0x777, "orphan.log"),
        ],
    ));
    let scanner = VolumeScanner::new(ScriptedVolumes::new().with_volume(volume('C'), device));
    let requested = HashMap::from([
        (Frn(100), Frn(5)),
        (Frn(200), Frn(100)),
        (Frn(300), Frn(0x777)),
        (Frn(400), Frn(100)),
        (Frn(401), Frn(100)),
    ]);
    let map = scanner.build_path_map(volume('C'), &requested).unwrap();

    assert_eq!(map.stats.total_requested, 5);
    assert_eq!(map.stats.deleted_files, 2);
    assert_eq!(map.stats.true_orphans, 3);
    assert!(map.path_for(Frn(300)).is_none());

    // A deleted file still gets a path through its resolved parent
    let record = usntrace::ChangeRecord {
        usn: 1,
        frn: Frn(400),
        parent_frn: Frn(100),
        timestamp: 0,
        reason_flags: usn_reason::FILE_DELETE,
        file_attributes: 0,
        file_name: "gone.tmp".to_string(),
    };
    assert_eq!(map.display_path(&record).as_deref(), Some("C:\\Users\\gone.tmp"));
}

#[test]
fn root_resolves_for_both_reserved_frns() {
    let scanner = VolumeScanner::new(
        ScriptedVolumes::new().with_volume(volume('D'), ScriptedDevice::new()),
    );
    let map = scanner
        .build_path_map(volume('D'), &HashMap::from([(Frn(5), Frn(5)), (Frn(0), Frn(0))]))
        .unwrap();
    assert_eq!(map.path_for(Frn(5)), Some("D:\\"));
    assert_eq!(map.path_for(Frn(0)), Some("D:\\"));
}

#[test]
fn stalled_enumeration_keeps_partial_catalog() {
    let device = ScriptedDevice::new().repeat_enum(ScriptedResponse::Reply(enum_response(
        Frn(0x400),
        &[entry(100, 5, "Windows").directory()],
    )));
    let scanner = VolumeScanner::new(ScriptedVolumes::new().with_volume(volume('C'), device.clone()));
    let catalog = scanner.scan_catalog(volume('C')).unwrap();
    assert!(catalog.contains(Frn(100)));

    let mut device = device;
    let cancel = std::sync::atomic::AtomicBool::new(false);
    usntrace::ntfs::CatalogScanner::new(&mut device)
        .scan(&cancel)
        .unwrap();
    assert_eq!(device.call_count(fsctl::ENUM_USN_DATA), 2);
}

#[test]
fn cycles_never_hang() {
    let device = ScriptedDevice::new().push_enum_reply(enum_response(
        Frn(0x1000),
        &[
            entry(300, 301, "A").directory(),
            entry(301, 300, "B").directory(),
            entry(400, 300, "x.bin"),
        ],
    ));
    let scanner = VolumeScanner::new(ScriptedVolumes::new().with_volume(volume('C'), device));
    let map = scanner
        .build_path_map(volume('C'), &HashMap::from([(Frn(400), Frn(300))]))
        .unwrap();
    assert!(map.resolved_paths.is_empty());
    assert_eq!(map.stats.true_orphans, 1);
}

#[test]
fn volumes_without_journal_are_skipped() {
    let provider = ScriptedVolumes::new()
        .with_volume(volume('C'), users_volume())
        .with_volume(volume('F'), ScriptedDevice::new());
    let scanner = VolumeScanner::new(provider);

    let capable = scanner.journal_capable_volumes();
    assert!(capable.contains(&volume('C')));
    assert!(!capable.contains(&volume('F')));
    assert!(scanner.read_journal_entries(volume('F')).unwrap().is_empty());
    assert!(scanner.read_journal_entries(volume('Z')).unwrap().is_empty());
}

#[test]
fn multi_volume_runs_keep_order() {
    let provider = ScriptedVolumes::new()
        .with_volume(volume('C'), users_volume())
        .with_volume(volume('D'), ScriptedDevice::new());
    let scanner = MultiVolumeScanner::new(provider).with_config(ScanConfig {
        max_depth: 64,
        ..ScanConfig::default()
    });

    let results = scanner.trace_volumes(&[volume('D'), volume('C')]);
    assert_eq!(results[0].0, volume('D'));
    assert_eq!(results[1].0, volume('C'));

    let d = results[0].1.as_ref().unwrap();
    assert!(d.records.is_empty());
    let c = results[1].1.as_ref().unwrap();
    assert_eq!(c.paths.path_for(Frn(200)), Some("C:\\Users\\a.txt"));

    let maps = scanner.build_path_maps(&[(volume('C'), HashMap::from([(Frn(100), Frn(5))]))]);
    assert_eq!(maps[0].1.as_ref().unwrap().path_for(Frn(100)), Some("C:\\Users"));
}

#[test]
fn cancellation_propagates() {
    let scanner = VolumeScanner::new(ScriptedVolumes::new().with_volume(volume('C'), users_volume()));
    scanner.cancel_token().store(true, std::sync::atomic::Ordering::SeqCst);
    assert!(matches!(
        scanner.trace_volume(volume('C')),
        Err(UsnTraceError::Cancelled)
    ));
}

#[test]
fn path_map_serializes_to_json() {
    let scanner = VolumeScanner::new(ScriptedVolumes::new().with_volume(volume('C'), users_volume()));
    let map = scanner
        .build_path_map(volume('C'), &HashMap::from([(Frn(200), Frn(100))]))
        .unwrap();
    let json = serde_json::to_value(&map).unwrap();
    assert_eq!(json["resolved_paths"]["200"], "C:\\Users\\a.txt");
    assert_eq!(json["stats"]["fully_resolved"], 1);
}
