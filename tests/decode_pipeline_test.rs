//! End-to-end decoding tests (generate → frame → decode → compare)
//!
//! Buffers come from the seeded `BufferEmulator` or are framed by hand with
//! `BufferBuilder`; the decoded hits are compared slot by slot.

use std::collections::BTreeMap;
use std::io::Cursor;

use coda_rs::common::{DecodeError, SinkError, Warning};
use coda_rs::config::{Config, CrateMap, DecoderSettings, ModuleConfig};
use coda_rs::decoder::{DecodedHit, FrameWord, ModuleDecoder};
use coda_rs::dispatcher::EventDispatcher;
use coda_rs::emulator::{BufferEmulator, EmulatorConfig};
use coda_rs::event::{BufferBuilder, ControlKind, EventKind};
use coda_rs::sink::{ChannelSink, SinkMessage, SlotDataStore};
use coda_rs::source::{CodaFileReader, CodaFileWriter, SourceError};

const HALL_CONFIG: &str = r#"
[decoder]
max_event_length = 20000
max_hits_per_slot = 512

[[crates]]
id = 1

[[crates.modules]]
slot = 5
family = "fastbus"
model = "1877"
has_header = true
chan_mask = 0x00FE0000
chan_shift = 17
wdcnt_mask = 0x000007FF

[[crates.modules]]
slot = 6
family = "fastbus"
model = "1881"
chan_mask = 0x007F0000
chan_shift = 16
data_mask = 0x00003FFF

[[crates]]
id = 3

[[crates.modules]]
slot = 3
family = "pipelining"
model = "fadc250"
chan_mask = 0x07800000
chan_shift = 23
data_mask = 0x00000FFF

[[crates.modules]]
slot = 4
family = "pipelining"
model = "fadc250"
chan_mask = 0x07800000
chan_shift = 23
data_mask = 0x00000FFF

[[crates]]
id = 9

[[crates.modules]]
slot = 2
family = "scaler"
"#;

fn hall() -> Config {
    Config::from_toml(HALL_CONFIG).expect("parse hall config")
}

fn by_slot(hits: &[DecodedHit]) -> BTreeMap<(u32, u32), Vec<DecodedHit>> {
    let mut map: BTreeMap<(u32, u32), Vec<DecodedHit>> = BTreeMap::new();
    for h in hits {
        map.entry((h.crate_id, h.slot)).or_default().push(*h);
    }
    map
}

fn store_by_slot(store: &SlotDataStore) -> BTreeMap<(u32, u32), Vec<DecodedHit>> {
    let hits: Vec<DecodedHit> = store.hits().copied().collect();
    by_slot(&hits)
}

/// Decode `events` emulated buffers and compare each against the generated hits
fn run_emulated(block_size: u32, seed: u64, events: usize) {
    let mut config = hall();
    config.emulator = EmulatorConfig {
        seed,
        block_size,
        ..EmulatorConfig::default()
    };

    let mut dispatcher = EventDispatcher::from_config(&config).unwrap();
    let mut emulator = BufferEmulator::new(&config.crate_map(), config.emulator.clone());
    let mut store = SlotDataStore::new(config.decoder.max_hits_per_slot);

    let mut expected_hits = 0;
    for _ in 0..events {
        let buffer = emulator.next_physics();
        let kind = dispatcher.decode(&buffer.words, &mut store).unwrap();
        assert_eq!(kind, EventKind::Physics(1));
        assert_eq!(store.event_number(), buffer.event_number);
        assert_eq!(
            store_by_slot(&store),
            by_slot(&buffer.expected),
            "event {} (block size {}, seed {})",
            buffer.event_number,
            block_size,
            seed
        );
        expected_hits += buffer.expected.len() as u64;
    }

    let snap = dispatcher.metrics().snapshot();
    assert_eq!(snap.physics, events as u64);
    assert_eq!(snap.failed, 0);
    assert_eq!(snap.hits, expected_hits);
    assert!(dispatcher.warning_summary().is_empty());
}

#[test]
fn test_emulated_single_event_readout() {
    run_emulated(1, 1, 200);
}

#[test]
fn test_emulated_multiblock_readout() {
    for seed in [3, 17, 99] {
        run_emulated(4, seed, 100);
    }
}

#[test]
fn test_multiblock_sub_events_counted() {
    let mut config = hall();
    config.emulator.block_size = 3;
    let mut dispatcher = EventDispatcher::from_config(&config).unwrap();
    let mut emulator = BufferEmulator::new(&config.crate_map(), config.emulator.clone());
    let mut store = SlotDataStore::new(512);

    for _ in 0..10 {
        let buffer = emulator.next_physics();
        dispatcher.decode(&buffer.words, &mut store).unwrap();
    }

    // two pipelining modules, three sub-events each, ten buffers
    assert_eq!(dispatcher.metrics().snapshot().sub_events, 60);
    let decoder = dispatcher.crate_decoder(3).unwrap();
    assert_eq!(decoder.modules().len(), 2);
}

#[test]
fn test_module_joining_after_first_buffer() {
    let mut config = hall();
    config.emulator = EmulatorConfig {
        seed: 5,
        block_size: 3,
        late_slots: vec![4],
        ..EmulatorConfig::default()
    };
    let mut dispatcher = EventDispatcher::from_config(&config).unwrap();
    let mut emulator = BufferEmulator::new(&config.crate_map(), config.emulator.clone());
    let mut store = SlotDataStore::new(config.decoder.max_hits_per_slot);

    let first = emulator.next_physics();
    dispatcher.decode(&first.words, &mut store).unwrap();
    assert!(store.slot(3, 4).is_none());
    assert_eq!(store_by_slot(&store), by_slot(&first.expected));

    let mut late_sub_events = Vec::new();
    for _ in 0..20 {
        let buffer = emulator.next_physics();
        dispatcher.decode(&buffer.words, &mut store).unwrap();
        assert_eq!(
            store_by_slot(&store),
            by_slot(&buffer.expected),
            "event {}",
            buffer.event_number
        );
        if let Some(data) = store.slot(3, 4) {
            late_sub_events.extend(data.hits().iter().map(|h| h.sub_event));
        }
    }

    let module = dispatcher.crate_decoder(3).unwrap().module(4).unwrap();
    assert!(matches!(module, ModuleDecoder::Pipelining(m) if m.is_multiblock()));
    assert!(late_sub_events.iter().any(|&s| s > 0));
    assert!(dispatcher.warning_summary().is_empty());
}

#[test]
fn test_max_event_length_boundary() {
    let payload: Vec<u32> = (0..20).map(|i| 0xF800_0000 | (i << 16) | i).collect();
    let buffer = BufferBuilder::physics(1, 1).roc(1, &payload).build();

    let mut map = CrateMap::default();
    map.insert(1, ModuleConfig::fastbus(31, 0x001F_0000, 16, 0xFFFF));

    for (max, ok) in [(buffer.len(), true), (buffer.len() - 1, false)] {
        let settings = DecoderSettings {
            max_event_length: max,
            ..DecoderSettings::default()
        };
        let mut dispatcher = EventDispatcher::new(&map, settings).unwrap();
        let mut store = SlotDataStore::new(64);
        let result = dispatcher.decode(&buffer, &mut store);

        if ok {
            assert!(result.is_ok());
            assert_eq!(store.slot(1, 31).unwrap().len(), 20);
        } else {
            assert!(matches!(result, Err(DecodeError::Truncated { .. })));
            assert_eq!(store.num_hits(), 0);
        }
    }
}

#[test]
fn test_trailer_mismatch_leaves_hits_unchanged() {
    let mut map = CrateMap::default();
    map.insert(3, ModuleConfig::pipelining(3, 0x0780_0000, 23, 0x0FFF));

    let block = |trailer_count: u32| {
        vec![
            FrameWord::block_header(3, 1, 2),
            FrameWord::event_header(3, 0),
            (1 << 23) | 100,
            (2 << 23) | 200,
            FrameWord::event_header(3, 1),
            (3 << 23) | 300,
            FrameWord::block_trailer(3, trailer_count),
        ]
    };

    let decode = |payload: Vec<u32>| {
        let mut dispatcher = EventDispatcher::new(&map, DecoderSettings::default()).unwrap();
        let mut store = SlotDataStore::new(64);
        let buffer = BufferBuilder::physics(1, 1).roc(3, &payload).build();
        dispatcher.decode(&buffer, &mut store).unwrap();
        (store_by_slot(&store), dispatcher.warning_summary())
    };

    let (good, good_warnings) = decode(block(7));
    let (bad, bad_warnings) = decode(block(99));

    assert_eq!(good, bad);
    let hits = &good[&(3, 3)];
    let tagged: Vec<(u32, u32, u32)> = hits
        .iter()
        .map(|h| (h.sub_event, h.channel, h.value))
        .collect();
    assert_eq!(tagged, vec![(0, 1, 100), (0, 2, 200), (1, 3, 300)]);
    assert!(good_warnings.is_empty());
    assert_eq!(bad_warnings, vec![(Warning::WordCountMismatch, 1)]);
}

#[test]
fn test_full_run_sequence() {
    let config = hall();
    let mut dispatcher = EventDispatcher::from_config(&config).unwrap();
    let mut emulator = BufferEmulator::new(&config.crate_map(), config.emulator.clone());
    let mut store = SlotDataStore::new(512);

    let prestart = emulator.prestart(4321, 2);
    dispatcher.decode(&prestart, &mut store).unwrap();
    let go = emulator.go();
    dispatcher.decode(&go, &mut store).unwrap();

    for _ in 0..5 {
        let buffer = emulator.next_physics();
        dispatcher.decode(&buffer.words, &mut store).unwrap();
    }
    let scalers = emulator.scaler_event();
    assert_eq!(dispatcher.decode(&scalers.words, &mut store), Ok(EventKind::Scaler));

    let epics = BufferBuilder::epics("Tue Jun 17 12:00:00 2003\nHALLA:bpm 0.25 mm\n").build();
    dispatcher.decode(&epics, &mut store).unwrap();
    let prescale = BufferBuilder::prescale_text("ps1=2 ps2=100").build();
    dispatcher.decode(&prescale, &mut store).unwrap();

    let end = emulator.end();
    assert_eq!(
        dispatcher.decode(&end, &mut store),
        Ok(EventKind::Control(ControlKind::End))
    );

    let run = dispatcher.run_info();
    assert_eq!(run.run_number, 4321);
    assert_eq!(run.run_type, 2);
    assert_eq!(run.event_count, 5);
    assert!(run.go_time.is_some());
    assert!(run.end_time.is_some());

    let counts = emulator.scaler_counts(9, 2).unwrap();
    for (channel, &count) in counts.iter().enumerate() {
        assert_eq!(dispatcher.scaler(9, 2, channel as u32), Some(count));
    }
    // five physics readouts plus the scaler event
    assert_eq!(dispatcher.scaler_reads(9, 2), 6);

    assert_eq!(dispatcher.epics_value("HALLA:bpm", None), Some(0.25));
    assert_eq!(dispatcher.epics_value("HALLA:bpm", Some(5)), Some(0.25));
    assert_eq!(dispatcher.prescale_factor(2), 100);

    let snap = dispatcher.metrics().snapshot();
    assert_eq!(snap.buffers, 11);
    assert_eq!(snap.control, 3);
    assert_eq!(snap.physics, 5);
    assert_eq!(snap.scaler, 1);
    assert_eq!(snap.epics, 1);
    assert_eq!(snap.prescale, 1);
}

#[test]
fn test_channel_sink_delivers_events() {
    let config = hall();
    let mut dispatcher = EventDispatcher::from_config(&config).unwrap();
    let mut emulator = BufferEmulator::new(&config.crate_map(), config.emulator.clone());

    let (mut sink, rx) = ChannelSink::bounded(4096);
    let mut generated = Vec::new();
    for _ in 0..20 {
        let buffer = emulator.next_physics();
        dispatcher.decode(&buffer.words, &mut sink).unwrap();
        generated.extend(buffer.expected);
    }
    drop(sink);

    let received: Vec<DecodedHit> = rx
        .iter()
        .filter_map(|m| match m {
            SinkMessage::Hit(h) => Some(h),
            SinkMessage::BeginEvent(_) => None,
        })
        .collect();
    assert_eq!(by_slot(&received), by_slot(&generated));
}

#[test]
fn test_disconnected_sink_aborts_run() {
    let config = hall();
    let mut dispatcher = EventDispatcher::from_config(&config).unwrap();
    let mut emulator = BufferEmulator::new(&config.crate_map(), config.emulator.clone());

    let (mut sink, rx) = ChannelSink::bounded(1);
    drop(rx);

    // scaler crate always produces hits
    let buffer = emulator.next_physics();
    assert_eq!(
        dispatcher.decode(&buffer.words, &mut sink),
        Err(DecodeError::SinkFailed(SinkError::Disconnected))
    );
    assert!(dispatcher.is_poisoned());

    let buffer = emulator.next_physics();
    assert_eq!(
        dispatcher.decode(&buffer.words, &mut sink),
        Err(DecodeError::RunAborted)
    );
    assert_eq!(dispatcher.metrics().snapshot().failed, 1);
}

#[test]
fn test_file_round_trip() {
    let config = hall();
    let mut emulator = BufferEmulator::new(&config.crate_map(), config.emulator.clone());

    let mut generated = Vec::new();
    let mut writer = CodaFileWriter::new(Vec::new());
    writer.write_buffer(&emulator.prestart(7, 0)).unwrap();
    for _ in 0..25 {
        let buffer = emulator.next_physics();
        writer.write_buffer(&buffer.words).unwrap();
        generated.push(buffer);
    }
    writer.write_buffer(&emulator.end()).unwrap();
    let bytes = writer.finish().unwrap();

    let mut dispatcher = EventDispatcher::from_config(&config).unwrap();
    let mut store = SlotDataStore::new(512);
    let mut reader = CodaFileReader::new(Cursor::new(bytes), config.decoder.max_event_length);
    let mut physics = generated.iter();

    while let Some(buffer) = reader.next_buffer().unwrap() {
        if let EventKind::Physics(_) = dispatcher.decode(&buffer, &mut store).unwrap() {
            let expected = physics.next().unwrap();
            assert_eq!(store_by_slot(&store), by_slot(&expected.expected));
        }
    }
    assert!(physics.next().is_none());
    assert_eq!(reader.buffers_read(), 27);
    assert_eq!(dispatcher.run_info().run_number, 7);
}

#[test]
fn test_file_reader_skips_over_long_buffer() {
    let mut writer = CodaFileWriter::new(Vec::new());
    writer
        .write_buffer(&BufferBuilder::physics(1, 1).raw(&[0; 50]).build())
        .unwrap();
    writer
        .write_buffer(&BufferBuilder::control(ControlKind::Go, 1, 0, 0).build())
        .unwrap();
    let bytes = writer.finish().unwrap();

    let mut reader = CodaFileReader::new(Cursor::new(bytes), 20);
    assert!(matches!(
        reader.next_buffer(),
        Err(SourceError::TooLong { max: 20, .. })
    ));
    let go = reader.next_buffer().unwrap().unwrap();
    assert_eq!(EventKind::classify(&go), Some(EventKind::Control(ControlKind::Go)));
    assert!(reader.next_buffer().unwrap().is_none());
}
