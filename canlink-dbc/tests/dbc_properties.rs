//! End-to-end behaviour of the public API: parsing, serializing, decoding and encoding

use canlink_dbc::bits::{self, extract_raw};
use canlink_dbc::signals::{parse_dbc, parse_dbc_with_report, write_dbc};
use canlink_dbc::{
    ByteOrder, CanFrame, Command, DbcDocument, Decoder, DecoderConfig, MessageDecoder, Signal,
    SignalKey, ValueType,
};
use std::collections::BTreeMap;

const POWERTRAIN: &str = r#"VERSION "2.1"

NS_ :
    CM_
    BA_DEF_
    BA_
    VAL_

BS_:

BU_: Engine Gateway Dash

VAL_TABLE_ GearTable 0 "Park" 1 "Reverse" 2 "Neutral" 3 "Drive" ;

BO_ 100 EngineStatus: 8 Engine
 SG_ EngineSpeed : 0|16@1+ (0.25,0) [0|16383.75] "rpm" Gateway,Dash
 SG_ CoolantTemp : 16|8@1- (1,-40) [-40|87] "degC" Dash
 SG_ Gear : 24|2@1+ (1,0) [0|3] "" Dash
 SG_ ThrottleRaw : 39|12@0+ (0.1,0) [0|409.5] "%" Vector__XXX

BO_ 2566844926 DiagResponse: 8 Gateway
 SG_ Service : 0|8@1+ (1,0) [0|255] "" Engine

CM_ "Powertrain bus";
CM_ BU_ Engine "Engine control unit";
CM_ BO_ 100 "Periodic engine data";
CM_ SG_ 100 EngineSpeed "Crankshaft speed";
BA_DEF_ BO_ "GenMsgCycleTime" INT 0 65535;
BA_ "BusType" "CAN";
BA_ "GenMsgCycleTime" BO_ 100 10;
VAL_ 100 Gear 0 "Park" 1 "Reverse" 2 "Neutral" 3 "Drive" ;
"#;

fn document() -> DbcDocument {
    parse_dbc(POWERTRAIN)
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn round_trip_preserves_document() {
    let original = document();
    let reparsed = parse_dbc(&write_dbc(&original));

    let names = |doc: &DbcDocument| doc.nodes.iter().map(|n| n.name.clone()).collect::<Vec<_>>();
    assert_eq!(names(&reparsed), names(&original));
    assert_eq!(reparsed.messages.len(), original.messages.len());

    for (a, b) in original.messages.iter().zip(&reparsed.messages) {
        assert_eq!((a.id, &a.name, a.length), (b.id, &b.name, b.length));
        assert_eq!(a.description, b.description);
        for (x, y) in a.signals.iter().zip(&b.signals) {
            assert_eq!(x.name, y.name);
            assert_eq!(
                (x.start_bit, x.length, x.byte_order, x.value_type),
                (y.start_bit, y.length, y.byte_order, y.value_type)
            );
            assert_eq!((x.factor, x.offset, x.min, x.max), (y.factor, y.offset, y.min, y.max));
            assert_eq!(x.unit, y.unit);
            assert_eq!(x.description, y.description);
            assert_eq!(x.value_descriptions, y.value_descriptions);
        }
    }

    assert_eq!(reparsed, original);
}

#[test]
fn encode_then_decode_is_inverse() {
    let signal = Signal::new("Speed", 0, 16, ByteOrder::LittleEndian, ValueType::Unsigned)
        .with_scaling(0.1, 0.0);

    let mut payload = [0u8; 8];
    bits::encode_into(&mut payload, 120.0, &signal).unwrap();
    let decoded = bits::decode(&payload, &signal).unwrap();

    assert!((decoded - 120.0).abs() <= signal.factor / 2.0);
}

#[test]
fn signed_fields_are_sign_extended() {
    let signal = Signal::new("S", 0, 8, ByteOrder::LittleEndian, ValueType::Signed);
    assert_eq!(bits::decode(&[0xFF], &signal), Some(-1.0));
    assert_eq!(bits::decode(&[0x7F], &signal), Some(127.0));
}

#[test]
fn byte_orders_read_differently() {
    let payload = [0x12, 0x34];
    let intel = extract_raw(&payload, 0, 16, ByteOrder::LittleEndian);
    let motorola = extract_raw(&payload, 7, 16, ByteOrder::BigEndian);

    assert_eq!(intel, 0x3412);
    assert_eq!(motorola, 0x1234);
    assert_ne!(intel, motorola);
}

#[test]
fn multi_line_comment_is_joined() {
    let text = "BO_ 100 Msg: 8 Node\nCM_ BO_ 100 \"line one\nline two\";\n";
    let doc = parse_dbc(text);
    assert_eq!(doc.message(100).unwrap().description, "line one\nline two");
}

#[test]
fn value_descriptions_before_signal_are_attached() {
    let text = r#"VAL_ 100 Mode 0 "Off" 1 "On" ;
BO_ 100 Msg: 8 Node
 SG_ Mode : 0|1@1+ (1,0) [0|1] "" Vector__XXX
"#;
    let doc = parse_dbc(text);
    let mode = doc.signal(&SignalKey::new(100, "Mode")).unwrap();
    assert_eq!(mode.value_descriptions[&1], "On");
}

#[test]
fn unknown_frame_id_decodes_to_nothing() {
    let frame = CanFrame::new(0x999, vec![0xFF; 8]);
    let signals = MessageDecoder::decode_frame(&frame, &document(), &DecoderConfig::default());
    assert!(signals.is_empty());
}

#[test]
fn broken_signal_line_is_skipped() {
    init_logging();
    let text = r#"BO_ 100 Msg: 8 Node
 SG_ Good : 0|8@1+ (1,0) [0|255] "" Vector__XXX
 SG_ Broken : 8|x@1+ (1,0) [0|255] "" Vector__XXX
 SG_ AlsoGood : 16|8@1+ (1,0) [0|255] "" Vector__XXX
BO_ 200 Other: 2 Node
"#;
    let (doc, report) = parse_dbc_with_report(text);
    let names: Vec<_> = doc.message(100).unwrap().signals.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["Good", "AlsoGood"]);
    assert!(doc.message(200).is_some());
    assert_eq!(report.skipped_records, 1);
}

#[test]
fn parsed_document_contents() {
    let doc = document();
    assert_eq!(doc.version, "2.1");
    assert_eq!(doc.comment, "Powertrain bus");
    assert_eq!(doc.node("Engine").unwrap().comment, "Engine control unit");
    assert_eq!(doc.value_tables["GearTable"].len(), 4);
    assert_eq!(doc.attributes["BusType"], "CAN");

    let engine = doc.message(100).unwrap();
    assert_eq!(engine.attributes["GenMsgCycleTime"], "10");
    assert_eq!(engine.signal("EngineSpeed").unwrap().description, "Crankshaft speed");
    assert!(engine.signal("ThrottleRaw").unwrap().receivers.is_empty());

    let diag = doc.message_by_name("DiagResponse").unwrap();
    assert!(diag.is_extended());
    assert_eq!(diag.raw_id(), 0x18DA_F1FE);
}

#[test]
fn decoder_end_to_end() {
    init_logging();
    let decoder = Decoder::new();
    let report = decoder.load_dbc_str(POWERTRAIN);
    assert!(report.is_clean());

    let values = BTreeMap::from([
        ("EngineSpeed".to_string(), 3000.0),
        ("CoolantTemp".to_string(), 85.0),
        ("Gear".to_string(), 3.0),
        ("ThrottleRaw".to_string(), 12.5),
    ]);
    let frame = decoder.encode_message(100, &values).unwrap().into_frame();

    let decoded = decoder.decode_frame(&frame);
    let by_name: BTreeMap<_, _> = decoded.iter().map(|s| (s.name(), s)).collect();
    assert_eq!(by_name["EngineSpeed"].value, 3000.0);
    assert_eq!(by_name["CoolantTemp"].value, 85.0);
    assert_eq!(by_name["Gear"].formatted, "Drive");
    assert!((by_name["ThrottleRaw"].value - 12.5).abs() < 1e-9);
}

#[test]
fn commands_from_json_edit_and_transmit() {
    let decoder = Decoder::new();
    decoder.load_dbc_str(POWERTRAIN);

    let commands = Command::parse_batch(
        r#"[
            {"type": "update_signal", "message_id": 100, "name": "Gear",
             "changes": {"value_descriptions": {"0": "P", "3": "D"}}},
            {"type": "delete_message", "id": 2566844926},
            {"type": "send_signals", "message_id": 100, "values": {"Gear": 3}}
        ]"#,
    )
    .unwrap();

    let outcome = decoder.apply_commands(&commands);
    assert_eq!(outcome.failures(), 0);
    assert_eq!(decoder.database_stats().num_messages, 1);

    let frame = outcome.frames().next().unwrap();
    let decoded = decoder.decode_frame(&CanFrame::new(frame.can_id, frame.data.clone()));
    let gear = decoded.iter().find(|s| s.name() == "Gear").unwrap();
    assert_eq!(gear.formatted, "D");
}
