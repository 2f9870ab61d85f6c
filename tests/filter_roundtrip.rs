//! End-to-end filtering of hand-assembled Python 2 pickles

use num_bigint::BigInt;
use pretty_assertions::assert_eq;

use picklefilter::pickle::{
    binstring, encode, filter, filter_events, filter_record, Argument, DecodeError, EncodeError,
    Event, OpReader, Opcode,
};
use picklefilter::{Error, Renamer};

// pickle.dumps([1, 2.5, u'h\xe9\n\\', 'x', None, True, 12345678901234567890L], 0)
const PROTO0_LIST: &[u8] =
    b"(lp0\nI1\naF2.5\naVh\xe9\\u000a\\u005c\np1\naS'x'\np2\naNaI01\naL12345678901234567890L\na.";

// pickle.dumps({'k': (1, -1, 300, 70000)}, 1)
const PROTO1_DICT: &[u8] =
    b"}q\x00U\x01kq\x01(K\x01J\xff\xff\xff\xffM,\x01Jp\x11\x01\x00tq\x02s.";

// protocol 2 object built through copy_reg.__newobj__ with a mix of binary opcodes
const PROTO2_OBJ: &[u8] = b"\x80\x02cmyapp.models\nPerson\nq\x00)\x81q\x01}q\x02(U\x04nameq\x03X\x03\x00\x00\x00Bobq\x04U\x03ageq\x05G@E\x00\x00\x00\x00\x00\x00U\x02idq\x06\x8a\x09\x00\x00\x00\x00\x00\x00\x00\x00\x01U\x05flagsq\x07(\x88\x89Ntq\x08U\x03refh\x03U\x03extr\x00\x01\x00\x00\x82\x05ub.";

fn decode(data: &[u8]) -> Vec<Event> {
    OpReader::new(data).collect::<Result<_, _>>().unwrap()
}

fn roundtrip(opcode: Opcode, arg: &Argument) -> Argument {
    let mut bytes = encode(opcode, arg).unwrap();
    bytes.push(b'.');
    let events = decode(&bytes);
    assert_eq!(events.len(), 2, "{} {}", opcode, arg);
    assert_eq!(events[0].opcode, opcode);
    assert_eq!(filter(|_, _| None, &bytes).unwrap(), bytes);
    events[0].arg.clone()
}

#[test]
fn identity_roundtrip_across_protocols() {
    for data in [PROTO0_LIST, PROTO1_DICT, PROTO2_OBJ] {
        assert_eq!(filter(|_, _| None, data).unwrap(), data);
    }
}

#[test]
fn proto0_arguments_decode_as_expected() {
    let events = decode(PROTO0_LIST);
    let args: Vec<&Argument> = events.iter().map(|e| &e.arg).filter(|a| !a.is_none()).collect();
    assert_eq!(
        args,
        vec![
            &Argument::Int(0),
            &Argument::Int(1),
            &Argument::Float(2.5),
            &Argument::from("h\u{e9}\n\\"),
            &Argument::Int(1),
            &Argument::Bytes(b"x".to_vec()),
            &Argument::Int(2),
            &Argument::BoxedInt(1),
            &Argument::Long("12345678901234567890".parse::<BigInt>().unwrap()),
        ]
    );
}

#[test]
fn substitution_only_touches_its_own_byte_range() {
    let events = decode(PROTO2_OBJ);
    let target = events
        .iter()
        .position(|e| e.opcode == Opcode::BinUnicode)
        .unwrap();

    let mut index = 0;
    let out = filter(
        |_, _| {
            let hit = index == target;
            index += 1;
            hit.then(|| (Opcode::BinUnicode, Argument::from("Ann")))
        },
        PROTO2_OBJ,
    )
    .unwrap();

    let start = events[target].offset;
    let end = events[target + 1].offset;
    assert_eq!(out.len(), PROTO2_OBJ.len());
    assert_eq!(&out[..start], &PROTO2_OBJ[..start]);
    assert_eq!(&out[start..end], b"X\x03\x00\x00\x00Ann");
    assert_eq!(&out[end..], &PROTO2_OBJ[end..]);
}

#[test]
fn growing_substitution_shifts_the_tail_only() {
    let long_name = vec![b'n'; 300];
    let out = filter(
        |op, arg| match (op, arg) {
            (Opcode::ShortBinString, Argument::Bytes(b)) if b == b"name" => {
                Some(binstring(long_name.clone()))
            }
            _ => None,
        },
        PROTO2_OBJ,
    )
    .unwrap();

    let events = decode(PROTO2_OBJ);
    let hit = events
        .iter()
        .position(|e| e.arg == Argument::Bytes(b"name".to_vec()))
        .unwrap();
    let start = events[hit].offset;
    let end = events[hit + 1].offset;

    assert_eq!(&out[..start], &PROTO2_OBJ[..start]);
    assert_eq!(&out[start..start + 5], b"T\x2c\x01\x00\x00");
    assert_eq!(&out[start + 305..], &PROTO2_OBJ[end..]);

    let rewritten = decode(&out);
    assert_eq!(rewritten.len(), events.len());
    assert_eq!(rewritten[hit].arg, Argument::Bytes(long_name));
}

#[test]
fn numeric_boundaries_roundtrip() {
    for v in [0i64, 255, 256, 65535, 65536, -1, -65536] {
        assert_eq!(roundtrip(Opcode::Int, &Argument::Int(v)), Argument::Int(v));
        assert_eq!(roundtrip(Opcode::BinInt, &Argument::Int(v)), Argument::Int(v));
        for op in [Opcode::Long, Opcode::Long1, Opcode::Long4] {
            assert_eq!(roundtrip(op, &Argument::Int(v)), Argument::Long(BigInt::from(v)));
        }
        if (0..=255).contains(&v) {
            assert_eq!(roundtrip(Opcode::BinInt1, &Argument::Int(v)), Argument::Int(v));
            assert_eq!(roundtrip(Opcode::BinPut, &Argument::Int(v)), Argument::Int(v));
        }
        if (0..=65535).contains(&v) {
            assert_eq!(roundtrip(Opcode::BinInt2, &Argument::Int(v)), Argument::Int(v));
            assert_eq!(roundtrip(Opcode::Ext2, &Argument::Int(v)), Argument::Int(v));
        }
        if v >= 0 {
            assert_eq!(roundtrip(Opcode::Put, &Argument::Int(v)), Argument::Int(v));
            assert_eq!(roundtrip(Opcode::LongBinGet, &Argument::Int(v)), Argument::Int(v));
        }
    }
    assert_eq!(roundtrip(Opcode::Int, &Argument::BoxedInt(0)), Argument::BoxedInt(0));
    assert_eq!(roundtrip(Opcode::Int, &Argument::BoxedInt(1)), Argument::BoxedInt(1));
}

#[test]
fn float_boundaries_roundtrip() {
    for v in [0.0, -0.0, 0.1, 1e-5, 1e16, -123.456, 1.7976931348623157e308, f64::INFINITY] {
        assert_eq!(roundtrip(Opcode::Float, &Argument::Float(v)), Argument::Float(v));
        assert_eq!(roundtrip(Opcode::BinFloat, &Argument::Float(v)), Argument::Float(v));
    }
}

#[test]
fn string_boundaries_roundtrip() {
    let empty = Argument::Bytes(Vec::new());
    for op in [Opcode::String, Opcode::BinString, Opcode::ShortBinString, Opcode::PersId] {
        assert_eq!(roundtrip(op, &empty), empty);
    }

    let awkward = Argument::Bytes(b"it's a \"quote\"\n\\\x00\xff".to_vec());
    assert_eq!(roundtrip(Opcode::String, &awkward), awkward);

    let text = Argument::from("line\nbreak \\ back\u{e9}\u{20ac}\u{1f600}");
    assert_eq!(roundtrip(Opcode::Unicode, &text), text);
    assert_eq!(roundtrip(Opcode::BinUnicode, &text), text);
    assert_eq!(roundtrip(Opcode::Unicode, &Argument::from("")), Argument::from(""));

    let long = vec![0xabu8; 256];
    let (op, arg) = binstring(long.clone());
    assert_eq!(op, Opcode::BinString);
    assert_eq!(roundtrip(op, &arg), Argument::Bytes(long));
    assert_eq!(binstring(vec![0; 255]).0, Opcode::ShortBinString);
}

#[test]
fn lone_surrogates_roundtrip_byte_for_byte() {
    // pickle.dumps(u'\ud800', 0), then BINUNICODE holding a lone surrogate
    // and a pair split into two sequences
    let cases: [&[u8]; 3] = [
        b"V\\ud800\np0\n.",
        b"\x80\x02X\x04\x00\x00\x00a\xed\xb0\x80q\x00.",
        b"\x80\x02X\x06\x00\x00\x00\xed\xa0\xbd\xed\xb8\x80q\x00.",
    ];
    for data in cases {
        assert_eq!(filter(|_, _| None, data).unwrap(), data);
    }

    assert_eq!(decode(cases[0])[0].arg, Argument::WideText(vec![0xd800]));
    assert_eq!(decode(cases[1])[1].arg, Argument::WideText(vec![0x61, 0xdc00]));

    // the same text moves between the two opcodes without loss
    let wide = Argument::WideText(vec![0x5c, 0xdbff, 0x0a]);
    assert_eq!(roundtrip(Opcode::Unicode, &wide), wide);
    assert_eq!(roundtrip(Opcode::BinUnicode, &wide), wide);
}

#[test]
fn float_text_is_rewritten_in_repr_form() {
    // cPickle writes protocol 0 floats with %.17g; they decode to the same
    // value but re-encode as repr()
    let data: &[u8] = b"F0.10000000000000001\n.";
    assert_eq!(decode(data)[0].arg, Argument::Float(0.1));
    assert_eq!(filter(|_, _| None, data).unwrap(), b"F0.1\n.");
    assert_eq!(filter(|_, _| None, b"F1\n.").unwrap(), b"F1.0\n.");
    assert!(!picklefilter::PickleFilter::new().is_identity(data).unwrap());
}

#[test]
fn uppercase_short_binstring_scenario() {
    let events = decode(b"U\x02ab.");
    assert_eq!(events[0].opcode, Opcode::ShortBinString);
    assert_eq!(events[0].arg, Argument::Bytes(b"ab".to_vec()));

    let out = filter(
        |op, arg| match (op, arg) {
            (Opcode::ShortBinString, Argument::Bytes(b)) => {
                Some((op, Argument::Bytes(b.to_ascii_uppercase())))
            }
            _ => None,
        },
        b"U\x02ab.",
    )
    .unwrap();
    assert_eq!(out, b"U\x02AB.");
}

#[test]
fn record_rename_across_pickles() {
    let class_pickle: &[u8] = b"cmyapp.models\nPerson\nq\x01.";
    let record = [class_pickle, PROTO2_OBJ].concat();

    let mut renamer =
        Renamer::from_json(r#"{"myapp.models Person": "people.models Person"}"#).unwrap();
    let out = filter_record(|op, arg| renamer.apply(op, arg), &record).unwrap();

    let expected_class: &[u8] = b"cpeople.models\nPerson\nq\x01.";
    assert_eq!(&out[..expected_class.len()], expected_class);
    assert_eq!(renamer.applied(), 2);

    let mut second = OpReader::at(&out, expected_class.len());
    let first_event = second.next().unwrap().unwrap();
    assert_eq!(first_event.opcode, Opcode::Proto);
    let global = second.nth(0).unwrap().unwrap();
    assert_eq!(global.arg.as_global(), Some(("people.models", "Person")));
}

#[test]
fn unknown_opcode_is_fatal() {
    let err = filter(|_, _| None, b"\x80\x02N\xfe.").unwrap_err();
    assert!(matches!(
        err,
        Error::Decode(DecodeError::UnknownOpcode { code: 0xfe, offset: 3 })
    ));
    assert_eq!(err.offset(), Some(3));
}

#[test]
fn mismatched_substitution_is_fatal() {
    let err = filter(
        |op, _| (op == Opcode::Global).then(|| (Opcode::Global, Argument::Float(1.0))),
        PROTO2_OBJ,
    )
    .unwrap_err();
    match err {
        Error::Encode { offset, opcode, source } => {
            assert_eq!(offset, 2);
            assert_eq!(opcode, Opcode::Global);
            assert!(matches!(source, EncodeError::ArgumentMismatch { .. }));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn external_decoder_errors_propagate_unchanged() {
    let events = vec![
        Ok(Event {
            opcode: Opcode::Mark,
            arg: Argument::None,
            offset: 0,
        }),
        Err(DecodeError::MalformedInput {
            offset: 1,
            reason: "bad frame".to_string(),
        }),
    ];
    let err = filter_events(events, |_, _| None).unwrap_err();
    assert_eq!(err.to_string(), "malformed input at offset 1: bad frame");
}
