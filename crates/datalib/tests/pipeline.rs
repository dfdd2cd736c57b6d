// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com
//
// End-to-end: type libraries compiled to binary and merged from files,
// instances packed from text, written in foreign formats and read back.

use datalib::error::FormatError;
use datalib::util::{self, FileType};
use datalib::{codec, text, DlError, Endian, Format, PtrSize, Registry};

const BASE_LIB: &str = r#"{
    "enums": {
        "Team": { "values": { "RED": 0, "BLUE": 1 } }
    },
    "types": {
        "Vec3": { "members": [
            { "name": "x", "type": "fp32" },
            { "name": "y", "type": "fp32" },
            { "name": "z", "type": "fp32", "default": 0.0 }
        ] }
    }
}"#;

const GAME_LIB: &str = r#"{
    "types": {
        "Unit": { "members": [
            { "name": "name", "type": "string" },
            { "name": "team", "type": "Team", "default": "RED" },
            { "name": "pos", "type": "Vec3" },
            { "name": "path", "type": "Vec3[]", "default": [] },
            { "name": "target", "type": "Unit*", "default": null }
        ] },
        "Level": { "members": [
            { "name": "title", "type": "string" },
            { "name": "units", "type": "Unit*[]" }
        ] }
    }
}"#;

const LEVEL: &str = r#"{ "Level": {
    "title": "ambush",
    "units": [ "scout", "tank", "scout" ],
    "__subdata": {
        "scout": {
            "name": "scout",
            "team": "BLUE",
            "pos": { "x": 1.5, "y": -2.0 },
            "path": [ { "x": 0.0, "y": 0.0 }, { "x": 4.0, "y": 4.0, "z": 1.0 } ],
            "target": "tank"
        },
        "tank": {
            "name": "tank",
            "pos": [ 10.0, 10.0, 0.5 ],
            "target": "scout"
        }
    }
} }"#;

fn compiled(dir: &std::path::Path) -> Registry {
    let base = dir.join("base.tld");
    let game = dir.join("game.tld");
    std::fs::write(&base, BASE_LIB).expect("write base");
    std::fs::write(&game, GAME_LIB).expect("write game");

    let mut registry = Registry::new();
    util::load_typelib_file(&mut registry, &base).expect("base");
    util::load_typelib_file(&mut registry, &game).expect("game");

    let tlb = dir.join("all.tlb");
    std::fs::write(&tlb, registry.write_binary().expect("encode")).expect("write tlb");

    let mut reloaded = Registry::new();
    util::load_typelib_file(&mut reloaded, &tlb).expect("binary");
    reloaded
}

#[test]
fn test_binary_library_packs_like_text_library() {
    let dir = tempfile::tempdir().expect("tempdir");
    let from_binary = compiled(dir.path());

    let mut from_text = Registry::from_text(BASE_LIB).expect("base");
    from_text.load_text(GAME_LIB).expect("game");

    for format in [
        Format::new(Endian::Little, PtrSize::Ptr32),
        Format::new(Endian::Big, PtrSize::Ptr64),
    ] {
        let a = text::pack_with_format(&from_text, LEVEL, format).expect("text lib");
        let b = text::pack_with_format(&from_binary, LEVEL, format).expect("binary lib");
        assert_eq!(a, b);
    }
}

#[test]
fn test_shared_units_are_stored_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let registry = compiled(dir.path());
    let level_t = registry.type_id_by_name("Level").expect("Level");

    let (_, level) = text::parse(&registry, LEVEL).expect("parse");
    // root, scout, tank
    assert_eq!(level.normalized().node_count(), 3);

    let bytes = text::pack(&registry, LEVEL).expect("pack");
    let loaded = codec::load(&registry, level_t, &bytes).expect("load");
    assert_eq!(loaded, level);

    let units = loaded.root().as_members().expect("Level")[1]
        .as_elements()
        .expect("units")
        .to_vec();
    assert_eq!(units.len(), 3);
    assert_eq!(units[0], units[2]);
    assert_ne!(units[0], units[1]);
}

#[test]
fn test_files_in_every_form() {
    let dir = tempfile::tempdir().expect("tempdir");
    let registry = compiled(dir.path());
    let level_t = registry.type_id_by_name("Level").expect("Level");
    let (_, level) = text::parse(&registry, LEVEL).expect("parse");

    let foreign = Format::new(Endian::host().other(), PtrSize::Ptr32);
    let bin = dir.path().join("level.bin");
    util::store_to_file(&registry, level_t, &bin, FileType::Binary, foreign, &level)
        .expect("store binary");
    let info = codec::instance_info(&std::fs::read(&bin).expect("read")).expect("info");
    assert_eq!(info.endian, foreign.endian);

    let txt = dir.path().join("level.txt");
    util::store_to_file(&registry, level_t, &txt, FileType::Text, foreign, &level)
        .expect("store text");

    for (path, file_type) in [
        (&bin, FileType::Auto),
        (&bin, FileType::Binary),
        (&txt, FileType::Auto),
        (&txt, FileType::Text),
    ] {
        let back = util::load_from_file(&registry, level_t, path, file_type).expect("load");
        assert_eq!(back, level, "{} as {:?}", path.display(), file_type);
    }

    let unit_t = registry.type_id_by_name("Unit").expect("Unit");
    let err = util::load_from_file(&registry, unit_t, &txt, FileType::Auto).expect_err("type");
    assert!(matches!(err, DlError::Format(FormatError::TypeMismatch { .. })));
    let err = util::load_from_file(&registry, unit_t, &bin, FileType::Auto).expect_err("type");
    assert!(matches!(err, DlError::Format(FormatError::TypeMismatch { .. })));

    let missing = dir.path().join("missing.bin");
    let err = util::load_from_file(&registry, level_t, &missing, FileType::Auto)
        .expect_err("missing");
    assert!(matches!(err, DlError::Io(_)));
}

#[test]
fn test_defaults_survive_the_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let registry = compiled(dir.path());
    let unit_t = registry.type_id_by_name("Unit").expect("Unit");

    let bytes = text::pack(
        &registry,
        r#"{ "Unit": { "name": "lone", "pos": { "x": 1.0, "y": 2.0 } } }"#,
    )
    .expect("pack");
    let unit = codec::load(&registry, unit_t, &bytes).expect("load");
    let text = text::write_text(&registry, &unit).expect("write");
    assert!(text.contains("\"team\" : \"RED\""));
    assert!(text.contains("\"z\" : 0.0"));
    assert!(text.contains("\"target\" : null"));
    assert!(text.contains("\"path\" : []"));
}
