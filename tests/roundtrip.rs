//! End-to-end scenarios over the public codec API.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Value};

use fieldlock::{
    CompressionAlgorithm, CompressionLevel, CompressionOptions, EncryptionAlgorithm,
    EncryptionRequest, Error, FieldCodec, MemoryKeyProvider, ENCRYPTION_INFO_KEY,
};

fn codec() -> FieldCodec {
    let provider = MemoryKeyProvider::new();
    provider.add_key("k1", &[0x42u8; 32]);
    FieldCodec::new(Arc::new(provider))
}

fn request(paths: &[&str]) -> EncryptionRequest {
    EncryptionRequest::new(
        "k1",
        EncryptionAlgorithm::RandomizedAeadCbcHmac,
        paths.iter().map(|p| p.to_string()).collect(),
    )
}

fn parse(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).expect("output must stay valid JSON")
}

#[test]
fn scalar_properties_round_trip() {
    let codec = codec();
    let input = br#"{"id":"1","pk":"a","s":"hello","n":42}"#;

    let sealed = codec.encrypt(input, &request(&["/s", "/n"])).unwrap();
    let doc = parse(&sealed);
    assert_eq!(doc["id"], json!("1"));
    assert_eq!(doc["pk"], json!("a"));
    assert!(doc["s"].is_string());
    assert!(doc["n"].is_string());
    let sidecar = &doc[ENCRYPTION_INFO_KEY];
    assert_eq!(sidecar["EncryptionFormatVersion"], json!(3));
    assert_eq!(sidecar["EncryptionAlgorithm"], json!("randomized_aead_cbc_hmac"));
    assert_eq!(sidecar["DataEncryptionKeyId"], json!("k1"));
    assert_eq!(sidecar["EncryptedPaths"], json!(["/s", "/n"]));
    assert_eq!(sidecar["CompressionAlgorithm"], json!("none"));
    assert_eq!(sidecar["EncryptedData"], Value::Null);

    let (restored, report) = codec.decrypt(&sealed).unwrap();
    assert_eq!(parse(&restored), parse(input));
    let report = report.unwrap();
    assert_eq!(report.paths_decrypted, vec!["/s", "/n"]);
    assert_eq!(report.key_id, "k1");
}

#[test]
fn large_values_compress_and_record_their_length() {
    let codec = codec();
    let s = "the quick brown fox jumps over the lazy dog".repeat(64);
    let input = serde_json::to_vec(&json!({"id": "1", "pk": "a", "s": s.clone(), "n": 42})).unwrap();

    let req = request(&["/s", "/n"]).with_compression(CompressionOptions {
        algorithm: CompressionAlgorithm::Deflate,
        level: CompressionLevel::Fastest,
        minimum_size: 64,
    });
    let sealed = codec.encrypt(&input, &req).unwrap();
    let doc = parse(&sealed);
    let sidecar = &doc[ENCRYPTION_INFO_KEY];
    assert_eq!(sidecar["EncryptionFormatVersion"], json!(4));
    assert_eq!(sidecar["CompressionAlgorithm"], json!("deflate"));
    // Only "s" met the minimum size; its exact plaintext length is
    // recorded.
    assert_eq!(sidecar["CompressedEncryptedPaths"]["/s"], json!(s.len()));
    assert!(sidecar["CompressedEncryptedPaths"].get("/n").is_none());

    let (restored, _) = codec.decrypt(&sealed).unwrap();
    let restored = parse(&restored);
    assert_eq!(restored["s"], json!(s));
    assert_eq!(restored["n"], json!(42));
}

#[test]
fn arrays_and_objects_recover_structurally() {
    let codec = codec();
    let input = serde_json::to_vec(&json!({
        "id": "1",
        "a": [1, 2, 3],
        "o": {"k": "v"}
    }))
    .unwrap();

    let sealed = codec.encrypt(&input, &request(&["/a", "/o"])).unwrap();
    let doc = parse(&sealed);
    assert!(doc["a"].is_string());
    assert!(doc["o"].is_string());

    let (restored, _) = codec.decrypt(&sealed).unwrap();
    let restored = parse(&restored);
    assert_eq!(restored["a"], json!([1, 2, 3]));
    assert_eq!(restored["o"], json!({"k": "v"}));
}

#[test]
fn null_properties_are_never_encrypted() {
    let codec = codec();
    let input = br#"{"id":"1","x":null}"#;
    let sealed = codec.encrypt(input, &request(&["/x"])).unwrap();
    let doc = parse(&sealed);
    assert_eq!(doc, parse(input));
    assert!(doc.get(ENCRYPTION_INFO_KEY).is_none());

    let (restored, report) = codec.decrypt(&sealed).unwrap();
    assert_eq!(parse(&restored), parse(input));
    assert!(report.is_none());
}

#[test]
fn the_identifier_path_is_rejected() {
    let codec = codec();
    assert!(matches!(
        codec.encrypt(br#"{"id":"1"}"#, &request(&["/id"])),
        Err(Error::InvalidPath(_))
    ));
}

#[test]
fn unknown_format_versions_demand_an_upgrade() {
    let codec = codec();
    let doc = json!({
        "id": "1",
        "_ei": {
            "EncryptionFormatVersion": 99,
            "EncryptionAlgorithm": "randomized_aead_cbc_hmac",
            "DataEncryptionKeyId": "k1",
            "EncryptedData": null,
            "EncryptedPaths": ["/s"],
            "CompressionAlgorithm": "none",
            "CompressedEncryptedPaths": {}
        }
    });
    let err = codec
        .decrypt(&serde_json::to_vec(&doc).unwrap())
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedFormatVersion(99)));
    assert!(err.to_string().contains("upgrade"));
}

#[test]
fn every_value_kind_round_trips() {
    let codec = codec();
    let doc = json!({
        "id": "1",
        "b_true": true,
        "b_false": false,
        "long": -987654321i64,
        "double": 0.1875,
        "text": "héllo ☂ with \"quotes\" and \\slashes\\",
        "arr": [null, 1, "two", [3.5], {"four": 4}],
        "obj": {"nested": {"deep": [true, null]}}
    });
    let input = serde_json::to_vec(&doc).unwrap();
    let paths = ["/b_true", "/b_false", "/long", "/double", "/text", "/arr", "/obj"];

    let sealed = codec.encrypt(&input, &request(&paths)).unwrap();
    let (restored, report) = codec.decrypt(&sealed).unwrap();
    assert_eq!(parse(&restored), doc);
    assert_eq!(report.unwrap().paths_decrypted.len(), paths.len());
}

#[test]
fn ciphertext_length_is_deterministic() {
    let codec = codec();
    // "hello" serializes to 5 UTF-8 bytes behind a 1-byte marker; the
    // bundled key adds a 12-byte nonce and a 16-byte tag.
    let key = fieldlock::Aes256GcmKey::new(&[0x42u8; 32]);
    use fieldlock::DataEncryptionKey as _;
    let expected_framed = 1 + key.ciphertext_length("hello".len());

    let sealed = codec
        .encrypt(br#"{"id":"1","s":"hello"}"#, &request(&["/s"]))
        .unwrap();
    let doc = parse(&sealed);
    let framed = STANDARD
        .decode(doc["s"].as_str().unwrap().as_bytes())
        .unwrap();
    assert_eq!(framed.len(), expected_framed);
}

#[test]
fn version_upgrades_only_when_something_compressed() {
    let codec = codec();
    let input = br#"{"id":"1","s":"tiny"}"#;
    // Compression requested, but nothing reaches the minimum size.
    let req = request(&["/s"]).with_compression(CompressionOptions {
        algorithm: CompressionAlgorithm::Brotli,
        level: CompressionLevel::Smallest,
        minimum_size: 1 << 16,
    });
    let sealed = codec.encrypt(input, &req).unwrap();
    let doc = parse(&sealed);
    assert_eq!(doc[ENCRYPTION_INFO_KEY]["EncryptionFormatVersion"], json!(3));

    let (restored, _) = codec.decrypt(&sealed).unwrap();
    assert_eq!(parse(&restored), parse(input));
}

#[test]
fn every_compression_algorithm_round_trips() {
    let codec = codec();
    let s = "compressible compressible compressible compressible".repeat(16);
    let input = serde_json::to_vec(&json!({"id": "1", "s": s.clone()})).unwrap();
    for algorithm in [
        CompressionAlgorithm::Deflate,
        CompressionAlgorithm::Gzip,
        CompressionAlgorithm::Brotli,
    ] {
        let req = request(&["/s"]).with_compression(CompressionOptions {
            algorithm,
            level: CompressionLevel::Optimal,
            minimum_size: 64,
        });
        let sealed = codec.encrypt(&input, &req).unwrap();
        let (restored, _) = codec.decrypt(&sealed).unwrap();
        assert_eq!(parse(&restored)["s"], json!(s), "{:?}", algorithm);
    }
}

#[test]
fn tree_and_stream_processors_agree() {
    let codec = codec();
    let doc = json!({
        "id": "1",
        "s": "hello",
        "n": 42,
        "deep": {"s": "untouched"},
        "x": null
    });
    let req = request(&["/s", "/n", "/x"]);

    let from_bytes = codec.encrypt(&serde_json::to_vec(&doc).unwrap(), &req).unwrap();
    let obj = match doc.clone() {
        Value::Object(map) => map,
        _ => unreachable!(),
    };
    let from_tree = codec.encrypt_tree(obj, &req).unwrap();

    // Sidecars are identical apart from the randomized ciphertexts.
    let bytes_doc = parse(&from_bytes);
    let tree_doc = Value::Object(from_tree.clone());
    assert_eq!(
        bytes_doc[ENCRYPTION_INFO_KEY]["EncryptedPaths"],
        tree_doc[ENCRYPTION_INFO_KEY]["EncryptedPaths"]
    );
    assert_eq!(
        bytes_doc[ENCRYPTION_INFO_KEY]["EncryptionFormatVersion"],
        tree_doc[ENCRYPTION_INFO_KEY]["EncryptionFormatVersion"]
    );

    // Both decrypt to the same document.
    let (stream_out, stream_report) = codec.decrypt(&from_bytes).unwrap();
    let (tree_out, tree_report) = codec.decrypt_tree(from_tree).unwrap();
    assert_eq!(parse(&stream_out), doc);
    assert_eq!(Value::Object(tree_out), doc);
    assert_eq!(stream_report, tree_report);
}

#[test]
fn unlisted_properties_survive_decrypt_untouched() {
    let codec = codec();
    let input = serde_json::to_vec(&json!({"id": "1", "s": "hide", "keep": "visible"})).unwrap();
    let sealed = codec.encrypt(&input, &request(&["/s"])).unwrap();
    let (restored, report) = codec.decrypt(&sealed).unwrap();
    let restored = parse(&restored);
    assert_eq!(restored["keep"], json!("visible"));
    assert_eq!(report.unwrap().paths_decrypted, vec!["/s"]);
}

#[test]
fn wrong_key_material_fails_authentication() {
    let provider = MemoryKeyProvider::new();
    provider.add_key("k1", &[0x42u8; 32]);
    let codec = FieldCodec::new(Arc::new(provider));
    let sealed = codec
        .encrypt(br#"{"id":"1","s":"hello"}"#, &request(&["/s"]))
        .unwrap();

    let other_provider = MemoryKeyProvider::new();
    other_provider.add_key("k1", &[0x43u8; 32]);
    let other = FieldCodec::new(Arc::new(other_provider));
    assert!(matches!(other.decrypt(&sealed), Err(Error::AuthFailed)));
}

#[test]
fn legacy_whole_object_round_trip() {
    let codec = codec();
    let input = serde_json::to_vec(&json!({"id": "1", "s": "secret", "n": [1, 2]})).unwrap();
    let mut req = request(&["/s", "/n"]);
    req.algorithm = EncryptionAlgorithm::LegacyAeadCbcHmac;

    let sealed = codec.encrypt(&input, &req).unwrap();
    let doc = parse(&sealed);
    assert!(doc.get("s").is_none());
    assert!(doc.get("n").is_none());
    assert_eq!(doc[ENCRYPTION_INFO_KEY]["EncryptionFormatVersion"], json!(2));
    assert_eq!(
        doc[ENCRYPTION_INFO_KEY]["EncryptionAlgorithm"],
        json!("legacy_aead_cbc_hmac")
    );
    assert!(doc[ENCRYPTION_INFO_KEY]["EncryptedData"].is_string());

    let (restored, report) = codec.decrypt(&sealed).unwrap();
    let restored = parse(&restored);
    assert_eq!(restored["s"], json!("secret"));
    assert_eq!(restored["n"], json!([1, 2]));
    assert_eq!(report.unwrap().paths_decrypted, vec!["/s", "/n"]);
}
