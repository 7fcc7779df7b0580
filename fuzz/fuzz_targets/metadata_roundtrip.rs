#![no_main]

use std::path::Path;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use wptsync::metadata::{parse, serialize};

const MAX_LEN: usize = 16 * 1024;

#[derive(Arbitrary, Debug)]
struct MetadataInput {
  raw_bytes: Vec<u8>,
  unicode: String,
}

fn lossy_truncate(bytes: &[u8]) -> String {
  let slice = if bytes.len() > MAX_LEN {
    &bytes[..MAX_LEN]
  } else {
    bytes
  };
  String::from_utf8_lossy(slice).into_owned()
}

/// Anything the parser accepts must serialize to text that parses back to
/// the same serialization.
fn check(text: &str) {
  let path = Path::new("fuzz.ini");
  let Ok(file) = parse(path, text) else {
    return;
  };
  let first = serialize(&file);
  let reparsed = match parse(path, &first) {
    Ok(reparsed) => reparsed,
    Err(err) => panic!("serialized metadata failed to parse: {err}\n{first}"),
  };
  assert_eq!(serialize(&reparsed), first);
}

fuzz_target!(|input: MetadataInput| {
  check(&lossy_truncate(&input.raw_bytes));
  check(&input.unicode.chars().take(MAX_LEN).collect::<String>());
});
