#![no_main]

use index_assembly::index::postings::{decode_id_list, decode_tf_list};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Postings lists arrive from untrusted piece files
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) {
        let _ = decode_tf_list(&value);
        let _ = decode_id_list(&value);
    }
});
