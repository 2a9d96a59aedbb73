#![no_main]

use index_assembly::index::postings::{DocPostings, IdListPostings};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|ids: Vec<u32>| {
    let mut list = IdListPostings(ids);
    list.normalize();

    assert!(list.0.windows(2).all(|w| w[0] < w[1]), "not strictly ascending");

    let once = list.clone();
    list.normalize();
    assert_eq!(list, once);
});
