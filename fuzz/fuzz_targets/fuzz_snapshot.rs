#![no_main]

use bingo_round_sync::protocol::RoundSnapshot;
use bingo_round_sync::round::RoundStateStore;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Applying any snapshot must leave the store consistent.
    if let Ok(snapshot) = serde_json::from_slice::<RoundSnapshot>(data) {
        let mut store = RoundStateStore::new(3);
        let _ = store.apply_snapshot(&snapshot);
        assert!(store.recent_numbers().len() <= 3);
        assert!(store.recent_numbers().len() <= store.round().called_numbers.len());
    }
});
