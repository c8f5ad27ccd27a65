#![no_main]

use cellflow::{GraphConfig, Value};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(config) = GraphConfig::from_json(text) {
        assert!(config.max_depth.is_none_or(|depth| depth >= 1));
    }
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(text) {
        let value = Value::from(json);
        let _ = value.to_json();
    }
});
