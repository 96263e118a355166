//! Build script for tieralloc.
//!
//! Emits build-time diagnostics for feature combinations that affect the
//! policy engine's behavior.

use std::env;

fn main() {
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_PARKING_LOT");
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_QUANTIZED_HOTNESS");
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_STRICT_RANKING");

    let parking_lot_enabled = env::var("CARGO_FEATURE_PARKING_LOT").is_ok();
    let quantized_enabled = env::var("CARGO_FEATURE_QUANTIZED_HOTNESS").is_ok();
    let strict_enabled = env::var("CARGO_FEATURE_STRICT_RANKING").is_ok();

    let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());
    let is_release = profile == "release";

    if parking_lot_enabled {
        emit_info("Using parking_lot for mutexes (faster lock implementation)");
    } else if is_release {
        emit_note("Tip: Consider enabling 'parking_lot' for better mutex performance:");
        emit_note("  tieralloc = { version = \"0.2\", features = [\"parking_lot\"] }");
    }

    if quantized_enabled {
        emit_info("Quantized hotness enabled (buckets collapse to floor(ln f))");
        emit_note("Threshold values become approximate; the ranking tree stays smaller.");
    }

    if strict_enabled {
        emit_info("Strict ranking enabled (underflow panics instead of saturating)");
        if is_release {
            emit_warning("'strict-ranking' enabled in a release build!");
            emit_note("This aborts the process on accounting mismatches. Intended for debugging.");
        }
    }
}

fn emit_info(msg: &str) {
    println!("cargo:warning=[tieralloc] {}", msg);
}

fn emit_note(msg: &str) {
    println!("cargo:warning=[tieralloc]    {}", msg);
}

fn emit_warning(msg: &str) {
    println!("cargo:warning=[tieralloc] warning: {}", msg);
}
