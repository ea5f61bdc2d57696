fn main() {
    println!("cargo:rerun-if-env-changed=EDGE_NODE_WIFI_SSID");
    println!("cargo:rerun-if-env-changed=EDGE_NODE_WIFI_PASSWORD");
    println!("cargo:rerun-if-env-changed=EDGE_NODE_MQTT_HOST");
    println!("cargo:rerun-if-env-changed=EDGE_NODE_MQTT_PORT");
    println!("cargo:rerun-if-env-changed=EDGE_NODE_MQTT_USER");
    println!("cargo:rerun-if-env-changed=EDGE_NODE_MQTT_PASS");

    // Host builds only compile the unit tests.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() != Ok("none") {
        return;
    }

    if std::env::var("PROFILE").unwrap_or_default() == "release" {
        println!("cargo:rustc-env=DEFMT_LOG=info");
    }
    println!("cargo:rustc-link-arg=-Tdefmt.x");
    println!("cargo:rustc-link-arg=-Tlinkall.x");
}
